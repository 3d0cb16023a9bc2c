use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthChar;

use crate::core::Outcome;
use crate::engine::RunSummary;

pub const USAGE: &str = "Usage: dmarc-ledger [OPTIONS] <LEDGER_CSV> <INPUT_XML>...";

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub color: bool,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let causes = cause_lines(err);
    if !causes.is_empty() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細なログは `--verbose` または `RUST_LOG=debug` で確認できます"
    );
    let _ = writeln!(
        stderr,
        "  - 利用可能なオプションは `dmarc-ledger --help` を参照してください"
    );
}

/// `ExitError` repeats its inner message as a source; drop repeats.
fn cause_lines(err: &Error) -> Vec<String> {
    let mut prev = err.to_string();
    let mut out = Vec::new();
    for cause in err.chain().skip(1) {
        let line = cause.to_string();
        if line != prev {
            out.push(line.clone());
        }
        prev = line;
    }
    out
}

/// Usage goes to stdout, like the rest of the tool's normal output.
pub fn print_usage() {
    let mut out = io::stdout().lock();
    let _ = writeln!(out, "{USAGE}");
}

pub fn print_run_summary(summary: &RunSummary, cfg: &UiConfig) {
    let mut out = io::stdout().lock();
    if !cfg.quiet {
        let _ = writeln!(out, "CSVを保存しました: {}", summary.ledger_path);
        if let Some(html) = &summary.html_path {
            let _ = writeln!(out, "HTMLレポートを保存しました: {html}");
        }
    }

    if !cfg.verbose {
        return;
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "解析: {}件  スキップ: {}件  追記: {}行  集計対象: {}行",
        summary.files_parsed,
        summary.files_skipped.len(),
        summary.rows_appended,
        summary.rows_total
    );
    for skipped in &summary.files_skipped {
        let _ = writeln!(out, "- スキップ: {}（{}）", skipped.path, skipped.error);
    }
    print_counters_table(&mut out, summary, cfg.color);
}

fn print_counters_table(out: &mut dyn Write, summary: &RunSummary, color: bool) {
    let label_outcome = "結果";
    let label_dkim = "DKIM";
    let label_spf = "SPF";

    let outcome_w = Outcome::ALL
        .iter()
        .map(|o| visible_width_ansi(o.as_str()))
        .max()
        .unwrap_or(0)
        .max(visible_width_ansi(label_outcome));
    let num_w = Outcome::ALL
        .iter()
        .flat_map(|o| [summary.dkim.get(*o), summary.spf.get(*o)])
        .map(|n| n.to_string().len())
        .max()
        .unwrap_or(0)
        .max(label_dkim.len());

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}  {}  {}",
        pad_end_display(label_outcome, outcome_w),
        pad_start_display(label_dkim, num_w),
        pad_start_display(label_spf, num_w)
    );
    let _ = writeln!(
        out,
        "{}  {}  {}",
        "-".repeat(outcome_w),
        "-".repeat(num_w),
        "-".repeat(num_w)
    );
    for outcome in Outcome::ALL {
        let label = pad_end_display(&format_outcome(outcome, color), outcome_w);
        let _ = writeln!(
            out,
            "{label}  {}  {}",
            pad_start_display(&summary.dkim.get(outcome).to_string(), num_w),
            pad_start_display(&summary.spf.get(outcome).to_string(), num_w)
        );
    }
}

fn format_outcome(outcome: Outcome, color: bool) -> String {
    let s = outcome.as_str();
    if !color {
        return s.to_string();
    }

    let code = match outcome {
        Outcome::Pass => "32",
        Outcome::Fail => "31",
        Outcome::Softfail => "33",
        Outcome::None => "90",
    };
    format!("\x1b[{code}m{s}\x1b[0m")
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = visible_width_ansi(s);
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}

fn visible_width_ansi(s: &str) -> usize {
    let mut width: usize = 0;
    let mut chars = s.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\x1b' && chars.peek() == Some(&'[') {
            let _ = chars.next();
            for ch2 in chars.by_ref() {
                if ch2 == 'm' {
                    break;
                }
            }
            continue;
        }
        width = width.saturating_add(UnicodeWidthChar::width(ch).unwrap_or(0));
    }
    width
}
