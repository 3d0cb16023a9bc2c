use std::fmt::Write as _;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::core::{Outcome, OutcomeCounters, ROW_FIELDS, Row};
use crate::render::chart::outcome_color;

const COLUMN_TITLES: [&str; 17] = [
    "Begin Date",
    "End Date",
    "Source IP",
    "Count",
    "Disposition",
    "DKIM",
    "SPF",
    "Header From",
    "Envelope From",
    "Envelope To",
    "DKIM Domain",
    "DKIM Selector",
    "DKIM Result",
    "SPF Domain",
    "SPF Scope",
    "SPF Result",
    "Filename",
];

const STYLE: &str = "body { font-family: sans-serif; margin: 2em; }
table { border-collapse: collapse; width: 100%; font-size: 0.9em; }
th, td { border: 1px solid #ccc; padding: 4px 6px; text-align: left; }
th { background: #f4f4f4; }
.charts { display: flex; gap: 2em; flex-wrap: wrap; }
figure { margin: 0; flex: 1 1 320px; }
figure img { max-width: 100%; }
.swatch { display: inline-block; width: 0.8em; height: 0.8em; margin-right: 0.3em; }
.annotation { font-weight: bold; }";

/// One pie chart plus the counts it was drawn from.
pub struct ChartSection<'a> {
    pub title: &'a str,
    pub png: &'a [u8],
    pub counters: &'a OutcomeCounters,
}

pub struct HtmlReport<'a> {
    pub generated_at: &'a str,
    pub dkim: ChartSection<'a>,
    pub spf: ChartSection<'a>,
    /// Rows from this run, listed first.
    pub new_rows: &'a [Row],
    /// Rows loaded back from the ledger.
    pub prior_rows: &'a [Row],
}

pub fn render_html(report: &HtmlReport<'_>) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(out, "<html>");
    let _ = writeln!(out, "<head>");
    let _ = writeln!(out, "<meta charset=\"utf-8\">");
    let _ = writeln!(out, "<title>DMARC Report</title>");
    let _ = writeln!(out, "<style>\n{STYLE}\n</style>");
    let _ = writeln!(out, "</head>");
    let _ = writeln!(out, "<body>");
    let _ = writeln!(out, "<h1>DMARC Report</h1>");
    let _ = writeln!(
        out,
        "<p>Generated at {} &middot; {} records</p>",
        escape_html(report.generated_at),
        report.new_rows.len() + report.prior_rows.len()
    );

    let _ = writeln!(out, "<div class=\"charts\">");
    write_chart(&mut out, &report.dkim);
    write_chart(&mut out, &report.spf);
    let _ = writeln!(out, "</div>");

    let _ = writeln!(out, "<table>");
    let _ = writeln!(out, "<thead>");
    let _ = write!(out, "<tr>");
    for (title, field) in COLUMN_TITLES.iter().zip(ROW_FIELDS) {
        let _ = write!(out, "<th data-field=\"{field}\">{}</th>", escape_html(title));
    }
    let _ = writeln!(out, "</tr>");
    let _ = writeln!(out, "</thead>");
    let _ = writeln!(out, "<tbody>");
    for row in report.new_rows.iter().chain(report.prior_rows) {
        let _ = write!(out, "<tr>");
        for value in row.values() {
            let _ = write!(out, "<td>{}</td>", escape_html(value));
        }
        let _ = writeln!(out, "</tr>");
    }
    let _ = writeln!(out, "</tbody>");
    let _ = writeln!(out, "</table>");
    let _ = writeln!(out, "</body>");
    let _ = writeln!(out, "</html>");

    out
}

fn write_chart(out: &mut String, section: &ChartSection<'_>) {
    let title = escape_html(section.title);
    let counters = section.counters;
    let total = counters.total();

    let _ = writeln!(out, "<figure>");
    let _ = writeln!(out, "<h2>{title}</h2>");
    let _ = writeln!(
        out,
        "<img src=\"data:image/png;base64,{}\" alt=\"{title}\">",
        STANDARD.encode(section.png)
    );
    let _ = writeln!(out, "<figcaption>");
    let _ = writeln!(
        out,
        "<p class=\"annotation\">Failed: {}<br>Softfailed: {}</p>",
        counters.get(Outcome::Fail),
        counters.get(Outcome::Softfail)
    );
    let _ = writeln!(out, "<ul>");
    for (outcome, n) in counters.iter() {
        let plotters::style::RGBColor(r, g, b) = outcome_color(outcome);
        let _ = writeln!(
            out,
            "<li><span class=\"swatch\" style=\"background:#{r:02x}{g:02x}{b:02x}\"></span>{}: {n} ({})</li>",
            outcome.label(),
            percent(n, total)
        );
    }
    let _ = writeln!(out, "</ul>");
    let _ = writeln!(out, "</figcaption>");
    let _ = writeln!(out, "</figure>");
}

fn percent(n: u64, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", n as f64 * 100.0 / total as f64)
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
