use std::io;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::error::ErrorKind;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::aggregate::UnknownOutcomePolicy;
use crate::config::EffectiveConfig;
use crate::engine::{Engine, EngineOptions, ParseFailurePolicy, RunRequest};
use crate::report::DateZone;
use crate::ui::UiConfig;

#[derive(Debug, Parser)]
#[command(
    name = "dmarc-ledger",
    version,
    about = "DMARC集約レポート(XML)をCSV台帳に追記し、DKIM/SPFの結果をHTMLレポートにまとめる"
)]
pub struct Cli {
    /// 追記先のCSV台帳
    #[arg(value_name = "LEDGER_CSV")]
    pub ledger: Option<PathBuf>,
    /// DMARC集約レポート(XML)
    #[arg(value_name = "INPUT_XML")]
    pub inputs: Vec<PathBuf>,

    /// HTMLレポートを生成しない
    #[arg(long = "csv-only")]
    pub csv_only: bool,
    /// HTMLレポートの出力先
    #[arg(long, value_name = "PATH")]
    pub html: Option<PathBuf>,
    /// 解析できないXMLを警告してスキップする
    #[arg(long = "skip-invalid")]
    pub skip_invalid: bool,
    /// 日付をUTCで表示する（既定はローカル時刻）
    #[arg(long)]
    pub utc: bool,
    /// 未知の認証結果の扱い
    #[arg(long = "unknown-outcome", value_name = "bucket|reject")]
    pub unknown_outcome: Option<UnknownOutcomePolicy>,

    #[arg(long)]
    pub json: bool,
    #[arg(long = "no-color")]
    pub no_color: bool,
    #[arg(long, conflicts_with = "quiet")]
    pub verbose: bool,
    #[arg(long)]
    pub quiet: bool,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// 有効な設定をJSONで表示して終了する
    #[arg(long = "show-config")]
    pub show_config: bool,
}

pub fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => err.exit(),
            _ => {
                crate::ui::print_usage();
                let message = err.to_string();
                let first = message.lines().next().unwrap_or("引数が不正です");
                return Err(crate::exit::usage(first.to_string()));
            }
        },
    };

    init_tracing(&cli);

    let env_config_path = std::env::var_os("DMARC_LEDGER_CONFIG").map(PathBuf::from);
    let home_dir = crate::config::home_dir();
    let mut cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        home_dir.as_deref(),
    )
    .map_err(crate::exit::usage_err)?;
    apply_cli_overrides(&mut cfg, &cli);

    if cli.show_config {
        return write_json(&cfg);
    }

    let Some(ledger_path) = cli.ledger.clone().filter(|_| !cli.inputs.is_empty()) else {
        crate::ui::print_usage();
        return Err(crate::exit::usage(
            "台帳CSVと1つ以上の入力XMLを指定してください",
        ));
    };

    let ui_cfg = UiConfig {
        color: io::stdout().is_terminal()
            && !cli.no_color
            && std::env::var_os("NO_COLOR").is_none(),
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let engine = Engine::new(engine_options(&cfg, &cli));
    tracing::debug!(
        ledger = %ledger_path.display(),
        inputs = cli.inputs.len(),
        html = cfg.report.html,
        "実行を開始します"
    );
    let summary = engine.run(&RunRequest {
        ledger_path,
        inputs: cli.inputs,
    })?;

    if cli.json {
        write_json(&summary)?;
    } else {
        crate::ui::print_run_summary(&summary, &ui_cfg);
    }
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .without_time(),
        )
        .try_init();
}

fn apply_cli_overrides(cfg: &mut EffectiveConfig, cli: &Cli) {
    if cli.csv_only {
        cfg.report.html = false;
    }
    if let Some(html) = &cli.html {
        cfg.report.html_path = html.clone();
    }
    if cli.skip_invalid {
        cfg.parse.skip_invalid = true;
    }
    if cli.utc {
        cfg.parse.timezone = DateZone::Utc;
    }
    if let Some(policy) = cli.unknown_outcome {
        cfg.aggregate.unknown_outcome = policy;
    }
}

fn engine_options(cfg: &EffectiveConfig, cli: &Cli) -> EngineOptions {
    EngineOptions {
        date_zone: cfg.parse.timezone,
        parse_failure: if cfg.parse.skip_invalid {
            ParseFailurePolicy::SkipInvalid
        } else {
            ParseFailurePolicy::FailFast
        },
        unknown_outcome: cfg.aggregate.unknown_outcome,
        html_path: cfg.report.html.then(|| cfg.report.html_path.clone()),
        show_progress: io::stderr().is_terminal() && !cli.quiet && !cli.json,
    }
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}
