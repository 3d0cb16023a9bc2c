use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::aggregate::UnknownOutcomePolicy;
use crate::report::DateZone;

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub report: ReportConfig,
    pub parse: ParseConfig,
    pub aggregate: AggregateConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub html: bool,
    pub html_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParseConfig {
    pub timezone: DateZone,
    pub skip_invalid: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateConfig {
    pub unknown_outcome: UnknownOutcomePolicy,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            report: ReportConfig {
                html: true,
                html_path: PathBuf::from("report.html"),
            },
            parse: ParseConfig {
                timezone: DateZone::Local,
                skip_invalid: false,
            },
            aggregate: AggregateConfig {
                unknown_outcome: UnknownOutcomePolicy::Bucket,
            },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    report: Option<RawReportConfig>,
    parse: Option<RawParseConfig>,
    aggregate: Option<RawAggregateConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReportConfig {
    html: Option<bool>,
    html_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawParseConfig {
    timezone: Option<DateZone>,
    skip_invalid: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAggregateConfig {
    unknown_outcome: Option<UnknownOutcomePolicy>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/dmarc-ledger/config.toml")
}

pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

/// Defaults, then the TOML file (if present), then `DMARC_LEDGER_*` variables.
pub fn load(config_path: Option<&Path>, home_dir: Option<&Path>) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .or_else(|| home_dir.map(default_config_path));

    if let Some(path) = path.filter(|p| p.exists()) {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("設定ファイル(TOML)の解析に失敗しました: {}", path.display()))?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(report) = raw.report {
        if let Some(html) = report.html {
            cfg.report.html = html;
        }
        if let Some(html_path) = report.html_path {
            cfg.report.html_path = html_path;
        }
    }

    if let Some(parse) = raw.parse {
        if let Some(timezone) = parse.timezone {
            cfg.parse.timezone = timezone;
        }
        if let Some(skip_invalid) = parse.skip_invalid {
            cfg.parse.skip_invalid = skip_invalid;
        }
    }

    if let Some(aggregate) = raw.aggregate {
        if let Some(unknown_outcome) = aggregate.unknown_outcome {
            cfg.aggregate.unknown_outcome = unknown_outcome;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("DMARC_LEDGER_REPORT_HTML") {
        cfg.report.html = parse_bool(&v).with_context(|| "DMARC_LEDGER_REPORT_HTML")?;
    }
    if let Ok(v) = std::env::var("DMARC_LEDGER_REPORT_HTML_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            cfg.report.html_path = PathBuf::from(v);
        }
    }
    if let Ok(v) = std::env::var("DMARC_LEDGER_PARSE_TIMEZONE") {
        cfg.parse.timezone = v
            .parse::<DateZone>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "DMARC_LEDGER_PARSE_TIMEZONE")?;
    }
    if let Ok(v) = std::env::var("DMARC_LEDGER_PARSE_SKIP_INVALID") {
        cfg.parse.skip_invalid =
            parse_bool(&v).with_context(|| "DMARC_LEDGER_PARSE_SKIP_INVALID")?;
    }
    if let Ok(v) = std::env::var("DMARC_LEDGER_AGGREGATE_UNKNOWN_OUTCOME") {
        cfg.aggregate.unknown_outcome = v
            .parse::<UnknownOutcomePolicy>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "DMARC_LEDGER_AGGREGATE_UNKNOWN_OUTCOME")?;
    }

    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
