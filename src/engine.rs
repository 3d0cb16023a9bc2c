use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::aggregate::{Aggregator, UnknownOutcomePolicy};
use crate::core::{OutcomeCounters, Row};
use crate::render::{ChartRenderer, ChartSection, HtmlReport, PieChartRenderer};
use crate::report::DateZone;

/// How a run reacts to an input file that fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailurePolicy {
    FailFast,
    /// Warn, skip the file, keep going. Fails only when every input fails.
    SkipInvalid,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub date_zone: DateZone,
    pub parse_failure: ParseFailurePolicy,
    pub unknown_outcome: UnknownOutcomePolicy,
    /// `None` runs in CSV-only mode.
    pub html_path: Option<PathBuf>,
    pub show_progress: bool,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub ledger_path: PathBuf,
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub ledger_path: String,
    pub html_path: Option<String>,
    pub generated_at: String,
    pub files_parsed: usize,
    pub files_skipped: Vec<SkippedFile>,
    pub rows_appended: usize,
    pub rows_total: usize,
    pub dkim: OutcomeCounters,
    pub spf: OutcomeCounters,
}

pub struct Engine {
    opts: EngineOptions,
    charts: Box<dyn ChartRenderer>,
}

impl Engine {
    pub fn new(opts: EngineOptions) -> Self {
        Self::with_chart_renderer(opts, Box::new(PieChartRenderer::default()))
    }

    pub fn with_chart_renderer(opts: EngineOptions, charts: Box<dyn ChartRenderer>) -> Self {
        Self { opts, charts }
    }

    /// Everything that can fail on bad input (parsing, aggregation, chart
    /// rendering) happens before the ledger is opened for writing.
    pub fn run(&self, req: &RunRequest) -> Result<RunSummary> {
        let html_mode = self.opts.html_path.is_some();

        let prior_rows = if html_mode {
            crate::ledger::read(&req.ledger_path).map_err(crate::exit::io_err)?
        } else {
            Vec::new()
        };

        let (new_rows, files_parsed, files_skipped) = self.parse_inputs(&req.inputs)?;

        let mut agg = Aggregator::new(self.opts.unknown_outcome);
        agg.add_rows(&new_rows)
            .map_err(|e| crate::exit::data_err(e.into()))?;
        if html_mode {
            agg.add_rows(&prior_rows)
                .map_err(|e| {
                    crate::exit::data_err(anyhow::Error::new(e).context(format!(
                        "既存の台帳に不正な行があります: {}",
                        req.ledger_path.display()
                    )))
                })?;
        }

        let generated_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());

        let html = match &self.opts.html_path {
            Some(_) => Some(self.render_html(&agg, &generated_at, &new_rows, &prior_rows)?),
            None => None,
        };

        crate::ledger::append(&new_rows, &req.ledger_path).map_err(crate::exit::io_err)?;
        tracing::info!(
            rows = new_rows.len(),
            ledger = %req.ledger_path.display(),
            "台帳に追記しました"
        );

        if let (Some(path), Some(html)) = (&self.opts.html_path, html) {
            std::fs::write(path, html)
                .with_context(|| format!("HTMLレポートの書き込みに失敗しました: {}", path.display()))
                .map_err(crate::exit::io_err)?;
        }

        Ok(RunSummary {
            ledger_path: req.ledger_path.display().to_string(),
            html_path: self.opts.html_path.as_ref().map(|p| p.display().to_string()),
            generated_at,
            files_parsed,
            files_skipped,
            rows_appended: new_rows.len(),
            rows_total: agg.rows_seen(),
            dkim: *agg.dkim(),
            spf: *agg.spf(),
        })
    }

    fn parse_inputs(&self, inputs: &[PathBuf]) -> Result<(Vec<Row>, usize, Vec<SkippedFile>)> {
        use std::io::IsTerminal;
        let progress_enabled = self.opts.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let mut rows = Vec::new();
        let mut parsed = 0usize;
        let mut skipped = Vec::new();
        let mut first_failure: Option<anyhow::Error> = None;

        for (i, path) in inputs.iter().enumerate() {
            if let Some(pb) = &pb {
                pb.set_message(format!(
                    "レポートを解析中 ({}/{}): {}",
                    i + 1,
                    inputs.len(),
                    path.display()
                ));
            }
            match crate::report::parse_report_file(path, self.opts.date_zone) {
                Ok(file_rows) => {
                    tracing::debug!(path = %path.display(), rows = file_rows.len(), "レポートを解析しました");
                    rows.extend(file_rows);
                    parsed += 1;
                }
                Err(err) => {
                    let err = anyhow::Error::new(err)
                        .context(format!("レポートの解析に失敗しました: {}", path.display()));
                    match self.opts.parse_failure {
                        ParseFailurePolicy::FailFast => {
                            if let Some(pb) = pb {
                                pb.finish_and_clear();
                            }
                            return Err(crate::exit::parse_err(err));
                        }
                        ParseFailurePolicy::SkipInvalid => {
                            let detail = format!("{err:#}");
                            tracing::warn!(path = %path.display(), error = %detail, "解析できないレポートをスキップします");
                            skipped.push(SkippedFile {
                                path: path.display().to_string(),
                                error: detail,
                            });
                            first_failure.get_or_insert(err);
                        }
                    }
                }
            }
        }

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if parsed == 0
            && let Some(err) = first_failure
        {
            return Err(crate::exit::parse_err(
                err.context("解析できたレポートがありません"),
            ));
        }
        Ok((rows, parsed, skipped))
    }

    fn render_html(
        &self,
        agg: &Aggregator,
        generated_at: &str,
        new_rows: &[Row],
        prior_rows: &[Row],
    ) -> Result<String> {
        let dkim_png = self
            .charts
            .render_pie(agg.dkim())
            .context("DKIM グラフの生成に失敗しました")?;
        let spf_png = self
            .charts
            .render_pie(agg.spf())
            .context("SPF グラフの生成に失敗しました")?;
        Ok(crate::render::render_html(&HtmlReport {
            generated_at,
            dkim: ChartSection {
                title: "DKIM Results",
                png: &dkim_png,
                counters: agg.dkim(),
            },
            spf: ChartSection {
                title: "SPF Results",
                png: &spf_png,
                counters: agg.spf(),
            },
            new_rows,
            prior_rows,
        }))
    }
}
