use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Outcome, OutcomeCounters, Row};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("count が整数ではありません: {value:?}（ファイル: {filename}）")]
    InvalidCount { value: String, filename: String },
    #[error("{mechanism} の認証結果が未知の値です: {value:?}（ファイル: {filename}）")]
    UnknownOutcome {
        mechanism: &'static str,
        value: String,
        filename: String,
    },
}

/// What to do with a DKIM/SPF result outside pass|fail|softfail|none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownOutcomePolicy {
    /// Count it under `none` and warn once per distinct value.
    Bucket,
    Reject,
}

impl UnknownOutcomePolicy {
    pub const fn as_str(self) -> &'static str {
        match self {
            UnknownOutcomePolicy::Bucket => "bucket",
            UnknownOutcomePolicy::Reject => "reject",
        }
    }
}

impl fmt::Display for UnknownOutcomePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnknownOutcomePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bucket" => Ok(UnknownOutcomePolicy::Bucket),
            "reject" => Ok(UnknownOutcomePolicy::Reject),
            _ => Err(format!(
                "未知の認証結果の扱いが不正です: {s}（bucket|reject を指定してください）"
            )),
        }
    }
}

/// DKIM and SPF totals for one run, weighted by each row's `count`.
#[derive(Debug, Clone)]
pub struct Aggregator {
    policy: UnknownOutcomePolicy,
    dkim: OutcomeCounters,
    spf: OutcomeCounters,
    rows_seen: usize,
    warned: BTreeSet<(&'static str, String)>,
}

impl Aggregator {
    pub fn new(policy: UnknownOutcomePolicy) -> Self {
        Self {
            policy,
            dkim: OutcomeCounters::new(),
            spf: OutcomeCounters::new(),
            rows_seen: 0,
            warned: BTreeSet::new(),
        }
    }

    pub fn dkim(&self) -> &OutcomeCounters {
        &self.dkim
    }

    pub fn spf(&self) -> &OutcomeCounters {
        &self.spf
    }

    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    /// Adds one row. Nothing is counted when the row is rejected.
    pub fn add_row(&mut self, row: &Row) -> Result<(), DataError> {
        let count: u64 = row
            .count
            .trim()
            .parse()
            .map_err(|_| DataError::InvalidCount {
                value: row.count.clone(),
                filename: row.filename.clone(),
            })?;
        let dkim = self.classify("dkim", &row.dkim_result, &row.filename)?;
        let spf = self.classify("spf", &row.spf_result, &row.filename)?;

        self.dkim.add(dkim, count);
        self.spf.add(spf, count);
        self.rows_seen += 1;
        Ok(())
    }

    pub fn add_rows<'a>(&mut self, rows: impl IntoIterator<Item = &'a Row>) -> Result<(), DataError> {
        for row in rows {
            self.add_row(row)?;
        }
        Ok(())
    }

    fn classify(
        &mut self,
        mechanism: &'static str,
        value: &str,
        filename: &str,
    ) -> Result<Outcome, DataError> {
        if let Ok(outcome) = value.parse::<Outcome>() {
            return Ok(outcome);
        }
        match self.policy {
            UnknownOutcomePolicy::Reject => Err(DataError::UnknownOutcome {
                mechanism,
                value: value.to_string(),
                filename: filename.to_string(),
            }),
            UnknownOutcomePolicy::Bucket => {
                let key = (mechanism, value.trim().to_ascii_lowercase());
                if !self.warned.contains(&key) {
                    tracing::warn!(
                        mechanism,
                        value,
                        filename,
                        "未知の認証結果を none として集計します"
                    );
                    self.warned.insert(key);
                }
                Ok(Outcome::None)
            }
        }
    }
}
