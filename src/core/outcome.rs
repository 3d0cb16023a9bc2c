use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Authentication outcome bucket used for the DKIM/SPF totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Softfail,
    None,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [Outcome::Pass, Outcome::Fail, Outcome::Softfail, Outcome::None];

    pub const fn as_str(self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::Fail => "fail",
            Outcome::Softfail => "softfail",
            Outcome::None => "none",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Outcome::Pass => "Pass",
            Outcome::Fail => "Fail",
            Outcome::Softfail => "Softfail",
            Outcome::None => "None",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail => 1,
            Outcome::Softfail => 2,
            Outcome::None => 3,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => Ok(Outcome::Pass),
            "fail" => Ok(Outcome::Fail),
            "softfail" => Ok(Outcome::Softfail),
            "none" => Ok(Outcome::None),
            _ => Err(format!(
                "認証結果が不正です: {s}（pass|fail|softfail|none を指定してください）"
            )),
        }
    }
}
