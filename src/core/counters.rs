use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::Outcome;

/// Per-outcome totals. Only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounters {
    totals: [u64; 4],
}

impl OutcomeCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, outcome: Outcome, n: u64) {
        let slot = &mut self.totals[outcome.index()];
        *slot = slot.saturating_add(n);
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        self.totals[outcome.index()]
    }

    pub fn total(&self) -> u64 {
        self.totals.iter().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    pub fn iter(&self) -> impl Iterator<Item = (Outcome, u64)> + '_ {
        Outcome::ALL.iter().map(|o| (*o, self.get(*o)))
    }
}

impl Serialize for OutcomeCounters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Outcome::ALL.len()))?;
        for (outcome, n) in self.iter() {
            map.serialize_entry(outcome.as_str(), &n)?;
        }
        map.end()
    }
}
