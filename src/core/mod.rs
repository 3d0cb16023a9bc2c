mod counters;
mod outcome;
mod row;

pub use counters::OutcomeCounters;
pub use outcome::Outcome;
pub use row::{ROW_FIELDS, Row};
