use serde::{Deserialize, Serialize};

/// Ledger column order. Also the CSV header and the HTML table order.
pub const ROW_FIELDS: [&str; 17] = [
    "begin_date",
    "end_date",
    "source_ip",
    "count",
    "disposition",
    "dkim",
    "spf",
    "header_from",
    "envelope_from",
    "envelope_to",
    "dkim_domain",
    "dkim_selector",
    "dkim_result",
    "spf_domain",
    "spf_scope",
    "spf_result",
    "filename",
];

/// One flattened `<record>`. Field order must stay in sync with [`ROW_FIELDS`].
///
/// Columns missing from an older ledger deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Row {
    pub begin_date: String,
    pub end_date: String,
    pub source_ip: String,
    pub count: String,
    pub disposition: String,
    pub dkim: String,
    pub spf: String,
    pub header_from: String,
    pub envelope_from: String,
    pub envelope_to: String,
    pub dkim_domain: String,
    pub dkim_selector: String,
    pub dkim_result: String,
    pub spf_domain: String,
    pub spf_scope: String,
    pub spf_result: String,
    pub filename: String,
}

impl Row {
    /// Values in [`ROW_FIELDS`] order.
    pub fn values(&self) -> [&str; 17] {
        [
            self.begin_date.as_str(),
            self.end_date.as_str(),
            self.source_ip.as_str(),
            self.count.as_str(),
            self.disposition.as_str(),
            self.dkim.as_str(),
            self.spf.as_str(),
            self.header_from.as_str(),
            self.envelope_from.as_str(),
            self.envelope_to.as_str(),
            self.dkim_domain.as_str(),
            self.dkim_selector.as_str(),
            self.dkim_result.as_str(),
            self.spf_domain.as_str(),
            self.spf_scope.as_str(),
            self.spf_result.as_str(),
            self.filename.as_str(),
        ]
    }
}
