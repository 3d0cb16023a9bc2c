use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::core::Row;
use crate::xml::{self, Element, XmlError, find_text, find_text_opt};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("レポートファイルを読み取れません: {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Xml(#[from] XmlError),
    #[error("必須要素がありません: {0}")]
    MissingElement(&'static str),
    #[error("タイムスタンプが不正です: {element}={value:?}")]
    InvalidTimestamp { element: &'static str, value: String },
}

/// Time zone used to render `date_range` epochs as calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateZone {
    Local,
    Utc,
}

impl DateZone {
    pub const fn as_str(self) -> &'static str {
        match self {
            DateZone::Local => "local",
            DateZone::Utc => "utc",
        }
    }
}

impl fmt::Display for DateZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DateZone {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(DateZone::Local),
            "utc" => Ok(DateZone::Utc),
            _ => Err(format!(
                "タイムゾーンが不正です: {s}（local|utc を指定してください）"
            )),
        }
    }
}

/// Values shared by every row of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub begin_date: String,
    pub end_date: String,
    pub filename: String,
}

pub fn parse_report_file(path: &Path, zone: DateZone) -> Result<Vec<Row>, ParseError> {
    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let xml = xml::decode_document(&bytes)?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_report_str(&xml, &filename, zone)
}

pub fn parse_report_str(xml: &str, filename: &str, zone: DateZone) -> Result<Vec<Row>, ParseError> {
    let root = xml::parse_document(xml)?;

    let date_range = root
        .find("date_range")
        .ok_or(ParseError::MissingElement("date_range"))?;
    let ctx = ReportContext {
        begin_date: epoch_date(date_range, "begin", zone)?,
        end_date: epoch_date(date_range, "end", zone)?,
        filename: filename.to_string(),
    };

    let rows = root
        .find_all("record")
        .map(|record| normalize_record(record, &ctx))
        .collect();
    Ok(rows)
}

/// Flattens one `<record>`. Only the first DKIM and first SPF entry under
/// `auth_results` are read; a missing or empty `result` falls back to the
/// policy-evaluated value.
pub fn normalize_record(record: &Element, ctx: &ReportContext) -> Row {
    let dkim = find_text(record, "policy_evaluated/dkim", "");
    let spf = find_text(record, "policy_evaluated/spf", "");

    let auth_results = record.find("auth_results");
    let dkim_auth = auth_results.and_then(|a| a.find_all("dkim").next());
    let spf_auth = auth_results.and_then(|a| a.find_all("spf").next());

    let (dkim_domain, dkim_selector, dkim_result) = match dkim_auth {
        Some(auth) => (
            find_text(auth, "domain", ""),
            find_text(auth, "selector", ""),
            find_text_opt(auth, "result").map_or_else(|| dkim.clone(), str::to_string),
        ),
        None => (String::new(), String::new(), dkim.clone()),
    };

    let (spf_domain, spf_scope, spf_result) = match spf_auth {
        Some(auth) => (
            find_text(auth, "domain", ""),
            find_text(auth, "scope", ""),
            find_text_opt(auth, "result").map_or_else(|| spf.clone(), str::to_string),
        ),
        None => (String::new(), String::new(), spf.clone()),
    };

    Row {
        begin_date: ctx.begin_date.clone(),
        end_date: ctx.end_date.clone(),
        source_ip: find_text(record, "source_ip", ""),
        count: find_text(record, "count", ""),
        disposition: find_text(record, "policy_evaluated/disposition", ""),
        dkim,
        spf,
        header_from: find_text(record, "identifiers/header_from", ""),
        envelope_from: find_text(record, "identifiers/envelope_from", ""),
        envelope_to: find_text(record, "identifiers/envelope_to", ""),
        dkim_domain,
        dkim_selector,
        dkim_result,
        spf_domain,
        spf_scope,
        spf_result,
        filename: ctx.filename.clone(),
    }
}

fn epoch_date(date_range: &Element, name: &'static str, zone: DateZone) -> Result<String, ParseError> {
    let raw = find_text_opt(date_range, name).ok_or(ParseError::MissingElement(name))?;
    let invalid = || ParseError::InvalidTimestamp {
        element: name,
        value: raw.to_string(),
    };
    let secs: i64 = raw.parse().map_err(|_| invalid())?;
    format_epoch_date(secs, zone).ok_or_else(invalid)
}

/// `DD/MM/YYYY` for an epoch in the requested zone.
pub fn format_epoch_date(secs: i64, zone: DateZone) -> Option<String> {
    let utc = OffsetDateTime::from_unix_timestamp(secs).ok()?;
    // Leave headroom so shifting into any offset stays in range.
    if !(-9998..=9998).contains(&utc.year()) {
        return None;
    }
    let offset = match zone {
        DateZone::Utc => UtcOffset::UTC,
        DateZone::Local => UtcOffset::local_offset_at(utc).unwrap_or_else(|_| {
            tracing::debug!("ローカルのUTCオフセットを取得できないため UTC を使用します");
            UtcOffset::UTC
        }),
    };
    utc.to_offset(offset)
        .format(format_description!("[day]/[month]/[year]"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn report(records: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feedback>
  <report_metadata>
    <org_name>google.com</org_name>
    <report_id>123</report_id>
    <date_range><begin>1700000000</begin><end>1700003600</end></date_range>
  </report_metadata>
  <policy_published><domain>example.org</domain><p>none</p></policy_published>
{records}
</feedback>"#
        )
    }

    fn record(auth: &str) -> String {
        format!(
            r#"<record>
    <row>
      <source_ip>192.0.2.10</source_ip>
      <count>5</count>
      <policy_evaluated>
        <disposition>none</disposition>
        <dkim>pass</dkim>
        <spf>fail</spf>
      </policy_evaluated>
    </row>
    <identifiers><header_from>example.org</header_from></identifiers>
    <auth_results>{auth}</auth_results>
  </record>"#
        )
    }

    #[test]
    fn policy_value_fills_dkim_result_without_auth_block() {
        let rows = parse_report_str(&report(&record("")), "a.xml", DateZone::Utc).expect("parse");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.dkim_result, "pass");
        assert_eq!(row.dkim_domain, "");
        assert_eq!(row.dkim_selector, "");
        assert_eq!(row.spf_result, "fail");
        assert_eq!(row.spf_domain, "");
        assert_eq!(row.count, "5");
        assert_eq!(row.begin_date, "14/11/2023");
        assert_eq!(row.end_date, "14/11/2023");
        assert_eq!(row.filename, "a.xml");
    }

    #[test]
    fn auth_result_overrides_policy_value() {
        let auth = "<dkim><domain>example.org</domain><selector>s1</selector><result>fail</result></dkim>";
        let rows = parse_report_str(&report(&record(auth)), "a.xml", DateZone::Utc).expect("parse");
        let row = &rows[0];
        assert_eq!(row.dkim, "pass");
        assert_eq!(row.dkim_result, "fail");
        assert_eq!(row.dkim_domain, "example.org");
        assert_eq!(row.dkim_selector, "s1");
    }

    #[test]
    fn missing_auth_result_falls_back_to_policy_value() {
        let auth = "<dkim><domain>example.org</domain></dkim><spf><domain>mail.example.org</domain><scope>mfrom</scope><result></result></spf>";
        let rows = parse_report_str(&report(&record(auth)), "a.xml", DateZone::Utc).expect("parse");
        let row = &rows[0];
        assert_eq!(row.dkim_domain, "example.org");
        assert_eq!(row.dkim_result, "pass");
        assert_eq!(row.spf_domain, "mail.example.org");
        assert_eq!(row.spf_scope, "mfrom");
        assert_eq!(row.spf_result, "fail");
    }

    #[test]
    fn only_first_signature_is_kept() {
        let auth = "<dkim><domain>first.example</domain><result>pass</result></dkim>\
                    <dkim><domain>second.example</domain><result>fail</result></dkim>\
                    <spf><domain>first.example</domain><result>softfail</result></spf>\
                    <spf><domain>second.example</domain><result>pass</result></spf>";
        let rows = parse_report_str(&report(&record(auth)), "a.xml", DateZone::Utc).expect("parse");
        assert_eq!(rows[0].dkim_domain, "first.example");
        assert_eq!(rows[0].dkim_result, "pass");
        assert_eq!(rows[0].spf_domain, "first.example");
        assert_eq!(rows[0].spf_result, "softfail");
    }

    #[test]
    fn one_row_per_record_in_document_order() {
        let records = [record(""), record(""), record("")].join("\n");
        let xml = report(&records).replacen("192.0.2.10", "198.51.100.1", 1);
        let rows = parse_report_str(&xml, "a.xml", DateZone::Utc).expect("parse");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].source_ip, "198.51.100.1");
        assert_eq!(rows[1].source_ip, "192.0.2.10");
    }

    #[test]
    fn report_without_records_yields_no_rows() {
        let rows = parse_report_str(&report(""), "a.xml", DateZone::Utc).expect("parse");
        assert!(rows.is_empty());
    }

    #[test]
    fn optional_identifiers_and_missing_blocks_default_to_empty() {
        let xml = report(
            "<record><row><source_ip>192.0.2.1</source_ip><count>0</count></row></record>",
        );
        let rows = parse_report_str(&xml, "a.xml", DateZone::Utc).expect("parse");
        let row = &rows[0];
        assert_eq!(row.count, "0");
        assert_eq!(row.header_from, "");
        assert_eq!(row.envelope_from, "");
        assert_eq!(row.envelope_to, "");
        assert_eq!(row.dkim_result, "");
    }

    #[test]
    fn envelope_identifiers_are_read_when_present() {
        let xml = report(&record("")).replace(
            "<header_from>example.org</header_from>",
            "<envelope_to>rcpt.example</envelope_to><header_from>example.org</header_from><envelope_from>bounce.example.org</envelope_from>",
        );
        let rows = parse_report_str(&xml, "a.xml", DateZone::Utc).expect("parse");
        assert_eq!(rows[0].envelope_from, "bounce.example.org");
        assert_eq!(rows[0].envelope_to, "rcpt.example");
    }

    #[test]
    fn missing_date_range_is_rejected() {
        let xml = "<feedback><record/></feedback>";
        assert!(matches!(
            parse_report_str(xml, "a.xml", DateZone::Utc),
            Err(ParseError::MissingElement("date_range"))
        ));
    }

    #[test]
    fn missing_end_is_rejected() {
        let xml = "<feedback><date_range><begin>1</begin></date_range></feedback>";
        assert!(matches!(
            parse_report_str(xml, "a.xml", DateZone::Utc),
            Err(ParseError::MissingElement("end"))
        ));
    }

    #[test]
    fn non_integer_timestamp_is_rejected() {
        let xml = "<feedback><date_range><begin>yesterday</begin><end>1</end></date_range></feedback>";
        assert!(matches!(
            parse_report_str(xml, "a.xml", DateZone::Utc),
            Err(ParseError::InvalidTimestamp { element: "begin", .. })
        ));
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        let xml = format!(
            "<feedback><date_range><begin>{}</begin><end>1</end></date_range></feedback>",
            i64::MAX
        );
        assert!(matches!(
            parse_report_str(&xml, "a.xml", DateZone::Utc),
            Err(ParseError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(
            parse_report_str("<feedback><record>", "a.xml", DateZone::Utc),
            Err(ParseError::Xml(_))
        ));
    }

    #[test]
    fn format_epoch_date_uses_day_month_year() {
        assert_eq!(format_epoch_date(0, DateZone::Utc).as_deref(), Some("01/01/1970"));
        assert_eq!(
            format_epoch_date(1_700_000_000, DateZone::Utc).as_deref(),
            Some("14/11/2023")
        );
    }

    #[test]
    fn date_zone_parses_from_str() {
        assert_eq!("UTC".parse::<DateZone>(), Ok(DateZone::Utc));
        assert_eq!("local".parse::<DateZone>(), Ok(DateZone::Local));
        assert!("mars".parse::<DateZone>().is_err());
    }

    #[test]
    fn parse_report_file_uses_base_name_and_declared_encoding() {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "dmarc-ledger-report-test-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("google.com!example.org!1700000000!1700003600.xml");
        std::fs::write(&path, report(&record(""))).expect("write");

        let rows = parse_report_file(&path, DateZone::Utc).expect("parse");
        assert_eq!(
            rows[0].filename,
            "google.com!example.org!1700000000!1700003600.xml"
        );

        let latin1 = dir.join("latin1.xml");
        let mut bytes = report(&record(""))
            .replace("encoding=\"UTF-8\"", "encoding=\"ISO-8859-1\"")
            .replace("<org_name>google.com</org_name>", "<org_name>Soci@t@</org_name>")
            .replace("<header_from>example.org</header_from>", "<header_from>soci@t@.example</header_from>")
            .into_bytes();
        for b in bytes.iter_mut().filter(|b| **b == b'@') {
            *b = 0xe9;
        }
        std::fs::write(&latin1, &bytes).expect("write latin1");
        let rows = parse_report_file(&latin1, DateZone::Utc).expect("parse latin1");
        assert_eq!(rows[0].header_from, "soci\u{e9}t\u{e9}.example");
        assert_eq!(rows[0].count, "5");

        let missing = parse_report_file(&dir.join("missing.xml"), DateZone::Utc);
        assert!(matches!(missing, Err(ParseError::Io { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
