//! Cumulative CSV ledger. Append-only; the header is written once, when the
//! file is created or still empty. There is no locking, so concurrent runs
//! against one path must be serialized by the caller.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};

use crate::core::{ROW_FIELDS, Row};

/// Rows already stored at `path`, in file order. A missing file is an empty
/// ledger.
pub fn read(path: &Path) -> Result<Vec<Row>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| {
                format!("台帳ファイルの読み取りに失敗しました: {}", path.display())
            });
        }
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    let mut rows = Vec::new();
    for (i, record) in reader.deserialize::<Row>().enumerate() {
        let row = record.with_context(|| {
            format!(
                "台帳ファイルの {} 行目を解析できません: {}",
                i + 2,
                path.display()
            )
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Appends `rows` after whatever is already stored at `path`.
pub fn append(rows: &[Row], path: &Path) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("台帳ファイルを開けません: {}", path.display()))?;
    let needs_header = file
        .metadata()
        .with_context(|| format!("台帳ファイルの情報を取得できません: {}", path.display()))?
        .len()
        == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if needs_header {
        writer
            .write_record(ROW_FIELDS)
            .with_context(|| format!("台帳ヘッダーの書き込みに失敗しました: {}", path.display()))?;
    }
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("台帳への書き込みに失敗しました: {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("台帳への書き込みに失敗しました: {}", path.display()))?;
    Ok(())
}
