//! CSV sink for scrape output and the matching reader used by `ingest`.

use std::path::{Path, PathBuf};

use grocer_core::{normalize_name, NormalizedRecord, CSV_HEADER};

/// Writes `records` to `{dir}/{stem}.csv` under the standard header and
/// returns the path. The header is written even when there are no records.
pub(crate) fn write_records_csv(
    dir: &Path,
    stem: &str,
    records: &[NormalizedRecord],
) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{stem}.csv"));

    let mut writer = csv::Writer::from_path(&path)?;
    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record([
            &record.name,
            &record.product_ref,
            &record.price,
            &record.category,
            &record.store,
        ])?;
    }
    writer.flush()?;

    Ok(path)
}

/// Reads a CSV written by [`write_records_csv`].
///
/// Only the header width is checked, so files with translated or renamed
/// column titles still load. Fields are trimmed and names are cleaned with
/// the same rules the scrapers apply.
pub(crate) fn read_records_csv(path: &Path) -> anyhow::Result<Vec<NormalizedRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let header = reader.headers()?;
    if header.len() != CSV_HEADER.len() {
        anyhow::bail!(
            "invalid CSV header in {}: expected {:?}, got {:?}",
            path.display(),
            CSV_HEADER,
            header.iter().collect::<Vec<_>>()
        );
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let field = |i: usize| row.get(i).unwrap_or_default().to_owned();
        records.push(NormalizedRecord {
            name: normalize_name(&field(0)),
            product_ref: field(1),
            price: field(2),
            category: field(3),
            store: field(4),
        });
    }

    Ok(records)
}
