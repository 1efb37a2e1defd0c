pub mod fact_store;
pub mod missing_queue;

pub use fact_store::{FactStore, UpsertStats};
pub use missing_queue::MissingQueue;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Reads a CSV file whose header must equal `columns` exactly.
/// A missing or zero-length file yields no rows.
pub(crate) fn read_table<T: DeserializeOwned>(path: &Path, columns: &[&str]) -> anyhow::Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut rdr = csv::ReaderBuilder::new()
        .from_path(path)
        .with_context(|| format!("open {} failed", path.display()))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("read header of {} failed", path.display()))?
        .clone();
    if headers.is_empty() {
        return Ok(Vec::new());
    }

    if !headers.iter().eq(columns.iter().copied()) {
        anyhow::bail!(
            "unexpected columns in {}: expected [{}], found [{}]",
            path.display(),
            columns.join(","),
            headers.iter().collect::<Vec<_>>().join(",")
        );
    }

    let mut out = Vec::new();
    for (idx, rec) in rdr.deserialize::<T>().enumerate() {
        let row = rec.with_context(|| format!("{}: bad record on data line {}", path.display(), idx + 1))?;
        out.push(row);
    }
    Ok(out)
}

/// Writes the header and all rows to a sibling temp file, then renames it over `path`, so readers
/// only ever see a complete table.
pub(crate) fn write_table<'a, T, I>(path: &Path, columns: &[&str], rows: I) -> anyhow::Result<()>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create directory {} failed", parent.display()))?;
    }

    let tmp = temp_path(path);
    let file = std::fs::File::create(&tmp).with_context(|| format!("create {} failed", tmp.display()))?;
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(file);

    wtr.write_record(columns)
        .with_context(|| format!("write header to {} failed", tmp.display()))?;
    for row in rows {
        wtr.serialize(row)
            .with_context(|| format!("write row to {} failed", tmp.display()))?;
    }
    wtr.flush()
        .with_context(|| format!("flush {} failed", tmp.display()))?;

    let file = wtr
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush {} failed: {}", tmp.display(), e.error()))?;
    file.sync_all()
        .with_context(|| format!("sync {} failed", tmp.display()))?;
    drop(file);

    std::fs::rename(&tmp, path)
        .with_context(|| format!("replace {} failed", path.display()))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
