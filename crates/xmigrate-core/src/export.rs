//! CSV exports for operator auditing.
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! reader never sees a half-written table.

use crate::config::ExportConfig;
use crate::id_map::IdentifierMap;
use crate::kind::ResourceKind;
use crate::transport::MetadataRow;
use crate::{MigrateError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Write one `{kind}_id_map.csv` per populated partition of `id_map`.
///
/// Returns the paths written.
pub fn export_id_maps(id_map: &IdentifierMap, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for kind in id_map.kinds() {
        let path = output_dir.join(format!("{}{}", kind, ExportConfig::ID_MAP_SUFFIX));
        let rows = id_map
            .entries(kind)
            .into_iter()
            .map(|(source, destination)| vec![source, destination]);
        write_csv(&path, &["source_id", "destination_id"], rows)?;
        written.push(path);
    }
    info!(
        "Exported {} identifier maps to {}",
        written.len(),
        output_dir.display()
    );
    Ok(written)
}

/// Write the listing metadata of one kind to `{dir}/{collection}_metadata.csv`.
pub fn export_metadata(
    kind: ResourceKind,
    rows: &[MetadataRow],
    output_dir: &Path,
) -> Result<PathBuf> {
    let path = output_dir.join(format!(
        "{}{}",
        kind.collection(),
        ExportConfig::METADATA_SUFFIX
    ));

    let present: BTreeSet<&str> = rows
        .iter()
        .flat_map(|row| row.keys().map(String::as_str))
        .collect();
    let mut header: Vec<&str> = ExportConfig::METADATA_COLUMNS
        .iter()
        .copied()
        .filter(|column| present.contains(column))
        .collect();
    header.extend(
        present
            .iter()
            .copied()
            .filter(|column| !ExportConfig::METADATA_COLUMNS.contains(column)),
    );

    let records = rows.iter().map(|row| {
        header
            .iter()
            .map(|column| row.get(*column).cloned().unwrap_or_default())
            .collect::<Vec<_>>()
    });
    write_csv(&path, &header, records)?;
    Ok(path)
}

fn write_csv<I>(path: &Path, header: &[&str], rows: I) -> Result<()>
where
    I: IntoIterator<Item = Vec<String>>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| MigrateError::io_with_path(e, parent))?;
    }

    let temp_path = path.with_extension(format!("csv.{}.tmp", std::process::id()));
    {
        let mut writer = csv::Writer::from_path(&temp_path)?;
        if !header.is_empty() {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.write_record(&row)?;
        }
        writer
            .flush()
            .map_err(|e| MigrateError::io_with_path(e, &temp_path))?;
    }

    fs::rename(&temp_path, path).map_err(|e| MigrateError::io_with_path(e, path))?;
    debug!("Wrote {}", path.display());
    Ok(())
}
