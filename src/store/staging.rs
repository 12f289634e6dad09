//! Staged bulk import: elements are encoded into a sorted cell file under
//! the staging directory, then handed to the table's bulk loader.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::{Result, StoreError};
use crate::model::Element;
use crate::storage::{ElementCodec, StoreMetrics};
use crate::table::{staging_file, Cell, Table};

use super::options::StoreProperties;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Outcome of a staged import.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingReport {
    /// The staged file. Removed after a successful load.
    pub path: PathBuf,
    /// Elements encoded.
    pub elements: u64,
    /// Cells written to the file.
    pub cells: u64,
    /// Whether the file was loaded into the table.
    pub loaded: bool,
}

fn staged_file_name(table: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{table}-{millis}-{seq:06}.wgstage")
}

/// Stages `elements` and, unless `skipImportFromHdfs` is set, loads them.
pub(crate) fn import_elements<I>(
    table: &dyn Table,
    codec: &ElementCodec,
    metrics: &dyn StoreMetrics,
    properties: &StoreProperties,
    elements: I,
) -> Result<StagingReport>
where
    I: IntoIterator<Item = Element>,
{
    let dir = properties
        .hdfs_staging_path
        .as_ref()
        .ok_or_else(|| StoreError::config("hdfsStagingPath is required for staged imports"))?;
    fs::create_dir_all(dir)?;

    let mut cells: Vec<Cell> = Vec::new();
    let mut count = 0u64;
    for element in elements {
        let encoded = codec.encode(&element)?;
        let before = cells.len();
        cells.extend(encoded.cells());
        metrics.element_written();
        if cells.len() - before > 1 {
            metrics.duplicate_edge_row_written();
        }
        count += 1;
    }

    let path = dir.join(staged_file_name(table.name()));
    let written = staging_file::write_cells(&path, cells)?;
    info!(table = table.name(), path = %path.display(), cells = written, "staging.file.written");
    if properties.skip_import_from_hdfs {
        return Ok(StagingReport {
            path,
            elements: count,
            cells: written,
            loaded: false,
        });
    }
    table.bulk_load(&path)?;
    fs::remove_file(&path)?;
    Ok(StagingReport {
        path,
        elements: count,
        cells: written,
        loaded: true,
    })
}
