//! Abstract ordered wide-column table with server-side scan hooks.
//!
//! The graph store talks to its backing table only through the traits in
//! this module. [`MemoryCluster`] is the in-process implementation used by
//! tests and embedders; a networked driver implements the same traits and
//! owns its own retry budget, surfacing exhaustion as
//! [`StoreError::Connectivity`](crate::error::StoreError::Connectivity).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::store::StoreProperties;

mod memory;
pub mod staging_file;
pub mod visibility;

pub use memory::MemoryCluster;

/// Column family holding every graph cell.
pub const COLUMN_FAMILY: &str = "e";

/// Default max versions: effectively unbounded.
pub const MAX_VERSIONS: i32 = i32::MAX;

/// One versioned cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    /// Row key.
    pub row: Bytes,
    /// Column family.
    pub family: Bytes,
    /// Column qualifier.
    pub qualifier: Bytes,
    /// Version, in milliseconds.
    pub timestamp: i64,
    /// Visibility expression; empty means visible to everyone.
    pub visibility: Bytes,
    /// Cell value.
    pub value: Bytes,
}

/// Half-open row range `[start, end)`. An empty `end` is unbounded.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RowRange {
    /// Inclusive start.
    pub start: Bytes,
    /// Exclusive end.
    pub end: Bytes,
}

impl RowRange {
    /// Creates a bounded range.
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The whole table.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether `row` falls inside the range.
    pub fn contains(&self, row: &[u8]) -> bool {
        row >= self.start.as_ref() && (self.end.is_empty() || row < self.end.as_ref())
    }
}

/// A scan request: row ranges, authorizations and opaque attributes read by
/// the coprocessor.
#[derive(Clone, Debug, Default)]
pub struct Scan {
    /// Ranges to read. Empty means the whole table.
    pub ranges: Vec<RowRange>,
    /// Labels the caller may read.
    pub authorizations: BTreeSet<String>,
    /// Named attributes.
    pub attributes: BTreeMap<String, Vec<u8>>,
}

impl Scan {
    /// Creates a scan over `ranges`.
    pub fn new(ranges: Vec<RowRange>) -> Self {
        Self {
            ranges,
            ..Self::default()
        }
    }

    /// Sets the authorizations, builder style.
    pub fn authorizations<I, S>(mut self, auths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authorizations = auths.into_iter().map(Into::into).collect();
        self
    }

    /// Sets an attribute, builder style.
    pub fn attribute(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.insert(name.to_owned(), value.into());
        self
    }

    /// Reads an attribute.
    pub fn get_attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes.get(name).map(Vec::as_slice)
    }
}

/// Deletes the cells of `row` carrying exactly `visibility`, optionally
/// narrowed to one qualifier and version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delete {
    /// Row key.
    pub row: Bytes,
    /// Only this qualifier, if set.
    pub qualifier: Option<Bytes>,
    /// Only this version, if set.
    pub timestamp: Option<i64>,
    /// Label scope of the delete.
    pub visibility: Bytes,
}

impl Delete {
    /// A delete removing exactly `cell`.
    pub fn of_cell(cell: &Cell) -> Self {
        Self {
            row: cell.row.clone(),
            qualifier: Some(cell.qualifier.clone()),
            timestamp: Some(cell.timestamp),
            visibility: cell.visibility.clone(),
        }
    }
}

/// Optional tunings recorded on the table descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableTuning {
    /// Override for the column family's max versions.
    pub max_versions: Option<i32>,
    /// Bloom filter type, e.g. `"ROW"`.
    pub bloom_filter: Option<String>,
    /// Locality group name to qualifier prefixes.
    pub locality_groups: BTreeMap<String, Vec<String>>,
}

/// Coprocessor attached to a table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoprocessorSpec {
    /// Registered coprocessor name.
    pub name: String,
    /// Options handed to the coprocessor.
    pub options: BTreeMap<String, String>,
}

/// Table definition used at create time and returned by describe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Table name.
    pub name: String,
    /// The single column family.
    pub family: String,
    /// Versions retained per cell.
    pub max_versions: i32,
    /// Recorded tunings.
    pub tuning: TableTuning,
    /// Attached coprocessor.
    pub coprocessor: Option<CoprocessorSpec>,
}

impl TableDescriptor {
    /// Descriptor with the graph column family and unbounded versions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: COLUMN_FAMILY.to_owned(),
            max_versions: MAX_VERSIONS,
            tuning: TableTuning::default(),
            coprocessor: None,
        }
    }

    /// Applies tunings, builder style.
    pub fn tuning(mut self, tuning: TableTuning) -> Self {
        if let Some(max) = tuning.max_versions {
            self.max_versions = max;
        }
        self.tuning = tuning;
        self
    }

    /// Attaches a coprocessor, builder style.
    pub fn coprocessor(mut self, name: impl Into<String>, options: BTreeMap<String, String>) -> Self {
        self.coprocessor = Some(CoprocessorSpec {
            name: name.into(),
            options,
        });
        self
    }

    /// Option of the attached coprocessor.
    pub fn coprocessor_option(&self, key: &str) -> Option<&str> {
        self.coprocessor.as_ref()?.options.get(key).map(String::as_str)
    }
}

/// Opens connections to a cluster.
pub trait ConnectionFactory: Send + Sync {
    /// Connects using the cluster coordinates in `properties`.
    fn connect(&self, properties: &StoreProperties) -> Result<Arc<dyn Connection>>;
}

/// A live connection.
pub trait Connection: Send + Sync {
    /// Whether [`Connection::close`] was called or the link dropped.
    fn is_closed(&self) -> bool;
    /// Closes the connection. Idempotent.
    fn close(&self);
    /// Administrative handle.
    fn admin(&self) -> Result<Arc<dyn Admin>>;
    /// Data handle for `name`.
    fn table(&self, name: &str) -> Result<Arc<dyn Table>>;
}

/// Table administration.
pub trait Admin: Send + Sync {
    /// Whether the table exists, enabled or not.
    fn table_exists(&self, name: &str) -> Result<bool>;
    /// Creates a table. Fails with [`StoreError::TableExists`] if present.
    fn create_table(&self, descriptor: &TableDescriptor) -> Result<()>;
    /// Returns the descriptor of an existing table.
    fn describe_table(&self, name: &str) -> Result<TableDescriptor>;
    /// Disables a table.
    fn disable_table(&self, name: &str) -> Result<()>;
    /// Whether the table is enabled.
    fn is_table_enabled(&self, name: &str) -> Result<bool>;
    /// Deletes a disabled table.
    fn delete_table(&self, name: &str) -> Result<()>;
    /// Flushes memstores, running the coprocessor's flush hook.
    fn flush(&self, name: &str) -> Result<()>;
    /// Table names.
    fn list_tables(&self) -> Result<Vec<String>>;
}

/// Data operations on one table.
pub trait Table: Send + Sync {
    /// Table name.
    fn name(&self) -> &str;
    /// Writes a batch of cells. The batch succeeds or fails as a whole.
    fn put(&self, cells: Vec<Cell>) -> Result<()>;
    /// Applies a batch of deletes.
    fn delete(&self, deletes: Vec<Delete>) -> Result<()>;
    /// Opens a scanner.
    fn scanner(&self, scan: &Scan) -> Result<Box<dyn ResultScanner>>;
    /// Loads a staged cell file written by [`staging_file::write_cells`].
    fn bulk_load(&self, path: &Path) -> Result<u64> {
        Err(StoreError::Unsupported(format!(
            "bulk load of {} into {}",
            path.display(),
            self.name()
        )))
    }
}

/// Client-side scanner. Each batch carries every visible cell of one row.
pub trait ResultScanner: Send {
    /// Next batch, or `None` when exhausted.
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>>;
    /// Releases resources. Idempotent.
    fn close(&mut self);
}

/// Server-side region scanner, the unit coprocessors wrap.
pub trait RegionScanner: Send {
    /// Next batch, or `None` when exhausted. All cells of a row share a batch.
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>>;
    /// Releases resources. Idempotent.
    fn close(&mut self);
}

/// What a coprocessor knows about the region it runs in.
#[derive(Clone, Copy, Debug)]
pub struct RegionContext<'a> {
    /// Table name.
    pub table: &'a str,
    /// Options from the table's coprocessor spec.
    pub options: &'a BTreeMap<String, String>,
}

/// Server-side extension point.
pub trait RegionObserver: Send + Sync {
    /// Wraps the scanner opened for a client scan.
    fn post_scanner_open(
        &self,
        ctx: RegionContext<'_>,
        scan: &Scan,
        scanner: Box<dyn RegionScanner>,
    ) -> Result<Box<dyn RegionScanner>>;

    /// Wraps the scanner feeding a flush; the output replaces the region.
    fn pre_flush(
        &self,
        ctx: RegionContext<'_>,
        scanner: Box<dyn RegionScanner>,
    ) -> Result<Box<dyn RegionScanner>>;
}
