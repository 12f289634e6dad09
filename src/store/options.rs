use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::schema::SchemaPayload;
use crate::table::TableTuning;

/// Default number of cell writes buffered before a flush.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 1_000_000;

/// Default bound of the adjacent-seed dedupe set.
pub const DEFAULT_ADJACENT_SEED_DEDUPE_CAPACITY: usize = 100_000;

/// Process-level store configuration.
///
/// Keys are camelCase so property files from existing deployments load
/// unchanged:
///
/// ```toml
/// tableName = "graph"
/// zookeepers = "zk1:2181,zk2:2181"
/// writeBufferSize = 5000
///
/// [tableTuning]
/// bloomFilter = "ROW"
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreProperties {
    /// Backing table name.
    pub table_name: String,
    /// Cluster coordinates handed to the connection factory.
    pub zookeepers: String,
    /// Cell writes per ingest batch.
    #[serde(default = "default_write_buffer_size")]
    pub write_buffer_size: usize,
    /// Directory for staged bulk imports.
    #[serde(default)]
    pub hdfs_staging_path: Option<PathBuf>,
    /// Prepare staged files without loading them.
    #[serde(default)]
    pub skip_import_from_hdfs: bool,
    /// Swap returned edge endpoints so the matched seed is the source.
    #[serde(default)]
    pub return_matched_id_as_edge_source: bool,
    /// Bound of the set used to dedupe adjacent seeds.
    #[serde(default = "default_adjacent_seed_dedupe_capacity")]
    pub adjacent_seed_dedupe_capacity: usize,
    /// How the schema is written into the coprocessor options.
    #[serde(default)]
    pub schema_payload: SchemaPayload,
    /// Tunings recorded on the table descriptor.
    #[serde(default)]
    pub table_tuning: TableTuning,
}

fn default_write_buffer_size() -> usize {
    DEFAULT_WRITE_BUFFER_SIZE
}

fn default_adjacent_seed_dedupe_capacity() -> usize {
    DEFAULT_ADJACENT_SEED_DEDUPE_CAPACITY
}

impl StoreProperties {
    /// Creates properties for `table_name` on the cluster at `zookeepers`.
    pub fn new(table_name: impl Into<String>, zookeepers: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            zookeepers: zookeepers.into(),
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            hdfs_staging_path: None,
            skip_import_from_hdfs: false,
            return_matched_id_as_edge_source: false,
            adjacent_seed_dedupe_capacity: DEFAULT_ADJACENT_SEED_DEDUPE_CAPACITY,
            schema_payload: SchemaPayload::default(),
            table_tuning: TableTuning::default(),
        }
    }

    /// Parses TOML.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let props: Self =
            toml::from_str(text).map_err(|err| StoreError::config(format!("store properties: {err}")))?;
        props.validate()?;
        Ok(props)
    }

    /// Sets the ingest buffer size.
    pub fn write_buffer_size(mut self, cells: usize) -> Self {
        self.write_buffer_size = cells;
        self
    }

    /// Sets the staging directory.
    pub fn hdfs_staging_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.hdfs_staging_path = Some(path.into());
        self
    }

    /// Prepare staged files without loading them.
    pub fn skip_import_from_hdfs(mut self, skip: bool) -> Self {
        self.skip_import_from_hdfs = skip;
        self
    }

    /// Swap endpoints so the matched seed is reported as the source.
    pub fn return_matched_id_as_edge_source(mut self, enabled: bool) -> Self {
        self.return_matched_id_as_edge_source = enabled;
        self
    }

    /// Sets the adjacent-seed dedupe bound.
    pub fn adjacent_seed_dedupe_capacity(mut self, capacity: usize) -> Self {
        self.adjacent_seed_dedupe_capacity = capacity;
        self
    }

    /// Sets the schema payload form.
    pub fn schema_payload(mut self, payload: SchemaPayload) -> Self {
        self.schema_payload = payload;
        self
    }

    /// Sets the table tunings.
    pub fn table_tuning(mut self, tuning: TableTuning) -> Self {
        self.table_tuning = tuning;
        self
    }

    /// Checks required keys and bounds.
    pub fn validate(&self) -> Result<()> {
        if self.table_name.trim().is_empty() {
            return Err(StoreError::config("tableName is required"));
        }
        if self.zookeepers.trim().is_empty() {
            return Err(StoreError::config("zookeepers is required"));
        }
        if self.write_buffer_size == 0 {
            return Err(StoreError::config("writeBufferSize must be positive"));
        }
        Ok(())
    }
}
