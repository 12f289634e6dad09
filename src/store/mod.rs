//! The graph store: schema, connection management and the ingest and
//! retrieval engines over one backing table.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::model::{Element, ElementSeed, EntitySeed, User};
use crate::schema::Schema;
use crate::storage::{default_metrics, ElementCodec, StoreMetrics};
use crate::table::{Connection, ConnectionFactory, Table};
use crate::view::View;

mod ingest;
mod operation;
mod options;
mod retrieve;
mod staging;

/// Creation, clearing and dropping of the backing table.
pub mod table_utils;

pub use ingest::IngestReport;
pub use operation::{Operation, OperationOutput};
pub use options::{StoreProperties, DEFAULT_ADJACENT_SEED_DEDUPE_CAPACITY, DEFAULT_WRITE_BUFFER_SIZE};
pub use retrieve::{AdjacentSeedStream, CancelHandle, ElementStream, GetOptions, StreamState};
pub use staging::StagingReport;

use retrieve::ScanTarget;

/// Capabilities the store advertises to the layers above it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StoreTrait {
    /// Results arrive in row order.
    Ordered,
    /// Cell-level visibility labels.
    Visibility,
    /// View filters before query aggregation.
    PreAggregationFiltering,
    /// View filters after query aggregation.
    PostAggregationFiltering,
    /// View filters after transformation.
    PostTransformationFiltering,
    /// View transformers.
    Transformation,
    /// Aggregation by schema group-by.
    StoreAggregation,
    /// Aggregation by a view group-by override.
    QueryAggregation,
    /// Schema validators applied at scan time.
    StoreValidation,
}

impl StoreTrait {
    /// Every trait this store supports.
    pub const ALL: [StoreTrait; 9] = [
        StoreTrait::Ordered,
        StoreTrait::Visibility,
        StoreTrait::PreAggregationFiltering,
        StoreTrait::PostAggregationFiltering,
        StoreTrait::PostTransformationFiltering,
        StoreTrait::Transformation,
        StoreTrait::StoreAggregation,
        StoreTrait::QueryAggregation,
        StoreTrait::StoreValidation,
    ];

    /// Upper snake case name.
    pub fn as_str(self) -> &'static str {
        match self {
            StoreTrait::Ordered => "ORDERED",
            StoreTrait::Visibility => "VISIBILITY",
            StoreTrait::PreAggregationFiltering => "PRE_AGGREGATION_FILTERING",
            StoreTrait::PostAggregationFiltering => "POST_AGGREGATION_FILTERING",
            StoreTrait::PostTransformationFiltering => "POST_TRANSFORMATION_FILTERING",
            StoreTrait::Transformation => "TRANSFORMATION",
            StoreTrait::StoreAggregation => "STORE_AGGREGATION",
            StoreTrait::QueryAggregation => "QUERY_AGGREGATION",
            StoreTrait::StoreValidation => "STORE_VALIDATION",
        }
    }
}

impl fmt::Display for StoreTrait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A graph store backed by one ordered wide-column table.
///
/// The store is `Send + Sync`; ingest and any number of scans may run
/// concurrently. The connection is opened lazily and reopened if found
/// closed.
pub struct GraphStore {
    schema: Arc<Schema>,
    codec: Arc<ElementCodec>,
    properties: StoreProperties,
    factory: Arc<dyn ConnectionFactory>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
    metrics: Arc<dyn StoreMetrics>,
}

impl GraphStore {
    /// Validates the configuration, connects and ensures the table exists.
    pub fn initialise(
        schema: Schema,
        properties: StoreProperties,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self> {
        Self::initialise_with_metrics(schema, properties, factory, default_metrics())
    }

    /// [`GraphStore::initialise`] reporting to `metrics`.
    pub fn initialise_with_metrics(
        schema: Schema,
        properties: StoreProperties,
        factory: Arc<dyn ConnectionFactory>,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Result<Self> {
        schema.validate()?;
        properties.validate()?;
        let schema = Arc::new(schema);
        let store = Self {
            codec: Arc::new(ElementCodec::new(Arc::clone(&schema))),
            schema,
            properties,
            factory,
            connection: Mutex::new(None),
            metrics,
        };
        store.ensure_table()?;
        info!(table = %store.properties.table_name, "store.initialised");
        Ok(store)
    }

    /// The schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The configuration.
    pub fn properties(&self) -> &StoreProperties {
        &self.properties
    }

    /// The metrics sink.
    pub fn metrics(&self) -> &Arc<dyn StoreMetrics> {
        &self.metrics
    }

    /// Supported traits.
    pub fn traits(&self) -> &'static [StoreTrait] {
        &StoreTrait::ALL
    }

    /// The live connection, reopened if closed.
    pub fn connection(&self) -> Result<Arc<dyn Connection>> {
        let mut slot = self.connection.lock();
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
            debug!(table = %self.properties.table_name, "store.connection.reopening");
        }
        let conn = self.factory.connect(&self.properties)?;
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    fn table(&self) -> Result<Arc<dyn Table>> {
        self.connection()?.table(&self.properties.table_name)
    }

    fn scan_target(&self) -> Result<ScanTarget<'_>> {
        Ok(ScanTarget {
            table: self.table()?,
            codec: &self.codec,
            metrics: &self.metrics,
            return_matched_id_as_edge_source: self.properties.return_matched_id_as_edge_source,
            adjacent_seed_dedupe_capacity: self.properties.adjacent_seed_dedupe_capacity,
        })
    }

    /// Creates the table if missing.
    pub fn ensure_table(&self) -> Result<()> {
        table_utils::ensure_table_exists(self.connection()?.as_ref(), &self.schema, &self.properties)
    }

    /// Deletes every cell `user` can see.
    pub fn clear_table(&self, user: &User) -> Result<()> {
        table_utils::clear_table(
            self.connection()?.as_ref(),
            &self.schema,
            &self.properties,
            &user.data_auths,
        )
    }

    /// Drops the table.
    pub fn drop_table(&self) -> Result<()> {
        table_utils::drop_table(self.connection()?.as_ref(), &self.properties.table_name)
    }

    /// Writes elements in batches of `writeBufferSize` cells.
    pub fn add_elements<I>(&self, elements: I) -> Result<IngestReport>
    where
        I: IntoIterator,
        I::Item: Into<Option<Element>>,
    {
        let table = self.table()?;
        ingest::add_elements(
            table.as_ref(),
            &self.codec,
            self.metrics.as_ref(),
            self.properties.write_buffer_size,
            elements,
        )
    }

    /// Elements matching `seeds` under `view`, visible to `user`.
    pub fn get_elements<I>(&self, seeds: I, view: &View, user: &User, options: &GetOptions) -> Result<ElementStream>
    where
        I: IntoIterator,
        I::Item: Into<ElementSeed>,
    {
        retrieve::get_elements(&self.scan_target()?, seeds, view, user, options)
    }

    /// Every element under `view`, each edge once.
    pub fn get_all_elements(&self, view: &View, user: &User, options: &GetOptions) -> Result<ElementStream> {
        retrieve::get_all_elements(&self.scan_target()?, view, user, options)
    }

    /// Vertices one edge away from `seeds`.
    pub fn get_adjacent_entity_seeds<I>(
        &self,
        seeds: I,
        view: &View,
        user: &User,
        options: &GetOptions,
    ) -> Result<AdjacentSeedStream>
    where
        I: IntoIterator<Item = EntitySeed>,
    {
        retrieve::get_adjacent_entity_seeds(&self.scan_target()?, seeds, view, user, options)
    }

    /// Writes elements through a staged file under `hdfsStagingPath`.
    pub fn import_elements_via_staging<I>(&self, elements: I) -> Result<StagingReport>
    where
        I: IntoIterator<Item = Element>,
    {
        let table = self.table()?;
        staging::import_elements(
            table.as_ref(),
            &self.codec,
            self.metrics.as_ref(),
            &self.properties,
            elements,
        )
    }

    /// Runs `operation` on behalf of `user`.
    pub fn execute(&self, operation: Operation, user: &User) -> Result<OperationOutput> {
        debug!(operation = operation.kind(), user = %user.user_id, "store.execute");
        match operation {
            Operation::AddElements { elements } => self.add_elements(elements).map(OperationOutput::Ingested),
            Operation::GetElements { seeds, view, options } => self
                .get_elements(seeds, &view, user, &options)
                .map(OperationOutput::Elements),
            Operation::GetAllElements { view, options } => self
                .get_all_elements(&view, user, &options)
                .map(OperationOutput::Elements),
            Operation::GetAdjacentEntitySeeds { seeds, view, options } => self
                .get_adjacent_entity_seeds(seeds, &view, user, &options)
                .map(OperationOutput::Seeds),
            Operation::ImportFromStaging { elements } => self
                .import_elements_via_staging(elements)
                .map(OperationOutput::Staged),
            Operation::Other { kind } => Err(StoreError::Unsupported(kind)),
        }
    }
}
