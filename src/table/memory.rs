use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::storage::{default_metrics, GraphCoprocessor, StoreMetrics, GRAPH_COPROCESSOR};
use crate::store::StoreProperties;

use super::{
    staging_file, visibility, Admin, Cell, Connection, ConnectionFactory, Delete, RegionContext,
    RegionObserver, RegionScanner, ResultScanner, RowRange, Scan, Table, TableDescriptor,
};

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct CellKey {
    qualifier: Bytes,
    timestamp: Reverse<i64>,
    visibility: Bytes,
}

type Row = BTreeMap<CellKey, Bytes>;

struct MemoryTable {
    descriptor: TableDescriptor,
    enabled: AtomicBool,
    rows: RwLock<BTreeMap<Bytes, Row>>,
    observer: Option<Arc<dyn RegionObserver>>,
}

impl MemoryTable {
    fn region_context(&self) -> Option<(RegionContext<'_>, &Arc<dyn RegionObserver>)> {
        let spec = self.descriptor.coprocessor.as_ref()?;
        let observer = self.observer.as_ref()?;
        Some((
            RegionContext {
                table: &self.descriptor.name,
                options: &spec.options,
            },
            observer,
        ))
    }
}

struct ClusterState {
    tables: RwLock<BTreeMap<String, Arc<MemoryTable>>>,
    observers: RwLock<FxHashMap<String, Arc<dyn RegionObserver>>>,
    granted: RwLock<Option<BTreeSet<String>>>,
    available: AtomicBool,
    connections_opened: AtomicU64,
}

impl ClusterState {
    fn table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(name.to_owned()))
    }

    fn enabled_table(&self, name: &str) -> Result<Arc<MemoryTable>> {
        let table = self.table(name)?;
        if !table.enabled.load(Ordering::Acquire) {
            return Err(StoreError::TableNotFound(format!("{name} is disabled")));
        }
        Ok(table)
    }
}

/// In-process ordered table cluster.
///
/// Rows live in a `BTreeMap`; each row keeps its cells ordered by qualifier
/// and then by descending timestamp. Cloning yields another handle to the
/// same cluster.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    /// Creates an empty cluster with the graph coprocessor registered.
    pub fn new() -> Self {
        Self::with_metrics(default_metrics())
    }

    /// Creates an empty cluster whose graph coprocessor reports to `metrics`.
    pub fn with_metrics(metrics: Arc<dyn StoreMetrics>) -> Self {
        let cluster = Self {
            state: Arc::new(ClusterState {
                tables: RwLock::new(BTreeMap::new()),
                observers: RwLock::new(FxHashMap::default()),
                granted: RwLock::new(None),
                available: AtomicBool::new(true),
                connections_opened: AtomicU64::new(0),
            }),
        };
        cluster.register_coprocessor(GRAPH_COPROCESSOR, Arc::new(GraphCoprocessor::new(metrics)));
        cluster
    }

    /// Registers a coprocessor that table descriptors can name.
    pub fn register_coprocessor(&self, name: impl Into<String>, observer: Arc<dyn RegionObserver>) {
        self.state.observers.write().insert(name.into(), observer);
    }

    /// Restricts the labels scans may request. Asking for any other label
    /// fails the scan with [`StoreError::Authorization`].
    pub fn grant_labels<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.state.granted.write() = Some(labels.into_iter().map(Into::into).collect());
    }

    /// Simulates the cluster becoming (un)reachable for new connections.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::Release);
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.state.connections_opened.load(Ordering::Acquire)
    }

    /// Every stored cell of `table`, ignoring visibility.
    pub fn raw_cells(&self, table: &str) -> Result<Vec<Cell>> {
        let table = self.state.table(table)?;
        let descriptor = &table.descriptor;
        let rows = table.rows.read();
        Ok(rows
            .iter()
            .flat_map(|(row, cells)| cells.iter().map(move |(key, value)| to_cell(descriptor, row, key, value)))
            .collect())
    }
}

impl ConnectionFactory for MemoryCluster {
    fn connect(&self, properties: &StoreProperties) -> Result<Arc<dyn Connection>> {
        if !self.state.available.load(Ordering::Acquire) {
            return Err(StoreError::Connectivity(format!(
                "cluster at {} is unreachable",
                properties.zookeepers
            )));
        }
        self.state.connections_opened.fetch_add(1, Ordering::AcqRel);
        debug!(zookeepers = %properties.zookeepers, "memory.connection.open");
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    state: Arc<ClusterState>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed("connection"));
        }
        Ok(())
    }
}

impl Connection for MemoryConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn admin(&self) -> Result<Arc<dyn Admin>> {
        self.ensure_open()?;
        Ok(Arc::new(MemoryAdmin {
            state: Arc::clone(&self.state),
        }))
    }

    fn table(&self, name: &str) -> Result<Arc<dyn Table>> {
        self.ensure_open()?;
        self.state.enabled_table(name)?;
        Ok(Arc::new(MemoryTableHandle {
            state: Arc::clone(&self.state),
            name: name.to_owned(),
        }))
    }
}

struct MemoryAdmin {
    state: Arc<ClusterState>,
}

impl Admin for MemoryAdmin {
    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.tables.read().contains_key(name))
    }

    fn create_table(&self, descriptor: &TableDescriptor) -> Result<()> {
        let observer = match &descriptor.coprocessor {
            Some(spec) => Some(self.state.observers.read().get(&spec.name).cloned().ok_or_else(|| {
                StoreError::config(format!("coprocessor {} is not registered", spec.name))
            })?),
            None => None,
        };
        let mut tables = self.state.tables.write();
        if tables.contains_key(&descriptor.name) {
            return Err(StoreError::TableExists(descriptor.name.clone()));
        }
        tables.insert(
            descriptor.name.clone(),
            Arc::new(MemoryTable {
                descriptor: descriptor.clone(),
                enabled: AtomicBool::new(true),
                rows: RwLock::new(BTreeMap::new()),
                observer,
            }),
        );
        info!(table = %descriptor.name, "memory.table.created");
        Ok(())
    }

    fn describe_table(&self, name: &str) -> Result<TableDescriptor> {
        Ok(self.state.table(name)?.descriptor.clone())
    }

    fn disable_table(&self, name: &str) -> Result<()> {
        self.state.table(name)?.enabled.store(false, Ordering::Release);
        Ok(())
    }

    fn is_table_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.state.table(name)?.enabled.load(Ordering::Acquire))
    }

    fn delete_table(&self, name: &str) -> Result<()> {
        let mut tables = self.state.tables.write();
        let table = tables
            .get(name)
            .ok_or_else(|| StoreError::TableNotFound(name.to_owned()))?;
        if table.enabled.load(Ordering::Acquire) {
            return Err(StoreError::config(format!("table {name} must be disabled before deletion")));
        }
        tables.remove(name);
        info!(table = %name, "memory.table.deleted");
        Ok(())
    }

    fn flush(&self, name: &str) -> Result<()> {
        let table = self.state.enabled_table(name)?;
        let Some((ctx, observer)) = table.region_context() else {
            return Ok(());
        };
        let mut rows = table.rows.write();
        let batches: VecDeque<Vec<Cell>> = rows
            .iter()
            .map(|(row, cells)| {
                cells
                    .iter()
                    .map(|(key, value)| to_cell(&table.descriptor, row, key, value))
                    .collect()
            })
            .collect();
        let before: usize = batches.iter().map(Vec::len).sum();
        let mut scanner = observer.pre_flush(ctx, Box::new(BatchScanner::new(batches)))?;
        let mut rebuilt = BTreeMap::new();
        let mut after = 0usize;
        let drained = (|| -> Result<()> {
            while let Some(batch) = scanner.next_batch()? {
                after += batch.len();
                for cell in batch {
                    insert_cell(&mut rebuilt, cell);
                }
            }
            Ok(())
        })();
        scanner.close();
        drained?;
        *rows = rebuilt;
        debug!(table = %name, before, after, "memory.table.flushed");
        Ok(())
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(self.state.tables.read().keys().cloned().collect())
    }
}

struct MemoryTableHandle {
    state: Arc<ClusterState>,
    name: String,
}

impl Table for MemoryTableHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, cells: Vec<Cell>) -> Result<()> {
        let table = self.state.enabled_table(&self.name)?;
        let no_auths = BTreeSet::new();
        for cell in &cells {
            if cell.family.as_ref() != table.descriptor.family.as_bytes() {
                return Err(StoreError::config(format!(
                    "unknown column family {:?} in table {}",
                    String::from_utf8_lossy(&cell.family),
                    self.name
                )));
            }
            visibility::evaluate(&cell.visibility, &no_auths)?;
        }
        let mut rows = table.rows.write();
        for cell in cells {
            insert_cell(&mut rows, cell);
        }
        Ok(())
    }

    fn delete(&self, deletes: Vec<Delete>) -> Result<()> {
        let table = self.state.enabled_table(&self.name)?;
        let mut rows = table.rows.write();
        for delete in deletes {
            let Some(row) = rows.get_mut(&delete.row) else {
                continue;
            };
            row.retain(|key, _| {
                let matches = key.visibility == delete.visibility
                    && delete.qualifier.as_ref().map_or(true, |q| *q == key.qualifier)
                    && delete.timestamp.map_or(true, |ts| ts == key.timestamp.0);
                !matches
            });
            if row.is_empty() {
                rows.remove(&delete.row);
            }
        }
        Ok(())
    }

    fn scanner(&self, scan: &Scan) -> Result<Box<dyn ResultScanner>> {
        let table = self.state.enabled_table(&self.name)?;
        if let Some(granted) = self.state.granted.read().as_ref() {
            if let Some(denied) = scan.authorizations.iter().find(|a| !granted.contains(*a)) {
                return Err(StoreError::Authorization(format!(
                    "label {denied} is not granted on table {}",
                    self.name
                )));
            }
        }
        let max_versions = usize::try_from(table.descriptor.max_versions.max(1)).unwrap_or(usize::MAX);
        let mut batches = VecDeque::new();
        {
            let rows = table.rows.read();
            for range in merge_ranges(&scan.ranges) {
                let end = if range.end.is_empty() {
                    Bound::Unbounded
                } else {
                    Bound::Excluded(range.end.as_ref())
                };
                let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(range.start.as_ref()), end);
                for (row, cells) in rows.range::<[u8], _>(bounds) {
                    let batch = visible_cells(&table.descriptor, row, cells, &scan.authorizations, max_versions);
                    if !batch.is_empty() {
                        batches.push_back(batch);
                    }
                }
            }
        }
        let base: Box<dyn RegionScanner> = Box::new(BatchScanner::new(batches));
        let inner = match table.region_context() {
            Some((ctx, observer)) => observer.post_scanner_open(ctx, scan, base)?,
            None => base,
        };
        Ok(Box::new(MemoryResultScanner { inner, closed: false }))
    }

    fn bulk_load(&self, path: &Path) -> Result<u64> {
        let cells = staging_file::read_cells(path)?;
        let count = cells.len() as u64;
        self.put(cells)?;
        info!(table = %self.name, path = %path.display(), cells = count, "memory.table.bulk_loaded");
        Ok(count)
    }
}

fn to_cell(descriptor: &TableDescriptor, row: &Bytes, key: &CellKey, value: &Bytes) -> Cell {
    Cell {
        row: row.clone(),
        family: Bytes::copy_from_slice(descriptor.family.as_bytes()),
        qualifier: key.qualifier.clone(),
        timestamp: key.timestamp.0,
        visibility: key.visibility.clone(),
        value: value.clone(),
    }
}

fn insert_cell(rows: &mut BTreeMap<Bytes, Row>, cell: Cell) {
    rows.entry(cell.row).or_default().insert(
        CellKey {
            qualifier: cell.qualifier,
            timestamp: Reverse(cell.timestamp),
            visibility: cell.visibility,
        },
        cell.value,
    );
}

fn visible_cells(
    descriptor: &TableDescriptor,
    row: &Bytes,
    cells: &Row,
    auths: &BTreeSet<String>,
    max_versions: usize,
) -> Vec<Cell> {
    let mut versions: FxHashMap<(&Bytes, &Bytes), usize> = FxHashMap::default();
    cells
        .iter()
        .filter(|(key, _)| visibility::evaluate(&key.visibility, auths).unwrap_or(false))
        .filter(|&(key, _)| {
            let seen = versions.entry((&key.qualifier, &key.visibility)).or_insert(0);
            *seen += 1;
            *seen <= max_versions
        })
        .map(|(key, value)| to_cell(descriptor, row, key, value))
        .collect()
}

/// Sorts ranges and unions overlapping ones so no row is visited twice.
fn merge_ranges(ranges: &[RowRange]) -> Vec<RowRange> {
    if ranges.is_empty() {
        return vec![RowRange::all()];
    }
    let mut sorted = ranges.to_vec();
    sorted.sort();
    let mut merged: Vec<RowRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if last.end.is_empty() => {}
            Some(last) if range.start <= last.end => {
                if range.end.is_empty() || range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

struct BatchScanner {
    batches: VecDeque<Vec<Cell>>,
}

impl BatchScanner {
    fn new(batches: VecDeque<Vec<Cell>>) -> Self {
        Self { batches }
    }
}

impl RegionScanner for BatchScanner {
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>> {
        Ok(self.batches.pop_front())
    }

    fn close(&mut self) {
        self.batches.clear();
    }
}

struct MemoryResultScanner {
    inner: Box<dyn RegionScanner>,
    closed: bool,
}

impl ResultScanner for MemoryResultScanner {
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            match self.inner.next_batch()? {
                Some(batch) if batch.is_empty() => continue,
                other => return Ok(other),
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.inner.close();
            self.closed = true;
        }
    }
}

impl Drop for MemoryResultScanner {
    fn drop(&mut self) {
        self.close();
    }
}
