use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking ingest and scan activity of the graph store.
///
/// Implementations are shared between the client-side store and the
/// server-side coprocessor, so every method takes `&self` and must be cheap.
pub trait StoreMetrics: Send + Sync {
    /// Records one element accepted by the ingest engine.
    fn element_written(&self);

    /// Records the destination-first row written for a non-self edge.
    fn duplicate_edge_row_written(&self);

    /// Records cells pulled from a region scanner before processing.
    fn cells_scanned(&self, count: u64);

    /// Records cells dropped by a scan processor.
    ///
    /// # Parameters
    /// * `processor` - The processor name, e.g. `"GroupFilter"`.
    /// * `count` - Number of cells it removed from the batch.
    fn cells_dropped(&self, processor: &'static str, count: u64);

    /// Records a cell dropped because it could not be decoded.
    fn decode_failure(&self);

    /// Records one pairwise aggregation merge.
    fn aggregation_merge(&self);
}

/// A no-op implementation of [`StoreMetrics`] that discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn element_written(&self) {}
    fn duplicate_edge_row_written(&self) {}
    fn cells_scanned(&self, _count: u64) {}
    fn cells_dropped(&self, _processor: &'static str, _count: u64) {}
    fn decode_failure(&self) {}
    fn aggregation_merge(&self) {}
}

/// A thread-safe counter-based implementation of [`StoreMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Elements written.
    pub elements_written: AtomicU64,

    /// Destination-first edge rows written.
    pub duplicate_edge_rows_written: AtomicU64,

    /// Cells read from region scanners.
    pub cells_scanned: AtomicU64,

    /// Cells dropped by the group filter.
    pub dropped_group_filter: AtomicU64,

    /// Cells dropped by either dedupe filter.
    pub dropped_dedupe_filter: AtomicU64,

    /// Cells dropped by validation.
    pub dropped_validation: AtomicU64,

    /// Cells dropped by pre-aggregation filters.
    pub dropped_pre_aggregation_filter: AtomicU64,

    /// Cells dropped by post-aggregation filters.
    pub dropped_post_aggregation_filter: AtomicU64,

    /// Cells that failed to decode.
    pub decode_failures: AtomicU64,

    /// Pairwise aggregation merges, store and query combined.
    pub aggregation_merges: AtomicU64,
}

impl CounterMetrics {
    /// Total cells dropped by processors, excluding decode failures.
    pub fn total_dropped(&self) -> u64 {
        [
            &self.dropped_group_filter,
            &self.dropped_dedupe_filter,
            &self.dropped_validation,
            &self.dropped_pre_aggregation_filter,
            &self.dropped_post_aggregation_filter,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }
}

impl StoreMetrics for CounterMetrics {
    fn element_written(&self) {
        self.elements_written.fetch_add(1, Ordering::Relaxed);
    }

    fn duplicate_edge_row_written(&self) {
        self.duplicate_edge_rows_written.fetch_add(1, Ordering::Relaxed);
    }

    fn cells_scanned(&self, count: u64) {
        self.cells_scanned.fetch_add(count, Ordering::Relaxed);
    }

    fn cells_dropped(&self, processor: &'static str, count: u64) {
        let counter = match processor {
            "GroupFilter" => &self.dropped_group_filter,
            "DedupeFilter" | "SeededEdgeFilter" => &self.dropped_dedupe_filter,
            "Validation" => &self.dropped_validation,
            "PreAggregationFilter" => &self.dropped_pre_aggregation_filter,
            "PostAggregationFilter" => &self.dropped_post_aggregation_filter,
            _ => return,
        };
        counter.fetch_add(count, Ordering::Relaxed);
    }

    fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn aggregation_merge(&self) {
        self.aggregation_merges.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics implementation, [`NoopMetrics`].
pub fn default_metrics() -> Arc<dyn StoreMetrics> {
    Arc::new(NoopMetrics)
}
