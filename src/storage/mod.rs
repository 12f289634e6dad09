//! Element encoding and the server-side scan pipeline.
//!
//! Elements become cells through [`ElementCodec`]; the [`GraphCoprocessor`]
//! runs an ordered chain of [`ScanProcessor`]s over every batch a region
//! scanner produces, at query time and at flush time.

/// Row key, qualifier and value encoding.
pub mod codec;

/// Processor chain assembly and the coprocessor.
pub mod pipeline;

/// Individual scan processors.
pub mod processors;

mod lazy;
mod metrics;

pub use codec::{EncodedElement, ElementCodec, RowKey};
pub use lazy::LazyCell;
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StoreMetrics};
pub use pipeline::{
    build_compaction_processors, build_query_processors, GraphCoprocessor, PipelineSpec,
    ProcessingScanner, GRAPH_COPROCESSOR,
};
pub use processors::{AggregationScope, ProcessContext, ProcessorKind, ScanProcessor};
