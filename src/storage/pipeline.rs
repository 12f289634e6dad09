//! Processor chain assembly and the region-side coprocessor.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::model::{DirectedType, IncludeIncomingOutgoing};
use crate::schema::Schema;
use crate::table::{Cell, RegionContext, RegionObserver, RegionScanner, Scan};
use crate::view::View;

use super::codec::ElementCodec;
use super::lazy::LazyCell;
use super::metrics::StoreMetrics;
use super::processors::{
    AggregationScope, DedupeFilter, FilterStage, GroupFilter, ProcessContext, ProcessorKind,
    QueryAggregation, ScanProcessor, SeededEdgeFilter, StoreAggregation, Validation, ViewFilter,
};

/// Registered name of [`GraphCoprocessor`].
pub const GRAPH_COPROCESSOR: &str = "widegraph.GraphCoprocessor";

/// Coprocessor option carrying the encoded schema.
pub const SCHEMA: &str = "Schema";

/// Scan attribute names.
pub mod attributes {
    /// JSON view.
    pub const VIEW: &str = "View";
    /// `DIRECTED`, `UNDIRECTED` or `EITHER`.
    pub const DIRECTED_TYPE: &str = "DirectedType";
    /// CSV of [`ProcessorKind`](super::ProcessorKind) names.
    pub const EXTRA_PROCESSORS: &str = "ExtraProcessors";
    /// `INCOMING`, `OUTGOING` or `EITHER`.
    pub const INCLUDE_INCOMING_OUTGOING: &str = "IncludeIncomingOutgoing";
}

/// Inputs to [`build_query_processors`].
pub struct PipelineSpec {
    /// View, when the scan carries one.
    pub view: Option<Arc<View>>,
    /// Directed-type hint.
    pub directed: DirectedType,
    /// Incoming/outgoing policy for seeded scans.
    pub in_out: IncludeIncomingOutgoing,
    /// Requested extra processors.
    pub extras: BTreeSet<ProcessorKind>,
}

impl PipelineSpec {
    /// Reads the pipeline inputs from scan attributes and validates the view.
    pub fn from_scan(scan: &Scan, schema: &Schema) -> Result<Self> {
        let view = match scan.get_attribute(attributes::VIEW) {
            Some(raw) => {
                let view = View::from_json(raw)?;
                view.validate(schema)?;
                Some(Arc::new(view))
            }
            None => None,
        };
        Ok(Self {
            view,
            directed: attribute_text(scan, attributes::DIRECTED_TYPE)?
                .map(str::parse::<DirectedType>)
                .transpose()?
                .unwrap_or_default(),
            in_out: attribute_text(scan, attributes::INCLUDE_INCOMING_OUTGOING)?
                .map(str::parse::<IncludeIncomingOutgoing>)
                .transpose()?
                .unwrap_or_default(),
            extras: attribute_text(scan, attributes::EXTRA_PROCESSORS)?
                .map(ProcessorKind::parse_list)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

fn attribute_text<'s>(scan: &'s Scan, name: &str) -> Result<Option<&'s str>> {
    scan.get_attribute(name)
        .map(|raw| {
            std::str::from_utf8(raw).map_err(|_| StoreError::config(format!("scan attribute {name} is not UTF-8")))
        })
        .transpose()
}

/// Assembles the scan-time chain:
///
/// 1. with a view: `GroupFilter`, then a requested dedupe filter
/// 2. `StoreAggregation`, `Validation`
/// 3. with a view: `PreAggregationFilter`, `QueryAggregation`, `PostAggregationFilter`
///
/// Extra processors left unconsumed are a configuration error.
pub fn build_query_processors(codec: &Arc<ElementCodec>, spec: PipelineSpec) -> Result<Vec<Box<dyn ScanProcessor>>> {
    let PipelineSpec {
        view,
        directed,
        in_out,
        mut extras,
    } = spec;
    let mut chain: Vec<Box<dyn ScanProcessor>> = Vec::with_capacity(8);
    if let Some(view) = &view {
        chain.push(Box::new(GroupFilter::new(Arc::clone(view))));
        if extras.remove(&ProcessorKind::DedupeFilter) {
            chain.push(Box::new(DedupeFilter::new(directed)));
        }
        if extras.remove(&ProcessorKind::SeededEdgeFilter) {
            chain.push(Box::new(SeededEdgeFilter::new(directed, in_out)));
        }
    }
    chain.push(Box::new(StoreAggregation::new(AggregationScope::Query)));
    chain.push(Box::new(Validation::new(Arc::clone(codec))));
    if let Some(view) = &view {
        chain.push(Box::new(ViewFilter::new(Arc::clone(view), FilterStage::PreAggregation)));
        chain.push(Box::new(QueryAggregation::new(Arc::clone(view))));
        chain.push(Box::new(ViewFilter::new(Arc::clone(view), FilterStage::PostAggregation)));
    }
    if !extras.is_empty() {
        return Err(StoreError::config(format!(
            "unsupported extra processors: {}",
            ProcessorKind::to_list(&extras)
        )));
    }
    Ok(chain)
}

/// Flush-time chain: compaction-scoped aggregation, then validation.
pub fn build_compaction_processors(codec: &Arc<ElementCodec>) -> Vec<Box<dyn ScanProcessor>> {
    vec![
        Box::new(StoreAggregation::new(AggregationScope::Compaction)),
        Box::new(Validation::new(Arc::clone(codec))),
    ]
}

/// Region scanner pushing every batch through a processor chain.
///
/// Owns the wrapped scanner and closes it on its own close or drop.
pub struct ProcessingScanner {
    inner: Box<dyn RegionScanner>,
    codec: Arc<ElementCodec>,
    processors: Vec<Box<dyn ScanProcessor>>,
    metrics: Arc<dyn StoreMetrics>,
    closed: bool,
}

impl ProcessingScanner {
    /// Wraps `inner`.
    pub fn new(
        inner: Box<dyn RegionScanner>,
        codec: Arc<ElementCodec>,
        processors: Vec<Box<dyn ScanProcessor>>,
        metrics: Arc<dyn StoreMetrics>,
    ) -> Self {
        Self {
            inner,
            codec,
            processors,
            metrics,
            closed: false,
        }
    }

    /// Names of the processors in order.
    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    fn process(&self, raw: Vec<Cell>) -> Result<Vec<Cell>> {
        self.metrics.cells_scanned(raw.len() as u64);
        let mut cells: Vec<LazyCell<'_>> = raw.into_iter().map(|c| LazyCell::new(c, &self.codec)).collect();
        let ctx = ProcessContext {
            metrics: self.metrics.as_ref(),
        };
        for processor in &self.processors {
            if cells.is_empty() {
                break;
            }
            processor.process(&mut cells, &ctx)?;
        }
        Ok(cells.into_iter().map(LazyCell::into_cell).collect())
    }
}

impl RegionScanner for ProcessingScanner {
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>> {
        if self.closed {
            return Ok(None);
        }
        match self.inner.next_batch()? {
            Some(raw) => self.process(raw).map(Some),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.inner.close();
            self.closed = true;
        }
    }
}

impl Drop for ProcessingScanner {
    fn drop(&mut self) {
        self.close();
    }
}

/// The graph store's region observer.
///
/// Decodes the schema from the table's `Schema` option once per distinct
/// payload and wraps client scans and flushes in processor chains.
pub struct GraphCoprocessor {
    metrics: Arc<dyn StoreMetrics>,
    cache: Mutex<Option<(String, Arc<ElementCodec>)>>,
}

impl GraphCoprocessor {
    /// Creates a coprocessor reporting to `metrics`.
    pub fn new(metrics: Arc<dyn StoreMetrics>) -> Self {
        Self {
            metrics,
            cache: Mutex::new(None),
        }
    }

    fn codec(&self, ctx: RegionContext<'_>) -> Result<Arc<ElementCodec>> {
        let payload = ctx.options.get(SCHEMA).ok_or_else(|| {
            StoreError::config(format!("table {} has no {SCHEMA} coprocessor option", ctx.table))
        })?;
        let mut cache = self.cache.lock();
        if let Some((cached, codec)) = cache.as_ref() {
            if cached == payload {
                return Ok(Arc::clone(codec));
            }
        }
        let schema = Schema::from_option_payload(payload)?;
        let codec = Arc::new(ElementCodec::new(Arc::new(schema)));
        *cache = Some((payload.clone(), Arc::clone(&codec)));
        info!(table = ctx.table, "coprocessor.schema.loaded");
        Ok(codec)
    }
}

impl RegionObserver for GraphCoprocessor {
    fn post_scanner_open(
        &self,
        ctx: RegionContext<'_>,
        scan: &Scan,
        scanner: Box<dyn RegionScanner>,
    ) -> Result<Box<dyn RegionScanner>> {
        let codec = self.codec(ctx)?;
        let spec = PipelineSpec::from_scan(scan, codec.schema())?;
        let processors = build_query_processors(&codec, spec)?;
        let wrapped = ProcessingScanner::new(scanner, codec, processors, Arc::clone(&self.metrics));
        debug!(
            table = ctx.table,
            processors = ?wrapped.processor_names(),
            "coprocessor.scanner.opened"
        );
        Ok(Box::new(wrapped))
    }

    fn pre_flush(
        &self,
        ctx: RegionContext<'_>,
        scanner: Box<dyn RegionScanner>,
    ) -> Result<Box<dyn RegionScanner>> {
        let codec = self.codec(ctx)?;
        let processors = build_compaction_processors(&codec);
        Ok(Box::new(ProcessingScanner::new(
            scanner,
            codec,
            processors,
            Arc::clone(&self.metrics),
        )))
    }
}
