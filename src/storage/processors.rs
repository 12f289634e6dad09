//! Scan processors run inside the region on every batch.
//!
//! A processor may drop cells or merge cells that share an aggregation key,
//! but it keeps the relative order of what survives. Cells that fail to
//! decode are dropped and counted; any other error fails the scan.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::model::{DirectedType, IncludeIncomingOutgoing, Properties};
use crate::primitives::bytes::field;
use crate::schema::{passes, ElementKind, GroupDef};
use crate::table::{visibility, Cell};
use crate::view::View;

use super::codec::ElementCodec;
use super::lazy::LazyCell;
use super::metrics::StoreMetrics;

/// Per-scan state handed to every processor.
pub struct ProcessContext<'m> {
    /// Metrics sink.
    pub metrics: &'m dyn StoreMetrics,
}

/// One stage of the scan pipeline.
pub trait ScanProcessor: Send + Sync {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Transforms one batch in place.
    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()>;
}

/// Processors known to the pipeline. `ExtraProcessors` names are parsed
/// into this set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProcessorKind {
    /// Drops groups outside the view.
    GroupFilter,
    /// Keeps one row per edge for whole-table scans.
    DedupeFilter,
    /// Applies directed and incoming/outgoing policy to seeded scans.
    SeededEdgeFilter,
    /// Merges cells sharing a row and qualifier.
    StoreAggregation,
    /// Drops cells failing schema validators.
    Validation,
    /// View filters before query aggregation.
    PreAggregationFilter,
    /// Merges cells under the view's group-by override.
    QueryAggregation,
    /// View filters after query aggregation.
    PostAggregationFilter,
}

impl ProcessorKind {
    /// Wire and metrics name.
    pub fn name(self) -> &'static str {
        match self {
            ProcessorKind::GroupFilter => "GroupFilter",
            ProcessorKind::DedupeFilter => "DedupeFilter",
            ProcessorKind::SeededEdgeFilter => "SeededEdgeFilter",
            ProcessorKind::StoreAggregation => "StoreAggregation",
            ProcessorKind::Validation => "Validation",
            ProcessorKind::PreAggregationFilter => "PreAggregationFilter",
            ProcessorKind::QueryAggregation => "QueryAggregation",
            ProcessorKind::PostAggregationFilter => "PostAggregationFilter",
        }
    }

    /// Parses an `ExtraProcessors` CSV. Order and duplicates are ignored.
    pub fn parse_list(csv: &str) -> Result<BTreeSet<ProcessorKind>> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }

    /// Renders a set as an `ExtraProcessors` CSV.
    pub fn to_list<'a>(kinds: impl IntoIterator<Item = &'a ProcessorKind>) -> String {
        kinds.into_iter().map(|k| k.name()).collect::<Vec<_>>().join(",")
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessorKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "GroupFilter" => ProcessorKind::GroupFilter,
            "DedupeFilter" => ProcessorKind::DedupeFilter,
            "SeededEdgeFilter" => ProcessorKind::SeededEdgeFilter,
            "StoreAggregation" => ProcessorKind::StoreAggregation,
            "Validation" => ProcessorKind::Validation,
            "PreAggregationFilter" => ProcessorKind::PreAggregationFilter,
            "QueryAggregation" => ProcessorKind::QueryAggregation,
            "PostAggregationFilter" => ProcessorKind::PostAggregationFilter,
            other => return Err(StoreError::config(format!("unknown scan processor {other}"))),
        })
    }
}

/// Keeps the cells for which `keep` returns `true`, dropping and counting
/// undecodable ones.
fn retain_cells<'c, F>(cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>, name: &'static str, mut keep: F) -> Result<()>
where
    F: FnMut(&LazyCell<'c>) -> Result<bool>,
{
    let before = cells.len();
    let mut fatal = None;
    let mut undecodable = 0usize;
    cells.retain(|cell| {
        if fatal.is_some() {
            return true;
        }
        match keep(cell) {
            Ok(keep) => keep,
            Err(err) if err.is_data() => {
                debug!(processor = name, error = %err, "scan.cell.decode_failed");
                ctx.metrics.decode_failure();
                undecodable += 1;
                false
            }
            Err(err) => {
                fatal = Some(err);
                true
            }
        }
    });
    if let Some(err) = fatal {
        return Err(err);
    }
    let dropped = before - cells.len() - undecodable;
    if dropped > 0 {
        ctx.metrics.cells_dropped(name, dropped as u64);
    }
    Ok(())
}

/// Drops cells whose group is not in the view.
pub struct GroupFilter {
    view: Arc<View>,
}

impl GroupFilter {
    /// Filters to the groups of `view`.
    pub fn new(view: Arc<View>) -> Self {
        Self { view }
    }
}

impl ScanProcessor for GroupFilter {
    fn name(&self) -> &'static str {
        ProcessorKind::GroupFilter.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        retain_cells(cells, ctx, self.name(), |cell| Ok(self.view.contains_group(cell.group()?)))
    }
}

/// Keeps only the source-first row of each edge and applies the directed
/// type, so whole-table scans return each edge once.
pub struct DedupeFilter {
    directed: DirectedType,
}

impl DedupeFilter {
    /// Creates the filter.
    pub fn new(directed: DirectedType) -> Self {
        Self { directed }
    }
}

impl ScanProcessor for DedupeFilter {
    fn name(&self) -> &'static str {
        ProcessorKind::DedupeFilter.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        retain_cells(cells, ctx, self.name(), |cell| {
            let row = cell.row()?;
            Ok(row.kind() == ElementKind::Entity
                || (row.is_source_first() && self.directed.accepts(row.is_directed())))
        })
    }
}

/// Directed-type and incoming/outgoing policy for seeded scans.
///
/// The row a seeded scan reads is keyed by the seed, so a source-first row
/// is an outgoing edge of the seed and a destination-first row an incoming
/// one. Self-edges and undirected edges match either side.
pub struct SeededEdgeFilter {
    directed: DirectedType,
    in_out: IncludeIncomingOutgoing,
}

impl SeededEdgeFilter {
    /// Creates the filter.
    pub fn new(directed: DirectedType, in_out: IncludeIncomingOutgoing) -> Self {
        Self { directed, in_out }
    }
}

impl ScanProcessor for SeededEdgeFilter {
    fn name(&self) -> &'static str {
        ProcessorKind::SeededEdgeFilter.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        retain_cells(cells, ctx, self.name(), |cell| {
            let row = cell.row()?;
            if row.kind() == ElementKind::Entity {
                return Ok(true);
            }
            if !self.directed.accepts(row.is_directed()) {
                return Ok(false);
            }
            if !row.is_directed() || row.is_self_edge() {
                return Ok(true);
            }
            Ok(match self.in_out {
                IncludeIncomingOutgoing::Either => true,
                IncludeIncomingOutgoing::Outgoing => row.is_source_first(),
                IncludeIncomingOutgoing::Incoming => !row.is_source_first(),
            })
        })
    }
}

/// Where store aggregation runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationScope {
    /// Scan time: cells sharing row and qualifier merge, labels combine.
    Query,
    /// Flush time: the key also includes the label, so labels never widen.
    Compaction,
}

/// Accumulates one aggregation run.
struct Merge<'c> {
    first: LazyCell<'c>,
    group: String,
    def: &'c GroupDef,
    properties: Properties,
    timestamp: i64,
    visibility: Vec<u8>,
    merged: usize,
}

impl<'c> Merge<'c> {
    fn start(first: LazyCell<'c>, def: &'c GroupDef) -> Result<Self> {
        let group = first.group()?.to_owned();
        let properties = first.properties()?.clone();
        let timestamp = first.cell().timestamp;
        let visibility = first.cell().visibility.to_vec();
        Ok(Self {
            first,
            group,
            def,
            properties,
            timestamp,
            visibility,
            merged: 0,
        })
    }

    fn absorb<F>(&mut self, cell: &LazyCell<'c>, keep: &F, ctx: &ProcessContext<'_>) -> Result<()>
    where
        F: Fn(&str, &GroupDef, &str) -> bool,
    {
        for (name, value) in cell.properties()? {
            match self.properties.get_mut(name) {
                None => {
                    self.properties.insert(name.clone(), value.clone());
                }
                Some(_) if keep(&self.group, self.def, name) => {}
                Some(existing) => {
                    let aggregator = self.def.get(name).and_then(|p| p.aggregator).ok_or_else(|| {
                        StoreError::config(format!("{}.{name} has no aggregator", self.group))
                    })?;
                    *existing = aggregator.apply(existing, value)?;
                }
            }
        }
        self.timestamp = self.timestamp.max(cell.cell().timestamp);
        self.visibility = visibility::combine(&self.visibility, &cell.cell().visibility);
        self.merged += 1;
        ctx.metrics.aggregation_merge();
        Ok(())
    }

    fn finish(self) -> Result<LazyCell<'c>> {
        if self.merged == 0 {
            return Ok(self.first);
        }
        let codec = self.first.codec();
        let (qualifier, value) = codec.encode_properties(&self.group, &self.properties)?;
        let first = self.first.cell();
        Ok(LazyCell::new(
            Cell {
                row: first.row.clone(),
                family: first.family.clone(),
                qualifier: Bytes::from(qualifier),
                timestamp: self.timestamp,
                visibility: Bytes::from(self.visibility),
                value: Bytes::from(value),
            },
            codec,
        ))
    }
}

enum Run<'c> {
    Single(LazyCell<'c>),
    Merge(Merge<'c>),
}

/// Groups cells by key, keeping first-appearance order, and merges each run.
///
/// `key` returns `None` for cells that pass through untouched. `keep` names
/// the properties that are equal across a run and so are not aggregated.
fn aggregate_runs<'c, K, F>(cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>, mut key: K, keep: F) -> Result<()>
where
    K: FnMut(&LazyCell<'c>, &str, &GroupDef) -> Result<Option<Vec<u8>>>,
    F: Fn(&str, &GroupDef, &str) -> bool,
{
    let mut runs: Vec<Run<'c>> = Vec::with_capacity(cells.len());
    let mut index: FxHashMap<Vec<u8>, usize> = FxHashMap::default();
    for cell in std::mem::take(cells) {
        let keyed = (|| -> Result<Option<(Vec<u8>, &'c GroupDef)>> {
            let schema = cell.codec().schema();
            let group = cell.group()?;
            let (_, def) = schema
                .group(group)
                .ok_or_else(|| StoreError::data(format!("group {group} is not in the schema")))?;
            match key(&cell, group, def)? {
                Some(key) => {
                    cell.properties()?;
                    Ok(Some((key, def)))
                }
                None => Ok(None),
            }
        })();
        let keyed = match keyed {
            Ok(keyed) => keyed,
            Err(err) if err.is_data() => {
                debug!(error = %err, "scan.cell.decode_failed");
                ctx.metrics.decode_failure();
                continue;
            }
            Err(err) => return Err(err),
        };
        let Some((key, def)) = keyed else {
            runs.push(Run::Single(cell));
            continue;
        };
        match index.get(&key) {
            Some(&at) => {
                if let Run::Merge(merge) = &mut runs[at] {
                    merge.absorb(&cell, &keep, ctx)?;
                }
            }
            None => {
                index.insert(key, runs.len());
                runs.push(Run::Merge(Merge::start(cell, def)?));
            }
        }
    }
    cells.reserve(runs.len());
    for run in runs {
        cells.push(match run {
            Run::Single(cell) => cell,
            Run::Merge(merge) => merge.finish()?,
        });
    }
    Ok(())
}

/// Merges cells of one element that share a qualifier, using the schema's
/// aggregators.
pub struct StoreAggregation {
    scope: AggregationScope,
}

impl StoreAggregation {
    /// Creates the processor.
    pub fn new(scope: AggregationScope) -> Self {
        Self { scope }
    }
}

impl ScanProcessor for StoreAggregation {
    fn name(&self) -> &'static str {
        ProcessorKind::StoreAggregation.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        let scope = self.scope;
        aggregate_runs(
            cells,
            ctx,
            |cell, _, def| {
                if !def.aggregate {
                    return Ok(None);
                }
                let raw = cell.cell();
                let mut key = Vec::with_capacity(raw.row.len() + raw.qualifier.len() + 8);
                field::put(&mut key, &raw.row);
                field::put(&mut key, &raw.qualifier);
                if scope == AggregationScope::Compaction {
                    field::put(&mut key, &raw.visibility);
                }
                Ok(Some(key))
            },
            |_, def, name| def.is_group_by(name),
        )
    }
}

/// Drops cells whose properties fail the schema's validators.
pub struct Validation {
    codec: Arc<ElementCodec>,
    enabled: bool,
}

impl Validation {
    /// Creates the processor; it is a no-op when no property has validators.
    pub fn new(codec: Arc<ElementCodec>) -> Self {
        let enabled = codec.schema().has_validators();
        Self { codec, enabled }
    }
}

impl ScanProcessor for Validation {
    fn name(&self) -> &'static str {
        ProcessorKind::Validation.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let schema = self.codec.schema();
        retain_cells(cells, ctx, self.name(), |cell| {
            let element = cell.element()?;
            let Some((_, def)) = schema.group(element.group()) else {
                return Ok(false);
            };
            Ok(def.properties.iter().all(|prop| {
                let value = element.properties().get(&prop.name);
                prop.validators.iter().all(|v| v.test(value))
            }))
        })
    }
}

/// Which view filter list a [`ViewFilter`] applies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterStage {
    /// `preAggregationFilters`.
    PreAggregation,
    /// `postAggregationFilters`.
    PostAggregation,
}

/// Applies the view's pre- or post-aggregation filters.
pub struct ViewFilter {
    view: Arc<View>,
    stage: FilterStage,
}

impl ViewFilter {
    /// Creates the filter.
    pub fn new(view: Arc<View>, stage: FilterStage) -> Self {
        Self { view, stage }
    }
}

impl ScanProcessor for ViewFilter {
    fn name(&self) -> &'static str {
        match self.stage {
            FilterStage::PreAggregation => ProcessorKind::PreAggregationFilter.name(),
            FilterStage::PostAggregation => ProcessorKind::PostAggregationFilter.name(),
        }
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        retain_cells(cells, ctx, self.name(), |cell| {
            let Some(def) = self.view.group(cell.group()?) else {
                return Ok(true);
            };
            let steps = match self.stage {
                FilterStage::PreAggregation => &def.pre_aggregation_filters,
                FilterStage::PostAggregation => &def.post_aggregation_filters,
            };
            if steps.is_empty() {
                return Ok(true);
            }
            Ok(passes(steps, cell.element()?))
        })
    }
}

/// Re-aggregates under the view's narrower group-by, collapsing the other
/// group-by properties with their aggregators.
pub struct QueryAggregation {
    view: Arc<View>,
}

impl QueryAggregation {
    /// Creates the processor.
    pub fn new(view: Arc<View>) -> Self {
        Self { view }
    }

    fn kept<'v>(&'v self, group: &str, def: &GroupDef) -> Option<&'v [String]> {
        self.view.group(group)?.query_group_by(def)
    }
}

impl ScanProcessor for QueryAggregation {
    fn name(&self) -> &'static str {
        ProcessorKind::QueryAggregation.name()
    }

    fn process<'c>(&self, cells: &mut Vec<LazyCell<'c>>, ctx: &ProcessContext<'_>) -> Result<()> {
        aggregate_runs(
            cells,
            ctx,
            |cell, group, def| {
                let Some(kept) = self.kept(group, def) else {
                    return Ok(None);
                };
                let props = cell.properties()?;
                let identity: Properties = kept
                    .iter()
                    .filter_map(|name| props.get(name).map(|v| (name.clone(), v.clone())))
                    .collect();
                let (qualifier, _) = cell.codec().encode_properties(group, &identity)?;
                let mut key = Vec::new();
                field::put(&mut key, &cell.cell().row);
                field::put(&mut key, &qualifier);
                Ok(Some(key))
            },
            |group, def, name| {
                self.kept(group, def)
                    .map_or(true, |kept| kept.iter().any(|k| k == name))
            },
        )
    }
}
