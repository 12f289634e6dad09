//! Seeded and whole-table retrieval.
//!
//! A query becomes one multi-range [`Scan`] carrying the view, directed type
//! and extra processor attributes. The server-side pipeline does the heavy
//! lifting; [`ElementStream`] decodes what survives and applies the parts of
//! a query that need knowledge of every seed: exact edge-seed matching,
//! dedupe of edges seen from both endpoints, endpoint swapping and the
//! view's client-side transformation.

use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lru::LruCache;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::Result;
use crate::model::{
    DirectedType, Edge, Element, ElementSeed, EntitySeed, IncludeIncomingOutgoing, User, Value,
};
use crate::schema::ElementKind;
use crate::storage::pipeline::attributes;
use crate::storage::{ElementCodec, LazyCell, ProcessorKind, RowKey, StoreMetrics};
use crate::table::{Cell, ResultScanner, RowRange, Scan, Table};
use crate::view::View;

/// Per-operation retrieval options.
#[derive(Clone, Debug)]
pub struct GetOptions {
    /// Which edge directions to return.
    pub directed: DirectedType,
    /// For directed edges of seeded queries, which side the seed must be on.
    pub in_out: IncludeIncomingOutgoing,
    /// Read entity rows.
    pub include_entities: bool,
    /// Read edge rows.
    pub include_edges: bool,
    /// Return an edge matched from both endpoints once.
    pub deduplicate: bool,
    /// Overrides the store's `returnMatchedIdAsEdgeSource`.
    pub return_matched_id_as_edge_source: Option<bool>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            directed: DirectedType::Either,
            in_out: IncludeIncomingOutgoing::Either,
            include_entities: true,
            include_edges: true,
            deduplicate: true,
            return_matched_id_as_edge_source: None,
        }
    }
}

impl GetOptions {
    /// Sets the directed type.
    pub fn directed(mut self, directed: DirectedType) -> Self {
        self.directed = directed;
        self
    }

    /// Sets the incoming/outgoing policy.
    pub fn in_out(mut self, in_out: IncludeIncomingOutgoing) -> Self {
        self.in_out = in_out;
        self
    }

    /// Enables or disables entity rows.
    pub fn include_entities(mut self, include: bool) -> Self {
        self.include_entities = include;
        self
    }

    /// Enables or disables edge rows.
    pub fn include_edges(mut self, include: bool) -> Self {
        self.include_edges = include;
        self
    }

    /// Enables or disables client-side dedupe.
    pub fn deduplicate(mut self, dedupe: bool) -> Self {
        self.deduplicate = dedupe;
        self
    }

    /// Overrides endpoint swapping for this query.
    pub fn return_matched_id_as_edge_source(mut self, enabled: bool) -> Self {
        self.return_matched_id_as_edge_source = Some(enabled);
        self
    }
}

/// What a retrieval needs from the store.
pub(crate) struct ScanTarget<'s> {
    pub table: Arc<dyn Table>,
    pub codec: &'s Arc<ElementCodec>,
    pub metrics: &'s Arc<dyn StoreMetrics>,
    pub return_matched_id_as_edge_source: bool,
    pub adjacent_seed_dedupe_capacity: usize,
}

/// Lifecycle of an [`ElementStream`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    /// Opened, nothing read yet.
    Open,
    /// At least one `next` call made.
    Draining,
    /// Exhausted, failed or closed. Terminal.
    Closed,
}

/// Closes an [`ElementStream`] from another thread.
///
/// The stream notices at its next batch boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests the stream to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether [`CancelHandle::cancel`] was called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Seeds in serialized form, used to restrict and dedupe seeded results.
#[derive(Default)]
struct SeedMatcher {
    /// Vertices whose edge rows the query reads.
    edge_vertices: FxHashSet<Vec<u8>>,
    edge_seeds: Vec<(Vec<u8>, Vec<u8>, DirectedType)>,
}

impl SeedMatcher {
    fn matches_edge_seed(&self, row: &RowKey) -> bool {
        let Some((source, destination)) = row.endpoints() else {
            return false;
        };
        let directed = row.is_directed();
        self.edge_seeds.iter().any(|(a, b, dir)| {
            dir.accepts(directed)
                && ((source == a.as_slice() && destination == b.as_slice())
                    || (!directed && source == b.as_slice() && destination == a.as_slice()))
        })
    }

    fn matches(&self, row: &RowKey) -> bool {
        row.second.is_none() || self.edge_vertices.contains(&row.first) || self.matches_edge_seed(row)
    }

    /// Whether the query also returns the source-first row of `row`'s edge.
    fn covers_source_row(&self, row: &RowKey, in_out: IncludeIncomingOutgoing) -> bool {
        let Some(second) = &row.second else {
            return false;
        };
        if row.is_directed() && in_out == IncludeIncomingOutgoing::Incoming {
            return false;
        }
        self.edge_vertices.contains(second) || self.matches_edge_seed(row)
    }
}

/// Client half of a query: decodes cells and applies per-query policy.
struct ClientFilter {
    codec: Arc<ElementCodec>,
    view: Arc<View>,
    metrics: Arc<dyn StoreMetrics>,
    seeds: Option<SeedMatcher>,
    in_out: IncludeIncomingOutgoing,
    deduplicate: bool,
    swap: bool,
}

impl ClientFilter {
    fn apply(&self, cell: Cell) -> Option<Element> {
        let lazy = LazyCell::new(cell, &self.codec);
        match self.decide(&lazy) {
            Ok(Some(swap)) => {
                let element = match lazy.element() {
                    Ok(element) => element.clone(),
                    Err(err) => {
                        self.decode_failed(&err);
                        return None;
                    }
                };
                let element = if swap { swap_endpoints(element) } else { element };
                self.view.apply_client_side(element)
            }
            Ok(None) => None,
            Err(err) => {
                self.decode_failed(&err);
                None
            }
        }
    }

    /// `Some(swap)` to keep the cell.
    fn decide(&self, cell: &LazyCell<'_>) -> Result<Option<bool>> {
        let row = cell.row()?;
        let Some(seeds) = &self.seeds else {
            return Ok(Some(false));
        };
        if !seeds.matches(row) {
            return Ok(None);
        }
        if row.kind() == ElementKind::Edge && !row.is_source_first() {
            if self.deduplicate && seeds.covers_source_row(row, self.in_out) {
                return Ok(None);
            }
            return Ok(Some(self.swap));
        }
        Ok(Some(false))
    }

    fn decode_failed(&self, err: &crate::error::StoreError) {
        self.metrics.decode_failure();
        debug!(error = %err, "stream.cell.decode_failed");
    }
}

fn swap_endpoints(element: Element) -> Element {
    match element {
        Element::Edge(edge) => Element::Edge(Edge {
            source: edge.destination,
            destination: edge.source,
            ..edge
        }),
        entity => entity,
    }
}

/// Lazy stream of query results.
///
/// Dropping the stream closes it.
pub struct ElementStream {
    scanner: Option<Box<dyn ResultScanner>>,
    state: StreamState,
    pending: VecDeque<Element>,
    filter: ClientFilter,
    cancel: CancelHandle,
}

impl ElementStream {
    fn new(scanner: Box<dyn ResultScanner>, filter: ClientFilter) -> Self {
        Self {
            scanner: Some(scanner),
            state: StreamState::Open,
            pending: VecDeque::new(),
            filter,
            cancel: CancelHandle::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// A handle that closes this stream from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Releases the scanner and buffered elements. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut scanner) = self.scanner.take() {
            scanner.close();
        }
        self.pending.clear();
        self.state = StreamState::Closed;
    }

    fn fill(&mut self) -> Result<bool> {
        loop {
            if self.cancel.is_cancelled() {
                debug!("stream.cancelled");
                return Ok(false);
            }
            let Some(scanner) = self.scanner.as_mut() else {
                return Ok(false);
            };
            let Some(batch) = scanner.next_batch()? else {
                return Ok(false);
            };
            self.pending
                .extend(batch.into_iter().filter_map(|cell| self.filter.apply(cell)));
            if !self.pending.is_empty() {
                return Ok(true);
            }
        }
    }
}

impl Iterator for ElementStream {
    type Item = Result<Element>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            StreamState::Closed => return None,
            StreamState::Open => self.state = StreamState::Draining,
            StreamState::Draining => {}
        }
        if let Some(element) = self.pending.pop_front() {
            return Some(Ok(element));
        }
        match self.fill() {
            Ok(true) => self.pending.pop_front().map(Ok),
            Ok(false) => {
                self.close();
                None
            }
            Err(err) => {
                self.close();
                Some(Err(err))
            }
        }
    }
}

impl Drop for ElementStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Far endpoints of edges adjacent to the seeds, deduped through a bounded
/// LRU set.
pub struct AdjacentSeedStream {
    inner: ElementStream,
    codec: Arc<ElementCodec>,
    seen: Option<LruCache<Vec<u8>, ()>>,
}

impl AdjacentSeedStream {
    /// Closes the underlying stream.
    pub fn close(&mut self) {
        self.inner.close();
    }

    /// A handle that closes this stream from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.inner.cancel_handle()
    }

    fn is_new(&mut self, vertex: &Value) -> bool {
        let Some(seen) = self.seen.as_mut() else {
            return true;
        };
        match self.codec.serialize_vertex(vertex) {
            Ok(key) => seen.put(key, ()).is_none(),
            Err(_) => true,
        }
    }
}

impl Iterator for AdjacentSeedStream {
    type Item = Result<EntitySeed>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(Element::Edge(edge)) => {
                    if self.is_new(&edge.destination) {
                        return Some(Ok(EntitySeed { vertex: edge.destination }));
                    }
                }
                Ok(Element::Entity(_)) => {}
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

fn open_scan(
    target: &ScanTarget<'_>,
    ranges: Vec<RowRange>,
    view: &View,
    user: &User,
    directed: DirectedType,
    in_out: IncludeIncomingOutgoing,
    extras: &BTreeSet<ProcessorKind>,
) -> Result<Box<dyn ResultScanner>> {
    let mut scan = Scan::new(ranges)
        .authorizations(user.data_auths.iter().cloned())
        .attribute(attributes::VIEW, view.to_json()?)
        .attribute(attributes::DIRECTED_TYPE, directed.as_str());
    if in_out != IncludeIncomingOutgoing::Either {
        scan = scan.attribute(attributes::INCLUDE_INCOMING_OUTGOING, in_out.as_str());
    }
    if !extras.is_empty() {
        scan = scan.attribute(attributes::EXTRA_PROCESSORS, ProcessorKind::to_list(extras));
    }
    debug!(
        table = target.table.name(),
        user = %user.user_id,
        ranges = scan.ranges.len(),
        extras = %ProcessorKind::to_list(extras),
        "retrieve.scan.open"
    );
    target.table.scanner(&scan)
}

fn narrowed_view(view: &View, options: &GetOptions) -> View {
    match (options.include_entities, options.include_edges) {
        (true, true) => view.clone(),
        (false, true) => view.without_entities(),
        (true, false) => view.without_edges(),
        (false, false) => view.without_entities().without_edges(),
    }
}

/// Elements matching `seeds` under `view`.
pub(crate) fn get_elements<I>(
    target: &ScanTarget<'_>,
    seeds: I,
    view: &View,
    user: &User,
    options: &GetOptions,
) -> Result<ElementStream>
where
    I: IntoIterator,
    I::Item: Into<ElementSeed>,
{
    view.validate(target.codec.schema())?;
    let view = narrowed_view(view, options);
    let (entities, edges) = (view.has_entities(), view.has_edges());
    let codec = target.codec;

    let mut ranges = Vec::new();
    let mut matcher = SeedMatcher::default();
    for seed in seeds {
        let seed: ElementSeed = seed.into();
        match seed {
            ElementSeed::Entity(seed) => {
                ranges.extend(codec.entity_seed_ranges(&seed.vertex, entities, edges)?);
                if edges {
                    matcher.edge_vertices.insert(codec.serialize_vertex(&seed.vertex)?);
                }
            }
            ElementSeed::Edge(seed) => {
                if !edges {
                    continue;
                }
                ranges.extend(codec.edge_seed_ranges(&seed)?);
                matcher.edge_seeds.push((
                    codec.serialize_vertex(&seed.source)?,
                    codec.serialize_vertex(&seed.destination)?,
                    seed.directed,
                ));
            }
        }
    }

    let filter = ClientFilter {
        codec: Arc::clone(codec),
        view: Arc::new(view.clone()),
        metrics: Arc::clone(target.metrics),
        seeds: Some(matcher),
        in_out: options.in_out,
        deduplicate: options.deduplicate,
        swap: options
            .return_matched_id_as_edge_source
            .unwrap_or(target.return_matched_id_as_edge_source),
    };
    if ranges.is_empty() {
        return Ok(ElementStream::new(Box::new(EmptyScanner), filter));
    }
    let mut extras = BTreeSet::new();
    if options.directed != DirectedType::Either || options.in_out != IncludeIncomingOutgoing::Either {
        extras.insert(ProcessorKind::SeededEdgeFilter);
    }
    let scanner = open_scan(target, ranges, &view, user, options.directed, options.in_out, &extras)?;
    Ok(ElementStream::new(scanner, filter))
}

/// Every element under `view`, each edge once.
pub(crate) fn get_all_elements(
    target: &ScanTarget<'_>,
    view: &View,
    user: &User,
    options: &GetOptions,
) -> Result<ElementStream> {
    view.validate(target.codec.schema())?;
    let view = narrowed_view(view, options);
    let extras = BTreeSet::from([ProcessorKind::DedupeFilter]);
    let scanner = open_scan(
        target,
        vec![RowRange::all()],
        &view,
        user,
        options.directed,
        IncludeIncomingOutgoing::Either,
        &extras,
    )?;
    let filter = ClientFilter {
        codec: Arc::clone(target.codec),
        view: Arc::new(view),
        metrics: Arc::clone(target.metrics),
        seeds: None,
        in_out: IncludeIncomingOutgoing::Either,
        deduplicate: false,
        swap: false,
    };
    Ok(ElementStream::new(scanner, filter))
}

/// Vertices one edge away from `seeds`.
pub(crate) fn get_adjacent_entity_seeds<I>(
    target: &ScanTarget<'_>,
    seeds: I,
    view: &View,
    user: &User,
    options: &GetOptions,
) -> Result<AdjacentSeedStream>
where
    I: IntoIterator<Item = EntitySeed>,
{
    // Edge dedupe would drop the destination-first row of an edge whose
    // endpoints are both seeded, losing that row's far endpoint. Vertices are
    // deduplicated by the LRU set instead.
    let options = options
        .clone()
        .include_entities(false)
        .include_edges(true)
        .deduplicate(false)
        .return_matched_id_as_edge_source(true);
    let inner = get_elements(target, seeds, view, user, &options)?;
    Ok(AdjacentSeedStream {
        inner,
        codec: Arc::clone(target.codec),
        seen: NonZeroUsize::new(target.adjacent_seed_dedupe_capacity).map(LruCache::new),
    })
}

struct EmptyScanner;

impl ResultScanner for EmptyScanner {
    fn next_batch(&mut self) -> Result<Option<Vec<Cell>>> {
        Ok(None)
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::flag;

    fn row(first: u8, second: u8, directed: bool, source_first: bool) -> RowKey {
        RowKey {
            group: "E".into(),
            first: vec![first],
            second: Some(vec![second]),
            flag: flag::of(directed, source_first),
        }
    }

    fn matcher(vertices: &[u8]) -> SeedMatcher {
        SeedMatcher {
            edge_vertices: vertices.iter().map(|v| vec![*v]).collect(),
            edge_seeds: Vec::new(),
        }
    }

    #[test]
    fn destination_row_is_covered_when_source_is_seeded() {
        let seeds = matcher(&[1, 2]);
        let dst_first = row(2, 1, true, false);
        assert!(seeds.matches(&dst_first));
        assert!(seeds.covers_source_row(&dst_first, IncludeIncomingOutgoing::Either));
        assert!(!seeds.covers_source_row(&dst_first, IncludeIncomingOutgoing::Incoming));
        assert!(!matcher(&[2]).covers_source_row(&dst_first, IncludeIncomingOutgoing::Either));
    }

    #[test]
    fn edge_seeds_match_exactly() {
        let seeds = SeedMatcher {
            edge_vertices: FxHashSet::default(),
            edge_seeds: vec![(vec![1], vec![2], DirectedType::Either)],
        };
        assert!(seeds.matches(&row(1, 2, true, true)));
        assert!(seeds.matches(&row(2, 1, true, false)));
        // 2 -> 1 directed is a different edge
        assert!(!seeds.matches(&row(2, 1, true, true)));
        assert!(seeds.matches(&row(1, 2, false, true)));
        assert!(seeds.matches(&row(2, 1, false, false)));
        assert!(!seeds.matches(&row(1, 3, true, true)));

        let directed_only = SeedMatcher {
            edge_vertices: FxHashSet::default(),
            edge_seeds: vec![(vec![1], vec![2], DirectedType::Directed)],
        };
        assert!(!directed_only.matches(&row(1, 2, false, true)));
    }

    #[test]
    fn swap_exchanges_edge_endpoints_only() {
        let swapped = swap_endpoints(Edge::new("E", 1, 2, true).into());
        assert_eq!(swapped, Element::Edge(Edge::new("E", 2, 1, true)));
        let entity: Element = crate::model::Entity::new("V", 1).into();
        assert_eq!(swap_endpoints(entity.clone()), entity);
    }

    #[test]
    fn cancel_handle_is_shared() {
        let handle = CancelHandle::default();
        let other = handle.clone();
        assert!(!handle.is_cancelled());
        other.cancel();
        assert!(handle.is_cancelled());
    }
}
