#![allow(dead_code)]

use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use widegraph::schema::{AggregatorKind, GroupDef, PropertyDef, SerializerKind};
use widegraph::storage::{CounterMetrics, StoreMetrics};
use widegraph::store::ElementStream;
use widegraph::{Edge, Element, Entity, GraphStore, MemoryCluster, Result, Schema, StoreProperties, User};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn count() -> PropertyDef {
    PropertyDef::new("count", SerializerKind::Long).aggregator(AggregatorKind::Sum)
}

fn vis() -> PropertyDef {
    PropertyDef::new("vis", SerializerKind::String)
}

/// Entity group `V`, edge groups `E`, `E1` and `E2` summing `count`, and
/// `vis` as the visibility property. `E` is also grouped by `day`, which
/// collapses by max under query aggregation, and carries the `ts` timestamp property.
pub fn schema() -> Schema {
    let edge = || GroupDef::default().property(count()).property(vis());
    Schema::new(SerializerKind::Long)
        .visibility_property("vis")
        .timestamp_property("ts")
        .entity("V", GroupDef::default().property(count()).property(vis()))
        .edge(
            "E",
            GroupDef::default()
                .property(PropertyDef::new("day", SerializerKind::String).aggregator(AggregatorKind::Max))
                .property(count())
                .property(vis())
                .property(PropertyDef::new("ts", SerializerKind::Long))
                .group_by(["day"]),
        )
        .edge("E1", edge())
        .edge("E2", edge())
}

pub struct Fixture {
    pub cluster: MemoryCluster,
    pub store: GraphStore,
    pub metrics: Arc<CounterMetrics>,
}

pub fn properties(table: &str) -> StoreProperties {
    StoreProperties::new(table, "memory").write_buffer_size(16)
}

pub fn fixture_with(properties: StoreProperties) -> Result<Fixture> {
    init_tracing();
    let metrics = Arc::new(CounterMetrics::default());
    let shared: Arc<dyn StoreMetrics> = metrics.clone();
    let cluster = MemoryCluster::with_metrics(Arc::clone(&shared));
    let store = GraphStore::initialise_with_metrics(schema(), properties, Arc::new(cluster.clone()), shared)?;
    Ok(Fixture {
        cluster,
        store,
        metrics,
    })
}

pub fn fixture() -> Result<Fixture> {
    fixture_with(properties("graph"))
}

pub fn user(auths: &[&str]) -> User {
    User::new("tester", auths.iter().copied())
}

pub fn edge(group: &str, src: i64, dst: i64, directed: bool, count: i64) -> Element {
    Edge::new(group, src, dst, directed)
        .with_property("count", count)
        .into()
}

pub fn day_edge(src: i64, dst: i64, day: &str, count: i64) -> Element {
    Edge::new("E", src, dst, true)
        .with_property("day", day)
        .with_property("count", count)
        .into()
}

pub fn entity(vertex: i64, count: i64) -> Element {
    Entity::new("V", vertex).with_property("count", count).into()
}

pub fn with_vis(element: Element, label: &str) -> Element {
    let mut element = element;
    element.properties_mut().insert("vis".into(), label.into());
    element
}

pub fn with_ts(element: Element, ts: i64) -> Element {
    let mut element = element;
    element.properties_mut().insert("ts".into(), ts.into());
    element
}

/// `E:1->2 count=3` for edges, `V:1 count=3` for entities.
pub fn describe(element: &Element) -> String {
    let count = element
        .properties()
        .get("count")
        .map_or_else(|| "-".to_owned(), ToString::to_string);
    match element {
        Element::Edge(edge) => format!(
            "{}:{}{}{} count={count}",
            edge.group,
            edge.source,
            if edge.directed { "->" } else { "--" },
            edge.destination
        ),
        Element::Entity(entity) => format!("{}:{} count={count}", entity.group, entity.vertex),
    }
}

pub fn described(elements: &[Element]) -> Vec<String> {
    let mut out: Vec<String> = elements.iter().map(describe).collect();
    out.sort();
    out
}

pub fn collect(stream: ElementStream) -> Result<Vec<Element>> {
    stream.collect()
}

pub fn edges(elements: &[Element]) -> Vec<&Edge> {
    elements
        .iter()
        .filter_map(|e| match e {
            Element::Edge(edge) => Some(edge),
            Element::Entity(_) => None,
        })
        .collect()
}
