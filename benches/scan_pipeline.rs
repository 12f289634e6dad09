#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use widegraph::schema::{AggregatorKind, GroupDef, PropertyDef, SerializerKind};
use widegraph::storage::ElementCodec;
use widegraph::view::ViewElementDef;
use widegraph::{
    Edge, Element, EntitySeed, GetOptions, GraphStore, MemoryCluster, Schema, StoreProperties, User, Value, View,
};

const VERTICES: i64 = 2_048;
const FAN_OUT: i64 = 8;

fn schema() -> Schema {
    Schema::new(SerializerKind::Long).visibility_property("vis").edge(
        "follows",
        GroupDef::default()
            .property(PropertyDef::new("day", SerializerKind::String).aggregator(AggregatorKind::Max))
            .property(PropertyDef::new("count", SerializerKind::Long).aggregator(AggregatorKind::Sum))
            .property(PropertyDef::new("vis", SerializerKind::String))
            .group_by(["day"]),
    )
}

fn follows(source: i64, destination: i64) -> Element {
    let mut edge = Edge::new("follows", source, destination, true);
    edge.properties.insert("day".into(), Value::from("mon"));
    edge.properties.insert("count".into(), Value::Int(1));
    Element::Edge(edge)
}

fn graph() -> impl Iterator<Item = Element> {
    (0..VERTICES).flat_map(|v| (1..=FAN_OUT).map(move |k| follows(v, (v * 31 + k) % VERTICES)))
}

fn scan_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_pipeline");
    group.sample_size(20);

    let codec = ElementCodec::new(Arc::new(schema()));
    group.throughput(Throughput::Elements(1));
    group.bench_function("encode_edge", |b| {
        let element = follows(17, 42);
        b.iter(|| black_box(codec.encode(black_box(&element)).expect("encode")));
    });

    let cluster = Arc::new(MemoryCluster::new());
    let store = GraphStore::initialise(schema(), StoreProperties::new("bench", "localhost"), cluster).expect("store");
    store.add_elements(graph()).expect("ingest");
    let view = View::new().edge("follows", ViewElementDef::default());
    let user = User::default();
    let options = GetOptions::default();

    group.throughput(Throughput::Elements(64));
    group.bench_function("get_elements_64_seeds", |b| {
        b.iter(|| {
            let seeds = (0..64i64).map(|v| EntitySeed::new(v * 13));
            let stream = store.get_elements(seeds, &view, &user, &options).expect("scan");
            black_box(stream.filter_map(Result::ok).count())
        });
    });

    group.throughput(Throughput::Elements((VERTICES * FAN_OUT) as u64));
    group.bench_function("get_all_elements", |b| {
        b.iter(|| {
            let stream = store.get_all_elements(&view, &user, &options).expect("scan");
            black_box(stream.filter_map(Result::ok).count())
        });
    });

    group.finish();
}

criterion_group!(benches, scan_pipeline);
criterion_main!(benches);
