#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{day_edge, edge, fixture, properties, schema, user, with_ts, with_vis};
use widegraph::schema::{GroupDef, SerializerKind};
use widegraph::storage::pipeline::SCHEMA;
use widegraph::storage::GRAPH_COPROCESSOR;
use widegraph::store::{table_utils, Operation, StoreTrait};
use widegraph::table::{ConnectionFactory, COLUMN_FAMILY, MAX_VERSIONS};
use widegraph::{GraphStore, MemoryCluster, Result, Schema, StoreError};

#[test]
fn initialise_creates_a_configured_table() -> Result<()> {
    let fx = fixture()?;
    let admin = fx.store.connection()?.admin()?;
    let desc = admin.describe_table("graph")?;
    assert_eq!(desc.family, COLUMN_FAMILY);
    assert_eq!(desc.max_versions, MAX_VERSIONS);
    let coprocessor = desc.coprocessor.as_ref().expect("coprocessor attached");
    assert_eq!(coprocessor.name, GRAPH_COPROCESSOR);
    let payload = desc.coprocessor_option(SCHEMA).expect("schema option");
    assert!(!payload.contains(','), "commas are escaped in {payload}");
    assert_eq!(Schema::from_option_payload(payload)?, schema());
    Ok(())
}

#[test]
fn drop_then_ensure_leaves_an_empty_table() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 1)])?;
    assert_eq!(fx.cluster.raw_cells("graph")?.len(), 2);

    fx.store.drop_table()?;
    fx.store.drop_table()?;
    assert!(!fx.store.connection()?.admin()?.table_exists("graph")?);

    fx.store.ensure_table()?;
    assert!(fx.cluster.raw_cells("graph")?.is_empty());
    let desc = fx.store.connection()?.admin()?.describe_table("graph")?;
    assert!(desc.coprocessor_option(SCHEMA).is_some());
    Ok(())
}

#[test]
fn clear_table_deletes_visible_cells() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        with_vis(edge("E1", 3, 4, true, 1), "public"),
    ])?;
    fx.store.clear_table(&user(&["public"]))?;
    assert!(fx.cluster.raw_cells("graph")?.is_empty());
    Ok(())
}

#[test]
fn clear_table_recreates_when_deletes_miss() -> Result<()> {
    let fx = fixture()?;
    // Same element under two labels: scans merge them into one `a&b` cell
    // that matches neither stored label.
    fx.store.add_elements([
        with_vis(with_ts(day_edge(1, 2, "mon", 1), 1), "a"),
        with_vis(with_ts(day_edge(1, 2, "mon", 1), 2), "b"),
    ])?;
    fx.store.clear_table(&user(&["a", "b"]))?;
    assert!(fx.cluster.raw_cells("graph")?.is_empty());
    assert!(fx.store.connection()?.admin()?.table_exists("graph")?);
    Ok(())
}

#[test]
fn flush_compacts_without_widening_labels() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        with_ts(day_edge(1, 2, "mon", 3), 1),
        with_ts(day_edge(1, 2, "mon", 5), 2),
        with_vis(with_ts(day_edge(1, 2, "mon", 7), 3), "a"),
    ])?;
    assert_eq!(fx.cluster.raw_cells("graph")?.len(), 6);

    fx.store.connection()?.admin()?.flush("graph")?;
    let cells = fx.cluster.raw_cells("graph")?;
    // One unlabelled and one labelled cell per row.
    assert_eq!(cells.len(), 4);
    let labels: Vec<&[u8]> = cells.iter().map(|c| c.visibility.as_ref()).collect();
    assert_eq!(labels.iter().filter(|l| l.is_empty()).count(), 2);
    assert_eq!(labels.iter().filter(|l| **l == b"a").count(), 2);
    Ok(())
}

#[test]
fn closed_connection_is_reopened() -> Result<()> {
    let fx = fixture()?;
    let opened = fx.cluster.connections_opened();
    fx.store.connection()?.close();
    fx.store.add_elements([edge("E1", 1, 2, true, 1)])?;
    assert_eq!(fx.cluster.connections_opened(), opened + 1);
    fx.store.add_elements([edge("E1", 1, 3, true, 1)])?;
    assert_eq!(fx.cluster.connections_opened(), opened + 1);
    Ok(())
}

#[test]
fn unreachable_cluster_is_a_connectivity_error() {
    let cluster = MemoryCluster::new();
    cluster.set_available(false);
    let err = GraphStore::initialise(schema(), properties("graph"), Arc::new(cluster)).err();
    assert!(matches!(err, Some(StoreError::Connectivity(_))));
}

#[test]
fn invalid_configuration_fails_initialise() {
    let cluster = Arc::new(MemoryCluster::new());
    let bad_schema = Schema::new(SerializerKind::CompactLong).entity("V", GroupDef::default());
    let err = GraphStore::initialise(bad_schema, properties("graph"), cluster.clone()).err();
    assert!(matches!(err, Some(StoreError::Config(_))));

    let err = GraphStore::initialise(schema(), properties("graph").write_buffer_size(0), cluster).err();
    assert!(matches!(err, Some(StoreError::Config(_))));
}

#[test]
fn concurrent_creation_is_tolerated() -> Result<()> {
    let cluster = MemoryCluster::new();
    let props = properties("shared");
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let cluster = cluster.clone();
            let props = props.clone();
            scope.spawn(move || -> Result<()> {
                let conn = cluster.connect(&props)?;
                table_utils::ensure_table_exists(conn.as_ref(), &schema(), &props)
            });
        }
    });
    let conn = cluster.connect(&props)?;
    assert!(conn.admin()?.table_exists("shared")?);
    table_utils::drop_all_tables(conn.as_ref())?;
    assert!(conn.admin()?.list_tables()?.is_empty());
    Ok(())
}

#[test]
fn traits_and_unsupported_operations() -> Result<()> {
    let fx = fixture()?;
    assert_eq!(fx.store.traits().len(), 9);
    assert!(fx.store.traits().contains(&StoreTrait::QueryAggregation));
    let err = fx
        .store
        .execute(
            Operation::Other {
                kind: "GenerateElements".into(),
            },
            &user(&[]),
        )
        .err();
    match err {
        Some(StoreError::Unsupported(kind)) => assert_eq!(kind, "GenerateElements"),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}
