#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use std::sync::atomic::Ordering;

use common::{collect, day_edge, describe, described, edge, fixture, fixture_with, properties, user, with_ts, with_vis};
use widegraph::{EntitySeed, GetOptions, Result, Value, View};
use widegraph::view::ViewElementDef;

fn view_of(groups: &[&str]) -> View {
    groups
        .iter()
        .fold(View::new(), |view, group| view.edge(*group, ViewElementDef::default()))
}

#[test]
fn single_edge_round_trips_from_either_endpoint() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 3)])?;
    let view = view_of(&["E1"]);
    let reader = user(&[]);

    let from_source = collect(fx.store.get_elements([EntitySeed::new(1)], &view, &reader, &GetOptions::default())?)?;
    assert_eq!(from_source, vec![edge("E1", 1, 2, true, 3)]);

    let from_destination =
        collect(fx.store.get_elements([EntitySeed::new(2)], &view, &reader, &GetOptions::default())?)?;
    assert_eq!(from_destination, vec![edge("E1", 1, 2, true, 3)]);

    let swapped = collect(fx.store.get_elements(
        [EntitySeed::new(2)],
        &view,
        &reader,
        &GetOptions::default().return_matched_id_as_edge_source(true),
    )?)?;
    assert_eq!(swapped, vec![edge("E1", 2, 1, true, 3)]);
    Ok(())
}

#[test]
fn store_level_swap_setting_applies_by_default() -> Result<()> {
    let fx = fixture_with(properties("swapped").return_matched_id_as_edge_source(true))?;
    fx.store.add_elements([edge("E1", 1, 2, true, 3)])?;
    let found = collect(fx.store.get_elements(
        [EntitySeed::new(2)],
        &view_of(&["E1"]),
        &user(&[]),
        &GetOptions::default(),
    )?)?;
    assert_eq!(described(&found), vec!["E1:2->1 count=3"]);
    Ok(())
}

#[test]
fn repeated_ingest_aggregates_on_read() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([with_ts(day_edge(1, 2, "mon", 3), 1)])?;
    fx.store.add_elements([with_ts(day_edge(1, 2, "mon", 5), 2)])?;

    let found = collect(fx.store.get_elements([EntitySeed::new(1)], &view_of(&["E"]), &user(&[]), &GetOptions::default())?)?;
    assert_eq!(found.len(), 1);
    let props = found[0].properties();
    assert_eq!(props.get("count"), Some(&Value::Int(8)));
    assert_eq!(props.get("day"), Some(&Value::from("mon")));
    assert_eq!(props.get("ts"), Some(&Value::Int(2)));
    assert!(fx.metrics.aggregation_merges.load(Ordering::Relaxed) >= 1);
    Ok(())
}

#[test]
fn untimed_repeated_ingest_keeps_every_write() -> Result<()> {
    let fx = fixture()?;
    let read = |fx: &common::Fixture| -> Result<Vec<String>> {
        let found = collect(fx.store.get_elements(
            [EntitySeed::new(1)],
            &view_of(&["E1"]),
            &user(&[]),
            &GetOptions::default(),
        )?)?;
        Ok(described(&found))
    };

    fx.store.add_elements([edge("E1", 1, 2, true, 3)])?;
    fx.store.add_elements([edge("E1", 1, 2, true, 5)])?;
    assert_eq!(read(&fx)?, vec!["E1:1->2 count=8"]);

    fx.store
        .add_elements([edge("E1", 1, 3, true, 3), edge("E1", 1, 3, true, 5)])?;
    assert_eq!(read(&fx)?, vec!["E1:1->2 count=8", "E1:1->3 count=8"]);
    Ok(())
}

#[test]
fn view_restricts_groups() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 1), edge("E2", 1, 3, true, 1)])?;

    let found = collect(fx.store.get_elements([EntitySeed::new(1)], &view_of(&["E1"]), &user(&[]), &GetOptions::default())?)?;
    assert_eq!(described(&found), vec!["E1:1->2 count=1"]);
    assert!(fx.metrics.dropped_group_filter.load(Ordering::Relaxed) >= 1);
    Ok(())
}

#[test]
fn get_all_elements_returns_each_edge_once() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        edge("E1", 2, 3, false, 1),
        edge("E1", 9, 4, true, 1),
    ])?;
    assert_eq!(fx.cluster.raw_cells("graph")?.len(), 6);

    let found = collect(fx.store.get_all_elements(&view_of(&["E1"]), &user(&[]), &GetOptions::default())?)?;
    assert_eq!(
        described(&found),
        vec!["E1:1->2 count=1", "E1:2--3 count=1", "E1:9->4 count=1"]
    );
    assert!(fx.metrics.dropped_dedupe_filter.load(Ordering::Relaxed) >= 3);
    Ok(())
}

#[test]
fn visibility_labels_gate_results() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        with_vis(edge("E1", 1, 2, true, 1), "public"),
        with_vis(edge("E1", 3, 4, true, 1), "secret"),
    ])?;
    let view = view_of(&["E1"]);
    let options = GetOptions::default();

    let public = collect(fx.store.get_all_elements(&view, &user(&["public"]), &options)?)?;
    assert_eq!(public.len(), 1);
    assert_eq!(public[0].properties().get("vis"), Some(&Value::from("public")));

    let both = collect(fx.store.get_all_elements(&view, &user(&["public", "secret"]), &options)?)?;
    assert_eq!(both.len(), 2);

    let none = collect(fx.store.get_all_elements(&view, &user(&[]), &options)?)?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn self_edge_is_returned_once() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 7, 7, true, 1)])?;
    assert_eq!(fx.cluster.raw_cells("graph")?.len(), 1);

    let found = collect(fx.store.get_elements([EntitySeed::new(7)], &view_of(&["E1"]), &user(&[]), &GetOptions::default())?)?;
    assert_eq!(found.len(), 1);
    assert_eq!(describe(&found[0]), "E1:7->7 count=1");
    Ok(())
}
