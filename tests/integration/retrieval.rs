#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{collect, day_edge, described, edge, entity, fixture, user, with_ts};
use widegraph::schema::{FilterStep, Predicate, Selection};
use widegraph::store::{Operation, OperationOutput, StreamState};
use widegraph::view::{TransformFunction, TransformStep, ViewElementDef};
use widegraph::{
    DirectedType, EdgeSeed, Element, ElementSeed, EntitySeed, GetOptions, IncludeIncomingOutgoing, Result,
    StoreError, Value, View,
};

fn view_of(groups: &[&str]) -> View {
    groups
        .iter()
        .fold(View::new(), |view, group| view.edge(*group, ViewElementDef::default()))
}

fn seeded(fx: &common::Fixture, seeds: Vec<ElementSeed>, view: &View, options: GetOptions) -> Result<Vec<String>> {
    let found = collect(fx.store.get_elements(seeds, view, &user(&[]), &options)?)?;
    Ok(described(&found))
}

#[test]
fn edge_seen_from_both_endpoints_is_deduplicated() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 1), edge("E1", 2, 3, false, 1)])?;
    let view = view_of(&["E1"]);
    let seeds = || -> Vec<ElementSeed> { vec![EntitySeed::new(1).into(), EntitySeed::new(2).into()] };

    assert_eq!(
        seeded(&fx, seeds(), &view, GetOptions::default())?,
        vec!["E1:1->2 count=1", "E1:2--3 count=1"]
    );
    assert_eq!(
        seeded(&fx, seeds(), &view, GetOptions::default().deduplicate(false))?,
        vec!["E1:1->2 count=1", "E1:1->2 count=1", "E1:2--3 count=1"]
    );
    Ok(())
}

#[test]
fn directed_type_and_incoming_outgoing_policies() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        edge("E1", 3, 1, true, 1),
        edge("E1", 1, 4, false, 1),
    ])?;
    let view = view_of(&["E1"]);
    let seed = || -> Vec<ElementSeed> { vec![EntitySeed::new(1).into()] };

    assert_eq!(seeded(&fx, seed(), &view, GetOptions::default())?.len(), 3);
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().directed(DirectedType::Directed))?,
        vec!["E1:1->2 count=1", "E1:3->1 count=1"]
    );
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().directed(DirectedType::Undirected))?,
        vec!["E1:1--4 count=1"]
    );
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().in_out(IncludeIncomingOutgoing::Outgoing))?,
        vec!["E1:1--4 count=1", "E1:1->2 count=1"]
    );
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().in_out(IncludeIncomingOutgoing::Incoming))?,
        vec!["E1:1--4 count=1", "E1:3->1 count=1"]
    );
    Ok(())
}

#[test]
fn edge_seeds_return_only_the_matching_edge() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        edge("E1", 2, 1, true, 5),
        edge("E1", 1, 5, true, 1),
    ])?;
    let view = view_of(&["E1"]);
    assert_eq!(
        seeded(
            &fx,
            vec![EdgeSeed::new(1, 2, DirectedType::Directed).into()],
            &view,
            GetOptions::default()
        )?,
        vec!["E1:1->2 count=1"]
    );
    assert_eq!(
        seeded(
            &fx,
            vec![EdgeSeed::new(1, 2, DirectedType::Undirected).into()],
            &view,
            GetOptions::default()
        )?,
        Vec::<String>::new()
    );
    Ok(())
}

#[test]
fn entities_are_returned_with_their_edges() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([entity(1, 2), edge("E1", 1, 2, true, 1), entity(2, 9)])?;
    let view = View::new()
        .entity("V", ViewElementDef::default())
        .edge("E1", ViewElementDef::default());
    let seed = || -> Vec<ElementSeed> { vec![EntitySeed::new(1).into()] };

    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default())?,
        vec!["E1:1->2 count=1", "V:1 count=2"]
    );
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().include_entities(false))?,
        vec!["E1:1->2 count=1"]
    );
    assert_eq!(
        seeded(&fx, seed(), &view, GetOptions::default().include_edges(false))?,
        vec!["V:1 count=2"]
    );
    Ok(())
}

#[test]
fn adjacent_seeds_are_far_endpoints_without_repeats() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        edge("E2", 1, 2, true, 1),
        edge("E1", 1, 3, false, 1),
        edge("E1", 4, 1, true, 1),
        edge("E1", 5, 6, true, 1),
    ])?;
    let stream = fx.store.get_adjacent_entity_seeds(
        [EntitySeed::new(1)],
        &view_of(&["E1", "E2"]),
        &user(&[]),
        &GetOptions::default(),
    )?;
    let mut adjacent: Vec<i64> = stream
        .map(|seed| match seed?.vertex {
            Value::Int(v) => Ok(v),
            other => panic!("unexpected vertex {other:?}"),
        })
        .collect::<Result<_>>()?;
    adjacent.sort_unstable();
    assert_eq!(adjacent, vec![2, 3, 4]);
    Ok(())
}

#[test]
fn adjacent_seeds_include_both_endpoints_when_both_are_seeded() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 1), edge("E1", 2, 3, false, 1)])?;
    let stream = fx.store.get_adjacent_entity_seeds(
        [EntitySeed::new(1), EntitySeed::new(2)],
        &view_of(&["E1"]),
        &user(&[]),
        &GetOptions::default(),
    )?;
    let mut adjacent: Vec<i64> = stream
        .map(|seed| match seed?.vertex {
            Value::Int(v) => Ok(v),
            other => panic!("unexpected vertex {other:?}"),
        })
        .collect::<Result<_>>()?;
    adjacent.sort_unstable();
    assert_eq!(adjacent, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn query_aggregation_collapses_group_by_properties() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        with_ts(day_edge(1, 2, "mon", 3), 1),
        with_ts(day_edge(1, 2, "tue", 4), 2),
    ])?;
    let seed = || -> Vec<ElementSeed> { vec![EntitySeed::new(1).into()] };

    let by_day = seeded(&fx, seed(), &view_of(&["E"]), GetOptions::default())?;
    assert_eq!(by_day, vec!["E:1->2 count=3", "E:1->2 count=4"]);

    let collapsed = View::new().edge("E", ViewElementDef::default().group_by(Vec::<String>::new()));
    let found = collect(fx.store.get_elements(seed(), &collapsed, &user(&[]), &GetOptions::default())?)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].properties().get("count"), Some(&Value::Int(7)));
    assert_eq!(found[0].properties().get("day"), Some(&Value::from("tue")));
    Ok(())
}

#[test]
fn filters_run_before_and_after_aggregation() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        with_ts(day_edge(1, 2, "mon", 3), 1),
        with_ts(day_edge(1, 2, "tue", 4), 2),
    ])?;
    let seed = || -> Vec<ElementSeed> { vec![EntitySeed::new(1).into()] };
    let more_than_five = FilterStep::property(
        "count",
        Predicate::IsMoreThan {
            value: Value::Int(5),
            or_equal_to: false,
        },
    );

    let post_only = View::new().edge(
        "E",
        ViewElementDef::default()
            .group_by(Vec::<String>::new())
            .post_aggregation_filter(more_than_five.clone()),
    );
    assert_eq!(seeded(&fx, seed(), &post_only, GetOptions::default())?, vec!["E:1->2 count=7"]);

    let pre_and_post = View::new().edge(
        "E",
        ViewElementDef::default()
            .group_by(Vec::<String>::new())
            .pre_aggregation_filter(FilterStep::property(
                "day",
                Predicate::IsEqual {
                    value: Value::from("mon"),
                },
            ))
            .post_aggregation_filter(more_than_five),
    );
    assert!(seeded(&fx, seed(), &pre_and_post, GetOptions::default())?.is_empty());
    assert!(fx.metrics.dropped_pre_aggregation_filter.load(std::sync::atomic::Ordering::Relaxed) >= 1);
    Ok(())
}

#[test]
fn transformation_filter_and_projection_apply_client_side() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([edge("E1", 1, 2, true, 1), edge("E1", 1, 3, true, 1)])?;
    let view = View::new().edge(
        "E1",
        ViewElementDef::default()
            .transformer(TransformStep::new(
                vec![Selection::Source, Selection::Destination],
                TransformFunction::Concat {
                    separator: "-".into(),
                },
                "label",
            ))
            .post_transformation_filter(FilterStep::property(
                "label",
                Predicate::IsEqual {
                    value: Value::from("1-2"),
                },
            ))
            .properties(["label"]),
    );
    let found = collect(fx.store.get_elements([EntitySeed::new(1)], &view, &user(&[]), &GetOptions::default())?)?;
    assert_eq!(found.len(), 1);
    let Element::Edge(edge) = &found[0] else {
        panic!("expected an edge");
    };
    assert_eq!(edge.destination, Value::Int(2));
    assert_eq!(edge.properties.len(), 1);
    assert_eq!(edge.properties.get("label"), Some(&Value::from("1-2")));
    Ok(())
}

#[test]
fn invalid_views_fail_before_scanning() -> Result<()> {
    let fx = fixture()?;
    for view in [
        view_of(&["Nope"]),
        view_of(&["V"]),
        View::new().edge("E", ViewElementDef::default().group_by(["count"])),
    ] {
        let err = fx
            .store
            .get_all_elements(&view, &user(&[]), &GetOptions::default())
            .err();
        assert!(matches!(err, Some(StoreError::Config(_))), "{view:?}");
    }
    Ok(())
}

#[test]
fn ungranted_authorizations_are_refused() -> Result<()> {
    let fx = fixture()?;
    fx.cluster.grant_labels(["public"]);
    let view = view_of(&["E1"]);
    assert!(fx.store.get_all_elements(&view, &user(&["public"]), &GetOptions::default()).is_ok());
    let err = fx
        .store
        .get_all_elements(&view, &user(&["secret"]), &GetOptions::default())
        .err();
    assert!(matches!(err, Some(StoreError::Authorization(_))));
    Ok(())
}

#[test]
fn stream_lifecycle_and_cancellation() -> Result<()> {
    let fx = fixture()?;
    fx.store.add_elements([
        edge("E1", 1, 2, true, 1),
        edge("E1", 3, 4, true, 1),
        edge("E1", 5, 6, true, 1),
    ])?;
    let view = view_of(&["E1"]);

    let mut unread = fx.store.get_all_elements(&view, &user(&[]), &GetOptions::default())?;
    assert_eq!(unread.state(), StreamState::Open);
    unread.close();
    unread.close();
    assert_eq!(unread.state(), StreamState::Closed);
    assert!(unread.next().is_none());

    let mut stream = fx.store.get_all_elements(&view, &user(&[]), &GetOptions::default())?;
    let cancel = stream.cancel_handle();
    assert!(stream.next().transpose()?.is_some());
    assert_eq!(stream.state(), StreamState::Draining);
    std::thread::spawn(move || cancel.cancel())
        .join()
        .expect("cancel thread");
    assert!(stream.next().is_none());
    assert_eq!(stream.state(), StreamState::Closed);

    let drained = fx.store.get_all_elements(&view, &user(&[]), &GetOptions::default())?;
    assert_eq!(drained.count(), 3);
    Ok(())
}

#[test]
fn execute_dispatches_retrieval() -> Result<()> {
    let fx = fixture()?;
    let reader = user(&[]);
    let written = fx.store.execute(
        Operation::AddElements {
            elements: vec![Some(edge("E1", 1, 2, true, 1)), None],
        },
        &reader,
    )?;
    let OperationOutput::Ingested(report) = written else {
        panic!("expected an ingest report");
    };
    assert_eq!((report.elements, report.skipped), (1, 1));

    let output = fx.store.execute(
        Operation::GetElements {
            seeds: vec![EntitySeed::new(2).into()],
            view: view_of(&["E1"]),
            options: GetOptions::default(),
        },
        &reader,
    )?;
    let OperationOutput::Elements(stream) = output else {
        panic!("expected an element stream");
    };
    assert_eq!(described(&collect(stream)?), vec!["E1:1->2 count=1"]);
    Ok(())
}
