#![allow(missing_docs)]

#[path = "../common/mod.rs"]
mod common;

use common::{collect, described, edge, fixture_with, properties, user};
use tempfile::tempdir;
use widegraph::store::{Operation, OperationOutput};
use widegraph::table::staging_file;
use widegraph::view::ViewElementDef;
use widegraph::{GetOptions, Result, StoreError, View};

#[test]
fn staged_import_loads_and_removes_the_file() -> Result<()> {
    let dir = tempdir()?;
    let fx = fixture_with(properties("staged").hdfs_staging_path(dir.path()))?;
    let report = fx
        .store
        .import_elements_via_staging(vec![edge("E1", 1, 2, true, 2), edge("E1", 3, 3, false, 1)])?;
    assert!(report.loaded);
    assert_eq!((report.elements, report.cells), (2, 3));
    assert!(!report.path.exists());

    let view = View::new().edge("E1", ViewElementDef::default());
    let found = collect(fx.store.get_all_elements(&view, &user(&[]), &GetOptions::default())?)?;
    assert_eq!(described(&found), vec!["E1:1->2 count=2", "E1:3--3 count=1"]);
    Ok(())
}

#[test]
fn skip_import_only_prepares_the_file() -> Result<()> {
    let dir = tempdir()?;
    let fx = fixture_with(
        properties("prepared")
            .hdfs_staging_path(dir.path().join("nested"))
            .skip_import_from_hdfs(true),
    )?;
    let output = fx.store.execute(
        Operation::ImportFromStaging {
            elements: vec![edge("E1", 2, 1, true, 1)],
        },
        &user(&[]),
    )?;
    let OperationOutput::Staged(report) = output else {
        panic!("expected a staging report");
    };
    assert!(!report.loaded);
    assert!(report.path.starts_with(dir.path()));
    assert!(fx.cluster.raw_cells("prepared")?.is_empty());

    let staged = staging_file::read_cells(&report.path)?;
    assert_eq!(staged.len(), 2);
    assert!(staged.windows(2).all(|w| w[0].row <= w[1].row));
    Ok(())
}

#[test]
fn staging_requires_a_directory() -> Result<()> {
    let fx = fixture_with(properties("nodir"))?;
    let err = fx
        .store
        .import_elements_via_staging(vec![edge("E1", 1, 2, true, 1)])
        .err();
    assert!(matches!(err, Some(StoreError::Config(_))));
    Ok(())
}
