//! Lifecycle of the single backing table.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{const_mutex, Mutex};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::schema::Schema;
use crate::storage::{pipeline, GRAPH_COPROCESSOR};
use crate::table::{Connection, Delete, RowRange, Scan, TableDescriptor, COLUMN_FAMILY};

use super::options::StoreProperties;

/// Deletes issued per batch by [`clear_table`].
const DELETE_BATCH: usize = 1_000;

/// Serialises table creation across every store in the process.
static CREATE_LOCK: Mutex<()> = const_mutex(());

/// Descriptor for the backing table: family `e`, unbounded versions and the
/// graph coprocessor carrying the schema.
pub fn table_descriptor(schema: &Schema, properties: &StoreProperties) -> Result<TableDescriptor> {
    let mut options = BTreeMap::new();
    options.insert(
        pipeline::SCHEMA.to_owned(),
        schema.to_option_payload(properties.schema_payload)?,
    );
    Ok(TableDescriptor::new(properties.table_name.clone())
        .tuning(properties.table_tuning.clone())
        .coprocessor(GRAPH_COPROCESSOR, options))
}

/// Creates the table if absent and checks an existing one is usable.
pub fn ensure_table_exists(conn: &dyn Connection, schema: &Schema, properties: &StoreProperties) -> Result<()> {
    let admin = conn.admin()?;
    let name = &properties.table_name;
    if !admin.table_exists(name)? {
        return create_table(conn, schema, properties);
    }
    let existing = admin.describe_table(name)?;
    if existing.family != COLUMN_FAMILY {
        return Err(StoreError::config(format!(
            "table {name} has column family {:?}, expected {COLUMN_FAMILY:?}",
            existing.family
        )));
    }
    match &existing.coprocessor {
        Some(spec) if spec.name == GRAPH_COPROCESSOR && spec.options.contains_key(pipeline::SCHEMA) => Ok(()),
        _ => Err(StoreError::config(format!(
            "table {name} has no {GRAPH_COPROCESSOR} coprocessor with a schema"
        ))),
    }
}

/// Creates the table. Losing a creation race to another store is not an error.
pub fn create_table(conn: &dyn Connection, schema: &Schema, properties: &StoreProperties) -> Result<()> {
    let descriptor = table_descriptor(schema, properties)?;
    let admin = conn.admin()?;
    let _guard = CREATE_LOCK.lock();
    if admin.table_exists(&descriptor.name)? {
        return Ok(());
    }
    match admin.create_table(&descriptor) {
        Ok(()) => {
            info!(table = %descriptor.name, "table.created");
            Ok(())
        }
        Err(StoreError::TableExists(name)) => {
            warn!(table = %name, "table.create.raced");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Removes every cell visible to `authorizations`. Falls back to dropping and
/// recreating the table when cells survive the deletes.
pub fn clear_table(
    conn: &dyn Connection,
    schema: &Schema,
    properties: &StoreProperties,
    authorizations: &BTreeSet<String>,
) -> Result<()> {
    let name = &properties.table_name;
    conn.admin()?.flush(name)?;
    let table = conn.table(name)?;
    let scan = Scan::new(vec![RowRange::all()]).authorizations(authorizations.iter().cloned());

    let mut scanner = table.scanner(&scan)?;
    let mut deletes = Vec::with_capacity(DELETE_BATCH);
    let mut deleted = 0usize;
    let drained = (|| -> Result<()> {
        while let Some(batch) = scanner.next_batch()? {
            deletes.extend(batch.iter().map(|cell| Delete {
                timestamp: None,
                ..Delete::of_cell(cell)
            }));
            if deletes.len() >= DELETE_BATCH {
                deleted += deletes.len();
                table.delete(std::mem::take(&mut deletes))?;
            }
        }
        deleted += deletes.len();
        table.delete(std::mem::take(&mut deletes))
    })();
    scanner.close();
    drained?;

    let mut check = table.scanner(&scan)?;
    let leftover = check.next_batch()?.is_some();
    check.close();
    if leftover {
        warn!(table = %name, deleted, "table.clear.recreating");
        drop_table(conn, name)?;
        return create_table(conn, schema, properties);
    }
    info!(table = %name, deleted, "table.cleared");
    Ok(())
}

/// Disables then deletes `name`. Missing tables are ignored.
pub fn drop_table(conn: &dyn Connection, name: &str) -> Result<()> {
    let admin = conn.admin()?;
    if !admin.table_exists(name)? {
        return Ok(());
    }
    if admin.is_table_enabled(name)? {
        admin.disable_table(name)?;
    }
    match admin.delete_table(name) {
        Ok(()) | Err(StoreError::TableNotFound(_)) => {
            info!(table = %name, "table.dropped");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Drops every table on the cluster.
pub fn drop_all_tables(conn: &dyn Connection) -> Result<()> {
    for name in conn.admin()?.list_tables()? {
        drop_table(conn, &name)?;
    }
    Ok(())
}
