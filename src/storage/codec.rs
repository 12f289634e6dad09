//! Element <-> cell codec.
//!
//! Row keys:
//!
//! * entity: `esc(v) 0x01 group`
//! * edge: `esc(first) 0x02 esc(second) flag group`
//!
//! `esc` is the order-preserving escape from [`crate::primitives::bytes::esc`].
//! The flag records directedness and whether `first` is the source. Every
//! non-self edge is written twice, once under each endpoint.
//!
//! Qualifiers hold the group-by properties and values hold the remaining
//! properties, both as length-prefixed fields in schema order. The
//! timestamp and visibility properties live in the cell's own timestamp and
//! visibility and are restored on decode.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::model::{Edge, EdgeSeed, Element, Entity, Properties, Value};
use crate::primitives::bytes::{esc, field};
use crate::schema::{ElementKind, GroupDef, Schema, SerializerKind};
use crate::table::{Cell, RowRange, COLUMN_FAMILY};

/// Delimiter following the vertex of an entity row.
pub const ENTITY_DELIMITER: u8 = 0x01;
/// Delimiter between the two endpoints of an edge row.
pub const EDGE_DELIMITER: u8 = 0x02;

/// Flag bytes closing the endpoint part of an edge row.
pub mod flag {
    /// Undirected edge, row keyed by the source.
    pub const UNDIRECTED_SOURCE_FIRST: u8 = 0x01;
    /// Undirected edge, row keyed by the destination.
    pub const UNDIRECTED_DESTINATION_FIRST: u8 = 0x02;
    /// Directed edge, row keyed by the source.
    pub const DIRECTED_SOURCE_FIRST: u8 = 0x03;
    /// Directed edge, row keyed by the destination.
    pub const DIRECTED_DESTINATION_FIRST: u8 = 0x04;

    pub(crate) fn of(directed: bool, source_first: bool) -> u8 {
        match (directed, source_first) {
            (false, true) => UNDIRECTED_SOURCE_FIRST,
            (false, false) => UNDIRECTED_DESTINATION_FIRST,
            (true, true) => DIRECTED_SOURCE_FIRST,
            (true, false) => DIRECTED_DESTINATION_FIRST,
        }
    }
}

/// Row key split into its parts, vertices still serialised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RowKey {
    /// Group name.
    pub group: String,
    /// The vertex the row is keyed by.
    pub first: Vec<u8>,
    /// The far endpoint, for edge rows.
    pub second: Option<Vec<u8>>,
    /// Edge flag; `0` for entity rows.
    pub flag: u8,
}

impl RowKey {
    /// Entity or edge.
    pub fn kind(&self) -> ElementKind {
        if self.second.is_some() {
            ElementKind::Edge
        } else {
            ElementKind::Entity
        }
    }

    /// Whether the row belongs to a directed edge.
    pub fn is_directed(&self) -> bool {
        matches!(
            self.flag,
            flag::DIRECTED_SOURCE_FIRST | flag::DIRECTED_DESTINATION_FIRST
        )
    }

    /// Whether the row is keyed by the edge source. Entity rows count as
    /// source-first.
    pub fn is_source_first(&self) -> bool {
        !matches!(
            self.flag,
            flag::UNDIRECTED_DESTINATION_FIRST | flag::DIRECTED_DESTINATION_FIRST
        )
    }

    /// Whether both endpoints are the same vertex.
    pub fn is_self_edge(&self) -> bool {
        self.second.as_deref() == Some(self.first.as_slice())
    }

    /// Serialised source and destination, in edge order.
    pub fn endpoints(&self) -> Option<(&[u8], &[u8])> {
        let second = self.second.as_deref()?;
        Some(if self.is_source_first() {
            (&self.first, second)
        } else {
            (second, &self.first)
        })
    }
}

/// Everything needed to write one element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedElement {
    /// One row for entities and self-edges, two for other edges. The
    /// source-first row comes first.
    pub rows: SmallVec<[Vec<u8>; 2]>,
    /// Column qualifier.
    pub qualifier: Vec<u8>,
    /// Cell value.
    pub value: Vec<u8>,
    /// Cell timestamp.
    pub timestamp: i64,
    /// Visibility label; empty means no label.
    pub visibility: Vec<u8>,
}

impl EncodedElement {
    /// One cell per row, sharing qualifier, value, timestamp and label.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        let qualifier = Bytes::copy_from_slice(&self.qualifier);
        let value = Bytes::copy_from_slice(&self.value);
        let visibility = Bytes::copy_from_slice(&self.visibility);
        self.rows.iter().map(move |row| Cell {
            row: Bytes::copy_from_slice(row),
            family: Bytes::from_static(COLUMN_FAMILY.as_bytes()),
            qualifier: qualifier.clone(),
            timestamp: self.timestamp,
            visibility: visibility.clone(),
            value: value.clone(),
        })
    }
}

#[derive(Debug)]
struct GroupLayout {
    kind: ElementKind,
    group_by: Vec<(String, SerializerKind)>,
    values: Vec<(String, SerializerKind)>,
    timestamp: bool,
    visibility: bool,
}

impl GroupLayout {
    fn new(schema: &Schema, kind: ElementKind, def: &GroupDef) -> Self {
        let group_by = def
            .group_by
            .iter()
            .filter_map(|name| def.get(name).map(|p| (p.name.clone(), p.serialiser)))
            .collect();
        let values = def
            .properties
            .iter()
            .filter(|p| !def.is_group_by(&p.name) && !schema.is_reserved_property(&p.name))
            .map(|p| (p.name.clone(), p.serialiser))
            .collect();
        let declares = |name: &Option<String>| name.as_deref().is_some_and(|n| def.get(n).is_some());
        Self {
            kind,
            group_by,
            values,
            timestamp: declares(&schema.timestamp_property),
            visibility: declares(&schema.visibility_property),
        }
    }
}

/// Schema-aware encoder and decoder of graph cells. Immutable and freely shared.
#[derive(Debug)]
pub struct ElementCodec {
    schema: Arc<Schema>,
    layouts: FxHashMap<String, GroupLayout>,
}

impl ElementCodec {
    /// Builds a codec for an already validated schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut layouts = FxHashMap::default();
        for (name, def) in &schema.entities {
            layouts.insert(name.clone(), GroupLayout::new(&schema, ElementKind::Entity, def));
        }
        for (name, def) in &schema.edges {
            layouts.insert(name.clone(), GroupLayout::new(&schema, ElementKind::Edge, def));
        }
        Self { schema, layouts }
    }

    /// The schema this codec encodes for.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    fn layout(&self, group: &str) -> Result<&GroupLayout> {
        self.layouts
            .get(group)
            .ok_or_else(|| StoreError::data(format!("group {group} is not in the schema")))
    }

    /// Serialises a vertex with the schema's vertex serialiser.
    pub fn serialize_vertex(&self, vertex: &Value) -> Result<Vec<u8>> {
        self.schema.vertex_serialiser.serialize(vertex)
    }

    /// Decodes a vertex serialised by [`ElementCodec::serialize_vertex`].
    pub fn deserialize_vertex(&self, bytes: &[u8]) -> Result<Value> {
        self.schema.vertex_serialiser.deserialize(bytes)
    }

    /// Encodes an element into its rows and cell parts.
    pub fn encode(&self, element: &Element) -> Result<EncodedElement> {
        let layout = self.layout(element.group())?;
        let expected = if element.is_edge() {
            ElementKind::Edge
        } else {
            ElementKind::Entity
        };
        if layout.kind != expected {
            return Err(StoreError::data(format!(
                "{} is not a {expected:?} group",
                element.group()
            )));
        }
        let props = element.properties();
        self.check_declared(element.group(), props)?;
        let rows = match element {
            Element::Entity(entity) => {
                let mut row = Vec::new();
                esc::escape_into(&self.serialize_vertex(&entity.vertex)?, &mut row);
                row.push(ENTITY_DELIMITER);
                row.extend_from_slice(entity.group.as_bytes());
                SmallVec::from_iter([row])
            }
            Element::Edge(edge) => self.edge_rows(edge)?,
        };
        let (qualifier, value) = self.encode_properties(element.group(), props)?;
        Ok(EncodedElement {
            rows,
            qualifier,
            value,
            timestamp: self.build_timestamp(props),
            visibility: self.build_visibility(props),
        })
    }

    fn check_declared(&self, group: &str, props: &Properties) -> Result<()> {
        let Some((_, def)) = self.schema.group(group) else {
            return Err(StoreError::data(format!("group {group} is not in the schema")));
        };
        match props.keys().find(|name| def.get(name).is_none()) {
            Some(name) => Err(StoreError::data(format!(
                "property {name} is not declared on group {group}"
            ))),
            None => Ok(()),
        }
    }

    fn edge_rows(&self, edge: &Edge) -> Result<SmallVec<[Vec<u8>; 2]>> {
        let mut source = self.serialize_vertex(&edge.source)?;
        let mut destination = self.serialize_vertex(&edge.destination)?;
        if !edge.directed && destination < source {
            std::mem::swap(&mut source, &mut destination);
        }
        let row = |first: &[u8], second: &[u8], source_first: bool| {
            let mut row = Vec::with_capacity(first.len() + second.len() + edge.group.len() + 2);
            esc::escape_into(first, &mut row);
            row.push(EDGE_DELIMITER);
            esc::escape_into(second, &mut row);
            row.push(flag::of(edge.directed, source_first));
            row.extend_from_slice(edge.group.as_bytes());
            row
        };
        let mut rows = SmallVec::new();
        rows.push(row(&source, &destination, true));
        if source != destination {
            rows.push(row(&destination, &source, false));
        }
        Ok(rows)
    }

    /// Encodes the qualifier and value for `props` under `group`.
    pub fn encode_properties(&self, group: &str, props: &Properties) -> Result<(Vec<u8>, Vec<u8>)> {
        let layout = self.layout(group)?;
        let encode = |fields: &[(String, SerializerKind)]| -> Result<Vec<u8>> {
            let mut out = Vec::new();
            let mut scratch = Vec::new();
            for (name, serialiser) in fields {
                match props.get(name) {
                    Some(value) => {
                        scratch.clear();
                        serialiser.serialize_into(value, &mut scratch)?;
                        field::put(&mut out, &scratch);
                    }
                    None => field::put_absent(&mut out),
                }
            }
            Ok(out)
        };
        Ok((encode(&layout.group_by)?, encode(&layout.values)?))
    }

    /// Timestamp for a cell: the timestamp property when set, else the
    /// ingest clock.
    ///
    /// The clock never repeats within a process, so two writes of the same
    /// group-by key stay distinct versions for aggregation to merge.
    pub fn build_timestamp(&self, props: &Properties) -> i64 {
        let from_property = self
            .schema
            .timestamp_property
            .as_ref()
            .and_then(|name| props.get(name));
        match from_property {
            Some(Value::Int(ts)) => *ts,
            _ => next_ingest_timestamp(),
        }
    }

    /// Visibility label for a cell: the visibility property, or empty.
    pub fn build_visibility(&self, props: &Properties) -> Vec<u8> {
        self.schema
            .visibility_property
            .as_ref()
            .and_then(|name| props.get(name))
            .and_then(Value::as_str)
            .map(|label| label.as_bytes().to_vec())
            .unwrap_or_default()
    }

    /// Splits a row key without deserialising its vertices.
    pub fn decode_row(&self, row: &[u8]) -> Result<RowKey> {
        let mut off = 0;
        let first = esc::unescape_until_reserved(row, &mut off)?;
        let delimiter = *row
            .get(off)
            .ok_or_else(|| StoreError::data("row key has no delimiter"))?;
        off += 1;
        let (second, flag) = match delimiter {
            ENTITY_DELIMITER => (None, 0),
            EDGE_DELIMITER => {
                let second = esc::unescape_until_reserved(row, &mut off)?;
                let flag = *row
                    .get(off)
                    .filter(|f| (flag::UNDIRECTED_SOURCE_FIRST..=flag::DIRECTED_DESTINATION_FIRST).contains(*f))
                    .ok_or_else(|| StoreError::data("edge row key has no flag byte"))?;
                off += 1;
                (Some(second), flag)
            }
            other => {
                return Err(StoreError::data(format!("unknown row delimiter 0x{other:02x}")))
            }
        };
        let group = std::str::from_utf8(&row[off..])
            .map_err(|_| StoreError::data("group name is not UTF-8"))?;
        if group.is_empty() {
            return Err(StoreError::data("row key has no group"));
        }
        Ok(RowKey {
            group: group.to_owned(),
            first,
            second,
            flag,
        })
    }

    fn decode_fields(&self, fields: &[(String, SerializerKind)], bytes: &[u8], what: &str) -> Result<Properties> {
        let mut props = Properties::new();
        let mut off = 0;
        for (name, serialiser) in fields {
            if let Some(raw) = field::get(bytes, &mut off)? {
                props.insert(name.clone(), serialiser.deserialize(raw)?);
            }
        }
        if off != bytes.len() {
            return Err(StoreError::data(format!(
                "{} trailing bytes after {what}",
                bytes.len() - off
            )));
        }
        Ok(props)
    }

    /// Decodes the group-by properties held in a qualifier.
    pub fn decode_qualifier(&self, group: &str, qualifier: &[u8]) -> Result<Properties> {
        let layout = self.layout(group)?;
        self.decode_fields(&layout.group_by, qualifier, "qualifier")
    }

    /// Decodes the non-group-by properties held in a value.
    pub fn decode_value(&self, group: &str, value: &[u8]) -> Result<Properties> {
        let layout = self.layout(group)?;
        self.decode_fields(&layout.values, value, "value")
    }

    /// Restores the timestamp and visibility properties carried by the cell.
    pub fn restore_cell_properties(&self, group: &str, cell: &Cell, props: &mut Properties) -> Result<()> {
        let layout = self.layout(group)?;
        if layout.timestamp {
            if let Some(name) = &self.schema.timestamp_property {
                props.insert(name.clone(), Value::Int(cell.timestamp));
            }
        }
        if layout.visibility && !cell.visibility.is_empty() {
            if let Some(name) = &self.schema.visibility_property {
                let label = std::str::from_utf8(&cell.visibility)
                    .map_err(|_| StoreError::data("visibility label is not UTF-8"))?;
                props.insert(name.clone(), Value::Str(label.to_owned()));
            }
        }
        Ok(())
    }

    /// Builds the element of a decoded row from its properties.
    pub fn element_from_parts(&self, row: &RowKey, properties: Properties) -> Result<Element> {
        let layout = self.layout(&row.group)?;
        if layout.kind != row.kind() {
            return Err(StoreError::data(format!(
                "row kind does not match group {}",
                row.group
            )));
        }
        Ok(match row.endpoints() {
            None => Element::Entity(Entity {
                group: row.group.clone(),
                vertex: self.deserialize_vertex(&row.first)?,
                properties,
            }),
            Some((source, destination)) => Element::Edge(Edge {
                group: row.group.clone(),
                source: self.deserialize_vertex(source)?,
                destination: self.deserialize_vertex(destination)?,
                directed: row.is_directed(),
                properties,
            }),
        })
    }

    /// Fully decodes a cell.
    pub fn decode_cell(&self, cell: &Cell) -> Result<Element> {
        let row = self.decode_row(&cell.row)?;
        let mut props = self.decode_qualifier(&row.group, &cell.qualifier)?;
        props.extend(self.decode_value(&row.group, &cell.value)?);
        self.restore_cell_properties(&row.group, cell, &mut props)?;
        self.element_from_parts(&row, props)
    }

    /// Ranges covering a vertex's entity rows and edge rows.
    pub fn entity_seed_ranges(&self, vertex: &Value, entities: bool, edges: bool) -> Result<Vec<RowRange>> {
        let mut prefix = Vec::new();
        esc::escape_into(&self.serialize_vertex(vertex)?, &mut prefix);
        let bounded = |lo: u8| {
            let mut start = prefix.clone();
            start.push(lo);
            let mut end = prefix.clone();
            end.push(lo + 1);
            RowRange::new(start, end)
        };
        let mut ranges = Vec::with_capacity(2);
        if entities {
            ranges.push(bounded(ENTITY_DELIMITER));
        }
        if edges {
            ranges.push(bounded(EDGE_DELIMITER));
        }
        Ok(ranges)
    }

    /// Ranges covering both rows of every edge between the seed's endpoints.
    pub fn edge_seed_ranges(&self, seed: &EdgeSeed) -> Result<Vec<RowRange>> {
        let a = self.serialize_vertex(&seed.source)?;
        let b = self.serialize_vertex(&seed.destination)?;
        let pair = |first: &[u8], second: &[u8]| {
            let mut prefix = Vec::new();
            esc::escape_into(first, &mut prefix);
            prefix.push(EDGE_DELIMITER);
            esc::escape_into(second, &mut prefix);
            let mut start = prefix.clone();
            start.push(flag::UNDIRECTED_SOURCE_FIRST);
            prefix.push(flag::DIRECTED_DESTINATION_FIRST + 1);
            RowRange::new(start, prefix)
        };
        let mut ranges = vec![pair(&a, &b)];
        if a != b {
            ranges.push(pair(&b, &a));
        }
        Ok(ranges)
    }
}

static LAST_INGEST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Wall-clock millis, bumped past the last value handed out.
fn next_ingest_timestamp() -> i64 {
    let now = now_millis();
    let advance = |last: i64| now.max(last.saturating_add(1));
    match LAST_INGEST_TIMESTAMP.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(advance(last))) {
        Ok(last) | Err(last) => advance(last),
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
