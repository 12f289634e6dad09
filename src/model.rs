//! Property-graph elements, seeds and query-side enums.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A property or vertex value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    Str(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Compares two values of compatible types; integers and floats compare numerically.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
        }
    }

    /// Returns the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", hex::encode(v)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Property name to value map.
pub type Properties = BTreeMap<String, Value>;

/// A single vertex with a group and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    /// Schema group.
    pub group: String,
    /// Vertex identifier.
    pub vertex: Value,
    /// Properties.
    pub properties: Properties,
}

impl Entity {
    /// Creates an entity without properties.
    pub fn new(group: impl Into<String>, vertex: impl Into<Value>) -> Self {
        Self {
            group: group.into(),
            vertex: vertex.into(),
            properties: Properties::new(),
        }
    }

    /// Adds a property, builder style.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// An edge between two vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// Schema group.
    pub group: String,
    /// Source vertex.
    pub source: Value,
    /// Destination vertex.
    pub destination: Value,
    /// Whether the edge is directed.
    pub directed: bool,
    /// Properties.
    pub properties: Properties,
}

impl Edge {
    /// Creates an edge without properties.
    pub fn new(
        group: impl Into<String>,
        source: impl Into<Value>,
        destination: impl Into<Value>,
        directed: bool,
    ) -> Self {
        Self {
            group: group.into(),
            source: source.into(),
            destination: destination.into(),
            directed,
            properties: Properties::new(),
        }
    }

    /// Adds a property, builder style.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Either an entity or an edge.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Vertex element.
    Entity(Entity),
    /// Edge element.
    Edge(Edge),
}

impl Element {
    /// The element's schema group.
    pub fn group(&self) -> &str {
        match self {
            Element::Entity(e) => &e.group,
            Element::Edge(e) => &e.group,
        }
    }

    /// The element's properties.
    pub fn properties(&self) -> &Properties {
        match self {
            Element::Entity(e) => &e.properties,
            Element::Edge(e) => &e.properties,
        }
    }

    /// Mutable access to the element's properties.
    pub fn properties_mut(&mut self) -> &mut Properties {
        match self {
            Element::Entity(e) => &mut e.properties,
            Element::Edge(e) => &mut e.properties,
        }
    }

    /// Whether this element is an edge.
    pub fn is_edge(&self) -> bool {
        matches!(self, Element::Edge(_))
    }
}

impl From<Entity> for Element {
    fn from(e: Entity) -> Self {
        Element::Entity(e)
    }
}

impl From<Edge> for Element {
    fn from(e: Edge) -> Self {
        Element::Edge(e)
    }
}

/// Seed identifying a vertex.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySeed {
    /// Vertex identifier.
    pub vertex: Value,
}

impl EntitySeed {
    /// Creates a seed for `vertex`.
    pub fn new(vertex: impl Into<Value>) -> Self {
        Self {
            vertex: vertex.into(),
        }
    }
}

/// Seed identifying an edge by its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSeed {
    /// Source vertex.
    pub source: Value,
    /// Destination vertex.
    pub destination: Value,
    /// Which edge directions the seed matches.
    pub directed: DirectedType,
}

impl EdgeSeed {
    /// Creates an edge seed.
    pub fn new(source: impl Into<Value>, destination: impl Into<Value>, directed: DirectedType) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            directed,
        }
    }
}

/// Query seed.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementSeed {
    /// Matches entities of a vertex and edges touching it.
    Entity(EntitySeed),
    /// Matches a specific edge.
    Edge(EdgeSeed),
}

impl From<EntitySeed> for ElementSeed {
    fn from(s: EntitySeed) -> Self {
        ElementSeed::Entity(s)
    }
}

impl From<EdgeSeed> for ElementSeed {
    fn from(s: EdgeSeed) -> Self {
        ElementSeed::Edge(s)
    }
}

/// Which edge directions a query accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DirectedType {
    /// Directed edges only.
    Directed,
    /// Undirected edges only.
    Undirected,
    /// Both.
    #[default]
    Either,
}

impl DirectedType {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            DirectedType::Directed => "DIRECTED",
            DirectedType::Undirected => "UNDIRECTED",
            DirectedType::Either => "EITHER",
        }
    }

    /// Whether an edge with the given directedness is accepted.
    pub fn accepts(self, directed: bool) -> bool {
        match self {
            DirectedType::Directed => directed,
            DirectedType::Undirected => !directed,
            DirectedType::Either => true,
        }
    }
}

impl FromStr for DirectedType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DIRECTED" => Ok(DirectedType::Directed),
            "UNDIRECTED" => Ok(DirectedType::Undirected),
            "EITHER" => Ok(DirectedType::Either),
            other => Err(StoreError::config(format!("unknown directed type: {other}"))),
        }
    }
}

/// Which side of a directed edge a seed must sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IncludeIncomingOutgoing {
    /// The seed is the destination.
    Incoming,
    /// The seed is the source.
    Outgoing,
    /// Either side.
    #[default]
    Either,
}

impl IncludeIncomingOutgoing {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            IncludeIncomingOutgoing::Incoming => "INCOMING",
            IncludeIncomingOutgoing::Outgoing => "OUTGOING",
            IncludeIncomingOutgoing::Either => "EITHER",
        }
    }
}

impl FromStr for IncludeIncomingOutgoing {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(IncludeIncomingOutgoing::Incoming),
            "OUTGOING" => Ok(IncludeIncomingOutgoing::Outgoing),
            "EITHER" => Ok(IncludeIncomingOutgoing::Either),
            other => Err(StoreError::config(format!(
                "unknown incoming/outgoing type: {other}"
            ))),
        }
    }
}

/// The caller of a store operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    /// User identifier, used only for logging.
    pub user_id: String,
    /// Visibility labels the user may read.
    pub data_auths: BTreeSet<String>,
}

impl User {
    /// Creates a user with the given authorizations.
    pub fn new<I, S>(user_id: impl Into<String>, auths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            data_auths: auths.into_iter().map(Into::into).collect(),
        }
    }
}
