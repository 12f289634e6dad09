//! Graph schema: groups, per-property serialisers, aggregators and validators.
//!
//! The schema is immutable once validated and is shared freely between the
//! client-side store and the server-side coprocessor, which receives it as a
//! table option at create time.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

mod aggregator;
mod predicate;
mod serializer;

pub use aggregator::AggregatorKind;
pub use predicate::{passes, FilterStep, Predicate, Selection};
pub use serializer::SerializerKind;

const BASE64_PAYLOAD_PREFIX: &str = "b64:";

/// Whether a group holds entities or edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Entity group.
    Entity,
    /// Edge group.
    Edge,
}

/// One property of a group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDef {
    /// Property name.
    pub name: String,
    /// Byte serialiser.
    pub serialiser: SerializerKind,
    /// Merge function used by store and query aggregation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregator: Option<AggregatorKind>,
    /// Predicates a stored value must satisfy.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validators: Vec<Predicate>,
}

impl PropertyDef {
    /// Creates a property with no aggregator or validators.
    pub fn new(name: impl Into<String>, serialiser: SerializerKind) -> Self {
        Self {
            name: name.into(),
            serialiser,
            aggregator: None,
            validators: Vec::new(),
        }
    }

    /// Sets the aggregator, builder style.
    pub fn aggregator(mut self, aggregator: AggregatorKind) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Adds a validator, builder style.
    pub fn validator(mut self, predicate: Predicate) -> Self {
        self.validators.push(predicate);
        self
    }
}

fn default_true() -> bool {
    true
}

/// Definition of an entity or edge group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDef {
    /// Properties in their stored order.
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    /// Properties forming the aggregation identity, in schema order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    /// Whether cells of this group are merged by store aggregation.
    #[serde(default = "default_true")]
    pub aggregate: bool,
}

impl Default for GroupDef {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            group_by: Vec::new(),
            aggregate: true,
        }
    }
}

impl GroupDef {
    /// Adds a property, builder style.
    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }

    /// Sets the group-by properties, builder style.
    pub fn group_by<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = names.into_iter().map(Into::into).collect();
        self
    }

    /// Disables store aggregation for the group.
    pub fn without_aggregation(mut self) -> Self {
        self.aggregate = false;
        self
    }

    /// Looks up a property by name.
    pub fn get(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether `name` is a group-by property.
    pub fn is_group_by(&self, name: &str) -> bool {
        self.group_by.iter().any(|g| g == name)
    }

    fn has_validators(&self) -> bool {
        self.properties.iter().any(|p| !p.validators.is_empty())
    }
}

/// How the schema travels through coprocessor options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchemaPayload {
    /// Compact JSON with `,` escaped as `;;` for the option parser.
    #[default]
    Escaped,
    /// `b64:` followed by base64 compact JSON.
    Base64,
}

/// The graph schema.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Entity groups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, GroupDef>,
    /// Edge groups.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub edges: BTreeMap<String, GroupDef>,
    /// Serialiser for vertices; must be order-preserving.
    pub vertex_serialiser: SerializerKind,
    /// Property whose string value becomes the cell visibility label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility_property: Option<String>,
    /// Property whose value becomes the cell timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_property: Option<String>,
}

impl Schema {
    /// Creates an empty schema with the given vertex serialiser.
    pub fn new(vertex_serialiser: SerializerKind) -> Self {
        Self {
            entities: BTreeMap::new(),
            edges: BTreeMap::new(),
            vertex_serialiser,
            visibility_property: None,
            timestamp_property: None,
        }
    }

    /// Adds an entity group, builder style.
    pub fn entity(mut self, name: impl Into<String>, def: GroupDef) -> Self {
        self.entities.insert(name.into(), def);
        self
    }

    /// Adds an edge group, builder style.
    pub fn edge(mut self, name: impl Into<String>, def: GroupDef) -> Self {
        self.edges.insert(name.into(), def);
        self
    }

    /// Names the visibility property, builder style.
    pub fn visibility_property(mut self, name: impl Into<String>) -> Self {
        self.visibility_property = Some(name.into());
        self
    }

    /// Names the timestamp property, builder style.
    pub fn timestamp_property(mut self, name: impl Into<String>) -> Self {
        self.timestamp_property = Some(name.into());
        self
    }

    /// Parses and validates a schema from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let schema: Schema = serde_json::from_slice(bytes)
            .map_err(|err| StoreError::config(format!("invalid schema json: {err}")))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Compact JSON form.
    pub fn to_compact_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Looks up a group of either kind.
    pub fn group(&self, name: &str) -> Option<(ElementKind, &GroupDef)> {
        self.entities
            .get(name)
            .map(|g| (ElementKind::Entity, g))
            .or_else(|| self.edges.get(name).map(|g| (ElementKind::Edge, g)))
    }

    /// Whether any property in any group declares validators.
    pub fn has_validators(&self) -> bool {
        self.entities.values().chain(self.edges.values()).any(GroupDef::has_validators)
    }

    /// Whether `name` is the timestamp or visibility property.
    pub fn is_reserved_property(&self, name: &str) -> bool {
        self.timestamp_property.as_deref() == Some(name)
            || self.visibility_property.as_deref() == Some(name)
    }

    /// Checks internal consistency. Every failure is a configuration error.
    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() && self.edges.is_empty() {
            return Err(StoreError::config("schema declares no groups"));
        }
        if !self.vertex_serialiser.is_order_preserving() {
            return Err(StoreError::config(format!(
                "vertex serialiser {:?} is not order-preserving",
                self.vertex_serialiser
            )));
        }
        for name in self.entities.keys() {
            if self.edges.contains_key(name) {
                return Err(StoreError::config(format!(
                    "group {name} is declared as both an entity and an edge group"
                )));
            }
        }
        for (name, group) in self.entities.iter().chain(self.edges.iter()) {
            self.validate_group(name, group)?;
        }
        Ok(())
    }

    fn validate_group(&self, name: &str, group: &GroupDef) -> Result<()> {
        if name.is_empty() {
            return Err(StoreError::config("group names must be non-empty"));
        }
        let mut seen = BTreeSet::new();
        for prop in &group.properties {
            if prop.name.is_empty() {
                return Err(StoreError::config(format!("group {name} has an unnamed property")));
            }
            if !seen.insert(prop.name.as_str()) {
                return Err(StoreError::config(format!(
                    "group {name} declares property {} twice",
                    prop.name
                )));
            }
            if let Some(agg) = prop.aggregator {
                if !agg.supports(prop.serialiser) {
                    return Err(StoreError::config(format!(
                        "{name}.{}: aggregator {agg:?} is not defined for {:?}",
                        prop.name, prop.serialiser
                    )));
                }
            }
            if self.visibility_property.as_deref() == Some(prop.name.as_str())
                && prop.serialiser != SerializerKind::String
            {
                return Err(StoreError::config(format!(
                    "{name}.{}: the visibility property must use the string serialiser",
                    prop.name
                )));
            }
            if self.timestamp_property.as_deref() == Some(prop.name.as_str())
                && !matches!(prop.serialiser, SerializerKind::Long | SerializerKind::CompactLong)
            {
                return Err(StoreError::config(format!(
                    "{name}.{}: the timestamp property must be a long",
                    prop.name
                )));
            }
            let needs_aggregator = group.aggregate
                && !group.is_group_by(&prop.name)
                && !self.is_reserved_property(&prop.name);
            if needs_aggregator && prop.aggregator.is_none() {
                return Err(StoreError::config(format!(
                    "{name}.{}: aggregating groups need an aggregator on every non group-by property",
                    prop.name
                )));
            }
        }
        let mut group_by_seen = BTreeSet::new();
        for g in &group.group_by {
            if group.get(g).is_none() {
                return Err(StoreError::config(format!(
                    "group {name}: group-by property {g} is not declared"
                )));
            }
            if self.is_reserved_property(g) {
                return Err(StoreError::config(format!(
                    "group {name}: {g} cannot be both group-by and timestamp/visibility"
                )));
            }
            if !group_by_seen.insert(g.as_str()) {
                return Err(StoreError::config(format!(
                    "group {name}: group-by property {g} listed twice"
                )));
            }
        }
        Ok(())
    }

    /// Encodes the schema as a coprocessor option value.
    pub fn to_option_payload(&self, payload: SchemaPayload) -> Result<String> {
        let json = self.to_compact_json()?;
        Ok(match payload {
            SchemaPayload::Escaped => String::from_utf8(json)
                .map_err(|_| StoreError::data("schema json is not UTF-8"))?
                .replace(',', ";;"),
            SchemaPayload::Base64 => format!("{BASE64_PAYLOAD_PREFIX}{}", BASE64.encode(json)),
        })
    }

    /// Decodes a coprocessor option value written by [`Schema::to_option_payload`].
    pub fn from_option_payload(raw: &str) -> Result<Self> {
        match raw.strip_prefix(BASE64_PAYLOAD_PREFIX) {
            Some(encoded) => {
                let json = BASE64
                    .decode(encoded)
                    .map_err(|err| StoreError::config(format!("invalid schema payload: {err}")))?;
                Schema::from_json(&json)
            }
            None => Schema::from_json(raw.replace(";;", ",").as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Schema {
        Schema::new(SerializerKind::Long)
            .visibility_property("vis")
            .edge(
                "E",
                GroupDef::default()
                    .property(PropertyDef::new("day", SerializerKind::String))
                    .property(
                        PropertyDef::new("count", SerializerKind::Long).aggregator(AggregatorKind::Sum),
                    )
                    .property(PropertyDef::new("vis", SerializerKind::String))
                    .group_by(["day"]),
            )
    }

    #[test]
    fn sample_schema_validates() {
        sample().validate().unwrap();
    }

    #[test]
    fn escaped_payload_has_no_commas_and_round_trips() {
        let schema = sample();
        let payload = schema.to_option_payload(SchemaPayload::Escaped).unwrap();
        assert!(!payload.contains(','));
        assert_eq!(Schema::from_option_payload(&payload).unwrap(), schema);
    }

    #[test]
    fn base64_payload_round_trips() {
        let schema = sample();
        let payload = schema.to_option_payload(SchemaPayload::Base64).unwrap();
        assert!(payload.starts_with("b64:"));
        assert_eq!(Schema::from_option_payload(&payload).unwrap(), schema);
    }

    #[test]
    fn missing_aggregator_is_rejected() {
        let schema = Schema::new(SerializerKind::Long).edge(
            "E",
            GroupDef::default().property(PropertyDef::new("count", SerializerKind::Long)),
        );
        assert!(matches!(schema.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn compact_vertex_serialiser_is_rejected() {
        let schema = Schema::new(SerializerKind::CompactLong).entity("V", GroupDef::default());
        assert!(matches!(schema.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn undeclared_group_by_is_rejected() {
        let schema = Schema::new(SerializerKind::Long)
            .entity("V", GroupDef::default().group_by(["missing"]));
        assert!(matches!(schema.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn schema_json_uses_camel_case() {
        let json = br#"{
            "vertexSerialiser": "string",
            "entities": {"Person": {"properties": [{"name": "age", "serialiser": "long", "aggregator": "max"}]}}
        }"#;
        let schema = Schema::from_json(json).unwrap();
        let (kind, group) = schema.group("Person").unwrap();
        assert_eq!(kind, ElementKind::Entity);
        assert!(group.aggregate);
        assert_eq!(group.get("age").unwrap().aggregator, Some(AggregatorKind::Max));
    }
}
