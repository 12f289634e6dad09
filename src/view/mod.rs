//! Query-time view: which groups to return, how to filter, aggregate,
//! transform and project them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::Element;
use crate::schema::{passes, ElementKind, FilterStep, GroupDef, Schema};

mod transform;

pub use transform::{TransformFunction, TransformStep};

/// Per-group part of a [`View`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewElementDef {
    /// Narrower group-by for query-time aggregation; `None` keeps the schema's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<Vec<String>>,
    /// Filters applied before query aggregation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_aggregation_filters: Vec<FilterStep>,
    /// Filters applied after query aggregation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_aggregation_filters: Vec<FilterStep>,
    /// Filters applied after client-side transformation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_transformation_filters: Vec<FilterStep>,
    /// Client-side transformations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transformers: Vec<TransformStep>,
    /// Properties to keep; `None` keeps all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<String>>,
    /// Properties to remove.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_properties: Vec<String>,
}

impl ViewElementDef {
    /// Sets the group-by override, builder style.
    pub fn group_by<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group_by = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a pre-aggregation filter, builder style.
    pub fn pre_aggregation_filter(mut self, step: FilterStep) -> Self {
        self.pre_aggregation_filters.push(step);
        self
    }

    /// Adds a post-aggregation filter, builder style.
    pub fn post_aggregation_filter(mut self, step: FilterStep) -> Self {
        self.post_aggregation_filters.push(step);
        self
    }

    /// Adds a post-transformation filter, builder style.
    pub fn post_transformation_filter(mut self, step: FilterStep) -> Self {
        self.post_transformation_filters.push(step);
        self
    }

    /// Adds a transformation, builder style.
    pub fn transformer(mut self, step: TransformStep) -> Self {
        self.transformers.push(step);
        self
    }

    /// Restricts returned properties, builder style.
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Excludes a property, builder style.
    pub fn exclude_property(mut self, name: impl Into<String>) -> Self {
        self.exclude_properties.push(name.into());
        self
    }

    /// The group-by override if it differs from the schema's group-by.
    pub fn query_group_by<'a>(&'a self, schema_group: &GroupDef) -> Option<&'a [String]> {
        self.group_by
            .as_deref()
            .filter(|override_by| *override_by != schema_group.group_by.as_slice())
    }

    fn has_client_side_work(&self) -> bool {
        !self.transformers.is_empty()
            || !self.post_transformation_filters.is_empty()
            || self.properties.is_some()
            || !self.exclude_properties.is_empty()
    }
}

/// A per-query view over schema groups.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct View {
    /// Entity groups to return.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, ViewElementDef>,
    /// Edge groups to return.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub edges: BTreeMap<String, ViewElementDef>,
}

impl View {
    /// An empty view, which matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// A view over every group in `schema` with no filters.
    pub fn all_of(schema: &Schema) -> Self {
        Self {
            entities: schema.entities.keys().map(|g| (g.clone(), ViewElementDef::default())).collect(),
            edges: schema.edges.keys().map(|g| (g.clone(), ViewElementDef::default())).collect(),
        }
    }

    /// Adds an entity group, builder style.
    pub fn entity(mut self, group: impl Into<String>, def: ViewElementDef) -> Self {
        self.entities.insert(group.into(), def);
        self
    }

    /// Adds an edge group, builder style.
    pub fn edge(mut self, group: impl Into<String>, def: ViewElementDef) -> Self {
        self.edges.insert(group.into(), def);
        self
    }

    /// Parses a view from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| StoreError::config(format!("invalid view json: {err}")))
    }

    /// Serialises the view to JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Per-group definition, if the group is in the view.
    pub fn group(&self, name: &str) -> Option<&ViewElementDef> {
        self.entities.get(name).or_else(|| self.edges.get(name))
    }

    /// Whether `name` is one of the view's groups.
    pub fn contains_group(&self, name: &str) -> bool {
        self.entities.contains_key(name) || self.edges.contains_key(name)
    }

    /// Whether any entity group is included.
    pub fn has_entities(&self) -> bool {
        !self.entities.is_empty()
    }

    /// Whether any edge group is included.
    pub fn has_edges(&self) -> bool {
        !self.edges.is_empty()
    }

    /// Copy of the view without entity groups.
    pub fn without_entities(&self) -> Self {
        Self {
            entities: BTreeMap::new(),
            edges: self.edges.clone(),
        }
    }

    /// Copy of the view without edge groups.
    pub fn without_edges(&self) -> Self {
        Self {
            entities: self.entities.clone(),
            edges: BTreeMap::new(),
        }
    }

    /// Checks the view against `schema`. Failures are configuration errors.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for (kind, groups) in [(ElementKind::Entity, &self.entities), (ElementKind::Edge, &self.edges)] {
            for (name, def) in groups {
                let group = match schema.group(name) {
                    Some((found, group)) if found == kind => group,
                    Some(_) => {
                        return Err(StoreError::config(format!(
                            "view group {name} is declared with the wrong element kind"
                        )))
                    }
                    None => {
                        return Err(StoreError::config(format!(
                            "view group {name} is not in the schema"
                        )))
                    }
                };
                validate_group(name, group, def)?;
            }
        }
        Ok(())
    }

    /// Applies transformation, post-transformation filters and projection.
    ///
    /// Returns `None` when a post-transformation filter rejects the element.
    pub fn apply_client_side(&self, mut element: Element) -> Option<Element> {
        let Some(def) = self.group(element.group()) else {
            return Some(element);
        };
        if !def.has_client_side_work() {
            return Some(element);
        }
        for step in &def.transformers {
            step.apply(&mut element);
        }
        if !passes(&def.post_transformation_filters, &element) {
            return None;
        }
        let props = element.properties_mut();
        if let Some(keep) = &def.properties {
            props.retain(|name, _| keep.iter().any(|k| k == name));
        }
        for excluded in &def.exclude_properties {
            props.remove(excluded);
        }
        Some(element)
    }
}

fn validate_group(name: &str, group: &GroupDef, def: &ViewElementDef) -> Result<()> {
    let known = |prop: &str| group.get(prop).is_some();
    for step in def.pre_aggregation_filters.iter().chain(def.post_aggregation_filters.iter()) {
        if let Some(prop) = step.selection.property_name() {
            if !known(prop) {
                return Err(StoreError::config(format!(
                    "view group {name}: filter references unknown property {prop}"
                )));
            }
        }
    }
    if let Some(override_by) = &def.group_by {
        for prop in override_by {
            if !group.is_group_by(prop) {
                return Err(StoreError::config(format!(
                    "view group {name}: {prop} is not a schema group-by property"
                )));
            }
        }
        for prop in &group.group_by {
            if override_by.contains(prop) {
                continue;
            }
            let has_aggregator = group.get(prop).and_then(|p| p.aggregator).is_some();
            if !has_aggregator {
                return Err(StoreError::config(format!(
                    "view group {name}: collapsing group-by property {prop} needs an aggregator"
                )));
            }
        }
    }
    if def.group_by.is_some() && !group.aggregate {
        return Err(StoreError::config(format!(
            "view group {name}: query aggregation requires an aggregating group"
        )));
    }
    Ok(())
}
