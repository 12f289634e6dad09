use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Element, Value};

/// Boolean test over an optional value.
///
/// Used both as schema validators and as view filters. Every predicate other
/// than [`Predicate::Exists`] and [`Predicate::Not`] rejects an absent value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Predicate {
    /// The value is present.
    Exists,
    /// The value equals `value`.
    IsEqual {
        /// Expected value.
        value: Value,
    },
    /// The value is greater than `value`.
    IsMoreThan {
        /// Lower bound.
        value: Value,
        /// Accept equality too.
        #[serde(default)]
        or_equal_to: bool,
    },
    /// The value is less than `value`.
    IsLessThan {
        /// Upper bound.
        value: Value,
        /// Accept equality too.
        #[serde(default)]
        or_equal_to: bool,
    },
    /// The value is one of `values`.
    IsIn {
        /// Accepted values.
        values: Vec<Value>,
    },
    /// The string value contains `value`.
    StringContains {
        /// Needle.
        value: String,
        /// Compare case-insensitively.
        #[serde(default)]
        ignore_case: bool,
    },
    /// Negation.
    Not {
        /// Negated predicate.
        predicate: Box<Predicate>,
    },
    /// All must hold.
    And {
        /// Conjuncts.
        predicates: Vec<Predicate>,
    },
    /// Any must hold.
    Or {
        /// Disjuncts.
        predicates: Vec<Predicate>,
    },
}

impl Predicate {
    /// Evaluates the predicate.
    pub fn test(&self, value: Option<&Value>) -> bool {
        match self {
            Predicate::Exists => value.is_some(),
            Predicate::Not { predicate } => !predicate.test(value),
            Predicate::And { predicates } => predicates.iter().all(|p| p.test(value)),
            Predicate::Or { predicates } => predicates.iter().any(|p| p.test(value)),
            _ => match value {
                Some(v) => self.test_present(v),
                None => false,
            },
        }
    }

    fn test_present(&self, v: &Value) -> bool {
        match self {
            Predicate::IsEqual { value } => v.compare(value) == Some(Ordering::Equal),
            Predicate::IsMoreThan { value, or_equal_to } => match v.compare(value) {
                Some(Ordering::Greater) => true,
                Some(Ordering::Equal) => *or_equal_to,
                _ => false,
            },
            Predicate::IsLessThan { value, or_equal_to } => match v.compare(value) {
                Some(Ordering::Less) => true,
                Some(Ordering::Equal) => *or_equal_to,
                _ => false,
            },
            Predicate::IsIn { values } => values
                .iter()
                .any(|candidate| v.compare(candidate) == Some(Ordering::Equal)),
            Predicate::StringContains { value, ignore_case } => match v.as_str() {
                Some(s) if *ignore_case => s.to_lowercase().contains(&value.to_lowercase()),
                Some(s) => s.contains(value.as_str()),
                None => false,
            },
            Predicate::Exists | Predicate::Not { .. } | Predicate::And { .. } | Predicate::Or { .. } => {
                self.test(Some(v))
            }
        }
    }
}

/// What part of an element a filter or transform reads.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Selection {
    /// Entity vertex.
    Vertex,
    /// Edge source.
    Source,
    /// Edge destination.
    Destination,
    /// Edge directed flag.
    Directed,
    /// Named property.
    Property(String),
}

impl Selection {
    /// Reads the selected value from `element`.
    pub fn select<'e>(&self, element: &'e Element) -> Option<Cow<'e, Value>> {
        match (self, element) {
            (Selection::Vertex, Element::Entity(e)) => Some(Cow::Borrowed(&e.vertex)),
            (Selection::Source, Element::Edge(e)) => Some(Cow::Borrowed(&e.source)),
            (Selection::Destination, Element::Edge(e)) => Some(Cow::Borrowed(&e.destination)),
            (Selection::Directed, Element::Edge(e)) => Some(Cow::Owned(Value::Bool(e.directed))),
            (Selection::Property(name), element) => element.properties().get(name).map(Cow::Borrowed),
            _ => None,
        }
    }

    /// Property name, when the selection reads a property.
    pub fn property_name(&self) -> Option<&str> {
        match self {
            Selection::Property(name) => Some(name),
            _ => None,
        }
    }
}

impl From<String> for Selection {
    fn from(s: String) -> Self {
        match s.as_str() {
            "VERTEX" => Selection::Vertex,
            "SOURCE" => Selection::Source,
            "DESTINATION" => Selection::Destination,
            "DIRECTED" => Selection::Directed,
            _ => Selection::Property(s),
        }
    }
}

impl From<Selection> for String {
    fn from(s: Selection) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Vertex => f.write_str("VERTEX"),
            Selection::Source => f.write_str("SOURCE"),
            Selection::Destination => f.write_str("DESTINATION"),
            Selection::Directed => f.write_str("DIRECTED"),
            Selection::Property(name) => f.write_str(name),
        }
    }
}

/// One filter step: a predicate applied to a selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterStep {
    /// Selected input.
    pub selection: Selection,
    /// Test applied to it.
    pub predicate: Predicate,
}

impl FilterStep {
    /// Creates a step over a named property.
    pub fn property(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            selection: Selection::Property(name.into()),
            predicate,
        }
    }
}

/// Returns `true` when `element` passes every step.
pub fn passes(steps: &[FilterStep], element: &Element) -> bool {
    steps.iter().all(|step| {
        let selected = step.selection.select(element);
        step.predicate.test(selected.as_deref())
    })
}
