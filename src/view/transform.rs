use serde::{Deserialize, Serialize};

use crate::model::{Element, Value};
use crate::schema::Selection;

fn default_separator() -> String {
    ",".to_owned()
}

/// Function computing a projected property from selected inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransformFunction {
    /// Joins the display form of every present input.
    Concat {
        /// Separator placed between inputs.
        #[serde(default = "default_separator")]
        separator: String,
    },
    /// Copies the first present input.
    Copy,
}

/// One client-side transformation writing into `projection`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformStep {
    /// Inputs.
    pub selection: Vec<Selection>,
    /// Function applied to the inputs.
    pub function: TransformFunction,
    /// Property receiving the result.
    pub projection: String,
}

impl TransformStep {
    /// Creates a step.
    pub fn new(selection: Vec<Selection>, function: TransformFunction, projection: impl Into<String>) -> Self {
        Self {
            selection,
            function,
            projection: projection.into(),
        }
    }

    /// Writes the projection into `element`. Leaves it untouched when no
    /// input is present.
    pub fn apply(&self, element: &mut Element) {
        let mut inputs = self.selection.iter().filter_map(|s| s.select(element));
        let result = match &self.function {
            TransformFunction::Copy => inputs.next().map(|v| v.into_owned()),
            TransformFunction::Concat { separator } => {
                let parts: Vec<String> = inputs.map(|v| v.to_string()).collect();
                (!parts.is_empty()).then(|| Value::Str(parts.join(separator)))
            }
        };
        if let Some(value) = result {
            element.properties_mut().insert(self.projection.clone(), value);
        }
    }
}
