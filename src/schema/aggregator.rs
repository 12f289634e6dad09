use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::Value;

use super::SerializerKind;

/// Commutative binary function merging two values of one property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregatorKind {
    /// Wrapping integer sum or float sum.
    Sum,
    /// Smallest value.
    Min,
    /// Largest value.
    Max,
    /// Logical or.
    Or,
    /// Logical and.
    And,
}

impl AggregatorKind {
    /// Whether the aggregator is total over the serialiser's domain.
    pub fn supports(self, serializer: SerializerKind) -> bool {
        use SerializerKind::*;
        match self {
            AggregatorKind::Sum => matches!(serializer, Long | CompactLong | Double),
            AggregatorKind::Min | AggregatorKind::Max => serializer != Boolean,
            AggregatorKind::Or | AggregatorKind::And => serializer == Boolean,
        }
    }

    /// Merges two values.
    ///
    /// A mismatch means the schema declared an aggregator that is not total
    /// over its property, which is a configuration error.
    pub fn apply(self, left: &Value, right: &Value) -> Result<Value> {
        let merged = match (self, left, right) {
            (AggregatorKind::Sum, Value::Int(a), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
            (AggregatorKind::Sum, Value::Float(a), Value::Float(b)) => Value::Float(a + b),
            (AggregatorKind::Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
            (AggregatorKind::And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
            (AggregatorKind::Min | AggregatorKind::Max, a, b)
                if std::mem::discriminant(a) == std::mem::discriminant(b) =>
            {
                let ord = a.compare(b).unwrap_or(Ordering::Equal);
                let keep_left = match self {
                    AggregatorKind::Min => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                };
                if keep_left {
                    a.clone()
                } else {
                    b.clone()
                }
            }
            (kind, a, b) => {
                return Err(StoreError::config(format!(
                    "{kind:?} aggregator cannot merge {} with {}",
                    a.type_name(),
                    b.type_name()
                )))
            }
        };
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_merges_ints() {
        let merged = AggregatorKind::Sum.apply(&Value::Int(3), &Value::Int(5)).unwrap();
        assert_eq!(merged, Value::Int(8));
    }

    #[test]
    fn min_and_max_pick_extremes() {
        let a = Value::Str("apple".into());
        let b = Value::Str("pear".into());
        assert_eq!(AggregatorKind::Min.apply(&a, &b).unwrap(), a);
        assert_eq!(AggregatorKind::Max.apply(&a, &b).unwrap(), b);
    }

    #[test]
    fn mismatched_types_are_config_errors() {
        let err = AggregatorKind::Sum
            .apply(&Value::Int(1), &Value::Str("x".into()))
            .unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn support_matrix_rejects_sum_on_strings() {
        assert!(!AggregatorKind::Sum.supports(SerializerKind::String));
        assert!(AggregatorKind::Max.supports(SerializerKind::String));
        assert!(AggregatorKind::Or.supports(SerializerKind::Boolean));
    }
}
