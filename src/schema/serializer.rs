use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::model::Value;
use crate::primitives::bytes::{ord, var};

/// Per-property byte serialiser declared by the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SerializerKind {
    /// `0x00` / `0x01`.
    Boolean,
    /// Sign-flipped big-endian `i64`.
    Long,
    /// ZigZag varint `i64`. Compact but not order-preserving.
    CompactLong,
    /// Order-preserving `f64` bit transform.
    Double,
    /// Raw UTF-8.
    String,
    /// Raw bytes.
    Bytes,
}

impl SerializerKind {
    /// Whether `a <= b` implies `serialize(a) <= serialize(b)` bytewise.
    pub fn is_order_preserving(self) -> bool {
        !matches!(self, SerializerKind::CompactLong)
    }

    /// Whether `value` belongs to this serialiser's domain.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (SerializerKind::Boolean, Value::Bool(_))
                | (SerializerKind::Long, Value::Int(_))
                | (SerializerKind::CompactLong, Value::Int(_))
                | (SerializerKind::Double, Value::Float(_))
                | (SerializerKind::String, Value::Str(_))
                | (SerializerKind::Bytes, Value::Bytes(_))
        )
    }

    /// Appends the serialised form of `value` to `out`.
    pub fn serialize_into(self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match (self, value) {
            (SerializerKind::Boolean, Value::Bool(v)) => out.push(u8::from(*v)),
            (SerializerKind::Long, Value::Int(v)) => ord::put_i64(out, *v),
            (SerializerKind::CompactLong, Value::Int(v)) => var::encode_i64(*v, out),
            (SerializerKind::Double, Value::Float(v)) => ord::put_f64(out, *v),
            (SerializerKind::String, Value::Str(v)) => out.extend_from_slice(v.as_bytes()),
            (SerializerKind::Bytes, Value::Bytes(v)) => out.extend_from_slice(v),
            (kind, other) => {
                return Err(StoreError::data(format!(
                    "{kind:?} serialiser cannot encode a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Serialises `value` into a fresh buffer.
    pub fn serialize(self, value: &Value) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.serialize_into(value, &mut out)?;
        Ok(out)
    }

    /// Decodes bytes produced by [`SerializerKind::serialize`].
    pub fn deserialize(self, bytes: &[u8]) -> Result<Value> {
        match self {
            SerializerKind::Boolean => match bytes {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                other => Err(StoreError::data(format!("invalid boolean encoding: {other:?}"))),
            },
            SerializerKind::Long => Ok(Value::Int(ord::get_i64(bytes)?)),
            SerializerKind::CompactLong => {
                let mut off = 0;
                let v = var::decode_i64(bytes, &mut off)?;
                if off != bytes.len() {
                    return Err(StoreError::data("trailing bytes after compact long"));
                }
                Ok(Value::Int(v))
            }
            SerializerKind::Double => Ok(Value::Float(ord::get_f64(bytes)?)),
            SerializerKind::String => String::from_utf8(bytes.to_vec())
                .map(Value::Str)
                .map_err(|_| StoreError::data("invalid UTF-8 string")),
            SerializerKind::Bytes => Ok(Value::Bytes(bytes.to_vec())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_serialisation_orders_negative_first() {
        let neg = SerializerKind::Long.serialize(&Value::Int(-5)).unwrap();
        let pos = SerializerKind::Long.serialize(&Value::Int(3)).unwrap();
        assert!(neg < pos);
    }

    #[test]
    fn type_mismatch_is_data_error() {
        let err = SerializerKind::Long.serialize(&Value::Str("x".into())).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn every_kind_round_trips() {
        let cases = [
            (SerializerKind::Boolean, Value::Bool(true)),
            (SerializerKind::Long, Value::Int(-42)),
            (SerializerKind::CompactLong, Value::Int(i64::MIN)),
            (SerializerKind::Double, Value::Float(-1.25)),
            (SerializerKind::String, Value::Str("héllo".into())),
            (SerializerKind::Bytes, Value::Bytes(vec![0, 1, 2])),
        ];
        for (kind, value) in cases {
            let bytes = kind.serialize(&value).unwrap();
            assert_eq!(kind.deserialize(&bytes).unwrap(), value, "{kind:?}");
        }
    }
}
