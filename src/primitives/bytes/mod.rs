#![forbid(unsafe_code)]
//! Encoding helpers shared by the cell codec.
//!
//! Decoders here return [`Result`] rather than panicking: their inputs come
//! straight off the table and a truncated cell must only cost that cell.

use crate::error::{Result, StoreError};

pub mod ord {
    //! Order-preserving encoders for numeric keys.

    use super::{Result, StoreError};

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Appends `v` with the sign bit flipped so byte order matches numeric order.
    pub fn put_i64(dst: &mut Vec<u8>, v: i64) {
        let flipped = (v as u64) ^ SIGN_BIT;
        dst.extend_from_slice(&flipped.to_be_bytes());
    }

    /// Decodes a value written by [`put_i64`]; `src` must be exactly 8 bytes.
    pub fn get_i64(src: &[u8]) -> Result<i64> {
        Ok((read_u64(src)? ^ SIGN_BIT) as i64)
    }

    /// Appends an order-preserving encoding of `v`.
    ///
    /// Negative values have every bit inverted, non-negative values only the
    /// sign bit, which sorts `-0.0` before `0.0` and keeps NaN payloads intact.
    pub fn put_f64(dst: &mut Vec<u8>, v: f64) {
        let bits = v.to_bits();
        let encoded = if bits & SIGN_BIT != 0 {
            !bits
        } else {
            bits ^ SIGN_BIT
        };
        dst.extend_from_slice(&encoded.to_be_bytes());
    }

    /// Decodes a value written by [`put_f64`].
    pub fn get_f64(src: &[u8]) -> Result<f64> {
        let encoded = read_u64(src)?;
        let bits = if encoded & SIGN_BIT != 0 {
            encoded ^ SIGN_BIT
        } else {
            !encoded
        };
        Ok(f64::from_bits(bits))
    }

    fn read_u64(src: &[u8]) -> Result<u64> {
        let bytes: [u8; U64_LEN] = src.try_into().map_err(|_| {
            StoreError::data(format!("expected {U64_LEN} bytes, found {}", src.len()))
        })?;
        Ok(u64::from_be_bytes(bytes))
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use super::{Result, StoreError};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from `src`, advancing `off`.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or_else(|| StoreError::data(format!("varint truncated at byte {i}")))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(StoreError::data("varint overflows 64 bits"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(StoreError::data("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag varint.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod esc {
    //! Row-key escaping for serialized vertices.
    //!
    //! Bytes `0x00..=0x04` are rewritten as `ESCAPE, b + SHIFT`, leaving the
    //! low bytes free to act as delimiters and flags. The mapping is monotone
    //! on byte strings so escaped vertices sort like the raw ones.

    use super::{Result, StoreError};

    /// Escape marker.
    pub const ESCAPE: u8 = 0x00;
    /// Highest byte value that must be escaped.
    pub const MAX_RESERVED: u8 = 0x04;
    const SHIFT: u8 = 0x10;

    /// Appends the escaped form of `raw` to `out`.
    pub fn escape_into(raw: &[u8], out: &mut Vec<u8>) {
        out.reserve(raw.len());
        for &b in raw {
            if b <= MAX_RESERVED {
                out.push(ESCAPE);
                out.push(b + SHIFT);
            } else {
                out.push(b);
            }
        }
    }

    /// Reads an escaped run starting at `off` and stops on the first bare
    /// reserved byte, which is left unconsumed.
    pub fn unescape_until_reserved(src: &[u8], off: &mut usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(&b) = src.get(*off) {
            if b == ESCAPE {
                let next = *src
                    .get(*off + 1)
                    .ok_or_else(|| StoreError::data("dangling escape byte in row key"))?;
                if !(SHIFT..=SHIFT + MAX_RESERVED).contains(&next) {
                    return Err(StoreError::data(format!(
                        "invalid escape sequence 0x00 0x{next:02x}"
                    )));
                }
                out.push(next - SHIFT);
                *off += 2;
            } else if b <= MAX_RESERVED {
                return Ok(out);
            } else {
                out.push(b);
                *off += 1;
            }
        }
        Ok(out)
    }
}

pub mod field {
    //! Length-prefixed optional fields used by qualifiers and values.
    //!
    //! Each field is `varint(len + 1) || bytes`; a prefix of `0` marks an
    //! absent field so absence survives a round trip.

    use super::{var, Result, StoreError};

    /// Appends a present field.
    pub fn put(out: &mut Vec<u8>, bytes: &[u8]) {
        var::encode_u64(bytes.len() as u64 + 1, out);
        out.extend_from_slice(bytes);
    }

    /// Appends an absent field.
    pub fn put_absent(out: &mut Vec<u8>) {
        out.push(0);
    }

    /// Reads the next field, returning `None` for an absent one.
    pub fn get<'a>(src: &'a [u8], off: &mut usize) -> Result<Option<&'a [u8]>> {
        let prefix = var::decode_u64(src, off)?;
        if prefix == 0 {
            return Ok(None);
        }
        let len = usize::try_from(prefix - 1)
            .map_err(|_| StoreError::data("field length exceeds usize"))?;
        let end = off
            .checked_add(len)
            .filter(|end| *end <= src.len())
            .ok_or_else(|| {
                StoreError::data(format!(
                    "field truncated: need {len} bytes, have {}",
                    src.len().saturating_sub(*off)
                ))
            })?;
        let body = &src[*off..end];
        *off = end;
        Ok(Some(body))
    }
}

#[cfg(test)]
mod tests {
    use super::{esc, field, ord, var};
    use proptest::prelude::*;

    #[test]
    fn i64_roundtrip() {
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            let mut buf = Vec::new();
            ord::put_i64(&mut buf, v);
            assert_eq!(ord::get_i64(&buf).unwrap(), v);
        }
    }

    #[test]
    fn f64_ordering_handles_neg_zero() {
        let mut neg = Vec::new();
        let mut pos = Vec::new();
        ord::put_f64(&mut neg, -0.0);
        ord::put_f64(&mut pos, 0.0);
        assert!(neg < pos, "negative zero must sort before positive zero");
        assert_eq!(ord::get_f64(&pos).unwrap(), 0.0);
    }

    #[test]
    fn short_numeric_is_data_error() {
        let err = ord::get_i64(&[1, 2, 3]).unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn varint_rejects_truncated_and_overlong() {
        let mut off = 0;
        assert!(var::decode_u64(&[0x80], &mut off).is_err());
        off = 0;
        assert!(var::decode_u64(&[0x81; 11], &mut off).is_err());
    }

    #[test]
    fn escape_stops_at_delimiter() {
        let mut key = Vec::new();
        esc::escape_into(&[0x61, 0x01, 0x00, 0x62], &mut key);
        key.push(0x02);
        key.push(0x63);
        let mut off = 0;
        let raw = esc::unescape_until_reserved(&key, &mut off).unwrap();
        assert_eq!(raw, vec![0x61, 0x01, 0x00, 0x62]);
        assert_eq!(key[off], 0x02);
    }

    #[test]
    fn absent_field_round_trips() {
        let mut buf = Vec::new();
        field::put_absent(&mut buf);
        field::put(&mut buf, b"");
        field::put(&mut buf, b"abc");
        let mut off = 0;
        assert_eq!(field::get(&buf, &mut off).unwrap(), None);
        assert_eq!(field::get(&buf, &mut off).unwrap(), Some(&b""[..]));
        assert_eq!(field::get(&buf, &mut off).unwrap(), Some(&b"abc"[..]));
        assert_eq!(off, buf.len());
    }

    #[test]
    fn truncated_field_is_rejected() {
        let buf = vec![5, b'a'];
        let mut off = 0;
        assert!(field::get(&buf, &mut off).is_err());
    }

    proptest! {
        #[test]
        fn escaping_preserves_order(a in proptest::collection::vec(any::<u8>(), 0..16),
                                    b in proptest::collection::vec(any::<u8>(), 0..16)) {
            let mut ea = Vec::new();
            let mut eb = Vec::new();
            esc::escape_into(&a, &mut ea);
            esc::escape_into(&b, &mut eb);
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
            prop_assert!(ea.iter().zip(ea.iter().skip(1)).all(|(x, y)| *x != esc::ESCAPE || *y > esc::MAX_RESERVED));
        }

        #[test]
        fn varint_roundtrip_i64_prop(v in any::<i64>()) {
            let mut buf = Vec::new();
            var::encode_i64(v, &mut buf);
            let mut off = 0;
            prop_assert_eq!(var::decode_i64(&buf, &mut off).unwrap(), v);
            prop_assert_eq!(off, buf.len());
        }

        #[test]
        fn order_preserving_f64_prop(a in any::<f64>().prop_filter("finite", |v| v.is_finite()),
                                     b in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
            let mut ea = Vec::new();
            let mut eb = Vec::new();
            ord::put_f64(&mut ea, a);
            ord::put_f64(&mut eb, b);
            if a < b {
                prop_assert!(ea < eb);
            }
        }
    }
}
