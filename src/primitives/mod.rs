//! Low-level primitives shared by the codec and the table driver.

/// Order-preserving, varint, escape and length-prefix encoders.
pub mod bytes;
