//! Property-graph storage over an ordered wide-column table.
//!
//! Elements are written as cells whose row keys make every edge reachable
//! from either endpoint. Reads are range scans pushed through a server-side
//! processor pipeline that filters, aggregates and validates cells before
//! they leave the region.

#![warn(missing_docs)]

pub mod error;
pub mod model;
pub mod primitives;
pub mod schema;
pub mod storage;
pub mod store;
pub mod table;
pub mod view;

pub use error::{Result, StoreError};
pub use model::{
    DirectedType, Edge, EdgeSeed, Element, ElementSeed, Entity, EntitySeed, IncludeIncomingOutgoing,
    Properties, User, Value,
};
pub use schema::Schema;
pub use store::{GetOptions, GraphStore, StoreProperties};
pub use table::MemoryCluster;
pub use view::View;
