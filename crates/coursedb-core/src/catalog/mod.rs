//! Entity metadata registry for coursedb.
//!
//! The registry describes every entity kind: its fields, embedded value
//! objects, relationships, identity strategy and inheritance strategy. It is
//! built once from static declarations and is read-only afterwards.

mod entity;
mod field;
mod registry;
mod relation;
mod types;

pub use entity::{EmbeddedDef, EntityDef, IdentityDef, InheritanceDef, UniqueWithin};
pub use field::FieldDef;
pub use registry::Registry;
pub use relation::{Cardinality, JoinRepr, RelationDef};
pub use types::ScalarType;
