//! coursedb core: entity registry, derived-query compiler and relationship
//! resolver for the course catalog.
//!
//! A [`Store`] compiles structured query specifications against the
//! [`Registry`], plans joins for filters and fetch directives, renders
//! parameterized SQL for a relational [`Storage`] backend and assembles the
//! returned rows into typed entity graphs.

pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod model;
pub mod mutation;
pub mod query;
pub mod storage;
mod store;

pub use catalog::{
    Cardinality, EmbeddedDef, EntityDef, FieldDef, IdentityDef, InheritanceDef, JoinRepr,
    RelationDef, Registry, ScalarType, UniqueWithin,
};
pub use config::{RetryPolicy, SqliteConfig, StoreConfig};
pub use error::{Error, Result, StorageError};
pub use identity::{EntityKey, Identity, KeyPart, SequenceHandle, SubtypeTag};
pub use model::{Entity, Record};
pub use query::{CompiledQuery, EntityNode, Related};
pub use storage::{SqliteStorage, Statement, Storage};
pub use store::Store;

/// Re-export value and query specification types.
pub use coursedb_proto as proto;
