//! Typed course catalog entities.
//!
//! Each entity converts to a [`Record`] for writes and back from an
//! assembled [`EntityNode`] for reads. Inverse associations are read-only
//! views: they are filled in only when fetched and ignored on save.

mod author;
mod course;
mod lecture;
mod order;
mod resources;
pub mod schema;
mod section;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use coursedb_proto::Value;

use crate::error::{Error, Result};
use crate::identity::{EntityKey, Identity};
use crate::query::EntityNode;

pub use author::Author;
pub use course::Course;
pub use lecture::Lecture;
pub use order::{Address, Order, OrderId};
pub use resources::{File, Resource, ResourceBase, Text, Video};
pub use section::Section;

/// A typed entity known to the registry.
pub trait Entity: Sized {
    /// Registered kind; an abstract base for hierarchy enums.
    const KIND: &'static str;

    /// Write-side view of this entity.
    fn to_record(&self) -> Result<Record>;

    /// Rebuild an entity from an assembled node.
    fn from_node(node: &EntityNode) -> Result<Self>;

    /// Apply the identity assigned by a save.
    fn assign_identity(&mut self, identity: &Identity);
}

/// Untyped values of one entity, as written by a save.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Concrete kind.
    pub kind: String,
    /// `None` for an entity that has not been saved yet.
    pub identity: Option<Identity>,
    /// Non-identity scalars keyed by path.
    pub fields: BTreeMap<String, Value>,
    /// Owning foreign keys keyed by relation.
    pub refs: BTreeMap<String, Option<EntityKey>>,
    /// Owning join-table associations; listed relations are replaced.
    pub links: BTreeMap<String, Vec<Identity>>,
}

impl Record {
    /// Create an empty record.
    pub fn new(kind: impl Into<String>, identity: Option<Identity>) -> Self {
        Self {
            kind: kind.into(),
            identity,
            ..Default::default()
        }
    }

    /// Set a scalar.
    pub fn with_field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(path.into(), value.into());
        self
    }

    /// Set a foreign key.
    pub fn with_ref(mut self, relation: impl Into<String>, target: Option<EntityKey>) -> Self {
        self.refs.insert(relation.into(), target);
        self
    }

    /// Replace a join-table association.
    pub fn with_links(mut self, relation: impl Into<String>, targets: Vec<Identity>) -> Self {
        self.links.insert(relation.into(), targets);
        self
    }
}

fn missing(node: &EntityNode, path: &str, expected: &str) -> Error {
    Error::InvalidData(format!(
        "{}.{}: expected {}, found {}",
        node.kind,
        path,
        expected,
        node.field(path).type_name()
    ))
}

pub(crate) fn read_string(node: &EntityNode, path: &str) -> Result<String> {
    node.field(path)
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| missing(node, path, "string"))
}

pub(crate) fn read_opt_string(node: &EntityNode, path: &str) -> Result<Option<String>> {
    match node.field(path) {
        Value::Null => Ok(None),
        _ => read_string(node, path).map(Some),
    }
}

pub(crate) fn read_i32(node: &EntityNode, path: &str) -> Result<i32> {
    node.field(path)
        .as_i32()
        .ok_or_else(|| missing(node, path, "integer"))
}

pub(crate) fn read_datetime(node: &EntityNode, path: &str) -> Result<NaiveDateTime> {
    node.field(path)
        .as_datetime()
        .ok_or_else(|| missing(node, path, "timestamp"))
}

pub(crate) fn read_id(node: &EntityNode) -> Result<i64> {
    node.identity.as_simple().ok_or_else(|| {
        Error::InvalidData(format!("{} has no generated identity", node.kind))
    })
}

/// Id held by a simple foreign key.
pub(crate) fn read_ref_id(node: &EntityNode, relation: &str) -> Option<i64> {
    node.reference(relation)
        .and_then(|key| key.identity.as_simple())
}

/// Fetched collection; `None` when it was not fetched.
pub(crate) fn read_many<E: Entity>(node: &EntityNode, relation: &str) -> Result<Option<Vec<E>>> {
    if !node.is_fetched(relation) {
        return Ok(None);
    }
    node.many(relation)
        .iter()
        .map(E::from_node)
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Fetched to-one association; `None` when absent or not fetched.
pub(crate) fn read_one<E: Entity>(node: &EntityNode, relation: &str) -> Result<Option<Box<E>>> {
    node.one(relation)
        .map(|child| E::from_node(child).map(Box::new))
        .transpose()
}

pub(crate) fn simple_key(kind: &str, id: Option<i64>) -> Option<EntityKey> {
    id.map(|id| EntityKey::new(kind, Identity::Simple(id)))
}

/// Identities of saved entities; unsaved members are an error.
pub(crate) fn linked_ids<E>(
    owner: &str,
    relation: &str,
    members: &[E],
    id: impl Fn(&E) -> Option<i64>,
) -> Result<Vec<Identity>> {
    members
        .iter()
        .map(|member| {
            id(member).map(Identity::Simple).ok_or_else(|| {
                Error::InvalidData(format!(
                    "{}.{} holds an entity that has not been saved",
                    owner, relation
                ))
            })
        })
        .collect()
}
