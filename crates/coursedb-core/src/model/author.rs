use crate::error::Result;
use crate::identity::Identity;
use crate::query::EntityNode;

use super::{read_i32, read_id, read_many, read_string, Course, Entity, Record};

/// A course author.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Author {
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    /// Unique across all authors.
    pub email: String,
    pub age: i32,
    /// Courses listing this author; only present when fetched.
    pub courses: Option<Vec<Course>>,
}

impl Author {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
        age: i32,
    ) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            age,
            ..Default::default()
        }
    }
}

impl Entity for Author {
    const KIND: &'static str = "Author";

    fn to_record(&self) -> Result<Record> {
        Ok(Record::new(Self::KIND, self.id.map(Identity::Simple))
            .with_field("firstName", self.first_name.as_str())
            .with_field("lastName", self.last_name.as_str())
            .with_field("email", self.email.as_str())
            .with_field("age", self.age))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            id: Some(read_id(node)?),
            first_name: read_string(node, "firstName")?,
            last_name: read_string(node, "lastName")?,
            email: read_string(node, "email")?,
            age: read_i32(node, "age")?,
            courses: read_many(node, "courses")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.id = identity.as_simple();
    }
}
