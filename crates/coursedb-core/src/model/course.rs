use crate::error::Result;
use crate::identity::Identity;
use crate::query::EntityNode;

use super::{
    linked_ids, read_id, read_many, read_opt_string, read_string, Author, Entity, Record, Section,
};

/// A course. Owns the course/author association.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Course {
    pub id: Option<i64>,
    pub name: String,
    pub description: Option<String>,
    /// `None` leaves stored authors untouched on save; `Some` replaces them.
    pub authors: Option<Vec<Author>>,
    /// Only present when fetched.
    pub sections: Option<Vec<Section>>,
}

impl Course {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Replace the author list.
    pub fn with_authors(mut self, authors: Vec<Author>) -> Self {
        self.authors = Some(authors);
        self
    }
}

impl Entity for Course {
    const KIND: &'static str = "Course";

    fn to_record(&self) -> Result<Record> {
        let mut record = Record::new(Self::KIND, self.id.map(Identity::Simple))
            .with_field("name", self.name.as_str())
            .with_field("description", self.description.clone());
        if let Some(authors) = &self.authors {
            let ids = linked_ids(Self::KIND, "authors", authors, |a| a.id)?;
            record = record.with_links("authors", ids);
        }
        Ok(record)
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            id: Some(read_id(node)?),
            name: read_string(node, "name")?,
            description: read_opt_string(node, "description")?,
            authors: read_many(node, "authors")?,
            sections: read_many(node, "sections")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.id = identity.as_simple();
    }
}
