use crate::error::Result;
use crate::identity::{EntityKey, Identity};
use crate::query::EntityNode;

use super::{
    read_id, read_one, read_ref_id, read_string, simple_key, Entity, Record, Resource, Section,
};

/// A lecture, optionally linked to one learning resource.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Lecture {
    pub id: Option<i64>,
    pub name: String,
    pub section_id: Option<i64>,
    /// Fetched section.
    pub section: Option<Box<Section>>,
    /// Owning polymorphic reference: concrete resource kind and id.
    pub resources_key: Option<EntityKey>,
    /// Fetched resource.
    pub resources: Option<Box<Resource>>,
}

impl Lecture {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Attach to a saved section.
    pub fn in_section(mut self, section: &Section) -> Self {
        self.section_id = section.id;
        self
    }

    /// Link a saved resource; `None` detaches.
    pub fn set_resources(&mut self, resource: Option<&Resource>) {
        self.resources_key = resource.and_then(Resource::key);
    }
}

impl Entity for Lecture {
    const KIND: &'static str = "Lecture";

    fn to_record(&self) -> Result<Record> {
        Ok(Record::new(Self::KIND, self.id.map(Identity::Simple))
            .with_field("name", self.name.as_str())
            .with_ref("section", simple_key(Section::KIND, self.section_id))
            .with_ref("resources", self.resources_key.clone()))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            id: Some(read_id(node)?),
            name: read_string(node, "name")?,
            section_id: read_ref_id(node, "section"),
            section: read_one(node, "section")?,
            resources_key: node.reference("resources").cloned(),
            resources: read_one(node, "resources")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.id = identity.as_simple();
    }
}
