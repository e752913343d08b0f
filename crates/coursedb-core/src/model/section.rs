use crate::error::Result;
use crate::identity::Identity;
use crate::query::EntityNode;

use super::{
    read_i32, read_id, read_many, read_one, read_ref_id, read_string, simple_key, Course, Entity,
    Lecture, Record,
};

/// A section of a course. `section_order` is unique within the course.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Section {
    pub id: Option<i64>,
    pub name: String,
    pub section_order: i32,
    /// Owning reference to the course.
    pub course_id: Option<i64>,
    /// Fetched course.
    pub course: Option<Box<Course>>,
    /// Only present when fetched.
    pub lectures: Option<Vec<Lecture>>,
}

impl Section {
    pub fn new(name: impl Into<String>, section_order: i32) -> Self {
        Self {
            name: name.into(),
            section_order,
            ..Default::default()
        }
    }

    /// Attach to a saved course.
    pub fn in_course(mut self, course: &Course) -> Self {
        self.course_id = course.id;
        self
    }
}

impl Entity for Section {
    const KIND: &'static str = "Section";

    fn to_record(&self) -> Result<Record> {
        Ok(Record::new(Self::KIND, self.id.map(Identity::Simple))
            .with_field("name", self.name.as_str())
            .with_field("sectionOrder", self.section_order)
            .with_ref("course", simple_key(Course::KIND, self.course_id)))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            id: Some(read_id(node)?),
            name: read_string(node, "name")?,
            section_order: read_i32(node, "sectionOrder")?,
            course_id: read_ref_id(node, "course"),
            course: read_one(node, "course")?,
            lectures: read_many(node, "lectures")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.id = identity.as_simple();
    }
}
