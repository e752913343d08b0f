use crate::error::{Error, Result};
use crate::identity::{EntityKey, Identity};
use crate::query::EntityNode;

use super::{read_i32, read_id, read_one, read_opt_string, read_string, Entity, Lecture, Record};

/// Fields shared by every resource subtype.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceBase {
    /// Unique within the concrete subtype only.
    pub id: Option<i64>,
    pub name: String,
    pub size: i32,
    pub url: String,
    /// Lecture using this resource; only present when fetched.
    pub lecture: Option<Box<Lecture>>,
}

impl ResourceBase {
    pub fn new(name: impl Into<String>, size: i32, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size,
            url: url.into(),
            ..Default::default()
        }
    }

    fn record(&self, kind: &str) -> Record {
        Record::new(kind, self.id.map(Identity::Simple))
            .with_field("name", self.name.as_str())
            .with_field("size", self.size)
            .with_field("url", self.url.as_str())
    }

    fn read(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            id: Some(read_id(node)?),
            name: read_string(node, "name")?,
            size: read_i32(node, "size")?,
            url: read_string(node, "url")?,
            lecture: read_one(node, "lecture")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Video {
    pub base: ResourceBase,
    pub length: i32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Text {
    pub base: ResourceBase,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct File {
    pub base: ResourceBase,
    pub file_type: String,
}

impl Entity for Video {
    const KIND: &'static str = "Video";

    fn to_record(&self) -> Result<Record> {
        Ok(self.base.record(Self::KIND).with_field("length", self.length))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::read(node)?,
            length: read_i32(node, "length")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.base.id = identity.as_simple();
    }
}

impl Entity for Text {
    const KIND: &'static str = "Text";

    fn to_record(&self) -> Result<Record> {
        Ok(self
            .base
            .record(Self::KIND)
            .with_field("content", self.content.clone()))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::read(node)?,
            content: read_opt_string(node, "content")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.base.id = identity.as_simple();
    }
}

impl Entity for File {
    const KIND: &'static str = "File";

    fn to_record(&self) -> Result<Record> {
        Ok(self
            .base
            .record(Self::KIND)
            .with_field("type", self.file_type.as_str()))
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        Ok(Self {
            base: ResourceBase::read(node)?,
            file_type: read_string(node, "type")?,
        })
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.base.id = identity.as_simple();
    }
}

/// A learning resource of any subtype.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Video(Video),
    Text(Text),
    File(File),
}

impl Resource {
    /// Concrete subtype name.
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Video(_) => Video::KIND,
            Resource::Text(_) => Text::KIND,
            Resource::File(_) => File::KIND,
        }
    }

    pub fn base(&self) -> &ResourceBase {
        match self {
            Resource::Video(v) => &v.base,
            Resource::Text(t) => &t.base,
            Resource::File(f) => &f.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut ResourceBase {
        match self {
            Resource::Video(v) => &mut v.base,
            Resource::Text(t) => &mut t.base,
            Resource::File(f) => &mut f.base,
        }
    }

    /// Key across the hierarchy, once saved.
    pub fn key(&self) -> Option<EntityKey> {
        self.base()
            .id
            .map(|id| EntityKey::new(self.kind(), Identity::Simple(id)))
    }
}

impl Entity for Resource {
    const KIND: &'static str = "Resources";

    fn to_record(&self) -> Result<Record> {
        match self {
            Resource::Video(v) => v.to_record(),
            Resource::Text(t) => t.to_record(),
            Resource::File(f) => f.to_record(),
        }
    }

    fn from_node(node: &EntityNode) -> Result<Self> {
        match node.kind.as_str() {
            Video::KIND => Video::from_node(node).map(Resource::Video),
            Text::KIND => Text::from_node(node).map(Resource::Text),
            File::KIND => File::from_node(node).map(Resource::File),
            other => Err(Error::InvalidData(format!(
                "'{}' is not a resource subtype",
                other
            ))),
        }
    }

    fn assign_identity(&mut self, identity: &Identity) {
        self.base_mut().id = identity.as_simple();
    }
}

impl From<Video> for Resource {
    fn from(video: Video) -> Self {
        Resource::Video(video)
    }
}

impl From<Text> for Resource {
    fn from(text: Text) -> Self {
        Resource::Text(text)
    }
}

impl From<File> for Resource {
    fn from(file: File) -> Self {
        Resource::File(file)
    }
}
