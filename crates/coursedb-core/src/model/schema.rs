//! Course catalog entity declarations.

use crate::catalog::{
    Cardinality, EmbeddedDef, EntityDef, FieldDef, IdentityDef, Registry, RelationDef, ScalarType,
};
use crate::error::Result;

fn id() -> FieldDef {
    FieldDef::new("id", ScalarType::Int64)
}

fn author() -> EntityDef {
    EntityDef::new("Author", "author")
        .with_fields([
            id(),
            FieldDef::new("firstName", ScalarType::String),
            FieldDef::new("lastName", ScalarType::String),
            FieldDef::new("email", ScalarType::String).unique(),
            FieldDef::new("age", ScalarType::Int32),
        ])
        .with_relation(RelationDef::inverse(
            "courses",
            Cardinality::ManyToMany,
            "Course",
            "authors",
        ))
}

fn course() -> EntityDef {
    EntityDef::new("Course", "course")
        .with_fields([
            id(),
            FieldDef::new("name", ScalarType::String),
            FieldDef::optional("description", ScalarType::String),
        ])
        .with_relation(RelationDef::many_to_many(
            "authors",
            "Author",
            "course_authors",
            "course_id",
            "author_id",
        ))
        .with_relation(RelationDef::inverse(
            "sections",
            Cardinality::OneToMany,
            "Section",
            "course",
        ))
}

fn section() -> EntityDef {
    EntityDef::new("Section", "section")
        .with_fields([
            id(),
            FieldDef::new("name", ScalarType::String),
            FieldDef::new("sectionOrder", ScalarType::Int32),
        ])
        .with_relation(RelationDef::many_to_one("course", "Course", "course_id"))
        .with_relation(RelationDef::inverse(
            "lectures",
            Cardinality::OneToMany,
            "Lecture",
            "section",
        ))
        .with_unique_within("sectionOrder", "course")
}

fn lecture() -> EntityDef {
    EntityDef::new("Lecture", "lecture")
        .with_fields([id(), FieldDef::new("name", ScalarType::String)])
        .with_relation(RelationDef::many_to_one("section", "Section", "section_id"))
        .with_relation(
            RelationDef::one_to_one("resources", "Resources", "resources_id")
                .with_discriminator("resources_type"),
        )
}

fn resources() -> Vec<EntityDef> {
    vec![
        EntityDef::abstract_base("Resources", ["Video", "Text", "File"])
            .with_fields([
                id(),
                FieldDef::new("name", ScalarType::String),
                FieldDef::new("size", ScalarType::Int32),
                FieldDef::new("url", ScalarType::String),
            ])
            .with_relation(RelationDef::inverse(
                "lecture",
                Cardinality::OneToOne,
                "Lecture",
                "resources",
            )),
        EntityDef::new("Video", "video")
            .extends("Resources")
            .with_field(FieldDef::new("length", ScalarType::Int32)),
        EntityDef::new("Text", "text")
            .extends("Resources")
            .with_field(FieldDef::optional("content", ScalarType::String)),
        EntityDef::new("File", "file")
            .extends("Resources")
            .with_field(FieldDef::new("type", ScalarType::String)),
    ]
}

fn order() -> EntityDef {
    EntityDef::new("Order", "orders")
        .with_field(FieldDef::new("orderInfo", ScalarType::String))
        .with_embedded(EmbeddedDef::new(
            "id",
            [
                FieldDef::new("username", ScalarType::String),
                FieldDef::new("orderDate", ScalarType::Timestamp),
            ],
        ))
        .with_embedded(EmbeddedDef::optional(
            "address",
            [
                FieldDef::new("streetName", ScalarType::String),
                FieldDef::new("houseNo", ScalarType::String),
            ],
        ))
        .with_identity(IdentityDef::Composite("id".into()))
}

/// Build the course catalog registry.
pub fn course_catalog() -> Result<Registry> {
    let mut decls = vec![author(), course(), section(), lecture()];
    decls.extend(resources());
    decls.push(order());
    Registry::build(decls)
}
