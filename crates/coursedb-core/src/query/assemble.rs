//! Entity graph assembly from flat result rows.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use coursedb_proto::{OrderDirection, Value};
use serde::Serialize;

use crate::catalog::Registry;
use crate::error::{Error, Result};
use crate::identity::{EntityKey, Identity, SubtypeTag};

use super::compiler::SortKey;
use super::render::{NodeLayout, RowLayout};

/// A loaded association.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Related {
    /// To-one association; `None` when absent.
    One(Option<Box<EntityNode>>),
    /// Collection association, in first-seen order.
    Many(Vec<EntityNode>),
}

/// One materialized entity with its fetched associations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityNode {
    /// Concrete kind.
    pub kind: String,
    /// Subtype tag for rows of an inheritance hierarchy.
    pub subtype: Option<SubtypeTag>,
    /// Identity.
    pub identity: Identity,
    /// Scalar values keyed by field path (`address.streetName`).
    pub fields: BTreeMap<String, Value>,
    /// Owning foreign keys, keyed by relation name.
    pub refs: BTreeMap<String, Option<EntityKey>>,
    /// Fetched associations, keyed by relation name.
    pub relations: BTreeMap<String, Related>,
}

impl EntityNode {
    /// Key of this node across a hierarchy.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind.clone(), self.identity.clone())
    }

    /// Scalar value by path; `Null` when not present.
    pub fn field(&self, path: &str) -> &Value {
        const NULL: &Value = &Value::Null;
        self.fields.get(path).unwrap_or(NULL)
    }

    /// Target key stored in an owning foreign key.
    pub fn reference(&self, relation: &str) -> Option<&EntityKey> {
        self.refs.get(relation).and_then(Option::as_ref)
    }

    /// Whether the association was fetched.
    pub fn is_fetched(&self, relation: &str) -> bool {
        self.relations.contains_key(relation)
    }

    /// Fetched to-one association.
    pub fn one(&self, relation: &str) -> Option<&EntityNode> {
        match self.relations.get(relation) {
            Some(Related::One(node)) => node.as_deref(),
            _ => None,
        }
    }

    /// Fetched collection; empty when absent or not fetched.
    pub fn many(&self, relation: &str) -> &[EntityNode] {
        match self.relations.get(relation) {
            Some(Related::Many(nodes)) => nodes,
            _ => &[],
        }
    }
}

/// A root node plus the sort key values read with it.
#[derive(Debug, Clone)]
pub struct Assembled {
    pub node: EntityNode,
    pub sort_key: Vec<Value>,
}

enum Children {
    One(Option<usize>),
    Many(Vec<usize>),
}

struct Slot {
    node: EntityNode,
    children: BTreeMap<String, Children>,
}

/// Groups rows by root identity and nests fetched associations.
pub struct RowAssembler<'a> {
    registry: &'a Registry,
}

impl<'a> RowAssembler<'a> {
    /// Create an assembler over a registry.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Assemble rows into root nodes, in first-seen order.
    pub fn assemble(&self, layout: &RowLayout, rows: &[Vec<Value>]) -> Result<Vec<Assembled>> {
        let mut arena: Vec<Slot> = Vec::new();
        let mut roots: Vec<(usize, Vec<Value>)> = Vec::new();
        let mut root_index: HashMap<EntityKey, usize> = HashMap::new();
        let mut child_index: HashMap<(usize, String, EntityKey), usize> = HashMap::new();

        for row in rows {
            let Some(root) = self.read_node(&layout.root, row)? else {
                continue;
            };
            let key = root.key();
            let root_idx = match root_index.get(&key) {
                Some(idx) => *idx,
                None => {
                    let idx = arena.len();
                    arena.push(Slot {
                        node: root,
                        children: BTreeMap::new(),
                    });
                    let sort_key = layout
                        .sort_keys
                        .iter()
                        .map(|&i| row.get(i).cloned().unwrap_or(Value::Null))
                        .collect();
                    roots.push((idx, sort_key));
                    root_index.insert(key, idx);
                    idx
                }
            };

            let mut row_nodes: HashMap<&str, Option<usize>> = HashMap::new();
            row_nodes.insert("", Some(root_idx));
            for fetch in &layout.fetches {
                let parent = row_nodes.get(fetch.parent.as_str()).copied().flatten();
                let Some(parent) = parent else {
                    row_nodes.insert(&fetch.path, None);
                    continue;
                };
                arena[parent]
                    .children
                    .entry(fetch.relation.clone())
                    .or_insert_with(|| {
                        if fetch.collection {
                            Children::Many(Vec::new())
                        } else {
                            Children::One(None)
                        }
                    });

                let Some(child) = self.read_node(&fetch.node, row)? else {
                    row_nodes.insert(&fetch.path, None);
                    continue;
                };
                let index_key = (parent, fetch.relation.clone(), child.key());
                let idx = match child_index.get(&index_key) {
                    Some(idx) => *idx,
                    None => {
                        let idx = arena.len();
                        arena.push(Slot {
                            node: child,
                            children: BTreeMap::new(),
                        });
                        match arena[parent].children.get_mut(&fetch.relation) {
                            Some(Children::Many(list)) => list.push(idx),
                            Some(Children::One(slot)) => {
                                if slot.is_none() {
                                    *slot = Some(idx);
                                }
                            }
                            None => {}
                        }
                        child_index.insert(index_key, idx);
                        idx
                    }
                };
                row_nodes.insert(&fetch.path, Some(idx));
            }
        }

        Ok(roots
            .into_iter()
            .map(|(idx, sort_key)| Assembled {
                node: build(&arena, idx),
                sort_key,
            })
            .collect())
    }

    /// Read one node from a row; `None` when its identity is entirely null.
    fn read_node(&self, layout: &NodeLayout, row: &[Value]) -> Result<Option<EntityNode>> {
        let kind = match layout.subtype_column {
            Some(i) => match row.get(i) {
                Some(Value::String(kind)) => kind.as_str(),
                Some(Value::Null) | None => return Ok(None),
                Some(other) => {
                    return Err(Error::InvalidData(format!(
                        "subtype column holds {}",
                        other.type_name()
                    )))
                }
            },
            None => layout.kind.as_str(),
        };
        let entity = self.registry.describe(kind)?;

        let key_values: Vec<Value> = layout.identity.iter().map(|&i| cell(row, i)).collect();
        let Some(identity) = Identity::from_values(entity, &key_values)? else {
            return Ok(None);
        };

        let mut fields = BTreeMap::new();
        for (path, i) in &layout.fields {
            // Derived-table rows carry every subtype's columns.
            let Some(field) = entity.resolve_scalar(path) else {
                continue;
            };
            let value = field.scalar.decode(cell(row, *i)).map_err(|reason| {
                Error::InvalidData(format!("{}.{}: {}", entity.name, path, reason))
            })?;
            fields.insert(path.clone(), value);
        }

        let mut refs = BTreeMap::new();
        for slot in &layout.refs {
            let target = match cell(row, slot.column).as_i64() {
                None => None,
                Some(id) => {
                    let kind = match slot.discriminator.map(|i| cell(row, i)) {
                        Some(Value::String(kind)) => kind,
                        _ => slot.target.clone(),
                    };
                    Some(EntityKey::new(kind, Identity::Simple(id)))
                }
            };
            refs.insert(slot.relation.clone(), target);
        }

        Ok(Some(EntityNode {
            kind: entity.name.clone(),
            subtype: entity.parent.as_ref().map(|base| SubtypeTag {
                base: base.clone(),
                subtype: entity.name.clone(),
            }),
            identity,
            fields,
            refs,
            relations: BTreeMap::new(),
        }))
    }
}

fn cell(row: &[Value], i: usize) -> Value {
    row.get(i).cloned().unwrap_or(Value::Null)
}

fn build(arena: &[Slot], idx: usize) -> EntityNode {
    let slot = &arena[idx];
    let mut node = slot.node.clone();
    for (relation, children) in &slot.children {
        let related = match children {
            Children::One(child) => Related::One(child.map(|i| Box::new(build(arena, i)))),
            Children::Many(list) => Related::Many(list.iter().map(|&i| build(arena, i)).collect()),
        };
        node.relations.insert(relation.clone(), related);
    }
    node
}

/// Stable-sort merged results by their sort keys, then apply the limit.
pub fn order_and_limit(
    mut results: Vec<Assembled>,
    order_by: &[SortKey],
    limit: Option<usize>,
) -> Vec<Assembled> {
    if !order_by.is_empty() {
        results.sort_by(|a, b| {
            for (i, key) in order_by.iter().enumerate() {
                let (x, y) = (a.sort_key.get(i), b.sort_key.get(i));
                let ord = match (x, y) {
                    (Some(x), Some(y)) => x.compare(y).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ord = match key.direction {
                    OrderDirection::Asc => ord,
                    OrderDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
    if let Some(limit) = limit {
        results.truncate(limit);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::query::render::{FetchLayout, RefSlot};

    fn author_layout() -> NodeLayout {
        NodeLayout {
            kind: "Author".into(),
            subtype_column: None,
            identity: vec![0],
            fields: vec![("id".into(), 0), ("firstName".into(), 1), ("age".into(), 2)],
            refs: vec![],
        }
    }

    fn course_layout() -> RowLayout {
        RowLayout {
            root: NodeLayout {
                kind: "Course".into(),
                subtype_column: None,
                identity: vec![0],
                fields: vec![("id".into(), 0), ("name".into(), 1)],
                refs: vec![],
            },
            fetches: vec![FetchLayout {
                path: "authors".into(),
                parent: String::new(),
                relation: "authors".into(),
                collection: true,
                node: NodeLayout {
                    identity: vec![2],
                    fields: vec![("id".into(), 2), ("firstName".into(), 3), ("age".into(), 4)],
                    ..author_layout()
                },
            }],
            sort_keys: vec![],
        }
    }

    fn row(course: i64, author: Option<(i64, &str)>) -> Vec<Value> {
        let mut row = vec![Value::Int64(course), Value::from("Rust")];
        match author {
            Some((id, name)) => row.extend([Value::Int64(id), Value::from(name), Value::Int64(30)]),
            None => row.extend([Value::Null, Value::Null, Value::Null]),
        }
        row
    }

    #[test]
    fn test_rows_collapse_per_root() {
        let registry = schema::course_catalog().unwrap();
        let rows = vec![
            row(1, Some((10, "Ada"))),
            row(1, Some((11, "Grace"))),
            row(1, Some((10, "Ada"))),
            row(2, None),
        ];

        let out = RowAssembler::new(&registry)
            .assemble(&course_layout(), &rows)
            .unwrap();

        assert_eq!(out.len(), 2);
        let first = &out[0].node;
        assert_eq!(first.identity, Identity::Simple(1));
        let names: Vec<&Value> = first.many("authors").iter().map(|a| a.field("firstName")).collect();
        assert_eq!(names, vec![&Value::from("Ada"), &Value::from("Grace")]);
        assert_eq!(first.many("authors")[0].field("age"), &Value::Int32(30));

        let second = &out[1].node;
        assert!(second.is_fetched("authors"));
        assert!(second.many("authors").is_empty());
    }

    #[test]
    fn test_polymorphic_reference_and_subtype_column() {
        let registry = schema::course_catalog().unwrap();
        let layout = RowLayout {
            root: NodeLayout {
                kind: "Lecture".into(),
                subtype_column: None,
                identity: vec![0],
                fields: vec![("id".into(), 0)],
                refs: vec![RefSlot {
                    relation: "resources".into(),
                    target: "Resources".into(),
                    column: 2,
                    discriminator: Some(1),
                }],
            },
            fetches: vec![FetchLayout {
                path: "resources".into(),
                parent: String::new(),
                relation: "resources".into(),
                collection: false,
                node: NodeLayout {
                    kind: "Resources".into(),
                    subtype_column: Some(3),
                    identity: vec![4],
                    fields: vec![("id".into(), 4), ("size".into(), 5), ("length".into(), 6)],
                    refs: vec![],
                },
            }],
            sort_keys: vec![],
        };
        let rows = vec![vec![
            Value::Int64(1),
            Value::from("Text"),
            Value::Int64(5),
            Value::from("Text"),
            Value::Int64(5),
            Value::Int64(20),
            Value::Null,
        ]];

        let out = RowAssembler::new(&registry).assemble(&layout, &rows).unwrap();
        let lecture = &out[0].node;
        assert_eq!(
            lecture.reference("resources"),
            Some(&EntityKey::new("Text", Identity::Simple(5)))
        );

        let text = lecture.one("resources").unwrap();
        assert_eq!(text.kind, "Text");
        assert_eq!(text.subtype.as_ref().map(|t| t.base.as_str()), Some("Resources"));
        assert_eq!(text.field("size"), &Value::Int32(20));
        // Video-only column is not read for a Text row.
        assert!(!text.fields.contains_key("length"));
    }

    #[test]
    fn test_missing_to_one_is_none() {
        let registry = schema::course_catalog().unwrap();
        let layout = RowLayout {
            root: NodeLayout {
                kind: "Lecture".into(),
                subtype_column: None,
                identity: vec![0],
                fields: vec![("id".into(), 0)],
                refs: vec![],
            },
            fetches: vec![FetchLayout {
                path: "resources".into(),
                parent: String::new(),
                relation: "resources".into(),
                collection: false,
                node: NodeLayout {
                    kind: "Resources".into(),
                    subtype_column: Some(1),
                    identity: vec![2],
                    fields: vec![],
                    refs: vec![],
                },
            }],
            sort_keys: vec![],
        };
        let rows = vec![vec![Value::Int64(1), Value::Null, Value::Null]];

        let out = RowAssembler::new(&registry).assemble(&layout, &rows).unwrap();
        assert!(out[0].node.is_fetched("resources"));
        assert!(out[0].node.one("resources").is_none());
    }

    #[test]
    fn test_order_and_limit_is_stable() {
        let node = |id: i64| EntityNode {
            kind: "Author".into(),
            subtype: None,
            identity: Identity::Simple(id),
            fields: BTreeMap::new(),
            refs: BTreeMap::new(),
            relations: BTreeMap::new(),
        };
        let results = vec![
            Assembled { node: node(1), sort_key: vec![Value::Int64(20)] },
            Assembled { node: node(2), sort_key: vec![Value::Int64(10)] },
            Assembled { node: node(3), sort_key: vec![Value::Int64(20)] },
        ];
        let registry = schema::course_catalog().unwrap();
        let key = crate::query::compiler::QueryCompiler::new(&registry)
            .compile(
                "Author",
                &coursedb_proto::QuerySpec::new().order_by(coursedb_proto::OrderSpec::desc("age")),
            )
            .unwrap()
            .order_by;

        let ordered = order_and_limit(results, &key, Some(2));
        let ids: Vec<Identity> = ordered.into_iter().map(|a| a.node.identity).collect();
        assert_eq!(ids, vec![Identity::Simple(1), Identity::Simple(3)]);
    }
}
