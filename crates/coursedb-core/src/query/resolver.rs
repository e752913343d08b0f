//! Relationship resolver: compiled predicates and fetch directives to a
//! join plan.

use std::collections::HashSet;

use coursedb_proto::FetchDirective;

use crate::catalog::{EntityDef, Registry, RelationDef};
use crate::error::{Error, Result};
use crate::identity::SubtypeTag;

use super::compiler::CompiledQuery;

/// Why a join exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPurpose {
    /// Supplies columns to the predicate or the ordering.
    Filter,
    /// Loads an association into the result graph.
    Fetch,
}

/// One join in a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    /// Relation path from the root (`section.course`).
    pub path: String,
    /// Parent relation path (`""` = root).
    pub parent: String,
    /// Entity kind on the parent side (may be abstract).
    pub source: String,
    /// Relation being joined.
    pub relation: RelationDef,
    /// Target entity kind (may be abstract).
    pub target: String,
    /// Filtering or fetching.
    pub purpose: JoinPurpose,
    /// Whether the join can multiply rows.
    pub collection: bool,
    /// Alias of the target table.
    pub alias: String,
    /// Alias of the join table, for join-table associations.
    pub link_alias: Option<String>,
}

/// One concrete root a plan runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    /// Concrete root kind.
    pub kind: String,
    /// Set when the query targets an inheritance base.
    pub tag: Option<SubtypeTag>,
}

/// Ordered join plan.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    /// Root kind as queried.
    pub root: String,
    /// Concrete roots; one per subtype for polymorphic queries.
    pub branches: Vec<Branch>,
    /// Joins serving the predicate and ordering, parents first.
    pub filter_joins: Vec<JoinStep>,
    /// Joins loading fetched associations, parents first.
    pub fetch_joins: Vec<JoinStep>,
    /// Root identity columns that deduplicate fanned-out rows.
    pub dedup_key: Vec<String>,
}

impl JoinPlan {
    /// Whether any join can return several rows per root.
    pub fn fans_out(&self) -> bool {
        self.filter_joins
            .iter()
            .chain(&self.fetch_joins)
            .any(|j| j.collection)
    }

    /// Filter join for a relation path.
    pub fn filter_join(&self, path: &str) -> Option<&JoinStep> {
        self.filter_joins.iter().find(|j| j.path == path)
    }
}

/// Builds [`JoinPlan`]s.
pub struct JoinResolver<'a> {
    registry: &'a Registry,
}

impl<'a> JoinResolver<'a> {
    /// Create a resolver over a registry.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Plan the joins for a compiled query and fetch directives.
    pub fn resolve(&self, query: &CompiledQuery, fetches: &[FetchDirective]) -> Result<JoinPlan> {
        let root = self.registry.describe(&query.entity)?;
        let branches = self.branches(root, query.subtypes.as_deref())?;

        let mut aliases = 0usize;
        let mut next_alias = |prefix: &str| {
            aliases += 1;
            format!("{}{}", prefix, aliases)
        };

        // BTreeSet iteration puts every prefix before its extensions.
        let mut filter_joins: Vec<JoinStep> = Vec::new();
        for path in &query.traversed {
            let step = self.step(root, path, &filter_joins, JoinPurpose::Filter, &mut next_alias)?;
            filter_joins.push(step);
        }

        let mut fetch_joins: Vec<JoinStep> = Vec::new();
        let mut seen = HashSet::new();
        for fetch in fetches {
            self.check_fetch(root, fetch)?;
            let mut prefix = String::new();
            for segment in fetch.path.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                if seen.insert(prefix.clone()) {
                    let step =
                        self.step(root, &prefix, &fetch_joins, JoinPurpose::Fetch, &mut next_alias)?;
                    fetch_joins.push(step);
                }
            }
        }

        Ok(JoinPlan {
            root: root.name.clone(),
            branches,
            filter_joins,
            fetch_joins,
            dedup_key: root
                .identity_columns()
                .into_iter()
                .map(String::from)
                .collect(),
        })
    }

    fn branches(&self, root: &EntityDef, only: Option<&[String]>) -> Result<Vec<Branch>> {
        if !root.is_abstract() {
            return Ok(vec![Branch {
                kind: root.name.clone(),
                tag: root.parent.as_ref().map(|base| SubtypeTag {
                    base: base.clone(),
                    subtype: root.name.clone(),
                }),
            }]);
        }
        let mut branches = Vec::new();
        for subtype in root.subtypes() {
            if let Some(only) = only {
                if !only.contains(subtype) {
                    continue;
                }
            }
            let concrete = self.registry.describe(subtype)?;
            branches.push(Branch {
                kind: concrete.name.clone(),
                tag: Some(SubtypeTag {
                    base: root.name.clone(),
                    subtype: concrete.name.clone(),
                }),
            });
        }
        Ok(branches)
    }

    fn step(
        &self,
        root: &EntityDef,
        path: &str,
        earlier: &[JoinStep],
        purpose: JoinPurpose,
        next_alias: &mut impl FnMut(&str) -> String,
    ) -> Result<JoinStep> {
        let (parent, name) = match path.rsplit_once('.') {
            Some((parent, name)) => (parent.to_string(), name),
            None => (String::new(), path),
        };
        let source = if parent.is_empty() {
            root
        } else {
            let parent_step = earlier.iter().find(|j| j.path == parent).ok_or_else(|| {
                Error::InternalPlan {
                    message: format!("join '{}' planned before its parent '{}'", path, parent),
                    statement: String::new(),
                }
            })?;
            self.registry.describe(&parent_step.target)?
        };
        let relation = source
            .get_relation(name)
            .ok_or_else(|| Error::unknown_field(&source.name, name, path))?;

        let prefix = match purpose {
            JoinPurpose::Filter => "f",
            JoinPurpose::Fetch => "j",
        };
        let alias = next_alias(prefix);
        let (_, owning) = self.registry.owning_side(source, relation)?;
        let link_alias = owning.fk_column().is_none().then(|| format!("{}_link", alias));

        Ok(JoinStep {
            path: path.to_string(),
            parent,
            source: source.name.clone(),
            relation: relation.clone(),
            target: relation.target.clone(),
            purpose,
            collection: relation.is_collection(),
            alias,
            link_alias,
        })
    }

    fn check_fetch(&self, root: &EntityDef, fetch: &FetchDirective) -> Result<()> {
        let segments: Vec<&str> = fetch.path.split('.').collect();
        let multi_hop = segments.len() > 1;
        if multi_hop && root.is_abstract() {
            return Err(Error::UnsupportedPolymorphicJoin {
                path: fetch.path.clone(),
                entity: root.name.clone(),
            });
        }

        let mut current = root;
        for (i, segment) in segments.iter().enumerate() {
            let relation = current
                .get_relation(segment)
                .ok_or_else(|| Error::unknown_field(&current.name, *segment, &fetch.path))?;
            let target = self.registry.describe(&relation.target)?;
            if target.is_abstract() && i + 1 < segments.len() {
                return Err(Error::UnsupportedPolymorphicJoin {
                    path: fetch.path.clone(),
                    entity: target.name.clone(),
                });
            }
            current = target;
        }
        Ok(())
    }
}
