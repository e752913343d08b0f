//! Predicate compiler: structured query specifications to typed predicates.
//!
//! The compiler resolves every field path against the registry, checks
//! operands against the declared field types and normalizes case-insensitive
//! operands. Everything it rejects is rejected before storage is touched.

use std::collections::BTreeSet;

use coursedb_proto::{Condition, Operator, OrderDirection, OrderSpec, QuerySpec, Value};

use crate::catalog::{EntityDef, Registry, ScalarType};
use crate::error::{Error, Result};

/// Where a resolved path ends.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    /// A scalar column.
    Scalar {
        column: String,
        scalar: ScalarType,
    },
    /// An embedded object or association: present unless every listed
    /// column is null.
    Presence { columns: Vec<String> },
}

/// A field path resolved against the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Path as written by the caller.
    pub path: String,
    /// Relation path whose table holds the terminal columns (`""` = root).
    pub owner_path: String,
    /// Entity kind owning the terminal columns (may be an abstract base).
    pub owner_kind: String,
    /// Terminal columns.
    pub terminal: Terminal,
    /// Whether any hop yields a collection.
    pub crosses_collection: bool,
}

impl ResolvedPath {
    /// Every relation path that must be joined, parent first.
    pub fn join_prefixes(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.owner_path.is_empty() {
            return out;
        }
        let mut prefix = String::new();
        for segment in self.owner_path.split('.') {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(segment);
            out.push(prefix.clone());
        }
        out
    }
}

/// One compiled comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Resolved field path.
    pub path: ResolvedPath,
    /// Operator with validated (and, for ignore-case, lowercased) operands.
    pub op: Operator,
    /// Compare the lowercased column.
    pub ignore_case: bool,
    /// Negate the comparison.
    pub negated: bool,
}

/// Typed predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Compare(Comparison),
}

/// A resolved sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub path: ResolvedPath,
    pub direction: OrderDirection,
    pub ignore_case: bool,
}

/// Output of the compiler.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Root entity kind (may be an abstract base).
    pub entity: String,
    /// Filter; `None` matches every row.
    pub predicate: Option<Predicate>,
    /// Ordering.
    pub order_by: Vec<SortKey>,
    /// Maximum number of root entities.
    pub limit: Option<usize>,
    /// Concrete subtypes a base-type query is restricted to.
    pub subtypes: Option<Vec<String>>,
    /// Relation paths traversed by filters and ordering.
    pub traversed: BTreeSet<String>,
}

/// Compiles [`QuerySpec`]s against a registry.
pub struct QueryCompiler<'a> {
    registry: &'a Registry,
}

impl<'a> QueryCompiler<'a> {
    /// Create a compiler over a registry.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Compile a specification for the entity kind.
    pub fn compile(&self, kind: &str, spec: &QuerySpec) -> Result<CompiledQuery> {
        let root = self.registry.describe(kind)?;
        let mut traversed = BTreeSet::new();

        let mut alternatives = Vec::new();
        for alternative in spec.alternatives.iter().filter(|alt| !alt.is_empty()) {
            let mut clauses = Vec::with_capacity(alternative.len());
            for condition in alternative {
                let comparison = self.compile_condition(root, condition)?;
                traversed.extend(comparison.path.join_prefixes());
                clauses.push(Predicate::Compare(comparison));
            }
            alternatives.push(if clauses.len() == 1 {
                clauses.remove(0)
            } else {
                Predicate::And(clauses)
            });
        }
        let predicate = match alternatives.len() {
            0 => None,
            1 => alternatives.pop(),
            _ => Some(Predicate::Or(alternatives)),
        };

        let mut order_by = Vec::with_capacity(spec.order_by.len());
        for order in &spec.order_by {
            let key = self.compile_order(root, order)?;
            traversed.extend(key.path.join_prefixes());
            order_by.push(key);
        }

        let subtypes = match &spec.subtypes {
            Some(names) => Some(self.check_subtypes(root, names)?),
            None => None,
        };

        Ok(CompiledQuery {
            entity: root.name.clone(),
            predicate,
            order_by,
            limit: spec.limit,
            subtypes,
            traversed,
        })
    }

    /// Resolve a dot-separated path starting at `root`.
    pub fn resolve_path(&self, root: &EntityDef, path: &str) -> Result<ResolvedPath> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut current = root;
        let mut owner_path = String::new();
        let mut crosses_collection = false;

        let mut i = 0;
        while i < segments.len() {
            let segment = segments[i];
            let last = i + 1 == segments.len();

            if let Some(field) = current.get_field(segment) {
                if !last {
                    return Err(Error::unknown_field(&current.name, segments[i + 1], path));
                }
                return Ok(ResolvedPath {
                    path: path.to_string(),
                    owner_path,
                    owner_kind: current.name.clone(),
                    terminal: Terminal::Scalar {
                        column: field.column.clone(),
                        scalar: field.scalar,
                    },
                    crosses_collection,
                });
            }

            if let Some(embedded) = current.get_embedded(segment) {
                let terminal = if last {
                    Terminal::Presence {
                        columns: embedded.fields.iter().map(|f| f.column.clone()).collect(),
                    }
                } else {
                    let component = segments[i + 1];
                    let field = embedded
                        .get_field(component)
                        .filter(|_| i + 2 == segments.len())
                        .ok_or_else(|| {
                            let bad = if embedded.get_field(component).is_some() {
                                segments[i + 2]
                            } else {
                                component
                            };
                            Error::unknown_field(&current.name, bad, path)
                        })?;
                    Terminal::Scalar {
                        column: field.column.clone(),
                        scalar: field.scalar,
                    }
                };
                return Ok(ResolvedPath {
                    path: path.to_string(),
                    owner_path,
                    owner_kind: current.name.clone(),
                    terminal,
                    crosses_collection,
                });
            }

            if let Some(relation) = current.get_relation(segment) {
                let target = self.registry.describe(&relation.target)?;

                if last {
                    // An owning foreign key answers presence on its own row;
                    // everything else needs the target joined.
                    if let Some(column) = relation.fk_column() {
                        return Ok(ResolvedPath {
                            path: path.to_string(),
                            owner_path,
                            owner_kind: current.name.clone(),
                            terminal: Terminal::Presence {
                                columns: vec![column.to_string()],
                            },
                            crosses_collection,
                        });
                    }
                    push_segment(&mut owner_path, segment);
                    return Ok(ResolvedPath {
                        path: path.to_string(),
                        owner_path,
                        owner_kind: target.name.clone(),
                        terminal: Terminal::Presence {
                            columns: target
                                .identity_columns()
                                .into_iter()
                                .map(String::from)
                                .collect(),
                        },
                        crosses_collection: crosses_collection || relation.is_collection(),
                    });
                }

                push_segment(&mut owner_path, segment);
                crosses_collection |= relation.is_collection();
                current = target;
                i += 1;
                continue;
            }

            return Err(Error::unknown_field(&current.name, segment, path));
        }

        Err(Error::unknown_field(&current.name, "", path))
    }

    fn compile_condition(&self, root: &EntityDef, condition: &Condition) -> Result<Comparison> {
        let path = self.resolve_path(root, &condition.path)?;
        let p = &condition.path;

        let scalar = match &path.terminal {
            Terminal::Presence { .. } => {
                if !condition.operator.is_null_check() {
                    return Err(Error::invalid_operand(
                        p,
                        format!(
                            "'{}' names an association or embedded object; only is-null and is-not-null apply",
                            p
                        ),
                    ));
                }
                if condition.ignore_case {
                    return Err(Error::invalid_operand(p, "ignore-case needs a string field"));
                }
                return Ok(Comparison {
                    path,
                    op: condition.operator.clone(),
                    ignore_case: false,
                    negated: condition.negated,
                });
            }
            Terminal::Scalar { scalar, .. } => *scalar,
        };

        if condition.ignore_case && !scalar.is_string() {
            return Err(Error::invalid_operand(p, "ignore-case needs a string field"));
        }

        let fold = |v: &Value| -> Value {
            if condition.ignore_case {
                v.to_lowercase()
            } else {
                v.clone()
            }
        };
        let fold_str = |s: &str| -> String {
            if condition.ignore_case {
                s.to_lowercase()
            } else {
                s.to_string()
            }
        };

        let op = match &condition.operator {
            Operator::Equals(Value::Null) => Operator::IsNull,
            Operator::Equals(v) => {
                check_operand(p, scalar, v)?;
                Operator::Equals(fold(v))
            }
            Operator::Contains(s) => {
                require_string(p, scalar, "contains")?;
                Operator::Contains(fold_str(s))
            }
            Operator::StartsWith(s) => {
                require_string(p, scalar, "starts-with")?;
                Operator::StartsWith(fold_str(s))
            }
            Operator::EndsWith(s) => {
                require_string(p, scalar, "ends-with")?;
                Operator::EndsWith(fold_str(s))
            }
            Operator::In(values) => {
                for v in values {
                    if v.is_null() {
                        return Err(Error::invalid_operand(p, "in does not accept null values"));
                    }
                    check_operand(p, scalar, v)?;
                }
                Operator::In(values.iter().map(fold).collect())
            }
            Operator::Between(lower, upper) => {
                require_ordered(p, scalar, "between")?;
                for v in [lower, upper] {
                    if v.is_null() {
                        return Err(Error::invalid_operand(p, "between needs two bounds"));
                    }
                    check_operand(p, scalar, v)?;
                }
                let (lower, upper) = (fold(lower), fold(upper));
                if lower.compare(&upper) == Some(std::cmp::Ordering::Greater) {
                    return Err(Error::InvalidRange { path: p.clone() });
                }
                Operator::Between(lower, upper)
            }
            Operator::GreaterThan(v) => {
                require_ordered(p, scalar, "greater-than")?;
                require_non_null(p, v)?;
                check_operand(p, scalar, v)?;
                Operator::GreaterThan(fold(v))
            }
            Operator::LessThan(v) => {
                require_ordered(p, scalar, "less-than")?;
                require_non_null(p, v)?;
                check_operand(p, scalar, v)?;
                Operator::LessThan(fold(v))
            }
            Operator::IsNull => Operator::IsNull,
            Operator::IsNotNull => Operator::IsNotNull,
        };

        // Null checks ignore case folding.
        let ignore_case = condition.ignore_case && !op.is_null_check();

        Ok(Comparison {
            path,
            op,
            ignore_case,
            negated: condition.negated,
        })
    }

    fn compile_order(&self, root: &EntityDef, order: &OrderSpec) -> Result<SortKey> {
        let path = self.resolve_path(root, &order.path)?;
        let scalar = match &path.terminal {
            Terminal::Scalar { scalar, .. } => *scalar,
            Terminal::Presence { .. } => {
                return Err(Error::invalid_operand(
                    &order.path,
                    "ordering needs a scalar field",
                ))
            }
        };
        if path.crosses_collection {
            return Err(Error::invalid_operand(
                &order.path,
                "ordering cannot follow a collection association",
            ));
        }
        if order.ignore_case && !scalar.is_string() {
            return Err(Error::invalid_operand(&order.path, "ignore-case needs a string field"));
        }
        Ok(SortKey {
            path,
            direction: order.direction,
            ignore_case: order.ignore_case,
        })
    }

    fn check_subtypes(&self, root: &EntityDef, names: &[String]) -> Result<Vec<String>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let subtype = self.registry.describe(name)?;
            if subtype.is_abstract() || !self.registry.is_a(&subtype.name, &root.name) {
                return Err(Error::invalid_operand(
                    "type",
                    format!("'{}' is not a concrete subtype of '{}'", name, root.name),
                ));
            }
            if !out.contains(&subtype.name) {
                out.push(subtype.name.clone());
            }
        }
        Ok(out)
    }
}

fn push_segment(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
}

fn check_operand(path: &str, scalar: ScalarType, value: &Value) -> Result<()> {
    if scalar.accepts(value) {
        Ok(())
    } else {
        Err(Error::invalid_operand(
            path,
            format!("{} operand for a {:?} field", value.type_name(), scalar),
        ))
    }
}

fn require_string(path: &str, scalar: ScalarType, op: &str) -> Result<()> {
    if scalar.is_string() {
        Ok(())
    } else {
        Err(Error::invalid_operand(
            path,
            format!("{} needs a string field, found {:?}", op, scalar),
        ))
    }
}

fn require_ordered(path: &str, scalar: ScalarType, op: &str) -> Result<()> {
    if scalar.is_ordered() {
        Ok(())
    } else {
        Err(Error::invalid_operand(
            path,
            format!("{} needs an ordered field, found {:?}", op, scalar),
        ))
    }
}

fn require_non_null(path: &str, value: &Value) -> Result<()> {
    if value.is_null() {
        Err(Error::invalid_operand(path, "comparison with null; use is-null"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use coursedb_proto::Condition;

    fn compile(kind: &str, spec: QuerySpec) -> Result<CompiledQuery> {
        let registry = schema::course_catalog().unwrap();
        QueryCompiler::new(&registry).compile(kind, &spec)
    }

    fn single(query: &CompiledQuery) -> &Comparison {
        match &query.predicate {
            Some(Predicate::Compare(c)) => c,
            other => panic!("expected a single comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_relationship_path_is_traversed() {
        let query = compile(
            "Resources",
            QuerySpec::new().filter(Condition::field("lecture.section.course.id").eq(1i64)),
        )
        .unwrap();

        let cmp = single(&query);
        assert_eq!(cmp.path.owner_path, "lecture.section.course");
        assert_eq!(cmp.path.owner_kind, "Course");
        let traversed: Vec<&str> = query.traversed.iter().map(String::as_str).collect();
        assert_eq!(traversed, vec!["lecture", "lecture.section", "lecture.section.course"]);
    }

    #[test]
    fn test_unknown_segment_is_named() {
        let err = compile(
            "Lecture",
            QuerySpec::new().filter(Condition::field("section.cuorse.id").eq(1i64)),
        )
        .unwrap_err();

        match err {
            Error::UnknownField {
                entity, segment, ..
            } => {
                assert_eq!(entity, "Section");
                assert_eq!(segment, "cuorse");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_scalar_cannot_be_traversed() {
        let err = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("email.domain").eq("x")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownField { segment, .. } if segment == "domain"));
    }

    #[test]
    fn test_ignore_case_lowercases_operand() {
        let query = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("firstName").contains("MEH").ignore_case()),
        )
        .unwrap();

        let cmp = single(&query);
        assert!(cmp.ignore_case);
        assert_eq!(cmp.op, Operator::Contains("meh".into()));
    }

    #[test]
    fn test_between_rejects_inverted_range() {
        let err = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("age").between(40, 20)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidRange { path } if path == "age"));
    }

    #[test]
    fn test_operand_type_mismatch() {
        let err = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("age").contains("3")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));

        let err = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("age").eq("thirty")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));

        let err = compile(
            "Author",
            QuerySpec::new().filter(Condition::field("age").eq(30).ignore_case()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));
    }

    #[test]
    fn test_relation_terminal_only_for_null_checks() {
        let query = compile(
            "Lecture",
            QuerySpec::new().filter(Condition::field("resources").is_null()),
        )
        .unwrap();
        let cmp = single(&query);
        assert_eq!(cmp.path.owner_path, "");
        assert_eq!(
            cmp.path.terminal,
            Terminal::Presence {
                columns: vec!["resources_id".into()]
            }
        );

        let err = compile(
            "Lecture",
            QuerySpec::new().filter(Condition::field("resources").eq(1i64)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));
    }

    #[test]
    fn test_inverse_relation_presence_joins_target() {
        let query = compile(
            "Resources",
            QuerySpec::new().filter(Condition::field("lecture").is_null()),
        )
        .unwrap();
        let cmp = single(&query);
        assert_eq!(cmp.path.owner_path, "lecture");
        assert!(query.traversed.contains("lecture"));
    }

    #[test]
    fn test_embedded_paths() {
        let query = compile(
            "Order",
            QuerySpec::new()
                .filter(Condition::field("address").is_not_null())
                .filter(Condition::field("id.username").eq("mehul")),
        )
        .unwrap();

        match &query.predicate {
            Some(Predicate::And(clauses)) => assert_eq!(clauses.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(query.traversed.is_empty());
    }

    #[test]
    fn test_or_of_ands() {
        let query = compile(
            "Author",
            QuerySpec::new()
                .filter(Condition::field("firstName").eq("A"))
                .filter(Condition::field("age").gt(3))
                .or(Condition::field("email").ends_with("@x.org")),
        )
        .unwrap();

        match &query.predicate {
            Some(Predicate::Or(alts)) => {
                assert_eq!(alts.len(), 2);
                assert!(matches!(&alts[0], Predicate::And(c) if c.len() == 2));
                assert!(matches!(&alts[1], Predicate::Compare(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_equals_null_becomes_is_null() {
        let query = compile(
            "Text",
            QuerySpec::new().filter(Condition::field("content").eq(Value::Null)),
        )
        .unwrap();
        assert_eq!(single(&query).op, Operator::IsNull);
    }

    #[test]
    fn test_unfiltered_spec_has_no_predicate() {
        let query = compile("Course", QuerySpec::new().limit(3)).unwrap();
        assert!(query.predicate.is_none());
        assert_eq!(query.limit, Some(3));
    }

    #[test]
    fn test_subtype_restriction() {
        let query = compile("Resources", QuerySpec::new().only_subtypes(["Text", "Text"])).unwrap();
        assert_eq!(query.subtypes, Some(vec!["Text".to_string()]));

        let err = compile("Resources", QuerySpec::new().only_subtypes(["Podcast"])).unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(name) if name == "Podcast"));

        let err = compile("Resources", QuerySpec::new().only_subtypes(["Course"])).unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));
    }

    #[test]
    fn test_order_rejects_collection_path() {
        let err = compile(
            "Course",
            QuerySpec::new().order_by(OrderSpec::asc("sections.name")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidOperand { .. }));

        let query = compile(
            "Lecture",
            QuerySpec::new().order_by(OrderSpec::desc("section.sectionOrder")),
        )
        .unwrap();
        assert!(query.traversed.contains("section"));
    }

    #[test]
    fn test_unknown_entity() {
        let err = compile("Podcast", QuerySpec::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(_)));
    }
}
