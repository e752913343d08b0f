//! Structured query specification types.
//!
//! A [`QuerySpec`] is the explicit form of a derived-query method name: an
//! OR of AND-ed [`Condition`]s over dot-separated field paths, plus ordering,
//! an optional limit and an optional subtype restriction for queries against
//! an inheritance base type.
//!
//! ```
//! use coursedb_proto::{Condition, OrderSpec, QuerySpec};
//!
//! // findAllByFirstNameContainingIgnoreCaseAndAgeBetween("meh", 20, 40)
//! let spec = QuerySpec::new()
//!     .filter(Condition::field("firstName").contains("meh").ignore_case())
//!     .filter(Condition::field("age").between(20, 40))
//!     .order_by(OrderSpec::desc("age"))
//!     .limit(10);
//!
//! assert_eq!(spec.alternatives.len(), 1);
//! assert_eq!(spec.alternatives[0].len(), 2);
//! ```

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Comparison operator of a single condition, carrying its operands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    /// Field equals value.
    Equals(Value),
    /// String field contains the substring.
    Contains(String),
    /// String field starts with the prefix.
    StartsWith(String),
    /// String field ends with the suffix.
    EndsWith(String),
    /// Field is one of the listed values.
    In(Vec<Value>),
    /// Field lies in the inclusive range.
    Between(Value, Value),
    /// Field is strictly greater than value.
    GreaterThan(Value),
    /// Field is strictly less than value.
    LessThan(Value),
    /// Field (or association) is absent.
    IsNull,
    /// Field (or association) is present.
    IsNotNull,
}

impl Operator {
    /// Short operator name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals(_) => "equals",
            Operator::Contains(_) => "contains",
            Operator::StartsWith(_) => "starts-with",
            Operator::EndsWith(_) => "ends-with",
            Operator::In(_) => "in",
            Operator::Between(_, _) => "between",
            Operator::GreaterThan(_) => "greater-than",
            Operator::LessThan(_) => "less-than",
            Operator::IsNull => "is-null",
            Operator::IsNotNull => "is-not-null",
        }
    }

    /// Whether the operator only checks presence.
    pub fn is_null_check(&self) -> bool {
        matches!(self, Operator::IsNull | Operator::IsNotNull)
    }

    /// Whether the operator matches string patterns.
    pub fn is_pattern(&self) -> bool {
        matches!(
            self,
            Operator::Contains(_) | Operator::StartsWith(_) | Operator::EndsWith(_)
        )
    }
}

/// A single clause: field path, operator, case mode and negation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path (e.g. `address.streetName`, `section.course.id`).
    pub path: String,
    /// Operator with operands.
    pub operator: Operator,
    /// Compare strings case-insensitively.
    pub ignore_case: bool,
    /// Negate the whole clause.
    pub negated: bool,
}

impl Condition {
    /// Start a condition on a field path. Defaults to an is-not-null check.
    pub fn field(path: impl Into<String>) -> ConditionBuilder {
        ConditionBuilder { path: path.into() }
    }

    /// Compare strings case-insensitively.
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Negate this condition.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

/// Builder returned by [`Condition::field`]; picking an operator yields the
/// finished [`Condition`].
#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    path: String,
}

impl ConditionBuilder {
    fn with(self, operator: Operator) -> Condition {
        Condition {
            path: self.path,
            operator,
            ignore_case: false,
            negated: false,
        }
    }

    /// Field equals value.
    pub fn eq(self, value: impl Into<Value>) -> Condition {
        self.with(Operator::Equals(value.into()))
    }

    /// String field contains the substring.
    pub fn contains(self, needle: impl Into<String>) -> Condition {
        self.with(Operator::Contains(needle.into()))
    }

    /// String field starts with the prefix.
    pub fn starts_with(self, prefix: impl Into<String>) -> Condition {
        self.with(Operator::StartsWith(prefix.into()))
    }

    /// String field ends with the suffix.
    pub fn ends_with(self, suffix: impl Into<String>) -> Condition {
        self.with(Operator::EndsWith(suffix.into()))
    }

    /// Field is one of the values.
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Condition {
        self.with(Operator::In(values.into_iter().map(Into::into).collect()))
    }

    /// Field lies in the inclusive range `[lower, upper]`.
    pub fn between(self, lower: impl Into<Value>, upper: impl Into<Value>) -> Condition {
        self.with(Operator::Between(lower.into(), upper.into()))
    }

    /// Field is greater than value.
    pub fn gt(self, value: impl Into<Value>) -> Condition {
        self.with(Operator::GreaterThan(value.into()))
    }

    /// Field is less than value.
    pub fn lt(self, value: impl Into<Value>) -> Condition {
        self.with(Operator::LessThan(value.into()))
    }

    /// Field or association is absent.
    pub fn is_null(self) -> Condition {
        self.with(Operator::IsNull)
    }

    /// Field or association is present.
    pub fn is_not_null(self) -> Condition {
        self.with(Operator::IsNotNull)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field path to order by.
    pub path: String,
    /// Sort direction.
    pub direction: OrderDirection,
    /// Order strings case-insensitively.
    pub ignore_case: bool,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: OrderDirection::Asc,
            ignore_case: false,
        }
    }

    /// Create a descending order spec.
    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: OrderDirection::Desc,
            ignore_case: false,
        }
    }

    /// Order strings case-insensitively.
    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

/// A structured query: OR across alternatives, AND within each one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Alternatives combined with OR; conditions inside combine with AND.
    /// An empty list (or a single empty alternative) matches everything.
    pub alternatives: Vec<Vec<Condition>>,
    /// Ordering specification.
    pub order_by: Vec<OrderSpec>,
    /// Maximum number of root entities to return.
    pub limit: Option<usize>,
    /// Restrict a base-type query to these concrete subtypes.
    pub subtypes: Option<Vec<String>>,
}

impl QuerySpec {
    /// Create a specification that matches every entity.
    pub fn new() -> Self {
        Self::default()
    }

    /// AND a condition into the current alternative.
    pub fn filter(mut self, condition: Condition) -> Self {
        match self.alternatives.last_mut() {
            Some(current) => current.push(condition),
            None => self.alternatives.push(vec![condition]),
        }
        self
    }

    /// Start a new OR alternative with the given condition.
    pub fn or(mut self, condition: Condition) -> Self {
        self.alternatives.push(vec![condition]);
        self
    }

    /// Add ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Limit the number of root entities returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Restrict a base-type query to the named concrete subtypes.
    pub fn only_subtypes<S: Into<String>>(mut self, subtypes: impl IntoIterator<Item = S>) -> Self {
        self.subtypes = Some(subtypes.into_iter().map(Into::into).collect());
        self
    }

    /// Check whether the specification has no conditions at all.
    pub fn is_unfiltered(&self) -> bool {
        self.alternatives.iter().all(|alt| alt.is_empty())
    }
}

/// Request to eagerly load an association together with the root entity.
///
/// The `path` uses dot-notation for nested associations:
/// - `"authors"` - load a course's authors
/// - `"sections.lectures"` - load sections and their lectures
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchDirective {
    /// Dot-separated association path.
    pub path: String,
}

impl FetchDirective {
    /// Create a fetch directive for an association path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Get the association name (last segment of the path).
    pub fn relation_name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Get the parent path (all segments except the last).
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Get the depth of this fetch (number of dots + 1).
    pub fn depth(&self) -> usize {
        self.path.matches('.').count() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_and_within_alternative_or_across() {
        let spec = QuerySpec::new()
            .filter(Condition::field("firstName").eq("Mehul"))
            .filter(Condition::field("age").gt(30))
            .or(Condition::field("email").ends_with("@example.com").ignore_case());

        assert_eq!(spec.alternatives.len(), 2);
        assert_eq!(spec.alternatives[0].len(), 2);
        assert_eq!(spec.alternatives[1].len(), 1);
        assert!(spec.alternatives[1][0].ignore_case);
        assert!(!spec.is_unfiltered());
    }

    #[test]
    fn test_condition_flags() {
        let cond = Condition::field("name").contains("rust").ignore_case().not();
        assert_eq!(cond.path, "name");
        assert_eq!(cond.operator, Operator::Contains("rust".into()));
        assert!(cond.ignore_case);
        assert!(cond.negated);
        assert!(cond.operator.is_pattern());

        let cond = Condition::field("lecture").is_null();
        assert!(cond.operator.is_null_check());
        assert_eq!(cond.operator.name(), "is-null");
    }

    #[test]
    fn test_in_collects_values() {
        let cond = Condition::field("type").is_in(["pdf", "zip"]);
        assert_eq!(
            cond.operator,
            Operator::In(vec![Value::from("pdf"), Value::from("zip")])
        );
    }

    #[test]
    fn test_fetch_directive_helpers() {
        let fetch = FetchDirective::new("sections.lectures");
        assert_eq!(fetch.relation_name(), "lectures");
        assert_eq!(fetch.parent_path(), Some("sections"));
        assert_eq!(fetch.depth(), 2);

        let top = FetchDirective::new("authors");
        assert_eq!(top.parent_path(), None);
        assert_eq!(top.depth(), 1);
    }

    #[test]
    fn test_spec_serializes_as_json() {
        let spec = QuerySpec::new()
            .filter(Condition::field("id.username").eq("mehul"))
            .order_by(OrderSpec::desc("id.orderDate"))
            .only_subtypes(["Text"]);

        let json = serde_json::to_string(&spec).unwrap();
        let back: QuerySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }
}
