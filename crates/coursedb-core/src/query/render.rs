//! Statement rendering for join plans.
//!
//! Every plan branch becomes one `SELECT` over `LEFT JOIN`s with positional
//! `?` parameters. The [`RowLayout`] returned alongside tells the assembler
//! which result column holds which identity, field and reference.

use coursedb_proto::{Operator, OrderDirection, Value};
use tracing::error;

use crate::catalog::{EntityDef, JoinRepr, Registry};
use crate::error::{Error, Result};
use crate::storage::{quote, Statement};

use super::compiler::{CompiledQuery, Comparison, Predicate, Terminal};
use super::resolver::{Branch, JoinPlan, JoinStep};

/// Alias of the root table in every statement.
pub const ROOT_ALIAS: &str = "t0";

/// Column carrying the concrete subtype in polymorphic derived tables.
pub const SUBTYPE_COLUMN: &str = "__subtype";

/// Accumulates SQL text and its positional parameters.
#[derive(Debug, Default)]
pub struct SqlWriter {
    sql: String,
    params: Vec<Value>,
}

impl SqlWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Append a placeholder bound to `value`.
    pub fn param(&mut self, value: Value) -> &mut Self {
        self.sql.push('?');
        self.params.push(value);
        self
    }

    /// SQL rendered so far.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Finish into a statement.
    pub fn finish(self) -> Statement {
        Statement::new(self.sql, self.params)
    }
}

/// A reference (foreign key) slot in a result row.
#[derive(Debug, Clone, PartialEq)]
pub struct RefSlot {
    /// Owning relation name.
    pub relation: String,
    /// Declared target kind (may be abstract).
    pub target: String,
    /// Foreign key column index.
    pub column: usize,
    /// Discriminator column index, for polymorphic targets.
    pub discriminator: Option<usize>,
}

/// Where one entity's columns sit in a result row.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLayout {
    /// Static kind; abstract for polymorphic derived tables.
    pub kind: String,
    /// Column holding the concrete subtype, for polymorphic derived tables.
    pub subtype_column: Option<usize>,
    /// Identity column indexes in key order.
    pub identity: Vec<usize>,
    /// Field paths and their column indexes.
    pub fields: Vec<(String, usize)>,
    /// Reference slots.
    pub refs: Vec<RefSlot>,
}

/// Where one fetched association sits in a result row.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchLayout {
    /// Relation path from the root.
    pub path: String,
    /// Parent relation path (`""` = root).
    pub parent: String,
    /// Relation name on the parent.
    pub relation: String,
    /// Whether the relation is a collection.
    pub collection: bool,
    /// Target columns.
    pub node: NodeLayout,
}

/// Column layout of a rendered statement.
#[derive(Debug, Clone, PartialEq)]
pub struct RowLayout {
    pub root: NodeLayout,
    pub fetches: Vec<FetchLayout>,
    /// Sort key column indexes, in ordering priority.
    pub sort_keys: Vec<usize>,
}

/// A statement for one branch plus its row layout.
#[derive(Debug, Clone)]
pub struct RenderedQuery {
    pub branch: Branch,
    pub statement: Statement,
    pub layout: RowLayout,
}

/// Renders join plans into statements.
pub struct SqlRenderer<'a> {
    registry: &'a Registry,
}

impl<'a> SqlRenderer<'a> {
    /// Create a renderer over a registry.
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Render the `SELECT` for one branch.
    pub fn select(
        &self,
        query: &CompiledQuery,
        plan: &JoinPlan,
        branch: &Branch,
    ) -> Result<RenderedQuery> {
        let root = self.registry.describe(&branch.kind)?;
        let mut items: Vec<String> = Vec::new();

        let root_layout = node_layout(root, ROOT_ALIAS, &mut items);
        let mut fetches = Vec::with_capacity(plan.fetch_joins.len());
        for step in &plan.fetch_joins {
            let target = self.registry.describe(&step.target)?;
            let layout = if target.is_abstract() {
                let columns = self.union_columns(target)?;
                let subtype_column = items.len();
                items.push(format!("{}.{}", step.alias, quote(SUBTYPE_COLUMN)));
                union_layout(target, &step.alias, &columns, subtype_column, &mut items, self.registry)?
            } else {
                node_layout(target, &step.alias, &mut items)
            };
            fetches.push(FetchLayout {
                path: step.path.clone(),
                parent: step.parent.clone(),
                relation: step.relation.name.clone(),
                collection: step.collection,
                node: layout,
            });
        }

        let mut sort_keys = Vec::with_capacity(query.order_by.len());
        let mut order_exprs = Vec::with_capacity(query.order_by.len());
        for key in &query.order_by {
            let partial = || format!("SELECT {}", items.join(", "));
            let Terminal::Scalar { column, .. } = &key.path.terminal else {
                return Err(plan_failure(
                    branch,
                    &partial(),
                    internal(format!("sort key '{}' is not a scalar column", key.path.path)),
                ));
            };
            let alias = filter_alias(plan, &key.path.owner_path)
                .map_err(|err| plan_failure(branch, &partial(), err))?;
            let mut expr = format!("{}.{}", alias, quote(column));
            if key.ignore_case {
                expr = format!("LOWER({})", expr);
            }
            sort_keys.push(items.len());
            items.push(expr.clone());
            order_exprs.push(match key.direction {
                OrderDirection::Asc => format!("{} ASC", expr),
                OrderDirection::Desc => format!("{} DESC", expr),
            });
        }

        let mut w = SqlWriter::new();
        w.push("SELECT ").push(&items.join(", "));
        if let Err(err) = self.write_body(&mut w, query, plan, branch, true) {
            return Err(plan_failure(branch, w.sql(), err));
        }
        if !order_exprs.is_empty() {
            w.push(" ORDER BY ").push(&order_exprs.join(", "));
        }
        if let Some(limit) = query.limit {
            if !plan.fans_out() {
                w.push(" LIMIT ").param(Value::Int64(limit as i64));
            }
        }

        Ok(RenderedQuery {
            branch: branch.clone(),
            statement: w.finish(),
            layout: RowLayout {
                root: root_layout,
                fetches,
                sort_keys,
            },
        })
    }

    /// Render a statement counting distinct root identities for one branch.
    pub fn count(&self, query: &CompiledQuery, plan: &JoinPlan, branch: &Branch) -> Result<Statement> {
        let key: Vec<String> = plan
            .dedup_key
            .iter()
            .map(|c| format!("{}.{}", ROOT_ALIAS, quote(c)))
            .collect();

        let mut w = SqlWriter::new();
        w.push("SELECT COUNT(*) FROM (SELECT DISTINCT ")
            .push(&key.join(", "));
        if let Err(err) = self.write_body(&mut w, query, plan, branch, false) {
            return Err(plan_failure(branch, w.sql(), err));
        }
        w.push(")");
        Ok(w.finish())
    }

    /// `FROM`, joins and `WHERE`.
    fn write_body(
        &self,
        w: &mut SqlWriter,
        query: &CompiledQuery,
        plan: &JoinPlan,
        branch: &Branch,
        with_fetches: bool,
    ) -> Result<()> {
        self.from_clause(w, plan, branch, with_fetches)?;
        if let Some(predicate) = &query.predicate {
            w.push(" WHERE ");
            render_predicate(w, plan, predicate)?;
        }
        Ok(())
    }

    fn from_clause(
        &self,
        w: &mut SqlWriter,
        plan: &JoinPlan,
        branch: &Branch,
        with_fetches: bool,
    ) -> Result<()> {
        let root = self.registry.describe(&branch.kind)?;
        let table = root
            .table
            .as_deref()
            .ok_or_else(|| Error::AbstractEntity(root.name.clone()))?;
        w.push(" FROM ").push(&quote(table)).push(" ").push(ROOT_ALIAS);

        let fetch_joins: &[JoinStep] = if with_fetches { &plan.fetch_joins } else { &[] };
        for (steps, all) in [(&plan.filter_joins[..], &plan.filter_joins), (fetch_joins, &plan.fetch_joins)] {
            for step in steps {
                let (parent_alias, parent_kind) = if step.parent.is_empty() {
                    (ROOT_ALIAS.to_string(), Some(branch.kind.clone()))
                } else {
                    let parent = all
                        .iter()
                        .find(|j| j.path == step.parent)
                        .ok_or_else(|| internal(format!("missing parent join for '{}'", step.path)))?;
                    let target = self.registry.describe(&parent.target)?;
                    let kind = (!target.is_abstract()).then(|| target.name.clone());
                    (parent.alias.clone(), kind)
                };
                self.join(w, step, &parent_alias, parent_kind.as_deref())?;
            }
        }
        Ok(())
    }

    /// Render one `LEFT JOIN`. `parent_kind` is the concrete parent kind, or
    /// `None` when the parent is a polymorphic derived table.
    fn join(
        &self,
        w: &mut SqlWriter,
        step: &JoinStep,
        parent_alias: &str,
        parent_kind: Option<&str>,
    ) -> Result<()> {
        let source = self.registry.describe(&step.source)?;
        let target = self.registry.describe(&step.target)?;
        let source_id = simple_id(source)?;
        let target_id = simple_id(target)?;
        let child = &step.alias;

        match &step.relation.join {
            JoinRepr::ForeignKey {
                column,
                discriminator,
            } => {
                w.push(" LEFT JOIN ");
                self.table_ref(w, target)?;
                w.push(&format!(
                    " {} ON {}.{} = {}.{}",
                    child,
                    child,
                    quote(target_id),
                    parent_alias,
                    quote(column)
                ));
                if let Some(discriminator) = discriminator {
                    if target.is_abstract() {
                        w.push(&format!(
                            " AND {}.{} = {}.{}",
                            child,
                            quote(SUBTYPE_COLUMN),
                            parent_alias,
                            quote(discriminator)
                        ));
                    } else {
                        w.push(&format!(" AND {}.{} = ", parent_alias, quote(discriminator)))
                            .param(Value::from(target.name.as_str()));
                    }
                }
            }
            JoinRepr::JoinTable {
                table,
                owner_column,
                target_column,
            } => {
                let link = link_alias(step)?;
                w.push(&format!(
                    " LEFT JOIN {} {} ON {}.{} = {}.{} LEFT JOIN ",
                    quote(table),
                    link,
                    link,
                    quote(owner_column),
                    parent_alias,
                    quote(source_id)
                ));
                self.table_ref(w, target)?;
                w.push(&format!(
                    " {} ON {}.{} = {}.{}",
                    child,
                    child,
                    quote(target_id),
                    link,
                    quote(target_column)
                ));
            }
            JoinRepr::MappedBy(_) => {
                let (_, owning) = self.registry.owning_side(source, &step.relation)?;
                match &owning.join {
                    JoinRepr::ForeignKey {
                        column,
                        discriminator,
                    } => {
                        w.push(" LEFT JOIN ");
                        self.table_ref(w, target)?;
                        w.push(&format!(
                            " {} ON {}.{} = {}.{}",
                            child,
                            child,
                            quote(column),
                            parent_alias,
                            quote(source_id)
                        ));
                        if let Some(discriminator) = discriminator {
                            w.push(&format!(" AND {}.{} = ", child, quote(discriminator)));
                            match parent_kind {
                                Some(kind) => {
                                    w.param(Value::from(kind));
                                }
                                None => {
                                    w.push(&format!("{}.{}", parent_alias, quote(SUBTYPE_COLUMN)));
                                }
                            }
                        }
                    }
                    JoinRepr::JoinTable {
                        table,
                        owner_column,
                        target_column,
                    } => {
                        let link = link_alias(step)?;
                        w.push(&format!(
                            " LEFT JOIN {} {} ON {}.{} = {}.{} LEFT JOIN ",
                            quote(table),
                            link,
                            link,
                            quote(target_column),
                            parent_alias,
                            quote(source_id)
                        ));
                        self.table_ref(w, target)?;
                        w.push(&format!(
                            " {} ON {}.{} = {}.{}",
                            child,
                            child,
                            quote(target_id),
                            link,
                            quote(owner_column)
                        ));
                    }
                    JoinRepr::MappedBy(_) => {
                        return Err(internal(format!(
                            "'{}' resolves to another inverse side",
                            step.path
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    /// Render a table reference: the table itself, or a `UNION ALL` derived
    /// table over the subtypes of an abstract base.
    fn table_ref(&self, w: &mut SqlWriter, entity: &EntityDef) -> Result<()> {
        if let Some(table) = &entity.table {
            w.push(&quote(table));
            return Ok(());
        }
        let columns = self.union_columns(entity)?;
        w.push("(");
        for (i, subtype) in entity.subtypes().iter().enumerate() {
            let concrete = self.registry.describe(subtype)?;
            let own = table_columns(concrete);
            let table = concrete
                .table
                .as_deref()
                .ok_or_else(|| internal(format!("subtype '{}' has no table", subtype)))?;
            if i > 0 {
                w.push(" UNION ALL ");
            }
            w.push("SELECT ")
                .param(Value::from(concrete.name.as_str()))
                .push(" AS ")
                .push(&quote(SUBTYPE_COLUMN));
            for column in &columns {
                if own.contains(column) {
                    w.push(", ").push(&quote(column));
                } else {
                    w.push(", NULL AS ").push(&quote(column));
                }
            }
            w.push(" FROM ").push(&quote(table));
        }
        w.push(")");
        Ok(())
    }

    fn union_columns(&self, base: &EntityDef) -> Result<Vec<String>> {
        let mut columns: Vec<String> = Vec::new();
        for subtype in base.subtypes() {
            for column in table_columns(self.registry.describe(subtype)?) {
                if !columns.contains(&column) {
                    columns.push(column);
                }
            }
        }
        Ok(columns)
    }
}

/// Stored columns of a concrete entity: scalars, then reference columns.
fn table_columns(entity: &EntityDef) -> Vec<String> {
    let mut columns: Vec<String> = entity
        .scalar_paths()
        .into_iter()
        .map(|(_, f)| f.column.clone())
        .collect();
    for relation in entity.foreign_keys() {
        if let Some(discriminator) = relation.discriminator() {
            columns.push(discriminator.to_string());
        }
        if let Some(column) = relation.fk_column() {
            columns.push(column.to_string());
        }
    }
    columns
}

/// Select every stored column of a concrete entity and record positions.
fn node_layout(entity: &EntityDef, alias: &str, items: &mut Vec<String>) -> NodeLayout {
    let start = items.len();
    let columns = table_columns(entity);
    items.extend(columns.iter().map(|c| format!("{}.{}", alias, quote(c))));
    let index = |column: &str| columns.iter().position(|c| c == column).map(|i| start + i);
    layout_from(entity, None, &index)
}

/// Select the union columns of a polymorphic derived table.
fn union_layout(
    base: &EntityDef,
    alias: &str,
    columns: &[String],
    subtype_column: usize,
    items: &mut Vec<String>,
    registry: &Registry,
) -> Result<NodeLayout> {
    let start = items.len();
    items.extend(columns.iter().map(|c| format!("{}.{}", alias, quote(c))));
    let index = |column: &str| columns.iter().position(|c| c == column).map(|i| start + i);

    let mut layout = layout_from(base, Some(subtype_column), &index);
    // Subtype-specific fields are read only for rows of that subtype.
    for subtype in base.subtypes() {
        let concrete = registry.describe(subtype)?;
        for (path, field) in concrete.scalar_paths() {
            if layout.fields.iter().all(|(p, _)| *p != path) {
                if let Some(i) = index(&field.column) {
                    layout.fields.push((path, i));
                }
            }
        }
    }
    Ok(layout)
}

fn layout_from(
    entity: &EntityDef,
    subtype_column: Option<usize>,
    index: &dyn Fn(&str) -> Option<usize>,
) -> NodeLayout {
    let identity = entity
        .identity_columns()
        .into_iter()
        .filter_map(index)
        .collect();
    let fields = entity
        .scalar_paths()
        .into_iter()
        .filter_map(|(path, f)| index(&f.column).map(|i| (path, i)))
        .collect();
    let refs = entity
        .foreign_keys()
        .filter_map(|r| {
            let column = index(r.fk_column()?)?;
            Some(RefSlot {
                relation: r.name.clone(),
                target: r.target.clone(),
                column,
                discriminator: r.discriminator().and_then(index),
            })
        })
        .collect();
    NodeLayout {
        kind: entity.name.clone(),
        subtype_column,
        identity,
        fields,
        refs,
    }
}

fn render_predicate(w: &mut SqlWriter, plan: &JoinPlan, predicate: &Predicate) -> Result<()> {
    match predicate {
        Predicate::And(parts) | Predicate::Or(parts) => {
            let joiner = if matches!(predicate, Predicate::And(_)) {
                " AND "
            } else {
                " OR "
            };
            w.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    w.push(joiner);
                }
                render_predicate(w, plan, part)?;
            }
            w.push(")");
            Ok(())
        }
        Predicate::Compare(comparison) => render_comparison(w, plan, comparison),
    }
}

fn render_comparison(w: &mut SqlWriter, plan: &JoinPlan, cmp: &Comparison) -> Result<()> {
    let alias = filter_alias(plan, &cmp.path.owner_path)?;
    if cmp.negated {
        w.push("NOT (");
    }

    match &cmp.path.terminal {
        Terminal::Presence { columns } => {
            let all_null: Vec<String> = columns
                .iter()
                .map(|c| format!("{}.{} IS NULL", alias, quote(c)))
                .collect();
            let all_null = if all_null.len() == 1 {
                all_null.join("")
            } else {
                format!("({})", all_null.join(" AND "))
            };
            match cmp.op {
                Operator::IsNull => w.push(&all_null),
                _ => w.push("NOT ").push(&all_null),
            };
        }
        Terminal::Scalar { column, .. } => {
            let mut expr = format!("{}.{}", alias, quote(column));
            if cmp.ignore_case {
                expr = format!("LOWER({})", expr);
            }
            match &cmp.op {
                Operator::Equals(v) => {
                    w.push(&expr).push(" = ").param(v.clone());
                }
                Operator::Contains(s) => {
                    w.push(&expr)
                        .push(" LIKE ")
                        .param(Value::String(format!("%{}%", escape_like(s))))
                        .push(" ESCAPE '\\'");
                }
                Operator::StartsWith(s) => {
                    w.push(&expr)
                        .push(" LIKE ")
                        .param(Value::String(format!("{}%", escape_like(s))))
                        .push(" ESCAPE '\\'");
                }
                Operator::EndsWith(s) => {
                    w.push(&expr)
                        .push(" LIKE ")
                        .param(Value::String(format!("%{}", escape_like(s))))
                        .push(" ESCAPE '\\'");
                }
                Operator::In(values) if values.is_empty() => {
                    w.push("1 = 0");
                }
                Operator::In(values) => {
                    w.push(&expr).push(" IN (");
                    for (i, v) in values.iter().enumerate() {
                        if i > 0 {
                            w.push(", ");
                        }
                        w.param(v.clone());
                    }
                    w.push(")");
                }
                Operator::Between(lower, upper) => {
                    w.push(&expr)
                        .push(" BETWEEN ")
                        .param(lower.clone())
                        .push(" AND ")
                        .param(upper.clone());
                }
                Operator::GreaterThan(v) => {
                    w.push(&expr).push(" > ").param(v.clone());
                }
                Operator::LessThan(v) => {
                    w.push(&expr).push(" < ").param(v.clone());
                }
                Operator::IsNull => {
                    w.push(&expr).push(" IS NULL");
                }
                Operator::IsNotNull => {
                    w.push(&expr).push(" IS NOT NULL");
                }
            }
        }
    }

    if cmp.negated {
        w.push(")");
    }
    Ok(())
}

fn filter_alias(plan: &JoinPlan, owner_path: &str) -> Result<String> {
    if owner_path.is_empty() {
        return Ok(ROOT_ALIAS.to_string());
    }
    plan.filter_join(owner_path)
        .map(|j| j.alias.clone())
        .ok_or_else(|| internal(format!("no filter join for '{}'", owner_path)))
}

fn link_alias(step: &JoinStep) -> Result<&str> {
    step.link_alias
        .as_deref()
        .ok_or_else(|| internal(format!("join table relation '{}' has no link alias", step.path)))
}

fn simple_id(entity: &EntityDef) -> Result<&str> {
    match entity.identity_columns().as_slice() {
        [single] => Ok(*single),
        _ => Err(internal(format!(
            "'{}' has a composite identity and cannot be joined",
            entity.name
        ))),
    }
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn internal(message: impl Into<String>) -> Error {
    Error::InternalPlan {
        message: message.into(),
        statement: String::new(),
    }
}

/// Attach the SQL rendered so far to a planning failure and log it.
fn plan_failure(branch: &Branch, partial: &str, err: Error) -> Error {
    match err {
        Error::InternalPlan { message, statement } => {
            let statement = if statement.is_empty() {
                partial.to_string()
            } else {
                statement
            };
            error!(
                entity = %branch.kind,
                sql = %statement,
                error = %message,
                "Failed to render planned statement"
            );
            Error::InternalPlan { message, statement }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::schema;
    use crate::query::compiler::QueryCompiler;
    use crate::query::resolver::JoinResolver;
    use coursedb_proto::{Condition, FetchDirective, OrderSpec, QuerySpec};
    use pretty_assertions::assert_eq;

    fn render(kind: &str, spec: QuerySpec, fetches: &[&str]) -> Vec<RenderedQuery> {
        let registry = schema::course_catalog().unwrap();
        let query = QueryCompiler::new(&registry).compile(kind, &spec).unwrap();
        let fetches: Vec<FetchDirective> = fetches.iter().map(|f| FetchDirective::new(*f)).collect();
        let plan = JoinResolver::new(&registry).resolve(&query, &fetches).unwrap();
        let renderer = SqlRenderer::new(&registry);
        plan.branches
            .iter()
            .map(|b| renderer.select(&query, &plan, b).unwrap())
            .collect()
    }

    #[test]
    fn test_broken_plan_reports_partial_statement() {
        let registry = schema::course_catalog().unwrap();
        let query = QueryCompiler::new(&registry)
            .compile(
                "Lecture",
                &QuerySpec::new().filter(Condition::field("section.course.id").eq(1i64)),
            )
            .unwrap();
        let mut plan = JoinResolver::new(&registry).resolve(&query, &[]).unwrap();
        let last = plan.filter_joins.len() - 1;
        plan.filter_joins[last].parent = "nowhere".into();

        let renderer = SqlRenderer::new(&registry);
        match renderer.select(&query, &plan, &plan.branches[0]).unwrap_err() {
            Error::InternalPlan { message, statement } => {
                assert!(message.contains("missing parent join"), "{}", message);
                assert!(statement.starts_with("SELECT t0."), "{}", statement);
                assert!(statement.contains("FROM \"lecture\" t0"), "{}", statement);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            renderer.count(&query, &plan, &plan.branches[0]),
            Err(Error::InternalPlan { statement, .. }) if statement.starts_with("SELECT COUNT(*)")
        ));
    }

    #[test]
    fn test_ignore_case_contains() {
        let rendered = render(
            "Author",
            QuerySpec::new()
                .filter(Condition::field("firstName").contains("M_h").ignore_case())
                .limit(5),
            &[],
        );
        let stmt = &rendered[0].statement;

        assert_eq!(
            stmt.sql,
            "SELECT t0.\"id\", t0.\"first_name\", t0.\"last_name\", t0.\"email\", t0.\"age\" \
             FROM \"author\" t0 WHERE LOWER(t0.\"first_name\") LIKE ? ESCAPE '\\' LIMIT ?"
        );
        assert_eq!(stmt.params, vec![Value::from("%m\\_h%"), Value::Int64(5)]);
    }

    #[test]
    fn test_relationship_filter_joins() {
        let rendered = render(
            "Lecture",
            QuerySpec::new().filter(Condition::field("section.course.id").eq(7i64)),
            &[],
        );

        assert_eq!(
            rendered[0].statement.sql,
            "SELECT t0.\"id\", t0.\"name\", t0.\"section_id\", t0.\"resources_type\", t0.\"resources_id\" \
             FROM \"lecture\" t0 \
             LEFT JOIN \"section\" f1 ON f1.\"id\" = t0.\"section_id\" \
             LEFT JOIN \"course\" f2 ON f2.\"id\" = f1.\"course_id\" \
             WHERE f2.\"id\" = ?"
        );
    }

    #[test]
    fn test_join_table_fetch_disables_limit_pushdown() {
        let rendered = render("Course", QuerySpec::new().limit(1), &["authors"]);
        let sql = &rendered[0].statement.sql;

        assert!(sql.contains(
            "LEFT JOIN \"course_authors\" j1_link ON j1_link.\"course_id\" = t0.\"id\" \
             LEFT JOIN \"author\" j1 ON j1.\"id\" = j1_link.\"author_id\""
        ));
        assert!(!sql.contains("LIMIT"));
        assert_eq!(rendered[0].layout.fetches[0].relation, "authors");
        assert!(rendered[0].layout.fetches[0].collection);
    }

    #[test]
    fn test_polymorphic_root_binds_subtype_discriminator() {
        let rendered = render(
            "Resources",
            QuerySpec::new().filter(Condition::field("lecture").is_null()),
            &[],
        );
        assert_eq!(rendered.len(), 3);

        let text = rendered.iter().find(|r| r.branch.kind == "Text").unwrap();
        assert_eq!(
            text.statement.sql,
            "SELECT t0.\"id\", t0.\"name\", t0.\"size\", t0.\"url\", t0.\"content\" \
             FROM \"text\" t0 \
             LEFT JOIN \"lecture\" f1 ON f1.\"resources_id\" = t0.\"id\" AND f1.\"resources_type\" = ? \
             WHERE f1.\"id\" IS NULL"
        );
        assert_eq!(text.statement.params, vec![Value::from("Text")]);
    }

    #[test]
    fn test_polymorphic_target_renders_union() {
        let rendered = render("Lecture", QuerySpec::new(), &["resources"]);
        let stmt = &rendered[0].statement;

        assert!(stmt.sql.contains(
            "LEFT JOIN (SELECT ? AS \"__subtype\", \"id\", \"name\", \"size\", \"url\", \"length\", NULL AS \"content\", NULL AS \"type\" FROM \"video\" \
             UNION ALL SELECT ? AS \"__subtype\", \"id\", \"name\", \"size\", \"url\", NULL AS \"length\", \"content\", NULL AS \"type\" FROM \"text\" \
             UNION ALL SELECT ? AS \"__subtype\", \"id\", \"name\", \"size\", \"url\", NULL AS \"length\", NULL AS \"content\", \"type\" FROM \"file\") j1 \
             ON j1.\"id\" = t0.\"resources_id\" AND j1.\"__subtype\" = t0.\"resources_type\""
        ));
        assert_eq!(
            stmt.params,
            vec![Value::from("Video"), Value::from("Text"), Value::from("File")]
        );

        let node = &rendered[0].layout.fetches[0].node;
        assert_eq!(node.kind, "Resources");
        assert!(node.subtype_column.is_some());
        let paths: Vec<&str> = node.fields.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["id", "name", "size", "url", "length", "content", "type"]);
    }

    #[test]
    fn test_negation_and_empty_in() {
        let rendered = render(
            "Author",
            QuerySpec::new()
                .filter(Condition::field("age").is_in(Vec::<i32>::new()))
                .or(Condition::field("email").eq("a@b.c").not()),
            &[],
        );
        assert!(rendered[0]
            .statement
            .sql
            .ends_with("WHERE (1 = 0 OR NOT (t0.\"email\" = ?))"));
    }

    #[test]
    fn test_embedded_presence_and_ordering() {
        let rendered = render(
            "Order",
            QuerySpec::new()
                .filter(Condition::field("address").is_not_null())
                .order_by(OrderSpec::desc("id.orderDate")),
            &[],
        );
        let stmt = &rendered[0].statement;

        assert!(stmt.sql.ends_with(
            "WHERE NOT (t0.\"street_name\" IS NULL AND t0.\"house_no\" IS NULL) \
             ORDER BY t0.\"order_date\" DESC"
        ));
        assert_eq!(rendered[0].layout.sort_keys, vec![5]);
        assert_eq!(rendered[0].layout.root.identity, vec![1, 2]);
    }

    #[test]
    fn test_count_statement() {
        let registry = schema::course_catalog().unwrap();
        let query = QueryCompiler::new(&registry)
            .compile(
                "Course",
                &QuerySpec::new().filter(Condition::field("authors.age").gt(30)),
            )
            .unwrap();
        let plan = JoinResolver::new(&registry).resolve(&query, &[]).unwrap();
        let stmt = SqlRenderer::new(&registry)
            .count(&query, &plan, &plan.branches[0])
            .unwrap();

        assert_eq!(
            stmt.sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT t0.\"id\" FROM \"course\" t0 \
             LEFT JOIN \"course_authors\" f1_link ON f1_link.\"course_id\" = t0.\"id\" \
             LEFT JOIN \"author\" f1 ON f1.\"id\" = f1_link.\"author_id\" \
             WHERE f1.\"age\" > ?)"
        );
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
