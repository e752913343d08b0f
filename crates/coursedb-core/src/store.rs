//! Store: the public entry point tying the registry, query engine and
//! storage together.

use std::sync::Arc;

use coursedb_proto::{Condition, FetchDirective, QuerySpec};
use dashmap::DashMap;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{EntityDef, Registry};
use crate::config::{SqliteConfig, StoreConfig};
use crate::error::{Error, Result};
use crate::identity::{Identity, SequenceHandle};
use crate::model::{schema, Entity, Record};
use crate::mutation::{CascadeExecutor, SaveExecutor};
use crate::query::{
    order_and_limit, CompiledQuery, EntityNode, JoinResolver, QueryCompiler, RowAssembler,
    SqlRenderer, StatementExecutor,
};
use crate::storage::{SqliteStorage, Storage};

/// Course catalog store.
///
/// `Store` is `Send + Sync`; the registry is immutable and shared, and
/// storage serializes its own writes. Every call reaches storage.
pub struct Store {
    registry: Arc<Registry>,
    storage: Arc<dyn Storage>,
    config: StoreConfig,
    sequences: DashMap<String, SequenceHandle>,
}

impl Store {
    /// Create a store over an existing registry and storage backend.
    pub fn new(registry: Arc<Registry>, storage: Arc<dyn Storage>, config: StoreConfig) -> Self {
        Self {
            registry,
            storage,
            config,
            sequences: DashMap::new(),
        }
    }

    /// Open a SQLite-backed store for the course catalog, creating tables as
    /// needed.
    pub fn open_sqlite(sqlite: &SqliteConfig, config: StoreConfig) -> Result<Self> {
        let registry = Arc::new(schema::course_catalog()?);
        let storage = SqliteStorage::open(sqlite).map_err(unavailable)?;
        storage.create_schema(&registry).map_err(unavailable)?;
        info!(
            entities = registry.entities().count(),
            max_attempts = config.retry.max_attempts,
            "Course catalog store ready"
        );
        Ok(Self::new(registry, Arc::new(storage), config))
    }

    /// The entity registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn executor(&self) -> StatementExecutor<'_> {
        StatementExecutor::new(self.storage.as_ref(), &self.registry, &self.config.retry)
    }

    /// Validate a query specification against `kind`.
    pub fn compile_query(&self, kind: &str, spec: &QuerySpec) -> Result<CompiledQuery> {
        QueryCompiler::new(&self.registry).compile(kind, spec)
    }

    /// Run a compiled query, loading the requested associations.
    #[instrument(skip(self, query, fetches), fields(entity = %query.entity))]
    pub fn plan_and_execute(
        &self,
        query: &CompiledQuery,
        fetches: &[FetchDirective],
    ) -> Result<Vec<EntityNode>> {
        let plan = JoinResolver::new(&self.registry).resolve(query, fetches)?;
        let renderer = SqlRenderer::new(&self.registry);
        let assembler = RowAssembler::new(&self.registry);
        let executor = self.executor();

        let mut results = Vec::new();
        for branch in &plan.branches {
            let rendered = renderer.select(query, &plan, branch)?;
            let rows = executor.run(&branch.kind, &rendered.statement)?;
            debug!(branch = %branch.kind, rows = rows.rows.len(), "Query branch returned");
            results.extend(assembler.assemble(&rendered.layout, &rows.rows)?);
        }

        if plan.branches.len() > 1 || plan.fans_out() {
            if let Some(limit) = query.limit {
                if plan.fans_out() {
                    warn!(
                        limit,
                        roots = results.len(),
                        "Applying limit in memory; collection joins fan out rows"
                    );
                }
            }
            results = order_and_limit(results, &query.order_by, query.limit);
        }
        Ok(results.into_iter().map(|a| a.node).collect())
    }

    /// Count distinct root entities matching a compiled query.
    #[instrument(skip(self, query), fields(entity = %query.entity))]
    pub fn count(&self, query: &CompiledQuery) -> Result<u64> {
        let plan = JoinResolver::new(&self.registry).resolve(query, &[])?;
        let renderer = SqlRenderer::new(&self.registry);
        let executor = self.executor();

        let mut total = 0u64;
        for branch in &plan.branches {
            let statement = renderer.count(query, &plan, branch)?;
            let rows = executor.run(&branch.kind, &statement)?;
            let count = rows
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(|v| v.as_i64())
                .ok_or_else(|| Error::InvalidData("count returned no value".to_string()))?;
            total += count.max(0) as u64;
        }
        Ok(total)
    }

    /// Find typed entities.
    pub fn find<E: Entity>(&self, spec: &QuerySpec, fetches: &[FetchDirective]) -> Result<Vec<E>> {
        let query = self.compile_query(E::KIND, spec)?;
        self.plan_and_execute(&query, fetches)?
            .iter()
            .map(E::from_node)
            .collect()
    }

    /// Find one entity by identity.
    pub fn find_by_id<E: Entity>(
        &self,
        identity: &Identity,
        fetches: &[FetchDirective],
    ) -> Result<Option<E>> {
        let entity = self.registry.describe(E::KIND)?;
        if entity.is_abstract() {
            return Err(Error::AbstractEntity(entity.name.clone()));
        }
        let query = self.compile_query(E::KIND, &identity_spec(entity, identity)?)?;
        match self.plan_and_execute(&query, fetches)?.first() {
            Some(node) => E::from_node(node).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a row of `kind` (or of any of its subtypes) has `identity`.
    pub fn exists(&self, kind: &str, identity: &Identity) -> Result<bool> {
        let entity = self.registry.describe(kind)?;
        let query = self.compile_query(kind, &identity_spec(entity, identity)?)?;
        Ok(self.count(&query)? > 0)
    }

    /// Save a typed entity, returning it with its identity assigned.
    pub fn save<E: Entity>(&self, mut entity: E) -> Result<E> {
        let identity = self.save_record(&entity.to_record()?)?;
        entity.assign_identity(&identity);
        Ok(entity)
    }

    /// Save an untyped record.
    #[instrument(skip(self, record), fields(entity = %record.kind))]
    pub fn save_record(&self, record: &Record) -> Result<Identity> {
        let executor = self.executor();
        SaveExecutor::new(&self.registry, &executor, &self.sequences).save(record)
    }

    /// Delete an entity; `NotFound` if it does not exist.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub fn delete(&self, kind: &str, identity: &Identity) -> Result<()> {
        let executor = self.executor();
        CascadeExecutor::new(&self.registry, &executor).delete(kind, identity)
    }
}

/// Equality filters on every identity component.
fn identity_spec(entity: &EntityDef, identity: &Identity) -> Result<QuerySpec> {
    identity.check_shape(entity)?;
    let spec = entity
        .identity_paths()
        .into_iter()
        .zip(identity.values())
        .fold(QuerySpec::new(), |spec, ((path, _), value)| {
            spec.filter(Condition::field(path).eq(value))
        });
    Ok(spec)
}

fn unavailable(err: crate::error::StorageError) -> Error {
    Error::StorageUnavailable {
        attempts: 1,
        message: err.to_string(),
    }
}
