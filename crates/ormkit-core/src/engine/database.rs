//! The execution engine.

use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use tracing::debug;

use super::cascade::Cascade;
use super::config::DatabaseConfig;
use super::loader::RelationLoader;
use super::repository::Repository;
use super::state::{ExecutionState, StateCell};
use crate::catalog::{EntityDef, Schema, SchemaRegistry};
use crate::codec::{Entity, Record, RowBatch, RowCodec};
use crate::error::{Error, ExecutionError};
use crate::query::{
    compile_select, insert_statement, notify, QueryLogger, SelectQuery, SqlDialect,
};
use crate::storage::StorageBackend;
use ormkit_proto::{CompiledQuery, Row, Value};

/// An ORM session over one storage backend.
///
/// The backend is held behind a mutex for the whole of each operation, so
/// callers on several threads never run overlapping statements. A root
/// query and all of its relation follow-ups form one operation.
///
/// The mutex is reentrant: a query logger may itself run statements on the
/// same database. They execute inline, between the logged statement's
/// notification and its execution.
pub struct Database {
    backend: ReentrantMutex<Box<dyn StorageBackend>>,
    registry: SchemaRegistry,
    logger: RwLock<Option<Arc<dyn QueryLogger>>>,
    state: StateCell,
    config: DatabaseConfig,
    dialect: SqlDialect,
}

impl Database {
    /// Create a database with the default configuration.
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self::with_config(backend, DatabaseConfig::default())
    }

    /// Create a database with a custom configuration.
    pub fn with_config(backend: impl StorageBackend + 'static, config: DatabaseConfig) -> Self {
        let dialect = backend.dialect();
        Self {
            backend: ReentrantMutex::new(Box::new(backend)),
            registry: SchemaRegistry::new(),
            logger: RwLock::new(None),
            state: StateCell::new(),
            config,
            dialect,
        }
    }

    /// Register an entity type and provision its tables.
    pub fn register<E: Entity>(&self) -> Result<Arc<Schema>, Error> {
        let schema = self.registry.register::<E>()?;
        self.provision(&schema)?;
        Ok(schema)
    }

    /// Register an entity definition and provision its tables.
    pub fn register_def(&self, def: EntityDef) -> Result<Arc<Schema>, Error> {
        let schema = self.registry.register_def(def)?;
        self.provision(&schema)?;
        Ok(schema)
    }

    fn provision(&self, schema: &Schema) -> Result<(), Error> {
        let tables = self.registry.owned_tables(&schema.entity)?;
        let backend = self.backend.lock();
        for table in &tables {
            backend.ensure_table(table)?;
        }
        Ok(())
    }

    /// Typed access to an entity, registering it on first use.
    pub fn repository<E: Entity>(&self) -> Result<Repository<'_, E>, Error> {
        let schema = self.register::<E>()?;
        Ok(Repository::new(self, schema))
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The engine configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The backend's rendering options.
    pub fn dialect(&self) -> &SqlDialect {
        &self.dialect
    }

    /// Current execution state.
    pub fn state(&self) -> ExecutionState {
        self.state.get()
    }

    /// Install the query logger, replacing any previous one.
    pub fn set_logger<L: QueryLogger + 'static>(&self, logger: L) {
        *self.logger.write() = Some(Arc::new(logger));
    }

    /// Remove the query logger.
    pub fn clear_logger(&self) {
        *self.logger.write() = None;
    }

    /// Compile a query without running it.
    pub fn compile(&self, query: &SelectQuery) -> Result<CompiledQuery, Error> {
        let schema = self.registry.require(&query.entity)?;
        compile_select(&schema, query, &self.dialect)
    }

    /// Run a query and return fully loaded records.
    ///
    /// All or nothing: any failure while streaming or loading relations
    /// discards every row read so far.
    pub fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, Error> {
        let schema = self.registry.require(&query.entity)?;
        let backend = self.backend.lock();
        let guard = self.state.enter(ExecutionState::Compiling);

        let compiled = compile_select(&schema, query, &self.dialect)?;
        guard.advance(ExecutionState::Executing);
        let codec = RowCodec::new(&self.registry);
        let decoded = self.stream(&**backend, &compiled, self.config.max_rows, |row| {
            codec.decode(&schema, row)
        })?;

        let records = RelationLoader::new(self, &**backend).load(&schema, decoded, Some(query))?;
        debug!(entity = %schema.entity, rows = records.len(), "Fetched records");
        Ok(records)
    }

    /// Run a query and convert the results into entities.
    pub fn fetch_entities<E: Entity>(&self, query: &SelectQuery) -> Result<Vec<E>, Error> {
        self.fetch(query)?.into_iter().map(E::from_record).collect()
    }

    /// Insert records and everything they own, as one unit.
    ///
    /// Returns the records as stored, with defaults and generated keys
    /// filled in. If any row is rejected, nothing is stored.
    pub fn insert(&self, entity: &str, mut records: Vec<Record>) -> Result<Vec<Record>, Error> {
        let schema = self.registry.require(entity)?;
        let codec = RowCodec::new(&self.registry);

        let mut batch = RowBatch::new();
        for record in &mut records {
            codec.prepare(&schema, record)?;
            codec.encode(&schema, record, &mut batch)?;
        }
        if batch.is_empty() {
            return Ok(records);
        }

        let tables: Vec<(&str, &[Row])> = batch.tables().collect();
        let backend = self.backend.lock();
        let _guard = self.state.enter(ExecutionState::Executing);
        for (table, rows) in &tables {
            let (text, params) = insert_statement(table, rows);
            self.log_statement(&text, &params);
        }
        backend.insert_batch(&tables)?;
        debug!(entity, rows = batch.row_count(), "Inserted records");
        Ok(records)
    }

    /// Delete every record of an entity, along with the rows it owns.
    ///
    /// Owned targets are deleted by key, so rows of the target entity that
    /// no deleted record refers to are kept.
    pub fn delete_all(&self, entity: &str) -> Result<(), Error> {
        let schema = self.registry.require(entity)?;
        let backend = self.backend.lock();
        let _guard = self.state.enter(ExecutionState::Executing);
        Cascade::new(self, &**backend).delete_all(&schema)?;
        debug!(entity, "Deleted all records");
        Ok(())
    }

    /// Run one select and decode its rows as they arrive.
    pub(crate) fn stream<T>(
        &self,
        backend: &dyn StorageBackend,
        compiled: &CompiledQuery,
        max_rows: Option<usize>,
        mut decode: impl FnMut(Row) -> Result<T, Error>,
    ) -> Result<Vec<T>, Error> {
        self.state.set(ExecutionState::Executing);
        self.log_statement(&compiled.text, &compiled.params);

        let mut out = Vec::new();
        backend.execute(compiled, &mut |row| {
            self.state.set(ExecutionState::Streaming);
            if let Some(limit) = max_rows {
                if out.len() >= limit {
                    return Err(ExecutionError::RowLimitExceeded { limit }.into());
                }
            }
            out.push(decode(row)?);
            Ok(())
        })?;
        Ok(out)
    }

    pub(crate) fn log_statement(&self, text: &str, params: &[Value]) {
        // Clone out of the slot so a logger may replace itself.
        let logger = self.logger.read().clone();
        if let Some(logger) = logger {
            let params: Vec<String> = params.iter().map(ToString::to_string).collect();
            notify(logger.as_ref(), text, &params);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("entities", &self.registry.entities())
            .field("state", &self.state.get())
            .field("config", &self.config)
            .field("dialect", &self.dialect)
            .finish()
    }
}
