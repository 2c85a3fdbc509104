//! Embedded sled storage backend.
//!
//! Each table is a pair of trees: `table:<name>` maps a monotonically
//! increasing id to an rkyv-encoded [`Row`], so iteration order is insertion
//! order, and `pk:<name>` maps primary key bytes to that id. Queries run the
//! compiled query's [`SelectPlan`](ormkit_proto::SelectPlan) in process.

use std::collections::HashSet;

use dashmap::DashMap;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};
use sled::{Db, Transactional, Tree};
use tracing::debug;

use super::config::SledConfig;
use super::StorageBackend;
use crate::catalog::TableSchema;
use crate::error::{Error, ExecutionError};
use crate::query::FilterEvaluator;
use ormkit_proto::{CompiledQuery, Row, Value};

/// Prefix of row trees.
const TABLE_PREFIX: &str = "table:";

/// Prefix of primary key index trees.
const PK_PREFIX: &str = "pk:";

/// Backend storing rows in sled trees.
pub struct SledBackend {
    db: Db,
    trees: DashMap<String, (Tree, Tree)>,
    tables: DashMap<String, TableSchema>,
}

impl SledBackend {
    /// Open or create a database with the given configuration.
    pub fn open(config: &SledConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        debug!(path = %config.path.display(), temporary = config.temporary, "Opened sled database");
        Ok(Self::from_db(db))
    }

    /// Open a temporary database, removed on drop.
    pub fn temporary() -> Result<Self, Error> {
        Self::open(&SledConfig::temporary())
    }

    /// Wrap an open sled database.
    pub fn from_db(db: Db) -> Self {
        Self {
            db,
            trees: DashMap::new(),
            tables: DashMap::new(),
        }
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.db.flush()?;
        Ok(())
    }

    fn trees(&self, table: &str) -> Result<(Tree, Tree), Error> {
        if let Some(trees) = self.trees.get(table) {
            return Ok(trees.clone());
        }
        if !self.tables.contains_key(table) {
            return Err(ExecutionError::MissingTable(table.to_string()).into());
        }
        let data = self.db.open_tree(format!("{TABLE_PREFIX}{table}"))?;
        let keys = self.db.open_tree(format!("{PK_PREFIX}{table}"))?;
        self.trees
            .insert(table.to_string(), (data.clone(), keys.clone()));
        Ok((data, keys))
    }

    fn schema(&self, table: &str) -> Result<TableSchema, Error> {
        self.tables
            .get(table)
            .map(|t| t.clone())
            .ok_or_else(|| ExecutionError::MissingTable(table.to_string()).into())
    }
}

impl StorageBackend for SledBackend {
    fn ensure_table(&self, table: &TableSchema) -> Result<(), Error> {
        self.tables.insert(table.name.clone(), table.clone());
        self.trees(&table.name)?;
        debug!(table = %table.name, "Ensured table");
        Ok(())
    }

    fn execute(
        &self,
        query: &CompiledQuery,
        sink: &mut dyn FnMut(Row) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let plan = &query.plan;
        let (data, _) = self.trees(&plan.table)?;

        let mut rows = Vec::new();
        for item in data.iter() {
            let (_, bytes) = item?;
            let row = Row::from_bytes(&bytes)?;
            let keep = plan
                .predicate
                .as_ref()
                .map_or(true, |p| FilterEvaluator::matches(p, &row));
            if keep {
                rows.push(row);
            }
        }

        // Stable sort: ties keep insertion order.
        FilterEvaluator::sort_rows(&mut rows, &plan.order_by);
        if let Some(pagination) = &plan.pagination {
            rows = pagination.apply(rows);
        }

        for row in rows {
            sink(row.project(&plan.columns))?;
        }
        Ok(())
    }

    fn insert_batch(&self, batch: &[(&str, &[Row])]) -> Result<(), Error> {
        // Ids and encodings are computed once; the transaction closure may retry.
        let mut staged: Vec<StagedTable<'_>> = Vec::new();
        for (table, rows) in batch {
            if rows.is_empty() {
                continue;
            }
            let schema = self.schema(table)?;
            let columns = schema.column_names();
            let mut pending = Vec::with_capacity(rows.len());
            for row in rows.iter() {
                let row = row.project(&columns);
                let id = self.db.generate_id()?.to_be_bytes();
                let pk = schema
                    .primary_key
                    .as_ref()
                    .and_then(|pk| row.get(pk))
                    .map(|v| v.key_bytes());
                pending.push((id, pk, row.to_bytes()?));
            }
            match staged.iter_mut().find(|t| t.name == *table) {
                Some(existing) => existing.pending.extend(pending),
                None => staged.push(StagedTable {
                    name: *table,
                    pending,
                }),
            }
        }
        if staged.is_empty() {
            return Ok(());
        }

        // Trees of table i sit at 2i (rows) and 2i + 1 (keys).
        let mut trees = Vec::with_capacity(staged.len() * 2);
        for table in &staged {
            let (data, keys) = self.trees(table.name)?;
            trees.push(data);
            trees.push(keys);
        }

        let result: Result<(), TransactionError<Error>> = trees[..].transaction(|views| {
            for (i, table) in staged.iter().enumerate() {
                let (data_tx, keys_tx) = (&views[2 * i], &views[2 * i + 1]);
                for (id, pk, bytes) in &table.pending {
                    if let Some(pk) = pk {
                        claim_key(keys_tx, table.name, pk, id)?;
                    }
                    data_tx.insert(&id[..], bytes.as_slice())?;
                }
            }
            Ok(())
        });
        finish(result)
    }

    fn delete_all(&self, table: &str) -> Result<(), Error> {
        let (data, keys) = self.trees(table)?;
        data.clear()?;
        keys.clear()?;
        Ok(())
    }

    fn delete_keys(&self, table: &str, column: &str, keys: &[Value]) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }
        let schema = self.schema(table)?;
        let (data, index) = self.trees(table)?;
        let wanted: HashSet<Vec<u8>> = keys.iter().map(Value::key_bytes).collect();

        let mut doomed = Vec::new();
        for item in data.iter() {
            let (id, bytes) = item?;
            let row = Row::from_bytes(&bytes)?;
            if row
                .get(column)
                .is_some_and(|v| wanted.contains(&v.key_bytes()))
            {
                let pk = schema
                    .primary_key
                    .as_ref()
                    .and_then(|pk| row.get(pk))
                    .map(Value::key_bytes);
                doomed.push((id, pk));
            }
        }

        let result: Result<(), TransactionError<Error>> =
            (&data, &index).transaction(|(data_tx, keys_tx)| {
                for (id, pk) in &doomed {
                    data_tx.remove(&id[..])?;
                    if let Some(pk) = pk {
                        keys_tx.remove(pk.as_slice())?;
                    }
                }
                Ok(())
            });
        finish(result)
    }
}

/// Encoded rows of one table waiting to be written.
struct StagedTable<'a> {
    name: &'a str,
    pending: Vec<([u8; 8], Option<Vec<u8>>, Vec<u8>)>,
}

fn finish(result: Result<(), TransactionError<Error>>) -> Result<(), Error> {
    match result {
        Ok(()) => Ok(()),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(e.into()),
    }
}

/// Reserve a primary key inside a transaction, aborting on a duplicate.
fn claim_key(
    keys_tx: &TransactionalTree,
    table: &str,
    pk: &[u8],
    id: &[u8; 8],
) -> Result<(), ConflictableTransactionError<Error>> {
    if keys_tx.get(pk)?.is_some() {
        return Err(ConflictableTransactionError::Abort(
            ExecutionError::ConstraintViolation {
                table: table.to_string(),
                reason: "duplicate primary key".to_string(),
            }
            .into(),
        ));
    }
    keys_tx.insert(pk, &id[..])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ColumnDef, ScalarType};
    use crate::query::{render_select, SqlDialect};
    use ormkit_proto::{Comparison, OrderSpec, Pagination, SelectPlan};

    fn dogs() -> TableSchema {
        TableSchema::new("dog")
            .with_column(ColumnDef::new("id", ScalarType::Int64))
            .with_column(ColumnDef::new("name", ScalarType::String))
            .with_primary_key("id")
    }

    fn dog(id: i64, name: &str) -> Row {
        Row::default().with("id", id).with("name", name)
    }

    fn run(backend: &SledBackend, plan: SelectPlan) -> Vec<Row> {
        let query = render_select(plan, &SqlDialect::default());
        let mut out = Vec::new();
        backend
            .execute(&query, &mut |row| {
                out.push(row);
                Ok(())
            })
            .unwrap();
        out
    }

    fn names(rows: &[Row]) -> Vec<String> {
        rows.iter()
            .map(|r| r.get("name").and_then(Value::as_str).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn test_insertion_order_and_projection() {
        let backend = SledBackend::temporary().unwrap();
        backend.ensure_table(&dogs()).unwrap();
        // Column order in the input does not matter.
        backend
            .insert_many(
                "dog",
                &[
                    Row::default().with("name", "Rex").with("id", 3i64),
                    dog(1, "Fido"),
                    dog(2, "Spot"),
                ],
            )
            .unwrap();

        let rows = run(&backend, SelectPlan::new("dog", vec!["name".into()]));
        assert_eq!(names(&rows), vec!["Rex", "Fido", "Spot"]);
        assert_eq!(rows[0].len(), 1);
    }

    #[test]
    fn test_filter_sort_paginate() {
        let backend = SledBackend::temporary().unwrap();
        backend.ensure_table(&dogs()).unwrap();
        backend
            .insert_many("dog", &[dog(1, "b"), dog(2, "a"), dog(3, "c"), dog(4, "a")])
            .unwrap();

        let plan = SelectPlan::new("dog", dogs().column_names())
            .with_predicate(Comparison::gt("id", 1i64).into())
            .with_order(OrderSpec::asc("name"))
            .with_pagination(Pagination::new(2, 0));
        let rows = run(&backend, plan);
        assert_eq!(
            rows.iter().map(|r| r.get("id").cloned()).collect::<Vec<_>>(),
            vec![Some(Value::Int64(2)), Some(Value::Int64(4))]
        );
    }

    #[test]
    fn test_duplicate_key_aborts_batch() {
        let backend = SledBackend::temporary().unwrap();
        backend.ensure_table(&dogs()).unwrap();
        backend.insert_many("dog", &[dog(1, "Rex")]).unwrap();

        let result = backend.insert_many("dog", &[dog(2, "Fido"), dog(1, "Rex")]);
        assert!(matches!(
            result,
            Err(Error::Execution(ExecutionError::ConstraintViolation { .. }))
        ));
        let result = backend.insert_many("dog", &[dog(5, "a"), dog(5, "b")]);
        assert!(result.is_err());

        let rows = run(&backend, SelectPlan::new("dog", dogs().column_names()));
        assert_eq!(names(&rows), vec!["Rex"]);
    }

    #[test]
    fn test_batch_aborts_across_tables() {
        let backend = SledBackend::temporary().unwrap();
        let kennels = TableSchema::new("kennel")
            .with_column(ColumnDef::new("id", ScalarType::Int64))
            .with_primary_key("id");
        backend.ensure_table(&dogs()).unwrap();
        backend.ensure_table(&kennels).unwrap();
        backend.insert_many("dog", &[dog(1, "Rex")]).unwrap();

        let new_kennels = [Row::default().with("id", 10i64)];
        let new_dogs = [dog(2, "Fido"), dog(1, "Rex")];
        let result =
            backend.insert_batch(&[("kennel", &new_kennels[..]), ("dog", &new_dogs[..])]);
        assert!(matches!(
            result,
            Err(Error::Execution(ExecutionError::ConstraintViolation { .. }))
        ));

        assert!(run(&backend, SelectPlan::new("kennel", kennels.column_names())).is_empty());
        let rows = run(&backend, SelectPlan::new("dog", dogs().column_names()));
        assert_eq!(names(&rows), vec!["Rex"]);

        backend
            .insert_batch(&[("kennel", &new_kennels[..]), ("dog", &new_dogs[..1])])
            .unwrap();
        assert_eq!(run(&backend, SelectPlan::new("kennel", kennels.column_names())).len(), 1);
    }

    #[test]
    fn test_delete_keys_frees_primary_keys() {
        let backend = SledBackend::temporary().unwrap();
        backend.ensure_table(&dogs()).unwrap();
        backend
            .insert_many("dog", &[dog(1, "a"), dog(2, "b"), dog(3, "b")])
            .unwrap();

        backend
            .delete_keys("dog", "name", &[Value::String("b".into())])
            .unwrap();
        let rows = run(&backend, SelectPlan::new("dog", dogs().column_names()));
        assert_eq!(names(&rows), vec!["a"]);

        backend.delete_keys("dog", "id", &[Value::Int32(1)]).unwrap();
        assert!(run(&backend, SelectPlan::new("dog", dogs().column_names())).is_empty());
        backend
            .insert_many("dog", &[dog(1, "a"), dog(2, "b")])
            .unwrap();
    }

    #[test]
    fn test_delete_all_and_missing_table() {
        let backend = SledBackend::temporary().unwrap();
        backend.ensure_table(&dogs()).unwrap();
        backend.insert_many("dog", &[dog(1, "Rex")]).unwrap();
        backend.delete_all("dog").unwrap();
        assert!(run(&backend, SelectPlan::new("dog", dogs().column_names())).is_empty());
        backend.insert_many("dog", &[dog(1, "Rex")]).unwrap();

        let query = render_select(SelectPlan::new("cat", vec![]), &SqlDialect::default());
        let result = backend.execute(&query, &mut |_| Ok(()));
        assert!(matches!(
            result,
            Err(Error::Execution(ExecutionError::MissingTable(t))) if t == "cat"
        ));
    }

    #[test]
    fn test_reopen_persists_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = SledConfig::new(dir.path()).with_flush_every_ms(None);
        {
            let backend = SledBackend::open(&config).unwrap();
            backend.ensure_table(&dogs()).unwrap();
            backend.insert_many("dog", &[dog(1, "Rex")]).unwrap();
            backend.flush().unwrap();
        }
        let backend = SledBackend::open(&config).unwrap();
        backend.ensure_table(&dogs()).unwrap();
        let rows = run(&backend, SelectPlan::new("dog", dogs().column_names()));
        assert_eq!(names(&rows), vec!["Rex"]);
    }
}
