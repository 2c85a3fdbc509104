//! SQLite storage backend.

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlLiteral, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::config::SqliteConfig;
use super::StorageBackend;
use crate::catalog::{ScalarType, TableSchema};
use crate::error::Error;
use crate::query::{delete_keys_statement, delete_statement, quote_ident, SqlDialect};
use ormkit_proto::{CompiledQuery, Row, Value};

/// Backend running compiled SQL on a SQLite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open a database.
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout())?;
        debug!(path = ?config.path, "Opened SQLite database");
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Result<Self, Error> {
        // LIKE must be case sensitive to agree with the in-process evaluator.
        conn.execute_batch("PRAGMA case_sensitive_like = ON;")?;
        Ok(Self { conn })
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

/// Column type used for a declared scalar type.
///
/// Integers are `INT`: an `INTEGER PRIMARY KEY` aliases `rowid`, which must
/// stay in insertion order.
fn column_type(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::Bool | ScalarType::Int32 | ScalarType::Int64 | ScalarType::Timestamp => "INT",
        ScalarType::Float64 => "REAL",
        ScalarType::String => "TEXT",
        ScalarType::Bytes | ScalarType::Uuid => "BLOB",
    }
}

/// Borrowing adapter binding a [`Value`] as a SQLite parameter.
struct SqlValue<'a>(&'a Value);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            Value::Null => ToSqlOutput::Owned(SqlLiteral::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlLiteral::Integer(*b as i64)),
            Value::Int32(i) => ToSqlOutput::Owned(SqlLiteral::Integer(*i as i64)),
            Value::Int64(i) | Value::Timestamp(i) => ToSqlOutput::Owned(SqlLiteral::Integer(*i)),
            Value::Float64(f) => ToSqlOutput::Owned(SqlLiteral::Real(*f)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Uuid(u) => ToSqlOutput::Borrowed(ValueRef::Blob(u)),
        })
    }
}

/// Convert a stored SQLite value. Declared types are restored by the codec.
fn read_value(value: ValueRef<'_>) -> Result<Value, Error> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(
            std::str::from_utf8(t)
                .map_err(rusqlite::Error::Utf8Error)?
                .to_string(),
        ),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    })
}

impl StorageBackend for SqliteBackend {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::with_insertion_order("rowid")
    }

    fn ensure_table(&self, table: &TableSchema) -> Result<(), Error> {
        let columns: Vec<String> = table
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), column_type(c.column_type));
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                if table.primary_key.as_deref() == Some(c.name.as_str()) {
                    def.push_str(" PRIMARY KEY");
                }
                def
            })
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&table.name),
            columns.join(", ")
        );
        self.conn.execute_batch(&sql)?;
        debug!(table = %table.name, "Ensured table");
        Ok(())
    }

    fn execute(
        &self,
        query: &CompiledQuery,
        sink: &mut dyn FnMut(Row) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let mut stmt = self.conn.prepare(&query.text)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params_from_iter(query.params.iter().map(SqlValue)))?;

        while let Some(row) = rows.next()? {
            let mut out = Row::new(Vec::with_capacity(names.len()));
            for (i, name) in names.iter().enumerate() {
                out.push(name.clone(), read_value(row.get_ref(i)?)?);
            }
            sink(out)?;
        }
        Ok(())
    }

    fn insert_batch(&self, batch: &[(&str, &[Row])]) -> Result<(), Error> {
        // Dropping the transaction unfinished rolls every table back.
        let tx = self.conn.unchecked_transaction()?;
        for (table, rows) in batch {
            insert_rows(&tx, table, rows)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_all(&self, table: &str) -> Result<(), Error> {
        self.conn.execute(&delete_statement(table), [])?;
        Ok(())
    }

    fn delete_keys(&self, table: &str, column: &str, keys: &[Value]) -> Result<(), Error> {
        if keys.is_empty() {
            return Ok(());
        }
        let (text, params) = delete_keys_statement(table, column, keys);
        self.conn
            .execute(&text, params_from_iter(params.iter().map(SqlValue)))?;
        Ok(())
    }
}

fn insert_rows(conn: &Connection, table: &str, rows: &[Row]) -> Result<(), Error> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let columns: Vec<String> = first.column_names().map(str::to_string).collect();
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        quoted.join(", "),
        vec!["?"; columns.len()].join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    for row in rows {
        let row = row.project(&columns);
        stmt.execute(params_from_iter(row.values().map(SqlValue)))?;
    }
    Ok(())
}
