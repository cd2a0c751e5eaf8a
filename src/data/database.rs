//! SQLite database operations
//!
//! All store access goes through this module.
//! Queries are built at runtime from the record's column map, so any
//! `Record` can be persisted without per-table SQL.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, QueryBuilder, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::models::{Record, is_zero_value, record_columns};
use crate::error::{ModelError, Result};

/// Database connection pool wrapper
///
/// Counts every query it issues so callers can tell whether a read was
/// served from the cache or reached the store.
pub struct Database {
    pool: Pool<Sqlite>,
    queries: AtomicU64,
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist. The schema is owned
    /// by the embedding application; no migrations are run here.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    /// * `max_connections` - Pool size
    ///
    /// # Errors
    /// Returns error if the path is not UTF-8 or the connection fails
    pub async fn connect(path: &Path, max_connections: u32) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ModelError::Database(sqlx::Error::Io(e)))?;
        }

        let db_path = path.to_str().ok_or_else(|| {
            ModelError::Config(format!(
                "database path must be valid UTF-8: {}",
                path.display()
            ))
        })?;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        tracing::info!(path = %path.display(), "Database connected");

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            queries: AtomicU64::new(0),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of record queries issued through this handle
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    fn observe(&self, operation: &str, table: &str, started: Instant) {
        use crate::metrics::{DB_QUERIES_TOTAL, DB_QUERY_DURATION_SECONDS};

        self.queries.fetch_add(1, Ordering::Relaxed);
        DB_QUERIES_TOTAL
            .with_label_values(&[operation, table])
            .inc();
        DB_QUERY_DURATION_SECONDS
            .with_label_values(&[operation, table])
            .observe(started.elapsed().as_secs_f64());
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a record
    ///
    /// An id of 0 is left out so SQLite assigns one.
    ///
    /// # Returns
    /// The rowid of the inserted row
    pub async fn insert<R: Record>(&self, record: &R) -> Result<u64> {
        let mut columns = record_columns(record)?;
        if record.id() == 0 {
            columns.remove(R::ID_COLUMN);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ");
        qb.push(quote_ident(R::TABLE));

        if columns.is_empty() {
            qb.push(" DEFAULT VALUES");
        } else {
            qb.push(" (");
            let names: Vec<String> = columns.keys().map(|name| quote_ident(name)).collect();
            qb.push(names.join(", "));
            qb.push(") VALUES (");
            for (index, value) in columns.into_iter().map(|(_, value)| value).enumerate() {
                if index > 0 {
                    qb.push(", ");
                }
                push_bind_value(&mut qb, value)?;
            }
            qb.push(")");
        }

        let started = Instant::now();
        let result = qb.build().execute(&self.pool).await;
        self.observe("insert", R::TABLE, started);

        let rowid = result?.last_insert_rowid();
        u64::try_from(rowid)
            .map_err(|_| ModelError::Config(format!("store assigned negative id {rowid}")))
    }

    /// Write the non-zero columns of `record` to the row matched by `id`
    ///
    /// A record with nothing but zero values issues no query.
    ///
    /// # Returns
    /// Rows affected
    pub async fn update_columns<R: Record>(&self, record: &R, id: u64) -> Result<u64> {
        let mut columns = record_columns(record)?;
        columns.remove(R::ID_COLUMN);
        columns.retain(|_, value| !is_zero_value(value));

        if columns.is_empty() {
            tracing::debug!(table = R::TABLE, id, "Partial update has no non-zero columns");
            return Ok(0);
        }

        self.update_by_id::<R>("update", columns, id).await
    }

    /// Overwrite every non-id column of the row matched by `id`
    ///
    /// # Returns
    /// Rows affected
    pub async fn save_columns<R: Record>(&self, record: &R, id: u64) -> Result<u64> {
        let mut columns = record_columns(record)?;
        columns.remove(R::ID_COLUMN);

        if columns.is_empty() {
            return Ok(0);
        }

        self.update_by_id::<R>("save", columns, id).await
    }

    /// Set the soft-delete column of the row matched by `id`
    ///
    /// Only that column is written.
    pub async fn soft_delete_by_id<R: Record>(
        &self,
        id: u64,
        deleted_at: DateTime<FixedOffset>,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_ident(R::TABLE),
            quote_ident(R::SOFT_DELETE_COLUMN),
            quote_ident(R::ID_COLUMN),
        );

        let started = Instant::now();
        let result = sqlx::query(&sql)
            .bind(deleted_at)
            .bind(id_param(id)?)
            .execute(&self.pool)
            .await;
        self.observe("soft_delete", R::TABLE, started);

        Ok(result?.rows_affected())
    }

    /// Remove the row matched by `id`
    pub async fn delete_by_id<R: Record>(&self, id: u64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_ident(R::TABLE),
            quote_ident(R::ID_COLUMN),
        );

        let started = Instant::now();
        let result = sqlx::query(&sql)
            .bind(id_param(id)?)
            .execute(&self.pool)
            .await;
        self.observe("delete", R::TABLE, started);

        Ok(result?.rows_affected())
    }

    async fn update_by_id<R: Record>(
        &self,
        operation: &str,
        columns: Map<String, Value>,
        id: u64,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::<Sqlite>::new("UPDATE ");
        qb.push(quote_ident(R::TABLE));
        qb.push(" SET ");
        for (index, (name, value)) in columns.into_iter().enumerate() {
            if index > 0 {
                qb.push(", ");
            }
            qb.push(quote_ident(&name));
            qb.push(" = ");
            push_bind_value(&mut qb, value)?;
        }
        qb.push(" WHERE ");
        qb.push(quote_ident(R::ID_COLUMN));
        qb.push(" = ");
        qb.push_bind(id_param(id)?);

        let started = Instant::now();
        let result = qb.build().execute(&self.pool).await;
        self.observe(operation, R::TABLE, started);

        Ok(result?.rows_affected())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch the row matched by `id`
    ///
    /// # Errors
    /// `sqlx::Error::RowNotFound` when no row matches
    pub async fn first_by_id<R: Record>(&self, id: u64) -> Result<R> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            quote_ident(R::TABLE),
            quote_ident(R::ID_COLUMN),
        );

        let started = Instant::now();
        let record = sqlx::query_as::<_, R>(&sql)
            .bind(id_param(id)?)
            .fetch_one(&self.pool)
            .await;
        self.observe("first", R::TABLE, started);

        Ok(record?)
    }

    /// Fetch the row matched by `id` unless it is soft-deleted
    ///
    /// # Errors
    /// `sqlx::Error::RowNotFound` when no live row matches
    pub async fn first_by_id_live<R: Record>(&self, id: u64) -> Result<R> {
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? AND {} IS NULL LIMIT 1",
            quote_ident(R::TABLE),
            quote_ident(R::ID_COLUMN),
            quote_ident(R::SOFT_DELETE_COLUMN),
        );

        let started = Instant::now();
        let record = sqlx::query_as::<_, R>(&sql)
            .bind(id_param(id)?)
            .fetch_one(&self.pool)
            .await;
        self.observe("first_live", R::TABLE, started);

        Ok(record?)
    }
}

/// Quote an SQL identifier
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQLite integers are signed 64-bit
fn id_param(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| ModelError::Config(format!("id {id} exceeds the store's range")))
}

/// Bind one JSON column value with its natural SQLite type
///
/// Arrays and objects are stored as JSON text.
fn push_bind_value(qb: &mut QueryBuilder<'_, Sqlite>, value: Value) -> Result<()> {
    match value {
        Value::Null => {
            qb.push_bind(Option::<String>::None);
        }
        Value::Bool(flag) => {
            qb.push_bind(flag);
        }
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                qb.push_bind(integer);
            } else if let Some(unsigned) = number.as_u64() {
                let integer = i64::try_from(unsigned).map_err(|_| {
                    ModelError::Config(format!("integer {unsigned} exceeds the store's range"))
                })?;
                qb.push_bind(integer);
            } else {
                qb.push_bind(number.as_f64().unwrap_or_default());
            }
        }
        Value::String(text) => {
            qb.push_bind(text);
        }
        nested @ (Value::Array(_) | Value::Object(_)) => {
            qb.push_bind(nested.to_string());
        }
    }
    Ok(())
}
