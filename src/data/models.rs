//! Record capabilities
//!
//! Traits a caller's struct implements to be handled by the accessor,
//! plus the optional post-write hooks and the soft-delete clock.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use sqlx::FromRow;
use sqlx::sqlite::SqliteRow;

use super::cache::CacheClient;
use super::database::Database;
use crate::error::{ModelError, Result};

// =============================================================================
// Record
// =============================================================================

/// A row the accessor can persist and cache
///
/// Column names are the record's serialized field names, so the serde
/// representation and the `FromRow` mapping must agree. The id is kept
/// out of SET clauses; the soft-delete column holds a nullable timestamp.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize, sqlx::FromRow)]
/// struct User {
///     id: i64,
///     email: String,
///     deleted_at: Option<DateTime<FixedOffset>>,
/// }
///
/// impl Record for User {
///     const TABLE: &'static str = "users";
///     fn id(&self) -> u64 { self.id as u64 }
///     fn set_id(&mut self, id: u64) { self.id = id as i64; }
///     fn deleted_at(&self) -> Option<DateTime<FixedOffset>> { self.deleted_at }
/// }
/// ```
pub trait Record:
    Serialize + DeserializeOwned + for<'r> FromRow<'r, SqliteRow> + Send + Sync + Unpin + 'static
{
    /// Table holding the rows
    const TABLE: &'static str;

    /// Primary key column
    const ID_COLUMN: &'static str = "id";

    /// Nullable timestamp column marking a soft-deleted row
    const SOFT_DELETE_COLUMN: &'static str = "deleted_at";

    fn id(&self) -> u64;

    fn set_id(&mut self, id: u64);

    /// Soft-delete marker, `None` while the row is live
    fn deleted_at(&self) -> Option<DateTime<FixedOffset>>;

    /// Post-write hooks exposed by this record, if any
    fn hooks(&self) -> Option<&dyn RecordHooks> {
        None
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Handles passed to a record hook
pub struct HookContext<'a> {
    pub db: &'a Database,
    /// Configured cache handle, regardless of the record cache mode
    pub cache: Option<&'a dyn CacheClient>,
}

/// Optional callbacks run after each mutating accessor operation
///
/// Every method defaults to a no-op. An error returned here becomes the
/// result of the whole operation.
#[async_trait]
pub trait RecordHooks: Send + Sync {
    async fn after_update_by_id(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn after_save_by_id(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn after_delete_by_id(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }

    async fn after_soft_delete_by_id(&self, _ctx: &HookContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Mutating operation a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    UpdateById,
    SaveById,
    DeleteById,
    SoftDeleteById,
}

impl HookKind {
    pub fn name(self) -> &'static str {
        match self {
            HookKind::UpdateById => "AfterUpdateById",
            HookKind::SaveById => "AfterSaveById",
            HookKind::DeleteById => "AfterDeleteById",
            HookKind::SoftDeleteById => "AfterSoftDeleteById",
        }
    }

    pub(crate) async fn dispatch(
        self,
        hooks: &dyn RecordHooks,
        ctx: &HookContext<'_>,
    ) -> Result<()> {
        match self {
            HookKind::UpdateById => hooks.after_update_by_id(ctx).await,
            HookKind::SaveById => hooks.after_save_by_id(ctx).await,
            HookKind::DeleteById => hooks.after_delete_by_id(ctx).await,
            HookKind::SoftDeleteById => hooks.after_soft_delete_by_id(ctx).await,
        }
    }
}

// =============================================================================
// Columns
// =============================================================================

/// Serialize a record into its column map
pub(crate) fn record_columns<R: Record>(record: &R) -> Result<Map<String, Value>> {
    match serde_json::to_value(record)? {
        Value::Object(columns) => Ok(columns),
        other => Err(ModelError::Config(format!(
            "record for table `{}` must serialize to an object, got {}",
            R::TABLE,
            json_kind(&other)
        ))),
    }
}

/// Whether a column holds its type's zero value
///
/// Partial updates skip these, so a partial update can never clear a
/// column back to null, zero or empty.
pub(crate) fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64() == Some(0.0),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Clock
// =============================================================================

/// UTC+8, the zone soft-delete timestamps are recorded in
const CST_OFFSET_SECONDS: i32 = 8 * 3600;

/// Current time in the fixed UTC+8 zone, independent of the host zone
pub fn now_cst() -> DateTime<FixedOffset> {
    let cst = FixedOffset::east_opt(CST_OFFSET_SECONDS).expect("UTC+8 is a valid offset");
    Utc::now().with_timezone(&cst)
}
