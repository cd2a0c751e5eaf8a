//! Record accessor
//!
//! Cache-aside CRUD over a `Database` and an optional `CacheClient`:
//! - Reads check the cache first and populate it from the store on miss
//! - Writes go to the store, then delete the cached row and its links
//! - Mutations finish by running the record's hook, if it has one

use std::sync::Arc;

use super::link::{LinkFinder, LinkRegistry};
use crate::config::AccessorSettings;
use crate::data::{
    CacheClient, Database, HookContext, HookKind, Record, now_cst, record_key,
};
use crate::error::{ModelError, Result};

/// Cache-aside data access for one record type
///
/// # Example
/// ```ignore
/// let users = RecordAccessor::<User>::with_cache(db, cache, settings)
///     .with_link("email", Arc::new(UserByEmail));
///
/// let user = users.first_by_id(42).await?;
/// let same = users.first_by_link("email", "a@example.com").await?;
/// ```
pub struct RecordAccessor<R: Record> {
    db: Arc<Database>,
    cache: Option<Arc<dyn CacheClient>>,
    settings: AccessorSettings,
    links: LinkRegistry<R>,
}

impl<R: Record> Clone for RecordAccessor<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            cache: self.cache.clone(),
            settings: self.settings.clone(),
            links: self.links.clone(),
        }
    }
}

impl<R: Record> RecordAccessor<R> {
    /// Store-only accessor; every operation goes straight to the database
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: None,
            settings: AccessorSettings::default(),
            links: LinkRegistry::new(),
        }
    }

    /// Accessor with a cache handle
    ///
    /// `settings.use_cache` decides whether record reads and writes use
    /// the cache. Links use the handle either way.
    pub fn with_cache(
        db: Arc<Database>,
        cache: Arc<dyn CacheClient>,
        settings: AccessorSettings,
    ) -> Self {
        Self {
            db,
            cache: Some(cache),
            settings,
            links: LinkRegistry::new(),
        }
    }

    /// Register a link finder under `link_type`
    pub fn with_link(
        mut self,
        link_type: impl Into<String>,
        finder: Arc<dyn LinkFinder<R>>,
    ) -> Self {
        self.links.register(link_type, finder);
        self
    }

    /// Replace the whole link registry
    pub fn with_links(mut self, links: LinkRegistry<R>) -> Self {
        self.links = links;
        self
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> Option<&dyn CacheClient> {
        self.cache.as_deref()
    }

    pub fn settings(&self) -> &AccessorSettings {
        &self.settings
    }

    pub fn links(&self) -> &LinkRegistry<R> {
        &self.links
    }

    /// Cache key of the row with `id`
    pub fn cache_key(&self, id: u64) -> String {
        record_key(&self.settings.prefix, id)
    }

    /// Cache used for records, `None` when record caching is off
    fn record_cache(&self) -> Option<&dyn CacheClient> {
        if self.settings.use_cache {
            self.cache.as_deref()
        } else {
            None
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a record
    ///
    /// A record with id 0 receives the id assigned by the store.
    /// The cache is left alone; the first read populates it.
    pub async fn create(&self, record: &mut R) -> Result<()> {
        let id = self
            .db
            .insert(&*record)
            .await
            .inspect_err(|e| count_error(e, "create"))?;
        if record.id() == 0 {
            record.set_id(id);
        }
        Ok(())
    }

    /// Write the non-zero fields of `record` to the row with `id`
    pub async fn update_by_id(&self, record: &R, id: u64) -> Result<()> {
        let written = self.db.update_columns(record, id).await.map(drop);
        let outcome = self.invalidate_after(written, record, id).await;
        self.finish(HookKind::UpdateById, record, outcome).await
    }

    /// Overwrite every field of the row with `id`, zero values included
    pub async fn save_by_id(&self, record: &R, id: u64) -> Result<()> {
        let written = self.db.save_columns(record, id).await.map(drop);
        let outcome = self.invalidate_after(written, record, id).await;
        self.finish(HookKind::SaveById, record, outcome).await
    }

    /// Remove the row with `id`
    ///
    /// `record` supplies the link field values to invalidate and the hook.
    pub async fn delete_by_id(&self, record: &R, id: u64) -> Result<()> {
        let written = self.db.delete_by_id::<R>(id).await.map(drop);
        let outcome = self.invalidate_after(written, record, id).await;
        self.finish(HookKind::DeleteById, record, outcome).await
    }

    /// Mark the row with `id` deleted at the current UTC+8 time
    pub async fn soft_delete_by_id(&self, record: &R, id: u64) -> Result<()> {
        let written = self
            .db
            .soft_delete_by_id::<R>(id, now_cst())
            .await
            .map(drop);
        let outcome = self.invalidate_after(written, record, id).await;
        self.finish(HookKind::SoftDeleteById, record, outcome).await
    }

    /// Drop the cached row and its links once the store write succeeded
    ///
    /// A failed row invalidation fails the operation. Link invalidation is
    /// best-effort: failures are logged and the loop moves on.
    async fn invalidate_after(&self, written: Result<()>, record: &R, id: u64) -> Result<()> {
        written?;

        let Some(cache) = self.record_cache() else {
            return Ok(());
        };

        self.delete_cache(cache, id).await?;

        for (link_type, finder) in self.links.iter() {
            let field = finder.field_value(record);
            if let Err(error) = self.delete_link(link_type, &field).await {
                tracing::warn!(
                    link_type = %link_type,
                    field = %field,
                    %error,
                    "Link invalidation failed; continuing"
                );
            }
        }

        Ok(())
    }

    /// Run the record's hook for `kind`
    ///
    /// The hook runs whether or not the operation succeeded. A hook error
    /// replaces the operation's result, including an earlier error.
    async fn finish(&self, kind: HookKind, record: &R, outcome: Result<()>) -> Result<()> {
        let Some(hooks) = record.hooks() else {
            return outcome.inspect_err(|e| count_error(e, kind.name()));
        };

        let ctx = HookContext {
            db: &self.db,
            cache: self.cache.as_deref(),
        };

        match kind.dispatch(hooks, &ctx).await {
            Ok(()) => outcome.inspect_err(|e| count_error(e, kind.name())),
            Err(hook_error) => {
                if let Err(shadowed) = &outcome {
                    tracing::warn!(
                        hook = kind.name(),
                        error = %shadowed,
                        "Hook error replaces operation error"
                    );
                }
                count_error(&hook_error, kind.name());
                Err(hook_error)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Fetch the row with `id`, through the cache when enabled
    ///
    /// # Errors
    /// Store errors (including not found), cache backend errors and
    /// undecodable cache entries. An absent cache entry is not an error.
    pub async fn first_by_id(&self, id: u64) -> Result<R> {
        let result = match self.record_cache() {
            Some(cache) => self.read_through(cache, id, false).await,
            None => self.db.first_by_id(id).await,
        };
        result.inspect_err(|e| count_error(e, "first_by_id"))
    }

    /// Fetch the row with `id` unless it is soft-deleted
    ///
    /// Shares cache entries with `first_by_id`: only the store query
    /// filters soft-deleted rows, so a copy cached before the row was
    /// soft-deleted elsewhere is still returned until it is invalidated.
    /// The same holds for a soft-deleted row cached by `first_by_id`.
    pub async fn first_by_id_sd(&self, id: u64) -> Result<R> {
        let result = match self.record_cache() {
            Some(cache) => self.read_through(cache, id, true).await,
            None => self.db.first_by_id_live(id).await,
        };
        result.inspect_err(|e| count_error(e, "first_by_id_sd"))
    }

    async fn read_through(&self, cache: &dyn CacheClient, id: u64, live_only: bool) -> Result<R> {
        match self.get_cache(cache, id).await {
            Ok(record) => {
                if live_only && record.deleted_at().is_some() {
                    tracing::warn!(
                        key = %self.cache_key(id),
                        "Serving soft-deleted row cached by an unfiltered read"
                    );
                }
                Ok(record)
            }
            Err(ModelError::CacheMiss) => {
                let record = if live_only {
                    self.db.first_by_id_live(id).await?
                } else {
                    self.db.first_by_id(id).await?
                };
                self.update_cache(cache, &record, id).await?;
                Ok(record)
            }
            Err(error) => Err(error),
        }
    }

    // =========================================================================
    // Record cache
    // =========================================================================

    async fn get_cache(&self, cache: &dyn CacheClient, id: u64) -> Result<R> {
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

        let key = self.cache_key(id);
        match cache.get(&key).await? {
            Some(bytes) => {
                CACHE_HITS_TOTAL.with_label_values(&["record"]).inc();
                tracing::debug!(key = %key, "Record cache hit");
                Ok(serde_json::from_slice(&bytes)?)
            }
            None => {
                CACHE_MISSES_TOTAL.with_label_values(&["record"]).inc();
                tracing::debug!(key = %key, "Record cache miss");
                Err(ModelError::CacheMiss)
            }
        }
    }

    async fn update_cache(&self, cache: &dyn CacheClient, record: &R, id: u64) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        cache
            .set(&self.cache_key(id), bytes, self.settings.expire)
            .await
    }

    async fn delete_cache(&self, cache: &dyn CacheClient, id: u64) -> Result<()> {
        use crate::metrics::CACHE_INVALIDATIONS_TOTAL;

        let key = self.cache_key(id);
        let result = cache.del(&key).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        CACHE_INVALIDATIONS_TOTAL
            .with_label_values(&["record", status])
            .inc();
        tracing::debug!(key = %key, status, "Record cache invalidated");
        result
    }
}

fn count_error(error: &ModelError, operation: &str) {
    use crate::metrics::ERRORS_TOTAL;
    ERRORS_TOTAL
        .with_label_values(&[error.kind(), operation])
        .inc();
}
