//! Link resolver
//!
//! A link maps a field value (an email, a slug, an external id) to the id
//! of the row that owns it. Links live in the cache under
//! `{prefix}{link_type}:{field}` for seven days or until the owning row is
//! written through the accessor. On a miss the registered `LinkFinder`
//! asks the store directly.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::accessor::RecordAccessor;
use crate::data::{Database, Record, link_key};
use crate::error::{ModelError, Result};

/// Lifetime of a link entry (7 days)
pub const LINK_TTL: Duration = Duration::from_secs(3600 * 24 * 7);

/// Resolves one kind of link for records of type `R`
#[async_trait]
pub trait LinkFinder<R>: Send + Sync {
    /// Id of the row whose field equals `field`, or 0 when there is none
    async fn find(&self, db: &Database, field: &str) -> Result<u64>;

    /// The field value this link indexes on `record`
    fn field_value(&self, record: &R) -> String;
}

// =============================================================================
// Registry
// =============================================================================

/// Link type -> finder, iterated in link type order
pub struct LinkRegistry<R> {
    finders: BTreeMap<String, Arc<dyn LinkFinder<R>>>,
}

impl<R> LinkRegistry<R> {
    pub fn new() -> Self {
        Self {
            finders: BTreeMap::new(),
        }
    }

    /// Add or replace the finder for `link_type`
    pub fn register(&mut self, link_type: impl Into<String>, finder: Arc<dyn LinkFinder<R>>) {
        self.finders.insert(link_type.into(), finder);
    }

    pub fn get(&self, link_type: &str) -> Option<&Arc<dyn LinkFinder<R>>> {
        self.finders.get(link_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn LinkFinder<R>>)> {
        self.finders
            .iter()
            .map(|(link_type, finder)| (link_type.as_str(), finder))
    }

    pub fn len(&self) -> usize {
        self.finders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finders.is_empty()
    }
}

impl<R> Clone for LinkRegistry<R> {
    fn clone(&self) -> Self {
        Self {
            finders: self.finders.clone(),
        }
    }
}

impl<R> Default for LinkRegistry<R> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Lookups
// =============================================================================

impl<R: Record> RecordAccessor<R> {
    /// Cache key of a link
    pub fn link_key(&self, link_type: &str, field: &str) -> String {
        link_key(&self.settings().prefix, link_type, field)
    }

    /// Fetch a record through a link
    ///
    /// # Returns
    /// `None` when neither the cache nor the finder knows the field
    ///
    /// # Errors
    /// `ModelError::Config` for an unregistered link type, before any
    /// store or cache call. Finder, link-creation and fetch errors.
    pub async fn first_by_link(&self, link_type: &str, field: &str) -> Result<Option<R>> {
        let id = self.resolve_link(link_type, field).await?;
        if id == 0 {
            return Ok(None);
        }
        self.first_by_id(id).await.map(Some)
    }

    /// Fetch a record through a link, soft-delete variant
    ///
    /// Resolves exactly like `first_by_link` and fetches with
    /// `first_by_id`, so a soft-deleted row is still returned.
    pub async fn first_by_link_sd(&self, link_type: &str, field: &str) -> Result<Option<R>> {
        let id = self.resolve_link(link_type, field).await?;
        if id == 0 {
            return Ok(None);
        }
        self.first_by_id(id).await.map(Some)
    }

    /// Id behind `field`, from the link cache or the finder
    async fn resolve_link(&self, link_type: &str, field: &str) -> Result<u64> {
        let finder = self
            .links()
            .get(link_type)
            .ok_or_else(|| ModelError::Config(format!("unknown link type `{link_type}`")))?;

        let cached = match self.get_link(link_type, field).await {
            Ok(id) => id.unwrap_or(0),
            Err(error) => {
                tracing::debug!(
                    link_type,
                    %error,
                    "Link lookup failed; resolving through finder"
                );
                0
            }
        };
        if cached > 0 {
            return Ok(cached);
        }

        let id = finder.find(self.db(), field).await?;
        if id > 0 {
            self.create_link(id, link_type, field).await?;
        }
        Ok(id)
    }

    // =========================================================================
    // Link cache
    // =========================================================================

    /// Read a link
    ///
    /// Absent or unparsable entries read as `None`. Without a cache handle
    /// every link is absent.
    ///
    /// # Errors
    /// `ModelError::Config` when `field` is empty; cache backend errors
    pub async fn get_link(&self, link_type: &str, field: &str) -> Result<Option<u64>> {
        use crate::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};

        if field.is_empty() {
            return Err(ModelError::missing_parameter("get_link", "field"));
        }
        let Some(cache) = self.cache() else {
            return Ok(None);
        };

        let key = self.link_key(link_type, field);
        let Some(bytes) = cache.get(&key).await? else {
            CACHE_MISSES_TOTAL.with_label_values(&["link"]).inc();
            return Ok(None);
        };

        let parsed = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| text.trim().parse::<u64>().ok());
        match parsed {
            Some(id) if id > 0 => {
                CACHE_HITS_TOTAL.with_label_values(&["link"]).inc();
                tracing::debug!(key = %key, id, "Link cache hit");
                Ok(Some(id))
            }
            _ => {
                CACHE_MISSES_TOTAL.with_label_values(&["link"]).inc();
                tracing::warn!(key = %key, "Ignoring unparsable link entry");
                Ok(None)
            }
        }
    }

    /// Write a link with the fixed 7 day TTL
    ///
    /// # Errors
    /// `ModelError::Config` when `id` is 0 or `field` is empty
    pub async fn create_link(&self, id: u64, link_type: &str, field: &str) -> Result<()> {
        if id == 0 {
            return Err(ModelError::missing_parameter("create_link", "id"));
        }
        if field.is_empty() {
            return Err(ModelError::missing_parameter("create_link", "field"));
        }
        let Some(cache) = self.cache() else {
            return Ok(());
        };

        let key = self.link_key(link_type, field);
        cache.set(&key, id.to_string().into_bytes(), LINK_TTL).await?;
        tracing::debug!(key = %key, id, "Link created");
        Ok(())
    }

    /// Remove a link
    ///
    /// # Errors
    /// `ModelError::Config` when `field` is empty; cache backend errors
    pub async fn delete_link(&self, link_type: &str, field: &str) -> Result<()> {
        use crate::metrics::CACHE_INVALIDATIONS_TOTAL;

        if field.is_empty() {
            return Err(ModelError::missing_parameter("delete_link", "field"));
        }
        let Some(cache) = self.cache() else {
            return Ok(());
        };

        let result = cache.del(&self.link_key(link_type, field)).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        CACHE_INVALIDATIONS_TOTAL
            .with_label_values(&["link", status])
            .inc();
        result
    }
}
