//! Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use recordcache::{
    AccessorSettings, CacheClient, Database, HookContext, LinkFinder, MemoryCache, ModelError,
    Record, RecordAccessor, RecordHooks, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const PREFIX: &str = "test:user:";

// =============================================================================
// Sample record
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub age: i64,
    pub active: bool,
    pub deleted_at: Option<DateTime<FixedOffset>>,
    /// Hooks attached by the test; never persisted
    #[serde(skip)]
    #[sqlx(skip)]
    pub probe: Option<Arc<HookProbe>>,
}

impl User {
    pub fn new(email: &str, name: &str, age: i64) -> Self {
        Self {
            email: email.to_string(),
            name: name.to_string(),
            age,
            active: true,
            ..Default::default()
        }
    }

    pub fn with_probe(mut self, probe: Arc<HookProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// Persisted fields only; the attached probe is ignored
impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.email == other.email
            && self.name == other.name
            && self.age == other.age
            && self.active == other.active
            && self.deleted_at == other.deleted_at
    }
}

impl Record for User {
    const TABLE: &'static str = "users";

    fn id(&self) -> u64 {
        self.id as u64
    }

    fn set_id(&mut self, id: u64) {
        self.id = id as i64;
    }

    fn deleted_at(&self) -> Option<DateTime<FixedOffset>> {
        self.deleted_at
    }

    fn hooks(&self) -> Option<&dyn RecordHooks> {
        self.probe.as_deref().map(|probe| probe as &dyn RecordHooks)
    }
}

// =============================================================================
// Hooks
// =============================================================================

/// Records every hook call and the live row count the hook observed
#[derive(Debug, Default)]
pub struct HookProbe {
    pub calls: Mutex<Vec<&'static str>>,
    pub live_rows: AtomicI64,
    pub fail: bool,
}

impl HookProbe {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    async fn observe(&self, name: &'static str, ctx: &HookContext<'_>) -> Result<()> {
        self.calls.lock().unwrap().push(name);

        let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE deleted_at IS NULL")
            .fetch_one(ctx.db.pool())
            .await?;
        self.live_rows.store(live, Ordering::SeqCst);

        if self.fail {
            return Err(ModelError::Hook(anyhow::anyhow!("{name} rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordHooks for HookProbe {
    async fn after_update_by_id(&self, ctx: &HookContext<'_>) -> Result<()> {
        self.observe("AfterUpdateById", ctx).await
    }

    async fn after_save_by_id(&self, ctx: &HookContext<'_>) -> Result<()> {
        self.observe("AfterSaveById", ctx).await
    }

    async fn after_delete_by_id(&self, ctx: &HookContext<'_>) -> Result<()> {
        self.observe("AfterDeleteById", ctx).await
    }

    async fn after_soft_delete_by_id(&self, ctx: &HookContext<'_>) -> Result<()> {
        self.observe("AfterSoftDeleteById", ctx).await
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Memory cache that counts calls and can be told to fail deletes
pub struct CountingCache {
    pub inner: MemoryCache,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    pub dels: AtomicUsize,
    failing_deletes: Mutex<Option<String>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self {
            inner: MemoryCache::new(1_000),
            gets: AtomicUsize::new(0),
            sets: AtomicUsize::new(0),
            dels: AtomicUsize::new(0),
            failing_deletes: Mutex::new(None),
        }
    }

    /// Make `del` fail for every key containing `fragment`
    pub fn fail_deletes_containing(&self, fragment: &str) {
        *self.failing_deletes.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn calls(&self) -> (usize, usize, usize) {
        (
            self.gets.load(Ordering::SeqCst),
            self.sets.load(Ordering::SeqCst),
            self.dels.load(Ordering::SeqCst),
        )
    }

    /// Read a key without touching the counters
    pub async fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key).await.unwrap()
    }
}

#[async_trait]
impl CacheClient for CountingCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.dels.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_deletes.lock().unwrap().clone();
        if let Some(fragment) = failing {
            if key.contains(&fragment) {
                return Err(ModelError::Cache(format!("refusing to delete {key}")));
            }
        }
        self.inner.del(key).await
    }
}

// =============================================================================
// Link finders
// =============================================================================

/// Resolves users by email, soft-deleted rows included
#[derive(Default)]
pub struct UserByEmail {
    pub calls: AtomicUsize,
}

impl UserByEmail {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinkFinder<User> for UserByEmail {
    async fn find(&self, db: &Database, field: &str) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ? LIMIT 1")
            .bind(field)
            .fetch_optional(db.pool())
            .await?;
        Ok(id.unwrap_or(0) as u64)
    }

    fn field_value(&self, record: &User) -> String {
        record.email.clone()
    }
}

/// Resolves users by name
#[derive(Default)]
pub struct UserByName;

#[async_trait]
impl LinkFinder<User> for UserByName {
    async fn find(&self, db: &Database, field: &str) -> Result<u64> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE name = ? LIMIT 1")
            .bind(field)
            .fetch_optional(db.pool())
            .await?;
        Ok(id.unwrap_or(0) as u64)
    }

    fn field_value(&self, record: &User) -> String {
        record.name.clone()
    }
}

// =============================================================================
// Context
// =============================================================================

/// Database, counting cache and finders shared by one test
pub struct TestContext {
    pub db: Arc<Database>,
    pub cache: Arc<CountingCache>,
    pub by_email: Arc<UserByEmail>,
    pub _temp_dir: TempDir,
}

impl TestContext {
    /// Create a fresh database with the `users` table
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::connect(&db_path, 1).await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                age INTEGER NOT NULL DEFAULT 0,
                active BOOLEAN NOT NULL DEFAULT 0,
                deleted_at TEXT
            )
            "#,
        )
        .execute(db.pool())
        .await
        .unwrap();

        Self {
            db: Arc::new(db),
            cache: Arc::new(CountingCache::new()),
            by_email: Arc::new(UserByEmail::default()),
            _temp_dir: temp_dir,
        }
    }

    fn cache_handle(&self) -> Arc<dyn CacheClient> {
        self.cache.clone()
    }

    /// Cached accessor with `email` and `name` links
    pub fn users(&self) -> RecordAccessor<User> {
        self.users_with(AccessorSettings::cached(PREFIX, Duration::from_secs(60)))
    }

    /// Accessor holding the cache handle with record caching off
    pub fn uncached_users(&self) -> RecordAccessor<User> {
        self.users_with(AccessorSettings::default())
    }

    fn users_with(&self, settings: AccessorSettings) -> RecordAccessor<User> {
        RecordAccessor::with_cache(self.db.clone(), self.cache_handle(), settings)
            .with_link("email", self.by_email.clone())
            .with_link("name", Arc::new(UserByName))
    }

    /// Insert a user directly and return it with its id
    pub async fn insert_user(&self, email: &str, name: &str, age: i64) -> User {
        let mut user = User::new(email, name, age);
        let id = self.db.insert(&user).await.unwrap();
        user.id = id as i64;
        user
    }
}
