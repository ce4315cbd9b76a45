//! Resource persistence.
//!
//! The control plane persists one JSON document per application instance in a
//! key-value store, plus a date-bucketed "changed" index listing resources
//! whose realtime status changed through health reporting.
//!
//! Key layout per kind (prefix e.g. `/hostpilot/database`):
//!
//! ```text
//! {prefix}/{name}                      resource document
//! {prefix}/{changed}/{MMDD}/{name}     changed-index entry (value: RFC 3339 timestamp)
//! ```

mod error;
mod memory;
mod sqlite;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use hostpilot_model::{ApplicationResource, Kind};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Format of changed-index date buckets.
pub const BUCKET_FORMAT: &str = "%m%d";

/// Minimal key-value contract the control plane needs from its backing store.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Insert only if the key is absent. Returns false if it already existed.
    async fn create(&self, key: &str, value: &str) -> StoreResult<bool>;

    /// Returns false if the key did not exist.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, String)>>;
}

/// Render a date as a changed-index bucket name.
pub fn bucket_for(date: NaiveDate) -> String {
    date.format(BUCKET_FORMAT).to_string()
}

/// Returns true if `bucket` looks like an `MMDD` bucket name.
pub fn is_valid_bucket(bucket: &str) -> bool {
    if bucket.len() != 4 || !bucket.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    // Leap year so that 0229 is accepted.
    NaiveDate::parse_from_str(&format!("2024{bucket}"), "%Y%m%d").is_ok()
}

/// Typed access to one kind's namespace.
#[derive(Clone)]
pub struct ResourceStore {
    kind: Kind,
    kv: Arc<dyn KvStore>,
    prefix: String,
    changed_prefix: String,
}

impl ResourceStore {
    pub fn new(
        kind: Kind,
        kv: Arc<dyn KvStore>,
        prefix: impl Into<String>,
        changed_subprefix: &str,
    ) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        let changed_prefix = format!("{prefix}/{}", changed_subprefix.trim_matches('/'));
        Self {
            kind,
            kv,
            prefix,
            changed_prefix,
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Round-trip a read against the backing store.
    pub async fn probe(&self) -> StoreResult<()> {
        self.kv.get(&self.prefix).await.map(|_| ())
    }

    fn resource_key(&self, name: &str) -> String {
        format!("{}/{}", self.prefix, name)
    }

    fn bucket_prefix(&self, bucket: &str) -> String {
        format!("{}/{}/", self.changed_prefix, bucket)
    }

    pub async fn get(&self, name: &str) -> StoreResult<Option<ApplicationResource>> {
        match self.kv.get(&self.resource_key(name)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert a new resource. Returns false if the name is taken.
    pub async fn create(&self, resource: &ApplicationResource) -> StoreResult<bool> {
        let raw = serde_json::to_string(resource)?;
        self.kv.create(&self.resource_key(&resource.name), &raw).await
    }

    pub async fn put(&self, resource: &ApplicationResource) -> StoreResult<()> {
        let raw = serde_json::to_string(resource)?;
        self.kv.put(&self.resource_key(&resource.name), &raw).await
    }

    /// Delete a resource and every changed-index entry naming it.
    pub async fn delete(&self, name: &str) -> StoreResult<bool> {
        let existed = self.kv.delete(&self.resource_key(name)).await?;

        let suffix = format!("/{name}");
        let entries = self
            .kv
            .list_prefix(&format!("{}/", self.changed_prefix))
            .await?;
        for (key, _) in entries.iter().filter(|(key, _)| key.ends_with(&suffix)) {
            self.kv.delete(key).await?;
        }

        Ok(existed)
    }

    /// Record `name` in the bucket for the date of `at`.
    pub async fn record_changed(&self, name: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let key = format!(
            "{}{}",
            self.bucket_prefix(&bucket_for(at.date_naive())),
            name
        );
        self.kv.put(&key, &at.to_rfc3339()).await
    }

    /// Names recorded in `bucket`, ordered.
    pub async fn changed_names(&self, bucket: &str) -> StoreResult<Vec<String>> {
        let prefix = self.bucket_prefix(bucket);
        let entries = self.kv.list_prefix(&prefix).await?;
        Ok(entries
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Distinct bucket names currently present in the changed index.
    pub async fn changed_buckets(&self) -> StoreResult<Vec<String>> {
        let prefix = format!("{}/", self.changed_prefix);
        let entries = self.kv.list_prefix(&prefix).await?;
        let buckets: BTreeSet<String> = entries
            .iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(str::to_string)
            .collect();
        Ok(buckets.into_iter().collect())
    }

    /// Remove every entry of `bucket`. Returns the number of entries removed.
    pub async fn delete_bucket(&self, bucket: &str) -> StoreResult<u64> {
        let entries = self.kv.list_prefix(&self.bucket_prefix(bucket)).await?;
        let mut deleted = 0;
        for (key, _) in entries {
            if self.kv.delete(&key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

/// One `ResourceStore` per kind, sharing a backing store.
#[derive(Clone)]
pub struct KindStores {
    database: ResourceStore,
    middleware: ResourceStore,
}

impl KindStores {
    pub fn new(
        kv: Arc<dyn KvStore>,
        database_prefix: &str,
        middleware_prefix: &str,
        changed_subprefix: &str,
    ) -> Self {
        Self {
            database: ResourceStore::new(
                Kind::Database,
                kv.clone(),
                database_prefix,
                changed_subprefix,
            ),
            middleware: ResourceStore::new(Kind::Middleware, kv, middleware_prefix, changed_subprefix),
        }
    }

    pub fn get(&self, kind: Kind) -> &ResourceStore {
        match kind {
            Kind::Database => &self.database,
            Kind::Middleware => &self.middleware,
        }
    }

    pub fn all(&self) -> [&ResourceStore; 2] {
        [&self.database, &self.middleware]
    }
}
