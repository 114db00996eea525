//! Remote cache tier backed by Redis.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use async_trait::async_trait;
use redis::{Client, aio::ConnectionManager};
use smol_str::SmolStr;
use tokio::sync::OnceCell;
use tracing::trace;

use opsbox_core::ContentKind;

use crate::backend::{CacheBackend, CacheError, CacheResult, DeleteStatus};
use crate::entry::{CacheEntry, CacheKey};

/// Remote tier backed by Redis.
///
/// Entries are stored as hashes: the `d` field holds the payload bytes, `i`
/// the insertion timestamp (millis), `t` the original TTL (seconds). Redis's
/// own `EXPIRE` tracks the remaining lifetime, so reads also see entries
/// vanish server-side.
///
/// The connection is a multiplexed [`ConnectionManager`] established lazily
/// on first use; it reconnects with exponential backoff on failure, so a
/// Redis that is down at startup does not prevent the service from starting
/// memory-only.
#[derive(Clone)]
pub struct RemoteBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    namespace: SmolStr,
    label: SmolStr,
}

impl RemoteBackend {
    /// Creates a backend for the given Redis URL.
    ///
    /// Fails only on an invalid URL; connection errors surface lazily on
    /// first operation.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url).map_err(|e| CacheError::Connection(Box::new(e)))?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            namespace: SmolStr::new_static("opsbox"),
            label: SmolStr::new_static("remote"),
        })
    }

    /// Overrides the key namespace (default `opsbox`).
    pub fn with_namespace(mut self, namespace: impl Into<SmolStr>) -> Self {
        self.namespace = namespace.into();
        self
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .connection
            .get_or_try_init(|| {
                trace!("initializing redis connection manager");
                self.client.get_connection_manager()
            })
            .await
            .map_err(|e| CacheError::Connection(Box::new(e)))?;
        Ok(manager.clone())
    }

    fn storage_key(&self, key: &CacheKey) -> String {
        format!("{}:{}:{}", self.namespace, key.kind(), key.id())
    }

    fn kind_pattern(&self, kind: ContentKind) -> String {
        format!("{}:{}:*", self.namespace, kind)
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<()> {
        let mut con = self.connection().await?;
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut con)
                .await
                .map_err(|e| CacheError::Connection(Box::new(e)))?;
            if !keys.is_empty() {
                let mut cmd = redis::cmd("DEL");
                for key in &keys {
                    cmd.arg(key);
                }
                let _: i64 = cmd
                    .query_async(&mut con)
                    .await
                    .map_err(|e| CacheError::Connection(Box::new(e)))?;
            }
            cursor = next;
            if cursor == 0 {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RemoteBackend {
    async fn read(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let mut con = self.connection().await?;
        let storage_key = self.storage_key(key);

        let (data, inserted_ms, ttl_secs): (Option<Vec<u8>>, Option<i64>, Option<u64>) =
            redis::cmd("HMGET")
                .arg(&storage_key)
                .arg("d")
                .arg("i")
                .arg("t")
                .query_async(&mut con)
                .await
                .map_err(|e| CacheError::Connection(Box::new(e)))?;

        let Some(data) = data else {
            return Ok(None);
        };
        let (Some(inserted_ms), Some(ttl_secs)) = (inserted_ms, ttl_secs) else {
            return Err(CacheError::Corrupted(format!(
                "entry '{storage_key}' is missing metadata fields"
            )));
        };
        let Some(inserted_at) = DateTime::<Utc>::from_timestamp_millis(inserted_ms) else {
            return Err(CacheError::Corrupted(format!(
                "entry '{storage_key}' has invalid insertion timestamp {inserted_ms}"
            )));
        };

        Ok(Some(CacheEntry::from_parts(
            Bytes::from(data),
            key.kind(),
            inserted_at,
            std::time::Duration::from_secs(ttl_secs),
        )))
    }

    async fn write(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut con = self.connection().await?;
        let storage_key = self.storage_key(key);

        let mut pipe = redis::pipe();
        pipe.cmd("HSET")
            .arg(&storage_key)
            .arg("d")
            .arg(entry.payload().as_ref())
            .arg("i")
            .arg(entry.inserted_at().timestamp_millis())
            .arg("t")
            .arg(entry.ttl().as_secs())
            .ignore();
        pipe.cmd("EXPIRE")
            .arg(&storage_key)
            .arg(entry.ttl().as_secs().max(1))
            .ignore();
        pipe.query_async::<()>(&mut con)
            .await
            .map_err(|e| CacheError::Connection(Box::new(e)))?;
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> CacheResult<DeleteStatus> {
        let mut con = self.connection().await?;
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.storage_key(key))
            .query_async(&mut con)
            .await
            .map_err(|e| CacheError::Connection(Box::new(e)))?;
        if deleted > 0 {
            Ok(DeleteStatus::Deleted)
        } else {
            Ok(DeleteStatus::Missing)
        }
    }

    async fn clear(&self) -> CacheResult<()> {
        let pattern = format!("{}:*", self.namespace);
        self.delete_matching(&pattern).await
    }

    async fn clear_kind(&self, kind: ContentKind) -> CacheResult<()> {
        self.delete_matching(&self.kind_pattern(kind)).await
    }

    fn label(&self) -> &str {
        &self.label
    }
}
