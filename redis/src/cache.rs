//! Read-through user cache.
//!
//! Users are cached as JSON under `usuario:{id}` with a TTL (one hour by
//! default). Cache failures are logged and fall through to the backing
//! directory; they never fail a lookup. Nothing about ticket state is ever
//! read from here.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use thiserror::Error;

use helpdesk_core::directory::UserDirectory;
use helpdesk_core::store::StoreFuture;
use helpdesk_core::{User, UserId};

/// Errors from setting up the user cache.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("User cache connection failed: {0}")]
    ConnectionFailed(String),
}

/// [`UserDirectory`] that caches single-user lookups in Redis.
#[derive(Clone)]
pub struct CachedUserDirectory {
    inner: Arc<dyn UserDirectory>,
    conn: ConnectionManager,
    ttl: Duration,
}

impl CachedUserDirectory {
    /// Wrap `inner` with a cache at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::ConnectionFailed`] if the connection fails.
    pub async fn new(redis_url: &str, inner: Arc<dyn UserDirectory>) -> Result<Self, CacheError> {
        let client = Client::open(redis_url).map_err(|e| {
            CacheError::ConnectionFailed(format!("Failed to create Redis client: {e}"))
        })?;

        let conn = ConnectionManager::new(client).await.map_err(|e| {
            CacheError::ConnectionFailed(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            inner,
            conn,
            ttl: Duration::from_secs(3600),
        })
    }

    /// Set how long cached entries live (default one hour).
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Get the Redis key for a user.
    #[must_use]
    pub fn user_key(id: UserId) -> String {
        format!("usuario:{id}")
    }

    /// Drop a cached user.
    pub async fn invalidate(&self, id: UserId) {
        let mut conn = self.conn.clone();
        if let Err(e) = conn.del::<_, ()>(Self::user_key(id)).await {
            tracing::warn!(user_id = %id, error = %e, "Failed to invalidate cached user");
        }
    }

    async fn cached(&self, id: UserId) -> Option<User> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(Self::user_key(id)).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(user_id = %id, error = %e, "User cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw?) {
            Ok(user) => Some(user),
            Err(e) => {
                tracing::warn!(user_id = %id, error = %e, "Ignoring unreadable cached user");
                None
            }
        }
    }

    async fn store(&self, user: &User) {
        let json = match serde_json::to_string(user) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(user_id = %user.id, error = %e, "Failed to serialize user for cache");
                return;
            }
        };

        let mut conn = self.conn.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::user_key(user.id), json, self.ttl.as_secs())
            .await
        {
            tracing::warn!(user_id = %user.id, error = %e, "User cache write failed");
        }
    }

    async fn find_user_cached(&self, id: UserId) -> Result<Option<User>, helpdesk_core::StoreError> {
        if let Some(user) = self.cached(id).await {
            tracing::debug!(user_id = %id, "User cache hit");
            return Ok(Some(user));
        }

        let user = self.inner.find_user(id).await?;
        if let Some(user) = &user {
            self.store(user).await;
        }
        Ok(user)
    }
}

impl std::fmt::Debug for CachedUserDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedUserDirectory")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl UserDirectory for CachedUserDirectory {
    fn find_user(&self, id: UserId) -> StoreFuture<'_, Option<User>> {
        Box::pin(self.find_user_cached(id))
    }

    fn list_users(&self) -> StoreFuture<'_, Vec<User>> {
        self.inner.list_users()
    }
}
