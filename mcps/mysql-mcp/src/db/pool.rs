//! Connection Pool Manager
//!
//! Owns at most one pool. Other components borrow it per operation through
//! [`PoolManager::get`].

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::{DbPool, DbSession, PoolFactory, PoolOptions};
use crate::error::{Error, Result};

/// Shared handle to the active pool
#[derive(Clone)]
pub struct PoolHandle(Arc<dyn DbPool>);

impl PoolHandle {
    pub async fn acquire(&self) -> Result<Box<dyn DbSession>> {
        self.0.acquire().await
    }

    /// True when both handles refer to the same underlying pool
    pub fn same_pool(&self, other: &PoolHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl std::fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PoolHandle")
    }
}

/// Singleton-or-absent owner of the database pool
pub struct PoolManager {
    factory: Arc<dyn PoolFactory>,
    active: RwLock<Option<PoolHandle>>,
    // Serializes initialize/close so two callers never build two pools
    transition: Mutex<()>,
}

impl PoolManager {
    pub fn new(factory: Arc<dyn PoolFactory>) -> Self {
        Self {
            factory,
            active: RwLock::new(None),
            transition: Mutex::new(()),
        }
    }

    /// Build the pool and verify the database is reachable
    ///
    /// Calling this again while a pool exists returns the existing handle.
    /// On failure no pool is kept.
    pub async fn initialize(&self, options: &PoolOptions) -> Result<PoolHandle> {
        let _guard = self.transition.lock().await;

        if let Some(existing) = self.active.read().await.as_ref() {
            tracing::warn!("Database pool already initialized");
            return Ok(existing.clone());
        }

        tracing::info!(
            host = %options.host,
            port = options.port,
            database = %options.database,
            max_connections = options.max_connections,
            "Initializing database connection pool"
        );

        let pool = self
            .factory
            .build(options)
            .map_err(|e| Error::Pool(e.to_string()))?;

        match tokio::time::timeout(options.connect_timeout, pool.acquire()).await {
            Ok(Ok(session)) => {
                tracing::debug!("Database connection test successful, releasing test connection");
                drop(session);
            }
            Ok(Err(e)) => {
                pool.close().await;
                tracing::error!(error = %e, "Failed to initialize database connection pool");
                return Err(Error::Pool(e.to_string()));
            }
            Err(_) => {
                pool.close().await;
                let msg = format!(
                    "connection test timed out after {}s",
                    options.connect_timeout.as_secs()
                );
                tracing::error!("Failed to initialize database connection pool: {}", msg);
                return Err(Error::Pool(msg));
            }
        }

        let handle = PoolHandle(pool);
        *self.active.write().await = Some(handle.clone());
        tracing::info!("Database connection pool initialized");
        Ok(handle)
    }

    /// Borrow the active pool
    pub async fn get(&self) -> Result<PoolHandle> {
        self.active.read().await.clone().ok_or(Error::NotInitialized)
    }

    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Close the pool if there is one
    ///
    /// Waits for in-flight sessions to be returned before releasing all
    /// connections. Never fails.
    pub async fn close(&self) {
        let _guard = self.transition.lock().await;
        let taken = self.active.write().await.take();

        match taken {
            Some(handle) => {
                tracing::info!("Closing database connection pool");
                handle.0.close().await;
                tracing::info!("Database connection pool closed");
            }
            None => tracing::info!("Database pool was not active, skipping closure"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_options, FakeFactory, FakeLog};

    #[tokio::test]
    async fn test_get_before_initialize_fails() {
        let manager = PoolManager::new(Arc::new(FakeFactory::new(FakeLog::default())));
        assert!(matches!(manager.get().await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_initialize_verifies_reachability() {
        let log = FakeLog::default();
        let manager = PoolManager::new(Arc::new(FakeFactory::new(log.clone())));

        manager.initialize(&test_options()).await.unwrap();

        assert_eq!(log.pools_built(), 1);
        assert_eq!(log.acquired(), 1);
        assert_eq!(log.released(), 1);
        assert!(manager.get().await.is_ok());
    }

    #[tokio::test]
    async fn test_initialize_twice_returns_same_pool() {
        let log = FakeLog::default();
        let manager = PoolManager::new(Arc::new(FakeFactory::new(log.clone())));

        let first = manager.initialize(&test_options()).await.unwrap();
        let second = manager.initialize(&test_options()).await.unwrap();

        assert!(first.same_pool(&second));
        assert_eq!(log.pools_built(), 1);
    }

    #[tokio::test]
    async fn test_failed_reachability_discards_pool() {
        let log = FakeLog::default();
        let factory = FakeFactory::new(log.clone()).unreachable();
        let manager = PoolManager::new(Arc::new(factory));

        let err = manager.initialize(&test_options()).await.unwrap_err();

        assert!(matches!(err, Error::Pool(_)));
        assert!(err.to_string().starts_with("Database initialization failed"));
        assert_eq!(log.pools_closed(), 1);
        assert!(matches!(manager.get().await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let log = FakeLog::default();
        let manager = PoolManager::new(Arc::new(FakeFactory::new(log.clone())));

        manager.close().await;
        manager.initialize(&test_options()).await.unwrap();
        manager.close().await;
        manager.close().await;

        assert_eq!(log.pools_closed(), 1);
        assert!(!manager.is_active().await);
    }
}
