//! Recording fakes of the database capability traits (test-only)

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::Secret;
use crate::db::{DbPool, DbSession, PoolFactory, PoolManager, PoolOptions, Row};
use crate::error::{Error, Result};

pub type Responder = Arc<dyn Fn(&str, &[&str]) -> Result<Vec<Row>> + Send + Sync>;

#[derive(Default)]
struct LogInner {
    pools_built: usize,
    pools_closed: usize,
    acquired: usize,
    released: usize,
    events: Vec<String>,
    queries: Vec<(String, Vec<String>)>,
}

/// Shared record of everything the fakes were asked to do
#[derive(Clone, Default)]
pub struct FakeLog(Arc<Mutex<LogInner>>);

impl FakeLog {
    fn with<R>(&self, f: impl FnOnce(&mut LogInner) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }

    pub fn pools_built(&self) -> usize {
        self.with(|l| l.pools_built)
    }

    pub fn pools_closed(&self) -> usize {
        self.with(|l| l.pools_closed)
    }

    pub fn acquired(&self) -> usize {
        self.with(|l| l.acquired)
    }

    pub fn released(&self) -> usize {
        self.with(|l| l.released)
    }

    /// Transaction-level events in order: BEGIN READ ONLY, FETCH, ROLLBACK, ABORT
    pub fn events(&self) -> Vec<String> {
        self.with(|l| l.events.clone())
    }

    /// Every fetched statement with its bound parameters
    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.with(|l| l.queries.clone())
    }
}

/// Factory producing [`FakePool`]s that share one log
#[derive(Clone)]
pub struct FakeFactory {
    log: FakeLog,
    unreachable: bool,
    delay: Option<Duration>,
    responder: Responder,
}

impl FakeFactory {
    pub fn new(log: FakeLog) -> Self {
        Self {
            log,
            unreachable: false,
            delay: None,
            responder: Arc::new(|_, _| Ok(Vec::new())),
        }
    }

    /// Every acquire fails
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Each fetch sleeps this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn responding(
        mut self,
        responder: impl Fn(&str, &[&str]) -> Result<Vec<Row>> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Arc::new(responder);
        self
    }
}

impl PoolFactory for FakeFactory {
    fn build(&self, _options: &PoolOptions) -> Result<Arc<dyn DbPool>> {
        self.log.with(|l| l.pools_built += 1);
        Ok(Arc::new(FakePool {
            factory: self.clone(),
        }))
    }
}

pub struct FakePool {
    factory: FakeFactory,
}

#[async_trait]
impl DbPool for FakePool {
    async fn acquire(&self) -> Result<Box<dyn DbSession>> {
        if self.factory.unreachable {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        self.factory.log.with(|l| l.acquired += 1);
        Ok(Box::new(FakeSession {
            factory: self.factory.clone(),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        self.factory.log.with(|l| l.pools_closed += 1);
    }
}

pub struct FakeSession {
    factory: FakeFactory,
    in_transaction: bool,
}

#[async_trait]
impl DbSession for FakeSession {
    async fn begin_read_only(&mut self) -> Result<()> {
        self.in_transaction = true;
        self.factory
            .log
            .with(|l| l.events.push("BEGIN READ ONLY".to_string()));
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.factory.log.with(|l| l.events.push("ROLLBACK".to_string()));
        Ok(())
    }

    async fn fetch(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
        self.factory.log.with(|l| {
            l.events.push(format!("FETCH {}", sql));
            l.queries.push((
                sql.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            ));
        });
        if let Some(delay) = self.factory.delay {
            tokio::time::sleep(delay).await;
        }
        (self.factory.responder)(sql, params)
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        let aborted = self.in_transaction;
        self.factory.log.with(|l| {
            l.released += 1;
            if aborted {
                l.events.push("ABORT".to_string());
            }
        });
    }
}

pub fn test_options() -> PoolOptions {
    PoolOptions {
        host: "127.0.0.1".to_string(),
        port: 3306,
        user: "reader".to_string(),
        password: Secret::new("pw"),
        database: "mydb".to_string(),
        max_connections: 10,
        connect_timeout: Duration::from_secs(1),
    }
}

/// A pool manager whose pool is already up, built from `factory`
pub async fn initialized_manager(factory: FakeFactory) -> Arc<PoolManager> {
    let manager = Arc::new(PoolManager::new(Arc::new(factory)));
    manager.initialize(&test_options()).await.unwrap();
    manager
}

/// Build a row from `(column, value)` pairs
pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
