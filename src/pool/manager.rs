//! Pool Manager
//!
//! Idle `may_postgres` clients wait in a crossbeam channel. Connections are opened
//! lazily, up to `max_connections`; once that many exist, acquisition waits on the
//! channel for at most `pool_timeout_seconds`. A checked-out connection is a
//! [`Lease`] that sends its client back to the channel when dropped. A lease whose
//! connection failed at the connection level closes the client instead and frees
//! its slot, so the next acquisition opens a fresh connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::warn;
use may_postgres::Client;
use serde_json::Value;

use super::config::DatabaseConfig;
use super::types::{ConnectionPool, PooledConnection};
use crate::connection::{connect, validate_connection_string};
use crate::error::OrmError;
use crate::executor::{Executor, PgExecutor, QueryResult};

#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;
#[cfg(feature = "metrics")]
use crate::metrics::METRICS;

const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct DbPool {
    url: String,
    max_connections: usize,
    timeout: Duration,
    idle_tx: Sender<Client>,
    idle_rx: Receiver<Client>,
    opened: AtomicUsize,
}

impl DbPool {
    /// Create a pool; no connection is opened until the first acquisition
    ///
    /// # Errors
    ///
    /// Returns an error when the connection string is malformed or
    /// `max_connections` is zero.
    pub fn new(config: &DatabaseConfig) -> Result<Self, OrmError> {
        validate_connection_string(&config.url)?;
        if config.max_connections == 0 {
            return Err(OrmError::config("max_connections must be at least 1"));
        }
        let (idle_tx, idle_rx) = unbounded();
        Ok(Self {
            url: config.url.clone(),
            max_connections: config.max_connections,
            timeout: Duration::from_secs(config.pool_timeout_seconds),
            idle_tx,
            idle_rx,
            opened: AtomicUsize::new(0),
        })
    }

    fn release(&self, client: Client, broken: bool) {
        if broken {
            warn!("discarding broken pooled connection");
            drop(client);
            self.opened.fetch_sub(1, Ordering::AcqRel);
        } else {
            // The receiver lives in the same pool, so the send cannot fail while `self` is borrowed
            let _ = self.idle_tx.send(client);
        }
    }

    /// Reserve a slot and open a connection, or `None` when the pool is full
    fn open(&self) -> Option<Result<Client, OrmError>> {
        // Reserve before connecting so concurrent callers cannot overshoot
        self.opened
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |opened| {
                (opened < self.max_connections).then_some(opened + 1)
            })
            .ok()?;
        Some(connect(&self.url).map_err(|e| {
            self.opened.fetch_sub(1, Ordering::AcqRel);
            OrmError::from(e)
        }))
    }

    fn checkout(&self) -> Result<Client, OrmError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Ok(client) = self.idle_rx.try_recv() {
                return Ok(client);
            }
            if let Some(opened) = self.open() {
                return opened;
            }

            // Wake up periodically: a discarded connection frees a slot without
            // sending anything on the channel
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(OrmError::Pool(format!(
                    "no connection available after {}s ({} in use)",
                    self.timeout.as_secs(),
                    self.max_connections
                )));
            }
            match self.idle_rx.recv_timeout(remaining.min(SLOT_POLL_INTERVAL)) {
                Ok(client) => return Ok(client),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(OrmError::Pool("pool is shut down".to_string()))
                }
            }
        }
    }
}

impl ConnectionPool for DbPool {
    fn acquire(&self) -> Result<PooledConnection<'_>, OrmError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::acquire_connection_span().entered();
        #[cfg(feature = "metrics")]
        let start = Instant::now();

        let client = self.checkout()?;

        #[cfg(feature = "metrics")]
        METRICS.record_connection_wait(start.elapsed());

        Ok(Box::new(Lease {
            executor: Some(PgExecutor::new(client)),
            broken: AtomicBool::new(false),
            pool: self,
        }))
    }
}

/// A checked-out connection
struct Lease<'p> {
    executor: Option<PgExecutor>,
    broken: AtomicBool,
    pool: &'p DbPool,
}

impl Lease<'_> {
    fn executor(&self) -> Result<&PgExecutor, OrmError> {
        self.executor
            .as_ref()
            .ok_or_else(|| OrmError::Pool("connection already released".to_string()))
    }

    fn track<T>(&self, result: Result<T, OrmError>) -> Result<T, OrmError> {
        if let Err(err) = &result {
            if err.is_connection_failure() {
                self.broken.store(true, Ordering::Release);
            }
        }
        result
    }
}

impl Executor for Lease<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, OrmError> {
        self.track(self.executor()?.query(sql, params))
    }

    fn execute(&self, sql: &str) -> Result<u64, OrmError> {
        self.track(self.executor()?.execute(sql))
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(executor) = self.executor.take() {
            self.pool
                .release(executor.into_client(), self.broken.load(Ordering::Acquire));
        }
    }
}
