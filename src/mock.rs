//! In-memory executor and pool for unit tests
//!
//! [`MockExecutor`] records every statement with its parameters and answers from
//! a queue of prepared results; an empty queue answers with an empty result.
//! [`MockPool`] hands out leases on one shared [`MockExecutor`] and counts how
//! many were acquired and released.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::error::{DbError, OrmError};
use crate::executor::{Executor, QueryResult};
use crate::pool::{ConnectionPool, PooledConnection};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct MockExecutor {
    results: Mutex<VecDeque<Result<QueryResult, OrmError>>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next statement with `result`
    pub fn push_result(&self, result: QueryResult) {
        lock(&self.results).push_back(Ok(result));
    }

    /// Fail the next statement with `error`
    pub fn push_error(&self, error: DbError) {
        lock(&self.results).push_back(Err(OrmError::Database(error)));
    }

    /// SQL of every statement run so far
    pub fn statements(&self) -> Vec<String> {
        lock(&self.log).iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters of every statement run so far
    pub fn params(&self) -> Vec<Vec<Value>> {
        lock(&self.log).iter().map(|(_, params)| params.clone()).collect()
    }
}

impl Executor for MockExecutor {
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, OrmError> {
        lock(&self.log).push((sql.to_string(), params.to_vec()));
        lock(&self.results)
            .pop_front()
            .unwrap_or_else(|| Ok(QueryResult::default()))
    }
}

#[derive(Debug, Default)]
pub struct MockPool {
    executor: MockExecutor,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MockPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The executor behind every lease
    pub fn executor(&self) -> &MockExecutor {
        &self.executor
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for MockPool {
    fn acquire(&self) -> Result<PooledConnection<'_>, OrmError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLease { pool: self }))
    }
}

struct MockLease<'p> {
    pool: &'p MockPool,
}

impl Executor for MockLease<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult, OrmError> {
        self.pool.executor.query(sql, params)
    }
}

impl Drop for MockLease<'_> {
    fn drop(&mut self) {
        self.pool.released.fetch_add(1, Ordering::SeqCst);
    }
}
