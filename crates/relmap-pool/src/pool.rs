//! Blocking connection pool.

use crate::config::PoolConfig;
use crate::transaction::PoolTransaction;
use relmap_core::error::{PoolError, PoolErrorKind};
use relmap_core::{
    Connection, Dialect, Driver, Error, Executor, IsolationLevel, Result, Row, Transaction,
};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

type Factory<C> = Box<dyn Fn() -> Result<C> + Send + Sync>;

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of active connections
    pub active_connections: usize,
    /// Number of pending acquire requests
    pub pending_requests: usize,
}

struct IdleConnection<C> {
    conn: C,
    created: Instant,
    returned: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    total: usize,
    active: usize,
    pending: usize,
    closed: bool,
}

pub(crate) struct PoolShared<C> {
    config: PoolConfig,
    factory: Factory<C>,
    state: Mutex<PoolState<C>>,
    available: Condvar,
    dialect: Dialect,
    returning: bool,
}

impl<C: Connection> PoolShared<C> {
    fn lock(&self) -> Result<MutexGuard<'_, PoolState<C>>> {
        self.state.lock().map_err(|_| poisoned())
    }

    fn release(&self, conn: C, created: Instant) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        state.active = state.active.saturating_sub(1);
        if state.closed || self.expired(created, Instant::now()) {
            state.total = state.total.saturating_sub(1);
            drop(conn);
        } else {
            state.idle.push_back(IdleConnection {
                conn,
                created,
                returned: Instant::now(),
            });
        }
        self.available.notify_one();
    }

    fn forget(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.active = state.active.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
            self.available.notify_one();
        }
    }

    fn expired(&self, created: Instant, now: Instant) -> bool {
        self.config
            .max_lifetime_duration()
            .is_some_and(|max| now.duration_since(created) >= max)
    }

    fn stale(&self, idle: &IdleConnection<C>, now: Instant) -> bool {
        self.expired(idle.created, now)
            || self
                .config
                .idle_timeout_duration()
                .is_some_and(|max| now.duration_since(idle.returned) >= max)
    }
}

/// A pool of connections created lazily by a factory.
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<C: Connection> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection + 'static> Pool<C> {
    /// Create a pool and open its initial connections.
    ///
    /// At least one connection is opened up front to learn the dialect and
    /// RETURNING support of the database.
    pub fn new(
        config: PoolConfig,
        factory: impl Fn() -> Result<C> + Send + Sync + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let first = factory()?;
        let dialect = first.dialect();
        let returning = first.has_returning_capability();
        let now = Instant::now();

        let mut idle = VecDeque::with_capacity(config.max_connections);
        idle.push_back(IdleConnection {
            conn: first,
            created: now,
            returned: now,
        });
        while idle.len() < config.min_connections {
            idle.push_back(IdleConnection {
                conn: factory()?,
                created: now,
                returned: now,
            });
        }

        tracing::info!(
            dialect = %dialect,
            min_connections = config.min_connections,
            max_connections = config.max_connections,
            "Connection pool created"
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    total: idle.len(),
                    idle,
                    active: 0,
                    pending: 0,
                    closed: false,
                }),
                config,
                factory: Box::new(factory),
                available: Condvar::new(),
                dialect,
                returning,
            }),
        })
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        match self.shared.lock() {
            Ok(state) => PoolStats {
                total_connections: state.total,
                idle_connections: state.idle.len(),
                active_connections: state.active,
                pending_requests: state.pending,
            },
            Err(_) => PoolStats::default(),
        }
    }

    /// Check if the pool is at capacity.
    pub fn at_capacity(&self) -> bool {
        self.stats().total_connections >= self.shared.config.max_connections
    }

    /// Close the pool: idle connections are dropped, borrowed ones are
    /// dropped when returned, and further acquires fail.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
            let dropped = state.idle.len();
            state.idle.clear();
            state.total = state.total.saturating_sub(dropped);
            self.shared.available.notify_all();
            tracing::info!(dropped, "Connection pool closed");
        }
    }

    /// Borrow a connection, waiting up to `acquire_timeout_ms`.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn acquire(&self) -> Result<PooledConnection<C>> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.config.acquire_timeout_duration();
        let mut state = shared.lock()?;

        loop {
            if state.closed {
                return Err(pool_error(PoolErrorKind::Closed, "Pool is closed"));
            }

            let now = Instant::now();
            while let Some(idle) = state.idle.pop_front() {
                if shared.stale(&idle, now) && state.total > shared.config.min_connections {
                    state.total -= 1;
                    tracing::debug!("Discarding stale pooled connection");
                    continue;
                }

                state.active += 1;
                drop(state);

                let pooled = PooledConnection {
                    conn: Some(idle.conn),
                    created: idle.created,
                    pool: Arc::clone(shared),
                };
                if !shared.config.test_on_checkout {
                    return Ok(pooled);
                }
                match pooled.ping() {
                    Ok(()) => return Ok(pooled),
                    Err(e) => {
                        tracing::warn!(error = %e, "Pooled connection failed ping, discarding");
                        pooled.discard();
                        state = shared.lock()?;
                        continue;
                    }
                }
            }

            if state.total < shared.config.max_connections {
                state.total += 1;
                state.active += 1;
                drop(state);

                return match (shared.factory)() {
                    Ok(conn) => {
                        tracing::debug!("Opened new pooled connection");
                        Ok(PooledConnection {
                            conn: Some(conn),
                            created: Instant::now(),
                            pool: Arc::clone(shared),
                        })
                    }
                    Err(e) => {
                        shared.forget();
                        Err(e)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(pool_error(
                    PoolErrorKind::Timeout,
                    format!(
                        "Timed out after {} ms waiting for a connection",
                        shared.config.acquire_timeout_ms
                    ),
                ));
            }

            state.pending += 1;
            let (guard, _) = shared
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| poisoned())?;
            state = guard;
            state.pending -= 1;
        }
    }
}

impl<C: Connection + 'static> Driver for Pool<C> {
    fn dialect(&self) -> Dialect {
        self.shared.dialect
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.acquire()?.query(sql)
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.acquire()?.execute(sql)
    }

    fn open_transaction(&self, isolation: IsolationLevel) -> Result<Transaction> {
        let conn = self.acquire()?;
        conn.begin(isolation)?;
        tracing::info!(isolation = isolation.as_sql(), "Pooled transaction opened");
        Ok(Transaction::new(PoolTransaction::new(conn)))
    }

    fn has_returning_capability(&self) -> bool {
        self.shared.returning
    }
}

/// A connection borrowed from the pool; returned on drop.
pub struct PooledConnection<C: Connection> {
    conn: Option<C>,
    created: Instant,
    pool: Arc<PoolShared<C>>,
}

impl<C: Connection> PooledConnection<C> {
    /// Drop the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if self.conn.take().is_some() {
            self.pool.forget();
        }
    }
}

impl<C: Connection> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created", &self.created)
            .finish_non_exhaustive()
    }
}

impl<C: Connection> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(conn) => conn,
            // `conn` is only taken by `discard` and `drop`, which consume self.
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.created);
        }
    }
}

fn pool_error(kind: PoolErrorKind, message: impl Into<String>) -> Error {
    Error::Pool(PoolError {
        kind,
        message: message.into(),
        source: None,
    })
}

fn poisoned() -> Error {
    pool_error(PoolErrorKind::Poisoned, "Pool state lock poisoned")
}
