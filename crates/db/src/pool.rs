//! Bounded, self-expiring connection pool
//!
//! The pool starts cleared. The first checkout fills it to capacity; once
//! every session has sat idle for the idle timeout a reaper thread closes
//! them all and the pool is cleared again, so the next checkout refills it.
//!
//! ```text
//! CLEARED -> FILLING -> FILLED -> (checkout/return)* -> CLEARED
//! ```

use dropzone_core::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Delay before a fully idle pool closes its sessions
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens database sessions for a [`Pool`]
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Open one new session
    fn connect(&self) -> Result<Self::Connection>;
}

/// Pool sizing and expiry
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub capacity: usize,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: dropzone_core::default_workers(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Snapshot of the pool's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    /// Sessions currently allocated, idle or checked out
    pub open: usize,
    pub idle: usize,
    pub cleared: bool,
}

struct State<C> {
    idle: Vec<C>,
    open: usize,
    cleared: bool,
    idle_deadline: Option<Instant>,
    shutdown: bool,
}

struct Shared<M: ManageConnection> {
    manager: M,
    config: PoolConfig,
    state: Mutex<State<M::Connection>>,
    /// Signalled when a session becomes idle or capacity frees up
    available: Condvar,
    /// Signalled when the idle deadline changes or on shutdown
    reaper: Condvar,
    /// Mirrors `State::cleared` for the lock-free fast path
    cleared: AtomicBool,
    /// Serializes fills
    fill_lock: Mutex<()>,
}

/// Fixed-capacity pool of sessions produced by `M`
pub struct Pool<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    reaper: Option<JoinHandle<()>>,
}

impl<M: ManageConnection> Pool<M> {
    /// Create a cleared pool; no session is opened until the first checkout
    pub fn new(manager: M, config: PoolConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::Config("pool capacity must be at least 1".into()));
        }

        let shared = Arc::new(Shared {
            manager,
            state: Mutex::new(State {
                idle: Vec::with_capacity(config.capacity),
                open: 0,
                cleared: true,
                idle_deadline: None,
                shutdown: false,
            }),
            config,
            available: Condvar::new(),
            reaper: Condvar::new(),
            cleared: AtomicBool::new(true),
            fill_lock: Mutex::new(()),
        });

        let reaper_shared = Arc::clone(&shared);
        let reaper = thread::Builder::new()
            .name("pool-reaper".into())
            .spawn(move || reaper_loop(reaper_shared))
            .map_err(|e| Error::connection("failed to start pool reaper", e))?;

        Ok(Self {
            shared,
            reaper: Some(reaper),
        })
    }

    /// Check out a session, blocking until one is idle
    ///
    /// Fills the pool first if it is cleared. A failed fill leaves the
    /// pool cleared and surfaces the connection error.
    pub fn get(&self) -> Result<PooledConnection<M>> {
        if self.shared.cleared.load(Ordering::Acquire) {
            self.fill()?;
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(conn) = state.idle.pop() {
                state.idle_deadline = None;
                return Ok(self.guard(conn));
            }

            if state.cleared {
                // Reclaimed between the fill and this checkout
                drop(state);
                self.fill()?;
                state = self.shared.state.lock();
                continue;
            }

            if state.open < self.shared.config.capacity {
                // A replacement failed earlier; top up lazily
                state.open += 1;
                drop(state);
                return match self.shared.manager.connect() {
                    Ok(conn) => Ok(self.guard(conn)),
                    Err(e) => {
                        let mut state = self.shared.state.lock();
                        self.shared.lost_session(&mut state);
                        Err(e)
                    }
                };
            }

            self.shared.available.wait(&mut state);
        }
    }

    /// Return a session taken out with [`PooledConnection::detach`]
    ///
    /// `None` stands for a session that was lost or broken; a fresh one is
    /// opened in its place so capacity is preserved. Returns made while no
    /// session is checked out are logged and ignored.
    pub fn return_connection(&self, conn: Option<M::Connection>) {
        self.shared.put_back(conn);
    }

    /// Current counters
    pub fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            capacity: self.shared.config.capacity,
            open: state.open,
            idle: state.idle.len(),
            cleared: state.cleared,
        }
    }

    /// Pool capacity
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity
    }

    fn guard(&self, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            shared: Arc::clone(&self.shared),
            conn: Some(conn),
            returns: true,
        }
    }

    fn fill(&self) -> Result<()> {
        let _fill = self.shared.fill_lock.lock();
        if !self.shared.cleared.load(Ordering::Acquire) {
            return Ok(());
        }

        let needed = {
            let state = self.shared.state.lock();
            self.shared.config.capacity.saturating_sub(state.open)
        };

        let mut fresh = Vec::with_capacity(needed);
        for _ in 0..needed {
            // Sessions opened so far are closed when `fresh` drops
            fresh.push(self.shared.manager.connect()?);
        }

        let mut state = self.shared.state.lock();
        state.open += fresh.len();
        state.idle.extend(fresh);
        state.cleared = false;
        state.idle_deadline = None;
        self.shared.cleared.store(false, Ordering::Release);
        self.shared.available.notify_all();
        info!("Opened {} database connection(s)", needed);
        Ok(())
    }
}

impl<M: ManageConnection> Drop for Pool<M> {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.reaper.notify_all();
        if let Some(handle) = self.reaper.take() {
            let _ = handle.join();
        }
    }
}

impl<M: ManageConnection> Shared<M> {
    fn put_back(&self, conn: Option<M::Connection>) {
        if !self.has_checkout() {
            warn!("Ignoring a database connection returned while none was checked out");
            return;
        }

        let conn = match conn {
            Some(conn) => Some(conn),
            None => match self.manager.connect() {
                Ok(conn) => {
                    debug!("Replaced a lost database connection");
                    Some(conn)
                }
                Err(e) => {
                    error!("Cannot replace lost database connection: {}", e);
                    None
                }
            },
        };

        let mut state = self.state.lock();
        // Re-checked under the lock: a concurrent return may have taken the slot
        if state.idle.len() >= state.open {
            warn!("Ignoring a database connection returned while none was checked out");
            return;
        }
        match conn {
            Some(conn) => {
                state.idle.push(conn);
                self.available.notify_one();
            }
            None => self.lost_session(&mut state),
        }

        // Nothing checked out: arm the idle check, as the reaper tests
        if state.open > 0 && state.idle.len() == state.open {
            state.idle_deadline = Some(Instant::now() + self.config.idle_timeout);
            self.reaper.notify_one();
        }
    }

    fn has_checkout(&self) -> bool {
        let state = self.state.lock();
        state.open > state.idle.len()
    }

    /// Account for a session that no longer exists
    fn lost_session(&self, state: &mut MutexGuard<'_, State<M::Connection>>) {
        state.open = state.open.saturating_sub(1);
        if state.open == 0 {
            state.cleared = true;
            self.cleared.store(true, Ordering::Release);
        }
        self.available.notify_all();
    }
}

fn reaper_loop<M: ManageConnection>(shared: Arc<Shared<M>>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        match state.idle_deadline {
            None => shared.reaper.wait(&mut state),
            Some(deadline) if Instant::now() < deadline => {
                shared.reaper.wait_until(&mut state, deadline);
            }
            Some(_) => {
                state.idle_deadline = None;
                if !state.cleared && state.open > 0 && state.idle.len() == state.open {
                    let closed = state.idle.len();
                    state.idle.clear();
                    state.open = 0;
                    state.cleared = true;
                    shared.cleared.store(true, Ordering::Release);
                    debug!("Closed {} unused database connection(s) after idle timeout", closed);
                }
            }
        }
    }
}

/// A checked-out session, returned to the pool on drop
pub struct PooledConnection<M: ManageConnection> {
    shared: Arc<Shared<M>>,
    conn: Option<M::Connection>,
    /// False once detached; the caller then owns the return
    returns: bool,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Close this session instead of returning it; the pool opens a
    /// replacement
    pub fn discard(mut self) {
        self.conn.take();
    }

    /// Take the session out of the guard
    ///
    /// It stays counted as checked out until handed to
    /// [`Pool::return_connection`].
    pub fn detach(mut self) -> M::Connection {
        self.returns = false;
        self.conn
            .take()
            .expect("pooled connection is present until dropped")
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("pooled connection is present until dropped")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("pooled connection is present until dropped")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if self.returns {
            self.shared.put_back(self.conn.take());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Counts live sessions so tests can check the capacity bound
    #[derive(Default)]
    struct Counters {
        live: AtomicUsize,
        peak: AtomicUsize,
        opened: AtomicUsize,
        fail_after: AtomicUsize,
    }

    struct TestManager {
        counters: Arc<Counters>,
    }

    struct TestConn {
        counters: Arc<Counters>,
    }

    impl Drop for TestConn {
        fn drop(&mut self) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl ManageConnection for TestManager {
        type Connection = TestConn;

        fn connect(&self) -> Result<TestConn> {
            let c = &self.counters;
            let limit = c.fail_after.load(Ordering::SeqCst);
            if limit != 0 && c.opened.load(Ordering::SeqCst) >= limit {
                return Err(Error::Connection {
                    message: "refused".into(),
                    source: None,
                });
            }
            c.opened.fetch_add(1, Ordering::SeqCst);
            let live = c.live.fetch_add(1, Ordering::SeqCst) + 1;
            c.peak.fetch_max(live, Ordering::SeqCst);
            Ok(TestConn {
                counters: Arc::clone(c),
            })
        }
    }

    fn pool(capacity: usize, idle_timeout: Duration) -> (Pool<TestManager>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let pool = Pool::new(
            TestManager {
                counters: Arc::clone(&counters),
            },
            PoolConfig {
                capacity,
                idle_timeout,
            },
        )
        .unwrap();
        (pool, counters)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_starts_cleared_and_fills_on_first_checkout() {
        let (pool, counters) = pool(3, Duration::from_secs(60));
        assert!(pool.status().cleared);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);

        let conn = pool.get().unwrap();
        let status = pool.status();
        assert!(!status.cleared);
        assert_eq!(status.open, 3);
        assert_eq!(status.idle, 2);
        drop(conn);
        assert_eq!(pool.status().idle, 3);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = Pool::new(
            TestManager {
                counters: Arc::default(),
            },
            PoolConfig {
                capacity: 0,
                idle_timeout: DEFAULT_IDLE_TIMEOUT,
            },
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_concurrent_checkouts_never_exceed_capacity() {
        let (pool, counters) = pool(3, Duration::from_secs(60));
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..20 {
                        let _conn = pool.get().unwrap();
                        thread::sleep(Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(counters.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.status().idle, 3);
    }

    #[test]
    fn test_checkout_blocks_until_return() {
        let (pool, _) = pool(1, Duration::from_secs(60));
        let pool = Arc::new(pool);
        let held = pool.get().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                let _conn = pool.get().unwrap();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(held);
        waiter.join().unwrap();
    }

    #[test]
    fn test_idle_pool_clears_and_refills() {
        let (pool, counters) = pool(2, Duration::from_millis(50));

        drop(pool.get().unwrap());
        assert!(wait_for(|| pool.status().cleared));
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
        assert_eq!(pool.status().open, 0);

        drop(pool.get().unwrap());
        assert_eq!(counters.opened.load(Ordering::SeqCst), 4);
        assert!(counters.peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_checked_out_session_prevents_clearing() {
        let (pool, counters) = pool(2, Duration::from_millis(30));
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        drop(a);
        thread::sleep(Duration::from_millis(120));

        assert!(!pool.status().cleared);
        assert_eq!(counters.live.load(Ordering::SeqCst), 2);
        drop(b);
    }

    #[test]
    fn test_failed_fill_leaves_pool_cleared() {
        let (pool, counters) = pool(3, Duration::from_secs(60));
        counters.fail_after.store(2, Ordering::SeqCst);

        assert!(matches!(pool.get(), Err(Error::Connection { .. })));
        let status = pool.status();
        assert!(status.cleared);
        assert_eq!(status.open, 0);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_discard_opens_replacement() {
        let (pool, counters) = pool(2, Duration::from_secs(60));
        pool.get().unwrap().discard();

        assert_eq!(counters.opened.load(Ordering::SeqCst), 3);
        assert_eq!(counters.live.load(Ordering::SeqCst), 2);
        assert_eq!(pool.status().idle, 2);
    }

    #[test]
    fn test_return_none_after_detach() {
        let (pool, counters) = pool(2, Duration::from_secs(60));
        let conn = pool.get().unwrap().detach();
        assert_eq!(pool.status().idle, 1);

        drop(conn);
        pool.return_connection(None);

        let status = pool.status();
        assert_eq!(status.open, 2);
        assert_eq!(status.idle, 2);
        assert_eq!(counters.live.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_replacement_tops_up_lazily() {
        let (pool, counters) = pool(2, Duration::from_secs(60));
        let conn = pool.get().unwrap();
        counters.fail_after.store(2, Ordering::SeqCst);
        conn.discard();
        assert_eq!(pool.status().open, 1);

        counters.fail_after.store(0, Ordering::SeqCst);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert_eq!(pool.status().open, 2);
        assert!(counters.peak.load(Ordering::SeqCst) <= 2);
        drop((a, b));
    }

    #[test]
    fn test_pool_short_of_capacity_still_clears_when_idle() {
        let (pool, counters) = pool(2, Duration::from_millis(50));
        let conn = pool.get().unwrap();
        counters.fail_after.store(2, Ordering::SeqCst);
        conn.discard();

        let status = pool.status();
        assert_eq!((status.open, status.idle), (1, 1));
        assert!(wait_for(|| pool.status().cleared));
        assert_eq!(pool.status().open, 0);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_return_without_checkout_is_ignored() {
        let (pool, counters) = pool(2, Duration::from_secs(60));
        drop(pool.get().unwrap());

        pool.return_connection(None);

        let status = pool.status();
        assert_eq!((status.open, status.idle), (2, 2));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.live.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_returns_racing_idle_check() {
        let (pool, counters) = pool(3, Duration::from_millis(1));
        let pool = Arc::new(pool);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for j in 0..40 {
                        let conn = pool.get().unwrap();
                        if (i + j) % 3 == 0 {
                            thread::sleep(Duration::from_millis(2));
                        }
                        drop(conn);
                        if j % 5 == 0 {
                            // Give the reaper a fully idle window
                            thread::sleep(Duration::from_millis(3));
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(counters.peak.load(Ordering::SeqCst) <= 3);
        let status = pool.status();
        assert!(
            (status.open == 3 && !status.cleared) || (status.open == 0 && status.cleared),
            "inconsistent pool after stress: {:?}",
            status
        );
        assert!(wait_for(|| pool.status().cleared));
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);
    }
}
