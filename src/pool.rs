//! Connection pool facade

use crate::config::Options;
use crate::connection::Connection;
use crate::errors::{PoolError, PoolResult};
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::reaper::{reap_idle, Reaper};
use crate::stack::{FreeList, PoolMember};

use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::atomic::{self, AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

type Factory<C> = Arc<dyn Fn() -> io::Result<C> + Send + Sync>;

struct Inner<C: Connection> {
    free: FreeList<C>,
    opts: Options,
    factory: Factory<C>,
    closed: AtomicBool,
    reaper: Mutex<Option<Reaper>>,
    metrics: MetricsTracker,
}

impl<C: Connection> Inner<C> {
    fn pop(&self) -> Option<C> {
        let member = self.free.pop()?;
        MetricsTracker::incr(&self.metrics.hits);
        Some(member.conn)
    }

    fn dial(&self) -> PoolResult<C> {
        MetricsTracker::incr(&self.metrics.misses);
        (self.factory)().map_err(|e| {
            MetricsTracker::incr(&self.metrics.dial_failures);
            tracing::debug!(error = %e, "Failed to dial connection");
            PoolError::Dial(e)
        })
    }

    fn get(&self) -> PoolResult<C> {
        match self.pop() {
            Some(conn) => Ok(conn),
            None => self.dial(),
        }
    }

    fn close_conn(&self, conn: C) -> io::Result<()> {
        conn.close().inspect_err(|_| MetricsTracker::incr(&self.metrics.close_failures))
    }

    /// Close every pooled connection, reporting the last failure.
    fn drain(&self) -> PoolResult<()> {
        let mut last_err = None;
        while let Some(member) = self.free.pop() {
            if let Err(e) = self.close_conn(member.conn) {
                if let Some(prev) = last_err.replace(e) {
                    tracing::warn!(error = %prev, "Failed to close pooled connection");
                }
            }
        }
        match last_err {
            Some(e) => Err(PoolError::Close(e)),
            None => Ok(()),
        }
    }

    fn reap(&self) {
        if self.closed.load(Ordering::SeqCst) || !self.opts.reaping_enabled() {
            return;
        }

        let outcome = reap_idle(
            &self.free,
            self.opts.idle_timeout,
            self.opts.max_cap,
            Instant::now(),
        );
        MetricsTracker::add(&self.metrics.reaped, outcome.evicted);
        MetricsTracker::add(&self.metrics.close_failures, outcome.close_failures);

        if outcome.evicted > 0 {
            tracing::debug!(
                evicted = outcome.evicted,
                kept = outcome.kept,
                "Reaped idle connections"
            );
        }
    }

    /// Push a returned connection, backing out if `close` ran meanwhile.
    fn push_back(&self, conn: C) -> bool {
        self.free.push(PoolMember::new(conn));

        // Pairs with the fence in `close`: either this thread sees `closed`,
        // or the drain there sees the push.
        atomic::fence(Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            MetricsTracker::incr(&self.metrics.rejected);
            if let Err(e) = self.drain() {
                tracing::warn!(error = %e, "Failed to close connection returned during close");
            }
            return false;
        }

        MetricsTracker::incr(&self.metrics.returned);
        true
    }

    fn close(&self) -> PoolResult<()> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        atomic::fence(Ordering::SeqCst);

        // Bind first so the lock is released before joining.
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.shutdown();
        }

        let available = self.free.len();
        let res = self.drain();
        tracing::info!(closed = available, "Connection pool closed");
        res
    }
}

/// A lock-free pool of reusable connections.
///
/// Idle connections are kept on a stack, so the most recently returned
/// connection is handed out first and rarely used ones sink to the bottom
/// where the reaper finds them. `max_cap` bounds how many connections are
/// kept idle, not how many may be checked out at once.
///
/// A background thread sweeps idle connections every `reap_interval` when an
/// `idle_timeout` is configured. Dropping the pool closes it.
///
/// # Examples
///
/// ```
/// use connpool::{Options, Pool};
/// use std::net::{TcpListener, TcpStream};
///
/// let listener = TcpListener::bind("127.0.0.1:0").unwrap();
/// let addr = listener.local_addr().unwrap();
///
/// let pool = Pool::new(
///     Options::new().with_initial_size(2).with_max_cap(4),
///     move || TcpStream::connect(addr),
/// )
/// .unwrap();
/// assert_eq!(pool.len(), 2);
///
/// let conn = pool.get().unwrap();
/// assert_eq!(pool.len(), 1);
///
/// assert!(pool.put(conn));
/// assert_eq!(pool.len(), 2);
///
/// pool.close().unwrap();
/// assert_eq!(pool.len(), 0);
/// ```
pub struct Pool<C: Connection> {
    inner: Arc<Inner<C>>,
}

impl<C: Connection> Pool<C> {
    /// Create a pool, dialing `initial_size` connections up front.
    ///
    /// If any of those dials fails, the connections created so far are
    /// closed and the error is returned.
    pub fn new<F>(options: Options, factory: F) -> PoolResult<Self>
    where
        F: Fn() -> io::Result<C> + Send + Sync + 'static,
    {
        let opts = options.normalize();
        let inner = Arc::new(Inner {
            free: FreeList::new(),
            opts,
            factory: Arc::new(factory),
            closed: AtomicBool::new(false),
            reaper: Mutex::new(None),
            metrics: MetricsTracker::new(),
        });

        for _ in 0..inner.opts.initial_size {
            match (inner.factory)() {
                Ok(conn) => inner.free.push(PoolMember::new(conn)),
                Err(e) => {
                    tracing::debug!(
                        created = inner.free.len(),
                        error = %e,
                        "Warm-up dial failed"
                    );
                    Self::abort(&inner);
                    return Err(PoolError::Dial(e));
                }
            }
        }

        let ticker = Arc::clone(&inner);
        match Reaper::spawn(inner.opts.reap_interval, move || ticker.reap()) {
            Ok(reaper) => *inner.reaper.lock() = Some(reaper),
            Err(e) => {
                Self::abort(&inner);
                return Err(PoolError::Spawn(e));
            }
        }

        tracing::debug!(
            initial_size = inner.opts.initial_size,
            max_cap = inner.opts.max_cap,
            idle_timeout = ?inner.opts.idle_timeout,
            "Connection pool created"
        );
        Ok(Self { inner })
    }

    fn abort(inner: &Inner<C>) {
        inner.closed.store(true, Ordering::SeqCst);
        if let Err(e) = inner.drain() {
            tracing::warn!(error = %e, "Failed to close warm-up connection");
        }
    }

    /// Take an idle connection, or dial a new one if none is available.
    pub fn get(&self) -> PoolResult<C> {
        self.inner.get()
    }

    /// Like [`get`](Pool::get), but a pool miss dials on tokio's blocking
    /// thread pool.
    pub async fn get_async(&self) -> PoolResult<C> {
        if let Some(conn) = self.inner.pop() {
            return Ok(conn);
        }

        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.dial())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Return a connection to the pool.
    ///
    /// Returns `false` if the pool is closed or already holds `max_cap` idle
    /// connections; the connection is closed in that case. The capacity check
    /// is not atomic with the push, so racing calls may overshoot `max_cap`
    /// by the number of callers involved. A call that loses a race with
    /// [`close`](Pool::close) also closes its connection and returns `false`.
    pub fn put(&self, conn: C) -> bool {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) || inner.free.len() >= inner.opts.max_cap {
            MetricsTracker::incr(&inner.metrics.rejected);
            if let Err(e) = inner.close_conn(conn) {
                tracing::warn!(error = %e, "Failed to close rejected connection");
            }
            return false;
        }

        inner.push_back(conn)
    }

    /// Number of idle connections in the pool.
    pub fn len(&self) -> usize {
        self.inner.free.len()
    }

    /// Whether the pool holds no idle connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the reaper and close every idle connection.
    ///
    /// Only the first call does any work; later calls return `Ok(())`. If
    /// several connections fail to close, the last error is returned and the
    /// others are logged.
    pub fn close(&self) -> PoolResult<()> {
        self.inner.close()
    }

    /// Like [`close`](Pool::close), but waits for the reaper on tokio's
    /// blocking thread pool.
    pub async fn close_async(&self) -> PoolResult<()> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.close())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Whether [`close`](Pool::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The normalized options the pool runs with.
    pub fn options(&self) -> &Options {
        &self.inner.opts
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(self.len(), self.inner.opts.max_cap)
    }
}

impl<C: Connection> Drop for Pool<C> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "Failed to close pool on drop");
        }
    }
}

impl<C: Connection> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .field("options", &self.inner.opts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::{MockConn, MockDialer};
    use std::thread;
    use std::time::Duration;

    // Falls back to now on hosts with a younger monotonic clock, which makes
    // the member look fresh rather than panicking.
    fn idle_since(age: Duration) -> Instant {
        let now = Instant::now();
        now.checked_sub(age).unwrap_or(now)
    }

    fn pool_with(opts: Options, dialer: &MockDialer) -> Pool<MockConn> {
        Pool::new(opts, dialer.factory()).unwrap()
    }

    #[test]
    fn test_warmup_fills_pool() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::new().with_initial_size(3), &dialer);

        assert_eq!(pool.len(), 3);
        assert_eq!(dialer.created(), 3);
        assert_eq!(pool.options().max_cap, 10);
    }

    #[test]
    fn test_capacity_enforcement() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::new().with_initial_size(3).with_max_cap(5), &dialer);
        assert_eq!(pool.len(), 3);

        let conns: Vec<_> = (0..6).map(|_| pool.get().unwrap()).collect();
        assert_eq!(pool.len(), 0);
        assert_eq!(dialer.created(), 6);

        let mut conns = conns.into_iter();
        for conn in conns.by_ref().take(5) {
            assert!(pool.put(conn));
        }
        assert_eq!(pool.len(), 5);
        assert_eq!(dialer.closed(), 0);

        assert!(!pool.put(conns.next().unwrap()));
        assert_eq!(pool.len(), 5);
        assert_eq!(dialer.closed(), 1);

        let metrics = pool.metrics();
        assert_eq!(metrics.hits, 3);
        assert_eq!(metrics.misses, 3);
        assert_eq!(metrics.returned, 5);
        assert_eq!(metrics.rejected, 1);
    }

    #[test]
    fn test_lifo_reuse() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::default(), &dialer);

        for _ in 0..3 {
            assert!(pool.put(dialer.conn()));
        }
        let ids: Vec<_> = (0..3).map(|_| pool.get().unwrap().id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_warmup_failure_closes_created() {
        let dialer = MockDialer::failing_at(2);
        let err = Pool::new(Options::new().with_initial_size(3), dialer.factory()).unwrap_err();

        assert!(matches!(err, PoolError::Dial(_)));
        assert_eq!(dialer.created(), 1);
        assert_eq!(dialer.closed(), 1);
    }

    #[test]
    fn test_get_miss_surfaces_dial_error() {
        let dialer = MockDialer::failing_at(1);
        let pool = pool_with(Options::default(), &dialer);

        assert!(matches!(pool.get(), Err(PoolError::Dial(_))));
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.metrics().dial_failures, 1);

        // The next dial succeeds.
        assert_eq!(pool.get().unwrap().id, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::new().with_initial_size(4), &dialer);

        assert!(pool.close().is_ok());
        assert!(pool.is_closed());
        assert_eq!(pool.len(), 0);
        assert_eq!(dialer.closed(), 4);

        assert!(pool.close().is_ok());
        assert_eq!(dialer.closed(), 4);
    }

    #[test]
    fn test_close_reports_last_failure() {
        let dialer = MockDialer::new();
        dialer.set_fail_close(true);
        let pool = pool_with(Options::new().with_initial_size(3), &dialer);

        let err = pool.close().unwrap_err();
        assert!(matches!(err, PoolError::Close(_)));
        // Drained from the head down, so the first-dialed closes last.
        assert!(err.to_string().contains("close failed for 1"));
        assert_eq!(dialer.closed(), 3);
        assert_eq!(pool.metrics().close_failures, 3);
    }

    #[test]
    fn test_put_after_close_rejects() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::default(), &dialer);
        let conn = pool.get().unwrap();

        pool.close().unwrap();
        assert!(!pool.put(conn));
        assert_eq!(pool.len(), 0);
        assert_eq!(dialer.closed(), 1);
    }

    #[test]
    fn test_put_racing_close_is_rejected() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::default(), &dialer);
        let conn = pool.get().unwrap();

        // `close` flips the flag after `put` passed its closed check.
        pool.inner.closed.store(true, Ordering::SeqCst);
        assert!(!pool.inner.push_back(conn));

        assert_eq!(pool.len(), 0);
        assert_eq!(dialer.closed(), 1);
        let metrics = pool.metrics();
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.returned, 0);
    }

    #[test]
    fn test_sweep_keeps_pool_within_cap() {
        const MAX_CAP: usize = 2;

        let dialer = MockDialer::new();
        let pool = Arc::new(pool_with(
            Options::new()
                .with_initial_size(MAX_CAP)
                .with_max_cap(MAX_CAP)
                .with_idle_timeout(Duration::from_secs(3600))
                .with_reap_interval(Duration::from_secs(3600)),
            &dialer,
        ));

        let sweeps = Arc::new(AtomicBool::new(true));
        let sweeper = {
            let pool = Arc::clone(&pool);
            let sweeps = Arc::clone(&sweeps);
            thread::spawn(move || {
                while sweeps.load(Ordering::SeqCst) {
                    pool.inner.reap();
                }
            })
        };

        for _ in 0..20_000 {
            pool.put(dialer.conn());
            assert!(pool.len() <= MAX_CAP + 1, "len reached {}", pool.len());
        }
        sweeps.store(false, Ordering::SeqCst);
        sweeper.join().unwrap();

        assert!(pool.len() <= MAX_CAP + 1);
        pool.close().unwrap();
        assert_eq!(dialer.closed(), dialer.created());
    }

    #[test]
    fn test_drop_closes_pool() {
        let dialer = MockDialer::new();
        {
            let _pool = pool_with(Options::new().with_initial_size(2), &dialer);
        }
        assert_eq!(dialer.closed(), 2);
    }

    #[test]
    fn test_reaper_evicts_stale_members() {
        let dialer = MockDialer::new();
        let pool = pool_with(
            Options::new()
                .with_idle_timeout(Duration::from_secs(60))
                .with_reap_interval(Duration::from_millis(10)),
            &dialer,
        );

        pool.inner.free.push(PoolMember {
            conn: dialer.conn(),
            last_access: idle_since(Duration::from_secs(3600)),
        });
        assert!(pool.put(dialer.conn()));

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.metrics().reaped == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(dialer.closed(), 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get().unwrap().id, 2);
        assert_eq!(pool.metrics().reaped, 1);
    }

    #[test]
    fn test_reaper_idle_when_timeout_disabled() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::new().with_reap_interval(Duration::from_millis(5)), &dialer);

        pool.inner.free.push(PoolMember {
            conn: dialer.conn(),
            last_access: idle_since(Duration::from_secs(3600)),
        });
        thread::sleep(Duration::from_millis(40));

        assert_eq!(pool.len(), 1);
        assert_eq!(dialer.closed(), 0);
    }

    #[test]
    fn test_concurrent_get_put() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;
        const MAX_CAP: usize = 4;

        let dialer = MockDialer::new();
        let pool = Arc::new(pool_with(Options::new().with_max_cap(MAX_CAP), &dialer));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        let conn = pool.get().unwrap();
                        pool.put(conn);
                        assert!(pool.len() <= MAX_CAP + THREADS);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.len() <= MAX_CAP + THREADS);
        pool.close().unwrap();
        assert_eq!(dialer.closed(), dialer.created());
    }

    #[tokio::test]
    async fn test_get_async_dials_on_miss() {
        let dialer = MockDialer::new();
        let pool = pool_with(Options::default(), &dialer);

        let conn = pool.get_async().await.unwrap();
        assert_eq!(conn.id, 1);
        assert!(pool.put(conn));

        let conn = pool.get_async().await.unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(dialer.created(), 1);
        assert!(pool.put(conn));

        pool.close_async().await.unwrap();
        assert_eq!(dialer.closed(), 1);
    }
}
