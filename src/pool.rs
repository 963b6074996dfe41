//! Bounded connection pooling, partitioned per (tenant, kind).
//!
//! Each [`PoolKey`] owns an independent [`BackendPool`]: a semaphore bounds
//! simultaneously-open handles, an idle set holds returned handles for
//! reuse, and a background sweep evicts handles idle past the configured
//! period. Partitioning by tenant means one tenant's load or backend
//! outage cannot starve another tenant's capacity.
//!
//! Checkout is exclusive. A [`PoolGuard`] releases its handle back to the
//! idle set only through an explicit [`PoolGuard::release`]; dropping the
//! guard any other way (I/O error, timeout cancellation) destroys the
//! handle, so an uncertain connection never re-enters the pool.

use crate::config::EngineConfig;
use crate::connector::{Connector, Handle};
use crate::error::{Error, Result};
use crate::types::SourceKind;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore};
use tokio::task::JoinHandle;

/// Pool partition key: tenant plus data-source kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Tenant identifier; requests without one share the default partition.
    pub tenant: String,
    /// Data-source kind.
    pub kind: SourceKind,
}

impl PoolKey {
    /// Shared partition used when a request carries no tenant.
    pub const DEFAULT_TENANT: &'static str = "default";

    /// Key for an optional tenant and a kind.
    pub fn new(tenant: Option<&str>, kind: SourceKind) -> Self {
        Self {
            tenant: tenant.unwrap_or(Self::DEFAULT_TENANT).to_string(),
            kind,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.kind)
    }
}

/// Sizing and lifecycle options shared by every pool partition.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Maximum simultaneously-open handles per partition.
    pub max_size: usize,
    /// Idle handles kept through eviction.
    pub min_idle: usize,
    /// Inactivity period before surplus idle handles are evicted.
    pub idle_period: Option<Duration>,
    /// Probe idle handles before reuse.
    pub test_on_borrow: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: 0,
            idle_period: Some(Duration::from_secs(60)),
            test_on_borrow: true,
        }
    }
}

impl From<&EngineConfig> for PoolOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_size: config.max_pool_size_per_key,
            min_idle: config.min_idle_per_key,
            idle_period: config.idle_eviction_period(),
            test_on_borrow: true,
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles opened over the pool's lifetime.
    pub connections_created: u64,
    /// Handles destroyed over the pool's lifetime.
    pub connections_closed: u64,
    /// Successful checkouts.
    pub acquisitions: u64,
    /// Handles destroyed after an error or cancellation.
    pub discards: u64,
    /// Checkouts that failed because the partition was at capacity.
    pub exhausted_count: u64,
    /// Total checkout wait time.
    pub total_wait_time_ms: u64,
}

/// Lock-free statistics counters.
#[derive(Debug, Default)]
pub struct AtomicPoolStats {
    created: AtomicU64,
    closed: AtomicU64,
    acquisitions: AtomicU64,
    discards: AtomicU64,
    exhausted: AtomicU64,
    total_wait_ms: AtomicU64,
}

impl AtomicPoolStats {
    /// Record a handle being opened.
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a handle being destroyed.
    pub fn record_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful checkout and its wait time.
    pub fn record_acquisition(&self, wait_ms: u64) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.total_wait_ms.fetch_add(wait_ms, Ordering::Relaxed);
    }

    /// Record a handle destroyed after an error or cancellation.
    pub fn record_discarded(&self) {
        self.discards.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a checkout that timed out at capacity.
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough snapshot of the counters.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            connections_created: self.created.load(Ordering::Relaxed),
            connections_closed: self.closed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            discards: self.discards.load(Ordering::Relaxed),
            exhausted_count: self.exhausted.load(Ordering::Relaxed),
            total_wait_time_ms: self.total_wait_ms.load(Ordering::Relaxed),
        }
    }

    /// Average checkout wait time in milliseconds.
    pub fn avg_wait_time_ms(&self) -> f64 {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        if acquisitions == 0 {
            return 0.0;
        }
        self.total_wait_ms.load(Ordering::Relaxed) as f64 / acquisitions as f64
    }
}

struct IdleEntry {
    handle: Box<dyn Handle>,
    created_at: Instant,
    last_used: Instant,
}

/// One pool partition: bounded handle set for a single (tenant, kind).
pub struct BackendPool {
    key: PoolKey,
    connector: Arc<dyn Connector>,
    options: PoolOptions,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleEntry>>,
    total: AtomicUsize,
    stats: AtomicPoolStats,
    shutdown: AtomicBool,
}

impl BackendPool {
    /// New empty partition; handles are opened lazily on checkout.
    pub fn new(key: PoolKey, connector: Arc<dyn Connector>, options: PoolOptions) -> Self {
        Self {
            key,
            connector,
            options,
            semaphore: Arc::new(Semaphore::new(options.max_size)),
            idle: Mutex::new(Vec::new()),
            total: AtomicUsize::new(0),
            stats: AtomicPoolStats::default(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Check a handle out, waiting at most `wait_timeout` for a free slot.
    /// Waiters are served in arrival order as slots free up; a waiter that
    /// outlives the timeout fails with a capacity error and never receives
    /// a handle later.
    pub async fn acquire(self: Arc<Self>, wait_timeout: Duration) -> Result<PoolGuard> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(Error::internal(format!("pool {} is shut down", self.key)));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            wait_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(Error::internal(format!(
                    "pool {} semaphore closed",
                    self.key
                )))
            }
            Err(_) => {
                self.stats.record_exhausted();
                tracing::warn!(key = %self.key, wait_ms = wait_timeout.as_millis() as u64,
                    "pool exhausted within deadline");
                return Err(Error::capacity(format!(
                    "no free handle in pool {} within {}ms",
                    self.key,
                    wait_timeout.as_millis()
                )));
            }
        };
        let waited_ms = started.elapsed().as_millis() as u64;

        // Prefer a healthy idle handle over opening a new one.
        loop {
            let entry = self.idle.lock().await.pop();
            let Some(mut entry) = entry else { break };
            if self.options.test_on_borrow && !entry.handle.is_valid().await {
                tracing::debug!(key = %self.key, "idle handle failed liveness probe");
                self.destroy(entry.handle).await;
                continue;
            }
            self.stats.record_acquisition(waited_ms);
            return Ok(PoolGuard {
                handle: Some(entry.handle),
                created_at: entry.created_at,
                pool: Arc::clone(&self),
                permit: Some(permit),
            });
        }

        match self.connector.connect().await {
            Ok(handle) => {
                self.total.fetch_add(1, Ordering::SeqCst);
                self.stats.record_created();
                self.stats.record_acquisition(waited_ms);
                tracing::debug!(key = %self.key, total = self.open(), "opened backend handle");
                Ok(PoolGuard {
                    handle: Some(handle),
                    created_at: Instant::now(),
                    pool: self,
                    permit: Some(permit),
                })
            }
            // The permit drops here, freeing the slot for another waiter.
            Err(error) => Err(error),
        }
    }

    /// Handles currently open (idle plus checked out).
    pub fn open(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Handles currently idle.
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Partition key.
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Evict idle handles past the inactivity period, keeping the
    /// configured minimum watermark.
    pub async fn evict_idle(&self) {
        let Some(period) = self.options.idle_period else {
            return;
        };
        let mut expired = Vec::new();
        {
            let mut idle = self.idle.lock().await;
            let mut kept = Vec::with_capacity(idle.len());
            for entry in idle.drain(..) {
                if entry.last_used.elapsed() >= period {
                    expired.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            // Top back up to the watermark from the most recently used.
            while kept.len() < self.options.min_idle {
                match expired.pop() {
                    Some(entry) => kept.push(entry),
                    None => break,
                }
            }
            *idle = kept;
        }
        if !expired.is_empty() {
            tracing::debug!(key = %self.key, evicted = expired.len(), "evicting idle handles");
        }
        for entry in expired {
            self.destroy(entry.handle).await;
        }
    }

    /// Close every handle and reject future checkouts.
    pub async fn close(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let drained: Vec<IdleEntry> = self.idle.lock().await.drain(..).collect();
        for entry in drained {
            self.destroy(entry.handle).await;
        }
    }

    async fn put_back(&self, handle: Box<dyn Handle>, created_at: Instant) {
        if self.shutdown.load(Ordering::SeqCst) {
            self.destroy(handle).await;
            return;
        }
        self.idle.lock().await.push(IdleEntry {
            handle,
            created_at,
            last_used: Instant::now(),
        });
    }

    async fn discard(&self, handle: Box<dyn Handle>) {
        self.stats.record_discarded();
        self.destroy(handle).await;
    }

    async fn destroy(&self, mut handle: Box<dyn Handle>) {
        if let Err(error) = handle.close().await {
            tracing::warn!(key = %self.key, %error, "error closing backend handle");
        }
        self.total.fetch_sub(1, Ordering::SeqCst);
        self.stats.record_closed();
    }
}

impl fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendPool")
            .field("key", &self.key)
            .field("options", &self.options)
            .field("open", &self.open())
            .finish()
    }
}

/// Exclusive checkout of one backend handle.
///
/// Call [`release`](Self::release) after a clean execution to return the
/// handle for reuse, or [`discard`](Self::discard) after a failure.
/// Dropping the guard without either (e.g. when a timeout cancels the
/// in-flight call) destroys the handle in the background.
pub struct PoolGuard {
    handle: Option<Box<dyn Handle>>,
    created_at: Instant,
    pool: Arc<BackendPool>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PoolGuard {
    /// Execute one query on the checked-out handle.
    pub async fn run(
        &mut self,
        query: &str,
        params: &crate::types::Params,
    ) -> Result<crate::types::NativeResult> {
        match self.handle.as_mut() {
            Some(handle) => handle.run(query, params).await,
            None => Err(Error::internal("handle already returned to pool")),
        }
    }

    /// Return a healthy handle to the idle set.
    pub async fn release(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.put_back(handle, self.created_at).await;
        }
    }

    /// Destroy a handle whose state is uncertain.
    pub async fn discard(mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.discard(handle).await;
        }
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let pool = Arc::clone(&self.pool);
            let permit = self.permit.take();
            // Destroy asynchronously; the slot stays held until the handle
            // is gone so the open-handle bound is never exceeded.
            tokio::spawn(async move {
                pool.discard(handle).await;
                drop(permit);
            });
        }
    }
}

impl fmt::Debug for PoolGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolGuard")
            .field("key", self.pool.key())
            .field("held", &self.handle.is_some())
            .finish()
    }
}

/// Registry of pool partitions, created lazily on first use.
pub struct PoolManager {
    pools: RwLock<HashMap<PoolKey, Arc<BackendPool>>>,
    options: PoolOptions,
}

impl PoolManager {
    /// Manager with the given partition options.
    pub fn new(options: PoolOptions) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Partition for a key, creating it on first use.
    pub async fn pool(&self, key: &PoolKey, connector: Arc<dyn Connector>) -> Arc<BackendPool> {
        if let Some(pool) = self.pools.read().await.get(key) {
            return Arc::clone(pool);
        }
        let mut pools = self.pools.write().await;
        // Another task may have won the race for the write lock.
        if let Some(pool) = pools.get(key) {
            return Arc::clone(pool);
        }
        tracing::debug!(key = %key, "creating pool partition");
        let pool = Arc::new(BackendPool::new(key.clone(), connector, self.options));
        pools.insert(key.clone(), Arc::clone(&pool));
        pool
    }

    /// Check a handle out of the partition for `key`.
    pub async fn acquire(
        &self,
        key: &PoolKey,
        connector: Arc<dyn Connector>,
        wait_timeout: Duration,
    ) -> Result<PoolGuard> {
        let pool = self.pool(key, connector).await;
        pool.acquire(wait_timeout).await
    }

    /// Evict idle handles across every partition.
    pub async fn sweep(&self) {
        let pools: Vec<Arc<BackendPool>> =
            self.pools.read().await.values().cloned().collect();
        for pool in pools {
            pool.evict_idle().await;
        }
    }

    /// Spawn the periodic idle-eviction task. The task stops on its own
    /// once the manager is dropped.
    pub fn start_sweeper(manager: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(manager);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(manager) = weak.upgrade() else { break };
                manager.sweep().await;
            }
        })
    }

    /// Statistics for one partition, if it exists.
    pub async fn stats(&self, key: &PoolKey) -> Option<PoolStats> {
        self.pools.read().await.get(key).map(|p| p.stats())
    }

    /// Number of partitions created so far.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Close every partition and forget them.
    pub async fn shutdown(&self) {
        let pools: Vec<Arc<BackendPool>> = {
            let mut map = self.pools.write().await;
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close().await;
        }
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("options", &self.options)
            .finish()
    }
}
