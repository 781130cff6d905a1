//! Fleet-wide exclusion for sync runs
//!
//! A single lock key guards the whole critical section. Entries carry a TTL so
//! a crashed holder cannot wedge the fleet; a `LockGuard` keeps the entry alive
//! while the run is in progress and releases it when the run ends. If an
//! extension finds the entry owned by someone else, the guard reports the lock
//! as lost and the run must stop writing.

pub mod memory;
pub mod redis;

use crate::error::LockError;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use self::memory::MemoryLock;
pub use self::redis::RedisLock;

/// Default lock key, shared by every instance of the fleet
pub const DEFAULT_LOCK_KEY: &str = "authz:syncer";

/// Default time-to-live of a lock entry
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Shortest keep-alive period, so a tiny TTL does not spin the extender
const MIN_KEEP_ALIVE_PERIOD: Duration = Duration::from_millis(50);

/// Proof of ownership of the lock entry
#[derive(Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are bearer secrets for the lock entry; keep them out of logs.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LockToken(..)")
    }
}

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    Acquired(LockToken),
    /// Another instance holds the lock
    AlreadyHeld,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once to take the lock; never waits for the current holder.
    async fn acquire(&self) -> Result<Acquisition, LockError>;

    /// Push the expiry of a held entry forward by one TTL. `Ok(false)` when the
    /// token no longer owns the entry.
    async fn extend(&self, token: &LockToken) -> Result<bool, LockError>;

    /// Drop the entry if the token still owns it
    async fn release(&self, token: &LockToken) -> Result<(), LockError>;

    fn ttl(&self) -> Duration;
}

/// Take the lock and wrap it in a guard, or `None` when someone else holds it.
pub async fn acquire_guard(lock: Arc<dyn DistributedLock>) -> Result<Option<LockGuard>, LockError> {
    match lock.acquire().await? {
        Acquisition::Acquired(token) => Ok(Some(LockGuard::new(lock, token))),
        Acquisition::AlreadyHeld => Ok(None),
    }
}

/// Held lock. Call `release` on the normal path; dropping a guard that still
/// holds the lock (a cancelled run) schedules a best-effort release on the
/// runtime and otherwise leaves the entry to expire.
pub struct LockGuard {
    lock: Arc<dyn DistributedLock>,
    token: Option<LockToken>,
    keep_alive: JoinHandle<()>,
    lost: watch::Receiver<bool>,
}

impl LockGuard {
    fn new(lock: Arc<dyn DistributedLock>, token: LockToken) -> Self {
        let (lost_tx, lost) = watch::channel(false);
        let keep_alive = spawn_keep_alive(lock.clone(), token.clone(), lost_tx);
        Self {
            lock,
            token: Some(token),
            keep_alive,
            lost,
        }
    }

    /// True once the keep-alive found the entry no longer owned by this guard.
    /// Extension errors alone do not count: ownership is unknown, not gone.
    pub fn is_lost(&self) -> bool {
        *self.lost.borrow()
    }

    /// Release the lock. Failures are logged and swallowed: the TTL reclaims
    /// the entry anyway.
    pub async fn release(mut self) {
        self.keep_alive.abort();
        if let Some(token) = self.token.take() {
            match self.lock.release(&token).await {
                Ok(()) => debug!("Released sync lock"),
                Err(e) => warn!("Failed to release sync lock: {}", e),
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.keep_alive.abort();
        let Some(token) = self.token.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let lock = self.lock.clone();
                handle.spawn(async move {
                    if let Err(e) = lock.release(&token).await {
                        warn!("Failed to release sync lock after cancellation: {}", e);
                    }
                });
            }
            Err(_) => warn!("Sync lock dropped outside a runtime, leaving it to expire"),
        }
    }
}

fn spawn_keep_alive(lock: Arc<dyn DistributedLock>, token: LockToken, lost: watch::Sender<bool>) -> JoinHandle<()> {
    let period = (lock.ttl() / 3).max(MIN_KEEP_ALIVE_PERIOD);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match lock.extend(&token).await {
                Ok(true) => debug!("Extended sync lock"),
                Ok(false) => {
                    warn!("Sync lock was lost while a run was in progress");
                    lost.send_replace(true);
                    return;
                }
                Err(e) => warn!("Failed to extend sync lock: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_releases_on_release() {
        let lock = Arc::new(MemoryLock::new(DEFAULT_LOCK_TTL));

        let guard = acquire_guard(lock.clone()).await.unwrap().unwrap();
        assert!(lock.is_held());
        assert!(acquire_guard(lock.clone()).await.unwrap().is_none());

        guard.release().await;
        assert!(!lock.is_held());
        assert!(acquire_guard(lock.clone()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let lock = Arc::new(MemoryLock::new(DEFAULT_LOCK_TTL));

        let guard = acquire_guard(lock.clone()).await.unwrap().unwrap();
        drop(guard);

        // Let the spawned release run
        for _ in 0..10 {
            if !lock.is_held() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!lock.is_held());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_outlives_ttl() {
        let ttl = Duration::from_secs(3);
        let lock = Arc::new(MemoryLock::new(ttl));

        let guard = acquire_guard(lock.clone()).await.unwrap().unwrap();
        tokio::time::sleep(ttl * 4).await;

        assert!(lock.is_held());
        assert_eq!(lock.acquire().await.unwrap(), Acquisition::AlreadyHeld);
        guard.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_reports_lost_lock() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .returning(|| Ok(Acquisition::Acquired(LockToken::generate())));
        lock.expect_ttl().return_const(Duration::from_millis(150));
        lock.expect_extend().times(1).returning(|_| Ok(false));
        lock.expect_release().returning(|_| Ok(()));

        let guard = acquire_guard(Arc::new(lock)).await.unwrap().unwrap();
        assert!(!guard.is_lost());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(guard.is_lost());
        guard.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_error_does_not_mark_lock_lost() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .returning(|| Ok(Acquisition::Acquired(LockToken::generate())));
        lock.expect_ttl().return_const(Duration::from_millis(150));
        lock.expect_extend()
            .returning(|_| Err(LockError::Timeout(Duration::from_secs(5))));
        lock.expect_release().returning(|_| Ok(()));

        let guard = acquire_guard(Arc::new(lock)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!guard.is_lost());
        guard.release().await;
    }

    #[tokio::test]
    async fn test_release_failure_is_swallowed() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .returning(|| Ok(Acquisition::Acquired(LockToken::generate())));
        lock.expect_ttl().return_const(DEFAULT_LOCK_TTL);
        lock.expect_release()
            .times(1)
            .returning(|_| Err(LockError::Internal("connection reset".to_string())));

        let guard = acquire_guard(Arc::new(lock)).await.unwrap().unwrap();
        guard.release().await;
    }

    #[test]
    fn test_token_is_not_logged() {
        let token = LockToken::generate();
        assert_eq!(format!("{:?}", token), "LockToken(..)");
        assert_eq!(token.as_str().len(), 36);
    }
}
