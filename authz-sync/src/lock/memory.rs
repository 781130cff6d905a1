//! In-process lock for tests and single-instance deployments

use super::{Acquisition, DistributedLock, LockToken};
use crate::error::LockError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct Entry {
    token: LockToken,
    expires_at: Instant,
}

/// Lock shared through an `Arc` by every engine of one process. Expiry follows
/// the tokio clock, so paused-time tests can drive it.
pub struct MemoryLock {
    ttl: Duration,
    entry: Mutex<Option<Entry>>,
}

impl MemoryLock {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// True while an unexpired entry exists
    pub fn is_held(&self) -> bool {
        self.entry
            .lock()
            .as_ref()
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new(super::DEFAULT_LOCK_TTL)
    }
}

#[async_trait]
impl DistributedLock for MemoryLock {
    async fn acquire(&self) -> Result<Acquisition, LockError> {
        let mut entry = self.entry.lock();
        let now = Instant::now();
        if entry.as_ref().is_some_and(|held| held.expires_at > now) {
            return Ok(Acquisition::AlreadyHeld);
        }

        let token = LockToken::generate();
        *entry = Some(Entry {
            token: token.clone(),
            expires_at: now + self.ttl,
        });
        Ok(Acquisition::Acquired(token))
    }

    async fn extend(&self, token: &LockToken) -> Result<bool, LockError> {
        let mut entry = self.entry.lock();
        let now = Instant::now();
        match entry.as_mut() {
            Some(held) if held.token == *token && held.expires_at > now => {
                held.expires_at = now + self.ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, token: &LockToken) -> Result<(), LockError> {
        let mut entry = self.entry.lock();
        if entry.as_ref().is_some_and(|held| held.token == *token) {
            *entry = None;
        }
        Ok(())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
