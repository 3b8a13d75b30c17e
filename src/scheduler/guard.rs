//! Mutual exclusion for sweeps.
//!
//! Only one sweep may run at a time. The guard is supplied from outside so a
//! deployment with several processes can plug in its own lock.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

#[async_trait]
pub trait SweepGuard: Send + Sync {
    /// `true` if this caller now holds the guard.
    async fn try_acquire(&self) -> bool;

    async fn release(&self);
}

/// In-process guard backed by an atomic flag.
#[derive(Debug, Default)]
pub struct LocalSweepGuard {
    held: AtomicBool,
}

impl LocalSweepGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SweepGuard for LocalSweepGuard {
    async fn try_acquire(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let guard = LocalSweepGuard::new();
        assert!(guard.try_acquire().await);
        assert!(!guard.try_acquire().await);
        guard.release().await;
        assert!(!guard.is_held());
        assert!(guard.try_acquire().await);
    }
}
