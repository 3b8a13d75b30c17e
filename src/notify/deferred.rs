//! Deferred unit notifications.
//!
//! A published page needs time to propagate before the learner is emailed.
//! Each notice becomes a spawned task that sleeps the delay and then sends,
//! so the sweep never waits on it and can cancel whatever is still pending.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{Notifier, UnitNotice};

pub struct DeferredNotifications {
    notifier: Arc<dyn Notifier>,
    delay: Duration,
    tasks: Mutex<JoinSet<bool>>,
}

/// Outcome counts from [`DeferredNotifications::drain`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DeferredNotifications {
    pub fn new(notifier: Arc<dyn Notifier>, delay: Duration) -> Self {
        Self {
            notifier,
            delay,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, JoinSet<bool>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `notice` for delivery after the configured delay.
    pub fn schedule(&self, notice: UnitNotice) {
        let notifier = Arc::clone(&self.notifier);
        let delay = self.delay;
        debug!(email = %notice.email, index = notice.unit_index, delay_secs = delay.as_secs(), "Notification scheduled");
        self.lock().spawn(async move {
            tokio::time::sleep(delay).await;
            notifier.send_unit(&notice).await
        });
    }

    /// Number of notifications not yet collected.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every queued notification to finish.
    pub async fn drain(&self) -> DrainSummary {
        let mut tasks = std::mem::take(&mut *self.lock());

        let mut summary = DrainSummary::default();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => summary.sent += 1,
                Ok(false) => summary.failed += 1,
                Err(e) if e.is_cancelled() => summary.cancelled += 1,
                Err(e) => {
                    warn!(error = %e, "Notification task panicked");
                    summary.failed += 1;
                }
            }
        }
        if summary != DrainSummary::default() {
            info!(
                sent = summary.sent,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "Notifications drained"
            );
        }
        summary
    }

    /// Abort every notification still waiting out its delay.
    pub fn cancel_all(&self) {
        let mut guard = self.lock();
        if !guard.is_empty() {
            info!(pending = guard.len(), "Cancelling pending notifications");
        }
        guard.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::WelcomeNotice;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        sent: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn send_unit(&self, notice: &UnitNotice) -> bool {
            self.sent.fetch_add(1, Ordering::SeqCst);
            !notice.email.starts_with("fail")
        }
        async fn send_welcome(&self, _: &WelcomeNotice) -> bool {
            true
        }
    }

    fn notice(email: &str) -> UnitNotice {
        UnitNotice {
            email: email.into(),
            topic: "Rust".into(),
            unit_title: "Intro".into(),
            unit_index: 0,
            total_units: 3,
            unit_url: "https://x/00_intro.html".into(),
            plan_url: None,
        }
    }

    #[tokio::test]
    async fn drain_waits_for_all() {
        let notifier = Arc::new(Counting::default());
        let deferred = DeferredNotifications::new(notifier.clone(), Duration::from_millis(5));
        deferred.schedule(notice("a@x.y"));
        deferred.schedule(notice("fail@x.y"));
        assert_eq!(deferred.pending(), 2);

        let summary = deferred.drain().await;
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 2);
        assert_eq!(deferred.pending(), 0);
    }

    #[tokio::test]
    async fn cancel_prevents_sending() {
        let notifier = Arc::new(Counting::default());
        let deferred = DeferredNotifications::new(notifier.clone(), Duration::from_secs(3600));
        deferred.schedule(notice("a@x.y"));
        deferred.cancel_all();

        let summary = deferred.drain().await;
        assert_eq!(summary.cancelled, 1);
        assert_eq!(notifier.sent.load(Ordering::SeqCst), 0);
    }
}
