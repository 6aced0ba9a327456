//! Correlation table keyed by transaction id.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::application::Application;
use crate::engine::Verdict;

/// State held between a transaction's two phases.
#[derive(Debug, Clone)]
pub struct CorrelationEntry {
    pub application: Arc<Application>,
    pub verdict: Verdict,
    pub started_at: Instant,
    pub expires_at: Instant,
}

impl CorrelationEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// A thread-safe table of pending transactions.
///
/// Cloning shares the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct CorrelationTable {
    inner: Arc<DashMap<String, CorrelationEntry>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: String, entry: CorrelationEntry) {
        self.inner.insert(id, entry);
    }

    /// Remove and return a live entry. Expired entries are dropped and
    /// reported as absent.
    pub fn take(&self, id: &str) -> Option<CorrelationEntry> {
        let (_, entry) = self.inner.remove(id)?;
        if entry.is_expired(Instant::now()) {
            tracing::debug!(correlation_id = id, "Correlation entry expired");
            return None;
        }
        Some(entry)
    }

    /// Drop every entry expired at `now`, returning how many were removed.
    pub fn reap(&self, now: Instant) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.inner.len())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Reap periodically until every handle to the table is gone.
    pub fn spawn_reaper(&self, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<DashMap<String, CorrelationEntry>> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let table = CorrelationTable { inner };
                let reaped = table.reap(Instant::now());
                if reaped > 0 {
                    tracing::debug!(reaped, remaining = table.len(), "Reaped stale transactions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Arguments, EvaluationError, Evaluator, Phase};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Evaluator for Noop {
        async fn evaluate(&self, _: Phase, _: &Arguments) -> Result<Verdict, EvaluationError> {
            Ok(Verdict::none())
        }
    }

    fn entry(ttl: Duration) -> CorrelationEntry {
        let now = Instant::now();
        CorrelationEntry {
            application: Arc::new(Application::new("default", Arc::new(Noop))),
            verdict: Verdict::deny(403),
            started_at: now,
            expires_at: now + ttl,
        }
    }

    #[test]
    fn take_removes_the_entry() {
        let table = CorrelationTable::new();
        table.insert("t1".into(), entry(Duration::from_secs(60)));

        let taken = table.take("t1").unwrap();
        assert_eq!(taken.verdict, Verdict::deny(403));
        assert!(table.take("t1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn expired_entries_are_invisible() {
        let table = CorrelationTable::new();
        table.insert("old".into(), entry(Duration::ZERO));
        assert!(table.take("old").is_none());
    }

    #[test]
    fn reap_only_removes_expired() {
        let table = CorrelationTable::new();
        table.insert("old".into(), entry(Duration::ZERO));
        table.insert("new".into(), entry(Duration::from_secs(60)));

        assert_eq!(table.reap(Instant::now()), 1);
        assert_eq!(table.len(), 1);
        assert!(table.take("new").is_some());
    }

    #[tokio::test]
    async fn reaper_releases_application_references() {
        let table = CorrelationTable::new();
        let e = entry(Duration::from_millis(10));
        let app = Arc::clone(&e.application);
        table.insert("t".into(), e);

        let reaper = table.spawn_reaper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(table.is_empty());
        assert_eq!(Arc::strong_count(&app), 1);

        drop(table);
        tokio::time::timeout(Duration::from_secs(1), reaper)
            .await
            .unwrap()
            .unwrap();
    }
}
