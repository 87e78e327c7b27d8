//! Per-period async mutexes.
//!
//! Every writer that checks a period and then moves it (`start`, `stop`,
//! bulk close and bulk open) holds the period's lock across check and write.
//! An entry lives only while some caller holds or waits on it.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct PeriodLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl PeriodLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `period_id`
    pub async fn acquire(&self, period_id: i64) -> PeriodGuard<'_> {
        let lock = self.locks.entry(period_id).or_default().clone();
        let guard = lock.lock_owned().await;
        PeriodGuard {
            locks: &self.locks,
            period_id,
            guard: Some(guard),
        }
    }

    /// Periods with a holder or waiter
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct PeriodGuard<'a> {
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
    period_id: i64,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PeriodGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map's handle is the only one left when idle
        self.guard.take();
        self.locks
            .remove_if(&self.period_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl std::fmt::Debug for PeriodGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodGuard")
            .field("period_id", &self.period_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_entry_dropped_after_release() {
        let locks = PeriodLocks::new();
        {
            let _guard = locks.acquire(7).await;
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = Arc::new(PeriodLocks::new());
        let first = locks.acquire(3).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(3).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_periods_do_not_block() {
        let locks = PeriodLocks::new();
        let _a = locks.acquire(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(2)).await;
        assert!(b.is_ok());
        assert_eq!(locks.len(), 2);
    }
}
