//! Fail-fast admission control for projections.
//!
//! Projections fan out into worker tasks proportional to the size of the
//! decision model, so only they are gated; appends and plain reads are
//! not. Admission never queues: when every slot is taken the attempt fails
//! immediately with [`StoreError::TooManyProjections`] and the caller
//! decides how to back off.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::StoreError;

/// Bounded admission gate shared by every clone of an event store.
#[derive(Debug, Clone)]
pub struct ProjectionLimiter {
    slots: Arc<Semaphore>,
    max_concurrent: usize,
}

/// An admitted projection. The slot is released when this is dropped.
#[derive(Debug)]
pub struct ProjectionPermit {
    _permit: OwnedSemaphorePermit,
}

impl ProjectionLimiter {
    /// Create a gate admitting at most `max_concurrent` projections.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Configured admission limit.
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Projections currently admitted.
    pub fn in_flight(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.slots.available_permits())
    }

    /// Admit one projection without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TooManyProjections`] when the gate is full.
    pub fn try_admit(&self) -> Result<ProjectionPermit, StoreError> {
        match Arc::clone(&self.slots).try_acquire_owned() {
            Ok(permit) => Ok(ProjectionPermit { _permit: permit }),
            Err(TryAcquireError::NoPermits | TryAcquireError::Closed) => {
                let current_count = self.in_flight();
                tracing::warn!(
                    max_concurrent = self.max_concurrent,
                    current_count,
                    "Projection rejected: admission gate full"
                );
                Err(StoreError::TooManyProjections {
                    max_concurrent: self.max_concurrent,
                    current_count,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_limit_then_fails_fast() {
        let limiter = ProjectionLimiter::new(2);
        let first = limiter.try_admit();
        let second = limiter.try_admit();
        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(limiter.in_flight(), 2);

        let third = limiter.try_admit();
        assert!(matches!(
            third,
            Err(StoreError::TooManyProjections {
                max_concurrent: 2,
                current_count: 2
            })
        ));
    }

    #[test]
    fn dropping_a_permit_frees_the_slot() {
        let limiter = ProjectionLimiter::new(1);
        let permit = limiter.try_admit();
        assert!(limiter.try_admit().is_err());
        drop(permit);
        assert_eq!(limiter.in_flight(), 0);
        assert!(limiter.try_admit().is_ok());
    }

    #[test]
    fn clones_share_the_same_slots() {
        let limiter = ProjectionLimiter::new(1);
        let clone = limiter.clone();
        let _held = limiter.try_admit();
        assert!(clone.try_admit().is_err());
    }

    #[tokio::test]
    async fn concurrent_holders_block_the_next_attempt_without_waiting() {
        let limiter = ProjectionLimiter::new(3);
        let (release_tx, _) = tokio::sync::broadcast::channel::<()>(1);
        let mut handles = Vec::new();
        let (admitted_tx, mut admitted_rx) = tokio::sync::mpsc::channel(3);

        for _ in 0..3 {
            let limiter = limiter.clone();
            let mut release = release_tx.subscribe();
            let admitted = admitted_tx.clone();
            handles.push(tokio::spawn(async move {
                let permit = limiter.try_admit();
                let ok = permit.is_ok();
                let _ = admitted.send(ok).await;
                let _ = release.recv().await;
                drop(permit);
            }));
        }
        for _ in 0..3 {
            assert_eq!(admitted_rx.recv().await, Some(true));
        }

        let started = std::time::Instant::now();
        let rejected = limiter.try_admit();
        assert!(started.elapsed() < std::time::Duration::from_millis(50));
        assert!(matches!(
            rejected,
            Err(StoreError::TooManyProjections {
                max_concurrent: 3,
                current_count: 3
            })
        ));

        let _ = release_tx.send(());
        for handle in handles {
            let _ = handle.await;
        }
        assert_eq!(limiter.in_flight(), 0);
    }
}
