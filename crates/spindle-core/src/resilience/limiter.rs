//! Concurrency limiter: at most `capacity` permits are out at any time.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many tasks may execute at once.
///
/// Backed by a tokio `Semaphore` (FIFO waiters). `in_use` is tracked next to
/// it so the `0 <= in_use <= capacity` invariant can be checked on every
/// acquire and release; a violation is a bookkeeping defect and panics.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    in_use: Arc<AtomicUsize>,
    capacity: usize,
}

/// One concurrency slot. The slot is returned when the permit is dropped,
/// so it is released exactly once on every exit path.
#[must_use = "dropping the permit releases the slot immediately"]
pub struct Permit {
    // `in_use` is decremented in `Drop::drop`, which runs before this field
    // hands the semaphore permit back.
    _permit: OwnedSemaphorePermit,
    in_use: Arc<AtomicUsize>,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "concurrency limiter needs at least one slot");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_use: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Permit {
        // The semaphore is owned here and never closed.
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .unwrap_or_else(|_| panic!("concurrency limiter semaphore closed"));
        self.wrap(permit)
    }

    /// Take a free slot if there is one.
    pub fn try_acquire(&self) -> Option<Permit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        Some(self.wrap(permit))
    }

    /// Return a slot. Same as dropping the permit.
    pub fn release(&self, permit: Permit) {
        drop(permit);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    fn wrap(&self, permit: OwnedSemaphorePermit) -> Permit {
        let previous = self.in_use.fetch_add(1, Ordering::SeqCst);
        assert!(
            previous < self.capacity,
            "concurrency limiter over capacity: {} > {}",
            previous + 1,
            self.capacity
        );
        Permit {
            _permit: permit,
            in_use: Arc::clone(&self.in_use),
        }
    }
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let previous = self.in_use.fetch_sub(1, Ordering::SeqCst);
        assert!(previous > 0, "concurrency limiter released more slots than acquired");
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}
