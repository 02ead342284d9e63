//! Global critical section around the non-reentrant renderer state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Process-wide lock around the shared base renderer.
///
/// Held only for layout extraction, handle cloning and backend-owned teardown.
/// Rasterization never runs under it.
pub struct RenderBackendGuard<B> {
    base: Mutex<B>,
    acquisitions: AtomicU64,
    held_nanos: AtomicU64,
}

/// Lock usage counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GuardStats {
    pub acquisitions: u64,
    pub held: Duration,
}

impl<B> RenderBackendGuard<B> {
    #[must_use]
    pub fn new(base: B) -> Self {
        Self {
            base: Mutex::new(base),
            acquisitions: AtomicU64::new(0),
            held_nanos: AtomicU64::new(0),
        }
    }

    /// Run `f` with exclusive access to the base renderer.
    ///
    /// A panic inside a previous holder poisons the mutex; the base is still
    /// handed out since the backend keeps no invariants across calls that a
    /// partial layout could break.
    pub fn with_exclusive<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        let mut base = self.base.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();
        let out = f(&mut base);
        let held = started.elapsed();
        drop(base);

        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.held_nanos.fetch_add(
            u64::try_from(held.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        out
    }

    #[must_use]
    pub fn stats(&self) -> GuardStats {
        GuardStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            held: Duration::from_nanos(self.held_nanos.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    use super::*;

    #[test]
    fn with_exclusive_returns_closure_value() {
        let guard = RenderBackendGuard::new(41_u32);
        let out = guard.with_exclusive(|n| {
            *n += 1;
            *n
        });
        assert_eq!(out, 42);
        assert_eq!(guard.stats().acquisitions, 1);
    }

    #[test]
    fn sections_never_overlap() {
        let guard = Arc::new(RenderBackendGuard::new(()));
        let inside = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        guard.with_exclusive(|()| {
                            assert!(!inside.swap(true, Ordering::SeqCst));
                            std::hint::spin_loop();
                            inside.store(false, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        assert_eq!(guard.stats().acquisitions, 800);
    }

    #[test]
    fn survives_poisoning() {
        let guard = Arc::new(RenderBackendGuard::new(0_u8));
        let poisoner = Arc::clone(&guard);
        let result = thread::spawn(move || {
            poisoner.with_exclusive(|_| panic!("layout blew up"));
        })
        .join();
        assert!(result.is_err());

        assert_eq!(guard.with_exclusive(|n| *n), 0);
    }
}
