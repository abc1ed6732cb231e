use std::sync::atomic::{AtomicBool, Ordering};

/// Admits at most one holder at a time and rejects everyone else immediately.
#[derive(Debug, Default)]
pub struct SingleFlightGuard {
    held: AtomicBool,
}

/// Proof of holding a [`SingleFlightGuard`]. The guard is released on drop,
/// including during unwinding.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    guard: &'a SingleFlightGuard,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Non-blocking. Returns `None` when another holder is active.
    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { guard: self })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    fn release(&self) {
        let was_held = self.held.swap(false, Ordering::AcqRel);
        debug_assert!(was_held, "released a single-flight guard that was not held");
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.release();
    }
}
