use std::time::Instant;

/// Abstraction over a time source to improve testability.
///
/// The engine itself never reads a wall clock; endpoints take time from the
/// host via `add_time`, and hosts that want automatic polling use a `Clock`.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time instant.
    fn now(&self) -> Instant;
}

/// System clock using `Instant::now()`.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
