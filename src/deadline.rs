use tokio::time::{Duration, Instant};

/// A caller-supplied point in time by which an operation must complete.
/// Wraps [`tokio::time::Instant`] so coordinator operations can race useful
/// work against `tokio::time::timeout_at` without threading raw durations
/// through every layer.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn instant(&self) -> Instant {
        self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.0
    }
}
