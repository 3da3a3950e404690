use tokio::time::Instant;

/// Process-relative clock: all log timestamps and monitor deadlines are
/// milliseconds since engine start.
///
/// Built on the tokio clock so paused-time tests drive it with
/// `tokio::time::advance`.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn start_now() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Milliseconds elapsed since engine start.
    pub fn runtime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
