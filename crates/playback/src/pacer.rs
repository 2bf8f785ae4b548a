//! Maps capture time onto wall-clock time.

use std::time::{Duration, Instant};

/// Pairs a wall-clock instant with the capture time that should be shown at
/// that instant. A sample is due once the wall clock has advanced at least
/// as far past the base as its capture time has.
#[derive(Debug, Clone)]
pub struct Pacer {
    base_wall: Instant,
    base_capture: Option<u64>,
}

impl Pacer {
    pub fn new() -> Self {
        Self {
            base_wall: Instant::now(),
            base_capture: None,
        }
    }

    /// Re-anchor the wall clock to `capture`. With `None` the anchor is
    /// taken from the first sample asked about afterwards.
    pub fn rebase(&mut self, capture: Option<u64>) {
        self.base_wall = Instant::now();
        self.base_capture = capture;
    }

    /// Microseconds until a sample captured at `capture` is due. Zero or
    /// negative means it is due now.
    pub fn time_until_due(&mut self, capture: u64) -> i64 {
        let base = match self.base_capture {
            Some(base) => base,
            None => {
                self.rebase(Some(capture));
                capture
            }
        };
        let media = capture as i64 - base as i64;
        let elapsed = self.base_wall.elapsed().as_micros() as i64;
        media - elapsed
    }

    /// Wall-clock time since the last rebase.
    pub fn run_time(&self) -> Duration {
        self.base_wall.elapsed()
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_sample_anchors_lazily() {
        let mut pacer = Pacer::new();
        assert!(pacer.time_until_due(5_000_000) <= 0);
        let wait = pacer.time_until_due(5_100_000);
        assert!(wait > 50_000 && wait <= 100_000, "wait was {wait}");
    }

    #[test]
    fn later_samples_wait_for_their_offset() {
        let mut pacer = Pacer::new();
        pacer.rebase(Some(1_000_000));
        let wait = pacer.time_until_due(1_100_000);
        assert!(wait > 50_000 && wait <= 100_000, "wait was {wait}");
        assert!(pacer.time_until_due(900_000) < 0);
    }

    #[test]
    fn waits_shrink_as_wall_clock_advances() {
        let mut pacer = Pacer::new();
        pacer.rebase(Some(0));
        let before = pacer.time_until_due(50_000);
        thread::sleep(Duration::from_millis(20));
        let after = pacer.time_until_due(50_000);
        assert!(before - after >= 20_000);
        assert!(pacer.run_time() >= Duration::from_millis(20));
    }
}
