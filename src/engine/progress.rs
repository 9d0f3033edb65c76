// Progress throttling and throughput estimation for a single download.

use std::time::{Duration, Instant};

struct ProgressSample {
    at: Instant,
    bytes: u64,
}

/// Decides when a progress report is due and tracks download rate.
///
/// Reports are spaced at least `interval` apart and never go backwards in
/// byte count; `finish` always lets the final count through.
pub struct ProgressMeter {
    interval: Duration,
    started: Instant,
    last_report: Option<ProgressSample>,
}

impl ProgressMeter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: Instant::now(),
            last_report: None,
        }
    }

    /// Returns `true` if `bytes` should be reported now.
    pub fn should_report(&mut self, bytes: u64) -> bool {
        let now = Instant::now();
        if let Some(last) = &self.last_report {
            if bytes < last.bytes || now.duration_since(last.at) < self.interval {
                return false;
            }
        }
        self.last_report = Some(ProgressSample { at: now, bytes });
        true
    }

    /// Returns `true` if the final count has not been reported yet.
    pub fn finish(&mut self, bytes: u64) -> bool {
        match &self.last_report {
            Some(last) if last.bytes >= bytes => false,
            _ => {
                self.last_report = Some(ProgressSample {
                    at: Instant::now(),
                    bytes,
                });
                true
            }
        }
    }

    /// Average throughput since the meter was created.
    pub fn bytes_per_second(&self, bytes: u64) -> u64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.1 {
            (bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
