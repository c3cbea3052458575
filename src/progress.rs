//! Progress and time-remaining bookkeeping for long reductions.
//!
//! This is observability only.  Whether or not anyone listens, the
//! carved image comes out the same.

use std::time::{Duration, Instant};

/// A snapshot of a reduction in flight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// Seams removed so far.
    pub removed: u32,
    /// Seams the run will remove in total.
    pub total: u32,
    /// Wall time since the run started.
    pub elapsed: Duration,
}

impl Progress {
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (u64::from(self.removed) * 100 / u64::from(self.total)) as u32
    }

    /// Mean wall time per removed seam.
    pub fn average_per_seam(&self) -> Duration {
        if self.removed == 0 {
            return Duration::from_secs(0);
        }
        self.elapsed / self.removed
    }

    /// Estimated time left: seams still to go, times the average so far.
    pub fn remaining(&self) -> Duration {
        self.average_per_seam() * self.total.saturating_sub(self.removed)
    }
}

/// Decides when a run is worth reporting on: every tenth of the way,
/// and always on the last seam.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u32,
    interval: u32,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: u32) -> Self {
        ProgressTracker {
            total,
            interval: (total / 10).max(1),
            started: Instant::now(),
        }
    }

    pub fn should_report(&self, removed: u32) -> bool {
        removed == self.total || (removed > 0 && removed % self.interval == 0)
    }

    pub fn snapshot(&self, removed: u32) -> Progress {
        Progress {
            removed,
            total: self.total,
            elapsed: self.started.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eta_is_average_times_remaining() {
        let p = Progress {
            removed: 4,
            total: 10,
            elapsed: Duration::from_millis(400),
        };
        assert_eq!(p.average_per_seam(), Duration::from_millis(100));
        assert_eq!(p.remaining(), Duration::from_millis(600));
        assert_eq!(p.percent(), 40);
    }

    #[test]
    fn nothing_removed_yet() {
        let p = Progress {
            removed: 0,
            total: 10,
            elapsed: Duration::from_millis(15),
        };
        assert_eq!(p.remaining(), Duration::from_secs(0));
        assert_eq!(p.percent(), 0);
    }

    #[test]
    fn reports_every_tenth_and_the_last() {
        let tracker = ProgressTracker::new(25);
        let reported: Vec<u32> = (1..=25).filter(|n| tracker.should_report(*n)).collect();
        assert_eq!(reported, vec![2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22, 24, 25]);
    }

    #[test]
    fn short_runs_report_every_seam() {
        let tracker = ProgressTracker::new(3);
        assert!((1..=3).all(|n| tracker.should_report(n)));
        assert!(!tracker.should_report(0));
    }
}
