use std::time::Duration;

use crate::types::BoundaryDecision;

/// Tracks segment boundaries against the pipeline position.
///
/// Boundaries are fixed multiples of the segment interval, not offsets
/// from whenever the previous rotation completed, so rotation latency
/// never accumulates drift. The recording ceiling is checked first: at a
/// position that is both a boundary and the ceiling, the session finishes
/// rather than rotating.
pub struct SegmentClock {
    interval: Duration,
    ceiling: Duration,
    next_boundary: Duration,
}

impl SegmentClock {
    pub fn new(interval: Duration, ceiling: Duration) -> Self {
        Self {
            interval,
            ceiling,
            next_boundary: interval,
        }
    }

    pub fn next_boundary(&self) -> Duration {
        self.next_boundary
    }

    /// Feed one position sample and decide what the session should do.
    /// A boundary fires exactly once: crossing it advances the schedule,
    /// so a repeated sample at the same position yields `Continue`.
    pub fn on_position_sample(&mut self, position: Duration) -> BoundaryDecision {
        if position >= self.ceiling {
            return BoundaryDecision::Finish;
        }
        if position >= self.next_boundary {
            self.next_boundary += self.interval;
            return BoundaryDecision::Rotate;
        }
        BoundaryDecision::Continue
    }
}
