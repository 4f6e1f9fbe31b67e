use std::time::Duration;

use crate::clock::SegmentClock;
use crate::types::BoundaryDecision;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[test]
fn rotation_schedule_over_a_full_session() {
    let mut clock = SegmentClock::new(secs(10), secs(30));

    assert_eq!(clock.on_position_sample(secs(5)), BoundaryDecision::Continue);
    assert_eq!(clock.on_position_sample(secs(10)), BoundaryDecision::Rotate);
    assert_eq!(
        clock.on_position_sample(Duration::from_millis(10_500)),
        BoundaryDecision::Continue
    );
    assert_eq!(clock.on_position_sample(secs(20)), BoundaryDecision::Rotate);
    assert_eq!(clock.on_position_sample(secs(29)), BoundaryDecision::Continue);
    assert_eq!(clock.on_position_sample(secs(30)), BoundaryDecision::Finish);
    // Past the ceiling it keeps saying finish.
    assert_eq!(clock.on_position_sample(secs(31)), BoundaryDecision::Finish);
}

#[test]
fn exact_boundary_fires_once() {
    let mut clock = SegmentClock::new(secs(10), secs(30));
    assert_eq!(clock.on_position_sample(secs(10)), BoundaryDecision::Rotate);
    assert_eq!(clock.on_position_sample(secs(10)), BoundaryDecision::Continue);
    assert_eq!(clock.next_boundary(), secs(20));
}

#[test]
fn ceiling_takes_precedence_over_a_coinciding_boundary() {
    let mut clock = SegmentClock::new(secs(10), secs(10));
    assert_eq!(clock.on_position_sample(secs(10)), BoundaryDecision::Finish);
}

#[test]
fn overshoot_past_a_boundary_still_rotates() {
    let mut clock = SegmentClock::new(secs(10), secs(60));
    // Position samples are polled, so a boundary is usually observed late.
    assert_eq!(
        clock.on_position_sample(Duration::from_millis(10_340)),
        BoundaryDecision::Rotate
    );
    assert_eq!(clock.next_boundary(), secs(20));
}

#[test]
fn sub_boundary_samples_never_rotate() {
    let mut clock = SegmentClock::new(secs(10), secs(30));
    for ms in (0..10_000).step_by(100) {
        assert_eq!(
            clock.on_position_sample(Duration::from_millis(ms)),
            BoundaryDecision::Continue
        );
    }
}
