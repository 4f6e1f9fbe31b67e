//! The fixed shared chain between the transport and the hand-off junction:
//! depacketizer → parser → jitter queue. These stay attached and running
//! for the whole session; output stages come and go downstream of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::flow::{FlowItem, FlowPoint, MediaBuffer};
use crate::source::PACKET_HEADER_LEN;

/// Monotonic elapsed playback position, recorded at the jitter queue
/// outlet and sampled by the segment clock. Never persisted.
pub struct PositionTracker(AtomicU64);

impl PositionTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(0)))
    }

    pub fn record(&self, pts: Duration) {
        self.0.fetch_max(pts.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::SeqCst))
    }
}

/// Strips the transport packet header, recovering the elementary stream.
pub struct Depacketizer {
    inbound: Arc<FlowPoint>,
    outbound: Arc<FlowPoint>,
}

impl Depacketizer {
    pub fn new() -> Self {
        let inbound = FlowPoint::new("depay.sink");
        let outbound = FlowPoint::new("depay.src");
        let out = Arc::clone(&outbound);
        inbound.set_consumer(move |item| match item {
            FlowItem::Data(packet) => match depacketize(packet) {
                Some(buffer) => out.push(FlowItem::Data(buffer)),
                None => warn!("discarding truncated transport packet"),
            },
            FlowItem::EndOfStream => out.push(FlowItem::EndOfStream),
        });
        Self { inbound, outbound }
    }

    pub fn inbound(&self) -> &Arc<FlowPoint> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<FlowPoint> {
        &self.outbound
    }
}

fn depacketize(packet: MediaBuffer) -> Option<MediaBuffer> {
    if packet.payload.len() < PACKET_HEADER_LEN {
        return None;
    }
    Some(MediaBuffer {
        pts: packet.pts,
        payload: packet.payload.slice(PACKET_HEADER_LEN..),
    })
}

/// Validates the elementary stream; pts must be non-decreasing.
pub struct StreamParser {
    inbound: Arc<FlowPoint>,
    outbound: Arc<FlowPoint>,
}

impl StreamParser {
    pub fn new() -> Self {
        let inbound = FlowPoint::new("parse.sink");
        let outbound = FlowPoint::new("parse.src");
        let out = Arc::clone(&outbound);
        let last_pts = Mutex::new(Duration::ZERO);
        inbound.set_consumer(move |item| {
            if let FlowItem::Data(buffer) = &item {
                let mut last = last_pts.lock();
                if buffer.pts < *last {
                    warn!(
                        pts_ms = buffer.pts.as_millis() as u64,
                        last_ms = last.as_millis() as u64,
                        "non-monotonic pts in elementary stream"
                    );
                } else {
                    *last = buffer.pts;
                }
            }
            out.push(item);
        });
        Self { inbound, outbound }
    }

    pub fn inbound(&self) -> &Arc<FlowPoint> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<FlowPoint> {
        &self.outbound
    }
}

/// Absorbs timing jitter ahead of the hand-off junction and records the
/// elapsed position of everything that crossed it. Its outbound point is
/// the junction where the hand-off coordinator freezes flow.
pub struct JitterQueue {
    inbound: Arc<FlowPoint>,
    outbound: Arc<FlowPoint>,
}

impl JitterQueue {
    pub fn new(position: Arc<PositionTracker>) -> Self {
        let inbound = FlowPoint::new("queue.sink");
        let outbound = FlowPoint::new("queue.src");
        let out = Arc::clone(&outbound);
        inbound.set_consumer(move |item| {
            if let FlowItem::Data(buffer) = &item {
                position.record(buffer.pts);
            }
            out.push(item);
        });
        Self { inbound, outbound }
    }

    pub fn inbound(&self) -> &Arc<FlowPoint> {
        &self.inbound
    }

    pub fn outbound(&self) -> &Arc<FlowPoint> {
        &self.outbound
    }
}
