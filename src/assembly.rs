//! The assembled pipeline: source → depacketizer → parser → jitter queue
//! → hand-off junction → (at most one attached output stage).
//!
//! The upstream chain is built once and never restarted. Output stages
//! attach to and detach from the junction while data keeps flowing; the
//! hand-off coordinator is the only caller that mutates the junction
//! while the pipeline is live, and it does so only under its freeze
//! guarantee.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::errors::{LinkError, TransportError};
use crate::flow::FlowPoint;
use crate::source::{StreamEvents, StreamSource};
use crate::stage::OutputStage;
use crate::types::{AttachmentState, BusMessage, RunState};
use crate::upstream::{Depacketizer, JitterQueue, PositionTracker, StreamParser};

pub const PIPELINE_COMPONENT: &str = "pipeline";
pub const JUNCTION_COMPONENT: &str = "hand-off-junction";

pub struct PipelineAssembly {
    source: Arc<dyn StreamSource>,
    depay: Depacketizer,
    queue: JitterQueue,
    position: Arc<PositionTracker>,
    shared: Mutex<AssemblyShared>,
    bus: UnboundedSender<BusMessage>,
    expected_media_prefix: String,
    lost_units: Arc<AtomicU64>,
}

struct AssemblyShared {
    stages: HashMap<Uuid, OutputStage>,
    active: Option<Uuid>,
    run_state: RunState,
}

impl PipelineAssembly {
    pub fn new(
        source: Arc<dyn StreamSource>,
        expected_media_prefix: String,
        bus: UnboundedSender<BusMessage>,
    ) -> Result<Self, LinkError> {
        let position = PositionTracker::new();
        let depay = Depacketizer::new();
        let parser = StreamParser::new();
        let queue = JitterQueue::new(Arc::clone(&position));

        FlowPoint::link(depay.outbound(), parser.inbound())?;
        FlowPoint::link(parser.outbound(), queue.inbound())?;

        let lost_units = Arc::new(AtomicU64::new(0));
        let lost = Arc::clone(&lost_units);
        let fallback_bus = bus.clone();
        queue.outbound().set_fallback(move |item| {
            if item.is_eos() {
                // Nothing downstream will finalize; let the session see the
                // end of stream anyway so it can terminate.
                let _ = fallback_bus.send(BusMessage::EndOfStream {
                    component: JUNCTION_COMPONENT.to_string(),
                });
                return;
            }
            if lost.fetch_add(1, Ordering::SeqCst) == 0 {
                warn!("no active output stage, data lost");
            }
        });

        Ok(Self {
            source,
            depay,
            queue,
            position,
            shared: Mutex::new(AssemblyShared {
                stages: HashMap::new(),
                active: None,
                run_state: RunState::Stopped,
            }),
            bus,
            expected_media_prefix,
            lost_units,
        })
    }

    /// The point upstream of every output stage; the freeze interceptor
    /// for a hand-off is installed here.
    pub fn junction(&self) -> Arc<FlowPoint> {
        Arc::clone(self.queue.outbound())
    }

    /// Elapsed playback position of data that has reached the junction.
    pub fn query_position(&self) -> Duration {
        self.position.get()
    }

    /// Data units that arrived at the junction with no stage attached.
    pub fn lost_units(&self) -> u64 {
        self.lost_units.load(Ordering::SeqCst)
    }

    /// Attach a stage to the junction and make it the active one. The
    /// stage inherits the pipeline's run state.
    pub fn attach(&self, mut stage: OutputStage) -> Result<Uuid, LinkError> {
        let mut shared = self.shared.lock();
        FlowPoint::link(&self.junction(), &stage.inbound())?;
        let id = stage.id();
        stage.set_attachment(AttachmentState::Attached);
        stage.set_run_state(shared.run_state);
        shared.stages.insert(id, stage);
        shared.active = Some(id);
        debug!(stage = %id, "output stage attached");
        Ok(id)
    }

    /// Remove a stage from the junction and from the assembly. The caller
    /// takes ownership; the upstream chain is untouched.
    pub fn detach(&self, id: Uuid) -> Option<OutputStage> {
        let mut shared = self.shared.lock();
        let mut stage = shared.stages.remove(&id)?;
        self.junction().unlink();
        stage.set_attachment(AttachmentState::Detached);
        if shared.active == Some(id) {
            shared.active = None;
        }
        debug!(stage = %id, "output stage detached");
        Some(stage)
    }

    pub fn active_stage(&self) -> Option<Uuid> {
        self.shared.lock().active
    }

    pub fn mark_draining(&self, id: Uuid) {
        let mut shared = self.shared.lock();
        if let Some(stage) = shared.stages.get_mut(&id) {
            stage.set_attachment(AttachmentState::Draining);
        }
    }

    /// Facade and sink points of a stage, for the drain sequence.
    pub fn stage_points(&self, id: Uuid) -> Option<(Arc<FlowPoint>, Arc<FlowPoint>)> {
        let shared = self.shared.lock();
        let stage = shared.stages.get(&id)?;
        Some((stage.inbound(), stage.drain_point()))
    }

    /// Bring the pipeline to the playing state and start the source.
    pub async fn start(&self) -> Result<(), TransportError> {
        {
            let mut shared = self.shared.lock();
            let old = shared.run_state;
            shared.run_state = RunState::Playing;
            for stage in shared.stages.values_mut() {
                stage.set_run_state(RunState::Playing);
            }
            let _ = self.bus.send(BusMessage::StateChanged {
                component: PIPELINE_COMPONENT.to_string(),
                old,
                new: RunState::Playing,
            });
        }

        let events = StreamEvents {
            on_stream: self.stream_handler(),
            bus: self.bus.clone(),
        };
        self.source.start(events).await
    }

    /// Request a session-level end of stream from the source. It will
    /// flow through the upstream chain into the active stage.
    pub fn send_eos(&self) {
        self.source.request_eos();
    }

    /// Stop the source worker, then stop and finalize every remaining
    /// stage. A stage that never drained yields a torn segment file; the
    /// file handle is still released here.
    pub fn shutdown(&self) {
        // Join the worker before taking any assembly lock; it may be
        // blocked inside a push that needs the junction.
        self.source.shutdown();

        let mut shared = self.shared.lock();
        let old = shared.run_state;
        shared.run_state = RunState::Stopped;
        for stage in shared.stages.values_mut() {
            stage.finalize();
        }
        let _ = self.bus.send(BusMessage::StateChanged {
            component: PIPELINE_COMPONENT.to_string(),
            old,
            new: RunState::Stopped,
        });
        info!("pipeline stopped");
    }

    fn stream_handler(&self) -> Arc<dyn Fn(crate::source::StreamAnnouncement) + Send + Sync> {
        let depay_in = Arc::clone(self.depay.inbound());
        let prefix = self.expected_media_prefix.clone();
        let linked = AtomicBool::new(false);
        Arc::new(move |announcement| {
            info!(
                stream = %announcement.name,
                media_type = %announcement.media_type,
                "stream announced"
            );
            if !announcement.media_type.starts_with(&prefix) {
                debug!(stream = %announcement.name, "unrecognized media type, ignoring");
                return;
            }
            if linked.swap(true, Ordering::SeqCst) {
                warn!(stream = %announcement.name, "pipeline already linked, ignoring");
                return;
            }
            if let Err(e) = FlowPoint::link(&announcement.point, &depay_in) {
                error!(error = %e, "failed to link announced stream");
            }
        })
    }
}
