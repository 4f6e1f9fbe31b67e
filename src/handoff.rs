//! The segment hand-off: freeze, drain, swap, resume.
//!
//! A hand-off is a four-phase transaction executed almost entirely on the
//! pipeline's own worker thread:
//!
//! 1. **Freeze** — a freeze interceptor is installed at the hand-off
//!    junction; the next item to reach it reports quiescence and is held.
//! 2. **Drain** — with upstream flow frozen, an end-of-stream signal is
//!    injected into the draining stage. The mux writes its trailer, the
//!    sink flushes, and a one-shot watch on the sink's inbound point fires
//!    when the signal emerges, consuming it.
//! 3. **Swap** — the drained stage is detached and finalized, a fresh
//!    stage is built and attached in its place.
//! 4. **Resume** — the freeze was already removed when quiescence was
//!    reported, so the held item flows into the new stage the moment the
//!    swap completes and the worker thread returns from the callbacks.
//!
//! The coordinator refuses to start a transaction while one is in flight;
//! the session clock keeps sampling and will retry at the next poll.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::assembly::PipelineAssembly;
use crate::flow::FlowItem;
use crate::stage::StageFactory;
use crate::types::HandoffPhase;

pub struct HandoffCoordinator {
    assembly: Arc<PipelineAssembly>,
    factory: StageFactory,
    state: Mutex<CoordinatorState>,
}

struct CoordinatorState {
    phase: HandoffPhase,
    draining: Option<Uuid>,
}

impl HandoffCoordinator {
    pub fn new(assembly: Arc<PipelineAssembly>, factory: StageFactory) -> Arc<Self> {
        Arc::new(Self {
            assembly,
            factory,
            state: Mutex::new(CoordinatorState {
                phase: HandoffPhase::Idle,
                draining: None,
            }),
        })
    }

    pub fn phase(&self) -> HandoffPhase {
        self.state.lock().phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase() == HandoffPhase::Idle
    }

    /// Begin a hand-off transaction. Returns false without side effects if
    /// one is already in flight or there is no stage to rotate away from.
    pub fn begin(self: &Arc<Self>) -> bool {
        let Some(active) = self.assembly.active_stage() else {
            error!("segment boundary reached with no active output stage");
            return false;
        };

        {
            let mut state = self.state.lock();
            if state.phase != HandoffPhase::Idle {
                warn!(phase = ?state.phase, "hand-off already in flight, skipping");
                return false;
            }
            state.phase = HandoffPhase::Freezing;
            state.draining = Some(active);
        }

        info!(stage = %active, "segment boundary: installing freeze interceptor at hand-off junction");
        let this = Arc::clone(self);
        self.assembly
            .junction()
            .install_freeze(move || this.on_frozen());
        true
    }

    /// Runs on the pipeline worker thread, once, with the junction
    /// quiescent and the triggering item held.
    fn on_frozen(self: Arc<Self>) {
        let draining = {
            let mut state = self.state.lock();
            state.phase = HandoffPhase::Draining;
            state.draining
        };

        // The held item resumes only when the worker re-acquires the
        // junction after these callbacks return; removing the freeze now
        // guarantees the worker can never park forever, whatever happens
        // to the rest of the transaction.
        let junction = self.assembly.junction();
        junction.remove_freeze();

        let Some(draining) = draining else {
            error!("freeze reported with no draining stage recorded");
            self.finish();
            return;
        };
        let Some((stage_inbound, drain_point)) = self.assembly.stage_points(draining) else {
            error!(stage = %draining, "draining stage vanished before drain");
            self.finish();
            return;
        };

        self.assembly.mark_draining(draining);
        info!(stage = %draining, "flow frozen, draining segment");

        let this = Arc::clone(&self);
        drain_point.install_eos_watch(move || this.on_drained());

        // Synchronous on this thread: mux trailer, sink flush, then the
        // watch above fires. No coordinator lock may be held here.
        stage_inbound.push(FlowItem::EndOfStream);
    }

    /// Runs when the injected end-of-stream emerges at the sink, meaning
    /// the segment container is complete on disk up to the final flush.
    fn on_drained(self: Arc<Self>) {
        let draining = {
            let mut state = self.state.lock();
            state.phase = HandoffPhase::Swapping;
            state.draining.take()
        };

        if let Some(id) = draining {
            if let Some(mut old) = self.assembly.detach(id) {
                old.finalize();
                info!(stage = %id, path = %old.path().display(), "finalized segment");
            }
        }

        match self.factory.create_stage() {
            Ok(stage) => match self.assembly.attach(stage) {
                Ok(id) => info!(stage = %id, "swap complete, recording resumes"),
                Err(e) => error!(
                    error = %e,
                    "failed to attach replacement stage, recording continues without an active stage, data will be lost"
                ),
            },
            Err(e) => error!(
                error = %e,
                "failed to build replacement stage, recording continues without an active stage, data will be lost"
            ),
        }

        self.finish();
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.phase = HandoffPhase::Idle;
        state.draining = None;
    }
}
