use serde::{Deserialize, Serialize};

/// Run state of the pipeline or of an individual output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Playing,
}

/// Lifecycle of an output stage relative to the pipeline assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Unattached,
    Attached,
    Draining,
    Detached,
}

/// Outcome of sampling the segment clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// No boundary due yet.
    Continue,
    /// A segment boundary is due; rotate the output stage.
    Rotate,
    /// The overall recording ceiling was reached; finish the session.
    Finish,
}

/// Phase of the hand-off coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffPhase {
    Idle,
    Freezing,
    Draining,
    Swapping,
}

/// Delivery mode requested from the upstream transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Reliable, ordered delivery. The only mode the recorder accepts.
    Tcp,
    Udp,
}

/// Asynchronous lifecycle messages posted to the control bus by pipeline
/// components and polled by the session's event loop.
#[derive(Debug, Clone)]
pub enum BusMessage {
    Error {
        component: String,
        message: String,
    },
    /// Session-level end of stream. Per-stage end-of-stream signals are
    /// consumed by the hand-off coordinator and never reach the bus.
    EndOfStream {
        component: String,
    },
    StateChanged {
        component: String,
        old: RunState,
        new: RunState,
    },
    /// Informational announcement from the transport; ignored by the loop.
    StreamsAnnounced {
        component: String,
        count: usize,
    },
}
