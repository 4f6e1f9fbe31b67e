//! The recording session: builds the pipeline, runs the event loop, and
//! drives segment rotation from position samples.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::assembly::{PipelineAssembly, PIPELINE_COMPONENT};
use crate::clock::SegmentClock;
use crate::config::RecorderConfig;
use crate::errors::{ConstructionError, RecorderError, TransportError, UnexpectedSignalError};
use crate::handoff::HandoffCoordinator;
use crate::source::{SimRtspSource, StreamSource, SOURCE_COMPONENT};
use crate::stage::StageFactory;
use crate::types::{BoundaryDecision, BusMessage, RunState};

/// Assembles a [`RecordingSession`] from configuration, optionally with a
/// caller-supplied stream source in place of the built-in simulated one.
pub struct SessionBuilder {
    config: RecorderConfig,
    source: Option<Arc<dyn StreamSource>>,
}

impl SessionBuilder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn StreamSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn build(self) -> Result<RecordingSession, RecorderError> {
        self.config.validate()?;

        let output_dir = self.config.recording.output_dir.clone();
        std::fs::create_dir_all(&output_dir).map_err(|source| {
            ConstructionError::OutputDirectory {
                path: output_dir.clone(),
                source,
            }
        })?;

        let (bus_tx, bus_rx) = tokio::sync::mpsc::unbounded_channel();

        let source: Arc<dyn StreamSource> = match self.source {
            Some(source) => source,
            None => Arc::new(SimRtspSource::from_config(
                &self.config.source,
                &self.config.simulation,
            )?),
        };

        let assembly = Arc::new(PipelineAssembly::new(
            source,
            self.config.source.expected_media_prefix.clone(),
            bus_tx.clone(),
        )?);

        let factory = StageFactory::new(output_dir, bus_tx);
        let initial = factory.create_stage()?;
        let coordinator = HandoffCoordinator::new(Arc::clone(&assembly), factory);
        assembly.attach(initial)?;

        let clock = SegmentClock::new(
            self.config.recording.segment_interval,
            self.config.recording.recording_ceiling,
        );

        Ok(RecordingSession {
            config: self.config,
            assembly,
            coordinator,
            clock,
            bus_rx,
            playing: false,
            finishing: false,
        })
    }
}

/// What a completed session reports back.
pub struct SessionOutcome {
    /// Final elapsed playback position.
    pub elapsed: Duration,
}

pub struct RecordingSession {
    config: RecorderConfig,
    assembly: Arc<PipelineAssembly>,
    coordinator: Arc<HandoffCoordinator>,
    clock: SegmentClock,
    bus_rx: tokio::sync::mpsc::UnboundedReceiver<BusMessage>,
    playing: bool,
    finishing: bool,
}

impl RecordingSession {
    /// Run to completion: until the session-level end of stream after the
    /// recording ceiling, or a fatal error. The pipeline is always shut
    /// down on the way out, whatever the loop returned.
    pub async fn run(&mut self) -> Result<SessionOutcome, RecorderError> {
        self.assembly.start().await?;
        let result = self.event_loop().await;
        self.assembly.shutdown();
        let lost = self.assembly.lost_units();
        if lost > 0 {
            warn!(lost, "data units were lost while no stage was attached");
        }
        result.map(|()| SessionOutcome {
            elapsed: self.assembly.query_position(),
        })
    }

    async fn event_loop(&mut self) -> Result<(), RecorderError> {
        loop {
            match timeout(self.config.session.poll_period, self.bus_rx.recv()).await {
                Ok(Some(message)) => {
                    if let Some(outcome) = self.handle_message(message) {
                        return outcome;
                    }
                }
                Ok(None) => {
                    warn!("control bus closed unexpectedly");
                    return Ok(());
                }
                Err(_) => self.on_poll_timeout(),
            }
        }
    }

    /// Returns Some to terminate the loop.
    fn handle_message(&mut self, message: BusMessage) -> Option<Result<(), RecorderError>> {
        match message {
            BusMessage::Error { component, message } => {
                if component == SOURCE_COMPONENT {
                    Some(Err(RecorderError::Transport(TransportError::StreamFailed {
                        reason: message,
                    })))
                } else {
                    Some(Err(RecorderError::Component { component, message }))
                }
            }
            BusMessage::EndOfStream { component } => {
                info!(component = %component, "end of stream, session complete");
                Some(Ok(()))
            }
            BusMessage::StateChanged {
                component,
                old,
                new,
            } => {
                if component == PIPELINE_COMPONENT {
                    self.playing = new == RunState::Playing;
                    info!(?old, ?new, "pipeline state changed");
                } else {
                    debug!(component = %component, ?old, ?new, "component state changed");
                }
                None
            }
            BusMessage::StreamsAnnounced { component, count } => {
                let signal = UnexpectedSignalError {
                    component,
                    kind: format!("streams-announced({count})"),
                };
                debug!("{signal}");
                None
            }
        }
    }

    fn on_poll_timeout(&mut self) {
        if !self.playing || self.finishing {
            return;
        }
        let position = self.assembly.query_position();
        debug!(position_ms = position.as_millis() as u64, "position sample");

        // Sample the clock only between transactions so a slow hand-off
        // never stacks a second one on top of it.
        if !self.coordinator.is_idle() {
            return;
        }

        match self.clock.on_position_sample(position) {
            BoundaryDecision::Continue => {}
            BoundaryDecision::Rotate => {
                self.coordinator.begin();
            }
            BoundaryDecision::Finish => {
                info!(
                    position_ms = position.as_millis() as u64,
                    "recording ceiling reached, finishing session"
                );
                self.finishing = true;
                self.assembly.send_eos();
            }
        }
    }
}
