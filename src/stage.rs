//! Output stages and their factory.
//!
//! One stage owns one segment's destination: a container mux feeding a
//! file sink, hidden behind a single facade connection point so callers
//! never address the internals. The stage's identity is a freshly
//! generated UUID which also names the destination file, so no two stages
//! in a session can collide on a path.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};
use uuid::Uuid;

use crate::container;
use crate::errors::ConstructionError;
use crate::flow::{FlowItem, FlowPoint, MediaBuffer};
use crate::types::{AttachmentState, BusMessage, RunState};

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// The mux half of a stage: frames incoming buffers into container
/// records and, on end of stream, emits the trailer that makes the file
/// independently playable before forwarding the signal.
struct ContainerMux {
    outbound: Arc<FlowPoint>,
    state: Mutex<MuxState>,
}

#[derive(Default)]
struct MuxState {
    header_written: bool,
    frame_count: u64,
    first_pts: Option<Duration>,
    last_pts: Duration,
}

impl ContainerMux {
    fn handle(&self, item: FlowItem) {
        match item {
            FlowItem::Data(buffer) => {
                let header = {
                    let mut state = self.state.lock();
                    let header = if state.header_written {
                        None
                    } else {
                        state.header_written = true;
                        Some(container::encode_header())
                    };
                    state.frame_count += 1;
                    state.first_pts.get_or_insert(buffer.pts);
                    state.last_pts = buffer.pts;
                    header
                };
                if let Some(payload) = header {
                    self.outbound.push(FlowItem::Data(MediaBuffer {
                        pts: buffer.pts,
                        payload,
                    }));
                }
                let framed = container::encode_frame(&buffer);
                self.outbound.push(FlowItem::Data(MediaBuffer {
                    pts: buffer.pts,
                    payload: framed,
                }));
            }
            FlowItem::EndOfStream => {
                let (header, trailer, pts) = {
                    let mut state = self.state.lock();
                    let header = if state.header_written {
                        None
                    } else {
                        // An empty segment still gets a valid container.
                        state.header_written = true;
                        Some(container::encode_header())
                    };
                    let trailer = container::encode_trailer(
                        state.frame_count,
                        state.first_pts.unwrap_or(Duration::ZERO),
                        state.last_pts,
                    );
                    (header, trailer, state.last_pts)
                };
                if let Some(payload) = header {
                    self.outbound.push(FlowItem::Data(MediaBuffer { pts, payload }));
                }
                self.outbound.push(FlowItem::Data(MediaBuffer {
                    pts,
                    payload: trailer,
                }));
                self.outbound.push(FlowItem::EndOfStream);
            }
        }
    }
}

/// The sink half of a stage: writes mux output to the destination file
/// and posts the session-level end-of-stream message if the signal ever
/// reaches it (it does not during a hand-off, where the coordinator's
/// watch consumes it first).
struct FileSink {
    component: String,
    bus: UnboundedSender<BusMessage>,
    state: Mutex<SinkState>,
}

struct SinkState {
    writer: Option<BufWriter<File>>,
    failed: bool,
}

impl std::fmt::Debug for FileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSink")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

impl FileSink {
    fn create(
        id: Uuid,
        path: &Path,
        bus: UnboundedSender<BusMessage>,
    ) -> std::io::Result<Arc<Self>> {
        let file = File::create(path)?;
        Ok(Arc::new(Self {
            component: format!("filesink-{}", short_id(id)),
            bus,
            state: Mutex::new(SinkState {
                writer: Some(BufWriter::new(file)),
                failed: false,
            }),
        }))
    }

    fn handle(&self, item: FlowItem) {
        match item {
            FlowItem::Data(buffer) => {
                let mut state = self.state.lock();
                let Some(writer) = state.writer.as_mut() else {
                    return;
                };
                if let Err(e) = writer.write_all(&buffer.payload) {
                    if !state.failed {
                        state.failed = true;
                        let _ = self.bus.send(BusMessage::Error {
                            component: self.component.clone(),
                            message: format!("write failed: {e}"),
                        });
                    }
                }
            }
            FlowItem::EndOfStream => {
                self.close();
                let _ = self.bus.send(BusMessage::EndOfStream {
                    component: self.component.clone(),
                });
            }
        }
    }

    /// Flush and release the file handle. Idempotent; never re-opens.
    fn close(&self) {
        let mut state = self.state.lock();
        if let Some(mut writer) = state.writer.take() {
            let _ = writer.flush();
        }
    }
}

/// The mux + sink subtree responsible for one segment file.
#[derive(Debug)]
pub struct OutputStage {
    id: Uuid,
    path: PathBuf,
    inbound: Arc<FlowPoint>,
    drain_point: Arc<FlowPoint>,
    sink: Arc<FileSink>,
    attachment: AttachmentState,
    run_state: RunState,
}

impl OutputStage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The facade point: the only way into the stage's subtree.
    pub fn inbound(&self) -> Arc<FlowPoint> {
        Arc::clone(&self.inbound)
    }

    /// The sink's inbound point, downstream of the mux. The coordinator
    /// watches it during a drain: an end-of-stream signal emerging here
    /// means the mux has written its trailer.
    pub fn drain_point(&self) -> Arc<FlowPoint> {
        Arc::clone(&self.drain_point)
    }

    pub fn attachment(&self) -> AttachmentState {
        self.attachment
    }

    pub(crate) fn set_attachment(&mut self, state: AttachmentState) {
        self.attachment = state;
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub(crate) fn set_run_state(&mut self, state: RunState) {
        self.run_state = state;
    }

    /// Transition to stopped and release the file handle. Idempotent: a
    /// second call does nothing and never re-opens the file.
    pub fn finalize(&mut self) {
        self.run_state = RunState::Stopped;
        self.sink.close();
        debug!(stage = %self.id, "output stage stopped");
    }
}

/// Builds independent output stages, each with a fresh identity and a
/// destination path derived from it.
pub struct StageFactory {
    output_dir: PathBuf,
    bus: UnboundedSender<BusMessage>,
}

impl StageFactory {
    pub fn new(output_dir: PathBuf, bus: UnboundedSender<BusMessage>) -> Self {
        Self { output_dir, bus }
    }

    pub fn generate_identity(&self) -> Uuid {
        Uuid::new_v4()
    }

    pub fn segment_path(&self, id: Uuid) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", id, container::SEGMENT_FILE_EXT))
    }

    pub fn create_stage(&self) -> Result<OutputStage, ConstructionError> {
        let id = self.generate_identity();
        let path = self.segment_path(id);

        let sink =
            FileSink::create(id, &path, self.bus.clone()).map_err(|source| {
                ConstructionError::SinkOpen {
                    path: path.clone(),
                    source,
                }
            })?;

        let drain_point = FlowPoint::new(format!("filesink-{}.sink", short_id(id)));
        let sink_for_point = Arc::clone(&sink);
        drain_point.set_consumer(move |item| sink_for_point.handle(item));

        let mux_out = FlowPoint::new(format!("mux-{}.src", short_id(id)));
        let mux = Arc::new(ContainerMux {
            outbound: Arc::clone(&mux_out),
            state: Mutex::new(MuxState::default()),
        });
        FlowPoint::link(&mux_out, &drain_point)?;

        let inbound = FlowPoint::new(format!("mux-{}.sink", short_id(id)));
        inbound.set_consumer(move |item| mux.handle(item));

        info!(stage = %id, path = %path.display(), "created output stage");

        Ok(OutputStage {
            id,
            path,
            inbound,
            drain_point,
            sink,
            attachment: AttachmentState::Unattached,
            run_state: RunState::Stopped,
        })
    }
}
