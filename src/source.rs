//! Upstream transport collaborator.
//!
//! The recorder core never talks to a network itself; it hands a
//! [`StreamSource`] a set of event callbacks and waits for elementary
//! stream connection points to be announced. The shipped implementation,
//! [`SimRtspSource`], synthesizes a timestamped packet stream on its own
//! worker thread so the hand-off machinery can be exercised end to end
//! without a camera.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::config::{SimulationConfig, SourceConfig};
use crate::errors::TransportError;
use crate::flow::{FlowItem, FlowPoint, MediaBuffer};
use crate::types::{BusMessage, TransportMode};

pub const SOURCE_COMPONENT: &str = "rtsp-source";
pub const VIDEO_MEDIA_TYPE: &str = "application/x-rtp, media=video";
pub const CONTROL_MEDIA_TYPE: &str = "application/x-rtcp";

/// Transport packets carry a sequence number ahead of the elementary
/// stream payload; the depacketizer strips it.
pub const PACKET_HEADER_LEN: usize = 4;

/// A new elementary stream exposed by the transport.
pub struct StreamAnnouncement {
    pub name: String,
    pub media_type: String,
    pub point: Arc<FlowPoint>,
}

/// Callbacks handed to a source at start time.
pub struct StreamEvents {
    pub on_stream: Arc<dyn Fn(StreamAnnouncement) + Send + Sync>,
    pub bus: UnboundedSender<BusMessage>,
}

#[async_trait]
pub trait StreamSource: Send + Sync {
    /// Connect and begin announcing streams and pushing data. Returns once
    /// the source's own worker is running.
    async fn start(&self, events: StreamEvents) -> Result<(), TransportError>;

    /// Request a session-level end of stream: finish delivering what is in
    /// flight, push an end-of-stream signal downstream and stop.
    fn request_eos(&self);

    /// Hard stop at session teardown. No end-of-stream is emitted.
    fn shutdown(&self);
}

/// Parsed form of an rtsp:// source address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAddress {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

pub fn parse_source_address(address: &str) -> Result<SourceAddress, TransportError> {
    let invalid = || TransportError::InvalidAddress {
        address: address.to_string(),
    };

    let rest = address.strip_prefix("rtsp://").ok_or_else(invalid)?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], rest[i..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (credentials, host_port) = match authority.rfind('@') {
        Some(i) => (Some(&authority[..i]), &authority[i + 1..]),
        None => (None, authority),
    };

    let (username, password) = match credentials {
        Some(c) => match c.find(':') {
            Some(i) => (Some(c[..i].to_string()), Some(c[i + 1..].to_string())),
            None => (Some(c.to_string()), None),
        },
        None => (None, None),
    };

    let (host, port) = match host_port.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse::<u16>().map_err(|_| invalid())?),
        None => (host_port.to_string(), 554),
    };

    if host.is_empty() {
        return Err(invalid());
    }

    Ok(SourceAddress {
        host,
        port,
        path,
        username,
        password,
    })
}

/// What the simulated source emits, and how fast.
#[derive(Debug, Clone)]
pub struct SourceScript {
    /// Playback time covered by one sample; pts advance by this much.
    pub pts_step: Duration,
    /// Wall-clock delay between samples.
    pub pacing: Duration,
    /// Emit end of stream after this many samples (None: run until told).
    pub total_samples: Option<u64>,
    /// Report a fatal transport failure before emitting this sample.
    pub fail_after: Option<u64>,
}

impl From<&SimulationConfig> for SourceScript {
    fn from(config: &SimulationConfig) -> Self {
        Self {
            pts_step: config.pts_step,
            pacing: config.pacing,
            total_samples: config.total_samples,
            fail_after: config.fail_after,
        }
    }
}

/// Simulated RTSP source. Validates the address and transport mode the way
/// a real receiver would, then produces a scripted packet stream.
pub struct SimRtspSource {
    address: SourceAddress,
    script: SourceScript,
    started: AtomicBool,
    eos_requested: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    emitted: Arc<AtomicU64>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SimRtspSource {
    pub fn new(address: SourceAddress, script: SourceScript) -> Self {
        Self {
            address,
            script,
            started: AtomicBool::new(false),
            eos_requested: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            emitted: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    pub fn from_config(
        source: &SourceConfig,
        simulation: &SimulationConfig,
    ) -> Result<Self, TransportError> {
        if source.transport_mode != TransportMode::Tcp {
            return Err(TransportError::UnreliableMode {
                mode: format!("{:?}", source.transport_mode).to_lowercase(),
            });
        }

        let mut address = parse_source_address(&source.address)?;
        if source.username.is_some() {
            address.username = source.username.clone();
        }
        if source.password.is_some() {
            address.password = source.password.clone();
        }

        Ok(Self::new(address, SourceScript::from(simulation)))
    }

    /// Samples actually pushed downstream so far.
    pub fn samples_emitted(&self) -> u64 {
        self.emitted.load(Ordering::SeqCst)
    }
}

fn packetize(seq: u64, pts: Duration) -> MediaBuffer {
    let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + 16);
    buf.put_u32(seq as u32);
    buf.put_u64(pts.as_nanos() as u64);
    buf.put_u64(seq);
    MediaBuffer {
        pts,
        payload: buf.freeze(),
    }
}

#[async_trait]
impl StreamSource for SimRtspSource {
    async fn start(&self, events: StreamEvents) -> Result<(), TransportError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyStarted);
        }

        info!(
            host = %self.address.host,
            port = self.address.port,
            path = %self.address.path,
            authenticated = self.address.username.is_some(),
            "connecting to stream source"
        );

        let video_point = FlowPoint::new("source.video");
        let control_point = FlowPoint::new("source.control");

        // Streams appear asynchronously by media type; the assembly links
        // the one it recognizes and ignores the rest.
        (events.on_stream)(StreamAnnouncement {
            name: "stream_1".to_string(),
            media_type: CONTROL_MEDIA_TYPE.to_string(),
            point: control_point,
        });
        (events.on_stream)(StreamAnnouncement {
            name: "stream_0".to_string(),
            media_type: VIDEO_MEDIA_TYPE.to_string(),
            point: Arc::clone(&video_point),
        });
        let _ = events.bus.send(BusMessage::StreamsAnnounced {
            component: SOURCE_COMPONENT.to_string(),
            count: 2,
        });

        let script = self.script.clone();
        let eos_requested = Arc::clone(&self.eos_requested);
        let stop_requested = Arc::clone(&self.stop_requested);
        let emitted = Arc::clone(&self.emitted);
        let bus = events.bus.clone();

        let handle = thread::Builder::new()
            .name("rtsp-source".to_string())
            .spawn(move || {
                let mut seq: u64 = 0;
                loop {
                    if stop_requested.load(Ordering::SeqCst) {
                        break;
                    }
                    if eos_requested.load(Ordering::SeqCst) {
                        video_point.push(FlowItem::EndOfStream);
                        break;
                    }
                    if let Some(total) = script.total_samples {
                        if seq >= total {
                            video_point.push(FlowItem::EndOfStream);
                            break;
                        }
                    }
                    if script.fail_after == Some(seq) {
                        // A real transport failure gives downstream no
                        // end-of-stream; the open segment is left torn.
                        let _ = bus.send(BusMessage::Error {
                            component: SOURCE_COMPONENT.to_string(),
                            message: format!("connection reset by peer after {seq} packets"),
                        });
                        break;
                    }

                    let pts = script.pts_step * (seq as u32 + 1);
                    video_point.push(FlowItem::Data(packetize(seq, pts)));
                    emitted.fetch_add(1, Ordering::SeqCst);
                    seq += 1;
                    thread::sleep(script.pacing);
                }
                debug!("stream source worker exited");
            })
            .map_err(|e| TransportError::StreamFailed {
                reason: e.to_string(),
            })?;

        *self.worker.lock() = Some(handle);
        Ok(())
    }

    fn request_eos(&self) {
        self.eos_requested.store(true, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}
