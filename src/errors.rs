use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// An output/assembly primitive could not be created or internally linked.
///
/// Fatal at session construction time; during a hand-off transaction it
/// aborts only that transaction.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("failed to open segment file {path}: {source}")]
    SinkOpen { path: PathBuf, source: io::Error },

    #[error("failed to create output directory {path}: {source}")]
    OutputDirectory { path: PathBuf, source: io::Error },

    #[error("failed to link stage internals: {0}")]
    StageLink(#[from] LinkError),
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("connection point {point} is already linked")]
    AlreadyLinked { point: String },

    #[error("connection point {point} has a consumer and cannot be linked")]
    Occupied { point: String },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid source address: {address}")]
    InvalidAddress { address: String },

    #[error("transport mode {mode} does not provide reliable ordered delivery")]
    UnreliableMode { mode: String },

    #[error("source already started")]
    AlreadyStarted,

    #[error("stream failed: {reason}")]
    StreamFailed { reason: String },
}

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("io error reading segment: {0}")]
    Io(#[from] io::Error),

    #[error("not a segment container (bad magic)")]
    BadMagic,

    #[error("unsupported container version {version}")]
    UnsupportedVersion { version: u8 },

    #[error("corrupt record at offset {offset}")]
    CorruptRecord { offset: usize },
}

/// A control message of an unhandled kind was observed on the bus.
/// Logged and ignored, never fatal.
#[derive(Error, Debug)]
#[error("unexpected control message {kind} from {component}")]
pub struct UnexpectedSignalError {
    pub component: String,
    pub kind: String,
}

/// Top-level error type for the recording session.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("construction error: {0}")]
    Construction(#[from] ConstructionError),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("fatal error from {component}: {message}")]
    Component { component: String, message: String },
}
