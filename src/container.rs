//! Byte format of the segment container produced by an output stage.
//!
//! A segment file is a header, a run of frame records, and (once the stage
//! received its end-of-stream signal) a closing trailer carrying the frame
//! count and pts range. A file without a well-formed trailer is not
//! finalized and is not guaranteed playable.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::ContainerError;
use crate::flow::MediaBuffer;

pub const SEGMENT_FILE_EXT: &str = "seg";
pub const HEADER_MAGIC: [u8; 4] = *b"SGC1";
pub const FORMAT_VERSION: u8 = 1;

const TAG_FRAME: u8 = 0x01;
const TAG_TRAILER: u8 = 0x02;
const TRAILER_MAGIC: [u8; 4] = *b"1CGS";

const HEADER_LEN: usize = 5;
const FRAME_PREFIX_LEN: usize = 13;
const TRAILER_LEN: usize = 29;

pub fn encode_header() -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_slice(&HEADER_MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.freeze()
}

pub fn encode_frame(buffer: &MediaBuffer) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_PREFIX_LEN + buffer.payload.len());
    buf.put_u8(TAG_FRAME);
    buf.put_u32(buffer.payload.len() as u32);
    buf.put_u64(buffer.pts.as_nanos() as u64);
    buf.put_slice(&buffer.payload);
    buf.freeze()
}

pub fn encode_trailer(frame_count: u64, first_pts: Duration, last_pts: Duration) -> Bytes {
    let mut buf = BytesMut::with_capacity(TRAILER_LEN);
    buf.put_u8(TAG_TRAILER);
    buf.put_u64(frame_count);
    buf.put_u64(first_pts.as_nanos() as u64);
    buf.put_u64(last_pts.as_nanos() as u64);
    buf.put_slice(&TRAILER_MAGIC);
    buf.freeze()
}

/// What a segment file contains, as recovered by scanning it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSummary {
    pub frame_count: u64,
    pub first_pts: Duration,
    pub last_pts: Duration,
    /// True iff a well-formed trailer closes the file.
    pub finalized: bool,
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

fn read_u64(raw: &[u8], offset: usize) -> u64 {
    u64::from_be_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
        raw[offset + 4],
        raw[offset + 5],
        raw[offset + 6],
        raw[offset + 7],
    ])
}

/// Scan a segment file and summarize it. A missing trailer is reported as
/// `finalized: false`, not as an error; a torn recording is an expected
/// artifact of a fatal mid-session failure.
pub fn read_summary(path: &Path) -> Result<SegmentSummary, ContainerError> {
    let mut raw = Vec::new();
    File::open(path)?.read_to_end(&mut raw)?;

    if raw.len() < HEADER_LEN || raw[..4] != HEADER_MAGIC {
        return Err(ContainerError::BadMagic);
    }
    if raw[4] != FORMAT_VERSION {
        return Err(ContainerError::UnsupportedVersion { version: raw[4] });
    }

    let mut offset = HEADER_LEN;
    let mut frame_count = 0u64;
    let mut first_pts = None;
    let mut last_pts = Duration::ZERO;
    let mut finalized = false;

    while offset < raw.len() {
        match raw[offset] {
            TAG_FRAME => {
                if raw.len() < offset + FRAME_PREFIX_LEN {
                    return Err(ContainerError::CorruptRecord { offset });
                }
                let len = read_u32(&raw, offset + 1) as usize;
                let pts = Duration::from_nanos(read_u64(&raw, offset + 5));
                if raw.len() < offset + FRAME_PREFIX_LEN + len {
                    return Err(ContainerError::CorruptRecord { offset });
                }
                frame_count += 1;
                first_pts.get_or_insert(pts);
                last_pts = pts;
                offset += FRAME_PREFIX_LEN + len;
            }
            TAG_TRAILER => {
                if raw.len() < offset + TRAILER_LEN
                    || raw[offset + 25..offset + TRAILER_LEN] != TRAILER_MAGIC
                    || offset + TRAILER_LEN != raw.len()
                {
                    return Err(ContainerError::CorruptRecord { offset });
                }
                if read_u64(&raw, offset + 1) != frame_count {
                    return Err(ContainerError::CorruptRecord { offset });
                }
                finalized = true;
                offset += TRAILER_LEN;
            }
            _ => return Err(ContainerError::CorruptRecord { offset }),
        }
    }

    Ok(SegmentSummary {
        frame_count,
        first_pts: first_pts.unwrap_or(Duration::ZERO),
        last_pts,
        finalized,
    })
}
