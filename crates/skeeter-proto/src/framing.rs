//! Frame set encoding for bus messages.
//!
//! A bus message carries one or more frames. Each frame is written as a
//! 4-byte big-endian length prefix followed by the frame bytes, and the
//! whole set travels as a single transport message, so subscribers either
//! see every frame of a set or none of them.
//!
//! The first frame is the topic. Because it is encoded first, the encoded
//! topic frame (see [`topic_prefix`]) doubles as a subscription prefix for
//! NNG `SUB` sockets.

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Maximum size of a single frame (4 MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Accumulates frames until the set is complete.
#[derive(Debug, Default)]
pub struct FrameSet {
    buf: BytesMut,
    frames: usize,
}

impl FrameSet {
    /// Create an empty frame set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one frame.
    pub fn push(&mut self, frame: &[u8]) -> Result<(), Error> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        self.buf.reserve(LENGTH_PREFIX_SIZE + frame.len());
        self.buf.put_u32(frame.len() as u32);
        self.buf.put_slice(frame);
        self.frames += 1;
        Ok(())
    }

    /// Number of frames pushed since the last `finish` or `clear`.
    pub fn len(&self) -> usize {
        self.frames
    }

    /// Whether no frame has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Drop any partially built set.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.frames = 0;
    }

    /// Take the encoded set, leaving this builder empty for reuse.
    pub fn finish(&mut self) -> Result<Bytes, Error> {
        if self.frames == 0 {
            return Err(Error::EmptyFrameSet);
        }
        self.frames = 0;
        Ok(self.buf.split().freeze())
    }
}

/// Encode a complete frame set in one call.
pub fn encode_frames(frames: &[&[u8]]) -> Result<Bytes, Error> {
    let mut set = FrameSet::new();
    for frame in frames {
        set.push(frame)?;
    }
    set.finish()
}

/// Read a length prefix from a byte slice.
///
/// Returns the length and a slice starting after the prefix.
pub fn read_length_prefix(data: &[u8]) -> Result<(usize, &[u8]), Error> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(Error::InvalidMessage(format!(
            "buffer too short for length prefix: {} < {}",
            data.len(),
            LENGTH_PREFIX_SIZE
        )));
    }

    let mut header = [0u8; LENGTH_PREFIX_SIZE];
    header.copy_from_slice(&data[..LENGTH_PREFIX_SIZE]);
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    Ok((len, &data[LENGTH_PREFIX_SIZE..]))
}

/// Split an encoded message back into its frames.
pub fn decode_frames(data: &[u8]) -> Result<Vec<&[u8]>, Error> {
    if data.is_empty() {
        return Err(Error::EmptyFrameSet);
    }

    let mut frames = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let (len, tail) = read_length_prefix(rest)?;
        if tail.len() < len {
            return Err(Error::InvalidMessage(format!(
                "frame {} incomplete: have {}, need {}",
                frames.len(),
                tail.len(),
                len
            )));
        }
        frames.push(&tail[..len]);
        rest = &tail[len..];
    }

    Ok(frames)
}

/// The encoded topic frame, usable as a `SUB` subscription prefix.
pub fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(LENGTH_PREFIX_SIZE + topic.len());
    prefix.extend_from_slice(&(topic.len() as u32).to_be_bytes());
    prefix.extend_from_slice(topic.as_bytes());
    prefix
}
