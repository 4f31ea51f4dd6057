// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type-tagged multi-part messages.
//!
//! # Layout
//!
//! ```text
//! part 0   [ type id: u64 LE ]                       8 bytes
//! part 1   [ table | segment 0 | segment 1 | ... ]   word aligned
//! part 2.. [ opaque attachments ]
//!
//! table    u32 segment_count - 1
//!          u32 words(segment 0) .. words(segment n-1)
//!          u32 0 padding when segment_count is even
//! ```
//!
//! The payload is produced by [`MessageBuilder`] from a [`Schema`] value and
//! read back with [`MessageReader`]. Parts are plain [`Frame`]s so any
//! multi-part transport can carry them.

mod builder;
mod reader;
mod segment;

pub use builder::MessageBuilder;
pub use reader::{MessageReader, SmartMessageReader};
pub use segment::{SegmentError, SegmentReader, SegmentWriter};

use crate::error::{Error, Result};
use crate::pool::PoolBuffer;
use std::fmt;
use std::ops::Deref;

/// Maximum bytes rendered by [`FrameDisplay`].
pub const FRAME_DISPLAY_LIMIT: usize = 255;

/// Structured value with a stable schema type id.
///
/// # Example
///
/// ```rust
/// use dispatch::{Schema, SegmentReader, SegmentWriter};
///
/// struct Pose { x: f64, y: f64, frame: String }
///
/// impl Schema for Pose {
///     const TYPE_ID: u64 = 0xB1F0_0000_0000_0001;
///
///     fn encode(&self, w: &mut SegmentWriter<'_>) -> dispatch::Result<()> {
///         w.write_f64(self.x)?;
///         w.write_f64(self.y)?;
///         w.write_str(&self.frame)
///     }
///
///     fn decode(r: &mut SegmentReader<'_>) -> dispatch::Result<Self> {
///         Ok(Pose { x: r.read_f64()?, y: r.read_f64()?, frame: r.read_str()?.to_string() })
///     }
/// }
/// ```
pub trait Schema: Sized {
    /// Identifier carried in part 0 of every message of this type.
    const TYPE_ID: u64;

    fn encode(&self, writer: &mut SegmentWriter<'_>) -> Result<()>;

    fn decode(reader: &mut SegmentReader<'_>) -> Result<Self>;
}

/// Decimal form of `T::TYPE_ID`, as listed in topic type sets.
pub fn type_of<T: Schema>() -> String {
    T::TYPE_ID.to_string()
}

/// Extract the type id from part 0 of a multi-part message.
///
/// # Errors
/// [`Error::MissingParts`] for an empty message, [`Error::MalformedFrame`]
/// when part 0 is not exactly 8 bytes.
pub fn id_from_message<F: AsRef<[u8]>>(parts: &[F]) -> Result<u64> {
    let first = parts.first().ok_or(Error::MissingParts(0))?;
    let bytes: [u8; 8] = first.as_ref().try_into().map_err(|_| {
        Error::MalformedFrame(format!(
            "type id part is {} bytes, expected 8",
            first.as_ref().len()
        ))
    })?;
    Ok(u64::from_le_bytes(bytes))
}

enum FrameStorage {
    Pooled(PoolBuffer),
    Heap(Vec<u8>),
}

/// One part of a multi-part message.
///
/// Small payloads borrow a pool slot, which goes back to the pool when the
/// frame is dropped (possibly on a transport thread).
pub struct Frame {
    storage: FrameStorage,
    len: usize,
}

impl Frame {
    pub(crate) fn pooled(buf: PoolBuffer, len: usize) -> Self {
        debug_assert!(len <= buf.len());
        Self {
            storage: FrameStorage::Pooled(buf),
            len,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        match &mut self.storage {
            FrameStorage::Pooled(buf) => &mut buf[..len],
            FrameStorage::Heap(vec) => &mut vec[..len],
        }
    }

    /// Frame holding the little-endian type id.
    pub fn type_id(id: u64) -> Self {
        Self::from(id.to_le_bytes().to_vec())
    }

    /// `true` if the bytes live in a pool slot.
    pub fn is_pooled(&self) -> bool {
        match &self.storage {
            FrameStorage::Pooled(buf) => buf.is_pooled(),
            FrameStorage::Heap(_) => false,
        }
    }

    /// Copy out into an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.deref().to_vec()
    }
}

impl From<Vec<u8>> for Frame {
    fn from(vec: Vec<u8>) -> Self {
        let len = vec.len();
        Self {
            storage: FrameStorage::Heap(vec),
            len,
        }
    }
}

impl From<&[u8]> for Frame {
    fn from(bytes: &[u8]) -> Self {
        Self::from(bytes.to_vec())
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::from(text.as_bytes())
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match &self.storage {
            FrameStorage::Pooled(buf) => &buf[..self.len],
            FrameStorage::Heap(vec) => &vec[..self.len],
        }
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.deref() == other.deref()
    }
}

impl Eq for Frame {}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame{}", FrameDisplay(self))
    }
}

/// Human readable rendering of a frame for logs.
///
/// Printable frames render as `[text]`, binary frames as `[size] hex` with a
/// `|` every 8 bytes. Output stops after 255 bytes with `(N more)`.
pub struct FrameDisplay<'a>(pub &'a [u8]);

impl fmt::Display for FrameDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.0;
        let shown = &data[..data.len().min(FRAME_DISPLAY_LIMIT)];
        let text = data.iter().all(|&b| (0x20..0x7f).contains(&b));

        if text {
            write!(f, "[{}]", String::from_utf8_lossy(shown))?;
        } else {
            write!(f, "[{:03}] ", data.len())?;
            for (i, byte) in shown.iter().enumerate() {
                if i > 0 && i % 8 == 0 {
                    f.write_str("|")?;
                }
                write!(f, "{:02X}", byte)?;
            }
        }
        if data.len() > FRAME_DISPLAY_LIMIT {
            write!(f, " ({} more)", data.len() - FRAME_DISPLAY_LIMIT)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_from_message() {
        let parts = vec![Frame::type_id(0xDEAD_BEEF), Frame::from("x")];
        assert_eq!(id_from_message(&parts).expect("id"), 0xDEAD_BEEF);

        let empty: Vec<Frame> = Vec::new();
        assert!(matches!(id_from_message(&empty), Err(Error::MissingParts(0))));

        let short = vec![Frame::from(&[1u8, 2, 3][..])];
        assert!(matches!(id_from_message(&short), Err(Error::MalformedFrame(_))));
    }

    #[test]
    fn test_frame_display_text() {
        assert_eq!(FrameDisplay(b"hello").to_string(), "[hello]");
    }

    #[test]
    fn test_frame_display_binary_groups() {
        let data: Vec<u8> = (0u8..10).collect();
        assert_eq!(
            FrameDisplay(&data).to_string(),
            "[010] 0001020304050607|0809"
        );
    }

    #[test]
    fn test_frame_display_truncates() {
        let data = vec![0u8; 300];
        let rendered = FrameDisplay(&data).to_string();
        assert!(rendered.ends_with(" (45 more)"));
        // 255 bytes -> 510 hex digits + 31 separators
        assert_eq!(rendered.len(), "[300] ".len() + 510 + 31 + " (45 more)".len());
    }

    #[test]
    fn test_frame_from_vec() {
        let frame = Frame::from(vec![1, 2, 3]);
        assert_eq!(&frame[..], &[1, 2, 3]);
        assert!(!frame.is_pooled());
        assert_eq!(frame, Frame::from(&[1u8, 2, 3][..]));
    }
}
