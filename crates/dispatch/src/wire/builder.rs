// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message builder: schema value -> segment table frame.

use super::segment::SegmentWriter;
use super::{Frame, Schema};
use crate::config::WORD_SIZE;
use crate::error::{Error, Result};
use crate::pool::{BufferPool, PoolBuffer};

/// Builds the payload frame and the multi-part message of one value.
///
/// Segments stay owned by the builder until it is dropped, so several frames
/// can be produced from one serialization.
///
/// # Example
///
/// ```rust
/// use dispatch::{BufferPool, MessageBuilder, MessageReader, Schema, SegmentReader, SegmentWriter};
///
/// struct Ping(u32);
///
/// impl Schema for Ping {
///     const TYPE_ID: u64 = 42;
///     fn encode(&self, w: &mut SegmentWriter<'_>) -> dispatch::Result<()> { w.write_u32(self.0) }
///     fn decode(r: &mut SegmentReader<'_>) -> dispatch::Result<Self> { Ok(Ping(r.read_u32()?)) }
/// }
///
/// let pool = BufferPool::new(16, 512).expect("pool");
/// let mut builder = MessageBuilder::new(&pool);
/// builder.set_root(&Ping(7)).expect("encode");
///
/// let parts = builder.smart_message().expect("build");
/// let reader = MessageReader::from_message(&parts).expect("frame");
/// assert_eq!(reader.get_root::<Ping>().expect("typed").0, 7);
/// ```
pub struct MessageBuilder<'p> {
    pool: &'p BufferPool,
    writer: SegmentWriter<'p>,
    type_id: Option<u64>,
}

impl<'p> MessageBuilder<'p> {
    pub fn new(pool: &'p BufferPool) -> Self {
        Self {
            pool,
            writer: SegmentWriter::new(pool),
            type_id: None,
        }
    }

    /// Builder whose first segment reuses `block` (fast path for hot loops).
    pub fn with_first_block(pool: &'p BufferPool, block: PoolBuffer) -> Self {
        Self {
            pool,
            writer: SegmentWriter::with_first_block(pool, block),
            type_id: None,
        }
    }

    /// Serialize `value` as the message root, replacing any previous root.
    pub fn set_root<T: Schema>(&mut self, value: &T) -> Result<()> {
        self.writer.clear();
        self.type_id = None;
        value.encode(&mut self.writer)?;
        self.type_id = Some(T::TYPE_ID);
        Ok(())
    }

    /// Type id of the current root.
    pub fn type_id(&self) -> Option<u64> {
        self.type_id
    }

    /// Segments written so far.
    pub fn segment_count(&self) -> usize {
        self.writer.segment_count()
    }

    /// Size of the payload frame `build` would produce.
    pub fn frame_size(&self) -> usize {
        let segments = self.writer.segment_count().max(1);
        (segments / 2 + 1) * WORD_SIZE + self.writer.payload_size()
    }

    /// Pack table and segments into one frame.
    ///
    /// The frame comes from the pool when it fits one buffer, from the heap
    /// otherwise.
    ///
    /// # Errors
    /// [`Error::OutOfMemory`] if the heap frame cannot be allocated.
    pub fn build(&self) -> Result<Frame> {
        let size = self.frame_size();
        let mut frame = if size <= self.pool.buffer_size() {
            let buf = self.pool.malloc();
            Frame::pooled(buf, size)
        } else {
            let mut vec = Vec::new();
            vec.try_reserve_exact(size)
                .map_err(|_| Error::OutOfMemory(size))?;
            vec.resize(size, 0);
            Frame::from(vec)
        };
        self.write_frame(frame.bytes_mut());
        log::trace!(
            "[WIRE] built {} bytes, {} segments, pooled={}",
            size,
            self.writer.segment_count(),
            frame.is_pooled()
        );
        Ok(frame)
    }

    /// `[type id, payload]` multi-part message.
    ///
    /// # Errors
    /// [`Error::MalformedFrame`] when no root was set.
    pub fn smart_message(&self) -> Result<Vec<Frame>> {
        self.smart_message_with(Vec::new())
    }

    /// `[type id, payload, extra...]`, extras readable through
    /// [`SmartMessageReader::buffer_at`](super::SmartMessageReader::buffer_at).
    pub fn smart_message_with<I>(&self, extra: I) -> Result<Vec<Frame>>
    where
        I: IntoIterator<Item = Frame>,
    {
        let id = self
            .type_id
            .ok_or_else(|| Error::MalformedFrame("message has no root".into()))?;
        let mut parts = vec![Frame::type_id(id), self.build()?];
        parts.extend(extra);
        Ok(parts)
    }

    fn write_frame(&self, out: &mut [u8]) {
        let segments = self.writer.segments();
        let count = segments.len().max(1);
        let table_words = count / 2 + 1;

        out[..table_words * WORD_SIZE].fill(0);
        out[0..4].copy_from_slice(&((count - 1) as u32).to_le_bytes());
        for (i, seg) in segments.iter().enumerate() {
            let at = 4 + i * 4;
            out[at..at + 4].copy_from_slice(&(seg.words() as u32).to_le_bytes());
        }

        let mut pos = table_words * WORD_SIZE;
        for seg in segments {
            let sealed = seg.sealed();
            out[pos..pos + sealed.len()].copy_from_slice(sealed);
            pos += sealed.len();
        }
    }
}
