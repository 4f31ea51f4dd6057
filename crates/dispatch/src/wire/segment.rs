// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Segment cursors for the structured payload.
//!
//! Values are little-endian and naturally aligned relative to the start of
//! their segment. A value that does not fit the current segment starts a new
//! one; the reader makes the same decision from the sealed segment lengths
//! in the table, so writer and reader stay in lockstep without pointers.
//!
//! Byte strings are a `u32` length followed by the raw bytes. The two parts
//! are placed independently (the bytes may open a new segment).

use crate::config::WORD_SIZE;
use crate::error::{Error, Result};
use crate::pool::{BufferPool, PoolBuffer};
use std::fmt;
use std::ops::Range;

/// Decode failure inside a segment-framed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    /// Ran past the last segment.
    EndOfData { segment: usize, offset: usize },
    /// String field is not UTF-8.
    InvalidUtf8 { segment: usize, offset: usize },
    /// Length prefix larger than the remaining payload.
    TooLarge { len: usize },
}

impl fmt::Display for SegmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentError::EndOfData { segment, offset } => {
                write!(f, "end of data at segment {} offset {}", segment, offset)
            }
            SegmentError::InvalidUtf8 { segment, offset } => {
                write!(f, "invalid UTF-8 at segment {} offset {}", segment, offset)
            }
            SegmentError::TooLarge { len } => write!(f, "length prefix {} too large", len),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<SegmentError> for Error {
    fn from(e: SegmentError) -> Self {
        Error::MalformedFrame(e.to_string())
    }
}

#[inline]
pub(crate) fn align_up(offset: usize, alignment: usize) -> usize {
    let mask = alignment - 1;
    (offset + mask) & !mask
}

#[inline]
pub(crate) fn words_for(bytes: usize) -> usize {
    bytes.div_ceil(WORD_SIZE)
}

// ============================================================================
// Writer
// ============================================================================

pub(crate) enum Storage {
    Pooled(PoolBuffer),
    Heap(Vec<u8>),
}

impl Storage {
    fn bytes(&self) -> &[u8] {
        match self {
            Storage::Pooled(buf) => &buf[..],
            Storage::Heap(vec) => &vec[..],
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Storage::Pooled(buf) => &mut buf[..],
            Storage::Heap(vec) => &mut vec[..],
        }
    }
}

/// One growing segment. `capacity` is a whole number of words.
pub(crate) struct Segment {
    storage: Storage,
    capacity: usize,
    used: usize,
}

impl Segment {
    /// Word length recorded in the table.
    pub(crate) fn words(&self) -> usize {
        words_for(self.used)
    }

    /// Sealed contents, padded with zeros to a whole word.
    pub(crate) fn sealed(&self) -> &[u8] {
        &self.storage.bytes()[..self.words() * WORD_SIZE]
    }

    #[cfg(test)]
    pub(crate) fn is_pooled(&self) -> bool {
        match &self.storage {
            Storage::Pooled(buf) => buf.is_pooled(),
            Storage::Heap(_) => false,
        }
    }
}

/// Generate aligned little-endian write methods.
macro_rules! impl_write_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self, value: $type) -> Result<()> {
            self.reserve($size, $size)?.copy_from_slice(&value.to_le_bytes());
            Ok(())
        }
    };
}

/// Serializes a value into pool-backed segments.
///
/// Segment sources, in order: the first block supplied to
/// [`with_first_block`](Self::with_first_block), a zeroed pool buffer when
/// the segment fits one, a heap allocation otherwise.
pub struct SegmentWriter<'p> {
    pool: &'p BufferPool,
    first_block: Option<PoolBuffer>,
    segments: Vec<Segment>,
    next_words: usize,
}

impl<'p> SegmentWriter<'p> {
    pub fn new(pool: &'p BufferPool) -> Self {
        Self {
            pool,
            first_block: None,
            segments: Vec::new(),
            next_words: (pool.buffer_size() / WORD_SIZE).max(1),
        }
    }

    /// Use `block` for the first segment when it is large enough.
    pub fn with_first_block(pool: &'p BufferPool, block: PoolBuffer) -> Self {
        let mut writer = Self::new(pool);
        writer.first_block = Some(block);
        writer
    }

    impl_write_le!(write_u8, u8, 1);
    impl_write_le!(write_u16, u16, 2);
    impl_write_le!(write_u32, u32, 4);
    impl_write_le!(write_u64, u64, 8);
    impl_write_le!(write_i8, i8, 1);
    impl_write_le!(write_i16, i16, 2);
    impl_write_le!(write_i32, i32, 4);
    impl_write_le!(write_i64, i64, 8);

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_u32(value.to_bits())
    }

    pub fn write_f64(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Length-prefixed byte string.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let len = u32::try_from(data.len())
            .map_err(|_| Error::MalformedFrame(format!("byte field of {} bytes", data.len())))?;
        self.write_u32(len)?;
        if !data.is_empty() {
            self.reserve(data.len(), 1)?.copy_from_slice(data);
        }
        Ok(())
    }

    /// Length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    /// Number of segments allocated so far.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Serialized size (table excluded) in bytes.
    pub fn payload_size(&self) -> usize {
        self.segments.iter().map(|s| s.words() * WORD_SIZE).sum()
    }

    pub(crate) fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Drop all segments, keeping the writer usable.
    pub(crate) fn clear(&mut self) {
        self.segments.clear();
    }

    fn reserve(&mut self, size: usize, alignment: usize) -> Result<&mut [u8]> {
        let fits = self.segments.last().map_or(false, |seg| {
            align_up(seg.used, alignment) + size <= seg.capacity
        });
        if !fits {
            let words = words_for(size).max(self.next_words);
            let segment = self.acquire(words)?;
            self.segments.push(segment);
        }

        let idx = self.segments.len() - 1;
        let seg = &mut self.segments[idx];
        let offset = align_up(seg.used, alignment);
        seg.used = offset + size;
        Ok(&mut seg.storage.bytes_mut()[offset..offset + size])
    }

    fn acquire(&mut self, words: usize) -> Result<Segment> {
        let bytes = words * WORD_SIZE;

        if let Some(mut block) = self.first_block.take() {
            if bytes <= block.len() {
                block.fill(0);
                let capacity = (block.len() / WORD_SIZE) * WORD_SIZE;
                return Ok(Segment {
                    storage: Storage::Pooled(block),
                    capacity,
                    used: 0,
                });
            }
            log::trace!(
                "[WIRE] first block of {} bytes too small for {} bytes",
                block.len(),
                bytes
            );
        }

        if bytes <= self.pool.buffer_size() {
            let buf = self.pool.calloc();
            return Ok(Segment {
                storage: Storage::Pooled(buf),
                capacity: bytes.max((self.pool.buffer_size() / WORD_SIZE) * WORD_SIZE),
                used: 0,
            });
        }

        let mut vec = Vec::new();
        vec.try_reserve_exact(bytes)
            .map_err(|_| Error::OutOfMemory(bytes))?;
        vec.resize(bytes, 0);
        log::trace!("[WIRE] heap segment of {} words", words);
        Ok(Segment {
            storage: Storage::Heap(vec),
            capacity: bytes,
            used: 0,
        })
    }
}

// ============================================================================
// Reader
// ============================================================================

/// Generate aligned little-endian read methods.
macro_rules! impl_read_le {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> core::result::Result<$type, SegmentError> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.take($size, $size)?);
            Ok(<$type>::from_le_bytes(bytes))
        }
    };
}

/// Reads values in the order a [`SegmentWriter`] wrote them.
pub struct SegmentReader<'a> {
    data: &'a [u8],
    segments: &'a [Range<usize>],
    segment: usize,
    offset: usize,
}

impl<'a> SegmentReader<'a> {
    /// `segments` are byte ranges of `data`, one per table entry.
    pub(crate) fn new(data: &'a [u8], segments: &'a [Range<usize>]) -> Self {
        Self {
            data,
            segments,
            segment: 0,
            offset: 0,
        }
    }

    impl_read_le!(read_u8, u8, 1);
    impl_read_le!(read_u16, u16, 2);
    impl_read_le!(read_u32, u32, 4);
    impl_read_le!(read_u64, u64, 8);
    impl_read_le!(read_i8, i8, 1);
    impl_read_le!(read_i16, i16, 2);
    impl_read_le!(read_i32, i32, 4);
    impl_read_le!(read_i64, i64, 8);

    pub fn read_f32(&mut self) -> core::result::Result<f32, SegmentError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> core::result::Result<f64, SegmentError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> core::result::Result<bool, SegmentError> {
        Ok(self.read_u8()? != 0)
    }

    /// Length-prefixed byte string, borrowed from the reader's buffer.
    pub fn read_bytes(&mut self) -> core::result::Result<&'a [u8], SegmentError> {
        let len = self.read_u32()? as usize;
        if len == 0 {
            return Ok(&[]);
        }
        if len > self.data.len() {
            return Err(SegmentError::TooLarge { len });
        }
        self.take(len, 1)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> core::result::Result<&'a str, SegmentError> {
        let segment = self.segment;
        let offset = self.offset;
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| SegmentError::InvalidUtf8 { segment, offset })
    }

    /// Index of the segment the cursor is in.
    pub fn segment(&self) -> usize {
        self.segment
    }

    fn take(&mut self, size: usize, alignment: usize) -> core::result::Result<&'a [u8], SegmentError> {
        let data: &'a [u8] = self.data;
        loop {
            let range = self
                .segments
                .get(self.segment)
                .ok_or(SegmentError::EndOfData {
                    segment: self.segment,
                    offset: self.offset,
                })?;
            let offset = align_up(self.offset, alignment);
            if offset + size <= range.len() {
                let start = range.start + offset;
                self.offset = offset + size;
                return Ok(&data[start..start + size]);
            }
            self.segment += 1;
            self.offset = 0;
        }
    }
}
