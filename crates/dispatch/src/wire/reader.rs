// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message reader: validates the segment table and decodes the root.

use super::segment::SegmentReader;
use super::{id_from_message, Schema};
use crate::config::WORD_SIZE;
use crate::error::{Error, Result};
use std::ops::{Deref, Range};

/// Typed view over a received payload.
///
/// The payload is copied into a word-aligned buffer owned by the reader,
/// since transports do not guarantee alignment of received parts.
#[derive(Debug)]
pub struct MessageReader {
    words: Vec<u64>,
    segments: Vec<Range<usize>>,
    type_id: u64,
}

impl MessageReader {
    /// Reader over a payload part whose type id arrived separately.
    ///
    /// # Errors
    /// [`Error::MalformedFrame`] if the table is inconsistent with the payload.
    pub fn new(payload: &[u8], type_id: u64) -> Result<Self> {
        if payload.len() < WORD_SIZE || payload.len() % WORD_SIZE != 0 {
            return Err(Error::MalformedFrame(format!(
                "payload of {} bytes is not a whole number of words",
                payload.len()
            )));
        }

        let words: Vec<u64> = payload
            .chunks_exact(WORD_SIZE)
            .map(|chunk| {
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(chunk);
                u64::from_ne_bytes(word)
            })
            .collect();

        let segments = parse_table(payload)?;
        Ok(Self {
            words,
            segments,
            type_id,
        })
    }

    /// Reader over `[type id, payload, ...]`.
    ///
    /// # Errors
    /// [`Error::MissingParts`] with fewer than 2 parts, plus the errors of
    /// [`id_from_message`] and [`MessageReader::new`].
    pub fn from_message<F: AsRef<[u8]>>(parts: &[F]) -> Result<Self> {
        if parts.len() < 2 {
            return Err(Error::MissingParts(parts.len()));
        }
        let type_id = id_from_message(parts)?;
        Self::new(parts[1].as_ref(), type_id)
    }

    /// Type id carried by the message.
    pub fn type_id(&self) -> u64 {
        self.type_id
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// `true` if the message carries a `T`.
    pub fn is<T: Schema>(&self) -> bool {
        self.type_id == T::TYPE_ID
    }

    /// Decode the root as `T`.
    ///
    /// # Errors
    /// [`Error::TypeMismatch`] when `T::TYPE_ID` differs from the carried id,
    /// [`Error::MalformedFrame`] when decoding runs off the payload.
    pub fn get_root<T: Schema>(&self) -> Result<T> {
        if !self.is::<T>() {
            return Err(Error::TypeMismatch {
                expected: T::TYPE_ID,
                actual: self.type_id,
            });
        }
        let mut reader = self.segment_reader();
        T::decode(&mut reader)
    }

    /// Raw cursor over the segments, for callers decoding by hand.
    pub fn segment_reader(&self) -> SegmentReader<'_> {
        SegmentReader::new(self.bytes(), &self.segments)
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: u64 has no padding and any byte pattern is a valid u8; the
        // slice covers exactly the vector's initialized elements.
        unsafe {
            std::slice::from_raw_parts(
                self.words.as_ptr().cast::<u8>(),
                self.words.len() * WORD_SIZE,
            )
        }
    }
}

/// Decode the segment table into byte ranges of `payload`.
fn parse_table(payload: &[u8]) -> Result<Vec<Range<usize>>> {
    let total_words = payload.len() / WORD_SIZE;
    let read_u32 = |at: usize| -> u32 {
        let mut b = [0u8; 4];
        b.copy_from_slice(&payload[at..at + 4]);
        u32::from_le_bytes(b)
    };

    let count = read_u32(0) as usize + 1;
    let table_words = count / 2 + 1;
    if table_words > total_words {
        return Err(Error::MalformedFrame(format!(
            "segment table of {} entries exceeds {} words",
            count, total_words
        )));
    }

    let mut segments = Vec::with_capacity(count);
    let mut pos = table_words;
    for i in 0..count {
        let words = read_u32(4 + i * 4) as usize;
        let end = pos
            .checked_add(words)
            .filter(|&end| end <= total_words)
            .ok_or_else(|| {
                Error::MalformedFrame(format!(
                    "segment {} of {} words overruns the payload",
                    i, words
                ))
            })?;
        segments.push(pos * WORD_SIZE..end * WORD_SIZE);
        pos = end;
    }

    if pos != total_words {
        return Err(Error::MalformedFrame(format!(
            "{} trailing words after the last segment",
            total_words - pos
        )));
    }
    Ok(segments)
}

/// [`MessageReader`] that also exposes attachments (parts 2 and above).
pub struct SmartMessageReader<'m, F: AsRef<[u8]>> {
    parts: &'m [F],
    reader: MessageReader,
}

impl<'m, F: AsRef<[u8]>> SmartMessageReader<'m, F> {
    /// # Errors
    /// As [`MessageReader::from_message`].
    pub fn new(parts: &'m [F]) -> Result<Self> {
        let reader = MessageReader::from_message(parts)?;
        Ok(Self { parts, reader })
    }

    /// Number of attachments.
    pub fn extra_len(&self) -> usize {
        self.parts.len().saturating_sub(2)
    }

    /// Attachment `pos`, counted from the first part after the payload.
    pub fn buffer_at(&self, pos: usize) -> Option<&'m [u8]> {
        let parts: &'m [F] = self.parts;
        parts.get(pos + 2).map(AsRef::as_ref)
    }
}

impl<F: AsRef<[u8]>> Deref for SmartMessageReader<'_, F> {
    type Target = MessageReader;

    fn deref(&self) -> &MessageReader {
        &self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BufferPool;
    use crate::wire::{Frame, MessageBuilder, SegmentWriter};

    #[derive(Debug, PartialEq)]
    struct Sample {
        seq: u64,
        label: String,
    }

    impl Schema for Sample {
        const TYPE_ID: u64 = 0x5A;

        fn encode(&self, writer: &mut SegmentWriter<'_>) -> Result<()> {
            writer.write_u64(self.seq)?;
            writer.write_str(&self.label)
        }

        fn decode(reader: &mut SegmentReader<'_>) -> Result<Self> {
            Ok(Sample {
                seq: reader.read_u64()?,
                label: reader.read_str()?.to_string(),
            })
        }
    }

    struct Other;

    impl Schema for Other {
        const TYPE_ID: u64 = 0x5B;

        fn encode(&self, _writer: &mut SegmentWriter<'_>) -> Result<()> {
            Ok(())
        }

        fn decode(_reader: &mut SegmentReader<'_>) -> Result<Self> {
            Ok(Other)
        }
    }

    fn sample_parts(pool: &BufferPool, label: &str) -> Vec<Frame> {
        let mut builder = MessageBuilder::new(pool);
        builder
            .set_root(&Sample {
                seq: 11,
                label: label.to_string(),
            })
            .expect("root");
        builder
            .smart_message_with(vec![Frame::from("raw-1"), Frame::from("raw-2")])
            .expect("parts")
    }

    #[test]
    fn test_round_trip_from_parts() {
        let pool = BufferPool::new(8, 64).expect("pool");
        let label = "segment ".repeat(10);
        let parts = sample_parts(&pool, &label);
        let reader = MessageReader::from_message(&parts).expect("reader");
        assert_eq!(reader.segment_count(), 2);
        assert_eq!(
            reader.get_root::<Sample>().expect("sample"),
            Sample { seq: 11, label }
        );
    }

    #[test]
    fn test_type_mismatch() {
        let pool = BufferPool::new(8, 64).expect("pool");
        let parts = sample_parts(&pool, "x");
        let reader = MessageReader::from_message(&parts).expect("reader");
        assert!(reader.is::<Sample>());
        match reader.get_root::<Other>() {
            Err(Error::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, 0x5B);
                assert_eq!(actual, 0x5A);
            }
            other => panic!("expected TypeMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_parts() {
        let parts = vec![Frame::type_id(1)];
        assert!(matches!(
            MessageReader::from_message(&parts),
            Err(Error::MissingParts(1))
        ));
    }

    #[test]
    fn test_malformed_tables() {
        // not word sized
        assert!(MessageReader::new(&[0u8; 12], 1).is_err());
        // 1 segment claiming 4 words, only 1 present
        let mut bad = vec![0u8; 16];
        bad[4] = 4;
        assert!(matches!(
            MessageReader::new(&bad, 1),
            Err(Error::MalformedFrame(_))
        ));
        // huge segment count
        let mut bad = vec![0u8; 16];
        bad[..4].copy_from_slice(&1000u32.to_le_bytes());
        assert!(matches!(
            MessageReader::new(&bad, 1),
            Err(Error::MalformedFrame(_))
        ));
        // trailing garbage
        let bad = vec![0u8; 24];
        assert!(matches!(
            MessageReader::new(&bad, 1),
            Err(Error::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_unaligned_payload_is_copied() {
        let pool = BufferPool::new(8, 64).expect("pool");
        let parts = sample_parts(&pool, "shift");
        let mut shifted = vec![0u8; 1];
        shifted.extend_from_slice(&parts[1]);
        let reader = MessageReader::new(&shifted[1..], Sample::TYPE_ID).expect("reader");
        assert_eq!(reader.get_root::<Sample>().expect("sample").label, "shift");
    }

    #[test]
    fn test_smart_reader_attachments() {
        let pool = BufferPool::new(8, 64).expect("pool");
        let parts = sample_parts(&pool, "x");
        let smart = SmartMessageReader::new(&parts).expect("smart");
        assert_eq!(smart.extra_len(), 2);
        assert_eq!(smart.buffer_at(0), Some(&b"raw-1"[..]));
        assert_eq!(smart.buffer_at(1), Some(&b"raw-2"[..]));
        assert_eq!(smart.buffer_at(2), None);
        assert_eq!(smart.get_root::<Sample>().expect("sample").seq, 11);
    }
}
