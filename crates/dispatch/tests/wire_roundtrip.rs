// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::float_cmp)] // Exact values written and read back

//! Multi-part messages built on one thread and read on another.

use dispatch::{
    id_from_message, type_of, BufferPool, Error, Frame, MessageBuilder, MessageReader, Schema,
    SegmentReader, SegmentWriter, SmartMessageReader,
};
use std::thread;

#[derive(Debug, Clone, PartialEq)]
struct Scan {
    stamp: u64,
    frame: String,
    ranges: Vec<f32>,
    valid: bool,
}

impl Schema for Scan {
    const TYPE_ID: u64 = 0x5CA1_0000_0000_0042;

    fn encode(&self, w: &mut SegmentWriter<'_>) -> dispatch::Result<()> {
        w.write_u64(self.stamp)?;
        w.write_str(&self.frame)?;
        w.write_u32(self.ranges.len() as u32)?;
        for r in &self.ranges {
            w.write_f32(*r)?;
        }
        w.write_bool(self.valid)
    }

    fn decode(r: &mut SegmentReader<'_>) -> dispatch::Result<Self> {
        let stamp = r.read_u64()?;
        let frame = r.read_str()?.to_string();
        let count = r.read_u32()? as usize;
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            ranges.push(r.read_f32()?);
        }
        Ok(Scan {
            stamp,
            frame,
            ranges,
            valid: r.read_bool()?,
        })
    }
}

struct Heartbeat(u8);

impl Schema for Heartbeat {
    const TYPE_ID: u64 = 7;

    fn encode(&self, w: &mut SegmentWriter<'_>) -> dispatch::Result<()> {
        w.write_u8(self.0)
    }

    fn decode(r: &mut SegmentReader<'_>) -> dispatch::Result<Self> {
        Ok(Heartbeat(r.read_u8()?))
    }
}

fn scan(points: usize) -> Scan {
    Scan {
        stamp: 1_700_000_000_123,
        frame: "laser_front".to_string(),
        ranges: (0..points).map(|i| i as f32 * 0.25).collect(),
        valid: true,
    }
}

#[test]
fn test_large_message_spans_segments_and_threads() {
    let pool = BufferPool::new(32, 512).expect("pool");
    let value = scan(400);

    let parts = {
        let mut builder = MessageBuilder::new(&pool);
        builder.set_root(&value).expect("encode");
        assert!(builder.segment_count() > 1);
        builder
            .smart_message_with(vec![Frame::from("trace-id-9")])
            .expect("build")
    };
    assert_eq!(id_from_message(&parts).expect("id"), Scan::TYPE_ID);

    // Frames (and the pool slots they hold) move to a transport thread.
    let decoded = thread::spawn(move || {
        let reader = SmartMessageReader::new(&parts).expect("reader");
        assert_eq!(reader.extra_len(), 1);
        assert_eq!(reader.buffer_at(0), Some(&b"trace-id-9"[..]));
        assert_eq!(reader.buffer_at(1), None);
        reader.get_root::<Scan>().expect("scan")
    })
    .join()
    .expect("reader thread");

    assert_eq!(decoded, value);
    assert_eq!(pool.remaining(), pool.buffer_count());
}

#[test]
fn test_small_message_uses_pool_frame() {
    let pool = BufferPool::new(4, 512).expect("pool");
    let mut builder = MessageBuilder::new(&pool);
    builder.set_root(&Heartbeat(3)).expect("encode");
    let payload = builder.build().expect("frame");
    assert!(payload.is_pooled());
    assert_eq!(payload.len(), builder.frame_size());

    let reader = MessageReader::new(&payload, Heartbeat::TYPE_ID).expect("reader");
    assert!(reader.is::<Heartbeat>());
    assert_eq!(reader.get_root::<Heartbeat>().expect("hb").0, 3);
}

#[test]
fn test_unaligned_receive_buffer() {
    let pool = BufferPool::new(8, 512).expect("pool");
    let mut builder = MessageBuilder::new(&pool);
    builder.set_root(&scan(10)).expect("encode");
    let payload = builder.build().expect("frame");

    let mut shifted = vec![0xEEu8];
    shifted.extend_from_slice(&payload);
    let reader = MessageReader::new(&shifted[1..], Scan::TYPE_ID).expect("reader");
    assert_eq!(reader.get_root::<Scan>().expect("scan"), scan(10));
}

#[test]
fn test_wrong_type_and_truncated_parts() {
    let pool = BufferPool::new(8, 512).expect("pool");
    let mut builder = MessageBuilder::new(&pool);
    builder.set_root(&Heartbeat(1)).expect("encode");
    let parts = builder.smart_message().expect("parts");

    let reader = MessageReader::from_message(&parts).expect("reader");
    assert!(matches!(
        reader.get_root::<Scan>(),
        Err(Error::TypeMismatch { expected, actual }) if expected == Scan::TYPE_ID && actual == 7
    ));

    assert!(matches!(
        MessageReader::from_message(&parts[..1]),
        Err(Error::MissingParts(1))
    ));

    let payload = parts[1].to_vec();
    assert!(matches!(
        MessageReader::new(&payload[..payload.len() - 8], Heartbeat::TYPE_ID),
        Err(Error::MalformedFrame(_))
    ));
}

#[test]
fn test_type_list_entry() {
    assert_eq!(type_of::<Heartbeat>(), "7");
    assert_eq!(type_of::<Scan>(), Scan::TYPE_ID.to_string());
}
