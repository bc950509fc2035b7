//! Cross-module codec scenarios: round trips, loss patterns, resume
//! behavior and golden output vectors.
//!
//! Payloads are generated with a fixed xorshift64 stream so every
//! scenario is reproducible; the golden vectors below pin the complete
//! pipeline (PRNG, row generation, parameter table, solver) against
//! values computed independently from the code definition.

use crate::{CodecError, Decoder, Encoder, FeedStatus};

/// Deterministic payload bytes for tests.
fn payload(len: usize) -> Vec<u8> {
    let mut state: u64 = 0x243f_6a88_85a3_08d3;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

fn encoder_for(message: &[u8], block_bytes: usize) -> Encoder {
    let mut enc = Encoder::new(message.len(), block_bytes).expect("supported parameters");
    enc.feed(message).expect("encoder feed");
    enc
}

/// Feeds `ids` in order; asserts completion happens exactly on the last
/// feed and never before.
fn feed_all(enc: &Encoder, dec: &mut Decoder, ids: &[u32]) {
    let mut block = vec![0u8; enc.block_bytes()];
    for (i, &id) in ids.iter().enumerate() {
        enc.encode(id, &mut block).expect("encode");
        let status = dec.feed(id, &block).expect("feed");
        if i + 1 < ids.len() {
            assert_eq!(
                status,
                FeedStatus::NeedMoreBlocks,
                "unexpected early completion at feed {i} (id {id})"
            );
        } else {
            assert_eq!(status, FeedStatus::Complete, "no completion on last feed");
        }
    }
}

#[test]
fn payload_stream_is_pinned() {
    assert_eq!(
        payload(8),
        [0x02, 0x1a, 0x74, 0xa9, 0x28, 0x9c, 0x6d, 0x85]
    );
}

// ============================================================================
// Round trips
// ============================================================================

#[test]
fn round_trip_16_blocks_no_losses() {
    let message = payload(16 * 64);
    let enc = encoder_for(&message, 64);
    let mut dec = Decoder::new(message.len(), 64).unwrap();

    let ids: Vec<u32> = (0..16).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

#[test]
fn round_trip_64_blocks_four_losses() {
    let message = payload(64 * 1024);
    let enc = encoder_for(&message, 1024);
    let mut dec = Decoder::new(message.len(), 1024).unwrap();

    let lost = [7u32, 19, 40, 55];
    let ids: Vec<u32> = (0..64)
        .filter(|id| !lost.contains(id))
        .chain(64..68)
        .collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
    for id in lost {
        let at = id as usize * 1024;
        assert_eq!(
            out[at..at + 1024],
            message[at..at + 1024],
            "lost block {id} not regenerated"
        );
    }
}

#[test]
fn round_trip_512_blocks_ten_losses() {
    let message = payload(512 * 8);
    let enc = encoder_for(&message, 8);
    let mut dec = Decoder::new(message.len(), 8).unwrap();

    let lost = [3u32, 77, 100, 200, 201, 350, 470, 500, 505, 511];
    let ids: Vec<u32> = (0..512)
        .filter(|id| !lost.contains(id))
        .chain(512..522)
        .collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

#[test]
fn round_trip_1024_blocks_all_losses() {
    // Nothing systematic arrives; the decoder works from repair blocks only
    let message = payload(1024 * 16);
    let enc = encoder_for(&message, 16);
    let mut dec = Decoder::new(message.len(), 16).unwrap();

    let ids: Vec<u32> = (1024..2048).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
    assert_eq!(dec.stats().resume_rows, 0);
}

#[test]
fn round_trip_2048_blocks_eight_losses() {
    let message = payload(2048 * 8);
    let enc = encoder_for(&message, 8);
    let mut dec = Decoder::new(message.len(), 8).unwrap();

    let lost = [5u32, 100, 333, 777, 1000, 1500, 2000, 2047];
    let ids: Vec<u32> = (0..2048)
        .filter(|id| !lost.contains(id))
        .chain(2048..2056)
        .collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

#[test]
fn round_trip_10000_blocks_no_losses() {
    // Large enough that back-substitution uses its widest window
    let message = payload(10000 * 4);
    let enc = encoder_for(&message, 4);
    let mut dec = Decoder::new(message.len(), 4).unwrap();

    let ids: Vec<u32> = (0..10000).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

#[test]
fn round_trip_partial_final_block() {
    // 125 bytes in 16 blocks of 8; the final (partial) block is lost
    // and must be regenerated with correct truncation
    let message = payload(125);
    let enc = encoder_for(&message, 8);
    let mut dec = Decoder::new(message.len(), 8).unwrap();

    let ids: Vec<u32> = (0..15).chain([16]).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

// ============================================================================
// Determinism and golden vectors
// ============================================================================

#[test]
fn independent_encoders_agree() {
    let message = payload(256 * 8);
    let a = encoder_for(&message, 8);
    let b = encoder_for(&message, 8);

    let mut out_a = [0u8; 8];
    let mut out_b = [0u8; 8];
    for id in [0u32, 7, 255, 256, 300, 1_000_000, u32::MAX] {
        a.encode(id, &mut out_a).unwrap();
        b.encode(id, &mut out_b).unwrap();
        assert_eq!(out_a, out_b, "id={id}");
    }
}

#[test]
fn golden_repair_blocks_256() {
    let message = payload(256 * 8);
    let enc = encoder_for(&message, 8);

    let cases: [(u32, [u8; 8]); 4] = [
        (256, [0xc5, 0xba, 0x70, 0xbf, 0x20, 0xe7, 0x0c, 0x78]),
        (257, [0x70, 0x07, 0xea, 0xe9, 0x03, 0xa7, 0x7f, 0x60]),
        (1000, [0x3d, 0x59, 0xc0, 0xa7, 0xb0, 0xef, 0xf4, 0x41]),
        (u32::MAX, [0xea, 0x4b, 0xc5, 0x84, 0xea, 0x36, 0xf1, 0x8f]),
    ];
    let mut out = [0u8; 8];
    for (id, want) in cases {
        enc.encode(id, &mut out).unwrap();
        assert_eq!(out, want, "id={id}");
    }
}

#[test]
fn golden_repair_blocks_16() {
    let message = payload(16 * 4);
    let enc = encoder_for(&message, 4);

    let cases: [(u32, [u8; 4]); 4] = [
        (16, [0xc1, 0xce, 0x40, 0xf3]),
        (17, [0xed, 0xc7, 0xbc, 0xf4]),
        (18, [0xf2, 0xab, 0x07, 0xc6]),
        (99, [0x99, 0x76, 0x58, 0xc8]),
    ];
    let mut out = [0u8; 4];
    for (id, want) in cases {
        enc.encode(id, &mut out).unwrap();
        assert_eq!(out, want, "id={id}");
    }
}

#[test]
fn repair_blocks_decode_back_to_source() {
    // The golden vectors above double as decodable blocks
    let message = payload(16 * 4);
    let enc = encoder_for(&message, 4);
    let mut dec = Decoder::new(message.len(), 4).unwrap();

    // Drop id 15, decode from 0..15 plus repair 16
    let ids: Vec<u32> = (0..15).chain([16]).collect();
    feed_all(&enc, &mut dec, &ids);
    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

// ============================================================================
// Stall and resume
// ============================================================================

#[test]
fn resume_supplies_missing_pivot() {
    let message = payload(128 * 32);
    let enc = encoder_for(&message, 32);
    let mut dec = Decoder::new(message.len(), 32).unwrap();
    let mut block = vec![0u8; 32];

    // 127 distinct blocks, then a duplicate: the solve at K blocks must
    // stall on a rank-deficient system
    for id in 0..127u32 {
        enc.encode(id, &mut block).unwrap();
        assert_eq!(dec.feed(id, &block).unwrap(), FeedStatus::NeedMoreBlocks);
    }
    assert_eq!(dec.resume_pivot(), None, "no solve attempted yet");

    enc.encode(0, &mut block).unwrap();
    assert_eq!(dec.feed(0, &block).unwrap(), FeedStatus::NeedMoreBlocks);
    assert!(!dec.is_complete());

    // The stall point is observable and stable
    let pivot = dec.resume_pivot().expect("stalled");
    assert_eq!(dec.resume_pivot(), Some(pivot));

    // Redundant rows leave the stall exactly where it was
    enc.encode(1, &mut block).unwrap();
    assert_eq!(dec.feed(1, &block).unwrap(), FeedStatus::NeedMoreBlocks);
    enc.encode(50, &mut block).unwrap();
    assert_eq!(dec.feed(50, &block).unwrap(), FeedStatus::NeedMoreBlocks);
    assert_eq!(dec.feed(50, &block).unwrap(), FeedStatus::NeedMoreBlocks);
    assert_eq!(dec.resume_pivot(), Some(pivot));

    // The one genuinely new row completes the decode
    enc.encode(127, &mut block).unwrap();
    assert_eq!(dec.feed(127, &block).unwrap(), FeedStatus::Complete);
    assert!(dec.is_complete());
    assert_eq!(dec.resume_pivot(), None);
    assert!(dec.stats().resume_rows >= 4);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

#[test]
fn feeds_after_completion_are_ignored() {
    let message = payload(16 * 8);
    let enc = encoder_for(&message, 8);
    let mut dec = Decoder::new(message.len(), 8).unwrap();

    let ids: Vec<u32> = (0..16).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut block = vec![0u8; 8];
    enc.encode(999, &mut block).unwrap();
    assert_eq!(dec.feed(999, &block).unwrap(), FeedStatus::Complete);

    let mut out = vec![0u8; message.len()];
    dec.reconstruct(&mut out).unwrap();
    assert_eq!(out, message);
}

// ============================================================================
// API errors
// ============================================================================

#[test]
fn reconstruct_requires_completion() {
    let message = payload(16 * 8);
    let dec = Decoder::new(message.len(), 8).unwrap();
    let mut out = vec![0u8; message.len()];
    assert_eq!(dec.reconstruct(&mut out), Err(CodecError::NotReady));
}

#[test]
fn decoder_buffer_checks() {
    let message = payload(16 * 8);
    let enc = encoder_for(&message, 8);
    let mut dec = Decoder::new(message.len(), 8).unwrap();

    assert!(matches!(
        dec.feed(0, &[0u8; 7]),
        Err(CodecError::BufferLengthMismatch { .. })
    ));

    let ids: Vec<u32> = (0..16).collect();
    feed_all(&enc, &mut dec, &ids);

    let mut short = vec![0u8; 10];
    assert!(matches!(
        dec.reconstruct(&mut short),
        Err(CodecError::BufferLengthMismatch { .. })
    ));
}

#[test]
fn accessors_report_geometry() {
    let message = payload(64 * 100);
    let enc = encoder_for(&message, 100);
    assert_eq!(enc.block_count(), 64);
    assert_eq!(enc.block_bytes(), 100);

    let dec = Decoder::new(message.len(), 100).unwrap();
    assert_eq!(dec.block_count(), 64);
    assert_eq!(dec.block_bytes(), 100);
    assert!(!dec.is_complete());
}
