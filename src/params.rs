//! The closed parameter table keyed by source block count.
//!
//! Each supported block count carries the seeds and dense-row counts
//! that define its generator matrix:
//!
//! - `peel_seed` seeds per-row parameter generation
//! - `check_seed` seeds the dense check-row patterns
//! - `light_count` light check rows (three hits per source column on a
//!   stride schedule)
//! - `dense_count` dense check rows (one PRNG mask bit per source column)
//!
//! The seed pairs were tuned offline by GF(2) rank analysis so that the
//! encoder-side system (source rows 0..K plus all check rows) is
//! nonsingular for every table entry. Both codec sides must use the same
//! table; it is part of the wire format.
//!
//! Block counts outside the table are rejected up front with
//! [`CodecError::UnsupportedBlockCount`].

use crate::arith::next_prime16;
use crate::error::CodecError;

/// One tuned table entry.
#[derive(Debug, Clone, Copy)]
struct TableEntry {
    block_count: u16,
    peel_seed: u32,
    check_seed: u32,
    light_count: u16,
    dense_count: u16,
}

const fn entry(block_count: u16, seed: u32, light_count: u16, dense_count: u16) -> TableEntry {
    TableEntry {
        block_count,
        peel_seed: seed,
        check_seed: seed,
        light_count,
        dense_count,
    }
}

#[rustfmt::skip]
static TABLE: [TableEntry; 15] = [
    entry(   16,  0,   6,   2),
    entry(   64,  9,   8,   2),
    entry(  128,  8,  11,   2),
    entry(  256,  0,  14,   5),
    entry(  512,  4,  14,   5),
    entry( 1024,  2,  18,  12),
    entry( 2048,  2,  45,   8),
    entry( 4096,  3,  55,  14),
    entry( 8192,  1, 100,  16),
    entry(10000,  2, 120,  20),
    entry(16384, 12, 180,  26),
    entry(32768,  5, 400,  30),
    entry(40000, 24, 460,  29),
    entry(50000,  5, 600,  34),
    entry(64000,  1,   6, 750),
];

/// Derived codec parameters for one supported block count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeParams {
    /// Source block count K.
    pub block_count: u16,
    /// Smallest prime at or above `block_count`.
    pub block_next_prime: u16,
    /// Seed for per-row parameter generation.
    pub peel_seed: u32,
    /// Seed for the dense check-row patterns.
    pub check_seed: u32,
    /// Light check row count L.
    pub light_count: u16,
    /// Smallest prime at or above `light_count`.
    pub light_next_prime: u16,
    /// Dense check row count D.
    pub dense_count: u16,
    /// Total check rows H = L + D, also the mix column count.
    pub added_count: u16,
    /// Smallest prime at or above `added_count`.
    pub added_next_prime: u16,
}

impl CodeParams {
    /// Looks up the parameters for `block_count`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnsupportedBlockCount`] when the count is
    /// not a table entry.
    pub fn for_block_count(block_count: usize) -> Result<Self, CodecError> {
        let entry = TABLE
            .iter()
            .find(|e| usize::from(e.block_count) == block_count)
            .ok_or(CodecError::UnsupportedBlockCount { block_count })?;

        let added_count = entry.light_count + entry.dense_count;
        Ok(Self {
            block_count: entry.block_count,
            block_next_prime: next_prime16(entry.block_count),
            peel_seed: entry.peel_seed,
            check_seed: entry.check_seed,
            light_count: entry.light_count,
            light_next_prime: next_prime16(entry.light_count),
            dense_count: entry.dense_count,
            added_count,
            added_next_prime: next_prime16(added_count),
        })
    }

    /// All block counts the table supports, ascending.
    #[must_use]
    pub fn supported_block_counts() -> impl Iterator<Item = u16> {
        TABLE.iter().map(|e| e.block_count)
    }

    /// True when `block_count` has a table entry.
    #[must_use]
    pub fn supports(block_count: usize) -> bool {
        TABLE
            .iter()
            .any(|e| usize::from(e.block_count) == block_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_entries() {
        let p = CodeParams::for_block_count(16).unwrap();
        assert_eq!((p.light_count, p.dense_count, p.added_count), (6, 2, 8));
        assert_eq!(p.block_next_prime, 17);
        assert_eq!(p.added_next_prime, 11);

        let p = CodeParams::for_block_count(1024).unwrap();
        assert_eq!((p.light_count, p.dense_count, p.added_count), (18, 12, 30));
        assert_eq!(p.light_next_prime, 19);
        assert_eq!(p.added_next_prime, 31);

        let p = CodeParams::for_block_count(64000).unwrap();
        assert_eq!(p.added_count, 756);
        assert_eq!(p.block_next_prime, 64007);
    }

    #[test]
    fn unsupported_counts_are_rejected() {
        for k in [0usize, 1, 15, 17, 100, 1023, 64001] {
            assert_eq!(
                CodeParams::for_block_count(k),
                Err(CodecError::UnsupportedBlockCount { block_count: k }),
                "k={k}"
            );
        }
    }

    #[test]
    fn table_is_ascending_and_consistent() {
        let counts: Vec<u16> = CodeParams::supported_block_counts().collect();
        assert!(counts.windows(2).all(|w| w[0] < w[1]));
        for &k in &counts {
            assert!(CodeParams::supports(usize::from(k)));
            let p = CodeParams::for_block_count(usize::from(k)).unwrap();
            assert_eq!(p.added_count, p.light_count + p.dense_count);
            assert!(p.added_count >= 8);
            assert!(p.block_next_prime >= p.block_count);
        }
    }
}
