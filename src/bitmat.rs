//! Pitched GF(2) bit matrices.
//!
//! The Gaussian-elimination and compression matrices are stored as rows
//! of 64-bit words ("pitch" words per row). Bits are column-LSB-first:
//! column `c` lives in word `c / 64` under mask `1 << (c % 64)`.
//!
//! Elimination never swaps rows physically; the solver keeps a pivot
//! permutation and addresses rows through it. The one nontrivial row
//! operation is [`BitMatrix::eliminate_row`], which XORs a pivot row
//! into a target while preserving the target's already-triangularized
//! bits below the pivot column.

use crate::prng::TwinMwc;

/// A dense bit matrix with power-of-two word pitch.
#[derive(Debug, Clone)]
pub struct BitMatrix {
    words: Vec<u64>,
    pitch: usize,
    rows: usize,
}

impl BitMatrix {
    /// A zero-sized placeholder.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            words: Vec::new(),
            pitch: 0,
            rows: 0,
        }
    }

    /// Allocates a zeroed matrix of `rows` rows and `cols` columns.
    ///
    /// # Errors
    ///
    /// Returns the byte size of the failed allocation.
    pub fn new(rows: usize, cols: usize) -> Result<Self, usize> {
        let pitch = cols.div_ceil(64);
        let len = rows * pitch;
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|_| len * std::mem::size_of::<u64>())?;
        words.resize(len, 0);
        Ok(Self { words, pitch, rows })
    }

    /// Words per row.
    #[must_use]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Row count.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Borrows row `r`.
    #[inline]
    #[must_use]
    pub fn row(&self, r: usize) -> &[u64] {
        &self.words[r * self.pitch..(r + 1) * self.pitch]
    }

    /// Mutably borrows row `r`.
    #[inline]
    pub fn row_mut(&mut self, r: usize) -> &mut [u64] {
        &mut self.words[r * self.pitch..(r + 1) * self.pitch]
    }

    /// Reads bit `(r, c)`.
    #[inline]
    #[must_use]
    pub fn bit(&self, r: usize, c: usize) -> bool {
        self.words[r * self.pitch + (c >> 6)] & (1u64 << (c & 63)) != 0
    }

    /// Flips bit `(r, c)`.
    #[inline]
    pub fn flip_bit(&mut self, r: usize, c: usize) {
        self.words[r * self.pitch + (c >> 6)] ^= 1u64 << (c & 63);
    }

    /// Zeroes row `r`.
    pub fn clear_row(&mut self, r: usize) {
        self.row_mut(r).fill(0);
    }

    /// `rows[dst] ^= rows[src]`.
    pub fn xor_rows(&mut self, dst: usize, src: usize) {
        debug_assert_ne!(dst, src);
        let (d, s) = self.row_pair_mut(dst, src);
        for (dw, sw) in d.iter_mut().zip(s) {
            *dw ^= sw;
        }
    }

    /// `rows[dst] ^= src` for a row borrowed from another matrix.
    pub fn xor_row_from(&mut self, dst: usize, src: &[u64]) {
        for (dw, sw) in self.row_mut(dst).iter_mut().zip(src) {
            *dw ^= sw;
        }
    }

    /// `rows[dst] = src` for a row borrowed from another matrix.
    pub fn copy_row_from(&mut self, dst: usize, src: &[u64]) {
        self.row_mut(dst).copy_from_slice(src);
    }

    /// Folds pivot row `src` into row `dst` at `pivot_col`.
    ///
    /// Only bits above the pivot column are XORed: bits below it are
    /// preserved, and so is the target's pivot bit itself, which turns
    /// the sub-diagonal of eliminated rows into a record of which pivot
    /// rows were folded in. The substitution phases consume that record.
    pub fn eliminate_row(&mut self, dst: usize, src: usize, pivot_col: usize) {
        debug_assert_ne!(dst, src);
        debug_assert!(self.bit(dst, pivot_col) && self.bit(src, pivot_col));
        let word_offset = pivot_col >> 6;
        let mask = 1u64 << (pivot_col & 63);
        let (d, s) = self.row_pair_mut(dst, src);
        d[word_offset] ^= (s[word_offset] & !(mask - 1)) ^ mask;
        for (dw, sw) in d[word_offset + 1..].iter_mut().zip(&s[word_offset + 1..]) {
            *dw ^= sw;
        }
    }

    /// Like [`Self::eliminate_row`] but the pivot row comes from another
    /// matrix (or another row snapshot).
    pub fn eliminate_row_from(&mut self, dst: usize, src: &[u64], pivot_col: usize) {
        let word_offset = pivot_col >> 6;
        let mask = 1u64 << (pivot_col & 63);
        let d = self.row_mut(dst);
        d[word_offset] ^= (src[word_offset] & !(mask - 1)) ^ mask;
        for (dw, sw) in d[word_offset + 1..].iter_mut().zip(&src[word_offset + 1..]) {
            *dw ^= sw;
        }
    }

    /// Renders the first `cols` columns as '0'/'1' rows, one line per
    /// matrix row.
    #[must_use]
    pub fn dump(&self, cols: usize) -> String {
        let mut out = String::with_capacity(self.rows * (cols + 1));
        for r in 0..self.rows {
            for c in 0..cols {
                out.push(if self.bit(r, c) { '1' } else { '0' });
            }
            out.push('\n');
        }
        out
    }

    fn row_pair_mut(&mut self, dst: usize, src: usize) -> (&mut [u64], &[u64]) {
        let pitch = self.pitch;
        if dst < src {
            let (lo, hi) = self.words.split_at_mut(src * pitch);
            (&mut lo[dst * pitch..(dst + 1) * pitch], &hi[..pitch])
        } else {
            let (lo, hi) = self.words.split_at_mut(dst * pitch);
            (&mut hi[..pitch], &lo[src * pitch..(src + 1) * pitch])
        }
    }
}

// ============================================================================
// Invertible matrix generation
// ============================================================================

/// Seeds generating a random-looking invertible n x n GF(2) matrix for
/// each `n < 512`. For larger n the identity is added instead.
#[rustfmt::skip]
static INVERTIBLE_MATRIX_SEEDS: [u8; 512] = [
    0x0,0,2,2,10,5,6,1,2,0,0,3,5,0,0,1,0,0,0,3,0,1,2,3,0,1,6,6,1,6,0,0,
    0,4,2,7,0,2,4,2,1,1,0,0,2,12,11,3,3,3,2,1,1,4,4,1,13,2,2,1,3,2,1,1,
    3,1,0,0,1,0,0,10,8,6,0,7,3,0,1,1,0,2,6,3,2,2,1,0,5,2,5,1,1,2,4,1,
    2,1,0,0,0,2,0,5,9,17,5,1,2,2,5,4,4,4,4,4,1,2,2,2,1,0,1,0,3,2,2,0,
    1,4,1,3,1,17,3,0,0,0,0,2,2,0,0,0,1,11,4,2,4,2,1,8,2,1,1,2,6,3,0,4,
    3,10,5,3,3,1,0,1,2,6,10,10,6,0,0,0,0,0,0,1,4,2,1,2,2,12,2,2,4,0,0,2,
    0,7,12,1,1,1,0,6,8,0,0,0,0,2,1,8,6,2,0,5,4,2,7,2,10,4,2,6,4,6,6,1,
    0,0,0,0,3,1,0,4,2,6,1,1,4,2,5,1,4,1,0,0,1,8,0,0,6,0,17,4,9,8,4,4,
    3,0,0,3,1,4,3,3,0,0,3,0,0,0,3,4,4,4,3,0,0,12,1,1,2,5,8,4,8,6,2,2,
    0,0,0,13,0,3,4,2,2,1,6,13,3,12,0,0,3,7,8,2,2,2,0,0,4,0,0,0,2,0,3,6,
    7,1,0,2,2,4,4,3,6,3,6,4,4,1,3,7,1,0,0,0,1,3,0,5,4,4,4,3,1,1,7,13,
    4,6,1,1,2,2,2,5,7,1,0,0,2,2,1,2,1,6,6,6,2,2,2,5,3,2,0,0,0,0,0,0,
    0,0,2,3,2,2,0,4,0,0,4,2,0,0,0,2,4,1,2,3,1,1,1,1,1,1,1,1,4,0,0,0,
    1,1,0,0,0,0,0,4,3,0,0,0,0,4,0,0,4,5,2,0,1,0,0,1,7,1,0,0,0,0,1,1,
    1,6,3,0,0,1,3,2,0,3,0,2,1,1,1,0,0,0,0,0,0,8,0,0,6,4,1,3,5,3,0,1,
    1,6,3,3,5,2,2,9,5,1,2,2,1,1,1,1,1,1,2,2,1,3,1,0,0,4,1,7,0,0,0,0,
];

/// XORs a known-invertible n x n GF(2) matrix into `matrix`, with rows
/// starting at `first_row` and columns at `col_offset`.
///
/// For `n < 512` the matrix is regenerated from a tabulated seed; for
/// larger n the identity is added. The generated bits are masked to n
/// columns before insertion.
pub fn add_invertible_matrix(matrix: &mut BitMatrix, first_row: usize, col_offset: usize, n: usize) {
    if n == 0 {
        return;
    }
    if n >= 512 {
        for i in 0..n {
            matrix.flip_bit(first_row + i, col_offset + i);
        }
        return;
    }

    let mut prng = TwinMwc::from_seed(u32::from(INVERTIBLE_MATRIX_SEEDS[n]));
    let add_pitch = n.div_ceil(64);
    let shift = col_offset & 63;
    let word0 = col_offset >> 6;
    let tail_bits = n & 63;

    for row_i in 0..n {
        let mut gen = [0u64; 8];
        for word in gen.iter_mut().take(add_pitch) {
            let lo = prng.next();
            let hi = prng.next();
            *word = (u64::from(hi) << 32) | u64::from(lo);
        }
        if tail_bits != 0 {
            gen[add_pitch - 1] &= (1u64 << tail_bits) - 1;
        }

        let row = matrix.row_mut(first_row + row_i);
        let mut prev = 0u64;
        for (ii, &word) in gen.iter().take(add_pitch).enumerate() {
            if shift == 0 {
                row[word0 + ii] ^= word;
            } else {
                row[word0 + ii] ^= (word << shift) | (prev >> (64 - shift));
            }
            prev = word;
        }
        if shift != 0 && shift + n > add_pitch * 64 {
            row[word0 + add_pitch] ^= prev >> (64 - shift);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_roundtrip() {
        let mut m = BitMatrix::new(3, 130).unwrap();
        assert_eq!(m.pitch(), 3);
        for &(r, c) in &[(0usize, 0usize), (1, 63), (1, 64), (2, 129)] {
            assert!(!m.bit(r, c));
            m.flip_bit(r, c);
            assert!(m.bit(r, c));
        }
        m.flip_bit(1, 63);
        assert!(!m.bit(1, 63));
    }

    #[test]
    fn xor_rows_and_clear() {
        let mut m = BitMatrix::new(2, 128).unwrap();
        m.flip_bit(0, 5);
        m.flip_bit(0, 100);
        m.flip_bit(1, 5);
        m.xor_rows(1, 0);
        assert!(!m.bit(1, 5));
        assert!(m.bit(1, 100));
        m.clear_row(1);
        assert!(!m.bit(1, 100));
    }

    #[test]
    fn eliminate_row_preserves_low_bits_and_records_pivot() {
        let mut m = BitMatrix::new(2, 64).unwrap();
        // src row: bits 3, 10, 20; dst row: bits 1, 3, 10, 30
        for c in [3usize, 10, 20] {
            m.flip_bit(0, c);
        }
        for c in [1usize, 3, 10, 30] {
            m.flip_bit(1, c);
        }
        m.eliminate_row(1, 0, 10);
        // Low bits survive untouched, including src's bit 3
        assert!(m.bit(1, 1));
        assert!(m.bit(1, 3));
        // The pivot bit stays set on the target as elimination history
        assert!(m.bit(1, 10));
        // Bits above the pivot are eliminated normally
        assert!(m.bit(1, 20));
        assert!(m.bit(1, 30));
        // The source row is untouched
        assert!(m.bit(0, 3) && m.bit(0, 10) && m.bit(0, 20));
    }

    #[test]
    fn eliminate_row_across_word_boundary() {
        let mut m = BitMatrix::new(2, 192).unwrap();
        for c in [70usize, 100, 180] {
            m.flip_bit(0, c);
        }
        for c in [5usize, 70, 100, 150] {
            m.flip_bit(1, c);
        }
        m.eliminate_row(1, 0, 70);
        assert!(m.bit(1, 5));
        assert!(m.bit(1, 70));
        assert!(!m.bit(1, 100));
        assert!(m.bit(1, 150));
        assert!(m.bit(1, 180));
    }

    #[test]
    fn dump_renders_bits() {
        let mut m = BitMatrix::new(2, 4).unwrap();
        m.flip_bit(0, 0);
        m.flip_bit(1, 3);
        assert_eq!(m.dump(4), "1000\n0001\n");
    }

    fn rank(m: &BitMatrix, rows: usize, cols: usize) -> usize {
        let bit = |words: &[u64], c: usize| words[c >> 6] & (1u64 << (c & 63)) != 0;
        let mut basis: Vec<Vec<u64>> = Vec::new();
        let mut rank = 0;
        'rows: for r in 0..rows {
            let mut row = m.row(r).to_vec();
            loop {
                let Some(top) = (0..cols).rev().find(|&c| bit(&row, c)) else {
                    continue 'rows;
                };
                let hit = basis.iter().position(|b| {
                    bit(b, top) && (top + 1..cols).all(|c| !bit(b, c))
                });
                match hit {
                    Some(i) => {
                        for (rw, bw) in row.iter_mut().zip(&basis[i]) {
                            *rw ^= bw;
                        }
                    }
                    None => {
                        basis.push(row);
                        rank += 1;
                        continue 'rows;
                    }
                }
            }
        }
        rank
    }

    #[test]
    fn generated_matrices_are_invertible() {
        for n in [1usize, 2, 3, 8, 10, 19, 30, 53, 69, 130] {
            let mut m = BitMatrix::new(n, n).unwrap();
            add_invertible_matrix(&mut m, 0, 0, n);
            assert_eq!(rank(&m, n, n), n, "n={n}");
        }
    }

    #[test]
    fn invertible_with_column_offset() {
        // Same matrix content regardless of column offset
        let n = 19;
        let mut a = BitMatrix::new(n, n).unwrap();
        add_invertible_matrix(&mut a, 0, 0, n);
        let mut b = BitMatrix::new(n, n + 37).unwrap();
        add_invertible_matrix(&mut b, 0, 37, n);
        for r in 0..n {
            for c in 0..n {
                assert_eq!(a.bit(r, c), b.bit(r, c + 37), "r={r} c={c}");
            }
        }
    }

    #[test]
    fn large_n_adds_identity() {
        let mut m = BitMatrix::new(520, 520).unwrap();
        add_invertible_matrix(&mut m, 0, 0, 520);
        for i in 0..520 {
            assert!(m.bit(i, i));
        }
        assert!(!m.bit(0, 1));
    }
}
