//! The encoder/decoder matrix engine.
//!
//! Inverts a received submatrix of the generator on demand using a
//! four-phase sparse solver:
//!
//! 1. **Peeling**: opportunistic solution of rows with one unknown
//!    column, cascading ("avalanche") as columns resolve, followed by
//!    greedy deferral of the stubborn columns to Gaussian elimination
//! 2. **Compression**: projects the peeled triangle onto the deferred
//!    and mix columns, producing a small dense square system
//! 3. **Triangularization**: column-by-column pivoting on the dense
//!    system through a pivot permutation (rows never move)
//! 4. **Substitution**: solves the dense system's column values, then
//!    regenerates every peeled column in original solution order
//!
//! The phases operate on bit matrices for structure and on block arenas
//! for values; the only heavy operations are whole-block XORs.
//!
//! # Resumability
//!
//! A decoder that stalls in phase 3 records the first unmet pivot and
//! keeps all accepted rows installed. Each late block replays the
//! finished eliminations against the new row only and, if it supplies
//! the missing pivot, resumes triangularization where it stopped.

use smallvec::SmallVec;

use crate::bitmat::{add_invertible_matrix, BitMatrix};
use crate::error::{CodecError, FeedStatus};
use crate::params::CodeParams;
use crate::prng::{shuffle_deck16, TwinMwc};
use crate::rowgen::{next_column, RowParams};
use crate::xor::{xor_block, xor_set, BlockArena};

/// Sentinel for intrusive index lists.
const LIST_TERM: u16 = u16::MAX;

/// Static bound on rows referencing one column during peeling.
const REF_LIST_MAX: usize = 64;

/// Extra decoder row slots beyond the block count.
const MAX_EXTRA_ROWS: usize = 4;

/// Windowed back-substitution thresholds: window width w is worthwhile
/// once roughly 2^w pivots remain plus the width itself.
const WINDOW_THRESHOLD_4: usize = 20 + 4;
const WINDOW_THRESHOLD_5: usize = 40 + 5;
const WINDOW_THRESHOLD_6: usize = 64 + 6;
const WINDOW_THRESHOLD_7: usize = 128 + 7;

// ============================================================================
// Workspace records
// ============================================================================

/// Column lifecycle during peeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Mark {
    /// Still deciding.
    #[default]
    Todo,
    /// Solved by a row during peeling.
    Peeled,
    /// Postponed to Gaussian elimination.
    Deferred,
}

/// One received (or source) row.
#[derive(Debug, Clone, Copy)]
struct PeelRow {
    /// Linkage in the peeled or deferred row list.
    next: u16,
    /// Row identifier on the wire.
    id: u32,
    /// Column generator parameters.
    params: RowParams,
    /// Count of referenced columns still unmarked; may wrap below zero
    /// on rows that already left the peeling process, which is benign
    /// because only the exact values 1 and 2 trigger work.
    unmarked_count: u16,
    /// The last two unmarked columns seen (overwriting two-slot window).
    unmarked: [u16; 2],
    /// Column solved by this row once peeled; LIST_TERM on deferred rows.
    peel_column: u16,
    /// Whether the row value has been copied into its recovery block.
    is_copied: bool,
}

impl Default for PeelRow {
    fn default() -> Self {
        Self {
            next: LIST_TERM,
            id: 0,
            params: RowParams {
                peel_weight: 0,
                peel_a: 1,
                peel_x0: 0,
                mix_a: 1,
                mix_x0: 0,
            },
            unmarked_count: 0,
            unmarked: [0; 2],
            peel_column: LIST_TERM,
            is_copied: false,
        }
    }
}

/// One source column.
#[derive(Debug, Clone, Copy, Default)]
struct PeelColumn {
    /// Linkage in the deferred column list.
    next: u16,
    /// Lifecycle state.
    mark: Mark,
    /// Number of currently-weight-2 rows referencing this column.
    w2_refs: u16,
    /// Row that solves this column once peeled.
    peel_row: u16,
    /// GE column index once deferred.
    ge_column: u16,
}

type RefList = SmallVec<[u16; 8]>;

/// Observability counters for one solve.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolveStats {
    /// Rows that solved a column during peeling.
    pub peeled_rows: usize,
    /// Rows deferred to Gaussian elimination.
    pub deferred_rows: usize,
    /// Columns deferred to Gaussian elimination.
    pub deferred_columns: usize,
    /// Row eliminations performed during triangularization.
    pub triangle_ops: usize,
    /// Whole-block XOR/copy operations across all value phases.
    pub block_ops: usize,
    /// Late rows accepted through the resume path.
    pub resume_rows: usize,
}

// ============================================================================
// Codec
// ============================================================================

/// Shared encoder/decoder state: workspace, matrices and block storage.
#[derive(Debug)]
pub(crate) struct Codec {
    params: CodeParams,
    block_bytes: usize,

    /// Valid bytes of the final output block (decoder reconstruction).
    output_final_bytes: usize,
    /// Extra row slots beyond K (decoder only).
    extra_count: usize,
    /// Row slots occupied so far.
    used_count: usize,

    peel_rows: Vec<PeelRow>,
    peel_cols: Vec<PeelColumn>,
    peel_refs: Vec<RefList>,

    peel_head_rows: u16,
    peel_tail_rows: u16,
    defer_head_rows: u16,
    defer_head_columns: u16,
    defer_count: u16,

    /// Received payloads, one padded block per row slot.
    input: Vec<u8>,
    /// Solved column values: K source + H mix + 1 scratch.
    recovery: BlockArena,

    compress: BitMatrix,
    ge: BitMatrix,
    ge_pivots: Vec<u16>,
    ge_row_map: Vec<u16>,
    ge_col_map: Vec<u16>,
    ge_rows: u16,
    ge_resume_pivot: u16,

    solved: bool,
    stats: SolveStats,
}

impl Codec {
    fn new(
        params: CodeParams,
        block_bytes: usize,
        message_bytes: usize,
        extra_count: usize,
    ) -> Result<Self, CodecError> {
        let k = usize::from(params.block_count);
        let h = usize::from(params.added_count);

        let recovery = BlockArena::new(k + h + 1, block_bytes)
            .map_err(|bytes| CodecError::OutOfMemory { bytes })?;

        let input_len = (k + extra_count) * block_bytes;
        let mut input = Vec::new();
        input
            .try_reserve_exact(input_len)
            .map_err(|_| CodecError::OutOfMemory { bytes: input_len })?;
        input.resize(input_len, 0);

        let partial = message_bytes % block_bytes;
        let output_final_bytes = if partial == 0 { block_bytes } else { partial };

        Ok(Self {
            params,
            block_bytes,
            output_final_bytes,
            extra_count,
            used_count: 0,
            peel_rows: vec![PeelRow::default(); k + extra_count],
            peel_cols: vec![PeelColumn::default(); k],
            peel_refs: vec![RefList::new(); k],
            peel_head_rows: LIST_TERM,
            peel_tail_rows: LIST_TERM,
            defer_head_rows: LIST_TERM,
            defer_head_columns: LIST_TERM,
            defer_count: 0,
            input,
            recovery,
            compress: BitMatrix::empty(),
            ge: BitMatrix::empty(),
            ge_pivots: Vec::new(),
            ge_row_map: Vec::new(),
            ge_col_map: Vec::new(),
            ge_rows: 0,
            ge_resume_pivot: 0,
            solved: false,
            stats: SolveStats::default(),
        })
    }

    #[inline]
    fn block_count(&self) -> usize {
        usize::from(self.params.block_count)
    }

    #[inline]
    fn added_count(&self) -> usize {
        usize::from(self.params.added_count)
    }

    /// Scratch block index in the recovery arena.
    #[inline]
    fn scratch_block(&self) -> usize {
        self.block_count() + self.added_count()
    }

    #[inline]
    fn input_block(&self, row: usize) -> &[u8] {
        &self.input[row * self.block_bytes..(row + 1) * self.block_bytes]
    }

    fn store_input_block(&mut self, row: usize, block: &[u8]) {
        let dst = &mut self.input[row * self.block_bytes..(row + 1) * self.block_bytes];
        dst[..block.len()].copy_from_slice(block);
        dst[block.len()..].fill(0);
    }

    fn row_params(&self, id: u32) -> RowParams {
        RowParams::generate(
            id,
            self.params.peel_seed,
            self.params.block_count,
            self.params.added_count,
        )
    }

    // ========================================================================
    // (1) Peeling
    // ========================================================================

    /// Registers row `row_i` carrying `id` and peels opportunistically.
    fn opportunistic_peeling(&mut self, row_i: u16, id: u32) -> Result<(), CodecError> {
        let params = self.row_params(id);
        {
            let row = &mut self.peel_rows[usize::from(row_i)];
            row.id = id;
            row.params = params;
        }

        let mut unmarked_count = 0u16;
        let mut unmarked = [0u16; 2];
        for column_i in params.peel_columns(self.params.block_count, self.params.block_next_prime)
        {
            let refs = &mut self.peel_refs[usize::from(column_i)];
            if refs.len() >= REF_LIST_MAX {
                return Err(CodecError::RowReferencesExceeded { column: column_i });
            }
            refs.push(row_i);

            if self.peel_cols[usize::from(column_i)].mark == Mark::Todo {
                unmarked[usize::from(unmarked_count & 1)] = column_i;
                unmarked_count += 1;
            }
        }
        self.peel_rows[usize::from(row_i)].unmarked_count = unmarked_count;

        match unmarked_count {
            0 => {
                let row = &mut self.peel_rows[usize::from(row_i)];
                row.next = self.defer_head_rows;
                self.defer_head_rows = row_i;
            }
            1 => self.peel(row_i, unmarked[0]),
            2 => {
                self.peel_rows[usize::from(row_i)].unmarked = unmarked;
                self.peel_cols[usize::from(unmarked[0])].w2_refs += 1;
                self.peel_cols[usize::from(unmarked[1])].w2_refs += 1;
            }
            _ => {}
        }
        Ok(())
    }

    /// Solves `column_i` with `row_i` and cascades through every row the
    /// resolution makes weight-1.
    fn peel(&mut self, row_i: u16, column_i: u16) {
        let mut cascade: Vec<u16> = Vec::new();
        self.mark_peeled(row_i, column_i);
        cascade.push(column_i);
        while let Some(column_i) = cascade.pop() {
            self.peel_avalanche(column_i, &mut cascade);
        }
    }

    fn mark_peeled(&mut self, row_i: u16, column_i: u16) {
        let column = &mut self.peel_cols[usize::from(column_i)];
        debug_assert_eq!(column.mark, Mark::Todo);
        column.mark = Mark::Peeled;
        column.peel_row = row_i;

        let row = &mut self.peel_rows[usize::from(row_i)];
        row.peel_column = column_i;
        row.is_copied = false;
        row.next = LIST_TERM;

        if self.peel_tail_rows != LIST_TERM {
            self.peel_rows[usize::from(self.peel_tail_rows)].next = row_i;
        } else {
            self.peel_head_rows = row_i;
        }
        self.peel_tail_rows = row_i;
        self.stats.peeled_rows += 1;
    }

    /// Walks the rows referencing a freshly resolved column, peeling or
    /// deferring the ones that become weight-1, and refreshing the
    /// weight-2 caches of the ones that become weight-2.
    fn peel_avalanche(&mut self, column_i: u16, cascade: &mut Vec<u16>) {
        let ref_count = self.peel_refs[usize::from(column_i)].len();
        for k in 0..ref_count {
            let ref_row_i = self.peel_refs[usize::from(column_i)][k];
            let row = &mut self.peel_rows[usize::from(ref_row_i)];
            row.unmarked_count = row.unmarked_count.wrapping_sub(1);
            let unmarked_count = row.unmarked_count;

            if unmarked_count == 1 {
                let mut new_column_i = row.unmarked[0];
                if new_column_i == column_i {
                    new_column_i = row.unmarked[1];
                }

                if self.peel_cols[usize::from(new_column_i)].mark == Mark::Todo {
                    self.mark_peeled(ref_row_i, new_column_i);
                    cascade.push(new_column_i);
                } else {
                    let row = &mut self.peel_rows[usize::from(ref_row_i)];
                    row.next = self.defer_head_rows;
                    self.defer_head_rows = ref_row_i;
                }
            } else if unmarked_count == 2 {
                // The cached pair may be stale; rescan the row's columns
                let params = self.peel_rows[usize::from(ref_row_i)].params;
                let mut found = 0u16;
                let mut pair = [0u16; 2];
                for ref_column_i in
                    params.peel_columns(self.params.block_count, self.params.block_next_prime)
                {
                    let col = &mut self.peel_cols[usize::from(ref_column_i)];
                    if col.mark == Mark::Todo {
                        if usize::from(found) < 2 {
                            pair[usize::from(found)] = ref_column_i;
                        }
                        found += 1;
                        col.w2_refs += 1;
                    }
                }
                self.peel_rows[usize::from(ref_row_i)].unmarked = pair;

                // The count can race the marks; resolve with the rescan
                if found <= 1 {
                    self.peel_rows[usize::from(ref_row_i)].unmarked_count = 0;
                    if found == 1 {
                        if self.peel_cols[usize::from(pair[0])].mark == Mark::Todo {
                            self.mark_peeled(ref_row_i, pair[0]);
                            cascade.push(pair[0]);
                        } else {
                            let row = &mut self.peel_rows[usize::from(ref_row_i)];
                            row.next = self.defer_head_rows;
                            self.defer_head_rows = ref_row_i;
                        }
                    } else {
                        let row = &mut self.peel_rows[usize::from(ref_row_i)];
                        row.next = self.defer_head_rows;
                        self.defer_head_rows = ref_row_i;
                    }
                }
            }
        }
    }

    /// Defers the remaining unmarked columns greedily: always the one
    /// whose resolution promises the largest avalanche.
    fn greedy_peeling(&mut self) {
        self.defer_head_columns = LIST_TERM;
        self.defer_count = 0;

        loop {
            let mut best_column_i = LIST_TERM;
            let mut best_w2_refs = 0u16;
            let mut best_row_count = 0u16;

            for column_i in 0..self.block_count() {
                let column = &self.peel_cols[column_i];
                if column.mark != Mark::Todo {
                    continue;
                }
                let w2_refs = column.w2_refs;
                if w2_refs >= best_w2_refs {
                    let row_count = self.peel_refs[column_i].len() as u16;
                    if w2_refs > best_w2_refs || row_count >= best_row_count {
                        best_column_i = column_i as u16;
                        best_w2_refs = w2_refs;
                        best_row_count = row_count;
                    }
                }
            }

            if best_column_i == LIST_TERM {
                break;
            }

            let column = &mut self.peel_cols[usize::from(best_column_i)];
            column.mark = Mark::Deferred;
            column.next = self.defer_head_columns;
            self.defer_head_columns = best_column_i;
            self.defer_count += 1;

            let mut cascade = vec![best_column_i];
            while let Some(column_i) = cascade.pop() {
                self.peel_avalanche(column_i, &mut cascade);
            }
        }

        let mut deferred_rows = 0usize;
        let mut row_i = self.defer_head_rows;
        while row_i != LIST_TERM {
            deferred_rows += 1;
            row_i = self.peel_rows[usize::from(row_i)].next;
        }
        self.stats.deferred_rows = deferred_rows;
        self.stats.deferred_columns = usize::from(self.defer_count);

        tracing::trace!(
            peeled = self.stats.peeled_rows,
            deferred_rows,
            deferred_columns = self.defer_count,
            "peeling complete"
        );
    }

    // ========================================================================
    // (2) Compression
    // ========================================================================

    fn allocate_matrix(&mut self) -> Result<(), CodecError> {
        let ge_cols = usize::from(self.defer_count) + self.added_count();
        let ge_alloc_rows = ge_cols + self.extra_count + 1; // last row is scratch

        self.ge = BitMatrix::new(ge_alloc_rows, ge_cols)
            .map_err(|bytes| CodecError::OutOfMemory { bytes })?;
        self.compress = BitMatrix::new(self.block_count(), ge_cols)
            .map_err(|bytes| CodecError::OutOfMemory { bytes })?;

        let pivot_count = ge_cols + self.extra_count;
        self.ge_pivots = vec![0; pivot_count];
        self.ge_row_map = vec![LIST_TERM; pivot_count];
        self.ge_col_map = vec![LIST_TERM; ge_cols];
        self.ge_rows = ge_cols as u16;
        Ok(())
    }

    /// Assigns GE columns to the deferred columns and seeds the
    /// compress matrix with their row memberships; the mix columns take
    /// the remaining GE columns.
    fn set_deferred_columns(&mut self) {
        let mut ge_column_i = 0u16;
        let mut defer_i = self.defer_head_columns;
        while defer_i != LIST_TERM {
            for k in 0..self.peel_refs[usize::from(defer_i)].len() {
                let row_i = self.peel_refs[usize::from(defer_i)][k];
                self.compress
                    .flip_bit(usize::from(row_i), usize::from(ge_column_i));
            }
            self.ge_col_map[usize::from(ge_column_i)] = defer_i;
            let column = &mut self.peel_cols[usize::from(defer_i)];
            column.ge_column = ge_column_i;
            defer_i = column.next;
            ge_column_i += 1;
        }
        debug_assert_eq!(ge_column_i, self.defer_count);

        for added_i in 0..self.added_count() {
            let ge_column = usize::from(self.defer_count) + added_i;
            self.ge_col_map[ge_column] = (self.block_count() + added_i) as u16;
        }
    }

    /// Sets the three mix-column bits for every deferred row and tags
    /// the rows as deferred for later discrimination.
    fn set_mixing_columns_for_deferred_rows(&mut self) {
        let mut defer_row_i = self.defer_head_rows;
        while defer_row_i != LIST_TERM {
            let row = &mut self.peel_rows[usize::from(defer_row_i)];
            row.peel_column = LIST_TERM;
            let params = row.params;
            let next = row.next;

            for mix in params.mix_columns(self.params.added_count, self.params.added_next_prime) {
                let ge_column = usize::from(self.defer_count) + usize::from(mix);
                self.compress.flip_bit(usize::from(defer_row_i), ge_column);
            }
            defer_row_i = next;
        }
    }

    /// Diagonalizes the peeled triangle: walks the peeled rows in
    /// solution order, folding each row's compress bits and block value
    /// into every row that references its solved column.
    ///
    /// The first copy into a referencing row's block is fused with its
    /// input XOR through the `is_copied` flag.
    fn peel_diagonal(&mut self) {
        let mut rowops = 0usize;
        let mut peel_row_i = self.peel_head_rows;
        while peel_row_i != LIST_TERM {
            let row = self.peel_rows[usize::from(peel_row_i)];
            let peel_column_i = row.peel_column;

            for mix in row
                .params
                .mix_columns(self.params.added_count, self.params.added_next_prime)
            {
                let ge_column = usize::from(self.defer_count) + usize::from(mix);
                self.compress.flip_bit(usize::from(peel_row_i), ge_column);
            }

            if !row.is_copied {
                let off = usize::from(peel_row_i) * self.block_bytes;
                self.recovery.copy_from(
                    usize::from(peel_column_i),
                    &self.input[off..off + self.block_bytes],
                );
                rowops += 1;
            }

            for k in 0..self.peel_refs[usize::from(peel_column_i)].len() {
                let ref_row_i = self.peel_refs[usize::from(peel_column_i)][k];
                if ref_row_i == peel_row_i {
                    continue;
                }

                self.compress
                    .xor_rows(usize::from(ref_row_i), usize::from(peel_row_i));

                let ref_column_i = self.peel_rows[usize::from(ref_row_i)].peel_column;
                if ref_column_i != LIST_TERM {
                    if self.peel_rows[usize::from(ref_row_i)].is_copied {
                        self.recovery
                            .xor_into(usize::from(ref_column_i), usize::from(peel_column_i));
                    } else {
                        // Fuse the copy with the first XOR
                        let input = usize::from(ref_row_i) * self.block_bytes;
                        let input = &self.input[input..input + self.block_bytes];
                        self.recovery.set_xor_ext(
                            usize::from(ref_column_i),
                            usize::from(peel_column_i),
                            input,
                        );
                        self.peel_rows[usize::from(ref_row_i)].is_copied = true;
                    }
                    rowops += 1;
                }
            }

            peel_row_i = row.next;
        }
        self.stats.block_ops += rowops;
    }

    /// Copies the deferred rows' compressed images into the GE matrix
    /// after the check rows.
    fn copy_deferred_rows(&mut self) {
        let mut ge_row_i = self.added_count();
        let mut defer_row_i = self.defer_head_rows;
        while defer_row_i != LIST_TERM {
            self.ge
                .copy_row_from(ge_row_i, self.compress.row(usize::from(defer_row_i)));
            self.ge_row_map[ge_row_i] = defer_row_i;
            ge_row_i += 1;
            defer_row_i = self.peel_rows[usize::from(defer_row_i)].next;
        }
        debug_assert_eq!(ge_row_i, usize::from(self.ge_rows));
    }

    /// Folds one source column into a check-pattern accumulator row.
    fn add_dense_column(&mut self, dest_row: usize, column_i: usize) {
        let column = self.peel_cols[column_i];
        if column.mark == Mark::Peeled {
            self.ge
                .xor_row_from(dest_row, self.compress.row(usize::from(column.peel_row)));
        } else {
            self.ge.flip_bit(dest_row, usize::from(column.ge_column));
        }
    }

    /// Multiplies the dense check patterns into the GE check rows.
    ///
    /// Columns are processed in windows of H using two shuffled decks,
    /// where each successive pattern differs from the previous by one
    /// set/clear bit pair; the tail columns fall back to the per-column
    /// light/dense schedule.
    fn multiply_dense_rows(&mut self) {
        let k = self.block_count();
        let h = self.added_count();
        let light = usize::from(self.params.light_count);
        let mut prng = TwinMwc::from_seed(self.params.check_seed);

        let temp_row = self.ge.rows() - 1;
        let mut rows_deck = vec![0u16; h];
        let mut bits_deck = vec![0u16; h];
        let set_count = (h + 1) >> 1;
        let loop_count = h >> 1;

        let mut column_i = 0usize;
        while column_i + h <= k {
            shuffle_deck16(&mut prng, &mut rows_deck);
            shuffle_deck16(&mut prng, &mut bits_deck);

            self.ge.clear_row(temp_row);
            for ii in 0..set_count {
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[ii]));
            }

            let mut deck = 0usize;
            let store = |codec: &mut Self, deck: &mut usize| {
                let dest = usize::from(rows_deck[*deck]);
                *deck += 1;
                codec.ge.xor_rows(dest, temp_row);
            };

            store(&mut *self, &mut deck);
            for ii in 0..loop_count {
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[ii]));
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[set_count + ii]));
                store(&mut *self, &mut deck);
            }
            if h & 1 != 0 {
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[loop_count]));
                store(&mut *self, &mut deck);
            }
            for ii in 0..loop_count - 1 {
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[ii]));
                self.add_dense_column(temp_row, column_i + usize::from(bits_deck[set_count + ii]));
                store(&mut *self, &mut deck);
            }
            debug_assert_eq!(deck, h);

            column_i += h;
        }

        // Per-column tail: three light-row hits plus masked dense rows
        for column_i in column_i..k {
            let dense_rv = prng.next();
            let mut x = (column_i % light) as u16;
            let adiv = column_i / light;
            let a = (1 + adiv % (light - 1)) as u16;

            for hit in 0..3 {
                self.add_dense_column(usize::from(x), column_i);
                if hit < 2 {
                    x = next_column(
                        x,
                        self.params.light_count,
                        self.params.light_next_prime,
                        a,
                    );
                }
            }
            let mut rv = dense_rv;
            for dense_i in 0..usize::from(self.params.dense_count) {
                if rv & 1 != 0 {
                    self.add_dense_column(light + dense_i, column_i);
                }
                rv >>= 1;
            }
        }
    }

    // ========================================================================
    // (3) Triangularization
    // ========================================================================

    /// Runs column-by-column pivoting from `start_pivot`. On failure the
    /// first unmet pivot is recorded for resumption.
    fn triangle_from(&mut self, start_pivot: usize) -> bool {
        let pivot_count = usize::from(self.defer_count) + self.added_count();

        for pivot_i in start_pivot..pivot_count {
            let mut found = false;

            for pivot_j in pivot_i..usize::from(self.ge_rows) {
                let ge_row_j = usize::from(self.ge_pivots[pivot_j]);
                if !self.ge.bit(ge_row_j, pivot_i) {
                    continue;
                }

                found = true;
                self.ge_pivots.swap(pivot_i, pivot_j);

                for pivot_k in pivot_j + 1..usize::from(self.ge_rows) {
                    let ge_row_k = usize::from(self.ge_pivots[pivot_k]);
                    if self.ge.bit(ge_row_k, pivot_i) {
                        self.ge.eliminate_row(ge_row_k, ge_row_j, pivot_i);
                        self.stats.triangle_ops += 1;
                    }
                }
                break;
            }

            if !found {
                self.ge_resume_pivot = pivot_i as u16;
                tracing::debug!(pivot = pivot_i, "triangularization stalled");
                return false;
            }
        }

        #[cfg(debug_assertions)]
        for pivot_i in 0..pivot_count {
            debug_assert!(self
                .ge
                .bit(usize::from(self.ge_pivots[pivot_i]), pivot_i));
        }
        true
    }

    fn triangle(&mut self) -> bool {
        let pivot_count = usize::from(self.defer_count) + self.added_count();
        for (i, pivot) in self.ge_pivots.iter_mut().take(pivot_count).enumerate() {
            *pivot = i as u16;
        }
        self.triangle_from(0)
    }

    // ========================================================================
    // (4) Substitution
    // ========================================================================

    /// Seeds the GE column values: zero for columns solved by check
    /// rows, and the (peeled-reduced) input value for columns solved by
    /// deferred or late rows.
    fn initialize_column_values(&mut self) {
        let mut rowops = 0usize;
        let pivot_count = usize::from(self.defer_count) + self.added_count();

        for pivot_i in 0..pivot_count {
            let column_i = usize::from(self.ge_col_map[pivot_i]);
            let ge_row_i = usize::from(self.ge_pivots[pivot_i]);

            if ge_row_i < self.added_count() {
                self.recovery.clear(column_i);
                self.ge_row_map[ge_row_i] = column_i as u16;
                rowops += 1;
                continue;
            }

            let pivot_row_i = usize::from(self.ge_row_map[ge_row_i]);
            let params = self.peel_rows[pivot_row_i].params;
            let mut copied = false;
            for peel_column in
                params.peel_columns(self.params.block_count, self.params.block_next_prime)
            {
                if self.peel_cols[usize::from(peel_column)].mark != Mark::Peeled {
                    continue;
                }
                if copied {
                    self.recovery
                        .xor_into(column_i, usize::from(peel_column));
                } else {
                    // Fuse the input copy with the first XOR
                    let off = pivot_row_i * self.block_bytes;
                    let input = &self.input[off..off + self.block_bytes];
                    self.recovery
                        .set_xor_ext(column_i, usize::from(peel_column), input);
                    copied = true;
                }
                rowops += 1;
            }
            if !copied {
                let off = pivot_row_i * self.block_bytes;
                self.recovery
                    .copy_from(column_i, &self.input[off..off + self.block_bytes]);
                rowops += 1;
            }
        }

        // Check rows displaced past the square system are skipped later
        for pivot_i in pivot_count..usize::from(self.ge_rows) {
            let ge_row_i = usize::from(self.ge_pivots[pivot_i]);
            if ge_row_i < self.added_count() {
                self.ge_row_map[ge_row_i] = LIST_TERM;
            }
        }
        self.stats.block_ops += rowops;
    }

    /// Accumulates the scratch block into a check row's solved column,
    /// honoring the skip token.
    fn store_check_value(&mut self, check_row: usize) {
        let dest = self.ge_row_map[check_row];
        if dest != LIST_TERM {
            let scratch = self.scratch_block();
            self.recovery.xor_into(usize::from(dest), scratch);
            self.stats.block_ops += 1;
        }
    }

    /// Regenerates the dense check patterns, this time XORing the
    /// peeled column values into the columns the check rows solve.
    ///
    /// Must replay the PRNG stream of [`Self::multiply_dense_rows`]
    /// exactly: same windows, same decks, same tail draws.
    fn add_check_values(&mut self) {
        let k = self.block_count();
        let h = self.added_count();
        let light = usize::from(self.params.light_count);
        let scratch = self.scratch_block();
        let mut prng = TwinMwc::from_seed(self.params.check_seed);

        let mut rows_deck = vec![0u16; h];
        let mut bits_deck = vec![0u16; h];
        let set_count = (h + 1) >> 1;
        let loop_count = h >> 1;

        #[derive(Clone, Copy, PartialEq)]
        enum Combo {
            Empty,
            Block(usize),
            Scratch,
        }

        let mut column_i = 0usize;
        while column_i + h <= k {
            shuffle_deck16(&mut prng, &mut rows_deck);
            shuffle_deck16(&mut prng, &mut bits_deck);

            // First pattern: XOR of the peeled columns among the set bits,
            // materialized lazily to save a copy when none or one is peeled
            let mut combo = Combo::Empty;
            for ii in 0..set_count {
                let bit_column = column_i + usize::from(bits_deck[ii]);
                if self.peel_cols[bit_column].mark != Mark::Peeled {
                    continue;
                }
                combo = match combo {
                    Combo::Empty => Combo::Block(bit_column),
                    Combo::Block(prev) => {
                        self.recovery.set_xor(scratch, prev, bit_column);
                        self.stats.block_ops += 1;
                        Combo::Scratch
                    }
                    Combo::Scratch => {
                        self.recovery.xor_into(scratch, bit_column);
                        self.stats.block_ops += 1;
                        Combo::Scratch
                    }
                };
            }
            match combo {
                Combo::Empty => self.recovery.clear(scratch),
                Combo::Block(only) => {
                    self.recovery.copy(scratch, only);
                    self.stats.block_ops += 1;
                }
                Combo::Scratch => {}
            }

            let mut deck = 0usize;
            if combo != Combo::Empty {
                self.store_check_value(usize::from(rows_deck[deck]));
            }
            deck += 1;

            let flip_pair = |codec: &mut Self, bit0: usize, bit1: usize| {
                let p0 = codec.peel_cols[bit0].mark == Mark::Peeled;
                let p1 = codec.peel_cols[bit1].mark == Mark::Peeled;
                if p0 && p1 {
                    codec.recovery.add_xor(scratch, bit0, bit1);
                    codec.stats.block_ops += 1;
                } else if p0 {
                    codec.recovery.xor_into(scratch, bit0);
                    codec.stats.block_ops += 1;
                } else if p1 {
                    codec.recovery.xor_into(scratch, bit1);
                    codec.stats.block_ops += 1;
                }
            };

            for ii in 0..loop_count {
                let bit0 = column_i + usize::from(bits_deck[ii]);
                let bit1 = column_i + usize::from(bits_deck[set_count + ii]);
                flip_pair(&mut *self, bit0, bit1);
                self.store_check_value(usize::from(rows_deck[deck]));
                deck += 1;
            }
            if h & 1 != 0 {
                let bit0 = column_i + usize::from(bits_deck[loop_count]);
                if self.peel_cols[bit0].mark == Mark::Peeled {
                    self.recovery.xor_into(scratch, bit0);
                    self.stats.block_ops += 1;
                }
                self.store_check_value(usize::from(rows_deck[deck]));
                deck += 1;
            }
            for ii in 0..loop_count - 1 {
                let bit0 = column_i + usize::from(bits_deck[ii]);
                let bit1 = column_i + usize::from(bits_deck[set_count + ii]);
                flip_pair(&mut *self, bit0, bit1);
                self.store_check_value(usize::from(rows_deck[deck]));
                deck += 1;
            }
            debug_assert_eq!(deck, h);

            column_i += h;
        }

        // Per-column tail, replaying the same draws as the matrix phase
        for column_i in column_i..k {
            let dense_rv = prng.next();
            let mut x = (column_i % light) as u16;
            let adiv = column_i / light;
            let a = (1 + adiv % (light - 1)) as u16;

            if self.peel_cols[column_i].mark == Mark::Peeled {
                for hit in 0..3 {
                    let dest = self.ge_row_map[usize::from(x)];
                    if dest != LIST_TERM {
                        self.recovery.xor_into(usize::from(dest), column_i);
                        self.stats.block_ops += 1;
                    }
                    if hit < 2 {
                        x = next_column(
                            x,
                            self.params.light_count,
                            self.params.light_next_prime,
                            a,
                        );
                    }
                }
                let mut rv = dense_rv;
                for dense_i in 0..usize::from(self.params.dense_count) {
                    if rv & 1 != 0 {
                        let dest = self.ge_row_map[light + dense_i];
                        if dest != LIST_TERM {
                            self.recovery.xor_into(usize::from(dest), column_i);
                            self.stats.block_ops += 1;
                        }
                    }
                    rv >>= 1;
                }
            }
        }
    }

    /// Brings the right-hand side into consistency with the
    /// upper-triangular system: each pivot's value absorbs the values of
    /// the pivots below its set sub-diagonal bits.
    fn add_subdiagonal_values(&mut self) {
        let mut rowops = 0usize;
        let pivot_count = usize::from(self.defer_count) + self.added_count();

        for pivot_i in 0..pivot_count {
            let pivot_column_i = usize::from(self.ge_col_map[pivot_i]);
            let ge_row_i = usize::from(self.ge_pivots[pivot_i]);

            for ge_column_i in 0..pivot_i {
                if self.ge.bit(ge_row_i, ge_column_i) {
                    let column_i = usize::from(self.ge_col_map[ge_column_i]);
                    self.recovery.xor_into(pivot_column_i, column_i);
                    rowops += 1;
                }
            }
        }
        self.stats.block_ops += rowops;
    }

    /// Eliminates the strictly upper-triangular part, windowed above a
    /// size threshold.
    ///
    /// The window table of 2^w XOR combinations borrows the storage of
    /// spent peeled recovery blocks: those blocks are dead until
    /// [`Self::substitute`] rewrites them, and substitution runs
    /// strictly after this phase.
    fn back_substitute_above_diagonal(&mut self) {
        let pivot_count = usize::from(self.defer_count) + self.added_count();
        let mut pivot_i = pivot_count as isize - 1;

        if pivot_i as usize >= WINDOW_THRESHOLD_5 {
            let (mut w, mut next_check_i) = if pivot_i as usize >= WINDOW_THRESHOLD_7 {
                (7usize, WINDOW_THRESHOLD_7)
            } else if pivot_i as usize >= WINDOW_THRESHOLD_6 {
                (6, WINDOW_THRESHOLD_6)
            } else {
                (5, WINDOW_THRESHOLD_5)
            };
            let mut win_lim = 1usize << w;

            // Borrow spent peeled blocks as table storage
            let mut win_table = [0u16; 128];
            let mut jj = 1usize;
            for column_i in 0..self.block_count() {
                if self.peel_cols[column_i].mark == Mark::Peeled {
                    win_table[jj] = column_i as u16;
                    jj += 1;
                    if jj >= win_lim {
                        break;
                    }
                }
            }

            if jj >= win_lim {
                loop {
                    let backsub_i = pivot_i as usize - w + 1;

                    // Diagonalize the small triangle inside the window
                    for src_pivot_i in (backsub_i + 1..=pivot_i as usize).rev() {
                        let src_column = usize::from(self.ge_col_map[src_pivot_i]);
                        for dest_pivot_i in backsub_i..src_pivot_i {
                            let dest_row = usize::from(self.ge_pivots[dest_pivot_i]);
                            if self.ge.bit(dest_row, src_pivot_i) {
                                let dest_column = usize::from(self.ge_col_map[dest_pivot_i]);
                                self.recovery.xor_into(dest_column, src_column);
                                self.stats.block_ops += 1;
                            }
                        }
                    }

                    // Build the 2^w combination table
                    win_table[1] = self.ge_col_map[backsub_i];
                    win_table[2] = self.ge_col_map[backsub_i + 1];
                    self.set_win_entry(&win_table, 3, 1, 2);
                    win_table[4] = self.ge_col_map[backsub_i + 2];
                    self.set_win_entry(&win_table, 5, 1, 4);
                    self.set_win_entry(&win_table, 6, 2, 4);
                    self.set_win_entry(&win_table, 7, 1, 6);
                    win_table[8] = self.ge_col_map[backsub_i + 3];
                    for ii in 1..8 {
                        self.set_win_entry(&win_table, 8 + ii, ii, 8);
                    }
                    if w >= 5 {
                        win_table[16] = self.ge_col_map[backsub_i + 4];
                        for ii in 1..16 {
                            self.set_win_entry(&win_table, 16 + ii, ii, 16);
                        }
                        if w >= 6 {
                            win_table[32] = self.ge_col_map[backsub_i + 5];
                            for ii in 1..32 {
                                self.set_win_entry(&win_table, 32 + ii, ii, 32);
                            }
                            if w >= 7 {
                                win_table[64] = self.ge_col_map[backsub_i + 6];
                                for ii in 1..64 {
                                    self.set_win_entry(&win_table, 64 + ii, ii, 64);
                                }
                            }
                        }
                    }

                    // Substitute the whole window into every row above it
                    let first_word = backsub_i >> 6;
                    let shift0 = backsub_i & 63;
                    let last_word = pivot_i as usize >> 6;
                    for above_pivot_i in 0..backsub_i {
                        let ge_row = self.ge.row(usize::from(self.ge_pivots[above_pivot_i]));
                        let win_bits = if first_word == last_word {
                            (ge_row[first_word] >> shift0) as usize & (win_lim - 1)
                        } else {
                            ((ge_row[first_word] >> shift0) | (ge_row[first_word + 1] << (64 - shift0)))
                                as usize
                                & (win_lim - 1)
                        };
                        if win_bits != 0 {
                            let dest = usize::from(self.ge_col_map[above_pivot_i]);
                            self.recovery
                                .xor_into(dest, usize::from(win_table[win_bits]));
                            self.stats.block_ops += 1;
                        }
                    }

                    pivot_i -= w as isize;
                    if (pivot_i as usize) < next_check_i {
                        if pivot_i as usize >= WINDOW_THRESHOLD_6 {
                            w = 6;
                            next_check_i = WINDOW_THRESHOLD_6;
                        } else if pivot_i as usize >= WINDOW_THRESHOLD_5 {
                            w = 5;
                            next_check_i = WINDOW_THRESHOLD_5;
                        } else if pivot_i as usize >= WINDOW_THRESHOLD_4 {
                            w = 4;
                            next_check_i = WINDOW_THRESHOLD_4;
                        } else {
                            break;
                        }
                        win_lim = 1 << w;
                    }
                }
            }
        }

        // Plain back-substitution over whatever remains
        while pivot_i >= 0 {
            let src_column = usize::from(self.ge_col_map[pivot_i as usize]);
            for above_i in 0..pivot_i as usize {
                let above_row = usize::from(self.ge_pivots[above_i]);
                if self.ge.bit(above_row, pivot_i as usize) {
                    let dest = usize::from(self.ge_col_map[above_i]);
                    self.recovery.xor_into(dest, src_column);
                    self.stats.block_ops += 1;
                }
            }
            pivot_i -= 1;
        }
    }

    fn set_win_entry(&mut self, win_table: &[u16; 128], dst: usize, a: usize, b: usize) {
        self.recovery.set_xor(
            usize::from(win_table[dst]),
            usize::from(win_table[a]),
            usize::from(win_table[b]),
        );
        self.stats.block_ops += 1;
    }

    /// Regenerates every peeled column value in original solution order:
    /// input value, the three mix columns, then the row's other peel
    /// columns.
    fn substitute(&mut self) {
        let mut rowops = 0usize;
        let k = self.block_count();

        let mut row_i = self.peel_head_rows;
        while row_i != LIST_TERM {
            let row = self.peel_rows[usize::from(row_i)];
            let dest_column_i = usize::from(row.peel_column);

            let [mix0, mix1, mix2] = row
                .params
                .mix_triple(self.params.added_count, self.params.added_next_prime)
                .map(usize::from);

            let off = usize::from(row_i) * self.block_bytes;
            let input = &self.input[off..off + self.block_bytes];
            self.recovery.set_xor_ext(dest_column_i, k + mix0, input);
            self.recovery.add_xor(dest_column_i, k + mix1, k + mix2);
            rowops += 2;

            for column_i in row
                .params
                .peel_columns(self.params.block_count, self.params.block_next_prime)
            {
                let column_i = usize::from(column_i);
                if column_i != dest_column_i {
                    self.recovery.xor_into(dest_column_i, column_i);
                    rowops += 1;
                }
            }

            row_i = row.next;
        }
        self.stats.block_ops += rowops;
    }

    // ========================================================================
    // Driver
    // ========================================================================

    /// Runs compression and triangularization over the first K rows.
    fn solve_matrix(&mut self) -> Result<FeedStatus, CodecError> {
        self.greedy_peeling();
        debug_assert!(self.peel_cols.iter().all(|c| c.mark != Mark::Todo));
        self.allocate_matrix()?;

        self.set_deferred_columns();
        self.set_mixing_columns_for_deferred_rows();
        self.peel_diagonal();
        self.copy_deferred_rows();
        self.multiply_dense_rows();
        let added_count = self.added_count();
        add_invertible_matrix(&mut self.ge, 0, usize::from(self.defer_count), added_count);

        if self.triangle() {
            Ok(FeedStatus::Complete)
        } else {
            Ok(FeedStatus::NeedMoreBlocks)
        }
    }

    /// Runs the substitution phases, populating all recovery blocks.
    fn generate_recovery_blocks(&mut self) {
        self.initialize_column_values();
        self.add_check_values();
        self.add_subdiagonal_values();
        self.back_substitute_above_diagonal();
        self.substitute();
        self.solved = true;
        tracing::trace!(
            triangle_ops = self.stats.triangle_ops,
            block_ops = self.stats.block_ops,
            "recovery blocks generated"
        );
    }

    /// Installs a late row and tries to continue triangularization.
    ///
    /// Returns true when the whole system became solvable.
    fn resume_solve_matrix(&mut self, id: u32, block: &[u8]) -> bool {
        let k = self.block_count();

        // Choose a row slot and a GE row
        let (row_i, ge_row_i) = if self.used_count >= k + self.extra_count {
            let mut found = None;
            for pivot_i in usize::from(self.ge_resume_pivot)..usize::from(self.ge_rows) {
                let candidate = usize::from(self.ge_pivots[pivot_i]);
                if candidate >= self.added_count() {
                    found = Some(candidate);
                    break;
                }
            }
            let Some(ge_row_i) = found else {
                return false;
            };
            (usize::from(self.ge_row_map[ge_row_i]), ge_row_i)
        } else {
            let ge_row_i = usize::from(self.ge_rows);
            let row_i = self.used_count;
            self.ge_rows += 1;
            self.used_count += 1;
            self.ge_row_map[ge_row_i] = row_i as u16;
            (row_i, ge_row_i)
        };
        self.stats.resume_rows += 1;

        let params = self.row_params(id);
        {
            let row = &mut self.peel_rows[row_i];
            row.id = id;
            row.params = params;
        }
        self.store_input_block(row_i, block);

        // Build the fresh GE row from the row's column pattern
        self.ge.clear_row(ge_row_i);
        for mix in params.mix_columns(self.params.added_count, self.params.added_next_prime) {
            let ge_column = usize::from(self.defer_count) + usize::from(mix);
            self.ge.flip_bit(ge_row_i, ge_column);
        }
        for peel_column in
            params.peel_columns(self.params.block_count, self.params.block_next_prime)
        {
            let column = self.peel_cols[usize::from(peel_column)];
            if column.mark == Mark::Peeled {
                self.ge
                    .xor_row_from(ge_row_i, self.compress.row(usize::from(column.peel_row)));
            } else {
                self.ge.flip_bit(ge_row_i, usize::from(column.ge_column));
            }
        }

        // Replay the finished eliminations against this row only
        let resume_pivot = usize::from(self.ge_resume_pivot);
        for pivot_j in 0..resume_pivot {
            if self.ge.bit(ge_row_i, pivot_j) {
                let pivot_row = usize::from(self.ge_pivots[pivot_j]);
                self.ge.eliminate_row(ge_row_i, pivot_row, pivot_j);
                self.stats.triangle_ops += 1;
            }
        }

        if !self.ge.bit(ge_row_i, resume_pivot) {
            // No help for the unmet pivot; park the row for later passes
            self.ge_pivots[ge_row_i] = ge_row_i as u16;
            tracing::trace!(id, "late row parked, pivot still unmet");
            return false;
        }

        self.ge_pivots[ge_row_i] = self.ge_pivots[resume_pivot];
        self.ge_pivots[resume_pivot] = ge_row_i as u16;
        tracing::trace!(id, pivot = resume_pivot, "late row supplied pivot");

        self.triangle_from(resume_pivot + 1)
    }

    /// Writes the value of generator row `id` from the recovery blocks.
    fn generate_row_value(&self, id: u32, out: &mut [u8]) {
        let k = self.block_count();
        let params = self.row_params(id);
        let [mix0, mix1, mix2] = params
            .mix_triple(self.params.added_count, self.params.added_next_prime)
            .map(usize::from);

        // There is always at least one peel column
        let first = usize::from(params.peel_x0);

        if params.peel_weight > 1 {
            let mut x = params.peel_x0;
            x = next_column(
                x,
                self.params.block_count,
                self.params.block_next_prime,
                params.peel_a,
            );
            xor_set(out, self.recovery.block(first), self.recovery.block(usize::from(x)));
            for _ in 2..params.peel_weight {
                x = next_column(
                    x,
                    self.params.block_count,
                    self.params.block_next_prime,
                    params.peel_a,
                );
                xor_block(out, self.recovery.block(usize::from(x)));
            }
            xor_block(out, self.recovery.block(k + mix0));
        } else {
            xor_set(out, self.recovery.block(first), self.recovery.block(k + mix0));
        }

        xor_block(out, self.recovery.block(k + mix1));
        xor_block(out, self.recovery.block(k + mix2));
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Systematic fountain encoder.
///
/// Feed the message once, then generate any number of blocks by id. The
/// first K ids reproduce the source blocks verbatim; higher ids are
/// random-looking combinations that any conformant decoder can use.
#[derive(Debug)]
pub struct Encoder {
    codec: Codec,
    message_bytes: usize,
}

impl Encoder {
    /// Prepares an encoder for a message of `message_bytes` split into
    /// blocks of `block_bytes`.
    ///
    /// # Errors
    ///
    /// Fails when the sizes are degenerate or the derived block count is
    /// unsupported.
    pub fn new(message_bytes: usize, block_bytes: usize) -> Result<Self, CodecError> {
        if message_bytes == 0 || block_bytes == 0 {
            return Err(CodecError::InvalidSizes {
                message_bytes,
                block_bytes,
            });
        }
        let block_count = message_bytes.div_ceil(block_bytes);
        let params = CodeParams::for_block_count(block_count)?;
        let codec = Codec::new(params, block_bytes, message_bytes, 0)?;
        Ok(Self {
            codec,
            message_bytes,
        })
    }

    /// Consumes the message and solves the generator system.
    ///
    /// Call once per encoder; the operation sequence is strictly
    /// prepare, feed, encode.
    ///
    /// # Errors
    ///
    /// Fails when `message` has the wrong length, or on the solver
    /// failures that the tuned parameter table rules out.
    pub fn feed(&mut self, message: &[u8]) -> Result<(), CodecError> {
        debug_assert_eq!(self.codec.used_count, 0, "feed is once-only");
        if message.len() != self.message_bytes {
            return Err(CodecError::BufferLengthMismatch {
                expected: self.message_bytes,
                got: message.len(),
            });
        }

        let block_bytes = self.codec.block_bytes;
        for (id, chunk) in message.chunks(block_bytes).enumerate() {
            self.codec.store_input_block(id, chunk);
            self.codec.opportunistic_peeling(id as u16, id as u32)?;
            self.codec.used_count += 1;
        }

        match self.codec.solve_matrix()? {
            FeedStatus::Complete => {
                self.codec.generate_recovery_blocks();
                Ok(())
            }
            FeedStatus::NeedMoreBlocks => Err(CodecError::SingularSystem {
                pivot: self.codec.ge_resume_pivot,
            }),
        }
    }

    /// Generates the encoded block with identifier `id`.
    ///
    /// Ids below the block count return the source blocks verbatim, the
    /// final one zero-padded to the block size.
    ///
    /// # Errors
    ///
    /// Fails before [`Self::feed`] succeeded or when `out` is not one
    /// block long.
    pub fn encode(&self, id: u32, out: &mut [u8]) -> Result<(), CodecError> {
        if !self.codec.solved {
            return Err(CodecError::NotReady);
        }
        if out.len() != self.codec.block_bytes {
            return Err(CodecError::BufferLengthMismatch {
                expected: self.codec.block_bytes,
                got: out.len(),
            });
        }

        if (id as usize) < self.codec.block_count() {
            out.copy_from_slice(self.codec.input_block(id as usize));
            return Ok(());
        }
        self.codec.generate_row_value(id, out);
        Ok(())
    }

    /// Source block count K.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.codec.block_count()
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_bytes(&self) -> usize {
        self.codec.block_bytes
    }

    /// Solver counters for the completed feed.
    #[must_use]
    pub fn stats(&self) -> SolveStats {
        self.codec.stats
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Fountain decoder: feed `(id, block)` pairs until complete.
#[derive(Debug)]
pub struct Decoder {
    codec: Codec,
    message_bytes: usize,
}

impl Decoder {
    /// Prepares a decoder for a message of `message_bytes` split into
    /// blocks of `block_bytes`.
    ///
    /// # Errors
    ///
    /// Fails when the sizes are degenerate or the derived block count is
    /// unsupported.
    pub fn new(message_bytes: usize, block_bytes: usize) -> Result<Self, CodecError> {
        if message_bytes == 0 || block_bytes == 0 {
            return Err(CodecError::InvalidSizes {
                message_bytes,
                block_bytes,
            });
        }
        let block_count = message_bytes.div_ceil(block_bytes);
        let params = CodeParams::for_block_count(block_count)?;
        let codec = Codec::new(params, block_bytes, message_bytes, MAX_EXTRA_ROWS)?;
        Ok(Self {
            codec,
            message_bytes,
        })
    }

    /// Feeds one received block.
    ///
    /// Returns [`FeedStatus::Complete`] once the message is solvable;
    /// further feeds are accepted and ignored.
    ///
    /// # Errors
    ///
    /// Fails when `block` is not one block long, or when a malformed
    /// stream overflows the row reference bound.
    pub fn feed(&mut self, id: u32, block: &[u8]) -> Result<FeedStatus, CodecError> {
        if block.len() != self.codec.block_bytes {
            return Err(CodecError::BufferLengthMismatch {
                expected: self.codec.block_bytes,
                got: block.len(),
            });
        }
        if self.codec.solved {
            return Ok(FeedStatus::Complete);
        }

        let k = self.codec.block_count();
        if self.codec.used_count < k {
            let row_i = self.codec.used_count;
            self.codec.opportunistic_peeling(row_i as u16, id)?;
            self.codec.store_input_block(row_i, block);
            self.codec.used_count += 1;

            if self.codec.used_count < k {
                return Ok(FeedStatus::NeedMoreBlocks);
            }
            return match self.codec.solve_matrix()? {
                FeedStatus::Complete => {
                    self.codec.generate_recovery_blocks();
                    Ok(FeedStatus::Complete)
                }
                FeedStatus::NeedMoreBlocks => Ok(FeedStatus::NeedMoreBlocks),
            };
        }

        if self.codec.resume_solve_matrix(id, block) {
            self.codec.generate_recovery_blocks();
            return Ok(FeedStatus::Complete);
        }
        Ok(FeedStatus::NeedMoreBlocks)
    }

    /// Rebuilds the original message into `out`.
    ///
    /// Source blocks that arrived verbatim are copied; the rest are
    /// regenerated from the recovery blocks.
    ///
    /// # Errors
    ///
    /// Fails before the decode completed or when `out` is not
    /// message-sized.
    pub fn reconstruct(&self, out: &mut [u8]) -> Result<(), CodecError> {
        if !self.codec.solved {
            return Err(CodecError::NotReady);
        }
        if out.len() != self.message_bytes {
            return Err(CodecError::BufferLengthMismatch {
                expected: self.message_bytes,
                got: out.len(),
            });
        }

        let k = self.codec.block_count();
        let block_bytes = self.codec.block_bytes;
        let final_bytes = self.codec.output_final_bytes;

        let mut copied = vec![false; k];
        for row_i in 0..self.codec.used_count {
            let id = self.codec.peel_rows[row_i].id as usize;
            if id >= k || copied[id] {
                continue;
            }
            let len = if id == k - 1 { final_bytes } else { block_bytes };
            out[id * block_bytes..id * block_bytes + len]
                .copy_from_slice(&self.codec.input_block(row_i)[..len]);
            copied[id] = true;
        }

        let mut scratch = vec![0u8; block_bytes];
        for (id, was_copied) in copied.iter().enumerate() {
            if *was_copied {
                continue;
            }
            if id == k - 1 {
                self.codec.generate_row_value(id as u32, &mut scratch);
                out[id * block_bytes..id * block_bytes + final_bytes]
                    .copy_from_slice(&scratch[..final_bytes]);
            } else {
                self.codec.generate_row_value(
                    id as u32,
                    &mut out[id * block_bytes..(id + 1) * block_bytes],
                );
            }
        }
        Ok(())
    }

    /// True once enough blocks arrived to solve the message.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.codec.solved
    }

    /// The first unmet pivot while the solver is stalled waiting for
    /// more blocks, or None before the first solve attempt and after
    /// completion.
    #[must_use]
    pub fn resume_pivot(&self) -> Option<u16> {
        if self.codec.solved || self.codec.used_count < self.codec.block_count() {
            None
        } else {
            Some(self.codec.ge_resume_pivot)
        }
    }

    /// Source block count K.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.codec.block_count()
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_bytes(&self) -> usize {
        self.codec.block_bytes
    }

    /// Solver counters so far.
    #[must_use]
    pub fn stats(&self) -> SolveStats {
        self.codec.stats
    }
}
