//! Systematic fountain erasure code over GF(2).
//!
//! Splits a message into K fixed-size blocks and produces an unlimited
//! stream of encoded blocks identified by a 32-bit id. Any K received
//! blocks usually suffice to reconstruct the message (occasionally a
//! few more are needed); the first K ids reproduce the source blocks
//! verbatim, so nothing is lost by using the code on a clean channel.
//!
//! # Overview
//!
//! - Receivers need roughly K blocks, any K: no block is special, no
//!   retransmission coordination is required, every late block helps
//! - Encoding and decoding cost a few block-XORs per block; the solver
//!   peels the sparse part in linear time and runs Gaussian elimination
//!   only on a residual system of roughly sqrt(K) columns
//! - All matrix structure is regenerated on demand from `(id, seed)`,
//!   so the only state scaling with K is block storage and bit matrices
//!
//! # Example
//!
//! ```
//! use wellspring::{Decoder, Encoder, FeedStatus};
//!
//! let message: Vec<u8> = (0..16 * 32).map(|i| i as u8).collect();
//! let mut encoder = Encoder::new(message.len(), 32)?;
//! encoder.feed(&message)?;
//!
//! // Lose block 9; make it up with repair block 16
//! let mut decoder = Decoder::new(message.len(), 32)?;
//! let mut block = vec![0u8; 32];
//! let mut status = FeedStatus::NeedMoreBlocks;
//! for id in (0..16u32).filter(|&id| id != 9).chain([16]) {
//!     encoder.encode(id, &mut block)?;
//!     status = decoder.feed(id, &block)?;
//! }
//! assert_eq!(status, FeedStatus::Complete);
//!
//! let mut output = vec![0u8; message.len()];
//! decoder.reconstruct(&mut output)?;
//! assert_eq!(output, message);
//! # Ok::<(), wellspring::CodecError>(())
//! ```
//!
//! # Determinism and wire compatibility
//!
//! Two instances built with the same `(message_bytes, block_bytes)`
//! produce identical blocks for every id, across platforms. The wire
//! format is pinned by five ingredients: the parameter table
//! ([`CodeParams`]), the PRNG bit stream ([`prng::TwinMwc`]), the row
//! weight distribution, the column stride recurrence, and the
//! invertible scrambler seeds. The tests hold golden vectors for all of
//! them.
//!
//! # Limits
//!
//! Only the block counts in the parameter table are supported; the
//! codec is single-threaded and CPU-bound; there is no cryptographic
//! protection of any kind.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod arith;
pub mod bitmat;
mod codec;
pub mod error;
pub mod params;
pub mod prng;
pub mod rowgen;
pub mod xor;

#[cfg(test)]
mod tests;

pub use codec::{Decoder, Encoder, SolveStats};
pub use error::{CodecError, FeedStatus};
pub use params::CodeParams;
