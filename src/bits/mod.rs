//! Bit-level primitives: append-only bit vectors, borrowing cursors,
//! Elias gamma/delta codes and rank support.

mod bit_vector;
mod codes;
mod ranked;

pub use bit_vector::{BitCursor, BitVector, BitVectorBuilder};
pub use codes::{read_delta, read_gamma, write_delta, write_gamma, write_gap_list, GapListCursor};
pub use ranked::RankedBitVector;
