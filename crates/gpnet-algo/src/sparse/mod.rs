//! # Sparse Assembly Layer
//!
//! Every component writes its Jacobian contributions through the
//! [`MatrixHandler`] contract. Two backends implement it:
//!
//! - [`TripletHandler`]: records `(row, col, value)` writes and builds a CSR
//!   matrix on [`MatrixHandler::set_matrix`]. Writes at identical positions are
//!   folded deterministically: entries are ordered by row, then column, and ties
//!   are combined in their original write order (`set` overwrites, `add`
//!   accumulates). Assembly also yields a [`WriteSequence`], the position and
//!   storage slot of every write.
//! - [`ReferenceHandler`]: reuses the pattern and [`WriteSequence`] of an earlier
//!   triplet pass. The k-th write goes straight to the recorded slot without any
//!   structural lookup. This is the backend for repeated evaluations where the
//!   pattern never changes (Newton iterations after the first, NLP callbacks).
//!
//! Given the same write sequence, both backends produce bit-identical matrices:
//! each position starts at `0.0` and receives its writes in the same order.
//!
//! [`OffsetHandler`] is an adapter placing a local block into a larger global
//! matrix (row/column shift plus a scale factor).
//!
//! ## Usage
//!
//! ```ignore
//! let mut triplets = TripletHandler::new(n, n);
//! problem.d_evaluate_d_new_state(&mut triplets, ...)?;
//! triplets.set_matrix()?;
//! let (mut jacobian, sequence) = triplets.into_parts()?;
//!
//! // later evaluations: same pattern, values only
//! let mut fast = ReferenceHandler::new(&mut jacobian, &sequence);
//! problem.d_evaluate_d_new_state(&mut fast, ...)?;
//! fast.set_matrix()?;
//! ```

pub mod offset;
pub mod reference;
pub mod triplet;

pub use offset::OffsetHandler;
pub use reference::ReferenceHandler;
pub use triplet::{TripletHandler, WriteSequence};

use gpnet_core::GpnetResult;

/// Write contract shared by all Jacobian assembly backends.
pub trait MatrixHandler {
    /// Overwrite the coefficient at `(row, col)`.
    fn set_coefficient(&mut self, row: usize, col: usize, value: f64);

    /// Accumulate into the coefficient at `(row, col)`.
    fn add_to_coefficient(&mut self, row: usize, col: usize, value: f64);

    /// Finalize the matrix after all writes of one evaluation.
    fn set_matrix(&mut self) -> GpnetResult<()>;
}

/// Dense copy of a CSR matrix, row-major `Vec<Vec<f64>>`; used by tests and
/// diagnostics.
pub fn to_dense(matrix: &sprs::CsMat<f64>) -> Vec<Vec<f64>> {
    let (rows, cols) = matrix.shape();
    let mut dense = vec![vec![0.0; cols]; rows];
    for (value, (row, col)) in matrix.iter() {
        dense[row][col] = *value;
    }
    dense
}
