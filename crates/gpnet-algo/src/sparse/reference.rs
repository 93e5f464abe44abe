use super::{MatrixHandler, WriteSequence};
use gpnet_core::{GpnetError, GpnetResult};
use sprs::CsMat;

/// Assembly backend writing into a fixed, previously assembled pattern.
///
/// Values are reset to zero on construction. Writes that match the recorded
/// sequence go straight to their slot; a write that diverges from the sequence
/// falls back to a structural lookup, and a write outside the pattern makes
/// [`MatrixHandler::set_matrix`] fail instead of growing the pattern.
pub struct ReferenceHandler<'a> {
    matrix: &'a mut CsMat<f64>,
    sequence: &'a WriteSequence,
    cursor: usize,
    missing: Option<(usize, usize)>,
}

impl<'a> ReferenceHandler<'a> {
    pub fn new(matrix: &'a mut CsMat<f64>, sequence: &'a WriteSequence) -> Self {
        matrix.data_mut().iter_mut().for_each(|v| *v = 0.0);
        Self {
            matrix,
            sequence,
            cursor: 0,
            missing: None,
        }
    }

    fn slot(&mut self, row: usize, col: usize) -> Option<usize> {
        let position = if self.sequence.is_transposed() {
            (col, row)
        } else {
            (row, col)
        };
        let k = self.cursor;
        self.cursor += 1;
        let slot = self
            .sequence
            .slot_for(k, position)
            .or_else(|| self.matrix.nnz_index(position.0, position.1).map(|i| i.0));
        if slot.is_none() {
            self.missing.get_or_insert(position);
        }
        slot
    }
}

impl MatrixHandler for ReferenceHandler<'_> {
    fn set_coefficient(&mut self, row: usize, col: usize, value: f64) {
        if let Some(slot) = self.slot(row, col) {
            self.matrix.data_mut()[slot] = value;
        }
    }

    fn add_to_coefficient(&mut self, row: usize, col: usize, value: f64) {
        if let Some(slot) = self.slot(row, col) {
            self.matrix.data_mut()[slot] += value;
        }
    }

    fn set_matrix(&mut self) -> GpnetResult<()> {
        match self.missing {
            Some((row, col)) => Err(GpnetError::Validation(format!(
                "write at ({row}, {col}) is not part of the fixed sparsity pattern"
            ))),
            None => Ok(()),
        }
    }
}
