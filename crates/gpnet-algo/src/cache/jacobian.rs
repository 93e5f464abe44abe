//! Constraint Jacobian of the reduced problem.
//!
//! Rows are grouped in blocks of `h` constraints per constraint time `τ_k`,
//! columns in blocks of `w` controls per control time `c_j`. Control block `j`
//! can only influence constraints at times `τ_k > c_{j-1}`, so column block
//! `j` is dense from row block `row_start(j)` to the last row block and empty
//! above. The pattern follows from the time grids alone and is fixed on
//! construction; values are stored block after block, row-major within a
//! block.

use gpnet_core::{GpnetError, GpnetResult};
use sprs::{CsMat, TriMat};

/// Fixed block pattern shared by owned and mapped Jacobians.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintJacobianLayout {
    constraints_per_step: usize,
    controls_per_step: usize,
    constraint_steps: usize,
    /// First row block of every column block.
    row_starts: Vec<usize>,
    /// Offset of every column block in the value storage.
    offsets: Vec<usize>,
    nnz: usize,
}

impl ConstraintJacobianLayout {
    pub fn new(
        constraints_per_step: usize,
        controls_per_step: usize,
        constraint_times: &[f64],
        control_times: &[f64],
    ) -> Self {
        let mut row_starts = Vec::with_capacity(control_times.len());
        let mut offsets = Vec::with_capacity(control_times.len());
        let mut nnz = 0;
        for j in 0..control_times.len() {
            let start = if j == 0 {
                0
            } else {
                let previous = control_times[j - 1];
                constraint_times.partition_point(|&t| t <= previous)
            };
            row_starts.push(start);
            offsets.push(nnz);
            nnz += (constraint_times.len() - start) * constraints_per_step * controls_per_step;
        }
        Self {
            constraints_per_step,
            controls_per_step,
            constraint_steps: constraint_times.len(),
            row_starts,
            offsets,
            nnz,
        }
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    pub fn rows(&self) -> usize {
        self.constraint_steps * self.constraints_per_step
    }

    pub fn cols(&self) -> usize {
        self.row_starts.len() * self.controls_per_step
    }

    /// First row block touched by control block `j`.
    pub fn row_start(&self, j: usize) -> usize {
        self.row_starts[j]
    }

    /// Storage position of `(row, col)`, if it belongs to the pattern.
    pub fn position(&self, row: usize, col: usize) -> Option<usize> {
        if self.controls_per_step == 0 || row >= self.rows() || col >= self.cols() {
            return None;
        }
        let block = col / self.controls_per_step;
        let first_row = self.row_starts[block] * self.constraints_per_step;
        if row < first_row {
            return None;
        }
        Some(
            self.offsets[block]
                + (row - first_row) * self.controls_per_step
                + col % self.controls_per_step,
        )
    }

    /// Row and column of every stored value, in storage order.
    pub fn supply_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()> {
        if rows.len() != self.nnz || cols.len() != self.nnz {
            return Err(GpnetError::Validation(format!(
                "index buffers have length {}/{}, pattern has {} entries",
                rows.len(),
                cols.len(),
                self.nnz
            )));
        }
        let w = self.controls_per_step;
        let mut k = 0;
        for (block, &start) in self.row_starts.iter().enumerate() {
            for row in start * self.constraints_per_step..self.rows() {
                for c in 0..w {
                    rows[k] = row;
                    cols[k] = block * w + c;
                    k += 1;
                }
            }
        }
        Ok(())
    }
}

fn add_at(
    layout: &ConstraintJacobianLayout,
    values: &mut [f64],
    row: usize,
    col: usize,
    value: f64,
) -> GpnetResult<()> {
    match layout.position(row, col) {
        Some(k) => {
            values[k] += value;
            Ok(())
        }
        None => Err(GpnetError::Validation(format!(
            "constraint jacobian entry ({row}, {col}) is outside the fixed pattern"
        ))),
    }
}

/// Constraint Jacobian owning its values.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintJacobian {
    layout: ConstraintJacobianLayout,
    values: Vec<f64>,
}

impl ConstraintJacobian {
    pub fn new(layout: ConstraintJacobianLayout) -> Self {
        let values = vec![0.0; layout.nnz()];
        Self { layout, values }
    }

    pub fn layout(&self) -> &ConstraintJacobianLayout {
        &self.layout
    }

    pub fn supply_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> GpnetResult<()> {
        self.layout.supply_indices(rows, cols)
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn set_zero(&mut self) {
        self.values.fill(0.0);
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) -> GpnetResult<()> {
        add_at(&self.layout, &mut self.values, row, col, value)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.layout
            .position(row, col)
            .map_or(0.0, |k| self.values[k])
    }

    /// Assembled sparse matrix, explicit zeros included.
    pub fn whole_matrix(&self) -> GpnetResult<CsMat<f64>> {
        let mut rows = vec![0; self.layout.nnz()];
        let mut cols = vec![0; self.layout.nnz()];
        self.layout.supply_indices(&mut rows, &mut cols)?;
        let mut triplets = TriMat::new((self.layout.rows(), self.layout.cols()));
        for ((r, c), v) in rows.into_iter().zip(cols).zip(&self.values) {
            triplets.add_triplet(r, c, *v);
        }
        Ok(triplets.to_csr())
    }

    /// Borrow the values as a mapped Jacobian.
    pub fn as_mapped(&mut self) -> MappedConstraintJacobian<'_> {
        MappedConstraintJacobian {
            layout: &self.layout,
            values: &mut self.values,
        }
    }
}

/// Constraint Jacobian writing into storage owned by the caller, such as the
/// value buffer of an NLP solver callback.
#[derive(Debug)]
pub struct MappedConstraintJacobian<'a> {
    layout: &'a ConstraintJacobianLayout,
    values: &'a mut [f64],
}

impl<'a> MappedConstraintJacobian<'a> {
    pub fn new(layout: &'a ConstraintJacobianLayout, values: &'a mut [f64]) -> GpnetResult<Self> {
        if values.len() != layout.nnz() {
            return Err(GpnetError::Validation(format!(
                "value buffer has length {}, pattern has {} entries",
                values.len(),
                layout.nnz()
            )));
        }
        Ok(Self { layout, values })
    }

    pub fn set_zero(&mut self) {
        self.values.fill(0.0);
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) -> GpnetResult<()> {
        add_at(self.layout, self.values, row, col, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_control_blocks_skip_earlier_constraints() {
        // constraints at 1, 2, 3; controls at 0, 1.5, 3
        let layout = ConstraintJacobianLayout::new(1, 2, &[1.0, 2.0, 3.0], &[0.0, 1.5, 3.0]);
        assert_eq!(layout.row_start(0), 0);
        assert_eq!(layout.row_start(1), 0);
        assert_eq!(layout.row_start(2), 1);
        assert_eq!(layout.nnz(), 3 * 2 + 3 * 2 + 2 * 2);
        assert_eq!(layout.position(0, 4), None);
        assert_eq!(layout.position(1, 4), Some(12));
        assert_eq!(layout.position(2, 5), Some(15));
    }

    #[test]
    fn indices_follow_storage_order() {
        let layout = ConstraintJacobianLayout::new(2, 1, &[1.0, 2.0], &[0.0, 1.0, 2.0]);
        let mut rows = vec![0; layout.nnz()];
        let mut cols = vec![0; layout.nnz()];
        layout.supply_indices(&mut rows, &mut cols).unwrap();
        for (k, (r, c)) in rows.iter().zip(&cols).enumerate() {
            assert_eq!(layout.position(*r, *c), Some(k));
        }
    }

    #[test]
    fn mapped_writes_land_in_caller_storage() {
        let layout = ConstraintJacobianLayout::new(1, 1, &[1.0], &[0.0, 1.0]);
        let mut buffer = vec![0.0; layout.nnz()];
        let mut mapped = MappedConstraintJacobian::new(&layout, &mut buffer).unwrap();
        mapped.add(0, 1, 2.5).unwrap();
        assert!(mapped.add(5, 0, 1.0).is_err());
        assert_eq!(buffer, vec![0.0, 2.5]);
    }

    #[test]
    fn whole_matrix_keeps_the_block_pattern() {
        // constraints at 1, 2; controls at 0, 1, 2
        let layout = ConstraintJacobianLayout::new(1, 1, &[1.0, 2.0], &[0.0, 1.0, 2.0]);
        let mut jacobian = ConstraintJacobian::new(layout);
        jacobian.add(1, 2, 4.0).unwrap();
        jacobian.add(0, 0, -1.0).unwrap();

        let matrix = jacobian.whole_matrix().unwrap();
        assert_eq!(matrix.shape(), (2, 3));
        assert_eq!(matrix.nnz(), jacobian.layout().nnz());
        assert_eq!(matrix.get(1, 2), Some(&4.0));
        assert_eq!(matrix.get(0, 0), Some(&-1.0));
        assert_eq!(matrix.get(1, 0), Some(&0.0));
        assert_eq!(matrix.get(0, 2), None);
    }
}
