use super::MatrixHandler;
use gpnet_core::{GpnetError, GpnetResult};
use sprs::CsMat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Set,
    Add,
}

#[derive(Debug, Clone, Copy)]
struct Write {
    row: usize,
    col: usize,
    value: f64,
    op: WriteOp,
}

/// Recorded positions and storage slots of one assembly pass.
///
/// `positions[k]` is where the k-th write landed (after transposition),
/// `slots[k]` its index into the CSR data array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteSequence {
    positions: Vec<(usize, usize)>,
    slots: Vec<usize>,
    transposed: bool,
}

impl WriteSequence {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn is_transposed(&self) -> bool {
        self.transposed
    }

    /// Slot for the k-th write if it targets `position`.
    pub(crate) fn slot_for(&self, k: usize, position: (usize, usize)) -> Option<usize> {
        match self.positions.get(k) {
            Some(p) if *p == position => Some(self.slots[k]),
            _ => None,
        }
    }
}

/// Triplet assembly backend.
#[derive(Debug)]
pub struct TripletHandler {
    rows: usize,
    cols: usize,
    transposed: bool,
    writes: Vec<Write>,
    out_of_bounds: Option<(usize, usize)>,
    assembled: Option<(CsMat<f64>, WriteSequence)>,
}

impl TripletHandler {
    /// Handler for a `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            transposed: false,
            writes: Vec::new(),
            out_of_bounds: None,
            assembled: None,
        }
    }

    /// Handler that stores every write `(r, c)` at `(c, r)` of a
    /// `rows x cols` matrix.
    pub fn transposed(rows: usize, cols: usize) -> Self {
        Self {
            transposed: true,
            ..Self::new(rows, cols)
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.len()
    }

    fn record(&mut self, row: usize, col: usize, value: f64, op: WriteOp) {
        let (row, col) = if self.transposed { (col, row) } else { (row, col) };
        if row >= self.rows || col >= self.cols {
            self.out_of_bounds.get_or_insert((row, col));
            return;
        }
        self.assembled = None;
        self.writes.push(Write {
            row,
            col,
            value,
            op,
        });
    }

    fn assemble(&self) -> GpnetResult<(CsMat<f64>, WriteSequence)> {
        if let Some((row, col)) = self.out_of_bounds {
            return Err(GpnetError::Validation(format!(
                "write at ({row}, {col}) outside a {}x{} matrix",
                self.rows, self.cols
            )));
        }

        let mut order: Vec<usize> = (0..self.writes.len()).collect();
        // stable: ties keep write order
        order.sort_by_key(|&k| (self.writes[k].row, self.writes[k].col));

        let mut indptr = vec![0usize; self.rows + 1];
        let mut indices = Vec::new();
        let mut data: Vec<f64> = Vec::new();
        let mut slots = vec![0usize; self.writes.len()];
        let mut current: Option<(usize, usize)> = None;

        for k in order {
            let w = self.writes[k];
            if current != Some((w.row, w.col)) {
                current = Some((w.row, w.col));
                indices.push(w.col);
                data.push(0.0);
                indptr[w.row + 1] += 1;
            }
            let slot = data.len() - 1;
            data[slot] = match w.op {
                WriteOp::Set => w.value,
                WriteOp::Add => data[slot] + w.value,
            };
            slots[k] = slot;
        }
        for r in 0..self.rows {
            indptr[r + 1] += indptr[r];
        }

        let matrix = CsMat::try_new((self.rows, self.cols), indptr, indices, data)
            .map_err(|(_, _, _, e)| GpnetError::Validation(format!("invalid CSR structure: {e}")))?;
        let sequence = WriteSequence {
            positions: self.writes.iter().map(|w| (w.row, w.col)).collect(),
            slots,
            transposed: self.transposed,
        };
        Ok((matrix, sequence))
    }

    /// Assembled matrix, available after [`MatrixHandler::set_matrix`].
    pub fn matrix(&self) -> Option<&CsMat<f64>> {
        self.assembled.as_ref().map(|(m, _)| m)
    }

    /// Matrix and write sequence, assembling first if needed.
    pub fn into_parts(mut self) -> GpnetResult<(CsMat<f64>, WriteSequence)> {
        match self.assembled.take() {
            Some(parts) => Ok(parts),
            None => self.assemble(),
        }
    }
}

impl MatrixHandler for TripletHandler {
    fn set_coefficient(&mut self, row: usize, col: usize, value: f64) {
        self.record(row, col, value, WriteOp::Set);
    }

    fn add_to_coefficient(&mut self, row: usize, col: usize, value: f64) {
        self.record(row, col, value, WriteOp::Add);
    }

    fn set_matrix(&mut self) -> GpnetResult<()> {
        self.assembled = Some(self.assemble()?);
        Ok(())
    }
}
