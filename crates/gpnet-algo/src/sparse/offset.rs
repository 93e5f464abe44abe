use super::MatrixHandler;
use gpnet_core::GpnetResult;

/// Shifts and scales writes into an enclosing handler.
///
/// Used to place per-step blocks into the global Jacobian of a full-horizon
/// problem. Finalization is left to the owner of the enclosing handler, so
/// `set_matrix` is a no-op here.
pub struct OffsetHandler<'a> {
    inner: &'a mut dyn MatrixHandler,
    row_offset: usize,
    col_offset: usize,
    scale: f64,
}

impl<'a> OffsetHandler<'a> {
    pub fn new(inner: &'a mut dyn MatrixHandler, row_offset: usize, col_offset: usize) -> Self {
        Self {
            inner,
            row_offset,
            col_offset,
            scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }
}

impl MatrixHandler for OffsetHandler<'_> {
    fn set_coefficient(&mut self, row: usize, col: usize, value: f64) {
        self.inner
            .set_coefficient(row + self.row_offset, col + self.col_offset, self.scale * value);
    }

    fn add_to_coefficient(&mut self, row: usize, col: usize, value: f64) {
        self.inner
            .add_to_coefficient(row + self.row_offset, col + self.col_offset, self.scale * value);
    }

    fn set_matrix(&mut self) -> GpnetResult<()> {
        Ok(())
    }
}
