//! Memoized step Jacobians.

use super::fingerprint::{Fingerprint, FingerprintHasher};
use crate::model::StepContext;
use crate::problem::OptimizableProblem;
use crate::sparse::{MatrixHandler, ReferenceHandler, TripletHandler, WriteSequence};
use gpnet_core::{GpnetError, GpnetResult};
use hashbrown::HashMap;
use sprs::CsMat;

/// Jacobians of one step's equations.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDerivatives {
    /// `∂E/∂x_new`, equations x states.
    pub d_new: CsMat<f64>,
    /// `∂E/∂x_last`, equations x states.
    pub d_last: CsMat<f64>,
    /// `∂E/∂u`, equations x controls per step.
    pub d_control: CsMat<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    NewState,
    LastState,
    Control,
}

/// Per-step cache of [`StepDerivatives`].
///
/// Entry `i` is keyed by everything the step Jacobians depend on: both states,
/// the control and both times. The first assembly of each block fixes its
/// pattern; later assemblies only refresh values.
#[derive(Debug, Default)]
pub struct EquationDerivativeCache {
    hasher: FingerprintHasher,
    entries: HashMap<usize, (Fingerprint, StepDerivatives)>,
    patterns: [Option<(CsMat<f64>, WriteSequence)>; 3],
    invocations: usize,
}

impl EquationDerivativeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the problem's derivative routines were evaluated.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Jacobians of step `step` at `ctx`, evaluated only on a fingerprint miss.
    pub fn get(
        &mut self,
        problem: &dyn OptimizableProblem,
        step: usize,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<&StepDerivatives> {
        let key = Fingerprint::of(
            &self.hasher,
            &[
                ctx.last_state,
                ctx.new_state,
                ctx.control,
                &[ctx.last_time, ctx.new_time],
            ],
        );
        let hit = match self.entries.get(&step) {
            Some((cached, _)) => cached.matches(&key)?,
            None => false,
        };
        if !hit {
            let derivatives = self.evaluate(problem, ctx)?;
            self.entries.insert(step, (key, derivatives));
        }
        self.entries
            .get(&step)
            .map(|(_, d)| d)
            .ok_or_else(|| GpnetError::CacheInconsistency(format!("step {step} vanished")))
    }

    fn evaluate(
        &mut self,
        problem: &dyn OptimizableProblem,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<StepDerivatives> {
        self.invocations += 1;
        let rows = problem.number_of_equations();
        let states = problem.number_of_states();
        let controls = problem.number_of_controls_per_step();
        Ok(StepDerivatives {
            d_new: self.assemble(Block::NewState, (rows, states), |h| {
                problem.d_evaluate_d_new_state(h, ctx)
            })?,
            d_last: self.assemble(Block::LastState, (rows, states), |h| {
                problem.d_evaluate_d_last_state(h, ctx)
            })?,
            d_control: self.assemble(Block::Control, (rows, controls), |h| {
                problem.d_evaluate_d_control(h, ctx)
            })?,
        })
    }

    fn assemble(
        &mut self,
        block: Block,
        shape: (usize, usize),
        write: impl Fn(&mut dyn MatrixHandler) -> GpnetResult<()>,
    ) -> GpnetResult<CsMat<f64>> {
        let slot = &mut self.patterns[block as usize];
        if let Some((pattern, sequence)) = slot.as_ref() {
            if pattern.shape() == shape {
                let mut matrix = pattern.clone();
                let mut handler = ReferenceHandler::new(&mut matrix, sequence);
                write(&mut handler)?;
                if handler.set_matrix().is_ok() {
                    return Ok(matrix);
                }
                tracing::debug!(?block, "derivative pattern changed, reassembling");
            }
        }
        let mut handler = TripletHandler::new(shape.0, shape.1);
        write(&mut handler)?;
        let (matrix, sequence) = handler.into_parts()?;
        *slot = Some((matrix.clone(), sequence));
        Ok(matrix)
    }
}
