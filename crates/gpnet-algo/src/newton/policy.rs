//! Step acceptance policies for the Newton solver.

use super::NonlinearSystem;
use crate::linear::DenseLu;
use gpnet_core::{GpnetResult, NumericalProblem, NumericalProblemKind};

/// Smallest damping factor before a damped Newton step gives up.
pub const MINIMAL_STEPSIZE: f64 = 1e-10;

/// Decides how much of the Newton correction is applied.
///
/// `x` holds the current iterate on entry and the accepted iterate on return.
/// The returned value is the step length actually taken.
pub trait StepPolicy {
    fn name(&self) -> &'static str;

    fn accept(
        &mut self,
        system: &mut dyn NonlinearSystem,
        lu: &DenseLu,
        x: &mut [f64],
        delta: &[f64],
        iteration: usize,
    ) -> GpnetResult<f64>;
}

/// Applies the full correction.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullStep;

impl StepPolicy for FullStep {
    fn name(&self) -> &'static str {
        "full-step"
    }

    fn accept(
        &mut self,
        _system: &mut dyn NonlinearSystem,
        _lu: &DenseLu,
        x: &mut [f64],
        delta: &[f64],
        _iteration: usize,
    ) -> GpnetResult<f64> {
        for (xi, di) in x.iter_mut().zip(delta) {
            *xi += di;
        }
        Ok(1.0)
    }
}

/// Damped Newton with Deuflhard's natural monotonicity test.
///
/// A trial step `x + λΔ` is accepted once the simplified correction
/// `Δ̄ = -J(x)⁻¹ F(x + λΔ)` satisfies `‖Δ̄‖ ≤ (1 - λ/2) ‖Δ‖`; otherwise λ is
/// halved.
#[derive(Debug, Clone, Copy)]
pub struct DeuflhardDamping {
    pub minimal_stepsize: f64,
}

impl Default for DeuflhardDamping {
    fn default() -> Self {
        Self {
            minimal_stepsize: MINIMAL_STEPSIZE,
        }
    }
}

fn euclidean(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

impl StepPolicy for DeuflhardDamping {
    fn name(&self) -> &'static str {
        "deuflhard"
    }

    fn accept(
        &mut self,
        system: &mut dyn NonlinearSystem,
        lu: &DenseLu,
        x: &mut [f64],
        delta: &[f64],
        iteration: usize,
    ) -> GpnetResult<f64> {
        let delta_norm = euclidean(delta);
        let mut trial = vec![0.0; x.len()];
        let mut residual = vec![0.0; x.len()];
        let mut lambda = 1.0;

        while lambda >= self.minimal_stepsize {
            for ((t, xi), di) in trial.iter_mut().zip(x.iter()).zip(delta) {
                *t = xi + lambda * di;
            }
            system.residual(&trial, &mut residual)?;
            if residual.iter().all(|r| r.is_finite()) {
                let negated: Vec<f64> = residual.iter().map(|r| -r).collect();
                if let Ok(simplified) = lu.solve(&negated) {
                    if euclidean(&simplified) <= (1.0 - 0.5 * lambda) * delta_norm {
                        x.copy_from_slice(&trial);
                        return Ok(lambda);
                    }
                }
            }
            lambda *= 0.5;
        }

        Err(NumericalProblem::new(NumericalProblemKind::MinimalStepsize, iteration, lambda).into())
    }
}
