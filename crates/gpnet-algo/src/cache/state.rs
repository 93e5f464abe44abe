//! Memoized state trajectories for control vectors.

use super::fingerprint::{Fingerprint, FingerprintHasher};
use crate::evolver::{control_at, TimeEvolver};
use crate::problem::OptimizableProblem;
use gpnet_core::{
    GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector,
    NumericalProblem,
};
use tracing::{debug, warn};

/// Source of state trajectories for given control trajectories.
pub trait StateCache {
    /// States at every point of `times` (the first receives `initial_state`)
    /// under `controls`.
    fn compute_states(
        &mut self,
        problem: &dyn OptimizableProblem,
        controls: &dyn Interpolating,
        times: &[f64],
        initial_state: &[f64],
    ) -> GpnetResult<&InterpolatingVector>;
}

/// [`StateCache`] with per-step invalidation.
///
/// Step `i` is keyed by `(x_{i-1}, u(t_i), t_{i-1}, t_i)`. Only steps whose key
/// changed are solved again, warm-started from their previous solution. A
/// control trajectory whose simulation failed numerically from a given
/// initial state is remembered and rejected on the next identical request
/// without solving.
#[derive(Debug, Default)]
pub struct ControlStateCache {
    evolver: TimeEvolver,
    hasher: FingerprintHasher,
    states: InterpolatingVector,
    keys: Vec<Option<Fingerprint>>,
    failed: Option<(Fingerprint, NumericalProblem)>,
    solves: usize,
}

impl ControlStateCache {
    pub fn new(evolver: TimeEvolver) -> Self {
        Self {
            evolver,
            ..Self::default()
        }
    }

    /// Number of single-step Newton solves performed so far.
    pub fn solves(&self) -> usize {
        self.solves
    }

    /// Most recently computed trajectory.
    pub fn states(&self) -> &InterpolatingVector {
        &self.states
    }

    pub fn invalidate(&mut self) {
        self.keys.iter_mut().for_each(|k| *k = None);
        self.failed = None;
    }

    fn reset_storage(&mut self, times: &[f64], width: usize) -> GpnetResult<()> {
        let same = self.states.inner_length() == width
            && self.states.interpolation_points() == times;
        if !same {
            self.states = InterpolatingVector::new(times.to_vec(), width)?;
            self.keys = vec![None; times.len()];
        }
        Ok(())
    }
}

impl StateCache for ControlStateCache {
    fn compute_states(
        &mut self,
        problem: &dyn OptimizableProblem,
        controls: &dyn Interpolating,
        times: &[f64],
        initial_state: &[f64],
    ) -> GpnetResult<&InterpolatingVector> {
        let n = problem.number_of_states();
        if initial_state.len() != n {
            return Err(GpnetError::Validation(format!(
                "initial state has length {}, problem has {n} states",
                initial_state.len()
            )));
        }
        let trajectory = Fingerprint::of(
            &self.hasher,
            &[
                initial_state,
                controls.interpolation_points(),
                controls.all_values(),
                times,
            ],
        );
        if let Some((key, failure)) = &self.failed {
            if key.matches(&trajectory)? {
                warn!("control trajectory failed before, rejecting without solving");
                return Err(failure.clone().into());
            }
        }

        self.reset_storage(times, n)?;
        if times.is_empty() {
            return Ok(&self.states);
        }
        self.states.mut_timestep(0).copy_from_slice(initial_state);

        let mut control = Vec::new();
        let mut reused = 0usize;
        for i in 1..times.len() {
            control_at(problem, controls, times[i], &mut control)?;
            let key = Fingerprint::of(
                &self.hasher,
                &[
                    self.states.vector_at_index(i - 1),
                    control.as_slice(),
                    &[times[i - 1], times[i]],
                ],
            );
            let fresh = match &self.keys[i] {
                Some(cached) => cached.matches(&key)?,
                None => false,
            };
            if fresh {
                reused += 1;
                continue;
            }

            let last = self.states.vector_at_index(i - 1).to_vec();
            let mut next = if self.keys[i].is_some() {
                self.states.vector_at_index(i).to_vec()
            } else {
                last.clone()
            };
            let solved = self
                .evolver
                .step(problem, times[i - 1], times[i], &last, &mut next, &control);
            if let Err(error) = solved {
                let error = error.at_step(i);
                if let GpnetError::Numerical(failure) = &error {
                    warn!(step = i, %failure, "simulation failed for control trajectory");
                    self.failed = Some((trajectory, failure.clone()));
                }
                return Err(error);
            }
            self.states.mut_timestep(i).copy_from_slice(&next);
            self.keys[i] = Some(key);
            self.solves += 1;
        }
        debug!(reused, steps = times.len() - 1, "state trajectory ready");
        Ok(&self.states)
    }
}
