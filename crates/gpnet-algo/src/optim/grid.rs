//! Time grids of an optimal control problem and the maps between them.
//!
//! States live on `t_0 < … < t_N`, controls on their own grid `c_0 < … < c_M`
//! and constraints on a subset of `t_1 … t_N`. Controls are linear between
//! their points, so the control value at a state time is
//! `u(t) = λ·U_j + (1 - λ)·U_{j-1}` for the `(j, λ)` pair of `t`.

use gpnet_core::{GpnetError, GpnetResult, TimeData};
use serde::{Deserialize, Serialize};

/// Slack when matching and covering time points.
const TIME_SLACK: f64 = 1e-12;

/// Upper control index and weight of the upper point for time `t`.
///
/// `t` at or before the first control point maps to `(0, 1.0)`, `t` after the
/// last one to `(M, 1.0)`.
pub fn index_lambda(control_times: &[f64], t: f64) -> (usize, f64) {
    let upper = control_times.partition_point(|&c| c < t - TIME_SLACK);
    if upper == 0 {
        return (0, 1.0);
    }
    if upper >= control_times.len() {
        return (control_times.len() - 1, 1.0);
    }
    let (lo, hi) = (control_times[upper - 1], control_times[upper]);
    let lambda = ((t - lo) / (hi - lo)).clamp(0.0, 1.0);
    if (t - hi).abs() <= TIME_SLACK {
        (upper, 1.0)
    } else {
        (upper, lambda)
    }
}

/// Trapezoidal quadrature weights on `times`.
pub fn trapezoid_weights(times: &[f64]) -> Vec<f64> {
    let n = times.len();
    if n < 2 {
        return vec![1.0; n];
    }
    let mut weights = vec![0.0; n];
    weights[0] = 0.5 * (times[1] - times[0]);
    for i in 1..n - 1 {
        weights[i] = 0.5 * (times[i + 1] - times[i - 1]);
    }
    weights[n - 1] = 0.5 * (times[n - 1] - times[n - 2]);
    weights
}

fn check_increasing(times: &[f64], what: &str) -> GpnetResult<()> {
    if times.iter().any(|t| !t.is_finite()) {
        return Err(GpnetError::Validation(format!("{what} times must be finite")));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(GpnetError::Validation(format!(
            "{what} times must be strictly increasing"
        )));
    }
    Ok(())
}

/// State, control and constraint time grids, validated against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeGrids {
    states: Vec<f64>,
    controls: Vec<f64>,
    constraints: Vec<f64>,
    /// State index of every constraint time.
    constraint_steps: Vec<usize>,
}

impl TimeGrids {
    /// Checks:
    /// - all grids strictly increasing, at least two state times
    /// - every constraint time is a state time after `t_0`
    /// - the control grid covers `[t_0, t_N]`
    pub fn new(states: Vec<f64>, controls: Vec<f64>, constraints: Vec<f64>) -> GpnetResult<Self> {
        check_increasing(&states, "state")?;
        check_increasing(&controls, "control")?;
        check_increasing(&constraints, "constraint")?;
        if states.len() < 2 {
            return Err(GpnetError::Validation(
                "at least two state times are required".to_string(),
            ));
        }
        if controls.is_empty() {
            return Err(GpnetError::Validation(
                "at least one control time is required".to_string(),
            ));
        }
        let (first, last) = (states[0], states[states.len() - 1]);
        if controls[0] > first + TIME_SLACK || controls[controls.len() - 1] < last - TIME_SLACK {
            return Err(GpnetError::Validation(format!(
                "control times [{}, {}] do not cover the state times [{first}, {last}]",
                controls[0],
                controls[controls.len() - 1]
            )));
        }
        let constraint_steps = constraints
            .iter()
            .map(|&tau| {
                states[1..]
                    .iter()
                    .position(|&t| (t - tau).abs() <= TIME_SLACK)
                    .map(|i| i + 1)
                    .ok_or_else(|| {
                        GpnetError::Validation(format!(
                            "constraint time {tau} is not a state time after the first"
                        ))
                    })
            })
            .collect::<GpnetResult<Vec<_>>>()?;
        Ok(Self {
            states,
            controls,
            constraints,
            constraint_steps,
        })
    }

    /// All three grids on the uniform points of `time`; constraints skip `t_0`.
    pub fn uniform(time: &TimeData) -> GpnetResult<Self> {
        let points = time.time_points();
        let constraints = points[1..].to_vec();
        Self::new(points.clone(), points, constraints)
    }

    pub fn state_times(&self) -> &[f64] {
        &self.states
    }

    pub fn control_times(&self) -> &[f64] {
        &self.controls
    }

    pub fn constraint_times(&self) -> &[f64] {
        &self.constraints
    }

    /// State index of constraint time `k`.
    pub fn constraint_steps(&self) -> &[usize] {
        &self.constraint_steps
    }

    /// `(upper index, λ)` for every state time.
    pub fn state_index_lambdas(&self) -> Vec<(usize, f64)> {
        self.states
            .iter()
            .map(|&t| index_lambda(&self.controls, t))
            .collect()
    }
}

/// Scatter `value` onto the control blocks `upper` and `upper - 1` of `target`
/// with weights `λ` and `1 - λ`.
pub(crate) fn distribute(
    target: &mut [f64],
    width: usize,
    (upper, lambda): (usize, f64),
    value: &[f64],
) {
    let base = upper * width;
    for (c, v) in value.iter().enumerate() {
        target[base + c] += lambda * v;
    }
    if lambda < 1.0 && upper > 0 {
        let base = (upper - 1) * width;
        for (c, v) in value.iter().enumerate() {
            target[base + c] += (1.0 - lambda) * v;
        }
    }
}
