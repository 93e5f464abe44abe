//! Gas pipe discretized with an implicit box scheme.
//!
//! The pipe is split into `N` uniformly spaced grid points carrying `(ρ, q)`.
//! Each of the `N - 1` cells couples its two end points at the old and new
//! time level:
//!
//! ```text
//! ½(uₗⁿ⁺¹ + uᵣⁿ⁺¹) - ½(uₗⁿ + uᵣⁿ) + Δt/Δx (F(uᵣⁿ⁺¹) - F(uₗⁿ⁺¹)) - ½Δt (S(uₗⁿ⁺¹) + S(uᵣⁿ⁺¹)) = 0
//! ```
//!
//! That yields `2N - 2` rows; the remaining first and last rows of the pipe's
//! `2N` are lent to the nodes at either end.

use super::law::{nikuradse, rho_from_pressure, IsothermalEuler, BAR};
use super::{initial_profile, sample_clamped, GasBoundary, InitialPoint, PressureLaw};
use crate::factory::ComponentRecord;
use crate::model::{
    Component, EdgeEnd, EquationComponent, GasEdge, StateComponent, StateValue, StepContext,
};
use crate::problem::IndexRange;
use crate::sparse::MatrixHandler;
use anyhow::ensure;
use gpnet_core::{GpnetError, GpnetResult, InterpolatingVector};
use serde::Deserialize;

fn default_roughness() -> f64 {
    1e-5
}

#[derive(Debug, Clone, Deserialize)]
struct PipeParams {
    length: f64,
    diameter: f64,
    #[serde(default = "default_roughness")]
    roughness: f64,
    #[serde(default)]
    friction_factor: Option<f64>,
    desired_delta_x: f64,
    initial_values: Vec<InitialPoint>,
}

#[derive(Debug, Clone)]
pub struct Pipe {
    length: f64,
    delta_x: f64,
    points: usize,
    law: IsothermalEuler,
    initial: InterpolatingVector,
    equations: IndexRange,
    states: IndexRange,
}

impl Pipe {
    pub fn from_record(record: &ComponentRecord) -> anyhow::Result<Self> {
        let params: PipeParams = record.parse_params()?;
        ensure!(params.length > 0.0, "length must be positive");
        ensure!(params.diameter > 0.0, "diameter must be positive");
        ensure!(params.desired_delta_x > 0.0, "desired_delta_x must be positive");
        ensure!(params.roughness > 0.0, "roughness must be positive");
        let friction = match params.friction_factor {
            Some(lambda) => {
                ensure!(lambda > 0.0, "friction_factor must be positive");
                lambda
            }
            None => nikuradse(params.diameter, params.roughness),
        };
        let cells = (params.length / params.desired_delta_x).ceil().max(1.0) as usize;
        Ok(Self {
            length: params.length,
            delta_x: params.length / cells as f64,
            points: cells + 1,
            law: IsothermalEuler::new(params.diameter, friction),
            initial: initial_profile(&params.initial_values)?,
            equations: IndexRange::default(),
            states: IndexRange::default(),
        })
    }

    /// Number of spatial grid points.
    pub fn grid_points(&self) -> usize {
        self.points
    }

    pub fn delta_x(&self) -> f64 {
        self.delta_x
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    fn point(&self, state: &[f64], j: usize) -> (f64, f64) {
        let base = self.states.start + 2 * j;
        (state[base], state[base + 1])
    }
}

impl EquationComponent for Pipe {
    fn number_of_equations(&self) -> usize {
        2 * self.points
    }

    fn equation_range(&self) -> IndexRange {
        self.equations
    }

    fn set_equation_range(&mut self, range: IndexRange) {
        self.equations = range;
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        let dt = ctx.delta_t();
        let ratio = dt / self.delta_x;
        for j in 0..self.points - 1 {
            let (rho_l, q_l) = self.point(ctx.new_state, j);
            let (rho_r, q_r) = self.point(ctx.new_state, j + 1);
            let (old_rho_l, old_q_l) = self.point(ctx.last_state, j);
            let (old_rho_r, old_q_r) = self.point(ctx.last_state, j + 1);
            let new_l = [rho_l, q_l];
            let new_r = [rho_r, q_r];
            let old_l = [old_rho_l, old_q_l];
            let old_r = [old_rho_r, old_q_r];
            let flux_l = self.law.flux(rho_l, q_l);
            let flux_r = self.law.flux(rho_r, q_r);
            let source_l = self.law.source(rho_l, q_l);
            let source_r = self.law.source(rho_r, q_r);
            let row = self.equations.start + 1 + 2 * j;
            for c in 0..2 {
                residual[row + c] = 0.5 * (new_l[c] + new_r[c]) - 0.5 * (old_l[c] + old_r[c])
                    - ratio * (flux_l[c] - flux_r[c])
                    - 0.5 * dt * (source_r[c] + source_l[c]);
            }
        }
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        let dt = ctx.delta_t();
        let ratio = dt / self.delta_x;
        for j in 0..self.points - 1 {
            let (rho_l, q_l) = self.point(ctx.new_state, j);
            let (rho_r, q_r) = self.point(ctx.new_state, j + 1);
            let df_l = self.law.d_flux(rho_l, q_l);
            let df_r = self.law.d_flux(rho_r, q_r);
            let ds_l = self.law.d_source(rho_l, q_l);
            let ds_r = self.law.d_source(rho_r, q_r);
            let row = self.equations.start + 1 + 2 * j;
            let col_l = self.states.start + 2 * j;
            let col_r = col_l + 2;
            for c in 0..2 {
                for v in 0..2 {
                    let identity = if c == v { 0.5 } else { 0.0 };
                    handler.set_coefficient(
                        row + c,
                        col_l + v,
                        identity - ratio * df_l[c][v] - 0.5 * dt * ds_l[c][v],
                    );
                    handler.set_coefficient(
                        row + c,
                        col_r + v,
                        identity + ratio * df_r[c][v] - 0.5 * dt * ds_r[c][v],
                    );
                }
            }
        }
        Ok(())
    }

    fn d_evaluate_d_last_state(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        for j in 0..self.points - 1 {
            let row = self.equations.start + 1 + 2 * j;
            let col_l = self.states.start + 2 * j;
            for c in 0..2 {
                handler.set_coefficient(row + c, col_l + c, -0.5);
                handler.set_coefficient(row + c, col_l + 2 + c, -0.5);
            }
        }
        Ok(())
    }
}

impl StateComponent for Pipe {
    fn number_of_states(&self) -> usize {
        2 * self.points
    }

    fn state_range(&self) -> IndexRange {
        self.states
    }

    fn set_state_range(&mut self, range: IndexRange) {
        self.states = range;
    }

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()> {
        for j in 0..self.points {
            let x = j as f64 * self.delta_x;
            let values = sample_clamped(&self.initial, x)
                .map_err(|e| GpnetError::Validation(format!("pipe initial values: {e}")))?;
            let base = self.states.start + 2 * j;
            state[base] = rho_from_pressure(values[0] * BAR);
            state[base + 1] = values[1];
        }
        Ok(())
    }

    fn state_values(&self, state: &[f64]) -> Vec<StateValue> {
        let mut values = Vec::with_capacity(2 * self.points);
        for j in 0..self.points {
            let x = j as f64 * self.delta_x;
            let (rho, q) = self.point(state, j);
            values.push(StateValue::new(
                format!("pressure@{x}"),
                PressureLaw::Density.pressure_bar(rho),
            ));
            values.push(StateValue::new(format!("flow@{x}"), q));
        }
        values
    }
}

impl GasEdge for Pipe {
    fn boundary(&self, end: EdgeEnd) -> GasBoundary {
        let start = self.states.start;
        match end {
            EdgeEnd::Start => GasBoundary {
                row: self.equations.start,
                pressure_index: start,
                flow_index: start + 1,
                law: PressureLaw::Density,
            },
            EdgeEnd::End => GasBoundary {
                row: self.equations.end - 1,
                pressure_index: start + 2 * self.points - 2,
                flow_index: start + 2 * self.points - 1,
                law: PressureLaw::Density,
            },
        }
    }
}

impl Component for Pipe {
    fn type_tag(&self) -> &'static str {
        "Pipe"
    }

    crate::capabilities!(equation, state);

    fn as_gas_edge(&self) -> Option<&dyn GasEdge> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{to_dense, TripletHandler};
    use serde_json::json;

    fn pipe() -> Pipe {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 7,
            "type": "Pipe",
            "from": 1,
            "to": 2,
            "params": {
                "length": 10000.0,
                "diameter": 0.5,
                "desired_delta_x": 4000.0,
                "initial_values": [
                    {"x": 0.0, "values": [60.0, 100.0]},
                    {"x": 10000.0, "values": [57.0, 100.0]}
                ]
            }
        }))
        .unwrap();
        let mut pipe = Pipe::from_record(&record).unwrap();
        pipe.set_equation_range(IndexRange::new(0, 2 * pipe.grid_points()));
        pipe.set_state_range(IndexRange::new(0, 2 * pipe.grid_points()));
        pipe
    }

    #[test]
    fn grid_rounds_cell_count_up() {
        let pipe = pipe();
        assert_eq!(pipe.grid_points(), 4);
        assert!((pipe.delta_x() - 10000.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn boundaries_use_outer_rows() {
        let pipe = pipe();
        assert_eq!(pipe.boundary(EdgeEnd::Start).row, 0);
        assert_eq!(pipe.boundary(EdgeEnd::End).row, 7);
        assert_eq!(pipe.boundary(EdgeEnd::End).flow_index, 7);
    }

    #[test]
    fn jacobian_matches_finite_differences() {
        let pipe = pipe();
        let n = 2 * pipe.grid_points();
        let mut last = vec![0.0; n];
        pipe.set_initial_values(&mut last).unwrap();
        let mut new = last.clone();
        for (i, v) in new.iter_mut().enumerate() {
            *v *= 1.0 + 1e-3 * i as f64;
        }
        let ctx = StepContext {
            last_time: 0.0,
            new_time: 60.0,
            last_state: &last,
            new_state: &new,
            control: &[],
        };
        let mut h = TripletHandler::new(n, n);
        pipe.d_evaluate_d_new_state(&mut h, &ctx).unwrap();
        h.set_matrix().unwrap();
        let jacobian = to_dense(h.matrix().unwrap());

        let mut base = vec![0.0; n];
        pipe.evaluate(&mut base, &ctx).unwrap();
        for col in 0..n {
            let step = 1e-6 * new[col].abs().max(1.0);
            let mut shifted = new.clone();
            shifted[col] += step;
            let shifted_ctx = StepContext {
                new_state: &shifted,
                ..ctx
            };
            let mut perturbed = vec![0.0; n];
            pipe.evaluate(&mut perturbed, &shifted_ctx).unwrap();
            for row in 1..n - 1 {
                let fd = (perturbed[row] - base[row]) / step;
                let exact = jacobian[row][col];
                assert!(
                    (fd - exact).abs() <= 1e-4 * (1.0 + exact.abs()),
                    "d r{row} / d x{col}: {fd} vs {exact}"
                );
            }
        }
    }

    #[test]
    fn reports_pressure_in_bar() {
        let pipe = pipe();
        let mut state = vec![0.0; 8];
        pipe.set_initial_values(&mut state).unwrap();
        let values = pipe.state_values(&state);
        assert_eq!(values[0].label, "pressure@0");
        assert!((values[0].value - 60.0).abs() < 1e-9);
        assert!((values[6].value - 57.0).abs() < 1e-9);
    }
}
