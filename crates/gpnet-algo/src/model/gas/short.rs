//! Short gas edges without spatial extent.
//!
//! State per edge: `[p_start, q_start, p_end, q_end]` with pressures in bar.
//! The two inner rows are the edge's own; the first row goes to the start
//! node and the last to the end node.

use super::node::fill_slot;
use super::{initial_profile, sample_clamped, scalar_series, GasBoundary, InitialPoint, PressureLaw};
use crate::factory::ComponentRecord;
use crate::model::{
    Component, ControlComponent, CostComponent, EdgeEnd, EquationComponent, GasEdge, PointContext,
    StateComponent, StateValue, StepContext,
};
use crate::problem::IndexRange;
use crate::sparse::MatrixHandler;
use anyhow::ensure;
use gpnet_core::{GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortEdgeKind {
    /// Lossless connection.
    Shortpipe,
    /// Pressure drop `p_start - p_end = u`.
    Controlvalve,
    /// Pressure increase `p_end - p_start = u` at cost `weight * u`.
    Compressorstation,
}

impl ShortEdgeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ShortEdgeKind::Shortpipe => "Shortpipe",
            ShortEdgeKind::Controlvalve => "Controlvalve",
            ShortEdgeKind::Compressorstation => "Compressorstation",
        }
    }

    fn is_controlled(&self) -> bool {
        !matches!(self, ShortEdgeKind::Shortpipe)
    }
}

fn default_cost_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
struct ShortpipeParams {
    initial_values: Vec<InitialPoint>,
}

#[derive(Debug, Clone, Deserialize)]
struct ControlledParams {
    initial_values: Vec<InitialPoint>,
    initial_control: InterpolatingVector,
    control_lower: f64,
    control_upper: f64,
    #[serde(default = "default_cost_weight")]
    cost_weight: f64,
}

#[derive(Debug, Clone)]
struct ControlSettings {
    initial: InterpolatingVector,
    lower: f64,
    upper: f64,
    cost_weight: f64,
}

#[derive(Debug, Clone)]
pub struct ShortEdge {
    kind: ShortEdgeKind,
    initial: InterpolatingVector,
    control: Option<ControlSettings>,
    equations: IndexRange,
    states: IndexRange,
    controls: IndexRange,
}

impl ShortEdge {
    pub fn from_record(kind: ShortEdgeKind, record: &ComponentRecord) -> anyhow::Result<Self> {
        let (initial, control) = if kind.is_controlled() {
            let params: ControlledParams = record.parse_params()?;
            ensure!(
                params.control_lower <= params.control_upper,
                "control_lower {} exceeds control_upper {}",
                params.control_lower,
                params.control_upper
            );
            let settings = ControlSettings {
                initial: scalar_series(params.initial_control, "initial_control")?,
                lower: params.control_lower,
                upper: params.control_upper,
                cost_weight: params.cost_weight,
            };
            (initial_profile(&params.initial_values)?, Some(settings))
        } else {
            let params: ShortpipeParams = record.parse_params()?;
            (initial_profile(&params.initial_values)?, None)
        };
        Ok(Self {
            kind,
            initial,
            control,
            equations: IndexRange::default(),
            states: IndexRange::default(),
            controls: IndexRange::default(),
        })
    }

    pub fn kind(&self) -> ShortEdgeKind {
        self.kind
    }

    fn control_value(&self, control: &[f64]) -> f64 {
        if self.kind.is_controlled() {
            control[self.controls.start]
        } else {
            0.0
        }
    }
}

impl EquationComponent for ShortEdge {
    fn number_of_equations(&self) -> usize {
        4
    }

    fn equation_range(&self) -> IndexRange {
        self.equations
    }

    fn set_equation_range(&mut self, range: IndexRange) {
        self.equations = range;
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        let s = self.states.start;
        let x = ctx.new_state;
        let u = self.control_value(ctx.control);
        let row = self.equations.start;
        residual[row + 1] = match self.kind {
            ShortEdgeKind::Shortpipe => x[s] - x[s + 2],
            ShortEdgeKind::Controlvalve => x[s] - x[s + 2] - u,
            ShortEdgeKind::Compressorstation => x[s + 2] - x[s] - u,
        };
        residual[row + 2] = x[s + 1] - x[s + 3];
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        let s = self.states.start;
        let row = self.equations.start;
        let sign = match self.kind {
            ShortEdgeKind::Compressorstation => -1.0,
            _ => 1.0,
        };
        handler.set_coefficient(row + 1, s, sign);
        handler.set_coefficient(row + 1, s + 2, -sign);
        handler.set_coefficient(row + 2, s + 1, 1.0);
        handler.set_coefficient(row + 2, s + 3, -1.0);
        Ok(())
    }

    fn d_evaluate_d_last_state(
        &self,
        _handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        Ok(())
    }

    fn d_evaluate_d_control(
        &self,
        handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        if self.kind.is_controlled() {
            handler.set_coefficient(self.equations.start + 1, self.controls.start, -1.0);
        }
        Ok(())
    }
}

impl StateComponent for ShortEdge {
    fn number_of_states(&self) -> usize {
        4
    }

    fn state_range(&self) -> IndexRange {
        self.states
    }

    fn set_state_range(&mut self, range: IndexRange) {
        self.states = range;
    }

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()> {
        for (offset, x) in [(0, 0.0), (2, 1.0)] {
            let values = sample_clamped(&self.initial, x).map_err(|e| {
                GpnetError::Validation(format!("{} initial values: {e}", self.kind.tag()))
            })?;
            state[self.states.start + offset] = values[0];
            state[self.states.start + offset + 1] = values[1];
        }
        Ok(())
    }

    fn state_values(&self, state: &[f64]) -> Vec<StateValue> {
        let s = self.states.start;
        vec![
            StateValue::new("pressure@start", state[s]),
            StateValue::new("flow@start", state[s + 1]),
            StateValue::new("pressure@end", state[s + 2]),
            StateValue::new("flow@end", state[s + 3]),
        ]
    }
}

impl ControlComponent for ShortEdge {
    fn number_of_controls_per_step(&self) -> usize {
        usize::from(self.kind.is_controlled())
    }

    fn control_range(&self) -> IndexRange {
        self.controls
    }

    fn set_control_range(&mut self, range: IndexRange) {
        self.controls = range;
    }

    fn set_initial_controls(&self, controls: &mut InterpolatingVector) -> GpnetResult<()> {
        let Some(settings) = &self.control else {
            return Ok(());
        };
        for step in 0..controls.size() {
            let t = controls.interpolation_point_at_index(step);
            let value = sample_clamped(&settings.initial, t).map_err(|e| {
                GpnetError::Validation(format!("{} initial control: {e}", self.kind.tag()))
            })?;
            controls.mut_timestep(step)[self.controls.start] = value[0];
        }
        Ok(())
    }

    fn set_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        if let Some(settings) = &self.control {
            fill_slot(bounds, self.controls.start, settings.lower);
        }
        Ok(())
    }

    fn set_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        if let Some(settings) = &self.control {
            fill_slot(bounds, self.controls.start, settings.upper);
        }
        Ok(())
    }
}

impl CostComponent for ShortEdge {
    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64 {
        match (&self.control, self.kind) {
            (Some(settings), ShortEdgeKind::Compressorstation) => {
                settings.cost_weight * ctx.control[self.controls.start]
            }
            _ => 0.0,
        }
    }

    fn d_cost_d_control(&self, gradient: &mut [f64], _ctx: &PointContext<'_>) {
        if let (Some(settings), ShortEdgeKind::Compressorstation) = (&self.control, self.kind) {
            gradient[self.controls.start] += settings.cost_weight;
        }
    }
}

impl GasEdge for ShortEdge {
    fn boundary(&self, end: EdgeEnd) -> GasBoundary {
        let s = self.states.start;
        match end {
            EdgeEnd::Start => GasBoundary {
                row: self.equations.start,
                pressure_index: s,
                flow_index: s + 1,
                law: PressureLaw::Pressure,
            },
            EdgeEnd::End => GasBoundary {
                row: self.equations.start + 3,
                pressure_index: s + 2,
                flow_index: s + 3,
                law: PressureLaw::Pressure,
            },
        }
    }
}

impl Component for ShortEdge {
    fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }

    crate::capabilities!(equation, state);

    fn as_control(&self) -> Option<&dyn ControlComponent> {
        if self.kind.is_controlled() {
            Some(self)
        } else {
            None
        }
    }

    fn as_control_mut(&mut self) -> Option<&mut dyn ControlComponent> {
        if self.kind.is_controlled() {
            Some(self)
        } else {
            None
        }
    }

    fn as_cost(&self) -> Option<&dyn CostComponent> {
        match self.kind {
            ShortEdgeKind::Compressorstation => Some(self),
            _ => None,
        }
    }

    fn as_gas_edge(&self) -> Option<&dyn GasEdge> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compressor() -> ShortEdge {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 3,
            "type": "Compressorstation",
            "from": 1,
            "to": 2,
            "params": {
                "initial_values": [
                    {"x": 0.0, "values": [50.0, 10.0]},
                    {"x": 1.0, "values": [55.0, 10.0]}
                ],
                "initial_control": [{"time": 0.0, "values": [5.0]}],
                "control_lower": 0.0,
                "control_upper": 20.0,
                "cost_weight": 2.0
            }
        }))
        .unwrap();
        let mut edge = ShortEdge::from_record(ShortEdgeKind::Compressorstation, &record).unwrap();
        edge.set_equation_range(IndexRange::new(0, 4));
        edge.set_state_range(IndexRange::new(0, 4));
        edge.set_control_range(IndexRange::new(0, 1));
        edge
    }

    #[test]
    fn compressor_raises_pressure_by_control() {
        let edge = compressor();
        let mut state = [0.0; 4];
        edge.set_initial_values(&mut state).unwrap();
        assert_eq!(state, [50.0, 10.0, 55.0, 10.0]);
        let ctx = StepContext {
            last_time: 0.0,
            new_time: 1.0,
            last_state: &state,
            new_state: &state,
            control: &[5.0],
        };
        let mut residual = [9.0; 4];
        edge.evaluate(&mut residual, &ctx).unwrap();
        assert_eq!(residual, [9.0, 0.0, 0.0, 9.0]);
    }

    #[test]
    fn compressor_cost_is_linear_in_control() {
        let edge = compressor();
        let ctx = PointContext {
            time: 0.0,
            state: &[0.0; 4],
            control: &[3.0],
        };
        assert_eq!(edge.evaluate_cost(&ctx), 6.0);
        let mut gradient = [0.0];
        edge.d_cost_d_control(&mut gradient, &ctx);
        assert_eq!(gradient, [2.0]);
    }

    #[test]
    fn initial_control_is_held_constant() {
        let edge = compressor();
        let mut controls = InterpolatingVector::new(vec![0.0, 10.0, 20.0], 1).unwrap();
        edge.set_initial_controls(&mut controls).unwrap();
        assert_eq!(controls.all_values(), &[5.0, 5.0, 5.0]);
        edge.set_upper_bounds(&mut controls).unwrap();
        assert_eq!(controls.all_values(), &[20.0, 20.0, 20.0]);
    }

    #[test]
    fn shortpipe_has_no_control() {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 4,
            "type": "Shortpipe",
            "from": 1,
            "to": 2,
            "params": {"initial_values": [{"x": 0.0, "values": [50.0, 1.0]}]}
        }))
        .unwrap();
        let edge = ShortEdge::from_record(ShortEdgeKind::Shortpipe, &record).unwrap();
        assert!(edge.as_control().is_none());
        assert!(edge.as_cost().is_none());
        assert!(edge.as_gas_edge().is_some());
    }
}
