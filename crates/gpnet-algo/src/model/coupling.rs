//! Gas-fired plants linking a gas node to a power bus.
//!
//! A `Gaspowerconnection` runs from a gas node to a power bus. It owns the
//! state `[p, q]` (pressure in bar, gas flow) and two rows. The first row goes
//! to the gas node like any gas edge end. The second goes to the bus, which
//! closes it with
//!
//! ```text
//! P_bus(V, φ) - generated_power(q) = 0
//! ```
//!
//! Positive `q` is gas drawn from the gas node and burnt; negative `q` is gas
//! produced from power.

use super::gas::{GasBoundary, PressureLaw};
use crate::factory::ComponentRecord;
use crate::model::{
    Component, CostComponent, EdgeEnd, EquationComponent, GasEdge, PointContext, StateComponent,
    StateValue, StepContext,
};
use crate::problem::IndexRange;
use crate::sparse::MatrixHandler;
use anyhow::ensure;
use gpnet_core::GpnetResult;
use serde::Deserialize;

/// Half width of the flow band in which the two conversion factors are
/// blended.
pub const SMOOTHING_FLOW: f64 = 60.0;

/// Gas flow to electric power conversion.
///
/// Linear with `gas_to_power` above [`SMOOTHING_FLOW`] and with
/// `power_to_gas` below its negative; a cubic in between keeps value and
/// slope continuous.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerConversion {
    pub gas_to_power: f64,
    pub power_to_gas: f64,
}

impl PowerConversion {
    pub fn generated_power(&self, q: f64) -> f64 {
        if q > SMOOTHING_FLOW {
            self.gas_to_power * q
        } else if q < -SMOOTHING_FLOW {
            self.power_to_gas * q
        } else {
            let rel = q / SMOOTHING_FLOW;
            let mean = 0.5 * (self.gas_to_power + self.power_to_gas);
            let spread = self.power_to_gas - self.gas_to_power;
            q * (mean - 0.75 * spread * rel + 0.25 * spread * rel.powi(3))
        }
    }

    pub fn d_generated_power(&self, q: f64) -> f64 {
        if q > SMOOTHING_FLOW {
            self.gas_to_power
        } else if q < -SMOOTHING_FLOW {
            self.power_to_gas
        } else {
            let rel = q / SMOOTHING_FLOW;
            let mean = 0.5 * (self.gas_to_power + self.power_to_gas);
            let spread = self.power_to_gas - self.gas_to_power;
            mean - 1.5 * spread * rel + spread * rel.powi(3)
        }
    }
}

/// What a power bus needs to close the row a plant lends it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantAttachment {
    pub row: usize,
    pub flow_index: usize,
    pub conversion: PowerConversion,
}

#[derive(Debug, Clone, Deserialize)]
struct ConnectionParams {
    gas_to_power: f64,
    #[serde(default)]
    power_to_gas: Option<f64>,
    /// `[pressure (bar), flow]`.
    initial_values: [f64; 2],
    #[serde(default)]
    cost_per_flow: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Gaspowerconnection {
    conversion: PowerConversion,
    initial: [f64; 2],
    cost_per_flow: Option<f64>,
    equations: IndexRange,
    states: IndexRange,
}

impl Gaspowerconnection {
    pub fn from_record(record: &ComponentRecord) -> anyhow::Result<Self> {
        let params: ConnectionParams = record.parse_params()?;
        let power_to_gas = params.power_to_gas.unwrap_or(params.gas_to_power);
        for (name, value) in [("gas_to_power", params.gas_to_power), ("power_to_gas", power_to_gas)] {
            ensure!(
                value.is_finite() && value > 0.0,
                "{name} must be a positive conversion factor, found {value}"
            );
        }
        if let Some(cost) = params.cost_per_flow {
            ensure!(cost.is_finite(), "cost_per_flow must be finite");
        }
        Ok(Self {
            conversion: PowerConversion {
                gas_to_power: params.gas_to_power,
                power_to_gas,
            },
            initial: params.initial_values,
            cost_per_flow: params.cost_per_flow,
            equations: IndexRange::default(),
            states: IndexRange::default(),
        })
    }

    pub fn conversion(&self) -> PowerConversion {
        self.conversion
    }
}

/// Both rows are lent out, so the edge writes no residual entries itself.
impl EquationComponent for Gaspowerconnection {
    fn number_of_equations(&self) -> usize {
        2
    }

    fn equation_range(&self) -> IndexRange {
        self.equations
    }

    fn set_equation_range(&mut self, range: IndexRange) {
        self.equations = range;
    }

    fn evaluate(&self, _residual: &mut [f64], _ctx: &StepContext<'_>) -> GpnetResult<()> {
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        _handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        Ok(())
    }

    fn d_evaluate_d_last_state(
        &self,
        _handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        Ok(())
    }
}

impl StateComponent for Gaspowerconnection {
    fn number_of_states(&self) -> usize {
        2
    }

    fn state_range(&self) -> IndexRange {
        self.states
    }

    fn set_state_range(&mut self, range: IndexRange) {
        self.states = range;
    }

    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()> {
        state[self.states.start] = self.initial[0];
        state[self.states.start + 1] = self.initial[1];
        Ok(())
    }

    fn state_values(&self, state: &[f64]) -> Vec<StateValue> {
        let q = state[self.states.start + 1];
        vec![
            StateValue::new("pressure", state[self.states.start]),
            StateValue::new("flow", q),
            StateValue::new("generated_power", self.conversion.generated_power(q)),
        ]
    }
}

impl CostComponent for Gaspowerconnection {
    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64 {
        self.cost_per_flow
            .map_or(0.0, |cost| cost * ctx.state[self.states.start + 1])
    }

    fn d_cost_d_state(&self, gradient: &mut [f64], _ctx: &PointContext<'_>) {
        if let Some(cost) = self.cost_per_flow {
            gradient[self.states.start + 1] += cost;
        }
    }
}

impl GasEdge for Gaspowerconnection {
    fn boundary(&self, end: EdgeEnd) -> GasBoundary {
        let row = match end {
            EdgeEnd::Start => self.equations.start,
            EdgeEnd::End => self.equations.start + 1,
        };
        GasBoundary {
            row,
            pressure_index: self.states.start,
            flow_index: self.states.start + 1,
            law: PressureLaw::Pressure,
        }
    }
}

impl Component for Gaspowerconnection {
    fn type_tag(&self) -> &'static str {
        "Gaspowerconnection"
    }

    crate::capabilities!(equation, state);

    fn as_cost(&self) -> Option<&dyn CostComponent> {
        self.cost_per_flow.map(|_| self as &dyn CostComponent)
    }

    fn as_gas_edge(&self) -> Option<&dyn GasEdge> {
        Some(self)
    }

    fn plant(&self) -> Option<PlantAttachment> {
        Some(PlantAttachment {
            row: self.equations.start + 1,
            flow_index: self.states.start + 1,
            conversion: self.conversion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connection(params: serde_json::Value) -> anyhow::Result<Gaspowerconnection> {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 6,
            "type": "Gaspowerconnection",
            "from": 2,
            "to": 3,
            "params": params
        }))
        .unwrap();
        Gaspowerconnection::from_record(&record)
    }

    #[test]
    fn conversion_is_smooth_across_the_blend() {
        let conversion = PowerConversion {
            gas_to_power: 0.005,
            power_to_gas: 0.002,
        };
        for q in [-SMOOTHING_FLOW, SMOOTHING_FLOW] {
            let below = conversion.generated_power(q - 1e-9);
            let above = conversion.generated_power(q + 1e-9);
            assert!((below - above).abs() < 1e-10, "value jumps at {q}");
            let slope_below = conversion.d_generated_power(q - 1e-9);
            let slope_above = conversion.d_generated_power(q + 1e-9);
            assert!((slope_below - slope_above).abs() < 1e-9, "slope jumps at {q}");
        }
        assert_eq!(conversion.generated_power(0.0), 0.0);
        for q in [-80.0, -30.0, 0.0, 12.5, 59.0, 100.0] {
            let h = 1e-6;
            let fd = (conversion.generated_power(q + h) - conversion.generated_power(q - h)) / (2.0 * h);
            assert!((fd - conversion.d_generated_power(q)).abs() < 1e-8, "q = {q}");
        }
    }

    #[test]
    fn lends_one_row_to_each_end() {
        let mut edge = connection(json!({"gas_to_power": 0.005, "initial_values": [59.0, 100.0]})).unwrap();
        edge.set_equation_range(IndexRange::new(4, 6));
        edge.set_state_range(IndexRange::new(10, 12));
        let start = edge.boundary(EdgeEnd::Start);
        let end = edge.boundary(EdgeEnd::End);
        assert_eq!((start.row, end.row), (4, 5));
        assert_eq!((start.pressure_index, start.flow_index), (10, 11));
        assert_eq!(end.flow_index, 11);
        let plant = edge.plant().unwrap();
        assert_eq!((plant.row, plant.flow_index), (5, 11));
        assert_eq!(plant.conversion.power_to_gas, 0.005);

        let mut state = [0.0; 12];
        edge.set_initial_values(&mut state).unwrap();
        assert_eq!(&state[10..], &[59.0, 100.0]);
    }

    #[test]
    fn cost_is_only_offered_when_priced() {
        let free = connection(json!({"gas_to_power": 0.005, "initial_values": [59.0, 100.0]})).unwrap();
        assert!(free.as_cost().is_none());

        let mut priced = connection(json!({
            "gas_to_power": 0.005,
            "initial_values": [59.0, 100.0],
            "cost_per_flow": 0.5
        }))
        .unwrap();
        priced.set_state_range(IndexRange::new(0, 2));
        let ctx = PointContext {
            time: 0.0,
            state: &[59.0, 80.0],
            control: &[],
        };
        let cost = priced.as_cost().unwrap();
        assert_eq!(cost.evaluate_cost(&ctx), 40.0);
        let mut gradient = [0.0; 2];
        cost.d_cost_d_state(&mut gradient, &ctx);
        assert_eq!(gradient, [0.0, 0.5]);
    }

    #[test]
    fn rejects_non_positive_factors() {
        assert!(connection(json!({"gas_to_power": 0.0, "initial_values": [59.0, 1.0]})).is_err());
        assert!(connection(json!({
            "gas_to_power": 0.005,
            "power_to_gas": -1.0,
            "initial_values": [59.0, 1.0]
        }))
        .is_err());
    }
}
