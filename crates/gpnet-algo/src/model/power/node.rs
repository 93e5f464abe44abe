//! Power buses.

use crate::factory::ComponentRecord;
use crate::model::{
    Attachments, Component, EquationComponent, PlantAttachment, PowerAttachment, StateComponent,
    StateValue, StepContext,
};
use crate::problem::IndexRange;
use crate::sparse::MatrixHandler;
use anyhow::ensure;
use gpnet_core::{GpnetError, GpnetResult, Interpolating, InterpolatingVector};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerNodeKind {
    /// Slack bus: boundary `[V, φ]`.
    Vphinode,
    /// Load bus: boundary `[P, Q]`.
    PQnode,
    /// Generator bus: boundary `[P, V]`.
    PVnode,
}

impl PowerNodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            PowerNodeKind::Vphinode => "Vphinode",
            PowerNodeKind::PQnode => "PQnode",
            PowerNodeKind::PVnode => "PVnode",
        }
    }
}

fn default_initial() -> [f64; 2] {
    [1.0, 0.0]
}

#[derive(Debug, Clone, Deserialize)]
struct PowerNodeParams {
    boundary: InterpolatingVector,
    #[serde(default)]
    shunt_conductance: f64,
    #[serde(default)]
    shunt_susceptance: f64,
    #[serde(default = "default_initial")]
    initial_values: [f64; 2],
}

/// Power injections and their partial derivatives at one bus.
#[derive(Debug, Default)]
struct Injection {
    p: f64,
    q: f64,
    dp_dv: f64,
    dp_dphi: f64,
    dq_dv: f64,
    dq_dphi: f64,
}

#[derive(Debug, Clone)]
pub struct PowerNode {
    kind: PowerNodeKind,
    boundary: InterpolatingVector,
    shunt: (f64, f64),
    initial: [f64; 2],
    /// Diagonal admittance `(G_ii, B_ii)`, shunt included.
    diagonal: (f64, f64),
    neighbours: Vec<PowerAttachment>,
    /// Gas-fired plants feeding this bus; each lends one row.
    plants: Vec<PlantAttachment>,
    equations: IndexRange,
    states: IndexRange,
}

impl PowerNode {
    pub fn from_record(kind: PowerNodeKind, record: &ComponentRecord) -> anyhow::Result<Self> {
        let params: PowerNodeParams = record.parse_params()?;
        ensure!(
            params.boundary.inner_length() == 2,
            "boundary of a {} must carry two values per time point",
            kind.tag()
        );
        ensure!(params.boundary.size() > 0, "boundary must not be empty");
        Ok(Self {
            kind,
            boundary: params.boundary,
            shunt: (params.shunt_conductance, params.shunt_susceptance),
            initial: params.initial_values,
            diagonal: (params.shunt_conductance, params.shunt_susceptance),
            neighbours: Vec::new(),
            plants: Vec::new(),
            equations: IndexRange::default(),
            states: IndexRange::default(),
        })
    }

    pub fn kind(&self) -> PowerNodeKind {
        self.kind
    }

    fn injection(&self, state: &[f64]) -> Injection {
        let (g_ii, b_ii) = self.diagonal;
        let v = state[self.states.start];
        let phi = state[self.states.start + 1];
        let mut inj = Injection {
            p: g_ii * v * v,
            q: -b_ii * v * v,
            dp_dv: 2.0 * g_ii * v,
            dq_dv: -2.0 * b_ii * v,
            ..Injection::default()
        };
        for n in &self.neighbours {
            let (g, b) = (-n.conductance, -n.susceptance);
            let v_k = state[n.neighbour_voltage];
            let (sin, cos) = (phi - state[n.neighbour_angle]).sin_cos();
            let p_term = g * cos + b * sin;
            let q_term = g * sin - b * cos;
            inj.p += v * v_k * p_term;
            inj.q += v * v_k * q_term;
            inj.dp_dv += v_k * p_term;
            inj.dq_dv += v_k * q_term;
            inj.dp_dphi += v * v_k * (-g * sin + b * cos);
            inj.dq_dphi += v * v_k * p_term;
        }
        inj
    }

    fn d_injection_d_neighbours(
        &self,
        handler: &mut dyn MatrixHandler,
        state: &[f64],
        rows: (Option<usize>, Option<usize>),
    ) {
        let v = state[self.states.start];
        let phi = state[self.states.start + 1];
        for n in &self.neighbours {
            let (g, b) = (-n.conductance, -n.susceptance);
            let v_k = state[n.neighbour_voltage];
            let (sin, cos) = (phi - state[n.neighbour_angle]).sin_cos();
            if let Some(row) = rows.0 {
                handler.add_to_coefficient(row, n.neighbour_voltage, v * (g * cos + b * sin));
                handler.add_to_coefficient(row, n.neighbour_angle, v * v_k * (g * sin - b * cos));
            }
            if let Some(row) = rows.1 {
                handler.add_to_coefficient(row, n.neighbour_voltage, v * (g * sin - b * cos));
                handler.add_to_coefficient(row, n.neighbour_angle, -v * v_k * (g * cos + b * sin));
            }
        }
    }
}

impl EquationComponent for PowerNode {
    fn number_of_equations(&self) -> usize {
        2
    }

    fn equation_range(&self) -> IndexRange {
        self.equations
    }

    fn set_equation_range(&mut self, range: IndexRange) {
        self.equations = range;
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        let mut prescribed = [0.0; 2];
        self.boundary.evaluate_into(ctx.new_time, &mut prescribed)?;
        let row = self.equations.start;
        let v = ctx.new_state[self.states.start];
        let phi = ctx.new_state[self.states.start + 1];
        let (first, second) = match self.kind {
            PowerNodeKind::Vphinode => (v, phi),
            PowerNodeKind::PQnode => {
                let inj = self.injection(ctx.new_state);
                (inj.p, inj.q)
            }
            PowerNodeKind::PVnode => (self.injection(ctx.new_state).p, v),
        };
        residual[row] = first - prescribed[0];
        residual[row + 1] = second - prescribed[1];
        if !self.plants.is_empty() {
            let p = self.injection(ctx.new_state).p;
            for plant in &self.plants {
                let q = ctx.new_state[plant.flow_index];
                residual[plant.row] = p - plant.conversion.generated_power(q);
            }
        }
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        let row = self.equations.start;
        let (v_col, phi_col) = (self.states.start, self.states.start + 1);
        match self.kind {
            PowerNodeKind::Vphinode => {
                handler.set_coefficient(row, v_col, 1.0);
                handler.set_coefficient(row + 1, phi_col, 1.0);
            }
            PowerNodeKind::PQnode => {
                let inj = self.injection(ctx.new_state);
                handler.add_to_coefficient(row, v_col, inj.dp_dv);
                handler.add_to_coefficient(row, phi_col, inj.dp_dphi);
                handler.add_to_coefficient(row + 1, v_col, inj.dq_dv);
                handler.add_to_coefficient(row + 1, phi_col, inj.dq_dphi);
                self.d_injection_d_neighbours(handler, ctx.new_state, (Some(row), Some(row + 1)));
            }
            PowerNodeKind::PVnode => {
                let inj = self.injection(ctx.new_state);
                handler.add_to_coefficient(row, v_col, inj.dp_dv);
                handler.add_to_coefficient(row, phi_col, inj.dp_dphi);
                handler.set_coefficient(row + 1, v_col, 1.0);
                self.d_injection_d_neighbours(handler, ctx.new_state, (Some(row), None));
            }
        }
        if !self.plants.is_empty() {
            let inj = self.injection(ctx.new_state);
            for plant in &self.plants {
                let q = ctx.new_state[plant.flow_index];
                handler.add_to_coefficient(plant.row, v_col, inj.dp_dv);
                handler.add_to_coefficient(plant.row, phi_col, inj.dp_dphi);
                handler.add_to_coefficient(
                    plant.row,
                    plant.flow_index,
                    -plant.conversion.d_generated_power(q),
                );
                self.d_injection_d_neighbours(handler, ctx.new_state, (Some(plant.row), None));
            }
        }
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

impl StateComponent for PowerNode {
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
        vec![
            StateValue::new("V", state[self.states.start]),
            StateValue::new("phi", state[self.states.start + 1]),
        ]
    }
}

impl Component for PowerNode {
    fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }

    crate::capabilities!(equation, state);

    fn attach(&mut self, attachments: &Attachments) -> GpnetResult<()> {
        if !attachments.gas.is_empty() {
            return Err(GpnetError::Validation(format!(
                "{} bus is connected to a gas edge",
                self.kind.tag()
            )));
        }
        let (mut g, mut b) = self.shunt;
        for line in &attachments.power {
            g += line.conductance;
            b += line.susceptance;
        }
        self.diagonal = (g, b);
        self.neighbours = attachments.power.clone();
        self.plants = attachments.plants.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{to_dense, TripletHandler};
    use serde_json::json;

    fn bus(kind: PowerNodeKind, boundary: [f64; 2], plants: Vec<PlantAttachment>) -> PowerNode {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 2,
            "type": kind.tag(),
            "params": {
                "boundary": [{"time": 0.0, "values": boundary}],
                "shunt_susceptance": 0.01
            }
        }))
        .unwrap();
        let mut bus = PowerNode::from_record(kind, &record).unwrap();
        bus.set_equation_range(IndexRange::new(0, 2));
        bus.set_state_range(IndexRange::new(2, 4));
        bus.attach(&Attachments {
            power: vec![PowerAttachment {
                conductance: 0.99,
                susceptance: -9.9,
                neighbour_voltage: 0,
                neighbour_angle: 1,
            }],
            plants,
            ..Attachments::default()
        })
        .unwrap();
        bus
    }

    fn pq_bus() -> PowerNode {
        bus(PowerNodeKind::PQnode, [-0.5, -0.2], vec![])
    }

    #[test]
    fn pq_jacobian_matches_finite_differences() {
        let bus = pq_bus();
        let state = [1.02, 0.01, 0.97, -0.05];
        let ctx = StepContext {
            last_time: 0.0,
            new_time: 0.0,
            last_state: &state,
            new_state: &state,
            control: &[],
        };
        let mut h = TripletHandler::new(2, 4);
        bus.d_evaluate_d_new_state(&mut h, &ctx).unwrap();
        h.set_matrix().unwrap();
        let jacobian = to_dense(h.matrix().unwrap());

        let mut base = [0.0; 2];
        bus.evaluate(&mut base, &ctx).unwrap();
        let step = 1e-7;
        for col in 0..4 {
            let mut shifted = state;
            shifted[col] += step;
            let mut perturbed = [0.0; 2];
            bus.evaluate(
                &mut perturbed,
                &StepContext {
                    new_state: &shifted,
                    ..ctx
                },
            )
            .unwrap();
            for row in 0..2 {
                let fd = (perturbed[row] - base[row]) / step;
                assert!(
                    (fd - jacobian[row][col]).abs() < 1e-5,
                    "d r{row} / d x{col}: {fd} vs {}",
                    jacobian[row][col]
                );
            }
        }
    }

    #[test]
    fn flat_start_has_only_shunt_injection() {
        let bus = pq_bus();
        let state = [1.0, 0.0, 1.0, 0.0];
        let inj = bus.injection(&state);
        assert!(inj.p.abs() < 1e-12);
        assert!((inj.q + 0.01).abs() < 1e-12);
    }

    #[test]
    fn rejects_scalar_boundary() {
        let record: ComponentRecord = serde_json::from_value(json!({
            "id": 1,
            "type": "Vphinode",
            "params": {"boundary": [{"time": 0.0, "values": [1.0]}]}
        }))
        .unwrap();
        assert!(PowerNode::from_record(PowerNodeKind::Vphinode, &record).is_err());
    }

    #[test]
    fn plant_row_matches_finite_differences() {
        use crate::model::PowerConversion;

        let plant = PlantAttachment {
            row: 2,
            flow_index: 4,
            conversion: PowerConversion {
                gas_to_power: 0.005,
                power_to_gas: 0.003,
            },
        };
        let bus = bus(PowerNodeKind::Vphinode, [1.0, 0.0], vec![plant]);
        // neighbour V, φ | own V, φ | plant flow inside the blend
        let state = [0.98, -0.04, 1.01, 0.02, 35.0];
        let ctx = StepContext {
            last_time: 0.0,
            new_time: 0.0,
            last_state: &state,
            new_state: &state,
            control: &[],
        };
        let mut h = TripletHandler::new(3, 5);
        bus.d_evaluate_d_new_state(&mut h, &ctx).unwrap();
        h.set_matrix().unwrap();
        let jacobian = to_dense(h.matrix().unwrap());

        let mut base = [0.0; 3];
        bus.evaluate(&mut base, &ctx).unwrap();
        let expected = bus.injection(&state).p - plant.conversion.generated_power(35.0);
        assert!((base[2] - expected).abs() < 1e-14);
        let step = 1e-7;
        for col in 0..5 {
            let mut shifted = state;
            shifted[col] += step;
            let mut perturbed = [0.0; 3];
            bus.evaluate(
                &mut perturbed,
                &StepContext {
                    new_state: &shifted,
                    ..ctx
                },
            )
            .unwrap();
            let fd = (perturbed[2] - base[2]) / step;
            assert!(
                (fd - jacobian[2][col]).abs() < 1e-5,
                "d plant / d x{col}: {fd} vs {}",
                jacobian[2][col]
            );
        }
    }
}
