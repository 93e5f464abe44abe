//! Gas nodes: sources, sinks, inner junctions and pressure-constrained sinks.

use super::scalar_series;
use crate::factory::ComponentRecord;
use crate::model::{
    Attachments, Component, ConstraintComponent, EquationComponent, GasAttachment, PointContext,
    StepContext,
};
use crate::problem::IndexRange;
use crate::sparse::MatrixHandler;
use anyhow::ensure;
use gpnet_core::{GpnetError, GpnetResult, Interpolating, InterpolatingMut, InterpolatingVector};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasNodeKind {
    Source,
    Sink,
    Innode,
    ConstraintSink,
}

impl GasNodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            GasNodeKind::Source => "Source",
            GasNodeKind::Sink => "Sink",
            GasNodeKind::Innode => "Innode",
            GasNodeKind::ConstraintSink => "ConstraintSink",
        }
    }

    /// Sign with which a prescribed flow enters the balance.
    fn injection_sign(&self) -> f64 {
        match self {
            GasNodeKind::Source | GasNodeKind::Innode => 1.0,
            GasNodeKind::Sink | GasNodeKind::ConstraintSink => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BoundaryType {
    Pressure,
    Flow,
}

#[derive(Debug, Clone, Deserialize)]
struct BoundaryParams {
    boundary_type: BoundaryType,
    boundary: InterpolatingVector,
}

#[derive(Debug, Clone, Deserialize)]
struct ConstraintSinkParams {
    boundary_type: BoundaryType,
    boundary: InterpolatingVector,
    pressure_lower: f64,
    pressure_upper: f64,
}

#[derive(Debug, Clone)]
enum NodeCondition {
    /// Pressure in bar at every attached edge end.
    Pressure(InterpolatingVector),
    /// Net injection `sign * series(t)`.
    Flow { series: InterpolatingVector, sign: f64 },
    /// Zero net injection.
    Balance,
}

/// Gas node writing into the equation rows lent by its attached edges.
#[derive(Debug, Clone)]
pub struct GasNode {
    kind: GasNodeKind,
    condition: NodeCondition,
    pressure_bounds: Option<(f64, f64)>,
    attachments: Vec<GasAttachment>,
    equations: IndexRange,
    constraints: IndexRange,
}

impl GasNode {
    pub fn from_record(kind: GasNodeKind, record: &ComponentRecord) -> anyhow::Result<Self> {
        let (condition, pressure_bounds) = match kind {
            GasNodeKind::Innode => (NodeCondition::Balance, None),
            GasNodeKind::Source | GasNodeKind::Sink => {
                let params: BoundaryParams = record.parse_params()?;
                (
                    condition(kind, params.boundary_type, params.boundary)?,
                    None,
                )
            }
            GasNodeKind::ConstraintSink => {
                let params: ConstraintSinkParams = record.parse_params()?;
                ensure!(
                    params.pressure_lower <= params.pressure_upper,
                    "pressure_lower {} exceeds pressure_upper {}",
                    params.pressure_lower,
                    params.pressure_upper
                );
                (
                    condition(kind, params.boundary_type, params.boundary)?,
                    Some((params.pressure_lower, params.pressure_upper)),
                )
            }
        };
        Ok(Self {
            kind,
            condition,
            pressure_bounds,
            attachments: Vec::new(),
            equations: IndexRange::default(),
            constraints: IndexRange::default(),
        })
    }

    pub fn kind(&self) -> GasNodeKind {
        self.kind
    }

    pub fn attachments(&self) -> &[GasAttachment] {
        &self.attachments
    }

    fn injection(&self, time: f64) -> GpnetResult<f64> {
        match &self.condition {
            NodeCondition::Flow { series, sign } => {
                let mut value = [0.0];
                series.evaluate_into(time, &mut value)?;
                Ok(sign * value[0])
            }
            _ => Ok(0.0),
        }
    }
}

fn condition(
    kind: GasNodeKind,
    boundary_type: BoundaryType,
    series: InterpolatingVector,
) -> anyhow::Result<NodeCondition> {
    let series = scalar_series(series, "boundary")?;
    Ok(match boundary_type {
        BoundaryType::Pressure => NodeCondition::Pressure(series),
        BoundaryType::Flow => NodeCondition::Flow {
            series,
            sign: kind.injection_sign(),
        },
    })
}

impl EquationComponent for GasNode {
    fn number_of_equations(&self) -> usize {
        0
    }

    fn equation_range(&self) -> IndexRange {
        self.equations
    }

    fn set_equation_range(&mut self, range: IndexRange) {
        self.equations = range;
    }

    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()> {
        let Some(last) = self.attachments.last() else {
            return Ok(());
        };
        if let NodeCondition::Pressure(series) = &self.condition {
            let mut prescribed = [0.0];
            series.evaluate_into(ctx.new_time, &mut prescribed)?;
            for a in &self.attachments {
                residual[a.boundary.row] = a.boundary.pressure(ctx.new_state) - prescribed[0];
            }
            return Ok(());
        }
        for pair in self.attachments.windows(2) {
            residual[pair[0].boundary.row] =
                pair[1].boundary.pressure(ctx.new_state) - pair[0].boundary.pressure(ctx.new_state);
        }
        let outflow: f64 = self
            .attachments
            .iter()
            .map(|a| a.end.sign() * a.boundary.flow(ctx.new_state))
            .sum();
        residual[last.boundary.row] = outflow - self.injection(ctx.new_time)?;
        Ok(())
    }

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        let Some(last) = self.attachments.last() else {
            return Ok(());
        };
        if let NodeCondition::Pressure(_) = self.condition {
            for a in &self.attachments {
                let b = a.boundary;
                handler.set_coefficient(b.row, b.pressure_index, b.d_pressure(ctx.new_state));
            }
            return Ok(());
        }
        for pair in self.attachments.windows(2) {
            let (here, next) = (pair[0].boundary, pair[1].boundary);
            handler.add_to_coefficient(here.row, next.pressure_index, next.d_pressure(ctx.new_state));
            handler.add_to_coefficient(here.row, here.pressure_index, -here.d_pressure(ctx.new_state));
        }
        for a in &self.attachments {
            handler.add_to_coefficient(last.boundary.row, a.boundary.flow_index, a.end.sign());
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

impl ConstraintComponent for GasNode {
    fn number_of_constraints_per_step(&self) -> usize {
        usize::from(self.pressure_bounds.is_some())
    }

    fn constraint_range(&self) -> IndexRange {
        self.constraints
    }

    fn set_constraint_range(&mut self, range: IndexRange) {
        self.constraints = range;
    }

    fn evaluate_constraint(&self, out: &mut [f64], ctx: &PointContext<'_>) -> GpnetResult<()> {
        if let Some(first) = self.attachments.first() {
            out[self.constraints.start] = first.boundary.pressure(ctx.state);
        }
        Ok(())
    }

    fn d_constraint_d_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        if let Some(first) = self.attachments.first() {
            let b = first.boundary;
            handler.set_coefficient(self.constraints.start, b.pressure_index, b.d_pressure(ctx.state));
        }
        Ok(())
    }

    fn set_constraint_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        if let Some((lower, _)) = self.pressure_bounds {
            fill_slot(bounds, self.constraints.start, lower);
        }
        Ok(())
    }

    fn set_constraint_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()> {
        if let Some((_, upper)) = self.pressure_bounds {
            fill_slot(bounds, self.constraints.start, upper);
        }
        Ok(())
    }
}

/// Write `value` into slot `index` at every time point.
pub(crate) fn fill_slot(target: &mut InterpolatingVector, index: usize, value: f64) {
    for step in 0..target.size() {
        target.mut_timestep(step)[index] = value;
    }
}

impl Component for GasNode {
    fn type_tag(&self) -> &'static str {
        self.kind.tag()
    }

    crate::capabilities!(equation);

    fn as_constraint(&self) -> Option<&dyn ConstraintComponent> {
        match self.pressure_bounds {
            Some(_) => Some(self),
            None => None,
        }
    }

    fn as_constraint_mut(&mut self) -> Option<&mut dyn ConstraintComponent> {
        match self.pressure_bounds {
            Some(_) => Some(self),
            None => None,
        }
    }

    fn attach(&mut self, attachments: &Attachments) -> GpnetResult<()> {
        if !attachments.power.is_empty() {
            return Err(GpnetError::Validation(format!(
                "{} node is connected to a power line",
                self.kind.tag()
            )));
        }
        if !attachments.plants.is_empty() {
            return Err(GpnetError::Validation(format!(
                "{} node is the end of a Gaspowerconnection, which must end at a power bus",
                self.kind.tag()
            )));
        }
        if self.pressure_bounds.is_some() && attachments.gas.is_empty() {
            return Err(GpnetError::Validation(
                "ConstraintSink needs at least one attached gas edge".to_string(),
            ));
        }
        self.attachments = attachments.gas.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::gas::{GasBoundary, PressureLaw};
    use crate::model::EdgeEnd;
    use crate::sparse::TripletHandler;
    use serde_json::json;

    fn record(tag: &str, params: serde_json::Value) -> ComponentRecord {
        serde_json::from_value(json!({"id": 1, "type": tag, "params": params})).unwrap()
    }

    fn attachment(end: EdgeEnd, row: usize, p: usize, q: usize) -> GasAttachment {
        GasAttachment {
            end,
            boundary: GasBoundary {
                row,
                pressure_index: p,
                flow_index: q,
                law: PressureLaw::Pressure,
            },
        }
    }

    fn ctx<'a>(state: &'a [f64]) -> StepContext<'a> {
        StepContext {
            last_time: 0.0,
            new_time: 1.0,
            last_state: state,
            new_state: state,
            control: &[],
        }
    }

    #[test]
    fn innode_couples_pressures_and_balances_flow() {
        let mut node = GasNode::from_record(GasNodeKind::Innode, &record("Innode", json!({}))).unwrap();
        node.attach(&Attachments {
            gas: vec![attachment(EdgeEnd::Start, 0, 0, 1), attachment(EdgeEnd::End, 1, 2, 3)],
            ..Attachments::default()
        })
        .unwrap();
        // pressures 50 and 48, flows 10 out and 7 in
        let state = [50.0, 10.0, 48.0, 7.0];
        let mut residual = [0.0; 2];
        node.evaluate(&mut residual, &ctx(&state)).unwrap();
        assert_eq!(residual, [-2.0, 3.0]);

        let mut h = TripletHandler::new(2, 4);
        node.d_evaluate_d_new_state(&mut h, &ctx(&state)).unwrap();
        h.set_matrix().unwrap();
        let dense = crate::sparse::to_dense(h.matrix().unwrap());
        assert_eq!(dense[0], vec![-1.0, 0.0, 1.0, 0.0]);
        assert_eq!(dense[1], vec![0.0, 1.0, 0.0, -1.0]);
    }

    #[test]
    fn sink_demand_enters_negatively() {
        let params = json!({
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [100.0]}, {"time": 10.0, "values": [100.0]}]
        });
        let mut node = GasNode::from_record(GasNodeKind::Sink, &record("Sink", params)).unwrap();
        node.attach(&Attachments {
            gas: vec![attachment(EdgeEnd::End, 0, 0, 1)],
            ..Attachments::default()
        })
        .unwrap();
        let state = [40.0, 100.0];
        let mut residual = [1.0];
        node.evaluate(&mut residual, &ctx(&state)).unwrap();
        assert_eq!(residual[0], 0.0);
    }

    #[test]
    fn constraint_sink_requires_an_edge() {
        let params = json!({
            "boundary_type": "flow",
            "boundary": [{"time": 0.0, "values": [1.0]}],
            "pressure_lower": 40.0,
            "pressure_upper": 70.0
        });
        let mut node =
            GasNode::from_record(GasNodeKind::ConstraintSink, &record("ConstraintSink", params))
                .unwrap();
        assert!(node.as_constraint().is_some());
        assert!(node.attach(&Attachments::default()).is_err());
    }

    #[test]
    fn unknown_boundary_type_is_rejected() {
        let params = json!({"boundary_type": "temperature", "boundary": []});
        assert!(GasNode::from_record(GasNodeKind::Source, &record("Source", params)).is_err());
    }
}
