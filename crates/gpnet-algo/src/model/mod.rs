//! # Component Model
//!
//! A component is a node or edge instance that declares any subset of five
//! capabilities:
//!
//! | Capability | Trait | Contributes |
//! |------------|-------|-------------|
//! | equations | [`EquationComponent`] | residual rows and their Jacobians |
//! | state | [`StateComponent`] | state slots and initial values |
//! | controls | [`ControlComponent`] | control slots, bounds, initial controls |
//! | constraints | [`ConstraintComponent`] | constraint slots, bounds, derivatives |
//! | cost | [`CostComponent`] | scalar cost and its gradient |
//!
//! The assembly code never inspects concrete types. It asks a [`Component`]
//! for each capability (`as_equation`, `as_state`, ...) and works with whatever
//! is present. Components store only their own allocated [`IndexRange`]s as
//! plain values; all global vectors are passed in by the caller.
//!
//! Nodes learn about their incident edges once, after index allocation,
//! through [`Attachments`]: plain-value descriptions of every incident gas edge
//! end, power line and gas-fired plant.

pub mod coupling;
pub mod gas;
pub mod power;

use crate::problem::{IndexAllocator, IndexRange};
use crate::sparse::MatrixHandler;
use gpnet_core::{GpnetResult, InterpolatingVector};
use serde::{Deserialize, Serialize};

pub use coupling::{PlantAttachment, PowerConversion};
pub use gas::{GasBoundary, PressureLaw};

/// Inputs of one implicit time step.
///
/// State and control slices are the full global vectors; components index
/// into them with their allocated ranges.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub last_time: f64,
    pub new_time: f64,
    pub last_state: &'a [f64],
    pub new_state: &'a [f64],
    pub control: &'a [f64],
}

impl StepContext<'_> {
    pub fn delta_t(&self) -> f64 {
        self.new_time - self.last_time
    }
}

/// Inputs at a single time point, used by costs and constraints.
#[derive(Debug, Clone, Copy)]
pub struct PointContext<'a> {
    pub time: f64,
    pub state: &'a [f64],
    pub control: &'a [f64],
}

/// Labelled value of a solved state, for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateValue {
    pub label: String,
    pub value: f64,
}

impl StateValue {
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// Contributes residual rows.
pub trait EquationComponent {
    /// Rows this component owns.
    fn number_of_equations(&self) -> usize;
    fn equation_range(&self) -> IndexRange;
    fn set_equation_range(&mut self, range: IndexRange);

    /// Reserve this component's rows.
    fn setup(&mut self, allocator: &mut IndexAllocator) {
        let range = allocator.reserve(self.number_of_equations());
        self.set_equation_range(range);
    }

    /// Write residual entries into the global `residual` vector.
    fn evaluate(&self, residual: &mut [f64], ctx: &StepContext<'_>) -> GpnetResult<()>;

    fn d_evaluate_d_new_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()>;

    fn d_evaluate_d_last_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &StepContext<'_>,
    ) -> GpnetResult<()>;

    fn d_evaluate_d_control(
        &self,
        _handler: &mut dyn MatrixHandler,
        _ctx: &StepContext<'_>,
    ) -> GpnetResult<()> {
        Ok(())
    }
}

/// Owns state slots.
pub trait StateComponent {
    fn number_of_states(&self) -> usize;
    fn state_range(&self) -> IndexRange;
    fn set_state_range(&mut self, range: IndexRange);

    fn setup_states(&mut self, allocator: &mut IndexAllocator) {
        let range = allocator.reserve(self.number_of_states());
        self.set_state_range(range);
    }

    /// Write the initial values of this component's slots into `state`.
    fn set_initial_values(&self, state: &mut [f64]) -> GpnetResult<()>;

    /// Human readable values of this component's slots in `state`.
    fn state_values(&self, state: &[f64]) -> Vec<StateValue>;
}

/// Owns control slots at every control time point.
pub trait ControlComponent {
    fn number_of_controls_per_step(&self) -> usize;
    fn control_range(&self) -> IndexRange;
    fn set_control_range(&mut self, range: IndexRange);

    fn setup_controls(&mut self, allocator: &mut IndexAllocator) {
        let range = allocator.reserve(self.number_of_controls_per_step());
        self.set_control_range(range);
    }

    fn set_initial_controls(&self, controls: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
}

/// Contributes constraint slots at every constraint time point.
pub trait ConstraintComponent {
    fn number_of_constraints_per_step(&self) -> usize;
    fn constraint_range(&self) -> IndexRange;
    fn set_constraint_range(&mut self, range: IndexRange);

    fn setup_constraints(&mut self, allocator: &mut IndexAllocator) {
        let range = allocator.reserve(self.number_of_constraints_per_step());
        self.set_constraint_range(range);
    }

    /// Write constraint values into the per-step constraint block `out`.
    fn evaluate_constraint(&self, out: &mut [f64], ctx: &PointContext<'_>) -> GpnetResult<()>;

    fn d_constraint_d_state(
        &self,
        handler: &mut dyn MatrixHandler,
        ctx: &PointContext<'_>,
    ) -> GpnetResult<()>;

    fn d_constraint_d_control(
        &self,
        _handler: &mut dyn MatrixHandler,
        _ctx: &PointContext<'_>,
    ) -> GpnetResult<()> {
        Ok(())
    }

    fn set_constraint_lower_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
    fn set_constraint_upper_bounds(&self, bounds: &mut InterpolatingVector) -> GpnetResult<()>;
}

/// Contributes to the objective.
pub trait CostComponent {
    fn evaluate_cost(&self, ctx: &PointContext<'_>) -> f64;

    /// Accumulate `dc/dstate` into the global `gradient`.
    fn d_cost_d_state(&self, _gradient: &mut [f64], _ctx: &PointContext<'_>) {}

    /// Accumulate `dc/dcontrol` into the global `gradient`.
    fn d_cost_d_control(&self, _gradient: &mut [f64], _ctx: &PointContext<'_>) {}
}

/// Which end of an edge a node sits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeEnd {
    Start,
    End,
}

impl EdgeEnd {
    /// `+1` for edges leaving the node, `-1` for edges entering it.
    pub fn sign(&self) -> f64 {
        match self {
            EdgeEnd::Start => 1.0,
            EdgeEnd::End => -1.0,
        }
    }
}

/// Gas edge exposing its boundary slots to the incident nodes.
pub trait GasEdge {
    fn boundary(&self, end: EdgeEnd) -> GasBoundary;
}

/// Power line exposing its series admittance.
pub trait PowerLine {
    /// `(conductance, susceptance)` of the series admittance.
    fn admittance(&self) -> (f64, f64);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasAttachment {
    pub end: EdgeEnd,
    pub boundary: GasBoundary,
}

/// Neighbour coupling through one power line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerAttachment {
    pub conductance: f64,
    pub susceptance: f64,
    pub neighbour_voltage: usize,
    pub neighbour_angle: usize,
}

/// Everything a node learns about its incident edges.
///
/// Gas attachments are ordered: starting edges first, then ending edges, each
/// group in insertion order. A plant ending at the node shows up in `plants`
/// instead of `gas`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachments {
    pub gas: Vec<GasAttachment>,
    pub power: Vec<PowerAttachment>,
    pub plants: Vec<PlantAttachment>,
}

/// A node or edge instance, queried by capability.
pub trait Component {
    fn type_tag(&self) -> &'static str;

    fn as_equation(&self) -> Option<&dyn EquationComponent> {
        None
    }
    fn as_equation_mut(&mut self) -> Option<&mut dyn EquationComponent> {
        None
    }
    fn as_state(&self) -> Option<&dyn StateComponent> {
        None
    }
    fn as_state_mut(&mut self) -> Option<&mut dyn StateComponent> {
        None
    }
    fn as_control(&self) -> Option<&dyn ControlComponent> {
        None
    }
    fn as_control_mut(&mut self) -> Option<&mut dyn ControlComponent> {
        None
    }
    fn as_constraint(&self) -> Option<&dyn ConstraintComponent> {
        None
    }
    fn as_constraint_mut(&mut self) -> Option<&mut dyn ConstraintComponent> {
        None
    }
    fn as_cost(&self) -> Option<&dyn CostComponent> {
        None
    }
    fn as_gas_edge(&self) -> Option<&dyn GasEdge> {
        None
    }
    fn as_power_line(&self) -> Option<&dyn PowerLine> {
        None
    }
    /// Row lent to the power bus at the end of a gas-fired plant.
    fn plant(&self) -> Option<PlantAttachment> {
        None
    }

    /// Receive incident-edge information after index allocation.
    fn attach(&mut self, _attachments: &Attachments) -> GpnetResult<()> {
        Ok(())
    }
}

/// Implements the capability accessors of [`Component`] for the listed traits.
#[macro_export]
#[doc(hidden)]
macro_rules! capabilities {
    (equation) => {
        fn as_equation(&self) -> Option<&dyn $crate::model::EquationComponent> {
            Some(self)
        }
        fn as_equation_mut(&mut self) -> Option<&mut dyn $crate::model::EquationComponent> {
            Some(self)
        }
    };
    (state) => {
        fn as_state(&self) -> Option<&dyn $crate::model::StateComponent> {
            Some(self)
        }
        fn as_state_mut(&mut self) -> Option<&mut dyn $crate::model::StateComponent> {
            Some(self)
        }
    };
    (control) => {
        fn as_control(&self) -> Option<&dyn $crate::model::ControlComponent> {
            Some(self)
        }
        fn as_control_mut(&mut self) -> Option<&mut dyn $crate::model::ControlComponent> {
            Some(self)
        }
    };
    (constraint) => {
        fn as_constraint(&self) -> Option<&dyn $crate::model::ConstraintComponent> {
            Some(self)
        }
        fn as_constraint_mut(&mut self) -> Option<&mut dyn $crate::model::ConstraintComponent> {
            Some(self)
        }
    };
    (cost) => {
        fn as_cost(&self) -> Option<&dyn $crate::model::CostComponent> {
            Some(self)
        }
    };
    ($($cap:ident),+) => {
        $($crate::capabilities!($cap);)+
    };
}
