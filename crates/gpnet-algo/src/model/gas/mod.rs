//! Gas network components.
//!
//! Nodes own no states. Every gas edge owns its states together with an equal
//! number of equation rows and lends its first row to the node at its start
//! and its last row to the node at its end. A node therefore writes exactly
//! one equation per attached edge:
//!
//! - pressure nodes prescribe the pressure at every attached edge end,
//! - flow nodes couple the pressures of consecutive attached edge ends and
//!   close with one flow balance `Σ sign · q = injection`.

pub mod law;
pub mod node;
pub mod pipe;
pub mod short;

pub use law::IsothermalEuler;
pub use node::{GasNode, GasNodeKind};
pub use pipe::Pipe;
pub use short::{ShortEdge, ShortEdgeKind};

use anyhow::{anyhow, ensure};
use gpnet_core::{Interpolating, InterpolatingVector};
use serde::Deserialize;

/// How a boundary state slot maps to pressure in bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLaw {
    /// The slot holds pressure in bar.
    Pressure,
    /// The slot holds gas density; pressure follows the isothermal gas law.
    Density,
}

impl PressureLaw {
    pub fn pressure_bar(&self, value: f64) -> f64 {
        match self {
            PressureLaw::Pressure => value,
            PressureLaw::Density => law::pressure(value) / law::BAR,
        }
    }

    pub fn d_pressure_bar(&self, value: f64) -> f64 {
        match self {
            PressureLaw::Pressure => 1.0,
            PressureLaw::Density => law::d_pressure_d_rho(value) / law::BAR,
        }
    }

    /// Slot value for a pressure in bar.
    pub fn value_from_bar(&self, pressure_bar: f64) -> f64 {
        match self {
            PressureLaw::Pressure => pressure_bar,
            PressureLaw::Density => law::rho_from_pressure(pressure_bar * law::BAR),
        }
    }
}

/// Slots and lent equation row at one end of a gas edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GasBoundary {
    pub row: usize,
    pub pressure_index: usize,
    pub flow_index: usize,
    pub law: PressureLaw,
}

impl GasBoundary {
    pub fn pressure(&self, state: &[f64]) -> f64 {
        self.law.pressure_bar(state[self.pressure_index])
    }

    pub fn d_pressure(&self, state: &[f64]) -> f64 {
        self.law.d_pressure_bar(state[self.pressure_index])
    }

    pub fn flow(&self, state: &[f64]) -> f64 {
        state[self.flow_index]
    }
}

/// Initial `[pressure (bar), flow]` at position `x` along an edge.
#[derive(Debug, Clone, Deserialize)]
pub struct InitialPoint {
    pub x: f64,
    pub values: Vec<f64>,
}

/// Piecewise linear initial profile along an edge.
pub(crate) fn initial_profile(points: &[InitialPoint]) -> anyhow::Result<InterpolatingVector> {
    ensure!(!points.is_empty(), "initial profile needs at least one point");
    let mut profile = InterpolatingVector::with_inner_length(2);
    for point in points {
        ensure!(
            point.values.len() == 2,
            "initial value at x = {} must be [pressure, flow]",
            point.x
        );
        profile
            .push(point.x, &point.values)
            .map_err(|e| anyhow!("initial profile: {e}"))?;
    }
    Ok(profile)
}

/// Sample `series` at `t`, holding the end values outside its range.
pub(crate) fn sample_clamped(series: &impl Interpolating, t: f64) -> anyhow::Result<Vec<f64>> {
    let points = series.interpolation_points();
    let (first, last) = match (points.first(), points.last()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Err(anyhow!("cannot sample an empty series")),
    };
    series
        .evaluate(t.clamp(first, last))
        .map_err(|e| anyhow!("sampling at {t}: {e}"))
}

/// Check that a scalar time series has width one.
pub(crate) fn scalar_series(
    series: InterpolatingVector,
    what: &str,
) -> anyhow::Result<InterpolatingVector> {
    ensure!(
        series.inner_length() == 1,
        "{what} must carry one value per time point, found {}",
        series.inner_length()
    );
    ensure!(series.size() > 0, "{what} must not be empty");
    Ok(series)
}
