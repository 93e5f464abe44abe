use crate::factory::ComponentRecord;
use crate::model::{Component, PowerLine};
use anyhow::ensure;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct LineParams {
    conductance: f64,
    susceptance: f64,
}

/// Series admittance `g + jb` between two buses.
#[derive(Debug, Clone, PartialEq)]
pub struct Transmissionline {
    conductance: f64,
    susceptance: f64,
}

impl Transmissionline {
    pub fn from_record(record: &ComponentRecord) -> anyhow::Result<Self> {
        let params: LineParams = record.parse_params()?;
        ensure!(
            params.conductance.is_finite() && params.susceptance.is_finite(),
            "line admittance must be finite"
        );
        Ok(Self {
            conductance: params.conductance,
            susceptance: params.susceptance,
        })
    }
}

impl PowerLine for Transmissionline {
    fn admittance(&self) -> (f64, f64) {
        (self.conductance, self.susceptance)
    }
}

impl Component for Transmissionline {
    fn type_tag(&self) -> &'static str {
        "Transmissionline"
    }

    fn as_power_line(&self) -> Option<&dyn PowerLine> {
        Some(self)
    }
}
