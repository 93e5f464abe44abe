//! Uniform simulation time grids.

use crate::{GpnetError, GpnetResult};
use serde::Deserialize;

/// Start and end time plus a desired step width.
///
/// The realised step is `(end - start) / number_of_steps`, where the step count
/// is the smallest integer making it no wider than the desired one.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(try_from = "RawTimeData")]
pub struct TimeData {
    start: f64,
    end: f64,
    number_of_steps: usize,
    delta_t: f64,
}

#[derive(Deserialize)]
struct RawTimeData {
    start: f64,
    end: f64,
    desired_delta_t: f64,
}

impl TryFrom<RawTimeData> for TimeData {
    type Error = GpnetError;

    fn try_from(raw: RawTimeData) -> Result<Self, Self::Error> {
        TimeData::new(raw.start, raw.end, raw.desired_delta_t)
    }
}

impl TimeData {
    pub fn new(start: f64, end: f64, desired_delta_t: f64) -> GpnetResult<Self> {
        if !(end > start) {
            return Err(GpnetError::Validation(format!(
                "end time {end} must lie after start time {start}"
            )));
        }
        if !(desired_delta_t > 0.0) || !desired_delta_t.is_finite() {
            return Err(GpnetError::Validation(format!(
                "time step must be positive, got {desired_delta_t}"
            )));
        }
        let interval = end - start;
        let number_of_steps = (interval / desired_delta_t).ceil().max(1.0) as usize;
        Ok(Self {
            start,
            end,
            number_of_steps,
            delta_t: interval / number_of_steps as f64,
        })
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    pub fn delta_t(&self) -> f64 {
        self.delta_t
    }

    /// Number of steps after the initial time point.
    pub fn number_of_steps(&self) -> usize {
        self.number_of_steps
    }

    /// Time points `start, start + dt, ..., end`.
    pub fn time_points(&self) -> Vec<f64> {
        let mut points: Vec<f64> = (0..=self.number_of_steps)
            .map(|i| self.start + i as f64 * self.delta_t)
            .collect();
        if let Some(last) = points.last_mut() {
            *last = self.end;
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_count_rounds_up() {
        let td = TimeData::new(0.0, 100.0, 30.0).unwrap();
        assert_eq!(td.number_of_steps(), 4);
        assert!((td.delta_t() - 25.0).abs() < 1e-12);
        assert_eq!(td.time_points(), vec![0.0, 25.0, 50.0, 75.0, 100.0]);
    }

    #[test]
    fn exact_division_keeps_step() {
        let td = TimeData::new(0.0, 180.0, 60.0).unwrap();
        assert_eq!(td.number_of_steps(), 3);
        assert_eq!(td.delta_t(), 60.0);
    }

    #[test]
    fn rejects_empty_interval() {
        assert!(TimeData::new(5.0, 5.0, 1.0).is_err());
        assert!(TimeData::new(0.0, 5.0, 0.0).is_err());
    }

    #[test]
    fn deserializes_from_desired_step() {
        let td: TimeData =
            serde_json::from_str(r#"{"start": 0.0, "end": 10.0, "desired_delta_t": 4.0}"#).unwrap();
        assert_eq!(td.number_of_steps(), 3);
    }
}
