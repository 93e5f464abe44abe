//! Time-indexed value blocks with linear interpolation.
//!
//! An interpolating vector is a strictly increasing sequence of time points,
//! each carrying a value block of the same width (`inner_length`). Evaluating
//! at an arbitrary time interpolates linearly between the two enclosing blocks.
//!
//! Three storage flavours share the read API through [`Interpolating`]:
//!
//! | Type | Storage | Mutable |
//! |------|---------|---------|
//! | [`InterpolatingVector`] | owned `Vec<f64>` | yes, and can grow in time |
//! | [`InterpolatingView`] | borrowed `&[f64]` | no |
//! | [`InterpolatingViewMut`] | borrowed `&mut [f64]` | values only |
//!
//! Views borrow their storage, so they cannot outlive it. The NLP adaptors use
//! them to read decision vectors handed over by a solver without copying.

use crate::{GpnetError, GpnetResult};
use serde::{Deserialize, Serialize};

/// Relative slack allowed when evaluating at the ends of the time range.
const TIME_TOLERANCE: f64 = 1e-12;

fn time_slack(t: f64) -> f64 {
    TIME_TOLERANCE * (1.0 + t.abs())
}

fn check_points(points: &[f64]) -> GpnetResult<()> {
    if let Some(w) = points.windows(2).find(|w| !(w[1] > w[0])) {
        return Err(GpnetError::Validation(format!(
            "interpolation points must be strictly increasing, found {} followed by {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

fn check_lengths(points: &[f64], inner: usize, values: usize) -> GpnetResult<()> {
    if points.len() * inner != values {
        return Err(GpnetError::Validation(format!(
            "{} points of width {} need {} values, got {}",
            points.len(),
            inner,
            points.len() * inner,
            values
        )));
    }
    Ok(())
}

/// Read access shared by owning and borrowed interpolating vectors.
pub trait Interpolating {
    fn interpolation_points(&self) -> &[f64];
    fn inner_length(&self) -> usize;
    fn all_values(&self) -> &[f64];

    /// Number of time points.
    fn size(&self) -> usize {
        self.interpolation_points().len()
    }

    fn interpolation_point_at_index(&self, index: usize) -> f64 {
        self.interpolation_points()[index]
    }

    fn vector_at_index(&self, index: usize) -> &[f64] {
        let inner = self.inner_length();
        &self.all_values()[index * inner..(index + 1) * inner]
    }

    /// Write the interpolated block at `time` into `out`.
    fn evaluate_into(&self, time: f64, out: &mut [f64]) -> GpnetResult<()> {
        let points = self.interpolation_points();
        let inner = self.inner_length();
        if out.len() != inner {
            return Err(GpnetError::Validation(format!(
                "output block has length {}, expected {}",
                out.len(),
                inner
            )));
        }
        let (first, last) = match (points.first(), points.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(GpnetError::Validation(
                    "cannot evaluate an interpolating vector without points".to_string(),
                ))
            }
        };
        if time < first - time_slack(first) || time > last + time_slack(last) {
            return Err(GpnetError::Validation(format!(
                "time {time} lies outside the interpolation range [{first}, {last}]"
            )));
        }

        let upper = points.partition_point(|p| *p < time);
        if upper == 0 {
            out.copy_from_slice(self.vector_at_index(0));
            return Ok(());
        }
        if upper == points.len() {
            out.copy_from_slice(self.vector_at_index(points.len() - 1));
            return Ok(());
        }
        let lambda = (time - points[upper - 1]) / (points[upper] - points[upper - 1]);
        let lower_block = self.vector_at_index(upper - 1);
        let upper_block = self.vector_at_index(upper);
        for ((o, lo), hi) in out.iter_mut().zip(lower_block).zip(upper_block) {
            *o = (1.0 - lambda) * lo + lambda * hi;
        }
        Ok(())
    }

    /// Interpolated block at `time`.
    fn evaluate(&self, time: f64) -> GpnetResult<Vec<f64>> {
        let mut out = vec![0.0; self.inner_length()];
        self.evaluate_into(time, &mut out)?;
        Ok(out)
    }

    fn to_timed_values(&self) -> Vec<TimedValues> {
        (0..self.size())
            .map(|i| TimedValues {
                time: self.interpolation_point_at_index(i),
                values: self.vector_at_index(i).to_vec(),
            })
            .collect()
    }
}

/// Mutable value access shared by owning vectors and mutable views.
pub trait InterpolatingMut: Interpolating {
    fn all_values_mut(&mut self) -> &mut [f64];

    fn mut_timestep(&mut self, index: usize) -> &mut [f64] {
        let inner = self.inner_length();
        &mut self.all_values_mut()[index * inner..(index + 1) * inner]
    }

    fn set_values_in_bulk(&mut self, values: &[f64]) -> GpnetResult<()> {
        let target = self.all_values_mut();
        if target.len() != values.len() {
            return Err(GpnetError::Validation(format!(
                "bulk assignment of {} values into storage of {}",
                values.len(),
                target.len()
            )));
        }
        target.copy_from_slice(values);
        Ok(())
    }

    fn set_zero(&mut self) {
        self.all_values_mut().iter_mut().for_each(|v| *v = 0.0);
    }
}

/// Two interpolating vectors agree on time points and width.
pub fn have_same_structure(a: &impl Interpolating, b: &impl Interpolating) -> bool {
    a.inner_length() == b.inner_length() && a.interpolation_points() == b.interpolation_points()
}

/// Serialized form of one time point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedValues {
    pub time: f64,
    pub values: Vec<f64>,
}

/// Interpolating vector owning its points and values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<TimedValues>", into = "Vec<TimedValues>")]
pub struct InterpolatingVector {
    points: Vec<f64>,
    inner: usize,
    values: Vec<f64>,
}

impl InterpolatingVector {
    /// Zero-filled vector on the given time points.
    pub fn new(points: Vec<f64>, inner: usize) -> GpnetResult<Self> {
        check_points(&points)?;
        let values = vec![0.0; points.len() * inner];
        Ok(Self {
            points,
            inner,
            values,
        })
    }

    /// Empty vector that can later be extended with [`push`](Self::push).
    pub fn with_inner_length(inner: usize) -> Self {
        Self {
            points: Vec::new(),
            inner,
            values: Vec::new(),
        }
    }

    pub fn from_parts(points: Vec<f64>, inner: usize, values: Vec<f64>) -> GpnetResult<Self> {
        check_points(&points)?;
        check_lengths(&points, inner, values.len())?;
        Ok(Self {
            points,
            inner,
            values,
        })
    }

    /// Append a time point after the current last one.
    pub fn push(&mut self, time: f64, values: &[f64]) -> GpnetResult<()> {
        if values.len() != self.inner {
            return Err(GpnetError::Validation(format!(
                "pushed block has width {}, expected {}",
                values.len(),
                self.inner
            )));
        }
        if let Some(last) = self.points.last() {
            if !(time > *last) {
                return Err(GpnetError::Validation(format!(
                    "pushed time {time} does not follow last time {last}"
                )));
            }
        }
        self.points.push(time);
        self.values.extend_from_slice(values);
        Ok(())
    }

    /// Sample `other` at `points`, producing a new owning vector.
    pub fn construct_and_interpolate_from(
        points: Vec<f64>,
        inner: usize,
        other: &impl Interpolating,
    ) -> GpnetResult<Self> {
        if other.inner_length() != inner {
            return Err(GpnetError::Validation(format!(
                "source has width {}, requested {}",
                other.inner_length(),
                inner
            )));
        }
        let mut result = Self::new(points, inner)?;
        for i in 0..result.size() {
            let t = result.points[i];
            other.evaluate_into(t, &mut result.values[i * inner..(i + 1) * inner])?;
        }
        Ok(result)
    }

    pub fn view(&self) -> InterpolatingView<'_> {
        InterpolatingView {
            points: &self.points,
            inner: self.inner,
            values: &self.values,
        }
    }

    pub fn view_mut(&mut self) -> InterpolatingViewMut<'_> {
        InterpolatingViewMut {
            points: &self.points,
            inner: self.inner,
            values: &mut self.values,
        }
    }

    pub fn into_values(self) -> Vec<f64> {
        self.values
    }
}

impl Interpolating for InterpolatingVector {
    fn interpolation_points(&self) -> &[f64] {
        &self.points
    }
    fn inner_length(&self) -> usize {
        self.inner
    }
    fn all_values(&self) -> &[f64] {
        &self.values
    }
}

impl InterpolatingMut for InterpolatingVector {
    fn all_values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }
}

impl TryFrom<Vec<TimedValues>> for InterpolatingVector {
    type Error = GpnetError;

    fn try_from(entries: Vec<TimedValues>) -> Result<Self, Self::Error> {
        let inner = entries.first().map_or(0, |e| e.values.len());
        let mut result = Self::with_inner_length(inner);
        for entry in entries {
            result.push(entry.time, &entry.values)?;
        }
        Ok(result)
    }
}

impl From<InterpolatingVector> for Vec<TimedValues> {
    fn from(vector: InterpolatingVector) -> Self {
        vector.to_timed_values()
    }
}

/// Read-only interpolating view over borrowed storage.
#[derive(Debug, Clone, Copy)]
pub struct InterpolatingView<'a> {
    points: &'a [f64],
    inner: usize,
    values: &'a [f64],
}

impl<'a> InterpolatingView<'a> {
    pub fn new(points: &'a [f64], inner: usize, values: &'a [f64]) -> GpnetResult<Self> {
        check_points(points)?;
        check_lengths(points, inner, values.len())?;
        Ok(Self {
            points,
            inner,
            values,
        })
    }

    pub fn to_vector(&self) -> InterpolatingVector {
        InterpolatingVector {
            points: self.points.to_vec(),
            inner: self.inner,
            values: self.values.to_vec(),
        }
    }
}

impl Interpolating for InterpolatingView<'_> {
    fn interpolation_points(&self) -> &[f64] {
        self.points
    }
    fn inner_length(&self) -> usize {
        self.inner
    }
    fn all_values(&self) -> &[f64] {
        self.values
    }
}

/// Interpolating view whose values may be written in place.
#[derive(Debug)]
pub struct InterpolatingViewMut<'a> {
    points: &'a [f64],
    inner: usize,
    values: &'a mut [f64],
}

impl<'a> InterpolatingViewMut<'a> {
    pub fn new(points: &'a [f64], inner: usize, values: &'a mut [f64]) -> GpnetResult<Self> {
        check_points(points)?;
        check_lengths(points, inner, values.len())?;
        Ok(Self {
            points,
            inner,
            values,
        })
    }
}

impl Interpolating for InterpolatingViewMut<'_> {
    fn interpolation_points(&self) -> &[f64] {
        self.points
    }
    fn inner_length(&self) -> usize {
        self.inner
    }
    fn all_values(&self) -> &[f64] {
        &*self.values
    }
}

impl InterpolatingMut for InterpolatingViewMut<'_> {
    fn all_values_mut(&mut self) -> &mut [f64] {
        &mut *self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> InterpolatingVector {
        InterpolatingVector::from_parts(vec![0.0, 1.0, 3.0], 2, vec![0.0, 10.0, 1.0, 20.0, 3.0, 0.0])
            .unwrap()
    }

    #[test]
    fn evaluates_between_and_at_points() {
        let v = ramp();
        assert_eq!(v.evaluate(1.0).unwrap(), vec![1.0, 20.0]);
        assert_eq!(v.evaluate(0.5).unwrap(), vec![0.5, 15.0]);
        assert_eq!(v.evaluate(2.0).unwrap(), vec![2.0, 10.0]);
        assert_eq!(v.evaluate(3.0).unwrap(), vec![3.0, 0.0]);
    }

    #[test]
    fn rejects_times_outside_range() {
        let v = ramp();
        assert!(v.evaluate(-0.1).is_err());
        assert!(v.evaluate(3.1).is_err());
        // rounding noise at the ends is tolerated
        assert!(v.evaluate(3.0 + 1e-14).is_ok());
    }

    #[test]
    fn rejects_unsorted_points() {
        assert!(InterpolatingVector::new(vec![0.0, 2.0, 1.0], 1).is_err());
        assert!(InterpolatingVector::new(vec![0.0, 0.0], 1).is_err());
        assert!(InterpolatingVector::from_parts(vec![0.0, 1.0], 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn push_extends_in_time_only() {
        let mut v = InterpolatingVector::with_inner_length(1);
        v.push(0.0, &[1.0]).unwrap();
        v.push(2.0, &[3.0]).unwrap();
        assert!(v.push(2.0, &[4.0]).is_err());
        assert!(v.push(3.0, &[4.0, 5.0]).is_err());
        assert_eq!(v.size(), 2);
        assert_eq!(v.evaluate(1.0).unwrap(), vec![2.0]);
    }

    #[test]
    fn view_reads_borrowed_storage() {
        let points = [0.0, 10.0];
        let values = [1.0, 2.0, 3.0, 4.0];
        let view = InterpolatingView::new(&points, 2, &values).unwrap();
        assert_eq!(view.evaluate(5.0).unwrap(), vec![2.0, 3.0]);
        assert!(have_same_structure(&view, &view.to_vector()));
    }

    #[test]
    fn mutable_view_writes_through() {
        let points = [0.0, 1.0];
        let mut values = [0.0; 4];
        {
            let mut view = InterpolatingViewMut::new(&points, 2, &mut values).unwrap();
            view.mut_timestep(1).copy_from_slice(&[5.0, 6.0]);
        }
        assert_eq!(values, [0.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn resampling_onto_new_points() {
        let v = ramp();
        let resampled =
            InterpolatingVector::construct_and_interpolate_from(vec![0.5, 2.0], 2, &v).unwrap();
        assert_eq!(resampled.vector_at_index(0), &[0.5, 15.0]);
        assert_eq!(resampled.vector_at_index(1), &[2.0, 10.0]);
        assert!(InterpolatingVector::construct_and_interpolate_from(vec![0.0], 3, &v).is_err());
    }

    #[test]
    fn serde_uses_timed_values() {
        let v = ramp();
        let json = serde_json::to_string(&v).unwrap();
        assert!(json.starts_with("[{\"time\":0.0"), "{json}");
        let back: InterpolatingVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
        let bad = r#"[{"time":1.0,"values":[1.0]},{"time":0.0,"values":[2.0]}]"#;
        assert!(serde_json::from_str::<InterpolatingVector>(bad).is_err());
    }
}
