//! Smoothed metric value objects.
//!
//! A metric carries its average and its first and second time
//! derivatives. Each field is an independent time series: an update to
//! one never touches the others, and the latest sample simply overwrites
//! the previous one.

use serde::{Deserialize, Serialize};

/// Which component of a smoothed metric an event updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Average,
    Gradient,
    SecondDerivative,
}

impl MetricField {
    pub const ALL: [MetricField; 3] = [
        MetricField::Average,
        MetricField::Gradient,
        MetricField::SecondDerivative,
    ];
}

/// Which per-member metric an event updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    LoadAverage,
    MemoryConsumption,
}

/// Average, gradient and second derivative of one monitored signal.
///
/// All fields start at zero until first observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub average: f32,
    pub gradient: f32,
    pub second_derivative: f32,
}

impl Metric {
    /// Overwrite one field, leaving the other two untouched.
    pub fn set(&mut self, field: MetricField, value: f32) {
        match field {
            MetricField::Average => self.average = value,
            MetricField::Gradient => self.gradient = value,
            MetricField::SecondDerivative => self.second_derivative = value,
        }
    }

    /// Read one field.
    pub fn get(&self, field: MetricField) -> f32 {
        match field {
            MetricField::Average => self.average,
            MetricField::Gradient => self.gradient,
            MetricField::SecondDerivative => self.second_derivative,
        }
    }
}
