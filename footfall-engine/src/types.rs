//! Core measurement and sensor types
//!
//! Measurements are immutable values produced fresh every poll cycle.
//! Sensor descriptors come from the external metadata source and are
//! read-only here.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Kind of sensor, which decides which poller feeds it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensorType {
    /// Council pedestrian counter published as hourly report tables
    CouncilFlowCounter,
    /// Business-district counter published only as weekly chart images
    ChartFlowCounter,
}

/// Sensor metadata row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: SensorType,
    /// Base URL the query template is expanded against
    #[serde(default)]
    pub source: String,
    /// Width of the counting line in metres
    #[serde(default)]
    pub measurement_width_m: Option<f64>,
    /// Code of the output area containing the sensor
    #[serde(default)]
    pub oa_code: Option<String>,
}

/// Measured quantity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MeasurementValue {
    /// Pedestrians per hour crossing the counting line
    FlowPerHour(f64),
    /// Pedestrians per square metre
    DensityPerSquareMetre(f64),
}

/// One sensor reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub sensor_name: String,
    /// Local wall-clock time the reading represents
    pub timestamp: NaiveDateTime,
    pub value: MeasurementValue,
}

impl Measurement {
    pub fn flow(sensor_name: impl Into<String>, timestamp: NaiveDateTime, pax_per_hour: f64) -> Self {
        Self {
            sensor_name: sensor_name.into(),
            timestamp,
            value: MeasurementValue::FlowPerHour(pax_per_hour),
        }
    }

    pub fn flow_pax_per_hour(&self) -> Option<f64> {
        match self.value {
            MeasurementValue::FlowPerHour(v) => Some(v),
            MeasurementValue::DensityPerSquareMetre(_) => None,
        }
    }
}

/// One fused output row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityRow {
    pub sensor_name: String,
    pub timestamp: NaiveDateTime,
    pub sensor_type: SensorType,
    pub oa_code: String,
    pub measurement_width_m: Option<f64>,
    pub flow_pax_per_hour: Option<f64>,
    pub density_pax_per_m2: f64,
}
