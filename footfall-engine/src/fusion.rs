//! Sensor fusion: joins measurements to their descriptors and converts
//! flow to density.
//!
//! A counter measuring `q` pedestrians per hour across a crossing `w` metres
//! wide, walking at `v` m/s, implies a density of `q / 3600 / w / v`.

use crate::types::{DensityRow, Measurement, MeasurementValue, SensorDescriptor};
use footfall_common::config::FusionConfig;
use footfall_common::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Fuse every measurement set against the descriptors
///
/// Measurements without a descriptor are dropped with a warning, as are rows
/// whose sensor lies outside every output area. Any surviving row without a
/// finite density is an invariant violation.
pub fn fuse(
    descriptors: &[SensorDescriptor],
    measurement_sets: &[Vec<Measurement>],
    config: &FusionConfig,
) -> Result<Vec<DensityRow>> {
    let by_name: HashMap<&str, &SensorDescriptor> =
        descriptors.iter().map(|d| (d.name.as_str(), d)).collect();

    let mut rows = Vec::new();
    let mut outside_area = 0usize;
    for m in measurement_sets.iter().flatten() {
        let Some(descriptor) = by_name.get(m.sensor_name.as_str()) else {
            warn!(sensor = %m.sensor_name, "Measurement has no sensor descriptor, dropping");
            continue;
        };
        let Some(oa_code) = descriptor.oa_code.clone() else {
            outside_area += 1;
            continue;
        };

        let (flow, density) = match m.value {
            MeasurementValue::FlowPerHour(q) => (
                Some(q),
                flow_to_density(q, descriptor.measurement_width_m, config.average_walking_speed_mps),
            ),
            MeasurementValue::DensityPerSquareMetre(d) => (None, Some(d)),
        };

        let density = density.filter(|d| d.is_finite()).ok_or_else(|| {
            Error::Invariant(format!(
                "failed to convert measurement for {} to density (width {:?})",
                m.sensor_name, descriptor.measurement_width_m
            ))
        })?;

        rows.push(DensityRow {
            sensor_name: m.sensor_name.clone(),
            timestamp: m.timestamp,
            sensor_type: descriptor.sensor_type,
            oa_code,
            measurement_width_m: descriptor.measurement_width_m,
            flow_pax_per_hour: flow,
            density_pax_per_m2: density,
        });
    }

    if outside_area > 0 {
        debug!("Dropped {} measurements outside any output area", outside_area);
    }
    Ok(rows)
}

fn flow_to_density(flow_pax_per_hour: f64, width_m: Option<f64>, speed_mps: f64) -> Option<f64> {
    let width = width_m.filter(|w| *w > 0.0)?;
    if speed_mps <= 0.0 {
        return None;
    }
    Some(flow_pax_per_hour / SECONDS_PER_HOUR / width / speed_mps)
}
