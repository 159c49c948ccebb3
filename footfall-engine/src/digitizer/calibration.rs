//! Pixel to data space calibration
//!
//! Each axis is mapped independently: `data = pixel * scale + offset`.

use footfall_common::config::CalibrationPoints;
use footfall_common::{Error, Result};

/// Affine map for one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisCalibration {
    pub scale: f64,
    pub offset: f64,
}

impl AxisCalibration {
    /// Fit through two `(pixel, data)` correspondences
    pub fn from_two_points(pix_1: f64, data_1: f64, pix_2: f64, data_2: f64) -> Option<Self> {
        let span = pix_2 - pix_1;
        if span == 0.0 || !span.is_finite() {
            return None;
        }
        let scale = (data_2 - data_1) / span;
        let offset = data_1 - pix_1 * scale;
        Some(Self { scale, offset })
    }

    #[inline]
    pub fn apply(&self, pixel: f64) -> f64 {
        pixel * self.scale + self.offset
    }
}

/// Per-axis calibration of one chart
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationTransform {
    pub x: AxisCalibration,
    pub y: AxisCalibration,
}

impl CalibrationTransform {
    /// Build from two reference points; coincident pixels on either axis fail
    pub fn from_points(points: &CalibrationPoints) -> Result<Self> {
        let axis = |i: usize, name: &str| {
            AxisCalibration::from_two_points(
                points.pix_1[i],
                points.data_1[i],
                points.pix_2[i],
                points.data_2[i],
            )
            .ok_or_else(|| {
                Error::Calibration(format!(
                    "both reference points sit at {} pixel {}, scale would divide by zero",
                    name, points.pix_1[i]
                ))
            })
        };
        Ok(Self {
            x: axis(0, "x")?,
            y: axis(1, "y")?,
        })
    }

    /// Map pixel `(column, row)` into data space
    pub fn apply(&self, column: f64, row: f64) -> (f64, f64) {
        (self.x.apply(column), self.y.apply(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> CalibrationPoints {
        CalibrationPoints {
            pix_1: [24.0, 205.0],
            data_1: [1.0, 250e3],
            pix_2: [820.0, 51.0],
            data_2: [52.0, 400e3],
        }
    }

    #[test]
    fn test_reference_points_map_exactly() {
        let t = CalibrationTransform::from_points(&points()).unwrap();
        let (x1, y1) = t.apply(24.0, 205.0);
        let (x2, y2) = t.apply(820.0, 51.0);
        assert!((x1 - 1.0).abs() < 1e-9);
        assert!((y1 - 250e3).abs() < 1e-6);
        assert!((x2 - 52.0).abs() < 1e-9);
        assert!((y2 - 400e3).abs() < 1e-6);
    }

    #[test]
    fn test_transform_is_affine() {
        let t = CalibrationTransform::from_points(&points()).unwrap();
        let (xa, ya) = t.apply(100.0, 80.0);
        let (xb, yb) = t.apply(300.0, 160.0);
        let (xm, ym) = t.apply(200.0, 120.0);
        assert!((xm - (xa + xb) / 2.0).abs() < 1e-9);
        assert!((ym - (ya + yb) / 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_inverted_y_axis() {
        // Rows grow downward while values grow upward
        let t = CalibrationTransform::from_points(&points()).unwrap();
        assert!(t.y.scale < 0.0);
    }

    #[test]
    fn test_coincident_pixels_rejected() {
        let mut p = points();
        p.pix_2[1] = p.pix_1[1];
        assert!(matches!(
            CalibrationTransform::from_points(&p),
            Err(Error::Calibration(_))
        ));

        let mut p = points();
        p.pix_2[0] = p.pix_1[0];
        assert!(matches!(
            CalibrationTransform::from_points(&p),
            Err(Error::Calibration(_))
        ));
    }
}
