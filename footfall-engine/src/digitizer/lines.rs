//! Series line extraction from chart images
//!
//! Lines are told apart by colour alone: after quantization the most common
//! colour is background and the next few are taken to be the plotted series.
//! Axis text and gridlines that survive the crop can outrank a faint series;
//! a different strategy slots in behind [`LineExtractor`].

use super::components::{filter_small_components, Mask};
use footfall_common::config::{CropMargins, OpticalConfig};
use image::{imageops, Rgb, RgbImage};
use std::collections::HashMap;
use tracing::debug;

/// One recovered line in cropped pixel space
///
/// `columns` is contiguous from the first to the last observed column;
/// `rows` holds the line's vertical centre at each column.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelSeries {
    pub columns: Vec<f64>,
    pub rows: Vec<f64>,
}

/// Strategy turning a chart image into pixel-space series
pub trait LineExtractor: Send + Sync {
    fn extract(&self, image: &RgbImage) -> Vec<PixelSeries>;
}

/// Colour-ranking extractor
#[derive(Debug, Clone)]
pub struct ColorRankExtractor {
    crop: CropMargins,
    color_levels: u8,
    line_count: usize,
    min_component_area: usize,
}

impl ColorRankExtractor {
    pub fn new(crop: CropMargins, color_levels: u8, line_count: usize, min_component_area: usize) -> Self {
        Self {
            crop,
            color_levels: color_levels.max(2),
            line_count,
            min_component_area,
        }
    }

    pub fn from_config(config: &OpticalConfig) -> Self {
        Self::new(
            config.crop,
            config.color_levels,
            config.line_count,
            config.min_component_area,
        )
    }

    fn crop(&self, image: &RgbImage) -> Option<RgbImage> {
        let c = &self.crop;
        let width = image.width().checked_sub(c.left + c.right)?;
        let height = image.height().checked_sub(c.top + c.bottom)?;
        if width == 0 || height == 0 {
            return None;
        }
        Some(imageops::crop_imm(image, c.left, c.top, width, height).to_image())
    }

    fn quantize(&self, image: &mut RgbImage) {
        let factor = 256 / u16::from(self.color_levels);
        for pixel in image.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                *channel = ((u16::from(*channel) / factor) * factor) as u8;
            }
        }
    }
}

impl LineExtractor for ColorRankExtractor {
    fn extract(&self, image: &RgbImage) -> Vec<PixelSeries> {
        let Some(mut img) = self.crop(image) else {
            debug!(
                width = image.width(),
                height = image.height(),
                "Image smaller than crop margins"
            );
            return Vec::new();
        };
        self.quantize(&mut img);

        let ranked = rank_colors(&img);
        debug!("Found {} unique quantized colours", ranked.len());

        ranked
            .iter()
            .skip(1)
            .take(self.line_count)
            .filter_map(|colour| {
                debug!(?colour, "Extracting line");
                let mask = colour_mask(&img, *colour);
                let (filtered, segments) = filter_small_components(&mask, self.min_component_area);
                debug!(?colour, segments, "Line segments found");
                column_centres(&filtered).and_then(|(cols, rows)| interpolate(&cols, &rows))
            })
            .collect()
    }
}

/// Colours ordered by pixel coverage, most common first
fn rank_colors(image: &RgbImage) -> Vec<Rgb<u8>> {
    let mut counts: HashMap<[u8; 3], usize> = HashMap::new();
    for pixel in image.pixels() {
        *counts.entry(pixel.0).or_default() += 1;
    }
    let mut ranked: Vec<([u8; 3], usize)> = counts.into_iter().collect();
    // Colour breaks ties so ranking is deterministic
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(c, _)| Rgb(c)).collect()
}

fn colour_mask(image: &RgbImage, colour: Rgb<u8>) -> Mask {
    let mut mask = Mask::new(image.width() as usize, image.height() as usize);
    for (x, y, pixel) in image.enumerate_pixels() {
        if *pixel == colour {
            mask.set(x as usize, y as usize, true);
        }
    }
    mask
}

/// Mean row of the mask per occupied column, in column order
fn column_centres(mask: &Mask) -> Option<(Vec<f64>, Vec<f64>)> {
    let mut columns = Vec::new();
    let mut rows = Vec::new();
    for x in 0..mask.width {
        let (sum, n) = (0..mask.height)
            .filter(|&y| mask.get(x, y))
            .fold((0usize, 0usize), |(s, n), y| (s + y, n + 1));
        if n > 0 {
            columns.push(x as f64);
            rows.push(sum as f64 / n as f64);
        }
    }
    (!columns.is_empty()).then_some((columns, rows))
}

/// Fill every integer column between the first and last known one
fn interpolate(columns: &[f64], rows: &[f64]) -> Option<PixelSeries> {
    let first = *columns.first()? as i64;
    let last = *columns.last()? as i64;

    let mut out_cols = Vec::with_capacity((last - first + 1) as usize);
    let mut out_rows = Vec::with_capacity(out_cols.capacity());
    let mut seg = 0;
    for c in first..=last {
        let c = c as f64;
        while seg + 1 < columns.len() && columns[seg + 1] <= c {
            seg += 1;
        }
        let row = if columns[seg] == c || seg + 1 == columns.len() {
            rows[seg]
        } else {
            let t = (c - columns[seg]) / (columns[seg + 1] - columns[seg]);
            rows[seg] + t * (rows[seg + 1] - rows[seg])
        };
        out_cols.push(c);
        out_rows.push(row);
    }
    Some(PixelSeries {
        columns: out_cols,
        rows: out_rows,
    })
}
