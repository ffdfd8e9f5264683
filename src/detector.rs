//! Multi-scale sliding-window scan.
//!
//! The window grows from `min_size` by `scale_factor` until it exceeds
//! `max_size`. At each size the window center moves in steps of
//! `shift_factor * size` over every position where the window fits inside
//! the image, and the forest is evaluated on each one. Windows that survive
//! every stage become raw [`Detection`]s.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::{make_feature_extractor, GrayImage, Rotation, WindowTransform};
use crate::model::CascadeForest;
use crate::types::Detection;

/// Parameters of the sliding-window scan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanParams {
    /// Smallest window side in pixels.
    pub min_size: u32,
    /// Largest window side in pixels.
    pub max_size: u32,
    /// Window step as a fraction of the window size.
    pub shift_factor: f64,
    /// Growth factor between window sizes, must exceed 1.
    pub scale_factor: f64,
    /// In-plane rotation of the sampling pattern as a fraction of a full turn.
    pub angle: f64,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            min_size: 20,
            max_size: 1000,
            shift_factor: 0.15,
            scale_factor: 1.1,
            angle: 0.0,
        }
    }
}

impl ScanParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.scale_factor > 1.0) {
            return Err(Error::Config(format!(
                "scale factor must be greater than 1, got {}",
                self.scale_factor
            )));
        }
        if self.min_size == 0 {
            return Err(Error::Config("minimum window size must be at least 1".into()));
        }
        if self.max_size < self.min_size {
            return Err(Error::Config(format!(
                "maximum window size {} is below minimum {}",
                self.max_size, self.min_size
            )));
        }
        if !(self.shift_factor > 0.0 && self.shift_factor <= 1.0) {
            return Err(Error::Config(format!(
                "shift factor must be in (0, 1], got {}",
                self.shift_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.angle) {
            return Err(Error::Config(format!(
                "angle must be a fraction of a turn in [0, 1], got {}",
                self.angle
            )));
        }
        Ok(())
    }

    /// Window sizes visited by the scan, smallest first.
    pub fn window_sizes(&self) -> impl Iterator<Item = u32> {
        let max_size = self.max_size;
        let scale_factor = self.scale_factor;
        std::iter::successors(Some(self.min_size), move |&size| {
            // Truncation can stall small windows, always advance by a pixel
            let next = ((size as f64 * scale_factor) as u32).max(size.saturating_add(1));
            (next > size).then_some(next)
        })
        .take_while(move |&size| size <= max_size)
    }

    /// Distance between neighbouring window centers at `size`.
    pub fn step(&self, size: u32) -> usize {
        ((self.shift_factor * size as f64) as usize).max(1)
    }
}

/// Scan `image` with `forest` and return every window the cascade accepts.
///
/// An image without faces yields an empty vector. Zero-sized images fail
/// with [`Error::Input`], invalid parameters with [`Error::Config`].
pub fn run_cascade(
    forest: &CascadeForest,
    image: &GrayImage,
    params: &ScanParams,
) -> Result<Vec<Detection>> {
    params.validate()?;

    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(Error::Input(format!("degenerate image {}x{}", width, height)));
    }

    let rotation = Rotation::new(params.angle);
    let mut detections = Vec::new();

    for size in params.window_sizes() {
        let offset = size / 2 + 1;
        match offset.checked_mul(2) {
            Some(span) if span <= width && span <= height => {}
            _ => break,
        }

        let step = params.step(size);
        let rows: Vec<u32> = (offset..=height - offset).step_by(step).collect();
        let cols: Vec<u32> = (offset..=width - offset).step_by(step).collect();
        let transform = rotation.at_scale(size);

        let found = scan_rows(&rows, |row| scan_row(forest, image, row, &cols, size, &transform));
        tracing::trace!(
            "window {}px: {}x{} positions, {} accepted",
            size,
            rows.len(),
            cols.len(),
            found.len()
        );
        detections.extend(found);
    }

    tracing::debug!(
        "Cascade scan of {}x{} image produced {} raw detections",
        width,
        height,
        detections.len()
    );
    Ok(detections)
}

fn scan_row(
    forest: &CascadeForest,
    image: &GrayImage,
    row: u32,
    cols: &[u32],
    size: u32,
    transform: &WindowTransform,
) -> Vec<Detection> {
    cols.iter()
        .filter_map(|&col| {
            let get_feature = make_feature_extractor(image, row, col, transform);
            forest
                .classify(get_feature)
                .map(|confidence| Detection::new(row, col, size, confidence))
        })
        .collect()
}

#[cfg(feature = "parallel")]
fn scan_rows<F>(rows: &[u32], scan: F) -> Vec<Detection>
where
    F: Fn(u32) -> Vec<Detection> + Sync + Send,
{
    use rayon::prelude::*;

    rows.par_iter().flat_map_iter(|&row| scan(row)).collect()
}

#[cfg(not(feature = "parallel"))]
fn scan_rows<F>(rows: &[u32], scan: F) -> Vec<Detection>
where
    F: Fn(u32) -> Vec<Detection>,
{
    rows.iter().flat_map(|&row| scan(row)).collect()
}
