use image::{GrayImage, Luma};
use std::path::Path;
use tracing::debug;

/// Fraction of processed frames in which each pixel was foreground.
///
/// Memory is one `f32` per analysed pixel no matter how long the camera runs.
#[derive(Debug, Clone, Default)]
pub struct MotionHeatmap {
    width: u32,
    height: u32,
    values: Vec<f32>,
    samples: u64,
}

impl MotionHeatmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one foreground mask into the running average
    pub fn accumulate(&mut self, mask: &GrayImage) {
        let (width, height) = mask.dimensions();
        if (width, height) != (self.width, self.height) {
            if self.samples > 0 {
                debug!(
                    "Heat map size changed from {}x{} to {}x{}, restarting",
                    self.width, self.height, width, height
                );
            }
            self.width = width;
            self.height = height;
            self.values = vec![0.0; (width * height) as usize];
            self.samples = 0;
        }

        self.samples += 1;
        let weight = 1.0 / self.samples as f32;
        for (value, pixel) in self.values.iter_mut().zip(mask.pixels()) {
            let hit = if pixel[0] > 0 { 1.0 } else { 0.0 };
            *value += (hit - *value) * weight;
        }
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn value_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get((y * self.width + x) as usize).copied()
    }

    /// Render as grayscale, 255 = foreground in every frame
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            let value = self.value_at(x, y).unwrap_or(0.0);
            Luma([(value.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), image::ImageError> {
        self.to_image().save(path)
    }
}
