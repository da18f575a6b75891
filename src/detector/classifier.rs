use super::background::BackgroundModel;
use super::heatmap::MotionHeatmap;
use super::regions::{connected_regions, open_mask, Region};
use crate::config::DetectorConfig;
use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Optional behaviours of a detector, chosen per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Honour `sample_interval_seconds` between processed frames
    pub rate_limiting: bool,
    /// Open the foreground mask before region extraction
    pub noise_filtering: bool,
    /// Keep a motion heat map of every classified mask
    pub heatmap: bool,
}

impl Capabilities {
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self {
            rate_limiting: config.rate_limiting,
            noise_filtering: config.noise_filtering,
            heatmap: config.heatmap,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            rate_limiting: true,
            noise_filtering: true,
            heatmap: false,
        }
    }
}

/// Regions found in one frame, largest first
#[derive(Debug, Clone, Default)]
pub struct Classification {
    pub regions: Vec<Region>,
}

impl Classification {
    pub fn largest_area(&self) -> u32 {
        self.regions.first().map(|region| region.area).unwrap_or(0)
    }

    pub fn qualifying(&self, min_area: u32) -> impl Iterator<Item = &Region> {
        self.regions
            .iter()
            .filter(move |region| region.qualifies(min_area))
    }

    pub fn has_motion(&self, min_area: u32) -> bool {
        self.qualifying(min_area).next().is_some()
    }
}

/// Background-subtraction classifier shared by every detector variant.
///
/// Frames are converted to luma and resized to `downsample_width` (aspect
/// preserved) before they reach the background model.
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    capabilities: Capabilities,
    downsample_width: u32,
    noise_kernel_radius: u8,
    model: BackgroundModel,
    heatmap: Option<MotionHeatmap>,
}

impl FrameClassifier {
    pub fn new(config: &DetectorConfig) -> Self {
        let capabilities = Capabilities::from_config(config);
        Self {
            capabilities,
            downsample_width: config.downsample_width.max(1),
            noise_kernel_radius: config.noise_kernel_radius,
            model: BackgroundModel::new(
                config.learning_rate,
                config.variance_threshold,
                config.min_delta,
            ),
            heatmap: capabilities.heatmap.then(MotionHeatmap::new),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Luma copy of `image` at the analysis width
    pub fn downsample(&self, image: &RgbImage) -> GrayImage {
        let gray = imageops::grayscale(image);
        let (width, height) = gray.dimensions();
        if width == self.downsample_width || width == 0 {
            return gray;
        }

        let target_height = ((height as f64 * self.downsample_width as f64 / width as f64)
            .round() as u32)
            .max(1);
        imageops::resize(&gray, self.downsample_width, target_height, FilterType::Triangle)
    }

    /// Feed a warm-up frame to the background model
    pub fn learn(&mut self, image: &RgbImage) {
        let gray = self.downsample(image);
        self.model.learn(&gray);
    }

    /// Foreground regions of `image` relative to the model, which is then
    /// updated with it
    pub fn classify(&mut self, image: &RgbImage) -> Classification {
        let gray = self.downsample(image);
        let mut mask = self.model.apply(&gray);

        if self.capabilities.noise_filtering {
            mask = open_mask(&mask, self.noise_kernel_radius);
        }

        if let Some(heatmap) = self.heatmap.as_mut() {
            heatmap.accumulate(&mask);
        }

        Classification {
            regions: connected_regions(&mask),
        }
    }

    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }

    pub fn heatmap(&self) -> Option<&MotionHeatmap> {
        self.heatmap.as_ref()
    }
}
