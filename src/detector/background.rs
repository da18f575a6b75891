use image::{GrayImage, Luma};
use tracing::debug;

/// Variance assigned to every pixel when the model is (re)seeded
const INITIAL_VARIANCE: f32 = 225.0;
/// Lower bound keeping perfectly static pixels from becoming hypersensitive
const MIN_VARIANCE: f32 = 16.0;

/// Adaptive per-pixel Gaussian estimate of the static scene.
///
/// Each pixel keeps a running mean and variance. A pixel is foreground when it
/// differs from its mean by more than `min_delta` intensity levels and its
/// squared distance exceeds `variance_threshold` variances. Every applied
/// frame is blended into the model at `learning_rate`, so a parked car turns
/// into background after a while.
#[derive(Debug, Clone)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
    learning_rate: f32,
    variance_threshold: f32,
    min_delta: f32,
    frames_seen: u64,
}

impl BackgroundModel {
    pub fn new(learning_rate: f32, variance_threshold: f32, min_delta: u8) -> Self {
        Self {
            width: 0,
            height: 0,
            mean: Vec::new(),
            variance: Vec::new(),
            learning_rate: learning_rate.clamp(f32::EPSILON, 1.0),
            variance_threshold: variance_threshold.max(0.0),
            min_delta: min_delta as f32,
            frames_seen: 0,
        }
    }

    /// Classify `frame` against the model, then fold it in.
    ///
    /// Returns a binary mask (255 = foreground). The first frame, or a frame
    /// whose size differs from the model, reseeds the model and yields an
    /// empty mask.
    pub fn apply(&mut self, frame: &GrayImage) -> GrayImage {
        let (width, height) = frame.dimensions();
        let mut mask = GrayImage::new(width, height);

        if !self.matches(frame) {
            self.seed(frame);
            return mask;
        }

        let rate = self.learning_rate;
        for ((pixel, out), (mean, variance)) in frame
            .pixels()
            .zip(mask.pixels_mut())
            .zip(self.mean.iter_mut().zip(self.variance.iter_mut()))
        {
            let value = pixel[0] as f32;
            let diff = value - *mean;
            let distance = diff * diff;

            if diff.abs() > self.min_delta
                && distance > self.variance_threshold * variance.max(MIN_VARIANCE)
            {
                *out = Luma([255]);
            }

            *mean += rate * diff;
            *variance = ((1.0 - rate) * *variance + rate * distance).max(MIN_VARIANCE);
        }

        self.frames_seen += 1;
        mask
    }

    /// Fold `frame` into the model without producing a mask
    pub fn learn(&mut self, frame: &GrayImage) {
        let _ = self.apply(frame);
    }

    pub fn is_initialized(&self) -> bool {
        self.frames_seen > 0
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Estimated background intensity at a pixel
    pub fn mean_at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.mean.get((y * self.width + x) as usize).copied()
    }

    pub fn reset(&mut self) {
        self.width = 0;
        self.height = 0;
        self.mean.clear();
        self.variance.clear();
        self.frames_seen = 0;
    }

    fn matches(&self, frame: &GrayImage) -> bool {
        self.frames_seen > 0 && frame.dimensions() == (self.width, self.height)
    }

    fn seed(&mut self, frame: &GrayImage) {
        let (width, height) = frame.dimensions();
        if self.frames_seen > 0 {
            debug!(
                "Frame size changed from {}x{} to {}x{}, reseeding background model",
                self.width, self.height, width, height
            );
        }
        self.width = width;
        self.height = height;
        self.mean = frame.pixels().map(|p| p[0] as f32).collect();
        self.variance = vec![INITIAL_VARIANCE; self.mean.len()];
        self.frames_seen = 1;
    }
}
