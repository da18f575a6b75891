use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};

/// Similarity of two frames on a 0-100 scale, 100 meaning identical
pub trait SimilarityMetric: Send + Sync {
    fn score(&self, reference: &RgbImage, candidate: &RgbImage) -> f64;
}

/// Equal-weight blend of normalised cross-correlation and luma histogram
/// correlation, computed after resizing both frames to `compare_width`.
#[derive(Debug, Clone)]
pub struct TemplateHistogramMetric {
    compare_width: u32,
}

impl TemplateHistogramMetric {
    pub fn new(compare_width: u32) -> Self {
        Self {
            compare_width: compare_width.max(1),
        }
    }

    pub fn compare_width(&self) -> u32 {
        self.compare_width
    }

    /// Comparison size derived from the reference aspect ratio
    fn compare_size(&self, reference: &RgbImage) -> (u32, u32) {
        let (width, height) = reference.dimensions();
        if width == 0 {
            return (self.compare_width, 1);
        }
        let scaled = (height as f64 * self.compare_width as f64 / width as f64).round() as u32;
        (self.compare_width, scaled.max(1))
    }
}

impl SimilarityMetric for TemplateHistogramMetric {
    fn score(&self, reference: &RgbImage, candidate: &RgbImage) -> f64 {
        let (width, height) = self.compare_size(reference);
        let reference = fit(reference, width, height);
        let candidate = fit(candidate, width, height);

        let template = normalized_cross_correlation(&reference, &candidate);
        let histogram = histogram_correlation(
            &luma_histogram(&imageops::grayscale(&reference)),
            &luma_histogram(&imageops::grayscale(&candidate)),
        );

        ((0.5 * template + 0.5 * histogram) * 100.0).clamp(-100.0, 100.0)
    }
}

fn fit(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}

/// Mean-subtracted correlation over every channel sample, in [-1, 1].
///
/// Two flat images count as identical when their levels match.
pub fn normalized_cross_correlation(a: &RgbImage, b: &RgbImage) -> f64 {
    let a = a.as_raw();
    let b = b.as_raw();
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let mean_a = a[..len].iter().map(|&v| v as f64).sum::<f64>() / len as f64;
    let mean_b = b[..len].iter().map(|&v| v as f64).sum::<f64>() / len as f64;

    let mut cross = 0.0;
    let mut energy_a = 0.0;
    let mut energy_b = 0.0;
    for (&va, &vb) in a[..len].iter().zip(&b[..len]) {
        let da = va as f64 - mean_a;
        let db = vb as f64 - mean_b;
        cross += da * db;
        energy_a += da * da;
        energy_b += db * db;
    }

    correlation(cross, energy_a, energy_b, (mean_a - mean_b).abs() < 0.5)
}

pub fn luma_histogram(image: &GrayImage) -> [f64; 256] {
    let mut bins = [0.0; 256];
    for pixel in image.pixels() {
        bins[pixel[0] as usize] += 1.0;
    }
    bins
}

/// Pearson correlation of two histograms, in [-1, 1]
pub fn histogram_correlation(a: &[f64; 256], b: &[f64; 256]) -> f64 {
    let mean_a = a.iter().sum::<f64>() / 256.0;
    let mean_b = b.iter().sum::<f64>() / 256.0;

    let mut cross = 0.0;
    let mut energy_a = 0.0;
    let mut energy_b = 0.0;
    for (&va, &vb) in a.iter().zip(b.iter()) {
        let da = va - mean_a;
        let db = vb - mean_b;
        cross += da * db;
        energy_a += da * da;
        energy_b += db * db;
    }

    correlation(cross, energy_a, energy_b, a == b)
}

fn correlation(cross: f64, energy_a: f64, energy_b: f64, equal_when_flat: bool) -> f64 {
    let denominator = (energy_a * energy_b).sqrt();
    if denominator > f64::EPSILON {
        (cross / denominator).clamp(-1.0, 1.0)
    } else if energy_a <= f64::EPSILON && energy_b <= f64::EPSILON && equal_when_flat {
        1.0
    } else {
        0.0
    }
}
