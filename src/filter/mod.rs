mod dedup;
mod similarity;

pub use dedup::{FilterOutcome, SimilarityFilter};
pub(crate) use dedup::{is_jpeg_name, load_rgb};
pub use similarity::{
    histogram_correlation, luma_histogram, normalized_cross_correlation, SimilarityMetric,
    TemplateHistogramMetric,
};
