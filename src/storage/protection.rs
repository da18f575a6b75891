use crate::config::StorageConfig;
use crate::error::StorageError;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Decides whether an image is valuable enough to survive normal eviction
pub trait ContentGuard: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(true)` when the image must be kept unless space is critical
    fn is_protected(&self, path: &Path) -> Result<bool, StorageError>;
}

/// Protects nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProtection;

impl ContentGuard for NoProtection {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_protected(&self, _path: &Path) -> Result<bool, StorageError> {
        Ok(false)
    }
}

/// Pick the person score out of a model's first output.
///
/// With `class_index` unset the output must hold exactly one score.
#[cfg_attr(not(feature = "person_detection"), allow(dead_code))]
pub(crate) fn person_score(
    scores: &[f32],
    class_index: Option<usize>,
) -> Result<f32, StorageError> {
    let score = match class_index {
        Some(index) => scores.get(index).copied().ok_or_else(|| StorageError::Protection {
            details: format!(
                "person_class_index {} is out of range for {} model outputs",
                index,
                scores.len()
            ),
        })?,
        None => match scores {
            [score] => *score,
            _ => {
                return Err(StorageError::Protection {
                    details: format!(
                        "model produced {} scores; set person_class_index to pick the person class",
                        scores.len()
                    ),
                })
            }
        },
    };

    Ok(if score.is_finite() { score } else { 0.0 })
}

/// Guard selected by configuration
pub fn build_guard(config: &StorageConfig) -> Result<Arc<dyn ContentGuard>, StorageError> {
    let Some(model_path) = config.person_model_path.as_deref() else {
        info!("No person model configured, cold storage images are unprotected");
        return Ok(Arc::new(NoProtection));
    };

    #[cfg(feature = "person_detection")]
    {
        let (width, height) = config.person_model_input;
        let guard = onnx::OnnxPersonGuard::new(model_path, width, height)?
            .with_threshold(config.person_confidence)
            .with_class_index(config.person_class_index);
        info!("Person protection enabled with model {}", model_path);
        Ok(Arc::new(guard))
    }

    #[cfg(not(feature = "person_detection"))]
    {
        tracing::warn!(
            "person_model_path '{}' ignored: built without the `person_detection` feature",
            model_path
        );
        Ok(Arc::new(NoProtection))
    }
}

#[cfg(feature = "person_detection")]
pub use onnx::OnnxPersonGuard;

#[cfg(feature = "person_detection")]
mod onnx {
    use super::{person_score, ContentGuard};
    use crate::error::StorageError;
    use image::imageops::{self, FilterType};
    use parking_lot::Mutex;
    use std::path::Path;
    use tracing::debug;
    use tract_onnx::prelude::*;

    type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

    /// Person classifier over a local ONNX model taking `1x3xHxW` RGB input
    /// scaled to 0..1; the image is protected when the person score reaches
    /// the threshold.
    pub struct OnnxPersonGuard {
        model: Mutex<Plan>,
        width: u32,
        height: u32,
        confidence_threshold: f32,
        class_index: Option<usize>,
    }

    impl OnnxPersonGuard {
        pub fn new(model_path: &str, width: u32, height: u32) -> Result<Self, StorageError> {
            let load_error = |stage: &str, e: TractError| StorageError::Protection {
                details: format!("{} ({}): {}", stage, model_path, e),
            };

            let model = tract_onnx::onnx()
                .model_for_path(model_path)
                .map_err(|e| load_error("failed to load ONNX model", e))?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, height as usize, width as usize),
                    ),
                )
                .map_err(|e| load_error("failed to set input fact", e))?
                .into_optimized()
                .map_err(|e| load_error("failed to optimize ONNX model", e))?
                .into_runnable()
                .map_err(|e| load_error("failed to build runnable ONNX model", e))?;

            Ok(Self {
                model: Mutex::new(model),
                width,
                height,
                confidence_threshold: 0.5,
                class_index: None,
            })
        }

        pub fn with_threshold(mut self, threshold: f32) -> Self {
            self.confidence_threshold = threshold;
            self
        }

        pub fn with_class_index(mut self, class_index: Option<usize>) -> Self {
            self.class_index = class_index;
            self
        }

        fn build_input(&self, path: &Path) -> Result<Tensor, StorageError> {
            let image = crate::filter::load_rgb(path).map_err(|e| StorageError::Protection {
                details: e.to_string(),
            })?;
            let image = imageops::resize(&image, self.width, self.height, FilterType::Triangle);

            let width = self.width as usize;
            let pixels = image.as_raw();
            let input = tract_ndarray::Array4::from_shape_fn(
                (1, 3, self.height as usize, width),
                |(_, channel, y, x)| pixels[(y * width + x) * 3 + channel] as f32 / 255.0,
            );
            Ok(input.into_tensor())
        }
    }

    impl ContentGuard for OnnxPersonGuard {
        fn name(&self) -> &'static str {
            "onnx-person"
        }

        fn is_protected(&self, path: &Path) -> Result<bool, StorageError> {
            let input = self.build_input(path)?;
            let outputs = self
                .model
                .lock()
                .run(tvec!(input.into()))
                .map_err(|e| StorageError::Protection {
                    details: format!("ONNX inference failed: {}", e),
                })?;

            let output = outputs.first().ok_or_else(|| StorageError::Protection {
                details: "model produced no outputs".to_string(),
            })?;
            let scores = output
                .to_array_view::<f32>()
                .map_err(|e| StorageError::Protection {
                    details: format!("model output tensor was not f32: {}", e),
                })?;
            let scores: Vec<f32> = scores.iter().copied().collect();
            let confidence = person_score(&scores, self.class_index)?;

            debug!(
                "Person confidence {:.3} for {} (threshold {:.3})",
                confidence,
                path.display(),
                self.confidence_threshold
            );
            Ok(confidence >= self.confidence_threshold)
        }
    }
}
