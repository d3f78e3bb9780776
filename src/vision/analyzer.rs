use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::gemini::{ImageInput, VisionModel};
use super::prompt;
use super::schema::{error_fallback, parse_model_output, VisionResult};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Turns an image into a validated [`VisionResult`].
///
/// A first pass whose overall confidence is below the threshold gets exactly
/// one re-analysis with the first result as context. Call errors never escape:
/// they degrade to a partial placeholder result.
pub struct VisionAnalyzer {
    model: Arc<dyn VisionModel>,
    confidence_threshold: f64,
}

impl VisionAnalyzer {
    pub fn new(model: Arc<dyn VisionModel>, confidence_threshold: f64) -> Self {
        Self {
            model,
            confidence_threshold,
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    #[instrument(skip(self, image), fields(model = self.model.name(), image_bytes = image.bytes.len()))]
    pub async fn analyze(&self, image: &ImageInput) -> VisionResult {
        let first = match self.model.generate(&prompt::analysis_prompt(), image).await {
            Ok(text) => parse_model_output(&text),
            Err(e) => {
                warn!(error = %e, "vision analysis call failed, using fallback");
                error_fallback(&e.to_string())
            }
        };

        let confidence = first.confidence();
        if confidence >= self.confidence_threshold {
            info!(status = first.status().as_str(), confidence, "vision analysis accepted");
            return first;
        }

        info!(
            confidence,
            threshold = self.confidence_threshold,
            "low confidence, re-analyzing with context"
        );
        self.reanalyze(image, first).await
    }

    async fn reanalyze(&self, image: &ImageInput, previous: VisionResult) -> VisionResult {
        let prompt = prompt::reanalysis_prompt(&previous);
        let refined = match self.model.generate(&prompt, image).await {
            Ok(text) => parse_model_output(&text),
            Err(e) => {
                warn!(error = %e, "re-analysis call failed, keeping first result");
                return previous;
            }
        };

        if refined.analysis().is_none() && previous.analysis().is_some() {
            warn!("re-analysis reported failure, keeping first result");
            return previous;
        }

        info!(
            status = refined.status().as_str(),
            confidence = refined.confidence(),
            previous_confidence = previous.confidence(),
            "re-analysis accepted"
        );
        refined
    }
}
