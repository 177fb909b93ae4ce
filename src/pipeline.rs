use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::classifier::Classifier;
use crate::error::ApiError;
use crate::labels::LabelSet;
use crate::models::Prediction;
use crate::preprocess::Preprocessor;
use crate::ranking;

/// Decode → classify → rank, for one persisted upload.
///
/// Cheap to clone; every field is shared read-only state built at startup.
#[derive(Clone)]
pub struct Predictor {
    classifier: Arc<dyn Classifier>,
    labels: Arc<LabelSet>,
    preprocessor: Preprocessor,
}

impl Predictor {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        labels: Arc<LabelSet>,
        preprocessor: Preprocessor,
    ) -> Self {
        Self {
            classifier,
            labels,
            preprocessor,
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    /// Blocking: decodes the image and runs the model on the calling thread.
    pub fn predict_file(&self, path: &Path, top_k: usize) -> Result<Vec<Prediction>, ApiError> {
        let start = Instant::now();
        let input = self.preprocessor.load(path)?;
        let decoded = start.elapsed();

        let probs = self.classifier.classify(input)?;
        let ranked = ranking::top_k(&probs, &self.labels, top_k)?;

        debug!(
            decode_us = decoded.as_micros() as u64,
            total_us = start.elapsed().as_micros() as u64,
            "Pipeline finished"
        );
        Ok(ranked)
    }
}
