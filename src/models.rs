use serde::{Deserialize, Serialize};

/// One ranked label with its raw classifier probability.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Serialize)]
pub struct PredictionsResponse {
    pub predictions: Vec<Prediction>,
}

/// Top-1 response shape.
#[derive(Debug, Serialize)]
pub struct SingleResponse {
    pub prediction: String,
    pub confidence: f32,
}

impl From<Prediction> for SingleResponse {
    fn from(p: Prediction) -> Self {
        Self {
            prediction: p.label,
            confidence: p.confidence,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub labels: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Query string accepted by the predict endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct PredictQuery {
    pub top_k: Option<usize>,
}
