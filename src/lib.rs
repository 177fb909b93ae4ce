//! Plant species classification over HTTP.
//!
//! An uploaded photo is stored in a transient file, resized and normalised,
//! run through an ONNX classifier and answered with the top-k labels.

pub mod classifier;
pub mod config;
pub mod error;
pub mod handlers;
pub mod labels;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod ranking;
pub mod telemetry;
pub mod upload;

pub use classifier::{Classifier, ClassifierError, ModelError, OnnxClassifier};
pub use config::AppConfig;
pub use error::ApiError;
pub use handlers::AppState;
pub use labels::LabelSet;
pub use models::Prediction;
pub use pipeline::Predictor;
pub use preprocess::Preprocessor;
