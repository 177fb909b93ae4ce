//! The black-box classifier and its ONNX implementation.

use ndarray::Array4;
use std::path::Path;
use thiserror::Error;
use tract_onnx::prelude::*;
use tracing::{debug, info};

use crate::config::{ModelConfig, SUPPORTED_MODEL_FORMAT};

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("Classifier returned no output")]
    NoOutput,
}

/// Errors raised while loading the classifier artifact at startup.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    NotFound(String),
    #[error("model format version {found} is not supported (expected {expected})")]
    UnsupportedFormat { found: u32, expected: u32 },
    #[error("model uses operators the runtime does not implement: {}", .0.join(", "))]
    UnsupportedOps(Vec<String>),
    #[error("model has {outputs} outputs per image but {labels} labels are configured")]
    LabelMismatch { outputs: usize, labels: usize },
    #[error("failed to load model: {0}")]
    Load(String),
}

/// Maps one preprocessed image batch to a probability vector.
///
/// Implementations are shared across worker threads and must not mutate
/// themselves while classifying.
pub trait Classifier: Send + Sync {
    fn classify(&self, input: Array4<f32>) -> Result<Vec<f32>, ClassifierError>;

    /// Length of the probability vector, when known ahead of time.
    fn output_len(&self) -> Option<usize> {
        None
    }
}

/// Classifier backed by an ONNX graph optimised and run by tract.
pub struct OnnxClassifier {
    plan: OnnxPlan,
    output_len: Option<usize>,
}

impl OnnxClassifier {
    /// Load, type-check and optimise the artifact described by `config`.
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        if config.format_version != SUPPORTED_MODEL_FORMAT {
            return Err(ModelError::UnsupportedFormat {
                found: config.format_version,
                expected: SUPPORTED_MODEL_FORMAT,
            });
        }

        let path: &Path = config.path.as_ref();
        if !path.exists() {
            return Err(ModelError::NotFound(path.display().to_string()));
        }

        info!(path = %path.display(), "Loading ONNX model");

        let model = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| ModelError::Load(format!("{:#}", e)))?;

        let unsupported: Vec<String> = model
            .nodes()
            .iter()
            .map(|node| node.op.name().to_string())
            .filter(|name| name.starts_with("Unimplemented"))
            .collect();
        if !unsupported.is_empty() {
            return Err(ModelError::UnsupportedOps(unsupported));
        }

        let shape = config.layout.shape(config.input_size);

        let typed = model
            .with_input_fact(0, f32::fact(shape).into())
            .and_then(|m| m.into_optimized())
            .map_err(|e| ModelError::Load(format!("{:#}", e)))?;

        let output_len = typed
            .output_fact(0)
            .ok()
            .and_then(|fact| fact.shape.as_concrete().and_then(|dims| dims.last().copied()));

        let plan = typed
            .into_runnable()
            .map_err(|e| ModelError::Load(format!("{:#}", e)))?;

        info!(input = ?shape, output_len = ?output_len, "Model loaded successfully");

        Ok(Self { plan, output_len })
    }
}

impl Classifier for OnnxClassifier {
    fn classify(&self, input: Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
        let tensor: Tensor = input.into();
        let result = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))?;

        let output = result.first().ok_or(ClassifierError::NoOutput)?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| ClassifierError::Inference(format!("{:#}", e)))?;

        debug!(shape = ?view.shape(), "Inference complete");
        Ok(view.iter().copied().collect())
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }
}

/// Fail loudly when the classifier's declared output width disagrees
/// with the label set.
pub fn check_label_count(classifier: &dyn Classifier, labels: usize) -> Result<(), ModelError> {
    match classifier.output_len() {
        Some(outputs) if outputs != labels => Err(ModelError::LabelMismatch { outputs, labels }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;
    use tract_onnx::pb;

    const ONNX_FLOAT: i32 = 1;
    const ONNX_INT64: i32 = 7;

    fn float_value(name: &str, dims: &[i64]) -> pb::ValueInfoProto {
        let dim = dims
            .iter()
            .map(|&d| pb::tensor_shape_proto::Dimension {
                value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(d)),
                ..Default::default()
            })
            .collect();
        pb::ValueInfoProto {
            name: name.to_string(),
            r#type: Some(pb::TypeProto {
                value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                    elem_type: ONNX_FLOAT,
                    shape: Some(pb::TensorShapeProto { dim }),
                })),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node(op: &str, inputs: &[&str], output: &str) -> pb::NodeProto {
        pb::NodeProto {
            name: format!("{}_node", op.to_lowercase()),
            op_type: op.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            ..Default::default()
        }
    }

    /// Serialise a one-input graph over a `[1, 2, 2, 3]` image to a temp file.
    fn write_model(
        nodes: Vec<pb::NodeProto>,
        initializer: Vec<pb::TensorProto>,
        output_dims: &[i64],
    ) -> NamedTempFile {
        let model = pb::ModelProto {
            ir_version: 7,
            opset_import: vec![pb::OperatorSetIdProto {
                domain: String::new(),
                version: 13,
            }],
            graph: Some(pb::GraphProto {
                name: "tiny".to_string(),
                node: nodes,
                initializer,
                input: vec![float_value("image", &[1, 2, 2, 3])],
                output: vec![float_value("probs", output_dims)],
                ..Default::default()
            }),
            ..Default::default()
        };

        let file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        std::fs::write(file.path(), model.encode_to_vec()).unwrap();
        file
    }

    /// Flattens the image to 12 values and applies softmax.
    fn softmax_model() -> NamedTempFile {
        let shape = pb::TensorProto {
            name: "flat_shape".to_string(),
            dims: vec![2],
            data_type: ONNX_INT64,
            int64_data: vec![1, 12],
            ..Default::default()
        };
        write_model(
            vec![
                node("Reshape", &["image", "flat_shape"], "flat"),
                node("Softmax", &["flat"], "probs"),
            ],
            vec![shape],
            &[1, 12],
        )
    }

    fn tiny_config(path: &Path) -> ModelConfig {
        ModelConfig {
            path: path.to_path_buf(),
            input_size: 2,
            ..ModelConfig::default()
        }
    }

    struct Fixed(Option<usize>);

    impl Classifier for Fixed {
        fn classify(&self, _input: Array4<f32>) -> Result<Vec<f32>, ClassifierError> {
            Ok(vec![])
        }

        fn output_len(&self) -> Option<usize> {
            self.0
        }
    }

    #[test]
    fn test_missing_model_is_fatal() {
        let config = ModelConfig {
            path: PathBuf::from("/nonexistent/plant.onnx"),
            ..ModelConfig::default()
        };
        assert!(matches!(OnnxClassifier::load(&config), Err(ModelError::NotFound(_))));
    }

    #[test]
    fn test_unknown_format_version() {
        let config = ModelConfig {
            format_version: 7,
            ..ModelConfig::default()
        };
        assert!(matches!(
            OnnxClassifier::load(&config),
            Err(ModelError::UnsupportedFormat { found: 7, expected: 1 })
        ));
    }

    #[test]
    fn test_garbage_model_fails_to_load() {
        let file = tempfile::Builder::new().suffix(".onnx").tempfile().unwrap();
        std::fs::write(file.path(), b"not a protobuf").unwrap();
        let config = ModelConfig {
            path: file.path().to_path_buf(),
            ..ModelConfig::default()
        };
        assert!(matches!(OnnxClassifier::load(&config), Err(ModelError::Load(_))));
    }

    #[test]
    fn test_onnx_softmax_model_runs() {
        let file = softmax_model();
        let classifier = OnnxClassifier::load(&tiny_config(file.path())).unwrap();
        assert_eq!(classifier.output_len(), Some(12));

        let input = Array4::from_shape_fn((1, 2, 2, 3), |(_, y, x, c)| (y + x + c) as f32 / 10.0);
        let probs = classifier.classify(input).unwrap();

        assert_eq!(probs.len(), 12);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        // largest input (y + x + c = 4) is the last flattened element
        let best = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i);
        assert_eq!(best, Some(11));
        assert!(check_label_count(&classifier, 12).is_ok());
        assert!(check_label_count(&classifier, 47).is_err());
    }

    #[test]
    fn test_unknown_operator_is_named() {
        let file = write_model(
            vec![node("TotallyMadeUpOp", &["image"], "probs")],
            vec![],
            &[1, 12],
        );
        match OnnxClassifier::load(&tiny_config(file.path())) {
            Err(ModelError::UnsupportedOps(ops)) => {
                assert_eq!(ops.len(), 1);
                assert!(ops[0].contains("TotallyMadeUpOp"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("model with an unknown operator loaded"),
        }
    }

    #[test]
    fn test_label_count_check() {
        assert!(check_label_count(&Fixed(Some(47)), 47).is_ok());
        assert!(check_label_count(&Fixed(None), 47).is_ok());
        assert!(matches!(
            check_label_count(&Fixed(Some(10)), 47),
            Err(ModelError::LabelMismatch { outputs: 10, labels: 47 })
        ));
    }
}
