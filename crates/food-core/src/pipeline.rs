//! Inference Pipeline
//!
//! Runs one upload through validate → decode → preprocess → infer → rank.
//! Batches run the same chain per file; a failing file becomes an error
//! entry and never aborts its siblings.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::{Activation, ServiceConfig};
use crate::decode::{ImageDecoder, RawUpload};
use crate::gateway::ModelGateway;
use crate::preprocess::Preprocessor;
use crate::ranking::{activate, rank};
use crate::types::ClassificationResult;
use crate::{Error, ErrorKind, Result};

/// Where a request is, or where it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Decoded,
    Preprocessed,
    Inferred,
    Ranked,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Decoded => "decoded",
            Stage::Preprocessed => "preprocessed",
            Stage::Inferred => "inferred",
            Stage::Ranked => "ranked",
        };
        f.write_str(name)
    }
}

/// Outcome of one file in a batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub filename: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Outcome of a whole batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub batch_results: Vec<BatchItem>,
    pub total_files: usize,
    pub successful_predictions: usize,
}

/// The per-request orchestration of decoder, preprocessor, gateway and ranker
pub struct InferencePipeline {
    decoder: ImageDecoder,
    preprocessor: Preprocessor,
    gateway: Arc<ModelGateway>,
    class_names: Arc<[String]>,
    activation: Activation,
    top_k: usize,
}

impl InferencePipeline {
    pub fn new(config: &ServiceConfig, gateway: Arc<ModelGateway>) -> Result<Self> {
        let preprocessor = Preprocessor::new(config.input_shape(), config.preprocess.normalization)?;
        if gateway.options().input_shape != preprocessor.shape() {
            return Err(Error::Config(format!(
                "gateway expects input {} but preprocessing produces {}",
                gateway.options().input_shape,
                preprocessor.shape()
            )));
        }
        if gateway.options().num_classes != config.classes.len() {
            return Err(Error::Config(format!(
                "gateway expects {} classes but {} are configured",
                gateway.options().num_classes,
                config.classes.len()
            )));
        }
        Ok(Self {
            decoder: ImageDecoder::new(&config.limits),
            preprocessor,
            gateway,
            class_names: config.classes.clone().into(),
            activation: config.model.activation,
            top_k: config.model.top_k,
        })
    }

    pub fn gateway(&self) -> &Arc<ModelGateway> {
        &self.gateway
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Classify one upload
    pub fn classify(&self, upload: &RawUpload) -> Result<ClassificationResult> {
        let start = Instant::now();
        let mut stage = Stage::Received;

        let result = self.run_stages(upload, &mut stage);
        match &result {
            Ok(prediction) => debug!(
                "Classified {} as {} ({:.1}%) in {:.2} ms",
                upload.display_name(),
                prediction.predicted_class,
                prediction.confidence * 100.0,
                start.elapsed().as_secs_f64() * 1000.0
            ),
            Err(e) if e.kind().is_client_error() => warn!(
                "Rejected {} after stage '{}': {}",
                upload.display_name(),
                stage,
                e
            ),
            Err(e) => error!(
                "Classification of {} failed after stage '{}': {}",
                upload.display_name(),
                stage,
                e
            ),
        }
        result
    }

    /// Classify every upload independently
    pub fn classify_batch(&self, uploads: &[RawUpload]) -> BatchOutcome {
        let batch_results: Vec<BatchItem> = uploads
            .iter()
            .map(|upload| match self.classify(upload) {
                Ok(prediction) => BatchItem {
                    filename: upload.filename.clone(),
                    success: true,
                    prediction: Some(prediction),
                    error: None,
                    error_kind: None,
                },
                Err(e) => BatchItem {
                    filename: upload.filename.clone(),
                    success: false,
                    prediction: None,
                    error: Some(e.to_string()),
                    error_kind: Some(e.kind()),
                },
            })
            .collect();

        let successful_predictions = batch_results.iter().filter(|r| r.success).count();
        BatchOutcome {
            total_files: uploads.len(),
            successful_predictions,
            batch_results,
        }
    }

    fn run_stages(&self, upload: &RawUpload, stage: &mut Stage) -> Result<ClassificationResult> {
        self.decoder.validate(upload)?;
        *stage = Stage::Validated;

        let image = crate::decode::decode_bytes(&upload.bytes)?;
        *stage = Stage::Decoded;

        let tensor = self.preprocessor.prepare(&image)?;
        *stage = Stage::Preprocessed;

        let scores = self.gateway.infer(&tensor)?;
        *stage = Stage::Inferred;

        let scores = activate(scores, self.activation);
        let ranked = rank(&scores, &self.class_names, self.top_k)?;
        *stage = Stage::Ranked;

        ClassificationResult::from_ranked(ranked)
            .ok_or_else(|| Error::Inference("no predictions to rank".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InferenceMode, LoadPolicy};
    use crate::gateway::GatewayOptions;
    use crate::runtime::{ClassifierModel, ModelLoader};
    use crate::types::{InputTensor, ScoreVector, TensorShape};
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedModel {
        shape: TensorShape,
        scores: Vec<f32>,
    }

    impl ClassifierModel for FixedModel {
        fn input_shape(&self) -> TensorShape {
            self.shape
        }

        fn run(&self, _input: &InputTensor) -> Result<ScoreVector> {
            Ok(self.scores.clone())
        }
    }

    struct FixedLoader {
        shape: TensorShape,
        scores: Vec<f32>,
        loads: AtomicUsize,
    }

    impl ModelLoader for FixedLoader {
        fn load(&self) -> Result<Box<dyn ClassifierModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedModel {
                shape: self.shape,
                scores: self.scores.clone(),
            }))
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    fn config(classes: &[&str]) -> ServiceConfig {
        let mut config = ServiceConfig::minang();
        config.auth.api_key = "k".to_string();
        config.model.input_size = crate::types::ImageDimensions::new(8, 8);
        config.classes = classes.iter().map(|s| s.to_string()).collect();
        config
    }

    fn pipeline(config: &ServiceConfig, scores: Vec<f32>) -> InferencePipeline {
        let loader = Arc::new(FixedLoader {
            shape: config.input_shape(),
            scores,
            loads: AtomicUsize::new(0),
        });
        let gateway = ModelGateway::new(
            loader,
            GatewayOptions {
                load_policy: LoadPolicy::Lazy,
                inference_mode: InferenceMode::Concurrent,
                input_shape: config.input_shape(),
                num_classes: config.classes.len(),
            },
        );
        InferencePipeline::new(config, Arc::new(gateway)).unwrap()
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 60, 30])));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_classify_single() {
        let config = config(&["a", "b", "c"]);
        let pipeline = pipeline(&config, vec![0.1, 0.7, 0.2]);

        let result = pipeline
            .classify(&RawUpload::new(png(30, 20)).with_filename("dish.png"))
            .unwrap();
        assert_eq!(result.predicted_class, "b");
        assert_eq!(result.confidence, 0.7);
        assert_eq!(result.all_predictions.len(), 3);
    }

    #[test]
    fn test_softmax_activation_applied() {
        let mut config = config(&["mentah", "setengah_matang", "matang"]);
        config.model.activation = Activation::Softmax;
        let pipeline = pipeline(&config, vec![-1.0, 3.0, 0.5]);

        let result = pipeline.classify(&RawUpload::new(png(4, 4))).unwrap();
        assert_eq!(result.predicted_class, "setengah_matang");
        let total: f32 = result.all_predictions.iter().map(|p| p.confidence).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_label_count_mismatch_surfaces() {
        let config = config(&["a", "b"]);
        let pipeline = pipeline(&config, vec![0.1, 0.7, 0.2]);
        let err = pipeline.classify(&RawUpload::new(png(4, 4))).unwrap_err();
        assert!(matches!(err, Error::LabelCountMismatch { scores: 3, labels: 2 }));
    }

    #[test]
    fn test_oversized_upload_never_reaches_model() {
        let mut config = config(&["a", "b", "c"]);
        config.limits.max_upload_bytes = 16;
        let pipeline = pipeline(&config, vec![0.1, 0.7, 0.2]);

        let err = pipeline.classify(&RawUpload::new(png(8, 8))).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(pipeline.gateway().stats().inference_calls, 0);
        assert!(!pipeline.gateway().is_loaded());
    }

    #[test]
    fn test_batch_isolates_failures() {
        let config = config(&["a", "b", "c"]);
        let pipeline = pipeline(&config, vec![0.1, 0.7, 0.2]);

        let uploads = vec![
            RawUpload::new(png(10, 10)).with_filename("one.png"),
            RawUpload::new(b"garbage".to_vec()).with_filename("two.png"),
            RawUpload::new(png(3, 7)).with_filename("three.png"),
        ];
        let outcome = pipeline.classify_batch(&uploads);

        assert_eq!(outcome.total_files, 3);
        assert_eq!(outcome.successful_predictions, 2);
        assert!(outcome.batch_results[0].prediction.is_some());
        assert!(!outcome.batch_results[1].success);
        assert_eq!(outcome.batch_results[1].error_kind, Some(ErrorKind::InvalidImage));
        assert!(outcome.batch_results[1].error.is_some());
        assert!(outcome.batch_results[2].prediction.is_some());
        assert_eq!(outcome.batch_results[2].filename.as_deref(), Some("three.png"));
    }

    #[test]
    fn test_mismatched_gateway_rejected() {
        let config = config(&["a", "b", "c"]);
        let loader = Arc::new(FixedLoader {
            shape: config.input_shape(),
            scores: vec![],
            loads: AtomicUsize::new(0),
        });
        let gateway = ModelGateway::new(
            loader,
            GatewayOptions {
                load_policy: LoadPolicy::Lazy,
                inference_mode: InferenceMode::Concurrent,
                input_shape: config.input_shape(),
                num_classes: 5,
            },
        );
        assert!(InferencePipeline::new(&config, Arc::new(gateway)).is_err());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Preprocessed.to_string(), "preprocessed");
    }
}
