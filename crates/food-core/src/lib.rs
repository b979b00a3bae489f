//! # Food Classifier Core
//!
//! The inference request pipeline behind the food classification service:
//! validate → decode → preprocess → infer → rank.
//!
//! ## Modules
//!
//! - `decode`: upload validation and decoding to RGB
//! - `preprocess`: resize and normalisation into the model's input tensor
//! - `gateway`: single owner of the loaded classifier, eager or lazy loading
//! - `runtime`: model runtime seam and the ONNX backend
//! - `ranking`: top-k ranking of model scores
//! - `pipeline`: per-request orchestration, single and batch
//! - `config`, `error`, `logging`: ambient concerns
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use food_core::{GatewayOptions, InferencePipeline, ModelGateway, OnnxModelLoader, RawUpload, ServiceConfig};
//!
//! let config = ServiceConfig::minang();
//! let loader = Arc::new(OnnxModelLoader::new(&config.model.path, config.input_shape()));
//! let gateway = ModelGateway::start(loader, GatewayOptions::from_config(&config))?;
//! let pipeline = InferencePipeline::new(&config, Arc::new(gateway))?;
//! let result = pipeline.classify(&RawUpload::new(std::fs::read("rendang.jpg")?))?;
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod pipeline;
pub mod preprocess;
pub mod ranking;
pub mod runtime;
pub mod types;

pub use config::{
    load_toml_config, Activation, InferenceMode, LoadPolicy, Normalization, ServiceConfig,
};
pub use decode::{DecodedImage, ImageDecoder, RawUpload};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{ClassifierHandle, GatewayOptions, GatewayStats, ModelGateway};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use pipeline::{BatchItem, BatchOutcome, InferencePipeline, Stage};
pub use preprocess::Preprocessor;
pub use ranking::rank;
pub use runtime::{ClassifierModel, ModelLoader, OnnxModelLoader};
pub use types::{
    food_classes, ClassificationResult, FoodClass, ImageDimensions, InputTensor, Prediction,
    ScoreVector, TensorLayout, TensorShape,
};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
