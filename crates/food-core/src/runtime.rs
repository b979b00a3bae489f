//! Model runtime seam.
//!
//! The gateway only knows these two traits. `OnnxModelLoader` is the
//! production backend (tract, pure Rust); tests plug in their own.

use std::path::{Path, PathBuf};

use tract_onnx::prelude::*;

use crate::error::ResultExt;
use crate::types::{InputTensor, ScoreVector, TensorShape};
use crate::{Error, Result};

/// A loaded classifier
pub trait ClassifierModel: Send + Sync {
    /// Input shape the model was loaded for
    fn input_shape(&self) -> TensorShape;

    /// Width of the output score vector, when the runtime knows it up front
    fn output_len(&self) -> Option<usize> {
        None
    }

    /// Run one forward pass
    fn run(&self, input: &InputTensor) -> Result<ScoreVector>;
}

/// Produces a [`ClassifierModel`]; called at most once per successful load
pub trait ModelLoader: Send + Sync {
    fn load(&self) -> Result<Box<dyn ClassifierModel>>;

    /// Human-readable description of what is being loaded, for logs
    fn describe(&self) -> String;
}

type OnnxPlan = TypedSimplePlan<TypedModel>;

/// Loads an ONNX graph with its input pinned to a fixed shape
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    path: PathBuf,
    shape: TensorShape,
}

impl OnnxModelLoader {
    pub fn new(path: impl AsRef<Path>, shape: TensorShape) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            shape,
        }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<Box<dyn ClassifierModel>> {
        if !self.path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("model file not found: {}", self.path.display()),
            )));
        }

        let dims = self.shape.dims();
        let plan = tract_onnx::onnx()
            .model_for_path(&self.path)
            .and_then(|model| {
                model.with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(dims[0], dims[1], dims[2], dims[3])))
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| format!("{e:#}"))
            .with_context(|| format!("Failed to load ONNX model {}", self.path.display()))?;

        let output_len = output_width(&plan);
        Ok(Box::new(OnnxClassifier {
            plan,
            shape: self.shape,
            output_len,
        }))
    }

    fn describe(&self) -> String {
        format!("ONNX model {} (input {})", self.path.display(), self.shape)
    }
}

/// Number of classes in the first output, if the graph declares it
fn output_width(plan: &OnnxPlan) -> Option<usize> {
    let model = plan.model();
    let outlet = *model.output_outlets().ok()?.first()?;
    let fact = model.outlet_fact(outlet).ok()?;
    let dims = fact.shape.as_concrete()?;
    dims.last().copied()
}

struct OnnxClassifier {
    plan: OnnxPlan,
    shape: TensorShape,
    output_len: Option<usize>,
}

impl ClassifierModel for OnnxClassifier {
    fn input_shape(&self) -> TensorShape {
        self.shape
    }

    fn output_len(&self) -> Option<usize> {
        self.output_len
    }

    fn run(&self, input: &InputTensor) -> Result<ScoreVector> {
        let tensor = Tensor::from_shape(&input.shape().dims(), input.data())
            .map_err(|e| Error::Inference(format!("building input tensor: {e:#}")))?;

        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| Error::Inference(format!("{e:#}")))?;

        let first = outputs
            .first()
            .ok_or_else(|| Error::Inference("model produced no outputs".to_string()))?;
        let view = first
            .to_array_view::<f32>()
            .map_err(|e| Error::Inference(format!("reading output: {e:#}")))?;

        Ok(view.iter().copied().collect())
    }
}
