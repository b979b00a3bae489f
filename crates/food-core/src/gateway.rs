//! Model Gateway
//!
//! Sole owner of the loaded classifier. Loading is either eager (at startup)
//! or lazy (first inference), and is single-flight in both cases: however
//! many callers arrive while the model is unloaded, exactly one load runs and
//! the others wait for its outcome.
//!
//! ```text
//! Unloaded ──ensure_loaded──▶ Loading ──ok──▶ Ready
//!                               │
//!                               └──err──▶ Failed ──next caller──▶ Loading
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::{InferenceMode, LoadPolicy, ServiceConfig};
use crate::runtime::{ClassifierModel, ModelLoader};
use crate::types::{InputTensor, ScoreVector, TensorShape};
use crate::{Error, Result};

/// The loaded model plus what it was loaded for
pub struct ClassifierHandle {
    model: Box<dyn ClassifierModel>,
    input_shape: TensorShape,
    num_classes: usize,
}

impl ClassifierHandle {
    pub fn input_shape(&self) -> TensorShape {
        self.input_shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

enum LoadState {
    Unloaded,
    Loading,
    Ready(Arc<ClassifierHandle>),
    Failed(String),
}

/// Gateway options
#[derive(Debug, Clone, Copy)]
pub struct GatewayOptions {
    pub load_policy: LoadPolicy,
    pub inference_mode: InferenceMode,
    /// Input shape every tensor must have
    pub input_shape: TensorShape,
    /// Number of configured classes
    pub num_classes: usize,
}

impl GatewayOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            load_policy: config.model.load_policy,
            inference_mode: config.model.inference_mode,
            input_shape: config.input_shape(),
            num_classes: config.classes.len(),
        }
    }
}

/// Counters for observing gateway activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    /// Loader invocations, successful or not
    pub load_attempts: u64,
    /// Successful loads
    pub loads: u64,
    /// Calls to `infer`, including rejected ones
    pub inference_calls: u64,
}

/// Owns the single classifier instance
pub struct ModelGateway {
    loader: Arc<dyn ModelLoader>,
    options: GatewayOptions,
    state: Mutex<LoadState>,
    loaded: Condvar,
    /// Held for the duration of each runtime call in serialized mode
    inference_lock: Mutex<()>,
    load_attempts: AtomicU64,
    loads: AtomicU64,
    inference_calls: AtomicU64,
}

impl ModelGateway {
    /// Create a gateway without loading anything
    pub fn new(loader: Arc<dyn ModelLoader>, options: GatewayOptions) -> Self {
        Self {
            loader,
            options,
            state: Mutex::new(LoadState::Unloaded),
            loaded: Condvar::new(),
            inference_lock: Mutex::new(()),
            load_attempts: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            inference_calls: AtomicU64::new(0),
        }
    }

    /// Create a gateway and apply its load policy: eager gateways load now
    /// and fail if the model cannot be loaded
    pub fn start(loader: Arc<dyn ModelLoader>, options: GatewayOptions) -> Result<Self> {
        let gateway = Self::new(loader, options);
        if options.load_policy == LoadPolicy::Eager {
            gateway.ensure_loaded()?;
        }
        Ok(gateway)
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Whether the model is loaded; never triggers a load
    pub fn is_loaded(&self) -> bool {
        matches!(*self.lock_state(), LoadState::Ready(_))
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            load_attempts: self.load_attempts.load(Ordering::SeqCst),
            loads: self.loads.load(Ordering::SeqCst),
            inference_calls: self.inference_calls.load(Ordering::SeqCst),
        }
    }

    /// Load the model if needed and return the handle.
    ///
    /// Callers that arrive while another load is in progress wait for it and
    /// share its outcome. A caller that finds the previous attempt failed
    /// starts a new one.
    pub fn ensure_loaded(&self) -> Result<Arc<ClassifierHandle>> {
        let mut state = self.lock_state();
        let mut waited = false;

        loop {
            match &*state {
                LoadState::Ready(handle) => return Ok(Arc::clone(handle)),
                LoadState::Failed(reason) if waited => {
                    return Err(Error::ModelNotReady(reason.clone()));
                }
                LoadState::Unloaded | LoadState::Failed(_) => break,
                LoadState::Loading => {}
            }
            waited = true;
            state = self
                .loaded
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        *state = LoadState::Loading;
        drop(state);

        // The loader runs without the state lock so waiters are not blocked
        // on anything but the condvar. A panicking loader counts as a failed
        // attempt.
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.load_handle()))
            .unwrap_or_else(|_| {
                error!("Model loader panicked");
                Err(Error::Other("model loader panicked".to_string()))
            });

        let mut state = self.lock_state();
        let result = match outcome {
            Ok(handle) => {
                *state = LoadState::Ready(Arc::clone(&handle));
                Ok(handle)
            }
            Err(e) => {
                let reason = e.to_string();
                *state = LoadState::Failed(reason.clone());
                Err(Error::ModelNotReady(reason))
            }
        };
        drop(state);
        self.loaded.notify_all();
        result
    }

    /// Run one inference
    pub fn infer(&self, input: &InputTensor) -> Result<ScoreVector> {
        self.inference_calls.fetch_add(1, Ordering::SeqCst);

        let handle = self.ensure_loaded()?;

        if input.shape() != handle.input_shape {
            return Err(Error::ShapeMismatch {
                expected: handle.input_shape.to_string(),
                actual: input.shape().to_string(),
            });
        }

        let start = Instant::now();
        let scores = match self.options.inference_mode {
            InferenceMode::Concurrent => handle.model.run(input),
            InferenceMode::Serialized => {
                let _guard = self
                    .inference_lock
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                handle.model.run(input)
            }
        }?;

        if scores.is_empty() {
            return Err(Error::Inference("model returned an empty score vector".to_string()));
        }
        debug!(
            "Inference finished in {:.2} ms ({} scores)",
            start.elapsed().as_secs_f64() * 1000.0,
            scores.len()
        );
        Ok(scores)
    }

    fn load_handle(&self) -> Result<Arc<ClassifierHandle>> {
        let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Loading {} (attempt {})", self.loader.describe(), attempt);
        let start = Instant::now();

        let model = self.loader.load().map_err(|e| {
            error!("Model load failed: {}", e);
            e
        })?;

        let declared = model.input_shape();
        if declared != self.options.input_shape {
            error!(
                "Model input shape {} does not match configured {}",
                declared, self.options.input_shape
            );
            return Err(Error::ShapeMismatch {
                expected: self.options.input_shape.to_string(),
                actual: declared.to_string(),
            });
        }
        if let Some(width) = model.output_len() {
            if width != self.options.num_classes {
                error!(
                    "Model outputs {} scores but {} classes are configured",
                    width, self.options.num_classes
                );
                return Err(Error::LabelCountMismatch {
                    scores: width,
                    labels: self.options.num_classes,
                });
            }
        }

        self.loads.fetch_add(1, Ordering::SeqCst);
        info!("Model loaded in {:.2}s", start.elapsed().as_secs_f64());

        Ok(Arc::new(ClassifierHandle {
            model,
            input_shape: declared,
            num_classes: self.options.num_classes,
        }))
    }

    fn lock_state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageDimensions, TensorLayout};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{mpsc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn shape() -> TensorShape {
        TensorShape::new(ImageDimensions::new(2, 2), TensorLayout::Nhwc)
    }

    fn options(load_policy: LoadPolicy, inference_mode: InferenceMode) -> GatewayOptions {
        GatewayOptions {
            load_policy,
            inference_mode,
            input_shape: shape(),
            num_classes: 3,
        }
    }

    fn tensor() -> InputTensor {
        InputTensor::new(shape(), vec![0.5; shape().len()]).unwrap()
    }

    /// Model that records how many runs overlap
    struct FakeModel {
        output: Option<usize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl ClassifierModel for FakeModel {
        fn input_shape(&self) -> TensorShape {
            shape()
        }

        fn output_len(&self) -> Option<usize> {
            self.output
        }

        fn run(&self, _input: &InputTensor) -> Result<ScoreVector> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(vec![0.1, 0.7, 0.2])
        }
    }

    struct FakeLoader {
        loads: AtomicUsize,
        fail_first: usize,
        panic_first: usize,
        load_delay: Duration,
        run_delay: Duration,
        output: Option<usize>,
        max_in_flight: Arc<AtomicUsize>,
    }

    impl FakeLoader {
        fn new() -> Self {
            Self {
                loads: AtomicUsize::new(0),
                fail_first: 0,
                panic_first: 0,
                load_delay: Duration::ZERO,
                run_delay: Duration::ZERO,
                output: Some(3),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl ModelLoader for FakeLoader {
        fn load(&self) -> Result<Box<dyn ClassifierModel>> {
            let n = self.loads.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.load_delay);
            if n < self.panic_first {
                panic!("graph optimizer blew up");
            }
            if n < self.fail_first {
                return Err(Error::Other("weights file is corrupt".to_string()));
            }
            Ok(Box::new(FakeModel {
                output: self.output,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::clone(&self.max_in_flight),
                delay: self.run_delay,
            }))
        }

        fn describe(&self) -> String {
            "fake model".to_string()
        }
    }

    #[test]
    fn test_eager_start_loads_once() {
        let loader = Arc::new(FakeLoader::new());
        let gateway =
            ModelGateway::start(loader.clone(), options(LoadPolicy::Eager, InferenceMode::Concurrent)).unwrap();
        assert!(gateway.is_loaded());

        gateway.infer(&tensor()).unwrap();
        gateway.infer(&tensor()).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.stats().inference_calls, 2);
    }

    #[test]
    fn test_options_from_config() {
        let config = ServiceConfig::tempeh();
        let options = GatewayOptions::from_config(&config);
        assert_eq!(options.num_classes, 3);
        assert_eq!(options.input_shape, config.input_shape());
        assert_eq!(options.load_policy, LoadPolicy::Eager);
    }

    #[test]
    fn test_eager_start_fails_fast() {
        let mut loader = FakeLoader::new();
        loader.fail_first = 1;
        let result = ModelGateway::start(Arc::new(loader), options(LoadPolicy::Eager, InferenceMode::Concurrent));
        assert!(matches!(result, Err(Error::ModelNotReady(_))));
    }

    #[test]
    fn test_lazy_does_not_load_until_first_inference() {
        let loader = Arc::new(FakeLoader::new());
        let gateway =
            ModelGateway::start(loader.clone(), options(LoadPolicy::Lazy, InferenceMode::Concurrent)).unwrap();
        assert!(!gateway.is_loaded());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        let scores = gateway.infer(&tensor()).unwrap();
        assert_eq!(scores, vec![0.1, 0.7, 0.2]);
        assert!(gateway.is_loaded());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_requests_load_once() {
        let mut loader = FakeLoader::new();
        loader.load_delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let gateway = Arc::new(ModelGateway::new(
            loader.clone(),
            options(LoadPolicy::Lazy, InferenceMode::Concurrent),
        ));

        let barrier = Arc::new(Barrier::new(50));
        let workers: Vec<_> = (0..50)
            .map(|i| {
                let gateway = Arc::clone(&gateway);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        gateway.ensure_loaded().map(|_| ())
                    } else {
                        gateway.infer(&tensor()).map(|_| ())
                    }
                })
            })
            .collect();

        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.stats().loads, 1);
        assert_eq!(gateway.stats().load_attempts, 1);
    }

    #[test]
    fn test_failed_lazy_load_reports_not_ready_then_retries() {
        let mut loader = FakeLoader::new();
        loader.fail_first = 1;
        let loader = Arc::new(loader);
        let gateway = ModelGateway::new(loader.clone(), options(LoadPolicy::Lazy, InferenceMode::Concurrent));

        let err = gateway.infer(&tensor()).unwrap_err();
        assert!(matches!(err, Error::ModelNotReady(ref reason) if reason.contains("corrupt")));
        assert!(!gateway.is_loaded());

        // Next caller retries and succeeds
        assert!(gateway.infer(&tensor()).is_ok());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_waiters_share_a_failed_attempt() {
        let mut loader = FakeLoader::new();
        loader.fail_first = usize::MAX;
        loader.load_delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let gateway = Arc::new(ModelGateway::new(
            loader.clone(),
            options(LoadPolicy::Lazy, InferenceMode::Concurrent),
        ));

        let barrier = Arc::new(Barrier::new(8));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gateway.ensure_loaded().map(|_| ())
                })
            })
            .collect();

        for worker in workers {
            assert!(matches!(worker.join().unwrap(), Err(Error::ModelNotReady(_))));
        }
        // Only late arrivals that found `Failed` without waiting retry
        assert!(loader.loads.load(Ordering::SeqCst) < 8);
    }

    #[test]
    fn test_panicking_loader_releases_waiters() {
        let mut loader = FakeLoader::new();
        loader.panic_first = 1;
        loader.load_delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let gateway = Arc::new(ModelGateway::new(
            loader.clone(),
            options(LoadPolicy::Lazy, InferenceMode::Concurrent),
        ));

        let (tx, rx) = mpsc::channel();
        for delay in [0, 10] {
            let gateway = Arc::clone(&gateway);
            let tx = tx.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                let _ = tx.send(gateway.ensure_loaded().map(|_| ()));
            });
        }

        let first = rx.recv_timeout(Duration::from_secs(5)).expect("loader caller hung");
        let second = rx.recv_timeout(Duration::from_secs(5)).expect("waiting caller hung");
        assert!(first.is_err() || second.is_err());
        assert!(matches!(
            [first, second].into_iter().find_map(|r| r.err()),
            Some(Error::ModelNotReady(ref reason)) if reason.contains("panicked")
        ));

        // The gateway is usable again
        assert!(gateway.infer(&tensor()).is_ok());
        assert!(gateway.is_loaded());
    }

    #[test]
    fn test_output_width_checked_at_load() {
        let mut loader = FakeLoader::new();
        loader.output = Some(5);
        let result = ModelGateway::start(Arc::new(loader), options(LoadPolicy::Eager, InferenceMode::Concurrent));
        assert!(matches!(result, Err(Error::ModelNotReady(ref r)) if r.contains("Label count mismatch")));
    }

    #[test]
    fn test_wrong_tensor_shape_rejected() {
        let gateway =
            ModelGateway::start(Arc::new(FakeLoader::new()), options(LoadPolicy::Eager, InferenceMode::Concurrent))
                .unwrap();
        let other = TensorShape::new(ImageDimensions::new(3, 3), TensorLayout::Nhwc);
        let input = InputTensor::new(other, vec![0.0; other.len()]).unwrap();
        assert!(matches!(gateway.infer(&input), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_serialized_mode_never_overlaps() {
        let mut loader = FakeLoader::new();
        loader.run_delay = Duration::from_millis(5);
        let loader = Arc::new(loader);
        let max_in_flight = Arc::clone(&loader.max_in_flight);
        let gateway = Arc::new(
            ModelGateway::start(loader, options(LoadPolicy::Eager, InferenceMode::Serialized)).unwrap(),
        );

        let workers: Vec<_> = (0..16)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || gateway.infer(&tensor()).map(|_| ()))
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.stats().inference_calls, 16);
    }

    #[test]
    fn test_concurrent_mode_allows_overlap() {
        let mut loader = FakeLoader::new();
        loader.run_delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let max_in_flight = Arc::clone(&loader.max_in_flight);
        let gateway = Arc::new(
            ModelGateway::start(loader, options(LoadPolicy::Eager, InferenceMode::Concurrent)).unwrap(),
        );

        let barrier = Arc::new(Barrier::new(4));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let gateway = Arc::clone(&gateway);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    gateway.infer(&tensor()).map(|_| ())
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap().is_ok());
        }

        assert!(max_in_flight.load(Ordering::SeqCst) > 1);
    }
}
