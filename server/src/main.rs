//! Food Classification Server
//!
//! HTTP API server classifying food photographs with an ONNX model.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use food_core::{
    init_logging, load_toml_config, LoadPolicy, LogConfig, LogLevel, OnnxModelLoader,
    ServiceConfig,
};
use tracing::{info, warn};

/// Built-in configuration presets
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Preset {
    Minang,
    Tempeh,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LoadPolicyArg {
    Eager,
    Lazy,
}

impl From<LoadPolicyArg> for LoadPolicy {
    fn from(arg: LoadPolicyArg) -> Self {
        match arg {
            LoadPolicyArg::Eager => LoadPolicy::Eager,
            LoadPolicyArg::Lazy => LoadPolicy::Lazy,
        }
    }
}

/// Food Classification Server
#[derive(Parser, Debug)]
#[command(name = "food-server")]
#[command(version)]
#[command(about = "HTTP API server for food image classification")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "FOOD_CONFIG")]
    config: Option<PathBuf>,

    /// Preset used when no configuration file is given
    #[arg(long, value_enum, default_value = "minang")]
    preset: Preset,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8000")]
    port: u16,

    /// ONNX model file
    #[arg(long, env = "MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Pre-shared API key
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Load the model at startup or on first request
    #[arg(long, value_enum, env = "MODEL_LOAD_POLICY")]
    load_policy: Option<LoadPolicyArg>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Debug logging with module targets and thread ids; overrides --log-level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn log_config(&self) -> LogConfig {
        if self.verbose {
            LogConfig::verbose()
        } else {
            LogConfig::production().with_level(LogLevel::parse(&self.log_level))
        }
    }

    fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => load_toml_config(path)?,
            None => match self.preset {
                Preset::Minang => ServiceConfig::minang(),
                Preset::Tempeh => ServiceConfig::tempeh(),
            },
        };

        if let Some(path) = &self.model_path {
            config.model.path = path.clone();
        }
        if let Some(key) = &self.api_key {
            config.auth.api_key = key.clone();
        }
        if let Some(policy) = self.load_policy {
            config.model.load_policy = policy.into();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_config())?;

    let config = cli.service_config().context("Invalid configuration")?;

    info!("{} v{}", config.service.title, env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Model path:  {:?}", config.model.path);
    info!("  Load policy: {}", config.model.load_policy);
    info!("  Input:       {}", config.input_shape());
    info!("  Classes:     {}", config.classes.join(", "));
    info!("  Auth:        {:?}", config.auth);

    if !config.model.path.exists() {
        warn!(
            "Model not found at {:?}. Prediction requests will fail until it exists.",
            config.model.path
        );
    }

    let loader = Arc::new(OnnxModelLoader::new(&config.model.path, config.input_shape()));
    let state = food_server::build_state(config, loader).context("Failed to start classifier")?;
    let app = food_server::router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
