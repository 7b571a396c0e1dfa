//! Main binary for the sidecar worker daemon (sidecard)

use clap::{Parser, Subcommand};
use sidecar_adapters::{asr, textgen, AdapterRegistry};
use sidecar_backend::{
    calibrate, AutoscalerReporter, Backend, HttpReportSink, LogMonitor, ReporterHandle,
};
use sidecar_core::{
    CapacityEstimate, CrashPolicy, Error, GateMode, HealthCell, HealthState, LogRule, Result,
    WorkerConfig, WorkloadTracker,
};
use sidecar_server::{build_router, init_logging, serve};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "sidecard")]
#[command(about = "Sidecar worker daemon fronting a local model inference server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Model server base URL override
    #[arg(long, value_name = "URL")]
    model_server_url: Option<String>,

    /// Model server log file override
    #[arg(long, value_name = "FILE")]
    model_log: Option<PathBuf>,

    /// Allow parallel requests to the model server
    #[arg(long)]
    parallel: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration
    Config {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration
    Validate {
        /// Configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { ref output }) => generate_config(output.clone()),
        Some(Commands::Validate { ref config }) => validate_config(config.clone()),
        None => run_worker(cli).await,
    }
}

async fn run_worker(cli: Cli) -> Result<()> {
    // Load configuration
    let mut config = if let Some(ref config_path) = cli.config {
        WorkerConfig::load_from_file(config_path.clone())?
    } else {
        WorkerConfig::load()?
    };

    // Apply CLI overrides
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(url) = cli.model_server_url {
        config.model_server.url = url;
    }
    if let Some(log_path) = cli.model_log {
        config.model_server.log_path = log_path;
    }
    if cli.parallel {
        config.gate_mode = GateMode::Parallel;
    }
    config.validate()?;

    init_logging(&config.logging)?;
    info!(
        worker_id = %config.worker.id,
        model_family = %config.model_family,
        "starting sidecar worker"
    );

    let (registry, family_rules) = family(&config.model_family)?;
    let registry = Arc::new(registry);

    // Shared state cells
    let health = HealthCell::new();
    let tracker = WorkloadTracker::new();
    let capacity = CapacityEstimate::new(config.benchmark.default_units_per_second);

    // Telemetry, when an autoscaler is configured
    let reporter = if config.autoscaler.enabled {
        let url = config.autoscaler.url.clone().unwrap_or_default();
        let token = config.autoscaler.token.clone().unwrap_or_default();
        let sink = Arc::new(HttpReportSink::new(url, token)?);
        Some(AutoscalerReporter::spawn(
            config.worker.id.clone(),
            config.autoscaler.report_interval(),
            health.clone(),
            tracker.clone(),
            capacity.clone(),
            sink,
        ))
    } else {
        info!("autoscaler telemetry disabled");
        None
    };
    let reporter_handle = reporter
        .as_ref()
        .map(AutoscalerReporter::handle)
        .unwrap_or_else(ReporterHandle::disabled);

    let backend = Arc::new(Backend::new(
        config.clone(),
        health.clone(),
        tracker,
        capacity,
        reporter_handle,
    )?);

    // Readiness monitor, driving the health cell from the server's log
    let rules = if config.monitor.rules.is_empty() {
        family_rules
    } else {
        config.monitor.rules.clone()
    };
    let monitor = LogMonitor::new(
        &config.model_server.log_path,
        rules,
        health.clone(),
        config.monitor.poll_interval(),
    )
    .start();

    // Crash policy watcher
    spawn_crash_watcher(health.clone(), config.monitor.crash_policy);

    // Calibrate once the server first becomes ready
    {
        let backend = backend.clone();
        let registry = registry.clone();
        tokio::spawn(async move {
            match backend.health().wait_ready().await {
                Ok(()) => calibrate::calibrate_or_default(&backend, &registry).await,
                Err(e) => warn!("model server never became ready: {}", e),
            }
        });
    }

    // Serve until a shutdown signal arrives
    let app = build_router(backend, &registry);
    let result = serve(config.server.bind_addr, app).await;

    info!("shutting down");
    monitor.stop().await;
    if let Some(reporter) = reporter {
        reporter.stop().await;
    }

    result
}

/// Resolve the adapter registry and default log rules for a model family
fn family(name: &str) -> Result<(AdapterRegistry, Vec<LogRule>)> {
    match name {
        "text_generation" => Ok((
            sidecar_adapters::text_generation_registry(),
            textgen::default_log_rules(),
        )),
        "speech_to_text" => Ok((
            sidecar_adapters::speech_to_text_registry(),
            asr::default_log_rules(),
        )),
        other => Err(Error::config(format!("Unknown model family: {}", other))),
    }
}

/// Exit nonzero on a crash when the policy asks for replacement
fn spawn_crash_watcher(health: HealthCell, policy: CrashPolicy) {
    tokio::spawn(async move {
        let mut rx = health.subscribe();
        loop {
            if *rx.borrow_and_update() == HealthState::Crashed {
                match policy {
                    CrashPolicy::Exit => {
                        error!("model server crashed, exiting for supervisor replacement");
                        std::process::exit(1);
                    }
                    CrashPolicy::Flag => {
                        warn!("model server crashed, serving fail-fast rejections");
                        return;
                    }
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    });
}

fn generate_config(output: Option<PathBuf>) -> Result<()> {
    let config = WorkerConfig::default();
    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| Error::config(format!("Failed to serialize config: {}", e)))?;

    if let Some(output_path) = output {
        std::fs::write(&output_path, yaml)?;
        println!("Generated configuration file: {}", output_path.display());
    } else {
        println!("{}", yaml);
    }

    Ok(())
}

fn validate_config(config_path: PathBuf) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = WorkerConfig::load_from_file(config_path)?;
    config.validate()?;

    println!("Configuration is valid");
    println!("Worker id: {}", config.worker.id);
    println!("Model family: {}", config.model_family);
    println!("Model server: {}", config.model_server.url);
    println!(
        "Model log: {}",
        config.model_server.log_path.display()
    );
    if config.autoscaler.enabled {
        println!(
            "Autoscaler: {}",
            config.autoscaler.url.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
