//! Event consumer process.
//!
//! Loads configuration, connects to Redpanda and runs the consumer service
//! until SIGINT or SIGTERM.
//!
//! Run with: `cargo run --bin event-consumer`
//! Metrics: `http://<CONSUMER_METRICS_ADDR>/metrics` when configured
//!
//! Exit status is 0 after a clean shutdown and 1 after any fatal error:
//! configuration, telemetry, adapter or subscribe failures.

mod config;

use anyhow::Context as _;
use config::ConsumerConfig;
use event_consumer_core::{Context, Severity, Telemetry, TelemetryEvent};
use event_consumer_redpanda::RedpandaAdapter;
use event_consumer_runtime::metrics::register_metrics;
use event_consumer_runtime::{
    ConsumerService, MetricsExporter, ServiceError, SignalForwarder, TracingTelemetry, signal,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "event_consumer=info,event_consumer_runtime=info,event_consumer_redpanda=info";

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    if let Err(e) = init_tracing() {
        eprintln!("Fatal error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => {
            info!("Consumer stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(critical = true, error = %format!("{e:#}"), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let mut config = ConsumerConfig::initialize().context("Failed to load configuration")?;
    config
        .refresh()
        .context("Failed to refresh configuration")?;

    match config.metrics_addr {
        Some(addr) => MetricsExporter::new(addr)
            .install()
            .context("Failed to initialize metrics exporter")?,
        None => register_metrics(),
    }
    let telemetry: Arc<dyn Telemetry> = Arc::new(TracingTelemetry::new(&config.service_name));

    let adapter = RedpandaAdapter::builder()
        .brokers(&config.brokers)
        .topics(config.topics.iter().cloned())
        .consumer_group(&config.consumer_group)
        .auto_offset_reset(&config.auto_offset_reset)
        .buffer_size(config.buffer_size)
        .session_timeout(config.session_timeout)
        .build()
        .context("Failed to initialize messaging adapter")?;

    telemetry.emit(TelemetryEvent::trace(
        "All adapters initialized successfully",
        Severity::Information,
    ));

    let (signals, mut termination) = signal::channel();
    let forwarder = SignalForwarder::register().context("Failed to install signal handlers")?;
    tokio::spawn(forwarder.run(signals.clone()));

    let ctx = Context::background();
    let service = Arc::new(ConsumerService::initialize(
        Arc::new(adapter),
        Arc::clone(&telemetry),
    ));
    let mut task: JoinHandle<Result<(), ServiceError>> = tokio::spawn({
        let service = Arc::clone(&service);
        let ctx = ctx.clone();
        let signals = signals.subscribe();
        async move { service.start(&ctx, signals).await }
    });

    telemetry.emit(TelemetryEvent::trace(
        "Service layer initialized successfully",
        Severity::Information,
    ));

    let mut keepalive = tokio::time::interval(config.keepalive);
    keepalive.tick().await;
    let mut signals_open = true;

    loop {
        tokio::select! {
            received = termination.recv(), if signals_open => {
                let signal = match received {
                    Ok(signal) => Some(signal),
                    Err(RecvError::Lagged(_)) => None,
                    Err(RecvError::Closed) => {
                        signals_open = false;
                        continue;
                    }
                };

                let mut event = TelemetryEvent::trace("Received termination signal", Severity::Information);
                if let Some(signal) = signal {
                    event = event.with_property("Signal", signal.to_string());
                }
                telemetry.emit(event);

                service.stop(&ctx).await;
                return finish(task.await);
            }
            finished = &mut task => return finish(finished),
            _ = keepalive.tick() => info!("Waiting for termination signal"),
        }
    }
}

/// Map the service task outcome to the process outcome.
fn finish(joined: Result<Result<(), ServiceError>, tokio::task::JoinError>) -> anyhow::Result<()> {
    match joined.context("Service task failed")? {
        // A signal raced ahead of the service task; nothing was opened.
        Ok(()) | Err(ServiceError::Stopped) => Ok(()),
        Err(e) => Err(e).context("Service stopped with a fatal error"),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("Failed to initialize tracing")
}
