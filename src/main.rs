//! Telemetry Ingestion & Analysis Engine — binary entry point.
//!
//! Composition root: loads configuration, wires the collaborator
//! implementations (in-memory by default — production deployments swap in
//! a real message-log client, persistent store, notifier, and model
//! runtime; see [`telemetry_engine::collaborators`]), builds the shared
//! [`EngineContext`], registers every inbound subscription and periodic
//! analyzer, and runs until `ctrl_c`, draining both runtimes on shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use telemetry_engine::alerts::AlertManager;
use telemetry_engine::baseline::BaselineEngine;
use telemetry_engine::clock::Scheduler;
use telemetry_engine::collaborators::{
    InMemoryAlertSink, InMemoryLogSource, InMemoryNotifier, InMemoryPublisher, InMemoryStore, NoopModelRuntime,
};
use telemetry_engine::config::EngineConfig;
use telemetry_engine::consumer::{ConsumerRuntime, Subscription};
use telemetry_engine::emitter::DerivedEventEmitter;
use telemetry_engine::events::Family;
use telemetry_engine::families::{EngineContext, FamilyRegistry};
use telemetry_engine::graph::DependencyGraph;
use telemetry_engine::idempotency::IdempotencyCache;
use telemetry_engine::metrics::MetricsRegistry;
use telemetry_engine::periodic;
use telemetry_engine::rolling_window::RollingWindowStore;
use telemetry_engine::threshold::ThresholdEvaluator;

/// CLI flags for the engine binary.
#[derive(Debug, Parser)]
#[command(name = "telemetry-engine", about = "Telemetry ingestion and analysis engine")]
struct Cli {
    /// Path to the TOML config file. Falls back to `TELEMETRY_ENGINE_CONFIG`,
    /// then to `telemetry_engine.toml` in the working directory, then to
    /// compiled-in defaults if none of those exist.
    #[arg(long, env = "TELEMETRY_ENGINE_CONFIG")]
    config: Option<String>,

    /// Overrides `RUST_LOG` for this run.
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading config from {path}"))?,
        None => EngineConfig::from_env(),
    };

    info!("telemetry engine starting");

    let ctx = Arc::new(EngineContext {
        idempotency: IdempotencyCache::new(&config.idempotency),
        windows: RollingWindowStore::new(&config.rolling_window),
        baselines: BaselineEngine::new(&config.anomaly),
        thresholds: Arc::new(ThresholdEvaluator::new(&config.alert)),
        graph: DependencyGraph::new(),
        metrics: Arc::new(MetricsRegistry::new()),
        store: InMemoryStore::new(),
        alerts: Arc::new(AlertManager::new(&config.alert, InMemoryAlertSink::new(), InMemoryNotifier::new())),
        model_runtime: Arc::new(NoopModelRuntime),
        emitter: DerivedEventEmitter::new(InMemoryPublisher::new()),
        config,
    });

    let log = InMemoryLogSource::new();
    let registry = Arc::new(FamilyRegistry::new());
    let mut consumer = ConsumerRuntime::new(ctx.clone(), registry, log);

    for subscription in inbound_subscriptions(&ctx) {
        info!(topic = %subscription.topic, partitions = subscription.partitions, "subscribing");
        consumer.spawn(subscription);
    }

    let scheduler = Arc::new(Scheduler::new());
    periodic::register_once(&scheduler, ctx.clone());
    info!("periodic analyzers registered");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown signal received, draining runtimes");

    consumer.shutdown().await;
    scheduler.shutdown().await;

    info!("telemetry engine stopped");
    Ok(())
}

/// Every inbound topic from the external interfaces table, with the
/// documented per-family concurrency (falls back to 4 partitions for
/// topics not called out with a specific value). Topics disabled via
/// `consumer.<topic>.enabled = false` are left out of the returned set
/// entirely, so no worker is ever spawned for them.
fn inbound_subscriptions(ctx: &EngineContext) -> Vec<Subscription> {
    let concurrency = |topic: &str| ctx.config.consumers.concurrency_for(topic);
    let all = vec![
        Subscription::new(
            "performance-monitoring-events",
            "performance-monitoring-group",
            Family::PerformanceMonitoring,
            concurrency("performance-monitoring-events"),
        ),
        Subscription::new(
            "performance-metrics",
            "performance-metrics-group",
            Family::PerformanceMetrics,
            concurrency("performance-metrics"),
        ),
        Subscription::new(
            "user-experience-metrics-events",
            "user-experience-group",
            Family::UserExperience,
            concurrency("user-experience-metrics-events"),
        ),
        Subscription::new(
            "resource-utilization",
            "resource-utilization-group",
            Family::ResourceUtilization,
            concurrency("resource-utilization"),
        ),
        Subscription::new(
            "service-dependency-tracking",
            "service-dependency-group",
            Family::ServiceDependency,
            concurrency("service-dependency-tracking"),
        ),
        Subscription::new(
            "predictive-analytics",
            "predictive-analytics-group",
            Family::PredictiveAnalytics,
            concurrency("predictive-analytics"),
        ),
        Subscription::new(
            "system-health-events",
            "system-health-group",
            Family::SystemHealth,
            concurrency("system-health-events"),
        ),
        Subscription::new(
            "component-health-alerts",
            "component-health-group",
            Family::SystemHealth,
            concurrency("component-health-alerts"),
        ),
        Subscription::new(
            "service-availability-events",
            "service-availability-group",
            Family::SystemHealth,
            concurrency("service-availability-events"),
        ),
        Subscription::new(
            "consistency-alerts",
            "consistency-alerts-group",
            Family::ConsistencyAlerts,
            concurrency("consistency-alerts"),
        ),
        Subscription::new(
            "payment-provider-status-changes",
            "payment-provider-group",
            Family::PaymentProviderStatus,
            concurrency("payment-provider-status-changes"),
        ),
    ];
    all.into_iter()
        .filter(|subscription| ctx.config.consumers.is_enabled(&subscription.topic))
        .collect()
}

/// Mirrors the teacher's `tracing_subscriber::registry()...init()` setup,
/// with an optional CLI/env override ahead of `RUST_LOG`.
fn init_tracing(log_level: Option<&str>) {
    let filter = log_level
        .map(|s| s.to_string())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "telemetry_engine=info".to_string());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
