//! Family handler dispatch.
//!
//! Every family and event type in the handler behavior table is
//! implemented here, one file per family, all behind `FamilyHandler` and
//! dispatched from the consumer runtime by `Family`. Each handler
//! follows the same five-step contract: validate, parse, update
//! analytical state, run evaluators, persist + record metrics.

pub mod consistency_alerts;
pub mod payment_provider;
pub mod performance_metrics;
pub mod performance_monitoring;
pub mod predictive_analytics;
pub mod resource_utilization;
pub mod service_dependency;
pub mod system_health;
pub mod user_experience;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::alerts::AlertManager;
use crate::baseline::BaselineEngine;
use crate::collaborators::{AlertSink, ModelRuntime, Notifier, Publisher, Store};
use crate::config::EngineConfig;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::DerivedEventEmitter;
use crate::error::IngestError;
use crate::events::{Event, Family};
use crate::graph::DependencyGraph;
use crate::idempotency::IdempotencyCache;
use crate::metrics::MetricsRegistry;
use crate::rolling_window::RollingWindowStore;
use crate::threshold::ThresholdEvaluator;

/// Shared analytical state and collaborator handles every family handler
/// is given. One instance per engine, held behind `Arc` and cloned
/// cheaply per dispatch.
pub struct EngineContext {
    pub config: EngineConfig,
    pub idempotency: Arc<IdempotencyCache>,
    pub windows: Arc<RollingWindowStore>,
    pub baselines: Arc<BaselineEngine>,
    pub thresholds: Arc<ThresholdEvaluator>,
    pub graph: Arc<DependencyGraph>,
    pub metrics: Arc<MetricsRegistry>,
    pub store: Arc<dyn Store>,
    pub alerts: Arc<AlertManager<dyn AlertSink, dyn Notifier>>,
    pub model_runtime: Arc<dyn ModelRuntime>,
    pub emitter: DerivedEventEmitter<dyn Publisher>,
}

/// A family's complete handling logic: validate, parse, update state,
/// evaluate, and stage persistence/emission effects onto the scope.
#[async_trait]
pub trait FamilyHandler: Send + Sync {
    fn family(&self) -> Family;

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError>;
}

/// Generic fallback for payloads that didn't parse into a known variant
/// for their family. Audits and alerts rather than silently dropping,
/// per the "not a rules engine" non-goal (unknown types still get a
/// minimal, safe response, not arbitrary user-authored handling).
pub struct UnknownPayloadHandler;

#[async_trait]
impl FamilyHandler for UnknownPayloadHandler {
    fn family(&self) -> Family {
        // Dispatch by payload variant, not registered under one family;
        // `family()` is unused for this handler.
        Family::PerformanceMetrics
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        ctx.store.persist_event(event).await?;
        scope.alert(
            "UNRECOGNIZED_EVENT_TYPE",
            event.entity_id.clone(),
            crate::alerts::Severity::Warning,
            format!(
                "event type '{}' in family {:?} did not match any known payload",
                event.payload.event_type(),
                event.family
            ),
        );
        Ok(())
    }
}

/// Registry mapping each `Family` to its handler, built once at startup.
pub struct FamilyRegistry {
    handlers: HashMap<&'static str, Arc<dyn FamilyHandler>>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Arc<dyn FamilyHandler>> = HashMap::new();
        handlers.insert(
            Family::PerformanceMetrics.as_str(),
            Arc::new(performance_metrics::PerformanceMetricsHandler),
        );
        handlers.insert(
            Family::SystemHealth.as_str(),
            Arc::new(system_health::SystemHealthHandler),
        );
        handlers.insert(
            Family::PerformanceMonitoring.as_str(),
            Arc::new(performance_monitoring::PerformanceMonitoringHandler),
        );
        handlers.insert(
            Family::ResourceUtilization.as_str(),
            Arc::new(resource_utilization::ResourceUtilizationHandler),
        );
        handlers.insert(
            Family::ServiceDependency.as_str(),
            Arc::new(service_dependency::ServiceDependencyHandler),
        );
        handlers.insert(
            Family::PaymentProviderStatus.as_str(),
            Arc::new(payment_provider::PaymentProviderHandler),
        );
        handlers.insert(
            Family::ConsistencyAlerts.as_str(),
            Arc::new(consistency_alerts::ConsistencyAlertsHandler),
        );
        handlers.insert(
            Family::UserExperience.as_str(),
            Arc::new(user_experience::UserExperienceHandler),
        );
        handlers.insert(
            Family::PredictiveAnalytics.as_str(),
            Arc::new(predictive_analytics::PredictiveAnalyticsHandler),
        );
        Self { handlers }
    }

    pub fn get(&self, family: Family) -> Arc<dyn FamilyHandler> {
        self.handlers
            .get(family.as_str())
            .cloned()
            .unwrap_or_else(|| Arc::new(UnknownPayloadHandler))
    }
}

impl Default for FamilyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
