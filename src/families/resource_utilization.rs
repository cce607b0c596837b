//! Resource utilization family handler.
//!
//! Grounded on the teacher's `performance::cpu`/`memory`/`io` snapshot
//! plumbing, generalized from a single trading-engine health score to
//! per-entity, per-resource-kind scoring. CPU crossing into CRITICAL
//! emits an autoscaler hint on top of the usual alert/resolve pair.

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload, ResourceEventType};
use crate::metrics::MetricKey;
use crate::rolling_window::WindowKey;
use crate::threshold::{Direction, ThresholdKey, ThresholdSet, Transition};

use super::{EngineContext, FamilyHandler};

pub struct ResourceUtilizationHandler;

#[async_trait]
impl FamilyHandler for ResourceUtilizationHandler {
    fn family(&self) -> Family {
        Family::ResourceUtilization
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::ResourceUtilization(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected resource_utilization payload".into(),
            ));
        };

        if payload.resource_kind.is_empty() {
            return Err(IngestError::ValidationFailure("resource_kind is required".into()));
        }
        if !(0.0..=100.0).contains(&payload.utilization_pct) {
            return Err(IngestError::ValidationFailure(
                "utilization_pct must be within 0..=100".into(),
            ));
        }

        let window_key = WindowKey::new(&event.entity_id, payload.resource_kind.clone());
        ctx.windows.record(&window_key, payload.utilization_pct);
        ctx.metrics.observe(
            &MetricKey::new("resource_utilization_pct", &[("resource_kind", payload.resource_kind.as_str())]),
            payload.utilization_pct,
        );

        if let Some(set) = self.threshold_set_for(&payload.resource_kind, ctx) {
            let key = ThresholdKey::new(&event.entity_id, payload.resource_kind.clone());
            ctx.thresholds.set_thresholds(key.clone(), set);
            if let Some(transition) = ctx.thresholds.evaluate(&key, payload.utilization_pct) {
                self.translate_transition(event, payload, transition, scope);
            }
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}

impl ResourceUtilizationHandler {
    fn threshold_set_for(&self, resource_kind: &str, ctx: &EngineContext) -> Option<ThresholdSet> {
        let thresholds = &ctx.config.resource_thresholds;
        match resource_kind {
            "CPU" => Some(ThresholdSet {
                warning: thresholds.cpu_warning,
                critical: thresholds.cpu_critical,
                direction: Direction::Upper,
            }),
            "MEMORY" => Some(ThresholdSet {
                warning: thresholds.memory_warning,
                critical: thresholds.memory_critical,
                direction: Direction::Upper,
            }),
            "DISK" => Some(ThresholdSet {
                warning: thresholds.disk_warning,
                critical: thresholds.disk_critical,
                direction: Direction::Upper,
            }),
            _ => None,
        }
    }

    fn translate_transition(
        &self,
        event: &Event,
        payload: &crate::events::ResourceUtilizationEvent,
        transition: Transition,
        scope: &mut TransactionScope,
    ) {
        if transition.is_resolution() {
            scope.resolve(
                format!("{}_UTILIZATION", payload.resource_kind),
                event.entity_id.clone(),
                format!("{} utilization recovered to {:.1}%", payload.resource_kind, transition.value),
            );
            return;
        }

        let severity = match transition.to {
            crate::threshold::Severity::Critical => Severity::Critical,
            crate::threshold::Severity::Warning => Severity::Warning,
            crate::threshold::Severity::Ok => return,
        };
        scope.alert(
            format!("{}_UTILIZATION", payload.resource_kind),
            event.entity_id.clone(),
            severity,
            format!("{} utilization at {:.1}%", payload.resource_kind, transition.value),
        );

        if payload.resource_kind == "CPU" && transition.to == crate::threshold::Severity::Critical {
            scope.emit(
                topics::CPU_SCALING_REQUESTS,
                event.correlation_id.clone(),
                event.entity_id.clone(),
                json!({ "utilization_pct": transition.value, "reason": "sustained high CPU" }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertManager;
    use crate::baseline::BaselineEngine;
    use crate::collaborators::{InMemoryAlertSink, InMemoryNotifier, InMemoryPublisher, InMemoryStore, NoopModelRuntime};
    use crate::emitter::DerivedEventEmitter;
    use crate::config::EngineConfig;
    use crate::events::{consumer_correlation_id, ResourceUtilizationEvent};
    use crate::graph::DependencyGraph;
    use crate::idempotency::IdempotencyCache;
    use crate::metrics::MetricsRegistry;
    use crate::rolling_window::RollingWindowStore;
    use crate::threshold::ThresholdEvaluator;
    use chrono::Utc;
    use std::sync::Arc;

    fn context() -> EngineContext {
        let config = EngineConfig::default();
        EngineContext {
            idempotency: IdempotencyCache::new(&config.idempotency),
            windows: RollingWindowStore::new(&config.rolling_window),
            baselines: BaselineEngine::new(&config.anomaly),
            thresholds: Arc::new(ThresholdEvaluator::new(&config.alert)),
            graph: DependencyGraph::new(),
            metrics: Arc::new(MetricsRegistry::new()),
            store: InMemoryStore::new(),
            alerts: Arc::new(AlertManager::new(
                &config.alert,
                InMemoryAlertSink::new(),
                InMemoryNotifier::new(),
            )),
            model_runtime: Arc::new(NoopModelRuntime),
            emitter: DerivedEventEmitter::new(InMemoryPublisher::new()),
            config,
        }
    }

    fn event(resource_kind: &str, utilization_pct: f64) -> Event {
        Event {
            family: Family::ResourceUtilization,
            entity_id: "host-1".into(),
            timestamp: Utc::now(),
            partition: 0,
            offset: 1,
            correlation_id: consumer_correlation_id(Family::ResourceUtilization, "host-1", 0, 1),
            payload: Payload::ResourceUtilization(ResourceUtilizationEvent {
                event_type: ResourceEventType::Cpu,
                resource_kind: resource_kind.to_string(),
                utilization_pct,
            }),
        }
    }

    #[tokio::test]
    async fn critical_cpu_emits_scaling_request() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        ResourceUtilizationHandler.handle(&event("CPU", 95.0), &ctx, &mut scope).await.unwrap();
        let (emissions, alerts, _) = scope.into_parts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(emissions.iter().any(|e| e.topic == topics::CPU_SCALING_REQUESTS));
    }

    #[tokio::test]
    async fn nominal_cpu_raises_nothing() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        ResourceUtilizationHandler.handle(&event("CPU", 20.0), &ctx, &mut scope).await.unwrap();
        assert!(scope.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_utilization_is_a_validation_failure() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let result = ResourceUtilizationHandler.handle(&event("CPU", 150.0), &ctx, &mut scope).await;
        assert!(matches!(result, Err(IngestError::ValidationFailure(_))));
    }
}
