//! Performance monitoring family handler.
//!
//! Generic metric-type/value pairs. CPU and memory utilization metric
//! types are wired into the same resource thresholds the resource
//! utilization family uses; every metric type feeds its rolling window
//! and baseline regardless.

use async_trait::async_trait;

use crate::alerts::Severity;
use crate::baseline::BaselineKey;
use crate::consumer::transaction::TransactionScope;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload};
use crate::metrics::MetricKey;
use crate::rolling_window::WindowKey;
use crate::threshold::{Direction, ThresholdKey, ThresholdSet};

use super::{EngineContext, FamilyHandler};

pub struct PerformanceMonitoringHandler;

#[async_trait]
impl FamilyHandler for PerformanceMonitoringHandler {
    fn family(&self) -> Family {
        Family::PerformanceMonitoring
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::PerformanceMonitoring(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected performance_monitoring payload".into(),
            ));
        };

        if !payload.value.is_finite() {
            return Err(IngestError::ValidationFailure("value must be finite".into()));
        }

        let window_key = WindowKey::new(&event.entity_id, payload.metric_type.as_str());
        ctx.windows.record(&window_key, payload.value);
        ctx.metrics.observe(
            &MetricKey::new("performance_monitoring_value", &[("metric_type", payload.metric_type.as_str())]),
            payload.value,
        );

        let anomaly = ctx
            .baselines
            .observe(&BaselineKey::new(&event.entity_id, payload.metric_type.as_str()), payload.value);
        if anomaly.is_anomalous {
            scope.alert(
                "METRIC_ANOMALY",
                event.entity_id.clone(),
                Severity::Warning,
                format!("{} at {:.2} is {:.2}σ from baseline", payload.metric_type.as_str(), payload.value, anomaly.z_score),
            );
        }

        if let Some(set) = self.threshold_set_for(payload.metric_type.as_str(), ctx) {
            let key = ThresholdKey::new(&event.entity_id, payload.metric_type.as_str());
            ctx.thresholds.set_thresholds(key.clone(), set);
            if let Some(transition) = ctx.thresholds.evaluate(&key, payload.value) {
                self.translate_transition(event, payload.metric_type.as_str(), transition, scope);
            }
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}

impl PerformanceMonitoringHandler {
    fn threshold_set_for(&self, metric_type: &str, ctx: &EngineContext) -> Option<ThresholdSet> {
        let thresholds = &ctx.config.resource_thresholds;
        match metric_type {
            "CPU_UTILIZATION" => Some(ThresholdSet {
                warning: thresholds.cpu_warning,
                critical: thresholds.cpu_critical,
                direction: Direction::Upper,
            }),
            "MEMORY_UTILIZATION" => Some(ThresholdSet {
                warning: thresholds.memory_warning,
                critical: thresholds.memory_critical,
                direction: Direction::Upper,
            }),
            _ => None,
        }
    }

    fn translate_transition(
        &self,
        event: &Event,
        metric_type: &str,
        transition: crate::threshold::Transition,
        scope: &mut TransactionScope,
    ) {
        if transition.is_resolution() {
            scope.resolve(
                format!("{metric_type}_THRESHOLD"),
                event.entity_id.clone(),
                format!("{metric_type} recovered to {:.2}", transition.value),
            );
            return;
        }
        let severity = match transition.to {
            crate::threshold::Severity::Critical => Severity::Critical,
            crate::threshold::Severity::Warning => Severity::Warning,
            crate::threshold::Severity::Ok => Severity::Info,
        };
        scope.alert(
            format!("{metric_type}_THRESHOLD"),
            event.entity_id.clone(),
            severity,
            format!("{metric_type} at {:.2} crossed into {}", transition.value, transition.to.as_str()),
        );
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
    use crate::events::{consumer_correlation_id, PerformanceMonitoringEvent};
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

    fn event(metric_type: crate::events::MetricType, value: f64) -> Event {
        Event {
            family: Family::PerformanceMonitoring,
            entity_id: "svc-a".into(),
            timestamp: Utc::now(),
            partition: 0,
            offset: 1,
            correlation_id: consumer_correlation_id(Family::PerformanceMonitoring, "svc-a", 0, 1),
            payload: Payload::PerformanceMonitoring(PerformanceMonitoringEvent { metric_type, value }),
        }
    }

    #[tokio::test]
    async fn cpu_crossing_warning_raises_alert() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PerformanceMonitoringHandler.handle(&event(crate::events::MetricType::CpuUtilization, 80.0), &ctx, &mut scope).await.unwrap();
        let (_, alerts, _) = scope.into_parts();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].alert_type.starts_with("CPU_UTILIZATION"));
    }

    #[tokio::test]
    async fn unthresholded_metric_only_feeds_window() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PerformanceMonitoringHandler.handle(&event(crate::events::MetricType::QueueLength, 42.0), &ctx, &mut scope).await.unwrap();
        assert!(scope.is_empty());
        let key = WindowKey::new("svc-a", "QUEUE_LENGTH");
        assert_eq!(ctx.windows.count(&key), 1);
    }

    #[tokio::test]
    async fn non_finite_value_is_validation_failure() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let result = PerformanceMonitoringHandler
            .handle(&event(crate::events::MetricType::CpuUtilization, f64::NAN), &ctx, &mut scope)
            .await;
        assert!(matches!(result, Err(IngestError::ValidationFailure(_))));
    }
}
