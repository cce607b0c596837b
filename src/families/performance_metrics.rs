//! Performance metrics family handler.
//!
//! Grounded on the teacher's `performance::latency`/`performance::throughput`
//! instrumentation: every timed event feeds a rolling window keyed by
//! `(entityId, eventType)` and is tested against its baseline for
//! anomalies. Slow database queries and slow external calls emit the
//! derived events from the emission table.

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload, PerformanceEventType, PerformanceMetricsEvent};
use crate::metrics::MetricKey;
use crate::rolling_window::WindowKey;

use super::{EngineContext, FamilyHandler};

const SLOW_QUERY_MS: f64 = 1000.0;
const SLOW_CALL_MS: f64 = 5000.0;

pub struct PerformanceMetricsHandler;

#[async_trait]
impl FamilyHandler for PerformanceMetricsHandler {
    fn family(&self) -> Family {
        Family::PerformanceMetrics
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::PerformanceMetrics(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected performance_metrics payload".into(),
            ));
        };

        if event.entity_id.is_empty() {
            return Err(IngestError::ValidationFailure("entity_id is required".into()));
        }

        if let Some(duration_ms) = payload.duration_ms {
            self.record_duration(event, payload, duration_ms, ctx, scope);
        }

        if let Some(false) = payload.success {
            ctx.metrics.incr(&MetricKey::new(
                "performance_metrics_failures_total",
                &[("event_type", payload.event_type.as_str())],
            ));
        }

        ctx.metrics.incr(&MetricKey::new(
            "performance_metrics_processed_total",
            &[("event_type", payload.event_type.as_str())],
        ));

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}

impl PerformanceMetricsHandler {
    fn record_duration(
        &self,
        event: &Event,
        payload: &PerformanceMetricsEvent,
        duration_ms: f64,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) {
        let window_key = WindowKey::new(&event.entity_id, format!("duration_ms:{}", payload.event_type.as_str()));
        ctx.windows.record(&window_key, duration_ms);
        ctx.metrics.observe(
            &MetricKey::new("performance_metrics_duration_ms", &[("event_type", payload.event_type.as_str())]),
            duration_ms,
        );

        let anomaly = ctx
            .baselines
            .observe(&crate::baseline::BaselineKey::new(&event.entity_id, format!("duration_ms:{}", payload.event_type.as_str())), duration_ms);
        if anomaly.is_anomalous {
            scope.alert(
                "PERFORMANCE_ANOMALY",
                event.entity_id.clone(),
                Severity::Warning,
                format!(
                    "{} duration {:.1}ms is {:.2}σ from baseline",
                    payload.event_type.as_str(), duration_ms, anomaly.z_score
                ),
            );
        }

        if payload.event_type == PerformanceEventType::DatabaseQuery && duration_ms > SLOW_QUERY_MS {
            scope.emit(
                topics::SLOW_QUERY_ALERTS,
                event.correlation_id.clone(),
                event.entity_id.clone(),
                json!({ "duration_ms": duration_ms, "source_service": payload.source_service }),
            );
        }

        if duration_ms > SLOW_CALL_MS {
            scope.emit(
                topics::PERFORMANCE_ALERTS,
                event.correlation_id.clone(),
                event.entity_id.clone(),
                json!({ "event_type": payload.event_type.as_str(), "duration_ms": duration_ms }),
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
    use crate::events::consumer_correlation_id;
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

    fn event(duration_ms: Option<f64>) -> Event {
        Event {
            family: Family::PerformanceMetrics,
            entity_id: "svc-a".into(),
            timestamp: Utc::now(),
            partition: 0,
            offset: 1,
            correlation_id: consumer_correlation_id(Family::PerformanceMetrics, "svc-a", 0, 1),
            payload: Payload::PerformanceMetrics(PerformanceMetricsEvent {
                event_type: PerformanceEventType::DatabaseQuery,
                request_id: Some("r1".into()),
                duration_ms,
                success: Some(true),
                source_service: Some("billing".into()),
                target_service: Some("postgres".into()),
                metadata: Default::default(),
            }),
        }
    }

    #[tokio::test]
    async fn slow_query_emits_to_slow_query_topic() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let handler = PerformanceMetricsHandler;
        handler.handle(&event(Some(1500.0)), &ctx, &mut scope).await.unwrap();
        let (emissions, _, _) = scope.into_parts();
        assert!(emissions.iter().any(|e| e.topic == topics::SLOW_QUERY_ALERTS));
    }

    #[tokio::test]
    async fn fast_query_does_not_emit() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let handler = PerformanceMetricsHandler;
        handler.handle(&event(Some(5.0)), &ctx, &mut scope).await.unwrap();
        assert!(scope.is_empty());
    }

    #[tokio::test]
    async fn missing_entity_id_is_a_validation_failure() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let mut bad_event = event(Some(5.0));
        bad_event.entity_id = String::new();
        let handler = PerformanceMetricsHandler;
        let result = handler.handle(&bad_event, &ctx, &mut scope).await;
        assert!(matches!(result, Err(IngestError::ValidationFailure(_))));
    }
}
