//! Payment provider status family handler.
//!
//! Critical providers (stripe, paypal, adyen) escalate to a CRITICAL
//! alert and a dedicated down-alert emission that pages; non-critical
//! providers only raise a HIGH alert. Recovery resolves the alert and
//! clears any fallback routing that was put in place.

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload, ProviderEventType};
use crate::metrics::MetricKey;

use super::{EngineContext, FamilyHandler};

pub struct PaymentProviderHandler;

#[async_trait]
impl FamilyHandler for PaymentProviderHandler {
    fn family(&self) -> Family {
        Family::PaymentProviderStatus
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::PaymentProviderStatus(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected payment_provider_status payload".into(),
            ));
        };

        if payload.provider.is_empty() {
            return Err(IngestError::ValidationFailure("provider is required".into()));
        }

        ctx.metrics.incr(&MetricKey::new(
            "payment_provider_events_total",
            &[("event_type", payload.event_type.as_str())],
        ));

        let critical = payload.is_critical_provider();

        match payload.event_type {
            ProviderEventType::ProviderDown => {
                let severity = if critical { Severity::Critical } else { Severity::High };
                scope.alert(
                    "PROVIDER_DOWN",
                    payload.provider.clone(),
                    severity,
                    format!("payment provider {} is down", payload.provider),
                );

                if critical {
                    scope.emit(
                        topics::CRITICAL_PROVIDER_DOWN_ALERTS,
                        event.correlation_id.clone(),
                        payload.provider.clone(),
                        json!({ "provider": payload.provider, "critical": true }),
                    );
                    scope.emit(
                        topics::PROVIDER_STATUS_FALLBACK_EVENTS,
                        event.correlation_id.clone(),
                        payload.provider.clone(),
                        json!({ "provider": payload.provider, "action": "route_to_fallback" }),
                    );
                } else {
                    scope.emit(
                        topics::PROVIDER_HEALTH_ALERTS,
                        event.correlation_id.clone(),
                        payload.provider.clone(),
                        json!({ "provider": payload.provider, "critical": false }),
                    );
                }
            }
            ProviderEventType::ProviderRecovered => {
                scope.resolve(
                    "PROVIDER_DOWN",
                    payload.provider.clone(),
                    format!("payment provider {} recovered", payload.provider),
                );
                scope.emit(
                    topics::PROVIDER_HEALTH_ALERTS,
                    event.correlation_id.clone(),
                    payload.provider.clone(),
                    json!({ "provider": payload.provider, "status": "recovered" }),
                );
            }
        }

        ctx.store.persist_event(event).await?;
        Ok(())
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
    use crate::events::{consumer_correlation_id, PaymentProviderStatusEvent};
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

    fn event(event_type: ProviderEventType, provider: &str) -> Event {
        Event {
            family: Family::PaymentProviderStatus,
            entity_id: provider.to_string(),
            timestamp: Utc::now(),
            partition: 0,
            offset: 1,
            correlation_id: consumer_correlation_id(Family::PaymentProviderStatus, provider, 0, 1),
            payload: Payload::PaymentProviderStatus(PaymentProviderStatusEvent {
                event_type,
                provider: provider.to_string(),
            }),
        }
    }

    #[tokio::test]
    async fn critical_provider_down_pages() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PaymentProviderHandler.handle(&event(ProviderEventType::ProviderDown, "stripe"), &ctx, &mut scope).await.unwrap();
        let (emissions, alerts, _) = scope.into_parts();
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(emissions.iter().any(|e| e.topic == topics::CRITICAL_PROVIDER_DOWN_ALERTS));
        assert!(emissions.iter().any(|e| e.topic == topics::PROVIDER_STATUS_FALLBACK_EVENTS));
    }

    #[tokio::test]
    async fn non_critical_provider_down_is_only_high() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PaymentProviderHandler.handle(&event(ProviderEventType::ProviderDown, "square"), &ctx, &mut scope).await.unwrap();
        let (_, alerts, _) = scope.into_parts();
        assert_eq!(alerts[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn recovery_resolves_alert() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PaymentProviderHandler.handle(&event(ProviderEventType::ProviderRecovered, "stripe"), &ctx, &mut scope).await.unwrap();
        let (_, _, resolutions) = scope.into_parts();
        assert_eq!(resolutions.len(), 1);
    }
}
