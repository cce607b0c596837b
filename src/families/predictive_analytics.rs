//! Predictive analytics family handler.
//!
//! Each prediction type carries its own actionable-confidence
//! threshold, read from `ctx.config.prediction` (spec §4.9); crossing
//! it turns a model output into an alert and, for capacity and fraud
//! predictions, a derived event.

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload, PredictionEventType};
use crate::metrics::MetricKey;

use super::{EngineContext, FamilyHandler};

const SECS_PER_DAY: i64 = 86_400;

pub struct PredictiveAnalyticsHandler;

#[async_trait]
impl FamilyHandler for PredictiveAnalyticsHandler {
    fn family(&self) -> Family {
        Family::PredictiveAnalytics
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::PredictiveAnalytics(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected predictive_analytics payload".into(),
            ));
        };

        if !(0.0..=1.0).contains(&payload.confidence) {
            return Err(IngestError::ValidationFailure("confidence must be within 0..=1".into()));
        }

        ctx.metrics.incr(&MetricKey::new(
            "predictive_analytics_events_total",
            &[("prediction_type", payload.prediction_type.as_str())],
        ));

        let thresholds = &ctx.config.prediction;

        match payload.prediction_type {
            PredictionEventType::CapacityPrediction => {
                let predicted = payload.predicted_utilization.unwrap_or(0.0);
                if predicted >= thresholds.capacity_probability {
                    let days_until_exhaustion = payload.exhaustion_in_secs.unwrap_or(0) / SECS_PER_DAY;
                    scope.alert(
                        "CAPACITY_EXHAUSTION",
                        event.entity_id.clone(),
                        Severity::High,
                        format!("predicted utilization {predicted:.2} exhausts capacity in {days_until_exhaustion} day(s)"),
                    );
                    scope.emit(
                        topics::AUTO_SCALING_TRIGGERS,
                        event.correlation_id.clone(),
                        event.entity_id.clone(),
                        json!({
                            "action": "SCALE_UP",
                            "predicted_utilization": predicted,
                            "days_until_exhaustion": days_until_exhaustion,
                        }),
                    );
                }
            }
            PredictionEventType::FraudPrediction => {
                let fraud = payload.fraud_probability.unwrap_or(0.0);
                if fraud >= thresholds.fraud_probability {
                    scope.alert(
                        "FRAUD_RISK",
                        event.entity_id.clone(),
                        Severity::Critical,
                        format!("fraud probability {fraud:.2} exceeds threshold"),
                    );
                    scope.emit(
                        topics::FRAUD_BLOCKING,
                        event.correlation_id.clone(),
                        event.entity_id.clone(),
                        json!({ "action": "BLOCK", "fraud_probability": fraud }),
                    );
                }
            }
            PredictionEventType::FailurePrediction => {
                let failure = payload.failure_probability.unwrap_or(0.0);
                if failure >= thresholds.failure_probability {
                    scope.alert(
                        "FAILURE_PREDICTED",
                        event.entity_id.clone(),
                        Severity::High,
                        format!("failure probability {failure:.2} exceeds threshold"),
                    );
                }
            }
            PredictionEventType::AnomalyForecast => {
                if payload.confidence >= thresholds.anomaly_probability {
                    scope.alert(
                        "ANOMALY_FORECASTED",
                        event.entity_id.clone(),
                        Severity::Warning,
                        format!("anomaly forecast confidence {:.2} exceeds threshold", payload.confidence),
                    );
                }
            }
            PredictionEventType::UserBehaviorPrediction => {
                let churn = payload.churn_probability.unwrap_or(0.0);
                if churn >= thresholds.churn_probability {
                    scope.alert(
                        "CHURN_RISK",
                        event.entity_id.clone(),
                        Severity::Warning,
                        format!("churn probability {churn:.2} exceeds threshold"),
                    );
                }
            }
            _ => {
                if payload.confidence >= thresholds.confidence {
                    scope.alert(
                        "PREDICTIVE_INSIGHT",
                        event.entity_id.clone(),
                        Severity::Info,
                        format!(
                            "{} at confidence {:.2}",
                            payload.prediction_type.as_str(), payload.confidence
                        ),
                    );
                }
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
    use crate::events::{consumer_correlation_id, PredictiveAnalyticsEvent};
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

    fn base_event() -> PredictiveAnalyticsEvent {
        PredictiveAnalyticsEvent {
            prediction_type: PredictionEventType::CapacityPrediction,
            confidence: 0.9,
            predicted_utilization: Some(0.9),
            exhaustion_in_secs: Some(12 * 3600),
            fraud_probability: None,
            failure_probability: None,
            churn_probability: None,
            seasonality_strength: None,
        }
    }

    fn wrap(payload: PredictiveAnalyticsEvent) -> Event {
        Event {
            family: Family::PredictiveAnalytics,
            entity_id: "svc-a".into(),
            timestamp: Utc::now(),
            partition: 0,
            offset: 1,
            correlation_id: consumer_correlation_id(Family::PredictiveAnalytics, "svc-a", 0, 1),
            payload: Payload::PredictiveAnalytics(payload),
        }
    }

    #[tokio::test]
    async fn predictive_capacity_scenario_matches_seed() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        PredictiveAnalyticsHandler.handle(&wrap(base_event()), &ctx, &mut scope).await.unwrap();
        let (emissions, alerts, _) = scope.into_parts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert_eq!(alerts[0].alert_type, "CAPACITY_EXHAUSTION");
        let emission = emissions.iter().find(|e| e.topic == topics::AUTO_SCALING_TRIGGERS).unwrap();
        assert_eq!(emission.payload["action"], "SCALE_UP");
        assert_eq!(emission.payload["days_until_exhaustion"], 0);
    }

    #[tokio::test]
    async fn fraud_prediction_above_threshold_blocks() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let mut payload = base_event();
        payload.prediction_type = PredictionEventType::FraudPrediction;
        payload.fraud_probability = Some(0.9);
        PredictiveAnalyticsHandler.handle(&wrap(payload), &ctx, &mut scope).await.unwrap();
        let (emissions, alerts, _) = scope.into_parts();
        assert_eq!(alerts[0].severity, Severity::Critical);
        assert!(emissions.iter().any(|e| e.topic == topics::FRAUD_BLOCKING));
    }

    #[tokio::test]
    async fn below_threshold_prediction_raises_nothing() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let mut payload = base_event();
        payload.predicted_utilization = Some(0.2);
        PredictiveAnalyticsHandler.handle(&wrap(payload), &ctx, &mut scope).await.unwrap();
        assert!(scope.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_a_validation_failure() {
        let ctx = context();
        let mut scope = TransactionScope::new();
        let mut payload = base_event();
        payload.confidence = 1.5;
        let result = PredictiveAnalyticsHandler.handle(&wrap(payload), &ctx, &mut scope).await;
        assert!(matches!(result, Err(IngestError::ValidationFailure(_))));
    }
}
