//! Service-dependency tracking family handler.
//!
//! Every call observation updates the dependency graph's rolling edge
//! window. A run of consecutive failures trips a simple per-edge
//! breaker (mirroring the consumer-side breaker's open/closed
//! vocabulary) which fans out into a circuit-breaker emission; a
//! downstream cascade risk check fans out into a cascade-risk emission.

use async_trait::async_trait;
use serde_json::json;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{DependencyEventType, Event, Family, ImpactLevel, Payload};
use crate::graph::{BreakerState, CallObservation};
use crate::metrics::MetricKey;

use super::{EngineContext, FamilyHandler};

const BREAKER_TRIP_THRESHOLD: u32 = 5;

pub struct ServiceDependencyHandler;

#[async_trait]
impl FamilyHandler for ServiceDependencyHandler {
    fn family(&self) -> Family {
        Family::ServiceDependency
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::ServiceDependency(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected service_dependency payload".into(),
            ));
        };

        if payload.source.is_empty() || payload.target.is_empty() {
            return Err(IngestError::ValidationFailure("source and target are required".into()));
        }

        let success = payload.success.unwrap_or(true);
        let latency_ms = payload.latency_ms.unwrap_or(0.0);
        let prior_failures = ctx.graph.failures(&payload.source, &payload.target);
        let projected_failures = if success { 0 } else { prior_failures + 1 };
        let breaker = if projected_failures >= BREAKER_TRIP_THRESHOLD {
            BreakerState::Open
        } else {
            BreakerState::Closed
        };

        ctx.graph.observe(
            &payload.source,
            &payload.target,
            payload.event_type.as_str(),
            CallObservation { success, latency_ms },
            breaker,
        );

        if let Some(isolation) = payload.isolation {
            ctx.graph.set_isolated(&payload.target, isolation);
        }

        if let Some(criticality) = payload.criticality {
            ctx.graph.set_criticality(&payload.target, criticality);
        }

        ctx.metrics.incr(&MetricKey::new(
            "service_dependency_calls_total",
            &[("success", if success { "true" } else { "false" })],
        ));

        if success {
            scope.resolve(
                "DEPENDENCY_FAILURE",
                format!("{}->{}", payload.source, payload.target),
                "call succeeded".to_string(),
            );
        } else {
            let severity = if matches!(payload.impact_level, Some(ImpactLevel::Critical)) {
                Severity::Critical
            } else {
                Severity::Warning
            };
            scope.alert(
                "DEPENDENCY_FAILURE",
                format!("{}->{}", payload.source, payload.target),
                severity,
                format!("{} consecutive failures {}->{}", projected_failures, payload.source, payload.target),
            );

            if breaker == BreakerState::Open {
                scope.emit(
                    topics::API_CIRCUIT_BREAKER,
                    event.correlation_id.clone(),
                    payload.target.clone(),
                    json!({ "source": payload.source, "target": payload.target, "consecutive_failures": projected_failures }),
                );
            }

            let at_risk = ctx.graph.cascade_risk(&payload.target);
            if !at_risk.is_empty() {
                scope.alert(
                    "CASCADE_RISK",
                    payload.target.clone(),
                    Severity::High,
                    format!("{} downstream service(s) at risk from {}", at_risk.len(), payload.target),
                );
                scope.emit(
                    topics::CASCADING_FAILURE_RISKS,
                    event.correlation_id.clone(),
                    payload.target.clone(),
                    json!({ "failed": payload.target, "at_risk": at_risk.into_iter().collect::<Vec<_>>() }),
                );
            }
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}
