//! System health family handler.
//!
//! Covers the `system-health-events`, `component-health-alerts`, and
//! `service-availability-events` topics, which all report the same
//! `HealthStatus` vocabulary for a component. Degraded/unhealthy/critical
//! statuses raise an alert; healthy/recovering resolves it.

use async_trait::async_trait;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::error::IngestError;
use crate::events::{Event, Family, HealthStatus, Payload};
use crate::metrics::MetricKey;

use super::{EngineContext, FamilyHandler};

pub struct SystemHealthHandler;

#[async_trait]
impl FamilyHandler for SystemHealthHandler {
    fn family(&self) -> Family {
        Family::SystemHealth
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::SystemHealth(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure("expected system_health payload".into()));
        };

        if payload.component.is_empty() {
            return Err(IngestError::ValidationFailure("component is required".into()));
        }

        ctx.metrics.incr(&MetricKey::new(
            "system_health_events_total",
            &[("status", payload.status.as_str())],
        ));

        match payload.status {
            HealthStatus::Degraded => {
                scope.alert(
                    "COMPONENT_DEGRADED",
                    payload.component.clone(),
                    Severity::Warning,
                    payload.detail.clone().unwrap_or_else(|| "component degraded".into()),
                );
            }
            HealthStatus::Unhealthy | HealthStatus::Critical => {
                scope.alert(
                    "COMPONENT_UNHEALTHY",
                    payload.component.clone(),
                    Severity::Critical,
                    payload.detail.clone().unwrap_or_else(|| "component unhealthy".into()),
                );
            }
            HealthStatus::Healthy | HealthStatus::Recovering => {
                scope.resolve(
                    "COMPONENT_UNHEALTHY",
                    payload.component.clone(),
                    "component reported healthy".to_string(),
                );
                scope.resolve(
                    "COMPONENT_DEGRADED",
                    payload.component.clone(),
                    "component reported healthy".to_string(),
                );
            }
            HealthStatus::Maintenance | HealthStatus::Unknown => {}
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}
