//! User experience family handler.
//!
//! Feeds the rolling window the periodic UX scorecard recompute reads
//! from, and raises an immediate alert for frustration signals (rage
//! clicks, explicit `FRUSTRATION_SIGNAL` events) and accessibility
//! issues rather than waiting for the next scorecard cycle.

use async_trait::async_trait;

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::error::IngestError;
use crate::events::{Event, Family, Payload, UxEventType};
use crate::metrics::MetricKey;
use crate::rolling_window::WindowKey;

use super::{EngineContext, FamilyHandler};

pub struct UserExperienceHandler;

#[async_trait]
impl FamilyHandler for UserExperienceHandler {
    fn family(&self) -> Family {
        Family::UserExperience
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::UserExperience(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure("expected user_experience payload".into()));
        };

        if payload.session_id.is_empty() {
            return Err(IngestError::ValidationFailure("session_id is required".into()));
        }

        ctx.metrics.incr(&MetricKey::new(
            "ux_events_total",
            &[("event_type", payload.event_type.as_str())],
        ));

        if let Some(load_time_ms) = payload.load_time_ms {
            let key = WindowKey::new(&event.entity_id, format!("load_time_ms:{}", payload.event_type.as_str()));
            ctx.windows.record(&key, load_time_ms);
        }

        let rage_click = payload.is_rage_click.unwrap_or(false);
        if payload.event_type == UxEventType::FrustrationSignal || rage_click {
            scope.alert(
                "USER_FRUSTRATION",
                payload.session_id.clone(),
                Severity::Warning,
                format!(
                    "frustration signal for session {} (rage_click={rage_click})",
                    payload.session_id
                ),
            );
        }

        if payload.event_type == UxEventType::AccessibilityIssue {
            scope.alert(
                "ACCESSIBILITY_ISSUE",
                payload.session_id.clone(),
                Severity::Warning,
                format!("accessibility issue reported for session {}", payload.session_id),
            );
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}
