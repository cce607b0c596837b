//! Consistency alerts family handler.
//!
//! Data-integrity events. `CONSISTENCY_RESTORED` resolves whatever
//! consistency alert was active for the dataset; every other event
//! type raises one, with checksum/referential violations treated as
//! more severe than drift/duplicates.

use async_trait::async_trait;
use serde_json::json;

use sha2::{Digest, Sha256};

use crate::alerts::Severity;
use crate::consumer::transaction::TransactionScope;
use crate::emitter::topics;
use crate::error::IngestError;
use crate::events::{ConsistencyEventType, Event, Family, Payload};
use crate::metrics::MetricKey;

use super::{EngineContext, FamilyHandler};

pub struct ConsistencyAlertsHandler;

#[async_trait]
impl FamilyHandler for ConsistencyAlertsHandler {
    fn family(&self) -> Family {
        Family::ConsistencyAlerts
    }

    async fn handle(
        &self,
        event: &Event,
        ctx: &EngineContext,
        scope: &mut TransactionScope,
    ) -> Result<(), IngestError> {
        let Payload::ConsistencyAlert(payload) = &event.payload else {
            return Err(IngestError::ValidationFailure(
                "expected consistency_alerts payload".into(),
            ));
        };

        if payload.dataset.is_empty() {
            return Err(IngestError::ValidationFailure("dataset is required".into()));
        }

        ctx.metrics.incr(&MetricKey::new(
            "consistency_events_total",
            &[("event_type", payload.event_type.as_str())],
        ));

        if payload.event_type == ConsistencyEventType::ConsistencyRestored {
            scope.resolve(
                "DATA_CONSISTENCY",
                payload.dataset.clone(),
                format!("consistency restored for {}", payload.dataset),
            );
            ctx.store.persist_event(event).await?;
            return Ok(());
        }

        if payload.event_type == ConsistencyEventType::ChecksumMismatch {
            if let (Some(sample), Some(declared)) = (&payload.payload_sample, &payload.declared_checksum) {
                let computed = hex::encode(Sha256::digest(sample.as_bytes()));
                if !computed.eq_ignore_ascii_case(declared) {
                    scope.alert(
                        "CHECKSUM_VERIFIED_MISMATCH",
                        payload.dataset.clone(),
                        Severity::High,
                        format!("computed checksum {computed} does not match declared {declared} for {}", payload.dataset),
                    );
                }
            }
        }

        let severity = match payload.event_type {
            ConsistencyEventType::ChecksumMismatch | ConsistencyEventType::ReferentialIntegrityViolation => {
                Severity::High
            }
            _ => Severity::Warning,
        };
        scope.alert(
            "DATA_CONSISTENCY",
            payload.dataset.clone(),
            severity,
            format!("{} detected in {}", payload.event_type.as_str(), payload.dataset),
        );
        scope.emit(
            topics::DATA_QUALITY_EVENTS,
            event.correlation_id.clone(),
            payload.dataset.clone(),
            json!({
                "event_type": payload.event_type.as_str(),
                "dataset": payload.dataset,
                "declared_checksum": payload.declared_checksum,
            }),
        );
        if matches!(
            payload.event_type,
            ConsistencyEventType::CrossSystemInconsistency | ConsistencyEventType::SchemaDrift
        ) {
            scope.emit(
                topics::INTEGRATION_MONITORING,
                event.correlation_id.clone(),
                payload.dataset.clone(),
                json!({ "event_type": payload.event_type.as_str(), "dataset": payload.dataset }),
            );
        }

        ctx.store.persist_event(event).await?;
        Ok(())
    }
}
