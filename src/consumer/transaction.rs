//! Transactional scope covering persistence and outbound emissions.
//!
//! A family handler never calls the publisher or alert sink directly;
//! it stages effects on a `TransactionScope`, and the partition worker
//! flushes them only after the handler itself returns `Ok` — the outbox
//! pattern the design notes call for, so a handler that fails partway
//! through never leaves a half-published side effect.

use serde_json::Value;

use crate::alerts::Severity;
use crate::error::IngestError;

pub struct PendingEmission {
    pub topic: String,
    pub correlation_id: String,
    pub entity_id: String,
    pub payload: Value,
}

pub struct PendingAlert {
    pub alert_type: String,
    pub entity_id: String,
    pub severity: Severity,
    pub message: String,
}

pub struct PendingResolution {
    pub alert_type: String,
    pub entity_id: String,
    pub message: String,
}

/// Buffers the side effects one handler invocation wants to have happen,
/// without actually calling any collaborator yet.
#[derive(Default)]
pub struct TransactionScope {
    emissions: Vec<PendingEmission>,
    alerts: Vec<PendingAlert>,
    resolutions: Vec<PendingResolution>,
}

impl TransactionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(
        &mut self,
        topic: impl Into<String>,
        correlation_id: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Value,
    ) {
        self.emissions.push(PendingEmission {
            topic: topic.into(),
            correlation_id: correlation_id.into(),
            entity_id: entity_id.into(),
            payload,
        });
    }

    pub fn alert(
        &mut self,
        alert_type: impl Into<String>,
        entity_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) {
        self.alerts.push(PendingAlert {
            alert_type: alert_type.into(),
            entity_id: entity_id.into(),
            severity,
            message: message.into(),
        });
    }

    pub fn resolve(
        &mut self,
        alert_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.resolutions.push(PendingResolution {
            alert_type: alert_type.into(),
            entity_id: entity_id.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.emissions.is_empty() && self.alerts.is_empty() && self.resolutions.is_empty()
    }

    pub fn into_parts(self) -> (Vec<PendingEmission>, Vec<PendingAlert>, Vec<PendingResolution>) {
        (self.emissions, self.alerts, self.resolutions)
    }
}

/// Trait object-friendly commit seam so the partition worker can flush a
/// scope without naming concrete `Publisher`/`AlertSink`/`Notifier` types.
#[async_trait::async_trait]
pub trait TransactionSink: Send + Sync {
    async fn commit_emission(&self, emission: PendingEmission) -> Result<(), IngestError>;
    async fn commit_alert(&self, alert: PendingAlert) -> Result<(), IngestError>;
    async fn commit_resolution(&self, resolution: PendingResolution) -> Result<(), IngestError>;
}

pub async fn commit(scope: TransactionScope, sink: &dyn TransactionSink) -> Result<(), IngestError> {
    let (emissions, alerts, resolutions) = scope.into_parts();
    for emission in emissions {
        sink.commit_emission(emission).await?;
    }
    for alert in alerts {
        sink.commit_alert(alert).await?;
    }
    for resolution in resolutions {
        sink.commit_resolution(resolution).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_scope_reports_empty() {
        let scope = TransactionScope::new();
        assert!(scope.is_empty());
    }

    #[test]
    fn staged_effects_are_not_empty() {
        let mut scope = TransactionScope::new();
        scope.emit("topic", "corr-1", "entity-1", serde_json::json!({}));
        assert!(!scope.is_empty());
        let (emissions, alerts, resolutions) = scope.into_parts();
        assert_eq!(emissions.len(), 1);
        assert!(alerts.is_empty());
        assert!(resolutions.is_empty());
    }
}
