//! Collaborator interfaces.
//!
//! The engine is generic over everything that talks to the outside
//! world — the message log, the persistent store, notification
//! channels, the ML runtime — the same dependency-inversion shape the
//! design notes call for instead of a DI-framework annotation. Each
//! trait is small and owns exactly one concern; this crate ships
//! in-memory fakes for tests, not production adapters.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::alerts::Alert;
use crate::error::IngestError;
use crate::events::Event;

/// A raw, not-yet-parsed record as handed to the consumer runtime by the
/// message log client (external per scope).
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub partition: u32,
    pub offset: u64,
    pub bytes: Vec<u8>,
}

/// The message log itself is an external collaborator; this trait is
/// the seam the partition worker polls.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch(&self, topic: &str, partition: u32) -> Result<Option<RawRecord>, IngestError>;
    async fn commit(&self, topic: &str, partition: u32, offset: u64) -> Result<(), IngestError>;
    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), IngestError>;
}

/// A durable audit row for a dead-lettered record.
#[derive(Debug, Clone)]
pub struct DltRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub reason_code: &'static str,
    pub detail: String,
    pub original_payload: Vec<u8>,
    pub occurred_at: DateTime<Utc>,
}

/// The persistent store: durable records, the audit trail, and the
/// source of truth baselines recompute from.
#[async_trait]
pub trait Store: Send + Sync {
    async fn persist_event(&self, event: &Event) -> Result<(), IngestError>;
    async fn persist_dlt(&self, record: DltRecord) -> Result<(), IngestError>;
    async fn recent_samples(
        &self,
        entity_id: &str,
        metric: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<f64>, IngestError>;
}

/// Mirrors alerts to `monitoring.alerts` for dashboards; the actual
/// publish client is external per scope.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), IngestError>;
}

/// Sends an alert down one outbound channel (chat, email, SMS, paging).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, alert: &Alert) -> Result<(), IngestError>;
}

/// Publishes a derived/follow-on event to a downstream topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), IngestError>;
}

/// Input handed to the injected model runtime by the predictive-analytics
/// family handler (the runtime itself, e.g. a real inference service, is
/// external per scope).
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub entity_id: String,
    pub prediction_type: &'static str,
    pub features: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub confidence: f64,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn predict(&self, input: ModelInput) -> Result<ModelOutput, IngestError>;

    /// Submit a retraining job for `model_name` (the external training
    /// pipeline, e.g. its scheduler/queue, is out of scope; this is the
    /// seam the periodic model-retraining analyzer calls through).
    async fn request_retraining(&self, model_name: &str) -> Result<(), IngestError>;
}

// ---------------------------------------------------------------------
// In-memory fakes, for tests only.
// ---------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryStore {
    pub events: Mutex<Vec<Event>>,
    pub dlt: Mutex<Vec<DltRecord>>,
    pub samples: Mutex<std::collections::HashMap<(String, String), Vec<f64>>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_samples(&self, entity_id: &str, metric: &str, values: Vec<f64>) {
        self.samples
            .lock()
            .insert((entity_id.to_string(), metric.to_string()), values);
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn persist_event(&self, event: &Event) -> Result<(), IngestError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    async fn persist_dlt(&self, record: DltRecord) -> Result<(), IngestError> {
        self.dlt.lock().push(record);
        Ok(())
    }

    async fn recent_samples(
        &self,
        entity_id: &str,
        metric: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<f64>, IngestError> {
        Ok(self
            .samples
            .lock()
            .get(&(entity_id.to_string(), metric.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryAlertSink {
    pub alerts: Mutex<Vec<Alert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn publish_alert(&self, alert: &Alert) -> Result<(), IngestError> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl InMemoryNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, channel: &str, alert: &Alert) -> Result<(), IngestError> {
        self.sent
            .lock()
            .push((channel.to_string(), alert.alert_type.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryPublisher {
    pub published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl InMemoryPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), IngestError> {
        self.published.lock().push((topic.to_string(), payload));
        Ok(())
    }
}

/// In-memory, single-process stand-in for the real message log (Kafka or
/// similar) the consumer runtime is built against. A FIFO queue per topic;
/// `publish` enqueues onto the target topic's own queue, so a retry/DLT
/// republish is visible to a subsequent `fetch` the same way a real log
/// would replay it. Production deployments wire `ConsumerRuntime` to a real
/// `LogSource` adapter instead; this is the composition-root default for
/// running the engine binary standalone (e.g. local development, the demo
/// in `main.rs`) and for integration tests that exercise the full runtime.
#[derive(Default)]
pub struct InMemoryLogSource {
    queues: Mutex<std::collections::HashMap<String, std::collections::VecDeque<RawRecord>>>,
    committed: Mutex<Vec<(String, u32, u64)>>,
    next_offset: Mutex<std::collections::HashMap<String, u64>>,
}

impl InMemoryLogSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Enqueue a record for `topic` at the next offset for that topic.
    pub fn seed(&self, topic: &str, partition: u32, bytes: Vec<u8>) {
        let mut next_offset = self.next_offset.lock();
        let offset = next_offset.entry(topic.to_string()).or_insert(0);
        let record = RawRecord {
            partition,
            offset: *offset,
            bytes,
        };
        *offset += 1;
        drop(next_offset);
        self.queues
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push_back(record);
    }
}

#[async_trait]
impl LogSource for InMemoryLogSource {
    async fn fetch(&self, topic: &str, partition: u32) -> Result<Option<RawRecord>, IngestError> {
        let mut queues = self.queues.lock();
        let Some(queue) = queues.get_mut(topic) else {
            return Ok(None);
        };
        Ok(queue
            .iter()
            .position(|r| r.partition == partition)
            .map(|idx| queue.remove(idx).unwrap()))
    }

    async fn commit(&self, topic: &str, partition: u32, offset: u64) -> Result<(), IngestError> {
        self.committed.lock().push((topic.to_string(), partition, offset));
        Ok(())
    }

    async fn publish(&self, topic: &str, bytes: Vec<u8>) -> Result<(), IngestError> {
        self.seed(topic, 0, bytes);
        Ok(())
    }
}

pub struct NoopModelRuntime;

#[async_trait]
impl ModelRuntime for NoopModelRuntime {
    async fn predict(&self, input: ModelInput) -> Result<ModelOutput, IngestError> {
        Ok(ModelOutput {
            confidence: 0.0,
            payload: serde_json::json!({ "entity_id": input.entity_id }),
        })
    }

    async fn request_retraining(&self, _model_name: &str) -> Result<(), IngestError> {
        Ok(())
    }
}

/// Test fake that records every `predict`/`request_retraining` call and
/// lets a test script the confidence each model reports, so periodic
/// model-evaluation/retraining logic can be exercised deterministically.
#[derive(Default)]
pub struct RecordingModelRuntime {
    pub confidences: Mutex<HashMapStr<f64>>,
    pub predictions: Mutex<Vec<ModelInput>>,
    pub retraining_requests: Mutex<Vec<String>>,
}

type HashMapStr<V> = std::collections::HashMap<String, V>;

impl RecordingModelRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_confidence(&self, model_name: &str, confidence: f64) {
        self.confidences.lock().insert(model_name.to_string(), confidence);
    }
}

#[async_trait]
impl ModelRuntime for RecordingModelRuntime {
    async fn predict(&self, input: ModelInput) -> Result<ModelOutput, IngestError> {
        let confidence = self
            .confidences
            .lock()
            .get(input.prediction_type)
            .copied()
            .unwrap_or(0.9);
        self.predictions.lock().push(input.clone());
        Ok(ModelOutput {
            confidence,
            payload: serde_json::json!({ "entity_id": input.entity_id }),
        })
    }

    async fn request_retraining(&self, model_name: &str) -> Result<(), IngestError> {
        self.retraining_requests.lock().push(model_name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::Severity;

    #[tokio::test]
    async fn in_memory_store_roundtrips_samples() {
        let store = InMemoryStore::new();
        store.seed_samples("svc-a", "cpu", vec![1.0, 2.0, 3.0]);
        let samples = store.recent_samples("svc-a", "cpu", Utc::now()).await.unwrap();
        assert_eq!(samples, vec![1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn in_memory_alert_sink_captures_alerts() {
        let sink = InMemoryAlertSink::new();
        let alert = Alert {
            alert_type: "CPU_THRESHOLD".into(),
            entity_id: "svc-a".into(),
            severity: Severity::Warning,
            message: "cpu high".into(),
            occurred_at: Utc::now(),
        };
        sink.publish_alert(&alert).await.unwrap();
        assert_eq!(sink.alerts.lock().len(), 1);
    }
}
