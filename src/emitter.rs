//! Derived-Event Emitter.
//!
//! Thin, stateless wrapper around the injected `Publisher` collaborator.
//! Every emission is stamped with `correlation_id`, `timestamp`, and the
//! originating `entity_id`; the emitter never talks to the log directly,
//! so it composes cleanly with the consumer runtime's outbox pattern —
//! callers invoke `emit` only after the surrounding transactional scope
//! has decided to commit.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::collaborators::Publisher;
use crate::error::IngestError;

/// Destination topics for derived/follow-on events, keyed by trigger.
///
/// This is the one canonical source for every outbound topic name; no
/// family handler declares its own topic string constants. Topics with
/// no current producer are still named here (some report on signals
/// this engine doesn't derive today — e.g. per-request latency
/// percentiles for `response-time-analysis-requests`, or connection
/// pool telemetry for `connection-pool-optimization` — no handler or
/// periodic analyzer currently computes the inputs those would need).
pub mod topics {
    // Handler-emitted (§4.9).
    pub const CPU_SCALING_REQUESTS: &str = "cpu-scaling-requests";
    pub const MEMORY_LEAK_DETECTION: &str = "memory-leak-detection";
    pub const SLOW_QUERY_ALERTS: &str = "slow-query-alerts";
    pub const PERFORMANCE_ALERTS: &str = "performance-alerts";
    pub const API_CIRCUIT_BREAKER: &str = "api-circuit-breaker";
    pub const CASCADING_FAILURE_RISKS: &str = "cascading-failure-risks";
    pub const AUTO_SCALING_TRIGGERS: &str = "auto-scaling-triggers";
    pub const FRAUD_BLOCKING: &str = "fraud-blocking";
    pub const MONITORING_ALERTS: &str = "monitoring.alerts";
    pub const DATA_QUALITY_EVENTS: &str = "data-quality-events";
    pub const INTEGRATION_MONITORING: &str = "integration-monitoring";
    pub const CRITICAL_PROVIDER_DOWN_ALERTS: &str = "critical-provider-down-alerts";
    pub const PROVIDER_HEALTH_ALERTS: &str = "provider-health-alerts";
    pub const PROVIDER_STATUS_FALLBACK_EVENTS: &str = "provider-status-fallback-events";

    // Periodic-analyzer emissions (§4.10 / §6).
    pub const AGGREGATED_PERFORMANCE_METRICS: &str = "aggregated-performance-metrics";
    pub const PERFORMANCE_TRENDS: &str = "performance-trends";
    pub const ROOT_CAUSE_ANALYSIS: &str = "root-cause-analysis";
    pub const CAPACITY_ALERTS: &str = "capacity-alerts";

    // Named in §6's full outbound set but with no current producer:
    // nothing in this engine derives the specific signal each one
    // reports on (per-request latency/throughput percentiles, queue
    // depth trends, connection-pool/database-health telemetry, and
    // provider-specific optimization requests are not modeled inputs
    // to any handler or periodic analyzer). Kept as named constants so
    // a future handler or analyzer has a single place to publish to.
    pub const SLA_VIOLATIONS: &str = "sla-violations";
    pub const CACHE_PERFORMANCE_ALERTS: &str = "cache-performance-alerts";
    pub const API_TIMEOUT_EVENTS: &str = "api-timeout-events";
    pub const QUEUE_LAG_ALERTS: &str = "queue-lag-alerts";
    pub const BATCH_JOB_ALERTS: &str = "batch-job-alerts";
    pub const BOTTLENECK_ALERTS: &str = "bottleneck-alerts";
    pub const DEPENDENCY_ALERTS: &str = "dependency-alerts";
    pub const RESOURCE_ALERTS: &str = "resource-alerts";
    pub const THROUGHPUT_ALERTS: &str = "throughput-alerts";
    pub const OPTIMIZATION_RECOMMENDATIONS: &str = "optimization-recommendations";
    pub const RESPONSE_TIME_ANALYSIS_REQUESTS: &str = "response-time-analysis-requests";
    pub const PERFORMANCE_TUNING_REQUESTS: &str = "performance-tuning-requests";
    pub const THROUGHPUT_ANALYSIS_REQUESTS: &str = "throughput-analysis-requests";
    pub const RESOURCE_SCALING_REQUESTS: &str = "resource-scaling-requests";
    pub const DISK_HEALTH_CHECKS: &str = "disk-health-checks";
    pub const NETWORK_CONNECTIVITY_CHECKS: &str = "network-connectivity-checks";
    pub const ERROR_ANALYSIS_REQUESTS: &str = "error-analysis-requests";
    pub const CIRCUIT_BREAKER_ACTIVATION: &str = "circuit-breaker-activation";
    pub const QUEUE_OPTIMIZATION_REQUESTS: &str = "queue-optimization-requests";
    pub const PROCESSING_CAPACITY_SCALING: &str = "processing-capacity-scaling";
    pub const CONNECTION_POOL_OPTIMIZATION: &str = "connection-pool-optimization";
    pub const DATABASE_HEALTH_CHECKS: &str = "database-health-checks";
    pub const TRANSACTION_OPTIMIZATION_REQUESTS: &str = "transaction-optimization-requests";
}

#[derive(Debug, Serialize)]
struct Envelope<T: Serialize> {
    correlation_id: String,
    timestamp: chrono::DateTime<Utc>,
    entity_id: String,
    data: T,
}

pub struct DerivedEventEmitter<P: Publisher + ?Sized> {
    publisher: Arc<P>,
}

impl<P: Publisher + ?Sized> DerivedEventEmitter<P> {
    pub fn new(publisher: Arc<P>) -> Self {
        Self { publisher }
    }

    /// Emit a follow-on event. `data` should already be the inner
    /// event-specific payload; this wraps it with the envelope fields
    /// common to every derived event.
    pub async fn emit<T: Serialize>(
        &self,
        topic: &str,
        correlation_id: impl Into<String>,
        entity_id: impl Into<String>,
        data: T,
    ) -> Result<(), IngestError> {
        let envelope = Envelope {
            correlation_id: correlation_id.into(),
            timestamp: Utc::now(),
            entity_id: entity_id.into(),
            data,
        };
        let value = serde_json::to_value(&envelope)
            .map_err(|e| IngestError::TransientPublishFailure(e.to_string()))?;
        self.publisher.publish(topic, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryPublisher;
    use serde_json::json;

    #[tokio::test]
    async fn emit_publishes_to_requested_topic() {
        let publisher = InMemoryPublisher::new();
        let emitter = DerivedEventEmitter::new(publisher.clone());

        emitter
            .emit(
                topics::CPU_SCALING_REQUESTS,
                "corr-1",
                "svc-a",
                json!({ "cpu_pct": 95.0 }),
            )
            .await
            .unwrap();

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, topics::CPU_SCALING_REQUESTS);
        assert_eq!(published[0].1["correlation_id"], "corr-1");
        assert_eq!(published[0].1["entity_id"], "svc-a");
        assert_eq!(published[0].1["data"]["cpu_pct"], 95.0);
    }
}
