//! Event envelope and the typed payload sum used instead of a bare JSON
//! blob dispatched by `switch`. Keeps the "switch on event type" shape the
//! source uses (Design Notes §9) but backs it with a typed enum per
//! family; anything that doesn't parse into a known variant becomes
//! `Payload::Unknown` and is routed to the generic fallback handler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The family an event belongs to. One inbound topic (or small topic
/// group) maps to exactly one family; the consumer runtime dispatches by
/// this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    PerformanceMetrics,
    SystemHealth,
    PerformanceMonitoring,
    ResourceUtilization,
    ServiceDependency,
    PaymentProviderStatus,
    ConsistencyAlerts,
    UserExperience,
    PredictiveAnalytics,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::PerformanceMetrics => "performance_metrics",
            Family::SystemHealth => "system_health",
            Family::PerformanceMonitoring => "performance_monitoring",
            Family::ResourceUtilization => "resource_utilization",
            Family::ServiceDependency => "service_dependency",
            Family::PaymentProviderStatus => "payment_provider_status",
            Family::ConsistencyAlerts => "consistency_alerts",
            Family::UserExperience => "user_experience",
            Family::PredictiveAnalytics => "predictive_analytics",
        }
    }
}

/// Entity identifier: a component, service, node, session, user, or
/// transaction id depending on family. Kept as an opaque interned string
/// rather than a family-specific type, since the idempotency cache,
/// rolling window store, baseline engine and graph all key on it
/// uniformly.
pub type EntityId = String;

/// Unique event identity for idempotency: `(entityId, eventType, timestamp)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub entity_id: EntityId,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.entity_id,
            self.event_type,
            self.timestamp.timestamp_millis()
        )
    }
}

/// The envelope the consumer runtime hands to a family handler. Immutable
/// for the duration of one handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub family: Family,
    pub entity_id: EntityId,
    pub timestamp: DateTime<Utc>,
    pub partition: u32,
    pub offset: u64,
    pub correlation_id: String,
    pub payload: Payload,
}

impl Event {
    pub fn key(&self) -> EventKey {
        EventKey {
            entity_id: self.entity_id.clone(),
            event_type: self.payload.event_type().to_string(),
            timestamp: self.timestamp,
        }
    }
}

/// Correlation id for consumer-originated events: `<family>-<entityId>-p<partition>-o<offset>`.
pub fn consumer_correlation_id(family: Family, entity_id: &str, partition: u32, offset: u64) -> String {
    format!("{}-{}-p{}-o{}", family.as_str(), entity_id, partition, offset)
}

impl Event {
    /// Parses a raw log record into an `Event` for the given family
    /// (the topic a record was fetched from determines its family).
    /// Producers send a flat JSON object with `entity_id`, `timestamp`,
    /// an optional `correlation_id`, and the family's own payload fields
    /// alongside each other. A record missing `entity_id`/`timestamp`, or
    /// one that isn't valid JSON, is rejected outright (`INVALID_FORMAT`
    /// per step 1 of the per-record lifecycle); a record that parses but
    /// doesn't match its family's known payload shape becomes
    /// `Payload::Unknown` rather than being rejected, so the generic
    /// fallback handler can still persist/audit it.
    pub fn from_wire(family: Family, partition: u32, offset: u64, bytes: &[u8]) -> Result<Event, crate::error::IngestError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| crate::error::IngestError::MalformedEvent(e.to_string()))?;

        let entity_id = value
            .get("entity_id")
            .and_then(Value::as_str)
            .ok_or_else(|| crate::error::IngestError::MalformedEvent("missing entity_id".into()))?
            .to_string();
        let timestamp = value
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| crate::error::IngestError::MalformedEvent("missing or invalid timestamp".into()))?;
        let correlation_id = value
            .get("correlation_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| consumer_correlation_id(family, &entity_id, partition, offset));

        let payload = Payload::from_wire(family, value);

        Ok(Event {
            family,
            entity_id,
            timestamp,
            partition,
            offset,
            correlation_id,
            payload,
        })
    }
}

/// Correlation id for scheduler-originated events: a fresh UUID.
pub fn scheduler_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-family typed payload. `Unknown` absorbs anything that fails to
/// parse into a recognized variant for its family so the five-step
/// handler contract can still validate/audit/alert on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Payload {
    PerformanceMetrics(PerformanceMetricsEvent),
    SystemHealth(SystemHealthEvent),
    PerformanceMonitoring(PerformanceMonitoringEvent),
    ResourceUtilization(ResourceUtilizationEvent),
    ServiceDependency(ServiceDependencyEvent),
    PaymentProviderStatus(PaymentProviderStatusEvent),
    ConsistencyAlert(ConsistencyAlertEvent),
    UserExperience(UserExperienceEvent),
    PredictiveAnalytics(PredictiveAnalyticsEvent),
    Unknown { family: Family, event_type: String, raw: Value },
}

impl Payload {
    pub fn event_type(&self) -> &str {
        match self {
            Payload::PerformanceMetrics(e) => e.event_type.as_str(),
            Payload::SystemHealth(e) => e.status.as_str(),
            Payload::PerformanceMonitoring(e) => e.metric_type.as_str(),
            Payload::ResourceUtilization(e) => e.event_type.as_str(),
            Payload::ServiceDependency(e) => e.event_type.as_str(),
            Payload::PaymentProviderStatus(e) => e.event_type.as_str(),
            Payload::ConsistencyAlert(e) => e.event_type.as_str(),
            Payload::UserExperience(e) => e.event_type.as_str(),
            Payload::PredictiveAnalytics(e) => e.prediction_type.as_str(),
            Payload::Unknown { event_type, .. } => event_type.as_str(),
        }
    }

    /// Attempts to deserialize `value` into the payload shape `family`
    /// expects; anything that doesn't fit becomes `Unknown` rather than
    /// failing the whole record, carrying along whatever `event_type`
    /// string (however named across families) the raw object had.
    fn from_wire(family: Family, value: Value) -> Payload {
        fn raw_event_type(value: &Value) -> String {
            value
                .get("event_type")
                .or_else(|| value.get("status"))
                .or_else(|| value.get("metric_type"))
                .or_else(|| value.get("prediction_type"))
                .and_then(Value::as_str)
                .unwrap_or("UNKNOWN")
                .to_string()
        }

        macro_rules! parse_or_unknown {
            ($variant:ident, $ty:ty) => {
                match serde_json::from_value::<$ty>(value.clone()) {
                    Ok(parsed) => Payload::$variant(parsed),
                    Err(_) => Payload::Unknown {
                        family,
                        event_type: raw_event_type(&value),
                        raw: value,
                    },
                }
            };
        }

        match family {
            Family::PerformanceMetrics => parse_or_unknown!(PerformanceMetrics, PerformanceMetricsEvent),
            Family::SystemHealth => parse_or_unknown!(SystemHealth, SystemHealthEvent),
            Family::PerformanceMonitoring => parse_or_unknown!(PerformanceMonitoring, PerformanceMonitoringEvent),
            Family::ResourceUtilization => parse_or_unknown!(ResourceUtilization, ResourceUtilizationEvent),
            Family::ServiceDependency => parse_or_unknown!(ServiceDependency, ServiceDependencyEvent),
            Family::PaymentProviderStatus => parse_or_unknown!(PaymentProviderStatus, PaymentProviderStatusEvent),
            Family::ConsistencyAlerts => parse_or_unknown!(ConsistencyAlert, ConsistencyAlertEvent),
            Family::UserExperience => parse_or_unknown!(UserExperience, UserExperienceEvent),
            Family::PredictiveAnalytics => parse_or_unknown!(PredictiveAnalytics, PredictiveAnalyticsEvent),
        }
    }
}

// ---------------------------------------------------------------------
// Performance metrics
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PerformanceEventType {
    RequestStarted,
    RequestCompleted,
    RequestFailed,
    DatabaseQuery,
    CacheOperation,
    ExternalApiCall,
    MessageProcessing,
    BatchJobExecution,
    TransactionTiming,
    ServiceDependency,
    ResourceUsage,
    ThroughputMeasurement,
    LatencySpike,
    PerformanceDegradation,
    CapacityWarning,
}

impl PerformanceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestStarted => "REQUEST_STARTED",
            Self::RequestCompleted => "REQUEST_COMPLETED",
            Self::RequestFailed => "REQUEST_FAILED",
            Self::DatabaseQuery => "DATABASE_QUERY",
            Self::CacheOperation => "CACHE_OPERATION",
            Self::ExternalApiCall => "EXTERNAL_API_CALL",
            Self::MessageProcessing => "MESSAGE_PROCESSING",
            Self::BatchJobExecution => "BATCH_JOB_EXECUTION",
            Self::TransactionTiming => "TRANSACTION_TIMING",
            Self::ServiceDependency => "SERVICE_DEPENDENCY",
            Self::ResourceUsage => "RESOURCE_USAGE",
            Self::ThroughputMeasurement => "THROUGHPUT_MEASUREMENT",
            Self::LatencySpike => "LATENCY_SPIKE",
            Self::PerformanceDegradation => "PERFORMANCE_DEGRADATION",
            Self::CapacityWarning => "CAPACITY_WARNING",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetricsEvent {
    pub event_type: PerformanceEventType,
    pub request_id: Option<String>,
    pub duration_ms: Option<f64>,
    pub success: Option<bool>,
    pub source_service: Option<String>,
    pub target_service: Option<String>,
    pub metadata: HashMap<String, Value>,
}

// ---------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
    Recovering,
    Maintenance,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
            Self::Critical => "CRITICAL",
            Self::Recovering => "RECOVERING",
            Self::Maintenance => "MAINTENANCE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthEvent {
    pub status: HealthStatus,
    pub component: String,
    pub detail: Option<String>,
}

// ---------------------------------------------------------------------
// Performance monitoring
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    ResponseTime,
    Throughput,
    CpuUtilization,
    MemoryUtilization,
    DiskIo,
    NetworkIo,
    ErrorRate,
    QueueLength,
    DatabaseConnections,
    TransactionRate,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResponseTime => "RESPONSE_TIME",
            Self::Throughput => "THROUGHPUT",
            Self::CpuUtilization => "CPU_UTILIZATION",
            Self::MemoryUtilization => "MEMORY_UTILIZATION",
            Self::DiskIo => "DISK_IO",
            Self::NetworkIo => "NETWORK_IO",
            Self::ErrorRate => "ERROR_RATE",
            Self::QueueLength => "QUEUE_LENGTH",
            Self::DatabaseConnections => "DATABASE_CONNECTIONS",
            Self::TransactionRate => "TRANSACTION_RATE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMonitoringEvent {
    pub metric_type: MetricType,
    pub value: f64,
}

// ---------------------------------------------------------------------
// Resource utilization
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceEventType {
    ResourceData,
    Cpu,
    Memory,
    Disk,
    Network,
    ContainerResource,
    ResourceAlert,
    ResourceTrend,
    HighUsage,
    LowUsage,
    ResourceExhaustion,
    ResourceRecovery,
    Bottleneck,
    Optimization,
}

impl ResourceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceData => "RESOURCE_DATA",
            Self::Cpu => "CPU",
            Self::Memory => "MEMORY",
            Self::Disk => "DISK",
            Self::Network => "NETWORK",
            Self::ContainerResource => "CONTAINER_RESOURCE",
            Self::ResourceAlert => "RESOURCE_ALERT",
            Self::ResourceTrend => "RESOURCE_TREND",
            Self::HighUsage => "HIGH_USAGE",
            Self::LowUsage => "LOW_USAGE",
            Self::ResourceExhaustion => "RESOURCE_EXHAUSTION",
            Self::ResourceRecovery => "RESOURCE_RECOVERY",
            Self::Bottleneck => "BOTTLENECK",
            Self::Optimization => "OPTIMIZATION",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUtilizationEvent {
    pub event_type: ResourceEventType,
    pub resource_kind: String,
    pub utilization_pct: f64,
}

// ---------------------------------------------------------------------
// Service-dependency tracking
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyEventType {
    DependencyData,
    DependencyHealth,
    DependencyFailure,
    ServiceMap,
    DependencyAlert,
    CriticalPath,
    CircuitBreaker,
    Timeout,
    Retry,
    Recovery,
    CascadeFailure,
    Optimization,
    Isolation,
    Discovery,
}

impl DependencyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyData => "DEPENDENCY_DATA",
            Self::DependencyHealth => "DEPENDENCY_HEALTH",
            Self::DependencyFailure => "DEPENDENCY_FAILURE",
            Self::ServiceMap => "SERVICE_MAP",
            Self::DependencyAlert => "DEPENDENCY_ALERT",
            Self::CriticalPath => "CRITICAL_PATH",
            Self::CircuitBreaker => "CIRCUIT_BREAKER",
            Self::Timeout => "TIMEOUT",
            Self::Retry => "RETRY",
            Self::Recovery => "RECOVERY",
            Self::CascadeFailure => "CASCADE_FAILURE",
            Self::Optimization => "OPTIMIZATION",
            Self::Isolation => "ISOLATION",
            Self::Discovery => "DISCOVERY",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDependencyEvent {
    pub event_type: DependencyEventType,
    pub source: String,
    pub target: String,
    pub success: Option<bool>,
    pub latency_ms: Option<f64>,
    pub impact_level: Option<ImpactLevel>,
    pub criticality: Option<f64>,
    pub isolation: Option<bool>,
}

// ---------------------------------------------------------------------
// Payment provider status
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventType {
    ProviderDown,
    ProviderRecovered,
}

impl ProviderEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderDown => "PROVIDER_DOWN",
            Self::ProviderRecovered => "PROVIDER_RECOVERED",
        }
    }
}

pub const CRITICAL_PROVIDERS: &[&str] = &["stripe", "paypal", "adyen"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProviderStatusEvent {
    pub event_type: ProviderEventType,
    pub provider: String,
}

impl PaymentProviderStatusEvent {
    pub fn is_critical_provider(&self) -> bool {
        CRITICAL_PROVIDERS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&self.provider))
    }
}

// ---------------------------------------------------------------------
// Consistency alerts
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyEventType {
    DataMismatch,
    ReferentialIntegrityViolation,
    DuplicateRecords,
    OrphanedRecords,
    ChecksumMismatch,
    CrossSystemInconsistency,
    TemporalInconsistency,
    SchemaDrift,
    ConsistencyRestored,
}

impl ConsistencyEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataMismatch => "DATA_MISMATCH",
            Self::ReferentialIntegrityViolation => "REFERENTIAL_INTEGRITY_VIOLATION",
            Self::DuplicateRecords => "DUPLICATE_RECORDS",
            Self::OrphanedRecords => "ORPHANED_RECORDS",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::CrossSystemInconsistency => "CROSS_SYSTEM_INCONSISTENCY",
            Self::TemporalInconsistency => "TEMPORAL_INCONSISTENCY",
            Self::SchemaDrift => "SCHEMA_DRIFT",
            Self::ConsistencyRestored => "CONSISTENCY_RESTORED",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsistencyAlertEvent {
    pub event_type: ConsistencyEventType,
    pub dataset: String,
    pub declared_checksum: Option<String>,
    pub payload_sample: Option<String>,
}

// ---------------------------------------------------------------------
// User experience
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UxEventType {
    PageLoad,
    UserInteraction,
    Navigation,
    ClientError,
    SessionData,
    Engagement,
    FormInteraction,
    Clickstream,
    JourneyStep,
    FrustrationSignal,
    AccessibilityIssue,
    DeviceMetrics,
    UserFeedback,
    Search,
    Scroll,
}

impl UxEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageLoad => "PAGE_LOAD",
            Self::UserInteraction => "USER_INTERACTION",
            Self::Navigation => "NAVIGATION",
            Self::ClientError => "CLIENT_ERROR",
            Self::SessionData => "SESSION_DATA",
            Self::Engagement => "ENGAGEMENT",
            Self::FormInteraction => "FORM_INTERACTION",
            Self::Clickstream => "CLICKSTREAM",
            Self::JourneyStep => "JOURNEY_STEP",
            Self::FrustrationSignal => "FRUSTRATION_SIGNAL",
            Self::AccessibilityIssue => "ACCESSIBILITY_ISSUE",
            Self::DeviceMetrics => "DEVICE_METRICS",
            Self::UserFeedback => "USER_FEEDBACK",
            Self::Search => "SEARCH",
            Self::Scroll => "SCROLL",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserExperienceEvent {
    pub event_type: UxEventType,
    pub session_id: String,
    pub page_id: Option<String>,
    pub load_time_ms: Option<f64>,
    pub is_rage_click: Option<bool>,
}

// ---------------------------------------------------------------------
// Predictive analytics
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionEventType {
    TimeSeriesPrediction,
    AnomalyForecast,
    CapacityPrediction,
    FailurePrediction,
    UserBehaviorPrediction,
    FraudPrediction,
    RevenueForecast,
    PerformancePrediction,
    IncidentPrediction,
    DemandForecast,
    TrendAnalysis,
    SeasonalityDetection,
    CorrelationAnalysis,
    ModelPerformance,
    PredictiveAlert,
}

impl PredictionEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimeSeriesPrediction => "TIME_SERIES_PREDICTION",
            Self::AnomalyForecast => "ANOMALY_FORECAST",
            Self::CapacityPrediction => "CAPACITY_PREDICTION",
            Self::FailurePrediction => "FAILURE_PREDICTION",
            Self::UserBehaviorPrediction => "USER_BEHAVIOR_PREDICTION",
            Self::FraudPrediction => "FRAUD_PREDICTION",
            Self::RevenueForecast => "REVENUE_FORECAST",
            Self::PerformancePrediction => "PERFORMANCE_PREDICTION",
            Self::IncidentPrediction => "INCIDENT_PREDICTION",
            Self::DemandForecast => "DEMAND_FORECAST",
            Self::TrendAnalysis => "TREND_ANALYSIS",
            Self::SeasonalityDetection => "SEASONALITY_DETECTION",
            Self::CorrelationAnalysis => "CORRELATION_ANALYSIS",
            Self::ModelPerformance => "MODEL_PERFORMANCE",
            Self::PredictiveAlert => "PREDICTIVE_ALERT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictiveAnalyticsEvent {
    pub prediction_type: PredictionEventType,
    pub confidence: f64,
    pub predicted_utilization: Option<f64>,
    pub exhaustion_in_secs: Option<i64>,
    pub fraud_probability: Option<f64>,
    pub failure_probability: Option<f64>,
    pub churn_probability: Option<f64>,
    pub seasonality_strength: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_key_stable_for_same_inputs() {
        let ts = Utc::now();
        let payload = Payload::UserExperience(UserExperienceEvent {
            event_type: UxEventType::PageLoad,
            session_id: "s1".into(),
            page_id: Some("p1".into()),
            load_time_ms: Some(120.0),
            is_rage_click: None,
        });
        let e1 = Event {
            family: Family::UserExperience,
            entity_id: "s1".into(),
            timestamp: ts,
            partition: 0,
            offset: 1,
            correlation_id: "c1".into(),
            payload: payload.clone(),
        };
        let e2 = Event {
            offset: 2,
            correlation_id: "c2".into(),
            ..e1.clone()
        };
        assert_eq!(e1.key(), e2.key());
    }

    #[test]
    fn critical_provider_detection() {
        let e = PaymentProviderStatusEvent {
            event_type: ProviderEventType::ProviderDown,
            provider: "Stripe".into(),
        };
        assert!(e.is_critical_provider());
        let e2 = PaymentProviderStatusEvent {
            event_type: ProviderEventType::ProviderDown,
            provider: "some-minor-psp".into(),
        };
        assert!(!e2.is_critical_provider());
    }

    #[test]
    fn from_wire_parses_known_payload() {
        let bytes = br#"{
            "entity_id": "svc-a",
            "timestamp": "2026-01-01T00:00:00Z",
            "event_type": "REQUEST_COMPLETED",
            "duration_ms": 42.0,
            "success": true,
            "metadata": {}
        }"#;
        let event = Event::from_wire(Family::PerformanceMetrics, 0, 7, bytes).unwrap();
        assert_eq!(event.entity_id, "svc-a");
        assert_eq!(event.partition, 0);
        assert_eq!(event.offset, 7);
        assert!(matches!(event.payload, Payload::PerformanceMetrics(_)));
        assert_eq!(event.payload.event_type(), "REQUEST_COMPLETED");
    }

    #[test]
    fn from_wire_falls_back_to_unknown_on_shape_mismatch() {
        let bytes = br#"{
            "entity_id": "svc-a",
            "timestamp": "2026-01-01T00:00:00Z",
            "event_type": "SOMETHING_ELSE"
        }"#;
        let event = Event::from_wire(Family::PerformanceMetrics, 0, 1, bytes).unwrap();
        assert!(matches!(event.payload, Payload::Unknown { .. }));
    }

    #[test]
    fn from_wire_rejects_missing_entity_id() {
        let bytes = br#"{"timestamp": "2026-01-01T00:00:00Z", "event_type": "REQUEST_COMPLETED"}"#;
        let result = Event::from_wire(Family::PerformanceMetrics, 0, 1, bytes);
        assert!(matches!(result, Err(crate::error::IngestError::MalformedEvent(_))));
    }

    #[test]
    fn from_wire_generates_correlation_id_when_absent() {
        let bytes = br#"{
            "entity_id": "svc-a",
            "timestamp": "2026-01-01T00:00:00Z",
            "event_type": "REQUEST_COMPLETED"
        }"#;
        let event = Event::from_wire(Family::PerformanceMetrics, 2, 9, bytes).unwrap();
        assert_eq!(event.correlation_id, "performance_metrics-svc-a-p2-o9");
    }
}
