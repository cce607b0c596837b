//! Engine configuration.
//!
//! Mirrors every knob enumerated in the external interfaces section:
//! per-family consumer concurrency/enablement, idempotency TTL, rolling
//! window bounds, anomaly sensitivity, per-resource thresholds, SLA
//! targets, alert cooldowns, and periodic-task schedules. Loaded from a
//! TOML file with an environment-variable override for the path, same
//! shape as a production service's `Config::from_env`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub consumers: ConsumerConfig,

    #[serde(default)]
    pub idempotency: IdempotencyConfig,

    #[serde(default)]
    pub rolling_window: RollingWindowConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub resource_thresholds: ResourceThresholds,

    #[serde(default)]
    pub sla: SlaConfig,

    #[serde(default)]
    pub alert: AlertConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub prediction: PredictionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consumers: ConsumerConfig::default(),
            idempotency: IdempotencyConfig::default(),
            rolling_window: RollingWindowConfig::default(),
            anomaly: AnomalyConfig::default(),
            resource_thresholds: ResourceThresholds::default(),
            sla: SlaConfig::default(),
            alert: AlertConfig::default(),
            schedule: ScheduleConfig::default(),
            prediction: PredictionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `TELEMETRY_ENGINE_CONFIG` or fall back to defaults.
    pub fn from_env() -> Self {
        let path = std::env::var("TELEMETRY_ENGINE_CONFIG")
            .unwrap_or_else(|_| "telemetry_engine.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("using default engine config ({}): {}", path, e);
            Self::default()
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

/// Per-family consumer concurrency and enablement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// `consumer.<family>.concurrency`, default 4 for unlisted families.
    #[serde(default)]
    pub concurrency: HashMap<String, u32>,

    /// `consumer.<family>.enabled`, default true for unlisted families.
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        let mut concurrency = HashMap::new();
        concurrency.insert("performance-monitoring-events".to_string(), 6);
        concurrency.insert("system-health-events".to_string(), 4);
        concurrency.insert("component-health-alerts".to_string(), 4);
        concurrency.insert("service-availability-events".to_string(), 4);
        concurrency.insert("consistency-alerts".to_string(), 4);
        Self {
            concurrency,
            enabled: HashMap::new(),
        }
    }
}

impl ConsumerConfig {
    pub fn concurrency_for(&self, topic: &str) -> u32 {
        *self.concurrency.get(topic).unwrap_or(&4)
    }

    pub fn is_enabled(&self, family: &str) -> bool {
        *self.enabled.get(family).unwrap_or(&true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Shard size that triggers a lazy sweep.
    #[serde(default = "default_sweep_trigger")]
    pub sweep_trigger: usize,
}

fn default_ttl_hours() -> u64 {
    24
}
fn default_sweep_trigger() -> usize {
    1000
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_ttl_hours(),
            sweep_trigger: default_sweep_trigger(),
        }
    }
}

impl IdempotencyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindowConfig {
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    #[serde(default = "default_max_age_hours")]
    pub max_age_hours: u64,
}

fn default_max_samples() -> usize {
    1000
}
fn default_max_age_hours() -> u64 {
    24
}

impl Default for RollingWindowConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            max_age_hours: default_max_age_hours(),
        }
    }
}

impl RollingWindowConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// `k` in `|x - mean| > k * stddev`.
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f64,

    /// Minimum sample count before a baseline is "ready".
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,

    /// Seasonality strength at/above which the seasonal component is
    /// subtracted before the z-score test.
    #[serde(default = "default_seasonality_threshold")]
    pub seasonality_strength_threshold: f64,
}

fn default_sensitivity() -> f64 {
    3.0
}
fn default_min_samples() -> u64 {
    30
}
fn default_seasonality_threshold() -> f64 {
    0.5
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            sensitivity: default_sensitivity(),
            min_samples: default_min_samples(),
            seasonality_strength_threshold: default_seasonality_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceThresholds {
    #[serde(default = "default_cpu_warning")]
    pub cpu_warning: f64,
    #[serde(default = "default_cpu_critical")]
    pub cpu_critical: f64,
    #[serde(default = "default_memory_warning")]
    pub memory_warning: f64,
    #[serde(default = "default_memory_critical")]
    pub memory_critical: f64,
    #[serde(default = "default_disk_warning")]
    pub disk_warning: f64,
    #[serde(default = "default_disk_critical")]
    pub disk_critical: f64,
}

fn default_cpu_warning() -> f64 {
    75.0
}
fn default_cpu_critical() -> f64 {
    90.0
}
fn default_memory_warning() -> f64 {
    85.0
}
fn default_memory_critical() -> f64 {
    95.0
}
fn default_disk_warning() -> f64 {
    80.0
}
fn default_disk_critical() -> f64 {
    95.0
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_warning: default_cpu_warning(),
            cpu_critical: default_cpu_critical(),
            memory_warning: default_memory_warning(),
            memory_critical: default_memory_critical(),
            disk_warning: default_disk_warning(),
            disk_critical: default_disk_critical(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_sla_response_ms")]
    pub response_time_ms: u64,
    #[serde(default = "default_sla_availability")]
    pub availability_percent: f64,
    #[serde(default = "default_sla_error_rate")]
    pub error_rate_percent: f64,
}

fn default_sla_response_ms() -> u64 {
    1000
}
fn default_sla_availability() -> f64 {
    99.9
}
fn default_sla_error_rate() -> f64 {
    1.0
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            response_time_ms: default_sla_response_ms(),
            availability_percent: default_sla_availability(),
            error_rate_percent: default_sla_error_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_cooldown_critical_secs")]
    pub cooldown_critical_secs: u64,
    #[serde(default = "default_cooldown_default_secs")]
    pub cooldown_default_secs: u64,
    /// Fraction of the threshold value that a metric must re-cross by
    /// before an alert is allowed to resolve (hysteresis band).
    #[serde(default = "default_hysteresis_fraction")]
    pub hysteresis_fraction: f64,
}

fn default_cooldown_critical_secs() -> u64 {
    5 * 60
}
fn default_cooldown_default_secs() -> u64 {
    15 * 60
}
fn default_hysteresis_fraction() -> f64 {
    0.10
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown_critical_secs: default_cooldown_critical_secs(),
            cooldown_default_secs: default_cooldown_default_secs(),
            hysteresis_fraction: default_hysteresis_fraction(),
        }
    }
}

impl AlertConfig {
    pub fn cooldown_critical(&self) -> Duration {
        Duration::from_secs(self.cooldown_critical_secs)
    }
    pub fn cooldown_default(&self) -> Duration {
        Duration::from_secs(self.cooldown_default_secs)
    }
}

/// Periods for the thirteen periodic analyzers, all subject to 10% jitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_5m")]
    pub aggregation_secs: u64,
    #[serde(default = "default_5m")]
    pub frustration_detection_secs: u64,
    #[serde(default = "default_15m")]
    pub trend_analysis_secs: u64,
    #[serde(default = "default_15m")]
    pub critical_path_secs: u64,
    #[serde(default = "default_10m")]
    pub ux_scorecard_secs: u64,
    #[serde(default = "default_1h")]
    pub heatmap_secs: u64,
    #[serde(default = "default_15m")]
    pub session_replay_secs: u64,
    #[serde(default = "default_1h")]
    pub ux_report_secs: u64,
    #[serde(default = "default_1h")]
    pub baseline_recompute_secs: u64,
    #[serde(default = "default_5m")]
    pub prediction_refresh_secs: u64,
    #[serde(default = "default_10m")]
    pub model_evaluation_secs: u64,
    #[serde(default = "default_1h")]
    pub model_retraining_secs: u64,
    #[serde(default = "default_24h")]
    pub cleanup_secs: u64,
    #[serde(default = "default_jitter")]
    pub jitter_fraction: f64,
}

fn default_5m() -> u64 {
    5 * 60
}
fn default_10m() -> u64 {
    10 * 60
}
fn default_15m() -> u64 {
    15 * 60
}
fn default_1h() -> u64 {
    3600
}
fn default_24h() -> u64 {
    24 * 3600
}
fn default_jitter() -> f64 {
    0.10
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            aggregation_secs: default_5m(),
            frustration_detection_secs: default_5m(),
            trend_analysis_secs: default_15m(),
            critical_path_secs: default_15m(),
            ux_scorecard_secs: default_10m(),
            heatmap_secs: default_1h(),
            session_replay_secs: default_15m(),
            ux_report_secs: default_1h(),
            baseline_recompute_secs: default_1h(),
            prediction_refresh_secs: default_5m(),
            model_evaluation_secs: default_10m(),
            model_retraining_secs: default_1h(),
            cleanup_secs: default_24h(),
            jitter_fraction: default_jitter(),
        }
    }
}

/// Actionability thresholds for predictive-analytics handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionConfig {
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_anomaly_probability")]
    pub anomaly_probability: f64,
    #[serde(default = "default_failure_probability")]
    pub failure_probability: f64,
    #[serde(default = "default_fraud_probability")]
    pub fraud_probability: f64,
    #[serde(default = "default_churn_probability")]
    pub churn_probability: f64,
    #[serde(default = "default_capacity_probability")]
    pub capacity_probability: f64,
}

fn default_confidence() -> f64 {
    0.75
}
fn default_anomaly_probability() -> f64 {
    0.80
}
fn default_failure_probability() -> f64 {
    0.70
}
fn default_fraud_probability() -> f64 {
    0.75
}
fn default_churn_probability() -> f64 {
    0.60
}
fn default_capacity_probability() -> f64 {
    0.85
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            anomaly_probability: default_anomaly_probability(),
            failure_probability: default_failure_probability(),
            fraud_probability: default_fraud_probability(),
            churn_probability: default_churn_probability(),
            capacity_probability: default_capacity_probability(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_knobs() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.idempotency.ttl_hours, 24);
        assert_eq!(cfg.rolling_window.max_samples, 1000);
        assert_eq!(cfg.anomaly.sensitivity, 3.0);
        assert_eq!(cfg.sla.response_time_ms, 1000);
        assert_eq!(cfg.alert.cooldown_critical_secs, 300);
        assert_eq!(cfg.alert.cooldown_default_secs, 900);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = EngineConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        cfg.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.anomaly.sensitivity, cfg.anomaly.sensitivity);
    }
}
