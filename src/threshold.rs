//! Threshold Evaluator.
//!
//! The OK/WARNING/CRITICAL state machine with a hysteresis band
//! generalizes the teacher's `FailoverState`
//! (Healthy/Degraded/FailedOver/Impaired) from a single endpoint-health
//! machine keyed by endpoint to a `(EntityId, Metric)`-keyed map, with
//! direction-aware comparisons so both "too high" (CPU) and "too low"
//! (availability) thresholds use the same transition table.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::config::AlertConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Breach when the value rises to or past the threshold (CPU, error rate).
    Upper,
    /// Breach when the value falls to or below the threshold (availability).
    Lower,
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdSet {
    pub warning: f64,
    pub critical: f64,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: Severity,
    pub to: Severity,
    pub value: f64,
}

impl Transition {
    /// The alert severity this transition should be reported under;
    /// recovering to OK is reported as a `RESOLVED` signal rather than
    /// under `Severity::Ok`.
    pub fn is_resolution(&self) -> bool {
        self.to == Severity::Ok && self.from != Severity::Ok
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ThresholdKey {
    pub entity_id: String,
    pub metric: String,
}

impl ThresholdKey {
    pub fn new(entity_id: impl Into<String>, metric: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            metric: metric.into(),
        }
    }
}

struct State {
    set: ThresholdSet,
    severity: Severity,
}

/// Per-`(entityId, metric)` threshold state machine.
pub struct ThresholdEvaluator {
    states: RwLock<HashMap<ThresholdKey, State>>,
    hysteresis_fraction: f64,
}

impl ThresholdEvaluator {
    pub fn new(config: &AlertConfig) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            hysteresis_fraction: config.hysteresis_fraction,
        }
    }

    /// Register or update the threshold set for a key. Existing severity
    /// state is preserved across a config update.
    pub fn set_thresholds(&self, key: ThresholdKey, set: ThresholdSet) {
        let mut states = self.states.write();
        states
            .entry(key)
            .and_modify(|s| s.set = set)
            .or_insert(State {
                set,
                severity: Severity::Ok,
            });
    }

    fn breach(&self, set: &ThresholdSet, threshold: f64, value: f64) -> bool {
        match set.direction {
            Direction::Upper => value >= threshold,
            Direction::Lower => value <= threshold,
        }
    }

    fn recovered(&self, set: &ThresholdSet, threshold: f64, value: f64) -> bool {
        let band = threshold * self.hysteresis_fraction;
        match set.direction {
            Direction::Upper => value < threshold - band,
            Direction::Lower => value > threshold + band,
        }
    }

    /// Evaluate `value` against the key's threshold set, returning a
    /// `Transition` if the severity state changed.
    pub fn evaluate(&self, key: &ThresholdKey, value: f64) -> Option<Transition> {
        let mut states = self.states.write();
        let state = states.get_mut(key)?;
        let set = state.set;
        let from = state.severity;

        let to = match from {
            Severity::Ok => {
                if self.breach(&set, set.critical, value) {
                    Severity::Critical
                } else if self.breach(&set, set.warning, value) {
                    Severity::Warning
                } else {
                    Severity::Ok
                }
            }
            Severity::Warning => {
                if self.recovered(&set, set.warning, value) {
                    Severity::Ok
                } else if self.breach(&set, set.critical, value) {
                    Severity::Critical
                } else {
                    Severity::Warning
                }
            }
            Severity::Critical => {
                if self.recovered(&set, set.warning, value) {
                    Severity::Ok
                } else if self.recovered(&set, set.critical, value) {
                    Severity::Warning
                } else {
                    Severity::Critical
                }
            }
        };

        if to == from {
            return None;
        }
        state.severity = to;
        Some(Transition { from, to, value })
    }

    pub fn current_severity(&self, key: &ThresholdKey) -> Option<Severity> {
        self.states.read().get(key).map(|s| s.severity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upper_set(warning: f64, critical: f64) -> ThresholdSet {
        ThresholdSet {
            warning,
            critical,
            direction: Direction::Upper,
        }
    }

    #[test]
    fn cpu_escalation_then_cooldown_matches_seed_scenario() {
        let evaluator = ThresholdEvaluator::new(&AlertConfig {
            cooldown_critical_secs: 300,
            cooldown_default_secs: 900,
            hysteresis_fraction: 0.10,
        });
        let key = ThresholdKey::new("C1", "CPU_UTILIZATION");
        evaluator.set_thresholds(key.clone(), upper_set(75.0, 90.0));

        assert!(evaluator.evaluate(&key, 60.0).is_none());

        let t1 = evaluator.evaluate(&key, 78.0).unwrap();
        assert_eq!(t1.to, Severity::Warning);

        let t2 = evaluator.evaluate(&key, 92.0).unwrap();
        assert_eq!(t2.to, Severity::Critical);

        assert!(evaluator.evaluate(&key, 92.0).is_none());

        assert!(
            evaluator.evaluate(&key, 70.0).is_none(),
            "70 is above 67.5 (75 - 10%) so no resolve yet"
        );

        let t3 = evaluator.evaluate(&key, 60.0).unwrap();
        assert!(t3.is_resolution());
        assert_eq!(t3.to, Severity::Ok);
    }

    #[test]
    fn lower_direction_breaches_on_drop_and_recovers_on_rise() {
        let evaluator = ThresholdEvaluator::new(&AlertConfig {
            cooldown_critical_secs: 300,
            cooldown_default_secs: 900,
            hysteresis_fraction: 0.10,
        });
        let key = ThresholdKey::new("C1", "AVAILABILITY");
        evaluator.set_thresholds(
            key.clone(),
            ThresholdSet {
                warning: 99.9,
                critical: 99.0,
                direction: Direction::Lower,
            },
        );

        let t1 = evaluator.evaluate(&key, 99.5).unwrap();
        assert_eq!(t1.to, Severity::Warning);

        let t2 = evaluator.evaluate(&key, 99.95 + 10.0).unwrap();
        assert_eq!(t2.to, Severity::Ok);
    }

    #[test]
    fn unknown_key_returns_none() {
        let evaluator = ThresholdEvaluator::new(&AlertConfig {
            cooldown_critical_secs: 300,
            cooldown_default_secs: 900,
            hysteresis_fraction: 0.10,
        });
        let key = ThresholdKey::new("nope", "nope");
        assert!(evaluator.evaluate(&key, 100.0).is_none());
    }
}
