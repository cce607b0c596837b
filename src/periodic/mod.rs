//! Periodic Analyzers.
//!
//! Thirteen scheduled background tasks that look across everything the
//! consumer runtime has accumulated — rolling windows, baselines, the
//! dependency graph, model predictions — and fold it into aggregates,
//! trends, and alerts the per-record handlers can't see on their own.
//! Grounded on the teacher's `main.rs` batch loop (a fixed list of
//! scheduled jobs registered once at startup, each scanning shared state
//! with `rayon` for the per-key fan-out) and `performance::report`'s
//! aggregation shape, generalized from one hardcoded report to this
//! engine's [`crate::config::ScheduleConfig`]-driven set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde_json::json;

use crate::alerts::Severity;
use crate::baseline::{BaselineKey, WelfordState};
use crate::collaborators::ModelInput;
use crate::emitter::topics;
use crate::events::{scheduler_correlation_id, Event, Family, Payload, PredictionEventType};
use crate::families::EngineContext;
use crate::metrics::MetricKey;
use crate::rolling_window::WindowKey;

/// The fixed set of prediction types the engine actively refreshes and
/// evaluates on a schedule, mirroring the subset of
/// [`PredictionEventType`] that carries an actionability threshold
/// (spec §4.9) rather than every variant the inbound family accepts.
const TRACKED_MODELS: &[PredictionEventType] = &[
    PredictionEventType::CapacityPrediction,
    PredictionEventType::FailurePrediction,
    PredictionEventType::FraudPrediction,
    PredictionEventType::UserBehaviorPrediction,
    PredictionEventType::AnomalyForecast,
];

const MIN_MODEL_CONFIDENCE: f64 = 0.80;
const BASELINE_LOOKBACK_DAYS: i64 = 7;
const SESSION_REPLAY_MIN_SAMPLES: usize = 20;
const RAGE_CLICK_RATE_THRESHOLD: f64 = 0.10;

/// Registers every periodic analyzer against `scheduler` using the
/// periods and jitter fraction from `ctx.config.schedule`. Called once
/// at startup after the consumer runtime is spawned.
pub fn register_all(scheduler: &Arc<crate::clock::Scheduler>, ctx: Arc<EngineContext>) {
    let schedule = ctx.config.schedule.clone();
    let jitter = schedule.jitter_fraction;
    let retraining_flags = Arc::new(Mutex::new(Vec::<String>::new()));

    macro_rules! register {
        ($name:expr, $period_secs:expr, $task:expr) => {{
            let ctx = ctx.clone();
            scheduler.every($name, std::time::Duration::from_secs($period_secs), jitter, move || {
                let ctx = ctx.clone();
                async move { $task(&ctx).await }
            });
        }};
    }

    register!("aggregation", schedule.aggregation_secs, aggregate_rolling_stats);
    register!("frustration-detection", schedule.frustration_detection_secs, detect_frustration_patterns);
    register!("trend-analysis", schedule.trend_analysis_secs, analyze_trends);
    register!("critical-path", schedule.critical_path_secs, enumerate_critical_paths);
    register!("ux-scorecard", schedule.ux_scorecard_secs, recompute_ux_scorecards);
    register!("heatmap", schedule.heatmap_secs, generate_heatmaps);
    register!("session-replay", schedule.session_replay_secs, select_session_replays);
    register!("ux-report", schedule.ux_report_secs, generate_ux_report);
    register!("baseline-recompute", schedule.baseline_recompute_secs, recompute_baselines);
    register!("prediction-refresh", schedule.prediction_refresh_secs, refresh_predictions);

    {
        let ctx = ctx.clone();
        let flags = retraining_flags.clone();
        scheduler.every(
            "model-evaluation",
            std::time::Duration::from_secs(schedule.model_evaluation_secs),
            jitter,
            move || {
                let ctx = ctx.clone();
                let flags = flags.clone();
                async move { evaluate_models(&ctx, &flags).await }
            },
        );
    }
    {
        let ctx = ctx.clone();
        let flags = retraining_flags.clone();
        scheduler.every(
            "model-retraining",
            std::time::Duration::from_secs(schedule.model_retraining_secs),
            jitter,
            move || {
                let ctx = ctx.clone();
                let flags = flags.clone();
                async move { submit_retraining_jobs(&ctx, &flags).await }
            },
        );
    }

    register!("cleanup", schedule.cleanup_secs, cleanup_old_data);
}

/// Persists a derived analytical record as a generic event so it lands
/// in the store alongside ordinary family events, without inventing a
/// bespoke persistence method the `Store` collaborator doesn't have.
async fn persist_report(ctx: &EngineContext, entity_id: &str, report_kind: &'static str, body: serde_json::Value) {
    let event = Event {
        family: Family::PredictiveAnalytics,
        entity_id: entity_id.to_string(),
        timestamp: Utc::now(),
        partition: 0,
        offset: 0,
        correlation_id: scheduler_correlation_id(),
        payload: Payload::Unknown {
            family: Family::PredictiveAnalytics,
            event_type: report_kind.to_string(),
            raw: body,
        },
    };
    if let Err(err) = ctx.store.persist_event(&event).await {
        tracing::warn!(report_kind, error = %err, "failed to persist periodic report");
    }
}

/// Every five minutes: roll every tracked `(entityId, metric)` window
/// into mean/p95/stddev gauges and emit one combined snapshot.
async fn aggregate_rolling_stats(ctx: &EngineContext) {
    let keys = ctx.windows.keys();
    let aggregates: Vec<serde_json::Value> = keys
        .par_iter()
        .filter_map(|key| {
            let mean = ctx.windows.mean(key)?;
            let p95 = ctx.windows.percentile(key, 0.95).unwrap_or(mean);
            let stddev = ctx.windows.stddev(key).unwrap_or(0.0);
            ctx.metrics.set_gauge(
                &MetricKey::new("aggregated_mean", &[("entity_id", &key.entity_id), ("metric", &key.metric)]),
                mean.round() as i64,
            );
            Some(json!({
                "entity_id": key.entity_id,
                "metric": key.metric,
                "mean": mean,
                "p95": p95,
                "stddev": stddev,
                "count": ctx.windows.count(key),
            }))
        })
        .collect();

    if aggregates.is_empty() {
        return;
    }
    let _ = ctx
        .emitter
        .emit(
            topics::AGGREGATED_PERFORMANCE_METRICS,
            scheduler_correlation_id(),
            "engine",
            json!({ "aggregates": aggregates }),
        )
        .await;
}

/// Every five minutes: scan user-experience rage-click rates per
/// session and raise `FRUSTRATION_PATTERN_DETECTED` for sessions well
/// past the noise floor.
async fn detect_frustration_patterns(ctx: &EngineContext) {
    for key in ctx.windows.keys() {
        if key.metric != "rage_click_rate" {
            continue;
        }
        let Some(rate) = ctx.windows.mean(&key) else { continue };
        if rate >= RAGE_CLICK_RATE_THRESHOLD {
            let _ = ctx
                .alerts
                .raise(
                    "FRUSTRATION_PATTERN_DETECTED",
                    key.entity_id.clone(),
                    Severity::Warning,
                    format!("rage-click rate {rate:.2} sustained across recent session activity"),
                )
                .await;
        }
    }
}

/// Every fifteen minutes: fit a trend line over each baseline-tracked
/// metric's rolling window and flag sustained directional movement.
async fn analyze_trends(ctx: &EngineContext) {
    for key in ctx.baselines.keys() {
        let window_key = WindowKey::new(key.entity_id.clone(), key.metric.clone());
        let Some(slope) = ctx.windows.regression_slope(&window_key) else { continue };
        let Some(mean) = ctx.windows.mean(&window_key) else { continue };
        if mean.abs() < 1e-9 {
            continue;
        }
        let relative_slope = slope / mean.abs();
        if relative_slope.abs() < 0.05 {
            continue;
        }
        let direction = if relative_slope > 0.0 { "upward" } else { "downward" };
        let _ = ctx
            .emitter
            .emit(
                topics::PERFORMANCE_TRENDS,
                scheduler_correlation_id(),
                key.entity_id.clone(),
                json!({
                    "metric": key.metric,
                    "slope": slope,
                    "direction": direction,
                }),
            )
            .await;
    }
}

/// Every fifteen minutes: enumerate the critical path from each root
/// service in the dependency graph and alert on the worst bottleneck.
async fn enumerate_critical_paths(ctx: &EngineContext) {
    for root in ctx.graph.roots() {
        let Some(critical_path) = ctx.graph.critical_path(&root) else { continue };
        if critical_path.risk_score <= 0.0 {
            continue;
        }
        let _ = ctx
            .alerts
            .raise(
                "CRITICAL_PATH_BOTTLENECK",
                critical_path.bottleneck.clone(),
                Severity::Warning,
                format!(
                    "bottleneck on path {:?} from root {root} (risk {:.2})",
                    critical_path.path, critical_path.risk_score
                ),
            )
            .await;
        let _ = ctx
            .emitter
            .emit(
                topics::ROOT_CAUSE_ANALYSIS,
                scheduler_correlation_id(),
                critical_path.bottleneck.clone(),
                json!({
                    "root": root,
                    "path": critical_path.path,
                    "bottleneck": critical_path.bottleneck,
                    "risk_score": critical_path.risk_score,
                }),
            )
            .await;
    }
}

/// Every ten minutes: recompute the weighted UX scorecard (performance
/// 25%, usability 20%, accessibility 15%, satisfaction 25%, engagement
/// 15%, per spec §4.9) from whatever signals are currently observable
/// and write it as a gauge per session.
async fn recompute_ux_scorecards(ctx: &EngineContext) {
    for key in ctx.windows.keys() {
        if key.metric != "load_time_ms" {
            continue;
        }
        let session_id = &key.entity_id;
        let mean_load_ms = ctx.windows.mean(&key).unwrap_or(0.0);
        let performance_score = (100.0 - (mean_load_ms / 50.0)).clamp(0.0, 100.0);
        let usability_score = if ctx.alerts.is_active("FRUSTRATION_PATTERN_DETECTED", session_id) {
            60.0
        } else {
            100.0
        };
        let accessibility_score = if ctx.alerts.is_active("ACCESSIBILITY_ISSUE", session_id) {
            50.0
        } else {
            100.0
        };
        // Satisfaction and engagement have no dedicated rolling-window
        // signal in this engine's scope; they default to neutral until
        // an upstream survey/engagement feed is wired in.
        let satisfaction_score = 80.0;
        let engagement_score = 80.0;

        let overall = performance_score * 0.25
            + usability_score * 0.20
            + accessibility_score * 0.15
            + satisfaction_score * 0.25
            + engagement_score * 0.15;

        ctx.metrics.set_gauge(
            &MetricKey::new("ux_scorecard_overall", &[("session_id", session_id)]),
            overall.round() as i64,
        );
    }
}

/// Hourly: render per-page click-density heatmaps from click-count
/// windows and persist the rendered summary.
async fn generate_heatmaps(ctx: &EngineContext) {
    for key in ctx.windows.keys() {
        if key.metric != "click_count" {
            continue;
        }
        let Some(total_clicks) = ctx.windows.mean(&key).map(|m| m * ctx.windows.count(&key) as f64) else {
            continue;
        };
        persist_report(
            ctx,
            &key.entity_id,
            "UX_HEATMAP",
            json!({ "page_id": key.entity_id, "total_clicks": total_clicks }),
        )
        .await;
    }
}

/// Every fifteen minutes: pick sessions with unusually heavy activity
/// (by sample count) as replay candidates for manual UX review.
async fn select_session_replays(ctx: &EngineContext) {
    let mut candidates = Vec::new();
    for key in ctx.windows.keys() {
        if key.metric != "load_time_ms" {
            continue;
        }
        let count = ctx.windows.count(&key);
        if count >= SESSION_REPLAY_MIN_SAMPLES {
            candidates.push(json!({ "session_id": key.entity_id, "sample_count": count }));
        }
    }
    if candidates.is_empty() {
        return;
    }
    persist_report(ctx, "engine", "SESSION_REPLAY_SELECTION", json!({ "candidates": candidates })).await;
}

/// Hourly: compile the UX scorecard gauges into a single report record.
async fn generate_ux_report(ctx: &EngineContext) {
    for key in ctx.windows.keys() {
        if key.metric != "load_time_ms" {
            continue;
        }
        let overall = ctx
            .metrics
            .gauge_value(&MetricKey::new("ux_scorecard_overall", &[("session_id", &key.entity_id)]));
        persist_report(
            ctx,
            &key.entity_id,
            "UX_REPORT",
            json!({ "session_id": key.entity_id, "overall_score": overall }),
        )
        .await;
    }
}

/// Hourly: recompute each tracked baseline from the last seven days of
/// persisted samples and atomically swap it in, replacing the online
/// Welford estimator that's been accumulating since the last recompute
/// (or since startup).
async fn recompute_baselines(ctx: &EngineContext) {
    let since = Utc::now() - ChronoDuration::days(BASELINE_LOOKBACK_DAYS);
    for key in ctx.baselines.keys() {
        let samples = match ctx.store.recent_samples(&key.entity_id, &key.metric, since).await {
            Ok(samples) => samples,
            Err(err) => {
                tracing::warn!(entity_id = %key.entity_id, metric = %key.metric, error = %err, "baseline recompute: sample fetch failed");
                continue;
            }
        };
        if samples.is_empty() {
            continue;
        }
        ctx.baselines.replace_baseline(&key, WelfordState::from_samples(&samples));
    }
}

/// Every five minutes: refresh predictions for every root service in
/// the dependency graph across the tracked model set, persisting each
/// output and reflecting its confidence into a gauge for the model
/// evaluation task to read.
async fn refresh_predictions(ctx: &EngineContext) {
    let mut entities = ctx.graph.roots();
    if entities.is_empty() {
        entities.push("engine".to_string());
    }

    for entity_id in entities {
        for prediction_type in TRACKED_MODELS {
            let input = ModelInput {
                entity_id: entity_id.clone(),
                prediction_type: prediction_type.as_str(),
                features: json!({}),
            };
            let output = match ctx.model_runtime.predict(input).await {
                Ok(output) => output,
                Err(err) => {
                    tracing::warn!(model = prediction_type.as_str(), error = %err, "prediction refresh failed");
                    continue;
                }
            };
            ctx.metrics.set_gauge(
                &MetricKey::new("model_confidence_pct", &[("model", prediction_type.as_str())]),
                (output.confidence * 100.0).round() as i64,
            );
            persist_report(
                ctx,
                &entity_id,
                "PREDICTIVE_INSIGHT",
                json!({
                    "model": prediction_type.as_str(),
                    "confidence": output.confidence,
                    "output": output.payload,
                }),
            )
            .await;
        }
    }
}

/// Every ten minutes: flag any tracked model whose confidence gauge has
/// fallen below the retraining floor, queuing it for the next
/// retraining cycle.
async fn evaluate_models(ctx: &EngineContext, flags: &Mutex<Vec<String>>) {
    for model in TRACKED_MODELS {
        let confidence_pct = ctx.metrics.gauge_value(&MetricKey::new("model_confidence_pct", &[("model", model.as_str())]));
        if confidence_pct == 0 {
            // No prediction has been refreshed for this model yet.
            continue;
        }
        if (confidence_pct as f64 / 100.0) < MIN_MODEL_CONFIDENCE {
            let mut guard = flags.lock();
            if !guard.iter().any(|m| m == model.as_str()) {
                guard.push(model.as_str().to_string());
            }
            drop(guard);
            let _ = ctx
                .alerts
                .raise(
                    "MODEL_RETRAINING_NEEDED",
                    model.as_str(),
                    Severity::Warning,
                    format!("model {} confidence {confidence_pct}% below retraining floor", model.as_str()),
                )
                .await;
        }
    }
}

/// Hourly: submit a retraining job for every model flagged by
/// `evaluate_models` since the last cycle, then clear the queue.
async fn submit_retraining_jobs(ctx: &EngineContext, flags: &Mutex<Vec<String>>) {
    let pending: Vec<String> = std::mem::take(&mut *flags.lock());
    for model_name in pending {
        match ctx.model_runtime.request_retraining(&model_name).await {
            Ok(()) => {
                let _ = ctx
                    .alerts
                    .resolve("MODEL_RETRAINING_NEEDED", &model_name, "retraining job submitted")
                    .await;
            }
            Err(err) => {
                tracing::warn!(model = %model_name, error = %err, "retraining submission failed, will re-flag next evaluation");
            }
        }
    }
}

/// Daily: sweep expired samples out of the rolling window store ahead
/// of its own lazy per-query pruning, so idle keys don't hold stale
/// data indefinitely.
async fn cleanup_old_data(ctx: &EngineContext) {
    ctx.windows.cleanup();
}

/// Guards against registering the analyzers twice against the same
/// scheduler in a process (main bootstraps this module exactly once).
static REGISTERED: AtomicBool = AtomicBool::new(false);

/// Idempotent wrapper around [`register_all`] for callers (like `main`)
/// that might otherwise double-register on a config reload.
pub fn register_once(scheduler: &Arc<crate::clock::Scheduler>, ctx: Arc<EngineContext>) {
    if REGISTERED.swap(true, Ordering::SeqCst) {
        tracing::warn!("periodic analyzers already registered, skipping duplicate registration");
        return;
    }
    register_all(scheduler, ctx);
}
