//! Service Dependency Graph.
//!
//! No single teacher module is a direct analogue for a multigraph, so
//! this one is assembled from two teacher idioms: edge bookkeeping uses
//! the same atomics-plus-`RwLock`-maps shape as `RouteQualityMetrics`,
//! and the edge breaker reuses the session state machine's three-state
//! vocabulary (`SessionState`/`TransitionReason` in the teacher's
//! `binance_session` module) rather than inventing a new one.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;

const CALL_WINDOW: usize = 20;
const MAX_DEPTH_DEFAULT: usize = 5;
const CASCADE_SUCCESS_RATE_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CallObservation {
    pub success: bool,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct EdgeKey {
    pub source: String,
    pub target: String,
    pub edge_type: String,
}

struct Edge {
    recent_calls: VecDeque<CallObservation>,
    consecutive_failures: u32,
    breaker: BreakerState,
}

impl Edge {
    fn new() -> Self {
        Self {
            recent_calls: VecDeque::new(),
            consecutive_failures: 0,
            breaker: BreakerState::Closed,
        }
    }

    fn record(&mut self, call: CallObservation) {
        if call.success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
        self.recent_calls.push_back(call);
        if self.recent_calls.len() > CALL_WINDOW {
            self.recent_calls.pop_front();
        }
    }

    fn success_rate(&self) -> f64 {
        if self.recent_calls.is_empty() {
            return 1.0;
        }
        let successes = self.recent_calls.iter().filter(|c| c.success).count();
        successes as f64 / self.recent_calls.len() as f64
    }

    fn failure_probability(&self) -> f64 {
        1.0 - self.success_rate()
    }

    fn mean_latency(&self) -> f64 {
        if self.recent_calls.is_empty() {
            return 0.0;
        }
        self.recent_calls.iter().map(|c| c.latency_ms).sum::<f64>() / self.recent_calls.len() as f64
    }

    fn is_risky(&self) -> bool {
        self.breaker == BreakerState::Open || self.success_rate() < CASCADE_SUCCESS_RATE_THRESHOLD
    }
}

/// A bottleneck reported by critical-path selection.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPath {
    pub path: Vec<String>,
    pub bottleneck: String,
    pub risk_score: f64,
}

struct Inner {
    vertices: HashSet<String>,
    isolated: HashSet<String>,
    /// Per-service criticality score (spec's Service data model), last
    /// value reported on a dependency event; absent until first observed.
    criticality: HashMap<String, f64>,
    edges: HashMap<EdgeKey, Edge>,
    /// Adjacency for fast neighbor walks, kept separate from `edges` so
    /// multiple edge types between the same pair collapse to one hop.
    outgoing: HashMap<String, HashSet<String>>,
    incoming: HashMap<String, HashSet<String>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            vertices: HashSet::new(),
            isolated: HashSet::new(),
            criticality: HashMap::new(),
            edges: HashMap::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
        }
    }
}

/// Directed multigraph of services with edge health state, rolling call
/// windows, and cascade/critical-path analysis.
pub struct DependencyGraph {
    inner: RwLock<Inner>,
}

impl DependencyGraph {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(Inner::new()),
        })
    }

    /// Upsert an edge and append a call observation to its rolling
    /// window. Self-loops are only created when explicitly observed.
    pub fn observe(
        &self,
        source: &str,
        target: &str,
        edge_type: &str,
        call: CallObservation,
        breaker: BreakerState,
    ) {
        let mut inner = self.inner.write();
        inner.vertices.insert(source.to_string());
        inner.vertices.insert(target.to_string());
        inner
            .outgoing
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
        inner
            .incoming
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string());

        let key = EdgeKey {
            source: source.to_string(),
            target: target.to_string(),
            edge_type: edge_type.to_string(),
        };
        let edge = inner.edges.entry(key).or_insert_with(Edge::new);
        edge.record(call);
        edge.breaker = breaker;
    }

    pub fn set_isolated(&self, service: &str, isolated: bool) {
        let mut inner = self.inner.write();
        if isolated {
            inner.isolated.insert(service.to_string());
        } else {
            inner.isolated.remove(service);
        }
    }

    /// Records the latest reported criticality score for `service`.
    /// `vertices` doesn't need to already contain `service` - a
    /// criticality report can arrive before any edge touching it.
    pub fn set_criticality(&self, service: &str, criticality: f64) {
        let mut inner = self.inner.write();
        inner.vertices.insert(service.to_string());
        inner.criticality.insert(service.to_string(), criticality);
    }

    /// Last reported criticality score for `service`, if any.
    pub fn criticality(&self, service: &str) -> Option<f64> {
        self.inner.read().criticality.get(service).copied()
    }

    /// Consecutive failures across all edge types between `source` and
    /// `target`, reset to zero on any success.
    pub fn failures(&self, source: &str, target: &str) -> u32 {
        let inner = self.inner.read();
        inner
            .edges
            .iter()
            .filter(|(k, _)| k.source == source && k.target == target)
            .map(|(_, e)| e.consecutive_failures)
            .max()
            .unwrap_or(0)
    }

    pub fn is_root(&self, service: &str) -> bool {
        let inner = self.inner.read();
        inner
            .incoming
            .get(service)
            .map(|preds| preds.is_empty())
            .unwrap_or(true)
    }

    /// DFS enumeration of simple paths from `start` up to `max_depth`
    /// hops (default 5), deduplicated by vertex set and excluding
    /// isolated vertices.
    pub fn paths(&self, start: &str, max_depth: Option<usize>) -> Vec<Vec<String>> {
        let inner = self.inner.read();
        let max_depth = max_depth.unwrap_or(MAX_DEPTH_DEFAULT);
        if inner.isolated.contains(start) || !inner.vertices.contains(start) {
            return Vec::new();
        }

        let mut results = Vec::new();
        let mut seen_vertex_sets = HashSet::new();
        let mut path = vec![start.to_string()];
        let mut visiting: HashSet<String> = [start.to_string()].into_iter().collect();

        self.dfs_paths(&inner, start, max_depth, &mut path, &mut visiting, &mut results, &mut seen_vertex_sets);
        results
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        &self,
        inner: &Inner,
        current: &str,
        remaining_depth: usize,
        path: &mut Vec<String>,
        visiting: &mut HashSet<String>,
        results: &mut Vec<Vec<String>>,
        seen_vertex_sets: &mut HashSet<Vec<String>>,
    ) {
        if path.len() > 1 {
            let mut sorted = path.clone();
            sorted.sort();
            if seen_vertex_sets.insert(sorted) {
                results.push(path.clone());
            }
        }
        if remaining_depth == 0 {
            return;
        }
        let Some(neighbors) = inner.outgoing.get(current) else {
            return;
        };
        for next in neighbors {
            if inner.isolated.contains(next) || visiting.contains(next) {
                continue;
            }
            visiting.insert(next.clone());
            path.push(next.clone());
            self.dfs_paths(inner, next, remaining_depth - 1, path, visiting, results, seen_vertex_sets);
            path.pop();
            visiting.remove(next);
        }
    }

    /// Selects the path maximizing total latency-weighted failure risk
    /// and reports the bottleneck: the vertex whose inbound edge on that
    /// path has the highest failure probability.
    pub fn critical_path(&self, start: &str) -> Option<CriticalPath> {
        let inner = self.inner.read();
        let candidates = self.paths(start, None);
        let mut best: Option<CriticalPath> = None;

        for path in candidates {
            if path.len() < 2 {
                continue;
            }
            let mut risk = 0.0;
            let mut bottleneck = path[1].clone();
            let mut worst_failure_prob = -1.0;

            for window in path.windows(2) {
                let (from, to) = (&window[0], &window[1]);
                let Some(edge) = self.best_edge(&inner, from, to) else {
                    continue;
                };
                risk += edge.mean_latency() * edge.failure_probability();
                if edge.failure_probability() > worst_failure_prob {
                    worst_failure_prob = edge.failure_probability();
                    bottleneck = to.clone();
                }
            }

            let candidate = CriticalPath {
                path,
                bottleneck,
                risk_score: risk,
            };
            if best.as_ref().map(|b| candidate.risk_score > b.risk_score).unwrap_or(true) {
                best = Some(candidate);
            }
        }
        best
    }

    fn best_edge<'a>(&self, inner: &'a Inner, source: &str, target: &str) -> Option<&'a Edge> {
        inner
            .edges
            .iter()
            .filter(|(k, _)| k.source == source && k.target == target)
            .map(|(_, e)| e)
            .max_by(|a, b| a.failure_probability().partial_cmp(&b.failure_probability()).unwrap())
    }

    /// BFS from `failed` across edges whose success rate is below 0.5 or
    /// whose circuit breaker is open, returning the set of reachable
    /// (and therefore at-risk) downstream vertices.
    pub fn cascade_risk(&self, failed: &str) -> HashSet<String> {
        let inner = self.inner.read();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(failed.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = inner.outgoing.get(&current) else {
                continue;
            };
            for next in neighbors {
                if visited.contains(next) || inner.isolated.contains(next) {
                    continue;
                }
                let risky = inner
                    .edges
                    .iter()
                    .any(|(k, e)| k.source == current && k.target == *next && e.is_risky());
                if risky {
                    visited.insert(next.clone());
                    queue.push_back(next.clone());
                }
            }
        }
        visited
    }

    pub fn vertex_count(&self) -> usize {
        self.inner.read().vertices.len()
    }

    /// Every non-isolated vertex with no upstream edges, the starting
    /// points the periodic critical-path analyzer enumerates from.
    pub fn roots(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .vertices
            .iter()
            .filter(|v| !inner.isolated.contains(*v))
            .filter(|v| inner.incoming.get(*v).map(|preds| preds.is_empty()).unwrap_or(true))
            .cloned()
            .collect()
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_call() -> CallObservation {
        CallObservation {
            success: true,
            latency_ms: 10.0,
        }
    }

    fn failed_call() -> CallObservation {
        CallObservation {
            success: false,
            latency_ms: 10.0,
        }
    }

    #[test]
    fn root_has_no_inbound_edges() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        assert!(graph.is_root("api"));
        assert!(!graph.is_root("db"));
    }

    #[test]
    fn failures_reset_on_success() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", failed_call(), BreakerState::Closed);
        graph.observe("api", "db", "sql", failed_call(), BreakerState::Closed);
        assert_eq!(graph.failures("api", "db"), 2);
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        assert_eq!(graph.failures("api", "db"), 0);
    }

    #[test]
    fn paths_deduplicate_by_vertex_set() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        graph.observe("db", "cache", "sql", ok_call(), BreakerState::Closed);
        let paths = graph.paths("api", Some(5));
        assert!(paths.iter().any(|p| p == &vec!["api".to_string(), "db".to_string()]));
        assert!(paths
            .iter()
            .any(|p| p == &vec!["api".to_string(), "db".to_string(), "cache".to_string()]));
    }

    #[test]
    fn isolated_vertex_excluded_from_paths() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        graph.set_isolated("db", true);
        let paths = graph.paths("api", Some(5));
        assert!(paths.is_empty());
    }

    #[test]
    fn cascade_risk_follows_low_success_rate_edges() {
        let graph = DependencyGraph::new();
        for _ in 0..10 {
            graph.observe("api", "db", "sql", failed_call(), BreakerState::Closed);
        }
        graph.observe("db", "cache", "sql", ok_call(), BreakerState::Closed);
        let affected = graph.cascade_risk("api");
        assert!(affected.contains("db"));
    }

    #[test]
    fn critical_path_reports_highest_failure_bottleneck() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        for _ in 0..5 {
            graph.observe("db", "cache", "sql", failed_call(), BreakerState::Closed);
        }
        let cp = graph.critical_path("api").unwrap();
        assert_eq!(cp.bottleneck, "cache");
    }

    #[test]
    fn criticality_is_recorded_and_retrievable() {
        let graph = DependencyGraph::new();
        assert_eq!(graph.criticality("billing"), None);
        graph.set_criticality("billing", 0.9);
        assert_eq!(graph.criticality("billing"), Some(0.9));
        assert_eq!(graph.vertex_count(), 1);
    }

    #[test]
    fn roots_excludes_targets_and_isolated_vertices() {
        let graph = DependencyGraph::new();
        graph.observe("api", "db", "sql", ok_call(), BreakerState::Closed);
        graph.observe("worker", "db", "sql", ok_call(), BreakerState::Closed);
        graph.set_isolated("worker", true);
        let roots = graph.roots();
        assert!(roots.contains(&"api".to_string()));
        assert!(!roots.contains(&"db".to_string()));
        assert!(!roots.contains(&"worker".to_string()));
    }
}
