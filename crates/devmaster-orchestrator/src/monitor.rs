use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    #[default]
    Idle,
    Working,
    /// The last invocation failed.
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub invocations: u64,
    pub failures: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub name: String,
    pub status: WorkerStatus,
    /// Invocations currently executing, across all runs.
    pub in_flight: u32,
    pub last_error: Option<String>,
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: WorkerStatus::Idle,
            in_flight: 0,
            last_error: None,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics per agent name across every run of an engine.
#[derive(Clone, Default)]
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, AgentState>>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an invocation of `name` as started.
    pub async fn start(&self, name: &str) {
        let mut states = self.states.write().await;
        let state = states
            .entry(name.to_string())
            .or_insert_with(|| AgentState::new(name));
        state.in_flight += 1;
        state.metrics.invocations += 1;
        state.status = WorkerStatus::Working;
    }

    pub async fn succeed(&self, name: &str, duration: Duration) {
        self.finish(name, duration, None).await;
    }

    pub async fn fail(&self, name: &str, duration: Duration, error: &str) {
        self.finish(name, duration, Some(error)).await;
    }

    async fn finish(&self, name: &str, duration: Duration, error: Option<&str>) {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(name) else {
            return;
        };
        state.in_flight = state.in_flight.saturating_sub(1);
        state.metrics.duration_ms += u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        if let Some(error) = error {
            state.metrics.failures += 1;
            state.last_error = Some(error.to_string());
            state.status = WorkerStatus::Error;
        } else if state.in_flight == 0 {
            state.status = WorkerStatus::Idle;
        }
    }

    /// All agents seen so far, ordered by name.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        self.states.read().await.values().cloned().collect()
    }

    pub async fn get_state(&self, name: &str) -> Option<AgentState> {
        self.states.read().await.get(name).cloned()
    }

    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.invocations += state.metrics.invocations;
            total.failures += state.metrics.failures;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_agent_has_no_state() {
        let monitor = AgentMonitor::new();
        assert!(monitor.snapshot().await.is_empty());
        assert!(monitor.get_state("Echo").await.is_none());
    }

    #[tokio::test]
    async fn test_start_and_succeed() {
        let monitor = AgentMonitor::new();
        monitor.start("Echo").await;
        let state = monitor.get_state("Echo").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.in_flight, 1);

        monitor.succeed("Echo", Duration::from_millis(40)).await;
        let state = monitor.get_state("Echo").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert_eq!(state.in_flight, 0);
        assert_eq!(state.metrics.invocations, 1);
        assert_eq!(state.metrics.duration_ms, 40);
    }

    #[tokio::test]
    async fn test_failure_is_recorded() {
        let monitor = AgentMonitor::new();
        monitor.start("Flaky").await;
        monitor.fail("Flaky", Duration::from_millis(5), "boom").await;
        let state = monitor.get_state("Flaky").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Error);
        assert_eq!(state.metrics.failures, 1);
        assert_eq!(state.last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_aggregate_and_json() {
        let monitor = AgentMonitor::new();
        monitor.start("A").await;
        monitor.succeed("A", Duration::from_millis(10)).await;
        monitor.start("B").await;
        monitor.fail("B", Duration::from_millis(20), "nope").await;

        let total = monitor.aggregate_metrics().await;
        assert_eq!(total.invocations, 2);
        assert_eq!(total.failures, 1);
        assert_eq!(total.duration_ms, 30);

        let json = monitor.to_json().await;
        assert_eq!(json["agents"].as_array().unwrap().len(), 2);
        assert_eq!(json["aggregate"]["failures"], 1);
    }
}
