//! Run lifecycle events and their delivery.
//!
//! Every event carries the run id and a per-run sequence number that only
//! increases. Delivery never blocks the execution loop: each subscriber has a
//! bounded buffer and a slow subscriber loses the oldest events, which it
//! observes as a gap in the sequence and in [`EventSubscription::dropped`].

use chrono::{DateTime, Utc};
use devmaster_core::StateContainer;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;
use uuid::Uuid;

/// How the loop picked the next agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    /// The agent named its successor in its output.
    Override,
    /// The agent's delta set `active_agent`.
    Delta,
    /// A graph edge.
    Edge,
    /// The configured fallback after a failure.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        entry_agent: String,
    },
    AgentStarted {
        agent: String,
        attempt: u32,
        step: u32,
    },
    AgentCompleted {
        agent: String,
        attempt: u32,
        duration_ms: u64,
    },
    AgentFailed {
        agent: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    ArtifactOverwritten {
        agent: String,
        key: String,
        old: serde_json::Value,
        new: serde_json::Value,
    },
    RoutingDecided {
        from: String,
        to: String,
        reason: RouteReason,
    },
    RunCompleted {
        steps: u32,
    },
    RunFailed {
        error: String,
    },
    RunAborted {
        reason: String,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::AgentStarted { .. } => "agent_started",
            Self::AgentCompleted { .. } => "agent_completed",
            Self::AgentFailed { .. } => "agent_failed",
            Self::ArtifactOverwritten { .. } => "artifact_overwritten",
            Self::RoutingDecided { .. } => "routing_decided",
            Self::RunCompleted { .. } => "run_completed",
            Self::RunFailed { .. } => "run_failed",
            Self::RunAborted { .. } => "run_aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunCompleted { .. } | Self::RunFailed { .. } | Self::RunAborted { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Receives events from the execution loop. `publish` must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: RunEvent);
}

/// Discards everything.
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: RunEvent) {}
}

/// Fan-out of run events to per-run and global subscribers.
pub struct EventBus {
    capacity: usize,
    global: broadcast::Sender<RunEvent>,
    runs: RwLock<HashMap<Uuid, broadcast::Sender<RunEvent>>>,
}

impl EventBus {
    /// `capacity` is the per-subscriber buffer; it must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (global, _) = broadcast::channel(capacity);
        Self {
            capacity,
            global,
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Open the run's channel and subscribe to it. Called when a run starts;
    /// [`EventBus::close_run`] ends it.
    pub(crate) fn open_run(&self, run_id: Uuid) -> EventSubscription {
        let mut runs = self.runs.write();
        let sender = runs
            .entry(run_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        EventSubscription::new(sender.subscribe())
    }

    /// Events of one run, from now on. `None` unless the run is live: a run
    /// that never started or already closed has no stream to join.
    pub fn subscribe(&self, run_id: Uuid) -> Option<EventSubscription> {
        self.runs
            .read()
            .get(&run_id)
            .map(|sender| EventSubscription::new(sender.subscribe()))
    }

    /// Events of every run. Never closes.
    pub fn subscribe_all(&self) -> EventSubscription {
        EventSubscription::new(self.global.subscribe())
    }

    /// Drop the run's channel so its subscribers see the end of the stream.
    pub fn close_run(&self, run_id: Uuid) {
        self.runs.write().remove(&run_id);
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: RunEvent) {
        if let Some(sender) = self.runs.read().get(&event.run_id) {
            // No receivers is not an error.
            let _ = sender.send(event.clone());
        }
        let _ = self.global.send(event);
    }
}

/// A receiving end of the bus.
pub struct EventSubscription {
    rx: broadcast::Receiver<RunEvent>,
    dropped: u64,
}

impl EventSubscription {
    fn new(rx: broadcast::Receiver<RunEvent>) -> Self {
        Self { rx, dropped: 0 }
    }

    /// Next event, or `None` once the stream is closed and drained.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<RunEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Everything currently buffered.
    pub fn drain(&mut self) -> Vec<RunEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events lost to overflow so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn note_lag(&mut self, n: u64) {
        self.dropped += n;
        warn!(dropped = n, "Event subscriber lagging, oldest events dropped");
    }
}

/// Stamps events for one run and hands them to the sink.
///
/// The sequence lives in the state container so a resumed run continues
/// numbering where the checkpoint left off.
pub(crate) struct RunEmitter {
    sink: Arc<dyn EventSink>,
}

impl RunEmitter {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, state: &mut StateContainer, kind: EventKind) {
        state.event_sequence += 1;
        self.sink.publish(RunEvent {
            run_id: state.run_id,
            sequence: state.event_sequence,
            timestamp: Utc::now(),
            kind,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn started(run_id: Uuid, sequence: u64) -> RunEvent {
        RunEvent {
            run_id,
            sequence,
            timestamp: Utc::now(),
            kind: EventKind::RunStarted {
                entry_agent: "Echo".into(),
            },
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = started(Uuid::new_v4(), 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_started");
        assert_eq!(json["entry_agent"], "Echo");
        assert_eq!(json["sequence"], 1);
        let back: RunEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_per_run_and_global_delivery() {
        let bus = EventBus::new(8);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut run_a = bus.open_run(a);
        let mut all = bus.subscribe_all();

        bus.publish(started(a, 1));
        bus.publish(started(b, 1));

        let events = run_a.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].run_id, a);
        assert_eq!(all.drain().len(), 2);
    }

    #[test]
    fn test_subscribe_requires_open_run() {
        let bus = EventBus::new(4);
        let run = Uuid::new_v4();
        assert!(bus.subscribe(run).is_none());

        let _opened = bus.open_run(run);
        let mut late = bus.subscribe(run).unwrap();
        bus.publish(started(run, 1));
        assert_eq!(late.try_recv().map(|e| e.sequence), Some(1));
    }

    #[test]
    fn test_slow_subscriber_drops_oldest() {
        let bus = EventBus::new(2);
        let run = Uuid::new_v4();
        let mut sub = bus.open_run(run);
        for seq in 1..=5 {
            bus.publish(started(run, seq));
        }
        let seqs: Vec<u64> = sub.drain().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
        assert_eq!(sub.dropped(), 3);
    }

    #[tokio::test]
    async fn test_close_run_ends_stream_after_buffered_events() {
        let bus = EventBus::new(4);
        let run = Uuid::new_v4();
        let mut sub = bus.open_run(run);
        bus.publish(started(run, 1));
        bus.close_run(run);
        assert!(bus.subscribe(run).is_none());
        assert_eq!(sub.recv().await.map(|e| e.sequence), Some(1));
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_emitter_advances_state_sequence() {
        let bus = Arc::new(EventBus::new(4));
        let mut state = StateContainer::new(Uuid::new_v4(), "Echo");
        state.event_sequence = 7;
        let mut sub = bus.open_run(state.run_id);
        let emitter = RunEmitter::new(bus);
        emitter.emit(&mut state, EventKind::RunCompleted { steps: 1 });
        assert_eq!(state.event_sequence, 8);
        assert_eq!(sub.try_recv().unwrap().sequence, 8);
    }
}
