//! Multi-agent orchestration engine for DevMaster.
//!
//! Agents are wired into a routing graph and driven by an execution loop that
//! invokes one agent per step, merges its delta into the shared state, and
//! picks the next agent. The loop enforces step and error budgets, retries,
//! fallbacks, per-invocation timeouts, and cooperative cancellation, and
//! publishes lifecycle events as it goes.
//!
//! # Main types
//!
//! - [`Orchestrator`] — The execution loop over a registry and graph.
//! - [`OrchestrationGraph`] — Direct and conditional routing edges.
//! - [`RunManager`] — Starts, tracks, cancels, and resumes background runs.
//! - [`EventBus`] — Non-blocking per-run and global event delivery.
//! - [`StateStore`] — Checkpoint persistence (file or in-memory).
//! - [`AgentMonitor`] — Per-agent invocation metrics.

/// Cooperative cancellation handles.
pub mod cancel;
/// Engine-wide limits and policies.
pub mod config;
/// The execution loop.
pub mod engine;
/// Run lifecycle events and the event bus.
pub mod events;
/// Routing graph.
pub mod graph;
/// Agent health and metrics monitoring.
pub mod monitor;
/// Background run management.
pub mod runs;
/// Run state checkpoint stores.
pub mod store;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::{CancellationPolicy, FailureClass, FallbackConfig, OrchestratorConfig};
pub use engine::{Orchestrator, RunOutcome};
pub use events::{
    EventBus, EventKind, EventSink, EventSubscription, NullSink, RouteReason, RunEvent,
};
pub use graph::{task_kind_router, GraphBuilder, OrchestrationGraph, RoutingFn};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use runs::RunManager;
pub use store::{FileStateStore, MemoryStateStore, StateStore};
