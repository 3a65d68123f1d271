//! Routing graph: which agent runs after which.
//!
//! Edges are either direct (`from -> to`) or conditional (`from -> f(state)`).
//! The graph is validated against the agent registry when built and is
//! immutable afterwards.

use devmaster_agent::AgentRegistry;
use devmaster_core::{DevMasterError, DevMasterResult, StateContainer, TaskKind, END};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Picks the next agent from the current state. `None` means no route matched.
pub type RoutingFn = Arc<dyn Fn(&StateContainer) -> Option<String> + Send + Sync>;

#[derive(Clone)]
enum Edge {
    Direct(String),
    Conditional(RoutingFn),
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(to) => write!(f, "Direct({to})"),
            Self::Conditional(_) => f.write_str("Conditional(..)"),
        }
    }
}

/// A named, validated routing graph.
#[derive(Debug, Clone)]
pub struct OrchestrationGraph {
    name: String,
    entry: String,
    edges: HashMap<String, Edge>,
}

impl OrchestrationGraph {
    pub fn builder(name: impl Into<String>, entry: impl Into<String>) -> GraphBuilder {
        GraphBuilder {
            name: name.into(),
            entry: entry.into(),
            edges: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Agent a run starts at when the caller names none.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Resolve the outgoing edge of `from` against `state`.
    pub fn route(&self, from: &str, state: &StateContainer) -> Option<String> {
        match self.edges.get(from)? {
            Edge::Direct(to) => Some(to.clone()),
            Edge::Conditional(router) => router(state),
        }
    }
}

/// Accumulates edges; [`GraphBuilder::build`] checks them against a registry.
pub struct GraphBuilder {
    name: String,
    entry: String,
    edges: HashMap<String, Edge>,
}

impl GraphBuilder {
    /// Unconditional edge. `to` may be [`END`]. Replaces any earlier edge from `from`.
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.insert(from.into(), Edge::Direct(to.into()));
        self
    }

    pub fn add_conditional_edge<F>(mut self, from: impl Into<String>, router: F) -> Self
    where
        F: Fn(&StateContainer) -> Option<String> + Send + Sync + 'static,
    {
        self.edges
            .insert(from.into(), Edge::Conditional(Arc::new(router)));
        self
    }

    pub fn add_routing_fn(mut self, from: impl Into<String>, router: RoutingFn) -> Self {
        self.edges.insert(from.into(), Edge::Conditional(router));
        self
    }

    /// Fails with `UnknownAgent` if the entry, an edge source, or a direct
    /// target is not registered. Conditional targets are checked at run time.
    pub fn build(self, registry: &AgentRegistry) -> DevMasterResult<OrchestrationGraph> {
        if !registry.contains(&self.entry) {
            return Err(DevMasterError::UnknownAgent(self.entry));
        }
        for (from, edge) in &self.edges {
            if !registry.contains(from) {
                return Err(DevMasterError::UnknownAgent(from.clone()));
            }
            if let Edge::Direct(to) = edge {
                if to != END && !registry.contains(to) {
                    return Err(DevMasterError::UnknownAgent(to.clone()));
                }
            }
        }
        Ok(OrchestrationGraph {
            name: self.name,
            entry: self.entry,
            edges: self.edges,
        })
    }
}

/// Routes on the state's task kind; unmapped kinds end the run.
pub fn task_kind_router(routes: HashMap<TaskKind, String>) -> RoutingFn {
    Arc::new(move |state: &StateContainer| {
        Some(
            routes
                .get(&state.task_kind)
                .cloned()
                .unwrap_or_else(|| END.to_string()),
        )
    })
}
