use crate::cancel::CancelToken;
use crate::config::{CancellationPolicy, FailureClass, OrchestratorConfig};
use crate::events::{EventKind, EventSink, NullSink, RouteReason, RunEmitter};
use crate::graph::OrchestrationGraph;
use crate::monitor::AgentMonitor;
use crate::store::StateStore;
use devmaster_agent::{Agent, AgentOutput, AgentRegistry, RetryPolicy};
use devmaster_core::{DevMasterError, InitialState, RunStatus, StateContainer, END};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// The final state of a run plus how it got there.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub state: StateContainer,
    /// Agent invocations performed by this drive of the loop, retries included.
    pub steps: u32,
    /// Set when the run failed or hit its step budget.
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        self.state.status()
    }
}

enum Invocation {
    Succeeded(AgentOutput),
    Failed { class: FailureClass, cause: String },
    Cancelled,
}

enum Step {
    Continue,
    Retry(Duration),
    Done(Option<String>),
}

enum Ending {
    Completed,
    Failed(String),
    Aborted(String),
}

/// Drives runs through the routing graph, one agent invocation per step.
///
/// The registry and graph are shared read-only by every run. Each invocation
/// executes in its own task against a snapshot of the state, so a panicking or
/// hung agent cannot corrupt the run; only the loop merges results back.
pub struct Orchestrator {
    registry: Arc<AgentRegistry>,
    graph: Arc<OrchestrationGraph>,
    config: OrchestratorConfig,
    sink: Arc<dyn EventSink>,
    store: Option<Arc<dyn StateStore>>,
    monitor: AgentMonitor,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        graph: OrchestrationGraph,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            graph: Arc::new(graph),
            config,
            sink: Arc::new(NullSink),
            store: None,
            monitor: AgentMonitor::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Checkpoint state to `store` after every step.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &OrchestrationGraph {
        &self.graph
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    pub fn store(&self) -> Option<&Arc<dyn StateStore>> {
        self.store.as_ref()
    }

    /// Start a fresh, uncancellable run at `entry_agent` and drive it to the end.
    pub async fn run_request(&self, entry_agent: &str, initial: InitialState) -> RunOutcome {
        let state = StateContainer::from_initial(Uuid::new_v4(), entry_agent, initial);
        self.run(state, CancelToken::never()).await
    }

    /// Drive `state` until it reaches a terminal status.
    ///
    /// Works for fresh and resumed states alike; a state that is already
    /// terminal is returned untouched.
    pub async fn run(&self, state: StateContainer, cancel: CancelToken) -> RunOutcome {
        let span = info_span!("run", run_id = %state.run_id);
        self.drive(state, cancel).instrument(span).await
    }

    async fn drive(&self, mut state: StateContainer, mut cancel: CancelToken) -> RunOutcome {
        if !state.is_running() {
            warn!(status = %state.status(), "Run already finished, nothing to drive");
            let error = DevMasterError::RunFinished(state.run_id).to_string();
            return RunOutcome {
                state,
                steps: 0,
                error: Some(error),
            };
        }

        let emitter = RunEmitter::new(Arc::clone(&self.sink));
        let entry = state.active_agent.clone();
        info!(
            entry = %entry,
            graph = self.graph.name(),
            resumed = state.event_sequence > 0,
            "Run started"
        );
        emitter.emit(&mut state, EventKind::RunStarted { entry_agent: entry });

        let mut steps: u32 = 0;
        let mut attempt: u32 = 1;
        let error = loop {
            if cancel.is_cancelled() {
                self.conclude(&mut state, &emitter, steps, Ending::Aborted("cancelled".into()));
                break None;
            }
            if state.at_end() {
                self.conclude(&mut state, &emitter, steps, Ending::Completed);
                break None;
            }
            if steps >= self.config.step_budget {
                let err = DevMasterError::StepBudgetExceeded {
                    budget: self.config.step_budget,
                }
                .to_string();
                self.conclude(&mut state, &emitter, steps, Ending::Aborted(err.clone()));
                break Some(err);
            }

            let agent_name = state.active_agent.clone();
            let agent = match self.registry.resolve(&agent_name) {
                Ok(agent) => agent,
                Err(err) => {
                    let err = err.to_string();
                    self.conclude(&mut state, &emitter, steps, Ending::Failed(err.clone()));
                    break Some(err);
                }
            };
            let policy = agent.retry_policy().unwrap_or_else(RetryPolicy::none);

            steps += 1;
            debug!(agent = %agent_name, attempt, step = steps, "Invoking agent");
            emitter.emit(
                &mut state,
                EventKind::AgentStarted {
                    agent: agent_name.clone(),
                    attempt,
                    step: steps,
                },
            );
            self.monitor.start(&agent_name).await;
            let started = Instant::now();
            let invocation = self.invoke(agent, &state, &mut cancel).await;
            let elapsed = started.elapsed();

            let step = match invocation {
                Invocation::Cancelled => {
                    self.monitor.fail(&agent_name, elapsed, "cancelled").await;
                    self.conclude(
                        &mut state,
                        &emitter,
                        steps,
                        Ending::Aborted("cancelled during agent invocation".into()),
                    );
                    break None;
                }
                Invocation::Succeeded(output) => {
                    self.monitor.succeed(&agent_name, elapsed).await;
                    self.on_success(
                        &mut state,
                        &emitter,
                        &agent_name,
                        attempt,
                        steps,
                        elapsed,
                        output,
                    )
                }
                Invocation::Failed { class, cause } => {
                    self.monitor.fail(&agent_name, elapsed, &cause).await;
                    self.on_failure(
                        &mut state,
                        &emitter,
                        &agent_name,
                        attempt,
                        steps,
                        policy,
                        class,
                        cause,
                    )
                }
            };

            match step {
                Step::Continue => {
                    attempt = 1;
                    self.checkpoint(&state).await;
                }
                Step::Retry(delay) => {
                    attempt += 1;
                    self.checkpoint(&state).await;
                    if !delay.is_zero() {
                        debug!(
                            agent = %agent_name,
                            delay_ms = millis(delay),
                            "Backing off before retry"
                        );
                        tokio::select! {
                            () = tokio::time::sleep(delay) => {}
                            () = cancel.cancelled() => {}
                        }
                    }
                }
                Step::Done(error) => break error,
            }
        };

        self.checkpoint(&state).await;
        RunOutcome {
            state,
            steps,
            error,
        }
    }

    /// Execute one invocation in its own task, bounded by the timeout.
    async fn invoke(
        &self,
        agent: Arc<dyn Agent>,
        state: &StateContainer,
        cancel: &mut CancelToken,
    ) -> Invocation {
        let snapshot = state.clone();
        let limit = self.config.agent_timeout_ms.map(Duration::from_millis);
        let mut task = tokio::spawn(async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, agent.execute(&snapshot))
                    .await
                    .map_err(|_| limit),
                None => Ok(agent.execute(&snapshot).await),
            }
        });

        let joined = match self.config.cancellation {
            CancellationPolicy::FinishInFlight => task.await,
            CancellationPolicy::Abandon => tokio::select! {
                joined = &mut task => joined,
                () = cancel.cancelled() => {
                    task.abort();
                    return Invocation::Cancelled;
                }
            },
        };

        match joined {
            Ok(Ok(Ok(output))) => Invocation::Succeeded(output),
            Ok(Ok(Err(err))) => Invocation::Failed {
                class: FailureClass::Execution,
                cause: failure_summary(err),
            },
            Ok(Err(limit)) => Invocation::Failed {
                class: FailureClass::Timeout,
                cause: format!("timed out after {}ms", millis(limit)),
            },
            Err(err) => Invocation::Failed {
                class: FailureClass::Execution,
                cause: join_failure_summary(err),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_success(
        &self,
        state: &mut StateContainer,
        emitter: &RunEmitter,
        agent_name: &str,
        attempt: u32,
        steps: u32,
        elapsed: Duration,
        output: AgentOutput,
    ) -> Step {
        let AgentOutput {
            mut delta,
            next_agent,
        } = output;
        let updated_keys = delta.updated_keys();
        // Routing is validated before it touches the state.
        let delta_next = delta.active_agent.take();

        if let Err(err) = state.record_completion(agent_name, attempt, steps, updated_keys) {
            return Step::Done(Some(err.to_string()));
        }
        let report = match state.merge(delta) {
            Ok(report) => report,
            Err(err) => return Step::Done(Some(err.to_string())),
        };
        for overwrite in report.overwritten {
            warn!(agent = %agent_name, key = %overwrite.key, "Artifact overwritten");
            emitter.emit(
                state,
                EventKind::ArtifactOverwritten {
                    agent: agent_name.to_string(),
                    key: overwrite.key,
                    old: overwrite.old,
                    new: overwrite.new,
                },
            );
        }
        debug!(
            agent = %agent_name,
            attempt,
            messages = report.messages_appended,
            artifacts = report.artifacts_written,
            "Agent completed"
        );
        emitter.emit(
            state,
            EventKind::AgentCompleted {
                agent: agent_name.to_string(),
                attempt,
                duration_ms: millis(elapsed),
            },
        );

        // The agent ended the run through its delta.
        match report.status_changed {
            None | Some(RunStatus::Running) => {}
            Some(RunStatus::Completed) => {
                self.conclude(state, emitter, steps, Ending::Completed);
                return Step::Done(None);
            }
            Some(RunStatus::Failed) => {
                let err = format!("agent '{agent_name}' marked the run failed");
                self.conclude(state, emitter, steps, Ending::Failed(err.clone()));
                return Step::Done(Some(err));
            }
            Some(RunStatus::Aborted) => {
                let reason = format!("agent '{agent_name}' aborted the run");
                self.conclude(state, emitter, steps, Ending::Aborted(reason));
                return Step::Done(None);
            }
        }

        let (next, reason) = if let Some(next) = next_agent {
            (next, RouteReason::Override)
        } else if let Some(next) = delta_next {
            (next, RouteReason::Delta)
        } else if let Some(next) = self.graph.route(agent_name, state) {
            (next, RouteReason::Edge)
        } else {
            let err = DevMasterError::RoutingConfiguration(format!(
                "no route out of '{agent_name}' in graph '{}'",
                self.graph.name()
            ))
            .to_string();
            self.conclude(state, emitter, steps, Ending::Failed(err.clone()));
            return Step::Done(Some(err));
        };
        self.route_to(state, emitter, agent_name, next, reason, steps)
    }

    #[allow(clippy::too_many_arguments)]
    fn on_failure(
        &self,
        state: &mut StateContainer,
        emitter: &RunEmitter,
        agent_name: &str,
        attempt: u32,
        steps: u32,
        policy: RetryPolicy,
        class: FailureClass,
        cause: String,
    ) -> Step {
        if let Err(err) = state.record_failure(agent_name, attempt, cause.clone()) {
            return Step::Done(Some(err.to_string()));
        }
        let will_retry = policy.allows_retry_after(attempt);
        warn!(
            agent = %agent_name,
            attempt,
            error = %cause,
            will_retry,
            "Agent invocation failed"
        );
        emitter.emit(
            state,
            EventKind::AgentFailed {
                agent: agent_name.to_string(),
                attempt,
                error: cause.clone(),
                will_retry,
            },
        );
        if will_retry {
            return Step::Retry(policy.delay_after(attempt));
        }

        let err = DevMasterError::execution(agent_name, cause);
        if state.error_count() > self.config.error_budget {
            let detail = format!("error budget of {} exceeded: {err}", self.config.error_budget);
            self.conclude(state, emitter, steps, Ending::Failed(detail.clone()));
            return Step::Done(Some(detail));
        }
        if let Some(fallback) = self.config.fallbacks.for_class(class) {
            if fallback != agent_name {
                info!(agent = %agent_name, fallback, "Handing failed step to fallback agent");
                return self.route_to(
                    state,
                    emitter,
                    agent_name,
                    fallback.to_string(),
                    RouteReason::Fallback,
                    steps,
                );
            }
        }
        let err = err.to_string();
        self.conclude(state, emitter, steps, Ending::Failed(err.clone()));
        Step::Done(Some(err))
    }

    fn route_to(
        &self,
        state: &mut StateContainer,
        emitter: &RunEmitter,
        from: &str,
        to: String,
        reason: RouteReason,
        steps: u32,
    ) -> Step {
        if to != END && !self.registry.contains(&to) {
            let err = DevMasterError::UnknownAgent(to).to_string();
            self.conclude(state, emitter, steps, Ending::Failed(err.clone()));
            return Step::Done(Some(err));
        }
        if let Err(err) = state.set_active_agent(to.clone()) {
            return Step::Done(Some(err.to_string()));
        }
        debug!(from, to = %to, ?reason, "Routing decided");
        emitter.emit(
            state,
            EventKind::RoutingDecided {
                from: from.to_string(),
                to,
                reason,
            },
        );
        Step::Continue
    }

    fn conclude(
        &self,
        state: &mut StateContainer,
        emitter: &RunEmitter,
        steps: u32,
        ending: Ending,
    ) {
        let kind = match ending {
            Ending::Completed => {
                state.finish(RunStatus::Completed);
                info!(steps, messages = state.messages.len(), "Run completed");
                EventKind::RunCompleted { steps }
            }
            Ending::Failed(error) => {
                state.finish(RunStatus::Failed);
                error!(steps, error = %error, "Run failed");
                EventKind::RunFailed { error }
            }
            Ending::Aborted(reason) => {
                state.finish(RunStatus::Aborted);
                warn!(steps, reason = %reason, "Run aborted");
                EventKind::RunAborted { reason }
            }
        };
        emitter.emit(state, kind);
    }

    /// Store failures are logged and never change the run's course.
    async fn checkpoint(&self, state: &StateContainer) {
        if let Some(store) = &self.store {
            if let Err(err) = store.save_state(state.run_id, state).await {
                warn!(error = %err, "Failed to checkpoint run state");
            }
        }
    }
}

fn failure_summary(err: DevMasterError) -> String {
    match err {
        DevMasterError::AgentExecution { cause, .. } => cause,
        other => other.to_string(),
    }
}

fn join_failure_summary(err: JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string payload".to_string());
            format!("agent panicked: {detail}")
        }
        Err(err) => format!("agent task ended abnormally: {err}"),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
