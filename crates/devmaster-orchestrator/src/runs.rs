use crate::cancel::{cancel_pair, CancelHandle};
use crate::engine::{Orchestrator, RunOutcome};
use crate::events::{EventBus, EventSubscription};
use devmaster_core::{DevMasterError, DevMasterResult, InitialState, RunStatus, StateContainer};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

struct RunEntry {
    cancel: CancelHandle,
    outcome: watch::Receiver<Option<Arc<RunOutcome>>>,
}

impl RunEntry {
    fn outcome(&self) -> Option<Arc<RunOutcome>> {
        self.outcome.borrow().clone()
    }

    fn is_active(&self) -> bool {
        self.outcome.borrow().is_none()
    }
}

#[derive(Default)]
struct Runs {
    entries: HashMap<Uuid, RunEntry>,
    /// Ids whose checkpoint is being loaded by `resume_run`.
    resuming: HashSet<Uuid>,
}

/// A run id claimed by one `resume_run` call. Released on drop.
struct ResumeClaim<'a> {
    runs: &'a RwLock<Runs>,
    run_id: Uuid,
}

impl Drop for ResumeClaim<'_> {
    fn drop(&mut self) {
        self.runs.write().resuming.remove(&self.run_id);
    }
}

/// Starts runs as background tasks and tracks them by id.
///
/// Must be used from within a tokio runtime.
pub struct RunManager {
    orchestrator: Arc<Orchestrator>,
    bus: Arc<EventBus>,
    runs: RwLock<Runs>,
}

impl RunManager {
    /// Wires the orchestrator to publish into a fresh bus sized by its config.
    pub fn new(orchestrator: Orchestrator) -> Self {
        let bus = Arc::new(EventBus::new(orchestrator.config().event_buffer));
        let orchestrator = orchestrator.with_event_sink(bus.clone());
        Self {
            orchestrator: Arc::new(orchestrator),
            bus,
            runs: RwLock::new(Runs::default()),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Start a run at `entry_agent` and return its id immediately.
    pub fn start_run(&self, entry_agent: &str, initial: InitialState) -> Uuid {
        let run_id = Uuid::new_v4();
        self.spawn(StateContainer::from_initial(run_id, entry_agent, initial));
        run_id
    }

    /// Like [`RunManager::start_run`], subscribing before the first event so
    /// none are missed.
    pub fn start_run_observed(
        &self,
        entry_agent: &str,
        initial: InitialState,
    ) -> (Uuid, EventSubscription) {
        let run_id = Uuid::new_v4();
        let subscription = self.spawn(StateContainer::from_initial(run_id, entry_agent, initial));
        (run_id, subscription)
    }

    /// Subscribe to a live run's remaining events.
    pub fn subscribe(&self, run_id: Uuid) -> DevMasterResult<EventSubscription> {
        let runs = self.runs.read();
        let entry = runs
            .entries
            .get(&run_id)
            .ok_or(DevMasterError::RunNotFound(run_id))?;
        if !entry.is_active() {
            return Err(DevMasterError::RunFinished(run_id));
        }
        self.bus
            .subscribe(run_id)
            .ok_or(DevMasterError::RunFinished(run_id))
    }

    /// Request cancellation; the run stops at its next step boundary.
    pub fn cancel(&self, run_id: Uuid) -> DevMasterResult<()> {
        let runs = self.runs.read();
        let entry = runs
            .entries
            .get(&run_id)
            .ok_or(DevMasterError::RunNotFound(run_id))?;
        info!(run_id = %run_id, "Cancellation requested");
        entry.cancel.cancel();
        Ok(())
    }

    /// `Running` until the outcome is in.
    pub fn status(&self, run_id: Uuid) -> DevMasterResult<RunStatus> {
        let runs = self.runs.read();
        let entry = runs
            .entries
            .get(&run_id)
            .ok_or(DevMasterError::RunNotFound(run_id))?;
        Ok(entry
            .outcome()
            .map_or(RunStatus::Running, |outcome| outcome.status()))
    }

    /// The final state, or `None` while the run is still going.
    pub fn final_state(&self, run_id: Uuid) -> DevMasterResult<Option<StateContainer>> {
        let runs = self.runs.read();
        let entry = runs
            .entries
            .get(&run_id)
            .ok_or(DevMasterError::RunNotFound(run_id))?;
        Ok(entry.outcome().map(|outcome| outcome.state.clone()))
    }

    /// Wait for the run to finish.
    pub async fn wait(&self, run_id: Uuid) -> DevMasterResult<RunOutcome> {
        let mut rx = {
            let runs = self.runs.read();
            runs.entries
                .get(&run_id)
                .ok_or(DevMasterError::RunNotFound(run_id))?
                .outcome
                .clone()
        };
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| {
                DevMasterError::Internal(format!("run {run_id} ended without an outcome"))
            })?
            .clone();
        outcome
            .map(|outcome| outcome.as_ref().clone())
            .ok_or_else(|| DevMasterError::Internal(format!("run {run_id} has no outcome")))
    }

    /// Continue a checkpointed run from the configured store.
    pub async fn resume_run(&self, run_id: Uuid) -> DevMasterResult<()> {
        self.resume_run_observed(run_id).await.map(drop)
    }

    /// Like [`RunManager::resume_run`], subscribing before the first resumed
    /// event.
    ///
    /// At most one caller can resume a given id at a time; the others get a
    /// `Config` error while it is loading or running.
    pub async fn resume_run_observed(&self, run_id: Uuid) -> DevMasterResult<EventSubscription> {
        let store = self
            .orchestrator
            .store()
            .ok_or_else(|| DevMasterError::Config("no state store configured".into()))?;
        let _claim = self.claim_for_resume(run_id)?;
        let state = store
            .load_state(run_id)
            .await?
            .ok_or(DevMasterError::RunNotFound(run_id))?;
        if !state.is_running() {
            return Err(DevMasterError::RunFinished(run_id));
        }
        info!(run_id = %run_id, agent = %state.active_agent, "Resuming run");
        Ok(self.spawn(state))
    }

    fn claim_for_resume(&self, run_id: Uuid) -> DevMasterResult<ResumeClaim<'_>> {
        let mut runs = self.runs.write();
        let running = runs.entries.get(&run_id).is_some_and(RunEntry::is_active);
        if running || !runs.resuming.insert(run_id) {
            return Err(DevMasterError::Config(format!("run {run_id} is already active")));
        }
        Ok(ResumeClaim {
            runs: &self.runs,
            run_id,
        })
    }

    /// Ids and statuses of every tracked run.
    pub fn list_runs(&self) -> Vec<(Uuid, RunStatus)> {
        self.runs
            .read()
            .entries
            .iter()
            .map(|(id, entry)| {
                let status = entry
                    .outcome()
                    .map_or(RunStatus::Running, |outcome| outcome.status());
                (*id, status)
            })
            .collect()
    }

    /// Forget finished runs. Returns how many were dropped.
    pub fn prune_finished(&self) -> usize {
        let entries = &mut self.runs.write().entries;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_active());
        before - entries.len()
    }

    /// Open the run's event channel, register it, and drive it in the
    /// background. The returned subscription sees every event of the drive.
    fn spawn(&self, state: StateContainer) -> EventSubscription {
        let run_id = state.run_id;
        let (cancel, token) = cancel_pair();
        let (tx, outcome) = watch::channel(None);
        let subscription = self.bus.open_run(run_id);
        {
            let mut runs = self.runs.write();
            runs.resuming.remove(&run_id);
            runs.entries.insert(run_id, RunEntry { cancel, outcome });
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let bus = Arc::clone(&self.bus);
        tokio::spawn(async move {
            let result = orchestrator.run(state, token).await;
            bus.close_run(run_id);
            tx.send_replace(Some(Arc::new(result)));
        });
        subscription
    }
}
