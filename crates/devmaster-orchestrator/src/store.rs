use async_trait::async_trait;
use devmaster_core::{DevMasterError, DevMasterResult, StateContainer};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Checkpoint storage for run state, keyed by run id.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load_state(&self, run_id: Uuid) -> DevMasterResult<Option<StateContainer>>;
    async fn save_state(&self, run_id: Uuid, state: &StateContainer) -> DevMasterResult<()>;
    async fn list_runs(&self) -> DevMasterResult<Vec<Uuid>>;
}

/// One JSON file per run under `dir`.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub async fn new(dir: PathBuf) -> DevMasterResult<Self> {
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn state_path(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load_state(&self, run_id: Uuid) -> DevMasterResult<Option<StateContainer>> {
        let path = self.state_path(run_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let state = serde_json::from_str(&data)
            .map_err(|e| DevMasterError::Store(format!("Failed to parse run {run_id}: {e}")))?;
        Ok(Some(state))
    }

    async fn save_state(&self, run_id: Uuid, state: &StateContainer) -> DevMasterResult<()> {
        let json = serde_json::to_string_pretty(state)?;
        // Write then rename so a crash never leaves a half-written checkpoint.
        let tmp = self.dir.join(format!("{run_id}.json.tmp"));
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(tmp, self.state_path(run_id)).await?;
        Ok(())
    }

    async fn list_runs(&self) -> DevMasterResult<Vec<Uuid>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if let Ok(id) = Uuid::parse_str(stem) {
                        ids.push(id);
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// In-process store, mostly for tests.
#[derive(Default)]
pub struct MemoryStateStore {
    states: RwLock<HashMap<Uuid, StateContainer>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_state(&self, run_id: Uuid) -> DevMasterResult<Option<StateContainer>> {
        Ok(self.states.read().await.get(&run_id).cloned())
    }

    async fn save_state(&self, run_id: Uuid, state: &StateContainer) -> DevMasterResult<()> {
        self.states.write().await.insert(run_id, state.clone());
        Ok(())
    }

    async fn list_runs(&self) -> DevMasterResult<Vec<Uuid>> {
        let mut ids: Vec<Uuid> = self.states.read().await.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}
