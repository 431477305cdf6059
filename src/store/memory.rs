use std::collections::HashMap;
use std::sync::Mutex;

use super::{StateStore, Versioned};
use crate::error::StoreError;
use crate::workflow::{Stage, WorkflowState};

#[derive(Debug)]
struct Entry {
    version: u64,
    state: WorkflowState,
    /// Stage of every committed version, in commit order.
    stage_log: Vec<Stage>,
}

/// In-process store for tests and single-shot runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage of each committed version of a job, creation first.
    pub fn committed_stages(&self, job_id: &str) -> Vec<Stage> {
        self.with_entries(|entries| {
            entries
                .get(job_id)
                .map(|e| e.stage_log.clone())
                .unwrap_or_default()
        })
    }

    /// Number of committed versions of a job.
    pub fn commits(&self, job_id: &str) -> usize {
        self.committed_stages(job_id).len()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut entries)
    }
}

impl StateStore for MemoryStore {
    async fn load(&self, job_id: &str) -> Result<Versioned<WorkflowState>, StoreError> {
        self.with_entries(|entries| {
            entries
                .get(job_id)
                .map(|e| Versioned {
                    version: e.version,
                    value: e.state.clone(),
                })
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
        })
    }

    async fn create(&self, job_id: &str, state: &WorkflowState) -> Result<u64, StoreError> {
        self.with_entries(|entries| {
            if entries.contains_key(job_id) {
                return Err(StoreError::AlreadyExists(job_id.to_string()));
            }
            entries.insert(
                job_id.to_string(),
                Entry {
                    version: 1,
                    state: state.clone(),
                    stage_log: vec![state.stage],
                },
            );
            Ok(1)
        })
    }

    async fn commit(
        &self,
        job_id: &str,
        expected_version: u64,
        state: &WorkflowState,
    ) -> Result<u64, StoreError> {
        self.with_entries(|entries| {
            let entry = entries
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            if entry.version != expected_version {
                return Err(StoreError::Conflict {
                    job_id: job_id.to_string(),
                    expected: expected_version,
                    found: entry.version,
                });
            }
            entry.version += 1;
            entry.state = state.clone();
            entry.stage_log.push(state.stage);
            Ok(entry.version)
        })
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.with_entries(|entries| entries.keys().cloned().collect());
        ids.sort();
        Ok(ids)
    }
}
