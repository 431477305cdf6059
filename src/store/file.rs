use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{StateStore, Versioned};
use crate::error::StoreError;
use crate::workflow::WorkflowState;

#[derive(Serialize, Deserialize)]
struct Document {
    version: u64,
    state: WorkflowState,
}

/// One JSON document per job under a directory.
///
/// Writes go to a uniquely named temp file that is renamed over the target,
/// so readers never see a partial document. `create` and `commit` hold an
/// exclusive OS lock on `.{job_id}.lock` from the version check to the
/// rename, which serializes writers across store instances and processes
/// sharing the directory.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        if job_id.is_empty()
            || job_id.starts_with('.')
            || job_id.contains(['/', '\\'])
        {
            return Err(StoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("job id {job_id:?} cannot be used as a file name"),
            )));
        }
        Ok(self.dir.join(format!("{job_id}.json")))
    }

    /// Runs `f` on a blocking thread while holding the job's lock file.
    async fn locked<T, F>(&self, job_id: &str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Path, &Path) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path_for(job_id)?;
        let lock_path = self.dir.join(format!(".{job_id}.lock"));
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || {
            let lock = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?;
            lock.lock()?;
            let result = f(&dir, &path);
            // Closing the handle releases the lock.
            drop(lock);
            result
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn read_doc(path: &Path) -> Result<Option<Document>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_doc(dir: &Path, path: &Path, doc: &Document) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(doc)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    debug!(version = doc.version, path = %path.display(), "state written");
    Ok(())
}

impl StateStore for JsonFileStore {
    async fn load(&self, job_id: &str) -> Result<Versioned<WorkflowState>, StoreError> {
        let path = self.path_for(job_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(job_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let doc: Document = serde_json::from_slice(&bytes)?;
        Ok(Versioned {
            version: doc.version,
            value: doc.state,
        })
    }

    async fn create(&self, job_id: &str, state: &WorkflowState) -> Result<u64, StoreError> {
        let id = job_id.to_string();
        let doc = Document {
            version: 1,
            state: state.clone(),
        };
        self.locked(job_id, move |dir, path| {
            if path.exists() {
                return Err(StoreError::AlreadyExists(id));
            }
            write_doc(dir, path, &doc)?;
            Ok(doc.version)
        })
        .await
    }

    async fn commit(
        &self,
        job_id: &str,
        expected_version: u64,
        state: &WorkflowState,
    ) -> Result<u64, StoreError> {
        let id = job_id.to_string();
        let state = state.clone();
        self.locked(job_id, move |dir, path| {
            let Some(current) = read_doc(path)? else {
                return Err(StoreError::NotFound(id));
            };
            if current.version != expected_version {
                return Err(StoreError::Conflict {
                    job_id: id,
                    expected: expected_version,
                    found: current.version,
                });
            }
            let doc = Document {
                version: current.version + 1,
                state,
            };
            write_doc(dir, path, &doc)?;
            Ok(doc.version)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            // Lock and temp files are dotfiles.
            if name.starts_with('.') {
                continue;
            }
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::tests::exercise_store;
    use crate::testing::test_job;
    use crate::workflow::Stage;

    #[tokio::test]
    async fn file_store_contract() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::open(tmp.path().join("state")).await.unwrap();
        exercise_store(&store).await;

        // No temp files left behind.
        let names: Vec<String> = std::fs::read_dir(store.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".tmp")));
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let state = WorkflowState::new(test_job());
        {
            let store = JsonFileStore::open(tmp.path()).await.unwrap();
            store.create("J1", &state).await.unwrap();
            store.commit("J1", 1, &state).await.unwrap();
        }
        let store = JsonFileStore::open(tmp.path()).await.unwrap();
        let loaded = store.load("J1").await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.value, state);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_stores_on_one_directory_never_both_commit() {
        let tmp = TempDir::new().unwrap();
        let a = JsonFileStore::open(tmp.path()).await.unwrap();
        let b = JsonFileStore::open(tmp.path()).await.unwrap();
        let state = WorkflowState::new(test_job());

        for i in 0..50 {
            let id = format!("J{i}");
            a.create(&id, &state).await.unwrap();

            let mut left = state.clone();
            left.stage = Stage::Screening;
            let mut right = state.clone();
            right.stage = Stage::Failed;
            let (ra, rb) = tokio::join!(a.commit(&id, 1, &left), b.commit(&id, 1, &right));

            assert!(
                ra.is_ok() != rb.is_ok(),
                "round {i}: expected one winner, got {ra:?} and {rb:?}"
            );
            let (winner, loser) = if ra.is_ok() {
                (Stage::Screening, rb)
            } else {
                (Stage::Failed, ra)
            };
            assert!(matches!(
                loser,
                Err(StoreError::Conflict {
                    expected: 1,
                    found: 2,
                    ..
                })
            ));
            let stored = b.load(&id).await.unwrap();
            assert_eq!(stored.version, 2);
            assert_eq!(stored.value.stage, winner);
        }

        assert_eq!(a.list().await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::open(tmp.path()).await.unwrap();
        let state = WorkflowState::new(test_job());
        for id in ["../escape", "a/b", ".hidden", ""] {
            assert!(matches!(
                store.create(id, &state).await,
                Err(StoreError::Io(_))
            ));
        }
    }

    #[tokio::test]
    async fn corrupt_document_is_a_json_error() {
        let tmp = TempDir::new().unwrap();
        let store = JsonFileStore::open(tmp.path()).await.unwrap();
        std::fs::write(tmp.path().join("J9.json"), "{not json").unwrap();
        assert!(matches!(store.load("J9").await, Err(StoreError::Json(_))));
    }
}
