//! Versioned workflow persistence.
//!
//! Every stored document carries a version. Writers name the version they
//! read; a commit against any other version is rejected with
//! [`StoreError::Conflict`] and leaves the stored state untouched.

mod file;
mod memory;

use std::future::Future;

use crate::error::StoreError;
use crate::workflow::WorkflowState;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

pub trait StateStore: Send + Sync {
    fn load(
        &self,
        job_id: &str,
    ) -> impl Future<Output = Result<Versioned<WorkflowState>, StoreError>> + Send;

    /// Stores a new workflow at version 1.
    fn create(
        &self,
        job_id: &str,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Replaces the workflow if it is still at `expected_version`; returns
    /// the new version.
    fn commit(
        &self,
        job_id: &str,
        expected_version: u64,
        state: &WorkflowState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;

    /// Stored job ids, sorted.
    fn list(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}
