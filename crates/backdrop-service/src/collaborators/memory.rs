//! In-process collaborators.
//!
//! Both can be switched into a failing mode so that the compensation paths
//! of the intake saga can be exercised without a network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CollaboratorError, JobQueue, ObjectStorage, QueuedJob};

/// Object storage that keeps uploads in a map.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU64,
    failing: AtomicBool,
}

impl MemoryObjectStorage {
    /// Create empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent uploads fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.lock().map_or(0, |objects| objects.len())
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        name: &str,
        _mime_type: &str,
    ) -> Result<String, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("storage offline".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let reference = format!("memory://uploads/{id}/{name}");
        self.objects
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("storage lock poisoned".into()))?
            .insert(reference.clone(), bytes);

        Ok(reference)
    }
}

/// Job queue that records what it was handed.
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    failing: AtomicBool,
}

impl MemoryJobQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent dispatches fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Jobs accepted so far, oldest first.
    #[must_use]
    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().map(|jobs| jobs.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Unavailable("queue offline".into()));
        }

        self.jobs
            .lock()
            .map_err(|_| CollaboratorError::Unavailable("queue lock poisoned".into()))?
            .push(job.clone());
        Ok(())
    }
}
