//! In-memory home of finished analyses, keyed by a fresh id per upload.

use deforest_vision::{Frame, SequenceReport};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Everything one upload produced.
#[derive(Debug)]
pub struct StoredAnalysis {
    pub id: Uuid,
    pub prompt: Option<String>,
    pub frames: Vec<Frame>,
    pub report: SequenceReport,
}

/// Bounded store; the oldest analysis is evicted first.
#[derive(Debug)]
pub struct ResultStore {
    capacity: usize,
    entries: Mutex<VecDeque<Arc<StoredAnalysis>>>,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<Arc<StoredAnalysis>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, prompt: Option<String>, frames: Vec<Frame>, report: SequenceReport) -> Arc<StoredAnalysis> {
        let analysis = Arc::new(StoredAnalysis {
            id: Uuid::new_v4(),
            prompt,
            frames,
            report,
        });
        let mut entries = self.entries();
        entries.push_back(analysis.clone());
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                debug!(id = %evicted.id, "evicted stored analysis");
            }
        }
        analysis
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<StoredAnalysis>> {
        self.entries().iter().find(|a| a.id == id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|a| a.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
