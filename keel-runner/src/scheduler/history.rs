//! Recent run records
//!
//! Bounded in memory. The append-only log files are the durable record.

use keel_core::domain::run::DeploymentRun;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunHistory {
    capacity: usize,
    runs: VecDeque<DeploymentRun>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            runs: VecDeque::new(),
        }
    }

    /// Inserts a run or replaces the record with the same id
    ///
    /// The oldest record is evicted once capacity is exceeded.
    pub fn upsert(&mut self, run: DeploymentRun) {
        if let Some(existing) = self.runs.iter_mut().find(|r| r.id == run.id) {
            *existing = run;
            return;
        }

        self.runs.push_back(run);
        while self.runs.len() > self.capacity {
            self.runs.pop_front();
        }
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<DeploymentRun> {
        self.runs.iter().rev().take(limit).cloned().collect()
    }

    pub fn get(&self, id: Uuid) -> Option<DeploymentRun> {
        self.runs.iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}
