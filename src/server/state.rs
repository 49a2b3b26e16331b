//! Server application state shared across handlers

use crate::database::StateStore;
use crate::oracle::ConflictOracle;
use crate::scheduler::Scheduler;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub oracle: Arc<ConflictOracle>,
    pub scheduler: Arc<Scheduler>,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            store: scheduler.store().clone(),
            oracle: scheduler.oracle().clone(),
            scheduler,
            started_at: Utc::now(),
            pid: std::process::id(),
        }
    }

    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(0)
    }
}
