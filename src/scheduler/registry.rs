// Supervised registry of in-flight agent tasks

use crate::utils::lock_mutex_recover;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};

struct TaskEntry {
    id: u64,
    abort: AbortHandle,
}

/// Chunk-keyed map of running tasks. Every task is awaited by a supervisor that
/// removes its entry and reports panics and unexpected aborts.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<String, TaskEntry>>>,
    next_id: Arc<AtomicU64>,
    closing: Arc<AtomicBool>,
}

fn panic_message(error: JoinError) -> String {
    match error.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic payload".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `body` under `chunk`. `on_failure(chunk, reason)` runs if the body
    /// panics, or is aborted outside of `abort_all`.
    pub fn spawn<F, C>(&self, chunk: &str, body: F, on_failure: C)
    where
        F: Future<Output = ()> + Send + 'static,
        C: FnOnce(String, String) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let chunk = chunk.to_string();

        // Held across both spawns so the supervisor cannot remove the entry first
        let mut tasks = lock_mutex_recover(&self.tasks);

        let handle = tokio::spawn(body);
        let abort = handle.abort_handle();

        let registry = self.tasks.clone();
        let closing = self.closing.clone();
        let key = chunk.clone();
        tokio::spawn(async move {
            let outcome = handle.await;
            {
                let mut tasks = lock_mutex_recover(&registry);
                if tasks.get(&key).map(|e| e.id) == Some(id) {
                    tasks.remove(&key);
                }
            }

            match outcome {
                Ok(()) => {}
                Err(e) if e.is_panic() => {
                    let message = panic_message(e);
                    log::error!("[Scheduler] Task for {} panicked: {}", key, message);
                    on_failure(key, format!("Agent task panicked: {}", message));
                }
                Err(_) if closing.load(Ordering::SeqCst) => {
                    log::info!("[Scheduler] Task for {} aborted during shutdown", key);
                }
                Err(_) => {
                    log::warn!("[Scheduler] Task for {} was aborted", key);
                    on_failure(key, "Agent task was aborted".to_string());
                }
            }
        });

        if let Some(previous) = tasks.insert(chunk.clone(), TaskEntry { id, abort }) {
            log::warn!("[Scheduler] Replacing live task for {}", chunk);
            previous.abort.abort();
        }
    }

    pub fn is_live(&self, chunk: &str) -> bool {
        lock_mutex_recover(&self.tasks).contains_key(chunk)
    }

    pub fn live_count(&self) -> usize {
        lock_mutex_recover(&self.tasks).len()
    }

    pub fn live_chunks(&self) -> Vec<String> {
        let mut chunks: Vec<String> = lock_mutex_recover(&self.tasks).keys().cloned().collect();
        chunks.sort();
        chunks
    }

    /// Abort one task. Its failure callback fires.
    pub fn abort(&self, chunk: &str) -> bool {
        match lock_mutex_recover(&self.tasks).get(chunk) {
            Some(entry) => {
                entry.abort.abort();
                true
            }
            None => false,
        }
    }

    /// Abort everything without failure callbacks; the units stay as they are.
    pub fn abort_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        for entry in lock_mutex_recover(&self.tasks).values() {
            entry.abort.abort();
        }
    }

    /// Wait until no tasks are registered. Returns false on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.live_count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}
