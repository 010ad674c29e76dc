//! In-flight build deduplication.
//!
//! One job per cache key. The first request for a key registers the job and
//! spawns its producer; every request arriving while the job runs waits on
//! the same result slot. The check and the registration happen under one
//! synchronous lock with no `.await` in between, so two requests can never
//! both see "no job" for the same key.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use rustc_hash::FxHashMap;
use tokio::sync::watch;

use super::BuildResult;

type ResultSlot = watch::Receiver<Option<BuildResult>>;
type InflightMap = Arc<Mutex<FxHashMap<String, ResultSlot>>>;

/// Deduplicates concurrent builds by cache key.
#[derive(Debug, Default)]
pub struct BuildCoordinator {
    inflight: InflightMap,
}

impl BuildCoordinator {
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently running.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a job for `key` is running.
    pub fn is_building(&self, key: &str) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Build `key`, or join the build already running for it.
    ///
    /// `producer` runs only when no job for `key` exists, on its own task:
    /// dropping the returned future (a disconnected client) never cancels
    /// the build, which still completes and stores its result. The job is
    /// removed once the result has been published, including when the
    /// producer panics, in which case every waiter receives a failure.
    pub async fn build<P, Fut>(&self, key: impl Into<String>, producer: P) -> BuildResult
    where
        P: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = BuildResult> + Send + 'static,
    {
        let key = key.into();

        let mut slot = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some(slot) => {
                    tracing::debug!(key = %key, "joining in-flight build");
                    slot.clone()
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(key.clone(), rx.clone());

                    let guard = JobGuard {
                        inflight: self.inflight.clone(),
                        key,
                        completed: false,
                    };
                    tokio::spawn(async move {
                        let guard = guard;
                        let result = producer().await;
                        guard.complete(tx, result);
                    });
                    rx
                }
            }
        };

        match slot.wait_for(Option::is_some).await {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| BuildResult::failure("build finished without a result")),
            Err(_) => BuildResult::failure("build task aborted before producing a result"),
        }
    }
}

/// Owns a job's registration in the in-flight map.
///
/// `complete` publishes the result and unregisters the job under the map
/// lock, so anyone who can observe the map sees either the running job or
/// its finished result, never a gap. If the task ends any other way (a
/// panicking producer), `Drop` unregisters the job and the dropped sender
/// wakes every waiter with an error.
struct JobGuard {
    inflight: InflightMap,
    key: String,
    completed: bool,
}

impl JobGuard {
    fn complete(mut self, tx: watch::Sender<Option<BuildResult>>, result: BuildResult) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        tx.send_replace(Some(result));
        inflight.remove(&self.key);
        self.completed = true;
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}
