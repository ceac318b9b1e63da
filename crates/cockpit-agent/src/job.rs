//! Jobs, and the process and job contexts handed to the agent entry point.

use crate::error::AgentError;
use crate::room::{AutoSubscribe, Room, RoomConnector};
use crate::vad::{Vad, VadLoader};
use std::sync::Arc;
use tokio::sync::{watch, OnceCell};
use uuid::Uuid;

/// A request to run the agent in one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub id: String,
    pub room: String,
}

impl JobRequest {
    pub fn for_room(room: impl Into<String>) -> Self {
        Self {
            id: format!("job-{}", Uuid::new_v4().simple()),
            room: room.into(),
        }
    }
}

/// Resources created once per worker process and shared by every job.
#[derive(Debug, Default)]
pub struct ProcessContext {
    vad: OnceCell<Arc<dyn Vad>>,
}

impl ProcessContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached VAD, if one has been loaded.
    pub fn vad(&self) -> Option<Arc<dyn Vad>> {
        self.vad.get().cloned()
    }

    /// Returns the cached VAD, loading it on first use. Concurrent callers
    /// wait for the same load; a failed load leaves the cell empty.
    pub async fn vad_or_load(&self, loader: &dyn VadLoader) -> Result<Arc<dyn Vad>, AgentError> {
        self.vad.get_or_try_init(|| loader.load()).await.cloned()
    }
}

/// Per-job handle. Owned by the worker; the agent borrows it for one job.
pub struct JobContext {
    job: JobRequest,
    worker_id: String,
    proc: Arc<ProcessContext>,
    connector: Arc<dyn RoomConnector>,
    room: Option<Arc<dyn Room>>,
    shutdown: watch::Receiver<bool>,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job)
            .field("worker_id", &self.worker_id)
            .field("connected", &self.room.is_some())
            .finish()
    }
}

impl JobContext {
    pub fn new(
        job: JobRequest,
        worker_id: impl Into<String>,
        proc: Arc<ProcessContext>,
        connector: Arc<dyn RoomConnector>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job,
            worker_id: worker_id.into(),
            proc,
            connector,
            room: None,
            shutdown,
        }
    }

    pub fn job(&self) -> &JobRequest {
        &self.job
    }

    pub fn room_name(&self) -> &str {
        &self.job.room
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn proc(&self) -> &ProcessContext {
        &self.proc
    }

    /// Participant identity the agent joins with.
    pub fn identity(&self) -> String {
        format!("agent-{}", self.job.id)
    }

    pub fn room(&self) -> Option<Arc<dyn Room>> {
        self.room.clone()
    }

    /// Joins the job's room. Repeated calls return the same handle.
    pub async fn connect(&mut self, auto_subscribe: AutoSubscribe) -> Result<Arc<dyn Room>, AgentError> {
        if let Some(room) = &self.room {
            return Ok(Arc::clone(room));
        }
        let room = self
            .connector
            .connect(&self.job.room, &self.identity(), auto_subscribe)
            .await?;
        self.room = Some(Arc::clone(&room));
        Ok(room)
    }

    /// Resolves once the worker asks running jobs to stop.
    pub async fn shutdown_requested(&self) {
        signalled(&self.shutdown).await;
    }

    /// Leaves the room, if joined.
    pub async fn shutdown(&mut self) {
        if let Some(room) = self.room.take() {
            room.disconnect().await;
        }
    }
}

/// Waits for `flag` to turn true. A dropped sender never signals.
pub(crate) async fn signalled(flag: &watch::Receiver<bool>) {
    let mut rx = flag.clone();
    if rx.wait_for(|set| *set).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::{EnergyVad, EnergyVadOptions};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowLoader {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl VadLoader for SlowLoader {
        async fn load(&self) -> Result<Arc<dyn Vad>, AgentError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Arc::new(EnergyVad::new(EnergyVadOptions::default())?))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl VadLoader for FailingLoader {
        async fn load(&self) -> Result<Arc<dyn Vad>, AgentError> {
            Err(AgentError::Vad("no model".into()))
        }
    }

    #[test]
    fn job_ids_are_unique() {
        let a = JobRequest::for_room("lobby");
        let b = JobRequest::for_room("lobby");
        assert_eq!(a.room, "lobby");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn concurrent_loads_share_one_model() {
        let proc = Arc::new(ProcessContext::new());
        let loader = Arc::new(SlowLoader {
            loads: AtomicUsize::new(0),
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let proc = proc.clone();
                let loader = loader.clone();
                tokio::spawn(async move { proc.vad_or_load(loader.as_ref()).await.unwrap() })
            })
            .collect();

        let mut loaded = Vec::new();
        for handle in handles {
            loaded.push(handle.await.unwrap());
        }

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(loaded.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!(proc.vad().is_some());
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let proc = ProcessContext::new();
        assert!(proc.vad_or_load(&FailingLoader).await.is_err());
        assert!(proc.vad().is_none());

        let loader = SlowLoader {
            loads: AtomicUsize::new(0),
        };
        assert!(proc.vad_or_load(&loader).await.is_ok());
        assert!(proc.vad().is_some());
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_never_signals() {
        let (tx, rx) = watch::channel(false);
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(20), signalled(&rx)).await;
        assert!(waited.is_err());
    }
}
