//! Worker pool: runs agent jobs with bounded concurrency.

use crate::entry::VoiceAgent;
use crate::error::AgentError;
use crate::job::{signalled, JobContext, JobRequest, ProcessContext};
use crate::room::RoomConnector;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};
use uuid::Uuid;

/// Capacity of the job queue feeding [`Worker::run`].
pub const JOB_QUEUE_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub worker_id: String,
    /// Jobs allowed to run at once. At least one.
    pub concurrency: usize,
}

impl WorkerOptions {
    pub fn new(concurrency: usize) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            worker_id: format!("AW_{}", &id[..12]),
            concurrency: concurrency.max(1),
        }
    }
}

type ActiveRooms = Arc<Mutex<HashSet<String>>>;

/// Marks a room as busy for the lifetime of its job task.
struct RoomClaim {
    rooms: ActiveRooms,
    room: String,
}

impl RoomClaim {
    fn acquire(rooms: &ActiveRooms, room: &str) -> Option<Self> {
        let inserted = rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(room.to_string());
        inserted.then(|| Self {
            rooms: Arc::clone(rooms),
            room: room.to_string(),
        })
    }
}

impl Drop for RoomClaim {
    fn drop(&mut self) {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.room);
    }
}

pub struct Worker {
    agent: Arc<VoiceAgent>,
    connector: Arc<dyn RoomConnector>,
    proc: Arc<ProcessContext>,
    options: WorkerOptions,
}

impl Worker {
    /// Creates the process context and runs the agent's prewarm hook.
    ///
    /// # Errors
    ///
    /// Fails when the VAD cannot be loaded; no job is accepted then.
    pub async fn new(
        agent: Arc<VoiceAgent>,
        connector: Arc<dyn RoomConnector>,
        options: WorkerOptions,
    ) -> Result<Self, AgentError> {
        let proc = Arc::new(ProcessContext::new());
        agent.prewarm(&proc).await?;
        Ok(Self {
            agent,
            connector,
            proc,
            options,
        })
    }

    pub fn process(&self) -> &Arc<ProcessContext> {
        &self.proc
    }

    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    /// Runs jobs from `jobs` until `shutdown` resolves or the queue closes
    /// and every job has finished. On shutdown, running jobs are told to
    /// stop and awaited; queued jobs that never got a slot are dropped.
    pub async fn run<F>(&self, mut jobs: mpsc::Receiver<JobRequest>, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let limiter = Arc::new(Semaphore::new(self.options.concurrency));
        let active_rooms: ActiveRooms = Arc::new(Mutex::new(HashSet::new()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut accepting = true;

        info!(
            worker_id = %self.options.worker_id,
            concurrency = self.options.concurrency,
            "agent worker started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested; no longer accepting jobs");
                    break;
                }
                job = jobs.recv(), if accepting => {
                    let Some(job) = job else {
                        debug!("job queue closed");
                        accepting = false;
                        if tasks.is_empty() {
                            break;
                        }
                        continue;
                    };
                    let Some(claim) = RoomClaim::acquire(&active_rooms, &job.room) else {
                        debug!(room = %job.room, "room already has an active job; skipping");
                        continue;
                    };
                    tasks.spawn(self.job_task(job, claim, Arc::clone(&limiter), stop_rx.clone()));
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    log_join(joined);
                    if !accepting && tasks.is_empty() {
                        break;
                    }
                }
            }
        }

        stop_tx.send_replace(true);
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        info!(worker_id = %self.options.worker_id, "agent worker stopped");
    }

    fn job_task(
        &self,
        job: JobRequest,
        claim: RoomClaim,
        limiter: Arc<Semaphore>,
        stop: watch::Receiver<bool>,
    ) -> impl Future<Output = ()> + Send + 'static {
        let agent = Arc::clone(&self.agent);
        let connector = Arc::clone(&self.connector);
        let proc = Arc::clone(&self.proc);
        let worker_id = self.options.worker_id.clone();
        let span = tracing::info_span!("job", job_id = %job.id, room = %job.room);

        async move {
            let _claim = claim;
            let _permit = tokio::select! {
                permit = limiter.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = signalled(&stop) => {
                    debug!("worker stopped before the job got a slot");
                    return;
                }
            };

            info!("job started");
            let mut ctx = JobContext::new(job, worker_id, proc, connector, stop);
            match agent.entry(&mut ctx).await {
                Ok(()) => info!("job finished"),
                Err(e) => error!("job failed: {}", e),
            }
        }
        .instrument(span)
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("job task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_has_a_floor() {
        assert_eq!(WorkerOptions::new(0).concurrency, 1);
        assert_eq!(WorkerOptions::new(3).concurrency, 3);
        assert!(WorkerOptions::new(1).worker_id.starts_with("AW_"));
    }

    #[test]
    fn room_claims_are_exclusive_until_dropped() {
        let rooms: ActiveRooms = Arc::default();
        let claim = RoomClaim::acquire(&rooms, "lobby").unwrap();
        assert!(RoomClaim::acquire(&rooms, "lobby").is_none());
        assert!(RoomClaim::acquire(&rooms, "kitchen").is_some());
        drop(claim);
        assert!(RoomClaim::acquire(&rooms, "lobby").is_some());
    }
}
