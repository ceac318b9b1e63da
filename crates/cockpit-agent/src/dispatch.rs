//! Room watcher: dispatches a job for every room that gains participants.

use crate::job::JobRequest;
use cockpit_voice::VoiceService;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub struct RoomWatcher {
    service: Arc<VoiceService>,
    interval: Duration,
    occupied: HashSet<String>,
}

impl RoomWatcher {
    pub fn new(service: Arc<VoiceService>, interval: Duration) -> Self {
        Self {
            service,
            interval,
            occupied: HashSet::new(),
        }
    }

    /// Records the current set of occupied rooms and returns those that were
    /// not occupied at the previous poll, sorted by name. Rooms that emptied
    /// are forgotten, so they dispatch again once re-occupied.
    pub fn new_rooms(&mut self, occupied: Vec<String>) -> Vec<String> {
        let current: HashSet<String> = occupied.into_iter().collect();
        let mut fresh: Vec<String> = current.difference(&self.occupied).cloned().collect();
        fresh.sort();
        self.occupied = current;
        fresh
    }

    /// Polls until the job queue closes.
    pub async fn run(mut self, jobs: mpsc::Sender<JobRequest>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            let rooms = match self.service.occupied_rooms().await {
                Ok(rooms) => rooms,
                Err(e) => {
                    warn!("failed to list rooms: {}", e);
                    continue;
                }
            };
            for room in self.new_rooms(rooms) {
                info!(room = %room, "dispatching agent to room");
                if jobs.send(JobRequest::for_room(room)).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_voice::LiveKitConfig;

    fn watcher() -> RoomWatcher {
        let service = VoiceService::new(LiveKitConfig::new("ws://localhost:7880", "key", "secret"));
        RoomWatcher::new(Arc::new(service), Duration::from_secs(5))
    }

    fn names(rooms: &[&str]) -> Vec<String> {
        rooms.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn only_newly_occupied_rooms_dispatch() {
        let mut watcher = watcher();
        assert_eq!(watcher.new_rooms(names(&["b", "a"])), names(&["a", "b"]));
        assert!(watcher.new_rooms(names(&["a", "b"])).is_empty());
        assert_eq!(watcher.new_rooms(names(&["a", "b", "c"])), names(&["c"]));
    }

    #[test]
    fn emptied_rooms_dispatch_again() {
        let mut watcher = watcher();
        watcher.new_rooms(names(&["a"]));
        assert!(watcher.new_rooms(Vec::new()).is_empty());
        assert_eq!(watcher.new_rooms(names(&["a"])), names(&["a"]));
    }
}
