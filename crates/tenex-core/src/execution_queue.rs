// Execution Queue (spec §4.5)
//
// Per-conversation FIFO: one slot active, others wait. The queue owns
// timeout enforcement for the holder of a lock and emits lifecycle events
// other components (the Phase Manager, in particular) subscribe to.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use tenex_contracts::ExecutionLock;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::config::EngineConfig;

/// Side-effect events the queue emits (spec §4.5).
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    LockAcquired { conversation_id: String, agent_pubkey: String },
    LockReleased { conversation_id: String, reason: String },
    QueueJoined { conversation_id: String, agent_pubkey: String },
    QueueLeft { conversation_id: String, agent_pubkey: String },
    /// Fired once when less than `timeout_warning_fraction` of the lock's
    /// duration remains.
    TimeoutWarning { conversation_id: String, remaining_ms: u64 },
    /// Forces the conversation back to `chat` (enforced by the Phase
    /// Manager, which subscribes to this event).
    Timeout { conversation_id: String },
}

/// Result of [`ExecutionQueue::request_execution`].
#[derive(Debug, Clone, PartialEq)]
pub struct RequestResult {
    pub granted: bool,
    pub queue_position: Option<usize>,
    pub estimated_wait_ms: Option<u64>,
}

/// A conversation's full queue status: the active lock (if any), the FIFO
/// of waiters, and whether a timeout warning has already fired for the
/// current lock.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationQueueStatus {
    pub conversation_id: String,
    pub lock: Option<ExecutionLock>,
    pub waiters: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatusSummary {
    pub active_locks: usize,
    pub total_waiting: usize,
}

#[derive(Default)]
struct QueueState {
    locks: HashMap<String, ExecutionLock>,
    waiters: HashMap<String, VecDeque<String>>,
    /// Historical lock durations in milliseconds, per conversation, used
    /// for the estimated-wait heuristic (spec §4.5: "monotonically
    /// non-increasing heuristic computed from average historical lock
    /// duration; not a guarantee").
    lock_duration_history_ms: HashMap<String, Vec<u64>>,
}

pub struct ExecutionQueue {
    state: RwLock<QueueState>,
    config: EngineConfig,
    events: broadcast::Sender<QueueEvent>,
}

impl ExecutionQueue {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(256);
        Arc::new(Self {
            state: RwLock::new(QueueState::default()),
            config,
            events: tx,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is a normal state (e.g. in tests); the send error
        // just means nobody's listening right now.
        let _ = self.events.send(event);
    }

    /// Requests the execution lock for `conversation_id` on behalf of
    /// `agent_pubkey`. Grants immediately if the conversation's slot is
    /// free; otherwise joins the FIFO.
    pub async fn request_execution(self: &Arc<Self>, conversation_id: &str, agent_pubkey: &str) -> RequestResult {
        let mut state = self.state.write().await;
        if !state.locks.contains_key(conversation_id) {
            let lock = ExecutionLock {
                conversation_id: conversation_id.to_string(),
                agent_pubkey: agent_pubkey.to_string(),
                acquired_at: Utc::now(),
                max_duration_ms: self.config.max_duration_ms,
            };
            state.locks.insert(conversation_id.to_string(), lock);
            drop(state);
            info!(conversation_id, agent_pubkey, "execution lock acquired");
            self.emit(QueueEvent::LockAcquired {
                conversation_id: conversation_id.to_string(),
                agent_pubkey: agent_pubkey.to_string(),
            });
            self.spawn_timeout_watcher(conversation_id.to_string());
            return RequestResult {
                granted: true,
                queue_position: None,
                estimated_wait_ms: None,
            };
        }

        let waiters = state.waiters.entry(conversation_id.to_string()).or_default();
        waiters.push_back(agent_pubkey.to_string());
        let position = waiters.len();
        let estimated_wait_ms = self.estimate_wait(&state, conversation_id, position);
        drop(state);
        self.emit(QueueEvent::QueueJoined {
            conversation_id: conversation_id.to_string(),
            agent_pubkey: agent_pubkey.to_string(),
        });
        RequestResult {
            granted: false,
            queue_position: Some(position),
            estimated_wait_ms,
        }
    }

    fn estimate_wait(&self, state: &QueueState, conversation_id: &str, position: usize) -> Option<u64> {
        let history = state.lock_duration_history_ms.get(conversation_id)?;
        if history.is_empty() {
            return None;
        }
        let avg = history.iter().sum::<u64>() / history.len() as u64;
        Some(avg.saturating_mul(position as u64))
    }

    /// Releases the lock for `conversation_id`, recording `reason`. If a
    /// waiter is queued, it is immediately granted the lock.
    pub async fn release_execution(self: &Arc<Self>, conversation_id: &str, reason: &str) {
        let mut state = self.state.write().await;
        let Some(lock) = state.locks.remove(conversation_id) else {
            return;
        };
        let held_ms = lock.elapsed_ms(Utc::now()).max(0) as u64;
        state
            .lock_duration_history_ms
            .entry(conversation_id.to_string())
            .or_default()
            .push(held_ms);

        let next_waiter = state.waiters.get_mut(conversation_id).and_then(VecDeque::pop_front);
        if let Some(ref agent_pubkey) = next_waiter {
            let new_lock = ExecutionLock {
                conversation_id: conversation_id.to_string(),
                agent_pubkey: agent_pubkey.clone(),
                acquired_at: Utc::now(),
                max_duration_ms: self.config.max_duration_ms,
            };
            state.locks.insert(conversation_id.to_string(), new_lock);
        }
        drop(state);

        info!(conversation_id, reason, "execution lock released");
        self.emit(QueueEvent::LockReleased {
            conversation_id: conversation_id.to_string(),
            reason: reason.to_string(),
        });

        if let Some(agent_pubkey) = next_waiter {
            self.emit(QueueEvent::QueueLeft {
                conversation_id: conversation_id.to_string(),
                agent_pubkey: agent_pubkey.clone(),
            });
            self.emit(QueueEvent::LockAcquired {
                conversation_id: conversation_id.to_string(),
                agent_pubkey,
            });
            self.spawn_timeout_watcher(conversation_id.to_string());
        }
    }

    /// Returns `agent_pubkey`'s position in `conversation_id`'s FIFO
    /// (1-indexed); `0` means not queued (spec §4.5).
    pub async fn get_queue_position(&self, conversation_id: &str, agent_pubkey: &str) -> usize {
        let state = self.state.read().await;
        state
            .waiters
            .get(conversation_id)
            .and_then(|q| q.iter().position(|p| p == agent_pubkey))
            .map(|idx| idx + 1)
            .unwrap_or(0)
    }

    /// Removes `agent_pubkey` from `conversation_id`'s FIFO without
    /// granting it the lock.
    pub async fn remove_from_queue(&self, conversation_id: &str, agent_pubkey: &str) {
        let removed = {
            let mut state = self.state.write().await;
            match state.waiters.get_mut(conversation_id) {
                Some(q) => {
                    let before = q.len();
                    q.retain(|p| p != agent_pubkey);
                    before != q.len()
                }
                None => false,
            }
        };
        if removed {
            self.emit(QueueEvent::QueueLeft {
                conversation_id: conversation_id.to_string(),
                agent_pubkey: agent_pubkey.to_string(),
            });
        }
    }

    pub async fn get_status(&self) -> QueueStatusSummary {
        let state = self.state.read().await;
        QueueStatusSummary {
            active_locks: state.locks.len(),
            total_waiting: state.waiters.values().map(VecDeque::len).sum(),
        }
    }

    pub async fn get_full_status(&self) -> Vec<ConversationQueueStatus> {
        let state = self.state.read().await;
        let mut ids: Vec<&String> = state.locks.keys().chain(state.waiters.keys()).collect();
        ids.sort();
        ids.dedup();
        ids.into_iter()
            .map(|id| ConversationQueueStatus {
                conversation_id: id.clone(),
                lock: state.locks.get(id).cloned(),
                waiters: state.waiters.get(id).map(|q| q.iter().cloned().collect()).unwrap_or_default(),
            })
            .collect()
    }

    /// Spawns a background watcher that fires `TimeoutWarning` once, then
    /// `Timeout` and a forced release, for the lock currently held on
    /// `conversation_id`. Each acquisition gets its own watcher; a watcher
    /// that outlives its lock (because it was released early) is a no-op
    /// on wake since it re-checks the lock is still the one it started
    /// with before acting.
    fn spawn_timeout_watcher(self: &Arc<Self>, conversation_id: String) {
        let queue = Arc::clone(self);
        let max_duration_ms = self.config.max_duration_ms;
        let warning_fraction = self.config.timeout_warning_fraction;
        let acquired_at = Utc::now();

        tokio::spawn(async move {
            let warning_delay_ms = (max_duration_ms as f64 * warning_fraction) as u64;
            tokio::time::sleep(std::time::Duration::from_millis(warning_delay_ms)).await;
            if !queue.lock_still_current(&conversation_id, acquired_at).await {
                return;
            }
            let remaining_ms = max_duration_ms.saturating_sub(warning_delay_ms);
            warn!(conversation_id = %conversation_id, remaining_ms, "execution lock approaching timeout");
            queue.emit(QueueEvent::TimeoutWarning {
                conversation_id: conversation_id.clone(),
                remaining_ms,
            });

            tokio::time::sleep(std::time::Duration::from_millis(max_duration_ms - warning_delay_ms)).await;
            if !queue.lock_still_current(&conversation_id, acquired_at).await {
                return;
            }
            warn!(conversation_id = %conversation_id, "execution lock timed out");
            queue.release_execution(&conversation_id, "timeout").await;
            queue.emit(QueueEvent::Timeout {
                conversation_id: conversation_id.clone(),
            });
        });
    }

    async fn lock_still_current(&self, conversation_id: &str, acquired_at: chrono::DateTime<Utc>) -> bool {
        self.state
            .read()
            .await
            .locks
            .get(conversation_id)
            .is_some_and(|lock| lock.acquired_at == acquired_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.max_duration_ms = 60_000;
        config
    }

    #[tokio::test]
    async fn first_requester_is_granted_immediately() {
        let queue = ExecutionQueue::new(test_config());
        let result = queue.request_execution("conv1", "agent-a").await;
        assert!(result.granted);
        assert_eq!(result.queue_position, None);
    }

    #[tokio::test]
    async fn second_requester_queues_at_position_one() {
        let queue = ExecutionQueue::new(test_config());
        queue.request_execution("conv1", "agent-a").await;
        let result = queue.request_execution("conv1", "agent-b").await;
        assert!(!result.granted);
        assert_eq!(result.queue_position, Some(1));
    }

    #[tokio::test]
    async fn release_grants_lock_to_next_waiter() {
        let queue = ExecutionQueue::new(test_config());
        queue.request_execution("conv1", "agent-a").await;
        queue.request_execution("conv1", "agent-b").await;

        let mut events = queue.subscribe();
        queue.release_execution("conv1", "completed").await;

        let full_status = queue.get_full_status().await;
        let conv1_status = full_status.iter().find(|s| s.conversation_id == "conv1").unwrap();
        assert_eq!(conv1_status.lock.as_ref().unwrap().agent_pubkey, "agent-b");
        assert!(conv1_status.waiters.is_empty());

        let mut saw_acquired_for_b = false;
        while let Ok(ev) = events.try_recv() {
            if let QueueEvent::LockAcquired { agent_pubkey, .. } = ev {
                if agent_pubkey == "agent-b" {
                    saw_acquired_for_b = true;
                }
            }
        }
        assert!(saw_acquired_for_b);
    }

    #[tokio::test]
    async fn remove_from_queue_drops_a_specific_waiter() {
        let queue = ExecutionQueue::new(test_config());
        queue.request_execution("conv1", "agent-a").await;
        queue.request_execution("conv1", "agent-b").await;
        queue.remove_from_queue("conv1", "agent-b").await;
        assert_eq!(queue.get_queue_position("conv1", "agent-b").await, 0);
    }

    #[tokio::test]
    async fn queue_position_zero_when_not_queued() {
        let queue = ExecutionQueue::new(test_config());
        assert_eq!(queue.get_queue_position("conv1", "agent-z").await, 0);
    }
}
