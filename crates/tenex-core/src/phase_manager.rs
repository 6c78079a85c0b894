// Phase Manager (spec §4.4)
//
// A finite-state machine over conversation phases. Transitions are always
// legal between any two phases, but entering EXECUTE requires acquiring
// the Execution Queue lock, and leaving EXECUTE releases it.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tenex_contracts::{Conversation, Phase, PhaseTransition};
use tracing::info;

use crate::execution_queue::ExecutionQueue;

const QUEUE_STATUS_METADATA_KEY: &str = "queueStatus";
const READ_FILES_METADATA_KEY: &str = "readFiles";

/// Outcome of a requested phase transition.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// The transition was recorded.
    Applied,
    /// Entering EXECUTE was deferred; the transition was NOT recorded.
    /// `conversation.metadata["queueStatus"]` has been updated so the
    /// caller (and anyone re-reading the conversation) can see the
    /// position and estimated wait.
    Deferred { queue_position: usize, estimated_wait_ms: Option<u64> },
}

pub struct PhaseManager {
    queue: Arc<ExecutionQueue>,
}

impl PhaseManager {
    pub fn new(queue: Arc<ExecutionQueue>) -> Self {
        Self { queue }
    }

    /// Requests a transition to `to` on behalf of `agent_pubkey`/`agent_name`.
    /// Same-phase "transitions" still push a transition record (spec §4.4
    /// — they carry control-flow semantics, e.g. a handoff).
    #[allow(clippy::too_many_arguments)]
    pub async fn request_transition(
        &self,
        conversation: &mut Conversation,
        to: Phase,
        agent_pubkey: &str,
        agent_name: &str,
        message: &str,
        reason: Option<String>,
        summary: Option<String>,
    ) -> TransitionOutcome {
        let from = conversation.phase;

        if to == Phase::Execute {
            let result = self.queue.request_execution(&conversation.id, agent_pubkey).await;
            if !result.granted {
                let position = result.queue_position.unwrap_or(0);
                conversation.metadata.insert(
                    QUEUE_STATUS_METADATA_KEY.to_string(),
                    json!({
                        "position": position,
                        "estimatedWaitMs": result.estimated_wait_ms,
                    }),
                );
                info!(
                    conversation_id = %conversation.id,
                    agent_pubkey,
                    position,
                    "execute-phase transition deferred, queued"
                );
                return TransitionOutcome::Deferred {
                    queue_position: position,
                    estimated_wait_ms: result.estimated_wait_ms,
                };
            }
            conversation.metadata.remove(QUEUE_STATUS_METADATA_KEY);
        } else if from == Phase::Execute {
            self.queue.release_execution(&conversation.id, "phase-transition").await;
        }

        if from == Phase::Reflection && to == Phase::Chat {
            conversation.metadata.remove(READ_FILES_METADATA_KEY);
        }

        conversation.phase = to;
        conversation.phase_started_at = Utc::now();
        conversation.phase_transitions.push(PhaseTransition {
            from,
            to,
            message: message.to_string(),
            timestamp: conversation.phase_started_at,
            agent_pubkey: agent_pubkey.to_string(),
            agent_name: agent_name.to_string(),
            reason,
            summary,
        });

        info!(conversation_id = %conversation.id, from = %from, to = %to, "phase transition applied");
        TransitionOutcome::Applied
    }
}
