//! Conversation state types (spec §3).
//!
//! This module intentionally collapses what the teacher's two Message
//! shapes (`everruns-core::message::Message` and the newer
//! `everruns-storage::message_store` shape) kept as parallel
//! representations into a single tagged `ConversationEntry` union — per
//! spec.md §9's design note that duplicated near-identical shapes represent
//! refactor history, not intentional API surface, and should be merged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::phase::Phase;

// ============================================================================
// Conversation Entry
// ============================================================================

/// Delegation-marker status (distinct from [`crate::delegation::DelegationStatus`]
/// only in that this one lives inline in the entry history, not the
/// Delegation Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStatus {
    Pending,
    Completed,
    Aborted,
}

/// One part of a tool-call entry: the model asked to invoke `tool_name`
/// with `input`, correlated by `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
}

/// One part of a tool-result entry, matched to a [`ToolCallPart`] by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub output: String,
}

/// A single entry in a conversation's append-only history (spec §3).
///
/// Entries are never re-ordered in storage; re-ordering happens only in the
/// Message Builder's projected view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEntry {
    Text {
        pubkey: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        targeted_pubkeys: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_pubkey: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ral: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    ToolCall {
        pubkey: String,
        ral: u32,
        parts: Vec<ToolCallPart>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    ToolResult {
        pubkey: String,
        ral: u32,
        parts: Vec<ToolResultPart>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    DelegationMarker {
        delegation_conversation_id: String,
        parent_conversation_id: String,
        recipient_pubkey: String,
        status: MarkerStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        abort_reason: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
    },
}

impl ConversationEntry {
    /// The authoring pubkey, or for delegation markers the recipient being
    /// addressed — used for RAL/visibility bookkeeping which only applies
    /// to entries with an authentic author.
    pub fn author_pubkey(&self) -> Option<&str> {
        match self {
            ConversationEntry::Text { pubkey, .. }
            | ConversationEntry::ToolCall { pubkey, .. }
            | ConversationEntry::ToolResult { pubkey, .. } => Some(pubkey),
            ConversationEntry::DelegationMarker { .. } => None,
        }
    }

    /// The RAL this entry was produced in, if any. User text entries and
    /// delegation markers carry no RAL.
    pub fn ral(&self) -> Option<u32> {
        match self {
            ConversationEntry::Text { ral, .. } => *ral,
            ConversationEntry::ToolCall { ral, .. } | ConversationEntry::ToolResult { ral, .. } => {
                Some(*ral)
            }
            ConversationEntry::DelegationMarker { .. } => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, ConversationEntry::Text { .. })
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, ConversationEntry::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ConversationEntry::ToolResult { .. })
    }

    pub fn is_delegation_marker(&self) -> bool {
        matches!(self, ConversationEntry::DelegationMarker { .. })
    }

    /// The id of the signed event that produced this entry, if known —
    /// used by the Message Builder's image-placeholder strategy to cite
    /// the originating event (spec §4.8).
    pub fn event_id(&self) -> Option<&str> {
        match self {
            ConversationEntry::Text { event_id, .. }
            | ConversationEntry::ToolCall { event_id, .. }
            | ConversationEntry::ToolResult { event_id, .. } => event_id.as_deref(),
            ConversationEntry::DelegationMarker { .. } => None,
        }
    }
}

// ============================================================================
// Agent State
// ============================================================================

/// A delegation this agent is waiting on, carried inline in [`AgentState`]
/// so the coordinator can tell at a glance whether an agent is blocked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDelegation {
    pub expected_from: Vec<String>,
    pub received_responses: HashMap<String, String>,
    pub original_request: String,
}

/// Per-agent, per-conversation watermark and session state (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub last_processed_message_index: usize,
    pub last_seen_phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claude_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_delegation: Option<PendingDelegation>,
}

impl AgentState {
    pub fn new(initial_phase: Phase) -> Self {
        Self {
            last_processed_message_index: 0,
            last_seen_phase: initial_phase,
            claude_session_id: None,
            pending_delegation: None,
        }
    }

    /// `true` while this agent is blocked on outstanding delegation responses.
    pub fn is_blocked_on_delegation(&self) -> bool {
        self.pending_delegation.is_some()
    }
}

// ============================================================================
// Phase Transition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub agent_pubkey: String,
    pub agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

// ============================================================================
// Orchestrator Turn
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnCompletion {
    pub agent: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorTurn {
    pub turn_id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub agents: Vec<String>,
    pub completions: Vec<TurnCompletion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub is_completed: bool,
}

impl OrchestratorTurn {
    /// A turn closes when every agent in `agents` has appeared in
    /// `completions` (spec §3).
    pub fn recompute_completed(&mut self) {
        self.is_completed = self
            .agents
            .iter()
            .all(|agent| self.completions.iter().any(|c| &c.agent == agent));
    }
}

// ============================================================================
// Execution Lock
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLock {
    pub conversation_id: String,
    pub agent_pubkey: String,
    pub acquired_at: DateTime<Utc>,
    pub max_duration_ms: u64,
}

impl ExecutionLock {
    /// Milliseconds elapsed since acquisition, as observed at `now`.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.acquired_at).num_milliseconds().max(0)
    }

    /// `true` once `elapsed_ms(now) >= max_duration_ms`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.elapsed_ms(now) as u64 >= self.max_duration_ms
    }

    /// `true` once the elapsed fraction of `max_duration_ms` has crossed
    /// `warning_fraction` (e.g. 0.8 for an 80%-elapsed warning).
    pub fn should_warn(&self, now: DateTime<Utc>, warning_fraction: f64) -> bool {
        if self.max_duration_ms == 0 {
            return false;
        }
        let elapsed = self.elapsed_ms(now) as f64;
        elapsed >= (self.max_duration_ms as f64) * warning_fraction
    }
}

// ============================================================================
// Execution Time Counters
// ============================================================================

/// Cumulative execution-time counters (spec §6 persisted shape).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTime {
    pub total_seconds: u64,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
}

impl ExecutionTime {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_seconds: 0,
            is_active: false,
            last_updated: now,
        }
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Free-form per-conversation metadata (spec §3): summary, last user
/// message, referenced article, queue status, per-phase continue counters,
/// tracked read files, etc. Modeled as a JSON map rather than a fixed struct
/// because the set of keys the engine writes is open-ended and most are
/// optional diagnostic data (spec §9 notes the source's "continue call
/// counts" are effectively unused outside the process).
pub type ConversationMetadata = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// 64-char hex id, equal to the id of the conversation's first event.
    pub id: String,
    pub title: String,
    pub phase: Phase,
    pub history: Vec<ConversationEntry>,
    pub agent_states: HashMap<String, AgentState>,
    pub phase_started_at: DateTime<Utc>,
    pub metadata: ConversationMetadata,
    pub phase_transitions: Vec<PhaseTransition>,
    pub orchestrator_turns: Vec<OrchestratorTurn>,
    pub execution_time: ExecutionTime,
}

impl Conversation {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            phase: Phase::default(),
            history: Vec::new(),
            agent_states: HashMap::new(),
            phase_started_at: now,
            metadata: ConversationMetadata::new(),
            phase_transitions: Vec::new(),
            orchestrator_turns: Vec::new(),
            execution_time: ExecutionTime::new(now),
        }
    }

    /// Appends an entry. History is append-only (spec §3 invariant); there
    /// is deliberately no remove/reorder operation on `Conversation`.
    pub fn append(&mut self, entry: ConversationEntry) {
        self.history.push(entry);
    }

    pub fn event_count(&self) -> usize {
        self.history.len()
    }

    pub fn agent_count(&self) -> usize {
        self.agent_states.len()
    }

    pub fn agent_state_mut(&mut self, slug: &str) -> &mut AgentState {
        self.agent_states
            .entry(slug.to_string())
            .or_insert_with(|| AgentState::new(self.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn append_grows_history_monotonically() {
        let mut conv = Conversation::new("id", "t", now());
        assert_eq!(conv.event_count(), 0);
        conv.append(ConversationEntry::Text {
            pubkey: "p".into(),
            content: "hi".into(),
            targeted_pubkeys: None,
            sender_pubkey: None,
            role: None,
            ral: None,
            event_id: None,
        });
        assert_eq!(conv.event_count(), 1);
    }

    #[test]
    fn turn_closes_when_all_agents_completed() {
        let mut turn = OrchestratorTurn {
            turn_id: "t1".into(),
            timestamp: now(),
            phase: Phase::Plan,
            agents: vec!["pm".into(), "dev".into()],
            completions: vec![TurnCompletion {
                agent: "pm".into(),
                message: "done".into(),
                timestamp: now(),
            }],
            reason: None,
            is_completed: false,
        };
        turn.recompute_completed();
        assert!(!turn.is_completed);

        turn.completions.push(TurnCompletion {
            agent: "dev".into(),
            message: "done too".into(),
            timestamp: now(),
        });
        turn.recompute_completed();
        assert!(turn.is_completed);
    }

    #[test]
    fn execution_lock_expiry_and_warning() {
        let lock = ExecutionLock {
            conversation_id: "c1".into(),
            agent_pubkey: "p1".into(),
            acquired_at: now(),
            max_duration_ms: 1000,
        };
        let t_800ms = now() + chrono::Duration::milliseconds(800);
        assert!(lock.should_warn(t_800ms, 0.8));
        assert!(!lock.is_expired(t_800ms));

        let t_1000ms = now() + chrono::Duration::milliseconds(1000);
        assert!(lock.is_expired(t_1000ms));
    }

    #[test]
    fn entry_author_and_ral_accessors() {
        let tool_call = ConversationEntry::ToolCall {
            pubkey: "agent".into(),
            ral: 2,
            parts: vec![],
            event_id: None,
        };
        assert_eq!(tool_call.author_pubkey(), Some("agent"));
        assert_eq!(tool_call.ral(), Some(2));

        let marker = ConversationEntry::DelegationMarker {
            delegation_conversation_id: "d1".into(),
            parent_conversation_id: "p1".into(),
            recipient_pubkey: "r1".into(),
            status: MarkerStatus::Pending,
            abort_reason: None,
            completed_at: None,
        };
        assert_eq!(marker.author_pubkey(), None);
        assert_eq!(marker.ral(), None);
    }

    #[test]
    fn agent_state_new_defaults_unblocked() {
        let state = AgentState::new(Phase::Chat);
        assert!(!state.is_blocked_on_delegation());
        assert_eq!(state.last_processed_message_index, 0);
    }
}
