// Conversation Registry (spec §4.2)
//
// Resolves (projectId, eventIdPrefix) -> conversationId and pubkey ->
// isAgent. Process-wide and volatile: it rebuilds from the Persistence
// Adapter and the Event Store at engine startup (spec §5 Lifecycle) rather
// than persisting its own indices.

use std::collections::{HashMap, HashSet};

use tenex_contracts::ids;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::scope;

#[derive(Debug, Default)]
struct RegistryState {
    /// full event id -> conversation id
    event_index: HashMap<String, String>,
    /// short id -> every full event id sharing that prefix
    short_index: HashMap<String, Vec<String>>,
    agent_pubkeys: HashSet<String>,
    known_projects: HashSet<String>,
    last_initialised_project: Option<String>,
}

/// Maps event-id / short-id prefixes and pubkeys to conversations and
/// agents; resolves per-project scope via the ambient request-scoped
/// context (spec §4.2, §9).
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    state: RwLock<RegistryState>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `full_event_id` (the conversation's id, or any event
    /// appended to it) as belonging to `conversation_id`, and updates the
    /// short-id index so prefix lookups find it.
    pub async fn register_event(&self, full_event_id: &str, conversation_id: &str) {
        let mut state = self.state.write().await;
        state
            .event_index
            .insert(full_event_id.to_string(), conversation_id.to_string());
        let short = ids::shorten_event_id(full_event_id);
        state
            .short_index
            .entry(short)
            .or_default()
            .push(full_event_id.to_string());
    }

    pub async fn resolve_by_full_id(&self, full_event_id: &str) -> Option<String> {
        self.state.read().await.event_index.get(full_event_id).cloned()
    }

    /// Returns every full event id sharing `prefix`. Collisions are
    /// resolved by returning all matches and letting the caller
    /// disambiguate by full id (spec §4.2) — the registry does not guess.
    pub async fn resolve_by_short_id(&self, prefix: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .short_index
            .get(prefix)
            .cloned()
            .unwrap_or_default()
    }

    /// Looks a short-id prefix up and, if it resolves unambiguously,
    /// returns that event's conversation id.
    pub async fn resolve_conversation_by_short_id(&self, prefix: &str) -> Option<String> {
        let matches = self.resolve_by_short_id(prefix).await;
        if matches.len() != 1 {
            return None;
        }
        self.resolve_by_full_id(&matches[0]).await
    }

    pub async fn register_agent(&self, pubkey: &str) {
        self.state.write().await.agent_pubkeys.insert(pubkey.to_string());
    }

    pub async fn is_agent(&self, pubkey: &str) -> bool {
        self.state.read().await.agent_pubkeys.contains(pubkey)
    }

    pub async fn known_agent_pubkeys(&self) -> Vec<String> {
        self.state.read().await.agent_pubkeys.iter().cloned().collect()
    }

    /// Registers a project id as known, tracking it as the
    /// last-initialised project if none is set yet.
    pub async fn register_project(&self, project_id: &str) {
        let mut state = self.state.write().await;
        state.known_projects.insert(project_id.to_string());
        state.last_initialised_project = Some(project_id.to_string());
    }

    /// Three-tier project resolution (spec §4.2):
    /// 1. `explicit`, if given.
    /// 2. The ambient request-scoped "current project" value.
    /// 3. Legacy fallback to the last-initialised project, with a warning
    ///    when more than one project is known (ambiguous fallback).
    pub async fn resolve_project(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(p) = explicit {
            return Ok(p.to_string());
        }
        if let Some(p) = scope::current_project() {
            return Ok(p);
        }
        let state = self.state.read().await;
        match &state.last_initialised_project {
            Some(p) => {
                if state.known_projects.len() > 1 {
                    warn!(
                        fallback_project = %p,
                        known_projects = state.known_projects.len(),
                        "resolved project via legacy last-initialised fallback with multiple projects known"
                    );
                }
                Ok(p.clone())
            }
            None => Err(EngineError::invalid_event("no project could be resolved: no explicit project, no ambient scope, and none initialised")),
        }
    }
}
