// Conversation Coordinator (spec §4.7)
//
// The facade the rest of the engine is embedded behind: every other module
// in this crate is assembled here into the small set of operations a host
// actually calls. Per-conversation mutation is serialised by holding each
// conversation behind its own `Mutex`, so unrelated conversations proceed
// in parallel while events for the same conversation are strictly ordered
// (spec §5).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tenex_contracts::{
    AgentState, BuiltMessages, Conversation, ConversationEntry, DelegationRecord, MarkerStatus, OrchestratorTurn,
    Phase, PendingDelegation, SignedEvent, ToolCallPart, ToolResultPart, TurnCompletion,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::decoder;
use crate::delegation_registry::DelegationRegistry;
use crate::error::{EngineError, Result};
use crate::execution_queue::ExecutionQueue;
use crate::message_builder::{self, BuilderContext, TargetedLine};
use crate::phase_manager::{PhaseManager, TransitionOutcome};
use crate::registry::ConversationRegistry;
use crate::traits::{ArticleFetcher, AgentsMdLookup, PersistenceAdapter, SearchCriteria};
use crate::traits::ConversationMetadata;

/// Options for [`ConversationCoordinator::build_agent_messages`] that depend
/// on project-tree access the Coordinator doesn't own directly — a host
/// resolves these (e.g. by walking a checkout on disk) and passes them in,
/// keeping the Message Builder itself a pure function (spec §4.8).
#[derive(Debug, Clone, Default)]
pub struct BuildMessagesOptions {
    pub project_root: Option<String>,
    pub agents_md_by_tool_call: HashMap<String, Vec<String>>,
}

/// A partial update to an [`AgentState`]. `Some(None)` clears a field;
/// `None` leaves it untouched — this is the only way to distinguish "clear
/// the session id" from "don't touch the session id" through a single
/// patch struct.
#[derive(Debug, Clone, Default)]
pub struct AgentStatePatch {
    pub claude_session_id: Option<Option<String>>,
    pub pending_delegation: Option<Option<PendingDelegation>>,
    pub last_processed_message_index: Option<usize>,
}

struct RalCounters {
    next: HashMap<(String, String), u32>,
}

impl RalCounters {
    fn allocate(&mut self, conversation_id: &str, agent_pubkey: &str) -> u32 {
        let key = (conversation_id.to_string(), agent_pubkey.to_string());
        let counter = self.next.entry(key).or_insert(0);
        *counter += 1;
        *counter
    }
}

/// Wires the Conversation Registry, Phase Manager, Execution Queue,
/// Delegation Registry, and Message Builder behind the handful of
/// operations a host calls (spec §4.7).
pub struct ConversationCoordinator {
    config: EngineConfig,
    persistence: Arc<dyn PersistenceAdapter>,
    article_fetcher: Arc<dyn ArticleFetcher>,
    agents_md: Arc<dyn AgentsMdLookup>,
    registry: Arc<ConversationRegistry>,
    phase_manager: PhaseManager,
    execution_queue: Arc<ExecutionQueue>,
    delegations: Arc<DelegationRegistry>,
    conversations: RwLock<HashMap<String, Arc<Mutex<Conversation>>>>,
    ral_counters: Mutex<RalCounters>,
}

impl ConversationCoordinator {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceAdapter>,
        article_fetcher: Arc<dyn ArticleFetcher>,
        agents_md: Arc<dyn AgentsMdLookup>,
    ) -> Self {
        let execution_queue = ExecutionQueue::new(config.clone());
        Self {
            config,
            persistence,
            article_fetcher,
            agents_md,
            registry: Arc::new(ConversationRegistry::new()),
            phase_manager: PhaseManager::new(execution_queue.clone()),
            execution_queue,
            delegations: Arc::new(DelegationRegistry::new()),
            conversations: RwLock::new(HashMap::new()),
            ral_counters: Mutex::new(RalCounters { next: HashMap::new() }),
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    pub fn execution_queue(&self) -> &Arc<ExecutionQueue> {
        &self.execution_queue
    }

    pub fn delegation_registry(&self) -> &Arc<DelegationRegistry> {
        &self.delegations
    }

    /// Resolves the in-memory handle for `conversation_id`, loading it from
    /// the Persistence Adapter on first access.
    async fn handle(&self, conversation_id: &str) -> Result<Arc<Mutex<Conversation>>> {
        if let Some(handle) = self.conversations.read().await.get(conversation_id) {
            return Ok(handle.clone());
        }
        let mut conversations = self.conversations.write().await;
        if let Some(handle) = conversations.get(conversation_id) {
            return Ok(handle.clone());
        }
        let conversation = self
            .persistence
            .load(conversation_id)
            .await?
            .ok_or_else(|| EngineError::conversation_not_found(conversation_id))?;
        let handle = Arc::new(Mutex::new(conversation));
        conversations.insert(conversation_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Saves `conversation`, retrying once on failure before surfacing the
    /// error to the caller (spec §7 "persistence failures are retried once
    /// on save; then surfaced").
    async fn persist_with_retry(&self, conversation: &Conversation) -> Result<()> {
        match self.persistence.save(conversation).await {
            Ok(()) => Ok(()),
            Err(first_err) => {
                warn!(conversation_id = %conversation.id, error = %first_err, "persistence save failed, retrying once");
                self.persistence.save(conversation).await.map_err(|retry_err| {
                    warn!(conversation_id = %conversation.id, error = %retry_err, "persistence save failed again, giving up");
                    retry_err
                })
            }
        }
    }

    async fn next_ral(&self, conversation_id: &str, agent_pubkey: &str) -> u32 {
        self.ral_counters.lock().await.allocate(conversation_id, agent_pubkey)
    }

    /// Creates a new conversation from its first event. `event.id` becomes
    /// the conversation id (spec §3). Best-effort article enrichment never
    /// fails the call (spec §5, §7).
    pub async fn create_conversation(&self, event: &SignedEvent) -> Result<Conversation> {
        if !tenex_contracts::ids::is_full_id(&event.id) {
            return Err(EngineError::invalid_event("event id is not a well-formed full id"));
        }

        let now = Utc::now();
        let title = event.title_tag().unwrap_or("Untitled").to_string();
        let mut conversation = Conversation::new(event.id.clone(), title, now);

        if let Some(a_tag) = event.first_tag_value(tenex_contracts::event::TAG_ADDRESSABLE) {
            match self.article_fetcher.fetch(a_tag).await {
                Ok(Some(article)) => {
                    conversation.metadata.insert(
                        "referencedArticle".to_string(),
                        json!({
                            "title": article.title,
                            "content": article.content,
                            "dTag": article.d_tag,
                        }),
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(a_tag, error = %err, "article enrichment failed, continuing without it");
                }
            }
        }

        conversation.metadata.insert("lastUserMessage".to_string(), json!(event.content));
        self.registry.register_event(&event.id, &event.id).await;
        self.persist_with_retry(&conversation).await?;

        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), Arc::new(Mutex::new(conversation.clone())));
        info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// Routes an inbound event into `conversation_id`'s history. Plain
    /// conversational text is appended as-is; delegation requests and
    /// completions are routed through the Delegation Registry instead
    /// (spec §4.1, §4.6, §4.7).
    pub async fn add_event(&self, conversation_id: &str, event: &SignedEvent) -> Result<()> {
        if event.id.is_empty() {
            return Err(EngineError::invalid_event("event is missing an id"));
        }

        let known_agents = self.registry.known_agent_pubkeys().await;
        if decoder::is_delegation_completion(event) {
            if let Some(delegation_request_id) = event.reply_target() {
                return self
                    .record_delegation_completion(conversation_id, delegation_request_id, event)
                    .await;
            }
        }
        if decoder::is_delegation_request(event, &known_agents) {
            let recipients = event.addressed_pubkeys().into_iter().map(str::to_string).collect();
            self.record_delegation_request(conversation_id, event, recipients).await?;
            return Ok(());
        }

        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        let is_agent_author = self.registry.is_agent(&event.pubkey).await;

        let targeted = event.addressed_pubkeys();
        conversation.append(ConversationEntry::Text {
            pubkey: event.pubkey.clone(),
            content: event.content.clone(),
            targeted_pubkeys: if targeted.is_empty() {
                None
            } else {
                Some(targeted.into_iter().map(String::from).collect())
            },
            sender_pubkey: None,
            role: None,
            ral: None,
            event_id: Some(event.id.clone()),
        });

        if !is_agent_author {
            conversation.metadata.insert("lastUserMessage".to_string(), json!(event.content));
            conversation.metadata.insert("summary".to_string(), json!(event.content));
        }

        self.registry.register_event(&event.id, conversation_id).await;
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await
    }

    /// Appends a tool-call entry produced by `agent_pubkey` for its current
    /// run-attempt (spec §3 `ConversationEntry::ToolCall`).
    pub async fn append_tool_call(
        &self,
        conversation_id: &str,
        agent_pubkey: &str,
        ral: u32,
        parts: Vec<ToolCallPart>,
        event_id: Option<String>,
    ) -> Result<()> {
        self.append_and_persist(conversation_id, ConversationEntry::ToolCall {
            pubkey: agent_pubkey.to_string(),
            ral,
            parts,
            event_id,
        })
        .await
    }

    /// Appends the corresponding tool-result entry.
    pub async fn append_tool_result(
        &self,
        conversation_id: &str,
        agent_pubkey: &str,
        ral: u32,
        parts: Vec<ToolResultPart>,
        event_id: Option<String>,
    ) -> Result<()> {
        self.append_and_persist(conversation_id, ConversationEntry::ToolResult {
            pubkey: agent_pubkey.to_string(),
            ral,
            parts,
            event_id,
        })
        .await
    }

    async fn append_and_persist(&self, conversation_id: &str, entry: ConversationEntry) -> Result<()> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        conversation.append(entry);
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await
    }

    /// Builds the next provider-ready message batch for `target_agent`
    /// (spec §4.7 `buildAgentMessages`, the critical path). Advances that
    /// agent's watermark to the end of history once messages are built, and
    /// allocates it a fresh run-attempt number.
    pub async fn build_agent_messages(
        &self,
        conversation_id: &str,
        target_agent: &str,
        options: BuildMessagesOptions,
    ) -> Result<BuiltMessages> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;

        let ral = self.next_ral(conversation_id, target_agent).await;
        let watermark = conversation
            .agent_states
            .get(target_agent)
            .map(|s| s.last_processed_message_index)
            .unwrap_or(0)
            .min(conversation.history.len());
        let slice: Vec<ConversationEntry> = conversation.history[watermark..].to_vec();

        let delegation_transcripts = self.delegation_transcripts_for(&conversation).await;
        let marker_status_overrides = self.marker_status_overrides_for(&conversation).await;
        let known_agents: HashSet<String> = self.registry.known_agent_pubkeys().await.into_iter().collect();

        let mut ctx = BuilderContext::new(target_agent, ral, conversation_id)
            .with_agent_pubkeys(known_agents)
            .with_delegation_transcripts(delegation_transcripts)
            .with_marker_status_overrides(marker_status_overrides);
        if let Some(root) = options.project_root {
            ctx = ctx
                .with_project_root(root)
                .with_agents_md_by_tool_call(options.agents_md_by_tool_call);
        }

        let messages = message_builder::build_messages(&slice, &ctx);
        let provider_session_token = conversation
            .agent_states
            .get(target_agent)
            .and_then(|s| s.claude_session_id.clone());

        let history_len = conversation.history.len();
        let agent_state = conversation.agent_state_mut(target_agent);
        agent_state.last_processed_message_index = history_len;
        agent_state.last_seen_phase = conversation.phase;

        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await?;

        Ok(BuiltMessages { messages, provider_session_token })
    }

    /// Collects the transcripts of every delegation this conversation has
    /// initiated, for the Message Builder to inline (spec §4.8).
    async fn delegation_transcripts_for(&self, conversation: &Conversation) -> HashMap<String, Vec<TargetedLine>> {
        let mut out = HashMap::new();
        for entry in &conversation.history {
            let ConversationEntry::DelegationMarker {
                delegation_conversation_id,
                parent_conversation_id,
                ..
            } = entry
            else {
                continue;
            };
            if parent_conversation_id != &conversation.id || out.contains_key(delegation_conversation_id) {
                continue;
            }
            if delegation_conversation_id == &conversation.id {
                continue;
            }
            let Ok(child_handle) = self.handle(delegation_conversation_id).await else {
                continue;
            };
            let child = child_handle.lock().await;
            let lines: Vec<TargetedLine> = child
                .history
                .iter()
                .filter_map(|entry| match entry {
                    ConversationEntry::Text {
                        pubkey,
                        content,
                        targeted_pubkeys: Some(targets),
                        ..
                    } => targets.first().map(|recipient| TargetedLine {
                        sender: pubkey.clone(),
                        recipient: recipient.clone(),
                        content: content.clone(),
                    }),
                    _ => None,
                })
                .collect();
            out.insert(delegation_conversation_id.clone(), lines);
        }
        out
    }

    /// The live status of every delegation referenced in this conversation's
    /// history, from the Delegation Registry — see
    /// [`message_builder::BuilderContext::marker_status_overrides`] for why
    /// this doesn't rewrite the stored marker entries directly.
    async fn marker_status_overrides_for(
        &self,
        conversation: &Conversation,
    ) -> HashMap<String, (MarkerStatus, Option<String>)> {
        let mut out = HashMap::new();
        for entry in &conversation.history {
            if let ConversationEntry::DelegationMarker {
                delegation_conversation_id,
                ..
            } = entry
            {
                if out.contains_key(delegation_conversation_id) {
                    continue;
                }
                if let Some(record) = self.delegations.get(delegation_conversation_id).await {
                    let status = match record.status {
                        tenex_contracts::DelegationStatus::Pending => MarkerStatus::Pending,
                        tenex_contracts::DelegationStatus::Completed => MarkerStatus::Completed,
                        tenex_contracts::DelegationStatus::Aborted => MarkerStatus::Aborted,
                    };
                    out.insert(delegation_conversation_id.clone(), (status, None));
                }
            }
        }
        out
    }

    /// Records a delegation: registers it in the Delegation Registry, marks
    /// the delegator blocked, and appends a pending delegation-marker entry
    /// per recipient (spec §4.6).
    pub async fn record_delegation_request(
        &self,
        parent_conversation_id: &str,
        request_event: &SignedEvent,
        recipients: Vec<String>,
    ) -> Result<()> {
        let delegation_conversation_id = request_event.id.clone();
        let record = DelegationRecord::new(
            request_event.id.clone(),
            request_event.pubkey.clone(),
            recipients.clone(),
            parent_conversation_id.to_string(),
            delegation_conversation_id.clone(),
        );
        self.delegations.register(record).await;

        let handle = self.handle(parent_conversation_id).await?;
        let mut conversation = handle.lock().await;
        for recipient in &recipients {
            conversation.append(ConversationEntry::DelegationMarker {
                delegation_conversation_id: delegation_conversation_id.clone(),
                parent_conversation_id: parent_conversation_id.to_string(),
                recipient_pubkey: recipient.clone(),
                status: MarkerStatus::Pending,
                abort_reason: None,
                completed_at: None,
            });
        }
        let agent_state = conversation.agent_state_mut(&request_event.pubkey);
        agent_state.pending_delegation = Some(PendingDelegation {
            expected_from: recipients,
            received_responses: HashMap::new(),
            original_request: request_event.id.clone(),
        });

        self.registry.register_event(&request_event.id, parent_conversation_id).await;
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await
    }

    /// Records a delegation-completion event against the outstanding
    /// delegation it replies to. Orphan completions (no matching request)
    /// are logged and swallowed rather than propagated (spec §4.6, §7).
    pub async fn record_delegation_completion(
        &self,
        parent_conversation_id: &str,
        delegation_event_id: &str,
        completion_event: &SignedEvent,
    ) -> Result<()> {
        let Some(record) = self
            .delegations
            .record_response(delegation_event_id, &completion_event.pubkey, completion_event.id.clone())
            .await
        else {
            return Ok(());
        };

        let handle = self.handle(parent_conversation_id).await?;
        let mut conversation = handle.lock().await;
        if record.all_responded() {
            let agent_state = conversation.agent_state_mut(&record.delegator_pubkey);
            agent_state.pending_delegation = None;
        } else if let Some(pending) = conversation
            .agent_state_mut(&record.delegator_pubkey)
            .pending_delegation
            .as_mut()
        {
            pending
                .received_responses
                .insert(completion_event.pubkey.clone(), completion_event.id.clone());
        }
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await
    }

    /// Applies a phase transition, persisting the result either way (a
    /// deferred `execute` transition still updates `queueStatus`
    /// metadata — spec §4.4).
    #[allow(clippy::too_many_arguments)]
    pub async fn update_phase(
        &self,
        conversation_id: &str,
        to: Phase,
        agent_pubkey: &str,
        agent_name: &str,
        message: &str,
        reason: Option<String>,
        summary: Option<String>,
    ) -> Result<TransitionOutcome> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        let outcome = self
            .phase_manager
            .request_transition(&mut conversation, to, agent_pubkey, agent_name, message, reason, summary)
            .await;
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await?;
        Ok(outcome)
    }

    /// Applies a partial update to `agent_pubkey`'s per-conversation state.
    pub async fn update_agent_state(
        &self,
        conversation_id: &str,
        agent_pubkey: &str,
        patch: AgentStatePatch,
    ) -> Result<AgentState> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        {
            let state = conversation.agent_state_mut(agent_pubkey);
            if let Some(session_id) = patch.claude_session_id {
                state.claude_session_id = session_id;
            }
            if let Some(pending) = patch.pending_delegation {
                state.pending_delegation = pending;
            }
            if let Some(index) = patch.last_processed_message_index {
                state.last_processed_message_index = index;
            }
        }
        let updated = conversation.agent_states.get(agent_pubkey).cloned().expect("just written");
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await?;
        Ok(updated)
    }

    /// Opens a new orchestrator turn, returning its id (spec §3
    /// `OrchestratorTurn`).
    pub async fn start_orchestrator_turn(
        &self,
        conversation_id: &str,
        phase: Phase,
        agents: Vec<String>,
        reason: Option<String>,
    ) -> Result<String> {
        let turn_id = uuid::Uuid::now_v7().to_string();
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        let is_completed = agents.is_empty();
        conversation.orchestrator_turns.push(OrchestratorTurn {
            turn_id: turn_id.clone(),
            timestamp: Utc::now(),
            phase,
            agents,
            completions: Vec::new(),
            reason,
            is_completed,
        });
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await?;
        Ok(turn_id)
    }

    /// Records one agent's completion against an open turn, closing it once
    /// every expected agent has reported in (spec §3
    /// `OrchestratorTurn::recompute_completed`).
    pub async fn add_completion_to_turn(
        &self,
        conversation_id: &str,
        turn_id: &str,
        agent: &str,
        message: &str,
    ) -> Result<bool> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        let turn = conversation
            .orchestrator_turns
            .iter_mut()
            .find(|t| t.turn_id == turn_id)
            .ok_or_else(|| EngineError::invalid_event(format!("no orchestrator turn with id {turn_id}")))?;
        turn.completions.push(TurnCompletion {
            agent: agent.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        });
        turn.recompute_completed();
        let is_completed = turn.is_completed;
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await?;
        Ok(is_completed)
    }

    /// Marks a conversation complete (spec §4.7 `completeConversation`) —
    /// recorded in metadata rather than a dedicated field, matching the
    /// open-ended metadata map's role for diagnostic, non-FSM state.
    pub async fn complete_conversation(&self, conversation_id: &str) -> Result<()> {
        let handle = self.handle(conversation_id).await?;
        let mut conversation = handle.lock().await;
        conversation.metadata.insert("completed".to_string(), json!(true));
        let snapshot = conversation.clone();
        drop(conversation);
        self.persist_with_retry(&snapshot).await
    }

    /// Flushes and moves a conversation into the Persistence Adapter's
    /// archive, dropping it from the in-memory set (spec §4.3, §5).
    pub async fn archive_conversation(&self, conversation_id: &str) -> Result<()> {
        let handle = self.handle(conversation_id).await?;
        let snapshot = handle.lock().await.clone();
        self.persist_with_retry(&snapshot).await?;
        self.persistence.archive(conversation_id).await?;
        self.conversations.write().await.remove(conversation_id);
        Ok(())
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ConversationMetadata>> {
        self.persistence.search(criteria).await
    }

    /// Drops in-memory handles for conversations the Persistence Adapter no
    /// longer lists as active (e.g. archived through another host process).
    pub async fn cleanup(&self) -> Result<()> {
        let active_ids: HashSet<String> = self.persistence.list().await?.into_iter().map(|m| m.id).collect();
        let mut conversations = self.conversations.write().await;
        conversations.retain(|id, _| active_ids.contains(id));
        Ok(())
    }

    /// Flushes every in-memory conversation to storage and releases every
    /// outstanding execution lock, for a clean process shutdown
    /// (SPEC_FULL.md supplemented feature).
    pub async fn shutdown(&self) -> Result<()> {
        let ids: Vec<String> = self.conversations.read().await.keys().cloned().collect();
        for id in ids {
            let handle = match self.conversations.read().await.get(&id).cloned() {
                Some(handle) => handle,
                None => continue,
            };
            let snapshot = handle.lock().await.clone();
            if let Err(err) = self.persist_with_retry(&snapshot).await {
                warn!(conversation_id = %id, error = %err, "failed to flush conversation during shutdown");
            }
        }
        for status in self.execution_queue.get_full_status().await {
            self.execution_queue.release_execution(&status.conversation_id, "shutdown").await;
        }
        info!("coordinator shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryArticleFetcher, InMemoryAgentsMdLookup, InMemoryPersistenceAdapter};

    fn event(id: &str, pubkey: &str, content: &str, tags: Vec<Vec<&str>>) -> SignedEvent {
        SignedEvent {
            id: tenex_contracts::ids::create_full_event_id(id),
            pubkey: pubkey.to_string(),
            kind: decoder::kind::GENERIC_TEXT,
            created_at: 0,
            content: content.to_string(),
            tags: tags.into_iter().map(|t| t.into_iter().map(str::to_string).collect()).collect(),
        }
    }

    fn coordinator() -> ConversationCoordinator {
        ConversationCoordinator::new(
            EngineConfig::default(),
            InMemoryPersistenceAdapter::new(),
            Arc::new(InMemoryArticleFetcher::new()),
            Arc::new(InMemoryAgentsMdLookup::new()),
        )
    }

    #[tokio::test]
    async fn create_conversation_uses_event_id_and_title() {
        let coordinator = coordinator();
        let ev = event("root", "user1", "hello", vec![vec!["title", "My Convo"]]);
        let conv = coordinator.create_conversation(&ev).await.unwrap();
        assert_eq!(conv.id, ev.id);
        assert_eq!(conv.title, "My Convo");
    }

    #[tokio::test]
    async fn add_event_appends_and_updates_last_user_message_for_non_agents() {
        let coordinator = coordinator();
        let root = event("root", "user1", "hello", vec![]);
        let conv = coordinator.create_conversation(&root).await.unwrap();

        let follow_up = event("reply", "user1", "a follow up", vec![]);
        coordinator.add_event(&conv.id, &follow_up).await.unwrap();

        let handle = coordinator.handle(&conv.id).await.unwrap();
        let stored = handle.lock().await;
        assert_eq!(stored.history.len(), 1);
        assert_eq!(stored.metadata.get("lastUserMessage").unwrap(), "a follow up");
    }

    #[tokio::test]
    async fn build_agent_messages_advances_watermark() {
        let coordinator = coordinator();
        let root = event("root", "user1", "hello", vec![]);
        let conv = coordinator.create_conversation(&root).await.unwrap();
        coordinator
            .append_tool_call(&conv.id, "agent1", 1, vec![], None)
            .await
            .unwrap();

        let built = coordinator
            .build_agent_messages(&conv.id, "agent1", BuildMessagesOptions::default())
            .await
            .unwrap();
        assert!(!built.messages.is_empty());

        let handle = coordinator.handle(&conv.id).await.unwrap();
        let stored = handle.lock().await;
        assert_eq!(
            stored.agent_states.get("agent1").unwrap().last_processed_message_index,
            stored.history.len()
        );
    }

    #[tokio::test]
    async fn delegation_round_trip_unblocks_delegator() {
        let coordinator = coordinator();
        let root = event("root", "pm", "kickoff", vec![]);
        let conv = coordinator.create_conversation(&root).await.unwrap();
        coordinator.registry().register_agent("pm").await;
        coordinator.registry().register_agent("dev").await;

        let request = event("delegate", "pm", "please implement X", vec![vec!["p", "dev"]]);
        coordinator.add_event(&conv.id, &request).await.unwrap();

        let handle = coordinator.handle(&conv.id).await.unwrap();
        assert!(handle
            .lock()
            .await
            .agent_states
            .get("pm")
            .unwrap()
            .is_blocked_on_delegation());
        drop(handle);

        let completion = event("completion", "dev", "done", vec![vec!["status", "completed"], vec!["e", &request.id]]);
        coordinator.add_event(&conv.id, &completion).await.unwrap();

        let handle = coordinator.handle(&conv.id).await.unwrap();
        assert!(!handle
            .lock()
            .await
            .agent_states
            .get("pm")
            .unwrap()
            .is_blocked_on_delegation());
    }

    #[tokio::test]
    async fn orchestrator_turn_completes_once_every_agent_reports() {
        let coordinator = coordinator();
        let root = event("root", "user1", "hello", vec![]);
        let conv = coordinator.create_conversation(&root).await.unwrap();

        let turn_id = coordinator
            .start_orchestrator_turn(&conv.id, Phase::Plan, vec!["pm".into(), "dev".into()], None)
            .await
            .unwrap();
        assert!(!coordinator.add_completion_to_turn(&conv.id, &turn_id, "pm", "done").await.unwrap());
        assert!(coordinator.add_completion_to_turn(&conv.id, &turn_id, "dev", "done too").await.unwrap());
    }

    #[tokio::test]
    async fn archive_then_search_finds_it_archived() {
        let coordinator = coordinator();
        let root = event("root", "user1", "hello", vec![vec!["title", "Archived Convo"]]);
        let conv = coordinator.create_conversation(&root).await.unwrap();
        coordinator.archive_conversation(&conv.id).await.unwrap();

        let results = coordinator
            .search(&SearchCriteria {
                title_contains: Some("archived".into()),
                phase: None,
                archived: Some(true),
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_releases_all_execution_locks() {
        let coordinator = coordinator();
        let root = event("root", "user1", "hello", vec![]);
        let conv = coordinator.create_conversation(&root).await.unwrap();
        coordinator
            .update_phase(&conv.id, Phase::Execute, "pk", "agent", "go", None, None)
            .await
            .unwrap();
        assert_eq!(coordinator.execution_queue().get_status().await.active_locks, 1);

        coordinator.shutdown().await.unwrap();
        assert_eq!(coordinator.execution_queue().get_status().await.active_locks, 0);
    }
}
