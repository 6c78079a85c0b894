// In-memory trait implementations — the test-double layer (spec §4.3
// "in-memory for tests"; SPEC_FULL.md "Test tooling"). These stand in for
// `tenex-storage`'s filesystem adapter and for whatever relay/signing host
// a real deployment would wire in, the same way the teacher's
// `InMemoryEventEmitter`/`InMemoryMessageStore`/`MockLlmProvider` stand in
// for its own external collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tenex_contracts::{Conversation, SignedEvent};
use tokio::sync::RwLock;

use crate::error::{EngineError, Result};
use crate::traits::{ArticleRef, ConversationMetadata, DraftEvent, PersistenceAdapter, SearchCriteria};

/// An in-process, non-durable `PersistenceAdapter` — conversations live only
/// as long as the process does. Used by tests and by examples that don't
/// need real persistence.
#[derive(Debug, Default)]
pub struct InMemoryPersistenceAdapter {
    active: RwLock<HashMap<String, Conversation>>,
    archived: RwLock<HashMap<String, Conversation>>,
}

impl InMemoryPersistenceAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryPersistenceAdapter {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn save(&self, conversation: &Conversation) -> Result<()> {
        self.active
            .write()
            .await
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.active.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ConversationMetadata>> {
        Ok(self
            .active
            .read()
            .await
            .values()
            .map(|c| to_metadata(c, false))
            .collect())
    }

    async fn archive(&self, id: &str) -> Result<()> {
        let mut active = self.active.write().await;
        let Some(conversation) = active.remove(id) else {
            return Err(EngineError::conversation_not_found(id));
        };
        drop(active);
        self.archived.write().await.insert(id.to_string(), conversation);
        Ok(())
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ConversationMetadata>> {
        let active = self.active.read().await.values().map(|c| to_metadata(c, false));
        let archived = self.archived.read().await.values().map(|c| to_metadata(c, true)).collect::<Vec<_>>();
        Ok(active
            .chain(archived)
            .filter(|meta| criteria.matches(meta))
            .collect())
    }
}

fn to_metadata(conversation: &Conversation, archived: bool) -> ConversationMetadata {
    ConversationMetadata {
        id: conversation.id.clone(),
        title: conversation.title.clone(),
        phase: conversation.phase,
        phase_started_at: conversation.phase_started_at,
        event_count: conversation.event_count(),
        agent_count: conversation.agent_count(),
        archived,
    }
}

/// An `ArticleFetcher` backed by a fixed in-memory map, for tests that want
/// to exercise enrichment without a real relay.
#[derive(Debug, Default)]
pub struct InMemoryArticleFetcher {
    articles: HashMap<String, ArticleRef>,
}

impl InMemoryArticleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_article(mut self, a_tag: impl Into<String>, article: ArticleRef) -> Self {
        self.articles.insert(a_tag.into(), article);
        self
    }
}

#[async_trait]
impl crate::traits::ArticleFetcher for InMemoryArticleFetcher {
    async fn fetch(&self, a_tag: &str) -> Result<Option<ArticleRef>> {
        Ok(self.articles.get(a_tag).cloned())
    }
}

/// An `AgentsMdLookup` backed by a fixed in-memory map from directory path
/// to file contents.
#[derive(Debug, Default)]
pub struct InMemoryAgentsMdLookup {
    by_dir: HashMap<String, String>,
}

impl InMemoryAgentsMdLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, dir: impl Into<String>, contents: impl Into<String>) -> Self {
        self.by_dir.insert(dir.into(), contents.into());
        self
    }
}

#[async_trait]
impl crate::traits::AgentsMdLookup for InMemoryAgentsMdLookup {
    async fn lookup(&self, path: &str, project_root: &str) -> Result<Vec<String>> {
        let mut found = Vec::new();
        let mut current = std::path::Path::new(path);
        loop {
            if let Some(contents) = self.by_dir.get(&current.to_string_lossy().to_string()) {
                found.push(contents.clone());
            }
            if current.to_string_lossy() == project_root {
                break;
            }
            match current.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => current = parent,
                _ => break,
            }
        }
        Ok(found)
    }
}

/// A deterministic, non-cryptographic `EventSigner` for tests: derives the
/// event id from a hash of the draft's content, and uses a fixed pubkey.
/// Real signing is an external collaborator (spec §1 Non-goals).
pub struct InMemorySigner {
    pub pubkey: String,
}

impl InMemorySigner {
    pub fn new(pubkey: impl Into<String>) -> Self {
        Self { pubkey: pubkey.into() }
    }
}

#[async_trait]
impl crate::traits::EventSigner for InMemorySigner {
    async fn sign(&self, draft: DraftEvent) -> Result<SignedEvent> {
        let seed = format!("{}:{}:{}", draft.kind, draft.created_at, draft.content);
        Ok(SignedEvent {
            id: tenex_contracts::ids::create_full_event_id(&seed),
            pubkey: self.pubkey.clone(),
            kind: draft.kind,
            created_at: draft.created_at,
            content: draft.content,
            tags: draft.tags,
        })
    }
}

/// A `RelayPublisher` that records every published event in memory, for
/// assertions in tests.
#[derive(Debug, Default)]
pub struct InMemoryRelayPublisher {
    published: RwLock<Vec<SignedEvent>>,
}

impl InMemoryRelayPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn published(&self) -> Vec<SignedEvent> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl crate::traits::RelayPublisher for InMemoryRelayPublisher {
    async fn publish(&self, event: SignedEvent) -> Result<()> {
        self.published.write().await.push(event);
        Ok(())
    }
}
