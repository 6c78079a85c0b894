// Core traits for pluggable backends
//
// These traits are the engine's only doors to the outside world: durable
// storage, referenced-article enrichment, AGENTS.md lookup, and the
// signing/publishing of outbound events. Everything on the far side of a
// trait here is an external collaborator per spec §1 — the conversation
// engine itself never touches a filesystem directly (that's
// `tenex-storage`'s job implementing `PersistenceAdapter`) and never signs
// or transmits an event.

use async_trait::async_trait;
use tenex_contracts::{Conversation, SignedEvent};

use crate::error::Result;

// ============================================================================
// PersistenceAdapter — durable conversation storage (spec §4.3)
// ============================================================================

/// Metadata returned by [`PersistenceAdapter::list`] — enough to render a
/// conversation picker without loading full history.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConversationMetadata {
    pub id: String,
    pub title: String,
    pub phase: tenex_contracts::Phase,
    pub phase_started_at: chrono::DateTime<chrono::Utc>,
    pub event_count: usize,
    pub agent_count: usize,
    pub archived: bool,
}

/// Search criteria for [`PersistenceAdapter::search`] (spec §4.3).
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub title_contains: Option<String>,
    pub phase: Option<tenex_contracts::Phase>,
    pub archived: Option<bool>,
}

impl SearchCriteria {
    pub fn matches(&self, meta: &ConversationMetadata) -> bool {
        if let Some(needle) = &self.title_contains {
            if !meta.title.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        if let Some(phase) = self.phase {
            if meta.phase != phase {
                return false;
            }
        }
        if let Some(archived) = self.archived {
            if meta.archived != archived {
                return false;
            }
        }
        true
    }
}

/// Durable save/load/archive/search of conversations (spec §4.3).
///
/// Implementations must be safe for concurrent `save` calls on different
/// ids; per-id writes are serialised by the adapter itself
/// (last-writer-wins per id, spec §5).
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Prepares storage (e.g. creates directories). Called once at engine
    /// startup; failure here is fatal (spec §7).
    async fn initialize(&self) -> Result<()>;

    /// Idempotent; last-writer-wins per conversation id.
    async fn save(&self, conversation: &Conversation) -> Result<()>;

    async fn load(&self, id: &str) -> Result<Option<Conversation>>;

    /// All active (non-archived) conversations known to the adapter.
    async fn list(&self) -> Result<Vec<ConversationMetadata>>;

    /// Moves the durable record out of the active set.
    async fn archive(&self, id: &str) -> Result<()>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ConversationMetadata>>;
}

// ============================================================================
// ArticleFetcher — best-effort referenced-article enrichment
// ============================================================================

/// A referenced long-form article (Nostr `a`-tag addressable event),
/// fetched to enrich a newly created conversation's metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRef {
    pub title: String,
    pub content: String,
    pub d_tag: String,
}

/// Fetches the article referenced by an `a`-tag. Relay access is an
/// external collaborator; this trait is the seam. Failures are logged and
/// swallowed by the caller (spec §5, §7 — "best-effort").
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn fetch(&self, a_tag: &str) -> Result<Option<ArticleRef>>;
}

/// An `ArticleFetcher` that never finds anything — the default for hosts
/// that don't care about article enrichment.
pub struct NoopArticleFetcher;

#[async_trait]
impl ArticleFetcher for NoopArticleFetcher {
    async fn fetch(&self, _a_tag: &str) -> Result<Option<ArticleRef>> {
        Ok(None)
    }
}

// ============================================================================
// AgentsMdLookup — system-reminder source files (spec §4.8, §6)
// ============================================================================

/// Looks up `AGENTS.md` files at or above a given path, up to a project
/// root — the source of system-reminder injection content. Filesystem
/// access to the project tree is a host concern, not this crate's.
#[async_trait]
pub trait AgentsMdLookup: Send + Sync {
    /// Returns the contents of every `AGENTS.md` found walking upward from
    /// `path` to (and including) `project_root`, nearest first.
    async fn lookup(&self, path: &str, project_root: &str) -> Result<Vec<String>>;
}

pub struct NoopAgentsMdLookup;

#[async_trait]
impl AgentsMdLookup for NoopAgentsMdLookup {
    async fn lookup(&self, _path: &str, _project_root: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// EventSigner / RelayPublisher — outbound event signing and transport
// ============================================================================

/// An outbound event before it has been signed. Produced by the Agent
/// Event Publisher (spec §4.9); an `id` and signature are added by
/// whatever external key-holder implements [`EventSigner`].
#[derive(Debug, Clone, PartialEq)]
pub struct DraftEvent {
    pub kind: i64,
    pub content: String,
    pub tags: Vec<tenex_contracts::Tag>,
    pub created_at: i64,
}

/// Signs a draft event, producing a fully signed event with `id` and
/// `pubkey` populated. Cryptographic signing is explicitly out of scope
/// for this crate (spec §1); this trait is the seam a host's keystore
/// implements.
#[async_trait]
pub trait EventSigner: Send + Sync {
    async fn sign(&self, draft: DraftEvent) -> Result<SignedEvent>;
}

/// Publishes a signed event to the relay network. Relay transport is
/// explicitly out of scope for this crate (spec §1).
#[async_trait]
pub trait RelayPublisher: Send + Sync {
    async fn publish(&self, event: SignedEvent) -> Result<()>;
}
