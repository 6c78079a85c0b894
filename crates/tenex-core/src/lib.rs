// TENEX Conversation Engine
//
// This crate is the conversation engine itself: Event Decoder, Conversation
// Registry, Phase Manager, Execution Queue, Delegation Registry, Message
// Builder, Conversation Coordinator, and Agent Event Publisher (spec §4).
// `tenex-contracts` holds the wire/domain types this crate operates on;
// `tenex-storage` supplies the filesystem `PersistenceAdapter` that backs a
// real deployment. Relay transport, event signing, and the LLM provider call
// are external collaborators reached only through `traits` (spec §1).

pub mod config;
pub mod coordinator;
pub mod decoder;
pub mod delegation_registry;
pub mod error;
pub mod execution_queue;
pub mod memory;
pub mod message_builder;
pub mod phase_manager;
pub mod publisher;
pub mod registry;
pub mod scope;
pub mod traits;

pub use config::EngineConfig;
pub use coordinator::{AgentStatePatch, BuildMessagesOptions, ConversationCoordinator};
pub use error::{EngineError, Result};
pub use execution_queue::{ExecutionQueue, QueueEvent, QueueStatusSummary, RequestResult};
pub use message_builder::{BuilderContext, TargetedLine};
pub use phase_manager::{PhaseManager, TransitionOutcome};
pub use publisher::{AgentEventPublisher, Intent};
pub use registry::ConversationRegistry;
pub use traits::{
    AgentsMdLookup, ArticleFetcher, ConversationMetadata, DraftEvent, EventSigner,
    PersistenceAdapter, RelayPublisher, SearchCriteria,
};
