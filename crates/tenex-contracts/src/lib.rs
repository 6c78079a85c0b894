// Conversation Engine Wire Types
//
// This crate holds the types shared across the TENEX conversation engine:
// the signed-event wire shape, conversation/entry/delegation state, the
// Message Builder's provider-message output, id canonicalisation, and the
// VCR cassette format. No business logic lives here — just data and the
// small accessors that would otherwise be duplicated at every call site.

pub mod cassette;
pub mod conversation;
pub mod delegation;
pub mod event;
pub mod ids;
pub mod message;
pub mod phase;

pub use cassette::{Cassette, Interaction};
pub use conversation::{
    AgentState, Conversation, ConversationEntry, ConversationMetadata, ExecutionLock,
    ExecutionTime, MarkerStatus, OrchestratorTurn, PendingDelegation, PhaseTransition,
    ToolCallPart, ToolResultPart, TurnCompletion,
};
pub use delegation::{DelegationRecord, DelegationStatus};
pub use event::{SignedEvent, Tag};
pub use ids::{create_full_event_id, is_full_id, is_short_id, shorten_event_id};
pub use message::{BuiltMessages, ContentPart, MessageContent, ProviderMessage, Role};
pub use phase::Phase;
