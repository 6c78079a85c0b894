//! The inbound/outbound signed event shape (spec §6).
//!
//! TENEX sits on top of a Nostr-like pub/sub relay network. This crate does
//! not sign, verify, or transmit events — that lives entirely behind
//! `tenex-core::traits`. What lives here is the wire shape itself, plus the
//! tag-name constants and small accessors the rest of the engine needs to
//! read tags without re-deriving the indexing convention everywhere.

use serde::{Deserialize, Serialize};

// ============================================================================
// Tag names consumed by the engine (spec §6)
// ============================================================================

pub const TAG_REPLY: &str = "e";
pub const TAG_ROOT: &str = "E";
pub const TAG_ADDRESSABLE: &str = "a";
pub const TAG_PUBKEY: &str = "p";
pub const TAG_REFERENCED_KIND: &str = "K";
pub const TAG_PHASE: &str = "phase";
pub const TAG_STATUS: &str = "status";
pub const TAG_TOOL: &str = "tool";
pub const TAG_AGENT: &str = "agent";
pub const TAG_CLAUDE_SESSION: &str = "claude-session";
pub const TAG_TITLE: &str = "title";
pub const TAG_D: &str = "d";
pub const TAG_MODE: &str = "mode";
pub const TAG_TRACE_CONTEXT: &str = "trace_context";
pub const TAG_TRACE_CONTEXT_LLM: &str = "trace_context_llm";
pub const TAG_PARTICIPANT: &str = "participant";
pub const TAG_NUDGE: &str = "nudge";
pub const TAG_SKILL: &str = "skill";

/// A single tag, stored as the teacher-style ordered string array: the first
/// element is the tag name, everything after is positional tag data.
pub type Tag = Vec<String>;

/// A signed event as it arrives from, or is published to, the relay network.
///
/// `id`, `pubkey`, and the signature (not modeled here — signing is an
/// external collaborator per spec §1) are all the caller's responsibility;
/// this type only carries what the engine reads and writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedEvent {
    /// 64-char lowercase hex, unique to this event's content + pubkey + sig.
    pub id: String,
    /// 64-char lowercase hex author pubkey.
    pub pubkey: String,
    pub kind: i64,
    /// Unix seconds.
    pub created_at: i64,
    pub content: String,
    pub tags: Vec<Tag>,
}

impl SignedEvent {
    /// Returns the values of the first tag named `name`, excluding the name
    /// itself, e.g. `first_tag_values("e")` on `["e", "abc", "reply"]`
    /// returns `Some(["abc", "reply"])`.
    pub fn first_tag_values(&self, name: &str) -> Option<&[String]> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .map(|t| &t[1..])
    }

    /// Returns the first value (index 1) of the first tag named `name`.
    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.first_tag_values(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Returns every value (index 1 of each matching tag) across all tags
    /// named `name`, e.g. every `p`-tagged recipient.
    pub fn all_tag_values(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some(name))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
            .collect()
    }

    /// The reply target from the first `e`-tag, if present.
    pub fn reply_target(&self) -> Option<&str> {
        self.first_tag_value(TAG_REPLY)
    }

    /// The conversation root from the `E`-tag, if present.
    pub fn conversation_root(&self) -> Option<&str> {
        self.first_tag_value(TAG_ROOT)
    }

    /// Every pubkey addressed via `p`-tags, in tag order.
    pub fn addressed_pubkeys(&self) -> Vec<&str> {
        self.all_tag_values(TAG_PUBKEY)
    }

    /// The event's title, from the `title`-tag, or `None` if absent.
    pub fn title_tag(&self) -> Option<&str> {
        self.first_tag_value(TAG_TITLE)
    }

    /// `true` if this event carries `mode=voice`.
    pub fn is_voice_mode(&self) -> bool {
        self.first_tag_value(TAG_MODE) == Some("voice")
    }

    /// `status` tag value, if present (used to detect delegation completions).
    pub fn status_tag(&self) -> Option<&str> {
        self.first_tag_value(TAG_STATUS)
    }

    /// `phase` tag value, if present.
    pub fn phase_tag(&self) -> Option<&str> {
        self.first_tag_value(TAG_PHASE)
    }
}
