// Event Decoder (spec §4.1)
//
// Classifies inbound signed events and extracts routing metadata. Purely
// functional — the decoder never mutates engine state, it only reads an
// event and produces a classification plus whatever fields the rest of
// the engine needs to route it.

use tenex_contracts::SignedEvent;

/// Event kinds the decoder recognises. These are convention constants for
/// this engine's slice of the kind space, not a registry of the full
/// protocol — unrecognised kinds fall through to `Unknown`.
pub mod kind {
    pub const PROFILE_METADATA: i64 = 0;
    pub const CONTACT_LIST: i64 = 3;
    pub const GENERIC_TEXT: i64 = 11;
    pub const COMMENT: i64 = 1111;
    pub const PROJECT_STATUS: i64 = 10100;
    pub const OPERATIONS_STATUS: i64 = 10101;
    pub const PROJECT_DEFINITION: i64 = 31900;
    pub const LESSON: i64 = 31901;
    /// Specialised kinds emitted by the Agent Event Publisher (spec §4.9) —
    /// never consumed by [`classify`], only produced.
    pub const ASK: i64 = 31902;
    pub const INTERVENTION_REVIEW: i64 = 31903;
    pub const STATUS_UPDATE: i64 = 10102;
}

/// The decoder's classification of an inbound event (spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventClass {
    /// Never routed to a conversation (profile/contact/status kinds).
    NeverRoute,
    /// A project definition event, carrying a derived project id.
    Project { project_id: String },
    /// A lesson event, linked to an agent definition via its first e-tag.
    Lesson { agent_definition_id: Option<String> },
    /// A comment whose K-tag equals the lesson kind.
    LessonComment,
    /// Ordinary conversational text.
    Conversation,
    /// Anything else.
    Unknown,
}

/// Routing metadata extracted alongside the classification.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedEvent {
    pub reply_target: Option<String>,
    pub mentioned_pubkeys: Vec<String>,
    pub referenced_article: Option<String>,
    pub tool_tag: Option<String>,
    pub phase_tag: Option<String>,
    pub status_tag: Option<String>,
    pub is_delegation_request: bool,
    pub is_delegation_completion: bool,
    pub trace_context: Option<String>,
}

/// Classifies `event` per the ordered rules in spec §4.1.
pub fn classify(event: &SignedEvent) -> EventClass {
    match event.kind {
        kind::PROFILE_METADATA | kind::CONTACT_LIST | kind::PROJECT_STATUS | kind::OPERATIONS_STATUS => {
            EventClass::NeverRoute
        }
        kind::PROJECT_DEFINITION => EventClass::Project {
            project_id: project_id(event),
        },
        kind::LESSON => EventClass::Lesson {
            agent_definition_id: event.reply_target().map(str::to_string),
        },
        kind::COMMENT if references_lesson_kind(event) => EventClass::LessonComment,
        kind::GENERIC_TEXT => EventClass::Conversation,
        _ => EventClass::Unknown,
    }
}

/// Derives `"<kind>:<authorPubkey>:<dTag>"` for a project definition event.
fn project_id(event: &SignedEvent) -> String {
    let d_tag = event.first_tag_value(tenex_contracts::event::TAG_D).unwrap_or("");
    format!("{}:{}:{}", event.kind, event.pubkey, d_tag)
}

/// `true` if this comment's `K`-tag (referenced event kind) equals the
/// lesson kind.
fn references_lesson_kind(event: &SignedEvent) -> bool {
    event
        .first_tag_value(tenex_contracts::event::TAG_REFERENCED_KIND)
        .and_then(|v| v.parse::<i64>().ok())
        == Some(kind::LESSON)
}

/// `true` if `known_agent_pubkeys` contains `event`'s author and the event
/// p-tags another known agent — a delegation request (spec §4.1).
pub fn is_delegation_request(event: &SignedEvent, known_agent_pubkeys: &[String]) -> bool {
    event.kind == kind::GENERIC_TEXT
        && known_agent_pubkeys.contains(&event.pubkey)
        && event
            .addressed_pubkeys()
            .iter()
            .any(|p| known_agent_pubkeys.iter().any(|k| k == p))
}

/// `true` if `event` is a `status=completed` reply whose first e-tag
/// identifies the original delegation request — a delegation completion
/// (spec §4.1).
pub fn is_delegation_completion(event: &SignedEvent) -> bool {
    event.kind == kind::GENERIC_TEXT && event.status_tag() == Some("completed") && event.reply_target().is_some()
}

/// Extracts the routing metadata the rest of the engine needs, independent
/// of classification.
pub fn decode(event: &SignedEvent, known_agent_pubkeys: &[String]) -> DecodedEvent {
    DecodedEvent {
        reply_target: event.reply_target().map(str::to_string),
        mentioned_pubkeys: event.addressed_pubkeys().into_iter().map(str::to_string).collect(),
        referenced_article: event.first_tag_value(tenex_contracts::event::TAG_ADDRESSABLE).map(str::to_string),
        tool_tag: event.first_tag_value(tenex_contracts::event::TAG_TOOL).map(str::to_string),
        phase_tag: event.phase_tag().map(str::to_string),
        status_tag: event.status_tag().map(str::to_string),
        is_delegation_request: is_delegation_request(event, known_agent_pubkeys),
        is_delegation_completion: is_delegation_completion(event),
        trace_context: event.first_tag_value(tenex_contracts::event::TAG_TRACE_CONTEXT).map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind_val: i64, tags: Vec<Vec<&str>>) -> SignedEvent {
        SignedEvent {
            id: "e".repeat(64),
            pubkey: "author".into(),
            kind: kind_val,
            created_at: 0,
            content: String::new(),
            tags: tags
                .into_iter()
                .map(|t| t.into_iter().map(str::to_string).collect())
                .collect(),
        }
    }

    #[test]
    fn profile_metadata_never_routes() {
        assert_eq!(classify(&event(kind::PROFILE_METADATA, vec![])), EventClass::NeverRoute);
    }

    #[test]
    fn project_definition_derives_project_id() {
        let ev = event(kind::PROJECT_DEFINITION, vec![vec!["d", "myproj"]]);
        assert_eq!(
            classify(&ev),
            EventClass::Project {
                project_id: format!("{}:author:myproj", kind::PROJECT_DEFINITION)
            }
        );
    }

    #[test]
    fn lesson_links_agent_definition_via_first_e_tag() {
        let ev = event(kind::LESSON, vec![vec!["e", "agent-def-id"]]);
        assert_eq!(
            classify(&ev),
            EventClass::Lesson {
                agent_definition_id: Some("agent-def-id".to_string())
            }
        );
    }

    #[test]
    fn comment_with_lesson_k_tag_is_lesson_comment() {
        let ev = event(kind::COMMENT, vec![vec!["K", &kind::LESSON.to_string()]]);
        assert_eq!(classify(&ev), EventClass::LessonComment);
    }

    #[test]
    fn comment_without_lesson_k_tag_is_unknown() {
        let ev = event(kind::COMMENT, vec![vec!["K", "1"]]);
        assert_eq!(classify(&ev), EventClass::Unknown);
    }

    #[test]
    fn generic_text_is_conversation() {
        assert_eq!(classify(&event(kind::GENERIC_TEXT, vec![])), EventClass::Conversation);
    }

    #[test]
    fn delegation_request_requires_both_pubkeys_known() {
        let agents = vec!["author".to_string(), "other".to_string()];
        let ev = event(kind::GENERIC_TEXT, vec![vec!["p", "other"]]);
        assert!(is_delegation_request(&ev, &agents));

        let unknown_agents = vec!["author".to_string()];
        assert!(!is_delegation_request(&ev, &unknown_agents));
    }

    #[test]
    fn delegation_completion_requires_status_and_reply() {
        let ev = event(kind::GENERIC_TEXT, vec![vec!["status", "completed"], vec!["e", "orig"]]);
        assert!(is_delegation_completion(&ev));

        let missing_reply = event(kind::GENERIC_TEXT, vec![vec!["status", "completed"]]);
        assert!(!is_delegation_completion(&missing_reply));
    }
}
