//! Delegation Registry record (spec §3, §4.6) — distinct from the
//! `ConversationEntry::DelegationMarker` inline history entry: this is the
//! volatile tracking record the Delegation Registry keeps so it can route
//! a completion event back to its delegator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelegationStatus {
    Pending,
    Completed,
    Aborted,
}

/// One outstanding (or resolved) delegation tracked by the Delegation
/// Registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation_event_id: String,
    pub delegator_pubkey: String,
    pub recipient_pubkeys: Vec<String>,
    pub parent_conversation_id: String,
    pub delegation_conversation_id: String,
    pub status: DelegationStatus,
    /// Responses received so far, keyed by responder pubkey.
    pub responses: HashMap<String, String>,
}

impl DelegationRecord {
    pub fn new(
        delegation_event_id: impl Into<String>,
        delegator_pubkey: impl Into<String>,
        recipient_pubkeys: Vec<String>,
        parent_conversation_id: impl Into<String>,
        delegation_conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            delegation_event_id: delegation_event_id.into(),
            delegator_pubkey: delegator_pubkey.into(),
            recipient_pubkeys,
            parent_conversation_id: parent_conversation_id.into(),
            delegation_conversation_id: delegation_conversation_id.into(),
            status: DelegationStatus::Pending,
            responses: HashMap::new(),
        }
    }

    /// Records a responder's reply event id. Returns `true` if every
    /// expected recipient has now responded (the delegator is unblocked).
    pub fn record_response(&mut self, responder_pubkey: &str, response_event_id: impl Into<String>) -> bool {
        self.responses
            .insert(responder_pubkey.to_string(), response_event_id.into());
        self.all_responded()
    }

    pub fn all_responded(&self) -> bool {
        self.recipient_pubkeys
            .iter()
            .all(|pk| self.responses.contains_key(pk))
    }

    pub fn is_pending(&self) -> bool {
        self.status == DelegationStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unblocks_only_once_all_recipients_respond() {
        let mut record = DelegationRecord::new(
            "ev1",
            "delegator",
            vec!["r1".into(), "r2".into()],
            "parent",
            "child",
        );
        assert!(!record.record_response("r1", "resp1"));
        assert!(!record.all_responded());
        assert!(record.record_response("r2", "resp2"));
        assert!(record.all_responded());
    }

    #[test]
    fn new_record_is_pending() {
        let record = DelegationRecord::new("ev1", "d", vec![], "p", "c");
        assert!(record.is_pending());
    }
}
