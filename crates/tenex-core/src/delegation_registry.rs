// Delegation Registry (spec §4.6)
//
// Tracks outstanding delegations so that when a delegation-completion event
// arrives, the engine can find the originating delegator, mark the
// delegation completed, and unblock the delegator's next turn. Purely
// volatile (spec §5 Lifecycle): delegations older than the process survive
// only via their immutable events in the Event Store, not through this
// registry.

use std::collections::HashMap;

use tenex_contracts::{DelegationRecord, DelegationStatus};
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Default)]
struct RegistryState {
    /// Keyed by the original delegation request's event id.
    records: HashMap<String, DelegationRecord>,
}

/// Process-wide, volatile tracking of outstanding delegations (spec §4.6).
#[derive(Debug, Default)]
pub struct DelegationRegistry {
    state: RwLock<RegistryState>,
}

impl DelegationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new outstanding delegation, keyed by its request event id.
    pub async fn register(&self, record: DelegationRecord) {
        let mut state = self.state.write().await;
        state.records.insert(record.delegation_event_id.clone(), record);
    }

    /// Records a responder's reply against the delegation whose request
    /// event id is `delegation_event_id`. Marks the record `Completed` once
    /// every expected recipient has responded. Returns `None` if no such
    /// delegation is known — the caller treats this as an orphan
    /// delegation-completion and logs a warning, never propagating it as a
    /// hard failure (spec §4.6, §7).
    pub async fn record_response(
        &self,
        delegation_event_id: &str,
        responder_pubkey: &str,
        response_event_id: impl Into<String>,
    ) -> Option<DelegationRecord> {
        let mut state = self.state.write().await;
        let Some(record) = state.records.get_mut(delegation_event_id) else {
            warn!(delegation_event_id, responder_pubkey, "orphan delegation completion, ignoring");
            return None;
        };
        let all_responded = record.record_response(responder_pubkey, response_event_id);
        if all_responded {
            record.status = DelegationStatus::Completed;
        }
        Some(record.clone())
    }

    /// Marks a delegation as aborted, regardless of how many recipients had
    /// responded.
    pub async fn abort(&self, delegation_event_id: &str) -> Option<DelegationRecord> {
        let mut state = self.state.write().await;
        let record = state.records.get_mut(delegation_event_id)?;
        record.status = DelegationStatus::Aborted;
        Some(record.clone())
    }

    pub async fn get(&self, delegation_event_id: &str) -> Option<DelegationRecord> {
        self.state.read().await.records.get(delegation_event_id).cloned()
    }

    /// Every delegation still in the `pending` set.
    pub async fn pending(&self) -> Vec<DelegationRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }

    /// Finds the outstanding delegation a given delegator is blocked on
    /// within `parent_conversation_id`, if any.
    pub async fn find_pending_for_delegator(
        &self,
        parent_conversation_id: &str,
        delegator_pubkey: &str,
    ) -> Option<DelegationRecord> {
        self.state
            .read()
            .await
            .records
            .values()
            .find(|r| {
                r.is_pending()
                    && r.parent_conversation_id == parent_conversation_id
                    && r.delegator_pubkey == delegator_pubkey
            })
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(event_id: &str, recipients: Vec<&str>) -> DelegationRecord {
        DelegationRecord::new(
            event_id,
            "delegator",
            recipients.into_iter().map(str::to_string).collect(),
            "parent",
            "child",
        )
    }

    #[tokio::test]
    async fn unknown_delegation_completion_is_an_orphan() {
        let registry = DelegationRegistry::new();
        let result = registry.record_response("missing", "r1", "resp1").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn completes_only_after_every_recipient_responds() {
        let registry = DelegationRegistry::new();
        registry.register(record("ev1", vec!["r1", "r2"])).await;

        let partial = registry.record_response("ev1", "r1", "resp1").await.unwrap();
        assert_eq!(partial.status, DelegationStatus::Pending);

        let complete = registry.record_response("ev1", "r2", "resp2").await.unwrap();
        assert_eq!(complete.status, DelegationStatus::Completed);
    }

    #[tokio::test]
    async fn abort_marks_regardless_of_responses() {
        let registry = DelegationRegistry::new();
        registry.register(record("ev1", vec!["r1"])).await;
        let aborted = registry.abort("ev1").await.unwrap();
        assert_eq!(aborted.status, DelegationStatus::Aborted);
    }

    #[tokio::test]
    async fn pending_filters_out_completed_and_aborted() {
        let registry = DelegationRegistry::new();
        registry.register(record("ev1", vec!["r1"])).await;
        registry.register(record("ev2", vec!["r2"])).await;
        registry.record_response("ev1", "r1", "resp").await;
        assert_eq!(registry.pending().await.len(), 1);
    }

    #[tokio::test]
    async fn finds_pending_delegation_by_delegator_and_parent() {
        let registry = DelegationRegistry::new();
        registry.register(record("ev1", vec!["r1"])).await;
        let found = registry
            .find_pending_for_delegator("parent", "delegator")
            .await;
        assert!(found.is_some());
        assert!(registry
            .find_pending_for_delegator("other-parent", "delegator")
            .await
            .is_none());
    }
}
