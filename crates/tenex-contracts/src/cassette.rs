//! VCR cassette format (spec §6) — type definitions only. Recording and
//! replay are external collaborators (spec §1 Non-goals); this crate only
//! needs to agree on the shape so a host's recorder/player and the engine's
//! tests can exchange cassettes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CASSETTE_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Stable hex digest over the canonical request JSON.
    pub hash: String,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cassette {
    pub name: String,
    pub version: String,
    pub interactions: Vec<Interaction>,
    pub metadata: serde_json::Value,
}

impl Cassette {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: CASSETTE_VERSION.to_string(),
            interactions: Vec::new(),
            metadata: serde_json::Value::Object(Default::default()),
        }
    }

    /// Finds the first recorded interaction whose hash matches `request`'s
    /// canonical hash, for cassette-backed test replay.
    pub fn find(&self, request: &serde_json::Value) -> Option<&Interaction> {
        let hash = hash_request(request);
        self.interactions.iter().find(|i| i.hash == hash)
    }

    pub fn record(&mut self, request: serde_json::Value, response: serde_json::Value, metadata: serde_json::Value) {
        let hash = hash_request(&request);
        self.interactions.push(Interaction {
            hash,
            request,
            response,
            metadata,
        });
    }
}

/// Stable hex digest over the canonical (serde-serialized) request JSON.
/// `serde_json::Value`'s map variant is a `BTreeMap` internally, so field
/// order is already canonical regardless of insertion order.
pub fn hash_request(request: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(request).expect("Value always serializes");
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_is_stable_regardless_of_key_insertion_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(hash_request(&a), hash_request(&b));
    }

    #[test]
    fn find_locates_recorded_interaction() {
        let mut cassette = Cassette::new("test");
        let req = json!({"model": "x"});
        cassette.record(req.clone(), json!({"ok": true}), json!({}));
        assert!(cassette.find(&req).is_some());
        assert!(cassette.find(&json!({"model": "y"})).is_none());
    }
}
