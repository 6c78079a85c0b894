//! Event id canonicalisation.
//!
//! Three distinct id namespaces are in play (spec.md §6):
//! - full id: 64-char lowercase hex, equal to a signed event's `id`
//! - short id: 12-char lowercase hex prefix, used for display/lookup
//! - shell task id: 7-char lowercase alphanumeric, a separate namespace
//!   entirely (not derived from event ids)

use sha2::{Digest, Sha256};

/// Length in hex chars of a full event id.
pub const FULL_ID_LEN: usize = 64;

/// Length in hex chars of a short id (48 bits of entropy).
pub const SHORT_ID_LEN: usize = 12;

/// Length of a shell task id.
pub const SHELL_TASK_ID_LEN: usize = 7;

/// Returns `true` if `s` is a well-formed full event id: 64 lowercase hex chars.
pub fn is_full_id(s: &str) -> bool {
    s.len() == FULL_ID_LEN && s.bytes().all(is_lower_hex_byte)
}

/// Returns `true` if `s` is a well-formed short id: 12 lowercase hex chars.
pub fn is_short_id(s: &str) -> bool {
    s.len() == SHORT_ID_LEN && s.bytes().all(is_lower_hex_byte)
}

fn is_lower_hex_byte(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

/// Shortens a full event id to its 12-char lowercase-hex prefix.
///
/// The input is lowercased first so that ids arriving with mixed case from
/// a relay are normalised consistently. Panics-free: ids shorter than
/// [`SHORT_ID_LEN`] are returned unshortened (defensive; should not occur
/// for well-formed full ids).
pub fn shorten_event_id(full_id: &str) -> String {
    let lower = full_id.to_ascii_lowercase();
    lower.chars().take(SHORT_ID_LEN).collect()
}

/// Derives a deterministic full event id for test fixtures and examples,
/// where no real signature is available. Hashes `seed` with SHA-256 and
/// hex-encodes the digest, producing a stable, well-formed 64-char id.
pub fn create_full_event_id(seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks whether `candidate` is a short-id prefix of `full_id` (both
/// compared in lowercase).
pub fn short_id_matches(candidate: &str, full_id: &str) -> bool {
    full_id.to_ascii_lowercase().starts_with(&candidate.to_ascii_lowercase())
}
