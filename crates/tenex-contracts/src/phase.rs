//! Conversation phases (spec §2, §4.4).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A conversation's high-level state. Controls which tools and policies
/// apply (GLOSSARY). The set is closed — there is no "custom phase".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Chat,
    Brainstorm,
    Plan,
    Execute,
    Verification,
    Chores,
    Reflection,
}

impl Phase {
    /// All phases in a stable, arbitrary order — useful for exhaustive tests
    /// and for engines that want to enumerate valid transitions.
    pub const ALL: [Phase; 7] = [
        Phase::Chat,
        Phase::Brainstorm,
        Phase::Plan,
        Phase::Execute,
        Phase::Verification,
        Phase::Chores,
        Phase::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Chat => "chat",
            Phase::Brainstorm => "brainstorm",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Verification => "verification",
            Phase::Chores => "chores",
            Phase::Reflection => "reflection",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Chat
    }
}
