//! Queue change type definitions

use serde::{Deserialize, Serialize};

/// Why the queue changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum QueueChangeTrigger {
    /// Tracks appended to the main tier
    UserEnqueue,
    /// Tracks placed in the insert-next tier
    UserInsertNext,
    /// A History entry moved back to the override tier
    PlayPrevious,
    /// Loop policy re-queued tracks
    LoopRefill,
    /// Automatic refill injected recommendations
    AutomaticReplenishment,
    /// Main tier re-shuffled
    Shuffle,
    /// Session stopped and every tier cleared
    Cleared,
}

impl std::fmt::Display for QueueChangeTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueChangeTrigger::UserEnqueue => write!(f, "UserEnqueue"),
            QueueChangeTrigger::UserInsertNext => write!(f, "UserInsertNext"),
            QueueChangeTrigger::PlayPrevious => write!(f, "PlayPrevious"),
            QueueChangeTrigger::LoopRefill => write!(f, "LoopRefill"),
            QueueChangeTrigger::AutomaticReplenishment => write!(f, "AutomaticReplenishment"),
            QueueChangeTrigger::Shuffle => write!(f, "Shuffle"),
            QueueChangeTrigger::Cleared => write!(f, "Cleared"),
        }
    }
}
