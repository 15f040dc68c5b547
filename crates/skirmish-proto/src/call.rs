//! Dispatchable mutation calls.
//!
//! Every mutation of lobby state travels as a [`DispatchCall`]: the target
//! entity plus one variant of the closed [`LobbyCall`] set. The same shape is
//! used in both directions, as a client request and as the notification the
//! server fans out to everyone else after the host accepts it.

use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, ParticipantId};

/// Skill level of a computer-controlled occupant. `Human` is the sentinel
/// meaning "no AI here"; assigning it to an AI slot removes the AI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AiDifficulty {
    #[default]
    Human,
    Easy,
    Standard,
    Hard,
    Expert,
}

impl AiDifficulty {
    /// Whether this level denotes an actual AI rather than the sentinel.
    #[must_use]
    pub fn is_ai(self) -> bool {
        !matches!(self, Self::Human)
    }
}

/// Reference to an army build owned by the company subsystem. Only the
/// identity and display summary travel through the lobby; the full payload
/// is exchanged as opaque bytes during match preparation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyRef {
    pub id: String,
    pub name: String,
    pub faction: String,
}

/// The closed set of mutations a lobby entity accepts.
///
/// Variants marked "host only" are rejected by the authoritative graph when
/// issued by anyone else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LobbyCall {
    /// Assign or clear the company of a seated human. Target: participant
    /// entity; callers may only modify their own seat.
    SetCompany { company: Option<CompanyRef> },
    /// Seat, retune, or remove an AI occupant. Target: slot. Host only.
    SetDifficulty { difficulty: AiDifficulty },
    /// Close an open slot to joiners. Target: slot. Host only.
    LockSlot,
    /// Reopen a locked slot. Target: slot. Host only.
    UnlockSlot,
    /// Clear a slot, kicking a human occupant or deleting an AI.
    /// Target: slot. Host only.
    RemoveOccupant,
    /// Exchange two slots of one team, occupant and state together.
    /// Target: team. Host only.
    SwapSlots { first: u8, second: u8 },
    /// Change how many slots of a team are playable. Target: team. Host only.
    ResizeTeam { capacity: u8 },
    /// Write one free-form lobby setting. Target: lobby. Host only.
    SetSetting { key: String, value: String },
    /// Rename a team. Target: team. Host only.
    SetTeamName { name: String },
    /// Broadcast a chat line. Target: lobby.
    SendChat { sender: ParticipantId, text: String },
    /// Mark a participant ready or not ready. Target: lobby; callers may
    /// only mark themselves.
    SignalReady { participant: ParticipantId, ready: bool },
}

impl LobbyCall {
    /// Stable label of the call, used for logs and error reports.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SetCompany { .. } => "set-company",
            Self::SetDifficulty { .. } => "set-difficulty",
            Self::LockSlot => "lock-slot",
            Self::UnlockSlot => "unlock-slot",
            Self::RemoveOccupant => "remove-occupant",
            Self::SwapSlots { .. } => "swap-slots",
            Self::ResizeTeam { .. } => "resize-team",
            Self::SetSetting { .. } => "set-setting",
            Self::SetTeamName { .. } => "set-team-name",
            Self::SendChat { .. } => "send-chat",
            Self::SignalReady { .. } => "signal-ready",
        }
    }
}

/// A [`LobbyCall`] aimed at one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchCall {
    pub target: ObjectId,
    pub call: LobbyCall,
}

impl DispatchCall {
    #[must_use]
    pub fn new(target: ObjectId, call: LobbyCall) -> Self {
        Self { target, call }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_sentinel() {
        assert!(!AiDifficulty::Human.is_ai());
        assert!(AiDifficulty::Hard.is_ai());
        assert_eq!(AiDifficulty::default(), AiDifficulty::Human);
    }

    #[test]
    fn test_call_labels_are_distinct() {
        let calls = [
            LobbyCall::LockSlot,
            LobbyCall::UnlockSlot,
            LobbyCall::RemoveOccupant,
            LobbyCall::SetDifficulty {
                difficulty: AiDifficulty::Easy,
            },
            LobbyCall::SwapSlots { first: 0, second: 1 },
            LobbyCall::ResizeTeam { capacity: 2 },
        ];
        for (i, a) in calls.iter().enumerate() {
            for b in calls.iter().skip(i + 1) {
                assert_ne!(a.label(), b.label());
            }
        }
    }
}
