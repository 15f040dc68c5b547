use skirmish_proto::{ObjectId, ParticipantId, WireError};

use crate::team::{MAX_CAPACITY, MIN_CAPACITY};

/// Why the authoritative graph refused a call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("No entity with id {0}")]
    UnknownTarget(ObjectId),

    #[error("Only the lobby host can perform this action: {0}")]
    HostOnly(&'static str),

    #[error("Participants can only modify their own seat")]
    NotSelf,

    #[error("Participant {0} is not seated in this lobby")]
    UnknownParticipant(ParticipantId),

    #[error("Call does not apply to this kind of entity")]
    TargetMismatch,

    #[error("Slot index {0} is out of range")]
    SlotIndexOutOfRange(u8),

    #[error("Team capacity must be between {MIN_CAPACITY} and {MAX_CAPACITY}, got {0}")]
    CapacityOutOfRange(u8),

    #[error("Slot is occupied")]
    SlotOccupied,

    #[error("Slot holds a human occupant")]
    HumanOccupant,

    #[error("Slot is disabled")]
    SlotDisabled,

    #[error("Slot is locked")]
    SlotLocked,

    #[error("Slot is empty")]
    SlotEmpty,

    #[error("No open slot left for a new participant")]
    LobbyFull,
}

impl From<CallError> for WireError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::UnknownTarget(_) => WireError::UnknownTarget,
            CallError::HostOnly(_) | CallError::NotSelf => WireError::NotPermitted,
            CallError::LobbyFull => WireError::LobbyFull,
            other => WireError::InvalidCall(other.to_string()),
        }
    }
}
