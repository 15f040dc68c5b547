//! Skirmish Wire Protocol
//!
//! Message vocabulary and frame codec shared by the relay server and every
//! client. The `codec` feature pulls in tokio for the async framing helpers;
//! without it this crate is plain data definitions.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod call;
#[cfg(feature = "codec")]
pub mod codec;
pub mod ids;
pub mod message;
pub mod snapshot;

pub use call::{AiDifficulty, CompanyRef, DispatchCall, LobbyCall};
#[cfg(feature = "codec")]
pub use codec::{
    CodecError, DEFAULT_MAX_FRAME, read_frame, read_frame_bytes, write_frame, write_frame_bytes,
};
pub use ids::{LobbyId, ObjectId, ParticipantId, SlotAddr};
pub use message::{
    ClientHello, HelloRole, MatchRequest, PROTOCOL_VERSION, PushBody, RejectReason, RequestBody,
    ResponseBody, ServerWelcome, WireError, WireMessage,
};
pub use snapshot::{
    EntitySnapshot, HumanInfo, LobbyMeta, LobbySnapshot, LobbySummary, MatchResult, Occupant,
    SlotSnapshot, SlotState, TeamMeta, TeamSnapshot,
};
