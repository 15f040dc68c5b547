//! Skirmish Lobby Client
//!
//! Connects a game client to the relay as a host, a joiner, or a browser,
//! and exposes the lobby through handles that read the same whether the
//! data is owned locally or proxied from the host. Remote reads come from
//! TTL caches that pushes keep warm; remote mutations dispatch to the host
//! and settle into the caches on acknowledgement.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod connection;
mod dispatch;
pub mod error;
pub mod handle;
pub mod match_flow;
pub mod proxy;
mod registry;
pub mod session;

pub use skirmish_core::{CallError, LobbyEvent};
pub use skirmish_proto::{
    AiDifficulty, CompanyRef, LobbyId, LobbySummary, MatchResult, ObjectId, Occupant,
    ParticipantId, RejectReason, SlotAddr, SlotState,
};

pub use cache::{ObjectCache, ValueCache};
pub use config::{ClientConfig, DEFAULT_CACHE_TTL, DEFAULT_REQUEST_TIMEOUT};
pub use connection::ConnectionState;
pub use error::{ConnectError, LobbyError, MatchError, RequestError};
pub use handle::{LobbyHandle, OccupantView, ParticipantHandle, SlotHandle, TeamHandle};
pub use match_flow::{
    DEFAULT_COUNTDOWN_SECS, DEFAULT_GRACE_SECS, DEFAULT_STEP_TIMEOUT, MatchContext, MatchSetup,
};
pub use session::{HostOptions, Session, SessionError};
