//! Skirmish Lobby Model
//!
//! The authoritative pre-match lobby graph: two teams of four slots holding
//! humans, AIs, or nothing, plus the rules for every mutation a lobby
//! accepts. The hosting client runs this as its source of truth; offline
//! play runs it with no network at all. Joined clients never construct one,
//! they hold proxies instead.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod event;
pub mod lobby;
pub mod slot;
pub mod team;

pub use error::CallError;
pub use event::LobbyEvent;
pub use lobby::{Applied, DEFAULT_TEAM_NAMES, LobbyConfig, LocalLobby};
pub use slot::Slot;
pub use team::{MAX_CAPACITY, MIN_CAPACITY, ResizeOutcome, SLOTS_PER_TEAM, Team};
