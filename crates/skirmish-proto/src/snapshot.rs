//! Serialized views of lobby entities.
//!
//! Snapshots are produced by the hosting client, the single source of truth,
//! and consumed by joiners to seed or refresh their proxy caches. Nested
//! forms ([`LobbySnapshot`], [`TeamSnapshot`]) travel once at admission;
//! the flat `*Meta` forms answer per-entity fetches afterwards.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::call::{AiDifficulty, CompanyRef};
use crate::ids::{LobbyId, ObjectId, ParticipantId};

/// What a slot is currently doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    /// Joinable, empty.
    #[default]
    Open,
    /// Holds an occupant.
    Occupied,
    /// Deliberately closed by the host; empty.
    Locked,
    /// Outside the team's current capacity; empty.
    Disabled,
}

/// A seated human. `entity` addresses the participant for company updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInfo {
    pub entity: ObjectId,
    pub participant: ParticipantId,
    pub name: String,
    pub company: Option<CompanyRef>,
}

/// Whoever fills a slot. AI occupants carry no identity beyond their
/// difficulty level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Occupant {
    Human(HumanInfo),
    Ai { difficulty: AiDifficulty },
}

impl Occupant {
    #[must_use]
    pub fn is_human(&self) -> bool {
        matches!(self, Self::Human(_))
    }

    /// Participant id when human, `None` for AI.
    #[must_use]
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Self::Human(info) => Some(info.participant),
            Self::Ai { .. } => None,
        }
    }

    /// Name shown in slot listings.
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Human(info) => info.name.clone(),
            Self::Ai { difficulty } => format!("AI ({difficulty:?})"),
        }
    }
}

/// One slot, the unit of the slot proxy cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub entity: ObjectId,
    pub index: u8,
    pub state: SlotState,
    pub occupant: Option<Occupant>,
}

/// One team with its full slot array. A team always serializes exactly four
/// slots, disabled ones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSnapshot {
    pub entity: ObjectId,
    pub index: u8,
    pub name: String,
    pub capacity: u8,
    pub slots: [SlotSnapshot; 4],
}

/// The whole lobby tree, sent inside the join welcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySnapshot {
    pub entity: ObjectId,
    pub lobby: LobbyId,
    pub name: String,
    pub game_id: String,
    pub host: ParticipantId,
    pub settings: BTreeMap<String, String>,
    pub ready: BTreeSet<ParticipantId>,
    pub teams: [TeamSnapshot; 2],
}

/// Lobby-level properties without the team tree; the lobby proxy cache unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyMeta {
    pub name: String,
    pub game_id: String,
    pub host: ParticipantId,
    pub settings: BTreeMap<String, String>,
    pub ready: BTreeSet<ParticipantId>,
}

/// Team-level properties without the slots; the team proxy cache unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMeta {
    pub name: String,
    pub capacity: u8,
}

/// Answer to a fetch for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntitySnapshot {
    Lobby(LobbyMeta),
    Team(TeamMeta),
    Slot(SlotSnapshot),
    Participant(HumanInfo),
}

/// One row of the lobby browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby: LobbyId,
    pub name: String,
    pub game_id: String,
    /// Connected humans, host included.
    pub players: u8,
    pub has_password: bool,
}

/// Post-match report uploaded by every client; transported verbatim, the
/// delta payload belongs to the finalization subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub participant: ParticipantId,
    pub scenario: String,
    pub mode: String,
    pub duration_secs: u32,
    pub finished_at: DateTime<Utc>,
    pub company_delta: Vec<u8>,
}
