use skirmish_proto::{MatchResult, Occupant, ParticipantId, SlotAddr};

/// Observable change raised by the lobby graph.
///
/// The hosting client raises these while applying calls; joined clients
/// raise the equivalent events while applying pushes to their proxies.
/// Presentation code subscribes to the stream and re-reads whatever the
/// event names.
#[derive(Debug, Clone, PartialEq)]
pub enum LobbyEvent {
    /// A slot's state or occupant changed.
    SlotChanged { addr: SlotAddr },
    /// A team's name or capacity changed.
    TeamChanged { team: u8 },
    /// One lobby setting was written.
    SettingChanged { key: String, value: String },
    /// A participant toggled readiness.
    ReadyChanged {
        participant: ParticipantId,
        ready: bool,
    },
    /// A seated human's company assignment changed.
    CompanyChanged { participant: ParticipantId },
    /// Chat line.
    Chat {
        sender: ParticipantId,
        text: String,
    },
    /// Someone was seated.
    ParticipantJoined {
        participant: ParticipantId,
        addr: SlotAddr,
    },
    /// Someone left; their slot is open again.
    ParticipantLeft {
        participant: ParticipantId,
        addr: SlotAddr,
    },
    /// A capacity change pushed this occupant out of the team entirely.
    OccupantDisplaced { team: u8, occupant: Occupant },
    /// The local participant was removed by the host.
    Kicked,
    /// The lobby no longer exists.
    LobbyClosed,
    /// The connection dropped outside a deliberate close.
    ConnectionLost,
    /// The host asked every human for a company payload.
    CompanyRequested,
    /// The game-mode package arrived.
    PackageReceived,
    /// Launch countdown is running.
    CountdownStarted { seconds: u32, grace_secs: u32 },
    /// Start the local game process.
    MatchLaunched,
    /// Match preparation was abandoned.
    MatchCancelled { reason: String },
    /// All results collected.
    MatchFinalized { results: Vec<MatchResult> },
}
