//! Top-level wire messages.
//!
//! One TCP connection carries a stream of [`WireMessage`] frames. The
//! handshake pair (`Hello`/`Welcome`-or-`Reject`) comes first; afterwards
//! requests, responses, pushes, and liveness probes interleave freely.

use serde::{Deserialize, Serialize};

use crate::call::DispatchCall;
use crate::ids::{LobbyId, ObjectId, ParticipantId, SlotAddr};
use crate::snapshot::{
    EntitySnapshot, LobbySnapshot, LobbySummary, MatchResult, Occupant,
};

/// Version fingerprint compared verbatim during the handshake. Bump on any
/// incompatible wire change.
pub const PROTOCOL_VERSION: &str = "skirmish/1";

/// What the connecting client wants to become.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HelloRole {
    /// Open a new lobby and act as its source of truth.
    Host {
        lobby_name: String,
        game_id: String,
        password: Option<String>,
    },
    /// Enter an existing lobby.
    Join {
        lobby: LobbyId,
        password: Option<String>,
    },
    /// Query the lobby browser without entering anything.
    Browse,
}

/// First frame of every connection, client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    pub role: HelloRole,
    pub participant: ParticipantId,
    pub display_name: String,
    pub client_version: String,
}

/// Successful handshake answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerWelcome {
    /// Lobby registered; the host keeps its own authoritative copy, so no
    /// snapshot travels back.
    Hosted { lobby: LobbyId },
    /// Admitted and seated; the snapshot seeds the joiner's proxy graph.
    Joined {
        lobby: LobbyId,
        snapshot: LobbySnapshot,
    },
    /// Browser connection accepted.
    Browsing,
}

/// Why a handshake was refused. Fatal to the attempt, not retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    UnknownLobby,
    BadPassword,
    LobbyFull,
    VersionMismatch { server: String },
    DuplicateParticipant,
    /// The host refused or failed to answer the admission request.
    AdmissionFailed { reason: String },
}

/// Requests a member forwards to the host through the relay during match
/// preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchRequest {
    /// Opaque company payload answering a `CompanyRequested` push.
    UploadCompany { payload: Vec<u8> },
    /// The game-mode package arrived intact.
    ConfirmPackage,
    /// Local load finished, ready to launch.
    SignalLaunchReady,
    /// Post-match report.
    UploadResult(MatchResult),
}

/// Body of a correlated request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Read one entity. Members only; answered by the host.
    Fetch { target: ObjectId },
    /// Mutate one entity. Members only; applied by the host.
    Call(DispatchCall),
    /// Match-preparation traffic. Members only; answered by the host.
    Match(MatchRequest),
    /// Fan a push out to every member. Host only; acknowledged by the server.
    Broadcast(PushBody),
    /// Lobby browser query. Answered by the server.
    ListLobbies,
    /// Seat a validated joiner. Server to host only.
    Admit {
        participant: ParticipantId,
        display_name: String,
    },
    /// A member's connection went away. Server to host only.
    Depart { participant: ParticipantId },
    /// A member request relayed to the host with its origin attached so the
    /// host can check permissions.
    Forward {
        from: ParticipantId,
        body: Box<RequestBody>,
    },
    /// Host asks the relay to push [`PushBody::Kicked`] to one member and
    /// drop its connection. Host only.
    Evict { participant: ParticipantId },
}

/// Typed failure carried inside a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireError {
    /// No entity with the requested id.
    UnknownTarget,
    /// The caller may not perform this call on this target.
    NotPermitted,
    /// The host refused the call; human-readable rule violation.
    InvalidCall(String),
    /// Every open slot is taken.
    LobbyFull,
    /// Match-preparation request outside an active match sequence.
    NoActiveMatch,
    /// The request is not valid for this peer or role.
    Unsupported,
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTarget => write!(f, "unknown target entity"),
            Self::NotPermitted => write!(f, "not permitted"),
            Self::InvalidCall(reason) => write!(f, "{reason}"),
            Self::LobbyFull => write!(f, "lobby is full"),
            Self::NoActiveMatch => write!(f, "no match is being prepared"),
            Self::Unsupported => write!(f, "unsupported request"),
        }
    }
}

/// Body of a correlated response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Plain acknowledgement.
    Ok,
    /// A call was applied. `changed` tells the relay whether to notify the
    /// other members; `kicked` lists humans the call unseated.
    CallOutcome {
        changed: bool,
        kicked: Vec<ParticipantId>,
    },
    /// Fetch answer.
    Entity(EntitySnapshot),
    /// Browser answer.
    Lobbies(Vec<LobbySummary>),
    /// Admission answer: where the joiner was seated plus the snapshot the
    /// server hands to it.
    Admitted {
        addr: SlotAddr,
        occupant: Occupant,
        snapshot: LobbySnapshot,
    },
    /// Departure answer: which slot was cleared, if the participant was
    /// still seated.
    Departed { addr: Option<SlotAddr> },
    /// The request failed.
    Error(WireError),
}

/// Unsolicited server-to-client notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PushBody {
    /// Another participant's accepted mutation, same shape as the request.
    Invoked(DispatchCall),
    /// Someone was seated.
    ParticipantJoined {
        participant: ParticipantId,
        addr: SlotAddr,
        occupant: Occupant,
    },
    /// Someone left or was dropped; the slot is open again.
    ParticipantLeft {
        participant: ParticipantId,
        addr: SlotAddr,
    },
    /// The host removed you from the lobby.
    Kicked,
    /// The host went away; the lobby no longer exists.
    LobbyClosed,
    /// The host wants every human's company payload.
    CompanyRequested,
    /// The compiled game-mode package; confirm receipt to the host.
    PackageAvailable { payload: Vec<u8> },
    /// Launch countdown started; run it locally from receipt.
    CountdownStarted { seconds: u32, grace_secs: u32 },
    /// Start the local game process now.
    Launch,
    /// Match preparation was abandoned.
    MatchCancelled { reason: String },
    /// Every result arrived; the match is complete.
    MatchFinalized { results: Vec<MatchResult> },
}

/// Everything that can travel in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Hello(ClientHello),
    Welcome(ServerWelcome),
    Reject { reason: RejectReason },
    Request { seq: u64, body: RequestBody },
    Response { seq: u64, body: ResponseBody },
    Push(PushBody),
    Ping { nonce: u64 },
    Pong { nonce: u64 },
}
