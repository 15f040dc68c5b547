//! Session lifecycles: hosting, joining, browsing, offline play.
//!
//! A session owns the connection, the background routing task, and the
//! lobby handle callers work through. Hosts keep the authoritative graph
//! and answer relayed traffic; joiners hold the proxy graph and feed
//! pushes into it. Offline sessions are hosts without a relay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use skirmish_core::{CallError, LobbyConfig, LobbyEvent, LocalLobby};
use skirmish_proto::{
    ClientHello, HelloRole, LobbyId, LobbySummary, MatchRequest, MatchResult, ParticipantId,
    PushBody, RequestBody, ResponseBody, ServerWelcome, WireError,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionState, Inbound};
use crate::dispatch::Dispatcher;
use crate::error::{ConnectError, MatchError, RequestError};
use crate::handle::{LobbyHandle, LocalAuthority, Uplink};
use crate::match_flow::{MatchContext, MatchRuntime, MatchSetup, run_start_sequence};
use crate::registry::ObjectRegistry;

const EVENT_DEPTH: usize = 256;
const UPLINK_DEPTH: usize = 64;

/// Anything that can end a session attempt.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Lobby identity supplied when hosting.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub lobby_name: String,
    pub game_id: String,
    pub password: Option<String>,
}

impl HostOptions {
    pub fn new(lobby_name: impl Into<String>, game_id: impl Into<String>) -> Self {
        Self {
            lobby_name: lobby_name.into(),
            game_id: game_id.into(),
            password: None,
        }
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// One lobby membership, hosting or joined, online or offline.
pub struct Session {
    lobby: LobbyHandle,
    lobby_id: LobbyId,
    me: ParticipantId,
    events: broadcast::Sender<LobbyEvent>,
    connection: Option<Connection>,
    /// Present on the authoritative side only.
    authority: Option<Arc<LocalAuthority>>,
    runtime: Arc<MatchRuntime>,
    launch: Arc<LaunchControl>,
    package: Arc<Mutex<Option<Vec<u8>>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Open a lobby on the relay and become its source of truth.
    pub async fn host(
        addr: &str,
        config: ClientConfig,
        options: HostOptions,
    ) -> Result<Self, SessionError> {
        let hello = ClientHello {
            role: HelloRole::Host {
                lobby_name: options.lobby_name.clone(),
                game_id: options.game_id.clone(),
                password: options.password.clone(),
            },
            participant: config.participant,
            display_name: config.display_name.clone(),
            client_version: config.client_version.clone(),
        };
        let (connection, welcome, inbound) =
            Connection::establish(addr, hello, config.request_timeout, config.max_frame).await?;
        let ServerWelcome::Hosted { lobby: lobby_id } = welcome else {
            connection.close();
            return Err(ConnectError::UnexpectedReply.into());
        };
        tracing::info!(%lobby_id, name = %options.lobby_name, "Hosting lobby");

        let (events, _) = broadcast::channel(EVENT_DEPTH);
        let (uplink_tx, uplink_rx) = mpsc::channel(UPLINK_DEPTH);
        let authority = Arc::new(LocalAuthority {
            lobby: Mutex::new(LocalLobby::new(
                lobby_id,
                LobbyConfig {
                    name: options.lobby_name,
                    game_id: options.game_id,
                    host: config.participant,
                    host_name: config.display_name,
                },
            )),
            events: events.clone(),
            uplink: Some(uplink_tx),
            me: config.participant,
        });
        let runtime = Arc::new(MatchRuntime::new());

        let tasks = vec![
            tokio::spawn(uplink_pump(connection.dispatcher(), uplink_rx)),
            tokio::spawn(run_host_router(HostRouter {
                authority: Arc::clone(&authority),
                runtime: Arc::clone(&runtime),
                dispatcher: connection.dispatcher(),
                events: events.clone(),
                inbound,
            })),
        ];

        Ok(Self {
            lobby: LobbyHandle::local(Arc::clone(&authority)),
            lobby_id,
            me: config.participant,
            events,
            connection: Some(connection),
            authority: Some(authority),
            runtime,
            launch: Arc::new(LaunchControl::default()),
            package: Arc::new(Mutex::new(None)),
            tasks,
        })
    }

    /// Enter an existing lobby through the relay.
    pub async fn join(
        addr: &str,
        config: ClientConfig,
        lobby: LobbyId,
        password: Option<String>,
    ) -> Result<Self, SessionError> {
        let hello = ClientHello {
            role: HelloRole::Join { lobby, password },
            participant: config.participant,
            display_name: config.display_name.clone(),
            client_version: config.client_version.clone(),
        };
        let (connection, welcome, inbound) =
            Connection::establish(addr, hello, config.request_timeout, config.max_frame).await?;
        let ServerWelcome::Joined { lobby: lobby_id, snapshot } = welcome else {
            connection.close();
            return Err(ConnectError::UnexpectedReply.into());
        };
        tracing::info!(%lobby_id, "Joined lobby");

        let (events, _) = broadcast::channel(EVENT_DEPTH);
        let shared = Arc::new(crate::handle::RemoteShared {
            registry: ObjectRegistry::new(config.cache_ttl, connection.dispatcher()),
            dispatcher: connection.dispatcher(),
            events: events.clone(),
            me: config.participant,
        });
        shared.registry.seed(&snapshot);
        let Some(proxy) = shared.registry.lobby() else {
            connection.close();
            return Err(ConnectError::UnexpectedReply.into());
        };

        let launch = Arc::new(LaunchControl::default());
        let package = Arc::new(Mutex::new(None));
        let router = tokio::spawn(run_member_router(MemberRouter {
            shared: Arc::clone(&shared),
            dispatcher: connection.dispatcher(),
            events: events.clone(),
            launch: Arc::clone(&launch),
            package: Arc::clone(&package),
            company_payload: config.company_payload,
            inbound,
        }));

        Ok(Self {
            lobby: LobbyHandle::remote(proxy, shared),
            lobby_id,
            me: config.participant,
            events,
            connection: Some(connection),
            authority: None,
            runtime: Arc::new(MatchRuntime::new()),
            launch,
            package,
            tasks: vec![router],
        })
    }

    /// A lobby with no relay behind it. Slots, settings, and matches work
    /// as usual; there is nobody to join.
    pub fn offline(config: ClientConfig, options: HostOptions) -> Self {
        let lobby_id = LobbyId::new();
        let (events, _) = broadcast::channel(EVENT_DEPTH);
        let authority = Arc::new(LocalAuthority {
            lobby: Mutex::new(LocalLobby::new(
                lobby_id,
                LobbyConfig {
                    name: options.lobby_name,
                    game_id: options.game_id,
                    host: config.participant,
                    host_name: config.display_name,
                },
            )),
            events: events.clone(),
            uplink: None,
            me: config.participant,
        });
        Self {
            lobby: LobbyHandle::local(Arc::clone(&authority)),
            lobby_id,
            me: config.participant,
            events,
            connection: None,
            authority: Some(authority),
            runtime: Arc::new(MatchRuntime::new()),
            launch: Arc::new(LaunchControl::default()),
            package: Arc::new(Mutex::new(None)),
            tasks: Vec::new(),
        }
    }

    /// Query a relay's lobby directory without entering anything.
    pub async fn list_lobbies(
        addr: &str,
        config: &ClientConfig,
    ) -> Result<Vec<LobbySummary>, SessionError> {
        let hello = ClientHello {
            role: HelloRole::Browse,
            participant: config.participant,
            display_name: config.display_name.clone(),
            client_version: config.client_version.clone(),
        };
        let (connection, welcome, _inbound) =
            Connection::establish(addr, hello, config.request_timeout, config.max_frame).await?;
        if !matches!(welcome, ServerWelcome::Browsing) {
            connection.close();
            return Err(ConnectError::UnexpectedReply.into());
        }
        let response = connection.dispatcher().request(RequestBody::ListLobbies).await;
        connection.close();
        match response? {
            ResponseBody::Lobbies(lobbies) => Ok(lobbies),
            _ => Err(RequestError::UnexpectedResponse.into()),
        }
    }

    pub fn lobby(&self) -> LobbyHandle {
        self.lobby.clone()
    }

    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    pub fn participant(&self) -> ParticipantId {
        self.me
    }

    /// Whether this session owns the authoritative graph.
    pub fn is_host(&self) -> bool {
        self.authority.is_some()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map_or(ConnectionState::Disconnected, Connection::state)
    }

    /// Subscribe to lobby and match events. Each subscriber gets every
    /// event from the moment of subscription.
    pub fn events(&self) -> broadcast::Receiver<LobbyEvent> {
        self.events.subscribe()
    }

    /// Round-trip latency to the relay.
    pub async fn ping(&self) -> Result<Duration, RequestError> {
        match &self.connection {
            Some(connection) => connection.ping().await,
            None => Err(RequestError::ConnectionClosed),
        }
    }

    /// The game-mode package received for the current match, if any.
    pub fn package(&self) -> Option<Vec<u8>> {
        self.package.lock().clone()
    }

    /// Drive the match-start sequence. Host only.
    pub async fn start_match(&self, setup: MatchSetup) -> Result<MatchContext, MatchError> {
        let Some(authority) = &self.authority else {
            return Err(MatchError::NotHost);
        };
        run_start_sequence(Arc::clone(authority), Arc::clone(&self.runtime), setup).await
    }

    /// Abandon the match being prepared. Host only.
    pub fn cancel_match(&self, reason: impl Into<String>) -> Result<(), MatchError> {
        if self.authority.is_none() {
            return Err(MatchError::NotHost);
        }
        self.runtime.cancel(reason);
        Ok(())
    }

    /// Report this client's result for the launched match.
    pub async fn upload_result(&self, result: MatchResult) -> Result<(), SessionError> {
        match &self.connection {
            Some(connection) if !self.lobby.is_local() => {
                connection
                    .dispatcher()
                    .request(RequestBody::Match(MatchRequest::UploadResult(result)))
                    .await?;
                Ok(())
            }
            _ => match self
                .runtime
                .handle_request(self.me, MatchRequest::UploadResult(result))
            {
                ResponseBody::Error(error) => Err(RequestError::Refused(error).into()),
                _ => Ok(()),
            },
        }
    }

    /// Leave the lobby and tear the session down. Idempotent. A host
    /// closing here closes the lobby for everyone.
    pub fn close(&self) {
        if let Some(connection) = &self.connection {
            connection.close();
        }
        for task in &self.tasks {
            task.abort();
        }
        self.launch.disarm();
        self.runtime.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Drains host-side traffic to the relay in order, one request at a time.
/// Lobby pushes and evictions share this queue so members observe them in
/// the sequence the host produced them.
async fn uplink_pump(dispatcher: Arc<Dispatcher>, mut uplink: mpsc::Receiver<Uplink>) {
    while let Some(item) = uplink.recv().await {
        let request = match item {
            Uplink::Broadcast(push) => RequestBody::Broadcast(push),
            Uplink::Evict(participant) => RequestBody::Evict { participant },
        };
        match dispatcher.request(request).await {
            Ok(_) => {}
            Err(RequestError::ConnectionClosed) => break,
            Err(error) => tracing::warn!(%error, "Relay declined an uplink item"),
        }
    }
}

struct HostRouter {
    authority: Arc<LocalAuthority>,
    runtime: Arc<MatchRuntime>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<LobbyEvent>,
    inbound: mpsc::Receiver<Inbound>,
}

async fn run_host_router(mut router: HostRouter) {
    while let Some(item) = router.inbound.recv().await {
        match item {
            Inbound::Relayed { seq, body } => {
                let response = answer_relayed(&router, body);
                if router.dispatcher.respond(seq, response).await.is_err() {
                    break;
                }
            }
            Inbound::Push(push) => {
                tracing::debug!(?push, "Push ignored on the hosting side");
            }
            Inbound::Disconnected => {
                router.runtime.cancel("connection closed");
                let _ = router.events.send(LobbyEvent::ConnectionLost);
                break;
            }
        }
    }
}

/// Answer one request the relay forwarded to the authoritative side.
fn answer_relayed(router: &HostRouter, body: RequestBody) -> ResponseBody {
    match body {
        RequestBody::Admit {
            participant,
            display_name,
        } => {
            let mut lobby = router.authority.lobby.lock();
            match lobby.seat_participant(participant, display_name) {
                Ok((addr, occupant)) => {
                    let snapshot = lobby.snapshot();
                    drop(lobby);
                    let _ = router
                        .events
                        .send(LobbyEvent::ParticipantJoined { participant, addr });
                    ResponseBody::Admitted {
                        addr,
                        occupant,
                        snapshot,
                    }
                }
                Err(CallError::LobbyFull) => ResponseBody::Error(WireError::LobbyFull),
                Err(error) => ResponseBody::Error(WireError::InvalidCall(error.to_string())),
            }
        }
        RequestBody::Depart { participant } => {
            let addr = router.authority.lobby.lock().remove_participant(participant);
            if let Some(addr) = addr {
                let _ = router
                    .events
                    .send(LobbyEvent::ParticipantLeft { participant, addr });
            }
            router.runtime.participant_left(participant);
            ResponseBody::Departed { addr }
        }
        RequestBody::Forward { from, body } => match *body {
            RequestBody::Fetch { target } => {
                match router.authority.read(|lobby| lobby.entity_snapshot(target)) {
                    Some(snapshot) => ResponseBody::Entity(snapshot),
                    None => ResponseBody::Error(WireError::UnknownTarget),
                }
            }
            RequestBody::Call(call) => match router.authority.apply_forwarded(from, &call) {
                Ok(applied) => {
                    for participant in &applied.kicked {
                        router.runtime.participant_left(*participant);
                    }
                    ResponseBody::CallOutcome {
                        changed: applied.changed,
                        kicked: applied.kicked,
                    }
                }
                Err(error) => ResponseBody::Error(error.into()),
            },
            RequestBody::Match(request) => router.runtime.handle_request(from, request),
            other => {
                tracing::warn!(?other, "Unexpected forwarded request");
                ResponseBody::Error(WireError::Unsupported)
            }
        },
        other => {
            tracing::warn!(?other, "Unexpected relayed request");
            ResponseBody::Error(WireError::Unsupported)
        }
    }
}

/// Launch-once latch with the local fallback timer.
///
/// Members start the countdown clock when [`PushBody::CountdownStarted`]
/// arrives and launch when the host says so or when countdown plus grace
/// elapses, whichever happens first.
#[derive(Default)]
struct LaunchControl {
    launched: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl LaunchControl {
    fn reset(&self) {
        self.disarm();
        self.launched.store(false, Ordering::SeqCst);
    }

    fn disarm(&self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }

    fn arm(self: &Arc<Self>, wait: Duration, events: broadcast::Sender<LobbyEvent>) {
        let control = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            tracing::debug!("Launch deadline reached without a launch push");
            control.fire(&events);
        });
        let replaced = self.timer.lock().replace(timer);
        if let Some(previous) = replaced {
            previous.abort();
        }
    }

    fn fire(&self, events: &broadcast::Sender<LobbyEvent>) {
        if !self.launched.swap(true, Ordering::SeqCst) {
            let _ = events.send(LobbyEvent::MatchLaunched);
        }
    }
}

struct MemberRouter {
    shared: Arc<crate::handle::RemoteShared>,
    dispatcher: Arc<Dispatcher>,
    events: broadcast::Sender<LobbyEvent>,
    launch: Arc<LaunchControl>,
    package: Arc<Mutex<Option<Vec<u8>>>>,
    company_payload: Vec<u8>,
    inbound: mpsc::Receiver<Inbound>,
}

async fn run_member_router(mut router: MemberRouter) {
    // set once the host or relay said goodbye, so the socket dropping
    // right after is not reported as a lost connection
    let mut closing = false;
    while let Some(item) = router.inbound.recv().await {
        match item {
            Inbound::Push(push) => handle_push(&router, push, &mut closing).await,
            Inbound::Relayed { seq, body } => {
                tracing::warn!(?body, "Request relayed to a non-authoritative client");
                let _ = router
                    .dispatcher
                    .respond(seq, ResponseBody::Error(WireError::Unsupported))
                    .await;
            }
            Inbound::Disconnected => {
                router.launch.disarm();
                if !closing {
                    let _ = router.events.send(LobbyEvent::ConnectionLost);
                }
                break;
            }
        }
    }
}

async fn handle_push(router: &MemberRouter, push: PushBody, closing: &mut bool) {
    match push {
        PushBody::Invoked(call) => {
            for event in router.shared.registry.apply_invoked(&call) {
                let _ = router.events.send(event);
            }
        }
        PushBody::ParticipantJoined {
            participant,
            addr,
            occupant,
        } => {
            for event in router.shared.registry.apply_joined(participant, addr, &occupant) {
                let _ = router.events.send(event);
            }
        }
        PushBody::ParticipantLeft { participant, addr } => {
            for event in router.shared.registry.apply_left(participant, addr) {
                let _ = router.events.send(event);
            }
        }
        PushBody::Kicked => {
            *closing = true;
            router.launch.disarm();
            let _ = router.events.send(LobbyEvent::Kicked);
        }
        PushBody::LobbyClosed => {
            *closing = true;
            router.launch.disarm();
            let _ = router.events.send(LobbyEvent::LobbyClosed);
        }
        PushBody::CompanyRequested => {
            router.launch.reset();
            let _ = router.events.send(LobbyEvent::CompanyRequested);
            let payload = router.company_payload.clone();
            respond_to_host(router, MatchRequest::UploadCompany { payload }).await;
        }
        PushBody::PackageAvailable { payload } => {
            *router.package.lock() = Some(payload);
            let _ = router.events.send(LobbyEvent::PackageReceived);
            respond_to_host(router, MatchRequest::ConfirmPackage).await;
        }
        PushBody::CountdownStarted { seconds, grace_secs } => {
            let _ = router
                .events
                .send(LobbyEvent::CountdownStarted { seconds, grace_secs });
            let wait = Duration::from_secs(u64::from(seconds) + u64::from(grace_secs));
            router.launch.arm(wait, router.events.clone());
            respond_to_host(router, MatchRequest::SignalLaunchReady).await;
        }
        PushBody::Launch => {
            router.launch.disarm();
            router.launch.fire(&router.events);
        }
        PushBody::MatchCancelled { reason } => {
            router.launch.disarm();
            let _ = router.events.send(LobbyEvent::MatchCancelled { reason });
        }
        PushBody::MatchFinalized { results } => {
            let _ = router.events.send(LobbyEvent::MatchFinalized { results });
        }
    }
}

/// Send one automatic match answer to the host, through the relay.
async fn respond_to_host(router: &MemberRouter, request: MatchRequest) {
    let label = match &request {
        MatchRequest::UploadCompany { .. } => "company upload",
        MatchRequest::ConfirmPackage => "package confirmation",
        MatchRequest::SignalLaunchReady => "launch readiness",
        MatchRequest::UploadResult(_) => "result upload",
    };
    match router.dispatcher.request(RequestBody::Match(request)).await {
        Ok(_) => {}
        Err(error) => tracing::warn!(%error, "Automatic {label} failed"),
    }
}
