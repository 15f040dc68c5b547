//! Per-connection relay sessions.
//!
//! One task per socket. Hosts get their lobby registered and their
//! broadcasts fanned out; joiners are admitted by the host and then have
//! their requests forwarded; browsers only ever list lobbies.
//!
//! The relay never interprets lobby calls. It moves frames, remembers who
//! asked, and tears connections down when the host says so or the socket
//! dies.

use std::sync::Arc;
use std::time::Duration;

use skirmish_proto::{
    ClientHello, CodecError, HelloRole, LobbyId, ParticipantId, PushBody, RejectReason,
    RequestBody, ResponseBody, ServerWelcome, SlotAddr, WireError, WireMessage, read_frame,
    write_frame,
};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::ServerConfig;
use crate::directory::{ClientId, LobbyDirectory, MemberHandle, PendingOrigin};

const OUTBOUND_DEPTH: usize = 64;
const FAREWELL_DEPTH: usize = 4;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ADMISSION_TIMEOUT: Duration = Duration::from_secs(10);
const DEPART_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn handle_connection(
    stream: TcpStream,
    client: ClientId,
    directory: Arc<LobbyDirectory>,
    config: Arc<ServerConfig>,
) {
    let _ = stream.set_nodelay(true);
    let (mut read_half, mut write_half) = stream.into_split();

    let hello = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        read_frame::<_, WireMessage>(&mut read_half, config.max_frame),
    )
    .await
    {
        Ok(Ok(WireMessage::Hello(hello))) => hello,
        Ok(Ok(other)) => {
            tracing::warn!(client, ?other, "First frame was not a hello");
            return;
        }
        Ok(Err(error)) => {
            log_disconnect(client, &error);
            return;
        }
        Err(_) => {
            tracing::debug!(client, "Handshake timed out");
            return;
        }
    };

    if hello.client_version != config.version {
        tracing::debug!(client, theirs = %hello.client_version, "Version mismatch");
        send_reject(
            &mut write_half,
            RejectReason::VersionMismatch {
                server: config.version.clone(),
            },
            config.max_frame,
        )
        .await;
        return;
    }

    match hello.role.clone() {
        HelloRole::Host {
            lobby_name,
            game_id,
            password,
        } => {
            host_session(HostSession {
                read_half,
                write_half,
                hello,
                lobby_name,
                game_id,
                password,
                client,
                directory,
                config,
            })
            .await;
        }
        HelloRole::Join { lobby, password } => {
            member_session(MemberSession {
                read_half,
                write_half,
                hello,
                lobby,
                password,
                client,
                directory,
                config,
            })
            .await;
        }
        HelloRole::Browse => browse_session(read_half, write_half, client, &directory, &config).await,
    }
}

struct HostSession {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    hello: ClientHello,
    lobby_name: String,
    game_id: String,
    password: Option<String>,
    client: ClientId,
    directory: Arc<LobbyDirectory>,
    config: Arc<ServerConfig>,
}

async fn host_session(session: HostSession) {
    let HostSession {
        mut read_half,
        write_half,
        hello,
        lobby_name,
        game_id,
        password,
        client,
        directory,
        config,
    } = session;

    let (tx, rx) = mpsc::channel(OUTBOUND_DEPTH);
    tokio::spawn(write_pump(write_half, rx, config.max_frame));
    let lobby = directory.create_lobby(
        lobby_name,
        game_id,
        password,
        hello.participant,
        tx.clone(),
    );
    tracing::info!(client, %lobby, host = %hello.participant, "Lobby opened");

    if tx
        .send(WireMessage::Welcome(ServerWelcome::Hosted { lobby }))
        .await
        .is_err()
    {
        directory.remove_lobby(lobby);
        return;
    }

    loop {
        let frame: WireMessage = match read_frame(&mut read_half, config.max_frame).await {
            Ok(frame) => frame,
            Err(error) => {
                log_disconnect(client, &error);
                break;
            }
        };
        match frame {
            WireMessage::Request { seq, body } => {
                let response = answer_host_request(&directory, lobby, body);
                if tx
                    .send(WireMessage::Response {
                        seq,
                        body: response,
                    })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            WireMessage::Response { seq, body } => {
                route_host_answer(&directory, lobby, seq, body);
            }
            WireMessage::Ping { nonce } => {
                if tx.send(WireMessage::Pong { nonce }).await.is_err() {
                    break;
                }
            }
            other => tracing::warn!(client, ?other, "Unexpected frame from a host"),
        }
    }

    // the lobby dies with its host
    if let Some(farewells) = directory.remove_lobby(lobby) {
        tracing::info!(client, %lobby, "Lobby closed");
        for farewell in farewells {
            let _ = farewell.try_send(PushBody::LobbyClosed);
        }
    }
}

/// Handle what a host asks of the relay directly.
fn answer_host_request(
    directory: &LobbyDirectory,
    lobby: LobbyId,
    body: RequestBody,
) -> ResponseBody {
    match body {
        RequestBody::Broadcast(push) => {
            fan_push(&directory.member_txs(lobby, None), &push);
            ResponseBody::Ok
        }
        RequestBody::Evict { participant } => {
            match directory.farewell_of(lobby, participant) {
                Some(farewell) => {
                    let _ = farewell.try_send(PushBody::Kicked);
                }
                None => tracing::debug!(%participant, "Evicted participant already gone"),
            }
            ResponseBody::Ok
        }
        RequestBody::ListLobbies => ResponseBody::Lobbies(directory.summaries()),
        other => {
            tracing::warn!(?other, "Unsupported request from a host");
            ResponseBody::Error(WireError::Unsupported)
        }
    }
}

/// The host answered a forwarded request; hand the answer to whoever
/// asked and fan out whatever it implies.
fn route_host_answer(directory: &LobbyDirectory, lobby: LobbyId, seq: u64, body: ResponseBody) {
    match directory.take_pending(lobby, seq) {
        Some(PendingOrigin::Member {
            client,
            seq: member_seq,
            call,
        }) => {
            if let ResponseBody::CallOutcome { changed, ref kicked } = body {
                if changed {
                    if let Some(call) = call {
                        fan_push(
                            &directory.member_txs(lobby, Some(client)),
                            &PushBody::Invoked(call),
                        );
                    }
                }
                for participant in kicked {
                    if let Some(farewell) = directory.farewell_of(lobby, *participant) {
                        let _ = farewell.try_send(PushBody::Kicked);
                    }
                }
            }
            match directory.member_tx(lobby, client) {
                Some(tx) => {
                    if let Err(error) = tx.try_send(WireMessage::Response {
                        seq: member_seq,
                        body,
                    }) {
                        tracing::warn!(client, %error, "Could not relay an answer");
                    }
                }
                None => tracing::debug!(client, "Answer for a member that already left"),
            }
        }
        Some(PendingOrigin::Relay { reply }) => {
            let _ = reply.send(body);
        }
        None => tracing::warn!(%lobby, seq, "Answer for an unknown request"),
    }
}

struct MemberSession {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    hello: ClientHello,
    lobby: LobbyId,
    password: Option<String>,
    client: ClientId,
    directory: Arc<LobbyDirectory>,
    config: Arc<ServerConfig>,
}

async fn member_session(session: MemberSession) {
    let MemberSession {
        mut read_half,
        mut write_half,
        hello,
        lobby,
        password,
        client,
        directory,
        config,
    } = session;
    let participant = hello.participant;

    if let Err(reason) = directory.screen_join(lobby, password.as_deref(), participant) {
        tracing::debug!(client, %lobby, %participant, ?reason, "Join screened out");
        send_reject(&mut write_half, reason, config.max_frame).await;
        return;
    }

    // only the host can seat them
    let (reply_tx, reply_rx) = oneshot::channel();
    let admit = RequestBody::Admit {
        participant,
        display_name: hello.display_name.clone(),
    };
    let Some(seq) = send_to_host(&directory, lobby, admit, PendingOrigin::Relay { reply: reply_tx })
        .await
    else {
        send_reject(&mut write_half, RejectReason::UnknownLobby, config.max_frame).await;
        return;
    };
    let answer = match tokio::time::timeout(ADMISSION_TIMEOUT, reply_rx).await {
        Ok(Ok(body)) => body,
        Ok(Err(_)) => {
            send_reject(
                &mut write_half,
                RejectReason::AdmissionFailed {
                    reason: "lobby closed".to_string(),
                },
                config.max_frame,
            )
            .await;
            return;
        }
        Err(_) => {
            directory.take_pending(lobby, seq);
            send_reject(
                &mut write_half,
                RejectReason::AdmissionFailed {
                    reason: "host did not answer".to_string(),
                },
                config.max_frame,
            )
            .await;
            return;
        }
    };
    let (addr, occupant, snapshot) = match answer {
        ResponseBody::Admitted {
            addr,
            occupant,
            snapshot,
        } => (addr, occupant, snapshot),
        ResponseBody::Error(WireError::LobbyFull) => {
            send_reject(&mut write_half, RejectReason::LobbyFull, config.max_frame).await;
            return;
        }
        ResponseBody::Error(error) => {
            send_reject(
                &mut write_half,
                RejectReason::AdmissionFailed {
                    reason: error.to_string(),
                },
                config.max_frame,
            )
            .await;
            return;
        }
        other => {
            tracing::warn!(client, ?other, "Host answered an admission oddly");
            send_reject(
                &mut write_half,
                RejectReason::AdmissionFailed {
                    reason: "unexpected answer".to_string(),
                },
                config.max_frame,
            )
            .await;
            return;
        }
    };

    let (tx, rx) = mpsc::channel(OUTBOUND_DEPTH);
    let (farewell_tx, mut farewell_rx) = mpsc::channel(FAREWELL_DEPTH);
    tokio::spawn(write_pump(write_half, rx, config.max_frame));

    // the welcome must be queued before the member is visible to fan-out,
    // or a push could reach them first
    if tx
        .send(WireMessage::Welcome(ServerWelcome::Joined { lobby, snapshot }))
        .await
        .is_err()
    {
        depart_host(&directory, lobby, participant).await;
        return;
    }
    let added = directory.add_member(
        lobby,
        client,
        MemberHandle {
            participant,
            display_name: hello.display_name,
            tx: tx.clone(),
            farewell: farewell_tx,
        },
    );
    if !added {
        let _ = tx.send(WireMessage::Push(PushBody::LobbyClosed)).await;
        return;
    }
    fan_push(
        &directory.member_txs(lobby, Some(client)),
        &PushBody::ParticipantJoined {
            participant,
            addr,
            occupant,
        },
    );
    tracing::info!(client, %lobby, %participant, %addr, "Member joined");

    loop {
        tokio::select! {
            frame = read_frame::<_, WireMessage>(&mut read_half, config.max_frame) => {
                match frame {
                    Ok(frame) => {
                        handle_member_frame(&directory, lobby, client, participant, &tx, frame)
                            .await;
                    }
                    Err(error) => {
                        log_disconnect(client, &error);
                        break;
                    }
                }
            }
            // a farewell always ends the session, so abandoning the
            // half-read frame above is safe
            push = farewell_rx.recv() => {
                if let Some(push) = push {
                    let _ = tx.send(WireMessage::Push(push)).await;
                }
                break;
            }
        }
    }

    if let Some(member) = directory.remove_member(lobby, client) {
        tracing::info!(client, %lobby, %participant, name = %member.display_name, "Member left");
        if let Some(addr) = depart_host(&directory, lobby, participant).await {
            fan_push(
                &directory.member_txs(lobby, None),
                &PushBody::ParticipantLeft { participant, addr },
            );
        }
    }
}

async fn handle_member_frame(
    directory: &LobbyDirectory,
    lobby: LobbyId,
    client: ClientId,
    participant: ParticipantId,
    tx: &mpsc::Sender<WireMessage>,
    frame: WireMessage,
) {
    match frame {
        WireMessage::Request { seq, body } => match body {
            RequestBody::ListLobbies => {
                let _ = tx
                    .send(WireMessage::Response {
                        seq,
                        body: ResponseBody::Lobbies(directory.summaries()),
                    })
                    .await;
            }
            body @ (RequestBody::Fetch { .. } | RequestBody::Call(_) | RequestBody::Match(_)) => {
                let call = match &body {
                    RequestBody::Call(call) => Some(call.clone()),
                    _ => None,
                };
                let origin = PendingOrigin::Member { client, seq, call };
                let forwarded = RequestBody::Forward {
                    from: participant,
                    body: Box::new(body),
                };
                if send_to_host(directory, lobby, forwarded, origin).await.is_none() {
                    // the lobby is gone; the farewell that follows closes
                    // this session, the request can die unanswered
                    tracing::debug!(client, "Dropping a request to a closed lobby");
                }
            }
            other => {
                tracing::warn!(client, ?other, "Unsupported request from a member");
                let _ = tx
                    .send(WireMessage::Response {
                        seq,
                        body: ResponseBody::Error(WireError::Unsupported),
                    })
                    .await;
            }
        },
        WireMessage::Ping { nonce } => {
            let _ = tx.send(WireMessage::Pong { nonce }).await;
        }
        other => tracing::warn!(client, ?other, "Unexpected frame from a member"),
    }
}

/// Forward one request to the host, filing who waits on it. `None` when
/// the lobby or its host is gone.
async fn send_to_host(
    directory: &LobbyDirectory,
    lobby: LobbyId,
    body: RequestBody,
    origin: PendingOrigin,
) -> Option<u64> {
    let seq = directory.next_host_seq(lobby, origin)?;
    let tx = directory.host_tx(lobby)?;
    if tx.send(WireMessage::Request { seq, body }).await.is_err() {
        directory.take_pending(lobby, seq);
        return None;
    }
    Some(seq)
}

/// Tell the host a member is gone and learn which slot opened up.
async fn depart_host(
    directory: &LobbyDirectory,
    lobby: LobbyId,
    participant: ParticipantId,
) -> Option<SlotAddr> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let seq = send_to_host(
        directory,
        lobby,
        RequestBody::Depart { participant },
        PendingOrigin::Relay { reply: reply_tx },
    )
    .await?;
    match tokio::time::timeout(DEPART_TIMEOUT, reply_rx).await {
        Ok(Ok(ResponseBody::Departed { addr })) => addr,
        Ok(Ok(other)) => {
            tracing::warn!(?other, "Unexpected departure answer");
            None
        }
        Ok(Err(_)) => None,
        Err(_) => {
            directory.take_pending(lobby, seq);
            tracing::warn!(%participant, "Host did not confirm a departure");
            None
        }
    }
}

async fn browse_session(
    mut read_half: OwnedReadHalf,
    mut write_half: OwnedWriteHalf,
    client: ClientId,
    directory: &LobbyDirectory,
    config: &ServerConfig,
) {
    if write_frame(
        &mut write_half,
        &WireMessage::Welcome(ServerWelcome::Browsing),
        config.max_frame,
    )
    .await
    .is_err()
    {
        return;
    }
    loop {
        let frame: WireMessage = match read_frame(&mut read_half, config.max_frame).await {
            Ok(frame) => frame,
            Err(error) => {
                log_disconnect(client, &error);
                break;
            }
        };
        let answer = match frame {
            WireMessage::Request {
                seq,
                body: RequestBody::ListLobbies,
            } => WireMessage::Response {
                seq,
                body: ResponseBody::Lobbies(directory.summaries()),
            },
            WireMessage::Request { seq, .. } => WireMessage::Response {
                seq,
                body: ResponseBody::Error(WireError::Unsupported),
            },
            WireMessage::Ping { nonce } => WireMessage::Pong { nonce },
            other => {
                tracing::debug!(client, ?other, "Ignoring a non-request frame");
                continue;
            }
        };
        if write_frame(&mut write_half, &answer, config.max_frame).await.is_err() {
            break;
        }
    }
}

/// Queue a push on every sender, dropping it where the queue is full. A
/// member that falls that far behind refreshes from its caches' TTL.
fn fan_push(txs: &[mpsc::Sender<WireMessage>], push: &PushBody) {
    for tx in txs {
        if let Err(error) = tx.try_send(WireMessage::Push(push.clone())) {
            tracing::warn!(%error, "Dropping a push to a backlogged member");
        }
    }
}

async fn send_reject(write_half: &mut OwnedWriteHalf, reason: RejectReason, max_frame: usize) {
    if let Err(error) = write_frame(write_half, &WireMessage::Reject { reason }, max_frame).await {
        tracing::debug!(%error, "Could not deliver a reject");
    }
}

async fn write_pump(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<WireMessage>,
    max_frame: usize,
) {
    while let Some(frame) = outbound.recv().await {
        if let Err(error) = write_frame(&mut write_half, &frame, max_frame).await {
            tracing::debug!(%error, "Write pump stopped");
            break;
        }
    }
}

fn log_disconnect(client: ClientId, error: &CodecError) {
    match error {
        CodecError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            tracing::debug!(client, "Connection closed");
        }
        other => tracing::warn!(client, %other, "Connection failed"),
    }
}
