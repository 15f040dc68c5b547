//! Registry of every lobby the relay is carrying.
//!
//! The relay stores no lobby state beyond who is connected where; the
//! hosting client owns the graph. Each record maps a lobby to its host's
//! write queue, its members' write queues, and the requests forwarded to
//! the host that still await an answer.
//!
//! Every method is synchronous and drops the lock before returning, so
//! callers can await on the senders they get back.

use std::collections::HashMap;

use parking_lot::RwLock;
use skirmish_proto::{
    DispatchCall, LobbyId, LobbySummary, ParticipantId, PushBody, RejectReason, ResponseBody,
    WireMessage,
};
use tokio::sync::{mpsc, oneshot};

/// Per-connection id, minted by the accept loop.
pub(crate) type ClientId = u64;

/// Write queue and goodbye lane for one joined member.
///
/// `farewell` carries the single push a member may still receive after
/// its lobby record is gone; the member's session task sends it and hangs
/// up.
pub(crate) struct MemberHandle {
    pub participant: ParticipantId,
    pub display_name: String,
    pub tx: mpsc::Sender<WireMessage>,
    pub farewell: mpsc::Sender<PushBody>,
}

/// Who is waiting on an answer the host owes.
pub(crate) enum PendingOrigin {
    /// A member request forwarded verbatim. `call` is kept so an
    /// acknowledged change can be fanned to the other members.
    Member {
        client: ClientId,
        seq: u64,
        call: Option<DispatchCall>,
    },
    /// The relay itself, admitting or departing a member.
    Relay {
        reply: oneshot::Sender<ResponseBody>,
    },
}

struct HostedLobby {
    name: String,
    game_id: String,
    password: Option<String>,
    host_participant: ParticipantId,
    host_tx: mpsc::Sender<WireMessage>,
    members: HashMap<ClientId, MemberHandle>,
    pending: HashMap<u64, PendingOrigin>,
    next_seq: u64,
}

#[derive(Default)]
pub(crate) struct LobbyDirectory {
    lobbies: RwLock<HashMap<LobbyId, HostedLobby>>,
}

impl LobbyDirectory {
    /// Register a fresh lobby and mint its id.
    pub fn create_lobby(
        &self,
        name: String,
        game_id: String,
        password: Option<String>,
        host_participant: ParticipantId,
        host_tx: mpsc::Sender<WireMessage>,
    ) -> LobbyId {
        let lobby = LobbyId::new();
        self.lobbies.write().insert(
            lobby,
            HostedLobby {
                name,
                game_id,
                password,
                host_participant,
                host_tx,
                members: HashMap::new(),
                pending: HashMap::new(),
                next_seq: 1,
            },
        );
        lobby
    }

    /// Drop a lobby record, handing back the members' farewell lanes so
    /// the caller can say goodbye.
    pub fn remove_lobby(&self, lobby: LobbyId) -> Option<Vec<mpsc::Sender<PushBody>>> {
        let hosted = self.lobbies.write().remove(&lobby)?;
        Some(
            hosted
                .members
                .values()
                .map(|member| member.farewell.clone())
                .collect(),
        )
    }

    pub fn summaries(&self) -> Vec<LobbySummary> {
        self.lobbies
            .read()
            .iter()
            .map(|(id, hosted)| LobbySummary {
                lobby: *id,
                name: hosted.name.clone(),
                game_id: hosted.game_id.clone(),
                players: u8::try_from(hosted.members.len() + 1).unwrap_or(u8::MAX),
                has_password: hosted.password.is_some(),
            })
            .collect()
    }

    /// Everything that can refuse a join before the host is asked.
    pub fn screen_join(
        &self,
        lobby: LobbyId,
        password: Option<&str>,
        participant: ParticipantId,
    ) -> Result<(), RejectReason> {
        let guard = self.lobbies.read();
        let Some(hosted) = guard.get(&lobby) else {
            return Err(RejectReason::UnknownLobby);
        };
        if let Some(expected) = &hosted.password {
            if password != Some(expected.as_str()) {
                return Err(RejectReason::BadPassword);
            }
        }
        if hosted.host_participant == participant
            || hosted
                .members
                .values()
                .any(|member| member.participant == participant)
        {
            return Err(RejectReason::DuplicateParticipant);
        }
        Ok(())
    }

    /// Mint the next host-bound sequence number and file who is waiting
    /// on it, in one step.
    pub fn next_host_seq(&self, lobby: LobbyId, origin: PendingOrigin) -> Option<u64> {
        let mut guard = self.lobbies.write();
        let hosted = guard.get_mut(&lobby)?;
        let seq = hosted.next_seq;
        hosted.next_seq += 1;
        hosted.pending.insert(seq, origin);
        Some(seq)
    }

    pub fn take_pending(&self, lobby: LobbyId, seq: u64) -> Option<PendingOrigin> {
        self.lobbies.write().get_mut(&lobby)?.pending.remove(&seq)
    }

    pub fn host_tx(&self, lobby: LobbyId) -> Option<mpsc::Sender<WireMessage>> {
        self.lobbies
            .read()
            .get(&lobby)
            .map(|hosted| hosted.host_tx.clone())
    }

    /// `false` when the lobby vanished in the meantime.
    pub fn add_member(&self, lobby: LobbyId, client: ClientId, handle: MemberHandle) -> bool {
        let mut guard = self.lobbies.write();
        match guard.get_mut(&lobby) {
            Some(hosted) => {
                hosted.members.insert(client, handle);
                true
            }
            None => false,
        }
    }

    pub fn remove_member(&self, lobby: LobbyId, client: ClientId) -> Option<MemberHandle> {
        self.lobbies.write().get_mut(&lobby)?.members.remove(&client)
    }

    /// Member write queues, minus `except` when given.
    pub fn member_txs(
        &self,
        lobby: LobbyId,
        except: Option<ClientId>,
    ) -> Vec<mpsc::Sender<WireMessage>> {
        let guard = self.lobbies.read();
        let Some(hosted) = guard.get(&lobby) else {
            return Vec::new();
        };
        hosted
            .members
            .iter()
            .filter(|(client, _)| Some(**client) != except)
            .map(|(_, member)| member.tx.clone())
            .collect()
    }

    pub fn member_tx(&self, lobby: LobbyId, client: ClientId) -> Option<mpsc::Sender<WireMessage>> {
        self.lobbies
            .read()
            .get(&lobby)?
            .members
            .get(&client)
            .map(|member| member.tx.clone())
    }

    pub fn farewell_of(
        &self,
        lobby: LobbyId,
        participant: ParticipantId,
    ) -> Option<mpsc::Sender<PushBody>> {
        self.lobbies
            .read()
            .get(&lobby)?
            .members
            .values()
            .find(|member| member.participant == participant)
            .map(|member| member.farewell.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(participant: u64) -> (MemberHandle, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(4);
        let (farewell, _farewell_rx) = mpsc::channel(1);
        (
            MemberHandle {
                participant: ParticipantId(participant),
                display_name: format!("player-{participant}"),
                tx,
                farewell,
            },
            rx,
        )
    }

    fn directory_with_lobby(password: Option<&str>) -> (LobbyDirectory, LobbyId) {
        let directory = LobbyDirectory::default();
        let (host_tx, _host_rx) = mpsc::channel(4);
        let lobby = directory.create_lobby(
            "Evening Skirmish".into(),
            "vanilla".into(),
            password.map(str::to_string),
            ParticipantId(1),
            host_tx,
        );
        (directory, lobby)
    }

    #[test]
    fn test_summaries_count_host_and_members() {
        let (directory, lobby) = directory_with_lobby(Some("hunter2"));
        let (member, _rx) = handle(2);
        assert!(directory.add_member(lobby, 7, member));

        let summaries = directory.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].lobby, lobby);
        assert_eq!(summaries[0].players, 2);
        assert!(summaries[0].has_password);
    }

    #[test]
    fn test_screen_join_rejections() {
        let (directory, lobby) = directory_with_lobby(Some("hunter2"));
        let (member, _rx) = handle(2);
        directory.add_member(lobby, 7, member);

        assert_eq!(
            directory.screen_join(LobbyId::new(), None, ParticipantId(3)),
            Err(RejectReason::UnknownLobby)
        );
        assert_eq!(
            directory.screen_join(lobby, Some("wrong"), ParticipantId(3)),
            Err(RejectReason::BadPassword)
        );
        assert_eq!(
            directory.screen_join(lobby, Some("hunter2"), ParticipantId(1)),
            Err(RejectReason::DuplicateParticipant)
        );
        assert_eq!(
            directory.screen_join(lobby, Some("hunter2"), ParticipantId(2)),
            Err(RejectReason::DuplicateParticipant)
        );
        assert_eq!(
            directory.screen_join(lobby, Some("hunter2"), ParticipantId(3)),
            Ok(())
        );
    }

    #[test]
    fn test_open_lobby_ignores_a_supplied_password() {
        let (directory, lobby) = directory_with_lobby(None);
        assert_eq!(
            directory.screen_join(lobby, Some("anything"), ParticipantId(2)),
            Ok(())
        );
    }

    #[test]
    fn test_pending_round_trip() {
        let (directory, lobby) = directory_with_lobby(None);
        let seq = directory
            .next_host_seq(
                lobby,
                PendingOrigin::Member {
                    client: 7,
                    seq: 40,
                    call: None,
                },
            )
            .unwrap();

        match directory.take_pending(lobby, seq) {
            Some(PendingOrigin::Member { client, seq, .. }) => {
                assert_eq!(client, 7);
                assert_eq!(seq, 40);
            }
            _ => panic!("expected the member origin back"),
        }
        assert!(directory.take_pending(lobby, seq).is_none());
    }

    #[test]
    fn test_fanout_lists_exclude_the_caller() {
        let (directory, lobby) = directory_with_lobby(None);
        let (first, _rx1) = handle(2);
        let (second, _rx2) = handle(3);
        directory.add_member(lobby, 7, first);
        directory.add_member(lobby, 8, second);

        assert_eq!(directory.member_txs(lobby, None).len(), 2);
        assert_eq!(directory.member_txs(lobby, Some(7)).len(), 1);

        assert!(directory.remove_member(lobby, 7).is_some());
        assert!(directory.remove_member(lobby, 7).is_none());
        assert_eq!(directory.member_txs(lobby, None).len(), 1);
    }
}
