//! One interface over local and remote lobby entities.
//!
//! Every handle is a tagged pair: either it wraps the authoritative graph
//! owned by this process, or a proxy onto the host's copy. Callers cannot
//! tell which they hold short of asking [`LobbyHandle::is_local`]; reads
//! and mutations behave identically, only their latency differs.
//!
//! Mutations on the local side apply immediately and queue the push for
//! the relay; on the remote side they dispatch to the host and, once
//! acknowledged as a change, replay against the caches so the caller
//! reads its own write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use skirmish_core::{Applied, CallError, LobbyEvent, LocalLobby};
use skirmish_proto::{
    AiDifficulty, CompanyRef, DispatchCall, EntitySnapshot, HumanInfo, LobbyCall, ObjectId,
    Occupant, ParticipantId, PushBody, SlotAddr, SlotState,
};
use tokio::sync::{broadcast, mpsc};

use crate::dispatch::Dispatcher;
use crate::error::{LobbyError, RequestError};
use crate::proxy::{RemoteLobby, RemoteParticipant, RemoteSlot, RemoteTeam};
use crate::registry::ObjectRegistry;

/// Host-to-relay traffic produced by local mutations.
pub(crate) enum Uplink {
    Broadcast(PushBody),
    Evict(ParticipantId),
}

/// The authoritative side of a hosted or offline session.
pub(crate) struct LocalAuthority {
    pub lobby: Mutex<LocalLobby>,
    pub events: broadcast::Sender<LobbyEvent>,
    /// `None` in offline play.
    pub uplink: Option<mpsc::Sender<Uplink>>,
    pub me: ParticipantId,
}

impl LocalAuthority {
    pub fn read<R>(&self, read: impl FnOnce(&LocalLobby) -> R) -> R {
        read(&self.lobby.lock())
    }

    /// Apply one call as the local participant. A change queues the push
    /// for the relay and evicts whoever the call unseated.
    pub fn apply(&self, call: DispatchCall) -> Result<bool, CallError> {
        let applied = self.lobby.lock().apply_call(self.me, &call)?;
        if !applied.changed {
            return Ok(false);
        }
        for event in applied.events {
            let _ = self.events.send(event);
        }
        self.send_uplink(Uplink::Broadcast(PushBody::Invoked(call)));
        for participant in applied.kicked {
            self.send_uplink(Uplink::Evict(participant));
        }
        Ok(true)
    }

    /// Apply a relayed member call. Fan-out and eviction stay with the
    /// relay here, it learns the outcome from the response.
    pub fn apply_forwarded(
        &self,
        from: ParticipantId,
        call: &DispatchCall,
    ) -> Result<Applied, CallError> {
        let applied = self.lobby.lock().apply_call(from, call)?;
        for event in &applied.events {
            let _ = self.events.send(event.clone());
        }
        Ok(applied)
    }

    fn send_uplink(&self, item: Uplink) {
        let Some(uplink) = &self.uplink else { return };
        match uplink.try_send(item) {
            Ok(()) => {}
            // session is shutting down, nobody left to tell
            Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::error!("Uplink queue overflow, members will refetch after their TTL");
            }
        }
    }
}

/// Everything a remote handle needs besides its own proxy.
pub(crate) struct RemoteShared {
    pub registry: ObjectRegistry,
    pub dispatcher: Arc<Dispatcher>,
    pub events: broadcast::Sender<LobbyEvent>,
    pub me: ParticipantId,
}

impl RemoteShared {
    /// Dispatch one call to the host. On an acknowledged change, replay it
    /// into the caches so the caller immediately reads its own write.
    pub async fn dispatch(&self, call: DispatchCall) -> Result<bool, RequestError> {
        let changed = self.dispatcher.dispatch(call.clone()).await?;
        if changed {
            for event in self.registry.apply_invoked(&call) {
                let _ = self.events.send(event);
            }
        }
        Ok(changed)
    }
}

/// Entry point to one lobby.
#[derive(Clone)]
pub struct LobbyHandle {
    inner: LobbyInner,
}

#[derive(Clone)]
enum LobbyInner {
    Local(Arc<LocalAuthority>),
    Remote {
        proxy: Arc<RemoteLobby>,
        shared: Arc<RemoteShared>,
    },
}

impl LobbyHandle {
    pub(crate) fn local(authority: Arc<LocalAuthority>) -> Self {
        Self {
            inner: LobbyInner::Local(authority),
        }
    }

    pub(crate) fn remote(proxy: Arc<RemoteLobby>, shared: Arc<RemoteShared>) -> Self {
        Self {
            inner: LobbyInner::Remote { proxy, shared },
        }
    }

    /// Whether this process owns the authoritative graph.
    pub fn is_local(&self) -> bool {
        matches!(self.inner, LobbyInner::Local(_))
    }

    pub fn entity(&self) -> ObjectId {
        match &self.inner {
            LobbyInner::Local(authority) => authority.read(LocalLobby::entity),
            LobbyInner::Remote { proxy, .. } => proxy.entity(),
        }
    }

    pub async fn name(&self) -> Result<String, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => Ok(authority.read(|lobby| lobby.name().to_string())),
            LobbyInner::Remote { proxy, .. } => Ok(proxy.meta().await?.name.clone()),
        }
    }

    pub async fn game_id(&self) -> Result<String, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => {
                Ok(authority.read(|lobby| lobby.game_id().to_string()))
            }
            LobbyInner::Remote { proxy, .. } => Ok(proxy.meta().await?.game_id.clone()),
        }
    }

    pub async fn host(&self) -> Result<ParticipantId, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => Ok(authority.read(LocalLobby::host)),
            LobbyInner::Remote { proxy, .. } => Ok(proxy.meta().await?.host),
        }
    }

    pub async fn setting(&self, key: &str) -> Result<Option<String>, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => {
                Ok(authority.read(|lobby| lobby.setting(key).map(str::to_string)))
            }
            LobbyInner::Remote { proxy, .. } => {
                Ok(proxy.meta().await?.settings.get(key).cloned())
            }
        }
    }

    pub async fn settings(&self) -> Result<BTreeMap<String, String>, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => Ok(authority.read(|lobby| lobby.settings().clone())),
            LobbyInner::Remote { proxy, .. } => Ok(proxy.meta().await?.settings.clone()),
        }
    }

    pub async fn ready_participants(&self) -> Result<BTreeSet<ParticipantId>, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => Ok(authority.read(|lobby| lobby.meta().ready)),
            LobbyInner::Remote { proxy, .. } => Ok(proxy.meta().await?.ready.clone()),
        }
    }

    pub async fn is_ready(&self, participant: ParticipantId) -> Result<bool, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => {
                Ok(authority.read(|lobby| lobby.is_ready(participant)))
            }
            LobbyInner::Remote { proxy, .. } => {
                Ok(proxy.meta().await?.ready.contains(&participant))
            }
        }
    }

    pub fn team(&self, index: u8) -> Result<TeamHandle, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => {
                let entity = authority.read(|lobby| lobby.team(index).map(|team| team.entity()))?;
                Ok(TeamHandle {
                    inner: TeamInner::Local {
                        authority: Arc::clone(authority),
                        index,
                        entity,
                    },
                })
            }
            LobbyInner::Remote { shared, .. } => {
                let proxy = shared
                    .registry
                    .team_by_index(index)
                    .ok_or(CallError::SlotIndexOutOfRange(index))?;
                Ok(TeamHandle {
                    inner: TeamInner::Remote {
                        proxy,
                        shared: Arc::clone(shared),
                    },
                })
            }
        }
    }

    /// Find a seated human anywhere in the lobby.
    pub async fn participant(
        &self,
        participant: ParticipantId,
    ) -> Result<Option<ParticipantHandle>, LobbyError> {
        for team_index in 0..2u8 {
            let team = self.team(team_index)?;
            for slot_index in 0..4u8 {
                let slot = team.slot(slot_index)?;
                if let Some(OccupantView::Human(handle)) = slot.occupant_view().await? {
                    if handle.participant() == participant {
                        return Ok(Some(handle));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Write one free-form setting. Host only.
    pub async fn set_setting(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, LobbyError> {
        let call = LobbyCall::SetSetting {
            key: key.into(),
            value: value.into(),
        };
        self.apply(call).await
    }

    /// Broadcast a chat line as the local participant.
    pub async fn send_chat(&self, text: impl Into<String>) -> Result<bool, LobbyError> {
        let sender = self.me();
        self.apply(LobbyCall::SendChat {
            sender,
            text: text.into(),
        })
        .await
    }

    /// Mark the local participant ready or not ready.
    pub async fn signal_ready(&self, ready: bool) -> Result<bool, LobbyError> {
        let participant = self.me();
        self.apply(LobbyCall::SignalReady { participant, ready }).await
    }

    fn me(&self) -> ParticipantId {
        match &self.inner {
            LobbyInner::Local(authority) => authority.me,
            LobbyInner::Remote { shared, .. } => shared.me,
        }
    }

    async fn apply(&self, call: LobbyCall) -> Result<bool, LobbyError> {
        match &self.inner {
            LobbyInner::Local(authority) => {
                let target = authority.read(LocalLobby::entity);
                Ok(authority.apply(DispatchCall::new(target, call))?)
            }
            LobbyInner::Remote { proxy, shared } => {
                Ok(shared.dispatch(DispatchCall::new(proxy.entity(), call)).await?)
            }
        }
    }
}

/// One side of the lobby.
#[derive(Clone)]
pub struct TeamHandle {
    inner: TeamInner,
}

#[derive(Clone)]
enum TeamInner {
    Local {
        authority: Arc<LocalAuthority>,
        index: u8,
        entity: ObjectId,
    },
    Remote {
        proxy: Arc<RemoteTeam>,
        shared: Arc<RemoteShared>,
    },
}

impl TeamHandle {
    pub fn index(&self) -> u8 {
        match &self.inner {
            TeamInner::Local { index, .. } => *index,
            TeamInner::Remote { proxy, .. } => proxy.index(),
        }
    }

    pub fn entity(&self) -> ObjectId {
        match &self.inner {
            TeamInner::Local { entity, .. } => *entity,
            TeamInner::Remote { proxy, .. } => proxy.entity(),
        }
    }

    pub async fn name(&self) -> Result<String, LobbyError> {
        match &self.inner {
            TeamInner::Local {
                authority, index, ..
            } => Ok(authority.read(|lobby| -> Result<String, CallError> {
                Ok(lobby.team(*index)?.name().to_string())
            })?),
            TeamInner::Remote { proxy, .. } => Ok(proxy.meta().await?.name),
        }
    }

    pub async fn capacity(&self) -> Result<u8, LobbyError> {
        match &self.inner {
            TeamInner::Local {
                authority, index, ..
            } => Ok(authority.read(|lobby| -> Result<u8, CallError> {
                Ok(lobby.team(*index)?.capacity())
            })?),
            TeamInner::Remote { proxy, .. } => Ok(proxy.meta().await?.capacity),
        }
    }

    pub fn slot(&self, index: u8) -> Result<SlotHandle, LobbyError> {
        match &self.inner {
            TeamInner::Local {
                authority,
                index: team_index,
                ..
            } => {
                let entity = authority.read(|lobby| -> Result<ObjectId, CallError> {
                    Ok(lobby.team(*team_index)?.slot(index)?.entity())
                })?;
                Ok(SlotHandle {
                    inner: SlotInner::Local {
                        authority: Arc::clone(authority),
                        addr: SlotAddr {
                            team: *team_index,
                            slot: index,
                        },
                        entity,
                    },
                })
            }
            TeamInner::Remote { proxy, shared } => {
                let entity = *proxy
                    .slot_entities()
                    .get(index as usize)
                    .ok_or(CallError::SlotIndexOutOfRange(index))?;
                let slot = shared
                    .registry
                    .slot(entity)
                    .ok_or(CallError::UnknownTarget(entity))?;
                Ok(SlotHandle {
                    inner: SlotInner::Remote {
                        proxy: slot,
                        shared: Arc::clone(shared),
                    },
                })
            }
        }
    }

    /// Rename the team. Host only.
    pub async fn set_name(&self, name: impl Into<String>) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::SetTeamName { name: name.into() }).await
    }

    /// Change the playable slot count. Host only.
    pub async fn resize(&self, capacity: u8) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::ResizeTeam { capacity }).await
    }

    /// Exchange two slots, occupants and states together. Host only.
    pub async fn swap_slots(&self, first: u8, second: u8) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::SwapSlots { first, second }).await
    }

    async fn apply(&self, call: LobbyCall) -> Result<bool, LobbyError> {
        match &self.inner {
            TeamInner::Local {
                authority, entity, ..
            } => Ok(authority.apply(DispatchCall::new(*entity, call))?),
            TeamInner::Remote { proxy, shared } => {
                Ok(shared.dispatch(DispatchCall::new(proxy.entity(), call)).await?)
            }
        }
    }
}

/// What occupies a slot, resolvable to a participant handle for humans.
pub enum OccupantView {
    Human(ParticipantHandle),
    Ai { difficulty: AiDifficulty },
}

/// One seat in a team.
#[derive(Clone)]
pub struct SlotHandle {
    inner: SlotInner,
}

#[derive(Clone)]
enum SlotInner {
    Local {
        authority: Arc<LocalAuthority>,
        addr: SlotAddr,
        entity: ObjectId,
    },
    Remote {
        proxy: Arc<RemoteSlot>,
        shared: Arc<RemoteShared>,
    },
}

impl SlotHandle {
    pub fn addr(&self) -> SlotAddr {
        match &self.inner {
            SlotInner::Local { addr, .. } => *addr,
            SlotInner::Remote { proxy, .. } => proxy.addr(),
        }
    }

    pub fn entity(&self) -> ObjectId {
        match &self.inner {
            SlotInner::Local { entity, .. } => *entity,
            SlotInner::Remote { proxy, .. } => proxy.entity(),
        }
    }

    pub async fn state(&self) -> Result<SlotState, LobbyError> {
        match &self.inner {
            SlotInner::Local {
                authority, addr, ..
            } => Ok(authority.read(|lobby| -> Result<SlotState, CallError> {
                Ok(lobby.team(addr.team)?.slot(addr.slot)?.state())
            })?),
            SlotInner::Remote { proxy, .. } => Ok(proxy.snapshot().await?.state),
        }
    }

    pub async fn occupant(&self) -> Result<Option<Occupant>, LobbyError> {
        match &self.inner {
            SlotInner::Local {
                authority, addr, ..
            } => Ok(
                authority.read(|lobby| -> Result<Option<Occupant>, CallError> {
                    Ok(lobby.team(addr.team)?.slot(addr.slot)?.occupant().cloned())
                })?,
            ),
            SlotInner::Remote { proxy, .. } => Ok(proxy.snapshot().await?.occupant),
        }
    }

    /// Occupant with humans resolved to their participant handle.
    pub async fn occupant_view(&self) -> Result<Option<OccupantView>, LobbyError> {
        let Some(occupant) = self.occupant().await? else {
            return Ok(None);
        };
        match occupant {
            Occupant::Ai { difficulty } => Ok(Some(OccupantView::Ai { difficulty })),
            Occupant::Human(info) => {
                let handle = match &self.inner {
                    SlotInner::Local { authority, .. } => ParticipantHandle {
                        inner: ParticipantInner::Local {
                            authority: Arc::clone(authority),
                            entity: info.entity,
                            participant: info.participant,
                        },
                    },
                    SlotInner::Remote { shared, .. } => {
                        let proxy = shared
                            .registry
                            .get_or_create_participant(info.entity, info.participant);
                        ParticipantHandle {
                            inner: ParticipantInner::Remote {
                                proxy,
                                shared: Arc::clone(shared),
                            },
                        }
                    }
                };
                Ok(Some(OccupantView::Human(handle)))
            }
        }
    }

    /// Close this slot to joiners. Host only.
    pub async fn lock(&self) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::LockSlot).await
    }

    /// Reopen a locked slot. Host only.
    pub async fn unlock(&self) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::UnlockSlot).await
    }

    /// Kick a human or delete an AI. Host only.
    pub async fn remove_occupant(&self) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::RemoveOccupant).await
    }

    /// Seat, retune, or remove an AI occupant. Host only.
    pub async fn set_difficulty(&self, difficulty: AiDifficulty) -> Result<bool, LobbyError> {
        self.apply(LobbyCall::SetDifficulty { difficulty }).await
    }

    async fn apply(&self, call: LobbyCall) -> Result<bool, LobbyError> {
        match &self.inner {
            SlotInner::Local {
                authority, entity, ..
            } => Ok(authority.apply(DispatchCall::new(*entity, call))?),
            SlotInner::Remote { proxy, shared } => {
                Ok(shared.dispatch(DispatchCall::new(proxy.entity(), call)).await?)
            }
        }
    }
}

/// A seated human.
#[derive(Clone)]
pub struct ParticipantHandle {
    inner: ParticipantInner,
}

#[derive(Clone)]
enum ParticipantInner {
    Local {
        authority: Arc<LocalAuthority>,
        entity: ObjectId,
        participant: ParticipantId,
    },
    Remote {
        proxy: Arc<RemoteParticipant>,
        shared: Arc<RemoteShared>,
    },
}

impl ParticipantHandle {
    pub fn entity(&self) -> ObjectId {
        match &self.inner {
            ParticipantInner::Local { entity, .. } => *entity,
            ParticipantInner::Remote { proxy, .. } => proxy.entity(),
        }
    }

    pub fn participant(&self) -> ParticipantId {
        match &self.inner {
            ParticipantInner::Local { participant, .. } => *participant,
            ParticipantInner::Remote { proxy, .. } => proxy.participant(),
        }
    }

    pub async fn info(&self) -> Result<HumanInfo, LobbyError> {
        match &self.inner {
            ParticipantInner::Local {
                authority, entity, ..
            } => Ok(
                authority.read(|lobby| -> Result<HumanInfo, CallError> {
                    match lobby.entity_snapshot(*entity) {
                        Some(EntitySnapshot::Participant(info)) => Ok(info),
                        _ => Err(CallError::UnknownTarget(*entity)),
                    }
                })?,
            ),
            ParticipantInner::Remote { proxy, .. } => Ok(proxy.info().await?),
        }
    }

    pub async fn name(&self) -> Result<String, LobbyError> {
        Ok(self.info().await?.name)
    }

    pub async fn company(&self) -> Result<Option<CompanyRef>, LobbyError> {
        Ok(self.info().await?.company)
    }

    /// Assign or clear this seat's company. Own seat only.
    pub async fn set_company(&self, company: Option<CompanyRef>) -> Result<bool, LobbyError> {
        let call = LobbyCall::SetCompany { company };
        match &self.inner {
            ParticipantInner::Local {
                authority, entity, ..
            } => Ok(authority.apply(DispatchCall::new(*entity, call))?),
            ParticipantInner::Remote { proxy, shared } => Ok(shared
                .dispatch(DispatchCall::new(proxy.entity(), call))
                .await?),
        }
    }
}
