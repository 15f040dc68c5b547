//! Entity id to proxy map, kept fresh by pushes.
//!
//! The welcome snapshot seeds a proxy per entity it names; participant
//! proxies for later joiners appear when their join push arrives. Pushes
//! aimed at ids the registry never saw are dropped, the state shows up on
//! the next fetch instead.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use skirmish_core::LobbyEvent;
use skirmish_proto::{
    CompanyRef, DispatchCall, LobbyCall, LobbyMeta, LobbySnapshot, ObjectId, Occupant,
    ParticipantId, SlotAddr, SlotSnapshot, SlotState, TeamMeta,
};

use crate::dispatch::Dispatcher;
use crate::proxy::{RemoteLobby, RemoteParticipant, RemoteSlot, RemoteTeam};

pub(crate) struct ObjectRegistry {
    ttl: Duration,
    dispatcher: Arc<Dispatcher>,
    lobby: RwLock<Option<Arc<RemoteLobby>>>,
    teams: RwLock<Vec<Arc<RemoteTeam>>>,
    slots: RwLock<HashMap<ObjectId, Arc<RemoteSlot>>>,
    participants: RwLock<HashMap<ObjectId, Arc<RemoteParticipant>>>,
}

impl ObjectRegistry {
    pub fn new(ttl: Duration, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            ttl,
            dispatcher,
            lobby: RwLock::default(),
            teams: RwLock::default(),
            slots: RwLock::default(),
            participants: RwLock::default(),
        }
    }

    /// Build the proxy graph from the admission snapshot, caches pre-warmed.
    pub fn seed(&self, snapshot: &LobbySnapshot) {
        let lobby = Arc::new(RemoteLobby::new(
            snapshot.entity,
            self.ttl,
            Arc::clone(&self.dispatcher),
        ));
        lobby.seed(LobbyMeta {
            name: snapshot.name.clone(),
            game_id: snapshot.game_id.clone(),
            host: snapshot.host,
            settings: snapshot.settings.clone(),
            ready: snapshot.ready.clone(),
        });
        *self.lobby.write() = Some(lobby);

        let mut teams = self.teams.write();
        let mut slots = self.slots.write();
        let mut participants = self.participants.write();
        teams.clear();
        slots.clear();
        participants.clear();

        for team in &snapshot.teams {
            let slot_ids = team.slots.each_ref().map(|slot| slot.entity);
            let proxy = Arc::new(RemoteTeam::new(
                team.entity,
                team.index,
                slot_ids,
                self.ttl,
                Arc::clone(&self.dispatcher),
            ));
            proxy.seed(TeamMeta {
                name: team.name.clone(),
                capacity: team.capacity,
            });
            teams.push(proxy);

            for slot in &team.slots {
                let addr = SlotAddr {
                    team: team.index,
                    slot: slot.index,
                };
                let proxy = Arc::new(RemoteSlot::new(
                    slot.entity,
                    addr,
                    self.ttl,
                    Arc::clone(&self.dispatcher),
                ));
                proxy.seed(slot.clone());
                slots.insert(slot.entity, proxy);

                if let Some(Occupant::Human(info)) = &slot.occupant {
                    let proxy = Arc::new(RemoteParticipant::new(
                        info.entity,
                        info.participant,
                        self.ttl,
                        Arc::clone(&self.dispatcher),
                    ));
                    proxy.seed(info.clone());
                    participants.insert(info.entity, proxy);
                }
            }
        }
    }

    pub fn lobby(&self) -> Option<Arc<RemoteLobby>> {
        self.lobby.read().clone()
    }

    pub fn team_by_index(&self, index: u8) -> Option<Arc<RemoteTeam>> {
        self.teams
            .read()
            .iter()
            .find(|team| team.index() == index)
            .cloned()
    }

    fn team(&self, entity: ObjectId) -> Option<Arc<RemoteTeam>> {
        self.teams
            .read()
            .iter()
            .find(|team| team.entity() == entity)
            .cloned()
    }

    pub fn slot(&self, entity: ObjectId) -> Option<Arc<RemoteSlot>> {
        self.slots.read().get(&entity).cloned()
    }

    pub fn slot_at(&self, addr: SlotAddr) -> Option<Arc<RemoteSlot>> {
        let team = self.team_by_index(addr.team)?;
        let entity = *team.slot_entities().get(addr.slot as usize)?;
        self.slot(entity)
    }

    pub fn participant(&self, entity: ObjectId) -> Option<Arc<RemoteParticipant>> {
        self.participants.read().get(&entity).cloned()
    }

    /// Participant proxy, created empty on first reference.
    pub fn get_or_create_participant(
        &self,
        entity: ObjectId,
        participant: ParticipantId,
    ) -> Arc<RemoteParticipant> {
        if let Some(existing) = self.participant(entity) {
            return existing;
        }
        let proxy = Arc::new(RemoteParticipant::new(
            entity,
            participant,
            self.ttl,
            Arc::clone(&self.dispatcher),
        ));
        self.participants
            .write()
            .entry(entity)
            .or_insert(proxy)
            .clone()
    }

    /// Replay an accepted mutation against the cached graph.
    ///
    /// This runs for pushes from other participants and for the local
    /// participant's own acknowledged calls, so both sides converge on the
    /// same cache content without waiting out the TTL.
    pub fn apply_invoked(&self, call: &DispatchCall) -> Vec<LobbyEvent> {
        match &call.call {
            LobbyCall::LockSlot => self.apply_to_slot(call.target, |snapshot| {
                snapshot.state = SlotState::Locked;
            }),
            LobbyCall::UnlockSlot => self.apply_to_slot(call.target, |snapshot| {
                snapshot.state = SlotState::Open;
            }),
            LobbyCall::SetDifficulty { difficulty } => {
                let difficulty = *difficulty;
                self.apply_to_slot(call.target, move |snapshot| {
                    if difficulty.is_ai() {
                        snapshot.state = SlotState::Occupied;
                        snapshot.occupant = Some(Occupant::Ai { difficulty });
                    } else {
                        snapshot.state = SlotState::Open;
                        snapshot.occupant = None;
                    }
                })
            }
            LobbyCall::RemoveOccupant => self.apply_remove(call.target),
            LobbyCall::SwapSlots { first, second } => self.apply_swap(call.target, *first, *second),
            LobbyCall::ResizeTeam { capacity } => self.apply_resize(call.target, *capacity),
            LobbyCall::SetSetting { key, value } => self.apply_to_lobby(
                call.target,
                |meta| {
                    meta.settings.insert(key.clone(), value.clone());
                },
                LobbyEvent::SettingChanged {
                    key: key.clone(),
                    value: value.clone(),
                },
            ),
            LobbyCall::SetTeamName { name } => match self.team(call.target) {
                Some(team) => {
                    team.update(|meta| meta.name = name.clone());
                    vec![LobbyEvent::TeamChanged { team: team.index() }]
                }
                None => {
                    tracing::trace!(entity = %call.target, "Push for unknown team dropped");
                    Vec::new()
                }
            },
            LobbyCall::SendChat { sender, text } => vec![LobbyEvent::Chat {
                sender: *sender,
                text: text.clone(),
            }],
            LobbyCall::SignalReady { participant, ready } => self.apply_to_lobby(
                call.target,
                |meta| {
                    if *ready {
                        meta.ready.insert(*participant);
                    } else {
                        meta.ready.remove(participant);
                    }
                },
                LobbyEvent::ReadyChanged {
                    participant: *participant,
                    ready: *ready,
                },
            ),
            LobbyCall::SetCompany { company } => self.apply_company(call.target, company),
        }
    }

    /// A joiner was seated: pre-warm the slot and participant proxies.
    pub fn apply_joined(
        &self,
        participant: ParticipantId,
        addr: SlotAddr,
        occupant: &Occupant,
    ) -> Vec<LobbyEvent> {
        let Some(slot) = self.slot_at(addr) else {
            tracing::trace!(%participant, %addr, "Join push for unknown slot dropped");
            return Vec::new();
        };
        slot.update(|snapshot| {
            snapshot.state = SlotState::Occupied;
            snapshot.occupant = Some(occupant.clone());
        });
        if let Occupant::Human(info) = occupant {
            self.get_or_create_participant(info.entity, info.participant)
                .seed(info.clone());
        }
        vec![LobbyEvent::ParticipantJoined { participant, addr }]
    }

    /// A participant left: open their slot and drop their proxy.
    pub fn apply_left(&self, participant: ParticipantId, addr: SlotAddr) -> Vec<LobbyEvent> {
        if let Some(slot) = self.slot_at(addr) {
            slot.update(|snapshot| {
                snapshot.state = SlotState::Open;
                snapshot.occupant = None;
            });
        }
        self.participants
            .write()
            .retain(|_, proxy| proxy.participant() != participant);
        if let Some(lobby) = self.lobby() {
            lobby.update(|meta| {
                meta.ready.remove(&participant);
            });
        }
        vec![LobbyEvent::ParticipantLeft { participant, addr }]
    }

    pub fn clear(&self) {
        *self.lobby.write() = None;
        self.teams.write().clear();
        self.slots.write().clear();
        self.participants.write().clear();
    }

    fn apply_to_slot(
        &self,
        target: ObjectId,
        mutate: impl FnOnce(&mut SlotSnapshot),
    ) -> Vec<LobbyEvent> {
        match self.slot(target) {
            Some(slot) => {
                slot.update(mutate);
                vec![LobbyEvent::SlotChanged { addr: slot.addr() }]
            }
            None => {
                tracing::trace!(entity = %target, "Push for unknown slot dropped");
                Vec::new()
            }
        }
    }

    fn apply_to_lobby(
        &self,
        target: ObjectId,
        mutate: impl FnOnce(&mut LobbyMeta),
        event: LobbyEvent,
    ) -> Vec<LobbyEvent> {
        match self.lobby() {
            Some(lobby) if lobby.entity() == target => {
                lobby.update(mutate);
                vec![event]
            }
            _ => {
                tracing::trace!(entity = %target, "Push for unknown lobby dropped");
                Vec::new()
            }
        }
    }

    fn apply_remove(&self, target: ObjectId) -> Vec<LobbyEvent> {
        let Some(slot) = self.slot(target) else {
            tracing::trace!(entity = %target, "Push for unknown slot dropped");
            return Vec::new();
        };
        let prior = slot.peek().and_then(|snapshot| snapshot.occupant);
        slot.update(|snapshot| {
            snapshot.state = SlotState::Open;
            snapshot.occupant = None;
        });

        let mut events = vec![LobbyEvent::SlotChanged { addr: slot.addr() }];
        if let Some(Occupant::Human(info)) = prior {
            self.participants.write().remove(&info.entity);
            if let Some(lobby) = self.lobby() {
                lobby.update(|meta| {
                    meta.ready.remove(&info.participant);
                });
            }
            events.push(LobbyEvent::ParticipantLeft {
                participant: info.participant,
                addr: slot.addr(),
            });
        }
        events
    }

    fn apply_swap(&self, target: ObjectId, first: u8, second: u8) -> Vec<LobbyEvent> {
        let Some(team) = self.team(target) else {
            tracing::trace!(entity = %target, "Push for unknown team dropped");
            return Vec::new();
        };
        let entities = team.slot_entities();
        let (Some(&a), Some(&b)) = (entities.get(first as usize), entities.get(second as usize))
        else {
            return Vec::new();
        };
        let (Some(slot_a), Some(slot_b)) = (self.slot(a), self.slot(b)) else {
            return Vec::new();
        };

        match (slot_a.peek(), slot_b.peek()) {
            (Some(cached_a), Some(cached_b)) => {
                slot_a.update(|snapshot| {
                    snapshot.state = cached_b.state;
                    snapshot.occupant = cached_b.occupant.clone();
                });
                slot_b.update(|snapshot| {
                    snapshot.state = cached_a.state;
                    snapshot.occupant = cached_a.occupant.clone();
                });
            }
            // half the pair is unknown; refetch both rather than guess
            _ => {
                slot_a.invalidate();
                slot_b.invalidate();
            }
        }
        vec![
            LobbyEvent::SlotChanged { addr: slot_a.addr() },
            LobbyEvent::SlotChanged { addr: slot_b.addr() },
        ]
    }

    fn apply_resize(&self, target: ObjectId, capacity: u8) -> Vec<LobbyEvent> {
        let Some(team) = self.team(target) else {
            tracing::trace!(entity = %target, "Push for unknown team dropped");
            return Vec::new();
        };
        team.update(|meta| meta.capacity = capacity);

        // Occupants migrate between slots during a resize; refetching the
        // slot row is simpler than replaying the migration here.
        let mut events = vec![LobbyEvent::TeamChanged { team: team.index() }];
        for entity in team.slot_entities() {
            if let Some(slot) = self.slot(entity) {
                slot.invalidate();
                events.push(LobbyEvent::SlotChanged { addr: slot.addr() });
            }
        }
        events
    }

    fn apply_company(&self, target: ObjectId, company: &Option<CompanyRef>) -> Vec<LobbyEvent> {
        let mut participant = None;
        if let Some(proxy) = self.participant(target) {
            let assigned = company.clone();
            proxy.update(move |info| info.company = assigned);
            participant = Some(proxy.participant());
        }

        // Slot caches carry the occupant's company too; keep them in step.
        let slots: Vec<_> = self.slots.read().values().cloned().collect();
        for slot in slots {
            let held = slot.peek().and_then(|snapshot| match snapshot.occupant {
                Some(Occupant::Human(info)) if info.entity == target => Some(info.participant),
                _ => None,
            });
            let Some(holder) = held else { continue };
            participant.get_or_insert(holder);
            let assigned = company.clone();
            slot.update(move |snapshot| {
                if let Some(Occupant::Human(info)) = snapshot.occupant.as_mut() {
                    info.company = assigned;
                }
            });
        }

        match participant {
            Some(participant) => vec![LobbyEvent::CompanyChanged { participant }],
            None => {
                tracing::trace!(entity = %target, "Push for unknown participant dropped");
                Vec::new()
            }
        }
    }
}
