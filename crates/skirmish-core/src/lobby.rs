use std::collections::{BTreeMap, BTreeSet};

use skirmish_proto::{
    AiDifficulty, DispatchCall, EntitySnapshot, HumanInfo, LobbyCall, LobbyId, LobbyMeta,
    LobbySnapshot, ObjectId, Occupant, ParticipantId, SlotAddr, SlotState,
};

use crate::error::CallError;
use crate::event::LobbyEvent;
use crate::team::Team;

/// Default team labels, index 0 and 1.
pub const DEFAULT_TEAM_NAMES: [&str; 2] = ["Allies", "Axis"];

/// Startup parameters of a hosted or offline lobby.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    pub name: String,
    pub game_id: String,
    pub host: ParticipantId,
    pub host_name: String,
}

/// Result of applying one call to the graph.
///
/// `changed` drives notification fan-out: an application that changed
/// nothing must not produce a push or an event. `kicked` lists humans the
/// call unseated, so the relay can drop their connections.
#[derive(Debug, Clone, Default)]
pub struct Applied {
    pub changed: bool,
    pub kicked: Vec<ParticipantId>,
    pub events: Vec<LobbyEvent>,
}

impl Applied {
    fn unchanged() -> Self {
        Self::default()
    }

    fn changed_with(events: Vec<LobbyEvent>) -> Self {
        Self {
            changed: true,
            kicked: Vec::new(),
            events,
        }
    }
}

#[derive(Debug, Clone)]
struct IdMint(u32);

impl IdMint {
    fn new() -> Self {
        Self(1)
    }

    fn mint(&mut self) -> ObjectId {
        let id = ObjectId(self.0);
        self.0 += 1;
        id
    }
}

enum Target {
    Lobby,
    Team(u8),
    Slot(SlotAddr),
    Participant(SlotAddr),
}

/// The authoritative lobby graph.
///
/// Exactly one process runs this per lobby: the hosting client, or the only
/// client in offline play. Everyone else holds proxies and talks to it
/// through forwarded calls. All entity ids are minted here.
#[derive(Debug, Clone)]
pub struct LocalLobby {
    entity: ObjectId,
    lobby: LobbyId,
    name: String,
    game_id: String,
    host: ParticipantId,
    teams: [Team; 2],
    settings: BTreeMap<String, String>,
    ready: BTreeSet<ParticipantId>,
    mint: IdMint,
}

impl LocalLobby {
    pub fn new(lobby: LobbyId, config: LobbyConfig) -> Self {
        let mut mint = IdMint::new();
        let entity = mint.mint();
        let teams = [0u8, 1u8].map(|index| {
            Team::new(
                mint.mint(),
                index,
                DEFAULT_TEAM_NAMES[index as usize].to_string(),
                [mint.mint(), mint.mint(), mint.mint(), mint.mint()],
            )
        });

        let mut built = Self {
            entity,
            lobby,
            name: config.name,
            game_id: config.game_id,
            host: config.host,
            teams,
            settings: BTreeMap::new(),
            ready: BTreeSet::new(),
            mint,
        };
        let host_occupant = Occupant::Human(HumanInfo {
            entity: built.mint.mint(),
            participant: config.host,
            name: config.host_name,
            company: None,
        });
        // The host takes the first slot of team 0; a fresh lobby always has
        // it open.
        if let Err(err) = built.teams[0]
            .slot_mut(0)
            .and_then(|slot| slot.seat(host_occupant))
        {
            tracing::warn!(%err, "Could not seat host in a fresh lobby");
        }
        built
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn lobby(&self) -> LobbyId {
        self.lobby
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    pub fn host(&self) -> ParticipantId {
        self.host
    }

    pub fn team(&self, index: u8) -> Result<&Team, CallError> {
        self.teams
            .get(index as usize)
            .ok_or(CallError::SlotIndexOutOfRange(index))
    }

    pub fn teams(&self) -> &[Team; 2] {
        &self.teams
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    pub fn is_ready(&self, participant: ParticipantId) -> bool {
        self.ready.contains(&participant)
    }

    /// All seated humans, host included.
    pub fn human_participants(&self) -> Vec<ParticipantId> {
        self.teams
            .iter()
            .flat_map(|team| team.slots().iter())
            .filter_map(|slot| slot.occupant().and_then(Occupant::participant))
            .collect()
    }

    /// Where a participant sits, if anywhere.
    pub fn find_participant(&self, participant: ParticipantId) -> Option<SlotAddr> {
        self.position(|info| info.participant == participant)
    }

    fn position(&self, matches: impl Fn(&HumanInfo) -> bool) -> Option<SlotAddr> {
        for team in &self.teams {
            for slot in team.slots() {
                if let Some(Occupant::Human(info)) = slot.occupant() {
                    if matches(info) {
                        return Some(SlotAddr {
                            team: team.index(),
                            slot: slot.index(),
                        });
                    }
                }
            }
        }
        None
    }

    fn human_at(&self, addr: SlotAddr) -> Option<&HumanInfo> {
        match self.teams[addr.team as usize]
            .slot(addr.slot)
            .ok()?
            .occupant()
        {
            Some(Occupant::Human(info)) => Some(info),
            _ => None,
        }
    }

    /// Seat a new human in the first open slot, team 0 first. Seating the
    /// same participant twice returns the existing seat.
    pub fn seat_participant(
        &mut self,
        participant: ParticipantId,
        name: String,
    ) -> Result<(SlotAddr, Occupant), CallError> {
        if let Some(addr) = self.find_participant(participant) {
            let occupant = Occupant::Human(self.human_at(addr).cloned().ok_or(CallError::SlotEmpty)?);
            return Ok((addr, occupant));
        }

        let seat = self
            .teams
            .iter()
            .find_map(|team| team.first_open_slot().map(|slot| (team.index(), slot)))
            .ok_or(CallError::LobbyFull)?;

        let occupant = Occupant::Human(HumanInfo {
            entity: self.mint.mint(),
            participant,
            name,
            company: None,
        });
        let addr = SlotAddr {
            team: seat.0,
            slot: seat.1,
        };
        self.teams[addr.team as usize]
            .slot_mut(addr.slot)?
            .seat(occupant.clone())?;
        Ok((addr, occupant))
    }

    /// Clear a participant's slot, dropping their ready mark. Returns the
    /// freed position, or `None` when they were not seated.
    pub fn remove_participant(&mut self, participant: ParticipantId) -> Option<SlotAddr> {
        let addr = self.find_participant(participant)?;
        self.teams[addr.team as usize]
            .slot_mut(addr.slot)
            .ok()?
            .take_occupant();
        self.ready.remove(&participant);
        Some(addr)
    }

    fn resolve(&self, target: ObjectId) -> Option<Target> {
        if target == self.entity {
            return Some(Target::Lobby);
        }
        for team in &self.teams {
            if target == team.entity() {
                return Some(Target::Team(team.index()));
            }
            for slot in team.slots() {
                if target == slot.entity() {
                    return Some(Target::Slot(SlotAddr {
                        team: team.index(),
                        slot: slot.index(),
                    }));
                }
                if let Some(Occupant::Human(info)) = slot.occupant() {
                    if target == info.entity {
                        return Some(Target::Participant(SlotAddr {
                            team: team.index(),
                            slot: slot.index(),
                        }));
                    }
                }
            }
        }
        None
    }

    /// Apply one mutation to the graph, checking the caller's permissions.
    ///
    /// Idempotent applications come back with `changed == false` and no
    /// events, so nothing is fanned out for them.
    pub fn apply_call(
        &mut self,
        caller: ParticipantId,
        call: &DispatchCall,
    ) -> Result<Applied, CallError> {
        tracing::debug!(entity = %call.target, label = call.call.label(), %caller, "Applying lobby call");
        let target = self
            .resolve(call.target)
            .ok_or(CallError::UnknownTarget(call.target))?;
        let is_host = caller == self.host;

        match (&call.call, target) {
            (LobbyCall::LockSlot, Target::Slot(addr)) => {
                self.require_host(is_host, "lock-slot")?;
                let changed = self.teams[addr.team as usize].slot_mut(addr.slot)?.lock()?;
                Ok(if changed {
                    Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }])
                } else {
                    Applied::unchanged()
                })
            }
            (LobbyCall::UnlockSlot, Target::Slot(addr)) => {
                self.require_host(is_host, "unlock-slot")?;
                let changed = self.teams[addr.team as usize]
                    .slot_mut(addr.slot)?
                    .unlock()?;
                Ok(if changed {
                    Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }])
                } else {
                    Applied::unchanged()
                })
            }
            (LobbyCall::SetDifficulty { difficulty }, Target::Slot(addr)) => {
                self.require_host(is_host, "set-difficulty")?;
                self.set_difficulty(addr, *difficulty)
            }
            (LobbyCall::RemoveOccupant, Target::Slot(addr)) => {
                self.require_host(is_host, "remove-occupant")?;
                self.remove_occupant(addr)
            }
            (LobbyCall::SwapSlots { first, second }, Target::Team(team)) => {
                self.require_host(is_host, "swap-slots")?;
                let changed = self.teams[team as usize].swap(*first, *second)?;
                Ok(if changed {
                    Applied::changed_with(vec![
                        LobbyEvent::SlotChanged {
                            addr: SlotAddr { team, slot: *first },
                        },
                        LobbyEvent::SlotChanged {
                            addr: SlotAddr {
                                team,
                                slot: *second,
                            },
                        },
                    ])
                } else {
                    Applied::unchanged()
                })
            }
            (LobbyCall::ResizeTeam { capacity }, Target::Team(team)) => {
                self.require_host(is_host, "resize-team")?;
                self.resize_team(team, *capacity)
            }
            (LobbyCall::SetTeamName { name }, Target::Team(team)) => {
                self.require_host(is_host, "set-team-name")?;
                let changed = self.teams[team as usize].set_name(name.clone());
                Ok(if changed {
                    Applied::changed_with(vec![LobbyEvent::TeamChanged { team }])
                } else {
                    Applied::unchanged()
                })
            }
            (LobbyCall::SetSetting { key, value }, Target::Lobby) => {
                self.require_host(is_host, "set-setting")?;
                let previous = self.settings.insert(key.clone(), value.clone());
                Ok(if previous.as_deref() == Some(value.as_str()) {
                    Applied::unchanged()
                } else {
                    Applied::changed_with(vec![LobbyEvent::SettingChanged {
                        key: key.clone(),
                        value: value.clone(),
                    }])
                })
            }
            (LobbyCall::SetCompany { company }, Target::Participant(addr)) => {
                let info = self.human_at(addr).ok_or(CallError::SlotEmpty)?;
                if info.participant != caller {
                    return Err(CallError::NotSelf);
                }
                let participant = info.participant;
                let slot = self.teams[addr.team as usize].slot_mut(addr.slot)?;
                match slot.occupant_mut() {
                    Some(Occupant::Human(info)) => {
                        if info.company == *company {
                            Ok(Applied::unchanged())
                        } else {
                            info.company = company.clone();
                            Ok(Applied::changed_with(vec![LobbyEvent::CompanyChanged {
                                participant,
                            }]))
                        }
                    }
                    _ => Err(CallError::SlotEmpty),
                }
            }
            (LobbyCall::SendChat { sender, text }, Target::Lobby) => {
                if *sender != caller {
                    return Err(CallError::NotSelf);
                }
                if self.find_participant(caller).is_none() {
                    return Err(CallError::UnknownParticipant(caller));
                }
                Ok(Applied::changed_with(vec![LobbyEvent::Chat {
                    sender: *sender,
                    text: text.clone(),
                }]))
            }
            (LobbyCall::SignalReady { participant, ready }, Target::Lobby) => {
                if *participant != caller {
                    return Err(CallError::NotSelf);
                }
                if self.find_participant(caller).is_none() {
                    return Err(CallError::UnknownParticipant(caller));
                }
                let changed = if *ready {
                    self.ready.insert(*participant)
                } else {
                    self.ready.remove(participant)
                };
                Ok(if changed {
                    Applied::changed_with(vec![LobbyEvent::ReadyChanged {
                        participant: *participant,
                        ready: *ready,
                    }])
                } else {
                    Applied::unchanged()
                })
            }
            _ => Err(CallError::TargetMismatch),
        }
    }

    fn require_host(&self, is_host: bool, feature: &'static str) -> Result<(), CallError> {
        if is_host {
            Ok(())
        } else {
            Err(CallError::HostOnly(feature))
        }
    }

    fn set_difficulty(
        &mut self,
        addr: SlotAddr,
        difficulty: AiDifficulty,
    ) -> Result<Applied, CallError> {
        let slot = self.teams[addr.team as usize].slot_mut(addr.slot)?;
        match slot.state() {
            SlotState::Open => {
                if !difficulty.is_ai() {
                    return Ok(Applied::unchanged());
                }
                slot.seat(Occupant::Ai { difficulty })?;
                Ok(Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }]))
            }
            SlotState::Occupied => match slot.occupant_mut() {
                Some(Occupant::Human(_)) => Err(CallError::HumanOccupant),
                Some(Occupant::Ai {
                    difficulty: current,
                }) => {
                    if difficulty.is_ai() {
                        if *current == difficulty {
                            Ok(Applied::unchanged())
                        } else {
                            *current = difficulty;
                            Ok(Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }]))
                        }
                    } else {
                        slot.take_occupant();
                        Ok(Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }]))
                    }
                }
                None => Err(CallError::SlotEmpty),
            },
            SlotState::Locked => Err(CallError::SlotLocked),
            SlotState::Disabled => Err(CallError::SlotDisabled),
        }
    }

    fn remove_occupant(&mut self, addr: SlotAddr) -> Result<Applied, CallError> {
        let slot = self.teams[addr.team as usize].slot_mut(addr.slot)?;
        if slot.state() == SlotState::Disabled {
            return Err(CallError::SlotDisabled);
        }
        match slot.take_occupant() {
            None => Ok(Applied::unchanged()),
            Some(Occupant::Ai { .. }) => {
                Ok(Applied::changed_with(vec![LobbyEvent::SlotChanged { addr }]))
            }
            Some(Occupant::Human(info)) => {
                self.ready.remove(&info.participant);
                Ok(Applied {
                    changed: true,
                    kicked: vec![info.participant],
                    events: vec![
                        LobbyEvent::SlotChanged { addr },
                        LobbyEvent::ParticipantLeft {
                            participant: info.participant,
                            addr,
                        },
                    ],
                })
            }
        }
    }

    fn resize_team(&mut self, team: u8, capacity: u8) -> Result<Applied, CallError> {
        let outcome = self.teams[team as usize].resize(capacity)?;
        if !outcome.changed {
            return Ok(Applied::unchanged());
        }

        let mut events = vec![LobbyEvent::TeamChanged { team }];
        for slot in &outcome.touched {
            events.push(LobbyEvent::SlotChanged {
                addr: SlotAddr { team, slot: *slot },
            });
        }
        let mut kicked = Vec::new();
        for occupant in outcome.displaced {
            if let Some(participant) = occupant.participant() {
                self.ready.remove(&participant);
                kicked.push(participant);
            }
            events.push(LobbyEvent::OccupantDisplaced { team, occupant });
        }
        Ok(Applied {
            changed: true,
            kicked,
            events,
        })
    }

    pub fn meta(&self) -> LobbyMeta {
        LobbyMeta {
            name: self.name.clone(),
            game_id: self.game_id.clone(),
            host: self.host,
            settings: self.settings.clone(),
            ready: self.ready.clone(),
        }
    }

    pub fn snapshot(&self) -> LobbySnapshot {
        LobbySnapshot {
            entity: self.entity,
            lobby: self.lobby,
            name: self.name.clone(),
            game_id: self.game_id.clone(),
            host: self.host,
            settings: self.settings.clone(),
            ready: self.ready.clone(),
            teams: [self.teams[0].snapshot(), self.teams[1].snapshot()],
        }
    }

    /// Serialized view of one entity, for fetch answers.
    pub fn entity_snapshot(&self, target: ObjectId) -> Option<EntitySnapshot> {
        match self.resolve(target)? {
            Target::Lobby => Some(EntitySnapshot::Lobby(self.meta())),
            Target::Team(team) => Some(EntitySnapshot::Team(self.teams[team as usize].meta())),
            Target::Slot(addr) => Some(EntitySnapshot::Slot(
                self.teams[addr.team as usize].slot(addr.slot).ok()?.snapshot(),
            )),
            Target::Participant(addr) => {
                Some(EntitySnapshot::Participant(self.human_at(addr)?.clone()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use skirmish_proto::{AiDifficulty, CompanyRef};

    use super::*;

    const HOST: ParticipantId = ParticipantId(100);
    const GUEST: ParticipantId = ParticipantId(200);

    fn create_test_lobby() -> LocalLobby {
        LocalLobby::new(
            LobbyId::new(),
            LobbyConfig {
                name: "2v2 ranked".to_string(),
                game_id: "skirmish-1944".to_string(),
                host: HOST,
                host_name: "host".to_string(),
            },
        )
    }

    fn slot_entity(lobby: &LocalLobby, team: u8, slot: u8) -> ObjectId {
        lobby.team(team).unwrap().slot(slot).unwrap().entity()
    }

    #[test]
    fn test_host_is_seated_on_creation() {
        let lobby = create_test_lobby();
        let addr = lobby.find_participant(HOST).unwrap();
        assert_eq!(addr, SlotAddr { team: 0, slot: 0 });
        assert_eq!(lobby.human_participants(), vec![HOST]);
    }

    #[test]
    fn test_seat_participant_is_idempotent() {
        let mut lobby = create_test_lobby();
        let (first, _) = lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        let (second, _) = lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        assert_eq!(first, second);
        assert_eq!(lobby.human_participants().len(), 2);
    }

    #[test]
    fn test_seat_overflows_to_second_team_and_fills_up() {
        let mut lobby = create_test_lobby();
        // Shrink both teams to one playable slot; the host occupies team 0.
        for team in 0..2u8 {
            let target = lobby.team(team).unwrap().entity();
            lobby
                .apply_call(
                    HOST,
                    &DispatchCall::new(target, LobbyCall::ResizeTeam { capacity: 1 }),
                )
                .unwrap();
        }

        let (addr, _) = lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        assert_eq!(addr, SlotAddr { team: 1, slot: 0 });

        let third = lobby.seat_participant(ParticipantId(300), "late".to_string());
        assert_eq!(third.unwrap_err(), CallError::LobbyFull);
    }

    #[test]
    fn test_lock_call_is_idempotent_and_host_only() {
        let mut lobby = create_test_lobby();
        let target = slot_entity(&lobby, 0, 1);

        let first = lobby
            .apply_call(HOST, &DispatchCall::new(target, LobbyCall::LockSlot))
            .unwrap();
        assert!(first.changed);
        assert_eq!(
            first.events,
            vec![LobbyEvent::SlotChanged {
                addr: SlotAddr { team: 0, slot: 1 }
            }]
        );

        let again = lobby
            .apply_call(HOST, &DispatchCall::new(target, LobbyCall::LockSlot))
            .unwrap();
        assert!(!again.changed);
        assert!(again.events.is_empty());

        lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        let denied = lobby.apply_call(
            GUEST,
            &DispatchCall::new(slot_entity(&lobby, 0, 2), LobbyCall::LockSlot),
        );
        assert!(matches!(denied, Err(CallError::HostOnly(_))));
    }

    #[test]
    fn test_set_difficulty_seats_changes_and_removes_ai() {
        let mut lobby = create_test_lobby();
        let target = slot_entity(&lobby, 1, 0);

        let seated = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    target,
                    LobbyCall::SetDifficulty {
                        difficulty: AiDifficulty::Hard,
                    },
                ),
            )
            .unwrap();
        assert!(seated.changed);
        assert_eq!(
            lobby.team(1).unwrap().slot(0).unwrap().occupant(),
            Some(&Occupant::Ai {
                difficulty: AiDifficulty::Hard
            })
        );

        let same = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    target,
                    LobbyCall::SetDifficulty {
                        difficulty: AiDifficulty::Hard,
                    },
                ),
            )
            .unwrap();
        assert!(!same.changed);

        let removed = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    target,
                    LobbyCall::SetDifficulty {
                        difficulty: AiDifficulty::Human,
                    },
                ),
            )
            .unwrap();
        assert!(removed.changed);
        assert!(lobby.team(1).unwrap().slot(0).unwrap().is_open());
    }

    #[test]
    fn test_set_difficulty_refuses_human_slot() {
        let mut lobby = create_test_lobby();
        let host_slot = slot_entity(&lobby, 0, 0);
        let result = lobby.apply_call(
            HOST,
            &DispatchCall::new(
                host_slot,
                LobbyCall::SetDifficulty {
                    difficulty: AiDifficulty::Easy,
                },
            ),
        );
        assert_eq!(result.unwrap_err(), CallError::HumanOccupant);
    }

    #[test]
    fn test_set_company_only_for_self() {
        let mut lobby = create_test_lobby();
        lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        let guest_addr = lobby.find_participant(GUEST).unwrap();
        let guest_entity = match lobby
            .team(guest_addr.team)
            .unwrap()
            .slot(guest_addr.slot)
            .unwrap()
            .occupant()
            .unwrap()
        {
            Occupant::Human(info) => info.entity,
            Occupant::Ai { .. } => unreachable!(),
        };

        let company = CompanyRef {
            id: "c-77".to_string(),
            name: "7th Armored".to_string(),
            faction: "US".to_string(),
        };
        let applied = lobby
            .apply_call(
                GUEST,
                &DispatchCall::new(
                    guest_entity,
                    LobbyCall::SetCompany {
                        company: Some(company.clone()),
                    },
                ),
            )
            .unwrap();
        assert!(applied.changed);

        // Unchanged value reports no change.
        let again = lobby
            .apply_call(
                GUEST,
                &DispatchCall::new(
                    guest_entity,
                    LobbyCall::SetCompany {
                        company: Some(company),
                    },
                ),
            )
            .unwrap();
        assert!(!again.changed);

        let denied = lobby.apply_call(
            HOST,
            &DispatchCall::new(guest_entity, LobbyCall::SetCompany { company: None }),
        );
        assert_eq!(denied.unwrap_err(), CallError::NotSelf);
    }

    #[test]
    fn test_signal_ready_tracks_set_membership() {
        let mut lobby = create_test_lobby();
        let target = lobby.entity();

        let set = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    target,
                    LobbyCall::SignalReady {
                        participant: HOST,
                        ready: true,
                    },
                ),
            )
            .unwrap();
        assert!(set.changed);
        assert!(lobby.is_ready(HOST));

        let repeat = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    target,
                    LobbyCall::SignalReady {
                        participant: HOST,
                        ready: true,
                    },
                ),
            )
            .unwrap();
        assert!(!repeat.changed);

        let for_other = lobby.apply_call(
            HOST,
            &DispatchCall::new(
                target,
                LobbyCall::SignalReady {
                    participant: GUEST,
                    ready: true,
                },
            ),
        );
        assert_eq!(for_other.unwrap_err(), CallError::NotSelf);
    }

    #[test]
    fn test_remove_occupant_kicks_human_and_clears_ready() {
        let mut lobby = create_test_lobby();
        lobby.seat_participant(GUEST, "guest".to_string()).unwrap();
        let addr = lobby.find_participant(GUEST).unwrap();
        lobby
            .apply_call(
                GUEST,
                &DispatchCall::new(
                    lobby.entity(),
                    LobbyCall::SignalReady {
                        participant: GUEST,
                        ready: true,
                    },
                ),
            )
            .unwrap();
        assert!(lobby.is_ready(GUEST));

        let target = slot_entity(&lobby, addr.team, addr.slot);
        let applied = lobby
            .apply_call(HOST, &DispatchCall::new(target, LobbyCall::RemoveOccupant))
            .unwrap();
        assert_eq!(applied.kicked, vec![GUEST]);
        assert!(lobby.find_participant(GUEST).is_none());
        assert!(!lobby.is_ready(GUEST));

        // Empty slot: removing again reports no change.
        let again = lobby
            .apply_call(HOST, &DispatchCall::new(target, LobbyCall::RemoveOccupant))
            .unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_resize_reports_displaced_humans_as_kicked() {
        let mut lobby = create_test_lobby();
        // Fill team 0: host plus three AIs.
        for slot in 1..4u8 {
            lobby
                .apply_call(
                    HOST,
                    &DispatchCall::new(
                        slot_entity(&lobby, 0, slot),
                        LobbyCall::SetDifficulty {
                            difficulty: AiDifficulty::Standard,
                        },
                    ),
                )
                .unwrap();
        }

        let team_entity = lobby.team(0).unwrap().entity();
        let applied = lobby
            .apply_call(
                HOST,
                &DispatchCall::new(team_entity, LobbyCall::ResizeTeam { capacity: 2 }),
            )
            .unwrap();

        assert!(applied.changed);
        // Displaced AIs are reported but nobody is kicked for them.
        assert!(applied.kicked.is_empty());
        let displaced = applied
            .events
            .iter()
            .filter(|e| matches!(e, LobbyEvent::OccupantDisplaced { .. }))
            .count();
        assert_eq!(displaced, 2);
        assert_eq!(lobby.team(0).unwrap().capacity(), 2);
    }

    #[test]
    fn test_chat_requires_seat() {
        let mut lobby = create_test_lobby();
        let result = lobby.apply_call(
            GUEST,
            &DispatchCall::new(
                lobby.entity(),
                LobbyCall::SendChat {
                    sender: GUEST,
                    text: "hello".to_string(),
                },
            ),
        );
        assert_eq!(result.unwrap_err(), CallError::UnknownParticipant(GUEST));
    }

    #[test]
    fn test_entity_snapshot_resolves_every_kind() {
        let lobby = create_test_lobby();
        assert!(matches!(
            lobby.entity_snapshot(lobby.entity()),
            Some(EntitySnapshot::Lobby(_))
        ));
        assert!(matches!(
            lobby.entity_snapshot(lobby.team(1).unwrap().entity()),
            Some(EntitySnapshot::Team(_))
        ));
        assert!(matches!(
            lobby.entity_snapshot(slot_entity(&lobby, 0, 3)),
            Some(EntitySnapshot::Slot(_))
        ));
        let host_entity = match lobby.team(0).unwrap().slot(0).unwrap().occupant().unwrap() {
            Occupant::Human(info) => info.entity,
            Occupant::Ai { .. } => unreachable!(),
        };
        assert!(matches!(
            lobby.entity_snapshot(host_entity),
            Some(EntitySnapshot::Participant(_))
        ));
        assert!(lobby.entity_snapshot(ObjectId(9999)).is_none());
    }

    #[test]
    fn test_snapshot_carries_full_tree() {
        let mut lobby = create_test_lobby();
        lobby
            .apply_call(
                HOST,
                &DispatchCall::new(
                    lobby.entity(),
                    LobbyCall::SetSetting {
                        key: "scenario".to_string(),
                        value: "riverbed".to_string(),
                    },
                ),
            )
            .unwrap();

        let snapshot = lobby.snapshot();
        assert_eq!(snapshot.teams[0].slots.len(), 4);
        assert_eq!(snapshot.settings.get("scenario").unwrap(), "riverbed");
        assert!(matches!(
            snapshot.teams[0].slots[0].occupant,
            Some(Occupant::Human(_))
        ));
    }
}
