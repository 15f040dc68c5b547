//! Cached stand-ins for host-owned entities.
//!
//! A proxy pairs an entity id with a TTL cache and the dispatcher to fetch
//! through. Reads come from the cache while fresh; pushes applied by the
//! registry refresh the cache out of band. Proxies never mutate anything
//! themselves, mutation goes through [`crate::handle`].

use std::sync::Arc;
use std::time::Duration;

use skirmish_proto::{
    EntitySnapshot, HumanInfo, LobbyMeta, ObjectId, ParticipantId, SlotAddr, SlotSnapshot,
    TeamMeta,
};

use crate::cache::{ObjectCache, ValueCache};
use crate::dispatch::Dispatcher;
use crate::error::RequestError;

/// Root of the remote graph. The meta carries the settings map and ready
/// set, so readers share one allocation per fetch.
pub struct RemoteLobby {
    entity: ObjectId,
    cache: ObjectCache<LobbyMeta>,
    dispatcher: Arc<Dispatcher>,
}

impl RemoteLobby {
    pub(crate) fn new(entity: ObjectId, ttl: Duration, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            entity,
            cache: ObjectCache::new(ttl),
            dispatcher,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub async fn meta(&self) -> Result<Arc<LobbyMeta>, RequestError> {
        self.cache
            .get_cached(|| async {
                match self.dispatcher.fetch(self.entity).await? {
                    EntitySnapshot::Lobby(meta) => Ok(meta),
                    _ => Err(RequestError::UnexpectedResponse),
                }
            })
            .await
    }

    pub(crate) fn seed(&self, meta: LobbyMeta) {
        self.cache.set_cached(meta);
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut LobbyMeta)) {
        if !self.cache.update(mutate) {
            self.cache.invalidate();
        }
    }
}

pub struct RemoteTeam {
    entity: ObjectId,
    index: u8,
    slots: [ObjectId; 4],
    cache: ValueCache<TeamMeta>,
    dispatcher: Arc<Dispatcher>,
}

impl RemoteTeam {
    pub(crate) fn new(
        entity: ObjectId,
        index: u8,
        slots: [ObjectId; 4],
        ttl: Duration,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            entity,
            index,
            slots,
            cache: ValueCache::new(ttl),
            dispatcher,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    /// Slot entity ids in slot order. Fixed for the life of the lobby.
    pub fn slot_entities(&self) -> [ObjectId; 4] {
        self.slots
    }

    pub async fn meta(&self) -> Result<TeamMeta, RequestError> {
        self.cache
            .get_cached(|| async {
                match self.dispatcher.fetch(self.entity).await? {
                    EntitySnapshot::Team(meta) => Ok(meta),
                    _ => Err(RequestError::UnexpectedResponse),
                }
            })
            .await
    }

    pub(crate) fn seed(&self, meta: TeamMeta) {
        self.cache.set_cached(meta);
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut TeamMeta)) {
        if !self.cache.update(mutate) {
            self.cache.invalidate();
        }
    }
}

pub struct RemoteSlot {
    entity: ObjectId,
    addr: SlotAddr,
    cache: ValueCache<SlotSnapshot>,
    dispatcher: Arc<Dispatcher>,
}

impl RemoteSlot {
    pub(crate) fn new(
        entity: ObjectId,
        addr: SlotAddr,
        ttl: Duration,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            entity,
            addr,
            cache: ValueCache::new(ttl),
            dispatcher,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn addr(&self) -> SlotAddr {
        self.addr
    }

    pub async fn snapshot(&self) -> Result<SlotSnapshot, RequestError> {
        self.cache
            .get_cached(|| async {
                match self.dispatcher.fetch(self.entity).await? {
                    EntitySnapshot::Slot(snapshot) => Ok(snapshot),
                    _ => Err(RequestError::UnexpectedResponse),
                }
            })
            .await
    }

    pub(crate) fn seed(&self, snapshot: SlotSnapshot) {
        self.cache.set_cached(snapshot);
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut SlotSnapshot)) {
        if !self.cache.update(mutate) {
            self.cache.invalidate();
        }
    }

    pub(crate) fn invalidate(&self) {
        self.cache.invalidate();
    }

    pub(crate) fn peek(&self) -> Option<SlotSnapshot> {
        self.cache.peek()
    }
}

pub struct RemoteParticipant {
    entity: ObjectId,
    participant: ParticipantId,
    cache: ValueCache<HumanInfo>,
    dispatcher: Arc<Dispatcher>,
}

impl RemoteParticipant {
    pub(crate) fn new(
        entity: ObjectId,
        participant: ParticipantId,
        ttl: Duration,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            entity,
            participant,
            cache: ValueCache::new(ttl),
            dispatcher,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub async fn info(&self) -> Result<HumanInfo, RequestError> {
        self.cache
            .get_cached(|| async {
                match self.dispatcher.fetch(self.entity).await? {
                    EntitySnapshot::Participant(info) => Ok(info),
                    _ => Err(RequestError::UnexpectedResponse),
                }
            })
            .await
    }

    pub(crate) fn seed(&self, info: HumanInfo) {
        self.cache.set_cached(info);
    }

    pub(crate) fn update(&self, mutate: impl FnOnce(&mut HumanInfo)) {
        if !self.cache.update(mutate) {
            self.cache.invalidate();
        }
    }
}
