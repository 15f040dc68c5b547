use skirmish_proto::{ObjectId, Occupant, SlotState, TeamMeta, TeamSnapshot};

use crate::error::CallError;
use crate::slot::Slot;

/// Slots a team always carries, playable or not.
pub const SLOTS_PER_TEAM: usize = 4;
/// Smallest allowed playable capacity.
pub const MIN_CAPACITY: u8 = 1;
/// Largest allowed playable capacity.
pub const MAX_CAPACITY: u8 = 4;

/// What a capacity change did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResizeOutcome {
    pub changed: bool,
    /// Occupants that could not be kept because no playable slot was free.
    pub displaced: Vec<Occupant>,
    /// Indices whose state or occupant changed.
    pub touched: Vec<u8>,
}

/// One side of the lobby. Four slots always exist; `capacity` controls how
/// many of them are playable, the rest are disabled.
#[derive(Debug, Clone)]
pub struct Team {
    entity: ObjectId,
    index: u8,
    name: String,
    capacity: u8,
    slots: [Slot; SLOTS_PER_TEAM],
}

impl Team {
    pub fn new(entity: ObjectId, index: u8, name: String, slot_entities: [ObjectId; 4]) -> Self {
        let mut i = 0u8;
        let slots = slot_entities.map(|id| {
            let slot = Slot::new_open(id, i);
            i += 1;
            slot
        });
        Self {
            entity,
            index,
            name,
            capacity: MAX_CAPACITY,
            slots,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u8 {
        self.capacity
    }

    pub fn slots(&self) -> &[Slot; SLOTS_PER_TEAM] {
        &self.slots
    }

    pub fn slot(&self, index: u8) -> Result<&Slot, CallError> {
        self.slots
            .get(index as usize)
            .ok_or(CallError::SlotIndexOutOfRange(index))
    }

    pub(crate) fn slot_mut(&mut self, index: u8) -> Result<&mut Slot, CallError> {
        self.slots
            .get_mut(index as usize)
            .ok_or(CallError::SlotIndexOutOfRange(index))
    }

    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_occupied()).count()
    }

    /// Lowest open slot index, if any.
    pub fn first_open_slot(&self) -> Option<u8> {
        self.slots.iter().find(|s| s.is_open()).map(Slot::index)
    }

    /// Rename the team. Returns false when the name is already current.
    pub fn set_name(&mut self, name: String) -> bool {
        if self.name == name {
            return false;
        }
        self.name = name;
        true
    }

    /// Change how many slots are playable.
    ///
    /// Occupied slots above the new capacity migrate to the lowest free
    /// playable index. When nothing is free the occupant is removed and
    /// reported through [`ResizeOutcome::displaced`]; a resize never drops
    /// anyone silently. Empty slots below the capacity end up open, slots
    /// above it end up disabled.
    pub fn resize(&mut self, new_capacity: u8) -> Result<ResizeOutcome, CallError> {
        if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&new_capacity) {
            return Err(CallError::CapacityOutOfRange(new_capacity));
        }
        if new_capacity == self.capacity {
            return Ok(ResizeOutcome::default());
        }

        let before: Vec<_> = self.slots.iter().map(Slot::snapshot).collect();
        let cap = new_capacity as usize;
        let mut occupied: Vec<bool> = self.slots.iter().map(Slot::is_occupied).collect();
        let mut displaced = Vec::new();

        // Migrate occupants stranded above the new capacity downwards.
        for i in cap..SLOTS_PER_TEAM {
            if !occupied[i] {
                continue;
            }
            match (0..cap).find(|&j| !occupied[j]) {
                Some(j) => {
                    let (low, high) = self.slots.split_at_mut(i);
                    Slot::swap_contents(&mut low[j], &mut high[0]);
                    occupied[j] = true;
                    occupied[i] = false;
                }
                None => {
                    if let Some(occupant) = self.slots[i].take_occupant() {
                        displaced.push(occupant);
                    }
                    occupied[i] = false;
                }
            }
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if i >= cap {
                slot.disable();
            } else if !slot.is_occupied() {
                // Everything playable and empty starts over as open, locks
                // included.
                slot.reopen();
            }
        }
        self.capacity = new_capacity;

        let touched: Vec<u8> = self
            .slots
            .iter()
            .zip(before.iter())
            .filter(|(slot, old)| slot.snapshot() != **old)
            .map(|(slot, _)| slot.index())
            .collect();

        Ok(ResizeOutcome {
            changed: true,
            displaced,
            touched,
        })
    }

    /// Exchange two slots, occupant and state together. Returns false when
    /// the exchange changes nothing observable.
    pub fn swap(&mut self, first: u8, second: u8) -> Result<bool, CallError> {
        let a = first.min(second) as usize;
        let b = first.max(second) as usize;
        if b >= SLOTS_PER_TEAM {
            return Err(CallError::SlotIndexOutOfRange(first.max(second)));
        }
        if a == b {
            return Ok(false);
        }
        if self.slots[a].state() == SlotState::Disabled
            || self.slots[b].state() == SlotState::Disabled
        {
            return Err(CallError::SlotDisabled);
        }

        let before_a = self.slots[a].snapshot();
        let before_b = self.slots[b].snapshot();

        let (low, high) = self.slots.split_at_mut(b);
        Slot::swap_contents(&mut low[a], &mut high[0]);

        Ok(self.slots[a].snapshot() != before_a || self.slots[b].snapshot() != before_b)
    }

    pub fn snapshot(&self) -> TeamSnapshot {
        TeamSnapshot {
            entity: self.entity,
            index: self.index,
            name: self.name.clone(),
            capacity: self.capacity,
            slots: [
                self.slots[0].snapshot(),
                self.slots[1].snapshot(),
                self.slots[2].snapshot(),
                self.slots[3].snapshot(),
            ],
        }
    }

    pub fn meta(&self) -> TeamMeta {
        TeamMeta {
            name: self.name.clone(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use skirmish_proto::{AiDifficulty, SlotState};

    use super::*;

    fn create_test_team() -> Team {
        Team::new(
            ObjectId(10),
            0,
            "Allies".to_string(),
            [ObjectId(11), ObjectId(12), ObjectId(13), ObjectId(14)],
        )
    }

    fn ai(difficulty: AiDifficulty) -> Occupant {
        Occupant::Ai { difficulty }
    }

    fn seat_ai(team: &mut Team, index: u8, difficulty: AiDifficulty) {
        team.slot_mut(index).unwrap().seat(ai(difficulty)).unwrap();
    }

    fn assert_invariant(team: &Team) {
        assert_eq!(team.slots().len(), SLOTS_PER_TEAM);
        for slot in team.slots() {
            assert_eq!(slot.occupant().is_some(), slot.state() == SlotState::Occupied);
        }
    }

    #[test]
    fn test_resize_migrates_to_lowest_free_index() {
        // Capacity 4, slots 0 and 2 occupied. Shrinking to 2 must keep slot 0,
        // move slot 2's occupant into slot 1, and disable slots 2 and 3.
        let mut team = create_test_team();
        seat_ai(&mut team, 0, AiDifficulty::Easy);
        seat_ai(&mut team, 2, AiDifficulty::Hard);

        let outcome = team.resize(2).unwrap();
        assert!(outcome.changed);
        assert!(outcome.displaced.is_empty());

        assert_eq!(team.slot(0).unwrap().occupant(), Some(&ai(AiDifficulty::Easy)));
        assert_eq!(team.slot(1).unwrap().occupant(), Some(&ai(AiDifficulty::Hard)));
        assert_eq!(team.slot(2).unwrap().state(), SlotState::Disabled);
        assert_eq!(team.slot(3).unwrap().state(), SlotState::Disabled);
        assert_invariant(&team);
    }

    #[test]
    fn test_resize_keeps_min_occupied_of_lowest_indices() {
        let mut team = create_test_team();
        seat_ai(&mut team, 1, AiDifficulty::Easy);
        seat_ai(&mut team, 3, AiDifficulty::Standard);

        team.resize(3).unwrap();

        let occupied: Vec<bool> = team.slots().iter().map(Slot::is_occupied).collect();
        assert_eq!(occupied, vec![true, true, false, false]);
        assert_eq!(team.slot(3).unwrap().state(), SlotState::Disabled);
        assert_invariant(&team);
    }

    #[test]
    fn test_resize_displaces_when_no_free_slot() {
        let mut team = create_test_team();
        for i in 0..4 {
            seat_ai(&mut team, i, AiDifficulty::Hard);
        }

        let outcome = team.resize(2).unwrap();
        assert_eq!(outcome.displaced.len(), 2);
        assert_eq!(team.occupied_count(), 2);
        assert_eq!(team.slot(2).unwrap().state(), SlotState::Disabled);
        assert_eq!(team.slot(3).unwrap().state(), SlotState::Disabled);
        assert_invariant(&team);
    }

    #[test]
    fn test_resize_back_up_reopens_disabled_slots() {
        let mut team = create_test_team();
        seat_ai(&mut team, 0, AiDifficulty::Easy);
        team.resize(1).unwrap();
        assert_eq!(team.slot(1).unwrap().state(), SlotState::Disabled);

        let outcome = team.resize(4).unwrap();
        assert!(outcome.changed);
        assert_eq!(team.slot(1).unwrap().state(), SlotState::Open);
        assert_eq!(team.slot(3).unwrap().state(), SlotState::Open);
        assert_eq!(team.slot(0).unwrap().occupant(), Some(&ai(AiDifficulty::Easy)));
        assert_invariant(&team);
    }

    #[test]
    fn test_resize_same_capacity_is_a_no_op() {
        let mut team = create_test_team();
        seat_ai(&mut team, 2, AiDifficulty::Expert);
        let outcome = team.resize(4).unwrap();
        assert!(!outcome.changed);
        assert_eq!(team.slot(2).unwrap().occupant(), Some(&ai(AiDifficulty::Expert)));
    }

    #[test]
    fn test_resize_rejects_capacity_out_of_range() {
        let mut team = create_test_team();
        assert_eq!(team.resize(0), Err(CallError::CapacityOutOfRange(0)));
        assert_eq!(team.resize(5), Err(CallError::CapacityOutOfRange(5)));
    }

    #[test]
    fn test_swap_is_its_own_inverse() {
        let mut team = create_test_team();
        seat_ai(&mut team, 0, AiDifficulty::Easy);
        team.slot_mut(3).unwrap().lock().unwrap();
        let before: Vec<_> = team.slots().iter().map(Slot::snapshot).collect();

        assert!(team.swap(0, 3).unwrap());
        assert!(team.swap(0, 3).unwrap());

        let after: Vec<_> = team.slots().iter().map(Slot::snapshot).collect();
        assert_eq!(before, after);
        assert_invariant(&team);
    }

    #[test]
    fn test_swap_moves_occupant_and_state() {
        let mut team = create_test_team();
        seat_ai(&mut team, 1, AiDifficulty::Standard);
        team.slot_mut(2).unwrap().lock().unwrap();

        team.swap(1, 2).unwrap();

        assert_eq!(team.slot(1).unwrap().state(), SlotState::Locked);
        assert_eq!(team.slot(2).unwrap().occupant(), Some(&ai(AiDifficulty::Standard)));
        assert_invariant(&team);
    }

    #[test]
    fn test_swap_same_index_changes_nothing() {
        let mut team = create_test_team();
        seat_ai(&mut team, 1, AiDifficulty::Standard);
        assert!(!team.swap(1, 1).unwrap());
        assert!(team.slot(1).unwrap().is_occupied());
    }

    #[test]
    fn test_swap_rejects_disabled_slots() {
        let mut team = create_test_team();
        team.resize(2).unwrap();
        assert_eq!(team.swap(0, 3), Err(CallError::SlotDisabled));
    }

    #[test]
    fn test_swap_rejects_out_of_range() {
        let mut team = create_test_team();
        assert_eq!(team.swap(0, 4), Err(CallError::SlotIndexOutOfRange(4)));
    }
}
