use skirmish_proto::{ObjectId, Occupant, SlotSnapshot, SlotState};

use crate::error::CallError;

/// One seat of a team.
///
/// The occupant and the state move together: a slot holds an occupant
/// exactly when its state is `Occupied`. Every mutator preserves that.
#[derive(Debug, Clone)]
pub struct Slot {
    entity: ObjectId,
    index: u8,
    state: SlotState,
    occupant: Option<Occupant>,
}

impl Slot {
    pub fn new_open(entity: ObjectId, index: u8) -> Self {
        Self {
            entity,
            index,
            state: SlotState::Open,
            occupant: None,
        }
    }

    pub fn entity(&self) -> ObjectId {
        self.entity
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn occupant(&self) -> Option<&Occupant> {
        self.occupant.as_ref()
    }

    pub fn is_occupied(&self) -> bool {
        self.state == SlotState::Occupied
    }

    pub fn is_open(&self) -> bool {
        self.state == SlotState::Open
    }

    /// Place an occupant into an open slot.
    pub fn seat(&mut self, occupant: Occupant) -> Result<(), CallError> {
        match self.state {
            SlotState::Open => {
                self.occupant = Some(occupant);
                self.state = SlotState::Occupied;
                Ok(())
            }
            SlotState::Occupied => Err(CallError::SlotOccupied),
            SlotState::Locked => Err(CallError::SlotLocked),
            SlotState::Disabled => Err(CallError::SlotDisabled),
        }
    }

    /// Remove the occupant, leaving the slot open. Returns `None` when the
    /// slot held nobody.
    pub fn take_occupant(&mut self) -> Option<Occupant> {
        let occupant = self.occupant.take()?;
        self.state = SlotState::Open;
        Some(occupant)
    }

    /// Close the slot to joiners. Returns false when already locked.
    pub fn lock(&mut self) -> Result<bool, CallError> {
        match self.state {
            SlotState::Open => {
                self.state = SlotState::Locked;
                Ok(true)
            }
            SlotState::Locked => Ok(false),
            SlotState::Occupied => Err(CallError::SlotOccupied),
            SlotState::Disabled => Err(CallError::SlotDisabled),
        }
    }

    /// Reopen a locked slot. Returns false when already open.
    pub fn unlock(&mut self) -> Result<bool, CallError> {
        match self.state {
            SlotState::Locked => {
                self.state = SlotState::Open;
                Ok(true)
            }
            SlotState::Open => Ok(false),
            SlotState::Occupied => Err(CallError::SlotOccupied),
            SlotState::Disabled => Err(CallError::SlotDisabled),
        }
    }

    /// Mutable view of the occupant, for in-place company updates.
    pub(crate) fn occupant_mut(&mut self) -> Option<&mut Occupant> {
        self.occupant.as_mut()
    }

    /// Take the slot out of play. Callers empty it first; any occupant still
    /// here is dropped.
    pub(crate) fn disable(&mut self) {
        self.occupant = None;
        self.state = SlotState::Disabled;
    }

    /// Force any empty slot back to open, clearing locks and disablement.
    pub(crate) fn reopen(&mut self) {
        if self.occupant.is_none() {
            self.state = SlotState::Open;
        }
    }

    /// Exchange occupant and state between two slots, leaving entity and
    /// index in place. Both sides change in one step, so no interleaving can
    /// observe a duplicated occupant.
    pub(crate) fn swap_contents(a: &mut Slot, b: &mut Slot) {
        std::mem::swap(&mut a.state, &mut b.state);
        std::mem::swap(&mut a.occupant, &mut b.occupant);
    }

    pub fn snapshot(&self) -> SlotSnapshot {
        SlotSnapshot {
            entity: self.entity,
            index: self.index,
            state: self.state,
            occupant: self.occupant.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use skirmish_proto::AiDifficulty;

    use super::*;

    fn ai(difficulty: AiDifficulty) -> Occupant {
        Occupant::Ai { difficulty }
    }

    #[test]
    fn test_seat_and_take_keep_state_and_occupant_paired() {
        let mut slot = Slot::new_open(ObjectId(9), 0);
        assert!(slot.occupant().is_none());

        slot.seat(ai(AiDifficulty::Easy)).unwrap();
        assert_eq!(slot.state(), SlotState::Occupied);
        assert!(slot.occupant().is_some());

        let taken = slot.take_occupant().unwrap();
        assert_eq!(taken, ai(AiDifficulty::Easy));
        assert_eq!(slot.state(), SlotState::Open);
        assert!(slot.occupant().is_none());
    }

    #[test]
    fn test_seat_rejected_unless_open() {
        let mut slot = Slot::new_open(ObjectId(9), 0);
        slot.lock().unwrap();
        assert_eq!(slot.seat(ai(AiDifficulty::Easy)), Err(CallError::SlotLocked));

        slot.unlock().unwrap();
        slot.seat(ai(AiDifficulty::Easy)).unwrap();
        assert_eq!(
            slot.seat(ai(AiDifficulty::Hard)),
            Err(CallError::SlotOccupied)
        );
    }

    #[test]
    fn test_lock_is_idempotent() {
        let mut slot = Slot::new_open(ObjectId(9), 0);
        assert!(slot.lock().unwrap());
        assert!(!slot.lock().unwrap());
        assert_eq!(slot.state(), SlotState::Locked);

        assert!(slot.unlock().unwrap());
        assert!(!slot.unlock().unwrap());
        assert_eq!(slot.state(), SlotState::Open);
    }

    #[test]
    fn test_swap_contents_moves_occupant_and_state() {
        let mut a = Slot::new_open(ObjectId(1), 0);
        let mut b = Slot::new_open(ObjectId(2), 1);
        a.seat(ai(AiDifficulty::Expert)).unwrap();
        b.lock().unwrap();

        Slot::swap_contents(&mut a, &mut b);

        assert_eq!(a.state(), SlotState::Locked);
        assert!(a.occupant().is_none());
        assert_eq!(b.state(), SlotState::Occupied);
        assert_eq!(b.occupant(), Some(&ai(AiDifficulty::Expert)));
        // Identity stays with the position.
        assert_eq!(a.entity(), ObjectId(1));
        assert_eq!(b.entity(), ObjectId(2));
    }
}
