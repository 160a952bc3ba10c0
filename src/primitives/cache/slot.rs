use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::ObjectId;

/// Bytes of one resident object.
pub(crate) type SlotBuf = Arc<RwLock<Box<[u8]>>>;

/// Index of a slot in the slot table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct SlotId(pub usize);

pub(crate) struct Slot {
    pub owner: Option<ObjectId>,
    pub buf: SlotBuf,
    pub reference: bool,
}

/// Resident slots plus the clock hand that sweeps them.
///
/// Freed indices are reused before the table grows, so the clock only ever
/// walks as many entries as the peak resident object count.
#[derive(Default)]
pub(crate) struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    hand: usize,
    occupied: usize,
}

impl SlotTable {
    pub fn insert(&mut self, owner: ObjectId, buf: Box<[u8]>) -> SlotId {
        let slot = Slot {
            owner: Some(owner),
            buf: Arc::new(RwLock::new(buf)),
            reference: true,
        };
        self.occupied += 1;
        match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx].owner.is_none());
                self.slots[idx] = slot;
                SlotId(idx)
            }
            None => {
                self.slots.push(slot);
                SlotId(self.slots.len() - 1)
            }
        }
    }

    /// Returns the slot to the free list.
    pub fn release(&mut self, id: SlotId) {
        let slot = &mut self.slots[id.0];
        assert!(slot.owner.is_some(), "slot {} released twice", id.0);
        slot.owner = None;
        slot.reference = false;
        slot.buf = Arc::new(RwLock::new(Box::default()));
        self.free.push(id.0);
        self.occupied -= 1;
    }

    pub fn get(&self, id: SlotId) -> &Slot {
        &self.slots[id.0]
    }

    pub fn touch(&mut self, id: SlotId) {
        self.slots[id.0].reference = true;
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Objects currently holding a slot.
    pub fn owners(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().filter_map(|slot| slot.owner)
    }

    /// Returns the slot under the hand and advances it.
    pub fn advance(&mut self) -> Option<SlotId> {
        if self.slots.is_empty() {
            return None;
        }
        let idx = self.hand % self.slots.len();
        self.hand = (idx + 1) % self.slots.len();
        Some(SlotId(idx))
    }

    /// Clears the reference bit; returns whether it was set.
    pub fn second_chance(&mut self, id: SlotId) -> bool {
        std::mem::replace(&mut self.slots[id.0].reference, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slots_are_reused() {
        let mut table = SlotTable::default();
        let a = table.insert(ObjectId(1), vec![0u8; 4].into_boxed_slice());
        let b = table.insert(ObjectId(2), vec![0u8; 4].into_boxed_slice());
        table.release(a);
        assert_eq!(table.occupied(), 1);
        let c = table.insert(ObjectId(3), vec![0u8; 8].into_boxed_slice());
        assert_eq!(c, a);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(c).buf.read().len(), 8);
        assert_eq!(table.get(b).owner, Some(ObjectId(2)));
        let mut owners: Vec<_> = table.owners().collect();
        owners.sort();
        assert_eq!(owners, vec![ObjectId(2), ObjectId(3)]);
    }

    #[test]
    fn hand_wraps_around() {
        let mut table = SlotTable::default();
        assert!(table.advance().is_none());
        table.insert(ObjectId(1), Box::default());
        table.insert(ObjectId(2), Box::default());
        let seen: Vec<_> = (0..3).filter_map(|_| table.advance()).collect();
        assert_eq!(seen, vec![SlotId(0), SlotId(1), SlotId(0)]);
    }

    #[test]
    fn second_chance_clears_reference() {
        let mut table = SlotTable::default();
        let id = table.insert(ObjectId(1), Box::default());
        assert!(table.second_chance(id));
        assert!(!table.second_chance(id));
        table.touch(id);
        assert!(table.second_chance(id));
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let mut table = SlotTable::default();
        let id = table.insert(ObjectId(1), Box::default());
        table.release(id);
        table.release(id);
    }
}
