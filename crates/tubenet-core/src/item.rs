use crate::id::ItemTypeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stack of fungible items, the content a traveller carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item_type: ItemTypeId,
    pub quantity: u32,
    /// Free-form tags carried along with the stack (filters, colours, ...).
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl ItemStack {
    pub fn new(item_type: ItemTypeId, quantity: u32) -> Self {
        Self {
            item_type,
            quantity,
            tags: BTreeMap::new(),
        }
    }

    /// The empty stack. Used as the "nothing left over" result.
    pub fn empty() -> Self {
        Self::new(ItemTypeId(0), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Whether `other` can merge into this stack.
    pub fn stacks_with(&self, other: &ItemStack) -> bool {
        self.item_type == other.item_type && self.tags == other.tags
    }

    /// Split off up to `quantity` items into a new stack.
    #[must_use]
    pub fn split(&mut self, quantity: u32) -> ItemStack {
        let taken = quantity.min(self.quantity);
        self.quantity -= taken;
        ItemStack {
            item_type: self.item_type,
            quantity: taken,
            tags: self.tags.clone(),
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A fixed number of slots, each holding at most `slot_limit` items of one
/// kind. Used as the overflow buffer of entry devices and as the inventory
/// of simple endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBuffer {
    slots: Vec<Option<ItemStack>>,
    slot_limit: u32,
}

impl SlotBuffer {
    pub fn new(slot_count: usize, slot_limit: u32) -> Self {
        Self {
            slots: vec![None; slot_count],
            slot_limit,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&ItemStack> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Insert as much of `stack` as fits. Returns what did not fit.
    ///
    /// Existing matching stacks are topped up first, then empty slots are
    /// filled in order.
    #[must_use = "the returned stack holds items that did not fit"]
    pub fn insert(&mut self, mut stack: ItemStack) -> ItemStack {
        for slot in self.slots.iter_mut().flatten() {
            if stack.is_empty() {
                break;
            }
            if slot.stacks_with(&stack) && slot.quantity < self.slot_limit {
                let moved = stack.quantity.min(self.slot_limit - slot.quantity);
                slot.quantity += moved;
                stack.quantity -= moved;
            }
        }
        for slot in self.slots.iter_mut() {
            if stack.is_empty() {
                break;
            }
            if slot.is_none() {
                *slot = Some(stack.split(self.slot_limit));
            }
        }
        stack
    }

    /// Take up to `quantity` items from the first non-empty slot.
    pub fn extract_first(&mut self, quantity: u32) -> Option<ItemStack> {
        let slot = self.slots.iter_mut().find(|s| s.is_some())?;
        let stack = slot.as_mut()?;
        let taken = stack.split(quantity);
        if stack.is_empty() {
            *slot = None;
        }
        Some(taken)
    }

    /// Whether at least one more item of some kind could be stored.
    pub fn has_space(&self) -> bool {
        self.slots.iter().any(|s| match s {
            None => true,
            Some(stack) => stack.quantity < self.slot_limit,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Total quantity across all slots.
    pub fn total(&self) -> u32 {
        self.slots.iter().flatten().map(|s| s.quantity).sum()
    }

    pub fn stacks(&self) -> impl Iterator<Item = &ItemStack> {
        self.slots.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iron(quantity: u32) -> ItemStack {
        ItemStack::new(ItemTypeId(1), quantity)
    }

    #[test]
    fn split_takes_at_most_available() {
        let mut stack = iron(5);
        let taken = stack.split(8);
        assert_eq!(taken.quantity, 5);
        assert!(stack.is_empty());
    }

    #[test]
    fn tags_prevent_stacking() {
        let plain = iron(1);
        let tagged = iron(1).with_tag("colour", "red");
        assert!(!plain.stacks_with(&tagged));
        assert!(plain.stacks_with(&iron(3)));
    }

    #[test]
    fn buffer_tops_up_before_using_new_slots() {
        let mut buffer = SlotBuffer::new(2, 10);
        assert!(buffer.insert(iron(4)).is_empty());
        assert!(buffer.insert(iron(4)).is_empty());
        assert_eq!(buffer.slot(0).map(|s| s.quantity), Some(8));
        assert!(buffer.slot(1).is_none());
    }

    #[test]
    fn buffer_returns_overflow() {
        let mut buffer = SlotBuffer::new(2, 10);
        let left = buffer.insert(iron(25));
        assert_eq!(left.quantity, 5);
        assert_eq!(buffer.total(), 20);
        assert!(!buffer.has_space());
    }

    #[test]
    fn extract_first_empties_slot() {
        let mut buffer = SlotBuffer::new(3, 64);
        let _ = buffer.insert(iron(2));
        assert_eq!(buffer.extract_first(1).map(|s| s.quantity), Some(1));
        assert_eq!(buffer.extract_first(5).map(|s| s.quantity), Some(1));
        assert!(buffer.is_empty());
        assert!(buffer.extract_first(1).is_none());
    }
}
