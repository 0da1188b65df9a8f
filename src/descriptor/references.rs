//! Back-references from bound objects to the descriptor set slots they occupy.
//!
//! Every descriptor set owns a [`SetSlots`] block holding the identity of the object written into each of its
//! slots. Writing an object into a slot pushes a weak back-reference onto the object's own list. When the object is
//! destroyed, only that list is walked: every slot that still holds the object is cleared and its set is flagged
//! invalid. No cache is ever scanned.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::resource::ObjectId;

const MIN_COMPACT_LEN: usize = 16;

/// Slot storage of a single descriptor set.
#[derive(Debug)]
pub(crate) struct SetSlots {
    invalid: Cell<bool>,
    objects: Box<[Cell<Option<ObjectId>>]>,
    samplers: Box<[Cell<Option<ObjectId>>]>,
}

/// Which slot array of a set a back-reference points into.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum SlotKind {
    Object,
    Sampler,
}

impl SetSlots {
    /// Slots for `count` objects, and as many samplers if `with_samplers` is set. New sets start out invalid.
    pub fn new(count: usize, with_samplers: bool) -> Self {
        let samplers = if with_samplers { count } else { 0 };
        Self {
            invalid: Cell::new(true),
            objects: (0..count).map(|_| Cell::new(None)).collect(),
            samplers: (0..samplers).map(|_| Cell::new(None)).collect(),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid.get()
    }

    pub fn set_invalid(&self, invalid: bool) {
        self.invalid.set(invalid);
    }

    fn cell(&self, kind: SlotKind, slot: usize) -> Option<&Cell<Option<ObjectId>>> {
        match kind {
            SlotKind::Object => self.objects.get(slot),
            SlotKind::Sampler => self.samplers.get(slot),
        }
    }

    /// The object currently stored in a slot.
    pub fn get(&self, kind: SlotKind, slot: usize) -> Option<ObjectId> {
        self.cell(kind, slot).and_then(|cell| cell.get())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }
}

#[derive(Debug)]
struct BackReference {
    set: Weak<SetSlots>,
    kind: SlotKind,
    slot: usize,
}

impl BackReference {
    fn holds(&self, id: ObjectId) -> Option<Rc<SetSlots>> {
        let set = self.set.upgrade()?;
        (set.get(self.kind, self.slot) == Some(id)).then_some(set)
    }
}

/// The back-reference list of one object.
#[derive(Debug, Default)]
pub(crate) struct DescriptorRefs {
    refs: RefCell<Vec<BackReference>>,
    compact_at: Cell<usize>,
}

impl DescriptorRefs {
    fn push(&self, id: ObjectId, set: &Rc<SetSlots>, kind: SlotKind, slot: usize) {
        let mut refs = self.refs.borrow_mut();
        if refs.len() >= self.compact_at.get().max(MIN_COMPACT_LEN) {
            refs.retain(|entry| entry.holds(id).is_some());
            self.compact_at.set(refs.len() * 2);
        }
        refs.push(BackReference {
            set: Rc::downgrade(set),
            kind,
            slot,
        });
    }

    /// Clear every slot that still holds the object `id` and invalidate the owning sets.
    pub fn clear(&self, id: ObjectId) {
        let refs = std::mem::take(&mut *self.refs.borrow_mut());
        for entry in refs {
            if let Some(set) = entry.holds(id) {
                if let Some(cell) = set.cell(entry.kind, entry.slot) {
                    cell.set(None);
                }
                set.set_invalid(true);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.refs.borrow().len()
    }
}

/// Objects that can be written into descriptor set slots.
pub(crate) trait Tracked {
    fn object_id(&self) -> ObjectId;
    fn descriptor_refs(&self) -> &DescriptorRefs;
}

/// Store `object` in a slot of `set` and record the back-reference on the object. Passing `None` empties the slot.
/// Nothing is recorded if the slot already holds the object.
pub(crate) fn add_reference<T: Tracked + ?Sized>(set: &Rc<SetSlots>, kind: SlotKind, slot: usize, object: Option<&T>) {
    let Some(cell) = set.cell(kind, slot) else {
        debug_assert!(false, "slot {slot} out of range for {kind:?}");
        return;
    };
    match object {
        Some(object) => {
            let id = object.object_id();
            if cell.get() == Some(id) {
                return;
            }
            cell.set(Some(id));
            object.descriptor_refs().push(id, set, kind, slot);
        }
        None => cell.set(None),
    }
}

/// Whether a slot of `set` currently holds `object`.
pub(crate) fn holds_reference<T: Tracked + ?Sized>(set: &SetSlots, kind: SlotKind, slot: usize, object: Option<&T>) -> bool {
    set.get(kind, slot) == object.map(|object| object.object_id())
}
