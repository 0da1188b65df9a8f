//! A queue of objects waiting to be destroyed once the GPU can no longer use them.

/// Objects that may still be used by outstanding GPU work.
pub trait InFlight {
    /// Whether outstanding work still uses this object. Objects in use are never dropped by the queue.
    fn in_use(&self) -> bool;
}

#[derive(Debug)]
struct Item<T> {
    value: T,
    // Time to live
    ttl: u32,
}

#[derive(Debug)]
pub struct DeletionQueue<T> {
    max_ttl: u32,
    items: Vec<Item<T>>,
}

impl<T: InFlight> DeletionQueue<T> {
    pub fn new(max_ttl: u32) -> DeletionQueue<T> {
        DeletionQueue {
            max_ttl,
            items: vec![],
        }
    }

    /// Pushes a value onto the deletion queue.
    /// Note that this moves out of the parameter so that you can't access an object after
    /// it is pushed.
    pub fn push(&mut self, value: T) {
        self.items.push(Item {
            value,
            ttl: self.max_ttl,
        });
    }

    /// Advance the frame counter by one, decreasing time to live by one on each element.
    /// If time to live of an element reaches zero and it is no longer in use, it is deleted.
    pub fn next_frame(&mut self) {
        self.items.iter_mut().for_each(|item| item.ttl = item.ttl.saturating_sub(1));
        self.items.retain(|item| item.ttl != 0 || item.value.in_use());
    }

    /// Find a queued value.
    pub fn find_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.items
            .iter_mut()
            .map(|item| &mut item.value)
            .find(|value| predicate(value))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
