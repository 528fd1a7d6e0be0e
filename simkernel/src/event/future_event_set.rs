use std::collections::HashMap;
use std::fmt;

use super::{Event, EventId, Priority};
use crate::time::MonotonicTime;
use crate::util::priority_queue::{InsertKey, PriorityQueue};

/// The set of pending events, ordered by time, priority and insertion
/// sequence.
///
/// Insertion and extraction of the earliest event take *O*(log(*N*)) time, and
/// so does removal of an arbitrary event by identity.
pub struct FutureEventSet {
    queue: PriorityQueue<(MonotonicTime, Priority), Event>,
    index: HashMap<EventId, InsertKey>,
    next_id: u64,
}

impl FutureEventSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            queue: PriorityQueue::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }

    /// Inserts an event at its current timestamp and returns its identity.
    ///
    /// An event that was already scheduled once keeps its identity; otherwise
    /// a fresh one is assigned. The insertion sequence is always renewed.
    pub fn insert(&mut self, mut event: Event) -> EventId {
        let id = match event.id() {
            Some(id) => id,
            None => {
                let id = EventId::new(self.next_id);
                self.next_id += 1;
                event.set_id(id);
                id
            }
        };
        event.set_sequence(self.queue.next_epoch());

        let key = self.queue.insert((event.time(), event.priority()), event);
        self.index.insert(id, key);

        id
    }

    /// Returns the earliest event without removing it.
    pub fn peek_min(&self) -> Option<&Event> {
        self.queue.peek().map(|(_, event)| event)
    }

    /// Removes and returns the earliest event.
    pub fn take_min(&mut self) -> Option<Event> {
        let (_, event) = self.queue.pull()?;
        if let Some(id) = event.id() {
            self.index.remove(&id);
        }

        Some(event)
    }

    /// Re-inserts an event just returned by [`take_min`](Self::take_min),
    /// restoring its original insertion sequence so that it is ordered as if
    /// it had never been taken.
    pub fn put_back(&mut self, event: Event) {
        let Some(id) = event.id() else {
            self.insert(event);
            return;
        };
        let key = self
            .queue
            .reinsert((event.time(), event.priority()), event.sequence(), event);
        self.index.insert(id, key);
    }

    /// Removes a pending event.
    ///
    /// Returns `None` if the event is not pending, so removing an event twice
    /// has the same effect as removing it once.
    pub fn remove(&mut self, id: EventId) -> Option<Event> {
        let key = self.index.remove(&id)?;

        self.queue.delete(key).map(|(_, event)| event)
    }

    /// Returns `true` if the event is pending.
    pub fn contains(&self, id: EventId) -> bool {
        self.index.contains_key(&id)
    }

    /// Returns a pending event.
    pub fn get(&self, id: EventId) -> Option<&Event> {
        self.index.get(&id).and_then(|&key| self.queue.get(key))
    }

    /// Returns the number of pending events.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no event is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.len() == 0
    }

    /// Removes all pending events.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    /// Returns an iterator over pending events, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.queue.iter().map(|(_, _, event)| event)
    }

    /// Removes and returns all pending events matching a predicate.
    pub(crate) fn remove_where(&mut self, mut predicate: impl FnMut(&Event) -> bool) -> Vec<Event> {
        let ids: Vec<EventId> = self
            .iter()
            .filter(|event| predicate(*event))
            .filter_map(Event::id)
            .collect();

        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }
}

impl Default for FutureEventSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FutureEventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureEventSet")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
