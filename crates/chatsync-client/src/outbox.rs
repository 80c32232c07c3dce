//! Bounded queue of sends waiting for the channel.
//!
//! Holds client ids only; the messages themselves stay in the room store so
//! the UI keeps showing them while they wait.

use std::collections::VecDeque;

use chatsync_proto::ClientMessageId;

/// Bounded FIFO with drop-oldest overflow.
#[derive(Debug, Clone)]
pub struct Outbox {
    queue: VecDeque<ClientMessageId>,
    capacity: usize,
}

impl Outbox {
    /// Create an empty outbox. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        Self { queue: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a send. Returns the evicted oldest entry if the queue was full.
    pub fn push_back(&mut self, client_id: ClientMessageId) -> Option<ClientMessageId> {
        let evicted =
            if self.queue.len() >= self.capacity { self.queue.pop_front() } else { None };
        self.queue.push_back(client_id);
        evicted
    }

    /// Return a send to the head of the queue.
    ///
    /// The returned send is older than everything queued, so if the queue is
    /// full it is the one to drop: it comes straight back as `Some`.
    pub fn push_front(&mut self, client_id: ClientMessageId) -> Option<ClientMessageId> {
        if self.queue.len() >= self.capacity {
            return Some(client_id);
        }
        self.queue.push_front(client_id);
        None
    }

    /// Take the oldest send.
    pub fn pop_front(&mut self) -> Option<ClientMessageId> {
        self.queue.pop_front()
    }

    /// Remove a send wherever it sits. Returns true if it was queued.
    pub fn remove(&mut self, client_id: &ClientMessageId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| queued != client_id);
        self.queue.len() != before
    }

    /// True if `client_id` is queued.
    #[must_use]
    pub fn contains(&self, client_id: &ClientMessageId) -> bool {
        self.queue.contains(client_id)
    }

    /// Queued sends in submission order.
    pub fn iter(&self) -> impl Iterator<Item = &ClientMessageId> {
        self.queue.iter()
    }

    /// Number of queued sends.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Maximum number of queued sends.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> ClientMessageId {
        ClientMessageId::from_random_bytes([n; 16])
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut outbox = Outbox::new(2);
        assert_eq!(outbox.push_back(id(1)), None);
        assert_eq!(outbox.push_back(id(2)), None);
        assert_eq!(outbox.push_back(id(3)), Some(id(1)));

        assert_eq!(outbox.iter().copied().collect::<Vec<_>>(), vec![id(2), id(3)]);
    }

    #[test]
    fn requeue_goes_to_front() {
        let mut outbox = Outbox::new(3);
        outbox.push_back(id(2));
        assert_eq!(outbox.push_front(id(1)), None);

        assert_eq!(outbox.pop_front(), Some(id(1)));
        assert_eq!(outbox.pop_front(), Some(id(2)));
    }

    #[test]
    fn requeue_into_full_queue_is_refused() {
        let mut outbox = Outbox::new(1);
        outbox.push_back(id(2));

        assert_eq!(outbox.push_front(id(1)), Some(id(1)));
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn remove_from_middle() {
        let mut outbox = Outbox::new(4);
        for n in 1..=3 {
            outbox.push_back(id(n));
        }

        assert!(outbox.remove(&id(2)));
        assert!(!outbox.remove(&id(2)));
        assert_eq!(outbox.iter().copied().collect::<Vec<_>>(), vec![id(1), id(3)]);
    }
}
