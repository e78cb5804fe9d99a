use std::collections::{HashSet, VecDeque};

use pairchat_core::ConnectionId;

/// FIFO of connections waiting for a partner. A connection appears at most
/// once.
#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<ConnectionId>,
    members: HashSet<ConnectionId>,
}

impl WaitingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the back. Returns false if already queued.
    pub fn enqueue(&mut self, id: &ConnectionId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id.clone());
        true
    }

    /// Remove and return the earliest waiter, `None` when empty.
    pub fn dequeue_next(&mut self) -> Option<ConnectionId> {
        let id = self.order.pop_front()?;
        self.members.remove(&id);
        Some(id)
    }

    /// Remove a waiter wherever it sits. Returns false if it was not queued.
    pub fn remove(&mut self, id: &ConnectionId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.members.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionId> {
        self.order.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ConnectionId> {
        (0..n).map(|i| ConnectionId::from_raw(format!("conn_{i}"))).collect()
    }

    #[test]
    fn dequeues_in_arrival_order() {
        let c = ids(3);
        let mut q = WaitingQueue::new();
        for id in &c {
            assert!(q.enqueue(id));
        }
        assert_eq!(q.dequeue_next(), Some(c[0].clone()));
        assert_eq!(q.dequeue_next(), Some(c[1].clone()));
        assert_eq!(q.dequeue_next(), Some(c[2].clone()));
        assert_eq!(q.dequeue_next(), None);
    }

    #[test]
    fn enqueue_is_idempotent() {
        let c = ids(2);
        let mut q = WaitingQueue::new();
        assert!(q.enqueue(&c[0]));
        assert!(q.enqueue(&c[1]));
        assert!(!q.enqueue(&c[0]));
        assert_eq!(q.len(), 2);
        assert_eq!(q.iter().cloned().collect::<Vec<_>>(), c);
    }

    #[test]
    fn remove_from_middle_keeps_order() {
        let c = ids(3);
        let mut q = WaitingQueue::new();
        for id in &c {
            q.enqueue(id);
        }
        assert!(q.remove(&c[1]));
        assert!(!q.contains(&c[1]));
        assert_eq!(q.iter().cloned().collect::<Vec<_>>(), vec![c[0].clone(), c[2].clone()]);
    }

    #[test]
    fn remove_absent_twice_is_noop() {
        let c = ids(2);
        let mut q = WaitingQueue::new();
        q.enqueue(&c[0]);
        assert!(!q.remove(&c[1]));
        assert!(!q.remove(&c[1]));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn requeue_after_dequeue_goes_to_back() {
        let c = ids(3);
        let mut q = WaitingQueue::new();
        q.enqueue(&c[0]);
        q.enqueue(&c[1]);
        let first = q.dequeue_next().unwrap();
        q.enqueue(&c[2]);
        q.enqueue(&first);
        assert_eq!(
            q.iter().cloned().collect::<Vec<_>>(),
            vec![c[1].clone(), c[2].clone(), c[0].clone()]
        );
    }
}
