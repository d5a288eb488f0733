//! FIFO of outbound records waiting for a session
//!
//! Records submitted while the socket is up but no session is established are
//! parked here and replayed, oldest first, once a connect completes. The queue
//! gives no delivery guarantee beyond that: anything still queued when the
//! filter is torn down is dropped.

use crate::protocol::DataRecord;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct PendingQueue {
    records: VecDeque<DataRecord>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, record: DataRecord) {
        self.records.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take every queued record in submission order
    pub fn take_all(&mut self) -> VecDeque<DataRecord> {
        std::mem::take(&mut self.records)
    }

    /// Put unsent records back at the head, ahead of anything queued meanwhile
    pub fn restore_front(&mut self, mut unsent: VecDeque<DataRecord>) {
        unsent.append(&mut self.records);
        self.records = unsent;
    }

    /// Drop everything, returning how many records were discarded
    pub fn discard(&mut self) -> usize {
        let dropped = self.records.len();
        self.records.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(queue: VecDeque<DataRecord>) -> Vec<Vec<u8>> {
        queue.into_iter().map(|r| r.payload.to_vec()).collect()
    }

    #[test]
    fn test_take_all_preserves_order() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DataRecord::new(&b"p1"[..]));
        queue.enqueue(DataRecord::new(&b"p2"[..]));
        queue.enqueue(DataRecord::new(&b"p3"[..]));

        let taken = queue.take_all();
        assert!(queue.is_empty());
        assert_eq!(payloads(taken), vec![b"p1".to_vec(), b"p2".to_vec(), b"p3".to_vec()]);
    }

    #[test]
    fn test_restore_front_keeps_unsent_first() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DataRecord::new(&b"old"[..]));
        let unsent = queue.take_all();

        queue.enqueue(DataRecord::new(&b"new"[..]));
        queue.restore_front(unsent);

        assert_eq!(queue.len(), 2);
        assert_eq!(payloads(queue.take_all()), vec![b"old".to_vec(), b"new".to_vec()]);
    }

    #[test]
    fn test_discard_counts_dropped() {
        let mut queue = PendingQueue::new();
        queue.enqueue(DataRecord::new(&b"x"[..]));
        queue.enqueue(DataRecord::new(&b"y"[..]));

        assert_eq!(queue.discard(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.discard(), 0);
    }
}
