// In-process queue, used by tests and embedders

use super::{Delivery, IntakeQueue};
use crate::error::QueueError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

struct Inner<T> {
    next_receipt: u64,
    messages: Vec<(String, T)>,
    hidden: HashSet<String>,
}

/// Received messages stay hidden until deleted or `requeue_unacked` is
/// called, which stands in for a visibility timeout.
pub struct MemoryQueue<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone + Send> MemoryQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_receipt: 0,
                messages: Vec::new(),
                hidden: HashSet::new(),
            }),
        }
    }

    pub fn push(&self, message: T) -> String {
        let mut inner = self.inner.lock();
        inner.next_receipt += 1;
        let receipt = format!("m-{}", inner.next_receipt);
        inner.messages.push((receipt.clone(), message));
        receipt
    }

    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn requeue_unacked(&self) {
        self.inner.lock().hidden.clear();
    }
}

impl<T: Clone + Send> Default for MemoryQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> IntakeQueue<T> for MemoryQueue<T> {
    fn receive(&self, max: usize, _wait: Duration) -> Result<Vec<Delivery<T>>, QueueError> {
        let mut inner = self.inner.lock();
        let Inner { messages, hidden, .. } = &mut *inner;
        let mut delivered = Vec::new();
        for (receipt, body) in messages.iter() {
            if delivered.len() >= max {
                break;
            }
            if hidden.insert(receipt.clone()) {
                delivered.push(Delivery {
                    receipt: receipt.clone(),
                    body: body.clone(),
                });
            }
        }
        Ok(delivered)
    }

    fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        inner.messages.retain(|(r, _)| r != receipt);
        inner.hidden.remove(receipt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_until_requeued() {
        let queue = MemoryQueue::new();
        queue.push(1u64);
        queue.push(2u64);

        let first = queue.receive(1, Duration::ZERO).unwrap();
        assert_eq!(first[0].body, 1);
        let second = queue.receive(10, Duration::ZERO).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].body, 2);
        assert!(queue.receive(10, Duration::ZERO).unwrap().is_empty());

        queue.delete(&first[0].receipt).unwrap();
        queue.requeue_unacked();
        let again = queue.receive(10, Duration::ZERO).unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].body, 2);
    }
}
