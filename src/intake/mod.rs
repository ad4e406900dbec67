//! Intake: evaluation requests and operator control messages arrive on
//! at-least-once queues; the model catalog resolves a model id to its
//! deployment.
pub mod catalog;
pub mod memory;
pub mod spool;

use crate::error::QueueError;
use std::time::Duration;

pub use catalog::{JsonModelCatalog, ModelCatalog};
pub use memory::MemoryQueue;
pub use spool::SpoolQueue;

/// A received message. The receipt is needed to delete it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery<T> {
    pub receipt: String,
    pub body: T,
}

/// At-least-once message queue. A received message stays hidden from other
/// receivers for a while and reappears unless deleted.
pub trait IntakeQueue<T>: Send {
    /// Up to `max` messages, waiting at most `wait` when the queue is empty.
    fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery<T>>, QueueError>;

    fn delete(&self, receipt: &str) -> Result<(), QueueError>;
}

/// Shared handle, so a producer can keep publishing after handing the queue
/// to the requester.
impl<T, Q> IntakeQueue<T> for std::sync::Arc<Q>
where
    Q: IntakeQueue<T> + Sync,
{
    fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery<T>>, QueueError> {
        (**self).receive(max, wait)
    }

    fn delete(&self, receipt: &str) -> Result<(), QueueError> {
        (**self).delete(receipt)
    }
}
