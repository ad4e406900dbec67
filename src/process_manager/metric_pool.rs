// Bounded pool of blocking metric workers
// Work runs on the runtime's blocking threads; results come back over an mpsc channel.

use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// What a worker sends back for one task.
#[derive(Debug)]
pub enum WorkerMessage<T> {
    Result { task_id: String, data: T },
    Error { task_id: String, message: String },
}

/// Runs at most `size` tasks concurrently. `submit` never queues past that:
/// a saturated pool hands the task back to the caller.
pub struct MetricPool<T> {
    handle: Handle,
    size: usize,
    in_flight: Arc<AtomicUsize>,
    tx: mpsc::Sender<WorkerMessage<T>>,
    rx: mpsc::Receiver<WorkerMessage<T>>,
}

impl<T: Send + 'static> MetricPool<T> {
    pub fn new(handle: Handle, size: usize) -> Self {
        let size = size.max(1);
        // Every running task owns one slot, so sends never wait.
        let (tx, rx) = mpsc::channel(size);
        Self {
            handle,
            size,
            in_flight: Arc::new(AtomicUsize::new(0)),
            tx,
            rx,
        }
    }

    /// Tasks started and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight() < self.size
    }

    /// Start `work` on a blocking thread. Returns the task unchanged when the
    /// pool is full.
    pub fn submit<F>(&self, task_id: String, work: F) -> Result<(), F>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        if !self.has_capacity() {
            return Err(work);
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        let tx = self.tx.clone();
        debug!("Starting metric task {}", task_id);
        self.handle.spawn_blocking(move || {
            let message = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(data) => WorkerMessage::Result { task_id, data },
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker panicked".to_string());
                    error!("Metric task {} panicked: {}", task_id, message);
                    WorkerMessage::Error { task_id, message }
                }
            };
            if tx.blocking_send(message).is_err() {
                error!("Metric pool dropped before a task finished");
            }
        });
        Ok(())
    }

    /// Finished tasks, without waiting. Each collected message frees a slot.
    pub fn try_collect(&mut self) -> Vec<WorkerMessage<T>> {
        let mut finished = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            finished.push(message);
        }
        finished
    }

    /// Wait until at least one task finishes or `timeout` passes, then drain.
    pub fn collect_timeout(&mut self, timeout: std::time::Duration) -> Vec<WorkerMessage<T>> {
        if self.in_flight() == 0 {
            return Vec::new();
        }
        let rx = &mut self.rx;
        let first = self
            .handle
            .block_on(async move { tokio::time::timeout(timeout, rx.recv()).await });
        let mut finished = Vec::new();
        if let Ok(Some(message)) = first {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            finished.push(message);
        }
        finished.extend(self.try_collect());
        finished
    }
}
