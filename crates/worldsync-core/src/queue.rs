//! Per-session outbound queue.
//!
//! An unbounded FIFO of pre-serialized messages sitting between the world
//! store's synchronous fan-out and a session's sender task. Publishing never
//! waits on a slow client; the price is that a client which never drains
//! its queue grows it without limit.
//!
//! The queue can be *closed* (poisoned) from any [`QueueSender`]. Closing
//! wakes a consumer parked in [`QueueReceiver::get`] immediately, even with
//! items still pending, and makes later `put`s no-ops.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

/// Create a connected sender/receiver pair.
pub fn outbound_queue() -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        QueueSender {
            tx,
            closed: Arc::new(closed_tx),
        },
        QueueReceiver {
            rx,
            closed: closed_rx,
        },
    )
}

/// Producer half. Cheap to clone; every clone shares the same close flag.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::UnboundedSender<String>,
    closed: Arc<watch::Sender<bool>>,
}

impl QueueSender {
    /// Enqueue a message without waiting.
    ///
    /// Returns `false` if the queue has been closed or its receiver is
    /// gone; the message is dropped in that case.
    pub fn put(&self, item: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.tx.send(item).is_ok()
    }

    /// Poison the queue, waking the consumer. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether [`close`](Self::close) has been called on any clone.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolve once the queue is closed.
    ///
    /// Used by the inbound side of a session to notice that the outbound
    /// side has torn down.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // An error means every sender is gone, which is as closed as it gets.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Consumer half, owned by the session's sender task.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

impl QueueReceiver {
    /// Wait for the next message.
    ///
    /// Returns `None` once the queue is closed (pending items are
    /// abandoned) or once every [`QueueSender`] has been dropped and the
    /// backlog is drained.
    pub async fn get(&mut self) -> Option<String> {
        if *self.closed.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            // `Err` means the senders are gone; fall through and drain.
            Ok(_) = self.closed.wait_for(|closed| *closed) => None,
            item = self.rx.recv() => item,
        }
    }

    /// Number of messages waiting to be sent.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether no messages are waiting.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
