//! FIFO turn-taking for one store key.
//!
//! Each enqueue swaps a fresh completion signal in as the tail of the queue
//! and keeps the previous tail. A ticket becomes a turn once the previous tail
//! resolves, and the turn ends when it is dropped, however the work inside it
//! ended. Enqueueing is synchronous, so position in the
//! queue is fixed at call time, not at first poll.

use std::sync::{Mutex, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug, Default)]
pub struct UpdateQueue {
    tail: Mutex<Option<oneshot::Receiver<()>>>,
}

/// A reserved place in the queue.
#[derive(Debug)]
pub struct Ticket {
    prev: Option<oneshot::Receiver<()>>,
    done: Option<oneshot::Sender<()>>,
}

/// Exclusive turn on the queue; the successor starts when this drops.
#[derive(Debug)]
pub struct Turn {
    _done: oneshot::Sender<()>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self) -> Ticket {
        let (tx, rx) = oneshot::channel();
        let prev = self
            .tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(rx);
        Ticket { prev, done: Some(tx) }
    }
}

impl Ticket {
    /// Wait until every earlier ticket has finished its turn.
    pub async fn wait(mut self) -> Turn {
        if let Some(prev) = self.prev.as_mut() {
            // a dropped sender means the predecessor is gone, which also ends its turn
            let _ = prev.await;
        }
        self.prev = None;
        let done = match self.done.take() {
            Some(done) => done,
            None => oneshot::channel().0,
        };
        Turn { _done: done }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // An abandoned ticket must still keep its successors behind its predecessor.
        if let (Some(prev), Some(done)) = (self.prev.take(), self.done.take()) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        let _ = prev.await;
                        drop(done);
                    });
                }
                Err(_) => drop(done),
            }
        }
    }
}
