//! Worker mailboxes
//!
//! Every worker owns exactly one mailbox. Mailboxes are unbounded so that a
//! send never blocks the sender, and FIFO so that a worker processes messages
//! in the order its predecessor emitted them.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters shared by both halves of a mailbox
#[repr(align(64))] // Align to cache line
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Number of messages received
    pub messages_received: AtomicU64,
}

impl ChannelStats {
    /// Get the number of messages received
    pub fn received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

/// Sending half of a mailbox
pub struct Sender<T> {
    inner: flume::Sender<T>,
}

impl<T> Sender<T> {
    /// Enqueue a message. Fails only once the receiving half is gone.
    pub fn send(&self, msg: T) -> Result<()> {
        self.inner.send(msg)?;
        Ok(())
    }
}

/// Receiving half of a mailbox
pub struct Receiver<T> {
    inner: flume::Receiver<T>,
    stats: Arc<ChannelStats>,
}

impl<T> Receiver<T> {
    /// Take a message if one is already queued
    ///
    /// Queued messages are still delivered after the sender is gone; the
    /// error is reported only once the mailbox is both empty and closed.
    pub fn try_recv(&self) -> Result<Option<T>> {
        match self.inner.try_recv() {
            Ok(msg) => {
                self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                Ok(Some(msg))
            }
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => {
                Err(Error::ReceiveError("Channel disconnected".to_string()))
            }
        }
    }

    /// Whether a call to `try_recv` would return something other than `None`
    pub fn is_ready(&self) -> bool {
        !self.inner.is_empty() || self.inner.is_disconnected()
    }

    /// Number of messages waiting to be received
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no messages are waiting
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get channel statistics
    pub fn stats(&self) -> Arc<ChannelStats> {
        Arc::clone(&self.stats)
    }
}

/// Mailbox factory
pub struct Channel;

impl Channel {
    /// Create an unbounded single-consumer mailbox
    pub fn mailbox<T>() -> (Sender<T>, Receiver<T>) {
        let (tx, rx) = flume::unbounded();

        (
            Sender { inner: tx },
            Receiver {
                inner: rx,
                stats: Arc::new(ChannelStats::default()),
            },
        )
    }
}
