//! Reply correlation.
//!
//! Requests that expect a response register a single-use slot keyed by the
//! request packet's id. The receive loop routes inbound replies to the
//! waiting slot by the reply's `reply_to` field. Slots are removed on
//! match, on timeout by the waiting side, and in bulk on disconnect so no
//! waiter blocks forever.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::protocol::{Packet, PacketId};

/// Table of in-flight requests awaiting replies.
#[derive(Debug, Default)]
pub struct ReplyTable {
    slots: Mutex<HashMap<PacketId, oneshot::Sender<Packet>>>,
}

impl ReplyTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slot for a request id and get the receiving end.
    pub fn register(&self, id: PacketId) -> oneshot::Receiver<Packet> {
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        rx
    }

    /// Deliver a reply to the slot it answers.
    ///
    /// Returns `false` when no slot matches (late, duplicate, or
    /// unsolicited reply); the caller logs and drops the packet.
    pub fn complete(&self, reply: Packet) -> bool {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&reply.reply_to);

        match slot {
            // A send error means the waiter already gave up (timed out);
            // that counts as unmatched.
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Remove a slot without delivering, e.g. when the waiter times out.
    pub fn remove(&self, id: &PacketId) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }

    /// Drop every slot, waking all waiters with a closed-channel error.
    ///
    /// Called on disconnect so no caller stays blocked on a reply that can
    /// never arrive.
    pub fn fail_all(&self) {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if no requests are outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
