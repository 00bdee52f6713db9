//! Tag allocation for proxy-originated STP/1 requests.
//!
//! The proxy injects its own requests (schema discovery) onto the host wire
//! and must route the replies back without disturbing client traffic. Each
//! request takes the lowest free tag; the reply rendezvous is a oneshot
//! channel so the requester simply awaits it.

use std::collections::HashMap;
use stp_wire::Stp1Message;
use tokio::sync::{Mutex, oneshot};
use tracing::warn;

#[derive(Debug, Default)]
pub struct TagAllocator {
    slots: Mutex<HashMap<u32, oneshot::Sender<Stp1Message>>>,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the lowest unoccupied tag, starting from 1.
    ///
    /// The returned receiver resolves with the host's reply, or with a recv
    /// error if the session resets before the reply arrives.
    pub async fn register(&self) -> (u32, oneshot::Receiver<Stp1Message>) {
        let mut slots = self.slots.lock().await;
        let mut tag = 1u32;
        while slots.contains_key(&tag) {
            tag += 1;
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(tag, tx);
        (tag, rx)
    }

    /// Offer an inbound message to the allocator.
    ///
    /// If the message's tag matches an outstanding request the slot is
    /// removed first (the requester may register new tags from its
    /// continuation) and the message is handed over; `Ok(())` means claimed.
    /// Otherwise the message is returned so the router can treat it as
    /// client-bound.
    pub async fn claim(&self, msg: Stp1Message) -> Result<(), Stp1Message> {
        let sender = self.slots.lock().await.remove(&msg.tag);
        match sender {
            Some(tx) => {
                if let Err(msg) = tx.send(msg) {
                    // requester gave up; the reply must still not reach a client
                    warn!(tag = msg.tag, "reply arrived for an abandoned request");
                }
                Ok(())
            }
            None => Err(msg),
        }
    }

    /// Release a tag whose reply will never be consumed (request timeout).
    pub async fn cancel(&self, tag: u32) {
        self.slots.lock().await.remove(&tag);
    }

    /// Number of requests still waiting for a reply. A non-zero count after
    /// a completed exchange means the host swallowed a request.
    pub async fn outstanding(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Drop every outstanding slot; waiting requesters observe a recv error.
    pub async fn clear(&self) {
        self.slots.lock().await.clear();
    }
}
