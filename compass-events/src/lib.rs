#![deny(missing_docs)]
//! Ordered, per-run event bus and SSE-style multiplexer.
//!
//! [`EventFrame`] is the wire shape carried to every subscriber:
//! `{event, completion_id, agent_execution_id, seq, data}`. [`EventBus`]
//! fans a single producer's events out to zero or more subscribers per
//! `agent_execution_id`, in insertion order, with no deduplication. A
//! subscriber's stream ends when [`EventBus::finish`] is called for its
//! run or the producer drops its sender.
//!
//! `seq` is not allocated here — it comes from the persistence gateway
//! (a single writer per run), so fan-out order always matches
//! allocation order.

pub mod vocabulary;

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A single frame delivered to subscribers of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Opaque event name (see [`vocabulary`]).
    pub event: String,
    /// The assistant message this run is producing.
    pub completion_id: String,
    /// The run this frame belongs to.
    pub agent_execution_id: String,
    /// Per-run sequence number, allocated by the persistence gateway.
    pub seq: i64,
    /// Event payload.
    pub data: serde_json::Value,
}

impl EventFrame {
    /// Construct a new frame.
    pub fn new(
        event: impl Into<String>,
        completion_id: impl Into<String>,
        agent_execution_id: impl Into<String>,
        seq: i64,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event: event.into(),
            completion_id: completion_id.into(),
            agent_execution_id: agent_execution_id.into(),
            seq,
            data,
        }
    }
}

/// An item delivered on a subscriber's channel: either a frame, or the
/// terminal sentinel marking the run finished.
#[derive(Debug, Clone)]
pub enum StreamItem {
    /// A single event frame.
    Frame(EventFrame),
    /// The run has finished; no further frames will arrive.
    End,
}

/// A subscriber's receiving half. Wraps a `broadcast::Receiver` so
/// callers don't need to depend on `tokio::sync::broadcast` directly.
pub struct EventSubscriber {
    inner: broadcast::Receiver<StreamItem>,
}

impl EventSubscriber {
    /// Await the next item. Returns `None` once the channel is closed
    /// (all producers dropped without an explicit `finish`).
    ///
    /// A subscriber that falls far enough behind the broadcast channel's
    /// capacity will silently skip missed frames (lagged) rather than
    /// error the caller; this only matters for subscribers that attach
    /// well after a very long run has been emitting rapidly.
    pub async fn recv(&mut self) -> Option<StreamItem> {
        loop {
            match self.inner.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

const CHANNEL_CAPACITY: usize = 1024;

/// Process-wide (or facade-wide) fan-out point for run events.
///
/// One broadcast channel is created per `agent_execution_id` the first
/// time it is emitted to or subscribed against, and is dropped once
/// [`EventBus::finish`] has been called and the last subscriber drops.
pub struct EventBus {
    channels: Mutex<HashMap<String, broadcast::Sender<StreamItem>>>,
}

impl EventBus {
    /// Create a new, empty event bus.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender_for(&self, agent_execution_id: &str) -> broadcast::Sender<StreamItem> {
        let mut channels = self.channels.lock().expect("event bus mutex poisoned");
        channels
            .entry(agent_execution_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Subscribe to a run's events. Safe to call before the run has
    /// emitted anything.
    pub fn subscribe(&self, agent_execution_id: &str) -> EventSubscriber {
        EventSubscriber {
            inner: self.sender_for(agent_execution_id).subscribe(),
        }
    }

    /// Enqueue a frame for delivery to current (and future, before
    /// `finish`) subscribers of its run. A frame with no subscribers
    /// yet attached is simply dropped — there is no replay buffer.
    pub fn emit(&self, frame: EventFrame) {
        let sender = self.sender_for(&frame.agent_execution_id);
        let _ = sender.send(StreamItem::Frame(frame));
    }

    /// Mark a run finished: deliver the terminal sentinel to every
    /// current subscriber and drop the channel so a later emit for the
    /// same id starts fresh.
    pub fn finish(&self, agent_execution_id: &str) {
        let sender = {
            let mut channels = self.channels.lock().expect("event bus mutex poisoned");
            channels.remove(agent_execution_id)
        };
        if let Some(sender) = sender {
            let _ = sender.send(StreamItem::End);
        }
    }

    /// Number of runs with a live channel (has been emitted to or
    /// subscribed against, and not yet finished).
    pub fn active_run_count(&self) -> usize {
        self.channels.lock().expect("event bus mutex poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
