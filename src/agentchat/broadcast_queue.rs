//! Deferred message delivery between channels.
//!
//! When an agent produces messages, every *other* channel has to see them before its own
//! agent runs again. Delivering eagerly would make each turn wait on every channel, so the
//! [`BroadcastQueue`] only records pending batches per channel hash. Delivery happens
//! lazily in [`BroadcastQueue::ensure_synchronized`], right before the chat uses that
//! channel again.
//!
//! Enqueueing never waits on a channel. Synchronization of one channel is exclusive: a
//! second caller waits until the first has finished delivering.

use crate::agentchat::agent_chat::AgentChatError;
use crate::agentchat::channel::AgentChannel;
use crate::agentchat::message::ChatMessage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A channel shared between the chat's channel map and in-flight operations.
pub type SharedChannel = Arc<tokio::sync::Mutex<Box<dyn AgentChannel>>>;

/// A channel together with the hash of the channel keys that identifies it.
#[derive(Clone)]
pub struct ChannelReference {
    pub hash: String,
    pub channel: SharedChannel,
}

impl ChannelReference {
    pub fn new(hash: impl Into<String>, channel: SharedChannel) -> Self {
        Self {
            hash: hash.into(),
            channel,
        }
    }
}

#[derive(Default)]
struct ChannelQueue {
    pending: Mutex<VecDeque<ChatMessage>>,
    // Serializes delivery to one channel without blocking enqueue.
    delivery: tokio::sync::Mutex<()>,
}

impl ChannelQueue {
    fn pending(&self) -> MutexGuard<'_, VecDeque<ChatMessage>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-channel FIFO of messages waiting to be received.
#[derive(Default)]
pub struct BroadcastQueue {
    queues: Mutex<HashMap<String, Arc<ChannelQueue>>>,
}

impl BroadcastQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, hash: &str) -> Arc<ChannelQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(queues.entry(hash.to_string()).or_default())
    }

    /// Append `messages` to the pending queue of every referenced channel.
    pub fn enqueue(&self, channel_refs: &[ChannelReference], messages: &[ChatMessage]) {
        if messages.is_empty() {
            return;
        }
        for channel_ref in channel_refs {
            let queue = self.queue_for(&channel_ref.hash);
            queue.pending().extend(messages.iter().cloned());
            log::trace!(
                "Queued {} messages for channel {}",
                messages.len(),
                channel_ref.hash
            );
        }
    }

    /// Deliver everything pending for `channel_ref` before returning.
    ///
    /// A batch leaves the queue only after the channel accepted it. If `receive` fails,
    /// the batch stays queued for the next attempt and the error is returned as
    /// [`AgentChatError::ChannelSynchronization`].
    pub async fn ensure_synchronized(
        &self,
        channel_ref: &ChannelReference,
    ) -> Result<(), AgentChatError> {
        let queue = self.queue_for(&channel_ref.hash);
        let _delivering = queue.delivery.lock().await;

        loop {
            let batch: Vec<ChatMessage> = {
                let pending = queue.pending();
                if pending.is_empty() {
                    break;
                }
                pending.iter().cloned().collect()
            };

            let mut channel = channel_ref.channel.lock().await;
            channel
                .receive(&batch)
                .await
                .map_err(|source| AgentChatError::ChannelSynchronization {
                    channel: channel_ref.hash.clone(),
                    source,
                })?;
            drop(channel);

            queue.pending().drain(..batch.len());
            log::trace!(
                "Delivered {} messages to channel {}",
                batch.len(),
                channel_ref.hash
            );
        }
        Ok(())
    }

    /// Number of messages waiting for the channel identified by `hash`.
    pub fn pending_count(&self, hash: &str) -> usize {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .get(hash)
            .map(|queue| queue.pending().len())
            .unwrap_or(0)
    }

    /// `true` when nothing is waiting for the channel identified by `hash`.
    pub fn is_synchronized(&self, hash: &str) -> bool {
        self.pending_count(hash) == 0
    }

    /// Forget every pending message.
    pub fn clear(&self) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
