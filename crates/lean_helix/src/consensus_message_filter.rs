//! Admission of incoming messages by height.
//!
//! Messages of past heights and the member's own messages are dropped. Messages of future heights
//! are cached, bounded by how far ahead they are, by how many messages each sender may occupy and
//! by the total cache size, and are released in arrival order once their height becomes current.
//! Senders are not authenticated here, so the total bound holds whatever ids messages claim.
use std::collections::{BTreeMap, HashMap, VecDeque};

use lean_helix_config::config::FutureMsgLimitsConfig;
use tracing::{debug, trace};

use crate::messages::ConsensusMessage;
use crate::metrics::{record_dropped_message, DropReason, LEAN_HELIX_CACHED_MESSAGES};
use crate::types::{BlockHeight, MemberId};

#[cfg(test)]
#[path = "consensus_message_filter_test.rs"]
mod consensus_message_filter_test;

/// The arrival order of a cached message.
type Sequence = u64;

#[derive(Debug)]
pub struct ConsensusMessageFilter {
    my_id: MemberId,
    current_height: BlockHeight,
    limits: FutureMsgLimitsConfig,
    future_messages: BTreeMap<BlockHeight, BTreeMap<Sequence, ConsensusMessage>>,
    // The cached messages of each sender, oldest first.
    cached_by_sender: HashMap<MemberId, VecDeque<(BlockHeight, Sequence)>>,
    next_sequence: Sequence,
}

impl ConsensusMessageFilter {
    pub fn new(my_id: MemberId, height: BlockHeight, limits: FutureMsgLimitsConfig) -> Self {
        Self {
            my_id,
            current_height: height,
            limits,
            future_messages: BTreeMap::new(),
            cached_by_sender: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn current_height(&self) -> BlockHeight {
        self.current_height
    }

    /// Returns the message if it belongs to the current height. Otherwise it is cached or
    /// dropped.
    pub fn filter(&mut self, message: ConsensusMessage) -> Option<ConsensusMessage> {
        let height = message.height();
        let sender = message.sender();
        if sender == self.my_id {
            trace!("Dropping own message.");
            record_dropped_message(DropReason::OwnMessage);
            return None;
        }
        if height < self.current_height {
            trace!(%height, "Dropping message of a past height.");
            record_dropped_message(DropReason::PastHeight);
            return None;
        }
        if height == self.current_height {
            return Some(message);
        }
        if height.0 > self.current_height.0.saturating_add(self.limits.future_height_limit) {
            debug!(
                %height,
                current_height = %self.current_height,
                "Dropping message too far ahead."
            );
            record_dropped_message(DropReason::TooFarAhead);
            return None;
        }
        self.cache(sender, message);
        None
    }

    fn cache(&mut self, sender: MemberId, message: ConsensusMessage) {
        let height = message.height();
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!(%height, %sender, "Caching message of a future height.");
        self.future_messages.entry(height).or_default().insert(sequence, message);
        let cached = self.cached_by_sender.entry(sender).or_default();
        cached.push_back((height, sequence));
        if cached.len() > self.limits.per_sender_limit {
            let (evicted_height, evicted_sequence) =
                cached.pop_front().expect("Sender has cached messages");
            debug!(%sender, height = %evicted_height, "Evicting the oldest cached message.");
            record_dropped_message(DropReason::SenderLimit);
            self.remove_cached(evicted_height, evicted_sequence);
        } else if self.cached_messages_count() > self.limits.total_cached_limit {
            self.evict_oldest();
        }
        LEAN_HELIX_CACHED_MESSAGES.set_lossy(self.cached_messages_count_u64());
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .future_messages
            .iter()
            .filter_map(|(height, messages)| Some((*messages.keys().next()?, *height)))
            .min();
        let Some((sequence, height)) = oldest else {
            return;
        };
        let Some(message) = self.remove_cached(height, sequence) else {
            return;
        };
        let sender = message.sender();
        debug!(%sender, %height, "Cache is full, evicting the oldest cached message.");
        record_dropped_message(DropReason::CacheFull);
        if let Some(cached) = self.cached_by_sender.get_mut(&sender) {
            cached.retain(|entry| *entry != (height, sequence));
            if cached.is_empty() {
                self.cached_by_sender.remove(&sender);
            }
        }
    }

    fn remove_cached(
        &mut self,
        height: BlockHeight,
        sequence: Sequence,
    ) -> Option<ConsensusMessage> {
        let messages = self.future_messages.get_mut(&height)?;
        let message = messages.remove(&sequence);
        if messages.is_empty() {
            self.future_messages.remove(&height);
        }
        message
    }

    /// Moves to `height`, returning the cached messages of that height in arrival order. Cached
    /// messages of lower heights are dropped.
    pub fn set_height(&mut self, height: BlockHeight) -> Vec<ConsensusMessage> {
        assert!(
            height >= self.current_height,
            "Height must not decrease: {} -> {height}",
            self.current_height
        );
        self.current_height = height;
        let mut later = self.future_messages.split_off(&height);
        self.future_messages = later.split_off(&height.unchecked_next());
        let messages: Vec<_> = later
            .remove(&height)
            .map(|messages| messages.into_values().collect())
            .unwrap_or_default();
        self.cached_by_sender.retain(|_, cached| {
            cached.retain(|(cached_height, _)| *cached_height > height);
            !cached.is_empty()
        });
        LEAN_HELIX_CACHED_MESSAGES.set_lossy(self.cached_messages_count_u64());
        messages
    }

    pub fn cached_messages_count(&self) -> usize {
        self.future_messages.values().map(BTreeMap::len).sum()
    }

    fn cached_messages_count_u64(&self) -> u64 {
        u64::try_from(self.cached_messages_count()).unwrap_or(u64::MAX)
    }
}
