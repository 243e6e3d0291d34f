//! De-duplicating storage of the consensus messages of every active height.
//!
//! Storing is idempotent: a `store_*` call returns false, and changes nothing, when a message with
//! the same key is already present. Keys are:
//! - PrePrepare: (height, view).
//! - Prepare / Commit: (height, view, block hash, sender).
//! - ViewChange: (height, view, sender).
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::trace;

use crate::messages::{
    CommitMessage,
    PrePrepareMessage,
    PrepareMessage,
    PreparedMessages,
    SignedContent,
    ViewChangeMessage,
};
use crate::types::{BlockHash, BlockHeight, MemberId, View};

#[cfg(test)]
#[path = "message_storage_test.rs"]
mod message_storage_test;

type VotesByBlock<T> = HashMap<BlockHash, BTreeMap<MemberId, T>>;

#[derive(Debug, Default)]
struct HeightLogs {
    pre_prepares: BTreeMap<View, PrePrepareMessage>,
    prepares: BTreeMap<View, VotesByBlock<PrepareMessage>>,
    commits: BTreeMap<View, VotesByBlock<CommitMessage>>,
    view_changes: BTreeMap<View, BTreeMap<MemberId, ViewChangeMessage>>,
}

/// Shared between the consensus actor and the tasks it spawns, hence internally locked. All
/// operations hold the lock for a single map lookup or a scan of one height.
#[derive(Debug, Default)]
pub struct MessageStorage {
    logs: Mutex<HashMap<BlockHeight, HeightLogs>>,
}

impl MessageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_height<R>(&self, height: BlockHeight, f: impl FnOnce(&mut HeightLogs) -> R) -> R {
        let mut logs = self.logs.lock().expect("message storage lock poisoned");
        f(logs.entry(height).or_default())
    }

    fn read_height<R>(
        &self,
        height: BlockHeight,
        default: R,
        f: impl FnOnce(&HeightLogs) -> R,
    ) -> R {
        let logs = self.logs.lock().expect("message storage lock poisoned");
        logs.get(&height).map_or(default, f)
    }

    pub fn store_pre_prepare(&self, message: PrePrepareMessage) -> bool {
        let content = message.content();
        let (height, view) = (content.height, content.view);
        self.with_height(height, |logs| {
            if logs.pre_prepares.contains_key(&view) {
                trace!(%height, view, "Duplicate PrePrepare.");
                return false;
            }
            logs.pre_prepares.insert(view, message);
            true
        })
    }

    pub fn store_prepare(&self, message: PrepareMessage) -> bool {
        let content = &message.content;
        let (height, view, block_hash) = (content.height, content.view, content.block_hash);
        self.with_height(height, |logs| {
            insert_vote(logs.prepares.entry(view).or_default(), block_hash, message)
        })
    }

    pub fn store_commit(&self, message: CommitMessage) -> bool {
        let content = &message.content;
        let (height, view, block_hash) = (content.height, content.view, content.block_hash);
        self.with_height(height, |logs| {
            insert_vote(logs.commits.entry(view).or_default(), block_hash, message)
        })
    }

    pub fn store_view_change(&self, message: ViewChangeMessage) -> bool {
        let content = message.content();
        let (height, view) = (content.height, content.view);
        let sender = message.signed.sender_id();
        self.with_height(height, |logs| {
            let senders = logs.view_changes.entry(view).or_default();
            if senders.contains_key(&sender) {
                return false;
            }
            senders.insert(sender, message);
            true
        })
    }

    pub fn get_pre_prepare(&self, height: BlockHeight, view: View) -> Option<PrePrepareMessage> {
        self.read_height(height, None, |logs| logs.pre_prepares.get(&view).cloned())
    }

    /// The PrePrepare of the highest view stored for `height`.
    pub fn get_latest_pre_prepare(&self, height: BlockHeight) -> Option<PrePrepareMessage> {
        self.read_height(height, None, |logs| {
            logs.pre_prepares.last_key_value().map(|(_, message)| message.clone())
        })
    }

    pub fn get_prepare_messages(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: &BlockHash,
    ) -> Vec<PrepareMessage> {
        self.read_height(height, Vec::new(), |logs| votes_of(&logs.prepares, view, block_hash))
    }

    pub fn get_prepare_sender_ids(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: &BlockHash,
    ) -> Vec<MemberId> {
        self.read_height(height, Vec::new(), |logs| {
            voters_of(&logs.prepares, view, block_hash)
        })
    }

    pub fn get_commit_messages(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: &BlockHash,
    ) -> Vec<CommitMessage> {
        self.read_height(height, Vec::new(), |logs| votes_of(&logs.commits, view, block_hash))
    }

    pub fn get_commit_sender_ids(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: &BlockHash,
    ) -> Vec<MemberId> {
        self.read_height(height, Vec::new(), |logs| voters_of(&logs.commits, view, block_hash))
    }

    /// Whether `sender` has a Prepare of `view` stored, for any block.
    pub fn has_prepare_from(&self, height: BlockHeight, view: View, sender: MemberId) -> bool {
        self.read_height(height, false, |logs| voted_in_view(&logs.prepares, view, sender))
    }

    /// Whether `sender` has a Commit of `view` stored, for any block.
    pub fn has_commit_from(&self, height: BlockHeight, view: View, sender: MemberId) -> bool {
        self.read_height(height, false, |logs| voted_in_view(&logs.commits, view, sender))
    }

    pub fn get_view_change_messages(
        &self,
        height: BlockHeight,
        view: View,
    ) -> Vec<ViewChangeMessage> {
        self.read_height(height, Vec::new(), |logs| {
            logs.view_changes
                .get(&view)
                .map(|senders| senders.values().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Returns the PrePrepare and `quorum_size - 1` matching Prepares of the highest view of
    /// `height` which has them, or None if no view is prepared.
    pub fn extract_prepared_messages(
        &self,
        height: BlockHeight,
        quorum_size: usize,
    ) -> Option<PreparedMessages> {
        let required_prepares = quorum_size.saturating_sub(1);
        self.read_height(height, None, |logs| {
            logs.pre_prepares.iter().rev().find_map(|(view, pre_prepare)| {
                let prepares = votes_of(&logs.prepares, *view, &pre_prepare.content().block_hash);
                (prepares.len() >= required_prepares).then(|| PreparedMessages {
                    pre_prepare: pre_prepare.clone(),
                    prepares: prepares.into_iter().take(required_prepares).collect(),
                })
            })
        })
    }

    /// Drops every message of `height`.
    pub fn clear_height_logs(&self, height: BlockHeight) {
        let mut logs = self.logs.lock().expect("message storage lock poisoned");
        logs.remove(&height);
    }

    /// Drops every message of the heights below `height`.
    pub fn clear_heights_below(&self, height: BlockHeight) {
        let mut logs = self.logs.lock().expect("message storage lock poisoned");
        logs.retain(|stored_height, _| *stored_height >= height);
    }

    pub fn stored_heights(&self) -> Vec<BlockHeight> {
        let logs = self.logs.lock().expect("message storage lock poisoned");
        let mut heights: Vec<_> = logs.keys().copied().collect();
        heights.sort();
        heights
    }
}

fn insert_vote<C>(
    votes: &mut VotesByBlock<SignedContent<C>>,
    block_hash: BlockHash,
    message: SignedContent<C>,
) -> bool {
    let senders = votes.entry(block_hash).or_default();
    let sender = message.sender.member_id;
    if senders.contains_key(&sender) {
        return false;
    }
    senders.insert(sender, message);
    true
}

fn votes_of<T: Clone>(
    votes: &BTreeMap<View, VotesByBlock<T>>,
    view: View,
    block_hash: &BlockHash,
) -> Vec<T> {
    votes
        .get(&view)
        .and_then(|by_block| by_block.get(block_hash))
        .map(|senders| senders.values().cloned().collect())
        .unwrap_or_default()
}

fn voters_of<T>(
    votes: &BTreeMap<View, VotesByBlock<T>>,
    view: View,
    block_hash: &BlockHash,
) -> Vec<MemberId> {
    votes
        .get(&view)
        .and_then(|by_block| by_block.get(block_hash))
        .map(|senders| senders.keys().copied().collect())
        .unwrap_or_default()
}

fn voted_in_view<T>(
    votes: &BTreeMap<View, VotesByBlock<T>>,
    view: View,
    sender: MemberId,
) -> bool {
    votes
        .get(&view)
        .is_some_and(|by_block| by_block.values().any(|senders| senders.contains_key(&sender)))
}
