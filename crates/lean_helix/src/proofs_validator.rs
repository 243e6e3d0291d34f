//! Validation of the quorum certificates carried by consensus messages.
//!
//! All checks are pure: they only read the given messages and committee and never touch
//! storage. A failed check means the carrying message is dropped.
use std::collections::HashSet;

use crate::messages::{BlockProof, PreparedProof, ViewChangeConfirmation};
use crate::quorum::{leader_for_view, quorum_size};
use crate::types::{BlockHeight, KeyManager, MemberId, View};

#[cfg(test)]
#[path = "proofs_validator_test.rs"]
mod proofs_validator_test;

/// Validates a prepared proof which justifies moving to `target_view` of `target_height`.
///
/// A missing or empty proof is valid: a member which prepared nothing may still vote for a view
/// change. A proof with only one of its parts is malformed and rejected.
pub fn validate_prepared_proof(
    target_height: BlockHeight,
    target_view: View,
    proof: Option<&PreparedProof>,
    quorum_size: usize,
    key_manager: &dyn KeyManager,
    committee: &[MemberId],
    leader_for_view: impl Fn(View) -> MemberId,
) -> bool {
    let Some(proof) = proof else {
        return true;
    };
    let pre_prepare = match (&proof.pre_prepare, proof.prepares.is_empty()) {
        (None, true) => return true,
        (Some(pre_prepare), false) => pre_prepare,
        _ => return false,
    };
    let content = &pre_prepare.content;
    if content.height != target_height || content.view >= target_view {
        return false;
    }
    if proof.prepares.len() < quorum_size.saturating_sub(1) {
        return false;
    }
    let leader = leader_for_view(content.view);
    if pre_prepare.sender_id() != leader || !pre_prepare.verify(key_manager) {
        return false;
    }

    let mut senders = HashSet::new();
    proof.prepares.iter().all(|prepare| {
        let sender = prepare.sender_id();
        prepare.content.height == content.height
            && prepare.content.view == content.view
            && prepare.content.block_hash == content.block_hash
            && sender != leader
            && committee.contains(&sender)
            && senders.insert(sender)
            && prepare.verify(key_manager)
    })
}

/// Returns the prepared proof of the highest view among `confirmations`, if any carries one.
pub fn highest_prepared_proof<'a>(
    confirmations: impl IntoIterator<Item = &'a ViewChangeConfirmation>,
) -> Option<&'a PreparedProof> {
    confirmations
        .into_iter()
        .filter_map(|confirmation| confirmation.content.prepared_proof.as_ref())
        .filter(|proof| proof.pre_prepare.is_some())
        .max_by_key(|proof| proof.view())
}

/// Validates messages against the committee of one height.
pub struct ProofsValidator<'a> {
    key_manager: &'a dyn KeyManager,
    committee: &'a [MemberId],
    quorum_size: usize,
}

impl<'a> ProofsValidator<'a> {
    pub fn new(key_manager: &'a dyn KeyManager, committee: &'a [MemberId]) -> Self {
        Self { key_manager, committee, quorum_size: quorum_size(committee.len()) }
    }

    pub fn quorum_size(&self) -> usize {
        self.quorum_size
    }

    pub fn validate_prepared_proof(
        &self,
        target_height: BlockHeight,
        target_view: View,
        proof: Option<&PreparedProof>,
    ) -> bool {
        validate_prepared_proof(
            target_height,
            target_view,
            proof,
            self.quorum_size,
            self.key_manager,
            self.committee,
            |view| leader_for_view(self.committee, view),
        )
    }

    /// Validates a signed vote of a committee member to move to `target_view`.
    pub fn validate_view_change(
        &self,
        target_height: BlockHeight,
        target_view: View,
        confirmation: &ViewChangeConfirmation,
    ) -> bool {
        let content = &confirmation.content;
        content.height == target_height
            && content.view == target_view
            && self.committee.contains(&confirmation.sender_id())
            && confirmation.verify(self.key_manager)
            && self.validate_prepared_proof(
                target_height,
                target_view,
                content.prepared_proof.as_ref(),
            )
    }

    /// Validates that `confirmations` is a quorum of valid votes from distinct members, all for
    /// `view` of `height`.
    pub fn validate_new_view_confirmations(
        &self,
        height: BlockHeight,
        view: View,
        confirmations: &[ViewChangeConfirmation],
    ) -> bool {
        if confirmations.len() < self.quorum_size {
            return false;
        }
        let mut senders = HashSet::new();
        confirmations.iter().all(|confirmation| {
            senders.insert(confirmation.sender_id())
                && self.validate_view_change(height, view, confirmation)
        })
    }

    /// Validates the commits of a block proof: a quorum of distinct committee members signed
    /// commits for the proven block, each with a valid share of `random_seed`, and the aggregated
    /// random seed signature matches the shares.
    pub fn validate_block_proof(&self, proof: &BlockProof, random_seed: u64) -> bool {
        if proof.commits.len() < self.quorum_size {
            return false;
        }
        let mut senders = HashSet::new();
        let commits_valid = proof.commits.iter().all(|commit| {
            let sender = commit.sender_id();
            let content = &commit.content;
            content.height == proof.height
                && content.view == proof.view
                && content.block_hash == proof.block_hash
                && self.committee.contains(&sender)
                && senders.insert(sender)
                && commit.verify(self.key_manager)
                && self.key_manager.verify_random_seed(
                    proof.height,
                    random_seed,
                    &content.random_seed_share,
                    sender,
                )
        });
        if !commits_valid {
            return false;
        }
        let shares: Vec<_> = proof
            .commits
            .iter()
            .map(|commit| (commit.sender_id(), commit.content.random_seed_share.clone()))
            .collect();
        self.key_manager.aggregate_random_seed(proof.height, &shares) == proof.random_seed_signature
    }
}
