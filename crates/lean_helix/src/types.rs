//! Types for interfacing between consensus and the host application.
//!
//! The host supplies the capabilities consensus depends on (signing, block creation and
//! validation, message transport and committee membership) and is notified of every committed
//! block.
use std::fmt::{Debug, Display, Formatter};

use async_trait::async_trait;
#[cfg(any(feature = "testing", test))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::messages::{BlockProof, ConsensusMessage};

/// A sub-round within a height. Starts at 0 for every height and grows on every view change.
pub type View = u64;

/// The sequence number of the block being agreed upon.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct BlockHeight(pub u64);

impl BlockHeight {
    pub fn unchecked_next(&self) -> Self {
        Self(self.0.checked_add(1).expect("Block height overflow"))
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a committee member, as known by the host's key manager.
#[derive(
    Debug, Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
pub struct MemberId(pub u64);

impl From<u64> for MemberId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "member_{}", self.0)
    }
}

/// The digest of a block, calculated by the host.
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct BlockHash(pub [u8; 32]);

impl Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(self, f)
    }
}

#[derive(Default, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

/// A block as seen by consensus: opaque content created and validated by [`BlockUtils`].
#[derive(Debug, Default, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Block {
    pub height: BlockHeight,
    pub body: Vec<u8>,
}

/// Signing capability of the local member.
///
/// A failed verification is not an error, it only means the message is dropped.
#[cfg_attr(any(feature = "testing", test), automock)]
pub trait KeyManager: Send + Sync {
    fn my_member_id(&self) -> MemberId;

    fn sign(&self, data: &[u8]) -> Signature;

    fn verify(&self, data: &[u8], signature: &Signature, member_id: MemberId) -> bool;

    /// Signs this member's share of the random seed of `height`.
    fn sign_random_seed(&self, height: BlockHeight, random_seed: u64) -> Signature;

    fn verify_random_seed(
        &self,
        height: BlockHeight,
        random_seed: u64,
        share: &Signature,
        member_id: MemberId,
    ) -> bool;

    /// Combines a quorum of random seed shares into the random seed signature of a block proof.
    fn aggregate_random_seed(
        &self,
        height: BlockHeight,
        shares: &[(MemberId, Signature)],
    ) -> Signature;
}

/// Interface for consensus to create and validate block content.
///
/// The async calls may take a long time and are raced against cancellation by consensus, so
/// implementations must tolerate being dropped mid-way.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait BlockUtils: Send + Sync {
    /// Builds a new block on top of `prev_block` (`None` for the first block).
    async fn request_new_block_proposal(
        &self,
        height: BlockHeight,
        prev_block: Option<Block>,
    ) -> Result<(Block, BlockHash), ConsensusError>;

    /// Validates the content of a block proposed by the leader.
    async fn validate_block_proposal(
        &self,
        height: BlockHeight,
        block: Block,
        block_hash: BlockHash,
        prev_block: Option<Block>,
    ) -> Result<(), ConsensusError>;

    /// Returns true iff `block_hash` is the hash of `block` at `height`.
    fn validate_block_commitment(
        &self,
        height: BlockHeight,
        block: &Block,
        block_hash: &BlockHash,
    ) -> bool;
}

/// Transport of consensus messages to other committee members. Serialization of the message is
/// the host's concern.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait Communication: Send + Sync {
    async fn send_consensus_message(
        &self,
        recipients: Vec<MemberId>,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError>;
}

#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait Membership: Send + Sync {
    /// Returns the committee of `height`. The order defines the leader of each view:
    /// `committee[view % committee.len()]`.
    async fn request_ordered_committee(
        &self,
        height: BlockHeight,
        random_seed: u64,
    ) -> Result<Vec<MemberId>, ConsensusError>;
}

/// Notified exactly once per height, in height order, when consensus commits a block.
#[cfg_attr(any(feature = "testing", test), automock)]
#[async_trait]
pub trait CommitObserver: Send + Sync {
    async fn on_commit(&self, height: BlockHeight, block: Block, proof: BlockProof);
}

/// A block committed by consensus together with the quorum certificate proving it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub height: BlockHeight,
    pub view: View,
    pub block: Block,
    pub proof: BlockProof,
}

#[derive(thiserror::Error, PartialEq, Debug)]
pub enum ConsensusError {
    #[error("Block proposal failed: {0}")]
    BlockProposal(String),
    #[error("Block validation failed: {0}")]
    BlockValidation(String),
    // Indicates an error in communication between consensus and the node's networking component.
    // As opposed to an error between this node and peer nodes.
    #[error("{0}")]
    InternalNetworkError(String),
    #[error("Failed to get the committee: {0}")]
    Membership(String),
    #[error("{0} timed out")]
    Timeout(String),
}
