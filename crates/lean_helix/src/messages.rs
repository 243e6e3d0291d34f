//! Consensus messages exchanged between committee members.
//!
//! Every message is a content struct signed by its sender. Messages are immutable values: proofs
//! embedded in later messages (prepared proofs, view change confirmations) are owned copies of
//! the original signed content.

#[cfg(test)]
use enum_as_inner::EnumAsInner;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{Block, BlockHash, BlockHeight, KeyManager, MemberId, Signature, View};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    PrePrepare,
    Prepare,
    Commit,
    ViewChange,
    NewView,
}

/// Content which is signed by its sender. The message type is part of the signed bytes so a
/// signature over one kind of content can't be replayed as another kind with the same fields.
pub trait SignedPayload: Serialize {
    const MESSAGE_TYPE: MessageType;

    fn signing_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(Self::MESSAGE_TYPE, self))
            .expect("Serializing consensus content into memory can't fail")
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SenderSignature {
    pub member_id: MemberId,
    pub signature: Signature,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignedContent<T> {
    pub content: T,
    pub sender: SenderSignature,
}

impl<T: SignedPayload> SignedContent<T> {
    pub fn sign(content: T, key_manager: &dyn KeyManager) -> Self {
        let signature = key_manager.sign(&content.signing_bytes());
        let sender = SenderSignature { member_id: key_manager.my_member_id(), signature };
        Self { content, sender }
    }

    pub fn verify(&self, key_manager: &dyn KeyManager) -> bool {
        key_manager.verify(
            &self.content.signing_bytes(),
            &self.sender.signature,
            self.sender.member_id,
        )
    }

    pub fn sender_id(&self) -> MemberId {
        self.sender.member_id
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrePrepareContent {
    pub height: BlockHeight,
    pub view: View,
    pub block_hash: BlockHash,
}

impl SignedPayload for PrePrepareContent {
    const MESSAGE_TYPE: MessageType = MessageType::PrePrepare;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrepareContent {
    pub height: BlockHeight,
    pub view: View,
    pub block_hash: BlockHash,
}

impl SignedPayload for PrepareContent {
    const MESSAGE_TYPE: MessageType = MessageType::Prepare;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommitContent {
    pub height: BlockHeight,
    pub view: View,
    pub block_hash: BlockHash,
    /// The sender's share of the random seed of this height.
    pub random_seed_share: Signature,
}

impl SignedPayload for CommitContent {
    const MESSAGE_TYPE: MessageType = MessageType::Commit;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ViewChangeContent {
    pub height: BlockHeight,
    /// The view the sender wants to move to.
    pub view: View,
    /// The highest view in which the sender saw a quorum of prepares, if any.
    pub prepared_proof: Option<PreparedProof>,
}

impl SignedPayload for ViewChangeContent {
    const MESSAGE_TYPE: MessageType = MessageType::ViewChange;
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewViewContent {
    pub height: BlockHeight,
    pub view: View,
    /// The quorum of view change votes justifying the new view.
    pub confirmations: Vec<ViewChangeConfirmation>,
}

impl SignedPayload for NewViewContent {
    const MESSAGE_TYPE: MessageType = MessageType::NewView;
}

pub type SignedPrePrepare = SignedContent<PrePrepareContent>;
pub type PrepareMessage = SignedContent<PrepareContent>;
pub type CommitMessage = SignedContent<CommitContent>;
/// A signed view change vote, without the block it may carry.
pub type ViewChangeConfirmation = SignedContent<ViewChangeContent>;

/// Block proposal by the leader of a view.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PrePrepareMessage {
    pub signed: SignedPrePrepare,
    pub block: Block,
}

impl PrePrepareMessage {
    pub fn content(&self) -> &PrePrepareContent {
        &self.signed.content
    }
}

/// A request to move to a new view, sent to the leader of that view. When the vote carries a
/// prepared proof, `block` is the block the proof refers to.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ViewChangeMessage {
    pub signed: ViewChangeConfirmation,
    pub block: Option<Block>,
}

impl ViewChangeMessage {
    pub fn content(&self) -> &ViewChangeContent {
        &self.signed.content
    }
}

/// Sent by the leader of a new view: the quorum of view change votes and the proposal of the
/// view.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NewViewMessage {
    pub signed: SignedContent<NewViewContent>,
    pub pre_prepare: PrePrepareMessage,
}

impl NewViewMessage {
    pub fn content(&self) -> &NewViewContent {
        &self.signed.content
    }
}

/// A quorum certificate showing that a block was prepared at some (height, view).
///
/// Either both parts are present or both are empty; anything else is malformed.
#[derive(Debug, Default, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct PreparedProof {
    pub pre_prepare: Option<SignedPrePrepare>,
    pub prepares: Vec<PrepareMessage>,
}

impl PreparedProof {
    pub fn view(&self) -> Option<View> {
        self.pre_prepare.as_ref().map(|pre_prepare| pre_prepare.content.view)
    }

    pub fn block_hash(&self) -> Option<BlockHash> {
        self.pre_prepare.as_ref().map(|pre_prepare| pre_prepare.content.block_hash)
    }
}

/// The stored PrePrepare of a view together with a quorum of matching prepares.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedMessages {
    pub pre_prepare: PrePrepareMessage,
    pub prepares: Vec<PrepareMessage>,
}

/// The consensus proof of a committed block: a quorum of commits for the same (height, view,
/// block hash) and the aggregated random seed signature.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockProof {
    pub height: BlockHeight,
    pub view: View,
    pub block_hash: BlockHash,
    pub commits: Vec<CommitMessage>,
    pub random_seed_signature: Signature,
}

impl BlockProof {
    /// The random seed of the height following the proven block.
    pub fn random_seed(&self) -> u64 {
        let digest = Sha256::digest(&self.random_seed_signature.0);
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(seed)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(test, derive(EnumAsInner))]
pub enum ConsensusMessage {
    PrePrepare(PrePrepareMessage),
    Prepare(PrepareMessage),
    Commit(CommitMessage),
    ViewChange(ViewChangeMessage),
    NewView(NewViewMessage),
}

impl ConsensusMessage {
    pub fn height(&self) -> BlockHeight {
        match self {
            ConsensusMessage::PrePrepare(message) => message.content().height,
            ConsensusMessage::Prepare(message) => message.content.height,
            ConsensusMessage::Commit(message) => message.content.height,
            ConsensusMessage::ViewChange(message) => message.content().height,
            ConsensusMessage::NewView(message) => message.content().height,
        }
    }

    pub fn view(&self) -> View {
        match self {
            ConsensusMessage::PrePrepare(message) => message.content().view,
            ConsensusMessage::Prepare(message) => message.content.view,
            ConsensusMessage::Commit(message) => message.content.view,
            ConsensusMessage::ViewChange(message) => message.content().view,
            ConsensusMessage::NewView(message) => message.content().view,
        }
    }

    pub fn sender(&self) -> MemberId {
        match self {
            ConsensusMessage::PrePrepare(message) => message.signed.sender_id(),
            ConsensusMessage::Prepare(message) => message.sender_id(),
            ConsensusMessage::Commit(message) => message.sender_id(),
            ConsensusMessage::ViewChange(message) => message.signed.sender_id(),
            ConsensusMessage::NewView(message) => message.signed.sender_id(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            ConsensusMessage::PrePrepare(_) => MessageType::PrePrepare,
            ConsensusMessage::Prepare(_) => MessageType::Prepare,
            ConsensusMessage::Commit(_) => MessageType::Commit,
            ConsensusMessage::ViewChange(_) => MessageType::ViewChange,
            ConsensusMessage::NewView(_) => MessageType::NewView,
        }
    }
}
