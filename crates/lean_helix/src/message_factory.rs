//! Creation of the local member's signed consensus messages.
use std::sync::Arc;

use crate::messages::{
    CommitContent,
    CommitMessage,
    NewViewContent,
    NewViewMessage,
    PrePrepareContent,
    PrePrepareMessage,
    PrepareContent,
    PrepareMessage,
    PreparedMessages,
    PreparedProof,
    SignedContent,
    SignedPayload,
    ViewChangeConfirmation,
    ViewChangeContent,
    ViewChangeMessage,
};
use crate::types::{Block, BlockHash, BlockHeight, KeyManager, MemberId, View};

#[cfg(test)]
#[path = "message_factory_test.rs"]
mod message_factory_test;

#[derive(Clone)]
pub struct MessageFactory {
    key_manager: Arc<dyn KeyManager>,
}

impl MessageFactory {
    pub fn new(key_manager: Arc<dyn KeyManager>) -> Self {
        Self { key_manager }
    }

    pub fn member_id(&self) -> MemberId {
        self.key_manager.my_member_id()
    }

    pub fn create_pre_prepare(
        &self,
        height: BlockHeight,
        view: View,
        block: Block,
        block_hash: BlockHash,
    ) -> PrePrepareMessage {
        let content = PrePrepareContent { height, view, block_hash };
        PrePrepareMessage { signed: self.sign(content), block }
    }

    pub fn create_prepare(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: BlockHash,
    ) -> PrepareMessage {
        self.sign(PrepareContent { height, view, block_hash })
    }

    /// The commit carries this member's share of `random_seed`, the seed of `height`.
    pub fn create_commit(
        &self,
        height: BlockHeight,
        view: View,
        block_hash: BlockHash,
        random_seed: u64,
    ) -> CommitMessage {
        let random_seed_share = self.key_manager.sign_random_seed(height, random_seed);
        self.sign(CommitContent { height, view, block_hash, random_seed_share })
    }

    /// A vote to move to `view`. When `prepared` is given, the vote carries it as its prepared
    /// proof together with the prepared block.
    pub fn create_view_change(
        &self,
        height: BlockHeight,
        view: View,
        prepared: Option<PreparedMessages>,
    ) -> ViewChangeMessage {
        let (prepared_proof, block) = match prepared {
            Some(PreparedMessages { pre_prepare, prepares }) => (
                Some(PreparedProof { pre_prepare: Some(pre_prepare.signed), prepares }),
                Some(pre_prepare.block),
            ),
            None => (None, None),
        };
        let signed = self.sign(ViewChangeContent { height, view, prepared_proof });
        ViewChangeMessage { signed, block }
    }

    pub fn create_new_view(
        &self,
        height: BlockHeight,
        view: View,
        pre_prepare: PrePrepareMessage,
        confirmations: Vec<ViewChangeConfirmation>,
    ) -> NewViewMessage {
        let signed = self.sign(NewViewContent { height, view, confirmations });
        NewViewMessage { signed, pre_prepare }
    }

    fn sign<T: SignedPayload>(&self, content: T) -> SignedContent<T> {
        SignedContent::sign(content, self.key_manager.as_ref())
    }
}
