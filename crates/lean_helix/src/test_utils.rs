//! Deterministic implementations of the host capabilities, for tests of consensus and of hosts
//! embedding it.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use sha2::{Digest, Sha256};

use crate::height_controller::{Capabilities, ConsensusInput};
use crate::message_factory::MessageFactory;
use crate::messages::{BlockProof, ConsensusMessage, MessageType};
use crate::types::{
    Block,
    BlockHash,
    BlockHeight,
    BlockUtils,
    CommitObserver,
    Communication,
    ConsensusError,
    KeyManager,
    MemberId,
    Membership,
    Signature,
};

fn digest(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// Signs with a hash of the signer id and the data, so any member can verify any signature.
#[derive(Debug, Clone)]
pub struct TestKeyManager {
    member_id: MemberId,
}

impl TestKeyManager {
    pub fn new(member_id: MemberId) -> Self {
        Self { member_id }
    }

    fn signature_of(member_id: MemberId, data: &[u8]) -> Signature {
        Signature(digest(&[b"signature", &member_id.0.to_le_bytes(), data]))
    }

    fn random_seed_share_of(
        member_id: MemberId,
        height: BlockHeight,
        random_seed: u64,
    ) -> Signature {
        Signature(digest(&[
            b"random_seed_share",
            &member_id.0.to_le_bytes(),
            &height.0.to_le_bytes(),
            &random_seed.to_le_bytes(),
        ]))
    }
}

impl KeyManager for TestKeyManager {
    fn my_member_id(&self) -> MemberId {
        self.member_id
    }

    fn sign(&self, data: &[u8]) -> Signature {
        Self::signature_of(self.member_id, data)
    }

    fn verify(&self, data: &[u8], signature: &Signature, member_id: MemberId) -> bool {
        *signature == Self::signature_of(member_id, data)
    }

    fn sign_random_seed(&self, height: BlockHeight, random_seed: u64) -> Signature {
        Self::random_seed_share_of(self.member_id, height, random_seed)
    }

    fn verify_random_seed(
        &self,
        height: BlockHeight,
        random_seed: u64,
        share: &Signature,
        member_id: MemberId,
    ) -> bool {
        *share == Self::random_seed_share_of(member_id, height, random_seed)
    }

    // Like a threshold signature, every quorum of shares aggregates to the same signature.
    fn aggregate_random_seed(
        &self,
        height: BlockHeight,
        _shares: &[(MemberId, Signature)],
    ) -> Signature {
        Signature(digest(&[b"random_seed", &height.0.to_le_bytes()]))
    }
}

pub fn test_block_hash(block: &Block) -> BlockHash {
    let bytes = bincode::serialize(block).expect("Blocks are serializable");
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest(&[&bytes]));
    BlockHash(hash)
}

/// The block `proposer` proposes at `height`.
pub fn test_block(height: BlockHeight, proposer: MemberId) -> Block {
    Block { height, body: format!("block {height} proposed by {proposer}").into_bytes() }
}

/// Proposes [`test_block`]s and accepts any block whose hash matches, unless rejected.
#[derive(Debug, Default)]
pub struct TestBlockUtils {
    member_id: MemberId,
    rejected_blocks: Mutex<HashSet<BlockHash>>,
}

impl TestBlockUtils {
    pub fn new(member_id: MemberId) -> Self {
        Self { member_id, rejected_blocks: Mutex::new(HashSet::new()) }
    }

    /// Makes validation of `block_hash` fail from now on.
    pub fn reject_block(&self, block_hash: BlockHash) {
        self.rejected_blocks.lock().expect("rejected blocks lock poisoned").insert(block_hash);
    }
}

#[async_trait]
impl BlockUtils for TestBlockUtils {
    async fn request_new_block_proposal(
        &self,
        height: BlockHeight,
        _prev_block: Option<Block>,
    ) -> Result<(Block, BlockHash), ConsensusError> {
        let block = test_block(height, self.member_id);
        let block_hash = test_block_hash(&block);
        Ok((block, block_hash))
    }

    async fn validate_block_proposal(
        &self,
        height: BlockHeight,
        block: Block,
        block_hash: BlockHash,
        _prev_block: Option<Block>,
    ) -> Result<(), ConsensusError> {
        if !self.validate_block_commitment(height, &block, &block_hash) {
            return Err(ConsensusError::BlockValidation(format!(
                "Block hash mismatch {block_hash:?}"
            )));
        }
        if self.rejected_blocks.lock().expect("rejected blocks lock poisoned").contains(&block_hash)
        {
            return Err(ConsensusError::BlockValidation(format!("Rejected block {block_hash:?}")));
        }
        Ok(())
    }

    fn validate_block_commitment(
        &self,
        height: BlockHeight,
        block: &Block,
        block_hash: &BlockHash,
    ) -> bool {
        block.height == height && test_block_hash(block) == *block_hash
    }
}

/// The same committee, in the same order, for every height.
#[derive(Debug, Clone)]
pub struct TestMembership {
    committee: Vec<MemberId>,
}

impl TestMembership {
    pub fn new(committee: Vec<MemberId>) -> Self {
        Self { committee }
    }
}

#[async_trait]
impl Membership for TestMembership {
    async fn request_ordered_committee(
        &self,
        _height: BlockHeight,
        _random_seed: u64,
    ) -> Result<Vec<MemberId>, ConsensusError> {
        Ok(self.committee.clone())
    }
}

/// Members `0..size`.
pub fn test_committee(size: u64) -> Vec<MemberId> {
    (0..size).map(MemberId).collect()
}

pub fn test_message_factory(member_id: MemberId) -> MessageFactory {
    MessageFactory::new(Arc::new(TestKeyManager::new(member_id)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub sender: MemberId,
    pub recipients: Vec<MemberId>,
    pub message_type: MessageType,
    pub height: BlockHeight,
}

/// An in-memory network delivering messages between the members connected to it.
///
/// Delivery to a member can be blocked and a member can be silenced. Messages sent by a silenced
/// member are dropped without being recorded.
#[derive(Debug, Default)]
pub struct TestNetwork {
    members: Mutex<HashMap<MemberId, mpsc::UnboundedSender<ConsensusInput>>>,
    blocked: Mutex<HashSet<MemberId>>,
    silenced: Mutex<HashSet<MemberId>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl TestNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connects `member_id`. Returns its transport and the stream of its incoming messages.
    pub fn connect(
        self: &Arc<Self>,
        member_id: MemberId,
    ) -> (TestCommunication, mpsc::UnboundedReceiver<ConsensusInput>) {
        let (sender, receiver) = mpsc::unbounded();
        self.members.lock().expect("network lock poisoned").insert(member_id, sender);
        (TestCommunication { network: self.clone(), member_id }, receiver)
    }

    /// An input channel to `member_id`, used to inject messages and sync requests.
    pub fn input_of(&self, member_id: MemberId) -> mpsc::UnboundedSender<ConsensusInput> {
        self.members
            .lock()
            .expect("network lock poisoned")
            .get(&member_id)
            .unwrap_or_else(|| panic!("{member_id} is not connected"))
            .clone()
    }

    pub fn block_incoming(&self, member_id: MemberId) {
        self.blocked.lock().expect("network lock poisoned").insert(member_id);
    }

    pub fn silence(&self, member_id: MemberId) {
        self.silenced.lock().expect("network lock poisoned").insert(member_id);
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().expect("network lock poisoned").clone()
    }

    /// How many sends of `message_type` at `height` `sender` made.
    pub fn sent_count(
        &self,
        sender: MemberId,
        message_type: MessageType,
        height: BlockHeight,
    ) -> usize {
        self.sent_messages()
            .iter()
            .filter(|sent| {
                sent.sender == sender && sent.message_type == message_type && sent.height == height
            })
            .count()
    }

    fn deliver(&self, sender: MemberId, recipients: Vec<MemberId>, message: ConsensusMessage) {
        if self.silenced.lock().expect("network lock poisoned").contains(&sender) {
            return;
        }
        self.sent.lock().expect("network lock poisoned").push(SentMessage {
            sender,
            recipients: recipients.clone(),
            message_type: message.message_type(),
            height: message.height(),
        });
        let blocked = self.blocked.lock().expect("network lock poisoned").clone();
        let members = self.members.lock().expect("network lock poisoned");
        for recipient in recipients.iter().filter(|recipient| !blocked.contains(recipient)) {
            if let Some(input) = members.get(recipient) {
                // The receiving member may have shut down.
                let _ = input.unbounded_send(ConsensusInput::Message(message.clone()));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestCommunication {
    network: Arc<TestNetwork>,
    member_id: MemberId,
}

#[async_trait]
impl Communication for TestCommunication {
    async fn send_consensus_message(
        &self,
        recipients: Vec<MemberId>,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        self.network.deliver(self.member_id, recipients, message);
        Ok(())
    }
}

/// Forwards every commit to a channel.
#[derive(Debug, Clone)]
pub struct TestCommitObserver {
    commits: mpsc::UnboundedSender<(BlockHeight, Block, BlockProof)>,
}

impl TestCommitObserver {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<(BlockHeight, Block, BlockProof)>) {
        let (commits, receiver) = mpsc::unbounded();
        (Self { commits }, receiver)
    }
}

#[async_trait]
impl CommitObserver for TestCommitObserver {
    async fn on_commit(&self, height: BlockHeight, block: Block, proof: BlockProof) {
        let _ = self.commits.unbounded_send((height, block, proof));
    }
}

/// The capabilities of `member_id` on `network`, with its incoming messages and its commits.
pub fn test_capabilities(
    member_id: MemberId,
    committee: Vec<MemberId>,
    network: &Arc<TestNetwork>,
) -> (
    Capabilities,
    mpsc::UnboundedReceiver<ConsensusInput>,
    mpsc::UnboundedReceiver<(BlockHeight, Block, BlockProof)>,
) {
    let (communication, inputs) = network.connect(member_id);
    let (commit_observer, commits) = TestCommitObserver::channel();
    let capabilities = Capabilities {
        key_manager: Arc::new(TestKeyManager::new(member_id)),
        block_utils: Arc::new(TestBlockUtils::new(member_id)),
        communication: Arc::new(communication),
        membership: Arc::new(TestMembership::new(committee)),
        commit_observer: Arc::new(commit_observer),
    };
    (capabilities, inputs, commits)
}
