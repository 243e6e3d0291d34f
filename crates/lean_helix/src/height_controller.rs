//! Runs consensus across heights, see [`HeightController`].

#[cfg(test)]
#[path = "height_controller_test.rs"]
mod height_controller_test;

use std::collections::VecDeque;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use lean_helix_config::config::ConsensusConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::consensus_message_filter::ConsensusMessageFilter;
use crate::election_trigger::ElectionTrigger;
use crate::message_storage::MessageStorage;
use crate::messages::{BlockProof, ConsensusMessage, PrePrepareMessage};
use crate::metrics::{
    LEAN_HELIX_DECISIONS_REACHED_BY_CONSENSUS,
    LEAN_HELIX_DECISIONS_REACHED_BY_SYNC,
    LEAN_HELIX_ELECTION_TIMEOUTS,
    LEAN_HELIX_HEIGHT,
    LEAN_HELIX_PROPOSALS_FAILED,
    LEAN_HELIX_PROPOSALS_INVALID,
};
use crate::proofs_validator::ProofsValidator;
use crate::term_in_committee::{TermEvent, TermInCommittee, TermRequest, TermState};
use crate::types::{
    Block,
    BlockHash,
    BlockHeight,
    BlockUtils,
    CommitObserver,
    Communication,
    ConsensusError,
    Decision,
    KeyManager,
    MemberId,
    Membership,
    View,
};

/// The host capabilities consensus runs with.
#[derive(Clone)]
pub struct Capabilities {
    pub key_manager: Arc<dyn KeyManager>,
    pub block_utils: Arc<dyn BlockUtils>,
    pub communication: Arc<dyn Communication>,
    pub membership: Arc<dyn Membership>,
    pub commit_observer: Arc<dyn CommitObserver>,
}

/// Inputs from the host to a running consensus.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusInput {
    /// A consensus message received from the network.
    Message(ConsensusMessage),
    /// A block committed by the network, learned out of band. Consensus moves past its height if
    /// the proof is valid. `prev_block_proof` is the proof of the preceding block, which seeds
    /// the committee of the synced height.
    Sync { block: Block, block_proof: BlockProof, prev_block_proof: Option<BlockProof> },
    /// Start an election in the current view, as if its election timer fired.
    TriggerElection,
}

// Results of work done outside of the actor, tagged with the height they were started in.
#[derive(Debug)]
enum InternalEvent {
    ElectionTimeout { height: BlockHeight, view: View },
    ProposalBuilt { height: BlockHeight, view: View, proposal: Option<(Block, BlockHash)> },
    ValidationFinished { height: BlockHeight, pre_prepare: PrePrepareMessage, valid: bool },
}

/// Owns the current height and its term, and drives it with incoming messages, timer fires and
/// the results of block proposal and validation tasks.
///
/// Cancellation is scoped: every spawned task is bound to a token of its view, a child of the
/// token of its height, which is a child of the root token cancelled on drop.
pub struct HeightController {
    config: ConsensusConfig,
    capabilities: Capabilities,
    storage: Arc<MessageStorage>,
    filter: ConsensusMessageFilter,
    term: Option<TermInCommittee>,
    election_trigger: ElectionTrigger,
    internal_sender: mpsc::UnboundedSender<InternalEvent>,
    internal_receiver: mpsc::UnboundedReceiver<InternalEvent>,
    root_token: CancellationToken,
    height_token: CancellationToken,
    view_token: (View, CancellationToken),
    prev_block: Option<Block>,
    prev_block_proof: Option<BlockProof>,
}

impl HeightController {
    pub fn new(config: ConsensusConfig, capabilities: Capabilities) -> Self {
        let my_id = capabilities.key_manager.my_member_id();
        let (internal_sender, internal_receiver) = mpsc::unbounded_channel();
        let root_token = CancellationToken::new();
        let height_token = root_token.child_token();
        let view_token = (0, height_token.child_token());
        Self {
            filter: ConsensusMessageFilter::new(
                my_id,
                BlockHeight::default(),
                config.future_msg_limit,
            ),
            election_trigger: ElectionTrigger::new(config.timeouts.election_base_timeout),
            config,
            capabilities,
            storage: Arc::new(MessageStorage::new()),
            term: None,
            internal_sender,
            internal_receiver,
            root_token,
            height_token,
            view_token,
            prev_block: None,
            prev_block_proof: None,
        }
    }

    pub fn my_id(&self) -> MemberId {
        self.capabilities.key_manager.my_member_id()
    }

    /// The height of the active term, None before the first height is set.
    pub fn current_height(&self) -> Option<BlockHeight> {
        self.term.as_ref().map(TermInCommittee::height)
    }

    pub fn current_view(&self) -> Option<View> {
        self.term.as_ref().map(TermInCommittee::view)
    }

    pub fn term_state(&self) -> Option<TermState> {
        self.term.as_ref().map(TermInCommittee::state)
    }

    pub fn storage(&self) -> &Arc<MessageStorage> {
        &self.storage
    }

    /// Starts consensus on `height`, discarding the active term. Cached messages of `height` are
    /// replayed in arrival order, and if they are enough to decide, consensus moves on.
    ///
    /// Panics if `height` isn't above the current height.
    pub async fn set_height(&mut self, height: BlockHeight) -> Result<(), ConsensusError> {
        let decision = self.start_height(height).await?;
        self.advance(decision).await
    }

    // Commits decisions and starts the following heights until a height doesn't decide on
    // start.
    async fn advance(&mut self, mut decision: Option<Decision>) -> Result<(), ConsensusError> {
        while let Some(Decision { height, view, block, proof }) = decision.take() {
            info!(%height, view, "Decision reached, block hash {:?}.", proof.block_hash);
            LEAN_HELIX_DECISIONS_REACHED_BY_CONSENSUS.increment(1);
            self.capabilities.commit_observer.on_commit(height, block.clone(), proof.clone()).await;
            self.prev_block = Some(block);
            self.prev_block_proof = Some(proof);
            decision = self.start_height(height.unchecked_next()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), level = "info")]
    async fn start_height(
        &mut self,
        height: BlockHeight,
    ) -> Result<Option<Decision>, ConsensusError> {
        if let Some(current_height) = self.current_height() {
            assert!(height > current_height, "Height must increase: {current_height} -> {height}");
        }
        self.height_token.cancel();
        self.height_token = self.root_token.child_token();
        self.view_token = (0, self.height_token.child_token());
        self.election_trigger.unregister_on_election();
        self.storage.clear_heights_below(height);
        self.term = None;

        let random_seed = self.prev_block_proof.as_ref().map_or(0, BlockProof::random_seed);
        let committee =
            self.capabilities.membership.request_ordered_committee(height, random_seed).await?;
        assert!(!committee.is_empty(), "Committee of height {height} is empty");
        LEAN_HELIX_HEIGHT.set_lossy(height.0);

        let mut term = TermInCommittee::new(
            height,
            random_seed,
            committee,
            self.capabilities.key_manager.clone(),
            self.capabilities.block_utils.clone(),
            self.storage.clone(),
            self.config.future_msg_limit.future_view_limit,
        );
        let requests = term.start();
        self.term = Some(term);
        let mut decision = self.execute_requests(requests).await;

        let cached_messages = self.filter.set_height(height);
        debug!("Replaying {} cached messages.", cached_messages.len());
        for message in cached_messages {
            if decision.is_some() {
                break;
            }
            decision = self.handle_current_height_message(message).await;
        }
        Ok(decision)
    }

    /// Handles a message received from the network.
    pub async fn handle_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Result<(), ConsensusError> {
        let Some(message) = self.filter.filter(message) else {
            return Ok(());
        };
        let decision = self.handle_current_height_message(message).await;
        self.advance(decision).await
    }

    async fn handle_current_height_message(
        &mut self,
        message: ConsensusMessage,
    ) -> Option<Decision> {
        let term = self.term.as_mut()?;
        let requests = term.handle_message(message);
        self.execute_requests(requests).await
    }

    /// Starts an election in the current view of the active term.
    pub async fn trigger_election(&mut self) -> Result<(), ConsensusError> {
        let Some(view) = self.current_view() else {
            return Ok(());
        };
        info!(view, "Election triggered externally.");
        self.handle_term_event(TermEvent::ElectionTimeout(view)).await
    }

    async fn handle_term_event(&mut self, event: TermEvent) -> Result<(), ConsensusError> {
        let Some(term) = self.term.as_mut() else {
            return Ok(());
        };
        let requests = term.handle_event(event);
        let decision = self.execute_requests(requests).await;
        self.advance(decision).await
    }

    async fn handle_internal_event(&mut self, event: InternalEvent) -> Result<(), ConsensusError> {
        let (height, event) = match event {
            InternalEvent::ElectionTimeout { height, view } => {
                (height, TermEvent::ElectionTimeout(view))
            }
            InternalEvent::ProposalBuilt { height, view, proposal } => {
                (height, TermEvent::ProposalBuilt { view, proposal })
            }
            InternalEvent::ValidationFinished { height, pre_prepare, valid } => {
                (height, TermEvent::ValidationFinished { pre_prepare, valid })
            }
        };
        if self.current_height() != Some(height) {
            debug!(%height, "Dropping result of a past height: {event:?}");
            return Ok(());
        }
        if let TermEvent::ElectionTimeout(_) = event {
            LEAN_HELIX_ELECTION_TIMEOUTS.increment(1);
        }
        self.handle_term_event(event).await
    }

    /// Fast-forwards past the height of a block committed by the network. Ignored if the block
    /// isn't above the current height or its proof doesn't hold.
    #[instrument(skip_all, fields(height=%block_proof.height), level = "info")]
    pub async fn sync(
        &mut self,
        block: Block,
        block_proof: BlockProof,
        prev_block_proof: Option<BlockProof>,
    ) -> Result<(), ConsensusError> {
        let height = block_proof.height;
        if self.current_height().is_some_and(|current_height| height < current_height) {
            debug!("Ignoring sync of a past height.");
            return Ok(());
        }
        if !self.capabilities.block_utils.validate_block_commitment(
            height,
            &block,
            &block_proof.block_hash,
        ) {
            warn!("Ignoring sync of a block which doesn't match its proof.");
            return Ok(());
        }
        let random_seed = prev_block_proof.as_ref().map_or(0, BlockProof::random_seed);
        let committee =
            self.capabilities.membership.request_ordered_committee(height, random_seed).await?;
        assert!(!committee.is_empty(), "Committee of height {height} is empty");
        let validator = ProofsValidator::new(self.capabilities.key_manager.as_ref(), &committee);
        if !validator.validate_block_proof(&block_proof, random_seed) {
            warn!("Ignoring sync with an invalid block proof.");
            return Ok(());
        }
        info!("Synced block {:?}.", block_proof.block_hash);
        LEAN_HELIX_DECISIONS_REACHED_BY_SYNC.increment(1);
        self.prev_block = Some(block);
        self.prev_block_proof = Some(block_proof);
        self.set_height(height.unchecked_next()).await
    }

    // Executes the requests of the active term. Returns the decision, if one was reached.
    async fn execute_requests(&mut self, mut requests: VecDeque<TermRequest>) -> Option<Decision> {
        let mut decision = None;
        while let Some(request) = requests.pop_front() {
            match request {
                TermRequest::SendMessage { recipients, message } => {
                    if let Err(err) = self
                        .capabilities
                        .communication
                        .send_consensus_message(recipients, message)
                        .await
                    {
                        warn!("Failed to send a consensus message: {err}");
                    }
                }
                TermRequest::ScheduleElection(view) => self.schedule_election(view),
                TermRequest::CancelElection => self.election_trigger.unregister_on_election(),
                TermRequest::RequestNewBlockProposal { view } => self.spawn_proposal(view),
                TermRequest::ValidateBlockProposal(pre_prepare) => {
                    self.spawn_validation(pre_prepare)
                }
                TermRequest::Decision(reached) => {
                    assert!(decision.is_none(), "Term decided twice");
                    decision = Some(reached);
                }
            }
        }
        decision
    }

    fn active_height(&self) -> BlockHeight {
        self.current_height().expect("Requests are only issued by an active term")
    }

    // The token of `view`, cancelling the tokens of lower views.
    fn view_token(&mut self, view: View) -> CancellationToken {
        if view > self.view_token.0 {
            self.view_token.1.cancel();
            self.view_token = (view, self.height_token.child_token());
        }
        self.view_token.1.clone()
    }

    fn schedule_election(&mut self, view: View) {
        self.view_token(view);
        let height = self.active_height();
        let internal_sender = self.internal_sender.clone();
        self.election_trigger.register_on_election(view, move |view| {
            // The controller may have been dropped.
            let _ = internal_sender.send(InternalEvent::ElectionTimeout { height, view });
        });
    }

    fn spawn_proposal(&mut self, view: View) {
        let height = self.active_height();
        let token = self.view_token(view);
        let block_utils = self.capabilities.block_utils.clone();
        let prev_block = self.prev_block.clone();
        let timeout = self.config.timeouts.proposal_timeout;
        let internal_sender = self.internal_sender.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(
                    timeout,
                    block_utils.request_new_block_proposal(height, prev_block),
                ) => result,
            };
            let result = within_timeout(result, || format!("Block proposal of view {view}"));
            let proposal = match result {
                Ok(proposal) => Some(proposal),
                Err(err) => {
                    warn!(%height, view, "Block proposal failed: {err}");
                    LEAN_HELIX_PROPOSALS_FAILED.increment(1);
                    None
                }
            };
            let _ = internal_sender.send(InternalEvent::ProposalBuilt { height, view, proposal });
        });
    }

    fn spawn_validation(&mut self, pre_prepare: PrePrepareMessage) {
        let height = self.active_height();
        let view = pre_prepare.content().view;
        let token = self.view_token(view);
        let block_utils = self.capabilities.block_utils.clone();
        let prev_block = self.prev_block.clone();
        let timeout = self.config.timeouts.validation_timeout;
        let internal_sender = self.internal_sender.clone();
        tokio::spawn(async move {
            let block = pre_prepare.block.clone();
            let block_hash = pre_prepare.content().block_hash;
            let result = tokio::select! {
                _ = token.cancelled() => return,
                result = tokio::time::timeout(
                    timeout,
                    block_utils.validate_block_proposal(height, block, block_hash, prev_block),
                ) => result,
            };
            let result = within_timeout(result, || format!("Validation of {block_hash:?}"));
            let valid = match result {
                Ok(()) => true,
                Err(err) => {
                    warn!(%height, view, "Block {block_hash:?} is invalid: {err}");
                    LEAN_HELIX_PROPOSALS_INVALID.increment(1);
                    false
                }
            };
            let _ = internal_sender.send(InternalEvent::ValidationFinished {
                height,
                pre_prepare,
                valid,
            });
        });
    }

    async fn handle_input(&mut self, input: ConsensusInput) -> Result<(), ConsensusError> {
        match input {
            ConsensusInput::Message(message) => self.handle_message(message).await,
            ConsensusInput::Sync { block, block_proof, prev_block_proof } => {
                self.sync(block, block_proof, prev_block_proof).await
            }
            ConsensusInput::TriggerElection => self.trigger_election().await,
        }
    }
}

impl Drop for HeightController {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}

// Host work raced against `tokio::time::timeout`.
fn within_timeout<T>(
    result: Result<Result<T, ConsensusError>, tokio::time::error::Elapsed>,
    work: impl FnOnce() -> String,
) -> Result<T, ConsensusError> {
    result.unwrap_or_else(|_| Err(ConsensusError::Timeout(work())))
}

enum LoopEvent {
    Input(ConsensusInput),
    Internal(InternalEvent),
    Shutdown,
}

/// Runs consensus from `first_height` until `shutdown` is cancelled.
///
/// Returns an error if a capability consensus can't do without fails (the committee can't be
/// fetched) or if `inputs` is closed.
pub async fn run_consensus<InputsT>(
    mut controller: HeightController,
    first_height: BlockHeight,
    mut inputs: InputsT,
    shutdown: CancellationToken,
) -> Result<(), ConsensusError>
where
    InputsT: Stream<Item = ConsensusInput> + Unpin,
{
    info!(my_id = %controller.my_id(), %first_height, "Running consensus.");
    controller.set_height(first_height).await?;
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => LoopEvent::Shutdown,
            input = inputs.next() => match input {
                Some(input) => LoopEvent::Input(input),
                None => {
                    return Err(ConsensusError::InternalNetworkError(
                        "Consensus inputs should never be closed".to_string(),
                    ));
                }
            },
            Some(event) = controller.internal_receiver.recv() => LoopEvent::Internal(event),
        };
        match event {
            LoopEvent::Input(input) => controller.handle_input(input).await?,
            LoopEvent::Internal(event) => controller.handle_internal_event(event).await?,
            LoopEvent::Shutdown => {
                info!("Consensus shut down.");
                return Ok(());
            }
        }
    }
}
