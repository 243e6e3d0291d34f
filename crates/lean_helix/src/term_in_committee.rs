//! The consensus state machine of a single height.
//!
//! The term is synchronous: it consumes messages and events and returns the requests the caller
//! (the height controller) must execute, such as sending messages, arming the election timer or
//! starting block validation. Results of asynchronous work are fed back as [`TermEvent`]s.
//!
//! Major assumptions:
//! 1. The caller only passes messages of this term's height, never the member's own messages.
//! 2. Messages of views above the current one may arrive at any time. Prepares and Commits of
//!    such views are stored and counted once the term reaches their view. Votes more than
//!    `future_view_limit` views ahead are dropped, and each member's first vote of a view is the
//!    only one kept.

#[cfg(test)]
#[path = "term_in_committee_test.rs"]
mod term_in_committee_test;

use std::collections::VecDeque;
use std::sync::Arc;

#[cfg(test)]
use enum_as_inner::EnumAsInner;
use tracing::{debug, info, instrument, trace, warn};

use crate::message_factory::MessageFactory;
use crate::message_storage::MessageStorage;
use crate::messages::{
    BlockProof,
    CommitMessage,
    ConsensusMessage,
    NewViewMessage,
    PrePrepareMessage,
    PrepareMessage,
    ViewChangeConfirmation,
    ViewChangeMessage,
};
use crate::metrics::{
    record_dropped_message,
    DropReason,
    LEAN_HELIX_NEW_VIEWS_SENT,
    LEAN_HELIX_VIEW,
    LEAN_HELIX_VIEW_CHANGES,
};
use crate::proofs_validator::{highest_prepared_proof, ProofsValidator};
use crate::quorum::{leader_for_view, quorum_size};
use crate::types::{
    Block,
    BlockHash,
    BlockHeight,
    BlockUtils,
    Decision,
    KeyManager,
    MemberId,
    View,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermState {
    CollectingPrePrepare,
    Prepared,
    Committed,
    ViewChanging,
}

/// Completion events fed back to the term.
#[derive(Debug, Clone, PartialEq)]
pub enum TermEvent {
    /// The election timer of `view` fired, or an election was triggered externally.
    ElectionTimeout(View),
    /// A block proposal requested for `view` finished. `None` if it failed or timed out.
    ProposalBuilt { view: View, proposal: Option<(Block, BlockHash)> },
    /// Validation of the block of `pre_prepare` finished.
    ValidationFinished { pre_prepare: PrePrepareMessage, valid: bool },
}

/// Requests the term sends to the caller for execution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(test, derive(EnumAsInner))]
pub enum TermRequest {
    SendMessage { recipients: Vec<MemberId>, message: ConsensusMessage },
    /// Arm the election timer of `view`. A no-op if that view is already armed.
    ScheduleElection(View),
    CancelElection,
    /// Build a new block to propose in `view`.
    RequestNewBlockProposal { view: View },
    /// Validate the block of a PrePrepare, answered by [`TermEvent::ValidationFinished`].
    ValidateBlockProposal(PrePrepareMessage),
    Decision(Decision),
}

type Requests = VecDeque<TermRequest>;

pub struct TermInCommittee {
    height: BlockHeight,
    my_id: MemberId,
    random_seed: u64,
    committee: Vec<MemberId>,
    quorum_size: usize,
    future_view_limit: u64,
    // Members which are not in the committee follow the protocol without sending messages.
    is_observer: bool,
    view: View,
    state: TermState,
    key_manager: Arc<dyn KeyManager>,
    block_utils: Arc<dyn BlockUtils>,
    storage: Arc<MessageStorage>,
    factory: MessageFactory,
    // The view whose PrePrepare is being validated.
    validating_view: Option<View>,
    // Set by the leader of a new view while it waits for a fresh block to propose.
    pending_new_view: Option<(View, Vec<ViewChangeConfirmation>)>,
    // The highest view this member started as the leader of a new view.
    last_new_view: Option<View>,
}

impl TermInCommittee {
    pub fn new(
        height: BlockHeight,
        random_seed: u64,
        committee: Vec<MemberId>,
        key_manager: Arc<dyn KeyManager>,
        block_utils: Arc<dyn BlockUtils>,
        storage: Arc<MessageStorage>,
        future_view_limit: u64,
    ) -> Self {
        assert!(!committee.is_empty(), "Committee of height {height} is empty");
        let my_id = key_manager.my_member_id();
        let is_observer = !committee.contains(&my_id);
        Self {
            height,
            my_id,
            random_seed,
            quorum_size: quorum_size(committee.len()),
            committee,
            future_view_limit,
            is_observer,
            view: 0,
            state: TermState::CollectingPrePrepare,
            factory: MessageFactory::new(key_manager.clone()),
            key_manager,
            block_utils,
            storage,
            validating_view: None,
            pending_new_view: None,
            last_new_view: None,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn state(&self) -> TermState {
        self.state
    }

    pub fn committee(&self) -> &[MemberId] {
        &self.committee
    }

    pub fn is_observer(&self) -> bool {
        self.is_observer
    }

    pub fn leader(&self, view: View) -> MemberId {
        leader_for_view(&self.committee, view)
    }

    fn is_leader(&self, view: View) -> bool {
        !self.is_observer && self.leader(view) == self.my_id
    }

    fn validator(&self) -> ProofsValidator<'_> {
        ProofsValidator::new(self.key_manager.as_ref(), &self.committee)
    }

    fn is_too_far_ahead(&self, view: View) -> bool {
        view > self.view.saturating_add(self.future_view_limit)
    }

    // A vote of a view whose PrePrepare is stored must be for its block.
    fn matches_pre_prepare(&self, view: View, block_hash: &BlockHash) -> bool {
        self.storage
            .get_pre_prepare(self.height, view)
            .is_none_or(|pre_prepare| pre_prepare.content().block_hash == *block_hash)
    }

    fn other_members(&self) -> Vec<MemberId> {
        self.committee.iter().copied().filter(|member| *member != self.my_id).collect()
    }

    fn broadcast(&self, message: ConsensusMessage) -> TermRequest {
        TermRequest::SendMessage { recipients: self.other_members(), message }
    }

    /// Starts view 0: arms the election timer, and asks for a block if this member leads it.
    #[instrument(skip_all, fields(height=%self.height))]
    pub fn start(&mut self) -> Requests {
        info!(
            committee = ?self.committee,
            is_observer = self.is_observer,
            "Starting term. leader={}",
            self.leader(0)
        );
        LEAN_HELIX_VIEW.set_lossy(self.view);
        let mut requests = VecDeque::from([TermRequest::ScheduleElection(self.view)]);
        if self.is_leader(self.view) {
            requests.push_back(TermRequest::RequestNewBlockProposal { view: self.view });
        }
        requests
    }

    #[instrument(skip_all, fields(height=%self.height, view=self.view))]
    pub fn handle_message(&mut self, message: ConsensusMessage) -> Requests {
        assert_eq!(message.height(), self.height, "Message of another height passed to the term");
        if self.state == TermState::Committed {
            trace!("Term already committed, ignoring {:?}.", message.message_type());
            return VecDeque::new();
        }
        if !self.committee.contains(&message.sender()) {
            debug!("Ignoring message from non-member {}.", message.sender());
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        match message {
            ConsensusMessage::PrePrepare(pre_prepare) => self.handle_pre_prepare(pre_prepare),
            ConsensusMessage::Prepare(prepare) => self.handle_prepare(prepare),
            ConsensusMessage::Commit(commit) => self.handle_commit(commit),
            ConsensusMessage::ViewChange(view_change) => self.handle_view_change(view_change),
            ConsensusMessage::NewView(new_view) => self.handle_new_view(new_view),
        }
    }

    #[instrument(skip_all, fields(height=%self.height, view=self.view))]
    pub fn handle_event(&mut self, event: TermEvent) -> Requests {
        if self.state == TermState::Committed {
            trace!("Term already committed, ignoring {event:?}.");
            return VecDeque::new();
        }
        match event {
            TermEvent::ElectionTimeout(view) => self.handle_election_timeout(view),
            TermEvent::ProposalBuilt { view, proposal } => {
                self.handle_proposal_built(view, proposal)
            }
            TermEvent::ValidationFinished { pre_prepare, valid } => {
                self.handle_validation_finished(pre_prepare, valid)
            }
        }
    }

    fn handle_pre_prepare(&mut self, pre_prepare: PrePrepareMessage) -> Requests {
        let view = pre_prepare.content().view;
        if view != self.view {
            debug!("Ignoring PrePrepare of view {view}.");
            record_dropped_message(DropReason::StaleView);
            return VecDeque::new();
        }
        if self.state != TermState::CollectingPrePrepare
            || self.validating_view == Some(view)
            || self.storage.get_pre_prepare(self.height, view).is_some()
        {
            trace!("Ignoring duplicate PrePrepare.");
            record_dropped_message(DropReason::Duplicate);
            return VecDeque::new();
        }
        if !self.is_valid_pre_prepare(&pre_prepare, view) {
            warn!("Invalid PrePrepare from {}.", pre_prepare.signed.sender_id());
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        debug!("Validating the block of PrePrepare {:?}.", pre_prepare.content().block_hash);
        self.validating_view = Some(view);
        VecDeque::from([TermRequest::ValidateBlockProposal(pre_prepare)])
    }

    // Checks everything but the block content, which is validated asynchronously.
    fn is_valid_pre_prepare(&self, pre_prepare: &PrePrepareMessage, view: View) -> bool {
        let content = pre_prepare.content();
        content.height == self.height
            && content.view == view
            && pre_prepare.signed.sender_id() == self.leader(view)
            && pre_prepare.block.height == self.height
            && pre_prepare.signed.verify(self.key_manager.as_ref())
            && self.block_utils.validate_block_commitment(
                self.height,
                &pre_prepare.block,
                &content.block_hash,
            )
    }

    fn handle_validation_finished(
        &mut self,
        pre_prepare: PrePrepareMessage,
        valid: bool,
    ) -> Requests {
        let view = pre_prepare.content().view;
        if view != self.view || self.validating_view != Some(view) {
            debug!("Ignoring stale validation result of view {view}.");
            return VecDeque::new();
        }
        self.validating_view = None;
        if !valid {
            warn!("Block of PrePrepare {:?} is invalid.", pre_prepare.content().block_hash);
            return VecDeque::new();
        }
        self.accept_pre_prepare(pre_prepare)
    }

    // Stores a validated PrePrepare of the current view and votes for it.
    fn accept_pre_prepare(&mut self, pre_prepare: PrePrepareMessage) -> Requests {
        let content = pre_prepare.content().clone();
        if !self.storage.store_pre_prepare(pre_prepare) {
            return VecDeque::new();
        }
        self.state = TermState::CollectingPrePrepare;
        let mut requests = VecDeque::from([TermRequest::ScheduleElection(self.view)]);
        if !self.is_observer && !self.is_leader(content.view) {
            let prepare =
                self.factory.create_prepare(self.height, content.view, content.block_hash);
            self.storage.store_prepare(prepare.clone());
            debug!("Sending Prepare for {:?}.", content.block_hash);
            requests.push_back(self.broadcast(ConsensusMessage::Prepare(prepare)));
        }
        requests.append(&mut self.check_prepared());
        // Commits of this view may have reached a quorum before the PrePrepare arrived.
        requests.append(&mut self.check_committed(content.block_hash));
        requests
    }

    fn handle_prepare(&mut self, prepare: PrepareMessage) -> Requests {
        let view = prepare.content.view;
        if view < self.view {
            trace!("Ignoring Prepare of past view {view}.");
            record_dropped_message(DropReason::StaleView);
            return VecDeque::new();
        }
        if self.is_too_far_ahead(view) {
            debug!("Ignoring Prepare of view {view}, too far ahead.");
            record_dropped_message(DropReason::TooFarAhead);
            return VecDeque::new();
        }
        let sender = prepare.sender_id();
        if sender == self.leader(view)
            || !self.matches_pre_prepare(view, &prepare.content.block_hash)
            || !prepare.verify(self.key_manager.as_ref())
        {
            warn!("Invalid Prepare from {sender}.");
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        if self.storage.has_prepare_from(self.height, view, sender) {
            trace!("Ignoring another Prepare of view {view} from {sender}.");
            record_dropped_message(DropReason::Duplicate);
            return VecDeque::new();
        }
        self.storage.store_prepare(prepare);
        if view == self.view {
            return self.check_prepared();
        }
        VecDeque::new()
    }

    fn check_prepared(&mut self) -> Requests {
        if self.state != TermState::CollectingPrePrepare {
            return VecDeque::new();
        }
        let Some(pre_prepare) = self.storage.get_pre_prepare(self.height, self.view) else {
            return VecDeque::new();
        };
        let block_hash = pre_prepare.content().block_hash;
        let prepares = self.storage.get_prepare_sender_ids(self.height, self.view, &block_hash);
        if prepares.len() < self.quorum_size - 1 {
            return VecDeque::new();
        }
        info!("Prepared {block_hash:?}.");
        self.state = TermState::Prepared;
        let mut requests = VecDeque::new();
        if !self.is_observer {
            let commit =
                self.factory.create_commit(self.height, self.view, block_hash, self.random_seed);
            self.storage.store_commit(commit.clone());
            debug!("Sending Commit for {block_hash:?}.");
            requests.push_back(self.broadcast(ConsensusMessage::Commit(commit)));
        }
        requests.append(&mut self.check_committed(block_hash));
        requests
    }

    fn handle_commit(&mut self, commit: CommitMessage) -> Requests {
        let content = &commit.content;
        let view = content.view;
        if view < self.view {
            trace!("Ignoring Commit of past view {view}.");
            record_dropped_message(DropReason::StaleView);
            return VecDeque::new();
        }
        if self.is_too_far_ahead(view) {
            debug!("Ignoring Commit of view {view}, too far ahead.");
            record_dropped_message(DropReason::TooFarAhead);
            return VecDeque::new();
        }
        let sender = commit.sender_id();
        let valid = self.matches_pre_prepare(view, &content.block_hash)
            && commit.verify(self.key_manager.as_ref())
            && self.key_manager.verify_random_seed(
                self.height,
                self.random_seed,
                &content.random_seed_share,
                sender,
            );
        if !valid {
            warn!("Invalid Commit from {sender}.");
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        let block_hash = content.block_hash;
        if self.storage.has_commit_from(self.height, view, sender) {
            trace!("Ignoring another Commit of view {view} from {sender}.");
            record_dropped_message(DropReason::Duplicate);
            return VecDeque::new();
        }
        self.storage.store_commit(commit);
        if view == self.view {
            return self.check_committed(block_hash);
        }
        VecDeque::new()
    }

    fn check_committed(&mut self, block_hash: BlockHash) -> Requests {
        if self.state == TermState::Committed {
            return VecDeque::new();
        }
        let Some(pre_prepare) = self.storage.get_pre_prepare(self.height, self.view) else {
            return VecDeque::new();
        };
        if pre_prepare.content().block_hash != block_hash {
            return VecDeque::new();
        }
        let commits = self.storage.get_commit_messages(self.height, self.view, &block_hash);
        if commits.len() < self.quorum_size {
            return VecDeque::new();
        }
        let commits: Vec<_> = commits.into_iter().take(self.quorum_size).collect();
        let shares: Vec<_> = commits
            .iter()
            .map(|commit| (commit.sender_id(), commit.content.random_seed_share.clone()))
            .collect();
        let random_seed_signature = self.key_manager.aggregate_random_seed(self.height, &shares);
        info!("Committed {block_hash:?}.");
        self.state = TermState::Committed;
        let proof = BlockProof {
            height: self.height,
            view: self.view,
            block_hash,
            commits,
            random_seed_signature,
        };
        VecDeque::from([
            TermRequest::CancelElection,
            TermRequest::Decision(Decision {
                height: self.height,
                view: self.view,
                block: pre_prepare.block,
                proof,
            }),
        ])
    }

    fn handle_election_timeout(&mut self, view: View) -> Requests {
        if view != self.view {
            debug!("Ignoring election timeout of view {view}.");
            return VecDeque::new();
        }
        let new_view = view + 1;
        let prepared = self.storage.extract_prepared_messages(self.height, self.quorum_size);
        info!(
            prepared = ?prepared.as_ref().map(|prepared| prepared.pre_prepare.content().block_hash),
            "Election timeout, moving to view {new_view}."
        );
        self.move_to_view(new_view);
        let mut requests = VecDeque::from([TermRequest::ScheduleElection(new_view)]);
        if self.is_observer {
            return requests;
        }
        let view_change = self.factory.create_view_change(self.height, new_view, prepared);
        self.storage.store_view_change(view_change.clone());
        let leader = self.leader(new_view);
        if leader == self.my_id {
            requests.append(&mut self.check_view_change_quorum(new_view));
        } else {
            debug!("Sending ViewChange to {leader}.");
            requests.push_back(TermRequest::SendMessage {
                recipients: vec![leader],
                message: ConsensusMessage::ViewChange(view_change),
            });
        }
        requests
    }

    fn move_to_view(&mut self, view: View) {
        assert!(view > self.view, "View must only increase: {} -> {view}", self.view);
        LEAN_HELIX_VIEW_CHANGES.increment(1);
        LEAN_HELIX_VIEW.set_lossy(view);
        self.view = view;
        self.state = TermState::ViewChanging;
        self.validating_view = None;
        self.pending_new_view = None;
    }

    fn handle_view_change(&mut self, view_change: ViewChangeMessage) -> Requests {
        let content = view_change.content();
        let view = content.view;
        if view < self.view {
            trace!("Ignoring ViewChange of past view {view}.");
            record_dropped_message(DropReason::StaleView);
            return VecDeque::new();
        }
        if self.is_too_far_ahead(view) {
            debug!("Ignoring ViewChange of view {view}, too far ahead.");
            record_dropped_message(DropReason::TooFarAhead);
            return VecDeque::new();
        }
        if !self.is_leader(view) {
            debug!("Ignoring ViewChange of view {view}, which this member doesn't lead.");
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        if !self.is_valid_view_change(&view_change) {
            warn!("Invalid ViewChange from {}.", view_change.signed.sender_id());
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        if !self.storage.store_view_change(view_change) {
            record_dropped_message(DropReason::Duplicate);
            return VecDeque::new();
        }
        self.check_view_change_quorum(view)
    }

    fn is_valid_view_change(&self, view_change: &ViewChangeMessage) -> bool {
        let content = view_change.content();
        if !self.validator().validate_view_change(self.height, content.view, &view_change.signed)
        {
            return false;
        }
        // A prepared proof is useless to the new leader without its block.
        let prepared_hash = content.prepared_proof.as_ref().and_then(|proof| proof.block_hash());
        match (prepared_hash, &view_change.block) {
            (None, _) => true,
            (Some(block_hash), Some(block)) => {
                block.height == self.height
                    && self.block_utils.validate_block_commitment(self.height, block, &block_hash)
            }
            (Some(_), None) => false,
        }
    }

    // Called by the leader of `view` whenever a vote for it is stored.
    fn check_view_change_quorum(&mut self, view: View) -> Requests {
        if self.last_new_view.is_some_and(|last| last >= view) {
            return VecDeque::new();
        }
        let view_changes = self.storage.get_view_change_messages(self.height, view);
        if view_changes.len() < self.quorum_size {
            return VecDeque::new();
        }
        info!("Collected a quorum of ViewChange votes for view {view}.");
        self.last_new_view = Some(view);
        let mut requests = VecDeque::new();
        if view > self.view {
            self.move_to_view(view);
            requests.push_back(TermRequest::ScheduleElection(view));
        }

        let confirmations: Vec<_> =
            view_changes.iter().map(|view_change| view_change.signed.clone()).collect();
        // Chosen by the rule receivers of the NewView check it against.
        let prepared = highest_prepared_proof(&confirmations)
            .and_then(|proof| Some((proof.view()?, proof.block_hash()?)));
        let prepared_block = prepared.and_then(|(prepared_view, block_hash)| {
            let block = view_changes.into_iter().find_map(|view_change| {
                let proof = view_change.content().prepared_proof.as_ref();
                if proof.and_then(|proof| proof.block_hash()) == Some(block_hash) {
                    view_change.block
                } else {
                    None
                }
            })?;
            Some((prepared_view, block_hash, block))
        });
        match prepared_block {
            Some((prepared_view, block_hash, block)) => {
                info!("Reproposing {block_hash:?}, prepared in view {prepared_view}.");
                requests.append(&mut self.send_new_view(view, block, block_hash, confirmations));
            }
            None => {
                debug!("No prepared block among the votes, requesting a new block.");
                self.pending_new_view = Some((view, confirmations));
                requests.push_back(TermRequest::RequestNewBlockProposal { view });
            }
        }
        requests
    }

    fn handle_proposal_built(
        &mut self,
        view: View,
        proposal: Option<(Block, BlockHash)>,
    ) -> Requests {
        if view != self.view || !self.is_leader(view) {
            debug!("Ignoring stale proposal of view {view}.");
            return VecDeque::new();
        }
        let Some((block, block_hash)) = proposal else {
            warn!("Failed to build a block for view {view}.");
            return VecDeque::new();
        };
        if let Some((new_view, confirmations)) = self.pending_new_view.take() {
            assert_eq!(new_view, view, "Pending NewView of another view");
            return self.send_new_view(view, block, block_hash, confirmations);
        }
        // Later views are only entered through a NewView.
        if view != 0 || self.storage.get_pre_prepare(self.height, view).is_some() {
            debug!("Not proposing in view {view}.");
            return VecDeque::new();
        }
        info!("Proposing {block_hash:?}.");
        let pre_prepare = self.factory.create_pre_prepare(self.height, view, block, block_hash);
        let mut requests =
            VecDeque::from([self.broadcast(ConsensusMessage::PrePrepare(pre_prepare.clone()))]);
        requests.append(&mut self.accept_pre_prepare(pre_prepare));
        requests
    }

    fn send_new_view(
        &mut self,
        view: View,
        block: Block,
        block_hash: BlockHash,
        confirmations: Vec<ViewChangeConfirmation>,
    ) -> Requests {
        let pre_prepare = self.factory.create_pre_prepare(self.height, view, block, block_hash);
        let new_view =
            self.factory.create_new_view(self.height, view, pre_prepare.clone(), confirmations);
        LEAN_HELIX_NEW_VIEWS_SENT.increment(1);
        debug!("Sending NewView of view {view}.");
        let mut requests = VecDeque::from([self.broadcast(ConsensusMessage::NewView(new_view))]);
        requests.append(&mut self.accept_pre_prepare(pre_prepare));
        requests
    }

    fn handle_new_view(&mut self, new_view: NewViewMessage) -> Requests {
        let view = new_view.content().view;
        if view < self.view || (view == self.view && self.state != TermState::ViewChanging) {
            trace!("Ignoring NewView of view {view}.");
            record_dropped_message(DropReason::StaleView);
            return VecDeque::new();
        }
        if self.validating_view == Some(view) {
            trace!("Ignoring NewView of view {view} while validating its block.");
            record_dropped_message(DropReason::Duplicate);
            return VecDeque::new();
        }
        if !self.is_valid_new_view(&new_view) {
            warn!("Invalid NewView from {}.", new_view.signed.sender_id());
            record_dropped_message(DropReason::Invalid);
            return VecDeque::new();
        }
        info!("Accepted NewView, moving to view {view}.");
        if view > self.view {
            self.move_to_view(view);
        }
        // The term stays in ViewChanging until the block of the NewView is found valid.
        self.validating_view = Some(view);
        VecDeque::from([
            TermRequest::ScheduleElection(view),
            TermRequest::ValidateBlockProposal(new_view.pre_prepare),
        ])
    }

    fn is_valid_new_view(&self, new_view: &NewViewMessage) -> bool {
        let content = new_view.content();
        let view = content.view;
        if content.height != self.height
            || new_view.signed.sender_id() != self.leader(view)
            || !new_view.signed.verify(self.key_manager.as_ref())
            || !self.is_valid_pre_prepare(&new_view.pre_prepare, view)
        {
            return false;
        }
        if !self.validator().validate_new_view_confirmations(
            self.height,
            view,
            &content.confirmations,
        ) {
            return false;
        }
        // The leader must repropose the block of the highest prepared proof, if there is one.
        match highest_prepared_proof(&content.confirmations).and_then(|proof| proof.block_hash()) {
            Some(block_hash) => new_view.pre_prepare.content().block_hash == block_hash,
            None => true,
        }
    }
}
