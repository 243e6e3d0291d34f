use lazy_static::lazy_static;
use rstest::rstest;
use test_case::test_case;

use crate::messages::{
    BlockProof,
    PrePrepareMessage,
    PreparedMessages,
    PreparedProof,
    ViewChangeConfirmation,
};
use crate::proofs_validator::{highest_prepared_proof, ProofsValidator};
use crate::test_utils::{
    test_block,
    test_block_hash,
    test_committee,
    test_message_factory,
    TestKeyManager,
};
use crate::types::{BlockHash, BlockHeight, KeyManager, MemberId, Signature, View};

const HEIGHT: BlockHeight = BlockHeight(7);
const RANDOM_SEED: u64 = 1234;

lazy_static! {
    static ref COMMITTEE: Vec<MemberId> = test_committee(4);
    static ref KEY_MANAGER: TestKeyManager = TestKeyManager::new(MemberId(0));
    static ref BLOCK_HASH: BlockHash = test_block_hash(&test_block(HEIGHT, MemberId(0)));
}

fn validator() -> ProofsValidator<'static> {
    ProofsValidator::new(&*KEY_MANAGER, &COMMITTEE)
}

/// A proof that `view` prepared `BLOCK_HASH`, signed by the leader of `view` and `prepare_senders`.
fn prepared_proof(view: View, prepare_senders: &[u64]) -> PreparedProof {
    let leader = MemberId(view % 4);
    let block = test_block(HEIGHT, MemberId(0));
    let pre_prepare =
        test_message_factory(leader).create_pre_prepare(HEIGHT, view, block, *BLOCK_HASH).signed;
    let prepares = prepare_senders
        .iter()
        .map(|sender| {
            test_message_factory(MemberId(*sender)).create_prepare(HEIGHT, view, *BLOCK_HASH)
        })
        .collect();
    PreparedProof { pre_prepare: Some(pre_prepare), prepares }
}

fn confirmation(sender: u64, view: View, proof: Option<PreparedProof>) -> ViewChangeConfirmation {
    let prepared = proof.map(|proof| {
        let pre_prepare = proof.pre_prepare.expect("Proof has a PrePrepare");
        PreparedMessages {
            pre_prepare: PrePrepareMessage {
                signed: pre_prepare,
                block: test_block(HEIGHT, MemberId(0)),
            },
            prepares: proof.prepares,
        }
    });
    test_message_factory(MemberId(sender)).create_view_change(HEIGHT, view, prepared).signed
}

fn block_proof(senders: &[u64]) -> BlockProof {
    let commits: Vec<_> = senders
        .iter()
        .map(|sender| {
            let factory = test_message_factory(MemberId(*sender));
            factory.create_commit(HEIGHT, 0, *BLOCK_HASH, RANDOM_SEED)
        })
        .collect();
    let shares: Vec<_> = commits
        .iter()
        .map(|commit| (commit.sender_id(), commit.content.random_seed_share.clone()))
        .collect();
    BlockProof {
        height: HEIGHT,
        view: 0,
        block_hash: *BLOCK_HASH,
        commits,
        random_seed_signature: KEY_MANAGER.aggregate_random_seed(HEIGHT, &shares),
    }
}

#[test]
fn missing_or_empty_proof_is_valid() {
    assert!(validator().validate_prepared_proof(HEIGHT, 1, None));
    assert!(validator().validate_prepared_proof(HEIGHT, 1, Some(&PreparedProof::default())));
}

#[test]
fn proof_with_one_part_is_malformed() {
    let mut without_prepares = prepared_proof(0, &[1, 2]);
    without_prepares.prepares.clear();
    assert!(!validator().validate_prepared_proof(HEIGHT, 1, Some(&without_prepares)));

    let mut without_pre_prepare = prepared_proof(0, &[1, 2]);
    without_pre_prepare.pre_prepare = None;
    assert!(!validator().validate_prepared_proof(HEIGHT, 1, Some(&without_pre_prepare)));
}

#[test_case(&[1], false; "below quorum")]
#[test_case(&[1, 2], true; "quorum minus leader")]
#[test_case(&[1, 2, 3], true; "all members")]
#[test_case(&[1, 1], false; "duplicate sender")]
#[test_case(&[0, 1], false; "prepare from leader")]
#[test_case(&[1, 9], false; "prepare from non member")]
fn prepare_senders(senders: &[u64], expected: bool) {
    let proof = prepared_proof(0, senders);
    assert_eq!(validator().validate_prepared_proof(HEIGHT, 1, Some(&proof)), expected);
}

#[rstest]
#[case::same_view(1, 1, false)]
#[case::lower_target_view(2, 1, false)]
#[case::higher_target_view(1, 5, true)]
fn proof_view_must_be_below_target(
    #[case] proof_view: View,
    #[case] target_view: View,
    #[case] expected: bool,
) {
    let proof = prepared_proof(proof_view, &[2, 3]);
    assert_eq!(validator().validate_prepared_proof(HEIGHT, target_view, Some(&proof)), expected);
}

#[test]
fn proof_of_other_height_is_invalid() {
    let proof = prepared_proof(0, &[1, 2]);
    assert!(!validator().validate_prepared_proof(HEIGHT.unchecked_next(), 1, Some(&proof)));
}

#[test]
fn pre_prepare_not_from_leader_is_invalid() {
    let mut proof = prepared_proof(0, &[2, 3]);
    proof.pre_prepare = Some(
        test_message_factory(MemberId(1))
            .create_pre_prepare(HEIGHT, 0, test_block(HEIGHT, MemberId(0)), *BLOCK_HASH)
            .signed,
    );
    assert!(!validator().validate_prepared_proof(HEIGHT, 1, Some(&proof)));
}

#[test]
fn prepare_of_other_block_is_invalid() {
    let mut proof = prepared_proof(0, &[1]);
    let other_hash = test_block_hash(&test_block(HEIGHT, MemberId(3)));
    proof.prepares.push(test_message_factory(MemberId(2)).create_prepare(HEIGHT, 0, other_hash));
    assert!(!validator().validate_prepared_proof(HEIGHT, 1, Some(&proof)));
}

#[test]
fn bad_signature_is_invalid() {
    let mut proof = prepared_proof(0, &[1, 2]);
    proof.prepares[1].sender.signature = Signature(vec![0; 32]);
    assert!(!validator().validate_prepared_proof(HEIGHT, 1, Some(&proof)));
}

#[test]
fn view_change_must_match_target() {
    let vote = confirmation(2, 1, Some(prepared_proof(0, &[1, 2])));
    assert!(validator().validate_view_change(HEIGHT, 1, &vote));
    assert!(!validator().validate_view_change(HEIGHT, 2, &vote));
    assert!(!validator().validate_view_change(HEIGHT.unchecked_next(), 1, &vote));
    assert!(!validator().validate_view_change(HEIGHT, 1, &confirmation(8, 1, None)));
}

#[test]
fn view_change_with_invalid_proof_is_invalid() {
    let vote = confirmation(2, 1, Some(prepared_proof(0, &[1])));
    assert!(!validator().validate_view_change(HEIGHT, 1, &vote));
}

#[test]
fn new_view_confirmations_need_quorum_of_distinct_members() {
    let quorum: Vec<_> = (0..3).map(|sender| confirmation(sender, 1, None)).collect();
    assert!(validator().validate_new_view_confirmations(HEIGHT, 1, &quorum));
    assert!(!validator().validate_new_view_confirmations(HEIGHT, 1, &quorum[..2]));

    let duplicated =
        vec![confirmation(0, 1, None), confirmation(1, 1, None), confirmation(1, 1, None)];
    assert!(!validator().validate_new_view_confirmations(HEIGHT, 1, &duplicated));

    let mixed_views =
        vec![confirmation(0, 1, None), confirmation(1, 1, None), confirmation(2, 2, None)];
    assert!(!validator().validate_new_view_confirmations(HEIGHT, 1, &mixed_views));
}

#[test]
fn highest_prepared_proof_by_view() {
    let confirmations = vec![
        confirmation(0, 3, Some(prepared_proof(1, &[2, 3]))),
        confirmation(1, 3, None),
        confirmation(2, 3, Some(prepared_proof(2, &[1, 3]))),
        confirmation(3, 3, Some(prepared_proof(0, &[1, 2]))),
    ];
    assert_eq!(highest_prepared_proof(&confirmations).and_then(PreparedProof::view), Some(2));
    assert_eq!(highest_prepared_proof(&confirmations[1..2]), None);
}

#[test]
fn block_proof_with_quorum_is_valid() {
    assert!(validator().validate_block_proof(&block_proof(&[0, 1, 2]), RANDOM_SEED));
    assert!(validator().validate_block_proof(&block_proof(&[0, 1, 2, 3]), RANDOM_SEED));
}

#[test_case(&[0, 1]; "below quorum")]
#[test_case(&[0, 1, 1]; "duplicate committer")]
#[test_case(&[0, 1, 5]; "non member committer")]
fn invalid_block_proof_committers(senders: &[u64]) {
    assert!(!validator().validate_block_proof(&block_proof(senders), RANDOM_SEED));
}

#[test]
fn block_proof_of_other_random_seed_is_invalid() {
    assert!(!validator().validate_block_proof(&block_proof(&[0, 1, 2]), RANDOM_SEED + 1));
}

#[test]
fn block_proof_with_wrong_aggregate_is_invalid() {
    let mut proof = block_proof(&[0, 1, 2]);
    proof.random_seed_signature = Signature(vec![1, 2, 3]);
    assert!(!validator().validate_block_proof(&proof, RANDOM_SEED));
}

#[test]
fn block_proof_with_commit_of_other_view_is_invalid() {
    let mut proof = block_proof(&[0, 1, 2]);
    proof.commits[2] =
        test_message_factory(MemberId(2)).create_commit(HEIGHT, 1, *BLOCK_HASH, RANDOM_SEED);
    assert!(!validator().validate_block_proof(&proof, RANDOM_SEED));
}
