use std::sync::Arc;
use std::thread;

use lazy_static::lazy_static;
use rstest::{fixture, rstest};

use crate::message_storage::MessageStorage;
use crate::messages::{PrepareMessage, ViewChangeMessage};
use crate::test_utils::{test_block, test_block_hash, test_message_factory};
use crate::types::{Block, BlockHash, BlockHeight, MemberId, View};

const HEIGHT: BlockHeight = BlockHeight(5);
const LEADER: MemberId = MemberId(0);

lazy_static! {
    static ref BLOCK: Block = test_block(HEIGHT, LEADER);
    static ref BLOCK_HASH: BlockHash = test_block_hash(&BLOCK);
    static ref OTHER_BLOCK: Block = test_block(HEIGHT, MemberId(1));
    static ref OTHER_BLOCK_HASH: BlockHash = test_block_hash(&OTHER_BLOCK);
}

#[fixture]
fn storage() -> MessageStorage {
    MessageStorage::new()
}

fn prepare(sender: u64, view: View, block_hash: BlockHash) -> PrepareMessage {
    test_message_factory(MemberId(sender)).create_prepare(HEIGHT, view, block_hash)
}

fn view_change(sender: u64, view: View) -> ViewChangeMessage {
    test_message_factory(MemberId(sender)).create_view_change(HEIGHT, view, None)
}

fn store_pre_prepare(storage: &MessageStorage, view: View, block: &Block) {
    let pre_prepare = test_message_factory(LEADER).create_pre_prepare(
        HEIGHT,
        view,
        block.clone(),
        test_block_hash(block),
    );
    assert!(storage.store_pre_prepare(pre_prepare));
}

#[rstest]
fn store_prepare_is_idempotent(storage: MessageStorage) {
    assert!(storage.store_prepare(prepare(1, 0, *BLOCK_HASH)));
    assert!(!storage.store_prepare(prepare(1, 0, *BLOCK_HASH)));
    assert!(storage.store_prepare(prepare(2, 0, *BLOCK_HASH)));
    assert_eq!(
        storage.get_prepare_sender_ids(HEIGHT, 0, &BLOCK_HASH),
        vec![MemberId(1), MemberId(2)]
    );
}

#[rstest]
fn votes_of_a_sender_are_found_in_any_block(storage: MessageStorage) {
    assert!(!storage.has_prepare_from(HEIGHT, 0, MemberId(1)));
    storage.store_prepare(prepare(1, 0, *OTHER_BLOCK_HASH));
    assert!(storage.has_prepare_from(HEIGHT, 0, MemberId(1)));
    assert!(!storage.has_prepare_from(HEIGHT, 1, MemberId(1)));
    assert!(!storage.has_prepare_from(HEIGHT, 0, MemberId(2)));
    assert!(!storage.has_commit_from(HEIGHT, 0, MemberId(1)));

    let commit = test_message_factory(MemberId(2)).create_commit(HEIGHT, 3, *BLOCK_HASH, 0);
    storage.store_commit(commit);
    assert!(storage.has_commit_from(HEIGHT, 3, MemberId(2)));
    assert!(!storage.has_commit_from(BlockHeight(6), 3, MemberId(2)));
}

#[rstest]
fn prepares_are_keyed_by_view_and_block(storage: MessageStorage) {
    assert!(storage.store_prepare(prepare(1, 0, *BLOCK_HASH)));
    assert!(storage.store_prepare(prepare(1, 1, *BLOCK_HASH)));
    assert!(storage.store_prepare(prepare(1, 0, *OTHER_BLOCK_HASH)));
    assert_eq!(storage.get_prepare_messages(HEIGHT, 0, &BLOCK_HASH).len(), 1);
    assert_eq!(storage.get_prepare_messages(HEIGHT, 1, &BLOCK_HASH).len(), 1);
    assert_eq!(storage.get_prepare_messages(HEIGHT, 0, &OTHER_BLOCK_HASH).len(), 1);
    assert!(storage.get_prepare_messages(HEIGHT.unchecked_next(), 0, &BLOCK_HASH).is_empty());
}

#[rstest]
fn one_pre_prepare_per_view(storage: MessageStorage) {
    store_pre_prepare(&storage, 0, &BLOCK);
    let conflicting = test_message_factory(LEADER).create_pre_prepare(
        HEIGHT,
        0,
        OTHER_BLOCK.clone(),
        *OTHER_BLOCK_HASH,
    );
    assert!(!storage.store_pre_prepare(conflicting));
    assert_eq!(storage.get_pre_prepare(HEIGHT, 0).unwrap().block, *BLOCK);
    assert!(storage.get_pre_prepare(HEIGHT, 1).is_none());
}

#[rstest]
fn latest_pre_prepare_is_of_highest_view(storage: MessageStorage) {
    assert!(storage.get_latest_pre_prepare(HEIGHT).is_none());
    store_pre_prepare(&storage, 2, &OTHER_BLOCK);
    store_pre_prepare(&storage, 0, &BLOCK);
    assert_eq!(storage.get_latest_pre_prepare(HEIGHT).unwrap().content().view, 2);
}

#[rstest]
fn store_commit_is_idempotent(storage: MessageStorage) {
    let commit = test_message_factory(MemberId(3)).create_commit(HEIGHT, 0, *BLOCK_HASH, 7);
    assert!(storage.store_commit(commit.clone()));
    assert!(!storage.store_commit(commit));
    assert_eq!(storage.get_commit_sender_ids(HEIGHT, 0, &BLOCK_HASH), vec![MemberId(3)]);
    assert_eq!(storage.get_commit_messages(HEIGHT, 0, &BLOCK_HASH).len(), 1);
}

#[rstest]
fn one_view_change_per_sender_and_view(storage: MessageStorage) {
    assert!(storage.store_view_change(view_change(1, 1)));
    assert!(!storage.store_view_change(view_change(1, 1)));
    assert!(storage.store_view_change(view_change(2, 1)));
    assert!(storage.store_view_change(view_change(1, 2)));
    assert_eq!(storage.get_view_change_messages(HEIGHT, 1).len(), 2);
    assert_eq!(storage.get_view_change_messages(HEIGHT, 2).len(), 1);
    assert!(storage.get_view_change_messages(HEIGHT, 3).is_empty());
}

#[rstest]
fn extract_prepared_messages_requires_quorum(storage: MessageStorage) {
    let quorum_size = 3;
    store_pre_prepare(&storage, 0, &BLOCK);
    storage.store_prepare(prepare(1, 0, *BLOCK_HASH));
    assert!(storage.extract_prepared_messages(HEIGHT, quorum_size).is_none());

    // A prepare for another block doesn't count.
    storage.store_prepare(prepare(2, 0, *OTHER_BLOCK_HASH));
    assert!(storage.extract_prepared_messages(HEIGHT, quorum_size).is_none());

    storage.store_prepare(prepare(2, 0, *BLOCK_HASH));
    let prepared = storage.extract_prepared_messages(HEIGHT, quorum_size).unwrap();
    assert_eq!(prepared.pre_prepare.block, *BLOCK);
    assert_eq!(prepared.prepares.len(), quorum_size - 1);
}

#[rstest]
fn extract_prepared_messages_takes_highest_prepared_view(storage: MessageStorage) {
    let quorum_size = 3;
    store_pre_prepare(&storage, 0, &BLOCK);
    store_pre_prepare(&storage, 1, &OTHER_BLOCK);
    store_pre_prepare(&storage, 2, &BLOCK);
    for sender in [1, 2] {
        storage.store_prepare(prepare(sender, 0, *BLOCK_HASH));
        storage.store_prepare(prepare(sender, 1, *OTHER_BLOCK_HASH));
    }
    // View 2 has a PrePrepare but isn't prepared.
    storage.store_prepare(prepare(1, 2, *BLOCK_HASH));

    let prepared = storage.extract_prepared_messages(HEIGHT, quorum_size).unwrap();
    assert_eq!(prepared.pre_prepare.content().view, 1);
    assert_eq!(prepared.pre_prepare.block, *OTHER_BLOCK);
    assert!(prepared.prepares.iter().all(|prepare| prepare.content.view == 1));
}

#[rstest]
fn clear_height_logs_drops_only_that_height(storage: MessageStorage) {
    let next_height = HEIGHT.unchecked_next();
    storage.store_prepare(prepare(1, 0, *BLOCK_HASH));
    storage.store_prepare(
        test_message_factory(MemberId(1)).create_prepare(next_height, 0, *BLOCK_HASH),
    );
    assert_eq!(storage.stored_heights(), vec![HEIGHT, next_height]);

    storage.clear_height_logs(HEIGHT);
    assert!(storage.get_prepare_messages(HEIGHT, 0, &BLOCK_HASH).is_empty());
    assert_eq!(storage.get_prepare_messages(next_height, 0, &BLOCK_HASH).len(), 1);

    // Storing again after clearing is not a duplicate.
    assert!(storage.store_prepare(prepare(1, 0, *BLOCK_HASH)));
    storage.clear_heights_below(next_height);
    assert_eq!(storage.stored_heights(), vec![next_height]);
}

#[test]
fn concurrent_stores_are_linearized() {
    let storage = Arc::new(MessageStorage::new());
    let handles: Vec<_> = (0..8)
        .map(|sender| {
            let storage = storage.clone();
            thread::spawn(move || {
                // Every sender stores its prepare twice, only the first store succeeds.
                let first = storage.store_prepare(prepare(sender, 0, *BLOCK_HASH));
                let second = storage.store_prepare(prepare(sender, 0, *BLOCK_HASH));
                (first, second)
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), (true, false));
    }
    assert_eq!(storage.get_prepare_sender_ids(HEIGHT, 0, &BLOCK_HASH).len(), 8);
}
