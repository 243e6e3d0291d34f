use lean_helix_config::config::FutureMsgLimitsConfig;
use rstest::{fixture, rstest};

use crate::consensus_message_filter::ConsensusMessageFilter;
use crate::messages::ConsensusMessage;
use crate::test_utils::{test_block, test_block_hash, test_message_factory};
use crate::types::{BlockHeight, MemberId, View};

const MY_ID: MemberId = MemberId(0);
const CURRENT_HEIGHT: BlockHeight = BlockHeight(10);
const LIMITS: FutureMsgLimitsConfig = FutureMsgLimitsConfig {
    future_height_limit: 5,
    per_sender_limit: 3,
    total_cached_limit: 6,
    future_view_limit: 10,
};

fn prepare(sender: u64, height: u64, view: View) -> ConsensusMessage {
    let height = BlockHeight(height);
    let block_hash = test_block_hash(&test_block(height, MemberId(1)));
    ConsensusMessage::Prepare(
        test_message_factory(MemberId(sender)).create_prepare(height, view, block_hash),
    )
}

#[fixture]
fn filter() -> ConsensusMessageFilter {
    ConsensusMessageFilter::new(MY_ID, CURRENT_HEIGHT, LIMITS)
}

#[rstest]
fn current_height_passes(mut filter: ConsensusMessageFilter) {
    let message = prepare(1, 10, 0);
    assert_eq!(filter.filter(message.clone()), Some(message));
    assert_eq!(filter.cached_messages_count(), 0);
}

#[rstest]
fn own_messages_are_dropped(mut filter: ConsensusMessageFilter) {
    assert_eq!(filter.filter(prepare(MY_ID.0, 10, 0)), None);
    assert_eq!(filter.filter(prepare(MY_ID.0, 11, 0)), None);
    assert_eq!(filter.cached_messages_count(), 0);
}

#[rstest]
fn past_heights_are_dropped(mut filter: ConsensusMessageFilter) {
    assert_eq!(filter.filter(prepare(1, 9, 0)), None);
    assert_eq!(filter.filter(prepare(1, 0, 0)), None);
    assert_eq!(filter.cached_messages_count(), 0);
}

#[rstest]
fn future_heights_are_cached_up_to_limit(mut filter: ConsensusMessageFilter) {
    assert_eq!(filter.filter(prepare(1, 11, 0)), None);
    assert_eq!(filter.filter(prepare(1, 15, 0)), None);
    assert_eq!(filter.cached_messages_count(), 2);

    assert_eq!(filter.filter(prepare(2, 16, 0)), None);
    assert_eq!(filter.filter(prepare(2, u64::MAX, 0)), None);
    assert_eq!(filter.cached_messages_count(), 2);
}

#[rstest]
fn set_height_releases_cached_messages_in_arrival_order(mut filter: ConsensusMessageFilter) {
    let arrivals = [prepare(3, 12, 1), prepare(1, 11, 0), prepare(2, 12, 0), prepare(1, 12, 2)];
    for message in arrivals.iter().cloned() {
        assert_eq!(filter.filter(message), None);
    }

    assert_eq!(filter.set_height(BlockHeight(12)), vec![
        arrivals[0].clone(),
        arrivals[2].clone(),
        arrivals[3].clone()
    ]);
    assert_eq!(filter.current_height(), BlockHeight(12));
    // The message of height 11 was skipped over.
    assert_eq!(filter.cached_messages_count(), 0);
    assert_eq!(filter.filter(prepare(1, 11, 0)), None);
    assert_eq!(filter.cached_messages_count(), 0);
}

#[rstest]
fn set_height_keeps_later_heights(mut filter: ConsensusMessageFilter) {
    filter.filter(prepare(1, 11, 0));
    filter.filter(prepare(1, 13, 0));
    assert_eq!(filter.set_height(BlockHeight(11)).len(), 1);
    assert_eq!(filter.cached_messages_count(), 1);
    assert_eq!(filter.set_height(BlockHeight(12)), vec![]);
    assert_eq!(filter.set_height(BlockHeight(13)), vec![prepare(1, 13, 0)]);
}

#[rstest]
fn set_height_to_current_height_is_empty(mut filter: ConsensusMessageFilter) {
    filter.filter(prepare(1, 11, 0));
    assert_eq!(filter.set_height(CURRENT_HEIGHT), vec![]);
    assert_eq!(filter.cached_messages_count(), 1);
}

#[rstest]
fn sender_limit_evicts_oldest(mut filter: ConsensusMessageFilter) {
    for view in 0..5 {
        filter.filter(prepare(1, 11, view));
    }
    filter.filter(prepare(2, 11, 0));
    assert_eq!(filter.cached_messages_count(), 4);

    let released = filter.set_height(BlockHeight(11));
    assert_eq!(released, vec![
        prepare(1, 11, 2),
        prepare(1, 11, 3),
        prepare(1, 11, 4),
        prepare(2, 11, 0)
    ]);
}

#[rstest]
fn sender_limit_spans_heights(mut filter: ConsensusMessageFilter) {
    filter.filter(prepare(1, 11, 0));
    filter.filter(prepare(1, 12, 0));
    filter.filter(prepare(1, 13, 0));
    filter.filter(prepare(1, 14, 0));
    assert_eq!(filter.cached_messages_count(), 3);
    assert_eq!(filter.set_height(BlockHeight(11)), vec![]);

    // Released messages free the sender's quota.
    assert_eq!(filter.set_height(BlockHeight(12)), vec![prepare(1, 12, 0)]);
    filter.filter(prepare(1, 15, 0));
    filter.filter(prepare(1, 16, 0));
    assert_eq!(filter.cached_messages_count(), 3);
}

#[rstest]
fn total_limit_evicts_oldest_across_senders(mut filter: ConsensusMessageFilter) {
    for sender in 1..=10 {
        assert_eq!(filter.filter(prepare(sender, 11 + sender % 2, 0)), None);
    }
    assert_eq!(filter.cached_messages_count(), 6);

    assert_eq!(filter.set_height(BlockHeight(11)), vec![
        prepare(6, 11, 0),
        prepare(8, 11, 0),
        prepare(10, 11, 0)
    ]);
    assert_eq!(filter.set_height(BlockHeight(12)), vec![
        prepare(5, 12, 0),
        prepare(7, 12, 0),
        prepare(9, 12, 0)
    ]);
}

#[rstest]
fn many_claimed_senders_stay_within_total_limit(mut filter: ConsensusMessageFilter) {
    for sender in 1..=10_000 {
        filter.filter(prepare(sender, 11, 0));
    }
    assert_eq!(filter.cached_messages_count(), LIMITS.total_cached_limit);
    assert_eq!(filter.cached_by_sender.len(), LIMITS.total_cached_limit);
    // An evicted sender may cache again.
    filter.filter(prepare(1, 12, 0));
    assert_eq!(filter.cached_by_sender[&MemberId(1)].len(), 1);
}

#[rstest]
#[should_panic(expected = "Height must not decrease")]
fn set_height_must_not_decrease(mut filter: ConsensusMessageFilter) {
    filter.set_height(BlockHeight(9));
}
