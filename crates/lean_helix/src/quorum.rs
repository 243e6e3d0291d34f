//! Committee arithmetic shared by the term and the proofs validator.

#[cfg(test)]
#[path = "quorum_test.rs"]
mod quorum_test;

use crate::types::{MemberId, View};

/// The number of matching votes needed to decide a step with a committee of `committee_size`
/// members: `n - f` where `f = (n - 1) / 3` is the number of tolerated faulty members.
///
/// Any two quorums intersect in at least one honest member.
pub fn quorum_size(committee_size: usize) -> usize {
    assert!(committee_size > 0, "Committee must not be empty");
    let max_faulty = (committee_size - 1) / 3;
    committee_size - max_faulty
}

/// The leader of `view` in an ordered committee.
pub fn leader_for_view(committee: &[MemberId], view: View) -> MemberId {
    assert!(!committee.is_empty(), "Committee must not be empty");
    let len = u64::try_from(committee.len()).expect("Committee size should fit in u64");
    let index = usize::try_from(view % len).expect("Leader index is bounded by committee size");
    committee[index]
}
