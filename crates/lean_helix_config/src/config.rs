//! This module contains the configuration for Lean Helix consensus, including the
//! `ConsensusConfig` struct and its implementation of the `SerializeConfig` trait. The
//! configuration includes the election and block timeouts and the limits on buffering messages
//! from future heights.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use validator::{Validate, ValidationError};

use crate::dumping::{
    prepend_sub_config_name,
    ser_param,
    ParamPath,
    SerializeConfig,
    SerializedParam,
};

/// Configuration for consensus.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct ConsensusConfig {
    /// Timeouts configuration for consensus.
    #[validate(nested)]
    pub timeouts: TimeoutsConfig,
    /// Future message limits configuration.
    #[validate(nested)]
    pub future_msg_limit: FutureMsgLimitsConfig,
}

impl SerializeConfig for ConsensusConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        let mut config = BTreeMap::new();
        config.extend(prepend_sub_config_name(self.timeouts.dump(), "timeouts"));
        config.extend(prepend_sub_config_name(self.future_msg_limit.dump(), "future_msg_limit"));
        config
    }
}

/// Configuration for consensus timeouts.
#[serde_as]
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Validate)]
pub struct TimeoutsConfig {
    /// The election timeout of view 0. View `v` waits `election_base_timeout * 2^v`.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub election_base_timeout: Duration,
    /// The maximum time a block proposal request may take.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub proposal_timeout: Duration,
    /// The maximum time the validation of a proposed block may take.
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    #[validate(custom(function = "validate_non_zero_duration"))]
    pub validation_timeout: Duration,
}

impl SerializeConfig for TimeoutsConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from_iter([
            ser_param(
                "election_base_timeout",
                &self.election_base_timeout.as_secs_f64(),
                "The election timeout (seconds) of view 0, doubled on every view change.",
            ),
            ser_param(
                "proposal_timeout",
                &self.proposal_timeout.as_secs_f64(),
                "The maximum time (seconds) a block proposal request may take.",
            ),
            ser_param(
                "validation_timeout",
                &self.validation_timeout.as_secs_f64(),
                "The maximum time (seconds) the validation of a proposed block may take.",
            ),
        ])
    }
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            election_base_timeout: Duration::from_secs_f64(2.0),
            proposal_timeout: Duration::from_secs_f64(1.5),
            validation_timeout: Duration::from_secs_f64(1.5),
        }
    }
}

/// Configuration for buffering messages of future heights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate, PartialEq)]
pub struct FutureMsgLimitsConfig {
    /// How many heights in the future should we cache.
    #[validate(range(min = 1))]
    pub future_height_limit: u64,
    /// How many future messages a single sender may have cached at once.
    #[validate(range(min = 1))]
    pub per_sender_limit: usize,
    /// How many future messages may be cached at once, across all senders.
    #[validate(range(min = 1))]
    pub total_cached_limit: usize,
    /// How many views ahead of the current view the votes of a height are kept.
    #[validate(range(min = 1))]
    pub future_view_limit: u64,
}

impl SerializeConfig for FutureMsgLimitsConfig {
    fn dump(&self) -> BTreeMap<ParamPath, SerializedParam> {
        BTreeMap::from_iter([
            ser_param(
                "future_height_limit",
                &self.future_height_limit,
                "How many heights in the future should we cache.",
            ),
            ser_param(
                "per_sender_limit",
                &self.per_sender_limit,
                "How many future messages a single sender may have cached at once.",
            ),
            ser_param(
                "total_cached_limit",
                &self.total_cached_limit,
                "How many future messages may be cached at once, across all senders.",
            ),
            ser_param(
                "future_view_limit",
                &self.future_view_limit,
                "How many views ahead of the current view the votes of a height are kept.",
            ),
        ])
    }
}

impl Default for FutureMsgLimitsConfig {
    fn default() -> Self {
        Self {
            future_height_limit: 10,
            per_sender_limit: 100,
            total_cached_limit: 1000,
            future_view_limit: 10,
        }
    }
}

fn validate_non_zero_duration(duration: &Duration) -> Result<(), ValidationError> {
    if duration.is_zero() {
        return Err(ValidationError::new("Duration must be greater than zero"));
    }
    Ok(())
}
