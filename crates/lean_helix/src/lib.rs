//! Lean Helix: a PBFT-derived Byzantine fault tolerant consensus core.
//!
//! A committee of known members agrees, height by height, on the next block of a chain while
//! tolerating `f` faulty members out of `n`, with a quorum of `n - f`. Consensus is a library:
//! the host supplies signing, block creation and validation, message transport and committee
//! membership (see [`types`]), and is notified of every committed block.
//!
//! Entry point: [`height_controller::run_consensus`], or [`height_controller::HeightController`]
//! for hosts driving consensus themselves.

pub mod consensus_message_filter;
pub mod election_trigger;
pub mod height_controller;
pub mod message_factory;
pub mod message_storage;
pub mod messages;
pub mod metrics;
pub mod proofs_validator;
pub mod quorum;
pub mod term_in_committee;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;
pub mod types;

pub use height_controller::{run_consensus, Capabilities, ConsensusInput, HeightController};
pub use lean_helix_config::config;
pub use metrics::register_metrics;
