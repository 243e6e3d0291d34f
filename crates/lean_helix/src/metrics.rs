//! Consensus metrics, recorded through the `metrics` facade. Nothing is exported unless the host
//! installs a recorder.
use metrics::{counter, describe_counter, describe_gauge, gauge};

pub struct MetricGauge {
    name: &'static str,
    description: &'static str,
}

impl MetricGauge {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }

    pub fn register(&self) {
        gauge!(self.name).set(0.0);
        describe_gauge!(self.name, self.description);
    }

    pub fn set_lossy(&self, value: u64) {
        // Gauges are f64, values above 2^53 lose precision.
        #[allow(clippy::as_conversions)]
        gauge!(self.name).set(value as f64);
    }
}

pub struct MetricCounter {
    name: &'static str,
    description: &'static str,
}

impl MetricCounter {
    pub const fn new(name: &'static str, description: &'static str) -> Self {
        Self { name, description }
    }

    pub fn register(&self) {
        counter!(self.name).absolute(0);
        describe_counter!(self.name, self.description);
    }

    pub fn increment(&self, value: u64) {
        counter!(self.name).increment(value);
    }
}

pub struct LabeledMetricCounter {
    name: &'static str,
    description: &'static str,
    label_name: &'static str,
    label_values: &'static [&'static str],
}

impl LabeledMetricCounter {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        label_name: &'static str,
        label_values: &'static [&'static str],
    ) -> Self {
        Self { name, description, label_name, label_values }
    }

    pub fn register(&self) {
        for value in self.label_values {
            counter!(self.name, self.label_name => *value).absolute(0);
        }
        describe_counter!(self.name, self.description);
    }

    pub fn increment(&self, value: u64, label_value: &'static str) {
        debug_assert!(self.label_values.contains(&label_value), "Unknown label {label_value}");
        counter!(self.name, self.label_name => label_value).increment(value);
    }
}

pub const LABEL_NAME_DROP_REASON: &str = "drop_reason";

/// Why an incoming message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    PastHeight,
    OwnMessage,
    TooFarAhead,
    SenderLimit,
    CacheFull,
    StaleView,
    Invalid,
    Duplicate,
}

impl DropReason {
    pub const ALL: &'static [&'static str] = &[
        "past_height",
        "own_message",
        "too_far_ahead",
        "sender_limit",
        "cache_full",
        "stale_view",
        "invalid",
        "duplicate",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::PastHeight => "past_height",
            DropReason::OwnMessage => "own_message",
            DropReason::TooFarAhead => "too_far_ahead",
            DropReason::SenderLimit => "sender_limit",
            DropReason::CacheFull => "cache_full",
            DropReason::StaleView => "stale_view",
            DropReason::Invalid => "invalid",
            DropReason::Duplicate => "duplicate",
        }
    }
}

pub static LEAN_HELIX_HEIGHT: MetricGauge =
    MetricGauge::new("lean_helix_height", "The block height consensus is working to decide");
pub static LEAN_HELIX_VIEW: MetricGauge =
    MetricGauge::new("lean_helix_view", "The view of the active term");
pub static LEAN_HELIX_CACHED_MESSAGES: MetricGauge = MetricGauge::new(
    "lean_helix_cached_messages",
    "How many messages of future heights are cached",
);
pub static LEAN_HELIX_DECISIONS_REACHED_BY_CONSENSUS: MetricCounter = MetricCounter::new(
    "lean_helix_decisions_reached_by_consensus",
    "The total number of decisions reached by way of consensus",
);
pub static LEAN_HELIX_DECISIONS_REACHED_BY_SYNC: MetricCounter = MetricCounter::new(
    "lean_helix_decisions_reached_by_sync",
    "The total number of decisions reached by way of sync",
);
pub static LEAN_HELIX_VIEW_CHANGES: MetricCounter = MetricCounter::new(
    "lean_helix_view_changes",
    "The number of times a term moved to a new view",
);
pub static LEAN_HELIX_NEW_VIEWS_SENT: MetricCounter = MetricCounter::new(
    "lean_helix_new_views_sent",
    "The number of NewView messages sent as the leader of a new view",
);
pub static LEAN_HELIX_ELECTION_TIMEOUTS: MetricCounter = MetricCounter::new(
    "lean_helix_election_timeouts",
    "The number of times the election timer fired",
);
pub static LEAN_HELIX_PROPOSALS_FAILED: MetricCounter = MetricCounter::new(
    "lean_helix_proposals_failed",
    "The number of block proposal requests which failed or timed out",
);
pub static LEAN_HELIX_PROPOSALS_INVALID: MetricCounter = MetricCounter::new(
    "lean_helix_proposals_invalid",
    "The number of proposed blocks which failed validation",
);
pub static LEAN_HELIX_DROPPED_MESSAGES: LabeledMetricCounter = LabeledMetricCounter::new(
    "lean_helix_dropped_messages",
    "The number of incoming consensus messages which were dropped",
    LABEL_NAME_DROP_REASON,
    DropReason::ALL,
);

pub fn record_dropped_message(reason: DropReason) {
    LEAN_HELIX_DROPPED_MESSAGES.increment(1, reason.as_str());
}

/// Registers all consensus metrics with the installed recorder, setting their initial values.
pub fn register_metrics() {
    LEAN_HELIX_HEIGHT.register();
    LEAN_HELIX_VIEW.register();
    LEAN_HELIX_CACHED_MESSAGES.register();
    LEAN_HELIX_DECISIONS_REACHED_BY_CONSENSUS.register();
    LEAN_HELIX_DECISIONS_REACHED_BY_SYNC.register();
    LEAN_HELIX_VIEW_CHANGES.register();
    LEAN_HELIX_NEW_VIEWS_SENT.register();
    LEAN_HELIX_ELECTION_TIMEOUTS.register();
    LEAN_HELIX_PROPOSALS_FAILED.register();
    LEAN_HELIX_PROPOSALS_INVALID.register();
    LEAN_HELIX_DROPPED_MESSAGES.register();
}
