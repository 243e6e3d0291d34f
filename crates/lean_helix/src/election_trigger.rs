//! Single-shot, replaceable election timer with exponential back-off.
//!
//! The timer of view `v` fires after `base_timeout * 2^v`. Only one timer is armed at a time.
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::types::View;

#[cfg(test)]
#[path = "election_trigger_test.rs"]
mod election_trigger_test;

#[derive(Debug)]
pub struct ElectionTrigger {
    base_timeout: Duration,
    armed: Option<ArmedTimer>,
}

#[derive(Debug)]
struct ArmedTimer {
    view: View,
    handle: JoinHandle<()>,
}

impl ElectionTrigger {
    pub fn new(base_timeout: Duration) -> Self {
        Self { base_timeout, armed: None }
    }

    /// The election timeout of `view`. Saturates instead of overflowing for very high views.
    pub fn timeout_for_view(&self, view: View) -> Duration {
        let exponent = u32::try_from(view).unwrap_or(u32::MAX);
        self.base_timeout.saturating_mul(2u32.saturating_pow(exponent))
    }

    /// Arms the timer of `view`, replacing any timer of another view. `on_election` is called
    /// once, from a spawned task, when the timer fires.
    ///
    /// Registering the view which is already armed (or already fired) is a no-op.
    pub fn register_on_election<F>(&mut self, view: View, on_election: F)
    where
        F: FnOnce(View) + Send + 'static,
    {
        if self.armed.as_ref().is_some_and(|armed| armed.view == view) {
            trace!(view, "Election timer already registered.");
            return;
        }
        self.unregister_on_election();
        let timeout = self.timeout_for_view(view);
        debug!(view, ?timeout, "Registering election timer.");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_election(view);
        });
        self.armed = Some(ArmedTimer { view, handle });
    }

    /// Disarms the pending timer, if any.
    pub fn unregister_on_election(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.handle.abort();
        }
    }

    /// The view of the registered timer, whether or not it already fired.
    pub fn registered_view(&self) -> Option<View> {
        self.armed.as_ref().map(|armed| armed.view)
    }
}

impl Drop for ElectionTrigger {
    fn drop(&mut self) {
        self.unregister_on_election();
    }
}
