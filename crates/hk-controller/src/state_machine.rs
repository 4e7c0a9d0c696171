//! Reconciler State Machine
//!
//! Enforces valid state transitions for one pairing:
//!
//! ```text
//! ColdStart → CacheLoaded → LiveConnecting → LiveSynced
//!          ↘─────────────↗               ↘ RetryScheduled → LiveConnecting (timer)
//!                                        ↘ FailedTerminal → ColdStart (host re-setup)
//!
//! LiveSynced → RetryScheduled (push refresh lost the connection)
//!            → FailedTerminal (authentication revoked)
//! any → ColdStart (unload)
//! ```

use std::time::Duration;

use thiserror::Error;

/// Lifecycle state of one pairing's reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReconcilerState {
    /// Nothing loaded yet
    #[default]
    ColdStart,
    /// Entities materialized from the cached topology
    CacheLoaded,
    /// Waiting on connect / list
    LiveConnecting,
    /// Live topology reconciled
    LiveSynced,
    /// Serving cached entities, waiting for the retry timer
    RetryScheduled,
    /// Setup failed; the host decides when to try again
    FailedTerminal,
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ReconcilerState,
    pub to: ReconcilerState,
    pub reason: &'static str,
}

impl ReconcilerState {
    /// Attempt a transition to a new state.
    pub fn try_transition(self, to: ReconcilerState) -> Result<ReconcilerState, InvalidTransition> {
        use ReconcilerState::*;

        let valid = match (self, to) {
            // Unload resets from anywhere
            (_, ColdStart) => true,

            (ColdStart, CacheLoaded) => true,
            (ColdStart, LiveConnecting) => true,
            (CacheLoaded, LiveConnecting) => true,

            (LiveConnecting, LiveSynced) => true,
            (LiveConnecting, RetryScheduled) => true,
            (LiveConnecting, FailedTerminal) => true,

            (LiveSynced, RetryScheduled) => true,
            (LiveSynced, FailedTerminal) => true,

            (RetryScheduled, LiveConnecting) => true,

            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: ReconcilerState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: ReconcilerState, to: ReconcilerState) -> &'static str {
        use ReconcilerState::*;

        match (from, to) {
            (LiveSynced, LiveConnecting) => {
                "Already synced - topology changes arrive over the open session"
            }
            (FailedTerminal, _) => "Setup failed - reset to ColdStart before retrying",
            (CacheLoaded, LiveSynced) | (ColdStart, LiveSynced) => {
                "Cannot sync without connecting - must go through LiveConnecting"
            }
            (ColdStart, RetryScheduled) | (CacheLoaded, RetryScheduled) => {
                "Retries are only scheduled after a failed connection attempt"
            }
            (RetryScheduled, LiveSynced) => "Retry must reconnect through LiveConnecting",
            _ => "Invalid state transition",
        }
    }
}

/// Backoff for live reconnection attempts
///
/// `base_delay * 2^min(tries, max_exponent)` plus up to `max_jitter`; with the
/// defaults this gives 5s, 10s, 20s, 40s, 80s (then stays at 80s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_exponent: u32,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_exponent: 4,
            max_jitter: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `tries` (0-based)
    pub fn delay(&self, tries: u32) -> Duration {
        let exponent = tries.min(self.max_exponent).min(16);
        let base = self.base_delay.saturating_mul(2_u32.pow(exponent));
        // Jitter keeps many devices from reconnecting in lockstep
        let jitter = self.max_jitter.mul_f64(rand::random::<f64>());
        base.saturating_add(jitter)
    }
}
