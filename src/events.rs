//! Observable side effects.
//!
//! Every state-changing operation in the core emits a [`CoreEvent`]
//! through an injected [`EventSink`] rather than writing to a log
//! directly. This is what lets tests assert on the exact sequence and
//! fields of emitted events (see each component's `#[cfg(test)]` module)
//! while production callers wire a [`TracingEventSink`] for structured
//! JSON logs.

use std::sync::Mutex;

use serde::Serialize;

/// The full set of events named by the core's external-interface
/// contract, plus `PayoutRecordsEvicted`, which the payout-application
/// algorithm also emits on ring-buffer overflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum CoreEvent {
    BorrowerRegistered {
        borrower: String,
    },
    PayoutSubmitted {
        borrower: String,
        txid: String,
        vout: u32,
        amount_sats: u64,
        effective_amount_sats: u64,
    },
    PayoutBelowMinimum {
        borrower: String,
        txid: String,
        vout: u32,
        amount_sats: u64,
    },
    PayoutWindowPruned {
        borrower: String,
        pruned_count: usize,
        trailing_revenue_sats: u64,
    },
    PayoutRecordsEvicted {
        borrower: String,
        evicted_count: usize,
    },
    CreditLimitUpdated {
        borrower: String,
        old_limit: u128,
        new_limit: u128,
    },
    Borrowed {
        borrower: String,
        amount: u128,
    },
    Repaid {
        borrower: String,
        amount: u128,
        interest_paid: u128,
        principal_paid: u128,
    },
    BorrowerFrozen {
        borrower: String,
    },
    BorrowerUnfrozen {
        borrower: String,
    },
    CheckpointSet {
        height: u32,
    },
    Paused,
    Unpaused,
    VerifierChanged,
    VaultChanged,
    RiskConfigChanged,
}

/// A sink that observes [`CoreEvent`]s as they are emitted.
///
/// Implementations must not block for long or fail; event delivery is
/// best-effort observability, never part of the state-transition
/// contract.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CoreEvent);
}

/// Renders events as structured `tracing` log lines.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: CoreEvent) {
        let payload = serde_json::to_string(&event)
            .unwrap_or_else(|_| "<unserializable core event>".to_string());
        tracing::info!(target: "hashcredit_core::events", event = %payload);
    }
}

/// Buffers events in memory for test assertions.
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<CoreEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CoreEvent> {
        self.events.lock().expect("recording sink mutex poisoned").clone()
    }

    pub fn clear(&self) {
        self.events.lock().expect("recording sink mutex poisoned").clear();
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: CoreEvent) {
        self.events
            .lock()
            .expect("recording sink mutex poisoned")
            .push(event);
    }
}

/// A sink that drops every event; useful as a default for callers who do
/// not care about observability.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: CoreEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingEventSink::new();
        sink.emit(CoreEvent::Paused);
        sink.emit(CoreEvent::Unpaused);

        let events = sink.events();
        assert_eq!(events, vec![CoreEvent::Paused, CoreEvent::Unpaused]);
    }

    #[test]
    fn recording_sink_clears() {
        let sink = RecordingEventSink::new();
        sink.emit(CoreEvent::Paused);
        sink.clear();
        assert!(sink.events().is_empty());
    }
}
