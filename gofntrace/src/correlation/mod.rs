//! # Event Correlation
//!
//! The kernel side emits two independent streams: call/return events and
//! argument payloads. Both are keyed by goroutine id but nothing orders one
//! stream against the other. The correlator joins them back together and
//! reconstructs each goroutine's call tree.
//!
//! ## Per-goroutine lifecycle
//!
//! ```text
//!   Unseen ──Entry──▶ Open ──Return (depth 0)──▶ Closed ─┐
//!                      │  ▲                              │
//!                      │  └──────── Entry ───────────────┘
//!                      └──ThreadExit──▶ Closed (partial)
//! ```
//!
//! A goroutine only becomes `Open` on an `Entry` event: returns from
//! functions that were already running when tracing started are ignored.
//! Every time the call depth goes back to zero the buffered events are
//! handed out as one [`ClosedTrace`].
//!
//! ## Arguments
//!
//! An entry event with `n` fetch specs consumes the next `n` payloads of its
//! goroutine. If they have not arrived yet the event is parked in that
//! goroutine's deferred queue (and so is every later event of the same
//! goroutine, to keep order) until the payloads show up or the wait times
//! out. Other goroutines are not affected.

pub mod correlator;
pub mod registry;

pub use correlator::{Correlator, CorrelatorConfig, CorrelatorStats};
pub use registry::{GoroutineState, TraceRegistry};

use crate::domain::{GoroutineId, PointId};
use crate::plan::ProbeKind;

/// A call or return observed by the kernel probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub goid: GoroutineId,
    pub ip: u64,
    pub caller_ip: u64,
    pub frame_base: u64,
    pub caller_frame_base: u64,
    pub kind: ProbeKind,
    /// Nanoseconds since boot
    pub time_ns: u64,
}

/// Identifies which declared argument a payload was captured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTag {
    pub point_id: PointId,
    pub arg_index: u8,
}

/// Raw bytes of one captured argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgPayload {
    pub goid: GoroutineId,
    pub tag: Option<PayloadTag>,
    pub data: Vec<u8>,
}

/// An event joined with its instrumentation point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEvent {
    pub raw: RawEvent,
    pub point_id: PointId,
    pub function_name: String,
    pub kind: ProbeKind,
    /// `name=value` pairs joined with `", "`; empty for returns
    pub arguments: String,
}

/// A finished (or abandoned) call tree of one goroutine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedTrace {
    pub goid: GoroutineId,
    pub events: Vec<ResolvedEvent>,
    /// Some calls never returned
    pub partial: bool,
    /// The goroutine exited while calls were open
    pub exited: bool,
}

impl ClosedTrace {
    /// Function at the root of the call tree
    #[must_use]
    pub fn root_function(&self) -> Option<&str> {
        self.events.first().map(|e| e.function_name.as_str())
    }
}
