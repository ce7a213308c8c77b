use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use super::{ArgPayload, RawEvent, ResolvedEvent};
use crate::domain::GoroutineId;
use crate::plan::ProbeKind;

/// An event parked until its argument payloads arrive
#[derive(Debug, Clone, Copy)]
pub struct DeferredEvent {
    pub raw: RawEvent,
    pub since: Instant,
}

/// Everything the correlator tracks for one goroutine
#[derive(Debug, Default)]
pub struct GoroutineState {
    pub events: Vec<ResolvedEvent>,
    pub depth: u32,
    pub pending_args: VecDeque<ArgPayload>,
    pub deferred: VecDeque<DeferredEvent>,
    /// Payloads still in flight for entries that stopped waiting for them
    pub owed_payloads: usize,
    /// Consecutive duplicate-entry corrections
    pub corrections: u32,
}

impl GoroutineState {
    /// Nothing buffered, nothing waiting
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.events.is_empty()
            && self.pending_args.is_empty()
            && self.deferred.is_empty()
            && self.owed_payloads == 0
    }

    /// Whether `raw` repeats the last buffered entry.
    ///
    /// The Go runtime re-executes a function prologue after growing the
    /// goroutine stack, so the probe fires twice for one call. A real
    /// recursive call has the previous frame as its caller; a re-executed
    /// prologue does not.
    #[must_use]
    pub fn is_duplicate_entry(&self, raw: &RawEvent) -> bool {
        self.events.last().is_some_and(|last| {
            last.kind == ProbeKind::Entry
                && last.raw.ip == raw.ip
                && last.raw.frame_base != raw.caller_frame_base
        })
    }

    /// Take the buffered call tree, keeping queued payloads and events
    pub fn take_trace(&mut self) -> Vec<ResolvedEvent> {
        self.depth = 0;
        self.corrections = 0;
        std::mem::take(&mut self.events)
    }

    /// Take the buffered call tree and forget everything queued for it.
    ///
    /// A goroutine id is never reused after `runtime.goexit1`.
    pub fn take_final_trace(&mut self) -> Vec<ResolvedEvent> {
        self.pending_args.clear();
        self.deferred.clear();
        self.owed_payloads = 0;
        self.take_trace()
    }
}

/// Owner of all per-goroutine state
#[derive(Debug, Default)]
pub struct TraceRegistry {
    states: HashMap<GoroutineId, GoroutineState>,
}

impl TraceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&mut self, goid: GoroutineId) -> &mut GoroutineState {
        self.states.entry(goid).or_default()
    }

    #[must_use]
    pub fn get(&self, goid: GoroutineId) -> Option<&GoroutineState> {
        self.states.get(&goid)
    }

    pub fn get_mut(&mut self, goid: GoroutineId) -> Option<&mut GoroutineState> {
        self.states.get_mut(&goid)
    }

    /// Forget `goid` if it holds nothing
    pub fn remove_if_idle(&mut self, goid: GoroutineId) {
        if self.states.get(&goid).is_some_and(GoroutineState::is_idle) {
            self.states.remove(&goid);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GoroutineId, &GoroutineState)> {
        self.states.iter().map(|(goid, state)| (*goid, state))
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (GoroutineId, GoroutineState)> + '_ {
        self.states.drain()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
