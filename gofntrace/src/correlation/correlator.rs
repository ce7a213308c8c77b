use log::{debug, warn};
use std::time::{Duration, Instant};

use super::registry::{DeferredEvent, TraceRegistry};
use super::{ArgPayload, ClosedTrace, RawEvent, ResolvedEvent};
use crate::domain::{CorrelationError, GoroutineId, PointId};
use crate::plan::{InstrumentationPlan, InstrumentationPoint, ProbeKind};
use crate::symbolization::SymbolResolver;

/// How long an event may wait for its argument payloads by default
pub const DEFAULT_ARG_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Rendered in place of an argument whose value is unknown
const UNKNOWN_VALUE: &str = "?";

#[derive(Debug, Clone, Copy)]
pub struct CorrelatorConfig {
    pub arg_wait_timeout: Duration,
    /// Consecutive duplicate entries folded into one call; `None` = no limit
    pub max_entry_corrections: Option<u32>,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self { arg_wait_timeout: DEFAULT_ARG_WAIT_TIMEOUT, max_entry_corrections: None }
    }
}

/// Counters for the end-of-run summary
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub events: u64,
    pub payloads: u64,
    pub corrections: u64,
    pub dropped: u64,
    /// Entries that stopped waiting for their payloads
    pub timeouts: u64,
    /// Payloads that arrived after their entry stopped waiting
    pub late_payloads: u64,
    pub closed: u64,
}

enum Outcome {
    Handled(Option<ClosedTrace>),
    AwaitingArgs,
}

/// Joins events with payloads and rebuilds per-goroutine call trees
pub struct Correlator<'a, R: SymbolResolver + ?Sized> {
    plan: &'a InstrumentationPlan,
    resolver: &'a R,
    config: CorrelatorConfig,
    registry: TraceRegistry,
    stats: CorrelatorStats,
}

impl<'a, R: SymbolResolver + ?Sized> Correlator<'a, R> {
    pub fn new(plan: &'a InstrumentationPlan, resolver: &'a R, config: CorrelatorConfig) -> Self {
        Self { plan, resolver, config, registry: TraceRegistry::new(), stats: CorrelatorStats::default() }
    }

    #[must_use]
    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Goroutines with buffered or waiting state
    #[must_use]
    pub fn tracked_goroutines(&self) -> usize {
        self.registry.len()
    }

    /// Feed one call/return event
    pub fn on_event(&mut self, raw: RawEvent) -> Vec<ClosedTrace> {
        self.on_event_at(raw, Instant::now())
    }

    /// Feed one call/return event observed at `now`
    pub fn on_event_at(&mut self, raw: RawEvent, now: Instant) -> Vec<ClosedTrace> {
        self.stats.events += 1;
        let goid = raw.goid;

        let state = self.registry.get_or_create(goid);
        if !state.deferred.is_empty() {
            state.deferred.push_back(DeferredEvent { raw, since: now });
            return Vec::new();
        }

        let mut closed = Vec::new();
        match self.process(raw, None) {
            Outcome::Handled(trace) => closed.extend(trace),
            Outcome::AwaitingArgs => {
                debug!("{goid}: waiting for argument payloads");
                self.registry.get_or_create(goid).deferred.push_back(DeferredEvent { raw, since: now });
            }
        }
        self.registry.remove_if_idle(goid);
        closed
    }

    /// Feed one argument payload
    pub fn on_payload(&mut self, payload: ArgPayload) -> Vec<ClosedTrace> {
        self.stats.payloads += 1;
        let goid = payload.goid;

        let state = self.registry.get_or_create(goid);
        if state.owed_payloads > 0 {
            // payloads of one goroutine arrive in call order
            state.owed_payloads -= 1;
            self.stats.late_payloads += 1;
            debug!("{goid}: discarding payload of an entry that stopped waiting");
            self.registry.remove_if_idle(goid);
            return Vec::new();
        }
        state.pending_args.push_back(payload);

        let closed = self.resume(goid);
        self.registry.remove_if_idle(goid);
        closed
    }

    /// Stop waiting for payloads that are overdue.
    ///
    /// The oldest deferred entry of each stale goroutine is recorded with
    /// the arguments that did arrive and `?` for the rest; the payloads it
    /// still owes are discarded when they show up.
    pub fn expire_stale(&mut self, now: Instant) -> Vec<ClosedTrace> {
        let timeout = self.config.arg_wait_timeout;
        let mut stale: Vec<GoroutineId> = self
            .registry
            .iter()
            .filter(|(_, state)| {
                state
                    .deferred
                    .front()
                    .is_some_and(|d| now.saturating_duration_since(d.since) >= timeout)
            })
            .map(|(goid, _)| goid)
            .collect();
        stale.sort_unstable();

        let mut closed = Vec::new();
        for goid in stale {
            let Some(expired) = self.registry.get_mut(goid).and_then(|s| s.deferred.pop_front()) else {
                continue;
            };
            let waited = now.saturating_duration_since(expired.since);
            if let Outcome::Handled(trace) = self.process(expired.raw, Some(waited)) {
                closed.extend(trace);
            }
            closed.extend(self.resume(goid));
            self.registry.remove_if_idle(goid);
        }
        closed
    }

    /// Close every goroutine that still has open calls.
    ///
    /// Used at the end of a run; the registry is left empty.
    pub fn flush_all(&mut self) -> Vec<ClosedTrace> {
        let mut closed: Vec<ClosedTrace> = self
            .registry
            .drain()
            .filter_map(|(goid, state)| {
                if !state.deferred.is_empty() {
                    debug!("{goid}: discarding {} events still waiting for arguments", state.deferred.len());
                }
                (!state.events.is_empty()).then_some(ClosedTrace {
                    goid,
                    events: state.events,
                    partial: true,
                    exited: false,
                })
            })
            .collect();
        closed.sort_by_key(|trace| trace.goid);
        self.stats.closed += closed.len() as u64;
        closed
    }

    /// Retry deferred events of `goid` in order until one still lacks payloads
    fn resume(&mut self, goid: GoroutineId) -> Vec<ClosedTrace> {
        let mut closed = Vec::new();
        while let Some(deferred) = self.registry.get_mut(goid).and_then(|s| s.deferred.pop_front()) {
            match self.process(deferred.raw, None) {
                Outcome::Handled(trace) => closed.extend(trace),
                Outcome::AwaitingArgs => {
                    self.registry.get_or_create(goid).deferred.push_front(deferred);
                    break;
                }
            }
        }
        closed
    }

    /// `gave_up_after` is set once the event has waited out the argument timeout
    fn process(&mut self, raw: RawEvent, gave_up_after: Option<Duration>) -> Outcome {
        let (point_id, point) = match lookup_point(self.plan, self.resolver, &raw) {
            Ok(found) => found,
            Err(e) => {
                warn!("{e}");
                self.stats.dropped += 1;
                return Outcome::Handled(None);
            }
        };

        match point.kind {
            ProbeKind::ThreadExit => self.exit(raw.goid),
            ProbeKind::Entry => self.enter(raw, point_id, point, gave_up_after),
            ProbeKind::Return if self.registry.get_or_create(raw.goid).events.is_empty() => {
                debug!("{}: ignoring return of {} outside a traced call", raw.goid, point.function_name);
                Outcome::Handled(None)
            }
            ProbeKind::Return => self.leave(raw, point_id, point),
        }
    }

    fn exit(&mut self, goid: GoroutineId) -> Outcome {
        let events = self.registry.get_or_create(goid).take_final_trace();
        if events.is_empty() {
            debug!("{goid} exited outside a traced call");
            return Outcome::Handled(None);
        }
        debug!("{goid} exited with {} open events", events.len());
        self.stats.closed += 1;
        Outcome::Handled(Some(ClosedTrace { goid, events, partial: true, exited: true }))
    }

    fn enter(
        &mut self,
        raw: RawEvent,
        point_id: PointId,
        point: &InstrumentationPoint,
        gave_up_after: Option<Duration>,
    ) -> Outcome {
        let needed = point.argument_specs.len();
        let max_corrections = self.config.max_entry_corrections;
        let resolver = self.resolver;

        let state = self.registry.get_or_create(raw.goid);
        let available = state.pending_args.len().min(needed);
        if available < needed {
            let Some(waited) = gave_up_after else {
                return Outcome::AwaitingArgs;
            };
            let missing = needed - available;
            warn!(
                "{}",
                CorrelationError::ArgumentTimeout { goid: raw.goid, missing, waited_ms: waited.as_millis() }
            );
            state.owed_payloads += missing;
            self.stats.timeouts += 1;
        }
        let payloads: Vec<ArgPayload> = state.pending_args.drain(..available).collect();

        if state.is_duplicate_entry(&raw) && max_corrections.map_or(true, |max| state.corrections < max) {
            if let Some(last) = state.events.last_mut() {
                last.raw = raw;
            }
            state.corrections += 1;
            self.stats.corrections += 1;
            debug!("{}: folded duplicate entry of {}", raw.goid, point.function_name);
            return Outcome::Handled(None);
        }

        let arguments = match format_arguments(resolver, raw.goid, point_id, point, &payloads) {
            Ok(arguments) => arguments,
            Err(e) => {
                // the call is still recorded so its return stays balanced
                warn!("{e}");
                self.stats.dropped += 1;
                unknown_arguments(point)
            }
        };

        state.depth += 1;
        state.corrections = 0;
        state.events.push(ResolvedEvent {
            raw,
            point_id,
            function_name: point.function_name.clone(),
            kind: ProbeKind::Entry,
            arguments,
        });
        Outcome::Handled(None)
    }

    fn leave(&mut self, raw: RawEvent, point_id: PointId, point: &InstrumentationPoint) -> Outcome {
        let state = self.registry.get_or_create(raw.goid);

        // buffered events always include an open entry
        state.depth -= 1;
        state.corrections = 0;
        state.events.push(ResolvedEvent {
            raw,
            point_id,
            function_name: point.function_name.clone(),
            kind: ProbeKind::Return,
            arguments: String::new(),
        });

        if state.depth > 0 {
            return Outcome::Handled(None);
        }
        let events = state.take_trace();
        self.stats.closed += 1;
        Outcome::Handled(Some(ClosedTrace { goid: raw.goid, events, partial: false, exited: false }))
    }
}

/// Map an event's instruction pointer to the plan point that fired
fn lookup_point<'p, R: SymbolResolver + ?Sized>(
    plan: &'p InstrumentationPlan,
    resolver: &R,
    raw: &RawEvent,
) -> Result<(PointId, &'p InstrumentationPoint), CorrelationError> {
    let unknown = || CorrelationError::UnknownProbe { goid: raw.goid, ip: raw.ip };
    let resolved = resolver.resolve_address(raw.ip).map_err(|_| unknown())?;
    resolved
        .symbols
        .iter()
        .find_map(|symbol| plan.lookup(symbol, resolved.offset))
        .ok_or_else(unknown)
}

/// Decode payloads into `name=value, name=value`.
///
/// Arguments without a payload render as `name=?`.
fn format_arguments<R: SymbolResolver + ?Sized>(
    resolver: &R,
    goid: GoroutineId,
    point_id: PointId,
    point: &InstrumentationPoint,
    payloads: &[ArgPayload],
) -> Result<String, CorrelationError> {
    let mut rendered = Vec::with_capacity(point.argument_specs.len());
    for (index, spec) in point.argument_specs.iter().enumerate() {
        let Some(payload) = payloads.get(index) else {
            rendered.push(format!("{}={UNKNOWN_VALUE}", spec.name));
            continue;
        };

        let index = u8::try_from(index).unwrap_or(u8::MAX);
        if let Some(tag) = payload.tag {
            if tag.point_id != point_id || tag.arg_index != index {
                return Err(CorrelationError::PayloadMismatch {
                    goid,
                    expected_point: point_id,
                    expected_index: index,
                    got_point: tag.point_id,
                    got_index: tag.arg_index,
                });
            }
        }

        let value = match spec.evaluate(&payload.data) {
            Ok(value) if spec.is_call_target() => call_target(resolver, &value).unwrap_or(value),
            Ok(value) => value,
            Err(e) => {
                warn!("{goid}: {}", CorrelationError::Decode(e));
                UNKNOWN_VALUE.to_string()
            }
        };
        rendered.push(format!("{}={value}", spec.name));
    }
    Ok(rendered.join(", "))
}

/// Every argument of `point` as `name=?`
fn unknown_arguments(point: &InstrumentationPoint) -> String {
    point
        .argument_specs
        .iter()
        .map(|spec| format!("{}={UNKNOWN_VALUE}", spec.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Symbol name for a code address that is exactly a function start
fn call_target<R: SymbolResolver + ?Sized>(resolver: &R, value: &str) -> Option<String> {
    let address: u64 = value.parse().ok()?;
    let resolved = resolver.resolve_address(address).ok()?;
    (resolved.offset == 0).then(|| resolved.primary().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::PayloadTag;
    use crate::domain::SymbolError;
    use crate::fetcharg::ArgumentFetchSpec;
    use crate::symbolization::{FunctionEntry, FunctionSymbol, ResolvedAddress, SourceLine};

    const F: u64 = 0x1000;
    const G: u64 = 0x2000;
    const EXIT: u64 = 0x3000;

    struct FixedResolver {
        symbols: Vec<FunctionSymbol>,
    }

    impl FixedResolver {
        fn new() -> Self {
            let symbol = |name: &str, address| FunctionSymbol { name: name.to_string(), address, size: 0x100 };
            Self { symbols: vec![symbol("main.f", F), symbol("main.g", G), symbol("runtime.goexit1", EXIT)] }
        }
    }

    impl SymbolResolver for FixedResolver {
        fn function_symbols(&self) -> &[FunctionSymbol] {
            &self.symbols
        }

        fn resolve_address(&self, pc: u64) -> Result<ResolvedAddress, SymbolError> {
            self.symbols
                .iter()
                .find(|s| pc >= s.address && pc < s.address + s.size)
                .map(|s| ResolvedAddress { symbols: vec![s.name.clone()], offset: pc - s.address })
                .ok_or(SymbolError::AddressNotMapped(pc))
        }

        fn function_entry(&self, name: &str) -> Result<FunctionEntry, SymbolError> {
            Err(SymbolError::NotFound(name.to_string()))
        }

        fn function_pc_range(&self, name: &str) -> Result<(u64, u64), SymbolError> {
            Err(SymbolError::NotFound(name.to_string()))
        }

        fn function_return_offsets(&self, name: &str) -> Result<Vec<u64>, SymbolError> {
            Err(SymbolError::NotFound(name.to_string()))
        }

        fn line_info(&self, _pc: u64) -> Option<SourceLine> {
            None
        }

        fn thread_local_g_offset(&self) -> Result<i64, SymbolError> {
            Ok(-8)
        }

        fn goroutine_id_field_offset(&self) -> Result<i64, SymbolError> {
            Ok(152)
        }
    }

    fn point(name: &str, kind: ProbeKind, address: u64, offset: u64) -> InstrumentationPoint {
        InstrumentationPoint {
            function_name: name.to_string(),
            kind,
            absolute_address: address,
            file_offset: address + offset,
            offset_from_entry: offset,
            argument_specs: Vec::new(),
            is_selected: true,
        }
    }

    /// f takes two arguments, g none
    fn plan() -> InstrumentationPlan {
        let mut f_entry = point("main.f", ProbeKind::Entry, F, 0);
        f_entry.argument_specs = vec![
            ArgumentFetchSpec::parse("a", "%ax:u32").unwrap(),
            ArgumentFetchSpec::parse("b", "%bx:s32").unwrap(),
        ];
        InstrumentationPlan::new(vec![
            f_entry,
            point("main.f", ProbeKind::Return, F, 0x40),
            point("main.g", ProbeKind::Entry, G, 0),
            point("main.g", ProbeKind::Return, G, 0x10),
            point("runtime.goexit1", ProbeKind::ThreadExit, EXIT, 0),
        ])
    }

    fn event(goid: u64, ip: u64, kind: ProbeKind) -> RawEvent {
        RawEvent {
            goid: GoroutineId(goid),
            ip,
            caller_ip: 0,
            frame_base: 0xc000,
            caller_frame_base: 0xd000,
            kind,
            time_ns: 0,
        }
    }

    fn payload(goid: u64, value: i32) -> ArgPayload {
        ArgPayload { goid: GoroutineId(goid), tag: None, data: value.to_le_bytes().to_vec() }
    }

    #[test]
    fn test_nested_calls_close_once() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        assert!(correlator.on_payload(payload(1, 1)).is_empty());
        assert!(correlator.on_payload(payload(1, -2)).is_empty());

        let mut depths = Vec::new();
        let mut closed = Vec::new();
        for (ip, kind) in [
            (F, ProbeKind::Entry),
            (G, ProbeKind::Entry),
            (G + 0x10, ProbeKind::Return),
            (F + 0x40, ProbeKind::Return),
        ] {
            closed.extend(correlator.on_event(event(1, ip, kind)));
            depths.push(correlator.registry.get(GoroutineId(1)).map_or(0, |s| s.depth));
        }

        assert_eq!(depths, vec![1, 2, 1, 0]);
        assert_eq!(closed.len(), 1);
        let trace = &closed[0];
        assert!(!trace.partial);
        assert_eq!(trace.events.len(), 4);
        assert_eq!(trace.events[0].arguments, "a=1, b=-2");
        assert_eq!(trace.root_function(), Some("main.f"));
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_return_without_entry_is_ignored() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        assert!(correlator.on_event(event(1, G + 0x10, ProbeKind::Return)).is_empty());
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_unknown_probe_is_dropped() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        assert!(correlator.on_event(event(1, G + 0x08, ProbeKind::Return)).is_empty());
        assert!(correlator.on_event(event(1, 0x9000, ProbeKind::Entry)).is_empty());
        assert_eq!(correlator.stats().dropped, 2);
    }

    #[test]
    fn test_duplicate_entry_is_folded() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());
        for value in [1, 2, 3, 4] {
            correlator.on_payload(payload(1, value));
        }

        correlator.on_event(event(1, F, ProbeKind::Entry));
        let mut duplicate = event(1, F, ProbeKind::Entry);
        duplicate.frame_base = 0xb000;
        duplicate.caller_frame_base = 0xe000;
        duplicate.time_ns = 7;
        correlator.on_event(duplicate);

        let state = correlator.registry.get(GoroutineId(1)).unwrap();
        assert_eq!(state.depth, 1);
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].raw.time_ns, 7);
        assert_eq!(state.events[0].arguments, "a=1, b=2");
        assert!(state.pending_args.is_empty());
        assert_eq!(correlator.stats().corrections, 1);
    }

    #[test]
    fn test_recursive_entry_is_not_folded() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        correlator.on_event(event(1, G, ProbeKind::Entry));
        let mut nested = event(1, G, ProbeKind::Entry);
        nested.caller_frame_base = 0xc000;
        correlator.on_event(nested);

        assert_eq!(correlator.registry.get(GoroutineId(1)).unwrap().depth, 2);
    }

    #[test]
    fn test_correction_limit() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let config = CorrelatorConfig { max_entry_corrections: Some(1), ..CorrelatorConfig::default() };
        let mut correlator = Correlator::new(&plan, &resolver, config);

        for _ in 0..3 {
            correlator.on_event(event(1, G, ProbeKind::Entry));
        }
        // first repeat folded, second becomes a call of its own
        assert_eq!(correlator.registry.get(GoroutineId(1)).unwrap().depth, 2);
    }

    #[test]
    fn test_event_waits_for_late_payloads() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        correlator.on_event(event(1, F, ProbeKind::Entry));
        correlator.on_event(event(1, F + 0x40, ProbeKind::Return));
        // another goroutine is not blocked
        correlator.on_event(event(2, G, ProbeKind::Entry));
        assert_eq!(correlator.on_event(event(2, G + 0x10, ProbeKind::Return)).len(), 1);

        assert!(correlator.on_payload(payload(1, 5)).is_empty());
        let closed = correlator.on_payload(payload(1, 6));
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].events[0].arguments, "a=5, b=6");
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_deferred_event_times_out_with_placeholders() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());
        let start = Instant::now();

        correlator.on_event_at(event(1, F, ProbeKind::Entry), start);
        correlator.on_payload(payload(1, 5));

        assert!(correlator.expire_stale(start + Duration::from_millis(10)).is_empty());
        assert_eq!(correlator.registry.get(GoroutineId(1)).unwrap().depth, 0);

        correlator.expire_stale(start + Duration::from_secs(2));
        let state = correlator.registry.get(GoroutineId(1)).unwrap();
        assert_eq!(state.depth, 1);
        assert_eq!(state.events[0].arguments, "a=5, b=?");
        assert_eq!(state.owed_payloads, 1);
        assert_eq!(correlator.stats().timeouts, 1);
        assert_eq!(correlator.stats().dropped, 0);
    }

    #[test]
    fn test_owed_payload_is_discarded() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());
        let start = Instant::now();

        correlator.on_event_at(event(1, F, ProbeKind::Entry), start);
        correlator.expire_stale(start + Duration::from_secs(2));
        assert_eq!(correlator.on_event(event(1, F + 0x40, ProbeKind::Return)).len(), 1);
        assert_eq!(correlator.tracked_goroutines(), 1);

        correlator.on_payload(payload(1, 1));
        correlator.on_payload(payload(1, 2));
        assert_eq!(correlator.stats().late_payloads, 2);
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_payload_tag_mismatch_keeps_entry() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        let mut first = payload(1, 1);
        first.tag = Some(PayloadTag { point_id: PointId(0), arg_index: 0 });
        let mut second = payload(1, 2);
        second.tag = Some(PayloadTag { point_id: PointId(2), arg_index: 0 });
        correlator.on_payload(first);
        correlator.on_payload(second);

        correlator.on_event(event(1, F, ProbeKind::Entry));
        assert_eq!(correlator.stats().dropped, 1);
        let state = correlator.registry.get(GoroutineId(1)).unwrap();
        assert_eq!(state.events[0].arguments, "a=?, b=?");
        assert!(state.pending_args.is_empty());

        let closed = correlator.on_event(event(1, F + 0x40, ProbeKind::Return));
        assert_eq!(closed.len(), 1);
        assert!(!closed[0].partial);
    }

    #[test]
    fn test_goroutine_exit_closes_partial_trace() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        correlator.on_event(event(3, G, ProbeKind::Entry));
        let closed = correlator.on_event(event(3, EXIT, ProbeKind::ThreadExit));
        assert_eq!(closed.len(), 1);
        assert!(closed[0].partial && closed[0].exited);
        assert_eq!(closed[0].events.len(), 1);

        // exit of an idle goroutine
        assert!(correlator.on_event(event(4, EXIT, ProbeKind::ThreadExit)).is_empty());
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_goroutine_exit_frees_queued_payloads() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        correlator.on_payload(payload(6, 1));
        assert_eq!(correlator.tracked_goroutines(), 1);
        assert!(correlator.on_event(event(6, EXIT, ProbeKind::ThreadExit)).is_empty());
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_flush_all_returns_open_goroutines() {
        let (plan, resolver) = (plan(), FixedResolver::new());
        let mut correlator = Correlator::new(&plan, &resolver, CorrelatorConfig::default());

        correlator.on_event(event(9, G, ProbeKind::Entry));
        correlator.on_event(event(5, G, ProbeKind::Entry));
        let closed = correlator.flush_all();

        let goids: Vec<GoroutineId> = closed.iter().map(|t| t.goid).collect();
        assert_eq!(goids, vec![GoroutineId(5), GoroutineId(9)]);
        assert!(closed.iter().all(|t| t.partial && !t.exited));
        assert_eq!(correlator.tracked_goroutines(), 0);
    }

    #[test]
    fn test_call_target_rendering() {
        let resolver = FixedResolver::new();
        assert_eq!(call_target(&resolver, &G.to_string()).as_deref(), Some("main.g"));
        assert_eq!(call_target(&resolver, &(G + 4).to_string()), None);
        assert_eq!(call_target(&resolver, "-1"), None);
    }
}
