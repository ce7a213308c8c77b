//! Turns wildcards, explicit targets and fetch declarations into an
//! [`InstrumentationPlan`]

use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use super::{InstrumentationPlan, InstrumentationPoint, ProbeKind, WildcardPattern};
use crate::domain::{PlanError, SymbolError};
use crate::fetcharg::ArgumentFetchSpec;
use crate::symbolization::SymbolResolver;

/// Called by the runtime when a goroutine finishes
pub const GOROUTINE_EXIT_FUNC: &str = "runtime.goexit1";

/// Path fragment identifying vendored dependencies
pub const VENDOR_MARKER: &str = "/vendor/";

/// What the user asked to trace
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Patterns selecting every function to probe
    pub wildcard_patterns: Vec<String>,
    /// Functions whose call trees get printed; empty means all
    pub explicit_names: Vec<String>,
    /// `(name, statement)` declarations per function
    pub fetch_statements_by_name: HashMap<String, Vec<(String, String)>>,
    pub exclude_vendor: bool,
}

/// Build the instrumentation plan for `request`.
///
/// # Errors
/// - [`PlanError::FetchArg`] for a malformed fetch statement, before any
///   symbol is looked at
/// - [`PlanError::SymbolNotFound`] when an explicit, non-glob name cannot
///   be resolved
/// - [`PlanError::NoMatch`] when no function matches any pattern
/// - [`PlanError::GoroutineExitMissing`] when `runtime.goexit1` cannot be
///   resolved
pub fn build<R: SymbolResolver + ?Sized>(
    resolver: &R,
    request: &PlanRequest,
) -> Result<InstrumentationPlan, PlanError> {
    let mut fetch_specs = parse_fetch_specs(request)?;

    let wildcards: Vec<WildcardPattern> =
        request.wildcard_patterns.iter().map(|p| WildcardPattern::new(p)).collect();
    let explicit: Vec<WildcardPattern> =
        request.explicit_names.iter().map(|p| WildcardPattern::new(p)).collect();

    let symbols = resolver.function_symbols();
    for pattern in explicit.iter().filter(|p| !p.is_glob()) {
        if !symbols.iter().any(|s| s.name == pattern.as_str()) {
            return Err(PlanError::SymbolNotFound {
                name: pattern.as_str().to_string(),
                source: SymbolError::NotFound(pattern.as_str().to_string()),
            });
        }
    }

    let is_exact_target = |name: &str| explicit.iter().any(|p| !p.is_glob() && p.as_str() == name);

    let mut seen = HashSet::new();
    let mut candidates = 0usize;
    let mut points = Vec::new();

    for symbol in symbols {
        let name = symbol.name.as_str();
        if name == GOROUTINE_EXIT_FUNC || seen.contains(name) {
            continue;
        }
        if request.exclude_vendor && name.contains(VENDOR_MARKER) {
            continue;
        }
        let explicitly_matched = explicit.iter().any(|p| p.matches(name));
        if !explicitly_matched && !wildcards.iter().any(|p| p.matches(name)) {
            continue;
        }
        seen.insert(name);
        candidates += 1;

        let is_selected = explicit.is_empty() || explicitly_matched;

        let entry = match resolver.function_entry(name) {
            Ok(entry) => entry,
            Err(source) if is_exact_target(name) => {
                return Err(PlanError::SymbolNotFound { name: name.to_string(), source });
            }
            Err(e) => {
                warn!("skipping {name}: {e}");
                continue;
            }
        };

        let return_offsets = match resolver.function_return_offsets(name) {
            Ok(offsets) if !offsets.is_empty() => offsets,
            Ok(_) => {
                warn!("skipping {name}: no return instruction found");
                continue;
            }
            Err(e) => {
                warn!("skipping {name}: {e}");
                continue;
            }
        };

        let Some(relative) = return_offsets
            .iter()
            .map(|&ret| ret.checked_sub(entry.file_offset))
            .collect::<Option<Vec<u64>>>()
        else {
            warn!("skipping {name}: return site before function entry");
            continue;
        };

        debug!(
            "{name}{} entry 0x{:x} returns {:x?}",
            if is_selected { "*" } else { "" },
            entry.file_offset,
            relative
        );

        let argument_specs = fetch_specs.remove(name).unwrap_or_default();
        points.push(InstrumentationPoint {
            function_name: name.to_string(),
            kind: ProbeKind::Entry,
            absolute_address: entry.address,
            file_offset: entry.file_offset,
            offset_from_entry: 0,
            argument_specs,
            is_selected,
        });
        for (offset, file_offset) in relative.into_iter().zip(return_offsets) {
            points.push(InstrumentationPoint {
                function_name: name.to_string(),
                kind: ProbeKind::Return,
                absolute_address: entry.address,
                file_offset,
                offset_from_entry: offset,
                argument_specs: Vec::new(),
                is_selected,
            });
        }
    }

    if candidates == 0 {
        let mut patterns = request.wildcard_patterns.clone();
        patterns.extend(request.explicit_names.iter().cloned());
        return Err(PlanError::NoMatch(patterns.join(", ")));
    }

    for name in fetch_specs.keys() {
        warn!("arguments declared for {name}, which is not traced");
    }

    let exit = resolver
        .function_entry(GOROUTINE_EXIT_FUNC)
        .map_err(|source| PlanError::GoroutineExitMissing {
            name: GOROUTINE_EXIT_FUNC.to_string(),
            source,
        })?;
    points.push(InstrumentationPoint {
        function_name: GOROUTINE_EXIT_FUNC.to_string(),
        kind: ProbeKind::ThreadExit,
        absolute_address: exit.address,
        file_offset: exit.file_offset,
        offset_from_entry: 0,
        argument_specs: Vec::new(),
        is_selected: false,
    });

    Ok(InstrumentationPlan::new(points))
}

fn parse_fetch_specs(
    request: &PlanRequest,
) -> Result<HashMap<String, Vec<ArgumentFetchSpec>>, PlanError> {
    request
        .fetch_statements_by_name
        .iter()
        .map(|(function, declarations)| {
            let specs = declarations
                .iter()
                .map(|(name, statement)| ArgumentFetchSpec::parse(name, statement))
                .collect::<Result<Vec<_>, _>>()?;
            Ok((function.clone(), specs))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbolization::{FunctionEntry, FunctionSymbol, ResolvedAddress, SourceLine};

    /// Functions laid out 0x100 apart; file offsets are address - 0x40_0000
    struct TableResolver {
        symbols: Vec<FunctionSymbol>,
        returns: HashMap<String, Vec<u64>>,
    }

    impl TableResolver {
        fn new(functions: &[(&str, &[u64])]) -> Self {
            let mut symbols = Vec::new();
            let mut returns = HashMap::new();
            for (idx, (name, rets)) in functions.iter().enumerate() {
                let address = 0x40_1000 + 0x100 * idx as u64;
                symbols.push(FunctionSymbol { name: (*name).to_string(), address, size: 0x100 });
                returns.insert(
                    (*name).to_string(),
                    rets.iter().map(|r| address - 0x40_0000 + r).collect(),
                );
            }
            Self { symbols, returns }
        }
    }

    impl SymbolResolver for TableResolver {
        fn function_symbols(&self) -> &[FunctionSymbol] {
            &self.symbols
        }

        fn resolve_address(&self, pc: u64) -> Result<ResolvedAddress, SymbolError> {
            Err(SymbolError::AddressNotMapped(pc))
        }

        fn function_entry(&self, name: &str) -> Result<FunctionEntry, SymbolError> {
            let symbol = self
                .symbols
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| SymbolError::NotFound(name.to_string()))?;
            Ok(FunctionEntry { address: symbol.address, file_offset: symbol.address - 0x40_0000 })
        }

        fn function_pc_range(&self, name: &str) -> Result<(u64, u64), SymbolError> {
            let entry = self.function_entry(name)?;
            Ok((entry.address, entry.address + 0x100))
        }

        fn function_return_offsets(&self, name: &str) -> Result<Vec<u64>, SymbolError> {
            self.returns.get(name).cloned().ok_or_else(|| SymbolError::NotFound(name.to_string()))
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

    fn resolver() -> TableResolver {
        TableResolver::new(&[
            ("main.add", &[0x20]),
            ("main.add1", &[0x10, 0x30]),
            ("main.minus", &[0x18]),
            ("main.noret", &[]),
            ("example.com/app/vendor/lib.Do", &[0x8]),
            (GOROUTINE_EXIT_FUNC, &[0x40]),
        ])
    }

    fn request(wildcards: &[&str]) -> PlanRequest {
        PlanRequest {
            wildcard_patterns: wildcards.iter().map(ToString::to_string).collect(),
            exclude_vendor: true,
            ..PlanRequest::default()
        }
    }

    #[test]
    fn test_entry_and_return_points() {
        let plan = build(&resolver(), &request(&["main.add*"])).unwrap();
        let summary: Vec<(&str, ProbeKind, u64)> = plan
            .points()
            .iter()
            .map(|p| (p.function_name.as_str(), p.kind, p.offset_from_entry))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("main.add", ProbeKind::Entry, 0),
                ("main.add", ProbeKind::Return, 0x20),
                ("main.add1", ProbeKind::Entry, 0),
                ("main.add1", ProbeKind::Return, 0x10),
                ("main.add1", ProbeKind::Return, 0x30),
                (GOROUTINE_EXIT_FUNC, ProbeKind::ThreadExit, 0),
            ]
        );
        assert!(plan.points().iter().take(5).all(|p| p.is_selected));
    }

    #[test]
    fn test_return_point_addresses() {
        let plan = build(&resolver(), &request(&["main.add"])).unwrap();
        let (_, ret) = plan.lookup("main.add", 0x20).unwrap();
        assert_eq!(ret.absolute_address, 0x40_1000);
        assert_eq!(ret.probe_address(), 0x40_1020);
        assert_eq!(ret.file_offset, 0x1020);
    }

    #[test]
    fn test_explicit_names_select() {
        let mut req = request(&["main.*"]);
        req.explicit_names = vec!["main.add".to_string()];
        let plan = build(&resolver(), &req).unwrap();

        let selected: Vec<&str> = plan
            .points()
            .iter()
            .filter(|p| p.kind == ProbeKind::Entry && p.is_selected)
            .map(|p| p.function_name.as_str())
            .collect();
        assert_eq!(selected, vec!["main.add"]);
        assert!(plan.lookup("main.minus", 0).is_some());
    }

    #[test]
    fn test_zero_return_sites_drop_function() {
        let plan = build(&resolver(), &request(&["main.*"])).unwrap();
        assert!(plan.lookup("main.noret", 0).is_none());
        assert_eq!(plan.function_count(), 3);
    }

    #[test]
    fn test_vendor_exclusion() {
        let plan = build(&resolver(), &request(&["*.Do"])).unwrap_err();
        assert!(matches!(plan, PlanError::NoMatch(_)));

        let mut req = request(&["*.Do"]);
        req.exclude_vendor = false;
        let plan = build(&resolver(), &req).unwrap();
        assert!(plan.lookup("example.com/app/vendor/lib.Do", 0).is_some());
    }

    #[test]
    fn test_goroutine_exit_is_not_a_candidate() {
        let plan = build(&resolver(), &request(&["*"])).unwrap();
        let exits: Vec<_> =
            plan.points().iter().filter(|p| p.function_name == GOROUTINE_EXIT_FUNC).collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].kind, ProbeKind::ThreadExit);
    }

    #[test]
    fn test_unknown_explicit_name() {
        let mut req = request(&["main.*"]);
        req.explicit_names = vec!["main.nothere".to_string()];
        assert!(matches!(
            build(&resolver(), &req),
            Err(PlanError::SymbolNotFound { name, .. }) if name == "main.nothere"
        ));
    }

    #[test]
    fn test_bad_fetch_statement_fails_first() {
        let mut req = request(&["does.not.exist"]);
        req.fetch_statements_by_name.insert(
            "main.add".to_string(),
            vec![("x".to_string(), "(+16(%ax):u64".to_string())],
        );
        assert!(matches!(build(&resolver(), &req), Err(PlanError::FetchArg(_))));
    }

    #[test]
    fn test_fetch_specs_attach_to_entry() {
        let mut req = request(&["main.add"]);
        req.explicit_names = vec!["main.add".to_string()];
        req.fetch_statements_by_name.insert(
            "main.add".to_string(),
            vec![
                ("x".to_string(), "(+16(%ax)):u64".to_string()),
                ("y".to_string(), "%bx:s64".to_string()),
            ],
        );
        let plan = build(&resolver(), &req).unwrap();

        let (_, entry) = plan.lookup("main.add", 0).unwrap();
        let names: Vec<&str> = entry.argument_specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);
        let (_, ret) = plan.lookup("main.add", 0x20).unwrap();
        assert!(ret.argument_specs.is_empty());
    }

    #[test]
    fn test_missing_goroutine_exit() {
        let resolver = TableResolver::new(&[("main.add", &[0x20])]);
        assert!(matches!(
            build(&resolver, &request(&["main.add"])),
            Err(PlanError::GoroutineExitMissing { .. })
        ));
    }
}
