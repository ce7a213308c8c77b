//! # Trace Rendering
//!
//! Turns a [`ClosedTrace`] into the indented call tree printed on stdout:
//!
//! ```text
//!
//! 14 22:13:20.0001           main.f(a=1, b=2) { main.main+41 /app/main.go:12
//! 14 22:13:20.0002             main.g() { main.f+28 /app/main.go:20
//! 14 22:13:20.0003 000.0001    } main.g+16 /app/main.go:31
//! 14 22:13:20.0004 000.0003  } main.f+64 /app/main.go:22
//! ```
//!
//! Entry lines show the caller (`symbol+offset`) and the call site; return
//! lines show the elapsed seconds and the returning instruction.

pub mod clock;

pub use clock::BootClock;

use std::fmt::Write as _;

use crate::correlation::{ClosedTrace, ResolvedEvent};
use crate::plan::ProbeKind;
use crate::symbolization::SymbolResolver;

/// Fills the elapsed-time column on entry lines
const PLACEHOLDER: &str = "        ";
const INDENT_STEP: &str = "  ";
const UNKNOWN_LINE: &str = "?:?";

#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    /// Only print traces rooted at this function
    pub drilldown: Option<String>,
}

pub struct TraceRenderer<'a, R: SymbolResolver + ?Sized> {
    resolver: &'a R,
    clock: BootClock,
    config: RenderConfig,
}

impl<'a, R: SymbolResolver + ?Sized> TraceRenderer<'a, R> {
    pub fn new(resolver: &'a R, clock: BootClock, config: RenderConfig) -> Self {
        Self { resolver, clock, config }
    }

    /// Render a trace, or `None` when it is filtered out or empty
    #[must_use]
    pub fn render(&self, trace: &ClosedTrace) -> Option<String> {
        let root = trace.root_function()?;
        if self.config.drilldown.as_deref().is_some_and(|target| target != root) {
            return None;
        }

        let mut out = String::from("\n");
        let mut indent = String::new();
        let mut started: Vec<u64> = Vec::new();

        for event in &trace.events {
            let time = self.clock.format(event.raw.time_ns);
            match event.kind {
                ProbeKind::Entry => {
                    started.push(event.raw.time_ns);
                    let _ = writeln!(
                        out,
                        "{time} {PLACEHOLDER} {indent} {}({}) {{ {} {}",
                        event.function_name,
                        event.arguments,
                        self.caller(event),
                        self.line(event.raw.caller_ip),
                    );
                    indent.push_str(INDENT_STEP);
                }
                ProbeKind::Return => {
                    let Some(start) = started.pop() else { continue };
                    indent.truncate(indent.len().saturating_sub(INDENT_STEP.len()));
                    let _ = writeln!(
                        out,
                        "{time} {:08.4} {indent} }} {} {}",
                        elapsed_secs(start, event.raw.time_ns),
                        self.location(event.raw.ip),
                        self.line(event.raw.ip),
                    );
                }
                ProbeKind::ThreadExit => {}
            }
        }

        if trace.exited {
            let _ = writeln!(out, "... {} exited", trace.goid);
        } else if trace.partial {
            let _ = writeln!(out, "... trace truncated");
        }
        Some(out)
    }

    fn caller(&self, event: &ResolvedEvent) -> String {
        if event.raw.caller_ip == 0 {
            return String::new();
        }
        self.location(event.raw.caller_ip)
    }

    fn location(&self, pc: u64) -> String {
        match self.resolver.resolve_address(pc) {
            Ok(resolved) => format!("{}+{}", resolved.primary(), resolved.offset),
            Err(_) => format!("0x{pc:x}"),
        }
    }

    fn line(&self, pc: u64) -> String {
        self.resolver
            .line_info(pc)
            .map_or_else(|| UNKNOWN_LINE.to_string(), |line| format!("{}:{}", line.file, line.line))
    }
}

#[allow(clippy::cast_precision_loss)]
fn elapsed_secs(start_ns: u64, end_ns: u64) -> f64 {
    end_ns.saturating_sub(start_ns) as f64 / 1e9
}
