//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gofntrace",
    version,
    about = "Trace function calls of a Go executable with eBPF uprobes",
    after_help = "\
EXAMPLES:
    sudo gofntrace ./app -u 'main.*'
        Trace every function of package main
    sudo gofntrace ./app -u 'main.*' 'main.handle(req=(+8(%ax)):u64)'
        Print only call trees rooted at main.handle, with one argument
    sudo gofntrace ./app -u 'main.*' -u 'net/http.*' --drilldown main.serve
        Probe two packages, print traces rooted at main.serve"
)]
pub struct Args {
    /// Go executable to trace (non-PIE, not stripped)
    #[arg(value_name = "BINARY")]
    pub binary: PathBuf,

    /// Functions whose call trees get printed, optionally with argument
    /// declarations: `pkg.Func(name=(addressing-expr):type, ...)`
    #[arg(value_name = "FETCH")]
    pub targets: Vec<String>,

    /// Wildcards selecting every function to probe (repeatable)
    #[arg(short = 'u', long = "uprobe-wildcards", value_name = "PATTERN", required = true)]
    pub uprobe_wildcards: Vec<String>,

    /// Skip functions from vendored packages (default)
    #[arg(short = 'x', long, overrides_with = "include_vendor")]
    pub exclude_vendor: bool,

    /// Probe vendored packages too
    #[arg(long, overrides_with = "exclude_vendor")]
    pub include_vendor: bool,

    /// Only print traces rooted at this function
    #[arg(long, value_name = "FUNC")]
    pub drilldown: Option<String>,

    /// Pre-built eBPF object carrying the uprobe program
    #[arg(long, value_name = "PATH", default_value = "target/bpfel-unknown-none/release/gofntrace")]
    pub bpf_object: PathBuf,

    /// Write the instrumentation plan as JSON
    #[arg(long, value_name = "FILE")]
    pub dump_plan: Option<PathBuf>,

    /// Build the plan and print a summary without touching the kernel
    #[arg(long)]
    pub dry_run: bool,

    /// Do not ask for confirmation before attaching many probes
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// How long an entry waits for its argument payloads
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub arg_timeout_ms: u64,

    /// Fold at most N consecutive duplicate entries into one call
    #[arg(long, value_name = "N")]
    pub max_entry_corrections: Option<u32>,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Debug logging
    #[arg(short, long)]
    pub debug: bool,
}

impl Args {
    /// Whether vendored packages are filtered out; the last of
    /// `-x`/`--include-vendor` wins
    #[must_use]
    pub fn vendor_excluded(&self) -> bool {
        !self.include_vendor
    }
}
