//! # gofntrace - eBPF Function Graph Tracer for Go
//!
//! gofntrace attaches uprobes to the entry and every `ret` instruction of
//! selected functions in a Go executable, then rebuilds per-goroutine call
//! trees from the resulting event stream, optionally with decoded argument
//! values.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Traced Go Executable                       │
//! │          (goroutines calling probed functions)                  │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ uprobe hits (entry / ret / goexit1)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  eBPF Uprobe Program (Kernel)                   │
//! │  • reads goid via TLS → runtime.g → goid                        │
//! │  • EVENTS ring buffer: GoEvent per hit                          │
//! │  • ARGS ring buffer: ArgData per captured argument              │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ two independent ring buffers
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    gofntrace (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Probing    │──▶│ Correlation  │──▶│    Render    │──▶ stdout│
//! │  │  (aya, rings)│   │ (per goid)   │   │ (call tree)  │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! │         ▲                   │                  │                │
//! │         │                   ▼                  ▼                │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │     Plan     │◀──│ Symbolization│   │   Fetcharg   │         │
//! │  │ (probe list) │   │ (ELF, DWARF) │   │ (arg decode) │         │
//! │  └──────────────┘   └──────────────┘   └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Pipeline Modules
//!
//! - [`plan`]: expand wildcards and targets into an [`plan::InstrumentationPlan`]
//! - [`fetcharg`]: parse argument addressing expressions, decode captured bytes
//! - [`correlation`]: join events with argument payloads, rebuild call trees
//! - [`render`]: print closed call trees with timestamps and durations
//! - [`symbolization`]: symbol table, DWARF ranges and lines, return sites,
//!   Go runtime offsets
//! - [`probing`]: load the eBPF object, attach uprobes, read the ring buffers
//! - [`session`]: the event loop tying the above together
//!
//! ### Support Modules
//!
//! - [`cli`]: command-line argument parsing
//! - [`config`]: validated run configuration
//! - [`preflight`]: privilege, kernel and binary checks
//! - [`domain`]: core newtypes and error enums
//!
//! ## Typical Usage
//!
//! ```bash
//! # Probe every function in package main
//! sudo gofntrace ./app -u 'main.*'
//!
//! # Print only traces rooted at main.handle, capturing its first argument
//! sudo gofntrace ./app -u 'main.*' 'main.handle(id=(%ax):u64)'
//!
//! # Inspect the plan without loading anything
//! gofntrace ./app -u 'main.*' --dry-run --dump-plan plan.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Uprobes**: kernel breakpoints on userspace instructions, placed by file offset
//! - **Go register ABI**: arguments arrive in `ax, bx, cx, di, si, r8..r11`
//! - **goid**: the goroutine id, read from `runtime.g` through thread-local storage
//! - **Entry correction**: the same call reported twice after a goroutine
//!   stack copy is folded into one

pub mod cli;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod fetcharg;
pub mod plan;
pub mod preflight;
pub mod probing;
pub mod render;
pub mod session;
pub mod symbolization;
