//! Structured error types for gofntrace
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::{GoroutineId, PointId};
use thiserror::Error;

/// Malformed argument-fetch statement
///
/// Always fatal, reported before any kernel interaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchArgError {
    #[error("type not found: {0}")]
    MissingType(String),

    #[error("imbalanced parentheses: {0}")]
    UnbalancedExpression(String),

    #[error("unsupported type {0}: only u/s 8/16/32/64, f32/f64 and c 8..512 are supported")]
    UnknownType(String),

    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("invalid offset: {0}")]
    InvalidOffset(String),

    #[error("empty addressing expression: {0}")]
    EmptyExpression(String),

    #[error("invalid variable statement: {0}")]
    MissingName(String),

    #[error("argument buffer too short: need {needed} bytes, got {got}")]
    BufferTooShort { needed: usize, got: usize },
}

/// Failure of the binary-format collaborator
#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("symbol not found: {0}")]
    NotFound(String),

    #[error("PC range too large: {0}")]
    PcRangeTooLarge(String),

    #[error("address 0x{0:x} is not mapped by any file-backed section")]
    AddressNotMapped(u64),

    #[error("no return instructions found in {0}")]
    NoReturnSites(String),

    #[error("missing debug information: {0}")]
    NoDebugInfo(String),

    #[error(transparent)]
    Object(#[from] object::Error),

    #[error(transparent)]
    Dwarf(#[from] gimli::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure while turning user targets into an instrumentation plan
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("invalid fetch argument: {0}")]
    FetchArg(#[from] FetchArgError),

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("function {name} not found: {source}")]
    SymbolNotFound {
        name: String,
        #[source]
        source: SymbolError,
    },

    #[error("no function matches {0}")]
    NoMatch(String),

    #[error("goroutine exit function {name} unavailable: {source}")]
    GoroutineExitMissing {
        name: String,
        #[source]
        source: SymbolError,
    },

    #[error(transparent)]
    Symbol(#[from] SymbolError),
}

/// Runtime correlation anomaly
///
/// Never fatal: the anomaly is logged, correlation continues for every
/// other goroutine.
#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error("no instrumentation point for ip 0x{ip:x} ({goid})")]
    UnknownProbe { goid: GoroutineId, ip: u64 },

    #[error(
        "argument payload for {got_point}/{got_index} delivered to {expected_point}/{expected_index} ({goid})"
    )]
    PayloadMismatch {
        goid: GoroutineId,
        expected_point: PointId,
        expected_index: u8,
        got_point: PointId,
        got_index: u8,
    },

    #[error("gave up waiting {waited_ms}ms for {missing} argument payload(s) ({goid})")]
    ArgumentTimeout { goid: GoroutineId, missing: usize, waited_ms: u128 },

    #[error("failed to decode argument: {0}")]
    Decode(#[from] FetchArgError),
}

/// Failure of the kernel attach layer
///
/// Fatal: the run ends after best-effort flushing of open goroutines.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to load eBPF program: {0}")]
    EbpfLoadFailed(String),

    #[error("eBPF program {0} not found in object")]
    ProgramNotFound(&'static str),

    #[error("eBPF map {0} not found in object")]
    MapNotFound(&'static str),

    #[error("Failed to attach {probe} to {binary}: {error}")]
    ProbeAttachFailed { probe: String, binary: String, error: String },

    #[error("{function} declares {count} arguments, at most {max} can be captured")]
    TooManyArguments { function: String, count: usize, max: usize },

    #[error("argument {name} needs {count} addressing rules, at most {max} are supported")]
    RuleChainTooLong { name: String, count: usize, max: usize },

    #[error("probes already attached")]
    AlreadyAttached,

    #[error("event streams already taken")]
    StreamsTaken,

    #[error("ring buffer transport failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Aya(#[from] aya::EbpfError),

    #[error(transparent)]
    Program(#[from] aya::programs::ProgramError),

    #[error(transparent)]
    Map(#[from] aya::maps::MapError),
}
