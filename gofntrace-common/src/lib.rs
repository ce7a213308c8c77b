//! # Shared Data Structures (eBPF ↔ Userspace)
//!
//! Defines the records exchanged between the kernel-side uprobe program and
//! the userspace tracer. All types use `#[repr(C)]` for a consistent memory
//! layout across the kernel/userspace boundary.
//!
//! ## Flow
//!
//! 1. Userspace writes one [`ProbeConfig`] per instrumentation point into the
//!    `PROBE_CONFIG` map, keyed by the probed virtual address.
//! 2. On every hit the kernel program looks up the config for the current IP,
//!    emits one [`GoEvent`] to `EVENTS`, and for entry points evaluates each
//!    [`FetchArgConfig`] and emits one [`ArgData`] per argument to `ARGS`.
//! 3. Userspace correlates both ring buffers per goroutine id.
//!
//! ## Key Types
//!
//! - [`GoEvent`] - entry/return/exit notification
//! - [`ArgData`] - captured argument bytes
//! - [`ProbeConfig`] - per-point configuration written by userspace

#![no_std]

// ============================================================================
// Program and Map Names
// ============================================================================

/// Name of the uprobe program attached at every instrumentation point
pub const PROBE_PROGRAM: &str = "gofntrace_probe";

/// Ring buffer carrying [`GoEvent`] records
pub const EVENTS_MAP: &str = "EVENTS";

/// Ring buffer carrying [`ArgData`] records
pub const ARGS_MAP: &str = "ARGS";

/// Hash map: probed address → [`ProbeConfig`]
pub const PROBE_CONFIG_MAP: &str = "PROBE_CONFIG";

/// Hash map: config key → value (see `CONFIG_*` keys)
pub const CONFIG_MAP: &str = "CONFIG";

/// `CONFIG` key: offset of the `runtime.g` pointer from the FS base
pub const CONFIG_G_OFFSET: u32 = 0;

/// `CONFIG` key: offset of `goid` inside `runtime.g`
pub const CONFIG_GOID_OFFSET: u32 = 1;

// ============================================================================
// Probe Locations
// ============================================================================

/// Probe placed on a function's first instruction
pub const LOCATION_ENTRY: u8 = 0;

/// Probe placed on one of a function's `ret` instructions
pub const LOCATION_RETURN: u8 = 1;

/// Probe placed on the runtime's goroutine exit function
pub const LOCATION_GOROUTINE_EXIT: u8 = 2;

// ============================================================================
// Limits
// ============================================================================

/// Maximum number of arguments captured per function
pub const MAX_FETCH_ARGS: usize = 8;

/// Maximum length of one addressing rule chain
///
/// The verifier needs a bounded loop; eight levels of indirection cover
/// every realistic Go struct path.
pub const MAX_FETCH_RULES: usize = 8;

/// Size of the data area in [`ArgData`] (512 bits, the widest `c` type)
pub const MAX_ARG_BYTES: usize = 64;

// ============================================================================
// Addressing Rules
// ============================================================================

/// Rule reads a register from `pt_regs`
pub const RULE_REGISTER: u8 = 0;

/// Rule adds a signed offset to the current address
pub const RULE_STACK_OFFSET: u8 = 1;

/// x86-64 general purpose registers, numbered in `struct pt_regs` order
pub const REG_R15: u8 = 0;
pub const REG_R14: u8 = 1;
pub const REG_R13: u8 = 2;
pub const REG_R12: u8 = 3;
pub const REG_BP: u8 = 4;
pub const REG_BX: u8 = 5;
pub const REG_R11: u8 = 6;
pub const REG_R10: u8 = 7;
pub const REG_R9: u8 = 8;
pub const REG_R8: u8 = 9;
pub const REG_AX: u8 = 10;
pub const REG_CX: u8 = 11;
pub const REG_DX: u8 = 12;
pub const REG_SI: u8 = 13;
pub const REG_DI: u8 = 14;
pub const REG_SP: u8 = 19;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Event sent from eBPF to userspace via the `EVENTS` ring buffer
///
/// **Memory Layout**: `#[repr(C)]`, 56 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct GoEvent {
    /// Goroutine id read from `runtime.g.goid`
    pub goid: u64,

    /// Instruction pointer of the probe that fired
    pub ip: u64,

    /// Return address of the current frame (0 when unknown)
    ///
    /// Only meaningful for entry probes, where it is read from `*(sp)`.
    pub caller_ip: u64,

    /// Frame base of the current function (stack pointer at the probe)
    pub bp: u64,

    /// Frame base of the caller (`rbp` at the probe)
    ///
    /// Used by userspace to recognise an entry reported twice because the
    /// goroutine stack was copied while the call was in flight.
    pub caller_bp: u64,

    /// Timestamp in nanoseconds (from `bpf_ktime_get_ns()`)
    ///
    /// Monotonic clock, relative to system boot.
    pub time_ns: u64,

    /// One of `LOCATION_ENTRY`, `LOCATION_RETURN`, `LOCATION_GOROUTINE_EXIT`
    pub location: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 7],
}

/// Captured argument bytes sent via the `ARGS` ring buffer
///
/// One record per declared argument, emitted in declaration order right
/// before the owning [`GoEvent`].
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct ArgData {
    /// Goroutine id (same source as [`GoEvent::goid`])
    pub goid: u64,

    /// Index of the owning instrumentation point in the userspace plan
    pub point_id: u32,

    /// Position of this argument in the point's declaration list
    pub arg_index: u8,

    /// Number of valid bytes in `data`
    pub size: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 2],

    /// Raw little-endian bytes read from the target
    pub data: [u8; MAX_ARG_BYTES],
}

impl Default for ArgData {
    fn default() -> Self {
        Self { goid: 0, point_id: 0, arg_index: 0, size: 0, _padding: [0; 2], data: [0; MAX_ARG_BYTES] }
    }
}

/// One step of an addressing computation
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FetchRule {
    /// `RULE_REGISTER` or `RULE_STACK_OFFSET`
    pub kind: u8,

    /// Register id (`REG_*`), only for `RULE_REGISTER`
    pub register: u8,

    /// Non-zero: read a pointer at the computed address before the next rule
    pub dereference: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 5],

    /// Signed offset, only for `RULE_STACK_OFFSET`
    pub offset: i64,
}

/// How to capture one argument
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct FetchArgConfig {
    /// Number of bytes to copy (at most `MAX_ARG_BYTES`)
    pub size: u32,

    /// Number of valid entries in `rules`
    pub rule_count: u32,

    /// Addressing rules, evaluated in order
    pub rules: [FetchRule; MAX_FETCH_RULES],
}

/// Per-point configuration written by userspace into `PROBE_CONFIG`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct ProbeConfig {
    /// Index of the point in the userspace plan
    pub point_id: u32,

    /// One of the `LOCATION_*` constants
    pub location: u8,

    /// Number of valid entries in `args`
    pub arg_count: u8,

    /// Padding for 8-byte alignment
    #[allow(clippy::pub_underscore_fields)]
    pub _padding: [u8; 2],

    /// Argument capture descriptions
    pub args: [FetchArgConfig; MAX_FETCH_ARGS],
}

#[cfg(feature = "user")]
use aya::Pod;

// Pod guarantees the types can be safely transmitted as plain bytes
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for GoEvent {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for ArgData {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for FetchRule {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for FetchArgConfig {}

#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for ProbeConfig {}
