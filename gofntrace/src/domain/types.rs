//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers prevent passing a goroutine id where a plan index
//! is expected, and make function signatures more expressive.

use std::fmt;

/// Goroutine id
///
/// Read by the kernel program from `runtime.g.goid`. Stable for the
/// lifetime of the goroutine, may be reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GoroutineId(pub u64);

impl fmt::Display for GoroutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "goroutine {}", self.0)
    }
}

/// Index of an instrumentation point inside its plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub u32);

impl PointId {
    /// Position in the plan's point list
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "point#{}", self.0)
    }
}
