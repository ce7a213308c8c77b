//! # Instrumentation Plan
//!
//! The plan is the single source of truth about what gets probed. It is
//! built once at startup from the symbol table and user targets, handed to
//! the probe backend for attaching, and used by the correlator to map an
//! event back to the function it came from.
//!
//! Each function contributes one `Entry` point and one `Return` point per
//! `ret` instruction. One extra `ThreadExit` point on `runtime.goexit1`
//! lets the correlator close traces of goroutines that die mid-call.
//!
//! A point's index in the plan is its [`PointId`]. The kernel side carries
//! it in argument payloads so misrouted payloads can be detected.

pub mod builder;
pub mod target;
pub mod wildcard;

pub use builder::{build, PlanRequest, GOROUTINE_EXIT_FUNC, VENDOR_MARKER};
pub use target::{parse_target, TargetSpec};
pub use wildcard::WildcardPattern;

use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;

use crate::domain::PointId;
use crate::fetcharg::ArgumentFetchSpec;
use gofntrace_common::{LOCATION_ENTRY, LOCATION_GOROUTINE_EXIT, LOCATION_RETURN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Entry,
    Return,
    ThreadExit,
}

impl ProbeKind {
    /// Location code used on the wire
    #[must_use]
    pub fn wire_location(self) -> u8 {
        match self {
            Self::Entry => LOCATION_ENTRY,
            Self::Return => LOCATION_RETURN,
            Self::ThreadExit => LOCATION_GOROUTINE_EXIT,
        }
    }

    #[must_use]
    pub fn from_wire(location: u8) -> Option<Self> {
        match location {
            LOCATION_ENTRY => Some(Self::Entry),
            LOCATION_RETURN => Some(Self::Return),
            LOCATION_GOROUTINE_EXIT => Some(Self::ThreadExit),
            _ => None,
        }
    }
}

/// One uprobe to install
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentationPoint {
    pub function_name: String,
    pub kind: ProbeKind,
    /// Virtual address of the function entry
    pub absolute_address: u64,
    /// Offset of the probed instruction in the binary file
    pub file_offset: u64,
    /// Distance from the function entry; 0 unless `kind` is `Return`
    pub offset_from_entry: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub argument_specs: Vec<ArgumentFetchSpec>,
    pub is_selected: bool,
}

impl InstrumentationPoint {
    /// Virtual address of the probed instruction
    #[must_use]
    pub fn probe_address(&self) -> u64 {
        self.absolute_address + self.offset_from_entry
    }
}

/// Ordered, immutable set of instrumentation points
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstrumentationPlan {
    points: Vec<InstrumentationPoint>,
    #[serde(skip)]
    index: HashMap<String, HashMap<u64, usize>>,
}

impl InstrumentationPlan {
    /// Build the plan and its `(function, offset)` index.
    ///
    /// When two points share a key, the first one wins.
    #[must_use]
    pub fn new(points: Vec<InstrumentationPoint>) -> Self {
        let mut index: HashMap<String, HashMap<u64, usize>> = HashMap::new();
        for (idx, point) in points.iter().enumerate() {
            index
                .entry(point.function_name.clone())
                .or_default()
                .entry(point.offset_from_entry)
                .or_insert(idx);
        }
        Self { points, index }
    }

    #[must_use]
    pub fn points(&self) -> &[InstrumentationPoint] {
        &self.points
    }

    /// Points paired with their ids, in plan order
    pub fn iter(&self) -> impl Iterator<Item = (PointId, &InstrumentationPoint)> {
        self.points.iter().enumerate().map(|(idx, point)| (point_id(idx), point))
    }

    #[must_use]
    pub fn get(&self, id: PointId) -> Option<&InstrumentationPoint> {
        self.points.get(id.index())
    }

    /// Find the point probing `function` at `offset` from its entry
    #[must_use]
    pub fn lookup(&self, function: &str, offset: u64) -> Option<(PointId, &InstrumentationPoint)> {
        let idx = *self.index.get(function)?.get(&offset)?;
        Some((point_id(idx), &self.points[idx]))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of traced functions, excluding the goroutine exit point
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.points.iter().filter(|p| p.kind == ProbeKind::Entry).count()
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.points
            .iter()
            .filter(|p| p.kind == ProbeKind::Entry && p.is_selected)
            .count()
    }

    /// Write the plan as pretty-printed JSON
    ///
    /// # Errors
    /// Returns the serializer's I/O error
    pub fn write_json<W: Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer_pretty(writer, self)
    }
}

fn point_id(idx: usize) -> PointId {
    PointId(u32::try_from(idx).unwrap_or(u32::MAX))
}
