//! # Kernel Probe Backend
//!
//! Installs one uprobe per plan point and streams what they report back to
//! userspace. The [`ProbeBackend`] trait is the seam between the session and
//! the kernel: the session only ever sees two channels.
//!
//! ## Lifecycle
//!
//! ```text
//! load ──▶ attach ──▶ take_streams ──▶ ... ──▶ detach
//! ```
//!
//! - **load**: open the eBPF object, write the Go ABI offsets and one
//!   `ProbeConfig` per point, load the uprobe program and start one reader
//!   task per ring buffer
//! - **attach**: attach the program at every point's file offset
//! - **detach**: remove every attached link (safe to call twice)
//!
//! ## Module Structure
//!
//! - **`ebpf_setup`**: [`AyaBackend`], the aya-based implementation
//! - **`ring_reader`**: `AsyncFd` ring buffer readers feeding tokio channels

pub mod ebpf_setup;
pub mod ring_reader;

pub use ebpf_setup::AyaBackend;

use std::path::Path;
use tokio::sync::mpsc;

use crate::correlation::{ArgPayload, RawEvent};
use crate::domain::ProbeError;
use crate::plan::InstrumentationPlan;

/// Go runtime offsets the probe needs to read the goroutine id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    pub g_offset: i64,
    pub goid_offset: i64,
}

/// Receiving ends of the two kernel streams
///
/// A transport error on the event stream ends the run.
pub struct ProbeStreams {
    pub events: mpsc::Receiver<Result<RawEvent, ProbeError>>,
    pub payloads: mpsc::Receiver<ArgPayload>,
}

pub trait ProbeBackend {
    /// Prepare the kernel side for `plan`
    ///
    /// # Errors
    /// Fails when the object cannot be loaded or the plan does not fit the
    /// probe's limits
    fn load(&mut self, plan: &InstrumentationPlan, config: &LoadConfig) -> Result<(), ProbeError>;

    /// Attach every point of `plan` to `binary`, returning the number of
    /// probes attached
    ///
    /// # Errors
    /// Fails on the first probe that cannot be attached
    fn attach(&mut self, binary: &Path, plan: &InstrumentationPlan) -> Result<usize, ProbeError>;

    /// Remove all attached probes
    ///
    /// # Errors
    /// Returns the first detach failure; remaining links are still removed
    fn detach(&mut self) -> Result<(), ProbeError>;

    /// Hand out the event and payload receivers (once)
    ///
    /// # Errors
    /// [`ProbeError::StreamsTaken`] on the second call
    fn take_streams(&mut self) -> Result<ProbeStreams, ProbeError>;
}
