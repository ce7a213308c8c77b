//! # Tracing Session
//!
//! The event loop that runs between attach and detach:
//!
//! ```text
//!  events ───┐
//!  payloads ─┼─▶ select! ─▶ Correlator ─▶ TraceRenderer ─▶ crossbeam ─▶ writer thread ─▶ stdout
//!  tick ─────┤
//!  Ctrl+C ───┘
//! ```
//!
//! Payloads are polled before events so that an entry usually finds its
//! arguments already queued. The tick expires entries that waited too long
//! for their payloads.
//!
//! On shutdown the probes are detached first, whatever is still queued in
//! the channels is correlated, and every goroutine still open is flushed as
//! a partial trace.

use crossbeam_channel::{bounded, Sender};
use log::{debug, info, warn};
use std::future::Future;
use std::io::{self, Write};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;

use crate::correlation::{ClosedTrace, Correlator, CorrelatorStats};
use crate::domain::ProbeError;
use crate::probing::{ProbeBackend, ProbeStreams};
use crate::render::TraceRenderer;
use crate::symbolization::SymbolResolver;

/// How often deferred entries are checked for timeouts
pub const EXPIRE_TICK: Duration = Duration::from_millis(100);

/// Rendered traces buffered between the session and the writer thread
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    DurationElapsed,
    StreamClosed,
    TransportFailed,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StopReason::Interrupted => "interrupted",
            StopReason::DurationElapsed => "duration limit reached",
            StopReason::StreamClosed => "event stream closed",
            StopReason::TransportFailed => "event transport failed",
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSummary {
    pub reason: StopReason,
    pub elapsed: Duration,
    pub stats: CorrelatorStats,
    pub traces_printed: u64,
    pub traces_filtered: u64,
}

/// Owns stdout (or any writer) on a dedicated thread
pub struct OutputWriter<W> {
    sender: Sender<String>,
    handle: JoinHandle<io::Result<W>>,
}

impl<W: Write + Send + 'static> OutputWriter<W> {
    #[must_use]
    pub fn spawn(mut writer: W, capacity: usize) -> Self {
        let (sender, receiver) = bounded::<String>(capacity);
        let handle = std::thread::spawn(move || {
            for chunk in receiver {
                writer.write_all(chunk.as_bytes())?;
                writer.flush()?;
            }
            Ok(writer)
        });
        Self { sender, handle }
    }

    #[must_use]
    pub fn sender(&self) -> Sender<String> {
        self.sender.clone()
    }

    /// Close the channel and wait for everything to be written
    ///
    /// Every clone returned by [`OutputWriter::sender`] must be dropped
    /// first, or this blocks forever.
    ///
    /// # Errors
    /// Returns the writer's I/O error, or an error if the thread panicked
    pub fn finish(self) -> io::Result<W> {
        drop(self.sender);
        self.handle.join().map_err(|_| io::Error::other("output writer thread panicked"))?
    }
}

/// Renders closed traces and hands them to the writer thread
struct Printer<'r, 'a, R: SymbolResolver + ?Sized> {
    renderer: &'r TraceRenderer<'a, R>,
    output: Sender<String>,
    printed: u64,
    filtered: u64,
    writer_gone: bool,
}

impl<R: SymbolResolver + ?Sized> Printer<'_, '_, R> {
    fn emit(&mut self, traces: Vec<ClosedTrace>) {
        for trace in traces {
            let Some(text) = self.renderer.render(&trace) else {
                self.filtered += 1;
                continue;
            };
            if self.output.send(text).is_err() {
                if !self.writer_gone {
                    warn!("output writer stopped, discarding traces");
                    self.writer_gone = true;
                }
                continue;
            }
            self.printed += 1;
        }
    }
}

/// Run the event loop until `shutdown` resolves, `duration` elapses or the
/// event stream ends, then detach and flush.
///
/// # Errors
/// A transport failure on the event stream, or a failure to detach; open
/// traces are flushed to `output` in both cases
pub async fn run<R, B, S>(
    backend: &mut B,
    mut correlator: Correlator<'_, R>,
    renderer: &TraceRenderer<'_, R>,
    output: Sender<String>,
    shutdown: S,
    duration: Option<Duration>,
) -> Result<SessionSummary, ProbeError>
where
    R: SymbolResolver + ?Sized,
    B: ProbeBackend + ?Sized,
    S: Future<Output = ()>,
{
    let ProbeStreams { mut events, mut payloads } = backend.take_streams()?;
    let mut printer = Printer { renderer, output, printed: 0, filtered: 0, writer_gone: false };

    let started = Instant::now();
    let deadline = async {
        match duration {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(shutdown);
    tokio::pin!(deadline);

    let mut tick = tokio::time::interval(EXPIRE_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut payloads_open = true;
    let mut failure = None;

    let reason = loop {
        tokio::select! {
            biased;

            () = &mut shutdown => break StopReason::Interrupted,
            () = &mut deadline => break StopReason::DurationElapsed,
            payload = payloads.recv(), if payloads_open => match payload {
                Some(payload) => printer.emit(correlator.on_payload(payload)),
                None => {
                    debug!("payload stream closed");
                    payloads_open = false;
                }
            },
            event = events.recv() => match event {
                Some(Ok(raw)) => printer.emit(correlator.on_event(raw)),
                Some(Err(e)) => {
                    failure = Some(e);
                    break StopReason::TransportFailed;
                }
                None => break StopReason::StreamClosed,
            },
            _ = tick.tick() => printer.emit(correlator.expire_stale(Instant::now())),
        }
    };
    info!("Stopping: {reason}");

    let detached = backend.detach();

    // correlate what the readers delivered before the probes went away
    while let Ok(payload) = payloads.try_recv() {
        printer.emit(correlator.on_payload(payload));
    }
    while let Ok(Ok(raw)) = events.try_recv() {
        printer.emit(correlator.on_event(raw));
    }
    printer.emit(correlator.flush_all());

    let summary = SessionSummary {
        reason,
        elapsed: started.elapsed(),
        stats: correlator.stats(),
        traces_printed: printer.printed,
        traces_filtered: printer.filtered,
    };

    if let Some(e) = failure {
        warn!("{} traces printed before the event transport failed", summary.traces_printed);
        return Err(e);
    }
    detached?;
    Ok(summary)
}
