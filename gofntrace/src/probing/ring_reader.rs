//! Ring buffer → tokio channel pumps
//!
//! Each ring buffer gets its own task so a burst of argument payloads never
//! delays call events (and the other way round). Records are copied out of
//! the ring with `read_unaligned` and converted to domain types before
//! being forwarded.

use aya::maps::{MapData, RingBuf};
use gofntrace_common::{ArgData, GoEvent, MAX_ARG_BYTES};
use log::{debug, warn};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::correlation::{ArgPayload, PayloadTag, RawEvent};
use crate::domain::{GoroutineId, PointId, ProbeError};
use crate::plan::ProbeKind;

/// Copy a `#[repr(C)]` record out of a ring buffer item
fn read_record<T: Copy>(bytes: &[u8]) -> Option<T> {
    if bytes.len() < std::mem::size_of::<T>() {
        return None;
    }
    // SAFETY: length checked above; T is a plain-old-data wire struct
    #[allow(unsafe_code)]
    let record = unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<T>()) };
    Some(record)
}

/// Convert a wire event, `None` for unknown location codes
#[must_use]
pub fn decode_event(event: &GoEvent) -> Option<RawEvent> {
    Some(RawEvent {
        goid: GoroutineId(event.goid),
        ip: event.ip,
        caller_ip: event.caller_ip,
        frame_base: event.bp,
        caller_frame_base: event.caller_bp,
        kind: ProbeKind::from_wire(event.location)?,
        time_ns: event.time_ns,
    })
}

#[must_use]
pub fn decode_payload(arg: &ArgData) -> ArgPayload {
    let len = usize::from(arg.size).min(MAX_ARG_BYTES);
    ArgPayload {
        goid: GoroutineId(arg.goid),
        tag: Some(PayloadTag { point_id: PointId(arg.point_id), arg_index: arg.arg_index }),
        data: arg.data[..len].to_vec(),
    }
}

/// Wait until the ring is readable, then drain it
async fn drain<T: Copy>(ring: &mut AsyncFd<RingBuf<MapData>>) -> Result<Vec<T>, ProbeError> {
    let mut guard = ring.readable_mut().await?;
    let mut records = Vec::new();
    let mut short = 0usize;

    let inner = guard.get_inner_mut();
    while let Some(item) = inner.next() {
        match read_record::<T>(&item) {
            Some(record) => records.push(record),
            None => short += 1,
        }
    }
    guard.clear_ready();

    if short > 0 {
        warn!("skipped {short} truncated ring buffer records");
    }
    Ok(records)
}

/// Pump `GoEvent` records into `tx` until the receiver goes away
///
/// # Errors
/// Returns an error if the ring buffer cannot be registered with tokio
pub fn spawn_event_reader(
    ring: RingBuf<MapData>,
    tx: mpsc::Sender<Result<RawEvent, ProbeError>>,
) -> Result<JoinHandle<()>, ProbeError> {
    let mut ring = AsyncFd::new(ring)?;
    Ok(tokio::spawn(async move {
        loop {
            let records = match drain::<GoEvent>(&mut ring).await {
                Ok(records) => records,
                Err(e) => {
                    let _ = tx.send(Err(ProbeError::Transport(e.to_string()))).await;
                    return;
                }
            };
            for record in &records {
                let Some(event) = decode_event(record) else {
                    debug!("ignoring event with location {}", record.location);
                    continue;
                };
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
        }
    }))
}

/// Pump `ArgData` records into `tx` until the receiver goes away
///
/// # Errors
/// Returns an error if the ring buffer cannot be registered with tokio
pub fn spawn_payload_reader(
    ring: RingBuf<MapData>,
    tx: mpsc::Sender<ArgPayload>,
) -> Result<JoinHandle<()>, ProbeError> {
    let mut ring = AsyncFd::new(ring)?;
    Ok(tokio::spawn(async move {
        loop {
            let records = match drain::<ArgData>(&mut ring).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("argument ring buffer failed: {e}");
                    return;
                }
            };
            for record in &records {
                if tx.send(decode_payload(record)).await.is_err() {
                    return;
                }
            }
        }
    }))
}
