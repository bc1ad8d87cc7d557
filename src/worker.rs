//! Worker loops and the worker/supervisor protocol
//!
//! A worker is one spawned task running an infinite cycle of
//! {I/O call → report → pace}. Workers never recover from their own
//! faults: anything that escapes the loop body is converted to an
//! [`ErrorEnvelope`], posted on the message channel, and the task ends.
//! Recovery is the supervisor's job.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::delay::WakeDelay;
use crate::frame::MacAddress;
use crate::io::{LinkCapture, LinkTransmit};
use crate::{RawLinkError, MAC_LEN};

/// Exit code of a worker that died after reporting a fault.
pub(crate) const EXIT_FAULT: i32 = 1;
/// Exit code attributed to a worker task that panicked.
pub(crate) const EXIT_PANIC: i32 = 101;

/// Classification of a fault crossing the worker/supervisor boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    /// An address buffer failed validation.
    ValidateAddress,
    /// A packet buffer failed validation.
    ValidatePacket,
    /// A send completed with the wrong byte count.
    DataSendError,
    /// An error escaped the worker loop.
    WorkerFault,
    /// The worker task terminated unexpectedly.
    WorkerExit,
    /// The worker went silent past the watchdog window.
    WatchdogTimeout,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidateAddress => "ValidateAddress",
            Self::ValidatePacket => "ValidatePacket",
            Self::DataSendError => "DataSendError",
            Self::WorkerFault => "WorkerFault",
            Self::WorkerExit => "WorkerExit",
            Self::WatchdogTimeout => "WatchdogTimeout",
        };
        write!(f, "{}", name)
    }
}

/// Details of a single fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Short name of the error source
    pub name: String,
    /// Human-readable description
    pub message: String,
    /// Backtrace or panic location, when one was captured
    pub trace: Option<String>,
}

/// The only failure shape crossing the worker/supervisor boundary, and the
/// payload of `error` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Fault classification
    pub kind: FaultKind,
    /// Fault details
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    pub fn new(kind: FaultKind, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            error: ErrorInfo {
                name: name.into(),
                message: message.into(),
                trace: None,
            },
        }
    }

    pub(crate) fn from_io(err: &std::io::Error) -> Self {
        Self::new(FaultKind::WorkerFault, format!("{:?}", err.kind()), err.to_string())
    }
}

impl From<&RawLinkError> for ErrorEnvelope {
    fn from(err: &RawLinkError) -> Self {
        let kind = match err {
            RawLinkError::ValidateAddress(_) => FaultKind::ValidateAddress,
            RawLinkError::ValidatePacket(_) => FaultKind::ValidatePacket,
            RawLinkError::DataSendError(_) => FaultKind::DataSendError,
            _ => FaultKind::WorkerFault,
        };
        Self::new(kind, "RawLinkError", err.to_string())
    }
}

/// Outcome of one transmit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitReport {
    /// No packet was queued when the worker ticked. A heartbeat, not a
    /// data event.
    Idle,
    /// A frame went out; carries the raw byte count reported by the
    /// transmit primitive, address prefix included.
    Sent(usize),
}

/// Messages posted by a worker to its supervisor.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// First message of every worker: the liveness signal that arms the
    /// supervisor's watchdog.
    Online,
    /// One captured frame, address-prefixed. Ownership transfers with the
    /// message.
    Frame(Bytes),
    /// Outcome of one transmit cycle.
    Report(TransmitReport),
    /// The worker loop died; this is its parting report.
    Fault(ErrorEnvelope),
}

/// A new outbound packet and destination pushed to a transmit worker.
#[derive(Debug)]
pub(crate) struct OutboundUpdate {
    pub packet: Bytes,
    pub address: MacAddress,
}

/// Owned reference to one running worker task.
///
/// A supervisor holds at most one of these at a time; it is replaced,
/// never mutated, on restart.
pub(crate) struct WorkerHandle {
    /// Inbound worker messages.
    pub msg_rx: mpsc::UnboundedReceiver<WorkerMessage>,
    /// Update channel, transmit workers only.
    update_tx: Option<mpsc::UnboundedSender<OutboundUpdate>>,
    join: JoinHandle<i32>,
}

impl WorkerHandle {
    /// Push a new packet and address to the worker.
    pub fn push(&self, update: OutboundUpdate) {
        if let Some(update_tx) = &self.update_tx {
            let _ = update_tx.send(update);
        }
    }

    /// Request cooperative termination and wait until the task is gone.
    pub async fn shutdown(mut self) {
        self.join.abort();
        let _ = (&mut self.join).await;
    }

    /// Collect the exit code of a worker that terminated on its own.
    pub async fn reap(self) -> i32 {
        match self.join.await {
            Ok(code) => code,
            Err(err) if err.is_panic() => EXIT_PANIC,
            Err(_) => 0,
        }
    }
}

/// Spawn a capture worker for `interface`.
pub(crate) fn spawn_capture_worker(
    io: Arc<dyn LinkCapture>,
    interface: String,
    interval: Duration,
) -> WorkerHandle {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(async move {
        match capture_loop(io, &interface, interval, &msg_tx).await {
            Ok(()) => 0,
            Err(envelope) => {
                log::debug!("capture worker on {} died: {}", interface, envelope.error.message);
                let _ = msg_tx.send(WorkerMessage::Fault(envelope));
                EXIT_FAULT
            }
        }
    });
    WorkerHandle {
        msg_rx,
        update_tx: None,
        join,
    }
}

/// Spawn a transmit worker for `interface`.
pub(crate) fn spawn_transmit_worker(
    io: Arc<dyn LinkTransmit>,
    interface: String,
    interval: Duration,
) -> WorkerHandle {
    let (msg_tx, msg_rx) = mpsc::unbounded_channel();
    let (update_tx, update_rx) = mpsc::unbounded_channel();
    let join = tokio::spawn(async move {
        match transmit_loop(io, &interface, interval, &msg_tx, update_rx).await {
            Ok(()) => 0,
            Err(envelope) => {
                log::debug!("transmit worker on {} died: {}", interface, envelope.error.message);
                let _ = msg_tx.send(WorkerMessage::Fault(envelope));
                EXIT_FAULT
            }
        }
    });
    WorkerHandle {
        msg_rx,
        update_tx: Some(update_tx),
        join,
    }
}

/// The capture cycle: read one frame, post it, pace.
///
/// Returns `Ok(())` only when the supervisor went away; every fault leaves
/// through `Err`.
async fn capture_loop(
    io: Arc<dyn LinkCapture>,
    interface: &str,
    interval: Duration,
    msg_tx: &mpsc::UnboundedSender<WorkerMessage>,
) -> std::result::Result<(), ErrorEnvelope> {
    let delay = WakeDelay::new();

    if msg_tx.send(WorkerMessage::Online).is_err() {
        return Ok(());
    }

    loop {
        let frame = io
            .capture_frame(interface)
            .await
            .map_err(|e| ErrorEnvelope::from_io(&e))?;

        // Ownership of the buffer moves to the supervisor here.
        if msg_tx.send(WorkerMessage::Frame(Bytes::from(frame))).is_err() {
            return Ok(());
        }

        delay.wait(interval).await;
    }
}

/// The transmit cycle: send the held frame (or report idle), post the
/// outcome, pace. An inbound update replaces the held frame and wakes the
/// pacing delay so the new packet goes out on the very next cycle.
async fn transmit_loop(
    io: Arc<dyn LinkTransmit>,
    interface: &str,
    interval: Duration,
    msg_tx: &mpsc::UnboundedSender<WorkerMessage>,
    mut update_rx: mpsc::UnboundedReceiver<OutboundUpdate>,
) -> std::result::Result<(), ErrorEnvelope> {
    let delay = WakeDelay::new();
    let mut wire_frame: Option<Bytes> = None;

    if msg_tx.send(WorkerMessage::Online).is_err() {
        return Ok(());
    }

    loop {
        let report = match &wire_frame {
            Some(frame) => {
                let sent = io
                    .transmit_frame(interface, frame)
                    .await
                    .map_err(|e| ErrorEnvelope::from_io(&e))?;
                TransmitReport::Sent(sent)
            }
            None => TransmitReport::Idle,
        };

        if msg_tx.send(WorkerMessage::Report(report)).is_err() {
            return Ok(());
        }

        tokio::select! {
            _ = delay.wait(interval) => {}
            update = update_rx.recv() => match update {
                Some(mut update) => {
                    // Collapse a burst of updates to the latest one.
                    while let Ok(next) = update_rx.try_recv() {
                        update = next;
                    }
                    wire_frame = Some(prefix_packet(&update));
                    delay.wake().await;
                }
                None => return Ok(()),
            },
        }
    }
}

/// Prepend the destination address to an outbound packet.
fn prefix_packet(update: &OutboundUpdate) -> Bytes {
    let mut framed = BytesMut::with_capacity(MAC_LEN + update.packet.len());
    framed.put_slice(update.address.as_bytes());
    framed.put_slice(&update.packet);
    framed.freeze()
}
