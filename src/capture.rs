//! Capture supervisor
//!
//! Owns one capture worker: spawns it, feeds a watchdog from its messages,
//! and recreates it on faults, abnormal exits and silence. Captured frames
//! are validated, address-stripped and forwarded to the owner; the
//! supervisor itself never filters traffic.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, Sleep};

use crate::config::SupervisorConfig;
use crate::event::{CaptureEvent, RestartReason, SupervisorState};
use crate::frame::CapturedFrame;
use crate::io::LinkCapture;
use crate::worker::{
    spawn_capture_worker, ErrorEnvelope, FaultKind, WorkerHandle, WorkerMessage,
};
use crate::{Result, MAC_LEN};

/// Commands accepted by the supervision task.
enum Command {
    Start,
    Stop(oneshot::Sender<()>),
}

/// Supervisor for a continuous link-layer capture loop.
///
/// Spawning returns the supervisor handle and the event channel carrying
/// everything the supervisor observes. Dropping the handle tears the
/// supervision task and its worker down cooperatively.
pub struct CaptureSupervisor {
    config: SupervisorConfig,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<SupervisorState>>,
    task: JoinHandle<()>,
}

impl CaptureSupervisor {
    /// Validate `config`, spawn the supervision task and start the first
    /// worker immediately.
    pub fn spawn(
        config: SupervisorConfig,
        io: Arc<dyn LinkCapture>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CaptureEvent>)> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(SupervisorState::Stopped));

        let actor = CaptureActor {
            config: config.clone(),
            io,
            events: event_tx,
            state: Arc::clone(&state),
            worker: None,
            watchdog: None,
            backoff: None,
        };
        let task = tokio::spawn(actor.run(cmd_rx));

        let supervisor = Self {
            config,
            cmd_tx,
            state,
            task,
        };
        supervisor.start();
        Ok((supervisor, event_rx))
    }

    /// Spawn a fresh worker. No-op while one is already live.
    pub fn start(&self) {
        let _ = self.cmd_tx.send(Command::Start);
    }

    /// Tear the worker down and wait until it is fully gone. Idempotent.
    ///
    /// This is the only supervisor operation that suspends.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// The configuration this supervisor was spawned with.
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Stop the worker and end the supervision task.
    pub async fn shutdown(self) {
        self.stop().await;
        drop(self.cmd_tx);
        let _ = self.task.await;
    }
}

/// Result of one turn of the supervision loop.
enum Tick {
    Cmd(Option<Command>),
    Worker(Option<WorkerMessage>),
    Watchdog,
    Backoff,
}

struct CaptureActor {
    config: SupervisorConfig,
    io: Arc<dyn LinkCapture>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    state: Arc<RwLock<SupervisorState>>,
    /// The one live worker, if any.
    worker: Option<WorkerHandle>,
    /// Single-shot silence deadline; armed from the worker's liveness
    /// signal, reset on every message.
    watchdog: Option<Pin<Box<Sleep>>>,
    /// Pending error-backoff deadline; a worker is started when it fires.
    backoff: Option<Pin<Box<Sleep>>>,
}

impl CaptureActor {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            let tick = tokio::select! {
                cmd = cmd_rx.recv() => Tick::Cmd(cmd),
                msg = recv_message(&mut self.worker) => Tick::Worker(msg),
                _ = expired(&mut self.watchdog) => Tick::Watchdog,
                _ = expired(&mut self.backoff) => Tick::Backoff,
            };

            match tick {
                Tick::Cmd(Some(Command::Start)) => self.handle_start().await,
                Tick::Cmd(Some(Command::Stop(ack))) => {
                    self.handle_stop().await;
                    let _ = ack.send(());
                }
                Tick::Cmd(None) => {
                    // Owner dropped the supervisor.
                    self.stop_worker().await;
                    self.set_state(SupervisorState::Stopped).await;
                    break;
                }
                Tick::Worker(Some(msg)) => self.handle_message(msg),
                Tick::Worker(None) => self.handle_exit().await,
                Tick::Watchdog => self.handle_timeout().await,
                Tick::Backoff => {
                    self.backoff = None;
                    self.start_worker().await;
                }
            }
        }
    }

    async fn handle_start(&mut self) {
        if self.worker.is_some() {
            return;
        }
        self.backoff = None;
        self.start_worker().await;
    }

    async fn handle_stop(&mut self) {
        self.backoff = None;
        self.stop_worker().await;
        self.set_state(SupervisorState::Stopped).await;
        self.emit(CaptureEvent::Stopped);
    }

    /// Every worker message counts as liveness, faults included.
    fn handle_message(&mut self, msg: WorkerMessage) {
        self.feed_watchdog();

        match msg {
            WorkerMessage::Online => {
                log::info!("capture worker online on {}", self.config.interface);
                self.emit(CaptureEvent::Started);
            }
            WorkerMessage::Frame(raw) => {
                if raw.len() < MAC_LEN {
                    let envelope = ErrorEnvelope::new(
                        FaultKind::ValidatePacket,
                        "RawLinkError",
                        format!(
                            "captured frame shorter than the {}-byte address prefix: {} bytes",
                            MAC_LEN,
                            raw.len()
                        ),
                    );
                    self.emit(CaptureEvent::Error(envelope));
                } else {
                    log::debug!("captured frame of {} bytes", raw.len());
                    self.emit(CaptureEvent::Data(CapturedFrame::new(raw)));
                }
            }
            WorkerMessage::Report(report) => {
                log::debug!("ignoring transmit report from capture worker: {:?}", report);
            }
            WorkerMessage::Fault(envelope) => {
                log::warn!(
                    "capture worker fault ({}): {}",
                    envelope.kind,
                    envelope.error.message
                );
                self.emit(CaptureEvent::Error(envelope));
            }
        }
    }

    /// The message channel closed: the worker terminated on its own.
    async fn handle_exit(&mut self) {
        let code = match self.worker.take() {
            Some(handle) => handle.reap().await,
            None => return,
        };
        self.watchdog = None;
        log::warn!("capture worker exited with code {}", code);
        self.emit(CaptureEvent::Exit(code));
        self.restart(RestartReason::Error).await;
    }

    async fn handle_timeout(&mut self) {
        self.watchdog = None;
        log::warn!(
            "capture worker silent for {:?}, forcing restart",
            self.config.watchdog_timeout()
        );
        self.emit(CaptureEvent::Timeout);
        self.restart(RestartReason::Timeout).await;
    }

    /// Tear down, then recreate: immediately on timeout, after the error
    /// backoff otherwise. The backoff is a deadline, not a sleep, so
    /// commands keep flowing while it pends.
    async fn restart(&mut self, reason: RestartReason) {
        log::info!("restarting capture worker, reason: {}", reason);
        self.emit(CaptureEvent::Restarting(reason));
        self.stop_worker().await;
        self.emit(CaptureEvent::Stopped);

        match reason {
            RestartReason::Error => {
                let deadline = Instant::now() + self.config.error_backoff();
                self.backoff = Some(Box::pin(sleep_until(deadline)));
                self.set_state(SupervisorState::BackingOff).await;
            }
            RestartReason::Timeout => self.start_worker().await,
        }
    }

    async fn start_worker(&mut self) {
        log::debug!("spawning capture worker on {}", self.config.interface);
        let handle = spawn_capture_worker(
            Arc::clone(&self.io),
            self.config.interface.clone(),
            self.config.interval(),
        );
        self.worker = Some(handle);
        self.set_state(SupervisorState::Running).await;
    }

    /// Full teardown: disarm the watchdog, abort the worker and await its
    /// termination. Emits nothing; callers decide what to report.
    async fn stop_worker(&mut self) {
        self.watchdog = None;
        if let Some(handle) = self.worker.take() {
            handle.shutdown().await;
        }
    }

    fn feed_watchdog(&mut self) {
        let deadline = Instant::now() + self.config.watchdog_timeout();
        match &mut self.watchdog {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.watchdog = Some(Box::pin(sleep_until(deadline))),
        }
    }

    fn emit(&self, event: CaptureEvent) {
        let _ = self.events.send(event);
    }

    async fn set_state(&self, state: SupervisorState) {
        *self.state.write().await = state;
    }
}

/// Receive the next worker message, or pend forever with no worker.
async fn recv_message(worker: &mut Option<WorkerHandle>) -> Option<WorkerMessage> {
    match worker {
        Some(handle) => handle.msg_rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Await a deadline, or pend forever when none is armed.
async fn expired(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
