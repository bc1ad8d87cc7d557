//! Transmit supervisor
//!
//! Owns one transmit worker plus the outbound state the worker itself
//! cannot keep alive: the current packet and destination address. The
//! state is mutated only by explicit updates, survives every worker
//! restart, and is re-pushed to each new worker on its liveness signal.

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, Sleep};

use crate::config::SupervisorConfig;
use crate::event::{RestartReason, SupervisorState, TransmitEvent};
use crate::frame::{validate_address, validate_bytes_sent, validate_packet, MacAddress};
use crate::io::LinkTransmit;
use crate::worker::{
    spawn_transmit_worker, ErrorEnvelope, OutboundUpdate, TransmitReport, WorkerHandle,
    WorkerMessage,
};
use crate::Result;

/// Commands accepted by the supervision task.
enum Command {
    Start,
    Stop(oneshot::Sender<()>),
    Update(Bytes),
    UpdateAddress(Bytes),
}

/// Supervisor for a continuous link-layer transmit loop.
///
/// Spawning returns the supervisor handle and the event channel. The
/// supervisor starts with no packet queued and the broadcast destination;
/// the worker heartbeats idly until the first [`update`](Self::update).
pub struct TransmitSupervisor {
    config: SupervisorConfig,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state: Arc<RwLock<SupervisorState>>,
    task: JoinHandle<()>,
}

impl TransmitSupervisor {
    /// Validate `config`, spawn the supervision task and start the first
    /// worker immediately.
    pub fn spawn(
        config: SupervisorConfig,
        io: Arc<dyn LinkTransmit>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransmitEvent>)> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::new(RwLock::new(SupervisorState::Stopped));

        let actor = TransmitActor {
            config: config.clone(),
            io,
            events: event_tx,
            state: Arc::clone(&state),
            worker: None,
            online: false,
            watchdog: None,
            backoff: None,
            current_packet: None,
            current_address: MacAddress::default(),
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
    /// This is the only supervisor operation that suspends. The stored
    /// packet and address survive and are re-pushed on the next start.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Replace the outbound packet.
    ///
    /// The buffer is validated before anything changes; a rejected packet
    /// surfaces as an `Error` event and leaves the stored state untouched.
    /// A live worker picks the new packet up on its very next cycle.
    pub fn update(&self, packet: impl Into<Bytes>) {
        let _ = self.cmd_tx.send(Command::Update(packet.into()));
    }

    /// Replace the destination address, with the same validation contract
    /// as [`update`](Self::update).
    pub fn update_address(&self, address: impl Into<Bytes>) {
        let _ = self.cmd_tx.send(Command::UpdateAddress(address.into()));
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

struct TransmitActor {
    config: SupervisorConfig,
    io: Arc<dyn LinkTransmit>,
    events: mpsc::UnboundedSender<TransmitEvent>,
    state: Arc<RwLock<SupervisorState>>,
    /// The one live worker, if any.
    worker: Option<WorkerHandle>,
    /// Whether the worker has signalled liveness; updates are only pushed
    /// while online.
    online: bool,
    /// Single-shot silence deadline, reset on every worker message.
    watchdog: Option<Pin<Box<Sleep>>>,
    /// Pending error-backoff deadline.
    backoff: Option<Pin<Box<Sleep>>>,
    /// Outbound packet, excluding the address prefix.
    current_packet: Option<Bytes>,
    /// Outbound destination, broadcast until updated.
    current_address: MacAddress,
}

impl TransmitActor {
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
                Tick::Cmd(Some(Command::Update(packet))) => self.handle_update(packet),
                Tick::Cmd(Some(Command::UpdateAddress(address))) => {
                    self.handle_update_address(address)
                }
                Tick::Cmd(None) => {
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
        self.emit(TransmitEvent::Stopped);
    }

    fn handle_update(&mut self, packet: Bytes) {
        if let Err(err) = validate_packet(&packet) {
            log::warn!("rejected packet update: {}", err);
            self.emit(TransmitEvent::Error(ErrorEnvelope::from(&err)));
            return;
        }
        self.current_packet = Some(packet.clone());
        self.push_state();
        self.emit(TransmitEvent::Updated(packet));
    }

    fn handle_update_address(&mut self, address: Bytes) {
        match validate_address(&address) {
            Err(err) => {
                log::warn!("rejected address update: {}", err);
                self.emit(TransmitEvent::Error(ErrorEnvelope::from(&err)));
            }
            Ok(address) => {
                self.current_address = address;
                self.push_state();
                self.emit(TransmitEvent::AddressUpdated(address));
            }
        }
    }

    /// Every worker message counts as liveness, faults included.
    fn handle_message(&mut self, msg: WorkerMessage) {
        self.feed_watchdog();

        match msg {
            WorkerMessage::Online => {
                self.online = true;
                // Re-arm the worker's in-memory packet before reporting the
                // start; the worker's own copy did not survive the restart.
                self.push_state();
                let has_packet = self.current_packet.is_some();
                log::info!(
                    "transmit worker online on {} (packet queued: {})",
                    self.config.interface,
                    has_packet
                );
                self.emit(TransmitEvent::Started { has_packet });
            }
            WorkerMessage::Report(TransmitReport::Idle) => {
                // Heartbeat only; nothing was sent.
            }
            WorkerMessage::Report(TransmitReport::Sent(bytes_sent)) => match &self.current_packet {
                Some(packet) => match validate_bytes_sent(bytes_sent, packet.len()) {
                    Err(err) => {
                        log::warn!("send accounting mismatch: {}", err);
                        self.emit(TransmitEvent::Error(ErrorEnvelope::from(&err)));
                    }
                    Ok(sent) => {
                        log::debug!("sent {} byte packet to {}", sent, self.current_address);
                        self.emit(TransmitEvent::Data {
                            packet: packet.clone(),
                            address: self.current_address,
                        });
                    }
                },
                None => {
                    log::debug!("ignoring send report with no stored packet");
                }
            },
            WorkerMessage::Frame(_) => {
                log::debug!("ignoring capture frame from transmit worker");
            }
            WorkerMessage::Fault(envelope) => {
                log::warn!(
                    "transmit worker fault ({}): {}",
                    envelope.kind,
                    envelope.error.message
                );
                self.emit(TransmitEvent::Error(envelope));
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
        self.online = false;
        log::warn!("transmit worker exited with code {}", code);
        self.emit(TransmitEvent::Exit(code));
        self.restart(RestartReason::Error).await;
    }

    async fn handle_timeout(&mut self) {
        self.watchdog = None;
        log::warn!(
            "transmit worker silent for {:?}, forcing restart",
            self.config.watchdog_timeout()
        );
        self.emit(TransmitEvent::Timeout);
        self.restart(RestartReason::Timeout).await;
    }

    async fn restart(&mut self, reason: RestartReason) {
        log::info!("restarting transmit worker, reason: {}", reason);
        self.emit(TransmitEvent::Restarting(reason));
        self.stop_worker().await;
        self.emit(TransmitEvent::Stopped);

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
        log::debug!("spawning transmit worker on {}", self.config.interface);
        let handle = spawn_transmit_worker(
            Arc::clone(&self.io),
            self.config.interface.clone(),
            self.config.interval(),
        );
        self.worker = Some(handle);
        self.set_state(SupervisorState::Running).await;
    }

    async fn stop_worker(&mut self) {
        self.watchdog = None;
        self.online = false;
        if let Some(handle) = self.worker.take() {
            handle.shutdown().await;
        }
    }

    /// Push the stored packet and address to a live, online worker.
    fn push_state(&self) {
        if !self.online {
            return;
        }
        if let (Some(handle), Some(packet)) = (&self.worker, &self.current_packet) {
            handle.push(OutboundUpdate {
                packet: packet.clone(),
                address: self.current_address,
            });
        }
    }

    fn feed_watchdog(&mut self) {
        let deadline = Instant::now() + self.config.watchdog_timeout();
        match &mut self.watchdog {
            Some(sleep) => sleep.as_mut().reset(deadline),
            None => self.watchdog = Some(Box::pin(sleep_until(deadline))),
        }
    }

    fn emit(&self, event: TransmitEvent) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};
    use std::sync::Mutex;
    use std::time::{Duration, Instant as StdInstant};
    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::worker::FaultKind;

    const RECV_WINDOW: Duration = Duration::from_millis(1_000);

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            interface: "lo".to_string(),
            interval_ms: 10,
            error_backoff_ms: 50,
            watchdog_timeout_ms: 500,
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<TransmitEvent>) -> TransmitEvent {
        timeout(RECV_WINDOW, events.recv())
            .await
            .expect("no event within window")
            .expect("event channel closed")
    }

    struct RecordingTransmit {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransmit {
        fn spawn() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LinkTransmit for RecordingTransmit {
        async fn transmit_frame(&self, _interface: &str, frame: &[u8]) -> std::io::Result<usize> {
            self.sent.lock().unwrap().push(frame.to_vec());
            Ok(frame.len())
        }
    }

    /// Reports one byte fewer than it was handed.
    struct ShortTransmit;

    #[async_trait]
    impl LinkTransmit for ShortTransmit {
        async fn transmit_frame(&self, _interface: &str, frame: &[u8]) -> std::io::Result<usize> {
            Ok(frame.len() - 1)
        }
    }

    struct FailingTransmit;

    #[async_trait]
    impl LinkTransmit for FailingTransmit {
        async fn transmit_frame(&self, _interface: &str, _frame: &[u8]) -> std::io::Result<usize> {
            Err(Error::new(ErrorKind::BrokenPipe, "interface went down"))
        }
    }

    #[tokio::test]
    async fn test_update_preempts_the_pacing_interval() {
        let config = SupervisorConfig {
            interval_ms: 1_000,
            ..test_config()
        };
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(config, io).unwrap();

        match next_event(&mut events).await {
            TransmitEvent::Started { has_packet } => assert!(!has_packet),
            other => panic!("expected started, got {:?}", other),
        }

        let started = StdInstant::now();
        supervisor.update(vec![0x42u8; 100]);

        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));
        match next_event(&mut events).await {
            TransmitEvent::Data { packet, address } => {
                assert_eq!(packet.len(), 100);
                assert!(address.is_broadcast());
            }
            other => panic!("expected data, got {:?}", other),
        }
        // Well under the 1 s pacing interval: the update woke the delay.
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "update did not preempt pacing: {:?}",
            started.elapsed()
        );
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected_and_state_kept() {
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(test_config(), io).unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            TransmitEvent::Started { has_packet: false }
        ));

        supervisor.update(vec![0x11u8; 64]);
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));
        match next_event(&mut events).await {
            TransmitEvent::Data { packet, .. } => assert_eq!(&packet[..], &[0x11u8; 64][..]),
            other => panic!("expected data, got {:?}", other),
        }

        // An oversized packet is reported and changes nothing.
        supervisor.update(vec![0x22u8; 5_000]);
        loop {
            match next_event(&mut events).await {
                TransmitEvent::Error(envelope) => {
                    assert_eq!(envelope.kind, FaultKind::ValidatePacket);
                    break;
                }
                TransmitEvent::Data { packet, .. } => {
                    assert_eq!(&packet[..], &[0x11u8; 64][..]);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        // Subsequent sends still carry the prior valid packet.
        loop {
            match next_event(&mut events).await {
                TransmitEvent::Data { packet, .. } => {
                    assert_eq!(&packet[..], &[0x11u8; 64][..]);
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_address_update_is_rejected() {
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(test_config(), io).unwrap();
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Started { .. }));

        supervisor.update_address(vec![0x01u8; 5]);
        match next_event(&mut events).await {
            TransmitEvent::Error(envelope) => {
                assert_eq!(envelope.kind, FaultKind::ValidateAddress);
            }
            other => panic!("expected error, got {:?}", other),
        }

        supervisor.update_address(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        match next_event(&mut events).await {
            TransmitEvent::AddressUpdated(address) => {
                assert_eq!(address, MacAddress([1, 2, 3, 4, 5, 6]));
            }
            other => panic!("expected address update, got {:?}", other),
        }
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_sent_frames_carry_the_stored_address() {
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(test_config(), io.clone()).unwrap();
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Started { .. }));

        supervisor.update_address(vec![0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert!(matches!(
            next_event(&mut events).await,
            TransmitEvent::AddressUpdated(_)
        ));
        supervisor.update(vec![0x7Fu8; 32]);
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));

        match next_event(&mut events).await {
            TransmitEvent::Data { packet, address } => {
                assert_eq!(packet.len(), 32);
                assert_eq!(address, MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]));
            }
            other => panic!("expected data, got {:?}", other),
        }

        {
            let sent = io.sent.lock().unwrap();
            assert_eq!(&sent[0][..crate::MAC_LEN], &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
            assert_eq!(&sent[0][crate::MAC_LEN..], &[0x7Fu8; 32][..]);
        }
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_short_send_surfaces_as_data_send_error() {
        let (supervisor, mut events) =
            TransmitSupervisor::spawn(test_config(), Arc::new(ShortTransmit)).unwrap();
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Started { .. }));

        supervisor.update(vec![0x33u8; 24]);
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));
        match next_event(&mut events).await {
            TransmitEvent::Error(envelope) => {
                assert_eq!(envelope.kind, FaultKind::DataSendError);
                assert!(envelope.error.message.contains("23 of 24"));
            }
            other => panic!("expected error, got {:?}", other),
        }
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_crash_recovery_re_pushes_stored_state() {
        let (supervisor, mut events) =
            TransmitSupervisor::spawn(test_config(), Arc::new(FailingTransmit)).unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            TransmitEvent::Started { has_packet: false }
        ));

        supervisor.update(vec![0x55u8; 16]);
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));

        // The first send attempt faults; the worker reports and dies.
        match next_event(&mut events).await {
            TransmitEvent::Error(envelope) => assert_eq!(envelope.kind, FaultKind::WorkerFault),
            other => panic!("expected error, got {:?}", other),
        }
        match next_event(&mut events).await {
            TransmitEvent::Exit(code) => assert_eq!(code, 1),
            other => panic!("expected exit, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut events).await,
            TransmitEvent::Restarting(RestartReason::Error)
        ));
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Stopped));

        // After the backoff the stored packet is pushed to the new worker
        // before its start is reported.
        match next_event(&mut events).await {
            TransmitEvent::Started { has_packet } => assert!(has_packet),
            other => panic!("expected started, got {:?}", other),
        }
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_heartbeats_keep_the_watchdog_fed() {
        let config = SupervisorConfig {
            interval_ms: 20,
            watchdog_timeout_ms: 100,
            ..test_config()
        };
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(config, io).unwrap();
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Started { .. }));

        // Idle reports outpace the 100 ms watchdog; nothing else happens.
        let quiet = timeout(Duration::from_millis(400), events.recv()).await;
        assert!(quiet.is_err(), "unexpected event: {:?}", quiet);
        assert_eq!(supervisor.state().await, SupervisorState::Running);
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_while_stopped_is_stored_for_the_next_start() {
        let io = RecordingTransmit::spawn();
        let (supervisor, mut events) = TransmitSupervisor::spawn(test_config(), io).unwrap();
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Started { .. }));

        supervisor.stop().await;
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Stopped));

        supervisor.update(vec![0x99u8; 48]);
        assert!(matches!(next_event(&mut events).await, TransmitEvent::Updated(_)));

        supervisor.start();
        match next_event(&mut events).await {
            TransmitEvent::Started { has_packet } => assert!(has_packet),
            other => panic!("expected started, got {:?}", other),
        }
        match next_event(&mut events).await {
            TransmitEvent::Data { packet, .. } => assert_eq!(packet.len(), 48),
            other => panic!("expected data, got {:?}", other),
        }
        supervisor.shutdown().await;
    }
}
