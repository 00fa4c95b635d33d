//! Connection Supervision
//!
//! One supervisor per instrument link. It opens the transport, runs the
//! protocol driver over it, and when the link drops without an explicit
//! `disconnect()` it schedules reconnection: 5 s after an established
//! connection is lost, then 10 s after every failed open, until the link
//! comes back or someone disconnects. `disconnect()` cancels pending
//! timers and polling synchronously through a CancellationToken, so
//! nothing fires afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use labcom_link::error::Result as LinkResult;
use labcom_link::quality::QualityCounters;
use labcom_link::transport::Transport;
use labcom_link::TransportConfig;
use labcom_protocols::driver::{ProtocolDriver, ProtocolKind};
use labcom_protocols::events::{EventSender, LinkEvent, LinkEventKind};
use labcom_protocols::modbus::ModbusMaster;

use crate::config::{InstrumentConfig, ModbusSection};

/// Reconnection schedule
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before reconnecting after an established link dropped
    pub initial_delay: Duration,
    /// Delay between failed open attempts
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(5000),
            retry_delay: Duration::from_millis(10_000),
        }
    }
}

/// How a served connection ended
enum Closed {
    /// `disconnect()` was called
    Intentional,
    /// Peer closed or transport faulted
    Unintentional(String),
}

/// Seam between the supervisor and the concrete transport, so tests can
/// hand in scripted links.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> LinkResult<Transport>;
}

/// Production connector: opens whatever the configuration names
pub struct TransportConnector {
    config: TransportConfig,
}

impl TransportConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self) -> LinkResult<Transport> {
        Transport::open(&self.config).await
    }
}

/// Supervises one instrument link for the life of the process
pub struct ConnectionSupervisor {
    instrument_id: String,
    protocol: ProtocolKind,
    endpoint: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    modbus: Option<ModbusSection>,
    events: EventSender,
    quality: Arc<QualityCounters>,
    cancel: CancellationToken,
}

impl ConnectionSupervisor {
    pub fn new(
        config: &InstrumentConfig,
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            instrument_id: config.id.clone(),
            protocol: config.protocol,
            endpoint: config.transport.endpoint(),
            connector,
            policy,
            modbus: config.modbus.clone(),
            events,
            quality: Arc::new(QualityCounters::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// Counters for the monitoring collaborator
    pub fn quality(&self) -> Arc<QualityCounters> {
        Arc::clone(&self.quality)
    }

    /// Tear the link down and suppress any further reconnection. Pending
    /// timers, polling and outstanding Modbus requests are cancelled
    /// before this returns.
    pub fn disconnect(&self) {
        info!("Disconnect: {}", self.instrument_id);
        self.cancel.cancel();
    }

    /// Run the supervision loop until `disconnect()`.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let sup = Arc::clone(self);
        tokio::spawn(async move { sup.run().await })
    }

    async fn run(&self) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect() => result,
            };

            match connected {
                Ok(transport) => {
                    info!("Connected: {} ({})", self.instrument_id, self.endpoint);
                    self.emit(LinkEventKind::Connected).await;

                    let closed = self.serve(transport).await;
                    // A fault gets its own event before the lifecycle change
                    if let Closed::Unintentional(reason) = &closed {
                        self.emit(LinkEventKind::Error {
                            detail: reason.clone(),
                        })
                        .await;
                    }
                    self.emit(LinkEventKind::Disconnected).await;

                    match closed {
                        Closed::Intentional => return,
                        Closed::Unintentional(reason) => {
                            warn!(
                                "Link lost: {} ({}), reconnecting in {:?}",
                                self.instrument_id, reason, self.policy.initial_delay
                            );
                            if !self.sleep(self.policy.initial_delay).await {
                                return;
                            }
                        },
                    }
                },
                Err(e) => {
                    warn!(
                        "Open failed: {} ({}), retrying in {:?}",
                        self.instrument_id, e, self.policy.retry_delay
                    );
                    self.emit(LinkEventKind::Error {
                        detail: e.to_string(),
                    })
                    .await;
                    if !self.sleep(self.policy.retry_delay).await {
                        return;
                    }
                },
            }
        }
    }

    /// Cancellable reconnect delay; false means disconnect won
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn serve(&self, transport: Transport) -> Closed {
        match self.protocol {
            ProtocolKind::Modbus => self.serve_modbus(transport).await,
            _ => self.serve_stream(transport).await,
        }
    }

    /// Drive an ASTM or HL7 connection: read, decode, answer, publish.
    async fn serve_stream(&self, transport: Transport) -> Closed {
        let (mut reader, mut writer) = tokio::io::split(transport);
        let Some(mut driver) = ProtocolDriver::new(self.protocol, Arc::clone(&self.quality))
        else {
            // Unreachable by construction; serve_modbus owns that branch
            return Closed::Unintentional("no stream driver for protocol".to_string());
        };

        let mut buf = [0u8; 4096];
        loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => return Closed::Intentional,
                r = reader.read(&mut buf) => r,
            };

            let n = match read {
                Ok(0) => return Closed::Unintentional("closed by peer".to_string()),
                Ok(n) => n,
                Err(e) => return Closed::Unintentional(e.to_string()),
            };

            match driver.process(&buf[..n]) {
                Ok(output) => {
                    if !output.reply.is_empty() {
                        if let Err(e) = writer.write_all(&output.reply).await {
                            return Closed::Unintentional(e.to_string());
                        }
                        if let Err(e) = writer.flush().await {
                            return Closed::Unintentional(e.to_string());
                        }
                    }
                    for kind in output.events {
                        self.emit(kind).await;
                    }
                },
                Err(e) => {
                    // Decoder gave up on the buffered input (e.g. overflow);
                    // the link itself is still up
                    warn!("Decode fault on {}: {}", self.instrument_id, e);
                    self.quality.record_failure();
                    self.emit(LinkEventKind::Error {
                        detail: e.to_string(),
                    })
                    .await;
                },
            }
        }
    }

    /// Drive a Modbus bus: the master owns the write half and the poll
    /// rotation, this loop feeds it whatever the bus answers.
    async fn serve_modbus(&self, transport: Transport) -> Closed {
        let Some(section) = self.modbus.clone() else {
            return Closed::Unintentional("modbus instrument without modbus settings".to_string());
        };

        let (mut reader, writer) = tokio::io::split(transport);
        let master = ModbusMaster::new(
            self.instrument_id.clone(),
            self.endpoint.clone(),
            section.master,
            writer,
            Arc::clone(&self.quality),
            self.events.clone(),
        );
        master.start_polling(section.poll);

        let mut buf = [0u8; 512];
        let closed = loop {
            let read = tokio::select! {
                _ = self.cancel.cancelled() => break Closed::Intentional,
                r = reader.read(&mut buf) => r,
            };
            match read {
                Ok(0) => break Closed::Unintentional("closed by peer".to_string()),
                Ok(n) => master.handle_incoming(&buf[..n]),
                Err(e) => break Closed::Unintentional(e.to_string()),
            }
        };

        // Stop polling and reject outstanding requests before the write
        // half is dropped
        master.shutdown();
        closed
    }

    async fn emit(&self, kind: LinkEventKind) {
        let event = LinkEvent::new(self.instrument_id.clone(), kind);
        if self.events.send(event).await.is_err() {
            debug!("Event channel closed: {}", self.instrument_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use labcom_link::error::LinkError;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    /// Scripted connector: records when each attempt happened and either
    /// fails or yields a transport whose peer hangs up immediately.
    struct MockConnector {
        attempts: std::sync::Mutex<Vec<Instant>>,
        succeed: bool,
    }

    impl MockConnector {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                attempts: std::sync::Mutex::new(Vec::new()),
                succeed,
            })
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> LinkResult<Transport> {
            self.attempts.lock().unwrap().push(Instant::now());
            if self.succeed {
                // Dropping the remote half makes the served connection
                // see EOF on its first read
                let (transport, _remote) = Transport::virtual_pair();
                Ok(transport)
            } else {
                Err(LinkError::connection("nothing listening"))
            }
        }
    }

    fn instrument() -> InstrumentConfig {
        InstrumentConfig {
            id: "analyzer1".to_string(),
            protocol: ProtocolKind::Astm,
            transport: TransportConfig::Virtual,
            modbus: None,
        }
    }

    fn supervisor(
        connector: Arc<dyn Connector>,
    ) -> (Arc<ConnectionSupervisor>, mpsc::Receiver<LinkEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let sup = ConnectionSupervisor::new(
            &instrument(),
            connector,
            ReconnectPolicy::default(),
            tx,
        );
        (sup, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unintentional_close_reconnects_after_5s() {
        let connector = MockConnector::new(true);
        let (sup, mut events) = supervisor(connector.clone());
        sup.spawn();

        // Wait for the second connection attempt to land
        loop {
            let event = events.recv().await.unwrap();
            if connector.attempt_times().len() >= 2
                && matches!(event.kind, LinkEventKind::Connected)
            {
                break;
            }
        }

        let times = connector.attempt_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(5000));
        sup.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_retries_after_10s() {
        let connector = MockConnector::new(false);
        let (sup, mut events) = supervisor(connector.clone());
        sup.spawn();

        // Each failed attempt publishes one error event
        let first = events.recv().await.unwrap();
        assert!(matches!(first.kind, LinkEventKind::Error { .. }));
        let second = events.recv().await.unwrap();
        assert!(matches!(second.kind, LinkEventKind::Error { .. }));

        let times = connector.attempt_times();
        assert_eq!(times[1] - times[0], Duration::from_millis(10_000));
        sup.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suppresses_reconnect() {
        let connector = MockConnector::new(true);
        let (sup, mut events) = supervisor(connector.clone());
        let handle = sup.spawn();

        // First connection comes up and drops
        let event = events.recv().await.unwrap();
        assert!(matches!(event.kind, LinkEventKind::Connected));
        let event = events.recv().await.unwrap();
        assert!(matches!(event.kind, LinkEventKind::Error { .. }));
        let event = events.recv().await.unwrap();
        assert!(matches!(event.kind, LinkEventKind::Disconnected));

        // Disconnect during the 5 s reconnect window
        sup.disconnect();
        handle.await.unwrap();

        // Long after the window, still exactly one attempt
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempt_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_event_order() {
        let connector = MockConnector::new(true);
        let (sup, mut events) = supervisor(connector);
        sup.spawn();

        let kinds: Vec<LinkEvent> = vec![
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ];
        assert!(matches!(kinds[0].kind, LinkEventKind::Connected));
        match &kinds[1].kind {
            LinkEventKind::Error { detail } => assert!(detail.contains("closed by peer")),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(kinds[2].kind, LinkEventKind::Disconnected));
        assert_eq!(kinds[0].instrument_id, "analyzer1");
        sup.disconnect();
    }
}
