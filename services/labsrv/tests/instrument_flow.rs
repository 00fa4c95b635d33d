//! End-to-end link tests: a scripted instrument on the far side of a real
//! transport, a supervisor on the near side, decoded messages coming out
//! of the event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Mutex};

use labcom_link::error::{LinkError, Result as LinkResult};
use labcom_link::{TcpConfig, TcpMode, Transport, TransportConfig};
use labcom_protocols::checksum::{checksum, ACK, CR, ENQ, EOT, ETX, LF, STX};
use labcom_protocols::driver::ProtocolKind;
use labcom_protocols::events::{DecodedMessage, LinkEvent, LinkEventKind};
use labsrv::config::InstrumentConfig;
use labsrv::runtime::supervisor::{ConnectionSupervisor, Connector, ReconnectPolicy};
use labsrv::runtime::LinkRegistry;

fn astm_frame(seq: u8, text: &[u8]) -> Vec<u8> {
    let mut frame = vec![STX, seq];
    frame.extend_from_slice(text);
    frame.push(ETX);
    let cs = checksum(&frame[1..]);
    frame.extend_from_slice(&cs);
    frame.extend_from_slice(&[CR, LF]);
    frame
}

/// Hands out one pre-made virtual transport, then reports exhaustion
struct OneShotConnector {
    transport: Mutex<Option<Transport>>,
}

impl OneShotConnector {
    fn new() -> (Arc<Self>, DuplexStream) {
        let (transport, remote) = Transport::virtual_pair();
        (
            Arc::new(Self {
                transport: Mutex::new(Some(transport)),
            }),
            remote,
        )
    }
}

#[async_trait]
impl Connector for OneShotConnector {
    async fn connect(&self) -> LinkResult<Transport> {
        self.transport
            .lock()
            .await
            .take()
            .ok_or_else(|| LinkError::connection("already consumed"))
    }
}

async fn next_message(events: &mut mpsc::Receiver<LinkEvent>) -> DecodedMessage {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let LinkEventKind::Message { message } = event.kind {
            return message;
        }
    }
}

#[tokio::test]
async fn astm_session_over_virtual_link() {
    let (connector, mut instrument) = OneShotConnector::new();
    let (tx, mut events) = mpsc::channel(64);
    let config = InstrumentConfig {
        id: "bc5380".to_string(),
        protocol: ProtocolKind::Astm,
        transport: TransportConfig::Virtual,
        modbus: None,
    };
    let sup = ConnectionSupervisor::new(&config, connector, ReconnectPolicy::default(), tx);
    sup.spawn();

    // The instrument opens a session and expects ACKs along the way
    let mut reply = [0u8; 1];
    instrument.write_all(&[ENQ]).await.unwrap();
    instrument.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], ACK);

    let frame = astm_frame(
        b'1',
        b"H|\\^&|||BC-5380\rP|1|PID77\rR|1|^^^WBC|6.5|10*9/L|4.0-10.0|N\rL|1|N",
    );
    instrument.write_all(&frame).await.unwrap();
    instrument.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[0], ACK);

    instrument.write_all(&[EOT]).await.unwrap();

    match next_message(&mut events).await {
        DecodedMessage::Astm(msg) => {
            assert_eq!(msg.patients.len(), 1);
            assert_eq!(msg.results.len(), 1);
            assert_eq!(msg.results[0].value.as_deref(), Some("6.5"));
        },
        other => panic!("unexpected message: {other:?}"),
    }

    let snapshot = sup.quality().snapshot();
    assert_eq!(snapshot.success_count, 1);
    assert_eq!(snapshot.checksum_error_count, 0);
    sup.disconnect();
}

#[tokio::test]
async fn hl7_message_over_tcp() {
    // The test plays the analyzer: it listens, labsrv dials in
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (tx, mut events) = mpsc::channel(64);
    let mut registry = LinkRegistry::new();
    registry.start(
        &InstrumentConfig {
            id: "lis-bridge".to_string(),
            protocol: ProtocolKind::Hl7,
            transport: TransportConfig::Tcp(TcpConfig {
                host: Some("127.0.0.1".to_string()),
                port,
                mode: TcpMode::Client,
                connect_timeout_ms: 2000,
            }),
            modbus: None,
        },
        tx,
    );
    assert_eq!(registry.len(), 1);

    let (mut socket, _) = listener.accept().await.unwrap();
    let mut envelope = vec![0x0B];
    envelope.extend_from_slice(
        b"MSH|^~\\&|BC-5380|Lab|LIS|Hosp|20240115||ORU^R01|42|P|2.3.1\rOBX|1|NM|PLT||250|10*9/L|150-400|N",
    );
    envelope.extend_from_slice(&[0x1C, 0x0D]);
    socket.write_all(&envelope).await.unwrap();

    // First event is the connection itself
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match event.kind {
            LinkEventKind::Connected => continue,
            LinkEventKind::Message { message } => {
                match message {
                    DecodedMessage::Hl7(msg) => {
                        assert_eq!(msg.msh.message_control_id.as_deref(), Some("42"));
                        assert_eq!(msg.obx.len(), 1);
                        assert_eq!(msg.obx[0].value.as_deref(), Some("250"));
                    },
                    other => panic!("unexpected message: {other:?}"),
                }
                break;
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    registry.shutdown().await;
}
