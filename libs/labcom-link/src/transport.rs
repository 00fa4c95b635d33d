//! Instrument Transport
//!
//! A single byte-stream type over the physical links instruments use:
//! RS-232/RS-485 serial ports, TCP in client or server role, and an
//! in-process virtual port for deterministic tests. Protocol drivers see
//! only `AsyncRead + AsyncWrite`; which wire the bytes travel is decided
//! by configuration alone.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{self, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, warn};

use crate::config::{Parity, SerialConfig, StopBits, TcpConfig, TcpMode, TransportConfig};
use crate::error::{LinkError, Result};

/// Capacity of the in-memory pipe backing virtual transports
const VIRTUAL_PIPE_CAPACITY: usize = 64 * 1024;

/// An open instrument link
#[derive(Debug)]
pub enum Transport {
    /// Serial port (RS-232 or RS-485)
    Serial(SerialStream),
    /// TCP socket, either role
    Tcp(TcpStream),
    /// In-process loopback endpoint
    Virtual(DuplexStream),
}

impl Transport {
    /// Open a transport from configuration.
    ///
    /// Serial settings the host stack cannot provide (mark/space parity,
    /// 1.5 stop bits) fail here with a configuration error. In TCP server
    /// mode this binds and waits for exactly one inbound peer.
    pub async fn open(config: &TransportConfig) -> Result<Self> {
        match config {
            TransportConfig::Serial(serial) => Self::open_serial(serial).await,
            TransportConfig::Tcp(tcp) => Self::open_tcp(tcp).await,
            TransportConfig::Virtual => Err(LinkError::config(
                "virtual transports are created in pairs, use Transport::virtual_pair()",
            )),
        }
    }

    async fn open_serial(config: &SerialConfig) -> Result<Self> {
        debug!("Serial opening: {} @{}baud", config.path, config.baud_rate);

        let parity = match config.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(LinkError::config(format!(
                    "parity {:?} is not supported by the host serial stack",
                    config.parity
                )));
            },
        };

        let stop_bits = match config.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
            StopBits::OneAndHalf => {
                return Err(LinkError::config(
                    "1.5 stop bits are not supported by the host serial stack",
                ));
            },
        };

        let data_bits = match config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            8 => tokio_serial::DataBits::Eight,
            other => {
                return Err(LinkError::config(format!("invalid data bits: {other}")));
            },
        };

        // Hardware flow control wins when both are configured
        let flow_control = if config.rts_cts {
            tokio_serial::FlowControl::Hardware
        } else if config.xon_xoff {
            tokio_serial::FlowControl::Software
        } else {
            tokio_serial::FlowControl::None
        };

        match tokio_serial::new(&config.path, config.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow_control)
            .open_native_async()
        {
            Ok(port) => {
                info!("Serial opened: {}", config.path);
                Ok(Transport::Serial(port))
            },
            Err(e) => {
                error!("Serial err: {} - {}", config.path, e);
                Err(LinkError::Connection(format!(
                    "Failed to open serial port {}: {e}",
                    config.path
                )))
            },
        }
    }

    async fn open_tcp(config: &TcpConfig) -> Result<Self> {
        match config.mode {
            TcpMode::Client => {
                let host = config.host.as_deref().ok_or_else(|| {
                    LinkError::config("TCP client mode requires a host")
                })?;
                let addr = format!("{host}:{}", config.port);
                debug!("TCP connecting: {}", addr);

                let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
                match timeout(connect_timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!("TCP_NODELAY: {}", e);
                        }
                        info!("TCP connected: {}", addr);
                        Ok(Transport::Tcp(stream))
                    },
                    Ok(Err(e)) => {
                        error!("TCP err: {} - {}", addr, e);
                        Err(LinkError::Connection(format!(
                            "Failed to connect to {addr}: {e}"
                        )))
                    },
                    Err(_) => {
                        warn!("TCP timeout: {}", addr);
                        Err(LinkError::Timeout(format!("Connection to {addr} timed out")))
                    },
                }
            },
            TcpMode::Server => {
                let bind_addr = format!(
                    "{}:{}",
                    config.host.as_deref().unwrap_or("0.0.0.0"),
                    config.port
                );
                debug!("TCP listening: {}", bind_addr);

                let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
                    LinkError::Connection(format!("Failed to bind {bind_addr}: {e}"))
                })?;

                // One instrument per link: accept a single peer and drop the listener
                let (stream, peer) = listener.accept().await.map_err(|e| {
                    LinkError::Connection(format!("Accept failed on {bind_addr}: {e}"))
                })?;
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP accepted: {} <- {}", bind_addr, peer);
                Ok(Transport::Tcp(stream))
            },
        }
    }

    /// Create a connected pair of in-process endpoints.
    ///
    /// The first half is the engine-side `Transport`; the second plays the
    /// instrument in tests.
    pub fn virtual_pair() -> (Self, DuplexStream) {
        let (local, remote) = io::duplex(VIRTUAL_PIPE_CAPACITY);
        (Transport::Virtual(local), remote)
    }
}

impl AsyncRead for Transport {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Serial(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            Transport::Virtual(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Transport::Serial(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            Transport::Virtual(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Serial(s) => Pin::new(s).poll_flush(cx),
            Transport::Tcp(s) => Pin::new(s).poll_flush(cx),
            Transport::Virtual(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Transport::Serial(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            Transport::Virtual(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_virtual_pair_roundtrip() {
        let (mut transport, mut remote) = Transport::virtual_pair();

        remote.write_all(b"\x05").await.unwrap();
        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x05");

        transport.write_all(b"\x06").await.unwrap();
        let n = remote.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"\x06");
    }

    #[tokio::test]
    async fn test_unsupported_serial_settings_rejected() {
        let mut cfg = SerialConfig {
            path: "/dev/null".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: StopBits::One,
            parity: Parity::Mark,
            rts_cts: false,
            xon_xoff: false,
        };
        let err = Transport::open(&TransportConfig::Serial(cfg.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));

        cfg.parity = Parity::None;
        cfg.stop_bits = StopBits::OneAndHalf;
        let err = Transport::open(&TransportConfig::Serial(cfg))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[tokio::test]
    async fn test_tcp_client_requires_host() {
        let cfg = TransportConfig::Tcp(TcpConfig {
            host: None,
            port: 4001,
            mode: TcpMode::Client,
            connect_timeout_ms: 100,
        });
        let err = Transport::open(&cfg).await.unwrap_err();
        assert!(matches!(err, LinkError::Config(_)));
    }

    #[tokio::test]
    async fn test_tcp_server_accepts_one_peer() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let cfg = TcpConfig {
            host: Some("127.0.0.1".to_string()),
            port,
            mode: TcpMode::Server,
            connect_timeout_ms: 1000,
        };
        let server = tokio::spawn(async move {
            Transport::open(&TransportConfig::Tcp(cfg)).await
        });

        // Give the listener a moment to bind before dialing in
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut peer = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let mut transport = server.await.unwrap().unwrap();

        peer.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 8];
        let n = transport.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
