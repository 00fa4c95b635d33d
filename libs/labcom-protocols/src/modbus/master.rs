//! Modbus RTU Master
//!
//! Request/response correlation and poll scheduling for a half-duplex
//! RS-485 bus. At most one request may be outstanding per `(path, slave)`
//! key; responses are matched back by slave address, CRC-checked, and
//! resolve or reject the pending entry. A response timer clears entries
//! for slaves that never answer.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use labcom_link::error::{LinkError, Result};
use labcom_link::quality::QualityCounters;

use crate::events::{EventSender, LinkEvent, LinkEventKind};
use crate::modbus::codec::{self, ModbusRequest, ModbusResponse};
use crate::modbus::crc;

/// Receive buffer cap. RTU frames top out at 256 bytes; anything beyond
/// this is a stream that lost its framing entirely.
const RX_BUFFER_CAP: usize = 4096;

fn default_response_timeout_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Master tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct ModbusMasterConfig {
    /// How long to wait for a slave before rejecting the request
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    /// Half-duplex transmit-enable settling delay applied before each write
    #[serde(default)]
    pub tx_enable_delay_ms: Option<u64>,
    /// Poll scheduler tick
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ModbusMasterConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            tx_enable_delay_ms: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Correlation key for pending requests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ModbusKey {
    path: String,
    slave: u8,
}

/// One poll-rotation target
#[derive(Debug, Clone, Deserialize)]
pub struct PollTarget {
    pub slave: u8,
    /// Register window read on this slave's turn
    pub address: u16,
    pub count: u16,
}

/// RTU master for one bus connection
pub struct ModbusMaster<W> {
    instrument_id: String,
    path: String,
    config: ModbusMasterConfig,
    writer: Mutex<W>,
    pending: DashMap<ModbusKey, oneshot::Sender<Result<ModbusResponse>>>,
    rx_buffer: std::sync::Mutex<BytesMut>,
    quality: Arc<QualityCounters>,
    events: EventSender,
    poll_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl<W> ModbusMaster<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        instrument_id: impl Into<String>,
        path: impl Into<String>,
        config: ModbusMasterConfig,
        writer: W,
        quality: Arc<QualityCounters>,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            instrument_id: instrument_id.into(),
            path: path.into(),
            config,
            writer: Mutex::new(writer),
            pending: DashMap::new(),
            rx_buffer: std::sync::Mutex::new(BytesMut::with_capacity(512)),
            quality,
            events,
            poll_cancel: std::sync::Mutex::new(None),
        })
    }

    /// Number of requests currently awaiting a response
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Issue one request and await its response.
    ///
    /// Rejects immediately when a request for the same `(path, slave)` key
    /// is already outstanding, and with a timeout error when the slave
    /// stays silent past the configured response timeout. Either way the
    /// pending entry is gone afterwards.
    pub async fn send_request(
        &self,
        slave: u8,
        request: ModbusRequest,
    ) -> Result<ModbusResponse> {
        let frame = codec::encode_request(slave, &request)?;
        let key = ModbusKey {
            path: self.path.clone(),
            slave,
        };

        let rx = {
            let (tx, rx) = oneshot::channel();
            match self.pending.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(LinkError::busy(format!(
                        "request already outstanding for {}#{slave}",
                        self.path
                    )));
                },
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    entry.insert(tx);
                },
            }
            rx
        };

        // RS-485 direction turnaround before driving the bus
        if let Some(delay_ms) = self.config.tx_enable_delay_ms {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        if let Err(e) = self.write_frame(&frame).await {
            self.pending.remove(&key);
            self.quality.record_failure();
            return Err(e);
        }
        trace!("Modbus TX {}#{}: {}B", self.path, slave, frame.len());

        let response_timeout = Duration::from_millis(self.config.response_timeout_ms);
        match timeout(response_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                // Sender dropped without a reply: the connection went away
                Err(LinkError::connection("request cancelled by disconnect"))
            },
            Err(_) => {
                self.pending.remove(&key);
                // A late or partial response to this request must not
                // satisfy the next one
                self.clear_rx_buffer();
                self.quality.record_failure();
                Err(LinkError::timeout(format!(
                    "no response from {}#{slave} within {}ms",
                    self.path, self.config.response_timeout_ms
                )))
            },
        }
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Feed bytes read off the bus. Complete frames resolve their pending
    /// request; corrupt frames reject it with a checksum error. Bytes that
    /// cannot start a response are discarded one at a time, so a noise
    /// burst never wedges the stream.
    pub fn handle_incoming(&self, chunk: &[u8]) {
        let frames = {
            let mut buffer = match self.rx_buffer.lock() {
                Ok(b) => b,
                Err(poisoned) => poisoned.into_inner(),
            };
            buffer.extend_from_slice(chunk);

            if buffer.len() > RX_BUFFER_CAP {
                let len = buffer.len();
                buffer.clear();
                warn!("Modbus rx overflow on {}, {}B discarded", self.path, len);
                self.quality.record_failure();
                return;
            }

            let mut frames = Vec::new();
            loop {
                if buffer.len() < 2 {
                    break;
                }
                if !codec::known_function(buffer[1]) {
                    buffer.advance(1);
                    continue;
                }
                let Some(len) = codec::expected_response_len(&buffer) else {
                    break;
                };
                if buffer.len() < len {
                    break;
                }
                // A CRC-failing candidate that answers nobody is
                // misalignment, not a response: shift one byte and rescan
                if crc::verify(&buffer[..len]) || self.has_pending(buffer[0]) {
                    frames.push(buffer[..len].to_vec());
                    buffer.advance(len);
                } else {
                    buffer.advance(1);
                }
            }
            frames
        };

        for frame in frames {
            self.resolve_frame(&frame);
        }
    }

    fn has_pending(&self, slave: u8) -> bool {
        self.pending.contains_key(&ModbusKey {
            path: self.path.clone(),
            slave,
        })
    }

    fn clear_rx_buffer(&self) {
        match self.rx_buffer.lock() {
            Ok(mut b) => b.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn resolve_frame(&self, frame: &[u8]) {
        let slave = frame[0];
        let key = ModbusKey {
            path: self.path.clone(),
            slave,
        };
        let Some((_, tx)) = self.pending.remove(&key) else {
            warn!("Unsolicited Modbus frame from {}#{}", self.path, slave);
            return;
        };

        let result = codec::decode_response(frame);
        match &result {
            Ok(_) => self.quality.record_success(),
            Err(LinkError::Checksum(_)) => self.quality.record_checksum_error(),
            Err(_) => self.quality.record_failure(),
        }
        // Receiver may have timed out in the same instant; nothing to do then
        let _ = tx.send(result);
    }

    /// Round-robin the poll targets, one request per tick. The index
    /// advances whether or not the slave answered, so a dead device never
    /// starves the rest of the bus.
    pub fn start_polling(self: &Arc<Self>, targets: Vec<PollTarget>) {
        if targets.is_empty() {
            return;
        }
        let cancel = CancellationToken::new();
        {
            let mut slot = match self.poll_cancel.lock() {
                Ok(s) => s,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(previous) = slot.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let master = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_millis(master.config.poll_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Polling stopped: {}", master.path);
                        return;
                    },
                    _ = interval.tick() => {},
                }

                let target = &targets[index];
                index = (index + 1) % targets.len();

                let request = ModbusRequest::ReadHoldingRegisters {
                    address: target.address,
                    count: target.count,
                };
                let kind = match master.send_request(target.slave, request).await {
                    Ok(resp) => LinkEventKind::PollResponse {
                        slave: target.slave,
                        payload: resp.payload,
                    },
                    Err(e) => LinkEventKind::PollError {
                        slave: target.slave,
                        detail: e.to_string(),
                    },
                };
                let event = LinkEvent::new(master.instrument_id.clone(), kind);
                if master.events.send(event).await.is_err() {
                    debug!("Event channel closed, polling stopped: {}", master.path);
                    return;
                }
            }
        });
    }

    /// Cancel the poll rotation, if one is running
    pub fn stop_polling(&self) {
        let mut slot = match self.poll_cancel.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(cancel) = slot.take() {
            cancel.cancel();
        }
    }

    /// Tear down for disconnect: stop polling and reject every pending
    /// request instead of leaving callers to hang.
    pub fn shutdown(&self) {
        self.stop_polling();
        self.pending.clear();
        self.clear_rx_buffer();
    }
}

// ============================================================================
// Tests
// ============================================================================
