//! RS-485 serial transport
//!
//! The serial port is blocking, so reads happen on a dedicated OS thread and
//! writes go through a cloned handle on tokio's blocking pool.

use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, error, info, warn};

use super::{Destination, FrameAssembler, FrameSink, Transport, TransportKind, deliver};
use crate::config::Rs485Config;
use crate::error::{TransportError, TransportResult};

/// Short read timeout so the reader notices the stop flag promptly
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// A serial device the host exposes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialPortEntry {
    pub path: String,
    /// `usb`, `pci`, `bluetooth` or `unknown`
    pub kind: &'static str,
    pub description: Option<String>,
}

impl SerialPortEntry {
    fn from_info(info: serialport::SerialPortInfo) -> Self {
        let (kind, description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let label = match (usb.manufacturer, usb.product) {
                    (Some(m), Some(p)) => format!("{m} {p}"),
                    (Some(name), None) | (None, Some(name)) => name,
                    (None, None) => String::new(),
                };
                let ids = format!("{:04x}:{:04x}", usb.vid, usb.pid);
                let description = if label.is_empty() {
                    ids
                } else {
                    format!("{label} ({ids})")
                };
                ("usb", Some(description))
            }
            SerialPortType::PciPort => ("pci", None),
            SerialPortType::BluetoothPort => ("bluetooth", None),
            SerialPortType::Unknown => ("unknown", None),
        };

        Self {
            path: info.port_name,
            kind,
            description,
        }
    }
}

/// Serial ports available for an RS-485 adapter, sorted by path
pub fn available_ports() -> TransportResult<Vec<SerialPortEntry>> {
    let mut ports: Vec<SerialPortEntry> = serialport::available_ports()
        .map_err(TransportError::PortScan)?
        .into_iter()
        .map(SerialPortEntry::from_info)
        .collect();
    ports.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ports)
}

struct SerialSession {
    writer: Arc<Mutex<Box<dyn SerialPort>>>,
    stop: Arc<AtomicBool>,
    reader: thread::JoinHandle<()>,
}

pub struct Rs485Transport {
    config: Rs485Config,
    session: Mutex<Option<SerialSession>>,
}

impl Rs485Transport {
    pub fn new(config: Rs485Config) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Rs485Config {
        &self.config
    }

    fn open(&self) -> TransportResult<Box<dyn SerialPort>> {
        serialport::new(&self.config.path, self.config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|source| self.serial_error(source))
    }

    fn serial_error(&self, source: serialport::Error) -> TransportError {
        TransportError::Serial {
            path: self.config.path.clone(),
            source,
        }
    }
}

fn read_loop(mut port: Box<dyn SerialPort>, sink: FrameSink, stop: Arc<AtomicBool>) {
    let mut assembler = FrameAssembler::default();
    let mut buf = [0u8; 256];

    while !stop.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(n) => {
                assembler.push(&buf[..n]);
                while let Some(frame) = assembler.next_frame() {
                    deliver(&frame, TransportKind::Rs485, None, &sink);
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => continue,
            Err(e) => {
                warn!(error = %e, "RS-485 read failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    debug!(discarded = assembler.discarded(), "RS-485 reader stopped");
}

#[async_trait]
impl Transport for Rs485Transport {
    fn kind(&self) -> TransportKind {
        TransportKind::Rs485
    }

    async fn connect(&self, sink: FrameSink) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let reader_port = self.open()?;
        let writer = reader_port
            .try_clone()
            .map_err(|source| self.serial_error(source))?;

        let stop = Arc::new(AtomicBool::new(false));
        let reader = thread::Builder::new()
            .name("rs485-reader".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || read_loop(reader_port, sink, stop)
            })?;

        *self.session.lock() = Some(SerialSession {
            writer: Arc::new(Mutex::new(writer)),
            stop,
            reader,
        });

        info!(path = %self.config.path, baud = self.config.baud_rate, "RS-485 transport connected");
        Ok(())
    }

    async fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        session.stop.store(true, Ordering::Relaxed);
        let joined = tokio::task::spawn_blocking(move || session.reader.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            error!("RS-485 reader thread panicked");
        }
        info!(path = %self.config.path, "RS-485 transport disconnected");
    }

    /// The bus is shared, so every destination is the whole bus
    async fn send(&self, frame: &[u8], _destination: Destination) -> TransportResult<()> {
        let writer = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.writer))
            .ok_or(TransportError::NotConnected(TransportKind::Rs485))?;

        let data = frame.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut port = writer.lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(std::io::Error::other)??;

        debug!(bytes = frame.len(), "RS-485 frame sent");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }
}
