//! OBD-II Client for ELM327 Adapters
//!
//! Provides async serial communication with ELM327-compatible adapters over
//! `tokio-serial`.

use crate::command::CommandDescriptor;
use crate::error::ObdError;
use crate::mode;
use crate::pid;
use crate::protocol::ObdProtocol;
use crate::transport::{ObdConnector, ObdTransport, QueryResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, warn};

/// Default timeout for OBD commands
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default serial speed for ELM327 clones
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// Prompt the ELM327 prints when it is ready for the next command
const PROMPT: u8 = b'>';

/// Replies that mean the adapter or bus rejected a request
const ERROR_MARKERS: &[&str] = &[
    "?",
    "ERROR",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS BUSY",
    "BUS ERROR",
    "FB ERROR",
    "DATA ERROR",
    "BUFFER FULL",
];

/// Serial settings for opening an ELM327 adapter
#[derive(Debug, Clone)]
pub struct Elm327Config {
    pub baud_rate: u32,
    pub timeout: Duration,
    pub protocol: ObdProtocol,
}

impl Default for Elm327Config {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            protocol: ObdProtocol::Auto,
        }
    }
}

/// Opens [`ObdClient`] connections on a serial port
#[derive(Debug, Clone, Default)]
pub struct Elm327Connector {
    config: Elm327Config,
}

impl Elm327Connector {
    pub fn new(config: Elm327Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ObdConnector for Elm327Connector {
    async fn connect(&self, port_hint: Option<&str>) -> Result<Box<dyn ObdTransport>, ObdError> {
        let device = match port_hint {
            Some(device) => device.to_string(),
            None => detect_port()?,
        };

        let mut client = ObdClient::open(&device, &self.config)?;
        if let Err(e) = client.initialize().await {
            client.close().await;
            return Err(e);
        }
        Ok(Box::new(client))
    }
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient {
    /// Serial port device path (e.g., "/dev/ttyUSB0" or "COM3")
    device: String,
    /// Open serial stream; `None` once closed
    port: Option<SerialStream>,
    /// Requested OBD protocol
    protocol: ObdProtocol,
    /// Protocol the adapter settled on, from `ATDPN`
    negotiated: Option<ObdProtocol>,
    /// Command timeout
    timeout: Duration,
    /// Whether the client is connected
    connected: bool,
    /// A timed-out request whose reply may still arrive
    reply_owed: bool,
}

impl ObdClient {
    /// Open the serial port. The adapter is not usable until
    /// [`initialize`](Self::initialize) succeeds.
    pub fn open(device: &str, config: &Elm327Config) -> Result<Self, ObdError> {
        info!(device, baud_rate = config.baud_rate, "Opening OBD adapter");

        let port = tokio_serial::new(device, config.baud_rate)
            .timeout(config.timeout)
            .open_native_async()?;

        Ok(Self {
            device: device.to_string(),
            port: Some(port),
            protocol: config.protocol,
            negotiated: None,
            timeout: config.timeout,
            connected: false,
            reply_owed: false,
        })
    }

    /// Initialize the ELM327 adapter and check that the vehicle answers
    pub async fn initialize(&mut self) -> Result<(), ObdError> {
        info!("Initializing OBD adapter on {}", self.device);

        // Reset can take a second on cheap clones
        self.send_command_with_timeout("ATZ", self.timeout * 2).await?;
        for setup in ["ATE0", "ATL0", "ATS0", "ATH0"] {
            let reply = self.send_command(setup).await?;
            if !reply.contains("OK") {
                warn!(command = setup, reply = %reply, "Unexpected setup reply");
            }
        }
        let select_protocol = self.protocol.to_elm_command();
        self.send_command(&select_protocol).await?;

        // Protocol search happens on the first real request
        let probe = self
            .send_command_with_timeout("0100", self.timeout * 3)
            .await?;
        match parse_response(mode::CURRENT_DATA, 0x00, &probe) {
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => {
                warn!(reply = %probe, "Vehicle did not answer PID support request");
                return Err(ObdError::VehicleNotConnected);
            }
        }

        if let Ok(reply) = self.send_command("ATDPN").await {
            self.negotiated = ObdProtocol::from_elm_reply(&reply);
        }

        self.connected = true;
        info!(
            device = %self.device,
            protocol = self.negotiated.map(|p| p.name()).unwrap_or("unknown"),
            "OBD adapter initialized successfully"
        );
        Ok(())
    }

    /// Send one command and return the reply text without the prompt
    async fn send_command(&mut self, command: &str) -> Result<String, ObdError> {
        let timeout = self.timeout;
        self.send_command_with_timeout(command, timeout).await
    }

    async fn send_command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ObdError> {
        let port = self.port.as_mut().ok_or(ObdError::ConnectionClosed)?;
        exchange(port, &mut self.reply_owed, command, timeout).await
    }
}

#[async_trait]
impl ObdTransport for ObdClient {
    fn is_connected(&self) -> bool {
        self.connected && self.port.is_some()
    }

    async fn query(&mut self, command: &CommandDescriptor) -> QueryResult {
        if !self.connected {
            return Err(ObdError::AdapterNotResponding);
        }
        let (Some(pid), Some(request)) = (command.pid(), command.request()) else {
            return Ok(None);
        };

        let raw = match self.send_command(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.is_fatal() {
                    warn!(error = %e, "Serial link lost");
                    self.connected = false;
                }
                return Err(e);
            }
        };

        let bytes = parse_response(command.mode(), pid, &raw)?;
        if command.mode() != mode::CURRENT_DATA {
            return Ok(None);
        }
        Ok(bytes.and_then(|b| pid::decode(pid, &b)))
    }

    async fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            info!("Disconnecting OBD client on {}", self.device);
            // Best effort: return the adapter to its low-power idle state
            let _ = port.write_all(b"ATPC\r").await;
        }
        self.connected = false;
    }

    fn port_name(&self) -> &str {
        &self.device
    }

    fn protocol_name(&self) -> Option<&str> {
        self.negotiated.map(|p| p.name())
    }
}

/// Send `command` and read its reply up to the prompt.
///
/// A reply owed by an earlier timed-out request is drained first, so every
/// request reads its own reply. An adapter that stays silent through the
/// drain is reported as not responding.
async fn exchange<S>(
    port: &mut S,
    reply_owed: &mut bool,
    command: &str,
    timeout: Duration,
) -> Result<String, ObdError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if *reply_owed {
        match tokio::time::timeout(timeout, read_until_prompt(port)).await {
            Ok(stale) => {
                let stale = stale?;
                debug!(reply = %stale.trim(), "Discarded late adapter reply");
                *reply_owed = false;
            }
            Err(_) => {
                warn!("Adapter silent after timed-out request");
                return Err(ObdError::AdapterNotResponding);
            }
        }
    }

    debug!(command, "-> adapter");
    port.write_all(format!("{command}\r").as_bytes()).await?;
    port.flush().await?;

    match tokio::time::timeout(timeout, read_until_prompt(port)).await {
        Ok(raw) => {
            let raw = raw?;
            debug!(command, reply = %raw.trim(), "<- adapter");
            Ok(raw)
        }
        Err(_) => {
            *reply_owed = true;
            Err(ObdError::Timeout(timeout.as_millis() as u64))
        }
    }
}

async fn read_until_prompt<R>(port: &mut R) -> Result<String, ObdError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 64];
    loop {
        let n = port.read(&mut chunk).await?;
        if n == 0 {
            return Err(ObdError::ConnectionClosed);
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.contains(&PROMPT) {
            break;
        }
    }
    let text = String::from_utf8_lossy(&buf);
    Ok(text.replace(PROMPT as char, ""))
}

/// Extract the data bytes of a positive response to `mode`/`pid`.
///
/// `Ok(None)` for "NO DATA"-style replies, `Err` for adapter or bus errors.
pub fn parse_response(mode: u8, pid: u8, raw: &str) -> Result<Option<Vec<u8>>, ObdError> {
    let request = format!("{mode:02X}{pid:02X}");
    let lines: Vec<String> = raw
        .split(['\r', '\n'])
        .map(|line| line.trim().to_ascii_uppercase())
        .filter(|line| !line.is_empty() && !line.starts_with("SEARCHING"))
        .collect();

    if lines.iter().any(|l| l.contains("NO DATA") || l == "STOPPED") {
        return Ok(None);
    }
    if let Some(line) = lines
        .iter()
        .find(|l| ERROR_MARKERS.iter().any(|m| l.contains(m)))
    {
        return Err(ObdError::AdapterError {
            command: request,
            message: line.clone(),
        });
    }

    let header = format!("{:02X}{pid:02X}", mode.wrapping_add(0x40));
    for line in &lines {
        let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(data) = compact.strip_prefix(&header) {
            return decode_hex(data).map(Some);
        }
    }

    Err(ObdError::InvalidResponse(format!(
        "no {header} frame in reply {:?}",
        lines.join(" ")
    )))
}

fn decode_hex(data: &str) -> Result<Vec<u8>, ObdError> {
    if !data.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ObdError::InvalidResponse(format!("bad hex: {data:?}")));
    }
    if data.len() % 2 != 0 {
        return Err(ObdError::InvalidResponse(format!("odd hex length: {data}")));
    }
    data.as_bytes()
        .chunks(2)
        .map(|pair| {
            let digits = std::str::from_utf8(pair)
                .map_err(|_| ObdError::InvalidResponse(format!("bad hex: {data:?}")))?;
            u8::from_str_radix(digits, 16)
                .map_err(|_| ObdError::InvalidResponse(format!("bad hex: {data:?}")))
        })
        .collect()
}

/// Preference for a serial device as an OBD adapter; lower is better
fn rank_port(name: &str, is_usb: bool) -> Option<u8> {
    if name.contains("ttyUSB") {
        Some(0)
    } else if name.contains("ttyACM") {
        Some(1)
    } else if name.contains("rfcomm") {
        Some(2)
    } else if is_usb {
        Some(3)
    } else {
        None
    }
}

/// Pick the most likely adapter among the system's serial ports
pub fn detect_port() -> Result<String, ObdError> {
    let ports = tokio_serial::available_ports()?;
    let best = ports
        .iter()
        .filter_map(|info| {
            let is_usb = matches!(info.port_type, SerialPortType::UsbPort(_));
            rank_port(&info.port_name, is_usb).map(|rank| (rank, info.port_name.clone()))
        })
        .min();

    match best {
        Some((_, name)) => {
            info!(port = %name, "Auto-detected OBD adapter port");
            Ok(name)
        }
        None => Err(ObdError::NoAdapterFound),
    }
}
