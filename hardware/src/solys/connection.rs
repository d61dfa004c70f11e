//! Resilient TCP session with a Solys2.
//!
//! The Solys2 firmware occasionally stops answering without closing the
//! socket, and the link drops when the tracker power-cycles. [`Connection`]
//! hides both: every [`exchange`](Connection::exchange) keeps going until the
//! device produces a decodable answer, reconnecting (and re-authenticating)
//! whenever the transport fails or too many reads in a row come back empty.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::error::{SolysError, SolysResult};
use super::protocol::{decode, Command, DeviceReply};
use crate::cancel::CancelToken;

/// Default TCP port of the Solys2 command interface.
pub const DEFAULT_PORT: u16 = 15000;

/// Factory default password.
pub const DEFAULT_PASSWORD: &str = "solys";

/// Connection settings.
///
/// Every field has a default, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    /// Length of one read poll. An empty poll counts as one empty reply.
    pub read_timeout_ms: u64,
    /// Consecutive empty replies that force a reconnect.
    pub empty_reply_threshold: u32,
    /// Pause between reconnect attempts.
    pub reconnect_pause_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            password: DEFAULT_PASSWORD.to_string(),
            read_timeout_ms: 100,
            empty_reply_threshold: 100,
            reconnect_pause_ms: 1000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl ConnectionConfig {
    /// Config for `host` with every other setting at its default.
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_millis(self.reconnect_pause_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

/// Whether a [`Connection`] currently holds a live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Progress of a single [`Connection::exchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Write the command on the current session.
    Send,
    /// Poll for a reply.
    Await,
    /// Tear down and re-establish the session, then resend.
    Reconnect,
}

/// TCP session with a Solys2 that survives transport failures.
///
/// The first session is opened by [`open`](Self::open), which fails fast.
/// Later sessions are opened on demand inside [`exchange`](Self::exchange)
/// and retried until they succeed or the [`CancelToken`] is cancelled.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    empty_replies: u32,
    reconnects: u64,
    cancel: CancelToken,
}

impl Connection {
    /// Connect and handshake (`PW <password>`, then `PR 0`).
    ///
    /// # Errors
    ///
    /// Returns [`SolysError::ConnectionFailed`] if the socket cannot be opened or
    /// the device rejects the handshake.
    pub fn open(config: ConnectionConfig) -> SolysResult<Self> {
        let mut connection = Self {
            config,
            stream: None,
            buffer: Vec::new(),
            empty_replies: 0,
            reconnects: 0,
            cancel: CancelToken::new(),
        };
        connection.open_session()?;
        Ok(connection)
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Number of reconnects since [`open`](Self::open).
    pub fn reconnect_count(&self) -> u64 {
        self.reconnects
    }

    pub fn consecutive_empty_replies(&self) -> u32 {
        self.empty_replies
    }

    /// Token that aborts the reconnect loop when cancelled.
    pub fn set_cancel_token(&mut self, token: CancelToken) {
        self.cancel = token;
    }

    /// Send `command` and wait for its reply, recovering from any transport failure.
    ///
    /// Device errors (`NO <code>`) are returned as [`DeviceReply::Failed`]; only
    /// a cancelled reconnect produces an `Err` ([`SolysError::Aborted`]).
    pub fn exchange(&mut self, command: &Command) -> SolysResult<DeviceReply> {
        let mut phase = if self.stream.is_some() {
            Phase::Send
        } else {
            Phase::Reconnect
        };

        loop {
            phase = match phase {
                Phase::Send => match self.send(command) {
                    Ok(()) => Phase::Await,
                    Err(e) => {
                        warn!("Solys send of {} failed: {e}", command.mnemonic());
                        Phase::Reconnect
                    }
                },
                Phase::Await => match self.read_reply(command) {
                    Ok(Some(reply)) => {
                        self.empty_replies = 0;
                        return Ok(reply);
                    }
                    Ok(None) => {
                        if self.note_empty() {
                            warn!(
                                "No reply to {} after {} polls, reconnecting",
                                command.mnemonic(),
                                self.empty_replies
                            );
                            Phase::Reconnect
                        } else {
                            Phase::Await
                        }
                    }
                    Err(e) => {
                        warn!("Solys read for {} failed: {e}", command.mnemonic());
                        Phase::Reconnect
                    }
                },
                Phase::Reconnect => {
                    self.reconnect()?;
                    Phase::Send
                }
            };
        }
    }

    /// Drop the session. The next [`exchange`](Self::exchange) reconnects.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!("Closed Solys2 session");
        }
        self.buffer.clear();
    }

    /// Count an empty poll; `true` once the threshold is reached.
    fn note_empty(&mut self) -> bool {
        self.empty_replies += 1;
        self.empty_replies >= self.config.empty_reply_threshold.max(1)
    }

    fn reconnect(&mut self) -> SolysResult<()> {
        self.close();
        self.reconnects += 1;
        let mut attempt: u64 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(SolysError::Aborted);
            }
            attempt += 1;

            match self.open_session() {
                Ok(()) => {
                    self.empty_replies = 0;
                    info!(
                        "Reconnected to Solys2 at {} (attempt {attempt}, reconnect #{})",
                        self.config.address(),
                        self.reconnects
                    );
                    return Ok(());
                }
                Err(e) => warn!("Reconnect attempt {attempt} failed: {e}"),
            }

            if self.cancel.wait_timeout(self.config.reconnect_pause()) {
                return Err(SolysError::Aborted);
            }
        }
    }

    fn open_session(&mut self) -> SolysResult<()> {
        self.close();
        let stream = connect_stream(&self.config)?;
        self.stream = Some(stream);

        if let Err(e) = self.handshake() {
            self.close();
            return Err(e);
        }

        info!("Connected to Solys2 at {}", self.config.address());
        Ok(())
    }

    fn handshake(&mut self) -> SolysResult<()> {
        let steps = [
            Command::password(&self.config.password),
            Command::protection(false),
        ];
        for command in &steps {
            self.handshake_step(command)?;
        }
        Ok(())
    }

    fn handshake_step(&mut self, command: &Command) -> SolysResult<()> {
        self.send(command)?;
        for _ in 0..self.config.empty_reply_threshold.max(1) {
            match self.read_reply(command)? {
                Some(DeviceReply::Answered { .. }) => return Ok(()),
                Some(DeviceReply::Failed { code, raw }) => {
                    return Err(SolysError::ConnectionFailed(format!(
                        "{} rejected during handshake with {code}: {raw:?}",
                        command.mnemonic()
                    )));
                }
                None => {}
            }
        }
        Err(SolysError::ConnectionFailed(format!(
            "no reply to {} during handshake",
            command.mnemonic()
        )))
    }

    fn send(&mut self, command: &Command) -> io::Result<()> {
        self.drain_stale()?;
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;

        if command.is_sensitive() {
            debug!("Solys send: {:?}", format!("{} ****", command.mnemonic()));
        } else {
            debug!("Solys send: {:?}", command.to_string());
        }
        stream.write_all(&command.encode())?;
        stream.flush()
    }

    /// Discard anything the device sent since the last exchange.
    fn drain_stale(&mut self) -> io::Result<()> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        stream.set_nonblocking(true)?;

        let mut chunk = [0u8; 256];
        let result = loop {
            match stream.read(&mut chunk) {
                Ok(0) => break Err(io::Error::new(ErrorKind::UnexpectedEof, "device closed the socket")),
                Ok(n) => trace!("Discarding stale bytes: {:?}", latin1(&chunk[..n])),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => break Err(e),
            }
        };

        stream.set_nonblocking(false)?;
        self.buffer.clear();
        result
    }

    /// Poll for one read timeout. `Ok(None)` means nothing decodable arrived.
    fn read_reply(&mut self, command: &Command) -> io::Result<Option<DeviceReply>> {
        let deadline = Instant::now() + self.config.read_timeout();
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        let mut chunk = [0u8; 256];

        loop {
            while let Some(line) = take_line(&mut self.buffer) {
                trace!("Solys recv: {:?}", line);
                if let Some(reply) = decode(command, &line) {
                    return Ok(Some(reply));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            stream.set_read_timeout(Some(remaining))?;

            match stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "device closed the socket",
                    ))
                }
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Ok(None)
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }
}

fn connect_stream(config: &ConnectionConfig) -> SolysResult<TcpStream> {
    let address = config.address();
    let addrs = address
        .to_socket_addrs()
        .map_err(|e| SolysError::ConnectionFailed(format!("Failed to resolve {address}: {e}")))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_write_timeout(Some(config.connect_timeout()))?;
                return Ok(stream);
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(SolysError::ConnectionFailed(match last_error {
        Some(e) => format!("Failed to connect to {address}: {e}"),
        None => format!("No addresses found for {address}"),
    }))
}

fn not_connected() -> io::Error {
    io::Error::new(ErrorKind::NotConnected, "no Solys2 session")
}

/// Pop the next CR- or LF-terminated line from `buffer`.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let end = buffer.iter().position(|&b| b == b'\r' || b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=end).collect();
    Some(latin1(&line[..end]))
}

/// Latin-1 bytes map directly to Unicode code points.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
