//! Solys2 command-set wire codec.
//!
//! # Protocol Overview
//!
//! Commands are a two-letter mnemonic (e.g. `PO`, `CP`) followed by
//! space-separated arguments and terminated with CR:
//!
//! ```text
//! PO 0 182.5\r     move motor 0 (azimuth) to 182.5°
//! CP\r             query the current position
//! ```
//!
//! A reply that starts with the request mnemonic answers that command; the
//! remainder is parsed according to the command (numbers, a position pair,
//! status fields or free text):
//!
//! ```text
//! CP 182.5 45.25
//! IS 4 01C8
//! ```
//!
//! Failures start with the reserved `NO` marker followed by a single-character
//! code (see [`ErrorCode`]):
//!
//! ```text
//! NO 7             travel bounds exceeded
//! ```
//!
//! Anything else (an empty read, an answer to an earlier command, a malformed
//! answer) decodes to "no reply": the device may still be working on the
//! command, so callers keep waiting instead of failing.

use std::fmt;

use super::error::{SolysError, SolysResult};

/// Line terminator appended to every command.
pub const TERMINATOR: u8 = b'\r';

/// Prefix of every device error reply.
pub const ERROR_MARKER: &str = "NO";

/// Solys2 motor identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[repr(u8)]
pub enum Axis {
    /// Motor 0, horizontal
    #[strum(to_string = "azimuth")]
    Azimuth = 0,
    /// Motor 1, vertical
    #[strum(to_string = "zenith")]
    Zenith = 1,
}

impl Axis {
    /// Motor index used on the wire.
    pub fn motor(self) -> u8 {
        self as u8
    }
}

/// Error codes reported in `NO <code>` replies.
///
/// Codes the driver does not act on individually are preserved in
/// [`Unmapped`](ErrorCode::Unmapped).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// `1` - framing error
    FramingError,
    /// `3` - unrecognized command
    UnrecognizedCommand,
    /// `4` - message too long
    MessageTooLong,
    /// `5` - unimplemented instruction or non-decodable parameters
    UndecodableParameters,
    /// `6` - motion queue is full, movement rejected
    QueueFull,
    /// `7` - travel bounds exceeded
    TravelBoundsExceeded,
    /// `8` - maximum velocity exceeded
    VelocityExceeded,
    /// `9` - maximum acceleration exceeded
    AccelerationExceeded,
    /// `A` - instrument is operating autonomously, command rejected
    OperatingAutonomously,
    /// `G` - attempt to change password protected data
    PasswordProtectedData,
    /// `Q` - command is password protected
    CommandProtected,
    /// `Y` - hardware failure detected
    HardwareFailure,
    /// Any other code, kept verbatim.
    Unmapped(String),
}

impl ErrorCode {
    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => Self::FramingError,
            "3" => Self::UnrecognizedCommand,
            "4" => Self::MessageTooLong,
            "5" => Self::UndecodableParameters,
            "6" => Self::QueueFull,
            "7" => Self::TravelBoundsExceeded,
            "8" => Self::VelocityExceeded,
            "9" => Self::AccelerationExceeded,
            "A" => Self::OperatingAutonomously,
            "G" => Self::PasswordProtectedData,
            "Q" => Self::CommandProtected,
            "Y" => Self::HardwareFailure,
            other => Self::Unmapped(other.to_string()),
        }
    }

    /// Code as sent by the device.
    pub fn code(&self) -> &str {
        match self {
            Self::FramingError => "1",
            Self::UnrecognizedCommand => "3",
            Self::MessageTooLong => "4",
            Self::UndecodableParameters => "5",
            Self::QueueFull => "6",
            Self::TravelBoundsExceeded => "7",
            Self::VelocityExceeded => "8",
            Self::AccelerationExceeded => "9",
            Self::OperatingAutonomously => "A",
            Self::PasswordProtectedData => "G",
            Self::CommandProtected => "Q",
            Self::HardwareFailure => "Y",
            Self::Unmapped(code) => code,
        }
    }

    /// Human-readable description from the Solys2 manual.
    pub fn description(&self) -> &'static str {
        match self {
            Self::FramingError => "framing error",
            Self::UnrecognizedCommand => "unrecognized command",
            Self::MessageTooLong => "message too long",
            Self::UndecodableParameters => "unimplemented instruction or non-decodable parameters",
            Self::QueueFull => "motion queue is full, movement command rejected",
            Self::TravelBoundsExceeded => "travel bounds exceeded",
            Self::VelocityExceeded => "maximum velocity exceeded",
            Self::AccelerationExceeded => "maximum acceleration exceeded",
            Self::OperatingAutonomously => "instrument is operating autonomously, command rejected",
            Self::PasswordProtectedData => "attempt to change password protected data",
            Self::CommandProtected => "command is password protected",
            Self::HardwareFailure => "hardware failure detected",
            Self::Unmapped(code) => match code.as_str() {
                "2" | "E" => "reserved for future use",
                "B" => "invalid adjustment size",
                "C" => "invalid total adjustment",
                "D" => "duration out of range",
                "F" => "illegal extent specified",
                "Z" => "illegal internal firmware state",
                "R" => "unknown command, or unidentified error",
                "P" => "wrong password",
                _ => "unknown error",
            },
        }
    }

    /// Codes that clear after re-sending the password and lifting protection.
    pub fn is_protection(&self) -> bool {
        matches!(self, Self::PasswordProtectedData | Self::CommandProtected)
    }

    /// Codes meaning the device is busy rather than the command being wrong.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::QueueFull | Self::OperatingAutonomously)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.description())
    }
}

/// A single Solys2 command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    mnemonic: String,
    args: Vec<String>,
}

impl Command {
    /// Create a command with a validated two-letter mnemonic and no arguments.
    ///
    /// The mnemonic is upper-cased. The reserved error marker `NO` is rejected.
    pub fn new(mnemonic: &str) -> SolysResult<Self> {
        if mnemonic.len() != 2 || !mnemonic.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(SolysError::InvalidCommand(format!(
                "mnemonic must be two letters: {mnemonic:?}"
            )));
        }
        let mnemonic = mnemonic.to_ascii_uppercase();
        if mnemonic == ERROR_MARKER {
            return Err(SolysError::InvalidCommand(format!(
                "{ERROR_MARKER} is reserved for error replies"
            )));
        }
        Ok(Self {
            mnemonic,
            args: Vec::new(),
        })
    }

    /// Parse raw command text such as `"PO 0 180"`.
    ///
    /// # Example
    ///
    /// ```
    /// use hardware::solys::Command;
    ///
    /// let cmd = Command::parse("po 1 45.5").unwrap();
    /// assert_eq!(cmd.mnemonic(), "PO");
    /// assert_eq!(cmd.to_string(), "PO 1 45.5");
    /// ```
    pub fn parse(raw: &str) -> SolysResult<Self> {
        let mut tokens = raw.split_whitespace();
        let mnemonic = tokens
            .next()
            .ok_or_else(|| SolysError::InvalidCommand("empty command".to_string()))?;
        let mut command = Self::new(mnemonic)?;
        command.args = tokens.map(str::to_string).collect();
        Ok(command)
    }

    fn known(mnemonic: &'static str) -> Self {
        Self {
            mnemonic: mnemonic.to_string(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl fmt::Display) -> Self {
        self.args.push(arg.to_string());
        self
    }

    fn degrees(self, value: f64) -> Self {
        self.arg(format_number(value))
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Bytes to put on the wire, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = self.to_string().into_bytes();
        bytes.push(TERMINATOR);
        bytes
    }

    /// `PO <motor> <degrees>` - move one motor.
    pub fn move_axis(axis: Axis, degrees: f64) -> Self {
        Self::known("PO").arg(axis.motor()).degrees(degrees)
    }

    /// `PO` - planned (commanded) position.
    pub fn planned_position() -> Self {
        Self::known("PO")
    }

    /// `CP` - current position.
    pub fn current_position() -> Self {
        Self::known("CP")
    }

    /// `IS` - instrument status.
    pub fn status() -> Self {
        Self::known("IS")
    }

    /// `HO` - go to the home position.
    pub fn home() -> Self {
        Self::known("HO")
    }

    /// `PW <password>` - authenticate the session.
    pub fn password(password: &str) -> Self {
        Self::known("PW").arg(password)
    }

    /// `PR 0|1` - web interface configuration protection.
    pub fn protection(enabled: bool) -> Self {
        Self::known("PR").arg(u8::from(enabled))
    }

    /// `VE` - firmware version.
    pub fn version() -> Self {
        Self::known("VE")
    }

    /// `AD` - query motor adjustments.
    pub fn adjustment() -> Self {
        Self::known("AD")
    }

    /// `AD <motor> <degrees>` - adjust one motor clockwise.
    pub fn adjust(axis: Axis, degrees: f64) -> Self {
        Self::known("AD").arg(axis.motor()).degrees(degrees)
    }

    /// `LL` - site latitude, longitude and pressure.
    pub fn location() -> Self {
        Self::known("LL")
    }

    /// `PS` - query power save.
    pub fn power_save_query() -> Self {
        Self::known("PS")
    }

    /// `PS 0|1` - set power save.
    pub fn power_save(enabled: bool) -> Self {
        Self::known("PS").arg(u8::from(enabled))
    }

    /// `QS` - path segments queued per motor.
    pub fn queue_status() -> Self {
        Self::known("QS")
    }

    /// `FU` - query tracker function.
    pub fn function_query() -> Self {
        Self::known("FU")
    }

    /// `FU <code>` - set tracker function.
    pub fn function(code: u8) -> Self {
        Self::known("FU").arg(code)
    }

    /// `SI` - sun sensor intensities.
    pub fn sun_intensity() -> Self {
        Self::known("SI")
    }

    /// `TI` - device clock (UTC).
    pub fn time() -> Self {
        Self::known("TI")
    }

    /// Whether logging this command would leak a credential.
    pub(crate) fn is_sensitive(&self) -> bool {
        self.mnemonic == "PW"
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.mnemonic)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Structured content of a successful reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Echo of the mnemonic without data.
    Ack,
    /// Numeric fields.
    Values(Vec<f64>),
    /// Azimuth/zenith pair in degrees.
    Position { azimuth: f64, zenith: f64 },
    /// Instrument mode and status bitmask.
    Status { mode: u8, flags: u16 },
    /// Free text (firmware version).
    Text(String),
}

/// A decoded device reply: exactly one of payload or error.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    Answered { payload: Payload, raw: String },
    Failed { code: ErrorCode, raw: String },
}

impl DeviceReply {
    /// Reply line as received, trimmed.
    pub fn raw(&self) -> &str {
        match self {
            Self::Answered { raw, .. } | Self::Failed { raw, .. } => raw,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Values,
    HexValues,
    Position,
    Status,
    Text,
}

fn expected_shape(command: &Command) -> Shape {
    match (command.mnemonic(), command.args().is_empty()) {
        ("CP", _) | ("PO", true) => Shape::Position,
        ("IS", _) => Shape::Status,
        ("QS", _) => Shape::HexValues,
        ("VE", _) => Shape::Text,
        _ => Shape::Values,
    }
}

/// Decode a reply line for `request`.
///
/// Returns `None` for "no reply": an empty line, a line answering some other
/// command, or an answer whose fields do not parse.
///
/// # Example
///
/// ```
/// use hardware::solys::protocol::{decode, Command, DeviceReply, ErrorCode, Payload};
///
/// let reply = decode(&Command::current_position(), "CP 120.5 30.25\r").unwrap();
/// assert_eq!(
///     reply,
///     DeviceReply::Answered {
///         payload: Payload::Position { azimuth: 120.5, zenith: 30.25 },
///         raw: "CP 120.5 30.25".to_string(),
///     }
/// );
///
/// let reply = decode(&Command::home(), "NO 7").unwrap();
/// assert!(matches!(reply, DeviceReply::Failed { code: ErrorCode::TravelBoundsExceeded, .. }));
///
/// assert!(decode(&Command::home(), "").is_none());
/// ```
pub fn decode(request: &Command, line: &str) -> Option<DeviceReply> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = strip_word(trimmed, request.mnemonic()) {
        let payload = parse_payload(expected_shape(request), rest)?;
        return Some(DeviceReply::Answered {
            payload,
            raw: trimmed.to_string(),
        });
    }

    if let Some(rest) = strip_word(trimmed, ERROR_MARKER) {
        let code = rest.split_whitespace().next()?;
        return Some(DeviceReply::Failed {
            code: ErrorCode::from_code(code),
            raw: trimmed.to_string(),
        });
    }

    None
}

/// Strip `word` from the start of `line` when it is a whole token.
fn strip_word<'a>(line: &'a str, word: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(word)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn parse_payload(shape: Shape, rest: &str) -> Option<Payload> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    match shape {
        Shape::Text => {
            let text = rest.trim();
            Some(if text.is_empty() {
                Payload::Ack
            } else {
                Payload::Text(text.to_string())
            })
        }
        Shape::Values => tokens
            .iter()
            .map(|t| parse_finite(t))
            .collect::<Option<Vec<_>>>()
            .map(values_or_ack),
        Shape::HexValues => tokens
            .iter()
            .map(|t| u32::from_str_radix(t, 16).ok().map(f64::from))
            .collect::<Option<Vec<_>>>()
            .map(values_or_ack),
        Shape::Position => match tokens.as_slice() {
            [azimuth, zenith, ..] => Some(Payload::Position {
                azimuth: parse_finite(azimuth)?,
                zenith: parse_finite(zenith)?,
            }),
            _ => None,
        },
        Shape::Status => match tokens.as_slice() {
            [mode, flags, ..] => Some(Payload::Status {
                mode: mode.parse().ok()?,
                flags: u16::from_str_radix(flags, 16).ok()?,
            }),
            _ => None,
        },
    }
}

fn values_or_ack(values: Vec<f64>) -> Payload {
    if values.is_empty() {
        Payload::Ack
    } else {
        Payload::Values(values)
    }
}

fn parse_finite(token: &str) -> Option<f64> {
    token.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Format a number with at most four decimals and no trailing zeros.
fn format_number(value: f64) -> String {
    let text = format!("{value:.4}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        other => other.to_string(),
    }
}
