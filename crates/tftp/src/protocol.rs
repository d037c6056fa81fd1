//! TFTP Wire Protocol
//!
//! This module contains the datagram codec for the five RFC 1350 message
//! types, along with the protocol enumerations (opcodes, error codes,
//! transfer modes) and the netascii byte conversions.
//!
//! # TFTP Protocol Overview
//!
//! TFTP (Trivial File Transfer Protocol) is defined in RFC 1350. It is a
//! lock-step protocol: exactly one unacknowledged data block may be in
//! flight at a time, and the final block of a transfer is recognized by
//! being shorter than the configured block size.
//!
//! The codec is a pure transform. Decoding never touches any session
//! state; malformed input is reported as a [`DecodeError`] and answered
//! on the wire by the caller.

use std::fmt;
use std::str::FromStr;

/// TFTP Protocol Opcodes
///
/// These opcodes identify the type of TFTP packet being sent or received.
/// Each opcode corresponds to a specific packet format as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpOpcode {
    /// Read Request (RRQ) - Opcode 1
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 | \[Options\] |
    ReadRequest = 1,

    /// Write Request (WRQ) - Opcode 2
    ///
    /// Packet format: | Opcode | Filename | 0 | Mode | 0 | \[Options\] |
    WriteRequest = 2,

    /// Data Packet (DATA) - Opcode 3
    ///
    /// Contains a 2-byte block number and up to `block_size` bytes of data.
    /// The last packet of a transfer carries less than the full block size.
    ///
    /// Packet format: | Opcode | Block# | Data |
    Data = 3,

    /// Acknowledgment (ACK) - Opcode 4
    ///
    /// Acknowledges receipt of a data packet by block number.
    ///
    /// Packet format: | Opcode | Block# |
    Acknowledgment = 4,

    /// Error Packet (ERROR) - Opcode 5
    ///
    /// Reports an error condition and terminates the current transfer.
    ///
    /// Packet format: | Opcode | ErrorCode | ErrMsg | 0 |
    Error = 5,
}

impl TftpOpcode {
    /// Convert a u16 value to a TftpOpcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::from_u16(1), Some(TftpOpcode::ReadRequest));
    /// assert_eq!(TftpOpcode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::ReadRequest),
            2 => Some(Self::WriteRequest),
            3 => Some(Self::Data),
            4 => Some(Self::Acknowledgment),
            5 => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert the opcode to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the human-readable name of the opcode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpOpcode;
    ///
    /// assert_eq!(TftpOpcode::ReadRequest.name(), "RRQ");
    /// assert_eq!(TftpOpcode::Data.name(), "DATA");
    /// ```
    pub fn name(self) -> &'static str {
        match self {
            Self::ReadRequest => "RRQ",
            Self::WriteRequest => "WRQ",
            Self::Data => "DATA",
            Self::Acknowledgment => "ACK",
            Self::Error => "ERROR",
        }
    }
}

impl From<TftpOpcode> for u16 {
    fn from(opcode: TftpOpcode) -> Self {
        opcode.as_u16()
    }
}

impl fmt::Display for TftpOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// TFTP Error Codes
///
/// Standard error codes as defined in RFC 1350.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TftpErrorCode {
    /// Error code 0: Not defined
    ///
    /// Generic error condition. The error message should provide details.
    NotDefined = 0,

    /// Error code 1: File not found
    FileNotFound = 1,

    /// Error code 2: Access violation
    ///
    /// Includes attempts to reach files outside the server's root directory.
    AccessViolation = 2,

    /// Error code 3: Disk full or allocation exceeded
    DiskFull = 3,

    /// Error code 4: Illegal TFTP operation
    ///
    /// Malformed datagrams and protocol sequencing violations.
    IllegalOperation = 4,

    /// Error code 5: Unknown transfer ID
    ///
    /// Packet received from an unknown source port or unexpected client.
    UnknownTransferId = 5,

    /// Error code 6: File already exists
    FileAlreadyExists = 6,

    /// Error code 7: No such user
    NoSuchUser = 7,
}

impl TftpErrorCode {
    /// Convert a u16 value to a TftpErrorCode
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::from_u16(1), Some(TftpErrorCode::FileNotFound));
    /// assert_eq!(TftpErrorCode::from_u16(99), None);
    /// ```
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::NotDefined),
            1 => Some(Self::FileNotFound),
            2 => Some(Self::AccessViolation),
            3 => Some(Self::DiskFull),
            4 => Some(Self::IllegalOperation),
            5 => Some(Self::UnknownTransferId),
            6 => Some(Self::FileAlreadyExists),
            7 => Some(Self::NoSuchUser),
            _ => None,
        }
    }

    /// Convert the error code to its u16 representation
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the default error message for this error code
    ///
    /// # Examples
    /// ```
    /// use tftp::TftpErrorCode;
    ///
    /// assert_eq!(TftpErrorCode::FileNotFound.default_message(), "File not found");
    /// ```
    pub fn default_message(self) -> &'static str {
        match self {
            Self::NotDefined => "Undefined error",
            Self::FileNotFound => "File not found",
            Self::AccessViolation => "Access violation",
            Self::DiskFull => "Disk full or allocation exceeded",
            Self::IllegalOperation => "Illegal TFTP operation",
            Self::UnknownTransferId => "Unknown transfer ID",
            Self::FileAlreadyExists => "File already exists",
            Self::NoSuchUser => "No such user",
        }
    }
}

impl From<TftpErrorCode> for u16 {
    fn from(error_code: TftpErrorCode) -> Self {
        error_code.as_u16()
    }
}

impl fmt::Display for TftpErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.as_u16())
    }
}

/// TFTP Transfer Modes
///
/// Transfer modes define how data is processed during transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMode {
    /// Binary mode (octet)
    ///
    /// Data is transferred as-is without any character set conversion.
    ///
    /// Mode string: "octet"
    Octet,

    /// Text mode (netascii)
    ///
    /// Data is converted between local text format and NETASCII format,
    /// which uses CR-LF line endings and CR-NUL for a bare carriage return.
    ///
    /// Mode string: "netascii"
    NetAscii,
}

impl TransferMode {
    /// Parse a transfer mode from a string
    ///
    /// The comparison is case-insensitive.
    ///
    /// # Examples
    /// ```
    /// use tftp::TransferMode;
    ///
    /// assert_eq!("octet".parse::<TransferMode>(), Ok(TransferMode::Octet));
    /// assert_eq!("NETASCII".parse::<TransferMode>(), Ok(TransferMode::NetAscii));
    /// assert!("binary".parse::<TransferMode>().is_err());
    /// ```
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "octet" => Some(Self::Octet),
            "netascii" => Some(Self::NetAscii),
            _ => None,
        }
    }

    /// Get the string representation of the transfer mode
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Octet => "octet",
            Self::NetAscii => "netascii",
        }
    }
}

impl FromStr for TransferMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_opt(s).ok_or_else(|| format!("Unsupported transfer mode: {}", s))
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reasons a byte buffer failed to decode into a [`Datagram`].
///
/// Decode errors never reach the session state machines; the transport
/// host answers them with `ERROR(IllegalOperation)` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header of the (claimed) opcode.
    #[error("datagram too short")]
    TooShort,

    /// The leading 16-bit opcode is not one of the five RFC 1350 opcodes.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u16),

    /// A NUL-terminated field is missing its terminator.
    #[error("{0} not terminated")]
    Unterminated(&'static str),

    /// A text field is not valid UTF-8.
    #[error("invalid encoding in {0}")]
    InvalidString(&'static str),

    /// An RRQ/WRQ carried a mode other than octet or netascii.
    #[error("unknown transfer mode {0:?}")]
    UnknownMode(String),
}

/// A decoded TFTP datagram.
///
/// One variant per RFC 1350 opcode; consumers match exhaustively rather
/// than inspecting opcode numbers at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datagram {
    /// Read Request: the client asks to pull `filename` from us.
    ReadRequest {
        filename: String,
        mode: TransferMode,
        /// RFC 2347 option pairs, in wire order. The engine carries them
        /// for round-trip fidelity but does not negotiate them.
        options: Vec<(String, String)>,
    },

    /// Write Request: the client asks to push `filename` to us.
    WriteRequest {
        filename: String,
        mode: TransferMode,
        options: Vec<(String, String)>,
    },

    /// One block of file data. A payload shorter than the configured
    /// block size marks the final block of the transfer.
    Data { block: u16, payload: Vec<u8> },

    /// Acknowledgment of the data block with the given number.
    Ack { block: u16 },

    /// An error report; terminates the transfer it belongs to.
    Error { code: TftpErrorCode, message: String },
}

impl Datagram {
    /// The opcode of this datagram.
    pub fn opcode(&self) -> TftpOpcode {
        match self {
            Datagram::ReadRequest { .. } => TftpOpcode::ReadRequest,
            Datagram::WriteRequest { .. } => TftpOpcode::WriteRequest,
            Datagram::Data { .. } => TftpOpcode::Data,
            Datagram::Ack { .. } => TftpOpcode::Acknowledgment,
            Datagram::Error { .. } => TftpOpcode::Error,
        }
    }

    /// Build an ERROR datagram from a code, using its default message.
    pub fn error_from_code(code: TftpErrorCode) -> Self {
        Datagram::Error {
            code,
            message: code.default_message().to_string(),
        }
    }

    /// Encode this datagram to its RFC 1350 wire representation.
    ///
    /// # Examples
    /// ```
    /// use tftp::Datagram;
    ///
    /// let ack = Datagram::Ack { block: 42 };
    /// assert_eq!(ack.to_wire(), vec![0, 4, 0, 42]);
    /// ```
    pub fn to_wire(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(4);
        v.extend_from_slice(&self.opcode().as_u16().to_be_bytes());

        match self {
            Datagram::ReadRequest {
                filename,
                mode,
                options,
            }
            | Datagram::WriteRequest {
                filename,
                mode,
                options,
            } => {
                v.extend_from_slice(filename.as_bytes());
                v.push(0);
                v.extend_from_slice(mode.as_str().as_bytes());
                v.push(0);
                for (key, val) in options {
                    v.extend_from_slice(key.as_bytes());
                    v.push(0);
                    v.extend_from_slice(val.as_bytes());
                    v.push(0);
                }
            }
            Datagram::Data { block, payload } => {
                v.extend_from_slice(&block.to_be_bytes());
                v.extend_from_slice(payload);
            }
            Datagram::Ack { block } => {
                v.extend_from_slice(&block.to_be_bytes());
            }
            Datagram::Error { code, message } => {
                v.extend_from_slice(&code.as_u16().to_be_bytes());
                v.extend_from_slice(message.as_bytes());
                v.push(0);
            }
        }

        v
    }

    /// Decode a wire buffer into a datagram.
    ///
    /// # Examples
    /// ```
    /// use tftp::{Datagram, DecodeError};
    ///
    /// assert_eq!(
    ///     Datagram::from_wire(&[0, 4, 0, 7]),
    ///     Ok(Datagram::Ack { block: 7 })
    /// );
    /// assert_eq!(Datagram::from_wire(&[0]), Err(DecodeError::TooShort));
    /// ```
    pub fn from_wire(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < 2 {
            return Err(DecodeError::TooShort);
        }

        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let opcode = TftpOpcode::from_u16(opcode).ok_or(DecodeError::UnknownOpcode(opcode))?;

        match opcode {
            TftpOpcode::ReadRequest | TftpOpcode::WriteRequest => {
                let (filename, mode, options) = decode_request(&buf[2..])?;
                if opcode == TftpOpcode::ReadRequest {
                    Ok(Datagram::ReadRequest {
                        filename,
                        mode,
                        options,
                    })
                } else {
                    Ok(Datagram::WriteRequest {
                        filename,
                        mode,
                        options,
                    })
                }
            }
            TftpOpcode::Data => {
                if buf.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                Ok(Datagram::Data {
                    block: u16::from_be_bytes([buf[2], buf[3]]),
                    payload: buf[4..].to_vec(),
                })
            }
            TftpOpcode::Acknowledgment => {
                if buf.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                Ok(Datagram::Ack {
                    block: u16::from_be_bytes([buf[2], buf[3]]),
                })
            }
            TftpOpcode::Error => {
                if buf.len() < 4 {
                    return Err(DecodeError::TooShort);
                }
                let raw = u16::from_be_bytes([buf[2], buf[3]]);
                // Unknown codes are folded into NotDefined rather than
                // rejected; the message still carries the peer's intent.
                let code = TftpErrorCode::from_u16(raw).unwrap_or(TftpErrorCode::NotDefined);
                let msg_bytes = &buf[4..];
                // Lenient about the trailing NUL: some clients omit it.
                let end = msg_bytes.iter().position(|&b| b == 0).unwrap_or(msg_bytes.len());
                let message = std::str::from_utf8(&msg_bytes[..end])
                    .map_err(|_| DecodeError::InvalidString("error message"))?
                    .to_string();
                Ok(Datagram::Error { code, message })
            }
        }
    }
}

impl fmt::Display for Datagram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datagram::ReadRequest { filename, mode, .. } => {
                write!(f, "RRQ filename: {} mode: {}", filename, mode)
            }
            Datagram::WriteRequest { filename, mode, .. } => {
                write!(f, "WRQ filename: {} mode: {}", filename, mode)
            }
            Datagram::Data { block, payload } => {
                write!(f, "DATA block: {} length: {}", block, payload.len())
            }
            Datagram::Ack { block } => write!(f, "ACK block: {}", block),
            Datagram::Error { code, message } => {
                write!(f, "ERROR code: {} message: {}", code.as_u16(), message)
            }
        }
    }
}

/// Find the next null byte in a buffer starting from a given position
fn find_zero(buf: &[u8], start: usize) -> Option<usize> {
    buf[start..].iter().position(|&b| b == 0).map(|pos| start + pos)
}

/// Decode the body of an RRQ/WRQ: filename, mode, option pairs.
fn decode_request(buf: &[u8]) -> Result<(String, TransferMode, Vec<(String, String)>), DecodeError> {
    let mut i = 0;

    let fname_end = find_zero(buf, i).ok_or(DecodeError::Unterminated("filename"))?;
    let filename = std::str::from_utf8(&buf[i..fname_end])
        .map_err(|_| DecodeError::InvalidString("filename"))?
        .to_string();
    i = fname_end + 1;

    let mode_end = find_zero(buf, i).ok_or(DecodeError::Unterminated("mode"))?;
    let mode_str =
        std::str::from_utf8(&buf[i..mode_end]).map_err(|_| DecodeError::InvalidString("mode"))?;
    let mode = TransferMode::from_str_opt(mode_str)
        .ok_or_else(|| DecodeError::UnknownMode(mode_str.to_string()))?;
    i = mode_end + 1;

    let mut options = Vec::new();
    while i < buf.len() {
        let key_end = find_zero(buf, i).ok_or(DecodeError::Unterminated("option key"))?;
        let key = std::str::from_utf8(&buf[i..key_end])
            .map_err(|_| DecodeError::InvalidString("option key"))?
            .to_string();
        i = key_end + 1;

        if i >= buf.len() {
            // Dangling key with no value; drop it like we never saw it.
            break;
        }

        let val_end = find_zero(buf, i).ok_or(DecodeError::Unterminated("option value"))?;
        let val = std::str::from_utf8(&buf[i..val_end])
            .map_err(|_| DecodeError::InvalidString("option value"))?
            .to_string();
        i = val_end + 1;

        options.push((key, val));
    }

    Ok((filename, mode, options))
}

/// Convert file data from binary to netascii format
///
/// LF becomes CR-LF, a bare CR becomes CR-NUL, and CR-LF is preserved.
pub fn convert_to_netascii(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            // Handle CR - check if followed by LF
            b'\r' => {
                if i + 1 < data.len() && data[i + 1] == b'\n' {
                    // CR-LF stays as CR-LF
                    result.push(b'\r');
                    result.push(b'\n');
                    i += 2;
                } else {
                    // Standalone CR becomes CR-NULL
                    result.push(b'\r');
                    result.push(b'\0');
                    i += 1;
                }
            }
            // Standalone LF becomes CR-LF
            b'\n' => {
                result.push(b'\r');
                result.push(b'\n');
                i += 1;
            }
            // Regular byte
            _ => {
                result.push(data[i]);
                i += 1;
            }
        }
    }

    result
}

/// Convert file data from netascii to binary format
///
/// CR-LF becomes LF and CR-NUL becomes CR.
pub fn convert_from_netascii(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        match data[i] {
            b'\r' => {
                if i + 1 < data.len() {
                    match data[i + 1] {
                        b'\n' => {
                            // CR-LF -> LF
                            result.push(b'\n');
                            i += 2;
                        }
                        b'\0' => {
                            // CR-NULL -> CR
                            result.push(b'\r');
                            i += 2;
                        }
                        _ => {
                            // Standalone CR (shouldn't happen in valid netascii)
                            result.push(b'\r');
                            i += 1;
                        }
                    }
                } else {
                    // CR at end of data
                    result.push(b'\r');
                    i += 1;
                }
            }
            _ => {
                result.push(data[i]);
                i += 1;
            }
        }
    }

    result
}
