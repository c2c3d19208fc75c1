//! Signal Vocabulary
//!
//! A signal is one byte on the wire. The byte range is partitioned once, here:
//!
//! ```text
//! 0x00 ..= 0x7F   application payload (move columns, ASCII text)
//! 0x80 ..= 0xEF   integrity check values
//! 0xF0 ..= 0xF5   control codes
//! 0xF6 ..= 0xFF   reserved
//! ```
//!
//! Control codes sit above every payload and check value, so a receiver can
//! classify any byte without context.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Byte-range boundaries and control code values.
pub mod codes {
    /// Highest application payload value.
    pub const PAYLOAD_MAX: u8 = 0x7F;
    /// Lowest integrity check value. Must be greater than every payload.
    pub const CHECK_LOW: u8 = 0x80;
    /// Highest integrity check value.
    pub const CHECK_HIGH: u8 = 0xEF;

    /// Turn timer expired; the receiver resynchronizes its own timer.
    pub const TIME_OUT_SYNC: u8 = 0xF0;
    /// Terminates a streamed string.
    pub const END_OF_STRING: u8 = 0xF1;
    /// Keep-alive / "nothing to send yet".
    pub const NULL_SIGNAL: u8 = 0xF2;
    /// The sender is leaving the match.
    pub const DISCONNECT: u8 = 0xF3;
    /// Acknowledges the previous signal.
    pub const ACK: u8 = 0xF4;
    /// The sender observed the end of the game.
    pub const GAME_OVER: u8 = 0xF5;

    /// Lowest control code.
    pub const CONTROL_LOW: u8 = TIME_OUT_SYNC;
    /// Highest assigned control code.
    pub const CONTROL_HIGH: u8 = GAME_OVER;
}

/// Signal construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    /// Value is outside the payload band.
    #[error("payload {0} exceeds {max}", max = codes::PAYLOAD_MAX)]
    PayloadOutOfRange(u8),
    /// Text does not hold a single byte value.
    #[error("not a signal: {0:?}")]
    Unparseable(String),
}

/// Control codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Turn timer expired.
    TimeOutSync,
    /// End of a streamed string.
    EndOfString,
    /// Null / keep-alive.
    Null,
    /// Peer is leaving.
    Disconnect,
    /// Acknowledge.
    Ack,
    /// Game over.
    GameOver,
}

impl Control {
    /// Wire value of this control code.
    pub const fn code(self) -> u8 {
        match self {
            Control::TimeOutSync => codes::TIME_OUT_SYNC,
            Control::EndOfString => codes::END_OF_STRING,
            Control::Null => codes::NULL_SIGNAL,
            Control::Disconnect => codes::DISCONNECT,
            Control::Ack => codes::ACK,
            Control::GameOver => codes::GAME_OVER,
        }
    }

    /// Control code for a wire value, if assigned.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            codes::TIME_OUT_SYNC => Some(Control::TimeOutSync),
            codes::END_OF_STRING => Some(Control::EndOfString),
            codes::NULL_SIGNAL => Some(Control::Null),
            codes::DISCONNECT => Some(Control::Disconnect),
            codes::ACK => Some(Control::Ack),
            codes::GAME_OVER => Some(Control::GameOver),
            _ => None,
        }
    }
}

/// Classification of a received byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Application data.
    Payload(u8),
    /// Integrity check value.
    Check(u8),
    /// Control code.
    Control(Control),
    /// Reserved, unassigned value.
    Reserved(u8),
}

/// One unit of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signal(u8);

impl Signal {
    /// Turn timer expired.
    pub const TIME_OUT_SYNC: Signal = Signal(codes::TIME_OUT_SYNC);
    /// End of a streamed string.
    pub const END_OF_STRING: Signal = Signal(codes::END_OF_STRING);
    /// Null / keep-alive.
    pub const NULL: Signal = Signal(codes::NULL_SIGNAL);
    /// Peer is leaving.
    pub const DISCONNECT: Signal = Signal(codes::DISCONNECT);
    /// Acknowledge.
    pub const ACK: Signal = Signal(codes::ACK);
    /// Game over.
    pub const GAME_OVER: Signal = Signal(codes::GAME_OVER);

    /// Application payload. Fails for values in a reserved band.
    pub const fn payload(value: u8) -> Result<Self, SignalError> {
        if value > codes::PAYLOAD_MAX {
            return Err(SignalError::PayloadOutOfRange(value));
        }
        Ok(Signal(value))
    }

    /// Any byte as received from the wire.
    pub const fn from_wire(value: u8) -> Self {
        Signal(value)
    }

    /// Check value `offset` positions into the check band (wraps).
    pub(crate) const fn check(offset: u8) -> Self {
        let width = codes::CHECK_HIGH - codes::CHECK_LOW + 1;
        Signal(codes::CHECK_LOW + offset % width)
    }

    /// Raw byte.
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Classify this signal.
    pub const fn kind(self) -> SignalKind {
        match self.0 {
            v if v <= codes::PAYLOAD_MAX => SignalKind::Payload(v),
            v if v <= codes::CHECK_HIGH => SignalKind::Check(v - codes::CHECK_LOW),
            v => match Control::from_code(v) {
                Some(control) => SignalKind::Control(control),
                None => SignalKind::Reserved(v),
            },
        }
    }

    /// Whether this is application data.
    pub const fn is_payload(self) -> bool {
        self.0 <= codes::PAYLOAD_MAX
    }

    /// Whether this is an assigned control code.
    pub const fn is_control(self) -> bool {
        self.0 >= codes::CONTROL_LOW && self.0 <= codes::CONTROL_HIGH
    }
}

impl From<Control> for Signal {
    fn from(control: Control) -> Self {
        Signal(control.code())
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mailbox lines carry signals as decimal integers.
impl FromStr for Signal {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u8>()
            .map(Signal)
            .map_err(|_| SignalError::Unparseable(s.to_string()))
    }
}
