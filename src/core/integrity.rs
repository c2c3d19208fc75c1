//! Integrity Check Values
//!
//! Payloads that must not be silently corrupted (moves) are preceded by a check
//! value from the check band. Both peers count checked payloads, so the check
//! value depends on the payload and on its position in the stream.
//!
//! The tag is one byte out of a 112-value band. It catches transport mixups and
//! desynchronized streams, not adversaries.

use sha2::{Digest, Sha256};
use thiserror::Error;

use super::signal::{codes, Signal, SignalKind};

/// Domain separator for check value derivation.
const CHECK_DOMAIN: &[u8] = b"duel-net-check:";

/// Integrity violations. The application treats all of these as critical.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    /// Only payload signals can be stamped.
    #[error("signal {0} is not a payload")]
    NotPayload(Signal),
    /// The check value does not match the payload it guards.
    #[error("check mismatch at sequence {sequence}: expected {expected}, got {received}")]
    Mismatch {
        /// Sequence number of the guarded payload.
        sequence: u32,
        /// Check value derived locally.
        expected: Signal,
        /// Check value received.
        received: Signal,
    },
    /// A payload arrived without a preceding check value.
    #[error("payload {0} arrived without a check value")]
    MissingCheck(Signal),
    /// Two check values arrived back to back.
    #[error("check value {0} arrived while another was pending")]
    UnexpectedCheck(Signal),
}

/// Check value guarding `payload` at position `sequence`.
pub fn check_value(sequence: u32, payload: Signal) -> Signal {
    let mut hasher = Sha256::new();
    hasher.update(CHECK_DOMAIN);
    hasher.update(sequence.to_le_bytes());
    hasher.update([payload.value()]);
    let digest = hasher.finalize();

    let width = codes::CHECK_HIGH - codes::CHECK_LOW + 1;
    Signal::check(digest[0] % width)
}

/// Sending half: produces `[check, payload]` pairs.
#[derive(Debug, Clone, Default)]
pub struct Stamper {
    sequence: u32,
}

impl Stamper {
    /// Start at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp a payload. The two signals must be sent in order on one queue.
    pub fn stamp(&mut self, payload: Signal) -> Result<[Signal; 2], IntegrityError> {
        if !payload.is_payload() {
            return Err(IntegrityError::NotPayload(payload));
        }
        let check = check_value(self.sequence, payload);
        self.sequence = self.sequence.wrapping_add(1);
        Ok([check, payload])
    }

    /// Number of payloads stamped so far.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

/// Result of feeding one received signal to a [`Verifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verified {
    /// A check value was consumed; the guarded payload comes next.
    Armed,
    /// A payload matched its check value.
    Payload(Signal),
    /// A control or reserved code; passed through unchecked.
    Passthrough(Signal),
}

/// Receiving half: validates `[check, payload]` pairs.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    sequence: u32,
    pending: Option<Signal>,
}

impl Verifier {
    /// Start at sequence zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one received signal.
    pub fn observe(&mut self, signal: Signal) -> Result<Verified, IntegrityError> {
        match signal.kind() {
            SignalKind::Check(_) => {
                if self.pending.is_some() {
                    return Err(IntegrityError::UnexpectedCheck(signal));
                }
                self.pending = Some(signal);
                Ok(Verified::Armed)
            }
            SignalKind::Payload(_) => {
                let received = self
                    .pending
                    .take()
                    .ok_or(IntegrityError::MissingCheck(signal))?;
                let sequence = self.sequence;
                self.sequence = self.sequence.wrapping_add(1);

                let expected = check_value(sequence, signal);
                if expected != received {
                    return Err(IntegrityError::Mismatch {
                        sequence,
                        expected,
                        received,
                    });
                }
                Ok(Verified::Payload(signal))
            }
            SignalKind::Control(_) | SignalKind::Reserved(_) => Ok(Verified::Passthrough(signal)),
        }
    }

    /// Whether a check value is waiting for its payload.
    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }
}
