//! Error types for layerscope-core.
//!
//! - [`enum@Error`] - Top-level error returned by setup and pipeline calls
//! - [`DecodeError`] - Per-layer decode failures, folded into a [`ParseOutcome`]
//! - [`MuxError`] - Registration conflicts, reported at setup time only
//! - [`RefcountInvariantViolation`] - Reference counting bugs; never returned,
//!   always fatal
//!
//! [`ParseOutcome`]: crate::dispatch::ParseOutcome

use thiserror::Error;

use crate::mux::{KeyRange, TransportKind};

/// Main error type for layerscope-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Decoder registration failed
    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),

    /// Worker pipeline failure
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a decoder could not produce its layer.
///
/// `Truncated` means the capture stopped early (information loss, the frame
/// itself may be fine). `Malformed` means the frame is invalid even in its
/// full on-wire length.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Captured bytes end before the header does
    #[error("{protocol}: truncated capture (need {needed} bytes, captured {captured})")]
    Truncated {
        protocol: &'static str,
        needed: usize,
        captured: usize,
    },

    /// Protocol violation
    #[error("{protocol}: malformed: {reason}")]
    Malformed {
        protocol: &'static str,
        reason: String,
    },
}

impl DecodeError {
    pub fn malformed(protocol: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Malformed {
            protocol,
            reason: reason.into(),
        }
    }

    /// Name of the protocol that raised the error.
    pub fn protocol(&self) -> &'static str {
        match self {
            DecodeError::Truncated { protocol, .. } | DecodeError::Malformed { protocol, .. } => {
                protocol
            }
        }
    }
}

/// Errors raised while editing the muxing tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// The exact same key range is already bound to another decoder
    #[error("{kind} {range} is already bound to {existing}, refusing to bind {requested}")]
    DuplicateBinding {
        kind: TransportKind,
        range: KeyRange,
        existing: &'static str,
        requested: &'static str,
    },

    /// Two different ranges of equal width overlap, so neither is more specific
    #[error("{kind} {range} overlaps {other} (bound to {existing}) with equal specificity")]
    OverlappingBinding {
        kind: TransportKind,
        range: KeyRange,
        other: KeyRange,
        existing: &'static str,
    },
}

/// Worker pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The pipeline was shut down and no longer accepts frames
    #[error("pipeline is closed")]
    Closed,

    /// The queue is full and the caller asked not to wait
    #[error("pipeline queue is full")]
    Full,

    /// A worker thread could not be started
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
}

/// A broken reference counting invariant.
///
/// These are programming errors. They are never returned to a caller: the
/// reclaim layer logs them and aborts the process, since a corrupted count
/// means a use-after-free may already be under way.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefcountInvariantViolation {
    #[error("release of a {type_name} whose reference count is already zero")]
    Underflow { type_name: &'static str },

    #[error("{type_name} acquired after the reclaimer started destroying it")]
    UseAfterReclaim { type_name: &'static str },

    #[error("{type_name} found on death row without its queued marker")]
    NotQueued { type_name: &'static str },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::Truncated {
            protocol: "ipv4",
            needed: 20,
            captured: 10,
        };
        assert_eq!(
            err.to_string(),
            "ipv4: truncated capture (need 20 bytes, captured 10)"
        );
        assert_eq!(err.protocol(), "ipv4");

        let err = DecodeError::malformed("dns", "label too long");
        assert_eq!(err.to_string(), "dns: malformed: label too long");
    }

    #[test]
    fn test_mux_error_converts() {
        let err: Error = MuxError::DuplicateBinding {
            kind: TransportKind::UdpPort,
            range: KeyRange::exact(53),
            existing: "dns",
            requested: "custom",
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Mux error: udp port 53 is already bound to dns, refusing to bind custom"
        );
    }
}
