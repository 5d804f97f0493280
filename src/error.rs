//! Error types shared by every node in the graph.

use thiserror::Error;

use crate::format::AudioFormat;

/// Errors surfaced by connection, streaming and mixer operations.
///
/// "No data yet" is never an error: it is reported as
/// [`ReadResult::Empty`](crate::ReadResult::Empty).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioError {
    /// Two nodes with incompatible formats were about to be linked.
    #[error("format mismatch: expected {expected}, got {actual}")]
    FormatMismatch {
        /// Format of the node initiating the check.
        expected: AudioFormat,
        /// Format of the other node.
        actual: AudioFormat,
    },

    /// A constructor or method received an invalid parameter.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is illegal in the node's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The node has been disposed.
    #[error("node '{0}' has been disposed")]
    Disposed(String),

    /// A source or target failed inside its own read/write implementation.
    #[error("upstream fault: {0}")]
    Upstream(String),

    /// A codec could not be initialized from its stream or parameters.
    #[error("codec initialization failed: {0}")]
    CodecInit(String),

    /// A waiting operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,
}

impl AudioError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        AudioError::InvalidArgument(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        AudioError::InvalidState(msg.into())
    }
}

/// Convenience result type for graph operations.
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_mismatch_display_names_both_formats() {
        let err = AudioError::FormatMismatch {
            expected: AudioFormat::mono(48000),
            actual: AudioFormat::stereo(44100),
        };
        let msg = err.to_string();
        assert!(msg.contains("48000Hz 1ch"), "got: {msg}");
        assert!(msg.contains("44100Hz 2ch"), "got: {msg}");
    }

    #[test]
    fn disposed_display() {
        let err = AudioError::Disposed("mic".to_string());
        assert_eq!(err.to_string(), "node 'mic' has been disposed");
    }
}
