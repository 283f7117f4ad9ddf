//! Central error types for the bridge (thiserror-based).

use thiserror::Error;

use crate::codec::FourCc;

/// Failures surfaced by a platform codec implementation.
///
/// Any of these is fatal to the decoder: the controller latches its error
/// state and subsequent `decode` calls fail.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("platform library unavailable: {0}")]
    Library(String),

    #[error("{call} failed with status {status}")]
    Call { call: &'static str, status: i32 },

    #[error("codec operation before start")]
    NotStarted,

    #[error("unknown buffer index {index}")]
    InvalidIndex { index: u32 },
}

/// Bitstream unwrapping and parsing errors.
#[derive(Error, Debug)]
pub enum BitstreamError {
    #[error("truncated data: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("invalid {what}")]
    Invalid { what: &'static str },

    #[error("unsupported NAL length size {0}")]
    NalLengthSize(u8),
}

/// Top-level decoder errors seen by the host.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("unsupported stream: {0}")]
    Unsupported(String),

    #[error("unsupported codec {0}")]
    UnsupportedCodec(FourCc),

    #[error("malformed codec configuration: {0}")]
    MalformedConfig(String),

    #[error("platform codec failure: {0}")]
    Platform(#[from] PlatformError),

    #[error("bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    #[error("host rejected the updated output format")]
    HostRejected,

    #[error("decoder is in the fatal error state")]
    Fatal,
}

/// Convenience Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_error_display() {
        let e = PlatformError::Call {
            call: "dequeue_out",
            status: -10000,
        };
        assert_eq!(e.to_string(), "dequeue_out failed with status -10000");
    }

    #[test]
    fn platform_error_converts() {
        let e: BridgeError = PlatformError::NotStarted.into();
        assert!(matches!(e, BridgeError::Platform(_)));
    }

    #[test]
    fn unsupported_codec_display() {
        let e = BridgeError::UnsupportedCodec(FourCc::new(b"zzzz"));
        assert_eq!(e.to_string(), "unsupported codec zzzz");
    }
}
