//! Host-side output seam.
//!
//! The host hands compressed packets in through [`crate::Decoder::decode`]
//! and receives decoded media back through this trait: one call per picture,
//! one per audio block, plus a format-reconfirmation call whenever the
//! output geometry changes. Implementations are called from the output pump
//! thread and must not call back into the decoder.

use thiserror::Error;

use mb_common::{AudioBlock, FrameLayout, Micros, PixelFormat, Rational, Resolution};

use crate::inflight::OpaquePicture;

/// The host cannot represent the proposed output format.
#[derive(Copy, Clone, Debug, Error)]
#[error("host rejected the output format")]
pub struct HostRejected;

/// Video output format negotiated with the host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoFormat {
    pub pixel_format: PixelFormat,
    /// Visible dimensions (crop applied).
    pub resolution: Resolution,
    pub sar: Option<Rational>,
    /// Frames are surface-bound [`OpaquePicture`]s rather than pixel data.
    pub opaque: bool,
}

/// Audio output format negotiated with the host (16-bit native-endian PCM).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u32,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Bytes per interleaved sample frame.
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * 2
    }
}

/// One decoded picture handed to the host.
#[derive(Debug)]
pub struct Picture {
    pub pts: Micros,
    pub content: PictureContent,
}

#[derive(Debug)]
pub enum PictureContent {
    /// Tightly packed pixel data (copy mode).
    Raw { layout: FrameLayout, data: Vec<u8> },
    /// Surface-bound frame (direct rendering).
    Opaque(OpaquePicture),
}

/// Egress interface implemented by the host.
pub trait HostOutput: Send + Sync {
    /// The video output format changed; a rejection is fatal to the stream
    /// except during the direct-rendering probe at start, where it selects
    /// copy mode instead.
    fn video_format_changed(&self, format: &VideoFormat) -> Result<(), HostRejected>;

    fn audio_format_changed(&self, format: &AudioFormat) -> Result<(), HostRejected>;

    fn queue_picture(&self, picture: Picture);

    fn queue_audio(&self, block: AudioBlock);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_frame_is_16bit_interleaved() {
        let fmt = AudioFormat {
            channels: 6,
            sample_rate: 48_000,
        };
        assert_eq!(fmt.bytes_per_frame(), 12);
    }
}
