//! Configuration structs for the bridge and per-codec quirk table.

use serde::{Deserialize, Serialize};

use crate::codec::{AudioCodec, CodecId, FourCc, VideoCodec};
use crate::types::Rational;

/// Host-tunable bridge options.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Hand decoded frames to the host surface without copying through user
    /// memory (video only; requires a surface at open).
    pub direct_rendering: bool,
    /// Route audio streams through the platform decoder.
    pub audio: bool,
    /// Largest channel count the host can take per block; decoded buffers
    /// with more channels go through channel extraction.
    pub max_output_channels: u8,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            direct_rendering: true,
            audio: false,
            max_output_channels: 8,
        }
    }
}

/// Stream-level parameters delivered by the host demuxer.
///
/// Mutable over the stream's life: the host may re-deliver with a late
/// channel count or late extradata, which un-gates a deferred start.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StreamParams {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    pub sar: Option<Rational>,
    pub channels: u32,
    pub sample_rate: u32,
    pub extradata: Vec<u8>,
}

/// Per-codec behavior adjustments for the platform decoder.
///
/// The platform cannot be probed for these; the table encodes which codecs
/// refuse to start without configuration data, a frame size, or a channel
/// count, and which report padded slice heights that must be ignored.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quirks {
    /// Refuse to start until codec-specific data is available.
    pub need_csd: bool,
    /// Refuse to start until width and height are known.
    pub video_need_size: bool,
    /// Refuse to start until the channel count is known.
    pub audio_need_channels: bool,
    /// Reported slice height is padding; treat it as the visible height.
    pub video_ignore_padding: bool,
}

impl Quirks {
    /// Look up the quirk set for a codec.
    pub fn for_codec(codec: CodecId) -> Self {
        match codec {
            CodecId::Video(v) => Self {
                video_need_size: true,
                need_csd: matches!(v, VideoCodec::Mpeg4 | VideoCodec::Wmv3 | VideoCodec::Vc1),
                ..Self::default()
            },
            CodecId::Audio(a) => Self {
                need_csd: matches!(
                    a,
                    AudioCodec::Aac
                        | AudioCodec::Vorbis
                        | AudioCodec::Opus
                        | AudioCodec::Flac
                        | AudioCodec::Alac
                ),
                audio_need_channels: matches!(
                    a,
                    AudioCodec::Aac | AudioCodec::Vorbis | AudioCodec::Opus
                ),
                ..Self::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = BridgeConfig::default();
        assert!(cfg.direct_rendering);
        assert!(!cfg.audio);
        assert_eq!(cfg.max_output_channels, 8);
    }

    #[test]
    fn config_json_roundtrip() {
        let cfg = BridgeConfig {
            direct_rendering: false,
            audio: true,
            max_output_channels: 2,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: BridgeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.direct_rendering, cfg.direct_rendering);
        assert_eq!(back.audio, cfg.audio);
        assert_eq!(back.max_output_channels, cfg.max_output_channels);
    }

    #[test]
    fn video_quirks() {
        let q = Quirks::for_codec(CodecId::Video(VideoCodec::H264));
        assert!(q.video_need_size);
        assert!(!q.need_csd);

        let q = Quirks::for_codec(CodecId::Video(VideoCodec::Mpeg4));
        assert!(q.need_csd);
    }

    #[test]
    fn audio_quirks() {
        let q = Quirks::for_codec(CodecId::Audio(AudioCodec::Vorbis));
        assert!(q.need_csd);
        assert!(q.audio_need_channels);
        assert!(!q.video_need_size);

        let q = Quirks::for_codec(CodecId::Audio(AudioCodec::Mp3));
        assert_eq!(q, Quirks::default());
    }
}
