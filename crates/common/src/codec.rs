//! Codec identifiers and the platform mime-type table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Four-character codec tag as delivered by the host demuxer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const fn new(tag: &[u8; 4]) -> Self {
        Self(*tag)
    }
}

impl Default for FourCc {
    fn default() -> Self {
        Self([0; 4])
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({self})")
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "[{b:02x}]")?;
            }
        }
        Ok(())
    }
}

/// Video codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    Hevc,
    H263,
    Mpeg4,
    Wmv3,
    Vc1,
    Vp8,
    Vp9,
}

impl VideoCodec {
    /// Platform decoder mime string.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::H264 => "video/avc",
            Self::Hevc => "video/hevc",
            Self::H263 => "video/3gpp",
            Self::Mpeg4 => "video/mp4v-es",
            Self::Wmv3 => "video/x-ms-wmv",
            Self::Vc1 => "video/wvc1",
            Self::Vp8 => "video/x-vnd.on2.vp8",
            Self::Vp9 => "video/x-vnd.on2.vp9",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::Hevc => "H.265/HEVC",
            Self::H263 => "H.263",
            Self::Mpeg4 => "MPEG-4 Visual",
            Self::Wmv3 => "WMV3",
            Self::Vc1 => "VC-1",
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
        }
    }
}

/// Audio codec identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
    Mp3,
    Ac3,
    Eac3,
    Opus,
    Vorbis,
    Flac,
    Alac,
    Dts,
    AmrNb,
    AmrWb,
    G711Alaw,
    G711Mlaw,
    Qcelp,
    Gsm,
}

impl AudioCodec {
    /// Platform decoder mime string.
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Aac => "audio/mp4a-latm",
            Self::Mp3 => "audio/mpeg",
            Self::Ac3 => "audio/ac3",
            Self::Eac3 => "audio/eac3",
            Self::Opus => "audio/opus",
            Self::Vorbis => "audio/vorbis",
            Self::Flac => "audio/flac",
            Self::Alac => "audio/alac",
            Self::Dts => "audio/vnd.dts",
            Self::AmrNb => "audio/3gpp",
            Self::AmrWb => "audio/amr-wb",
            Self::G711Alaw => "audio/g711-alaw",
            Self::G711Mlaw => "audio/g711-mlaw",
            Self::Qcelp => "audio/qcelp",
            Self::Gsm => "audio/gsm",
        }
    }
}

/// Unified codec identifier for a stream handed to the bridge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodecId {
    Video(VideoCodec),
    Audio(AudioCodec),
}

impl CodecId {
    /// Map a host four-character tag onto a codec the platform table knows.
    ///
    /// Returns `None` for tags outside the table; the decoder declines to
    /// open those streams.
    pub fn from_fourcc(tag: FourCc) -> Option<Self> {
        let id = match &tag.0 {
            b"h264" | b"avc1" | b"H264" => Self::Video(VideoCodec::H264),
            b"hevc" | b"hvc1" | b"hev1" => Self::Video(VideoCodec::Hevc),
            b"h263" | b"s263" => Self::Video(VideoCodec::H263),
            b"mp4v" => Self::Video(VideoCodec::Mpeg4),
            b"WMV3" | b"wmv3" => Self::Video(VideoCodec::Wmv3),
            b"WVC1" | b"wvc1" => Self::Video(VideoCodec::Vc1),
            b"VP80" | b"vp08" => Self::Video(VideoCodec::Vp8),
            b"VP90" | b"vp09" => Self::Video(VideoCodec::Vp9),
            b"mp4a" => Self::Audio(AudioCodec::Aac),
            b"mp3 " | b"mpga" => Self::Audio(AudioCodec::Mp3),
            b"a52 " | b"ac-3" => Self::Audio(AudioCodec::Ac3),
            b"eac3" => Self::Audio(AudioCodec::Eac3),
            b"Opus" | b"opus" => Self::Audio(AudioCodec::Opus),
            b"vorb" => Self::Audio(AudioCodec::Vorbis),
            b"flac" => Self::Audio(AudioCodec::Flac),
            b"alac" => Self::Audio(AudioCodec::Alac),
            b"dts " | b"DTS " => Self::Audio(AudioCodec::Dts),
            b"samr" => Self::Audio(AudioCodec::AmrNb),
            b"sawb" => Self::Audio(AudioCodec::AmrWb),
            b"alaw" => Self::Audio(AudioCodec::G711Alaw),
            b"ulaw" => Self::Audio(AudioCodec::G711Mlaw),
            b"Qclp" => Self::Audio(AudioCodec::Qcelp),
            b"gsm " => Self::Audio(AudioCodec::Gsm),
            _ => return None,
        };
        Some(id)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Video(v) => v.mime_type(),
            Self::Audio(a) => a.mime_type(),
        }
    }

    pub fn is_video(self) -> bool {
        matches!(self, Self::Video(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_mime_table() {
        assert_eq!(VideoCodec::H264.mime_type(), "video/avc");
        assert_eq!(VideoCodec::Hevc.mime_type(), "video/hevc");
        assert_eq!(VideoCodec::Mpeg4.mime_type(), "video/mp4v-es");
        assert_eq!(VideoCodec::Vc1.mime_type(), "video/wvc1");
        assert_eq!(VideoCodec::Vp8.mime_type(), "video/x-vnd.on2.vp8");
        assert_eq!(VideoCodec::Vp9.mime_type(), "video/x-vnd.on2.vp9");
    }

    #[test]
    fn audio_mime_table() {
        assert_eq!(AudioCodec::Aac.mime_type(), "audio/mp4a-latm");
        assert_eq!(AudioCodec::Mp3.mime_type(), "audio/mpeg");
        assert_eq!(AudioCodec::Ac3.mime_type(), "audio/ac3");
        assert_eq!(AudioCodec::Eac3.mime_type(), "audio/eac3");
        assert_eq!(AudioCodec::Dts.mime_type(), "audio/vnd.dts");
        assert_eq!(AudioCodec::G711Alaw.mime_type(), "audio/g711-alaw");
        assert_eq!(AudioCodec::G711Mlaw.mime_type(), "audio/g711-mlaw");
    }

    #[test]
    fn fourcc_lookup() {
        assert_eq!(
            CodecId::from_fourcc(FourCc::new(b"avc1")),
            Some(CodecId::Video(VideoCodec::H264))
        );
        assert_eq!(
            CodecId::from_fourcc(FourCc::new(b"Opus")),
            Some(CodecId::Audio(AudioCodec::Opus))
        );
        assert_eq!(CodecId::from_fourcc(FourCc::new(b"zzzz")), None);
    }

    #[test]
    fn fourcc_display() {
        assert_eq!(FourCc::new(b"avc1").to_string(), "avc1");
        assert_eq!(FourCc([0x01, b'a', b'b', b'c']).to_string(), "[01]abc");
    }
}
