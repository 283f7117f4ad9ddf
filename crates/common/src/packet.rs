//! Compressed packets in, decoded audio blocks and frame layouts out.

use crate::types::{CropWindow, Micros, PixelFormat};

/// Flags carried by an input packet, mirroring the host's block flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags {
    /// Stream discontinuity precedes this packet; pending output is stale.
    pub discontinuity: bool,
    /// Payload is known to be damaged and must not reach the codec.
    pub corrupted: bool,
    /// Decode for reference only; do not display.
    pub preroll: bool,
    /// Out-of-band codec configuration rather than payload.
    pub codec_config: bool,
    /// Interlaced content.
    pub interlaced: bool,
}

/// One compressed elementary-stream packet from the host.
///
/// Ownership transfers to the decoder on `decode`; the packet is consumed
/// exactly once (queued to the platform codec or dropped).
#[derive(Clone, Debug, Default)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: Option<Micros>,
    pub dts: Option<Micros>,
    pub flags: PacketFlags,
}

impl Packet {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }

    pub fn with_pts(mut self, pts: Micros) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: Micros) -> Self {
        self.dts = Some(dts);
        self
    }

    /// Timestamp queued to the platform codec: PTS, falling back to DTS.
    pub fn queue_ts(&self) -> Micros {
        self.pts.or(self.dts).unwrap_or(Micros::ZERO)
    }
}

/// Memory layout of a decoded video buffer in copy mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameLayout {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row; `<= 0` means tightly packed at `width`.
    pub stride: i32,
    /// Rows allocated per plane; `<= 0` means tightly packed at `height`.
    pub slice_height: i32,
    pub crop: CropWindow,
}

impl FrameLayout {
    /// Effective stride, padding resolved.
    pub fn row_bytes(&self) -> usize {
        if self.stride > 0 {
            self.stride as usize
        } else {
            self.width as usize
        }
    }

    /// Effective plane height, padding resolved.
    pub fn plane_rows(&self) -> usize {
        if self.slice_height > 0 {
            self.slice_height as usize
        } else {
            self.height as usize
        }
    }
}

/// One decoded, interleaved signed-16-bit audio block.
#[derive(Clone, Debug)]
pub struct AudioBlock {
    pub data: Vec<u8>,
    pub nb_samples: u32,
    pub channels: u32,
    pub pts: Micros,
    /// Duration covered by this block.
    pub length: Micros,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_ts_prefers_pts() {
        let p = Packet::new(vec![0u8; 4])
            .with_pts(Micros(1_000))
            .with_dts(Micros(900));
        assert_eq!(p.queue_ts(), Micros(1_000));
    }

    #[test]
    fn queue_ts_falls_back_to_dts() {
        let p = Packet::new(vec![0u8; 4]).with_dts(Micros(900));
        assert_eq!(p.queue_ts(), Micros(900));
        assert_eq!(Packet::new(vec![]).queue_ts(), Micros::ZERO);
    }

    #[test]
    fn layout_padding_fallbacks() {
        let layout = FrameLayout {
            width: 320,
            height: 240,
            stride: 0,
            slice_height: -1,
            ..FrameLayout::default()
        };
        assert_eq!(layout.row_bytes(), 320);
        assert_eq!(layout.plane_rows(), 240);

        let padded = FrameLayout {
            width: 320,
            height: 240,
            stride: 384,
            slice_height: 256,
            ..FrameLayout::default()
        };
        assert_eq!(padded.row_bytes(), 384);
        assert_eq!(padded.plane_rows(), 256);
    }
}
