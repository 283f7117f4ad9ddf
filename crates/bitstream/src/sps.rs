//! H.264 sequence parameter set parsing.
//!
//! Parses just enough of an SPS to recover the coded picture dimensions and
//! the profile, which gate the platform decoder start and drive the
//! restart-on-resolution-change decision. Everything else is skipped at the
//! bit level.

use mb_common::BitstreamError;

/// Profiles whose SPS carries the extended chroma/bit-depth block.
const HIGH_PROFILES: [u32; 11] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 144];

/// Parsed SPS fields the bridge cares about.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsInfo {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub width: u32,
    pub height: u32,
}

/// Parse an SPS NAL unit (header byte included, emulation bytes intact).
pub fn parse_sps(nal: &[u8]) -> Result<SpsInfo, BitstreamError> {
    if nal.len() < 4 {
        return Err(BitstreamError::Truncated {
            expected: 4,
            got: nal.len(),
        });
    }
    if nal[0] & 0x1F != 7 {
        return Err(BitstreamError::Invalid { what: "SPS NAL" });
    }

    let rbsp = strip_emulation(&nal[1..]);
    let mut r = BitReader::new(&rbsp);

    let profile_idc = r.read_bits(8)?;
    r.read_bits(8)?; // constraint flags + reserved
    let level_idc = r.read_bits(8)?;
    r.read_ue()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    if HIGH_PROFILES.contains(&profile_idc) {
        chroma_format_idc = r.read_ue()?;
        if chroma_format_idc == 3 {
            r.read_bit()?; // separate_colour_plane_flag
        }
        r.read_ue()?; // bit_depth_luma_minus8
        r.read_ue()?; // bit_depth_chroma_minus8
        r.read_bit()?; // qpprime_y_zero_transform_bypass_flag
        if r.read_bit()? == 1 {
            // seq_scaling_matrix_present_flag
            let lists = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..lists {
                if r.read_bit()? == 1 {
                    skip_scaling_list(&mut r, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    r.read_ue()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = r.read_ue()?;
    if pic_order_cnt_type == 0 {
        r.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        r.read_bit()?; // delta_pic_order_always_zero_flag
        r.read_se()?; // offset_for_non_ref_pic
        r.read_se()?; // offset_for_top_to_bottom_field
        let cycle_len = r.read_ue()?;
        for _ in 0..cycle_len {
            r.read_se()?;
        }
    }
    r.read_ue()?; // max_num_ref_frames
    r.read_bit()?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = r.read_ue()? + 1;
    let pic_height_in_map_units = r.read_ue()? + 1;
    let frame_mbs_only = r.read_bit()?;
    if frame_mbs_only == 0 {
        r.read_bit()?; // mb_adaptive_frame_field_flag
    }
    r.read_bit()?; // direct_8x8_inference_flag

    let mut width = pic_width_in_mbs * 16;
    let mut height = (2 - frame_mbs_only) * pic_height_in_map_units * 16;

    if r.read_bit()? == 1 {
        // frame_cropping_flag
        let crop_left = r.read_ue()?;
        let crop_right = r.read_ue()?;
        let crop_top = r.read_ue()?;
        let crop_bottom = r.read_ue()?;

        let (sub_w, sub_h) = match chroma_format_idc {
            0 | 3 => (1, 1),
            2 => (2, 1),
            _ => (2, 2),
        };
        let unit_x = sub_w;
        let unit_y = sub_h * (2 - frame_mbs_only);
        width = width.saturating_sub((crop_left + crop_right) * unit_x);
        height = height.saturating_sub((crop_top + crop_bottom) * unit_y);
    }

    Ok(SpsInfo {
        profile_idc: profile_idc as u8,
        level_idc: level_idc as u8,
        width,
        height,
    })
}

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`).
fn strip_emulation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0;
    for &b in data {
        if zeros >= 2 && b == 3 {
            zeros = 0;
            continue;
        }
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
        out.push(b);
    }
    out
}

fn skip_scaling_list(r: &mut BitReader<'_>, size: u32) -> Result<(), BitstreamError> {
    let mut last = 8i32;
    let mut next = 8i32;
    for _ in 0..size {
        if next != 0 {
            let delta = r.read_se()?;
            next = (last + delta + 256) % 256;
        }
        if next != 0 {
            last = next;
        }
    }
    Ok(())
}

/// MSB-first bit reader over an RBSP.
struct BitReader<'a> {
    data: &'a [u8],
    bit: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, bit: 0 }
    }

    fn read_bit(&mut self) -> Result<u32, BitstreamError> {
        let byte = self.bit / 8;
        if byte >= self.data.len() {
            return Err(BitstreamError::Truncated {
                expected: byte + 1,
                got: self.data.len(),
            });
        }
        let bit = (self.data[byte] >> (7 - self.bit % 8)) & 1;
        self.bit += 1;
        Ok(bit as u32)
    }

    fn read_bits(&mut self, n: u32) -> Result<u32, BitstreamError> {
        let mut val = 0;
        for _ in 0..n {
            val = (val << 1) | self.read_bit()?;
        }
        Ok(val)
    }

    /// Exp-Golomb unsigned.
    fn read_ue(&mut self) -> Result<u32, BitstreamError> {
        let mut zeros = 0;
        while self.read_bit()? == 0 {
            zeros += 1;
            if zeros > 31 {
                return Err(BitstreamError::Invalid {
                    what: "exp-golomb code",
                });
            }
        }
        let suffix = self.read_bits(zeros)?;
        Ok((1u32 << zeros) - 1 + suffix)
    }

    /// Exp-Golomb signed.
    fn read_se(&mut self) -> Result<i32, BitstreamError> {
        let ue = self.read_ue()?;
        let magnitude = ue.div_ceil(2) as i32;
        Ok(if ue % 2 == 1 { magnitude } else { -magnitude })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hand-assembled baseline SPS NAL units (no emulation sequences).
    const SPS_320X240: [u8; 8] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x0A, 0x0F, 0xC8];
    const SPS_640X480: [u8; 9] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80];
    const SPS_1920X1080_CROPPED: [u8; 10] =
        [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x03, 0xC0, 0x11, 0x3F, 0x2A];

    #[test]
    fn parses_baseline_dimensions() {
        let info = parse_sps(&SPS_320X240).unwrap();
        assert_eq!(info.profile_idc, 66);
        assert_eq!(info.level_idc, 30);
        assert_eq!(info.width, 320);
        assert_eq!(info.height, 240);

        let info = parse_sps(&SPS_640X480).unwrap();
        assert_eq!(info.width, 640);
        assert_eq!(info.height, 480);
    }

    #[test]
    fn applies_frame_cropping() {
        let info = parse_sps(&SPS_1920X1080_CROPPED).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
    }

    #[test]
    fn rejects_non_sps() {
        // PPS header byte
        assert!(matches!(
            parse_sps(&[0x68, 0xCE, 0x38, 0x80]),
            Err(BitstreamError::Invalid { .. })
        ));
    }

    #[test]
    fn rejects_truncated() {
        assert!(matches!(
            parse_sps(&SPS_320X240[..5]),
            Err(BitstreamError::Truncated { .. })
        ));
    }

    #[test]
    fn emulation_bytes_are_stripped() {
        assert_eq!(strip_emulation(&[0x00, 0x00, 0x03, 0x01]), [0x00, 0x00, 0x01]);
        assert_eq!(
            strip_emulation(&[0x01, 0x00, 0x00, 0x03, 0x00, 0x00, 0x03]),
            [0x01, 0x00, 0x00, 0x00, 0x00]
        );
        // 03 not preceded by two zeros stays
        assert_eq!(strip_emulation(&[0x00, 0x03, 0x00]), [0x00, 0x03, 0x00]);
    }

    #[test]
    fn exp_golomb_codes() {
        // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let data = [0b1_010_011_0, 0b0100_0000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
    }

    #[test]
    fn signed_exp_golomb() {
        // ue 1 -> se +1, ue 2 -> se -1, ue 3 -> se +2
        let data = [0b010_011_00, 0b100_00000];
        let mut r = BitReader::new(&data);
        assert_eq!(r.read_se().unwrap(), 1);
        assert_eq!(r.read_se().unwrap(), -1);
        assert_eq!(r.read_se().unwrap(), 2);
    }
}
