//! hvcC (ISO/IEC 14496-15 HEVCDecoderConfigurationRecord) unwrapping.

use byteorder::{BigEndian, ByteOrder};

use mb_common::BitstreamError;

use crate::annexb::START_CODE;
use crate::avcc::{take, AnnexbConfig};

/// Byte offset of numOfArrays in an hvcC record.
const ARRAYS_OFFSET: usize = 22;

/// Whether extradata is an hvcC record rather than raw Annex-B.
pub fn is_hvcc(extra: &[u8]) -> bool {
    extra.len() > ARRAYS_OFFSET && extra[0] == 1
}

/// Convert an hvcC record to Annex-B parameter sets (VPS/SPS/PPS arrays).
pub fn to_annexb(extra: &[u8]) -> Result<AnnexbConfig, BitstreamError> {
    if !is_hvcc(extra) {
        return Err(BitstreamError::Invalid { what: "hvcC record" });
    }

    let nal_length_size = (extra[ARRAYS_OFFSET - 1] & 0x03) + 1;
    let array_count = extra[ARRAYS_OFFSET] as usize;
    let mut pos = ARRAYS_OFFSET + 1;

    let mut data = Vec::with_capacity(extra.len() + 32);
    for _ in 0..array_count {
        // array_completeness (1) + reserved (1) + NAL_unit_type (6)
        let _header = take(extra, &mut pos, 1)?[0];
        let nalu_count = BigEndian::read_u16(take(extra, &mut pos, 2)?) as usize;
        for _ in 0..nalu_count {
            let len = BigEndian::read_u16(take(extra, &mut pos, 2)?) as usize;
            let nal = take(extra, &mut pos, len)?;
            data.extend_from_slice(&START_CODE);
            data.extend_from_slice(nal);
        }
    }

    Ok(AnnexbConfig {
        data,
        nal_length_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an hvcC record holding the given parameter-set arrays.
    fn sample_hvcc(arrays: &[(u8, &[&[u8]])], length_size_minus_one: u8) -> Vec<u8> {
        let mut rec = vec![0u8; ARRAYS_OFFSET + 1];
        rec[0] = 1; // configurationVersion
        rec[ARRAYS_OFFSET - 1] = 0xFC | length_size_minus_one;
        rec[ARRAYS_OFFSET] = arrays.len() as u8;
        for &(nal_type, nalus) in arrays {
            rec.push(0x80 | nal_type);
            rec.extend_from_slice(&(nalus.len() as u16).to_be_bytes());
            for nalu in nalus {
                rec.extend_from_slice(&(nalu.len() as u16).to_be_bytes());
                rec.extend_from_slice(nalu);
            }
        }
        rec
    }

    #[test]
    fn detects_hvcc() {
        let rec = sample_hvcc(&[(32, &[&[0x40, 0x01]])], 3);
        assert!(is_hvcc(&rec));
        assert!(!is_hvcc(&[0u8; 10]));
    }

    #[test]
    fn converts_arrays_in_order() {
        let vps: &[u8] = &[0x40, 0x01, 0x0C];
        let sps: &[u8] = &[0x42, 0x01, 0x01];
        let pps: &[u8] = &[0x44, 0x01];
        let rec = sample_hvcc(&[(32, &[vps]), (33, &[sps]), (34, &[pps])], 3);

        let cfg = to_annexb(&rec).unwrap();
        assert_eq!(cfg.nal_length_size, 4);

        let mut expect = Vec::new();
        for nal in [vps, sps, pps] {
            expect.extend_from_slice(&START_CODE);
            expect.extend_from_slice(nal);
        }
        assert_eq!(cfg.data, expect);
    }

    #[test]
    fn truncated_record_errors() {
        let mut rec = sample_hvcc(&[(33, &[&[0x42, 0x01, 0x01]])], 3);
        rec.truncate(rec.len() - 2);
        assert!(matches!(
            to_annexb(&rec),
            Err(BitstreamError::Truncated { .. })
        ));
    }
}
