//! avcC (ISO/IEC 14496-15 AVCDecoderConfigurationRecord) unwrapping.

use byteorder::{BigEndian, ByteOrder};

use mb_common::BitstreamError;

use crate::annexb::START_CODE;

/// Parameter sets converted to Annex-B, plus the in-band NAL length size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnexbConfig {
    /// Start-code-prefixed parameter set NAL units, in record order.
    pub data: Vec<u8>,
    /// Size of the length prefix used by payload NAL units (1-4 bytes).
    pub nal_length_size: u8,
}

/// Whether extradata is an avcC record rather than raw Annex-B.
pub fn is_avcc(extra: &[u8]) -> bool {
    extra.len() >= 7 && extra[0] == 1
}

/// Convert an avcC record to Annex-B parameter sets.
pub fn to_annexb(extra: &[u8]) -> Result<AnnexbConfig, BitstreamError> {
    if !is_avcc(extra) {
        return Err(BitstreamError::Invalid { what: "avcC record" });
    }

    let mut pos = 4; // version, profile, compat, level
    let nal_length_size = (take(extra, &mut pos, 1)?[0] & 0x03) + 1;
    let sps_count = take(extra, &mut pos, 1)?[0] & 0x1F;

    let mut data = Vec::with_capacity(extra.len() + 16);
    copy_sets(extra, &mut pos, sps_count as usize, &mut data)?;

    let pps_count = take(extra, &mut pos, 1)?[0];
    copy_sets(extra, &mut pos, pps_count as usize, &mut data)?;

    Ok(AnnexbConfig {
        data,
        nal_length_size,
    })
}

/// Copy `count` length-prefixed parameter sets as start-code NAL units.
pub(crate) fn copy_sets(
    extra: &[u8],
    pos: &mut usize,
    count: usize,
    out: &mut Vec<u8>,
) -> Result<(), BitstreamError> {
    for _ in 0..count {
        let len = BigEndian::read_u16(take(extra, pos, 2)?) as usize;
        let nal = take(extra, pos, len)?;
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(nal);
    }
    Ok(())
}

/// Bounds-checked slice advance.
pub(crate) fn take<'a>(
    data: &'a [u8],
    pos: &mut usize,
    n: usize,
) -> Result<&'a [u8], BitstreamError> {
    let end = pos.checked_add(n).ok_or(BitstreamError::Invalid {
        what: "record length",
    })?;
    if end > data.len() {
        return Err(BitstreamError::Truncated {
            expected: end,
            got: data.len(),
        });
    }
    let slice = &data[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an avcC record with one SPS and one PPS.
    fn sample_avcc(sps: &[u8], pps: &[u8], length_size_minus_one: u8) -> Vec<u8> {
        let mut rec = vec![
            1,    // configurationVersion
            0x42, // AVCProfileIndication
            0x00, // profile_compatibility
            0x1E, // AVCLevelIndication
            0xFC | length_size_minus_one,
            0xE0 | 1, // numOfSequenceParameterSets
        ];
        rec.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        rec.extend_from_slice(sps);
        rec.push(1); // numOfPictureParameterSets
        rec.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        rec.extend_from_slice(pps);
        rec
    }

    #[test]
    fn detects_avcc() {
        let rec = sample_avcc(&[0x67, 0x42], &[0x68, 0xCE], 3);
        assert!(is_avcc(&rec));
        assert!(!is_avcc(&START_CODE));
        assert!(!is_avcc(&[1, 2]));
    }

    #[test]
    fn converts_to_annexb() {
        let sps = [0x67, 0x42, 0x00, 0x1E];
        let pps = [0x68, 0xCE, 0x38, 0x80];
        let rec = sample_avcc(&sps, &pps, 3);

        let cfg = to_annexb(&rec).unwrap();
        assert_eq!(cfg.nal_length_size, 4);

        let mut expect = Vec::new();
        expect.extend_from_slice(&START_CODE);
        expect.extend_from_slice(&sps);
        expect.extend_from_slice(&START_CODE);
        expect.extend_from_slice(&pps);
        assert_eq!(cfg.data, expect);
    }

    #[test]
    fn length_size_from_record() {
        let rec = sample_avcc(&[0x67], &[0x68], 1);
        assert_eq!(to_annexb(&rec).unwrap().nal_length_size, 2);
    }

    #[test]
    fn truncated_record_errors() {
        let mut rec = sample_avcc(&[0x67, 0x42], &[0x68, 0xCE], 3);
        rec.truncate(9);
        assert!(matches!(
            to_annexb(&rec),
            Err(BitstreamError::Truncated { .. })
        ));
    }
}
