//! `mb-bitstream` — NAL-unit massaging for the hardware decoder bridge.
//!
//! The platform decoder consumes Annex-B elementary streams, while hosts
//! commonly deliver length-prefixed NAL units with an avcC/hvcC extradata
//! record. This crate converts between the two and extracts the few SPS
//! fields the bridge needs:
//!
//! - [`annexb`] — start-code scanning, SPS/PPS location, length-prefix
//!   rewriting
//! - [`avcc`] — AVCDecoderConfigurationRecord unwrapping
//! - [`hvcc`] — HEVCDecoderConfigurationRecord unwrapping
//! - [`sps`] — H.264 SPS dimension/profile parsing

pub mod annexb;
pub mod avcc;
pub mod hvcc;
pub mod sps;

pub use annexb::{find_sps_pps, lengths_to_start_codes, nal_unit_type, H264NalType, NalUnits};
pub use avcc::AnnexbConfig;
pub use sps::{parse_sps, SpsInfo};
