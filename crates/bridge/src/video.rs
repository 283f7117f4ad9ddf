//! Video media path: extradata parsing, in-band parameter-set tracking,
//! output-format handling and frame delivery.

use tracing::{debug, error, info, warn};

use mb_bitstream::annexb::{self, START_CODE};
use mb_bitstream::{avcc, hvcc, parse_sps};
use mb_common::{
    BridgeError, BridgeResult, CropWindow, FrameLayout, Packet, PixelFormat, Resolution,
    StreamParams, SurfaceHandle, VideoCodec,
};

use crate::controller::{BlockReaction, Inner, Media, State};
use crate::csd::CsdStore;
use crate::host::{Picture, PictureContent, VideoFormat};
use crate::inflight::{InflightRegistry, InflightSlot, OpaquePicture};
use crate::platform::{Output, OutputBuffer, VideoOutputFormat};
use crate::timestamp::TimestampFifo;

/// Per-stream video state owned by the controller.
#[derive(Debug)]
pub struct VideoState {
    pub codec: VideoCodec,
    /// Coded dimensions, from the host or the last adopted SPS.
    pub width: u32,
    pub height: u32,
    /// Length-prefix size of in-band NAL units; 0 means Annex-B input.
    pub nal_length_size: u8,
    pub h264_profile: Option<u8>,
    /// Buffer layout from the last output format event.
    pub layout: FrameLayout,
    pub surface: Option<SurfaceHandle>,
    pub reorder: TimestampFifo,
    pub inflight: InflightRegistry,
    /// Host-facing format, valid once `has_format` is set.
    pub fmt_out: VideoFormat,
}

impl VideoState {
    pub fn new(codec: VideoCodec, params: &StreamParams, surface: Option<SurfaceHandle>) -> Self {
        Self {
            codec,
            width: params.width,
            height: params.height,
            nal_length_size: 0,
            h264_profile: None,
            layout: FrameLayout::default(),
            surface,
            reorder: TimestampFifo::new(),
            inflight: InflightRegistry::new(),
            fmt_out: VideoFormat::default(),
        }
    }

    /// Configure the CSD store from host extradata.
    ///
    /// Unusable extradata is not an error here: the stream may still carry
    /// in-band parameter sets, and the caller falls back to passing the raw
    /// bytes through as a single blob.
    pub(crate) fn parse_extradata(&mut self, csd: &mut CsdStore, extra: &[u8]) {
        match self.codec {
            VideoCodec::H264 => {
                if avcc::is_avcc(extra) {
                    match avcc::to_annexb(extra) {
                        Ok(cfg) => {
                            self.nal_length_size = cfg.nal_length_size;
                            self.apply_h264_csd(csd, &cfg.data);
                        }
                        Err(e) => warn!(error = %e, "broken avcC extradata"),
                    }
                } else {
                    self.apply_h264_csd(csd, extra);
                }
            }
            VideoCodec::Hevc => {
                if hvcc::is_hvcc(extra) {
                    match hvcc::to_annexb(extra) {
                        Ok(cfg) => {
                            self.nal_length_size = cfg.nal_length_size;
                            csd.replace(vec![cfg.data]);
                        }
                        Err(e) => warn!(error = %e, "broken hvcC extradata"),
                    }
                }
            }
            _ => {}
        }
    }

    /// Adopt SPS/PPS found in `buf` if they differ from the current pair.
    ///
    /// Returns `Some(dimensions_changed)` when new parameter sets were
    /// written through to the store, `None` otherwise.
    pub(crate) fn apply_h264_csd(&mut self, csd: &mut CsdStore, buf: &[u8]) -> Option<bool> {
        let (sps_nal, pps_nal) = annexb::find_sps_pps(buf);
        let sps_nal = sps_nal?;
        let info = match parse_sps(sps_nal) {
            Ok(info) if info.width > 0 && info.height > 0 => info,
            _ => return None,
        };

        let mut blobs = vec![with_start_code(sps_nal)];
        if let Some(pps) = pps_nal {
            blobs.push(with_start_code(pps));
        }
        let as_slices: Vec<&[u8]> = blobs.iter().map(Vec::as_slice).collect();
        if csd.matches(&as_slices) {
            return None;
        }

        warn!(
            profile = info.profile_idc,
            width = info.width,
            height = info.height,
            sps_len = sps_nal.len(),
            pps_len = pps_nal.map_or(0, |p| p.len()),
            "new SPS/PPS found"
        );
        let size_changed = info.width != self.width || info.height != self.height;
        csd.replace(blobs);
        self.width = info.width;
        self.height = info.height;
        self.h264_profile = Some(info.profile_idc);
        Some(size_changed)
    }
}

fn with_start_code(nal: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(nal.len() + START_CODE.len());
    blob.extend_from_slice(&START_CODE);
    blob.extend_from_slice(nal);
    blob
}

/// Input-side hook run under the controller lock for every packet.
pub(crate) fn on_new_block(
    inner: &Inner,
    st: &mut State,
    pkt: &mut Packet,
) -> BridgeResult<BlockReaction> {
    let State {
        media,
        csd,
        params,
        started,
        ..
    } = st;
    let Media::Video(v) = media else {
        return Err(BridgeError::Unsupported("not a video stream".into()));
    };

    if pkt.flags.interlaced && !inner.codec.supports_interlaced() {
        return Err(BridgeError::Unsupported(
            "interlaced content not supported by the platform codec".into(),
        ));
    }

    let mut csd_changed = false;
    let mut size_changed = false;
    match v.codec {
        VideoCodec::H264 => {
            if v.nal_length_size > 0 {
                annexb::lengths_to_start_codes(&mut pkt.data, v.nal_length_size)?;
            } else if let Some(changed) = v.apply_h264_csd(csd, &pkt.data) {
                csd_changed = true;
                size_changed = changed;
            }
        }
        VideoCodec::Hevc => {
            if v.nal_length_size > 0 {
                annexb::lengths_to_start_codes(&mut pkt.data, v.nal_length_size)?;
            }
        }
        _ => {}
    }

    let mut reaction = BlockReaction::default();
    if csd_changed {
        if size_changed || !*started {
            warn!("parameter sets changed with new dimensions, restart needed");
            reaction.restart = true;
        } else {
            warn!("parameter sets changed, flush needed");
            reaction.flush = true;
        }
    }

    if !*started {
        reaction.restart = true;
        if inner.quirks.need_csd && params.extradata.is_empty() && csd.is_empty() {
            reaction.restart = false;
        }
        if inner.quirks.video_need_size && (v.width == 0 || v.height == 0) {
            debug!("waiting for a valid video size");
            reaction.restart = false;
        }
    }

    // Remember the DTS of packets without a PTS so the output side can
    // substitute it when the decoder returns a frame with no timestamp.
    v.reorder.push(match pkt.pts {
        Some(_) => None,
        None => pkt.dts,
    });

    Ok(reaction)
}

/// Output-side hook run by the pump for every dequeued video event.
pub(crate) fn process_output(inner: &Inner, st: &mut State, out: Output) -> BridgeResult<()> {
    match out {
        Output::VideoFormat(fmt) => handle_format(inner, st, fmt),
        Output::Buffer(buf) => handle_buffer(inner, st, buf),
        Output::AudioFormat(_) => Err(BridgeError::Unsupported(
            "audio format event on a video stream".into(),
        )),
    }
}

fn handle_format(inner: &Inner, st: &mut State, fmt: VideoOutputFormat) -> BridgeResult<()> {
    let direct = inner.codec.direct_rendering();
    let Media::Video(v) = &mut st.media else {
        return Err(BridgeError::Unsupported("not a video stream".into()));
    };

    info!(
        pixel_format = %fmt.pixel_format,
        width = fmt.width,
        height = fmt.height,
        stride = fmt.stride,
        slice_height = fmt.slice_height,
        crop_left = fmt.crop.left,
        crop_top = fmt.crop.top,
        crop_right = fmt.crop.right,
        crop_bottom = fmt.crop.bottom,
        "output format"
    );

    if !direct && !is_repackable(fmt.pixel_format) {
        error!(format = %fmt.pixel_format, "color format not recognized");
        return Err(BridgeError::Unsupported(format!(
            "cannot repack {}",
            fmt.pixel_format
        )));
    }

    let mut width = fmt.crop.width();
    let mut height = fmt.crop.height();
    if width <= 1 || height <= 1 {
        width = fmt.width as i32;
        height = fmt.height as i32;
    }
    v.fmt_out.resolution = Resolution::new(width.max(0) as u32, height.max(0) as u32);
    v.fmt_out.pixel_format = if direct {
        PixelFormat::OPAQUE
    } else {
        fmt.pixel_format
    };
    v.fmt_out.opaque = direct;

    v.layout = FrameLayout {
        pixel_format: fmt.pixel_format,
        width: fmt.width,
        height: fmt.height,
        stride: if fmt.stride <= 0 {
            fmt.width as i32
        } else {
            fmt.stride
        },
        slice_height: if fmt.slice_height <= 0 {
            fmt.height as i32
        } else {
            fmt.slice_height
        },
        crop: fmt.crop,
    };
    if inner.quirks.video_ignore_padding {
        v.layout.slice_height = 0;
        v.layout.stride = v.fmt_out.resolution.width as i32;
    }

    st.update_format = true;
    st.has_format = true;
    Ok(())
}

fn handle_buffer(inner: &Inner, st: &mut State, buf: OutputBuffer) -> BridgeResult<()> {
    let direct = inner.codec.direct_rendering();
    let State {
        media,
        params,
        update_format,
        has_format,
        preroll_end,
        ..
    } = st;
    let Media::Video(v) = media else {
        return Err(BridgeError::Unsupported("not a video stream".into()));
    };

    // Propagate the aspect ratio provided by the input so changes in it
    // reach the host.
    if let Some(sar) = params.sar {
        if v.fmt_out.sar != Some(sar) {
            v.fmt_out.sar = Some(sar);
            *update_format = true;
        }
    }

    if *update_format {
        *update_format = false;
        if inner.host.video_format_changed(&v.fmt_out).is_err() {
            error!("host rejected the video output format");
            let _ = inner.codec.release_out(buf.index, false);
            return Err(BridgeError::HostRejected);
        }
    }

    // Pop the fallback timestamp before any early release so a dropped
    // frame does not leave a gap in the substitution order.
    let forced_ts = v.reorder.pop();

    if !*has_format {
        warn!("buffer returned before the output format is set, dropping frame");
        inner.codec.release_out(buf.index, false)?;
        return Ok(());
    }

    if let Some(end) = *preroll_end {
        if buf.pts <= end {
            inner.codec.release_out(buf.index, false)?;
            return Ok(());
        }
    }

    let pts = forced_ts.unwrap_or(buf.pts);

    if direct {
        let slot = InflightSlot::new(buf.index, inner.codec.clone());
        v.inflight.insert(slot.clone());
        inner.host.queue_picture(Picture {
            pts,
            content: PictureContent::Opaque(OpaquePicture::new(slot)),
        });
    } else {
        let src = buf.data.unwrap_or_default();
        let data = repack_frame(&src, &v.layout, v.fmt_out.resolution);
        inner.codec.release_out(buf.index, false)?;

        let visible = v.fmt_out.resolution;
        inner.host.queue_picture(Picture {
            pts,
            content: PictureContent::Raw {
                layout: FrameLayout {
                    pixel_format: v.layout.pixel_format,
                    width: visible.width,
                    height: visible.height,
                    stride: visible.width as i32,
                    slice_height: visible.height as i32,
                    crop: CropWindow {
                        left: 0,
                        top: 0,
                        right: visible.width as i32 - 1,
                        bottom: visible.height as i32 - 1,
                    },
                },
                data,
            },
        });
    }
    Ok(())
}

fn is_repackable(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::YUV420_PLANAR | PixelFormat::YUV420_SEMI_PLANAR
    )
}

/// Copy a padded decoder buffer into a tightly packed visible frame,
/// honoring the reported stride and slice height.
pub(crate) fn repack_frame(src: &[u8], layout: &FrameLayout, visible: Resolution) -> Vec<u8> {
    let w = visible.width as usize;
    let h = visible.height as usize;
    let stride = layout.row_bytes();
    let slice_h = if layout.slice_height > 0 {
        layout.slice_height as usize
    } else {
        h
    };
    let chroma_rows = h.div_ceil(2);

    let mut out = Vec::with_capacity(w * h + w * chroma_rows);
    copy_plane(&mut out, src, 0, stride, w, h);

    let chroma_offset = stride * slice_h;
    match layout.pixel_format {
        PixelFormat::YUV420_PLANAR => {
            let cs = stride / 2;
            let csl = slice_h.div_ceil(2);
            let cw = w.div_ceil(2);
            copy_plane(&mut out, src, chroma_offset, cs, cw, chroma_rows);
            copy_plane(&mut out, src, chroma_offset + cs * csl, cs, cw, chroma_rows);
        }
        _ => {
            // Semi-planar: one interleaved UV plane, w bytes per chroma row.
            copy_plane(&mut out, src, chroma_offset, stride, w, chroma_rows);
        }
    }
    out
}

/// Copy `rows` rows of `row_len` bytes, zero-filling past the source end.
fn copy_plane(
    out: &mut Vec<u8>,
    src: &[u8],
    offset: usize,
    stride: usize,
    row_len: usize,
    rows: usize,
) {
    for row in 0..rows {
        let start = offset + row * stride;
        let end = (start + row_len).min(src.len());
        let avail = end.saturating_sub(start.min(end));
        if avail > 0 {
            out.extend_from_slice(&src[start..start + avail]);
        }
        out.resize(out.len() + (row_len - avail), 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_common::FourCc;

    // Hand-assembled baseline SPS NAL units.
    const SPS_320X240: [u8; 8] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x0A, 0x0F, 0xC8];
    const SPS_640X480: [u8; 9] = [0x67, 0x42, 0x00, 0x1E, 0xF4, 0x05, 0x01, 0xEC, 0x80];
    const PPS: [u8; 5] = [0x68, 0xCE, 0x38, 0x80, 0x00];

    fn annexb_of(nals: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in nals {
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nal);
        }
        out
    }

    fn fresh_state() -> (VideoState, CsdStore) {
        let params = StreamParams {
            fourcc: FourCc::new(b"h264"),
            ..StreamParams::default()
        };
        (
            VideoState::new(VideoCodec::H264, &params, None),
            CsdStore::new(),
        )
    }

    // ── Parameter-set adoption ───────────────────────────────────

    #[test]
    fn adopts_sps_pps_from_stream() {
        let (mut v, mut csd) = fresh_state();
        let buf = annexb_of(&[&SPS_320X240, &PPS]);

        let changed = v.apply_h264_csd(&mut csd, &buf);
        assert_eq!(changed, Some(true)); // dimensions went 0x0 -> 320x240
        assert_eq!(v.width, 320);
        assert_eq!(v.height, 240);
        assert_eq!(v.h264_profile, Some(66));
        assert_eq!(csd.len(), 2);
        assert_eq!(csd.pending().unwrap(), annexb_of(&[&SPS_320X240]).as_slice());
    }

    #[test]
    fn identical_parameter_sets_are_a_no_op() {
        let (mut v, mut csd) = fresh_state();
        let buf = annexb_of(&[&SPS_320X240, &PPS]);
        v.apply_h264_csd(&mut csd, &buf);
        assert_eq!(v.apply_h264_csd(&mut csd, &buf), None);
    }

    #[test]
    fn same_dimension_sps_reports_no_size_change() {
        let (mut v, mut csd) = fresh_state();
        v.apply_h264_csd(&mut csd, &annexb_of(&[&SPS_320X240, &PPS]));
        // Same SPS, different PPS bytes: new CSD, same dimensions.
        let other_pps = [0x68, 0xCE, 0x06, 0xE2, 0x00];
        let changed = v.apply_h264_csd(&mut csd, &annexb_of(&[&SPS_320X240, &other_pps]));
        assert_eq!(changed, Some(false));
    }

    #[test]
    fn new_dimensions_report_size_change() {
        let (mut v, mut csd) = fresh_state();
        v.apply_h264_csd(&mut csd, &annexb_of(&[&SPS_320X240, &PPS]));
        let changed = v.apply_h264_csd(&mut csd, &annexb_of(&[&SPS_640X480, &PPS]));
        assert_eq!(changed, Some(true));
        assert_eq!(v.width, 640);
        assert_eq!(v.height, 480);
    }

    #[test]
    fn packets_without_parameter_sets_change_nothing() {
        let (mut v, mut csd) = fresh_state();
        let slice = annexb_of(&[&[0x65, 0x88, 0x80]]);
        assert_eq!(v.apply_h264_csd(&mut csd, &slice), None);
        assert!(csd.is_empty());
    }

    // ── Extradata ────────────────────────────────────────────────

    #[test]
    fn avcc_extradata_sets_nal_length_and_csd() {
        let (mut v, mut csd) = fresh_state();

        let mut record = vec![1, 0x42, 0x00, 0x1E, 0xFC | 3, 0xE0 | 1];
        record.extend_from_slice(&(SPS_320X240.len() as u16).to_be_bytes());
        record.extend_from_slice(&SPS_320X240);
        record.push(1);
        record.extend_from_slice(&(PPS.len() as u16).to_be_bytes());
        record.extend_from_slice(&PPS);

        v.parse_extradata(&mut csd, &record);
        assert_eq!(v.nal_length_size, 4);
        assert_eq!(csd.len(), 2);
        assert_eq!(v.width, 320);
        assert_eq!(v.height, 240);
    }

    #[test]
    fn annexb_extradata_needs_no_unwrapping() {
        let (mut v, mut csd) = fresh_state();
        v.parse_extradata(&mut csd, &annexb_of(&[&SPS_320X240, &PPS]));
        assert_eq!(v.nal_length_size, 0);
        assert_eq!(csd.len(), 2);
    }

    // ── Frame repacking ──────────────────────────────────────────

    #[test]
    fn repacks_padded_semi_planar() {
        // 4x2 visible inside a 8-byte stride, 4-row slice.
        let layout = FrameLayout {
            pixel_format: PixelFormat::YUV420_SEMI_PLANAR,
            width: 4,
            height: 2,
            stride: 8,
            slice_height: 4,
            ..FrameLayout::default()
        };
        let mut src = vec![0u8; 8 * 4 + 8];
        // Y rows
        src[0..4].copy_from_slice(&[1, 2, 3, 4]);
        src[8..12].copy_from_slice(&[5, 6, 7, 8]);
        // UV row at stride * slice_height
        src[32..36].copy_from_slice(&[9, 10, 11, 12]);

        let out = repack_frame(&src, &layout, Resolution::new(4, 2));
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn repacks_planar_chroma() {
        let layout = FrameLayout {
            pixel_format: PixelFormat::YUV420_PLANAR,
            width: 2,
            height: 2,
            stride: 4,
            slice_height: 2,
            ..FrameLayout::default()
        };
        let mut src = vec![0u8; 4 * 2 + 2 * 1 + 2 * 1];
        src[0..2].copy_from_slice(&[1, 2]); // Y row 0
        src[4..6].copy_from_slice(&[3, 4]); // Y row 1
        src[8] = 5; // U
        src[10] = 6; // V (chroma stride 2, chroma slice 1)

        let out = repack_frame(&src, &layout, Resolution::new(2, 2));
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn short_buffers_are_zero_filled() {
        let layout = FrameLayout {
            pixel_format: PixelFormat::YUV420_SEMI_PLANAR,
            width: 2,
            height: 2,
            stride: 2,
            slice_height: 2,
            ..FrameLayout::default()
        };
        let out = repack_frame(&[1, 2, 3], &layout, Resolution::new(2, 2));
        assert_eq!(out.len(), 2 * 2 + 2);
        assert_eq!(&out[..3], &[1, 2, 3]);
        assert!(out[3..].iter().all(|&b| b == 0));
    }
}
