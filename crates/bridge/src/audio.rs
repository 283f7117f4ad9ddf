//! Audio media path: sample clock, channel extraction, output handling.

use tracing::{debug, warn};

use mb_common::{AudioBlock, BridgeError, BridgeResult, Micros, Packet};

use crate::controller::{BlockReaction, Inner, Media, State};
use crate::host::AudioFormat;
use crate::platform::{AudioOutputFormat, Output, OutputBuffer};

// Canonical platform channel order: FL FR FC LFE BL BR BC SL SR.
// Extraction plans are index sets into this order.
const BACK_LEFT: usize = 4;
const BACK_RIGHT: usize = 5;
const SIDE_LEFT: usize = 7;
const SIDE_RIGHT: usize = 8;

/// Running timestamp anchored at the last codec-supplied PTS.
///
/// Block timestamps advance sample-accurately from the anchor; the division
/// remainder is carried so long runs do not drift.
#[derive(Clone, Debug, Default)]
pub struct SampleClock {
    rate: u32,
    position: Option<i64>,
    carry: u64,
}

impl SampleClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sample rate and forget the anchor.
    pub fn init(&mut self, rate: u32) {
        self.rate = rate;
        self.position = None;
        self.carry = 0;
    }

    /// Anchor the clock at a codec-supplied timestamp.
    pub fn set(&mut self, ts: Micros) {
        self.position = Some(ts.0);
        self.carry = 0;
    }

    /// Drop the anchor (stream discontinuity).
    pub fn clear(&mut self) {
        self.position = None;
        self.carry = 0;
    }

    pub fn get(&self) -> Option<Micros> {
        self.position.map(Micros)
    }

    /// Advance by `samples` and return the new position.
    pub fn advance(&mut self, samples: u64) -> Micros {
        let Some(pos) = self.position else {
            return Micros::ZERO;
        };
        if self.rate == 0 {
            return Micros(pos);
        }
        let num = samples * 1_000_000 + self.carry;
        let delta = (num / self.rate as u64) as i64;
        self.carry = num % self.rate as u64;
        let end = pos + delta;
        self.position = Some(end);
        Micros(end)
    }
}

/// Source-channel selection applied per sample frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionPlan {
    /// Source channel index feeding each output slot.
    pub indices: Vec<usize>,
}

/// Decide whether decoded buffers need channel extraction.
///
/// Returns `None` when the host can take the stream as-is. Otherwise the
/// plan keeps the canonical positions of the largest standard layout that
/// fits `max_output` (e.g. 5.1 with a stereo-limited host keeps FL/FR).
pub fn plan_extraction(src_channels: u32, max_output: u32) -> Option<ExtractionPlan> {
    let src = src_channels as usize;
    let max = max_output.max(1) as usize;
    if src <= max {
        return None;
    }

    let dst = [8, 6, 4, 2, 1].into_iter().find(|&n| n <= max).unwrap_or(1);
    let positions: Vec<usize> = match dst {
        8 => vec![0, 1, 2, 3, BACK_LEFT, BACK_RIGHT, SIDE_LEFT, SIDE_RIGHT],
        6 => vec![0, 1, 2, 3, BACK_LEFT, BACK_RIGHT],
        4 => vec![0, 1, BACK_LEFT, BACK_RIGHT],
        2 => vec![0, 1],
        _ => vec![0],
    };

    let mut indices: Vec<usize> = positions.into_iter().filter(|&i| i < src).collect();
    if indices.len() < dst {
        // The source is missing canonical positions; keep its leading
        // channels rather than inventing silence.
        indices = (0..dst.min(src)).collect();
    }
    Some(ExtractionPlan { indices })
}

/// Select channels out of interleaved 16-bit frames.
pub fn extract_channels(src: &[u8], src_channels: u32, plan: &ExtractionPlan) -> Vec<u8> {
    let src_frame = src_channels as usize * 2;
    if src_frame == 0 {
        return Vec::new();
    }
    let frames = src.len() / src_frame;
    let mut out = Vec::with_capacity(frames * plan.indices.len() * 2);
    for frame in 0..frames {
        let base = frame * src_frame;
        for &ch in &plan.indices {
            let at = base + ch * 2;
            out.extend_from_slice(&src[at..at + 2]);
        }
    }
    out
}

/// Per-stream audio state owned by the controller.
#[derive(Debug)]
pub struct AudioState {
    /// Channel count decoded by the platform (source side).
    pub channels: u32,
    pub clock: SampleClock,
    pub extraction: Option<ExtractionPlan>,
    /// Host-facing format, valid once `has_format` is set.
    pub fmt_out: AudioFormat,
}

impl AudioState {
    pub fn new(channels: u32) -> Self {
        Self {
            channels,
            clock: SampleClock::new(),
            extraction: None,
            fmt_out: AudioFormat::default(),
        }
    }
}

/// Input-side hook run under the controller lock for every packet.
pub(crate) fn on_new_block(
    inner: &Inner,
    st: &mut State,
    pkt: &Packet,
) -> BridgeResult<BlockReaction> {
    let State {
        media,
        csd,
        params,
        started,
        ..
    } = st;
    let Media::Audio(a) = media else {
        return Err(BridgeError::Unsupported("not an audio stream".into()));
    };

    // The clock anchors at the first valid PTS; packets before it carry no
    // usable position and are dropped.
    if a.clock.get().is_none() {
        let Some(pts) = pkt.pts else {
            return Ok(BlockReaction {
                drop: true,
                ..BlockReaction::default()
            });
        };
        a.clock.set(pts);
    }

    let mut reaction = BlockReaction::default();
    if !*started {
        // Late open: the host may have delivered the channel count since.
        a.channels = params.channels;
        reaction.restart = true;
        if inner.quirks.need_csd && params.extradata.is_empty() && csd.is_empty() {
            reaction.restart = false;
        }
        if inner.quirks.audio_need_channels && a.channels == 0 {
            debug!("waiting for a valid channel count");
            reaction.restart = false;
        }
    }
    Ok(reaction)
}

/// Output-side hook run by the pump for every dequeued audio event.
pub(crate) fn process_output(inner: &Inner, st: &mut State, out: Output) -> BridgeResult<()> {
    match out {
        Output::AudioFormat(fmt) => handle_format(inner, st, fmt),
        Output::Buffer(buf) => handle_buffer(inner, st, buf),
        Output::VideoFormat(_) => Err(BridgeError::Unsupported(
            "video format event on an audio stream".into(),
        )),
    }
}

fn handle_format(inner: &Inner, st: &mut State, fmt: AudioOutputFormat) -> BridgeResult<()> {
    let Media::Audio(a) = &mut st.media else {
        return Err(BridgeError::Unsupported("not an audio stream".into()));
    };

    if fmt.channel_count == 0 || fmt.channel_count > 8 || fmt.sample_rate == 0 {
        warn!(
            channels = fmt.channel_count,
            rate = fmt.sample_rate,
            "invalid audio properties"
        );
        return Err(BridgeError::Unsupported("invalid audio properties".into()));
    }

    a.channels = fmt.channel_count;
    a.extraction = plan_extraction(fmt.channel_count, inner.config.max_output_channels as u32);
    let out_channels = a
        .extraction
        .as_ref()
        .map_or(fmt.channel_count, |p| p.indices.len() as u32);
    if let Some(plan) = &a.extraction {
        warn!(
            from = a.channels,
            to = plan.indices.len(),
            "need channel extraction"
        );
    }

    a.fmt_out = AudioFormat {
        channels: out_channels,
        sample_rate: fmt.sample_rate,
    };
    a.clock.init(fmt.sample_rate);

    inner
        .host
        .audio_format_changed(&a.fmt_out)
        .map_err(|_| BridgeError::HostRejected)?;
    st.has_format = true;
    Ok(())
}

fn handle_buffer(inner: &Inner, st: &mut State, buf: OutputBuffer) -> BridgeResult<()> {
    let Media::Audio(a) = &mut st.media else {
        return Err(BridgeError::Unsupported("not an audio stream".into()));
    };

    if !st.has_format {
        warn!("buffer returned before the output format is set, dropping");
        inner.codec.release_out(buf.index, false)?;
        return Ok(());
    }

    let src = buf.data.unwrap_or_default();
    let src_frame = (a.channels.max(1) * 2) as usize;
    let nb_samples = (src.len() / src_frame) as u32;

    let data = match &a.extraction {
        Some(plan) => extract_channels(&src, a.channels, plan),
        None => src,
    };

    if buf.pts != Micros::ZERO && a.clock.get() != Some(buf.pts) {
        a.clock.set(buf.pts);
    }
    let pts = a.clock.get().unwrap_or(Micros::ZERO);
    let end = a.clock.advance(nb_samples as u64);

    inner.codec.release_out(buf.index, false)?;

    inner.host.queue_audio(AudioBlock {
        data,
        nb_samples,
        channels: a.fmt_out.channels,
        pts,
        length: end - pts,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Sample clock ─────────────────────────────────────────────

    #[test]
    fn clock_advances_without_drift() {
        let mut clock = SampleClock::new();
        clock.init(48_000);
        clock.set(Micros(10_000));

        // 3 x 1024 samples at 48 kHz = exactly 64 ms.
        clock.advance(1024);
        clock.advance(1024);
        let end = clock.advance(1024);
        assert_eq!(end, Micros(10_000 + 64_000));
    }

    #[test]
    fn clock_unset_yields_zero_advance() {
        let mut clock = SampleClock::new();
        clock.init(48_000);
        assert_eq!(clock.get(), None);
        assert_eq!(clock.advance(1024), Micros::ZERO);
    }

    #[test]
    fn clock_clear_drops_anchor() {
        let mut clock = SampleClock::new();
        clock.init(44_100);
        clock.set(Micros(5));
        clock.clear();
        assert_eq!(clock.get(), None);
    }

    // ── Extraction planning ──────────────────────────────────────

    #[test]
    fn no_extraction_when_host_fits() {
        assert_eq!(plan_extraction(2, 8), None);
        assert_eq!(plan_extraction(6, 6), None);
        assert_eq!(plan_extraction(1, 2), None);
    }

    #[test]
    fn five_one_to_stereo_keeps_front_pair() {
        let plan = plan_extraction(6, 2).unwrap();
        assert_eq!(plan.indices, vec![0, 1]);
    }

    #[test]
    fn seven_one_to_five_one_keeps_backs() {
        let plan = plan_extraction(8, 6).unwrap();
        assert_eq!(plan.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn sparse_source_falls_back_to_leading_channels() {
        // 5 channels cannot fill a quad layout from canonical positions.
        let plan = plan_extraction(5, 4).unwrap();
        assert_eq!(plan.indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn extraction_selects_interleaved_samples() {
        // Two frames of 3 channels, 16-bit LE values 1..6.
        let src: Vec<u8> = [1i16, 2, 3, 4, 5, 6]
            .iter()
            .flat_map(|v| v.to_ne_bytes())
            .collect();
        let plan = ExtractionPlan {
            indices: vec![0, 1],
        };
        let out = extract_channels(&src, 3, &plan);
        let vals: Vec<i16> = out
            .chunks_exact(2)
            .map(|c| i16::from_ne_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(vals, vec![1, 2, 4, 5]);
    }
}
