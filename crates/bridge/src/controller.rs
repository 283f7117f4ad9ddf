//! Decoder controller: lifecycle, decode path, flush/restart orchestration.
//!
//! Two threads touch the shared state: the host-driven decode thread (one
//! call at a time by contract) and the output pump. One mutex guards the
//! state; `output_cond` tells the pump "output may be ready" or "a flush was
//! requested", `decode_cond` tells the decode side "the flush was
//! acknowledged" or "the pump died". Both threads suspend only at the
//! platform dequeue calls, with the lock released.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use mb_common::{
    BridgeConfig, BridgeError, BridgeResult, CodecId, Micros, Packet, Quirks, StreamParams,
    SurfaceHandle, VideoCodec,
};

use crate::audio::{self, AudioState};
use crate::csd::CsdStore;
use crate::host::{HostOutput, VideoFormat};
use crate::platform::{
    AudioStartArgs, DequeuedInput, PlatformCodec, StartArgs, VideoStartArgs,
};
use crate::pump;
use crate::video::{self, VideoState};
use mb_common::{PixelFormat, Resolution};

/// Input-dequeue timeout while direct rendering is active; the starvation
/// recovery below depends on it.
const DIRECT_RENDER_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the per-media input hook asks the controller to do with the stream.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct BlockReaction {
    /// Flush pending input/output, then continue.
    pub flush: bool,
    /// Stop and start the platform codec (implies a flush first).
    pub restart: bool,
    /// Consume the packet without queuing it.
    pub drop: bool,
}

/// Media-specific half of the shared state.
#[derive(Debug)]
pub(crate) enum Media {
    Video(VideoState),
    Audio(AudioState),
}

/// Shared state guarded by the controller mutex.
pub(crate) struct State {
    pub started: bool,
    pub error: bool,
    /// Set by the decode side to make the pump drain and acknowledge.
    pub flush_out: bool,
    /// Set once an input buffer is queued; the pump only dequeues after.
    pub output_ready: bool,
    /// Whether any input buffer was dequeued since the last flush.
    pub input_dequeued: bool,
    /// The host must reconfirm the output format before the next frame.
    pub update_format: bool,
    /// An output format event has been seen since the last start.
    pub has_format: bool,
    /// Frames with a timestamp at or before this are decoded but not shown.
    pub preroll_end: Option<Micros>,
    pub csd: CsdStore,
    pub params: StreamParams,
    pub media: Media,
}

pub(crate) struct Inner {
    pub codec: Arc<dyn PlatformCodec>,
    pub host: Arc<dyn HostOutput>,
    pub config: BridgeConfig,
    pub quirks: Quirks,
    pub codec_id: CodecId,
    pub state: Mutex<State>,
    /// Decoder -> pump: output may be ready, or a flush was requested.
    pub output_cond: Condvar,
    /// Pump -> decoder: flush acknowledged, or the pump died.
    pub decode_cond: Condvar,
}

/// Bridge decoder driving one platform codec instance.
///
/// Created with [`open`](Decoder::open); the output pump thread lives until
/// [`close`](Decoder::close) (or drop). `decode` and `flush` are meant to be
/// called from one host thread at a time.
pub struct Decoder {
    inner: Arc<Inner>,
    pump: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("codec_id", &self.inner.codec_id)
            .field("running", &self.pump.is_some())
            .finish_non_exhaustive()
    }
}

impl Decoder {
    /// Open a decoder for the stream described by `params`.
    ///
    /// Declines (with an error) streams whose codec id has no platform mime
    /// mapping, audio streams unless [`BridgeConfig::audio`] is set, and
    /// video other than H.264 without known dimensions.
    ///
    /// The platform codec start may be deferred past a successful open:
    /// codecs quirked as needing configuration data, a frame size, or a
    /// channel count stay idle until the missing piece arrives via in-band
    /// parameter sets or [`update_params`](Decoder::update_params). An
    /// audio stream whose host never delivers a channel count therefore
    /// decodes nothing; there is no deadline.
    pub fn open(
        params: StreamParams,
        config: BridgeConfig,
        surface: Option<SurfaceHandle>,
        codec: Arc<dyn PlatformCodec>,
        host: Arc<dyn HostOutput>,
    ) -> BridgeResult<Self> {
        let codec_id = CodecId::from_fourcc(params.fourcc)
            .ok_or(BridgeError::UnsupportedCodec(params.fourcc))?;

        let mut late_open = false;
        let quirks = Quirks::for_codec(codec_id);
        let mut csd = CsdStore::new();

        let media = match codec_id {
            CodecId::Video(v) => {
                if v != VideoCodec::H264 && (params.width == 0 || params.height == 0) {
                    // Only H.264 carries its dimensions in-band reliably.
                    debug!(codec = ?v, "resolution unknown, declining");
                    return Err(BridgeError::Unsupported(format!(
                        "resolution {}x{} not supported for {}",
                        params.width,
                        params.height,
                        v.display_name()
                    )));
                }
                let mut video = VideoState::new(v, &params, surface);
                // Extradata may carry the parameter sets and, through the
                // SPS, the dimensions that un-gate a deferred start.
                if !params.extradata.is_empty() {
                    video.parse_extradata(&mut csd, &params.extradata);
                }
                if quirks.video_need_size && (video.width == 0 || video.height == 0) {
                    warn!(codec = ?v, "waiting for a valid video size");
                    late_open = true;
                }
                Media::Video(video)
            }
            CodecId::Audio(_) => {
                if !config.audio {
                    return Err(BridgeError::Unsupported(
                        "audio through the platform decoder is disabled".into(),
                    ));
                }
                if quirks.audio_need_channels && params.channels == 0 {
                    warn!("waiting for a valid channel count");
                    late_open = true;
                }
                Media::Audio(AudioState::new(params.channels))
            }
        };

        if quirks.need_csd && params.extradata.is_empty() {
            if codec_id == CodecId::Video(VideoCodec::Mpeg4) {
                return Err(BridgeError::Unsupported(
                    "deferred open without configuration data not supported for MPEG-4 Visual"
                        .into(),
                ));
            }
            warn!(codec = %params.fourcc, "waiting for configuration data");
            late_open = true;
        }

        let inner = Arc::new(Inner {
            codec,
            host,
            config,
            quirks,
            codec_id,
            state: Mutex::new(State {
                started: false,
                error: false,
                flush_out: false,
                output_ready: false,
                input_dequeued: false,
                update_format: false,
                has_format: false,
                preroll_end: None,
                csd,
                params,
                media,
            }),
            output_cond: Condvar::new(),
            decode_cond: Condvar::new(),
        });

        if !late_open {
            let mut st = inner.state.lock();
            start_platform(&inner, &mut st)?;
        }

        let pump_inner = inner.clone();
        let pump = thread::Builder::new()
            .name("bridge-out".into())
            .spawn(move || pump::run(&pump_inner))
            .map_err(|e| BridgeError::Unsupported(format!("failed to spawn output pump: {e}")))?;

        info!(codec = ?codec_id, mime = codec_id.mime_type(), late_open, "decoder opened");
        Ok(Self {
            inner,
            pump: Some(pump),
        })
    }

    /// Feed one compressed packet. Consumes the packet exactly once: it is
    /// either queued to the platform codec or dropped.
    ///
    /// Never blocks on output; the only waits are at the platform input
    /// dequeue (1 s slices while direct rendering is active, unbounded
    /// otherwise).
    pub fn decode(&self, mut packet: Packet) -> BridgeResult<()> {
        let inner = &self.inner;
        let mut st = inner.state.lock();

        if st.error {
            return Err(BridgeError::Fatal);
        }

        if packet.flags.discontinuity || packet.flags.corrupted {
            flush_locked(inner, &mut st);
            if st.error {
                return Err(BridgeError::Fatal);
            }
            if packet.flags.corrupted {
                return Ok(());
            }
        }

        let is_video = matches!(st.media, Media::Video(_));
        let reaction = if is_video {
            video::on_new_block(inner, &mut st, &mut packet)
        } else {
            audio::on_new_block(inner, &mut st, &packet)
        };
        let reaction = match reaction {
            Ok(r) => r,
            Err(e) => {
                error!(error = %e, "input hook failed");
                abort_locked(inner, &mut st);
                return Err(e);
            }
        };
        if reaction.drop {
            return Ok(());
        }

        if reaction.flush || reaction.restart {
            flush_locked(inner, &mut st);
            if st.error {
                return Err(BridgeError::Fatal);
            }
            if reaction.restart {
                warn!("restarting the platform codec");
                stop_platform(inner, &mut st);
                if let Err(e) = start_platform(inner, &mut st) {
                    error!(error = %e, "platform codec restart failed");
                    abort_locked(inner, &mut st);
                    return Err(e);
                }
            }
        }

        // Deferred open still waiting for stream information.
        if !st.started {
            return Ok(());
        }

        self.queue_packet(&mut st, packet)
    }

    /// Queue pending CSD blobs, then the user packet.
    fn queue_packet(&self, st: &mut MutexGuard<'_, State>, packet: Packet) -> BridgeResult<()> {
        let inner = &self.inner;
        let mut packet = Some(packet);
        let mut starved_once = false;

        loop {
            if st.csd.pending().is_none() && packet.is_none() {
                return Ok(());
            }

            let timeout = if inner.codec.direct_rendering() {
                Some(DIRECT_RENDER_DEQUEUE_TIMEOUT)
            } else {
                None
            };
            let dequeued = MutexGuard::unlocked(st, || inner.codec.dequeue_in(timeout));

            if st.error {
                return Err(BridgeError::Fatal);
            }

            match dequeued {
                Ok(DequeuedInput::Index(index)) => {
                    st.input_dequeued = true;
                    let pending_csd = st.csd.pending().map(<[u8]>::to_vec);
                    if let Some(blob) = pending_csd {
                        if let Err(e) = inner.codec.queue_in(index, &blob, Micros::ZERO, true) {
                            error!(error = %e, "queueing configuration failed");
                            abort_locked(inner, st);
                            return Err(e.into());
                        }
                        st.csd.advance();
                    } else if let Some(pkt) = packet.take() {
                        let ts = pkt.queue_ts();
                        if let Err(e) = inner.codec.queue_in(index, &pkt.data, ts, false) {
                            error!(error = %e, "queueing input failed");
                            abort_locked(inner, st);
                            return Err(e.into());
                        }
                        if pkt.flags.preroll {
                            st.preroll_end = Some(ts);
                        }
                        // Input is in flight: wake the pump.
                        st.output_ready = true;
                        inner.output_cond.notify_all();
                    }
                    starved_once = false;
                }
                Ok(DequeuedInput::TryAgain) => {
                    // With direct rendering, a paused host renderer can sit
                    // on every output buffer, which starves the input side.
                    // Reclaim the inflight pictures once; a second dry
                    // timeout means something else is wedged.
                    if !starved_once {
                        warn!("decoder stuck, invalidating inflight pictures");
                        if let Media::Video(v) = &st.media {
                            v.inflight.invalidate_all();
                        }
                        starved_once = true;
                    } else {
                        error!("no input buffer for 2 consecutive timeouts");
                        abort_locked(inner, st);
                        return Err(BridgeError::Fatal);
                    }
                }
                Err(e) => {
                    error!(error = %e, "input dequeue failed");
                    abort_locked(inner, st);
                    return Err(e.into());
                }
            }
        }
    }

    /// Discard all pending input and output and rearm the CSD resend.
    pub fn flush(&self) -> BridgeResult<()> {
        let mut st = self.inner.state.lock();
        flush_locked(&self.inner, &mut st);
        if st.error {
            Err(BridgeError::Fatal)
        } else {
            Ok(())
        }
    }

    /// Replace the stream parameters (late channel count, late extradata).
    ///
    /// The codec id must stay the same; the new values take effect on the
    /// next `decode` call.
    pub fn update_params(&self, params: StreamParams) {
        let mut st = self.inner.state.lock();
        st.params = params;
    }

    /// Stop the decoder: join the output pump, stop the platform codec,
    /// detach every inflight picture. Infallible; also runs on drop.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(pump) = self.pump.take() else {
            return;
        };
        {
            let mut st = self.inner.state.lock();
            // Unblock a pump parked in dequeue_out, then latch the error so
            // it exits instead of re-entering the wait.
            flush_locked(&self.inner, &mut st);
            abort_locked(&self.inner, &mut st);
        }
        let _ = pump.join();

        let mut st = self.inner.state.lock();
        stop_platform(&self.inner, &mut st);
        if let Media::Video(v) = &mut st.media {
            v.surface = None;
        }
        info!("decoder closed");
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Latch the fatal state and wake both sides.
pub(crate) fn abort_locked(inner: &Inner, st: &mut MutexGuard<'_, State>) {
    if st.error {
        return;
    }
    st.error = true;
    // A pump blocked in dequeue_out only wakes through the platform codec.
    let _ = inner.codec.flush();
    inner.output_cond.notify_all();
    inner.decode_cond.notify_all();
}

/// Flush pending input/output and wait for the pump's acknowledgment.
pub(crate) fn flush_locked(inner: &Inner, st: &mut MutexGuard<'_, State>) {
    let had_input = st.input_dequeued;
    st.input_dequeued = false;
    st.flush_out = true;
    st.preroll_end = None;
    st.output_ready = false;
    // Configuration must be re-presented after every discontinuity.
    st.csd.rearm();

    match &mut st.media {
        Media::Video(v) => {
            v.reorder.clear();
            // A flush invalidates every output-buffer index the platform
            // handed out, including those wrapped in host pictures.
            if inner.codec.direct_rendering() {
                v.inflight.invalidate_all();
            }
        }
        Media::Audio(a) => a.clock.clear(),
    }

    if had_input {
        if let Err(e) = inner.codec.flush() {
            error!(error = %e, "platform flush failed");
            abort_locked(inner, st);
            return;
        }
    }

    inner.output_cond.notify_all();
    while !st.error && st.flush_out {
        inner.decode_cond.wait(st);
    }
}

/// Start the platform codec once all required stream information is known.
pub(crate) fn start_platform(inner: &Inner, st: &mut MutexGuard<'_, State>) -> BridgeResult<()> {
    let State {
        media, csd, params, ..
    } = &mut **st;

    // Configure CSD from extradata unless in-band parameter sets already
    // populated the store.
    if !params.extradata.is_empty() && csd.is_empty() {
        if let Media::Video(v) = &mut *media {
            v.parse_extradata(csd, &params.extradata);
        }
        if csd.is_empty() {
            // Codecs without a recognized wrapper take the raw bytes as one
            // configuration blob.
            csd.replace(vec![params.extradata.clone()]);
        }
    }

    let args = match media {
        Media::Video(v) => {
            if v.width == 0 || v.height == 0 {
                return Err(BridgeError::MalformedConfig(format!(
                    "invalid video size {}x{}",
                    v.width, v.height
                )));
            }

            // Direct rendering wants the host to accept opaque output
            // before the surface is bound; a refusal selects copy mode.
            let mut surface = None;
            if inner.config.direct_rendering {
                if let Some(handle) = v.surface {
                    let opaque = VideoFormat {
                        pixel_format: PixelFormat::OPAQUE,
                        resolution: Resolution::new(v.width, v.height),
                        sar: params.sar,
                        opaque: true,
                    };
                    if inner.host.video_format_changed(&opaque).is_ok() {
                        v.fmt_out = opaque;
                        surface = Some(handle);
                    } else {
                        warn!("opaque output rejected by host, falling back to copy mode");
                    }
                }
            }

            StartArgs::Video(VideoStartArgs {
                mime: inner.codec_id.mime_type(),
                width: v.width,
                height: v.height,
                surface,
                h264_profile: v.h264_profile,
            })
        }
        Media::Audio(a) => {
            a.clock.clear();
            StartArgs::Audio(AudioStartArgs {
                mime: inner.codec_id.mime_type(),
                sample_rate: params.sample_rate,
                channel_count: a.channels,
            })
        }
    };

    inner.codec.start(&args)?;
    st.started = true;
    st.has_format = false;
    st.csd.rearm();
    info!(mime = inner.codec_id.mime_type(), "platform codec started");
    Ok(())
}

/// Stop the platform codec, detaching inflight pictures first so the host
/// cannot release into a reclaimed buffer pool.
pub(crate) fn stop_platform(inner: &Inner, st: &mut MutexGuard<'_, State>) {
    if let Media::Video(v) = &st.media {
        if inner.codec.direct_rendering() {
            v.inflight.detach_all();
        }
    }
    inner.codec.stop();
    st.started = false;
}
