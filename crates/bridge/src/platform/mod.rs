//! Platform codec interface — the narrow seam the bridge drives.
//!
//! The platform decoder is an opaque, buffer-index-based API: input buffers
//! are dequeued by index, filled and queued with a timestamp; output buffers
//! are dequeued by index and either rendered directly to a surface or copied
//! out. Two implementations ship here: [`ndk::NdkCodec`] binds the native
//! platform library at runtime, and [`mock::MockCodec`] is a deterministic
//! in-process stand-in for tests. Hosts that reach the platform through
//! their own call layer implement [`PlatformCodec`] themselves; the bridge
//! never distinguishes implementations.

use std::time::Duration;

use mb_common::{CropWindow, Micros, PixelFormat, PlatformError, SurfaceHandle};

pub mod mock;
pub mod ndk;

/// Arguments for starting a video decoder.
#[derive(Clone, Debug)]
pub struct VideoStartArgs {
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    /// Surface for direct rendering; `None` selects copy mode.
    pub surface: Option<SurfaceHandle>,
    /// H.264 profile from the SPS, for implementations that pick a decoder
    /// component by profile.
    pub h264_profile: Option<u8>,
}

/// Arguments for starting an audio decoder.
#[derive(Clone, Debug)]
pub struct AudioStartArgs {
    pub mime: &'static str,
    pub sample_rate: u32,
    pub channel_count: u32,
}

/// Start arguments for either media type.
#[derive(Clone, Debug)]
pub enum StartArgs {
    Video(VideoStartArgs),
    Audio(AudioStartArgs),
}

/// Result of dequeuing an input slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DequeuedInput {
    /// A free input slot; it must be queued back or the codec is aborted.
    Index(u32),
    /// The timeout expired, or the wait was cut short by a flush.
    TryAgain,
}

/// Result of dequeuing an output buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DequeuedOutput {
    /// A decoded buffer, identified by its pool index.
    Buffer(u32),
    /// The output format changed; query it with `get_out`.
    FormatChanged,
    /// The output buffer pool was reallocated.
    BuffersChanged,
    /// The timeout expired, or the wait was cut short by a flush or stop.
    TryAgain,
}

/// A dequeued output buffer.
#[derive(Clone, Debug)]
pub struct OutputBuffer {
    pub index: u32,
    pub pts: Micros,
    /// Payload size in bytes.
    pub size: usize,
    /// Decoded bytes in copy mode; `None` when the buffer is bound to a
    /// surface (direct rendering).
    pub data: Option<Vec<u8>>,
}

/// Video output format reported by the platform codec.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoOutputFormat {
    pub pixel_format: PixelFormat,
    /// Coded width (may include padding).
    pub width: u32,
    /// Coded height (may include padding).
    pub height: u32,
    /// Bytes per row; `<= 0` when the platform does not report it.
    pub stride: i32,
    /// Rows per plane; `<= 0` when the platform does not report it.
    pub slice_height: i32,
    pub crop: CropWindow,
}

/// Audio output format reported by the platform codec.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioOutputFormat {
    pub channel_count: u32,
    pub sample_rate: u32,
}

/// Payload returned by [`PlatformCodec::get_out`].
#[derive(Clone, Debug)]
pub enum Output {
    Buffer(OutputBuffer),
    VideoFormat(VideoOutputFormat),
    AudioFormat(AudioOutputFormat),
}

/// The buffer-index decoder API the bridge consumes.
///
/// Methods take `&self`; implementations synchronize internally because the
/// decode thread and the output pump call in concurrently.
///
/// Contract relied upon by the bridge:
///
/// - `dequeue_in(None)` blocks until an input slot frees or the codec is
///   stopped or flushed; with a timeout it returns
///   [`DequeuedInput::TryAgain`] on expiry.
/// - `dequeue_out(None)` blocks likewise and may return the format/buffers
///   sentinels instead of an index. A flush or stop unblocks it with
///   [`DequeuedOutput::TryAgain`].
/// - `queue_in` with `config = true` submits codec configuration that is not
///   counted as decode input.
/// - `flush` cancels all in-flight input and output; no user frames surface
///   until new input is queued.
/// - Every dequeued output index is passed to `release_out` exactly once.
///
/// Errors are fatal: the controller latches its error state on any `Err`.
pub trait PlatformCodec: Send + Sync {
    fn start(&self, args: &StartArgs) -> Result<(), PlatformError>;

    /// Stop the codec and unbind any surface. Idempotent.
    fn stop(&self);

    fn flush(&self) -> Result<(), PlatformError>;

    fn dequeue_in(&self, timeout: Option<Duration>) -> Result<DequeuedInput, PlatformError>;

    fn queue_in(
        &self,
        index: u32,
        data: &[u8],
        pts: Micros,
        config: bool,
    ) -> Result<(), PlatformError>;

    fn dequeue_out(&self, timeout: Option<Duration>) -> Result<DequeuedOutput, PlatformError>;

    /// Resolve a dequeue result into its payload. Returns `Ok(None)` for
    /// events that carry nothing to act on (e.g. a buffer-pool change).
    fn get_out(&self, event: DequeuedOutput) -> Result<Option<Output>, PlatformError>;

    /// Return an output buffer to the codec, optionally rendering it to the
    /// bound surface on the way out.
    fn release_out(&self, index: u32, render: bool) -> Result<(), PlatformError>;

    /// Whether decoded buffers are bound to a surface (no user-memory copy).
    fn direct_rendering(&self) -> bool;

    fn supports_interlaced(&self) -> bool;
}
