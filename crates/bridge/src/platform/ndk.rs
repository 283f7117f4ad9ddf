//! Native platform codec bound through the NDK media library.
//!
//! The platform decoder library is loaded dynamically at runtime via
//! `libloading` into a typed function-pointer table; nothing links against
//! it at build time, so the crate builds on any machine and degrades
//! gracefully where the library is absent.

use std::collections::HashMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use mb_common::{CropWindow, Micros, PixelFormat, PlatformError, SurfaceHandle};

use super::{
    AudioOutputFormat, DequeuedInput, DequeuedOutput, Output, OutputBuffer, PlatformCodec,
    StartArgs, VideoOutputFormat,
};

// ---------------------------------------------------------------------------
// Platform types and constants
// ---------------------------------------------------------------------------

/// Opaque codec handle.
pub type AMediaCodecPtr = *mut c_void;
/// Opaque format handle.
pub type AMediaFormatPtr = *mut c_void;
/// Native window handle backing a surface.
pub type ANativeWindowPtr = *mut c_void;

/// Platform status code — 0 means success.
pub type MediaStatus = i32;

pub const AMEDIA_OK: MediaStatus = 0;

/// `dequeueOutputBuffer` sentinel: no buffer within the timeout.
pub const INFO_TRY_AGAIN_LATER: isize = -1;
/// `dequeueOutputBuffer` sentinel: output format changed.
pub const INFO_OUTPUT_FORMAT_CHANGED: isize = -2;
/// `dequeueOutputBuffer` sentinel: output buffer pool changed.
pub const INFO_OUTPUT_BUFFERS_CHANGED: isize = -3;

/// `queueInputBuffer` flag marking codec configuration data.
pub const BUFFER_FLAG_CODEC_CONFIG: u32 = 2;

/// Poll slice used to emulate an infinite dequeue over the timed platform
/// call, so a flush or stop is observed promptly.
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Buffer metadata filled by `dequeueOutputBuffer`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BufferInfo {
    pub offset: i32,
    pub size: i32,
    pub presentation_time_us: i64,
    pub flags: u32,
}

// ---------------------------------------------------------------------------
// Dynamic library wrapper
// ---------------------------------------------------------------------------

/// Dynamically loaded platform media library with typed function pointers.
#[allow(non_snake_case)]
pub struct MediaNdkLibrary {
    /// The loaded library handle — must live as long as we use any symbols.
    _lib: Library,

    // -- Codec lifecycle --
    pub AMediaCodec_createDecoderByType:
        unsafe extern "C" fn(mime: *const c_char) -> AMediaCodecPtr,
    pub AMediaCodec_delete: unsafe extern "C" fn(codec: AMediaCodecPtr) -> MediaStatus,
    pub AMediaCodec_configure: unsafe extern "C" fn(
        codec: AMediaCodecPtr,
        format: AMediaFormatPtr,
        window: ANativeWindowPtr,
        crypto: *mut c_void,
        flags: u32,
    ) -> MediaStatus,
    pub AMediaCodec_start: unsafe extern "C" fn(codec: AMediaCodecPtr) -> MediaStatus,
    pub AMediaCodec_stop: unsafe extern "C" fn(codec: AMediaCodecPtr) -> MediaStatus,
    pub AMediaCodec_flush: unsafe extern "C" fn(codec: AMediaCodecPtr) -> MediaStatus,

    // -- Buffer exchange --
    pub AMediaCodec_dequeueInputBuffer:
        unsafe extern "C" fn(codec: AMediaCodecPtr, timeout_us: i64) -> isize,
    pub AMediaCodec_getInputBuffer:
        unsafe extern "C" fn(codec: AMediaCodecPtr, index: usize, out_size: *mut usize) -> *mut u8,
    pub AMediaCodec_queueInputBuffer: unsafe extern "C" fn(
        codec: AMediaCodecPtr,
        index: usize,
        offset: i64,
        size: usize,
        time_us: u64,
        flags: u32,
    ) -> MediaStatus,
    pub AMediaCodec_dequeueOutputBuffer: unsafe extern "C" fn(
        codec: AMediaCodecPtr,
        info: *mut BufferInfo,
        timeout_us: i64,
    ) -> isize,
    pub AMediaCodec_getOutputBuffer:
        unsafe extern "C" fn(codec: AMediaCodecPtr, index: usize, out_size: *mut usize) -> *mut u8,
    pub AMediaCodec_getOutputFormat:
        unsafe extern "C" fn(codec: AMediaCodecPtr) -> AMediaFormatPtr,
    pub AMediaCodec_releaseOutputBuffer:
        unsafe extern "C" fn(codec: AMediaCodecPtr, index: usize, render: bool) -> MediaStatus,

    // -- Format handling --
    pub AMediaFormat_new: unsafe extern "C" fn() -> AMediaFormatPtr,
    pub AMediaFormat_delete: unsafe extern "C" fn(format: AMediaFormatPtr) -> MediaStatus,
    pub AMediaFormat_setString:
        unsafe extern "C" fn(format: AMediaFormatPtr, key: *const c_char, value: *const c_char),
    pub AMediaFormat_setInt32:
        unsafe extern "C" fn(format: AMediaFormatPtr, key: *const c_char, value: i32),
    pub AMediaFormat_getInt32: unsafe extern "C" fn(
        format: AMediaFormatPtr,
        key: *const c_char,
        out: *mut i32,
    ) -> bool,
}

// SAFETY: the function pointers reference a loaded shared library that the
// `_lib` handle keeps alive; the platform media API is thread-safe for the
// calls made here.
unsafe impl Send for MediaNdkLibrary {}
unsafe impl Sync for MediaNdkLibrary {}

impl std::fmt::Debug for MediaNdkLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaNdkLibrary").finish()
    }
}

/// Copy one typed symbol out of the library.
///
/// # Safety
///
/// `T` must match the C signature of the named symbol exactly.
unsafe fn symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> Result<T, PlatformError> {
    lib.get::<T>(name).map(|s| *s).map_err(|e| {
        PlatformError::Library(format!(
            "{}: {e}",
            String::from_utf8_lossy(&name[..name.len() - 1])
        ))
    })
}

impl MediaNdkLibrary {
    /// Load the platform media library from the default system path.
    pub fn load() -> Result<Self, PlatformError> {
        let lib_name = "libmediandk.so";
        info!(library = lib_name, "loading platform media library");

        // SAFETY: loading a well-known platform system library.
        let lib = unsafe { Library::new(lib_name) }
            .map_err(|e| PlatformError::Library(format!("failed to load {lib_name}: {e}")))?;

        // SAFETY: the signatures below match the platform C headers; any
        // library that loads at this path exports all of them.
        unsafe {
            Ok(Self {
                AMediaCodec_createDecoderByType: symbol(
                    &lib,
                    b"AMediaCodec_createDecoderByType\0",
                )?,
                AMediaCodec_delete: symbol(&lib, b"AMediaCodec_delete\0")?,
                AMediaCodec_configure: symbol(&lib, b"AMediaCodec_configure\0")?,
                AMediaCodec_start: symbol(&lib, b"AMediaCodec_start\0")?,
                AMediaCodec_stop: symbol(&lib, b"AMediaCodec_stop\0")?,
                AMediaCodec_flush: symbol(&lib, b"AMediaCodec_flush\0")?,
                AMediaCodec_dequeueInputBuffer: symbol(&lib, b"AMediaCodec_dequeueInputBuffer\0")?,
                AMediaCodec_getInputBuffer: symbol(&lib, b"AMediaCodec_getInputBuffer\0")?,
                AMediaCodec_queueInputBuffer: symbol(&lib, b"AMediaCodec_queueInputBuffer\0")?,
                AMediaCodec_dequeueOutputBuffer: symbol(
                    &lib,
                    b"AMediaCodec_dequeueOutputBuffer\0",
                )?,
                AMediaCodec_getOutputBuffer: symbol(&lib, b"AMediaCodec_getOutputBuffer\0")?,
                AMediaCodec_getOutputFormat: symbol(&lib, b"AMediaCodec_getOutputFormat\0")?,
                AMediaCodec_releaseOutputBuffer: symbol(
                    &lib,
                    b"AMediaCodec_releaseOutputBuffer\0",
                )?,
                AMediaFormat_new: symbol(&lib, b"AMediaFormat_new\0")?,
                AMediaFormat_delete: symbol(&lib, b"AMediaFormat_delete\0")?,
                AMediaFormat_setString: symbol(&lib, b"AMediaFormat_setString\0")?,
                AMediaFormat_setInt32: symbol(&lib, b"AMediaFormat_setInt32\0")?,
                AMediaFormat_getInt32: symbol(&lib, b"AMediaFormat_getInt32\0")?,
                _lib: lib,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// NdkCodec
// ---------------------------------------------------------------------------

struct NdkState {
    codec: AMediaCodecPtr,
    direct: bool,
    video: bool,
    /// Metadata for dequeued, unreleased output buffers.
    infos: HashMap<u32, BufferInfo>,
}

// SAFETY: the raw codec handle is only used behind the Mutex or via a copy
// taken under it; the platform codec object is internally thread-safe.
unsafe impl Send for NdkState {}

/// Native-side platform codec variant.
pub struct NdkCodec {
    lib: Arc<MediaNdkLibrary>,
    state: Mutex<NdkState>,
    /// Bumped by flush/stop so emulated-infinite dequeues return promptly.
    epoch: AtomicU64,
}

unsafe impl Sync for NdkCodec {}

impl NdkCodec {
    pub fn new(lib: Arc<MediaNdkLibrary>) -> Self {
        Self {
            lib,
            state: Mutex::new(NdkState {
                codec: ptr::null_mut(),
                direct: false,
                video: false,
                infos: HashMap::new(),
            }),
            epoch: AtomicU64::new(0),
        }
    }

    fn handle(&self) -> Result<AMediaCodecPtr, PlatformError> {
        let st = self.state.lock();
        if st.codec.is_null() {
            Err(PlatformError::NotStarted)
        } else {
            Ok(st.codec)
        }
    }

    fn timeout_us(timeout: Option<Duration>) -> i64 {
        timeout.unwrap_or(POLL_SLICE).as_micros() as i64
    }

    fn read_i32(&self, format: AMediaFormatPtr, key: &CStr, fallback: i32) -> i32 {
        let mut value = 0i32;
        // SAFETY: format is a valid handle and key a NUL-terminated string.
        if unsafe { (self.lib.AMediaFormat_getInt32)(format, key.as_ptr(), &mut value) } {
            value
        } else {
            fallback
        }
    }

    fn query_output_format(&self, video: bool) -> Result<Output, PlatformError> {
        let codec = self.handle()?;
        // SAFETY: codec is a live handle; the returned format is owned by us
        // and deleted below.
        let format = unsafe { (self.lib.AMediaCodec_getOutputFormat)(codec) };
        if format.is_null() {
            return Err(PlatformError::Call {
                call: "getOutputFormat",
                status: -1,
            });
        }

        let out = if video {
            let width = self.read_i32(format, c"width", 0);
            let height = self.read_i32(format, c"height", 0);
            Output::VideoFormat(VideoOutputFormat {
                pixel_format: PixelFormat(self.read_i32(format, c"color-format", 0)),
                width: width.max(0) as u32,
                height: height.max(0) as u32,
                stride: self.read_i32(format, c"stride", 0),
                slice_height: self.read_i32(format, c"slice-height", 0),
                crop: CropWindow {
                    left: self.read_i32(format, c"crop-left", 0),
                    top: self.read_i32(format, c"crop-top", 0),
                    right: self.read_i32(format, c"crop-right", width - 1),
                    bottom: self.read_i32(format, c"crop-bottom", height - 1),
                },
            })
        } else {
            Output::AudioFormat(AudioOutputFormat {
                channel_count: self.read_i32(format, c"channel-count", 0).max(0) as u32,
                sample_rate: self.read_i32(format, c"sample-rate", 0).max(0) as u32,
            })
        };

        // SAFETY: format came from getOutputFormat above.
        unsafe { (self.lib.AMediaFormat_delete)(format) };
        Ok(out)
    }
}

impl PlatformCodec for NdkCodec {
    fn start(&self, args: &StartArgs) -> Result<(), PlatformError> {
        let mime = CString::new(match args {
            StartArgs::Video(v) => v.mime,
            StartArgs::Audio(a) => a.mime,
        })
        .map_err(|_| PlatformError::Library("mime contains NUL".into()))?;

        // SAFETY: mime is NUL-terminated; a null return means no decoder
        // exists for this mime.
        let codec = unsafe { (self.lib.AMediaCodec_createDecoderByType)(mime.as_ptr()) };
        if codec.is_null() {
            return Err(PlatformError::Library(format!(
                "no decoder for {}",
                mime.to_string_lossy()
            )));
        }

        // SAFETY: AMediaFormat_new returns an owned handle; set* calls take
        // NUL-terminated keys. The format is deleted after configure.
        let status = unsafe {
            let format = (self.lib.AMediaFormat_new)();
            let mut window: ANativeWindowPtr = ptr::null_mut();

            (self.lib.AMediaFormat_setString)(format, c"mime".as_ptr(), mime.as_ptr());
            match args {
                StartArgs::Video(v) => {
                    (self.lib.AMediaFormat_setInt32)(format, c"width".as_ptr(), v.width as i32);
                    (self.lib.AMediaFormat_setInt32)(format, c"height".as_ptr(), v.height as i32);
                    if let Some(SurfaceHandle(raw)) = v.surface {
                        window = raw as ANativeWindowPtr;
                    }
                }
                StartArgs::Audio(a) => {
                    (self.lib.AMediaFormat_setInt32)(
                        format,
                        c"sample-rate".as_ptr(),
                        a.sample_rate as i32,
                    );
                    (self.lib.AMediaFormat_setInt32)(
                        format,
                        c"channel-count".as_ptr(),
                        a.channel_count as i32,
                    );
                }
            }

            let status =
                (self.lib.AMediaCodec_configure)(codec, format, window, ptr::null_mut(), 0);
            (self.lib.AMediaFormat_delete)(format);
            if status == AMEDIA_OK {
                (self.lib.AMediaCodec_start)(codec)
            } else {
                status
            }
        };

        if status != AMEDIA_OK {
            // SAFETY: codec was created above and never started.
            unsafe { (self.lib.AMediaCodec_delete)(codec) };
            return Err(PlatformError::Call {
                call: "configure/start",
                status,
            });
        }

        let mut st = self.state.lock();
        st.codec = codec;
        st.direct = matches!(args, StartArgs::Video(v) if v.surface.is_some());
        st.video = matches!(args, StartArgs::Video(_));
        st.infos.clear();
        info!(mime = %mime.to_string_lossy(), direct = st.direct, "platform codec started");
        Ok(())
    }

    fn stop(&self) {
        let codec = {
            let mut st = self.state.lock();
            st.direct = false;
            st.infos.clear();
            std::mem::replace(&mut st.codec, ptr::null_mut())
        };
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if !codec.is_null() {
            // SAFETY: we exclusively own the handle after swapping it out.
            unsafe {
                let status = (self.lib.AMediaCodec_stop)(codec);
                if status != AMEDIA_OK {
                    warn!(status, "stop failed");
                }
                (self.lib.AMediaCodec_delete)(codec);
            }
            debug!("platform codec stopped");
        }
    }

    fn flush(&self) -> Result<(), PlatformError> {
        let codec = self.handle()?;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.state.lock().infos.clear();
        // SAFETY: codec is a live handle; flush is thread-safe against the
        // dequeue calls below.
        let status = unsafe { (self.lib.AMediaCodec_flush)(codec) };
        if status != AMEDIA_OK {
            return Err(PlatformError::Call {
                call: "flush",
                status,
            });
        }
        Ok(())
    }

    fn dequeue_in(&self, timeout: Option<Duration>) -> Result<DequeuedInput, PlatformError> {
        let slice_us = Self::timeout_us(timeout);
        loop {
            let codec = self.handle()?;
            let epoch = self.epoch.load(Ordering::SeqCst);
            // SAFETY: codec is a live handle; the call blocks at most
            // slice_us microseconds.
            let index = unsafe { (self.lib.AMediaCodec_dequeueInputBuffer)(codec, slice_us) };
            match index {
                i if i >= 0 => return Ok(DequeuedInput::Index(i as u32)),
                INFO_TRY_AGAIN_LATER => {
                    if timeout.is_some() || self.epoch.load(Ordering::SeqCst) != epoch {
                        return Ok(DequeuedInput::TryAgain);
                    }
                }
                status => {
                    return Err(PlatformError::Call {
                        call: "dequeueInputBuffer",
                        status: status as i32,
                    })
                }
            }
        }
    }

    fn queue_in(
        &self,
        index: u32,
        data: &[u8],
        pts: Micros,
        config: bool,
    ) -> Result<(), PlatformError> {
        let codec = self.handle()?;
        let mut capacity = 0usize;
        // SAFETY: index was returned by dequeueInputBuffer and not yet
        // queued; the pointer stays valid until queueInputBuffer.
        let buf = unsafe { (self.lib.AMediaCodec_getInputBuffer)(codec, index as usize, &mut capacity) };
        if buf.is_null() || capacity < data.len() {
            return Err(PlatformError::Call {
                call: "getInputBuffer",
                status: -1,
            });
        }
        // SAFETY: buf points to at least `capacity >= data.len()` bytes.
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), buf, data.len()) };

        let flags = if config { BUFFER_FLAG_CODEC_CONFIG } else { 0 };
        // SAFETY: the buffer at `index` was filled above.
        let status = unsafe {
            (self.lib.AMediaCodec_queueInputBuffer)(
                codec,
                index as usize,
                0,
                data.len(),
                pts.0 as u64,
                flags,
            )
        };
        if status != AMEDIA_OK {
            return Err(PlatformError::Call {
                call: "queueInputBuffer",
                status,
            });
        }
        Ok(())
    }

    fn dequeue_out(&self, timeout: Option<Duration>) -> Result<DequeuedOutput, PlatformError> {
        let slice_us = Self::timeout_us(timeout);
        loop {
            let codec = self.handle()?;
            let epoch = self.epoch.load(Ordering::SeqCst);
            let mut info = BufferInfo::default();
            // SAFETY: codec is a live handle; info is written on success.
            let index =
                unsafe { (self.lib.AMediaCodec_dequeueOutputBuffer)(codec, &mut info, slice_us) };
            match index {
                i if i >= 0 => {
                    self.state.lock().infos.insert(i as u32, info);
                    return Ok(DequeuedOutput::Buffer(i as u32));
                }
                INFO_OUTPUT_FORMAT_CHANGED => return Ok(DequeuedOutput::FormatChanged),
                INFO_OUTPUT_BUFFERS_CHANGED => return Ok(DequeuedOutput::BuffersChanged),
                INFO_TRY_AGAIN_LATER => {
                    if timeout.is_some() || self.epoch.load(Ordering::SeqCst) != epoch {
                        return Ok(DequeuedOutput::TryAgain);
                    }
                }
                status => {
                    return Err(PlatformError::Call {
                        call: "dequeueOutputBuffer",
                        status: status as i32,
                    })
                }
            }
        }
    }

    fn get_out(&self, event: DequeuedOutput) -> Result<Option<Output>, PlatformError> {
        match event {
            DequeuedOutput::Buffer(index) => {
                let (direct, info) = {
                    let st = self.state.lock();
                    let info = st
                        .infos
                        .get(&index)
                        .copied()
                        .ok_or(PlatformError::InvalidIndex { index })?;
                    (st.direct, info)
                };

                let data = if direct {
                    None
                } else {
                    let codec = self.handle()?;
                    let mut size = 0usize;
                    // SAFETY: index refers to a dequeued, unreleased output
                    // buffer; the pointer is valid until releaseOutputBuffer.
                    let buf = unsafe {
                        (self.lib.AMediaCodec_getOutputBuffer)(codec, index as usize, &mut size)
                    };
                    if buf.is_null() {
                        return Err(PlatformError::Call {
                            call: "getOutputBuffer",
                            status: -1,
                        });
                    }
                    let offset = info.offset.max(0) as usize;
                    let len = (info.size.max(0) as usize).min(size.saturating_sub(offset));
                    // SAFETY: offset + len is within the buffer per above.
                    Some(unsafe { std::slice::from_raw_parts(buf.add(offset), len) }.to_vec())
                };

                Ok(Some(Output::Buffer(OutputBuffer {
                    index,
                    pts: Micros(info.presentation_time_us),
                    size: info.size.max(0) as usize,
                    data,
                })))
            }
            DequeuedOutput::FormatChanged => {
                let video = self.state.lock().video;
                self.query_output_format(video).map(Some)
            }
            DequeuedOutput::BuffersChanged | DequeuedOutput::TryAgain => Ok(None),
        }
    }

    fn release_out(&self, index: u32, render: bool) -> Result<(), PlatformError> {
        let codec = self.handle()?;
        self.state.lock().infos.remove(&index);
        // SAFETY: index refers to a dequeued output buffer.
        let status =
            unsafe { (self.lib.AMediaCodec_releaseOutputBuffer)(codec, index as usize, render) };
        if status != AMEDIA_OK {
            error!(index, status, "releaseOutputBuffer failed");
            return Err(PlatformError::Call {
                call: "releaseOutputBuffer",
                status,
            });
        }
        Ok(())
    }

    fn direct_rendering(&self) -> bool {
        self.state.lock().direct
    }

    fn supports_interlaced(&self) -> bool {
        true
    }
}

impl Drop for NdkCodec {
    fn drop(&mut self) {
        self.stop();
    }
}
