//! Deterministic in-process platform codec for tests.
//!
//! `MockCodec` models the contract of a real buffer-index decoder closely
//! enough to exercise the controller and the output pump on any machine:
//!
//! - a bounded input-slot pool, with input starvation once the number of
//!   unreleased output buffers reaches `buffer_capacity` (the mechanism
//!   behind the paused-renderer deadlock);
//! - one format event before the first decoded buffer of each start;
//! - "decoding" that echoes each queued payload back as one output buffer
//!   carrying the queued timestamp;
//! - blocking dequeues that a flush or stop cuts short with `TryAgain`;
//! - a full release log for exactly-once accounting in tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use mb_common::{Micros, PlatformError};

use super::{
    AudioOutputFormat, DequeuedInput, DequeuedOutput, Output, OutputBuffer, PlatformCodec,
    StartArgs, VideoOutputFormat,
};

/// Tunables for a mock codec instance.
#[derive(Clone, Debug)]
pub struct MockConfig {
    pub input_slots: u32,
    /// Unreleased output buffers allowed before the input side starves.
    pub buffer_capacity: usize,
    pub supports_interlaced: bool,
    /// Format event payload; derived from the start arguments when `None`.
    pub video_format: Option<VideoOutputFormat>,
    pub audio_format: Option<AudioOutputFormat>,
    /// Scripted output timestamps by production order, for modeling
    /// decoders that do not propagate input timestamps faithfully.
    pub pts_script: Vec<i64>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            input_slots: 4,
            buffer_capacity: 64,
            supports_interlaced: true,
            video_format: None,
            audio_format: None,
            pts_script: Vec::new(),
        }
    }
}

/// One `queue_in` call as the mock observed it.
#[derive(Clone, Debug)]
pub struct QueuedInput {
    pub data: Vec<u8>,
    pub pts: Micros,
    pub config: bool,
}

#[derive(Debug)]
enum PendingEvent {
    Format,
    Buffer(u32),
}

#[derive(Debug)]
struct StoredBuffer {
    pts: Micros,
    data: Vec<u8>,
}

#[derive(Default)]
struct MockState {
    started: bool,
    direct: bool,
    /// Bumped by flush/stop to cut short blocked dequeues.
    epoch: u64,
    free_inputs: VecDeque<u32>,
    pending: VecDeque<PendingEvent>,
    buffers: HashMap<u32, StoredBuffer>,
    outstanding: usize,
    next_out_index: u32,
    format_sent: bool,
    queue_log: Vec<QueuedInput>,
    released: Vec<(u32, bool)>,
    starts: u32,
    flushes: u32,
    last_start: Option<StartArgs>,
}

/// Software stand-in for the platform decoder.
pub struct MockCodec {
    config: MockConfig,
    state: Mutex<MockState>,
    input_cond: Condvar,
    output_cond: Condvar,
}

impl MockCodec {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MockState::default()),
            input_cond: Condvar::new(),
            output_cond: Condvar::new(),
        }
    }

    // ── test accessors ───────────────────────────────────────────

    /// Every `queue_in` call in order, config buffers included.
    pub fn queue_log(&self) -> Vec<QueuedInput> {
        self.state.lock().queue_log.clone()
    }

    /// Every `release_out` call in order, as `(index, rendered)`.
    pub fn released(&self) -> Vec<(u32, bool)> {
        self.state.lock().released.clone()
    }

    pub fn start_count(&self) -> u32 {
        self.state.lock().starts
    }

    pub fn flush_count(&self) -> u32 {
        self.state.lock().flushes
    }

    pub fn last_start(&self) -> Option<StartArgs> {
        self.state.lock().last_start.clone()
    }

    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Output buffers produced but not yet released.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }
}

impl PlatformCodec for MockCodec {
    fn start(&self, args: &StartArgs) -> Result<(), PlatformError> {
        let mut st = self.state.lock();
        st.started = true;
        st.direct = matches!(args, StartArgs::Video(v) if v.surface.is_some());
        st.free_inputs = (0..self.config.input_slots).collect();
        st.pending.clear();
        st.buffers.clear();
        st.outstanding = 0;
        st.format_sent = false;
        st.starts += 1;
        st.last_start = Some(args.clone());
        Ok(())
    }

    fn stop(&self) {
        let mut st = self.state.lock();
        st.started = false;
        st.direct = false;
        st.epoch += 1;
        st.pending.clear();
        st.buffers.clear();
        st.outstanding = 0;
        st.free_inputs.clear();
        self.input_cond.notify_all();
        self.output_cond.notify_all();
    }

    fn flush(&self) -> Result<(), PlatformError> {
        let mut st = self.state.lock();
        st.flushes += 1;
        st.epoch += 1;
        st.pending.clear();
        st.buffers.clear();
        st.outstanding = 0;
        if st.started {
            st.free_inputs = (0..self.config.input_slots).collect();
        }
        self.input_cond.notify_all();
        self.output_cond.notify_all();
        Ok(())
    }

    fn dequeue_in(&self, timeout: Option<Duration>) -> Result<DequeuedInput, PlatformError> {
        let mut st = self.state.lock();
        if !st.started {
            return Err(PlatformError::NotStarted);
        }
        let epoch = st.epoch;
        loop {
            if st.epoch != epoch || !st.started {
                return Ok(DequeuedInput::TryAgain);
            }
            if st.outstanding < self.config.buffer_capacity {
                if let Some(index) = st.free_inputs.pop_front() {
                    return Ok(DequeuedInput::Index(index));
                }
            }
            match timeout {
                None => self.input_cond.wait(&mut st),
                Some(d) => {
                    if self.input_cond.wait_for(&mut st, d).timed_out() {
                        return Ok(DequeuedInput::TryAgain);
                    }
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
        let mut st = self.state.lock();
        if !st.started {
            return Err(PlatformError::NotStarted);
        }
        st.queue_log.push(QueuedInput {
            data: data.to_vec(),
            pts,
            config,
        });

        if !config {
            if !st.format_sent {
                st.format_sent = true;
                st.pending.push_back(PendingEvent::Format);
            }
            let out_index = st.next_out_index;
            st.next_out_index += 1;
            let out_pts = self
                .config
                .pts_script
                .get(out_index as usize)
                .copied()
                .map_or(pts, Micros);
            st.buffers.insert(
                out_index,
                StoredBuffer {
                    pts: out_pts,
                    data: data.to_vec(),
                },
            );
            st.pending.push_back(PendingEvent::Buffer(out_index));
            st.outstanding += 1;
        }

        st.free_inputs.push_back(index);
        self.output_cond.notify_all();
        self.input_cond.notify_all();
        Ok(())
    }

    fn dequeue_out(&self, timeout: Option<Duration>) -> Result<DequeuedOutput, PlatformError> {
        let mut st = self.state.lock();
        let epoch = st.epoch;
        loop {
            if st.epoch != epoch || !st.started {
                return Ok(DequeuedOutput::TryAgain);
            }
            if let Some(event) = st.pending.pop_front() {
                return Ok(match event {
                    PendingEvent::Format => DequeuedOutput::FormatChanged,
                    PendingEvent::Buffer(index) => DequeuedOutput::Buffer(index),
                });
            }
            match timeout {
                None => self.output_cond.wait(&mut st),
                Some(d) => {
                    if self.output_cond.wait_for(&mut st, d).timed_out() {
                        return Ok(DequeuedOutput::TryAgain);
                    }
                }
            }
        }
    }

    fn get_out(&self, event: DequeuedOutput) -> Result<Option<Output>, PlatformError> {
        let st = self.state.lock();
        match event {
            DequeuedOutput::Buffer(index) => {
                let buf = st
                    .buffers
                    .get(&index)
                    .ok_or(PlatformError::InvalidIndex { index })?;
                Ok(Some(Output::Buffer(OutputBuffer {
                    index,
                    pts: buf.pts,
                    size: buf.data.len(),
                    data: if st.direct {
                        None
                    } else {
                        Some(buf.data.clone())
                    },
                })))
            }
            DequeuedOutput::FormatChanged => match st.last_start.as_ref() {
                Some(StartArgs::Video(v)) => {
                    let fmt = self.config.video_format.unwrap_or(VideoOutputFormat {
                        pixel_format: mb_common::PixelFormat::YUV420_SEMI_PLANAR,
                        width: v.width,
                        height: v.height,
                        stride: v.width as i32,
                        slice_height: v.height as i32,
                        crop: mb_common::CropWindow {
                            left: 0,
                            top: 0,
                            right: v.width as i32 - 1,
                            bottom: v.height as i32 - 1,
                        },
                    });
                    Ok(Some(Output::VideoFormat(fmt)))
                }
                Some(StartArgs::Audio(a)) => {
                    let fmt = self.config.audio_format.unwrap_or(AudioOutputFormat {
                        channel_count: a.channel_count,
                        sample_rate: a.sample_rate,
                    });
                    Ok(Some(Output::AudioFormat(fmt)))
                }
                None => Err(PlatformError::NotStarted),
            },
            DequeuedOutput::BuffersChanged | DequeuedOutput::TryAgain => Ok(None),
        }
    }

    fn release_out(&self, index: u32, render: bool) -> Result<(), PlatformError> {
        let mut st = self.state.lock();
        st.released.push((index, render));
        if st.buffers.remove(&index).is_some() {
            st.outstanding -= 1;
            self.input_cond.notify_all();
        }
        // Unknown indices are tolerated: after a flush the caller cannot
        // know which indices it still owns.
        Ok(())
    }

    fn direct_rendering(&self) -> bool {
        self.state.lock().direct
    }

    fn supports_interlaced(&self) -> bool {
        self.config.supports_interlaced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mb_common::SurfaceHandle;

    fn video_args(surface: Option<SurfaceHandle>) -> StartArgs {
        StartArgs::Video(super::super::VideoStartArgs {
            mime: "video/avc",
            width: 320,
            height: 240,
            surface,
            h264_profile: None,
        })
    }

    #[test]
    fn start_fills_input_pool() {
        let codec = MockCodec::new(MockConfig::default());
        codec.start(&video_args(None)).unwrap();
        for expected in 0..4 {
            match codec.dequeue_in(Some(Duration::from_millis(1))).unwrap() {
                DequeuedInput::Index(i) => assert_eq!(i, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(
            codec.dequeue_in(Some(Duration::from_millis(1))).unwrap(),
            DequeuedInput::TryAgain
        );
    }

    #[test]
    fn queue_produces_format_then_buffer() {
        let codec = MockCodec::new(MockConfig::default());
        codec.start(&video_args(None)).unwrap();
        codec.queue_in(0, &[1, 2, 3], Micros(99), false).unwrap();

        assert_eq!(
            codec.dequeue_out(Some(Duration::from_millis(1))).unwrap(),
            DequeuedOutput::FormatChanged
        );
        match codec.dequeue_out(Some(Duration::from_millis(1))).unwrap() {
            DequeuedOutput::Buffer(index) => {
                let out = codec.get_out(DequeuedOutput::Buffer(index)).unwrap();
                match out {
                    Some(Output::Buffer(buf)) => {
                        assert_eq!(buf.pts, Micros(99));
                        assert_eq!(buf.data.as_deref(), Some([1, 2, 3].as_slice()));
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn config_buffers_produce_no_output() {
        let codec = MockCodec::new(MockConfig::default());
        codec.start(&video_args(None)).unwrap();
        codec.queue_in(0, &[0, 0, 0, 1, 0x67], Micros::ZERO, true).unwrap();
        assert_eq!(
            codec.dequeue_out(Some(Duration::from_millis(1))).unwrap(),
            DequeuedOutput::TryAgain
        );
    }

    #[test]
    fn exhausted_buffer_capacity_starves_input() {
        let codec = MockCodec::new(MockConfig {
            buffer_capacity: 1,
            ..MockConfig::default()
        });
        codec.start(&video_args(Some(SurfaceHandle(1)))).unwrap();
        codec.queue_in(0, &[1], Micros(1), false).unwrap();

        // One outstanding buffer fills the budget.
        assert_eq!(
            codec.dequeue_in(Some(Duration::from_millis(1))).unwrap(),
            DequeuedInput::TryAgain
        );

        // Releasing it frees the input side again.
        match codec.dequeue_out(Some(Duration::from_millis(1))).unwrap() {
            DequeuedOutput::FormatChanged => {}
            other => panic!("unexpected {other:?}"),
        }
        let index = match codec.dequeue_out(Some(Duration::from_millis(1))).unwrap() {
            DequeuedOutput::Buffer(i) => i,
            other => panic!("unexpected {other:?}"),
        };
        codec.release_out(index, false).unwrap();
        assert!(matches!(
            codec.dequeue_in(Some(Duration::from_millis(1))).unwrap(),
            DequeuedInput::Index(_)
        ));
    }

    #[test]
    fn flush_interrupts_and_resets() {
        let codec = MockCodec::new(MockConfig::default());
        codec.start(&video_args(None)).unwrap();
        codec.queue_in(0, &[1], Micros(1), false).unwrap();
        codec.flush().unwrap();

        assert_eq!(
            codec.dequeue_out(Some(Duration::from_millis(1))).unwrap(),
            DequeuedOutput::TryAgain
        );
        assert_eq!(codec.outstanding(), 0);
        // Releasing a stale index after the flush is tolerated.
        codec.release_out(42, false).unwrap();
    }

    #[test]
    fn direct_rendering_tracks_surface() {
        let codec = MockCodec::new(MockConfig::default());
        assert!(!codec.direct_rendering());
        codec.start(&video_args(Some(SurfaceHandle(7)))).unwrap();
        assert!(codec.direct_rendering());
        codec.stop();
        assert!(!codec.direct_rendering());
    }
}
