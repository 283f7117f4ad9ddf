//! Inflight picture registry for direct rendering.
//!
//! In direct-render mode a decoded frame never passes through user memory:
//! the host picture carries the output-buffer index and the platform codec
//! keeps the backing storage until the host renders or drops the picture.
//! That creates a cross-ownership edge the controller must be able to sever:
//! a stop or flush invalidates the indices, so every picture still in flight
//! has to be released first — and any release the host performs afterwards
//! must become a no-op.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::platform::PlatformCodec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum SlotState {
    /// The output buffer is owned by the host picture.
    Attached,
    /// Released back to the codec (rendered or discarded).
    Released,
    /// Severed by the controller; later releases are no-ops.
    Detached,
}

/// Association between one host picture and one output-buffer index.
pub struct InflightSlot {
    index: u32,
    codec: Arc<dyn PlatformCodec>,
    state: Mutex<SlotState>,
}

impl InflightSlot {
    pub(crate) fn new(index: u32, codec: Arc<dyn PlatformCodec>) -> Arc<Self> {
        Arc::new(Self {
            index,
            codec,
            state: Mutex::new(SlotState::Attached),
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    fn is_attached(&self) -> bool {
        *self.state.lock() == SlotState::Attached
    }

    /// Release the buffer exactly once; later calls do nothing.
    fn release(&self, render: bool) {
        {
            let mut state = self.state.lock();
            match *state {
                SlotState::Attached => *state = SlotState::Released,
                SlotState::Released | SlotState::Detached => return,
            }
        }
        // The codec may already be stopped (e.g. release racing a restart);
        // the index is then meaningless and the error carries no information.
        if let Err(e) = self.codec.release_out(self.index, render) {
            debug!(index = self.index, error = %e, "late release ignored");
        }
    }

    fn detach(&self) {
        let mut state = self.state.lock();
        if *state == SlotState::Attached {
            *state = SlotState::Detached;
        }
    }
}

impl std::fmt::Debug for InflightSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightSlot")
            .field("index", &self.index)
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Host-facing handle to a direct-rendered frame.
///
/// Rendering consumes the picture and shows it on the bound surface;
/// dropping it returns the buffer to the codec unrendered. Either way the
/// backing output buffer is released exactly once.
#[derive(Debug)]
pub struct OpaquePicture {
    slot: Arc<InflightSlot>,
}

impl OpaquePicture {
    pub(crate) fn new(slot: Arc<InflightSlot>) -> Self {
        Self { slot }
    }

    /// Output-buffer index backing this picture.
    pub fn buffer_index(&self) -> u32 {
        self.slot.index
    }

    /// Render the frame to the surface and release the buffer.
    pub fn render(self) {
        self.slot.release(true);
    }
}

impl Drop for OpaquePicture {
    fn drop(&mut self) {
        self.slot.release(false);
    }
}

/// All pictures currently in flight for one decoder.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    slots: Mutex<Vec<Arc<InflightSlot>>>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slot: Arc<InflightSlot>) {
        let mut slots = self.slots.lock();
        // Entries the host has already released are dead weight.
        slots.retain(|s| s.is_attached());
        slots.push(slot);
    }

    /// Release every attached picture without rendering.
    ///
    /// Used when the indices are about to become invalid (flush) and to
    /// break the paused-renderer deadlock: a host that is not rendering
    /// holds output buffers, which starves the input side.
    pub fn invalidate_all(&self) {
        let slots = self.slots.lock();
        let count = slots.iter().filter(|s| s.is_attached()).count();
        if count > 0 {
            warn!(count, "invalidating inflight pictures");
        }
        for slot in slots.iter() {
            slot.release(false);
        }
    }

    /// Sever every slot so later host releases become no-ops.
    ///
    /// Used at stop, when the platform codec reclaims the buffer pool out
    /// from under any pictures the host still holds.
    pub fn detach_all(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter() {
            slot.detach();
        }
        slots.clear();
    }

    /// Number of pictures still attached.
    pub fn inflight_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_attached()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockCodec, MockConfig};
    use crate::platform::{PlatformCodec, StartArgs, VideoStartArgs};
    use mb_common::SurfaceHandle;

    fn started_codec() -> Arc<MockCodec> {
        let codec = Arc::new(MockCodec::new(MockConfig::default()));
        codec
            .start(&StartArgs::Video(VideoStartArgs {
                mime: "video/avc",
                width: 320,
                height: 240,
                surface: Some(SurfaceHandle(1)),
                h264_profile: None,
            }))
            .unwrap();
        codec
    }

    #[test]
    fn render_releases_once() {
        let codec = started_codec();
        let slot = InflightSlot::new(7, codec.clone());
        let pic = OpaquePicture::new(slot);
        pic.render();
        assert_eq!(codec.released(), vec![(7, true)]);
    }

    #[test]
    fn drop_releases_without_render() {
        let codec = started_codec();
        let pic = OpaquePicture::new(InflightSlot::new(3, codec.clone()));
        drop(pic);
        assert_eq!(codec.released(), vec![(3, false)]);
    }

    #[test]
    fn invalidate_then_host_drop_is_single_release() {
        let codec = started_codec();
        let registry = InflightRegistry::new();
        let slot = InflightSlot::new(5, codec.clone());
        registry.insert(slot.clone());
        let pic = OpaquePicture::new(slot);

        registry.invalidate_all();
        assert_eq!(codec.released(), vec![(5, false)]);

        // The host finally drops its picture: no second release.
        drop(pic);
        assert_eq!(codec.released(), vec![(5, false)]);
    }

    #[test]
    fn detached_pictures_never_reach_the_codec() {
        let codec = started_codec();
        let registry = InflightRegistry::new();
        let mut pics = Vec::new();
        for i in 0..8 {
            let slot = InflightSlot::new(i, codec.clone());
            registry.insert(slot.clone());
            pics.push(OpaquePicture::new(slot));
        }
        assert_eq!(registry.inflight_count(), 8);

        registry.detach_all();
        assert_eq!(registry.inflight_count(), 0);

        // Host releases after detach: all no-ops.
        for pic in pics.drain(..) {
            pic.render();
        }
        assert!(codec.released().is_empty());
    }

    #[test]
    fn insert_prunes_dead_slots() {
        let codec = started_codec();
        let registry = InflightRegistry::new();
        let first = InflightSlot::new(0, codec.clone());
        registry.insert(first.clone());
        drop(OpaquePicture::new(first));

        registry.insert(InflightSlot::new(1, codec.clone()));
        assert_eq!(registry.inflight_count(), 1);
    }
}
