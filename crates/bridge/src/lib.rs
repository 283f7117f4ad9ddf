//! `mb-bridge` — bridge between a media-pipeline host and a platform
//! hardware decoder exposed through a buffer-index codec API.
//!
//! The host feeds compressed elementary-stream packets to a [`Decoder`];
//! decoded pictures and audio blocks come back through the [`HostOutput`]
//! trait. Inside sits the asynchronous input/output pump that keeps the
//! hardware fed, re-presents codec configuration after every start and
//! flush, and recovers from starvation and mid-stream format changes.
//!
//! # Architecture
//!
//! - [`platform`] — the [`PlatformCodec`](platform::PlatformCodec) seam,
//!   with a native dynamic-loading variant and a software mock
//! - [`csd`] — ordered codec-configuration store with resend cursor
//! - [`timestamp`] — bounded DTS reorder buffer
//! - [`inflight`] — registry of direct-rendered pictures still owned by
//!   the host
//! - [`controller`] — lifecycle, decode path, flush/restart
//! - the output pump worker (internal), which drains decoded buffers and
//!   hands them to the host
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use mb_bridge::{Decoder, platform::ndk};
//! use mb_common::{BridgeConfig, StreamParams};
//!
//! let lib = Arc::new(ndk::MediaNdkLibrary::load()?);
//! let codec = Arc::new(ndk::NdkCodec::new(lib));
//! let decoder = Decoder::open(params, BridgeConfig::default(), surface, codec, host)?;
//! for packet in demuxer.packets() {
//!     decoder.decode(packet)?;
//! }
//! decoder.close();
//! ```

pub mod csd;
pub mod host;
pub mod inflight;
pub mod platform;
pub mod timestamp;

mod audio;
mod controller;
mod pump;
mod video;

pub use audio::{plan_extraction, ExtractionPlan, SampleClock};
pub use controller::Decoder;
pub use host::{AudioFormat, HostOutput, HostRejected, Picture, PictureContent, VideoFormat};
pub use inflight::{InflightRegistry, InflightSlot, OpaquePicture};
pub use timestamp::TimestampFifo;
