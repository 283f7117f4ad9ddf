//! `mb-common` — Shared types, configuration, and errors for the bridge.
//!
//! This crate is the foundation the other bridge crates depend on:
//!
//! - **Types**: `Micros`, `Rational`, `Resolution`, `PixelFormat` (newtypes)
//! - **Codecs**: `VideoCodec`, `AudioCodec`, `CodecId` + the mime table
//! - **Packets**: `Packet`, `AudioBlock`, `FrameLayout` (data flow types)
//! - **Errors**: `BridgeError`, `PlatformError`, `BitstreamError` (thiserror-based)
//! - **Config**: `BridgeConfig`, `StreamParams`, `Quirks`

pub mod codec;
pub mod config;
pub mod error;
pub mod packet;
pub mod types;

// Re-export commonly used items at crate root
pub use codec::{AudioCodec, CodecId, FourCc, VideoCodec};
pub use config::{BridgeConfig, Quirks, StreamParams};
pub use error::{BitstreamError, BridgeError, BridgeResult, PlatformError};
pub use packet::{AudioBlock, FrameLayout, Packet, PacketFlags};
pub use types::{CropWindow, Micros, PixelFormat, Rational, Resolution, SurfaceHandle};
