//! Core types with newtype pattern for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Timestamp in microseconds.
///
/// Integer microseconds are used across the bridge because the output side
/// compares timestamps exactly (preroll gating, reorder substitution) and
/// the platform codec exchanges timestamps in the same unit.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Micros(pub i64);

impl Micros {
    pub const ZERO: Self = Self(0);

    pub fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000)
    }

    pub fn from_secs(secs: i64) -> Self {
        Self(secs * 1_000_000)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl Add for Micros {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Micros {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for Micros {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}us", self.0)
    }
}

/// Rational number for aspect ratios.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const SQUARE: Self = Self { num: 1, den: 1 };

    pub fn new(num: u32, den: u32) -> Self {
        assert!(den > 0, "Rational denominator must be > 0");
        Self { num, den }
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.num, self.den)
    }
}

/// Video/image resolution.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(self) -> bool {
        self.width > 0 && self.height > 0
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Crop window reported by the platform codec, inclusive coordinates.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CropWindow {
    /// Visible width derived from the crop window (inclusive bounds).
    pub fn width(self) -> i32 {
        self.right + 1 - self.left
    }

    /// Visible height derived from the crop window (inclusive bounds).
    pub fn height(self) -> i32 {
        self.bottom + 1 - self.top
    }
}

/// Platform color-format code, kept opaque.
///
/// The values are defined by the platform codec; the bridge only needs to
/// recognize the two YUV 4:2:0 layouts it can repack in copy mode.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelFormat(pub i32);

impl PixelFormat {
    /// Planar YUV 4:2:0 (Y plane, U plane, V plane).
    pub const YUV420_PLANAR: Self = Self(19);
    /// Semi-planar YUV 4:2:0 (Y plane, interleaved UV plane).
    pub const YUV420_SEMI_PLANAR: Self = Self(21);
    /// Opaque frames bound to a surface; never visible through user memory.
    pub const OPAQUE: Self = Self(-1);
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::YUV420_PLANAR => write!(f, "yuv420p"),
            Self::YUV420_SEMI_PLANAR => write!(f, "nv12"),
            Self::OPAQUE => write!(f, "opaque"),
            Self(other) => write!(f, "color-format({other})"),
        }
    }
}

/// Opaque handle to a rendering surface owned by the host.
///
/// Passed through to the platform codec at start, reusable across restarts.
/// The bridge never dereferences it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micros_arithmetic() {
        let a = Micros::from_millis(1);
        let b = Micros(500);
        assert_eq!((a + b).as_i64(), 1_500);
        assert_eq!((a - b).as_i64(), 500);
        assert_eq!(Micros::from_secs(2).as_i64(), 2_000_000);
    }

    #[test]
    fn micros_ordering() {
        assert!(Micros(1_000) < Micros(1_010));
        assert_eq!(Micros::ZERO, Micros(0));
    }

    #[test]
    fn crop_window_dimensions() {
        let crop = CropWindow {
            left: 0,
            top: 0,
            right: 1919,
            bottom: 1079,
        };
        assert_eq!(crop.width(), 1920);
        assert_eq!(crop.height(), 1080);
    }

    #[test]
    fn resolution_validity() {
        assert!(Resolution::new(1280, 720).is_valid());
        assert!(!Resolution::new(0, 720).is_valid());
        assert!(!Resolution::default().is_valid());
    }

    #[test]
    fn pixel_format_display() {
        assert_eq!(PixelFormat::YUV420_SEMI_PLANAR.to_string(), "nv12");
        assert_eq!(PixelFormat(42).to_string(), "color-format(42)");
    }
}
