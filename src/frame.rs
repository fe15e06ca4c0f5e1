//! Immutable sensor samples.
//!
//! - `Frame`: one color image (packed RGB8). Pixel storage is shared and never mutated.
//! - `DepthMap`: one grid of per-pixel distances in meters at the depth sensor's native
//!   resolution, which is not necessarily the color resolution.
//!
//! Both types are cheap to clone: the payload lives behind an `Arc<[T]>`, so handing a
//! frame to the inference engine and to the display path costs a reference count, not a copy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::FrameError;

/// Bytes per pixel for packed RGB8.
pub const RGB_CHANNELS: usize = 3;

/// Returns true when a depth sample carries a usable distance.
///
/// Non-positive and non-finite values are the sensor's "unknown" sentinels.
#[inline]
pub fn is_valid_depth(value: f32) -> bool {
    value.is_finite() && value > 0.0
}

// ----------------------------------------------------------------------------
// Frame: color image
// ----------------------------------------------------------------------------

/// One color image captured at `timestamp` (capture clock, relative to session start).
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
    /// Monotonic per-session capture counter.
    pub sequence: u64,
}

impl Frame {
    /// Wrap an RGB8 buffer. The buffer length must be `width * height * 3`.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        timestamp: Duration,
        sequence: u64,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(RGB_CHANNELS))
            .ok_or_else(|| FrameError::ColorUnavailable("frame dimensions overflow".into()))?;
        if pixels.len() != expected {
            return Err(FrameError::ColorUnavailable(format!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            timestamp,
            sequence,
        })
    }

    /// Read-only pixel access for inference backends and display.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// True when both handles point at the same captured buffer.
    pub fn same_capture(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}

// Pixel content is never logged.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// DepthMap: per-pixel distances
// ----------------------------------------------------------------------------

/// Row-major grid of distances in meters.
#[derive(Clone)]
pub struct DepthMap {
    values: Arc<[f32]>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
}

impl DepthMap {
    /// Wrap a row-major buffer. The buffer length must be `width * height`.
    pub fn new(
        values: Vec<f32>,
        width: u32,
        height: u32,
        timestamp: Duration,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| FrameError::DepthUnavailable("depth dimensions overflow".into()))?;
        if values.len() != expected {
            return Err(FrameError::DepthUnavailable(format!(
                "expected {} depth samples for {}x{}, received {}",
                expected,
                width,
                height,
                values.len()
            )));
        }
        Ok(Self {
            values: values.into(),
            width,
            height,
            timestamp,
        })
    }

    /// A map where every sample holds `value`.
    pub fn filled(value: f32, width: u32, height: u32, timestamp: Duration) -> Self {
        let len = width as usize * height as usize;
        Self {
            values: vec![value; len].into(),
            width,
            height,
            timestamp,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Raw sample at `(x, y)`, or `None` outside the grid.
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize)
            .checked_mul(self.width as usize)?
            .checked_add(x as usize)?;
        self.values.get(idx).copied()
    }

    /// Usable distance at `(x, y)`; sentinels and out-of-grid coordinates are `None`.
    pub fn depth_at(&self, x: u32, y: u32) -> Option<f32> {
        self.get(x, y).filter(|v| is_valid_depth(*v))
    }

    /// Distance at the centre pixel of the map.
    pub fn center_depth(&self) -> Option<f32> {
        if self.is_empty() {
            return None;
        }
        self.depth_at(self.width / 2, self.height / 2)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

impl fmt::Debug for DepthMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthMap")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        let err = Frame::new(vec![0u8; 10], 4, 4, Duration::ZERO, 0).unwrap_err();
        assert!(matches!(err, FrameError::ColorUnavailable(_)));

        let frame = Frame::new(vec![0u8; 4 * 4 * 3], 4, 4, Duration::ZERO, 7).unwrap();
        assert_eq!(frame.byte_len(), 48);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn cloned_frames_share_the_capture() {
        let frame = Frame::new(vec![1u8; 3], 1, 1, Duration::ZERO, 0).unwrap();
        let copy = frame.clone();
        assert!(frame.same_capture(&copy));

        let other = Frame::new(vec![1u8; 3], 1, 1, Duration::ZERO, 0).unwrap();
        assert!(!frame.same_capture(&other));
    }

    #[test]
    fn depth_map_rejects_mismatched_buffer() {
        let err = DepthMap::new(vec![1.0; 5], 2, 2, Duration::ZERO).unwrap_err();
        assert!(matches!(err, FrameError::DepthUnavailable(_)));
    }

    #[test]
    fn depth_map_lookup_is_bounds_checked() {
        let map = DepthMap::new(vec![1.0, 2.0, -1.0, f32::NAN], 2, 2, Duration::ZERO).unwrap();
        assert_eq!(map.get(1, 0), Some(2.0));
        assert_eq!(map.get(2, 0), None);
        assert_eq!(map.get(0, 2), None);
        assert_eq!(map.depth_at(0, 1), None);
        assert_eq!(map.depth_at(1, 1), None);
        assert_eq!(map.depth_at(0, 0), Some(1.0));
    }

    #[test]
    fn center_depth_of_empty_map_is_unknown() {
        let empty = DepthMap::new(vec![], 0, 0, Duration::ZERO).unwrap();
        assert_eq!(empty.center_depth(), None);

        let map = DepthMap::filled(3.0, 5, 3, Duration::ZERO);
        assert_eq!(map.center_depth(), Some(3.0));
    }

    #[test]
    fn frame_debug_omits_pixels() {
        let frame = Frame::new(vec![9u8; 3], 1, 1, Duration::ZERO, 0).unwrap();
        let printed = format!("{:?}", frame);
        assert!(printed.contains("width"));
        assert!(!printed.contains("pixels"));
    }
}
