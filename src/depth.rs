//! Depth lookup for normalized bounding boxes.
//!
//! A box centre `(cx, cy)` in colour-frame fractions maps to depth pixels as
//!
//! ```text
//! x_px = clamp(round(cx * width),  0, width  - 1)
//! y_px = clamp(round(cy * height), 0, height - 1)
//! ```
//!
//! The depth map usually has a different resolution and aspect ratio than
//! the colour frame; the mapping works in normalized space. Every read goes
//! through the bounds-checked `DepthMap::get`.

use serde::Deserialize;

use crate::detect::BoundingBox;
use crate::frame::{is_valid_depth, DepthMap};

/// How a representative depth is chosen for a box.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum SamplePolicy {
    /// The single pixel under the box centre.
    #[default]
    Center,
    /// Median of the valid samples in a `(2r+1) x (2r+1)` window around the
    /// centre pixel, clipped to the map. Even counts average the two middle
    /// values.
    Median { radius: u32 },
}

/// Maps bounding boxes onto a depth map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DepthSampler {
    policy: SamplePolicy,
}

impl DepthSampler {
    pub fn new(policy: SamplePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SamplePolicy {
        self.policy
    }

    /// Representative depth for `bbox`, or `None` when unknown.
    pub fn sample(&self, map: &DepthMap, bbox: &BoundingBox) -> Option<f32> {
        let (x, y) = map_center(map, bbox)?;
        match self.policy {
            SamplePolicy::Center => map.depth_at(x, y),
            SamplePolicy::Median { radius } => median_around(map, x, y, radius),
        }
    }
}

/// Depth pixel under the box centre, clamped into the map.
pub fn map_center(map: &DepthMap, bbox: &BoundingBox) -> Option<(u32, u32)> {
    if map.width == 0 || map.height == 0 {
        return None;
    }
    let cx = bbox.center_x();
    let cy = bbox.center_y();
    if !cx.is_finite() || !cy.is_finite() {
        return None;
    }
    Some((
        scale_to_index(cx, map.width),
        scale_to_index(cy, map.height),
    ))
}

fn scale_to_index(fraction: f32, extent: u32) -> u32 {
    let max = (extent - 1) as f64;
    let px = (fraction as f64 * extent as f64).round();
    px.clamp(0.0, max) as u32
}

fn median_around(map: &DepthMap, x: u32, y: u32, radius: u32) -> Option<f32> {
    let x0 = x.saturating_sub(radius);
    let y0 = y.saturating_sub(radius);
    let x1 = x.saturating_add(radius).min(map.width - 1);
    let y1 = y.saturating_add(radius).min(map.height - 1);

    let mut samples: Vec<f32> = (y0..=y1)
        .flat_map(|yy| (x0..=x1).map(move |xx| (xx, yy)))
        .filter_map(|(xx, yy)| map.get(xx, yy))
        .filter(|v| is_valid_depth(*v))
        .collect();
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        Some(samples[mid])
    } else {
        Some((samples[mid - 1] + samples[mid]) / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn map_with(width: u32, height: u32, at: (u32, u32), value: f32) -> DepthMap {
        let mut values = vec![0.0; (width * height) as usize];
        values[(at.1 * width + at.0) as usize] = value;
        DepthMap::new(values, width, height, Duration::ZERO).unwrap()
    }

    fn centered_box(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::new(cx - 0.1, cy - 0.1, 0.2, 0.2)
    }

    #[test]
    fn centre_box_reads_mapped_pixel() {
        let map = map_with(256, 192, (128, 96), 2.5);
        let sampler = DepthSampler::default();
        assert_eq!(sampler.sample(&map, &centered_box(0.5, 0.5)), Some(2.5));
    }

    #[test]
    fn invalid_sentinel_is_unknown() {
        let map = map_with(256, 192, (128, 96), -1.0);
        let sampler = DepthSampler::default();
        assert_eq!(sampler.sample(&map, &centered_box(0.5, 0.5)), None);

        let nan = map_with(256, 192, (128, 96), f32::NAN);
        assert_eq!(sampler.sample(&nan, &centered_box(0.5, 0.5)), None);
    }

    #[test]
    fn edge_boxes_are_clamped() {
        let map = map_with(4, 3, (3, 2), 1.5);
        let sampler = DepthSampler::default();
        // Full-frame box touching the bottom-right corner rounds past the grid.
        let corner = BoundingBox::new(1.0, 1.0, 0.0, 0.0);
        assert_eq!(map_center(&map, &corner), Some((3, 2)));
        assert_eq!(sampler.sample(&map, &corner), Some(1.5));

        let origin = BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(map_center(&map, &origin), Some((0, 0)));
    }

    #[test]
    fn empty_map_is_unknown() {
        let map = DepthMap::new(vec![], 0, 0, Duration::ZERO).unwrap();
        assert_eq!(DepthSampler::default().sample(&map, &centered_box(0.5, 0.5)), None);
    }

    #[test]
    fn median_ignores_invalid_neighbours() {
        let values = vec![
            1.0, 9.0, 0.0, //
            2.0, -1.0, f32::NAN, //
            3.0, 4.0, 5.0,
        ];
        let map = DepthMap::new(values, 3, 3, Duration::ZERO).unwrap();
        let sampler = DepthSampler::new(SamplePolicy::Median { radius: 1 });
        // Valid: 1, 9, 2, 3, 4, 5 -> sorted 1 2 3 4 5 9 -> (3 + 4) / 2
        let bbox = BoundingBox::new(0.4, 0.4, 0.0, 0.0);
        assert_eq!(map_center(&map, &bbox), Some((1, 1)));
        assert_eq!(sampler.sample(&map, &bbox), Some(3.5));
    }

    #[test]
    fn median_window_is_clipped_at_borders() {
        let map = DepthMap::filled(2.0, 2, 2, Duration::ZERO);
        let sampler = DepthSampler::new(SamplePolicy::Median { radius: 5 });
        let bbox = BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        assert_eq!(sampler.sample(&map, &bbox), Some(2.0));
    }
}
