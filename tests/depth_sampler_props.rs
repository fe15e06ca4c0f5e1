use proptest::prelude::*;
use std::time::Duration;

use fusion_kernel::depth::map_center;
use fusion_kernel::{BoundingBox, DepthMap, DepthSampler, SamplePolicy};

fn coordinate() -> impl Strategy<Value = f32> {
    prop_oneof![Just(0.0f32), Just(1.0f32), 0.0f32..=1.0f32]
}

fn bbox() -> impl Strategy<Value = BoundingBox> {
    (coordinate(), coordinate(), coordinate(), coordinate())
        .prop_map(|(x, y, w, h)| BoundingBox::new(x, y, w, h))
}

/// Map where every sample encodes its own coordinates: 1 + x + 1000 * y.
fn indexed_map(width: u32, height: u32) -> DepthMap {
    let mut values = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            values.push(1.0 + x as f32 + 1000.0 * y as f32);
        }
    }
    DepthMap::new(values, width, height, Duration::ZERO).unwrap()
}

proptest! {
    #[test]
    fn center_pixel_always_inside_map(bbox in bbox(), width in 1u32..64, height in 1u32..64) {
        let map = indexed_map(width, height);
        let (x, y) = map_center(&map, &bbox).expect("non-empty map");
        prop_assert!(x < width);
        prop_assert!(y < height);
    }

    #[test]
    fn center_policy_reads_the_mapped_pixel(bbox in bbox(), width in 1u32..64, height in 1u32..64) {
        let map = indexed_map(width, height);
        let (x, y) = map_center(&map, &bbox).unwrap();
        let depth = DepthSampler::default().sample(&map, &bbox);
        prop_assert_eq!(depth, Some(1.0 + x as f32 + 1000.0 * y as f32));
    }

    #[test]
    fn invalid_samples_are_never_reported(
        bbox in bbox(),
        fill in prop_oneof![Just(0.0f32), Just(-1.0f32), Just(f32::NAN), Just(f32::INFINITY)],
        radius in 0u32..4,
    ) {
        let map = DepthMap::filled(fill, 16, 12, Duration::ZERO);
        prop_assert_eq!(DepthSampler::new(SamplePolicy::Center).sample(&map, &bbox), None);
        prop_assert_eq!(DepthSampler::new(SamplePolicy::Median { radius }).sample(&map, &bbox), None);
    }

    #[test]
    fn median_stays_within_window_range(bbox in bbox(), radius in 0u32..5, width in 1u32..32, height in 1u32..32) {
        let map = indexed_map(width, height);
        let depth = DepthSampler::new(SamplePolicy::Median { radius })
            .sample(&map, &bbox)
            .expect("all samples valid");
        let min = map.values().iter().cloned().fold(f32::INFINITY, f32::min);
        let max = map.values().iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        prop_assert!(depth >= min && depth <= max);
    }

    #[test]
    fn zero_radius_median_matches_center(bbox in bbox(), width in 1u32..32, height in 1u32..32) {
        let map = indexed_map(width, height);
        prop_assert_eq!(
            DepthSampler::new(SamplePolicy::Median { radius: 0 }).sample(&map, &bbox),
            DepthSampler::new(SamplePolicy::Center).sample(&map, &bbox)
        );
    }
}

#[test]
fn empty_map_has_no_depth() {
    let map = DepthMap::new(Vec::new(), 0, 0, Duration::ZERO).unwrap();
    let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
    assert_eq!(map_center(&map, &bbox), None);
    assert_eq!(DepthSampler::default().sample(&map, &bbox), None);
}
