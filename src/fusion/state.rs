//! Merge state owned by the fusion worker.
//!
//! `FusionState` keeps the latest display image, depth map and detection set
//! and composes them into a `Snapshot`. Object depths and `closest_depth` are
//! always computed together from one depth map, or taken together from the
//! frozen list while detection is off.

use crate::depth::DepthSampler;
use crate::detect::{DetectedObject, DetectionSet, LabelFilter};
use crate::frame::{DepthMap, Frame};

use super::published::{closest_depth_of, Snapshot};

pub(crate) struct FusionState {
    sampler: DepthSampler,
    image: Option<Frame>,
    depth: Option<DepthMap>,
    detections: Option<DetectionSet>,
    filter: Option<LabelFilter>,
    /// Objects held unchanged while detection is disabled.
    frozen: Option<Vec<DetectedObject>>,
}

impl FusionState {
    pub(crate) fn new(sampler: DepthSampler, filter: Option<LabelFilter>, detection_enabled: bool) -> Self {
        Self {
            sampler,
            image: None,
            depth: None,
            detections: None,
            filter,
            frozen: (!detection_enabled).then(Vec::new),
        }
    }

    pub(crate) fn detection_enabled(&self) -> bool {
        self.frozen.is_none()
    }

    pub(crate) fn set_image(&mut self, frame: Frame) {
        self.image = Some(frame);
    }

    /// Store a depth map. Returns true when the published objects or the
    /// centre distance change.
    pub(crate) fn set_depth(&mut self, map: DepthMap) -> bool {
        let previous_center = self.depth.as_ref().and_then(DepthMap::center_depth);
        let center_changed = map.center_depth() != previous_center;
        self.depth = Some(map);
        center_changed || (self.detection_enabled() && self.detections.is_some())
    }

    /// Store a detection set. Ignored while detection is disabled.
    pub(crate) fn set_detections(&mut self, set: DetectionSet) -> bool {
        if !self.detection_enabled() {
            return false;
        }
        self.detections = Some(set);
        true
    }

    pub(crate) fn set_filter(&mut self, filter: Option<LabelFilter>) {
        self.filter = filter;
    }

    /// Toggle detection. Disabling freezes the currently displayed objects.
    pub(crate) fn set_detection_enabled(&mut self, enabled: bool) {
        if enabled == self.detection_enabled() {
            return;
        }
        if enabled {
            self.frozen = None;
        } else {
            self.frozen = Some(self.live_objects());
        }
    }

    fn live_objects(&self) -> Vec<DetectedObject> {
        let Some(set) = &self.detections else {
            return Vec::new();
        };
        set.objects
            .iter()
            .map(|object| DetectedObject {
                depth: self
                    .depth
                    .as_ref()
                    .and_then(|map| self.sampler.sample(map, &object.bounding_box)),
                ..object.clone()
            })
            .collect()
    }

    /// Build the next snapshot. `sequence` is assigned on publication.
    pub(crate) fn compose(&self) -> Snapshot {
        let objects = match &self.frozen {
            Some(frozen) => frozen.clone(),
            None => self.live_objects(),
        };
        let objects = match &self.filter {
            Some(filter) => filter.apply(&objects),
            None => objects,
        };
        let (depth_timestamp, detection_pass) = match &self.frozen {
            Some(_) => (None, None),
            None => (
                self.depth.as_ref().map(|map| map.timestamp),
                self.detections.as_ref().map(|set| set.pass),
            ),
        };
        Snapshot {
            sequence: 0,
            image: self.image.clone(),
            closest_depth: closest_depth_of(&objects),
            objects,
            center_depth: self.depth.as_ref().and_then(DepthMap::center_depth),
            depth_timestamp,
            detection_pass,
        }
    }
}
