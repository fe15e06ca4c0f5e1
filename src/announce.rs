//! Spoken summaries of a snapshot.
//!
//! `describe` renders the displayed objects as one sentence for a
//! text-to-speech consumer. `Announcer` sits in front of the speech engine
//! and drops sentences that would only repeat what was just said.

use std::time::{Duration, Instant};

use crate::detect::DetectedObject;
use crate::fusion::Snapshot;

/// Render the objects of `snapshot`, nearest first.
///
/// Objects without a depth are listed last, in detector order. Returns `None`
/// when nothing is displayed.
pub fn describe(snapshot: &Snapshot) -> Option<String> {
    if snapshot.objects.is_empty() {
        return None;
    }
    let mut ordered: Vec<&DetectedObject> = snapshot.objects.iter().collect();
    // Stable sort keeps detector order among equal or unknown depths.
    ordered.sort_by(|a, b| match (a.depth, b.depth) {
        (Some(da), Some(db)) => da.total_cmp(&db),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });

    let parts: Vec<String> = ordered.iter().map(|object| phrase(object)).collect();
    Some(parts.join(", "))
}

fn phrase(object: &DetectedObject) -> String {
    let label = if object.label.trim().is_empty() {
        "unknown object"
    } else {
        object.label.trim()
    };
    match object.depth {
        Some(depth) => format!("{} at {:.1} meters", label, depth),
        None => format!("{}, distance unknown", label),
    }
}

/// Suppresses repeated announcements.
#[derive(Debug)]
pub struct Announcer {
    min_repeat: Duration,
    last: Option<(String, Instant)>,
}

impl Announcer {
    /// `min_repeat` is how long an unchanged sentence stays muted.
    pub fn new(min_repeat: Duration) -> Self {
        Self {
            min_repeat,
            last: None,
        }
    }

    /// Sentence to speak for `snapshot` at `now`, if any.
    pub fn announce(&mut self, snapshot: &Snapshot, now: Instant) -> Option<String> {
        let sentence = describe(snapshot)?;
        if let Some((previous, at)) = &self.last {
            if *previous == sentence && now.saturating_duration_since(*at) < self.min_repeat {
                return None;
            }
        }
        self.last = Some((sentence.clone(), now));
        Some(sentence)
    }

    /// Forget the last sentence, e.g. after the session restarts.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn object(label: &str, depth: Option<f32>) -> DetectedObject {
        DetectedObject {
            id: 0,
            label: label.into(),
            confidence: 0.9,
            bounding_box: BoundingBox::new(0.2, 0.2, 0.1, 0.1),
            depth,
        }
    }

    fn snapshot(objects: Vec<DetectedObject>) -> Snapshot {
        Snapshot {
            objects,
            ..Snapshot::default()
        }
    }

    #[test]
    fn nearest_first_unknown_last() {
        let snap = snapshot(vec![
            object("door", None),
            object("person", Some(2.5)),
            object("chair", Some(1.2)),
        ]);
        assert_eq!(
            describe(&snap).as_deref(),
            Some("chair at 1.2 meters, person at 2.5 meters, door, distance unknown")
        );
    }

    #[test]
    fn empty_snapshot_says_nothing() {
        assert_eq!(describe(&Snapshot::default()), None);
    }

    #[test]
    fn repeats_are_muted_until_interval_passes() {
        let mut announcer = Announcer::new(Duration::from_secs(3));
        let snap = snapshot(vec![object("chair", Some(1.0))]);
        let t0 = Instant::now();

        assert!(announcer.announce(&snap, t0).is_some());
        assert!(announcer.announce(&snap, t0 + Duration::from_secs(1)).is_none());

        let moved = snapshot(vec![object("chair", Some(0.5))]);
        assert!(announcer.announce(&moved, t0 + Duration::from_secs(2)).is_some());

        assert!(announcer.announce(&moved, t0 + Duration::from_secs(6)).is_some());
        announcer.reset();
        assert!(announcer.announce(&moved, t0 + Duration::from_secs(6)).is_some());
    }
}
