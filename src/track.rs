use crate::kalman_filter::{DetectBox, KalmanFilter};
use crate::object::Detection;

/* -----------------------------------------------------------------------------
 * Measurement conversions
 * ----------------------------------------------------------------------------- */

/// [x1, y1, x2, y2] -> (cx, cy, area, aspect)
pub(crate) fn bbox_to_measurement(bbox: &[f32; 4]) -> DetectBox {
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    let cx = bbox[0] + w / 2.0;
    let cy = bbox[1] + h / 2.0;
    DetectBox::from_iterator([cx, cy, w * h, w / h])
}

/// (cx, cy, area, aspect) -> [x1, y1, x2, y2]
pub(crate) fn measurement_to_bbox(cx: f32, cy: f32, area: f32, aspect: f32) -> [f32; 4] {
    let w = (area * aspect).sqrt();
    let h = area / w;
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]
}

/* -----------------------------------------------------------------------------
 * Track
 * ----------------------------------------------------------------------------- */

/// One tracked object: a constant-velocity filter plus lifecycle counters.
///
/// `time_since_update` counts frames since the last filter correction of any
/// kind, `time_since_observed` counts frames since the last real detection.
/// An occluded track coasting on its motion model resets the former but not
/// the latter.
pub struct Track {
    kf: KalmanFilter,
    pub(crate) id: u64,
    pub(crate) age: usize,
    pub(crate) time_since_update: usize,
    pub(crate) time_since_observed: usize,
    pub(crate) confidence: f32,
}

impl Track {
    /// Start a track from a single detection with a zero-velocity prior.
    pub(crate) fn from_detection(detection: &Detection, id: u64) -> Self {
        Self {
            kf: KalmanFilter::new(&bbox_to_measurement(&detection.bbox)),
            id,
            age: 0,
            time_since_update: 0,
            time_since_observed: 0,
            confidence: 0.5,
        }
    }

    /// Start a track from two consecutive detections of the same object,
    /// seeding the velocity from their finite difference.
    pub(crate) fn from_pair(current: &Detection, previous: &Detection, id: u64) -> Self {
        Self {
            kf: KalmanFilter::new_with_velocity(
                &bbox_to_measurement(&current.bbox),
                &bbox_to_measurement(&previous.bbox),
            ),
            id,
            age: 0,
            time_since_update: 0,
            time_since_observed: 0,
            confidence: 0.5,
        }
    }

    /// Advance the motion model one frame and return the predicted box.
    pub(crate) fn predict(&mut self) -> [f32; 4] {
        // A negative area velocity must not drive the area itself negative.
        {
            let x = self.kf.state_mut();
            if x[(0, 6)] + x[(0, 2)] <= 0.0 {
                x[(0, 6)] = 0.0;
            }
        }
        let (mean, _) = self.kf.predict();
        self.age += 1;
        self.time_since_update += 1;
        measurement_to_bbox(mean[(0, 0)], mean[(0, 1)], mean[(0, 2)], mean[(0, 3)])
    }

    /// Correct the filter with an observed detection.
    pub(crate) fn update(&mut self, detection: &Detection) {
        self.time_since_update = 0;
        self.time_since_observed = 0;
        self.kf.update(&bbox_to_measurement(&detection.bbox));
    }

    /// Coast through an occluded frame: no measurement, so the filter state
    /// stands except that the area velocity is damped.
    pub(crate) fn coast(&mut self) {
        self.kf.state_mut()[(0, 6)] /= 2.0;
        self.time_since_update = 0;
    }

    pub(crate) fn mark_observed(&mut self) {
        self.time_since_observed = 0;
    }

    /// Current state estimate as a box.
    pub fn bbox(&self) -> [f32; 4] {
        let x = self.kf.state();
        measurement_to_bbox(x[(0, 0)], x[(0, 1)], x[(0, 2)], x[(0, 3)])
    }

    pub(crate) fn state_area(&self) -> f32 {
        self.kf.state()[(0, 2)]
    }

    pub(crate) fn state_vector(&self) -> [f32; 7] {
        let x = self.kf.state();
        let mut out = [0.0; 7];
        for (i, v) in out.iter_mut().enumerate() {
            *v = x[(0, i)];
        }
        out
    }

    pub(crate) fn covariance_flat(&self) -> Vec<f32> {
        self.kf.covariance().iter().copied().collect()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn age(&self) -> usize {
        self.age
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn time_since_update(&self) -> usize {
        self.time_since_update
    }

    pub fn time_since_observed(&self) -> usize {
        self.time_since_observed
    }
}
