use serde::Serialize;
use tracing::debug;

use crate::assoc::{self, AssociationSettings};
use crate::cost;
use crate::error::TrackError;
use crate::lapjv::assignment_by_score;
use crate::object::{Detection, GroundTruth, TrackedBox};
use crate::track::Track;

/* -----------------------------------------------------------------------------
 * Frame output
 * ----------------------------------------------------------------------------- */

/// Per-frame tracker output. Track ids are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameOutput {
    /// Tracks corrected this frame, by detection or by occlusion coasting.
    pub tracked: Vec<TrackedBox>,
    /// Alive tracks that went unmatched this frame, reported at their
    /// predicted position.
    pub unmatched_tracks: Vec<TrackedBox>,
    /// Ground truths no confirmed track covers (diagnostics only).
    pub unmatched_ground_truths: Vec<GroundTruth>,
}

/* -----------------------------------------------------------------------------
 * Debug snapshot
 * ----------------------------------------------------------------------------- */

#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: u64,
    pub age: usize,
    pub confidence: f32,
    pub time_since_observed: usize,
    pub time_since_update: usize,
    pub mean: [f32; 7],
    pub covariance: Vec<f32>,
    pub bbox: [f32; 4],
}

/// Full manager state, sufficient to rebuild test fixtures from a live run.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub max_age: usize,
    pub min_hits: usize,
    pub iou_threshold: f32,
    pub scene: [f32; 2],
    pub conf_target: f32,
    pub conf_object: f32,
    pub frame_count: usize,
    pub area_avg_history: Vec<f32>,
    pub tracks: Vec<TrackSnapshot>,
    pub unmatched_before: Vec<[f32; 5]>,
    pub unmatched_before_before: Vec<[f32; 5]>,
}

/* -----------------------------------------------------------------------------
 * Lifecycle manager
 * ----------------------------------------------------------------------------- */

/// Occlusion-aware SORT tracker.
///
/// Owns the live track set and drives the per-frame
/// predict / associate / update / birth / death loop. `update` must be called
/// once per frame, including frames with zero detections, or the age and
/// history counters drift.
pub struct OccSort {
    max_age: usize,
    min_hits: usize,
    iou_threshold: f32,
    scene: [f32; 2],
    conf_target: f32,
    conf_object: f32,
    gt_diagnostics: bool,
    frame_count: usize,
    next_id: u64,
    tracks: Vec<Track>,
    area_avg_history: Vec<f32>,
    unmatched_before: Vec<Detection>,
    unmatched_before_before: Vec<Detection>,
}

impl Default for OccSort {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

impl OccSort {
    pub fn new(max_age: usize, min_hits: usize) -> Self {
        Self {
            max_age,
            min_hits,
            iou_threshold: 0.3,
            scene: [1920.0, 1080.0],
            conf_target: 0.0,
            conf_object: 0.0,
            gt_diagnostics: false,
            frame_count: 0,
            next_id: 0,
            tracks: Vec::new(),
            area_avg_history: Vec::new(),
            unmatched_before: Vec::new(),
            unmatched_before_before: Vec::new(),
        }
    }

    pub fn with_scene(mut self, scene: [f32; 2]) -> Self {
        self.scene = scene;
        self
    }

    pub fn with_iou_threshold(mut self, iou_threshold: f32) -> Self {
        self.iou_threshold = iou_threshold;
        self
    }

    /// `conf_target` gates occlusion-backed survival, `conf_object` lets a
    /// high-confidence track survive without an occluder. Their ordering is
    /// deliberately not validated.
    pub fn with_confidence_thresholds(
        mut self,
        conf_target: f32,
        conf_object: f32,
    ) -> Self {
        self.conf_target = conf_target;
        self.conf_object = conf_object;
        self
    }

    pub fn with_gt_diagnostics(mut self, enabled: bool) -> Self {
        self.gt_diagnostics = enabled;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Advance the tracker by one frame.
    pub fn update(
        &mut self,
        detections: &[Detection],
        ground_truths: &[GroundTruth],
    ) -> Result<FrameOutput, TrackError> {
        self.frame_count += 1;

        let (mut predictions, area_avg) = self.predict_all();
        self.area_avg_history.push(area_avg);
        self.cull_divergent(&mut predictions);
        self.cull_outside(&mut predictions);

        let settings = AssociationSettings {
            iou_threshold: self.iou_threshold,
            frame_count: self.frame_count,
            min_hits: self.min_hits,
            conf_target: self.conf_target,
            conf_object: self.conf_object,
            gt_diagnostics: self.gt_diagnostics,
            average_area: area_avg,
        };
        let result = assoc::associate(
            &mut self.tracks,
            &predictions,
            detections,
            ground_truths,
            &mut self.unmatched_before,
            &settings,
        )?;

        // Apply outcomes to the pre-birth track set.
        let num_live = self.tracks.len();
        let mut unmatched_flag = vec![false; num_live];
        for &t in &result.unmatched_tracks {
            unmatched_flag[t] = true;
        }
        for t in 0..num_live {
            if let Some(&(d, _)) =
                result.matched.iter().find(|&&(_, mt)| mt == t)
            {
                self.tracks[t].update(&detections[d]);
            } else if result.occluded_tracks.contains(&t) {
                self.tracks[t].coast();
            }
        }

        if self.frame_count <= self.min_hits {
            for &d in &result.unmatched_detections {
                if detections[d].score > 0.6 {
                    let id = self.allocate_id();
                    debug!(id, score = detections[d].score, "warm-up spawn");
                    self.tracks.push(Track::from_detection(&detections[d], id));
                }
            }
        } else {
            let mut unmatched: Vec<Detection> = result
                .unmatched_detections
                .iter()
                .map(|&d| detections[d])
                .collect();
            self.spawn_chained(&mut unmatched)?;
            self.unmatched_before_before =
                std::mem::take(&mut self.unmatched_before);
            self.unmatched_before = unmatched;
        }

        let (tracked, unmatched_tracks) = self.sweep_and_emit(&unmatched_flag);

        let unmatched_ground_truths = result
            .unmatched_ground_truths
            .iter()
            .map(|&g| ground_truths[g])
            .collect();

        Ok(FrameOutput {
            tracked,
            unmatched_tracks,
            unmatched_ground_truths,
        })
    }

    /// Predict every live track and return the predictions together with the
    /// average state area, taken before any culling.
    fn predict_all(&mut self) -> (Vec<[f32; 4]>, f32) {
        let mut predictions = Vec::with_capacity(self.tracks.len());
        let mut area_sum = 0.0;
        for track in &mut self.tracks {
            predictions.push(track.predict());
            area_sum += track.state_area();
        }
        let area_avg = if self.tracks.is_empty() {
            0.0
        } else {
            area_sum / self.tracks.len() as f32
        };
        (predictions, area_avg)
    }

    /// Drop tracks whose prediction went non-finite. Divergence is recovered
    /// silently, never surfaced as an error.
    fn cull_divergent(&mut self, predictions: &mut Vec<[f32; 4]>) {
        let keep: Vec<bool> = predictions
            .iter()
            .zip(&self.tracks)
            .map(|(bbox, track)| {
                let finite = bbox.iter().all(|v| v.is_finite());
                if !finite {
                    debug!(id = track.id, "dropping diverged track");
                }
                finite
            })
            .collect();
        retain_by_flags(&mut self.tracks, &keep);
        retain_by_flags(predictions, &keep);
    }

    /// Drop tracks predicted more than half outside the scene bounds.
    fn cull_outside(&mut self, predictions: &mut Vec<[f32; 4]>) {
        let outside = cost::outside_batch(predictions, &self.scene);
        let keep: Vec<bool> = outside
            .iter()
            .zip(&self.tracks)
            .map(|(&fraction, track)| {
                if fraction > 0.5 {
                    debug!(id = track.id, fraction, "dropping out-of-scene track");
                    false
                } else {
                    true
                }
            })
            .collect();
        retain_by_flags(&mut self.tracks, &keep);
        retain_by_flags(predictions, &keep);
    }

    /// Spawn tracks from three-frame chains of unmatched detections: the
    /// current detection must match one from the previous frame and that one
    /// must match one from the frame before, each pair at or above the IoU
    /// threshold, with the three scores summing past the corroboration bar.
    /// Consumed detections leave all three pools.
    fn spawn_chained(
        &mut self,
        unmatched: &mut Vec<Detection>,
    ) -> Result<(), TrackError> {
        if unmatched.is_empty()
            || self.unmatched_before.is_empty()
            || self.unmatched_before_before.is_empty()
        {
            return Ok(());
        }

        let cur: Vec<[f32; 4]> = unmatched.iter().map(|d| d.bbox).collect();
        let mid: Vec<[f32; 4]> =
            self.unmatched_before.iter().map(|d| d.bbox).collect();
        let old: Vec<[f32; 4]> =
            self.unmatched_before_before.iter().map(|d| d.bbox).collect();

        let iou_cm = cost::iou_batch(&cur, &mid);
        let pairs_cm = assignment_by_score(&iou_cm)?;
        let iou_mo = cost::iou_batch(&mid, &old);
        let pairs_mo = assignment_by_score(&iou_mo)?;

        let mut used_cur = vec![false; cur.len()];
        let mut used_mid = vec![false; mid.len()];
        let mut used_old = vec![false; old.len()];

        for (c, m) in pairs_cm {
            let Some(&(_, o)) = pairs_mo.iter().find(|&&(pm, _)| pm == m)
            else {
                continue;
            };
            if iou_cm[(c, m)] < self.iou_threshold
                || iou_mo[(m, o)] < self.iou_threshold
            {
                continue;
            }
            let score_sum = unmatched[c].score
                + self.unmatched_before[m].score
                + self.unmatched_before_before[o].score;
            if score_sum > 2.0 {
                let id = self.allocate_id();
                debug!(id, score_sum, "chained spawn");
                self.tracks.push(Track::from_pair(
                    &unmatched[c],
                    &self.unmatched_before[m],
                    id,
                ));
                used_cur[c] = true;
                used_mid[m] = true;
                used_old[o] = true;
            }
        }

        let keep_cur: Vec<bool> = used_cur.iter().map(|&u| !u).collect();
        retain_by_flags(unmatched, &keep_cur);
        let keep_mid: Vec<bool> = used_mid.iter().map(|&u| !u).collect();
        retain_by_flags(&mut self.unmatched_before, &keep_mid);
        let keep_old: Vec<bool> = used_old.iter().map(|&u| !u).collect();
        retain_by_flags(&mut self.unmatched_before_before, &keep_old);

        Ok(())
    }

    /// Remove tracks past their age-scaled survival bound, then report the
    /// survivors: corrected tracks and unmatched-but-alive tracks, in reverse
    /// insertion order. A dying track is gone from every output the frame it
    /// crosses the bound.
    fn sweep_and_emit(
        &mut self,
        unmatched_flag: &[bool],
    ) -> (Vec<TrackedBox>, Vec<TrackedBox>) {
        let mut tracked = Vec::new();
        let mut unmatched_tracks = Vec::new();
        let mut keep = vec![true; self.tracks.len()];

        for t in (0..self.tracks.len()).rev() {
            let track = &self.tracks[t];
            let bound =
                7f32.min(self.max_age as f32 + track.age as f32 / 10.0);
            if track.time_since_update as f32 > bound {
                debug!(id = track.id, age = track.age, "removing dead track");
                keep[t] = false;
                continue;
            }
            let reported = TrackedBox {
                bbox: track.bbox(),
                id: track.id + 1,
            };
            if track.time_since_update < 1 {
                tracked.push(reported);
            } else if t < unmatched_flag.len() && unmatched_flag[t] {
                unmatched_tracks.push(reported);
            }
        }
        retain_by_flags(&mut self.tracks, &keep);

        (tracked, unmatched_tracks)
    }

    /// Dump the full manager state for fixtures and debugging.
    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            max_age: self.max_age,
            min_hits: self.min_hits,
            iou_threshold: self.iou_threshold,
            scene: self.scene,
            conf_target: self.conf_target,
            conf_object: self.conf_object,
            frame_count: self.frame_count,
            area_avg_history: self.area_avg_history.clone(),
            tracks: self
                .tracks
                .iter()
                .map(|t| TrackSnapshot {
                    id: t.id,
                    age: t.age,
                    confidence: t.confidence,
                    time_since_observed: t.time_since_observed,
                    time_since_update: t.time_since_update,
                    mean: t.state_vector(),
                    covariance: t.covariance_flat(),
                    bbox: t.bbox(),
                })
                .collect(),
            unmatched_before: self
                .unmatched_before
                .iter()
                .map(Detection::to_row)
                .collect(),
            unmatched_before_before: self
                .unmatched_before_before
                .iter()
                .map(Detection::to_row)
                .collect(),
        }
    }
}

fn retain_by_flags<T>(items: &mut Vec<T>, keep: &[bool]) {
    debug_assert_eq!(items.len(), keep.len());
    let mut i = 0;
    items.retain(|_| {
        let k = keep[i];
        i += 1;
        k
    });
}
