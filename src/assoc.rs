use nalgebra::DMatrix;

use crate::cost;
use crate::error::TrackError;
use crate::lapjv::assignment_by_score;
use crate::object::{Detection, GroundTruth};
use crate::track::Track;

/* -----------------------------------------------------------------------------
 * Association result
 * ----------------------------------------------------------------------------- */

/// Frame-local association outcome. Detection indices are partitioned into
/// matched and unmatched; track indices into matched, unmatched and occluded.
/// Every index lands in exactly one bucket.
#[derive(Debug, Clone, Default)]
pub struct AssociationResult {
    /// (detection index, track index) pairs accepted this frame.
    pub matched: Vec<(usize, usize)>,
    pub unmatched_detections: Vec<usize>,
    pub unmatched_tracks: Vec<usize>,
    pub occluded_tracks: Vec<usize>,
    pub unmatched_ground_truths: Vec<usize>,
}

/// Per-frame knobs the lifecycle manager hands to the association engine.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AssociationSettings {
    pub(crate) iou_threshold: f32,
    pub(crate) frame_count: usize,
    pub(crate) min_hits: usize,
    pub(crate) conf_target: f32,
    pub(crate) conf_object: f32,
    pub(crate) gt_diagnostics: bool,
    pub(crate) average_area: f32,
}

/* -----------------------------------------------------------------------------
 * Cascaded association
 *
 * Stage A: optimal assignment on plain IoU, threshold-filtered.
 * Stage B: recovery of stale tracks through the unmatched-detection history,
 *          requiring corroboration from two independent matches.
 * Stage C: occlusion classification of whatever is still unmatched.
 * Stage D: diagnostic ground-truth coverage check.
 * ----------------------------------------------------------------------------- */

pub(crate) fn associate(
    tracks: &mut [Track],
    predictions: &[[f32; 4]],
    detections: &[Detection],
    ground_truths: &[GroundTruth],
    unmatched_before: &mut Vec<Detection>,
    settings: &AssociationSettings,
) -> Result<AssociationResult, TrackError> {
    let num_dets = detections.len();
    let num_trks = predictions.len();
    debug_assert_eq!(tracks.len(), num_trks);

    if num_trks == 0 {
        return Ok(AssociationResult {
            unmatched_detections: (0..num_dets).collect(),
            ..Default::default()
        });
    }

    let det_boxes: Vec<[f32; 4]> = detections.iter().map(|d| d.bbox).collect();
    let ios_matrix = cost::ios_matrix(predictions);

    let mut matched: Vec<(usize, usize)> = Vec::new();
    let mut unmatched_detections: Vec<usize>;
    let mut unmatched_tracks: Vec<usize>;

    if num_dets == 0 {
        unmatched_detections = Vec::new();
        unmatched_tracks = (0..num_trks).collect();
    } else {
        /* Stage A */
        let iou_matrix = cost::iou_batch(&det_boxes, predictions);
        let pairs = assignment_by_score(&iou_matrix)?;

        unmatched_detections = (0..num_dets)
            .filter(|d| !pairs.iter().any(|&(pd, _)| pd == *d))
            .collect();
        unmatched_tracks = (0..num_trks)
            .filter(|t| !pairs.iter().any(|&(_, pt)| pt == *t))
            .collect();
        for (d, t) in pairs {
            if iou_matrix[(d, t)] < settings.iou_threshold {
                unmatched_detections.push(d);
                unmatched_tracks.push(t);
            } else {
                tracks[t].mark_observed();
                matched.push((d, t));
            }
        }

        /* Stage B */
        if !unmatched_detections.is_empty()
            && !unmatched_tracks.is_empty()
            && !unmatched_before.is_empty()
        {
            recover_from_history(
                tracks,
                predictions,
                &det_boxes,
                unmatched_before,
                &mut matched,
                &mut unmatched_detections,
                &mut unmatched_tracks,
                settings.iou_threshold,
            )?;
        }
    }

    /* Stage C */
    let mut occluded_tracks: Vec<usize> = Vec::new();
    if settings.frame_count > settings.min_hits {
        let pending = std::mem::take(&mut unmatched_tracks);
        for ut in pending {
            let bbox = &predictions[ut];
            let area = (bbox[2] - bbox[0]) * (bbox[3] - bbox[1]);
            let occlusion =
                (0..num_trks).map(|i| ios_matrix[(i, ut)]).fold(0.0f32, f32::max);

            let track = &mut tracks[ut];
            track.time_since_observed += 1;
            let raw = track.age as f32
                / (track.time_since_observed as f32 * 10.0)
                * (area / settings.average_area);
            track.confidence = raw.min(1.0);

            if (occlusion > 0.3 && track.confidence > settings.conf_target)
                || track.confidence > settings.conf_object
            {
                occluded_tracks.push(ut);
            } else {
                unmatched_tracks.push(ut);
            }
        }
    }

    /* Stage D */
    let mut unmatched_ground_truths: Vec<usize> = Vec::new();
    if settings.gt_diagnostics && !ground_truths.is_empty() {
        let found: Vec<[f32; 4]> = (0..num_trks)
            .filter(|t| !unmatched_tracks.contains(t))
            .map(|t| predictions[t])
            .collect();
        let gt_boxes: Vec<[f32; 4]> =
            ground_truths.iter().map(|g| g.bbox).collect();
        let gt_iou = cost::iou_batch(&gt_boxes, &found);
        let gt_pairs = assignment_by_score(&gt_iou)?;
        unmatched_ground_truths = (0..ground_truths.len())
            .filter(|g| !gt_pairs.iter().any(|&(pg, _)| pg == *g))
            .collect();
    }

    Ok(AssociationResult {
        matched,
        unmatched_detections,
        unmatched_tracks,
        occluded_tracks,
        unmatched_ground_truths,
    })
}

/// Stage B: an unmatched track may recover an unmatched detection when two
/// independent optimal matches corroborate each other. The detection must
/// match a history entry by plain IoU at or above the threshold, and the same
/// detection must match the track by extended IoU at or above the threshold,
/// with the track's search window grown by its staleness. Promoted triples
/// leave all three pools; the history match itself carries no threshold
/// before corroboration.
#[allow(clippy::too_many_arguments)]
fn recover_from_history(
    tracks: &mut [Track],
    predictions: &[[f32; 4]],
    det_boxes: &[[f32; 4]],
    unmatched_before: &mut Vec<Detection>,
    matched: &mut Vec<(usize, usize)>,
    unmatched_detections: &mut Vec<usize>,
    unmatched_tracks: &mut Vec<usize>,
    iou_threshold: f32,
) -> Result<(), TrackError> {
    let history_boxes: Vec<[f32; 4]> =
        unmatched_before.iter().map(|d| d.bbox).collect();
    let pool_det_boxes: Vec<[f32; 4]> =
        unmatched_detections.iter().map(|&d| det_boxes[d]).collect();

    let history_iou = cost::iou_batch(&pool_det_boxes, &history_boxes);
    let history_pairs = assignment_by_score(&history_iou)?;

    let mut ext_iou = DMatrix::<f32>::zeros(
        unmatched_tracks.len(),
        unmatched_detections.len(),
    );
    for (ui, &ut) in unmatched_tracks.iter().enumerate() {
        let staleness = tracks[ut].time_since_observed as f32;
        let ext_w = 1.2f32.min((staleness + 1.0) * 0.3);
        let ext_h = 0.5f32.min((staleness + 1.0) * 0.1);
        for (di, &ud) in unmatched_detections.iter().enumerate() {
            ext_iou[(ui, di)] =
                cost::iou_ext(&det_boxes[ud], &predictions[ut], ext_w, ext_h);
        }
    }
    let ext_pairs = assignment_by_score(&ext_iou)?;

    let mut det_used = vec![false; unmatched_detections.len()];
    let mut trk_used = vec![false; unmatched_tracks.len()];
    let mut history_used = vec![false; unmatched_before.len()];

    for (ui, di) in ext_pairs {
        let Some(&(_, hi)) = history_pairs.iter().find(|&&(pd, _)| pd == di)
        else {
            continue;
        };
        if ext_iou[(ui, di)] >= iou_threshold
            && history_iou[(di, hi)] >= iou_threshold
        {
            matched.push((unmatched_detections[di], unmatched_tracks[ui]));
            det_used[di] = true;
            trk_used[ui] = true;
            history_used[hi] = true;
        }
    }

    let mut di = 0;
    unmatched_detections.retain(|_| {
        let keep = !det_used[di];
        di += 1;
        keep
    });
    let mut ti = 0;
    unmatched_tracks.retain(|_| {
        let keep = !trk_used[ti];
        ti += 1;
        keep
    });
    let mut hi = 0;
    unmatched_before.retain(|_| {
        let keep = !history_used[hi];
        hi += 1;
        keep
    });

    Ok(())
}
