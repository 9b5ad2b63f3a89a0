//! Geometry cost primitives shared by the association engine.
//!
//! All boxes are in [x1, y1, x2, y2] format. Overlap metrics degrade to 0
//! instead of failing when an intersection width or height clamps to zero.

use nalgebra::DMatrix;

/// IoU (Intersection over Union) between two boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let xx1 = a[0].max(b[0]);
    let xx2 = a[2].min(b[2]);
    let w = (xx2 - xx1).max(0.0);
    if w == 0.0 {
        return 0.0;
    }
    let yy1 = a[1].max(b[1]);
    let yy2 = a[3].min(b[3]);
    let h = (yy2 - yy1).max(0.0);
    if h == 0.0 {
        return 0.0;
    }
    let wh = w * h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    wh / (area_a + area_b - wh)
}

/// IoU after growing `b` by `ext_w * width(b) / 2` per side horizontally and
/// `ext_h * height(b) / 2` per side vertically. Used for the staleness-scaled
/// recovery match, where a coasting track's search window widens over time.
pub fn iou_ext(a: &[f32; 4], b: &[f32; 4], ext_w: f32, ext_h: f32) -> f32 {
    let b_w = b[2] - b[0];
    let b_h = b[3] - b[1];
    let xx1 = a[0].max(b[0] - b_w * ext_w / 2.0);
    let xx2 = a[2].min(b[2] + b_w * ext_w / 2.0);
    let w = (xx2 - xx1).max(0.0);
    if w == 0.0 {
        return 0.0;
    }
    let yy1 = a[1].max(b[1] - b_h * ext_h / 2.0);
    let yy2 = a[3].min(b[3] + b_h * ext_h / 2.0);
    let h = (yy2 - yy1).max(0.0);
    if h == 0.0 {
        return 0.0;
    }
    let wh = w * h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = b_w * b_h;
    wh / (area_a + area_b - wh)
}

/// IoS (Intersection over Second box): the fraction of `b` covered by `a`.
pub fn ios(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let xx1 = a[0].max(b[0]);
    let yy1 = a[1].max(b[1]);
    let xx2 = a[2].min(b[2]);
    let yy2 = a[3].min(b[3]);
    let w = (xx2 - xx1).max(0.0);
    let h = (yy2 - yy1).max(0.0);
    w * h / ((b[2] - b[0]) * (b[3] - b[1]))
}

/// Symmetric size-mismatch penalty. Zero iff both boxes have identical width
/// and height; grows with the product of the larger-over-smaller width and
/// height ratios. Auxiliary metric, not part of the default pipeline.
pub fn area_cost(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let w_a = a[2] - a[0];
    let w_b = b[2] - b[0];
    let h_a = a[3] - a[1];
    let h_b = b[3] - b[1];

    let w_ratio = if w_a > w_b { w_a / w_b } else { w_b / w_a };
    let h_ratio = if h_a > h_b { h_a / h_b } else { h_b / h_a };

    w_ratio * h_ratio - 1.0
}

/// Fraction of `bbox` lying outside the `[0, scene[0]] x [0, scene[1]]`
/// frame, both axes combined. When a box overhangs both sides of one axis
/// only the high-side overhang counts.
pub fn outside_fraction(bbox: &[f32; 4], scene: &[f32; 2]) -> f32 {
    let mut out_x = 0.0;
    let mut out_y = 0.0;
    if bbox[0] < 0.0 {
        out_x = -bbox[0];
    }
    if bbox[2] > scene[0] {
        out_x = bbox[2] - scene[0];
    }
    if bbox[1] < 0.0 {
        out_y = -bbox[1];
    }
    if bbox[3] > scene[1] {
        out_y = bbox[3] - scene[1];
    }
    let w = bbox[2] - bbox[0];
    let h = bbox[3] - bbox[1];
    let out_area = out_x * h + out_y * w;
    out_area / (w * h)
}

/*------------------------------------------------------------------------------
Batch forms
------------------------------------------------------------------------------*/

/// Dense IoU matrix of shape (num_dets, num_trks).
pub fn iou_batch(detections: &[[f32; 4]], tracks: &[[f32; 4]]) -> DMatrix<f32> {
    let mut matrix = DMatrix::zeros(detections.len(), tracks.len());
    for (d, det) in detections.iter().enumerate() {
        for (t, trk) in tracks.iter().enumerate() {
            matrix[(d, t)] = iou(det, trk);
        }
    }
    matrix
}

/// Pairwise IoS matrix over one box set; `[(i, j)]` is the fraction of box
/// `j` covered by box `i`. Diagonal is zero so a box never occludes itself.
pub fn ios_matrix(boxes: &[[f32; 4]]) -> DMatrix<f32> {
    let n = boxes.len();
    let mut matrix = DMatrix::zeros(n, n);
    for (i, a) in boxes.iter().enumerate() {
        for (j, b) in boxes.iter().enumerate() {
            if i != j {
                matrix[(i, j)] = ios(a, b);
            }
        }
    }
    matrix
}

/// Per-box out-of-scene fraction.
pub fn outside_batch(boxes: &[[f32; 4]], scene: &[f32; 2]) -> Vec<f32> {
    boxes.iter().map(|b| outside_fraction(b, scene)).collect()
}

/// Dense size-mismatch matrix of shape (num_dets, num_trks).
pub fn area_cost_batch(
    detections: &[[f32; 4]],
    tracks: &[[f32; 4]],
) -> DMatrix<f32> {
    let mut matrix = DMatrix::zeros(detections.len(), tracks.len());
    for (d, det) in detections.iter().enumerate() {
        for (t, trk) in tracks.iter().enumerate() {
            matrix[(d, t)] = area_cost(det, trk);
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use nearly_eq::assert_nearly_eq;

    fn bx(x1: f32, y1: f32, x2: f32, y2: f32) -> [f32; 4] {
        [x1, y1, x2, y2]
    }

    #[test]
    fn test_iou_identical() {
        let a = bx(100.0, 100.0, 200.0, 200.0);
        assert_nearly_eq!(iou(&a, &a), 1.0, 1e-6);
    }

    #[test]
    fn test_iou_symmetric() {
        let a = bx(0.0, 0.0, 100.0, 100.0);
        let b = bx(50.0, 50.0, 150.0, 150.0);
        assert_nearly_eq!(iou(&a, &b), iou(&b, &a), 1e-6);
    }

    #[test]
    fn test_iou_disjoint() {
        let a = bx(0.0, 0.0, 10.0, 10.0);
        let b = bx(20.0, 20.0, 30.0, 30.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_touching_edges_is_zero() {
        let a = bx(0.0, 0.0, 10.0, 10.0);
        let b = bx(10.0, 0.0, 20.0, 10.0);
        assert_eq!(iou(&a, &b), 0.0);
    }

    #[test]
    fn test_iou_partial_overlap() {
        // 100x100 boxes shifted by 10px: inter 8100, union 11900
        let a = bx(100.0, 100.0, 200.0, 200.0);
        let b = bx(110.0, 110.0, 210.0, 210.0);
        assert_nearly_eq!(iou(&a, &b), 0.6806723, 1e-5);
    }

    #[test]
    fn test_iou_ext_recovers_near_miss() {
        // Disjoint by 5px horizontally; growing b by 20% of its width
        // on each side makes them overlap.
        let a = bx(105.0, 0.0, 205.0, 100.0);
        let b = bx(0.0, 0.0, 100.0, 100.0);
        assert_eq!(iou(&a, &b), 0.0);
        assert!(iou_ext(&a, &b, 0.4, 0.0) > 0.0);
    }

    #[test]
    fn test_iou_ext_zero_growth_still_thresholds_like_iou() {
        let a = bx(0.0, 0.0, 100.0, 100.0);
        let b = bx(10.0, 10.0, 110.0, 110.0);
        // With zero extension the intersection is the plain one, but the
        // denominator uses the unexpanded areas too, so values agree.
        assert_nearly_eq!(iou_ext(&a, &b, 0.0, 0.0), iou(&a, &b), 1e-6);
    }

    #[test]
    fn test_ios_contained() {
        let outer = bx(0.0, 0.0, 100.0, 100.0);
        let inner = bx(25.0, 25.0, 75.0, 75.0);
        // inner fully covered by outer
        assert_nearly_eq!(ios(&outer, &inner), 1.0, 1e-6);
        // outer only quarter-covered by inner
        assert_nearly_eq!(ios(&inner, &outer), 0.25, 1e-6);
    }

    #[test]
    fn test_area_cost_identical_is_zero() {
        let a = bx(0.0, 0.0, 50.0, 80.0);
        let b = bx(200.0, 200.0, 250.0, 280.0);
        assert_nearly_eq!(area_cost(&a, &b), 0.0, 1e-6);
    }

    #[test]
    fn test_area_cost_symmetric() {
        let a = bx(0.0, 0.0, 100.0, 100.0);
        let b = bx(0.0, 0.0, 50.0, 200.0);
        assert_nearly_eq!(area_cost(&a, &b), area_cost(&b, &a), 1e-6);
        // w ratio 2, h ratio 2 -> 4 - 1
        assert_nearly_eq!(area_cost(&a, &b), 3.0, 1e-6);
    }

    #[test]
    fn test_outside_fraction_inside() {
        let scene = [1920.0, 1080.0];
        let a = bx(100.0, 100.0, 200.0, 200.0);
        assert_eq!(outside_fraction(&a, &scene), 0.0);
    }

    #[test]
    fn test_outside_fraction_left_overhang() {
        let scene = [1920.0, 1080.0];
        // Half of the 100px width hangs past x=0.
        let a = bx(-50.0, 0.0, 50.0, 100.0);
        assert_nearly_eq!(outside_fraction(&a, &scene), 0.5, 1e-6);
    }

    #[test]
    fn test_outside_fraction_corner_sums_axes() {
        let scene = [100.0, 100.0];
        // 20px past the right edge and 10px past the bottom edge.
        let a = bx(70.0, 60.0, 120.0, 110.0);
        // (20*50 + 10*50) / 2500
        assert_nearly_eq!(outside_fraction(&a, &scene), 0.6, 1e-6);
    }

    #[test]
    fn test_iou_batch_shapes_and_values() {
        let dets = [
            bx(100.0, 100.0, 200.0, 200.0),
            bx(150.0, 150.0, 250.0, 250.0),
            bx(300.0, 300.0, 400.0, 400.0),
        ];
        let trks = [
            bx(100.0, 100.0, 200.0, 200.0),
            bx(110.0, 110.0, 210.0, 210.0),
        ];

        let m = iou_batch(&dets, &trks);

        assert_eq!(m.nrows(), 3);
        assert_eq!(m.ncols(), 2);
        assert_nearly_eq!(m[(0, 0)], 1.0, 1e-5);
        assert_nearly_eq!(m[(0, 1)], 0.6806723, 1e-5);
        assert_nearly_eq!(m[(1, 0)], 0.14285715, 1e-5);
        assert_nearly_eq!(m[(1, 1)], 0.2195122, 1e-5);
        assert_nearly_eq!(m[(2, 0)], 0.0, 1e-5);
        assert_nearly_eq!(m[(2, 1)], 0.0, 1e-5);
    }

    #[test]
    fn test_iou_batch_empty() {
        let dets: [[f32; 4]; 0] = [];
        let trks = [bx(0.0, 0.0, 10.0, 10.0)];
        let m = iou_batch(&dets, &trks);
        assert_eq!(m.nrows(), 0);
        assert_eq!(m.ncols(), 1);
    }

    #[test]
    fn test_ios_matrix_zero_diagonal() {
        let boxes = [
            bx(0.0, 0.0, 100.0, 100.0),
            bx(50.0, 50.0, 150.0, 150.0),
        ];
        let m = ios_matrix(&boxes);
        assert_eq!(m[(0, 0)], 0.0);
        assert_eq!(m[(1, 1)], 0.0);
        assert_nearly_eq!(m[(0, 1)], 0.25, 1e-6);
        assert_nearly_eq!(m[(1, 0)], 0.25, 1e-6);
    }

    #[test]
    fn test_area_cost_batch() {
        let dets = [bx(0.0, 0.0, 100.0, 100.0)];
        let trks = [bx(0.0, 0.0, 100.0, 100.0), bx(0.0, 0.0, 50.0, 200.0)];
        let m = area_cost_batch(&dets, &trks);
        assert_nearly_eq!(m[(0, 0)], 0.0, 1e-6);
        assert_nearly_eq!(m[(0, 1)], 3.0, 1e-6);
    }

    #[test]
    fn test_outside_batch() {
        let scene = [100.0, 100.0];
        let boxes = [bx(0.0, 0.0, 50.0, 50.0), bx(-50.0, 0.0, 50.0, 100.0)];
        let out = outside_batch(&boxes, &scene);
        assert_eq!(out[0], 0.0);
        assert_nearly_eq!(out[1], 0.5, 1e-6);
    }
}
