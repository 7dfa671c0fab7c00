//! Association helpers for the byte tracker.

use ndarray::Array2;

use crate::geometry::Rect;

/// Pairwise IoU matrix of shape (M, N).
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    Array2::from_shape_fn((boxes_a.len(), boxes_b.len()), |(i, j)| {
        boxes_a[i].iou(&boxes_b[j])
    })
}

/// `1 - IoU` cost matrix between tracks and detections.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    iou_batch(track_boxes, det_boxes).mapv(|iou| 1.0 - iou)
}

/// Weight IoU similarity by detection confidence.
pub fn fuse_score(cost_matrix: &mut Array2<f32>, det_scores: &[f32]) {
    for ((_, j), cost) in cost_matrix.indexed_iter_mut() {
        let fused_sim = (1.0 - *cost) * det_scores[j];
        *cost = 1.0 - fused_sim;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

/// Minimum-cost assignment, discarding pairs costlier than `thresh`.
pub fn linear_assignment(cost_matrix: &Array2<f32>, thresh: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        };
    }

    // lapjv wants a square matrix
    let size = num_rows.max(num_cols);
    let padded = Array2::from_shape_fn((size, size), |(i, j)| {
        if i < num_rows && j < num_cols {
            cost_matrix[[i, j]] as f64
        } else {
            1e6
        }
    });

    let mut result = AssignmentResult::default();
    let mut detection_free = vec![true; num_cols];

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            for (row, &col) in row_to_col.iter().enumerate().take(num_rows) {
                if col < num_cols && cost_matrix[[row, col]] <= thresh {
                    result.matches.push((row, col));
                    detection_free[col] = false;
                } else {
                    result.unmatched_tracks.push(row);
                }
            }
        }
        Err(_) => {
            tracing::warn!(rows = num_rows, cols = num_cols, "linear assignment failed");
            result.unmatched_tracks = (0..num_rows).collect();
        }
    }

    result.unmatched_detections = detection_free
        .iter()
        .enumerate()
        .filter_map(|(i, &free)| free.then_some(i))
        .collect();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_assignment_prefers_low_cost() {
        let cost = array![[0.9, 0.1], [0.2, 0.8]];
        let result = linear_assignment(&cost, 0.5);
        let mut matches = result.matches.clone();
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
        assert!(result.unmatched_tracks.is_empty());
        assert!(result.unmatched_detections.is_empty());
    }

    #[test]
    fn test_assignment_threshold_rejects() {
        let cost = array![[0.9]];
        let result = linear_assignment(&cost, 0.5);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn test_rectangular_and_empty() {
        let cost = array![[0.1, 0.9, 0.9]];
        let result = linear_assignment(&cost, 0.5);
        assert_eq!(result.matches, vec![(0, 0)]);
        assert_eq!(result.unmatched_detections, vec![1, 2]);

        let empty = Array2::<f32>::zeros((0, 2));
        let result = linear_assignment(&empty, 0.5);
        assert_eq!(result.unmatched_detections, vec![0, 1]);
    }

    #[test]
    fn test_iou_distance() {
        let a = [Rect::new(0.0, 0.0, 10.0, 10.0)];
        let b = [Rect::new(0.0, 0.0, 10.0, 10.0), Rect::new(20.0, 20.0, 30.0, 30.0)];
        let d = iou_distance(&a, &b);
        assert!(d[[0, 0]].abs() < 1e-6);
        assert!((d[[0, 1]] - 1.0).abs() < 1e-6);
    }
}
