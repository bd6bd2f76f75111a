//! Suppression of overlapping detections.

use anyboost_core::Label;

/// Greedy non-maximum suppression: accept boxes in descending score order,
/// dropping any candidate whose overlap with an accepted box exceeds
/// `max_overlap` of the candidate's own area.
///
/// Note the denominator is the candidate's area, not the union
/// (intersection-over-candidate rather than IoU), so a small box inside a
/// large accepted one is suppressed aggressively.
pub fn filter_detections(detections: &[Label], weights: &[f32], max_overlap: f32) -> Vec<Label> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&a, &b| weights[a].total_cmp(&weights[b]));

    let mut filtered: Vec<Label> = Vec::new();
    for &i in order.iter().rev() {
        let d = &detections[i];
        let mut passed = true;

        for f in &filtered {
            let x1 = d.x.max(f.x);
            let y1 = d.y.max(f.y);
            let x2 = (d.x + d.w).min(f.x + f.w);
            let y2 = (d.y + d.h).min(f.y + f.h);

            let w = (x2 - x1).max(0);
            let h = (y2 - y1).max(0);

            if (w * h) as f32 > max_overlap * (d.w * d.h) as f32 {
                passed = false;
                break;
            }
        }

        if passed {
            filtered.push(*d);
        }
    }

    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_overlap_survives_half_threshold() {
        let detections = vec![Label::new(0, 0, 10, 10, 0), Label::new(5, 5, 10, 10, 0)];
        let weights = vec![2.0, 1.0];

        // Overlap 25 against the candidate's own area 100.
        let kept = filter_detections(&detections, &weights, 0.5);
        assert_eq!(kept.len(), 2);

        let kept = filter_detections(&detections, &weights, 0.2);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0], detections[0]);
    }

    #[test]
    fn highest_score_wins_regardless_of_input_order() {
        let detections = vec![Label::new(5, 5, 10, 10, 0), Label::new(0, 0, 10, 10, 0)];
        let weights = vec![1.0, 2.0];

        let kept = filter_detections(&detections, &weights, 0.2);
        assert_eq!(kept, vec![detections[1]]);
    }

    #[test]
    fn suppression_is_idempotent() {
        let detections = vec![
            Label::new(0, 0, 10, 10, 0),
            Label::new(2, 2, 10, 10, 0),
            Label::new(30, 30, 8, 8, 0),
            Label::new(31, 31, 8, 8, 0),
        ];
        let weights = vec![4.0, 3.0, 2.0, 1.0];

        let once = filter_detections(&detections, &weights, 0.3);
        let once_weights: Vec<f32> = (0..once.len()).map(|i| (once.len() - i) as f32).collect();
        let twice = filter_detections(&once, &once_weights, 0.3);
        assert_eq!(once, twice);
    }
}
