use crate::patch::Patch;

/// Clamp for `exp(-y * a)` exponents so extreme margins cannot overflow f32.
const MAX_EXPONENT: f32 = 80.0;

/// Clamp keeping weak-learner error away from {0, 1} where the AdaBoost
/// weight diverges.
const ERR_EPSILON: f32 = 1e-6;

#[inline]
fn sign_of(label: i8) -> f32 {
    if label > 0 {
        1.0
    } else {
        -1.0
    }
}

/// `exp` with the exponent capped so large negative margins cannot overflow.
#[inline]
pub fn stable_exp(exponent: f32) -> f32 {
    exponent.min(MAX_EXPONENT).exp()
}

/// Exponential loss `sum exp(-y * a)`, weighted by `sample_weights` when
/// provided.
pub fn exp_loss(patches: &[Patch], sample_weights: Option<&[f32]>, activations: &[f32]) -> f32 {
    match sample_weights {
        Some(sw) if sw.len() == activations.len() => patches
            .iter()
            .zip(activations)
            .zip(sw)
            .map(|((p, &a), &w)| w * stable_exp(-sign_of(p.label()) * a))
            .sum(),
        _ => patches
            .iter()
            .zip(activations)
            .map(|(p, &a)| stable_exp(-sign_of(p.label()) * a))
            .sum(),
    }
}

/// 0/1 loss with per-class error rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZeroOneLoss {
    pub total: f32,
    pub positive: f32,
    pub negative: f32,
}

/// Fraction of misclassified examples (sign of activation vs. label), with
/// the positive- and negative-class error rates, weighted by
/// `sample_weights` when provided.
pub fn zero_one_loss(patches: &[Patch], sample_weights: Option<&[f32]>, activations: &[f32]) -> ZeroOneLoss {
    let mut loss = 0.0;
    let mut count = 0.0;
    let mut positive_loss = 0.0;
    let mut positive_count = 0.0;
    let mut negative_loss = 0.0;
    let mut negative_count = 0.0;

    let sample_weights = sample_weights.filter(|sw| sw.len() == activations.len());
    for (i, (p, &a)) in patches.iter().zip(activations).enumerate() {
        let w = sample_weights.map_or(1.0, |sw| sw[i]);
        let predicted = if a > 0.0 { 1.0 } else { -1.0 };
        let wrong = predicted != sign_of(p.label());

        if wrong {
            loss += w;
        }
        if p.label() > 0 {
            positive_count += w;
            if wrong {
                positive_loss += w;
            }
        } else {
            negative_count += w;
            if wrong {
                negative_loss += w;
            }
        }
        count += w;
    }

    ZeroOneLoss {
        total: if count > 0.0 { loss / count } else { 0.0 },
        positive: if positive_count > 0.0 { positive_loss / positive_count } else { 0.0 },
        negative: if negative_count > 0.0 { negative_loss / negative_count } else { 0.0 },
    }
}

/// Recompute the per-example gradient of the exponential loss,
/// `g = sample_w * exp(-y * a)`, into `weights`.
pub fn gradient(patches: &[Patch], sample_weights: Option<&[f32]>, activations: &[f32], weights: &mut Vec<f32>) {
    weights.clear();
    match sample_weights {
        Some(sw) if sw.len() == activations.len() => {
            weights.extend(patches.iter().zip(activations).zip(sw).map(|((p, &a), &w)| {
                w * stable_exp(-sign_of(p.label()) * a)
            }));
        }
        _ => {
            weights.extend(
                patches
                    .iter()
                    .zip(activations)
                    .map(|(p, &a)| stable_exp(-sign_of(p.label()) * a)),
            );
        }
    }
}

/// AdaBoost weak-learner weight `alpha = ln((1 - err) / err) / 2`, with the
/// error clamped away from the divergent endpoints.
pub fn weak_learner_weight(err: f32) -> f32 {
    let err = err.clamp(ERR_EPSILON, 1.0 - ERR_EPSILON);
    0.5 * ((1.0 - err) / err).ln()
}

/// Calibrate a prediction bias against validation activations.
///
/// Sorts by activation and scans upward, tracking cumulative false negatives
/// and remaining false positives; the returned bias is the midpoint of the
/// last activation boundary whose false-negative rate stays within
/// `false_negative_rate`, paired with the false-positive rate at that bias.
pub fn compute_prediction_bias(
    patches: &[Patch],
    activations: &[f32],
    false_negative_rate: f32,
) -> (f32, f32) {
    let mut sortable: Vec<(f32, i8)> = patches
        .iter()
        .zip(activations)
        .map(|(p, &a)| (a, p.label()))
        .collect();
    sortable.sort_by(|a, b| a.0.total_cmp(&b.0));

    let positives = sortable.iter().filter(|&&(_, l)| l > 0).count() as f32;
    let negatives = sortable.len() as f32 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return (0.0, 1.0);
    }

    let mut false_negatives = 0.0f32;
    let mut false_positives = negatives;

    let mut bias = 0.0;
    let mut false_positive_rate = 1.0;

    for p in 0..sortable.len() {
        if sortable[p].1 > 0 {
            false_negatives += 1.0;
        } else {
            false_positives -= 1.0;
        }

        if p + 1 < sortable.len() && sortable[p].0 == sortable[p + 1].0 {
            continue;
        }

        if false_negatives / positives > false_negative_rate {
            break;
        }
        bias = if p + 1 < sortable.len() {
            (sortable[p].0 + sortable[p + 1].0) / 2.0
        } else {
            sortable[p].0
        };
        false_positive_rate = false_positives / negatives;
    }

    (bias, false_positive_rate)
}
