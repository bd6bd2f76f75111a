//! Weak-learner selection over a precomputed response cache.
//!
//! For every (feature, patch) pair the selector caches the feature response
//! and, per feature, a permutation of the patches sorted by response. Both
//! selection modes sweep these sorted responses: classical selection
//! minimises weighted 0/1 loss, SpeedBoost selection jointly picks a split
//! and an anytime threshold by maximising loss reduction per unit work.
//!
//! The per-feature scans are data parallel; the winning feature is reduced
//! serially so results are deterministic.

use rayon::prelude::*;

use anyboost_core::{loss::stable_exp, BucketOptions, DecisionStump, Feature, Filter, Patch};

/// Result of classical selection.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    pub stump: DecisionStump,
    /// Index of the winning feature in the pool.
    pub index: usize,
    /// Weighted error of the stump in [0, 1].
    pub err: f32,
}

/// Result of SpeedBoost joint selection.
#[derive(Debug, Clone, Copy)]
pub struct JointSelection {
    pub stump: DecisionStump,
    pub index: usize,
    pub err: f32,
    /// Anytime threshold on |activation|; infinite when no finite bucket
    /// improved on updating everything.
    pub threshold: f32,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    loss: f32,
    split: f32,
    sign: f32,
}

#[derive(Debug, Clone, Copy)]
struct BucketCandidate {
    gain: f32,
    err: f32,
    split: f32,
    sign: f32,
    bucket: usize,
}

pub struct FeatureSelector<'a> {
    labels: Vec<i8>,
    responses: Vec<Vec<f32>>,
    sorted: Vec<Vec<u32>>,
    features: &'a [Feature],
}

impl<'a> FeatureSelector<'a> {
    /// Precompute the response cache. This is the memory-dominant structure
    /// of training: `|features| * |patches|` floats plus as many indices.
    pub fn new(patches: &[Patch], features: &'a [Feature]) -> Self {
        let labels = patches.iter().map(Patch::label).collect();

        let (responses, sorted): (Vec<Vec<f32>>, Vec<Vec<u32>>) = features
            .par_iter()
            .map(|feature| {
                let responses: Vec<f32> = patches.iter().map(|p| feature.evaluate(p)).collect();
                let mut order: Vec<u32> = (0..patches.len() as u32).collect();
                order.sort_by(|&a, &b| responses[a as usize].total_cmp(&responses[b as usize]));
                (responses, order)
            })
            .unzip();

        Self {
            labels,
            responses,
            sorted,
            features,
        }
    }

    pub fn num_patches(&self) -> usize {
        self.labels.len()
    }

    /// Cached response of feature `index` on patch `patch`.
    pub fn response(&self, index: usize, patch: usize) -> f32 {
        self.responses[index][patch]
    }

    /// Sweep one feature's sorted responses for the split minimising the
    /// weighted 0/1 loss.
    fn scan_feature(
        &self,
        index: usize,
        weights: &[f32],
        positive_weight: f32,
        negative_weight: f32,
    ) -> SplitCandidate {
        let responses = &self.responses[index];
        let sorted = &self.sorted[index];

        let mut positive_below = 0.0f32;
        let mut negative_below = 0.0f32;
        let mut positive_above = positive_weight;
        let mut negative_above = negative_weight;

        let mut best = SplitCandidate {
            loss: positive_above.min(negative_above),
            split: 0.0,
            sign: if positive_above > negative_above { 1.0 } else { -1.0 },
        };

        for i in 1..sorted.len() {
            let p1 = sorted[i - 1] as usize;
            let p2 = sorted[i] as usize;

            if self.labels[p1] > 0 {
                positive_above -= weights[p1];
                positive_below += weights[p1];
            } else {
                negative_above -= weights[p1];
                negative_below += weights[p1];
            }

            if responses[p1] == responses[p2] {
                continue;
            }

            let positive_loss = negative_above + positive_below;
            let negative_loss = positive_above + negative_below;

            if best.loss > positive_loss.min(negative_loss) {
                best.loss = positive_loss.min(negative_loss);
                best.sign = if positive_loss < negative_loss { 1.0 } else { -1.0 };
                best.split = (responses[p1] + responses[p2]) / 2.0;
            }
        }

        best
    }

    /// Classical AdaBoost selection: the (feature, split, sign) triple with
    /// minimum weighted 0/1 loss across the whole pool.
    pub fn select_feature(&self, weights: &[f32]) -> Selection {
        let mut positive_weight = 0.0;
        let mut negative_weight = 0.0;
        for (i, &w) in weights.iter().enumerate() {
            if self.labels[i] > 0 {
                positive_weight += w;
            } else {
                negative_weight += w;
            }
        }

        let candidates: Vec<SplitCandidate> = (0..self.features.len())
            .into_par_iter()
            .map(|i| self.scan_feature(i, weights, positive_weight, negative_weight))
            .collect();

        let mut best = 0;
        for (i, c) in candidates.iter().enumerate() {
            if c.loss < candidates[best].loss {
                best = i;
            }
        }

        let winner = candidates[best];
        Selection {
            stump: DecisionStump::new(self.features[best], winner.split, winner.sign),
            index: best,
            err: winner.loss / (positive_weight + negative_weight),
        }
    }

    /// Sweep one feature against every activation bucket at once,
    /// maintaining below-split weights per bucket and maximising
    /// `delta_loss / tau` over (split, sign, bucket).
    #[allow(clippy::too_many_arguments)]
    fn scan_feature_bucketed(
        &self,
        index: usize,
        weights: &[f32],
        buckets: &[usize],
        positive_weight: &[f32],
        negative_weight: &[f32],
        loss: &[f32],
        tau: &[f32],
    ) -> BucketCandidate {
        let responses = &self.responses[index];
        let sorted = &self.sorted[index];
        let num_buckets = positive_weight.len();

        let mut positive_below = vec![0.0f32; num_buckets];
        let mut negative_below = vec![0.0f32; num_buckets];

        let mut best_index = vec![0usize; num_buckets];
        let mut best_sign = vec![1.0f32; num_buckets];
        let mut best_inner_product: Vec<f32> = (0..num_buckets)
            .map(|b| (positive_weight[b] - negative_weight[b]).abs())
            .collect();

        for i in 1..sorted.len() {
            let p1 = sorted[i - 1] as usize;
            let p2 = sorted[i] as usize;

            if self.labels[p1] > 0 {
                for b in buckets[p1]..num_buckets {
                    positive_below[b] += weights[p1];
                }
            } else {
                for b in buckets[p1]..num_buckets {
                    negative_below[b] += weights[p1];
                }
            }

            if responses[p1] == responses[p2] {
                continue;
            }

            for b in buckets[p1]..num_buckets {
                // The inner product of the stump output with the gradient:
                // (pos above + neg below) - (neg above + pos below)
                //   = (pos - 2*pos_below) - (neg - 2*neg_below).
                let positive_diff = positive_weight[b] - 2.0 * positive_below[b];
                let negative_diff = negative_weight[b] - 2.0 * negative_below[b];
                let inner_product = (positive_diff - negative_diff).abs();

                if best_inner_product[b] < inner_product {
                    best_inner_product[b] = inner_product;
                    best_index[b] = i;
                    best_sign[b] = if positive_diff > negative_diff { 1.0 } else { -1.0 };
                }
            }
        }

        let mut best_bucket = 0;
        let mut best_gain = f32::NEG_INFINITY;
        for b in 0..num_buckets {
            let total = positive_weight[b] + negative_weight[b];
            if total <= 0.0 || tau[b] <= 0.0 {
                continue;
            }
            let ip = best_inner_product[b] / total;
            let delta_loss = loss[b] * (1.0 - (1.0 - ip * ip).max(0.0).sqrt());
            let gain = delta_loss / tau[b];

            if best_gain < gain {
                best_gain = gain;
                best_bucket = b;
            }
        }

        // Recover the split from the winning boundary, skipping examples
        // that sit strictly above the chosen gate: they are not updated and
        // must not influence the split location.
        let split = if best_index[best_bucket] == 0 {
            0.0
        } else {
            let mut i = best_index[best_bucket];
            let low = responses[sorted[i - 1] as usize];
            while i < sorted.len() && buckets[sorted[i] as usize] > best_bucket {
                i += 1;
            }
            if i < sorted.len() {
                (low + responses[sorted[i] as usize]) / 2.0
            } else {
                low
            }
        };

        let total = positive_weight[best_bucket] + negative_weight[best_bucket];
        let err = if total > 0.0 {
            0.5 - 0.5 * best_inner_product[best_bucket] / total
        } else {
            0.5
        };
        BucketCandidate {
            gain: best_gain,
            err,
            split,
            sign: best_sign[best_bucket],
            bucket: best_bucket,
        }
    }

    /// SpeedBoost joint selection of a stump and an anytime threshold.
    pub fn select_feature_and_threshold(
        &self,
        weights: &[f32],
        activations: &[f32],
        options: &BucketOptions,
    ) -> JointSelection {
        let (buckets, thresholds) = build_buckets(&self.labels, activations, options);
        let num_buckets = thresholds.len();

        // Cumulative per-bucket weights and workload fractions: bucket b
        // aggregates every patch whose bucket index is <= b.
        let mut positive_weight = vec![0.0f32; num_buckets];
        let mut negative_weight = vec![0.0f32; num_buckets];
        let mut tau = vec![0.0f32; num_buckets];
        for (i, &w) in weights.iter().enumerate() {
            let target = if self.labels[i] > 0 {
                &mut positive_weight
            } else {
                &mut negative_weight
            };
            for b in buckets[i]..num_buckets {
                target[b] += w;
                tau[b] += 1.0;
            }
        }
        for t in tau.iter_mut() {
            *t /= weights.len() as f32;
        }

        let loss = bucketed_losses(&self.labels, activations, &buckets, num_buckets);

        let candidates: Vec<BucketCandidate> = (0..self.features.len())
            .into_par_iter()
            .map(|i| {
                self.scan_feature_bucketed(
                    i,
                    weights,
                    &buckets,
                    &positive_weight,
                    &negative_weight,
                    &loss,
                    &tau,
                )
            })
            .collect();

        let mut best = 0;
        for (i, c) in candidates.iter().enumerate() {
            if c.gain > candidates[best].gain {
                best = i;
            }
        }

        let winner = candidates[best];
        JointSelection {
            stump: DecisionStump::new(self.features[best], winner.split, winner.sign),
            index: best,
            err: winner.err,
            threshold: thresholds[winner.bucket],
        }
    }

    /// Apply a freshly selected stump to every cached activation admitted by
    /// `filter` (gating on magnitude).
    pub fn update_activations(
        &self,
        stump: &DecisionStump,
        filter: &Filter,
        index: usize,
        alpha: f32,
        activations: &mut [f32],
    ) {
        for (i, a) in activations.iter_mut().enumerate() {
            if filter.passes(a.abs()) {
                *a += alpha * stump.evaluate_response(self.responses[index][i]);
            }
        }
    }
}

/// Partition patches into buckets of increasing |activation| with adaptive
/// boundaries, so that every threshold section holds enough total, positive
/// and negative examples and the thresholds are spaced by at least
/// `min_delta`. The final bucket threshold is infinite.
pub fn build_buckets(
    labels: &[i8],
    activations: &[f32],
    options: &BucketOptions,
) -> (Vec<usize>, Vec<f32>) {
    let mut sortable: Vec<(f32, usize)> = activations
        .iter()
        .enumerate()
        .map(|(i, &a)| (a.abs(), i))
        .collect();
    sortable.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut buckets = vec![0usize; activations.len()];
    let mut thresholds = Vec::new();

    let mut last = 0.0f32;
    let mut count = 0usize;
    let mut positive_count = 0usize;
    let mut negative_count = 0usize;
    let mut bucket = 0usize;

    for p in 1..sortable.len() {
        let p1 = sortable[p - 1].1;

        if labels[p1] > 0 {
            positive_count += 1;
        } else {
            negative_count += 1;
        }
        count += 1;
        buckets[p1] = bucket;

        if sortable[p - 1].0 == sortable[p].0 {
            continue;
        }
        if p < options.min_examples {
            continue;
        }
        if count < options.examples_step {
            continue;
        }
        if positive_count < options.min_positive_examples {
            continue;
        }
        if negative_count < options.min_negative_examples {
            continue;
        }

        let threshold = (sortable[p - 1].0 + sortable[p].0) / 2.0;
        if threshold - last < options.min_delta {
            continue;
        }

        thresholds.push(threshold);
        last = threshold;
        positive_count = 0;
        negative_count = 0;
        count = 0;
        bucket += 1;
    }

    if let Some(&(_, tail)) = sortable.last() {
        buckets[tail] = bucket;
    }
    thresholds.push(f32::INFINITY);

    log::debug!("activation bucket thresholds: {:?}", thresholds);
    (buckets, thresholds)
}

/// Cumulative exponential loss per bucket: bucket b sums `exp(-y * a)` over
/// every patch with bucket index <= b.
fn bucketed_losses(labels: &[i8], activations: &[f32], buckets: &[usize], num_buckets: usize) -> Vec<f32> {
    let mut loss = vec![0.0f32; num_buckets];
    for (i, &a) in activations.iter().enumerate() {
        let y = if labels[i] > 0 { 1.0 } else { -1.0 };
        let term = stable_exp(-y * a);
        for b in buckets[i]..num_buckets {
            loss[b] += term;
        }
    }
    loss
}
