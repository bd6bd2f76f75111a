//! Per-scale anytime evaluation: one stump at a time over every candidate
//! window of an integral frame, with per-pixel index sets pruning work
//! according to the classifier's gating policy.

use anyboost_core::{Classifier, ClassifierKind, DecisionStump, Patch};

use crate::sequencer::Sequencer;

/// Integral-image offsets of the eight corners a two-box Haar stump reads,
/// relative to a window's top-left pixel.
fn stump_offsets(stump: &DecisionStump, frame_width: usize, frame_height: usize) -> [usize; 8] {
    let f = &stump.feature;
    let base = f.channel * frame_width * frame_height;
    [
        base + f.b0.y0 * frame_width + f.b0.x0,
        base + f.b0.y1 * frame_width + f.b0.x0,
        base + f.b0.y0 * frame_width + f.b0.x1,
        base + f.b0.y1 * frame_width + f.b0.x1,
        base + f.b1.y0 * frame_width + f.b1.x0,
        base + f.b1.y1 * frame_width + f.b1.x0,
        base + f.b1.y0 * frame_width + f.b1.x1,
        base + f.b1.y1 * frame_width + f.b1.x1,
    ]
}

#[inline]
fn stump_response(frame: &[f32], idx: usize, offsets: &[usize; 8], stump: &DecisionStump) -> f32 {
    let f = &stump.feature;
    f.w0 * ((frame[idx + offsets[0]] + frame[idx + offsets[3]])
        - (frame[idx + offsets[1]] + frame[idx + offsets[2]]))
        + f.w1
            * ((frame[idx + offsets[4]] + frame[idx + offsets[7]])
                - (frame[idx + offsets[5]] + frame[idx + offsets[6]]))
}

/// Runs the anytime detection for a single scale of the activation pyramid.
///
/// Owns the scaled integral frame; the activation map (same dimensions) is
/// threaded through each call so the caller can merge maps across scales.
pub struct SingleScaleDetector<'a> {
    classifier: &'a Classifier,
    integral: Patch,

    chain_index: usize,
    stump_index: usize,

    /// Flattened top-left offsets of every candidate window.
    default_indices: Vec<usize>,
    /// Candidate subsets per chain under cascade/anytime gating.
    indices: Vec<Vec<usize>>,

    num_pixels: usize,
    updated_pixels: usize,
}

impl<'a> SingleScaleDetector<'a> {
    /// `integral` must already be integral-transformed and at least as large
    /// as the classifier's patch geometry in both dimensions (otherwise the
    /// scale simply has no candidates).
    pub fn new(classifier: &'a Classifier, integral: Patch) -> Self {
        let geometry = classifier.geometry;
        let fw = integral.width();
        let fh = integral.height();

        let mut default_indices = Vec::new();
        if fw >= geometry.width && fh >= geometry.height {
            for y in 0..fh - geometry.height + 1 {
                for x in 0..fw - geometry.width + 1 {
                    default_indices.push(y * fw + x);
                }
            }
        }

        Self {
            classifier,
            num_pixels: default_indices.len(),
            default_indices,
            indices: vec![Vec::new(); classifier.chains.len()],
            integral,
            chain_index: 0,
            stump_index: 0,
            updated_pixels: 0,
        }
    }

    pub fn integral(&self) -> &Patch {
        &self.integral
    }

    /// Whether any stump remains to evaluate on this frame.
    pub fn has_more_features(&self) -> bool {
        self.chain_index < self.classifier.chains.len()
            && self.stump_index < self.classifier.chains[self.chain_index].len()
    }

    /// Average number of features computed per candidate pixel so far.
    /// Repeated visits under anytime gating can push this past the number
    /// of stumps in a single pass; it measures work, not depth.
    pub fn features_per_pixel(&self) -> f32 {
        if self.num_pixels == 0 {
            return 0.0;
        }
        self.updated_pixels as f32 / self.num_pixels as f32
    }

    /// Evaluate one stump at every candidate window.
    fn evaluate_all_patches(&self, weight: f32, stump: &DecisionStump, activations: &mut Patch) {
        let geometry = self.classifier.geometry;
        let fw = self.integral.width();
        let fh = self.integral.height();
        if fw < geometry.width || fh < geometry.height {
            return;
        }
        let aw = activations.width();

        let offsets = stump_offsets(stump, fw, fh);
        let output = stump.sign * weight;
        let frame = self.integral.data();
        let act = activations.data_mut();

        for ay in 0..fh - geometry.height + 1 {
            let fay = ay * fw;
            let aay = ay * aw;
            for ax in 0..fw - geometry.width + 1 {
                let v = stump_response(frame, fay + ax, &offsets, stump);
                act[aay + ax] += if v < stump.split { -output } else { output };
            }
        }
    }

    /// Evaluate one stump at an explicit list of window offsets.
    fn evaluate_listed(
        &self,
        weight: f32,
        stump: &DecisionStump,
        indices: &[usize],
        activations: &mut Patch,
    ) {
        let fw = self.integral.width();
        let fh = self.integral.height();

        let offsets = stump_offsets(stump, fw, fh);
        let output = stump.sign * weight;
        let frame = self.integral.data();
        let act = activations.data_mut();

        for &idx in indices {
            let v = stump_response(frame, idx, &offsets, stump);
            act[idx] += if v < stump.split { -output } else { output };
        }
    }

    /// Advance the activation map by the classifier's next stump.
    ///
    /// `updates`, when provided, accumulates how many stumps were evaluated
    /// at each pixel.
    pub fn compute_next_feature(
        &mut self,
        sequencer: &Sequencer,
        activations: &mut Patch,
        mut updates: Option<&mut Patch>,
    ) {
        if !self.has_more_features() {
            return;
        }

        let chain = &self.classifier.chains[self.chain_index];
        let stump = chain.stumps[self.stump_index];
        let weight = chain.weights[self.stump_index];

        if self.classifier.filters[self.chain_index].active {
            // Entering a cascade stage resets the surviving windows.
            if self.classifier.kind == ClassifierKind::Cascade
                && self.stump_index == 0
                && self.chain_index > 0
            {
                let act = activations.data_mut();
                for &idx in &self.indices[self.chain_index] {
                    act[idx] = 0.0;
                }
            }

            // The index set is seeded at the chain boundary below; borrow it
            // out so the evaluation can mutate the activation map.
            let listed = std::mem::take(&mut self.indices[self.chain_index]);
            self.evaluate_listed(weight, &stump, &listed, activations);
            self.updated_pixels += listed.len();
            if let Some(updates) = updates.as_deref_mut() {
                let map = updates.data_mut();
                for &idx in &listed {
                    map[idx] += 1.0;
                }
            }
            self.indices[self.chain_index] = listed;
        } else {
            self.evaluate_all_patches(weight, &stump, activations);
            self.updated_pixels += self.num_pixels;
            if let Some(updates) = updates.as_deref_mut() {
                let map = updates.data_mut();
                for &idx in &self.default_indices {
                    map[idx] += 1.0;
                }
            }
        }

        self.stump_index += 1;
        if self.stump_index == chain.len() {
            self.chain_index += 1;
            self.stump_index = 0;

            if self.chain_index < self.classifier.chains.len() {
                self.seed_next_chain(sequencer, activations);
            }

            // The previous chain's gated index set is no longer needed.
            let prev = self.chain_index - 1;
            if self.classifier.filters[prev].active {
                self.indices[prev] = Vec::new();
            }
        }
    }

    /// At a chain boundary, decide which windows the next chain visits.
    fn seed_next_chain(&mut self, sequencer: &Sequencer, activations: &Patch) {
        let prev = self.chain_index - 1;

        let taken;
        let source: &[usize] = if self.classifier.filters[prev].active {
            taken = std::mem::take(&mut self.indices[prev]);
            &taken
        } else {
            &self.default_indices
        };

        let act = activations.data();
        match self.classifier.kind {
            ClassifierKind::Cascade => {
                let threshold = self.classifier.filters[self.chain_index].threshold;
                let mut survivors = Vec::new();
                for &idx in source {
                    if act[idx] > threshold {
                        survivors.push(idx);
                    }
                }
                self.indices[self.chain_index] = survivors;
            }
            ClassifierKind::Anytime => {
                if self.classifier.filters[self.chain_index].active {
                    for &idx in source {
                        if let Some(next) = sequencer.next_chain(self.chain_index, act[idx].abs()) {
                            self.indices[next].push(idx);
                        }
                    }
                }
            }
            ClassifierKind::Boosted => {}
        }
    }
}
