//! Multi-scale detection: an image pyramid of integral frames, advanced one
//! stump per scale per round, merged into frame-space activations and
//! thresholded into detections.

use anyboost_core::{Classifier, DetectOptions, Label, Patch};

use crate::nms::filter_detections;
use crate::sequencer::Sequencer;
use crate::single_scale::SingleScaleDetector;

pub struct Detector<'a> {
    classifier: &'a Classifier,
    sequencer: Sequencer,
    options: DetectOptions,
}

impl<'a> Detector<'a> {
    pub fn new(classifier: &'a Classifier, options: DetectOptions) -> Self {
        Self {
            sequencer: Sequencer::new(classifier),
            classifier,
            options,
        }
    }

    pub fn options(&self) -> &DetectOptions {
        &self.options
    }

    /// Resize factor of the first pyramid level. When unset, it is derived
    /// so the smallest detectable object covers `smallest_detection_ratio`
    /// of the frame area.
    fn initial_scale_for(&self, frame: &Patch) -> f32 {
        if let Some(scale) = self.options.initial_scale {
            return scale;
        }

        let geometry = self.classifier.geometry;
        let smallest_area =
            frame.width() as f32 * frame.height() as f32 * self.options.smallest_detection_ratio;
        let patch_area = (geometry.width * geometry.height) as f32;
        let scale = (patch_area / smallest_area).sqrt();
        log::info!("derived initial scale {} from frame size", scale);
        scale
    }

    /// Resize factors of every pyramid level for `frame`.
    fn scales_for(&self, frame: &Patch) -> Vec<f32> {
        let initial = self.initial_scale_for(frame);
        (0..self.options.num_scales)
            .map(|k| initial / self.options.scaling_factor.powi(k as i32))
            .collect()
    }

    fn setup_for_frame(&self, frame: &Patch) -> (Vec<SingleScaleDetector<'_>>, Vec<Patch>) {
        let mut detectors = Vec::new();
        let mut activations = Vec::new();

        for scale in self.scales_for(frame) {
            let w = ((frame.width() as f32 * scale) as usize).max(1);
            let h = ((frame.height() as f32 * scale) as usize).max(1);

            let mut integral = Patch::new(0, w, h, frame.channels());
            let whole = Label::new(0, 0, frame.width() as i32, frame.height() as i32, 0);
            frame.extract_label(&whole, &mut integral);
            integral.compute_integral_image();

            activations.push(Patch::new(0, w, h, 1));
            detectors.push(SingleScaleDetector::new(self.classifier, integral));
        }

        (detectors, activations)
    }

    fn run_pyramid(&self, frame: &Patch, with_updates: bool) -> (Vec<Patch>, Option<Vec<Patch>>) {
        let (mut detectors, mut activations) = self.setup_for_frame(frame);
        let mut updates = with_updates.then(|| {
            activations
                .iter()
                .map(|a| Patch::new(0, a.width(), a.height(), 1))
                .collect::<Vec<_>>()
        });

        if detectors.is_empty() {
            return (activations, updates);
        }

        let num_scales = detectors.len();
        let mut features_computed = 0.0f32;
        let mut rounds = 0usize;

        while detectors[0].has_more_features() && features_computed < self.options.feature_limit {
            for (i, (detector, map)) in detectors.iter_mut().zip(activations.iter_mut()).enumerate()
            {
                let update_map = updates.as_mut().map(|u| &mut u[i]);
                detector.compute_next_feature(&self.sequencer, map, update_map);
            }

            if self.options.use_average_features {
                features_computed = detectors
                    .iter()
                    .map(SingleScaleDetector::features_per_pixel)
                    .sum::<f32>()
                    / num_scales as f32;
            } else {
                features_computed += 1.0;
            }
            rounds += 1;
        }

        log::info!(
            "computed {} features in {} rounds across {} scales",
            features_computed,
            rounds,
            num_scales
        );
        (activations, updates)
    }

    /// Per-scale activation maps for `frame`. Each pixel of a map is the
    /// activation of the window whose top-left corner sits at that pixel in
    /// the rescaled frame.
    pub fn compute_activation_pyramid(&self, frame: &Patch) -> Vec<Patch> {
        self.run_pyramid(frame, false).0
    }

    /// Activation maps plus per-pixel counts of evaluated stumps.
    pub fn compute_activation_pyramid_with_updates(&self, frame: &Patch) -> (Vec<Patch>, Vec<Patch>) {
        let (activations, updates) = self.run_pyramid(frame, true);
        (activations, updates.unwrap_or_default())
    }

    /// Shift a per-scale map so values sit at window centres, upsample to
    /// frame size with nearest-neighbour, and fold into `merged` by
    /// pointwise maximum.
    fn merge_maps(&self, frame: &Patch, maps: &[Patch], padding: f32) -> Patch {
        let geometry = self.classifier.geometry;
        let mut merged = Patch::new(0, frame.width(), frame.height(), 1);
        merged.fill(padding);

        let mut inflated = Patch::new(0, frame.width(), frame.height(), 1);
        let wborder = (geometry.width + 1) / 2;
        let hborder = (geometry.height + 1) / 2;

        for map in maps {
            let mut shifted = Patch::new(0, map.width(), map.height(), 1);
            shifted.fill(padding);
            if map.width() >= geometry.width && map.height() >= geometry.height {
                for h in 0..map.height() - geometry.height + 1 {
                    for w in 0..map.width() - geometry.width + 1 {
                        shifted.set_value(w + wborder, h + hborder, 0, map.value(w, h, 0));
                    }
                }
            }

            let whole = Label::new(0, 0, shifted.width() as i32, shifted.height() as i32, 0);
            shifted.extract_label_nearest(&whole, &mut inflated);

            for h in 0..frame.height() {
                for w in 0..frame.width() {
                    let v = merged.value(w, h, 0).max(inflated.value(w, h, 0));
                    merged.set_value(w, h, 0, v);
                }
            }
        }

        merged
    }

    /// Frame-sized activation map: the maximum window activation across all
    /// scales, centred on each pixel. Unreachable pixels hold `-inf`.
    pub fn compute_merged_activation(&self, frame: &Patch) -> Patch {
        let pyramid = self.compute_activation_pyramid(frame);
        self.merge_maps(frame, &pyramid, f32::NEG_INFINITY)
    }

    /// Frame-sized work map: the maximum per-pixel stump count across
    /// scales. A stand-in for the computation the anytime gating saved.
    pub fn compute_merged_updates(&self, frame: &Patch) -> Patch {
        let (_, updates) = self.compute_activation_pyramid_with_updates(frame);
        self.merge_maps(frame, &updates, 0.0)
    }

    /// Detections for `frame`: every window whose activation clears the
    /// detection threshold, mapped back to frame coordinates and filtered
    /// by non-maximum suppression.
    pub fn compute_detections(&self, frame: &Patch) -> Vec<Label> {
        let pyramid = self.compute_activation_pyramid(frame);
        let geometry = self.classifier.geometry;
        let scales = self.scales_for(frame);

        let mut detections = Vec::new();
        let mut weights = Vec::new();

        for (map, scale) in pyramid.iter().zip(scales) {
            if map.width() < geometry.width || map.height() < geometry.height {
                continue;
            }
            let inv = 1.0 / scale;

            for h in 0..map.height() - geometry.height + 1 {
                for w in 0..map.width() - geometry.width + 1 {
                    let activation = map.value(w, h, 0);
                    if activation > self.options.detection_threshold {
                        detections.push(Label::new(
                            (w as f32 * inv) as i32,
                            (h as f32 * inv) as i32,
                            (geometry.width as f32 * inv) as i32,
                            (geometry.height as f32 * inv) as i32,
                            1,
                        ));
                        weights.push(activation);
                    }
                }
            }
        }

        log::info!("thresholding produced {} raw detections", detections.len());
        let filtered = filter_detections(&detections, &weights, self.options.merging_overlap);
        log::info!("{} detections after suppression", filtered.len());
        filtered
    }
}
