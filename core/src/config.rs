//! Option structs for training and detection.
//!
//! Defaults match the stock face-detection setup; everything is plain data
//! so callers can load these from whatever front end they use.

/// Knobs for the anytime threshold bucketing during joint selection.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BucketOptions {
    /// Minimum number of examples before the first threshold section closes.
    pub min_examples: usize,
    /// Minimum examples between consecutive threshold sections.
    pub examples_step: usize,
    /// Minimum positive examples per threshold section.
    pub min_positive_examples: usize,
    /// Minimum negative examples per threshold section.
    pub min_negative_examples: usize,
    /// Minimum change in threshold per section.
    pub min_delta: f32,
}

impl Default for BucketOptions {
    fn default() -> Self {
        Self {
            min_examples: 500,
            examples_step: 100,
            min_positive_examples: 50,
            min_negative_examples: 50,
            min_delta: 0.01,
        }
    }
}

/// Knobs for the training loops.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrainOptions {
    /// Number of Haar features in the generated pool.
    pub num_features: usize,
    /// Number of stages (weak learners for boosting, chains for cascades).
    pub num_stages: usize,
    /// Positive patch cap per load.
    pub max_positives: usize,
    /// Negative patch cap per load.
    pub max_negatives: usize,
    /// Draw training patches from the gradient-weighted resampler instead of
    /// straight category caps.
    pub sample_patches: bool,
    /// Jointly select features and anytime thresholds (SpeedBoost).
    pub anytime_boost: bool,
    /// Number of stages between resampling of new training data.
    pub stage_increment: usize,
    /// Maximum number of inner stages in a chain for cascade training.
    pub max_inner_stages: usize,
    /// Desired false negative rate per cascade stage.
    pub target_false_negative: f32,
    /// Desired false positive rate per cascade stage (base).
    pub target_false_positive_base: f32,
    /// Desired false positive rate per cascade stage (per-stage step).
    pub target_false_positive_step: f32,
    pub buckets: BucketOptions,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            num_features: 16000,
            num_stages: 100,
            max_positives: 10000,
            max_negatives: 50000,
            sample_patches: false,
            anytime_boost: false,
            stage_increment: 20,
            max_inner_stages: 100,
            target_false_negative: 0.005,
            target_false_positive_base: 0.85,
            target_false_positive_step: 0.05,
            buckets: BucketOptions::default(),
        }
    }
}

/// Knobs for streaming patches off disk.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SampleOptions {
    /// Attempts at reading (and decoding) a patch before giving up.
    pub max_read_attempts: usize,
    /// Approximate number of positives in the data set, used to normalise
    /// the weighted resampler.
    pub num_positives_to_sample: usize,
    /// Approximate number of negatives in the data set.
    pub num_negatives_to_sample: usize,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            max_read_attempts: 10,
            num_positives_to_sample: 10000,
            num_negatives_to_sample: 50000,
        }
    }
}

/// Knobs for sliding-window detection.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DetectOptions {
    /// Resize factor of the first pyramid level. When unset it is derived
    /// per frame from `smallest_detection_ratio`.
    pub initial_scale: Option<f32>,
    /// Fraction of the frame area the smallest detection should cover when
    /// `initial_scale` is derived adaptively.
    pub smallest_detection_ratio: f32,
    /// Number of scales in the image pyramid.
    pub num_scales: usize,
    /// Factor that successive pyramid levels shrink by.
    pub scaling_factor: f32,
    /// Patches with activation above this are positive detections.
    pub detection_threshold: f32,
    /// Maximum number of features (per pixel) to compute before stopping.
    pub feature_limit: f32,
    /// Meter progress by the average features-per-pixel across scales
    /// instead of the per-round maximum.
    pub use_average_features: bool,
    /// Maximum overlap (as a ratio of the candidate's own area) between two
    /// boxes still reported as separate detections.
    pub merging_overlap: f32,
    /// Fraction of the image to compute updates on. Recognized for
    /// compatibility; the core pipeline does not consume it.
    pub percentage: f32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            initial_scale: None,
            smallest_detection_ratio: 0.1,
            num_scales: 3,
            scaling_factor: 1.2,
            detection_threshold: 0.0,
            feature_limit: 1000.0,
            use_average_features: true,
            merging_overlap: 0.5,
            percentage: 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_setup() {
        let t = TrainOptions::default();
        assert_eq!(t.num_features, 16000);
        assert_eq!(t.stage_increment, 20);
        assert_eq!(t.buckets.min_examples, 500);

        let d = DetectOptions::default();
        assert_eq!(d.num_scales, 3);
        assert!(d.use_average_features);
    }
}
