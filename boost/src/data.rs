//! Streaming training patches from rotating sets of sample files.
//!
//! Files hold concatenated patch records (see `anyboost-io`). Positive and
//! negative samples come from separate file sets; each set is shuffled,
//! read end to end, then reshuffled, so the stream never runs dry. Every
//! patch handed out is already integral-transformed.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use rand::seq::SliceRandom;
use rand::Rng;

use anyboost_core::{loss::stable_exp, Classifier, Patch, PatchGeometry, SampleOptions};
use anyboost_core::{Error, Result};

/// Patches inspected when estimating the average gradient weight for the
/// resampler normaliser.
const AVERAGE_WEIGHT_PROBES: usize = 500;

/// Scans give up after reading this many times the requested patch count,
/// so a filter that rejects everything cannot spin forever on the rotating
/// file sets.
const MAX_SCAN_FACTOR: usize = 100;

struct PatchStream {
    files: Vec<PathBuf>,
    next_file: usize,
    reader: Option<BufReader<File>>,
}

impl PatchStream {
    fn new(mut files: Vec<PathBuf>) -> Self {
        files.shuffle(&mut rand::thread_rng());
        Self {
            files,
            next_file: 0,
            reader: None,
        }
    }

    fn open_next(&mut self) -> Result<()> {
        if self.next_file >= self.files.len() {
            self.next_file = 0;
            self.files.shuffle(&mut rand::thread_rng());
        }

        let path = &self.files[self.next_file];
        self.next_file += 1;
        let file = File::open(path)
            .map_err(|e| Error::InvalidInput(format!("{}: {}", path.display(), e)))?;
        self.reader = Some(BufReader::new(file));
        Ok(())
    }

    /// One read attempt: end of file or a malformed record rotates to the
    /// next file and counts as a failure.
    fn read_attempt(&mut self) -> Result<Option<Patch>> {
        if self.reader.is_none() {
            self.open_next()?;
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        match anyboost_io::read_patch(reader) {
            Ok(Some(patch)) => Ok(Some(patch)),
            Ok(None) => {
                self.reader = None;
                Ok(None)
            }
            Err(e) => {
                log::warn!("skipping malformed patch record: {}", e);
                self.reader = None;
                Ok(None)
            }
        }
    }
}

/// Reads and samples training data from positive and negative patch files.
pub struct DataSource {
    positives: PatchStream,
    negatives: PatchStream,
    geometry: PatchGeometry,
    options: SampleOptions,
}

impl DataSource {
    /// Open a data source over the given sample files. The first patch of
    /// each stream is checked against `geometry` (default adopts the data's
    /// geometry, an explicit mismatch fails) and consumed.
    pub fn new(
        positive_files: Vec<PathBuf>,
        negative_files: Vec<PathBuf>,
        geometry: PatchGeometry,
        options: SampleOptions,
    ) -> Result<Self> {
        if positive_files.is_empty() || negative_files.is_empty() {
            return Err(Error::EmptyCohort(
                "need at least one positive and one negative sample file".into(),
            ));
        }

        let mut source = Self {
            positives: PatchStream::new(positive_files),
            negatives: PatchStream::new(negative_files),
            geometry,
            options,
        };

        let probe = source
            .read_positive_patch()
            .ok_or_else(|| Error::EmptyCohort("no readable positive patches".into()))?;
        source.geometry = source.geometry.adopt(probe.geometry())?;

        let probe = source
            .read_negative_patch()
            .ok_or_else(|| Error::EmptyCohort("no readable negative patches".into()))?;
        source.geometry = source.geometry.adopt(probe.geometry())?;

        Ok(source)
    }

    /// The geometry of the streamed patches, after any adoption.
    pub fn geometry(&self) -> PatchGeometry {
        self.geometry
    }

    pub fn options(&self) -> &SampleOptions {
        &self.options
    }

    fn read_patch_with_retries(&mut self, positive: bool) -> Option<Patch> {
        for _ in 0..self.options.max_read_attempts {
            let stream = if positive { &mut self.positives } else { &mut self.negatives };
            match stream.read_attempt() {
                Ok(Some(mut patch)) => {
                    patch.compute_integral_image();
                    return Some(patch);
                }
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("patch read attempt failed: {}", e);
                    continue;
                }
            }
        }
        None
    }

    /// Read the next positive patch, integral-transformed; `None` after
    /// `max_read_attempts` consecutive failures.
    pub fn read_positive_patch(&mut self) -> Option<Patch> {
        self.read_patch_with_retries(true)
    }

    pub fn read_negative_patch(&mut self) -> Option<Patch> {
        self.read_patch_with_retries(false)
    }

    /// Append up to `max_patches` positive patches; returns how many were
    /// added.
    pub fn get_positive_patches(&mut self, max_patches: usize, patches: &mut Vec<Patch>) -> usize {
        let mut added = 0;
        while added < max_patches {
            match self.read_positive_patch() {
                Some(p) => {
                    patches.push(p);
                    added += 1;
                }
                None => break,
            }
        }
        added
    }

    pub fn get_negative_patches(&mut self, max_patches: usize, patches: &mut Vec<Patch>) -> usize {
        let mut added = 0;
        while added < max_patches {
            match self.read_negative_patch() {
                Some(p) => {
                    patches.push(p);
                    added += 1;
                }
                None => break,
            }
        }
        added
    }

    fn get_patches_active(
        &mut self,
        positive: bool,
        max_patches: usize,
        classifier: &Classifier,
        patches: &mut Vec<Patch>,
    ) -> usize {
        let mut added = 0;
        let mut read = 0;
        let scan_limit = MAX_SCAN_FACTOR * max_patches.max(1);

        while added < max_patches {
            if read >= scan_limit {
                log::warn!(
                    "giving up after scanning {} patches for {} survivors",
                    read,
                    added
                );
                break;
            }
            let patch = if positive {
                self.read_positive_patch()
            } else {
                self.read_negative_patch()
            };
            let Some(patch) = patch else { break };
            read += 1;

            if classifier.is_active_in_last_chain(&patch) {
                patches.push(patch);
                added += 1;
            }
        }

        log::info!("loaded {} surviving patches, read {}", added, read);
        added
    }

    /// Positive patches still admitted by the classifier's final chain.
    /// Used to feed cascade stages only the survivors of earlier stages.
    pub fn get_positive_patches_active(
        &mut self,
        max_patches: usize,
        classifier: &Classifier,
        patches: &mut Vec<Patch>,
    ) -> usize {
        self.get_patches_active(true, max_patches, classifier, patches)
    }

    pub fn get_negative_patches_active(
        &mut self,
        max_patches: usize,
        classifier: &Classifier,
        patches: &mut Vec<Patch>,
    ) -> usize {
        self.get_patches_active(false, max_patches, classifier, patches)
    }

    /// Estimate the mean gradient weight `exp(-y * activation)` by peeking a
    /// small random sample, drawing positives with probability
    /// `positive_prob`.
    pub fn compute_average_weight(
        &mut self,
        positive_prob: f32,
        num_patches: usize,
        classifier: &Classifier,
    ) -> f32 {
        let mut rng = rand::thread_rng();
        let mut read = 0;
        let mut sum = 0.0;

        while read < num_patches {
            let patch = if rng.gen::<f32>() < positive_prob {
                self.read_positive_patch()
            } else {
                self.read_negative_patch()
            };
            let Some(patch) = patch else { break };
            read += 1;

            let y = if patch.label() > 0 { 1.0 } else { -1.0 };
            sum += stable_exp(-y * classifier.activation(&patch));
        }

        if read == 0 {
            1.0
        } else {
            sum / read as f32
        }
    }

    /// Gradient-weighted subsample of the positive stream only.
    pub fn get_positive_patches_sampled(
        &mut self,
        max_patches: usize,
        classifier: &Classifier,
        weights: &mut Vec<f32>,
        patches: &mut Vec<Patch>,
    ) -> usize {
        let average_weight =
            self.compute_average_weight(1.0, AVERAGE_WEIGHT_PROBES, classifier);
        let normalizer =
            average_weight * self.options.num_positives_to_sample as f32 / max_patches as f32;
        self.sample_with_normalizer(1.0, max_patches, normalizer, classifier, weights, patches)
    }

    /// Gradient-weighted subsample of the negative stream only.
    pub fn get_negative_patches_sampled(
        &mut self,
        max_patches: usize,
        classifier: &Classifier,
        weights: &mut Vec<f32>,
        patches: &mut Vec<Patch>,
    ) -> usize {
        let average_weight =
            self.compute_average_weight(0.0, AVERAGE_WEIGHT_PROBES, classifier);
        let normalizer =
            average_weight * self.options.num_negatives_to_sample as f32 / max_patches as f32;
        self.sample_with_normalizer(0.0, max_patches, normalizer, classifier, weights, patches)
    }

    /// Draw a gradient-weighted subsample of the mixed patch stream using a
    /// low-variance residual resampler; emitted patches carry compensation
    /// weights `hits / w` consumed as sample weights by the trainer.
    pub fn get_patches_sampled(
        &mut self,
        max_patches: usize,
        classifier: &Classifier,
        weights: &mut Vec<f32>,
        patches: &mut Vec<Patch>,
    ) -> usize {
        let pool = self.options.num_positives_to_sample + self.options.num_negatives_to_sample;
        let positive_prob = self.options.num_positives_to_sample as f32 / pool as f32;

        let average_weight =
            self.compute_average_weight(positive_prob, AVERAGE_WEIGHT_PROBES, classifier);
        let normalizer = average_weight * pool as f32 / max_patches as f32;

        log::info!(
            "sampling patches: average weight {}, normalizer {}",
            average_weight,
            normalizer
        );
        self.sample_with_normalizer(positive_prob, max_patches, normalizer, classifier, weights, patches)
    }

    fn sample_with_normalizer(
        &mut self,
        positive_prob: f32,
        max_patches: usize,
        normalizer: f32,
        classifier: &Classifier,
        weights: &mut Vec<f32>,
        patches: &mut Vec<Patch>,
    ) -> usize {
        let mut rng = rand::thread_rng();
        let mut remainder = normalizer * rng.gen::<f32>();
        let mut added = 0;
        let mut read = 0;
        let scan_limit = MAX_SCAN_FACTOR * max_patches.max(1);

        while added < max_patches && read < scan_limit {
            let patch = if rng.gen::<f32>() < positive_prob {
                self.read_positive_patch()
            } else {
                self.read_negative_patch()
            };
            let Some(patch) = patch else { break };
            read += 1;

            let y = if patch.label() > 0 { 1.0 } else { -1.0 };
            let w = stable_exp(-y * classifier.activation(&patch));

            if w + remainder > normalizer {
                // Number of times the low-variance resampler hit this patch.
                let hits = ((w + remainder) / normalizer).floor();
                remainder = (w + remainder) % normalizer;

                patches.push(patch);
                weights.push(hits / w);
                added += 1;
            } else {
                remainder += w;
            }
        }

        log::info!("sampled {} of {} read patches", added, read);
        added
    }
}
