//! Precomputed schedule mapping (chain, activation magnitude) to the next
//! chain an example will be updated at. Only anytime classifiers have the
//! runs of active margin filters this exploits.

use anyboost_core::Classifier;

/// Sentinel for chains without an active filter.
const NO_THRESHOLD: f32 = -1.0;

pub struct Sequencer {
    thresholds: Vec<f32>,
    /// For each chain with an active filter, the first later chain in the
    /// same contiguous active run with a strictly larger threshold.
    next_biggest: Vec<Option<usize>>,
    /// Maximum threshold over the contiguous active run starting at each
    /// chain; `NO_THRESHOLD` when the chain's filter is inactive.
    max_threshold: Vec<f32>,
}

impl Sequencer {
    pub fn new(classifier: &Classifier) -> Self {
        let n = classifier.chains.len();
        let filters = &classifier.filters;

        let thresholds: Vec<f32> = filters.iter().map(|f| f.threshold).collect();

        let mut next_biggest = vec![None; n];
        for i in 0..n {
            if !filters[i].active {
                continue;
            }
            for j in i + 1..n {
                if !filters[j].active {
                    break;
                }
                if filters[j].threshold > filters[i].threshold {
                    next_biggest[i] = Some(j);
                    break;
                }
            }
        }

        let mut max_threshold = vec![NO_THRESHOLD; n];
        for i in 0..n {
            if !filters[i].active {
                continue;
            }
            let mut max_thresh = filters[i].threshold;
            for j in i + 1..n {
                if !filters[j].active {
                    break;
                }
                max_thresh = max_thresh.max(filters[j].threshold);
            }
            max_threshold[i] = max_thresh;
        }

        Self {
            thresholds,
            next_biggest,
            max_threshold,
        }
    }

    /// Given the chain an example just left and its activation magnitude,
    /// return the next chain that will update it, or `None` when the
    /// magnitude clears every threshold in the current active run.
    pub fn next_chain(&self, current_chain: usize, activation: f32) -> Option<usize> {
        // Queried with |a|, so the inactive-chain sentinel can never collide
        // with a real threshold.
        debug_assert!(activation >= 0.0);

        if activation > self.max_threshold[current_chain] {
            return None;
        }

        let mut chain = current_chain;
        loop {
            if activation < self.thresholds[chain] {
                return Some(chain);
            }
            chain = self.next_biggest[chain]?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyboost_core::{Chain, Classifier, ClassifierKind, Filter, PatchGeometry};

    /// Five chains, filters active on 1..=3 with thresholds 0.5, 1.0, 0.8.
    fn staircase_classifier() -> Classifier {
        let mut c = Classifier::new(ClassifierKind::Anytime, PatchGeometry::new(4, 4, 1));
        let thresholds = [None, Some(0.5), Some(1.0), Some(0.8), None];
        for t in thresholds {
            let filter = match t {
                Some(threshold) => Filter {
                    active: true,
                    threshold,
                    less: true,
                },
                None => Filter::default(),
            };
            c.push_chain(Chain::default(), filter);
        }
        c
    }

    #[test]
    fn precomputed_run_structure() {
        let seq = Sequencer::new(&staircase_classifier());

        assert_eq!(seq.next_biggest, vec![None, Some(2), None, None, None]);
        assert_eq!(seq.max_threshold, vec![-1.0, 1.0, 1.0, 0.8, -1.0]);
    }

    #[test]
    fn next_chain_walks_to_first_admitting_threshold() {
        let seq = Sequencer::new(&staircase_classifier());

        assert_eq!(seq.next_chain(1, 0.3), Some(1));
        assert_eq!(seq.next_chain(1, 0.6), Some(2));
        assert_eq!(seq.next_chain(1, 0.9), Some(2));
        assert_eq!(seq.next_chain(1, 1.5), None);
    }

    #[test]
    fn inactive_chains_admit_nothing() {
        let seq = Sequencer::new(&staircase_classifier());
        assert_eq!(seq.next_chain(0, 0.0), None);
        assert_eq!(seq.next_chain(4, 0.7), None);
    }

    #[test]
    fn contract_holds_for_sampled_magnitudes() {
        let classifier = staircase_classifier();
        let seq = Sequencer::new(&classifier);

        for chain in 1..4 {
            for step in 0..40 {
                // Offset keeps samples away from exact threshold values,
                // where the strict-less gate makes the contract vacuous.
                let v = 0.025 + step as f32 * 0.05;
                match seq.next_chain(chain, v) {
                    None => assert!(v > seq.max_threshold[chain]),
                    Some(next) => {
                        assert!(classifier.filters[next].active);
                        assert!(v < classifier.filters[next].threshold);
                    }
                }
            }
        }
    }
}
