use crate::feature::Feature;
use crate::geometry::PatchGeometry;
use crate::patch::Patch;
use crate::{Error, Result};

/// Decision stump over the output of a [`Feature`]: outputs `sign` when the
/// response is at least `split`, `-sign` below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionStump {
    pub feature: Feature,
    pub split: f32,
    pub sign: f32,
}

impl DecisionStump {
    pub fn new(feature: Feature, split: f32, sign: f32) -> Self {
        Self { feature, split, sign }
    }

    pub fn evaluate(&self, p: &Patch) -> f32 {
        self.evaluate_response(self.feature.evaluate(p))
    }

    #[inline]
    pub fn evaluate_response(&self, response: f32) -> f32 {
        if response < self.split {
            -self.sign
        } else {
            self.sign
        }
    }
}

/// Per-chain gate deciding which examples a chain updates.
///
/// An inactive filter passes everything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Filter {
    pub active: bool,
    pub threshold: f32,
    pub less: bool,
}

impl Filter {
    pub fn passes(&self, activation: f32) -> bool {
        if !self.active {
            return true;
        }
        if self.less {
            activation < self.threshold
        } else {
            activation > self.threshold
        }
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self {
            active: false,
            threshold: 0.0,
            less: true,
        }
    }
}

/// A run of weighted decision stumps sharing one gating filter.
/// `stumps`, `weights` and `biases` are parallel arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chain {
    pub stumps: Vec<DecisionStump>,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl Chain {
    pub fn push(&mut self, stump: DecisionStump, weight: f32, bias: f32) {
        self.stumps.push(stump);
        self.weights.push(weight);
        self.biases.push(bias);
    }

    pub fn len(&self) -> usize {
        self.stumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stumps.is_empty()
    }
}

/// The three training strategies a classifier can encode. The policy bits
/// steering the activation protocol are derived from this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ClassifierKind {
    Boosted,
    Cascade,
    Anytime,
}

impl ClassifierKind {
    /// Whether filters gate on `|activation|` rather than the raw value.
    pub fn filters_use_margin(self) -> bool {
        matches!(self, ClassifierKind::Anytime)
    }

    /// Whether a chain adds onto the running activation. When false, passing
    /// an active filter resets the activation to zero first, as in cascades.
    pub fn filters_are_additive(self) -> bool {
        matches!(self, ClassifierKind::Anytime)
    }

    /// Whether failing a filter drops the example for good. When false, only
    /// the corresponding chain is skipped.
    pub fn filters_are_permanent(self) -> bool {
        matches!(self, ClassifierKind::Cascade)
    }
}

/// A sequence of chains with one gating filter per chain.
///
/// An example accumulates activation by walking the chains in order; at each
/// chain the filter decides (from the current activation, or its magnitude)
/// whether the chain updates the example, and the policy bits derived from
/// [`ClassifierKind`] decide what passing or failing means.
#[derive(Debug, Clone, PartialEq)]
pub struct Classifier {
    pub kind: ClassifierKind,
    pub chains: Vec<Chain>,
    pub filters: Vec<Filter>,
    pub geometry: PatchGeometry,
}

impl Classifier {
    pub fn new(kind: ClassifierKind, geometry: PatchGeometry) -> Self {
        Self {
            kind,
            chains: Vec::new(),
            filters: Vec::new(),
            geometry,
        }
    }

    pub fn push_chain(&mut self, chain: Chain, filter: Filter) {
        self.chains.push(chain);
        self.filters.push(filter);
    }

    /// Total number of stumps across all chains.
    pub fn num_stumps(&self) -> usize {
        self.chains.iter().map(Chain::len).sum()
    }

    /// Check the chain/filter arrays are aligned and every feature fits the
    /// embedded geometry.
    pub fn validate(&self) -> Result<()> {
        if self.chains.len() != self.filters.len() {
            return Err(Error::InvalidInput(format!(
                "{} chains vs {} filters",
                self.chains.len(),
                self.filters.len()
            )));
        }
        for chain in &self.chains {
            if chain.weights.len() != chain.stumps.len() || chain.biases.len() != chain.stumps.len() {
                return Err(Error::InvalidInput("ragged chain arrays".into()));
            }
            for stump in &chain.stumps {
                stump.feature.validate(&self.geometry)?;
            }
        }
        Ok(())
    }

    /// Run the activation protocol over all chains.
    pub fn activation(&self, patch: &Patch) -> f32 {
        let use_margin = self.kind.filters_use_margin();
        let additive = self.kind.filters_are_additive();
        let permanent = self.kind.filters_are_permanent();

        let mut activation = 0.0f32;
        for (chain, filter) in self.chains.iter().zip(&self.filters) {
            let gate = if use_margin { activation.abs() } else { activation };
            if filter.passes(gate) {
                if filter.active && !additive {
                    activation = 0.0;
                }
                for (stump, &weight) in chain.stumps.iter().zip(&chain.weights) {
                    activation += weight * stump.evaluate(patch);
                }
            } else if permanent {
                break;
            }
        }

        activation
    }

    /// Whether the final chain's gate admits `patch` — i.e. the patch
    /// survives all earlier stages and would be updated by the last chain.
    pub fn is_active_in_last_chain(&self, patch: &Patch) -> bool {
        let use_margin = self.kind.filters_use_margin();
        let additive = self.kind.filters_are_additive();
        let permanent = self.kind.filters_are_permanent();

        let mut activation = 0.0f32;
        let mut active = true;
        for (chain, filter) in self.chains.iter().zip(&self.filters) {
            let gate = if use_margin { activation.abs() } else { activation };
            if filter.passes(gate) {
                active = true;
                if filter.active && !additive {
                    activation = 0.0;
                }
                for (stump, &weight) in chain.stumps.iter().zip(&chain.weights) {
                    activation += weight * stump.evaluate(patch);
                }
            } else {
                active = false;
                if permanent {
                    break;
                }
            }
        }

        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Box2;

    fn integral_3x3() -> Patch {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let mut p = Patch::from_data(1, 3, 3, 1, data).unwrap();
        p.compute_integral_image();
        p
    }

    fn negative_feature() -> Feature {
        // Evaluates to -4 on the 3x3 test patch.
        Feature::new(Box2::new(0, 0, 1, 1), Box2::new(1, 1, 2, 2), 1.0, -1.0, 0)
    }

    fn positive_feature() -> Feature {
        // Same boxes, both weights positive: 5 + 9 = 14.
        Feature::new(Box2::new(0, 0, 1, 1), Box2::new(1, 1, 2, 2), 1.0, 1.0, 0)
    }

    #[test]
    fn stump_outputs_signed_threshold_decision() {
        let p = integral_3x3();
        let stump = DecisionStump::new(negative_feature(), 0.0, 1.0);
        assert_eq!(stump.evaluate(&p), -1.0);

        let stump = DecisionStump::new(negative_feature(), -10.0, 1.0);
        assert_eq!(stump.evaluate(&p), 1.0);
    }

    #[test]
    fn inactive_filter_passes_everything() {
        let f = Filter::default();
        assert!(f.passes(f32::MAX));
        assert!(f.passes(f32::MIN));
    }

    #[test]
    fn policy_bits_follow_kind() {
        assert_eq!(
            (false, false, false),
            (
                ClassifierKind::Boosted.filters_use_margin(),
                ClassifierKind::Boosted.filters_are_additive(),
                ClassifierKind::Boosted.filters_are_permanent()
            )
        );
        assert_eq!(
            (false, false, true),
            (
                ClassifierKind::Cascade.filters_use_margin(),
                ClassifierKind::Cascade.filters_are_additive(),
                ClassifierKind::Cascade.filters_are_permanent()
            )
        );
        assert_eq!(
            (true, true, false),
            (
                ClassifierKind::Anytime.filters_use_margin(),
                ClassifierKind::Anytime.filters_are_additive(),
                ClassifierKind::Anytime.filters_are_permanent()
            )
        );
    }

    #[test]
    fn boosted_activation_sums_all_chains() {
        let p = integral_3x3();
        let geometry = PatchGeometry::new(3, 3, 1);
        let mut c = Classifier::new(ClassifierKind::Boosted, geometry);

        let mut chain = Chain::default();
        chain.push(DecisionStump::new(negative_feature(), 0.0, 1.0), 0.5, 0.0);
        c.push_chain(chain, Filter::default());

        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 2.0, 0.0);
        c.push_chain(chain, Filter::default());

        // -0.5 from the first chain, +2.0 from the second.
        assert_eq!(c.activation(&p), 1.5);
        assert!(c.is_active_in_last_chain(&p));
    }

    #[test]
    fn cascade_drop_is_permanent() {
        let p = integral_3x3();
        let geometry = PatchGeometry::new(3, 3, 1);
        let mut c = Classifier::new(ClassifierKind::Cascade, geometry);

        let mut chain = Chain::default();
        chain.push(DecisionStump::new(negative_feature(), 0.0, 1.0), 1.0, 0.0);
        c.push_chain(chain, Filter::default());

        // Admission floor the first chain's output (-1) cannot clear.
        let gate = Filter {
            active: true,
            threshold: 0.0,
            less: false,
        };
        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 5.0, 0.0);
        c.push_chain(chain.clone(), gate);

        assert_eq!(c.activation(&p), -1.0);
        assert!(!c.is_active_in_last_chain(&p));

        // Later chains cannot resurrect a dropped example.
        c.push_chain(chain, Filter::default());
        assert_eq!(c.activation(&p), -1.0);
    }

    #[test]
    fn cascade_reset_replaces_activation() {
        let p = integral_3x3();
        let geometry = PatchGeometry::new(3, 3, 1);
        let mut c = Classifier::new(ClassifierKind::Cascade, geometry);

        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 1.0, 0.0);
        c.push_chain(chain, Filter::default());

        let gate = Filter {
            active: true,
            threshold: 0.5,
            less: false,
        };
        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 3.0, 0.0);
        c.push_chain(chain, gate);

        // Passes the gate (1.0 > 0.5), then the cascade resets to 0 before
        // adding the second chain.
        assert_eq!(c.activation(&p), 3.0);
    }

    #[test]
    fn anytime_skips_without_dropping() {
        let p = integral_3x3();
        let geometry = PatchGeometry::new(3, 3, 1);
        let mut c = Classifier::new(ClassifierKind::Anytime, geometry);

        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 1.0, 0.0);
        c.push_chain(chain, Filter::default());

        // Margin gate 1.0 is not < 0.5: chain skipped, example kept.
        let gate = Filter {
            active: true,
            threshold: 0.5,
            less: true,
        };
        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 10.0, 0.0);
        c.push_chain(chain, gate);

        // A later, looser gate still updates it additively.
        let gate = Filter {
            active: true,
            threshold: 2.0,
            less: true,
        };
        let mut chain = Chain::default();
        chain.push(DecisionStump::new(positive_feature(), 0.0, 1.0), 0.25, 0.0);
        c.push_chain(chain, gate);

        assert_eq!(c.activation(&p), 1.25);
        assert!(c.is_active_in_last_chain(&p));
    }
}
