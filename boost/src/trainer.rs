//! Training loops: a shared stage driver plus the boosted (optionally
//! anytime) and cascade orchestrators.

use anyboost_core::{
    compute_prediction_bias, exp_loss, gradient, weak_learner_weight, zero_one_loss, Chain,
    Classifier, ClassifierKind, Feature, Filter, Patch, TrainOptions,
};
use anyboost_core::{Error, Result};

use crate::data::DataSource;
use crate::selector::FeatureSelector;

struct StageParams {
    max_stages: usize,
    /// Seed activations and gradients from the classifier built so far
    /// instead of starting from zero (boosted outer loop).
    calc_weights: bool,
    /// Stop early once the calibrated operating point beats the target
    /// rates (cascade stages).
    use_rates: bool,
    false_negative_rate: f32,
    false_positive_rate: f32,
    anytime: bool,
}

fn report_losses(
    what: &str,
    patches: &[Patch],
    sample_weights: Option<&[f32]>,
    activations: &[f32],
) {
    let exp = exp_loss(patches, sample_weights, activations);
    let zero_one = zero_one_loss(patches, sample_weights, activations);
    log::info!(
        "{}: exp loss {:.6}, 0/1 loss {:.6}, + err {:.6}, - err {:.6}",
        what,
        exp,
        zero_one.total,
        zero_one.positive,
        zero_one.negative
    );
}

/// Run up to `params.max_stages` selection iterations, appending stumps to
/// the classifier's last chain (and, for anytime training, activating its
/// filter and opening a fresh chain per iteration).
fn train_stages(
    patches: &[Patch],
    sample_weights: Option<&[f32]>,
    features: &[Feature],
    params: &StageParams,
    options: &TrainOptions,
    validation: &[Patch],
    classifier: &mut Classifier,
) -> Result<()> {
    let selector = FeatureSelector::new(patches, features);

    let mut weights = vec![1.0f32; patches.len()];
    let mut activations = vec![0.0f32; patches.len()];
    let mut validation_activations = vec![0.0f32; validation.len()];

    // Boosted training keeps refining one model across data reloads, so the
    // gradient picks up where the classifier left off.
    if params.calc_weights {
        for (a, p) in activations.iter_mut().zip(patches) {
            *a = classifier.activation(p);
        }
        gradient(patches, sample_weights, &activations, &mut weights);
    }

    report_losses("initial training", patches, sample_weights, &activations);

    for iteration in 0..params.max_stages {
        let (stump, filter, index, err) = if params.anytime {
            let joint =
                selector.select_feature_and_threshold(&weights, &activations, &options.buckets);
            let filter = Filter {
                active: joint.threshold.is_finite(),
                threshold: joint.threshold,
                less: true,
            };
            (joint.stump, filter, joint.index, joint.err)
        } else {
            let selection = selector.select_feature(&weights);
            (selection.stump, Filter::default(), selection.index, selection.err)
        };

        let alpha = weak_learner_weight(err);
        let (bias, fpr) = compute_prediction_bias(
            validation,
            &validation_activations,
            params.false_negative_rate,
        );

        let chain = classifier
            .chains
            .last_mut()
            .ok_or_else(|| Error::InvalidInput("classifier has no open chain".into()))?;
        chain.push(stump, alpha, bias);

        if params.anytime {
            // The fresh filter gates the chain just closed; selection
            // continues into a new, ungated chain.
            let slot = classifier
                .filters
                .last_mut()
                .ok_or_else(|| Error::InvalidInput("chains and filters are misaligned".into()))?;
            *slot = filter;
            classifier.push_chain(Chain::default(), Filter::default());
        }

        selector.update_activations(&stump, &filter, index, alpha, &mut activations);
        gradient(patches, sample_weights, &activations, &mut weights);

        log::info!(
            "iteration {}: err {:.6}, alpha {:.6}, filter {}",
            iteration,
            err,
            alpha,
            if filter.active {
                format!("|a| < {:.6}", filter.threshold)
            } else {
                "inactive".into()
            }
        );
        report_losses("training", patches, sample_weights, &activations);

        for (a, p) in validation_activations.iter_mut().zip(validation) {
            *a = classifier.activation(p);
        }
        report_losses("validation", validation, None, &validation_activations);
        log::info!(
            "to achieve + err of {:.6}: - err = {:.6}, bias = {:.6}",
            params.false_negative_rate,
            fpr,
            bias
        );

        if params.use_rates && fpr < params.false_positive_rate {
            log::info!(
                "target rates ({}, {}) achieved, stopping stage",
                params.false_negative_rate,
                params.false_positive_rate
            );
            break;
        }
    }

    Ok(())
}

/// Train a boosted classifier, or a SpeedBoost anytime classifier when
/// `options.anytime_boost` is set. Training data is reloaded from `data`
/// every `options.stage_increment` stages.
pub fn train_boosted(
    data: &mut DataSource,
    features: &[Feature],
    options: &TrainOptions,
    classifier: &mut Classifier,
) -> Result<()> {
    if options.anytime_boost {
        classifier.kind = ClassifierKind::Anytime;
    }

    classifier.push_chain(Chain::default(), Filter::default());

    let mut patches = Vec::new();
    let mut sample_weights = Vec::new();
    let mut validation = Vec::new();

    let increment = options.stage_increment.max(1);
    let mut stage = 0;
    while stage < options.num_stages {
        log::info!("stage {}", stage);

        patches.clear();
        sample_weights.clear();
        validation.clear();

        let (num_positive, num_negative) = if options.sample_patches {
            data.get_patches_sampled(
                options.max_positives + options.max_negatives,
                classifier,
                &mut sample_weights,
                &mut patches,
            );
            let positives = patches.iter().filter(|p| p.label() > 0).count();
            (positives, patches.len() - positives)
        } else {
            (
                data.get_positive_patches(options.max_positives, &mut patches),
                data.get_negative_patches(options.max_negatives, &mut patches),
            )
        };

        log::info!(
            "loaded {} positive and {} negative patches",
            num_positive,
            num_negative
        );
        if num_positive == 0 || num_negative == 0 {
            return Err(Error::EmptyCohort(
                "positive or negative patches unavailable".into(),
            ));
        }

        let positive_validation = data.get_positive_patches(options.max_positives, &mut validation);
        let negative_validation = data.get_negative_patches(options.max_negatives, &mut validation);
        log::info!(
            "loaded {} positive and {} negative validation patches",
            positive_validation,
            negative_validation
        );

        let params = StageParams {
            max_stages: increment,
            calc_weights: true,
            use_rates: false,
            false_negative_rate: 0.0,
            false_positive_rate: 0.0,
            anytime: options.anytime_boost,
        };
        let sample_weights = if options.sample_patches {
            Some(sample_weights.as_slice())
        } else {
            None
        };
        train_stages(
            &patches,
            sample_weights,
            features,
            &params,
            options,
            &validation,
            classifier,
        )?;

        stage += increment;
    }

    if options.anytime_boost {
        // Drop the trailing empty chain opened by the last iteration.
        classifier.chains.pop();
        classifier.filters.pop();
    }

    Ok(())
}

/// Train a cascade: each stage is its own boosted classifier fed only the
/// survivors of earlier stages, with its admission floor taken from the
/// previous stage's calibration bias.
pub fn train_cascade(
    data: &mut DataSource,
    features: &[Feature],
    options: &TrainOptions,
    classifier: &mut Classifier,
) -> Result<()> {
    classifier.kind = ClassifierKind::Cascade;

    let mut patches = Vec::new();
    let mut validation = Vec::new();

    for stage in 0..options.num_stages {
        log::info!("cascade stage {}", stage);

        patches.clear();
        validation.clear();

        let filter = if stage > 0 {
            let prior = &classifier.chains[stage - 1];
            Filter {
                active: true,
                threshold: *prior
                    .biases
                    .last()
                    .ok_or_else(|| Error::InvalidInput("empty cascade stage".into()))?,
                less: false,
            }
        } else {
            Filter::default()
        };
        classifier.push_chain(Chain::default(), filter);

        let num_positive =
            data.get_positive_patches_active(options.max_positives, classifier, &mut patches);
        let num_negative =
            data.get_negative_patches_active(options.max_negatives, classifier, &mut patches);
        log::info!(
            "loaded {} positive and {} negative surviving patches",
            num_positive,
            num_negative
        );

        data.get_positive_patches_active(options.max_positives, classifier, &mut validation);
        data.get_negative_patches_active(options.max_negatives, classifier, &mut validation);

        if num_positive == 0 || num_negative == 0 {
            log::info!("no surviving patches to train on, stopping cascade");
            classifier.chains.pop();
            classifier.filters.pop();
            break;
        }

        let params = StageParams {
            max_stages: options.max_inner_stages,
            calc_weights: false,
            use_rates: true,
            false_negative_rate: options.target_false_negative,
            false_positive_rate: options.target_false_positive_base
                - stage as f32 * options.target_false_positive_step,
            anytime: false,
        };
        train_stages(
            &patches,
            None,
            features,
            &params,
            options,
            &validation,
            classifier,
        )?;
    }

    Ok(())
}
