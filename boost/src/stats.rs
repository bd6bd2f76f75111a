//! Prediction statistics: replay a trained classifier stump by stump over
//! an evaluation set, streaming per-iteration losses as CSV and optionally
//! an ROC curve at a chosen iteration.

use std::io::Write;

use anyboost_core::{exp_loss, zero_one_loss, Classifier, Patch};

/// Advance the replayed activations by stump `stump_index` of chain
/// `chain_index`, honoring the classifier's gating policy. `updated` tracks
/// which patches the current chain admitted (and, under a permanent policy,
/// which are still alive).
pub fn update_single_stump(
    patches: &[Patch],
    classifier: &Classifier,
    chain_index: usize,
    stump_index: usize,
    activations: &mut [f32],
    updated: &mut [bool],
) {
    let use_margin = classifier.kind.filters_use_margin();
    let additive = classifier.kind.filters_are_additive();
    let permanent = classifier.kind.filters_are_permanent();

    let chain = &classifier.chains[chain_index];
    let filter = &classifier.filters[chain_index];

    for (i, patch) in patches.iter().enumerate() {
        if permanent && !updated[i] {
            continue;
        }

        if stump_index == 0 {
            let gate = if use_margin {
                activations[i].abs()
            } else {
                activations[i]
            };
            if filter.passes(gate) {
                updated[i] = true;
                if filter.active && !additive {
                    activations[i] = 0.0;
                }
            } else {
                updated[i] = false;
            }
        }

        if updated[i] {
            let response = chain.stumps[stump_index].evaluate(patch);
            activations[i] += chain.weights[stump_index] * response;
        }
    }
}

/// Write an ROC curve as `fp_rate,tp_rate` lines, swept from the highest
/// activation downward (ascending false-positive rate) and subsampled every
/// 100 patches.
pub fn write_roc<W: Write + ?Sized>(
    out: &mut W,
    patches: &[Patch],
    activations: &[f32],
) -> std::io::Result<()> {
    let mut sortable: Vec<(f32, i8)> = patches
        .iter()
        .zip(activations)
        .map(|(p, &a)| (a, p.label()))
        .collect();
    sortable.sort_by(|a, b| a.0.total_cmp(&b.0));

    let positives = sortable.iter().filter(|&&(_, l)| l > 0).count() as f32;
    let negatives = sortable.len() as f32 - positives;
    if positives == 0.0 || negatives == 0.0 {
        return Ok(());
    }

    let mut true_positives = 0.0f32;
    let mut false_positives = 0.0f32;

    writeln!(out, "0,0")?;
    for p in (0..sortable.len()).rev() {
        if sortable[p].1 > 0 {
            true_positives += 1.0;
        } else {
            false_positives += 1.0;
        }

        if p + 1 < sortable.len() && sortable[p].0 == sortable[p + 1].0 {
            continue;
        }

        if p % 100 == 0 {
            writeln!(
                out,
                "{},{}",
                false_positives / negatives,
                true_positives / positives
            )?;
        }
    }
    Ok(())
}

/// Replay `classifier` over `patches`, writing one CSV row per stump with
/// the losses, the active filter threshold, the updated fraction and the
/// running average features-per-example. Optionally emits an ROC curve
/// after the chain at `roc_iteration`.
pub fn generate_statistics<W: Write>(
    out: &mut W,
    patches: &[Patch],
    classifier: &Classifier,
    mut roc: Option<(&mut dyn Write, usize)>,
) -> std::io::Result<()> {
    let mut activations = vec![0.0f32; patches.len()];
    let mut updated = vec![true; patches.len()];

    let mut average_features = 0.0f32;

    let exp = exp_loss(patches, None, &activations);
    let zero_one = zero_one_loss(patches, None, &activations);
    log::info!(
        "initial: exp loss {:.6}, 0/1 loss {:.6}, + err {:.6}, - err {:.6}",
        exp,
        zero_one.total,
        zero_one.positive,
        zero_one.negative
    );

    writeln!(out, "iteration,exploss,error,pos_error,neg_error,threshold,updated,avgfeat")?;
    writeln!(
        out,
        "0,{},{},{},{},0,1,{}",
        exp, zero_one.total, zero_one.positive, zero_one.negative, average_features
    )?;

    for chain_index in 0..classifier.chains.len() {
        let chain = &classifier.chains[chain_index];
        let filter = &classifier.filters[chain_index];

        for stump_index in 0..chain.len() {
            update_single_stump(
                patches,
                classifier,
                chain_index,
                stump_index,
                &mut activations,
                &mut updated,
            );

            let exp = exp_loss(patches, None, &activations);
            let zero_one = zero_one_loss(patches, None, &activations);
            let update_count = updated.iter().filter(|&&u| u).count();
            let updated_fraction = update_count as f32 / patches.len().max(1) as f32;
            average_features += updated_fraction;

            writeln!(
                out,
                "{},{},{},{},{},{},{},{}",
                chain_index,
                exp,
                zero_one.total,
                zero_one.positive,
                zero_one.negative,
                filter.threshold,
                updated_fraction,
                average_features
            )?;
        }

        if let Some((roc_out, roc_iteration)) = roc.as_mut() {
            if chain_index == *roc_iteration {
                write_roc(&mut **roc_out, patches, &activations)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyboost_core::{
        Box2, Chain, Classifier, ClassifierKind, DecisionStump, Feature, Filter, PatchGeometry,
    };

    fn probe_patch(label: i8, v: f32) -> Patch {
        let mut p = Patch::from_data(label, 2, 2, 1, vec![0.0, 0.0, 0.0, v]).unwrap();
        p.compute_integral_image();
        p
    }

    fn probe_stump(split: f32) -> DecisionStump {
        let b = Box2::new(0, 0, 1, 1);
        DecisionStump::new(Feature::new(b, b, 1.0, 0.0, 0), split, 1.0)
    }

    fn separating_classifier() -> Classifier {
        let mut c = Classifier::new(ClassifierKind::Boosted, PatchGeometry::new(2, 2, 1));
        let mut chain = Chain::default();
        chain.push(probe_stump(0.0), 1.0, 0.0);
        c.push_chain(chain, Filter::default());
        c
    }

    #[test]
    fn replay_matches_direct_activation() {
        let patches = vec![probe_patch(1, 3.0), probe_patch(-1, -2.0)];
        let classifier = separating_classifier();

        let mut activations = vec![0.0; 2];
        let mut updated = vec![true; 2];
        update_single_stump(&patches, &classifier, 0, 0, &mut activations, &mut updated);

        for (p, &a) in patches.iter().zip(&activations) {
            assert_eq!(a, classifier.activation(p));
        }
    }

    #[test]
    fn csv_has_header_and_one_row_per_stump() {
        let patches = vec![probe_patch(1, 3.0), probe_patch(-1, -2.0)];
        let classifier = separating_classifier();

        let mut csv = Vec::new();
        generate_statistics(&mut csv, &patches, &classifier, None).unwrap();

        let text = String::from_utf8(csv).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "iteration,exploss,error,pos_error,neg_error,threshold,updated,avgfeat"
        );
        // Header + initial row + one row for the single stump.
        assert_eq!(lines.len(), 3);
        for line in &lines[1..] {
            assert_eq!(line.split(',').count(), 8);
        }
    }

    #[test]
    fn roc_starts_at_origin_and_is_normalised() {
        let patches = vec![
            probe_patch(1, 1.0),
            probe_patch(1, 2.0),
            probe_patch(-1, -1.0),
            probe_patch(-1, -2.0),
        ];
        let activations = vec![1.0, 2.0, -1.0, -2.0];

        let mut roc = Vec::new();
        write_roc(&mut roc, &patches, &activations).unwrap();
        let text = String::from_utf8(roc).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "0,0");
        for line in &lines[1..] {
            let mut parts = line.split(',');
            let fp: f32 = parts.next().unwrap().parse().unwrap();
            let tp: f32 = parts.next().unwrap().parse().unwrap();
            assert!((0.0..=1.0).contains(&fp));
            assert!((0.0..=1.0).contains(&tp));
        }
    }
}
