//! Train, serialize, reload and detect: the full pipeline on synthetic data.

use std::path::PathBuf;

use rand::SeedableRng;

use anyboost::boost::{train_boosted, DataSource};
use anyboost::core::{Classifier, ClassifierKind, DetectOptions, Feature, Patch, PatchGeometry, SampleOptions, TrainOptions};
use anyboost::detect::Detector;

const GEOMETRY: PatchGeometry = PatchGeometry {
    width: 4,
    height: 4,
    channels: 1,
};

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("anyboost-e2e-{}-{}", std::process::id(), name))
}

fn flat_patch(label: i8, value: f32) -> Patch {
    let mut p = Patch::with_geometry(label, GEOMETRY);
    p.fill(value);
    p
}

#[test]
fn train_save_load_detect() {
    anyboost::init_thread_pool(Some(2)).unwrap();

    let pos = temp_file("pos.patches");
    let neg = temp_file("neg.patches");
    let model = temp_file("model.classifier");

    let positives: Vec<Patch> = (0..30).map(|i| flat_patch(1, 1.0 + (i % 3) as f32 * 0.125)).collect();
    let negatives: Vec<Patch> = (0..30).map(|i| flat_patch(-1, (i % 3) as f32 * 0.03125)).collect();
    anyboost::io::write_patches_to_file(&pos, &positives).unwrap();
    anyboost::io::write_patches_to_file(&neg, &negatives).unwrap();

    // Train a small boosted model.
    let sample_options = SampleOptions {
        max_read_attempts: 10,
        num_positives_to_sample: 30,
        num_negatives_to_sample: 30,
    };
    let mut data =
        DataSource::new(vec![pos.clone()], vec![neg.clone()], GEOMETRY, sample_options).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(9);
    let features = Feature::generate(64, GEOMETRY, &mut rng);

    let train_options = TrainOptions {
        num_stages: 3,
        stage_increment: 3,
        max_positives: 20,
        max_negatives: 20,
        ..TrainOptions::default()
    };
    let mut classifier = Classifier::new(ClassifierKind::Boosted, data.geometry());
    train_boosted(&mut data, &features, &train_options, &mut classifier).unwrap();

    // Round-trip through the on-disk record; the default geometry adopts
    // the embedded 4x4x1.
    anyboost::io::write_classifier_to_file(&model, &classifier).unwrap();
    let loaded = anyboost::io::read_classifier_from_file(&model, PatchGeometry::DEFAULT).unwrap();
    assert_eq!(loaded, classifier);
    assert_eq!(loaded.geometry, GEOMETRY);

    // A dark frame with one bright block: only windows touching the block
    // can look positive.
    let mut frame = Patch::new(0, 16, 12, 1);
    for y in 4..8 {
        for x in 6..10 {
            frame.set_value(x, y, 0, 1.0);
        }
    }

    let detect_options = DetectOptions {
        initial_scale: Some(1.0),
        num_scales: 1,
        detection_threshold: 0.0,
        merging_overlap: 0.2,
        ..DetectOptions::default()
    };
    let detector = Detector::new(&loaded, detect_options);
    let detections = detector.compute_detections(&frame);

    assert!(!detections.is_empty());
    for d in &detections {
        assert_eq!((d.w, d.h), (4, 4));
        // Every detection intersects the bright block.
        assert!(d.x < 10 && d.x + d.w > 6);
        assert!(d.y < 8 && d.y + d.h > 4);
    }

    std::fs::remove_file(pos).ok();
    std::fs::remove_file(neg).ok();
    std::fs::remove_file(model).ok();
}
