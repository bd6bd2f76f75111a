use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{Rng, SeedableRng};

use anyboost::boost::FeatureSelector;
use anyboost::core::{Classifier, ClassifierKind, DetectOptions, Feature, Patch, PatchGeometry};
use anyboost::detect::Detector;

fn random_patch(rng: &mut impl Rng, label: i8, geometry: PatchGeometry) -> Patch {
    let data = (0..geometry.len()).map(|_| rng.gen::<f32>()).collect();
    let mut p =
        Patch::from_data(label, geometry.width, geometry.height, geometry.channels, data)
            .expect("buffer matches geometry");
    p.compute_integral_image();
    p
}

fn bench_integral_image(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(1);
    let geometry = PatchGeometry::new(512, 512, 1);
    let data: Vec<f32> = (0..geometry.len()).map(|_| rng.gen()).collect();
    let template = Patch::from_data(0, 512, 512, 1, data).expect("buffer matches geometry");

    c.bench_function("integral_image_512", |b| {
        b.iter(|| {
            let mut p = template.clone();
            p.compute_integral_image();
            black_box(p);
        })
    });
}

fn bench_feature_selection(c: &mut Criterion) {
    anyboost::init_thread_pool(None).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(2);
    let geometry = PatchGeometry::new(24, 24, 1);

    let patches: Vec<Patch> = (0..400)
        .map(|i| random_patch(&mut rng, if i % 2 == 0 { 1 } else { -1 }, geometry))
        .collect();
    let features = Feature::generate(500, geometry, &mut rng);
    let selector = FeatureSelector::new(&patches, &features);
    let weights = vec![1.0f32; patches.len()];

    c.bench_function("select_feature_500x400", |b| {
        b.iter(|| black_box(selector.select_feature(&weights)))
    });
}

fn bench_single_scale_sweep(c: &mut Criterion) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let geometry = PatchGeometry::new(24, 24, 1);

    let patches: Vec<Patch> = (0..200)
        .map(|i| random_patch(&mut rng, if i % 2 == 0 { 1 } else { -1 }, geometry))
        .collect();
    let features = Feature::generate(200, geometry, &mut rng);
    let selector = FeatureSelector::new(&patches, &features);

    let mut classifier = Classifier::new(ClassifierKind::Boosted, geometry);
    classifier.push_chain(Default::default(), Default::default());
    for _ in 0..20 {
        let selection = selector.select_feature(&vec![1.0; patches.len()]);
        classifier.chains[0].push(selection.stump, 1.0, 0.0);
    }

    let frame_data: Vec<f32> = (0..320 * 240).map(|_| rng.gen()).collect();
    let frame = Patch::from_data(0, 320, 240, 1, frame_data).expect("buffer matches geometry");

    let options = DetectOptions {
        initial_scale: Some(1.0),
        num_scales: 1,
        ..DetectOptions::default()
    };

    c.bench_function("detector_320x240_20_stumps", |b| {
        let detector = Detector::new(&classifier, options);
        b.iter(|| black_box(detector.compute_activation_pyramid(&frame)))
    });
}

criterion_group!(
    benches,
    bench_integral_image,
    bench_feature_selection,
    bench_single_scale_sweep
);
criterion_main!(benches);
