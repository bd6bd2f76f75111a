//! Binary message codecs for the on-disk artifacts.
//!
//! Message fields are fixed-order little-endian scalars inside a
//! length-prefixed record (see [`crate::record`]). Integers round-trip
//! bit-exactly and floats IEEE-exactly.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use anyboost_core::{
    Box2, Chain, Classifier, ClassifierKind, DecisionStump, Feature, Filter, Label, Patch,
    PatchGeometry,
};

use crate::record::{read_record, write_record, Decoder, Encoder};
use crate::{IoError, Result};

const FEATURE_TYPE_HAAR: u8 = 0;

fn encode_label(enc: &mut Encoder, label: &Label) {
    enc.i32(label.x);
    enc.i32(label.y);
    enc.i32(label.w);
    enc.i32(label.h);
    enc.i8(label.label);
}

fn decode_label(dec: &mut Decoder) -> Result<Label> {
    Ok(Label {
        x: dec.i32()?,
        y: dec.i32()?,
        w: dec.i32()?,
        h: dec.i32()?,
        label: dec.i8()?,
    })
}

fn encode_box(enc: &mut Encoder, b: &Box2) {
    enc.u32(b.x0 as u32);
    enc.u32(b.y0 as u32);
    enc.u32(b.x1 as u32);
    enc.u32(b.y1 as u32);
}

fn decode_box(dec: &mut Decoder) -> Result<Box2> {
    Ok(Box2::new(
        dec.u32()? as usize,
        dec.u32()? as usize,
        dec.u32()? as usize,
        dec.u32()? as usize,
    ))
}

fn encode_feature(enc: &mut Encoder, f: &Feature) {
    enc.u8(FEATURE_TYPE_HAAR);
    enc.u32(f.channel as u32);
    encode_box(enc, &f.b0);
    enc.f32(f.w0);
    encode_box(enc, &f.b1);
    enc.f32(f.w1);
}

fn decode_feature(dec: &mut Decoder) -> Result<Feature> {
    let kind = dec.u8()?;
    if kind != FEATURE_TYPE_HAAR {
        return Err(IoError::Parse(format!("unknown feature type {}", kind)));
    }
    let channel = dec.u32()? as usize;
    let b0 = decode_box(dec)?;
    let w0 = dec.f32()?;
    let b1 = decode_box(dec)?;
    let w1 = dec.f32()?;
    Ok(Feature::new(b0, b1, w0, w1, channel))
}

fn encode_stump(enc: &mut Encoder, s: &DecisionStump) {
    encode_feature(enc, &s.feature);
    enc.f32(s.split);
    enc.f32(s.sign);
}

fn decode_stump(dec: &mut Decoder) -> Result<DecisionStump> {
    let feature = decode_feature(dec)?;
    let split = dec.f32()?;
    let sign = dec.f32()?;
    Ok(DecisionStump::new(feature, split, sign))
}

fn encode_filter(enc: &mut Encoder, f: &Filter) {
    enc.f32(f.threshold);
    enc.u8(f.active as u8);
    enc.u8(f.less as u8);
}

fn decode_filter(dec: &mut Decoder) -> Result<Filter> {
    let threshold = dec.f32()?;
    let active = dec.u8()? != 0;
    let less = dec.u8()? != 0;
    Ok(Filter {
        active,
        threshold,
        less,
    })
}

fn encode_chain(enc: &mut Encoder, chain: &Chain) {
    enc.u32(chain.len() as u32);
    for i in 0..chain.len() {
        encode_stump(enc, &chain.stumps[i]);
        enc.f32(chain.weights[i]);
        enc.f32(chain.biases[i]);
    }
}

fn decode_chain(dec: &mut Decoder) -> Result<Chain> {
    let count = dec.u32()? as usize;
    let mut chain = Chain::default();
    for _ in 0..count {
        let stump = decode_stump(dec)?;
        let weight = dec.f32()?;
        let bias = dec.f32()?;
        chain.push(stump, weight, bias);
    }
    Ok(chain)
}

/// Write one patch record.
pub fn write_patch<W: Write>(out: &mut W, patch: &Patch) -> Result<()> {
    let mut enc = Encoder::new();
    enc.u32(patch.width() as u32);
    enc.u32(patch.height() as u32);
    enc.u32(patch.channels() as u32);
    enc.i8(patch.label());
    for &v in patch.data() {
        enc.f32(v);
    }
    write_record(out, &enc.into_payload())
}

/// Read one patch record; `None` at a clean end of stream.
pub fn read_patch<R: Read>(input: &mut R) -> Result<Option<Patch>> {
    let Some(payload) = read_record(input)? else {
        return Ok(None);
    };

    let mut dec = Decoder::new(&payload);
    let width = dec.u32()? as usize;
    let height = dec.u32()? as usize;
    let channels = dec.u32()? as usize;
    let label = dec.i8()?;

    let len = width
        .checked_mul(height)
        .and_then(|v| v.checked_mul(channels))
        .filter(|&v| v <= payload.len() / 4)
        .ok_or_else(|| IoError::Parse("patch dimensions exceed record".into()))?;
    let mut data = Vec::with_capacity(len);
    for _ in 0..len {
        data.push(dec.f32()?);
    }
    dec.finish()?;

    Patch::from_data(label, width, height, channels, data)
        .ok_or_else(|| IoError::Parse("patch data length mismatch".into()))
        .map(Some)
}

/// Write one feature record.
pub fn write_feature<W: Write>(out: &mut W, feature: &Feature) -> Result<()> {
    let mut enc = Encoder::new();
    encode_feature(&mut enc, feature);
    write_record(out, &enc.into_payload())
}

/// Read one feature record, validated against `geometry`; `None` at a clean
/// end of stream.
pub fn read_feature<R: Read>(input: &mut R, geometry: &PatchGeometry) -> Result<Option<Feature>> {
    let Some(payload) = read_record(input)? else {
        return Ok(None);
    };

    let mut dec = Decoder::new(&payload);
    let feature = decode_feature(&mut dec)?;
    dec.finish()?;
    feature.validate(geometry)?;
    Ok(Some(feature))
}

/// Write a classifier as a single record with its geometry embedded.
pub fn write_classifier<W: Write>(out: &mut W, classifier: &Classifier) -> Result<()> {
    let mut enc = Encoder::new();
    enc.u8(match classifier.kind {
        ClassifierKind::Boosted => 0,
        ClassifierKind::Cascade => 1,
        ClassifierKind::Anytime => 2,
    });
    enc.u32(classifier.chains.len() as u32);
    for (chain, filter) in classifier.chains.iter().zip(&classifier.filters) {
        encode_chain(&mut enc, chain);
        encode_filter(&mut enc, filter);
    }
    enc.u32(classifier.geometry.width as u32);
    enc.u32(classifier.geometry.height as u32);
    enc.u32(classifier.geometry.channels as u32);
    write_record(out, &enc.into_payload())
}

/// Read a classifier record, reconciling its embedded geometry against the
/// configured one (default adopts, explicit mismatch fails) and validating
/// every feature against the result.
pub fn read_classifier<R: Read>(input: &mut R, configured: PatchGeometry) -> Result<Classifier> {
    let payload = read_record(input)?
        .ok_or_else(|| IoError::Parse("missing classifier record".into()))?;

    let mut dec = Decoder::new(&payload);
    let kind = match dec.u8()? {
        0 => ClassifierKind::Boosted,
        1 => ClassifierKind::Cascade,
        2 => ClassifierKind::Anytime,
        k => return Err(IoError::Parse(format!("unknown classifier type {}", k))),
    };

    let num_chains = dec.u32()? as usize;
    let mut chains = Vec::with_capacity(num_chains);
    let mut filters = Vec::with_capacity(num_chains);
    for _ in 0..num_chains {
        chains.push(decode_chain(&mut dec)?);
        filters.push(decode_filter(&mut dec)?);
    }

    let embedded = PatchGeometry::new(
        dec.u32()? as usize,
        dec.u32()? as usize,
        dec.u32()? as usize,
    );
    dec.finish()?;

    let geometry = configured.adopt(embedded)?;
    let classifier = Classifier {
        kind,
        chains,
        filters,
        geometry,
    };
    classifier.validate()?;
    Ok(classifier)
}

/// Write a patch sample file: a concatenation of patch records.
pub fn write_patches_to_file<P: AsRef<Path>>(path: P, patches: &[Patch]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for patch in patches {
        write_patch(&mut out, patch)?;
    }
    out.flush()?;
    Ok(())
}

/// Read up to `max_patches` patch records; stops (with a warning) at the
/// first malformed record.
pub fn read_patches_from_file<P: AsRef<Path>>(path: P, max_patches: usize) -> Result<Vec<Patch>> {
    let mut input = BufReader::new(File::open(path)?);
    let mut patches = Vec::new();
    while patches.len() < max_patches {
        match read_patch(&mut input) {
            Ok(Some(p)) => patches.push(p),
            Ok(None) => break,
            Err(e) => {
                log::warn!("stopping patch file read at malformed record: {}", e);
                break;
            }
        }
    }
    Ok(patches)
}

/// Write frames with their object labels: each patch record is followed by a
/// raw `u32` label count and that many label records.
pub fn write_labeled_patches_to_file<P: AsRef<Path>>(
    path: P,
    patches: &[Patch],
    labels: &[Vec<Label>],
) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for (patch, patch_labels) in patches.iter().zip(labels) {
        write_patch(&mut out, patch)?;
        out.write_all(&(patch_labels.len() as u32).to_le_bytes())?;
        for label in patch_labels {
            let mut enc = Encoder::new();
            encode_label(&mut enc, label);
            write_record(&mut out, &enc.into_payload())?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Read frames with their object labels.
pub fn read_labeled_patches_from_file<P: AsRef<Path>>(
    path: P,
    max_patches: usize,
) -> Result<(Vec<Patch>, Vec<Vec<Label>>)> {
    let mut input = BufReader::new(File::open(path)?);
    let mut patches = Vec::new();
    let mut labels = Vec::new();

    while patches.len() < max_patches {
        match read_patch(&mut input)? {
            Some(p) => patches.push(p),
            None => break,
        }

        let mut count_bytes = [0u8; 4];
        input
            .read_exact(&mut count_bytes)
            .map_err(|e| IoError::Parse(format!("missing label count: {}", e)))?;
        let count = u32::from_le_bytes(count_bytes);

        let mut patch_labels = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let payload = read_record(&mut input)?
                .ok_or_else(|| IoError::Parse("missing label record".into()))?;
            let mut dec = Decoder::new(&payload);
            let label = decode_label(&mut dec)?;
            dec.finish()?;
            patch_labels.push(label);
        }
        labels.push(patch_labels);
    }

    Ok((patches, labels))
}

/// Write a feature pool file: a concatenation of feature records.
pub fn write_features_to_file<P: AsRef<Path>>(path: P, features: &[Feature]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for feature in features {
        write_feature(&mut out, feature)?;
    }
    out.flush()?;
    Ok(())
}

/// Read a feature pool file, validating every feature against `geometry`.
pub fn read_features_from_file<P: AsRef<Path>>(
    path: P,
    geometry: &PatchGeometry,
) -> Result<Vec<Feature>> {
    let mut input = BufReader::new(File::open(path)?);
    let mut features = Vec::new();
    while let Some(feature) = read_feature(&mut input, geometry)? {
        features.push(feature);
    }
    Ok(features)
}

/// Write a classifier file.
pub fn write_classifier_to_file<P: AsRef<Path>>(path: P, classifier: &Classifier) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_classifier(&mut out, classifier)?;
    out.flush()?;
    Ok(())
}

/// Read a classifier file, reconciling geometry as in [`read_classifier`].
pub fn read_classifier_from_file<P: AsRef<Path>>(
    path: P,
    configured: PatchGeometry,
) -> Result<Classifier> {
    let mut input = BufReader::new(File::open(path)?);
    read_classifier(&mut input, configured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_record_round_trip() {
        let data: Vec<f32> = (0..4 * 3 * 2).map(|i| i as f32 * 0.5).collect();
        let patch = Patch::from_data(1, 4, 3, 2, data).unwrap();

        let mut buf = Vec::new();
        write_patch(&mut buf, &patch).unwrap();

        let mut input = buf.as_slice();
        let copy = read_patch(&mut input).unwrap().unwrap();
        assert_eq!(copy, patch);
        assert!(read_patch(&mut input).unwrap().is_none());
    }

    #[test]
    fn feature_record_round_trip_and_validation() {
        let geometry = PatchGeometry::new(8, 8, 1);
        let feature = Feature::new(Box2::new(0, 0, 3, 3), Box2::new(2, 2, 6, 7), 1.0, -1.0, 0);

        let mut buf = Vec::new();
        write_feature(&mut buf, &feature).unwrap();
        let copy = read_feature(&mut buf.as_slice(), &geometry).unwrap().unwrap();
        assert_eq!(copy, feature);

        // Same bytes against a smaller geometry: the box is out of range.
        let small = PatchGeometry::new(4, 4, 1);
        assert!(read_feature(&mut buf.as_slice(), &small).is_err());
    }

    #[test]
    fn classifier_record_round_trip() {
        let geometry = PatchGeometry::new(8, 8, 1);
        let mut c = Classifier::new(ClassifierKind::Anytime, geometry);
        let feature = Feature::new(Box2::new(0, 0, 3, 3), Box2::new(2, 2, 6, 7), 1.0, -1.0, 0);
        let mut chain = Chain::default();
        chain.push(DecisionStump::new(feature, 0.25, 1.0), 0.75, -0.125);
        c.push_chain(
            chain,
            Filter {
                active: true,
                threshold: 1.5,
                less: true,
            },
        );
        c.push_chain(Chain::default(), Filter::default());

        let mut buf = Vec::new();
        write_classifier(&mut buf, &c).unwrap();
        let copy = read_classifier(&mut buf.as_slice(), geometry).unwrap();
        assert_eq!(copy, c);
    }

    #[test]
    fn labeled_patch_file_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "anyboost-wire-{}-labeled.patches",
            std::process::id()
        ));

        let frames = vec![
            Patch::from_data(0, 3, 2, 1, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap(),
            Patch::from_data(0, 2, 2, 1, vec![9.0, 8.0, 7.0, 6.0]).unwrap(),
        ];
        let labels = vec![
            vec![Label::new(0, 0, 2, 2, 1), Label::new(1, 0, 2, 2, 1)],
            vec![],
        ];

        write_labeled_patches_to_file(&path, &frames, &labels).unwrap();
        let (read_frames, read_labels) = read_labeled_patches_from_file(&path, 10).unwrap();

        assert_eq!(read_frames, frames);
        assert_eq!(read_labels, labels);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn classifier_geometry_is_adopted_or_rejected() {
        let embedded = PatchGeometry::new(19, 19, 1);
        let c = Classifier::new(ClassifierKind::Boosted, embedded);

        let mut buf = Vec::new();
        write_classifier(&mut buf, &c).unwrap();

        // Default configuration adopts the embedded geometry.
        let adopted = read_classifier(&mut buf.as_slice(), PatchGeometry::DEFAULT).unwrap();
        assert_eq!(adopted.geometry, embedded);

        // An explicit conflicting geometry fails.
        let explicit = PatchGeometry::new(32, 32, 1);
        assert!(read_classifier(&mut buf.as_slice(), explicit).is_err());
    }
}
