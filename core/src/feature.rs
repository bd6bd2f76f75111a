use rand::Rng;

use crate::geometry::PatchGeometry;
use crate::patch::Patch;
use crate::{Error, Result};

/// Single rectangle for Haar features: upper-left corner `(x0, y0)`,
/// lower-right `(x1, y1)`, inclusive corner coordinates into the integral
/// image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Box2 {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl Box2 {
    pub fn new(x0: usize, y0: usize, x1: usize, y1: usize) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Check corner ordering and bounds against a patch geometry.
    pub fn validate(&self, geometry: &PatchGeometry) -> Result<()> {
        if self.x0 >= self.x1 || self.y0 >= self.y1 || self.x1 >= geometry.width || self.y1 >= geometry.height {
            return Err(Error::InvalidInput(format!(
                "box ({}, {}) -> ({}, {}) out of range for {}x{} patches",
                self.x0, self.y0, self.x1, self.y1, geometry.width, geometry.height
            )));
        }
        Ok(())
    }
}

/// Two-box Haar feature evaluating to `w0 * area(b0) + w1 * area(b1)` on
/// channel `channel` of an integral-transformed patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub b0: Box2,
    pub b1: Box2,
    pub w0: f32,
    pub w1: f32,
    pub channel: usize,
}

impl Feature {
    pub fn new(b0: Box2, b1: Box2, w0: f32, w1: f32, channel: usize) -> Self {
        Self { b0, b1, w0, w1, channel }
    }

    pub fn validate(&self, geometry: &PatchGeometry) -> Result<()> {
        if self.channel >= geometry.channels {
            return Err(Error::InvalidInput(format!(
                "feature channel {} out of range for depth {}",
                self.channel, geometry.channels
            )));
        }
        self.b0.validate(geometry)?;
        self.b1.validate(geometry)
    }

    /// Evaluate on an integral-transformed patch.
    pub fn evaluate(&self, p: &Patch) -> f32 {
        let c = self.channel;
        self.w0
            * ((p.value(self.b0.x0, self.b0.y0, c) + p.value(self.b0.x1, self.b0.y1, c))
                - (p.value(self.b0.x0, self.b0.y1, c) + p.value(self.b0.x1, self.b0.y0, c)))
            + self.w1
                * ((p.value(self.b1.x0, self.b1.y0, c) + p.value(self.b1.x1, self.b1.y1, c))
                    - (p.value(self.b1.x0, self.b1.y1, c) + p.value(self.b1.x1, self.b1.y0, c)))
    }

    /// Generate a pool of random two-box features for the given geometry.
    ///
    /// Boxes span at least two pixels per side; the first weight is 1 and
    /// the second is drawn from {-1, +1}.
    pub fn generate(count: usize, geometry: PatchGeometry, rng: &mut impl Rng) -> Vec<Feature> {
        fn random_box(geometry: PatchGeometry, rng: &mut impl Rng) -> Box2 {
            let x0 = rng.gen_range(0..geometry.width - 2);
            let x1 = x0 + 2 + rng.gen_range(0..geometry.width - x0 - 2);
            let y0 = rng.gen_range(0..geometry.height - 2);
            let y1 = y0 + 2 + rng.gen_range(0..geometry.height - y0 - 2);
            Box2::new(x0, y0, x1, y1)
        }

        (0..count)
            .map(|_| {
                let b0 = random_box(geometry, rng);
                let b1 = random_box(geometry, rng);
                let w1 = if rng.gen_range(0..2) == 0 { -1.0 } else { 1.0 };
                let channel = rng.gen_range(0..geometry.channels);
                Feature::new(b0, b1, 1.0, w1, channel)
            })
            .collect()
    }
}
