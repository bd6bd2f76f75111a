use crate::geometry::PatchGeometry;

/// Labeled rectangle inside a frame: top-left `(x, y)`, size `w` x `h`.
///
/// Used both for marking object locations in training frames and for
/// reporting detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
    pub label: i8,
}

impl Label {
    pub fn new(x: i32, y: i32, w: i32, h: i32, label: i8) -> Self {
        Self { x, y, w, h, label }
    }
}

/// An image patch or an entire frame: `width * height * channels` floats in
/// channel-major layout, with a class label (`> 0` positive, otherwise
/// negative).
///
/// A patch stores either raw pixel values or, after
/// [`Patch::compute_integral_image`], per-channel inclusive 2D prefix sums.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    label: i8,
    width: usize,
    height: usize,
    channels: usize,
    pub(crate) data: Vec<f32>,
}

impl Patch {
    pub fn new(label: i8, width: usize, height: usize, channels: usize) -> Self {
        Self {
            label,
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    pub fn with_geometry(label: i8, geometry: PatchGeometry) -> Self {
        Self::new(label, geometry.width, geometry.height, geometry.channels)
    }

    /// Build a patch from an existing channel-major buffer.
    ///
    /// Returns `None` if the buffer length does not match the dimensions.
    pub fn from_data(label: i8, width: usize, height: usize, channels: usize, data: Vec<f32>) -> Option<Self> {
        if data.len() != width * height * channels {
            return None;
        }
        Some(Self {
            label,
            width,
            height,
            channels,
            data,
        })
    }

    #[inline]
    pub fn value(&self, x: usize, y: usize, c: usize) -> f32 {
        self.data[c * self.width * self.height + y * self.width + x]
    }

    #[inline]
    pub fn set_value(&mut self, x: usize, y: usize, c: usize, v: f32) {
        self.data[c * self.width * self.height + y * self.width + x] = v;
    }

    pub fn label(&self) -> i8 {
        self.label
    }

    pub fn set_label(&mut self, label: i8) {
        self.label = label;
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn geometry(&self) -> PatchGeometry {
        PatchGeometry::new(self.width, self.height, self.channels)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn fill(&mut self, v: f32) {
        self.data.fill(v);
    }

    /// Replace the stored values with the per-channel integral image.
    ///
    /// Afterwards `value(x, y, c)` holds the sum of the original values over
    /// all `(x', y')` with `x' <= x` and `y' <= y`.
    pub fn compute_integral_image(&mut self) {
        for c in 0..self.channels {
            for y in 0..self.height {
                let mut row_total = 0.0;
                for x in 0..self.width {
                    let above = if y > 0 { self.value(x, y - 1, c) } else { 0.0 };
                    row_total += self.value(x, y, c);
                    self.set_value(x, y, c, row_total + above);
                }
            }
        }
    }

    /// Extract the rectangle described by `label` into `dst`, rescaling when
    /// the sizes differ: box-filter averaging when shrinking in both
    /// dimensions, bilinear interpolation otherwise.
    pub fn extract_label(&self, label: &Label, dst: &mut Patch) {
        assert_eq!(self.channels, dst.channels);

        if label.w as usize == dst.width && label.h as usize == dst.height {
            for y in 0..dst.height {
                for x in 0..dst.width {
                    for c in 0..self.channels {
                        let v = self.value(x + label.x as usize, y + label.y as usize, c);
                        dst.set_value(x, y, c, v);
                    }
                }
            }
        } else if label.w as usize > dst.width && label.h as usize > dst.height {
            self.extract_label_area(label, dst);
        } else {
            self.extract_label_interp(label, dst);
        }
    }

    /// Box-filter downsampling: squash x into a temporary buffer, then y,
    /// distributing each source row/column between the two straddled
    /// destination cells, and divide by the scaled area.
    fn extract_label_area(&self, label: &Label, dst: &mut Patch) {
        let lw = label.w as usize;
        let lh = label.h as usize;
        let pw = dst.width;
        let ph = dst.height;
        let x0 = label.x as usize;
        let y0 = label.y as usize;
        let xscale = lw as f32 / pw as f32;
        let yscale = lh as f32 / ph as f32;

        let mut buf = Patch::new(0, pw, lh, self.channels);

        let mut rem = 0.0;
        let mut px = 0;
        for x in 0..lw {
            if rem + 1.0 < xscale {
                for y in 0..lh {
                    for c in 0..self.channels {
                        let v = buf.value(px, y, c) + self.value(x + x0, y + y0, c);
                        buf.set_value(px, y, c, v);
                    }
                }
                rem += 1.0;
            } else {
                let alpha = xscale - rem;
                for y in 0..lh {
                    for c in 0..self.channels {
                        let v = buf.value(px, y, c) + alpha * self.value(x + x0, y + y0, c);
                        buf.set_value(px, y, c, v);
                    }
                }
                if px < pw - 1 {
                    for y in 0..lh {
                        for c in 0..self.channels {
                            buf.set_value(px + 1, y, c, (1.0 - alpha) * self.value(x + x0, y + y0, c));
                        }
                    }
                }
                // Rounding in `rem` must not push the write head past the
                // last destination column.
                px = (px + 1).min(pw - 1);
                rem = 1.0 - alpha;
            }
        }

        dst.fill(0.0);

        let mut rem = 0.0;
        let mut py = 0;
        for y in 0..lh {
            if rem + 1.0 < yscale {
                for x in 0..pw {
                    for c in 0..self.channels {
                        let v = dst.value(x, py, c) + buf.value(x, y, c);
                        dst.set_value(x, py, c, v);
                    }
                }
                rem += 1.0;
            } else {
                let alpha = yscale - rem;
                for x in 0..pw {
                    for c in 0..self.channels {
                        let v = dst.value(x, py, c) + alpha * buf.value(x, y, c);
                        dst.set_value(x, py, c, v);
                    }
                }
                if py < ph - 1 {
                    for x in 0..pw {
                        for c in 0..self.channels {
                            dst.set_value(x, py + 1, c, (1.0 - alpha) * buf.value(x, y, c));
                        }
                    }
                }
                py = (py + 1).min(ph - 1);
                rem = 1.0 - alpha;
            }
        }

        for v in dst.data.iter_mut() {
            *v /= xscale * yscale;
        }
    }

    /// Centre-of-pixel bilinear sampling, clamped to the source bounds.
    fn extract_label_interp(&self, label: &Label, dst: &mut Patch) {
        let xscale = label.w as f32 / dst.width as f32;
        let yscale = label.h as f32 / dst.height as f32;
        let x0 = label.x as f32;
        let y0 = label.y as f32;

        for y in 0..dst.height {
            for x in 0..dst.width {
                let ix = (x as f32 + 0.5) * xscale;
                let iy = (y as f32 + 0.5) * yscale;
                let xa = ((ix + x0 - 0.5).floor().max(0.0) as usize).min(self.width - 1);
                let ya = ((iy + y0 - 0.5).floor().max(0.0) as usize).min(self.height - 1);
                let xb = ((ix + x0 - 0.5).ceil().max(0.0) as usize).min(self.width - 1);
                let yb = ((iy + y0 - 0.5).ceil().max(0.0) as usize).min(self.height - 1);

                let fx = if xb > xa {
                    (ix + x0 - 0.5 - xa as f32) / (xb - xa) as f32
                } else {
                    1.0
                };
                let fy = if yb > ya {
                    (iy + y0 - 0.5 - ya as f32) / (yb - ya) as f32
                } else {
                    1.0
                };

                for c in 0..self.channels {
                    let lo = (1.0 - fy) * self.value(xa, ya, c) + fy * self.value(xa, yb, c);
                    let hi = (1.0 - fy) * self.value(xb, ya, c) + fy * self.value(xb, yb, c);
                    dst.set_value(x, y, c, (1.0 - fx) * lo + fx * hi);
                }
            }
        }
    }

    /// Nearest-neighbour rescaling, used for aligning activation maps back
    /// to frame size.
    pub fn extract_label_nearest(&self, label: &Label, dst: &mut Patch) {
        assert_eq!(self.channels, dst.channels);

        let xscale = label.w as f32 / dst.width as f32;
        let yscale = label.h as f32 / dst.height as f32;

        for y in 0..dst.height {
            for x in 0..dst.width {
                let xn = (((x as f32 + 0.5) * xscale + label.x as f32) as usize).min(self.width - 1);
                let yn = (((y as f32 + 0.5) * yscale + label.y as f32) as usize).min(self.height - 1);
                for c in 0..self.channels {
                    dst.set_value(x, y, c, self.value(xn, yn, c));
                }
            }
        }
    }

    /// Extract every `geometry`-sized window with `step` pixels between
    /// adjacent top-left corners, integral-transformed and paired with its
    /// location label.
    pub fn generate_all_patches(
        &self,
        geometry: PatchGeometry,
        step: usize,
    ) -> (Vec<Label>, Vec<Patch>) {
        let mut labels = Vec::new();
        let mut patches = Vec::new();

        let step = step.max(1);
        if self.width < geometry.width || self.height < geometry.height {
            return (labels, patches);
        }

        for y in (0..=self.height - geometry.height).step_by(step) {
            for x in (0..=self.width - geometry.width).step_by(step) {
                let l = Label::new(x as i32, y as i32, geometry.width as i32, geometry.height as i32, 0);
                let mut p = Patch::with_geometry(0, geometry);
                self.extract_label(&l, &mut p);
                p.compute_integral_image();

                labels.push(l);
                patches.push(p);
            }
        }

        (labels, patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch_3x3() -> Patch {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        Patch::from_data(1, 3, 3, 1, data).unwrap()
    }

    #[test]
    fn integral_of_three_by_three() {
        let mut p = patch_3x3();
        p.compute_integral_image();

        let expected = [1.0, 3.0, 6.0, 5.0, 12.0, 21.0, 12.0, 27.0, 45.0];
        assert_eq!(p.data(), &expected);
    }

    #[test]
    fn integral_matches_brute_force_per_channel() {
        let mut original = Patch::new(0, 10, 10, 2);
        let mut v = 0.0;
        for x in 0..10 {
            for y in 0..10 {
                original.set_value(x, y, 0, v);
                original.set_value(x, y, 1, 2.0 * v);
                v += 1.0;
            }
        }

        let mut integral = original.clone();
        integral.compute_integral_image();

        for x in 0..10 {
            for y in 0..10 {
                let mut sum0 = 0.0;
                let mut sum1 = 0.0;
                for i in 0..=x {
                    for j in 0..=y {
                        sum0 += original.value(i, j, 0);
                        sum1 += original.value(i, j, 1);
                    }
                }
                assert_eq!(integral.value(x, y, 0), sum0);
                assert_eq!(integral.value(x, y, 1), sum1);
            }
        }
    }

    #[test]
    fn extract_same_size_copies() {
        let p = patch_3x3();
        let mut dst = Patch::new(0, 2, 2, 1);
        p.extract_label(&Label::new(1, 1, 2, 2, 0), &mut dst);
        assert_eq!(dst.data(), &[5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn area_downsample_preserves_constant_images() {
        let mut src = Patch::new(0, 3, 3, 1);
        src.fill(1.0);
        let mut dst = Patch::new(0, 2, 2, 1);
        src.extract_label(&Label::new(0, 0, 3, 3, 0), &mut dst);
        for &v in dst.data() {
            assert!((v - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn area_downsample_averages_blocks() {
        let data = vec![1.0, 1.0, 3.0, 3.0, 1.0, 1.0, 3.0, 3.0, 5.0, 5.0, 7.0, 7.0, 5.0, 5.0, 7.0, 7.0];
        let src = Patch::from_data(0, 4, 4, 1, data).unwrap();
        let mut dst = Patch::new(0, 2, 2, 1);
        src.extract_label(&Label::new(0, 0, 4, 4, 0), &mut dst);
        assert_eq!(dst.data(), &[1.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn nearest_upsample_replicates_pixels() {
        let src = Patch::from_data(0, 2, 2, 1, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut dst = Patch::new(0, 4, 4, 1);
        src.extract_label_nearest(&Label::new(0, 0, 2, 2, 0), &mut dst);

        assert_eq!(dst.value(0, 0, 0), 1.0);
        assert_eq!(dst.value(1, 1, 0), 1.0);
        assert_eq!(dst.value(2, 0, 0), 2.0);
        assert_eq!(dst.value(3, 3, 0), 4.0);
        assert_eq!(dst.value(0, 3, 0), 3.0);
    }

    #[test]
    fn generate_all_patches_covers_grid() {
        let mut frame = Patch::new(0, 6, 5, 1);
        frame.fill(1.0);
        let geom = PatchGeometry::new(3, 3, 1);
        let (labels, patches) = frame.generate_all_patches(geom, 1);

        assert_eq!(labels.len(), 4 * 3);
        assert_eq!(patches.len(), labels.len());
        // Every extracted window is integral-transformed: its bottom-right
        // value is the window sum.
        for p in &patches {
            assert_eq!(p.value(2, 2, 0), 9.0);
        }
    }
}
