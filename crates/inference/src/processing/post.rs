use common::span;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer, images::Image};
use image::{GrayImage, RgbImage, RgbaImage};
use ndarray::ArrayViewD;

/// Converts the model's foreground prediction into an 8-bit alpha mask at the
/// original image resolution.
pub struct MaskPostProcessor {
    pub apply_sigmoid: bool,
    resizer: Resizer,
}

impl MaskPostProcessor {
    pub fn new(apply_sigmoid: bool) -> Self {
        Self {
            apply_sigmoid,
            resizer: Resizer::new(),
        }
    }

    /// `mask` may carry leading batch/channel dims; only the first `h x w`
    /// plane is used. With `threshold` set the mask is binarized.
    #[tracing::instrument(skip(self, mask))]
    pub fn to_alpha(
        &mut self,
        mask: &ArrayViewD<f32>,
        orig_width: u32,
        orig_height: u32,
        threshold: Option<f32>,
    ) -> anyhow::Result<GrayImage> {
        let (mask_width, mask_height, levels) = self.quantize(mask)?;

        let mut alpha = self.resize(levels, mask_width, mask_height, orig_width, orig_height)?;

        if let Some(threshold) = threshold {
            apply_threshold(&mut alpha, threshold);
        }

        GrayImage::from_raw(orig_width, orig_height, alpha)
            .ok_or_else(|| anyhow::anyhow!("Failed to create alpha mask buffer"))
    }

    /// Probability plane to 0..=255, truncating like a float-to-byte tensor cast.
    fn quantize(&self, mask: &ArrayViewD<f32>) -> anyhow::Result<(u32, u32, Vec<u8>)> {
        let _s = span!("quantize_mask");

        let shape = mask.shape();
        if shape.len() < 2 {
            anyhow::bail!("Mask tensor must have at least 2 dims, got shape {:?}", shape);
        }
        let height = shape[shape.len() - 2];
        let width = shape[shape.len() - 1];
        let plane = width * height;
        if plane == 0 {
            anyhow::bail!("Mask tensor has an empty plane: shape {:?}", shape);
        }

        let levels: Vec<u8> = mask
            .iter()
            .take(plane)
            .map(|&v| {
                let p = if self.apply_sigmoid { sigmoid(v) } else { v };
                (p.clamp(0.0, 1.0) * 255.0) as u8
            })
            .collect();

        if levels.len() != plane {
            anyhow::bail!(
                "Mask size mismatch: expected {} values, got {}",
                plane,
                levels.len()
            );
        }

        Ok((width as u32, height as u32, levels))
    }

    fn resize(
        &mut self,
        levels: Vec<u8>,
        width: u32,
        height: u32,
        orig_width: u32,
        orig_height: u32,
    ) -> anyhow::Result<Vec<u8>> {
        let _s = span!("resize_mask");

        if (width, height) == (orig_width, orig_height) {
            return Ok(levels);
        }

        let src = Image::from_vec_u8(width, height, levels, PixelType::U8)?;
        let mut dst = Image::new(orig_width, orig_height, PixelType::U8);

        self.resizer.resize(
            &src,
            &mut dst,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        Ok(dst.into_vec())
    }
}

impl Default for MaskPostProcessor {
    fn default() -> Self {
        Self::new(true)
    }
}

fn apply_threshold(alpha: &mut [u8], threshold: f32) {
    let cutoff = threshold * 255.0;
    for p in alpha.iter_mut() {
        *p = if *p as f32 >= cutoff { 255 } else { 0 };
    }
}

/// Attach `alpha` to `rgb` as its alpha channel.
pub fn compose_rgba(rgb: &RgbImage, alpha: &GrayImage) -> anyhow::Result<RgbaImage> {
    if rgb.dimensions() != alpha.dimensions() {
        anyhow::bail!(
            "Alpha mask is {:?} but image is {:?}",
            alpha.dimensions(),
            rgb.dimensions()
        );
    }

    let mut out = RgbaImage::new(rgb.width(), rgb.height());
    for ((dst, src), a) in out.pixels_mut().zip(rgb.pixels()).zip(alpha.pixels()) {
        *dst = image::Rgba([src[0], src[1], src[2], a[0]]);
    }
    Ok(out)
}

/// Sigmoid activation function
#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};
    use ndarray::{Array, IxDyn};

    fn logits(height: usize, width: usize, value: f32) -> Array<f32, IxDyn> {
        Array::from_elem(IxDyn(&[1, 1, height, width]), value)
    }

    #[test]
    fn test_sigmoid() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-6);
        assert!(sigmoid(10.0) > 0.9999);
        assert!(sigmoid(-10.0) < 0.0001);
    }

    #[test]
    fn test_zero_logit_truncates_to_127() {
        let mask = logits(4, 4, 0.0);
        let mut post = MaskPostProcessor::default();

        let alpha = post.to_alpha(&mask.view(), 4, 4, None).unwrap();

        // 0.5 * 255 = 127.5 truncates to 127
        assert!(alpha.pixels().all(|p| p[0] == 127));
    }

    #[test]
    fn test_mask_is_resized_to_original_resolution() {
        let mask = logits(8, 8, 20.0);
        let mut post = MaskPostProcessor::default();

        let alpha = post.to_alpha(&mask.view(), 30, 17, None).unwrap();

        assert_eq!(alpha.dimensions(), (30, 17));
        assert!(alpha.pixels().all(|p| p[0] >= 254));
    }

    #[test]
    fn test_threshold_binarizes_mask() {
        // sigmoid(0) -> 127
        let mask = logits(2, 2, 0.0);
        let mut post = MaskPostProcessor::default();

        let below = post.to_alpha(&mask.view(), 2, 2, Some(0.5)).unwrap();
        assert!(below.pixels().all(|p| p[0] == 0), "127 < 127.5 is cut");

        let above = post.to_alpha(&mask.view(), 2, 2, Some(0.4)).unwrap();
        assert!(above.pixels().all(|p| p[0] == 255), "127 >= 102 is kept");
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        let mut alpha = vec![0u8, 254, 255];
        apply_threshold(&mut alpha, 1.0);
        assert_eq!(alpha, vec![0, 0, 255]);

        let mut alpha = vec![0u8, 1];
        apply_threshold(&mut alpha, 0.0);
        assert_eq!(alpha, vec![255, 255]);
    }

    #[test]
    fn test_probabilities_pass_through_without_sigmoid() {
        let mask = Array::from_shape_vec(IxDyn(&[1, 1, 1, 4]), vec![-0.5, 0.0, 0.5, 1.5]).unwrap();
        let mut post = MaskPostProcessor::new(false);

        let alpha = post.to_alpha(&mask.view(), 4, 1, None).unwrap();

        assert_eq!(alpha.as_raw(), &vec![0, 0, 127, 255]);
    }

    #[test]
    fn test_only_first_plane_is_used() {
        // Two channels: first all high, second all low.
        let mut data = vec![10.0f32; 4];
        data.extend(vec![-10.0f32; 4]);
        let mask = Array::from_shape_vec(IxDyn(&[1, 2, 2, 2]), data).unwrap();
        let mut post = MaskPostProcessor::default();

        let alpha = post.to_alpha(&mask.view(), 2, 2, None).unwrap();

        assert!(alpha.pixels().all(|p| p[0] == 255));
    }

    #[test]
    fn test_invalid_mask_shapes_are_rejected() {
        let mut post = MaskPostProcessor::default();

        let flat = Array::from_elem(IxDyn(&[16]), 0.0f32);
        assert!(post.to_alpha(&flat.view(), 4, 4, None).is_err());

        let empty = Array::from_elem(IxDyn(&[1, 1, 0, 4]), 0.0f32);
        assert!(post.to_alpha(&empty.view(), 4, 4, None).is_err());
    }

    #[test]
    fn test_compose_rgba_copies_rgb_and_alpha() {
        let rgb = RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]));
        let alpha = GrayImage::from_pixel(3, 2, Luma([77]));

        let out = compose_rgba(&rgb, &alpha).unwrap();

        assert_eq!(out.dimensions(), (3, 2));
        assert!(out.pixels().all(|p| p.0 == [10, 20, 30, 77]));
    }

    #[test]
    fn test_compose_rgba_rejects_mismatched_sizes() {
        let rgb = RgbImage::new(3, 2);
        let alpha = GrayImage::new(2, 3);

        assert!(compose_rgba(&rgb, &alpha).is_err());
    }
}
