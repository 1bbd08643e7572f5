// THEORY:
// The `ChangeDetector` is the engine of the comparison layer. Given two frames of
// the same place taken at different times, it decides which pixels changed their
// foreground/background classification.
//
// Key architectural principles & algorithm steps:
// 1.  **Per-image normalization**: Each frame is normalized on its own before any
//     comparison. Acquisition dates differ in illumination, so a shared cutoff or
//     raw subtraction would mostly measure the sun, not the forest.
// 2.  **Smoothing**: A Gaussian with a fixed 5x5 support suppresses sensor noise.
//     Sigma is derived from the support size, which for 5 taps is the binomial
//     [1, 4, 6, 4, 1] / 16. Borders mirror without repeating the edge sample.
//     The only tunable is the kernel side.
// 3.  **Adaptive binarization**: Otsu's level is computed per smoothed frame and
//     pixels strictly brighter than it become foreground.
// 4.  **Closing**: A disk closing (dilate, then erode) fills small gaps and pits
//     so that the comparison reflects structure rather than pixel jitter.
// 5.  **Disagreement**: The exclusive-or of the two normalized masks is the
//     change map. XOR is commutative, so the detector is symmetric.
// 6.  **Stateless Utility**: The detector holds only its configuration and the
//     precomputed kernel. It has no memory of previous pairs.

pub mod change_detector {
    use crate::config::DetectorConfig;
    use crate::core_modules::change_mask::change_mask::ChangeMask;
    use crate::error::{Result, VisionError};
    use image::{GrayImage, Luma};
    use imageproc::contrast::otsu_level;
    use imageproc::distance_transform::Norm;
    use imageproc::morphology::close;

    /// Compares frames with a fixed normalization recipe.
    #[derive(Debug, Clone)]
    pub struct ChangeDetector {
        config: DetectorConfig,
        kernel: Vec<f32>,
    }

    impl Default for ChangeDetector {
        fn default() -> Self {
            let config = DetectorConfig::default();
            let kernel = gaussian_kernel(config.blur_kernel_size);
            Self { config, kernel }
        }
    }

    impl ChangeDetector {
        pub fn new(config: DetectorConfig) -> Result<Self> {
            let k = config.blur_kernel_size;
            if k == 0 || k % 2 == 0 {
                return Err(VisionError::invalid_config("detector.blur_kernel_size", k));
            }
            let kernel = gaussian_kernel(k);
            Ok(Self { config, kernel })
        }

        pub fn config(&self) -> &DetectorConfig {
            &self.config
        }

        /// Smooths, binarizes and closes a single frame.
        pub fn normalize(&self, image: &GrayImage) -> ChangeMask {
            let blurred = separable_blur(image, &self.kernel);
            let level = otsu_level(&blurred);
            let binary = ChangeMask::from_predicate(&blurred, |v| v > level);

            if self.config.closing_radius == 0 || binary.is_empty() {
                return binary;
            }
            let closed = close(&binary.to_luma(), Norm::L2, self.config.closing_radius);
            ChangeMask::from_luma(&closed)
        }

        /// The change map between two frames of identical dimensions.
        pub fn detect(&self, earlier: &GrayImage, later: &GrayImage) -> Result<ChangeMask> {
            if earlier.dimensions() != later.dimensions() {
                return Err(VisionError::shape_mismatch(
                    earlier.dimensions(),
                    later.dimensions(),
                ));
            }
            let a = self.normalize(earlier);
            let b = self.normalize(later);
            a.xor(&b)
        }
    }

    /// Compares two frames with the default detector configuration.
    pub fn detect_change(image_a: &GrayImage, image_b: &GrayImage) -> Result<ChangeMask> {
        ChangeDetector::default().detect(image_a, image_b)
    }

    /// Binomial weights used for small supports when sigma is derived from the size.
    const SMALL_KERNELS: [&[f32]; 4] = [
        &[1.0],
        &[0.25, 0.5, 0.25],
        &[0.0625, 0.25, 0.375, 0.25, 0.0625],
        &[0.03125, 0.109375, 0.21875, 0.28125, 0.21875, 0.109375, 0.03125],
    ];

    /// Normalized 1-D Gaussian weights for an odd support `size`.
    ///
    /// Supports up to 7 taps use the fixed binomial table; wider ones sample a
    /// Gaussian with sigma derived from the size.
    pub fn gaussian_kernel(size: u32) -> Vec<f32> {
        let size = size.max(1);
        if size % 2 == 1 && size <= 7 {
            return SMALL_KERNELS[(size / 2) as usize].to_vec();
        }
        let sigma = 0.3 * ((size as f64 - 1.0) * 0.5 - 1.0) + 0.8;
        let center = (size / 2) as f64;
        let weights: Vec<f64> = (0..size)
            .map(|i| {
                let d = i as f64 - center;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
            .collect();
        let sum: f64 = weights.iter().sum();
        weights.iter().map(|w| (w / sum) as f32).collect()
    }

    /// Mirror index without repeating the edge sample (`dcb|abcd|cba`).
    fn reflect_101(index: i64, len: i64) -> usize {
        if len <= 1 {
            return 0;
        }
        let period = 2 * (len - 1);
        let mut m = index.rem_euclid(period);
        if m >= len {
            m = period - m;
        }
        m as usize
    }

    /// Separable convolution with the same kernel along both axes.
    fn separable_blur(image: &GrayImage, kernel: &[f32]) -> GrayImage {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return image.clone();
        }
        let (w, h) = (width as usize, height as usize);
        let radius = (kernel.len() / 2) as i64;
        let raw = image.as_raw();

        // --- Horizontal pass ---
        let mut horizontal = vec![0.0f32; w * h];
        for y in 0..h {
            let row = &raw[y * w..(y + 1) * w];
            for x in 0..w {
                let mut acc = 0.0f32;
                for (k, weight) in kernel.iter().enumerate() {
                    let sx = reflect_101(x as i64 + k as i64 - radius, w as i64);
                    acc += row[sx] as f32 * weight;
                }
                horizontal[y * w + x] = acc;
            }
        }

        // --- Vertical pass ---
        GrayImage::from_fn(width, height, |x, y| {
            let mut acc = 0.0f32;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect_101(y as i64 + k as i64 - radius, h as i64);
                acc += horizontal[sy * w + x as usize] * weight;
            }
            Luma([acc.round().clamp(0.0, 255.0) as u8])
        })
    }

    #[cfg(test)]
    pub(crate) fn blur_for_tests(image: &GrayImage, kernel: &[f32]) -> GrayImage {
        separable_blur(image, kernel)
    }
}
