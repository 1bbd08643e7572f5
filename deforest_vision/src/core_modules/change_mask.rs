// THEORY:
// The `ChangeMask` is the "dumb" data container at the center of the engine. It
// holds one boolean per pixel: `true` where two frames disagree about what is
// foreground, `false` elsewhere.
//
// Key architectural principles:
// 1.  **Semantic, not encoded**: Image libraries speak in 0/255 or 0/1 bytes. The
//     mask speaks in booleans. Conversion happens only at the boundary
//     (`from_luma` / `to_luma`) so no caller depends on a pixel encoding.
// 2.  **Immutable once derived**: A mask is produced by a comparison and then only
//     read. There are no setters; combining masks yields a new mask.
// 3.  **Self-measuring**: The "percent changed" metric is a property of the mask
//     alone (fraction of set cells), so it lives here.

pub mod change_mask {
    use crate::error::{Result, VisionError};
    use image::{GrayImage, Luma};

    /// The 8-bit value written for set cells when a mask crosses into image space.
    pub const FOREGROUND: u8 = 255;

    /// A boolean grid with the same dimensions as the frames it was derived from.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ChangeMask {
        width: u32,
        height: u32,
        cells: Vec<bool>,
    }

    impl ChangeMask {
        /// An all-clear mask.
        pub fn empty(width: u32, height: u32) -> Self {
            Self {
                width,
                height,
                cells: vec![false; (width as usize) * (height as usize)],
            }
        }

        /// Builds a mask from any grayscale image; every non-zero pixel is set.
        pub fn from_luma(image: &GrayImage) -> Self {
            let (width, height) = image.dimensions();
            let cells = image.pixels().map(|p| p.0[0] != 0).collect();
            Self {
                width,
                height,
                cells,
            }
        }

        /// Builds a mask by applying `predicate` to every pixel intensity.
        pub fn from_predicate(image: &GrayImage, predicate: impl Fn(u8) -> bool) -> Self {
            let (width, height) = image.dimensions();
            let cells = image.pixels().map(|p| predicate(p.0[0])).collect();
            Self {
                width,
                height,
                cells,
            }
        }

        /// Encodes the mask as 0 / `FOREGROUND` for library calls.
        pub fn to_luma(&self) -> GrayImage {
            GrayImage::from_fn(self.width, self.height, |x, y| {
                if self.get(x, y) {
                    Luma([FOREGROUND])
                } else {
                    Luma([0])
                }
            })
        }

        /// Cell-wise exclusive-or. Fails with `ShapeMismatch` on differing dimensions.
        pub fn xor(&self, other: &ChangeMask) -> Result<ChangeMask> {
            if self.dimensions() != other.dimensions() {
                return Err(VisionError::shape_mismatch(
                    self.dimensions(),
                    other.dimensions(),
                ));
            }
            let cells = self
                .cells
                .iter()
                .zip(other.cells.iter())
                .map(|(a, b)| a ^ b)
                .collect();
            Ok(ChangeMask {
                width: self.width,
                height: self.height,
                cells,
            })
        }

        pub fn dimensions(&self) -> (u32, u32) {
            (self.width, self.height)
        }

        pub fn width(&self) -> u32 {
            self.width
        }

        pub fn height(&self) -> u32 {
            self.height
        }

        /// Out-of-bounds coordinates read as clear.
        pub fn get(&self, x: u32, y: u32) -> bool {
            if x >= self.width || y >= self.height {
                return false;
            }
            self.cells[(y as usize) * (self.width as usize) + x as usize]
        }

        pub fn len(&self) -> usize {
            self.cells.len()
        }

        pub fn is_empty(&self) -> bool {
            self.cells.is_empty()
        }

        /// Number of set cells.
        pub fn changed_count(&self) -> usize {
            self.cells.iter().filter(|&&c| c).count()
        }

        pub fn is_clear(&self) -> bool {
            !self.cells.iter().any(|&c| c)
        }

        /// Share of set cells as a percentage, rounded to 2 decimals.
        /// A zero-sized mask reports 0.00.
        pub fn percent_changed(&self) -> f64 {
            if self.cells.is_empty() {
                return 0.0;
            }
            round2(self.changed_count() as f64 / self.cells.len() as f64 * 100.0)
        }
    }

    /// Rounds to two decimal places.
    pub fn round2(value: f64) -> f64 {
        (value * 100.0).round() / 100.0
    }
}
