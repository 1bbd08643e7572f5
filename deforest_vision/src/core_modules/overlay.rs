// THEORY:
// The overlay renderer is the presentation half of a comparison. It turns an
// abstract `ChangeMask` into something a person can read: the post-change frame
// in gray, with every region of change painted in a color that says how big it
// is.
//
// Key architectural principles:
// 1.  **External regions only**: Each connected blob of change is represented by
//     its outer border. Holes inside a blob are painted with the blob, the same
//     way a filled outline would be.
// 2.  **Area drives severity**: The enclosed polygon area of the border (shoelace
//     formula) is the only input to the `SeverityScale`.
// 3.  **Nothing is dropped silently**: Degenerate borders (single pixels, thin
//     lines) have zero area. They are still reported and still painted, pixel by
//     pixel. An optional floor can keep small regions off the canvas, but they
//     still appear in the region list with `filled = false`.
// 4.  **No error paths**: An empty mask simply has zero regions and the canvas
//     comes back as the gray frame.

use crate::core_modules::change_mask::change_mask::ChangeMask;
use crate::core_modules::severity::{SeverityScale, SeverityTier};
use crate::error::{Result, VisionError};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounds of a region in pixel coordinates (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// One connected region of change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Enclosed area of the outer border polygon.
    pub area: f64,
    pub tier: SeverityTier,
    pub bounds: Bounds,
    /// Whether the region was painted on the overlay.
    pub filled: bool,
    #[serde(skip)]
    border: Vec<Point<i32>>,
}

impl Region {
    pub fn border(&self) -> &[Point<i32>] {
        &self.border
    }
}

/// A rendered comparison: the canvas plus the regions painted on it.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub image: RgbImage,
    pub regions: Vec<Region>,
}

impl Overlay {
    pub fn count_by_tier(&self, tier: SeverityTier) -> usize {
        self.regions.iter().filter(|r| r.tier == tier).count()
    }
}

/// Paints change regions over a frame according to a severity scale.
#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    scale: SeverityScale,
    min_fill_area: Option<f64>,
}

impl OverlayRenderer {
    pub fn new(scale: SeverityScale, min_fill_area: Option<f64>) -> Self {
        Self {
            scale,
            min_fill_area,
        }
    }

    pub fn scale(&self) -> &SeverityScale {
        &self.scale
    }

    /// Extracts and classifies the external regions of `mask`.
    pub fn find_regions(&self, mask: &ChangeMask) -> Vec<Region> {
        if mask.is_empty() || mask.is_clear() {
            return Vec::new();
        }
        // The tracer only sees outer borders that are surrounded by background,
        // so blobs touching the frame edge are traced on a one-pixel margin.
        let contours = find_contours::<i32>(&pad_with_background(&mask.to_luma()));
        contours
            .into_iter()
            .filter(|c| c.border_type == BorderType::Outer && c.parent.is_none())
            .filter(|c| !c.points.is_empty())
            .map(|c| {
                let points: Vec<Point<i32>> =
                    c.points.iter().map(|p| Point::new(p.x - 1, p.y - 1)).collect();
                let area = polygon_area(&points);
                let tier = self.scale.classify(area);
                let filled = self.min_fill_area.is_none_or(|floor| area > floor);
                Region {
                    area,
                    tier,
                    bounds: bounds_of(&points),
                    filled,
                    border: points,
                }
            })
            .collect()
    }

    /// Renders `mask` over `base`. Both must share dimensions.
    pub fn render(&self, base: &GrayImage, mask: &ChangeMask) -> Result<Overlay> {
        if base.dimensions() != mask.dimensions() {
            return Err(VisionError::shape_mismatch(
                base.dimensions(),
                mask.dimensions(),
            ));
        }
        let mut canvas = DynamicImage::ImageLuma8(base.clone()).to_rgb8();
        let regions = self.find_regions(mask);
        for region in regions.iter().filter(|r| r.filled) {
            fill_region(&mut canvas, region, self.scale.color(region.tier));
        }
        Ok(Overlay {
            image: canvas,
            regions,
        })
    }
}

/// Renders with the default scale and no area floor.
pub fn render_overlay(base_image: &GrayImage, change_map: &ChangeMask) -> Result<RgbImage> {
    OverlayRenderer::default()
        .render(base_image, change_map)
        .map(|overlay| overlay.image)
}

/// Shoelace area of a closed polygon given by its vertices.
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

fn pad_with_background(luma: &GrayImage) -> GrayImage {
    let (w, h) = luma.dimensions();
    let mut padded = GrayImage::new(w + 2, h + 2);
    image::imageops::replace(&mut padded, luma, 1, 1);
    padded
}

fn bounds_of(points: &[Point<i32>]) -> Bounds {
    let mut b = Bounds {
        x0: u32::MAX,
        y0: u32::MAX,
        x1: 0,
        y1: 0,
    };
    for p in points {
        let (x, y) = (p.x.max(0) as u32, p.y.max(0) as u32);
        b.x0 = b.x0.min(x);
        b.y0 = b.y0.min(y);
        b.x1 = b.x1.max(x);
        b.y1 = b.y1.max(y);
    }
    b
}

fn fill_region(canvas: &mut RgbImage, region: &Region, color: Rgb<u8>) {
    let border = region.border();

    // The polygon filler refuses closed rings and empty input.
    let mut ring: Vec<Point<i32>> = border.to_vec();
    ring.dedup();
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    if region.area > 0.0 && ring.len() >= 3 {
        draw_polygon_mut(canvas, &ring, color);
    }

    // Border pixels belong to the region too; this also covers zero-area shapes.
    let (w, h) = canvas.dimensions();
    for p in border {
        if p.x >= 0 && p.y >= 0 && (p.x as u32) < w && (p.y as u32) < h {
            canvas.put_pixel(p.x as u32, p.y as u32, color);
        }
    }
}
