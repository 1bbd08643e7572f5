pub mod image_helper {
    use crate::error::{Result, VisionError};
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, GrayImage, ImageEncoder, RgbImage};
    use std::io::Write;
    use std::path::Path;

    fn encode(buffer: &[u8], width: u32, height: u32, color: ExtendedColorType) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(buffer, width, height, color)
            .map_err(|e| VisionError::Encode {
                message: e.to_string(),
            })?;
        Ok(out)
    }

    pub fn encode_rgb_png(image: &RgbImage) -> Result<Vec<u8>> {
        encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::Rgb8)
    }

    pub fn encode_gray_png(image: &GrayImage) -> Result<Vec<u8>> {
        encode(image.as_raw(), image.width(), image.height(), ExtendedColorType::L8)
    }

    fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        let mut output = std::fs::File::create(path).map_err(|e| VisionError::io(path, e))?;
        output.write_all(bytes).map_err(|e| VisionError::io(path, e))
    }

    pub fn save_rgb_png(image: &RgbImage, path: &Path) -> Result<()> {
        write_file(path, &encode_rgb_png(image)?)
    }

    pub fn save_gray_png(image: &GrayImage, path: &Path) -> Result<()> {
        write_file(path, &encode_gray_png(image)?)
    }
}

#[cfg(test)]
mod tests {

    use super::image_helper::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn rgb_png_round_trips_through_decoder() {
        let mut img = RgbImage::from_pixel(6, 4, Rgb([255, 60, 60]));
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        let bytes = encode_rgb_png(&img).expect("Error encoding PNG.");
        assert_eq!(&bytes[1..4], b"PNG");

        let decoded = image::load_from_memory(&bytes).unwrap().to_rgb8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn save_gradient_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gradient_file.png");
        let img = GrayImage::from_fn(64, 8, |x, _| Luma([(x * 4) as u8]));

        save_gray_png(&img, &path).expect("Error Saving File.");

        let loaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(loaded.get_pixel(63, 0).0[0], 252);
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let img = GrayImage::new(2, 2);
        let result = save_gray_png(&img, std::path::Path::new("/no/such/dir/out.png"));
        assert!(result.is_err());
    }
}
