use std::path::Path;

use image::{DynamicImage, ImageDecoder};

use crate::media::domain::image_reader::ImageReader;
use crate::shared::frame::Frame;

/// Decodes photos with the `image` crate.
///
/// The format is sniffed from the file contents, and the EXIF orientation
/// is applied so faces are upright for detection.
#[derive(Debug, Default)]
pub struct ImageFileReader;

impl ImageFileReader {
    pub fn new() -> Self {
        Self
    }
}

impl ImageReader for ImageFileReader {
    fn read(&self, path: &Path) -> Result<Frame, Box<dyn std::error::Error>> {
        let mut decoder = image::ImageReader::open(path)?
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut img = DynamicImage::from_decoder(decoder)?;
        img.apply_orientation(orientation);

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(format!("{} has no pixels", path.display()).into());
        }
        Ok(Frame::new(rgb.into_raw(), width, height, 3))
    }
}
