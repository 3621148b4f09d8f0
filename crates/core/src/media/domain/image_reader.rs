use std::path::Path;

use crate::shared::frame::Frame;

/// Decodes a photo file into an RGB frame.
pub trait ImageReader: Send {
    fn read(&self, path: &Path) -> Result<Frame, Box<dyn std::error::Error>>;
}
