use ndarray::ArrayView3;

use crate::shared::face_box::FaceBox;

/// A decoded photo or face crop: contiguous RGB bytes in row-major order.
///
/// Format conversion happens at I/O boundaries only; detection and
/// embedding code treats pixel data as opaque.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, channels: u8) -> Self {
        debug_assert_eq!(
            data.len(),
            (width as usize) * (height as usize) * (channels as usize),
            "data length must equal width * height * channels"
        );
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn as_ndarray(&self) -> ArrayView3<'_, u8> {
        ArrayView3::from_shape(self.shape(), &self.data)
            .expect("Frame data length must match dimensions")
    }

    /// Copies the pixels inside `face` (clamped to the frame) into a new frame.
    ///
    /// Returns `None` when the clamped box is empty.
    pub fn crop(&self, face: &FaceBox) -> Option<Frame> {
        let x1 = face.x1.min(self.width) as usize;
        let y1 = face.y1.min(self.height) as usize;
        let x2 = face.x2.min(self.width) as usize;
        let y2 = face.y2.min(self.height) as usize;
        if x1 >= x2 || y1 >= y2 {
            return None;
        }

        let crop_w = x2 - x1;
        let crop_h = y2 - y1;
        let channels = self.channels as usize;
        let row_len = self.width as usize * channels;

        let mut data = Vec::with_capacity(crop_w * crop_h * channels);
        for row in y1..y2 {
            let start = row * row_len + x1 * channels;
            data.extend_from_slice(&self.data[start..start + crop_w * channels]);
        }

        Some(Frame::new(data, crop_w as u32, crop_h as u32, self.channels))
    }

    fn shape(&self) -> (usize, usize, usize) {
        (
            self.height as usize,
            self.width as usize,
            self.channels as usize,
        )
    }
}
