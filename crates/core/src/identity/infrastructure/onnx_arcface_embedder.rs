/// ArcFace embedding provider using ONNX Runtime.
///
/// Produces L2-normalized identity vectors (512-d for the bundled model)
/// from face crops of any size.
use std::path::Path;
use std::sync::Mutex;

use crate::identity::domain::embedding::{l2_normalize, Embedding};
use crate::identity::domain::embedding_provider::EmbeddingProvider;
use crate::shared::frame::Frame;

const INPUT_SIZE: usize = 112;
const NORM_MEAN: f32 = 127.5;
const NORM_STD: f32 = 127.5;

pub struct OnnxArcFaceEmbedder {
    session: Mutex<ort::session::Session>,
}

impl OnnxArcFaceEmbedder {
    pub fn new(model_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let intra_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let session = ort::session::Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_inter_threads(1)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl EmbeddingProvider for OnnxArcFaceEmbedder {
    fn embed(&self, face: &Frame) -> Result<Embedding, Box<dyn std::error::Error>> {
        if face.width() == 0 || face.height() == 0 {
            return Err("Empty face crop".into());
        }
        let tensor = preprocess(face);
        let input_value = ort::value::Tensor::from_array(tensor)?;
        let mut session = self
            .session
            .lock()
            .map_err(|e| format!("Lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs![input_value])?;
        let embedding_array = outputs[0].try_extract_array::<f32>()?;
        let mut embedding = embedding_array
            .as_slice()
            .ok_or("Cannot get embedding slice")?
            .to_vec();

        if embedding.iter().any(|x| !x.is_finite()) {
            return Err("Embedding model produced non-finite values".into());
        }
        l2_normalize(&mut embedding);
        Ok(embedding)
    }
}

/// Nearest-neighbor resize to 112x112, scale to [-1, 1], NCHW layout.
fn preprocess(face: &Frame) -> ndarray::Array4<f32> {
    let src_w = face.width() as usize;
    let src_h = face.height() as usize;
    let src = face.as_ndarray();

    let mut tensor = ndarray::Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for y in 0..INPUT_SIZE {
        let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize).min(src_h - 1);
        for x in 0..INPUT_SIZE {
            let src_x =
                (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize).min(src_w - 1);
            for c in 0..3 {
                tensor[[0, c, y, x]] = (src[[src_y, src_x, c]] as f32 - NORM_MEAN) / NORM_STD;
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::new(vec![value; (width * height * 3) as usize], width, height, 3)
    }

    #[test]
    fn test_preprocess_shape() {
        let tensor = preprocess(&solid(50, 70, 128));
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        assert_relative_eq!(preprocess(&solid(10, 10, 255))[[0, 0, 0, 0]], 1.0, epsilon = 0.01);
        assert_relative_eq!(preprocess(&solid(10, 10, 0))[[0, 2, 111, 111]], -1.0, epsilon = 0.01);
        let mid = (127.0 - 127.5) / 127.5;
        assert_relative_eq!(preprocess(&solid(10, 10, 127))[[0, 1, 5, 5]], mid, epsilon = 0.01);
    }

    #[test]
    fn test_preprocess_samples_channels_in_order() {
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[255, 0, 128]);
        }
        let tensor = preprocess(&Frame::new(data, 2, 2, 3));
        assert!(tensor[[0, 0, 60, 60]] > 0.99);
        assert!(tensor[[0, 1, 60, 60]] < -0.99);
        assert!(tensor[[0, 2, 60, 60]].abs() < 0.01);
    }
}
