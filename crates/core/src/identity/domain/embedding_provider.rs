use crate::identity::domain::embedding::Embedding;
use crate::shared::frame::Frame;

/// Domain interface for turning a face crop into an identity embedding.
///
/// Every call in one deployment returns the same dimension. An `Err` means
/// "no embedding for this face"; callers skip the face rather than abort.
pub trait EmbeddingProvider: Send {
    fn embed(&self, face: &Frame) -> Result<Embedding, Box<dyn std::error::Error>>;
}
