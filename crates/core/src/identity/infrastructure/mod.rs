pub mod in_memory_identity_store;
pub mod json_file_identity_store;
pub mod onnx_arcface_embedder;
