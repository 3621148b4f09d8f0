pub mod embedding;
pub mod embedding_provider;
pub mod identity_resolver;
pub mod identity_store;
pub mod person;
pub mod person_id_generator;
pub mod representative_maintainer;
pub mod write_gate;
