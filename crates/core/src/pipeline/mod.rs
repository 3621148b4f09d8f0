pub mod identity_engine;
pub mod organize_photos_use_case;
