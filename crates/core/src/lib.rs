pub mod admin;
pub mod config;
pub mod detection;
pub mod folders;
pub mod identity;
pub mod media;
pub mod pipeline;
pub mod shared;
