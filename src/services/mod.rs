// src/services/mod.rs
pub mod bundler;
pub mod gateway;
pub mod image_codec;

pub use bundler::Bundler;
pub use gateway::{GeminiGateway, GenerationGateway};
