pub mod chunk;
pub mod embedding;
pub mod engine;
pub mod index;
pub mod scoring;
