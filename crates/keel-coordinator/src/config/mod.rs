//! Coordinator configuration and cluster manifests.

pub mod loader;
pub mod types;

pub use loader::ManifestLoader;
pub use types::*;
