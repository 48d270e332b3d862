//! Manifest file loading.

use super::types::ClusterManifest;
use crate::CoordinatorError;
use log::debug;
use std::path::Path;

pub struct ManifestLoader;

impl ManifestLoader {
    /// Load and validate a manifest.
    /// JSON (.json) and YAML (.yaml/.yml) are chosen by extension; anything else
    /// is tried as JSON, then YAML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ClusterManifest, CoordinatorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CoordinatorError::from_io_error(e, "manifest loading"))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let manifest: ClusterManifest = match extension.to_lowercase().as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|e| CoordinatorError::from_parse_error(e, "JSON manifest parsing"))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| CoordinatorError::from_parse_error(e, "YAML manifest parsing"))?,
            _ => serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| {
                    CoordinatorError::from_parse_error(
                        e,
                        "manifest parsing (tried both JSON and YAML)",
                    )
                })?,
        };

        manifest.validate()?;
        debug!(
            "Loaded manifest from {} with {} topics and {} groups",
            path.display(),
            manifest.topics.len(),
            manifest.groups.len()
        );
        Ok(manifest)
    }
}
