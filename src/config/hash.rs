//! Configuration hashing for change detection.
//!
//! Hashes are stored in the state so a later run can tell whether the stack
//! or a single resource's inputs changed since the last apply.

use sha2::{Digest, Sha256};

use crate::graph::{Inputs, ResourceKind};

use super::spec::StackConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire stack configuration.
    ///
    /// Maps are ordered, so the same stack always hashes the same way.
    #[must_use]
    pub fn hash_config(&self, config: &StackConfig) -> String {
        let mut hasher = Sha256::new();
        match serde_json::to_vec(config) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{config:?}").as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of one resource's declared inputs.
    #[must_use]
    pub fn hash_inputs(&self, kind: ResourceKind, name: &str, inputs: &Inputs) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        match serde_json::to_vec(inputs) {
            Ok(bytes) => hasher.update(&bytes),
            Err(_) => hasher.update(format!("{inputs:?}").as_bytes()),
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

}
