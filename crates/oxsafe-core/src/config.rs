//! Engine configuration.
//!
//! All fields have defaults so an empty (or missing) `[engine]` table is
//! valid. Front ends deserialize this from their own config files.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::kdf::MIN_HASH_ITERATIONS;
use crate::fs::TruncationPolicy;

/// Default V3 key-stretch work factor for new files.
pub const DEFAULT_HASH_ITERATIONS: u32 = MIN_HASH_ITERATIONS;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("hash_iterations must be at least {minimum}, got {actual}")]
    IterationsTooLow { actual: u32, minimum: u32 },
}

/// Which lock backend a [`LockManager`](crate::lock::LockManager) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockBackendKind {
    /// OS advisory lock held on an open handle; released if the holder dies.
    #[default]
    Handle,
    /// Create-exclusive marker file; the file's existence is the lock.
    Marker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// V3 key-stretch iterations for newly written files.
    pub hash_iterations: u32,
    pub lock_backend: LockBackendKind,
    /// Allow oversized fields to be cut down into caller buffers.
    pub truncate_oversized_reads: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hash_iterations: DEFAULT_HASH_ITERATIONS,
            lock_backend: LockBackendKind::default(),
            truncate_oversized_reads: false,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hash_iterations < MIN_HASH_ITERATIONS {
            return Err(ConfigError::IterationsTooLow {
                actual: self.hash_iterations,
                minimum: MIN_HASH_ITERATIONS,
            });
        }
        Ok(())
    }

    pub fn truncation_policy(&self) -> TruncationPolicy {
        if self.truncate_oversized_reads {
            TruncationPolicy::Truncate
        } else {
            TruncationPolicy::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.truncation_policy(), TruncationPolicy::Reject);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"lock_backend":"marker"}"#).unwrap();
        assert_eq!(config.lock_backend, LockBackendKind::Marker);
        assert_eq!(config.hash_iterations, DEFAULT_HASH_ITERATIONS);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<EngineConfig>(r#"{"iterations":5}"#).is_err());
    }

    #[test]
    fn test_low_iterations_rejected() {
        let config = EngineConfig {
            hash_iterations: 100,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::IterationsTooLow {
                actual: 100,
                minimum: MIN_HASH_ITERATIONS
            })
        );
    }

    #[test]
    fn test_truncation_flag() {
        let config = EngineConfig {
            truncate_oversized_reads: true,
            ..EngineConfig::default()
        };
        assert_eq!(config.truncation_policy(), TruncationPolicy::Truncate);
    }
}
