//! Error types for replica-mesh.

use std::time::Duration;

use thiserror::Error;

/// Reasons a peer descriptor from the directory cannot become a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// The descriptor has no usable id.
    #[error("descriptor is missing a peer id")]
    MissingId,

    /// Unrecognised classification label.
    #[error("unknown classification: {0}")]
    UnknownClassification(String),

    /// Unrecognised security level label.
    #[error("unknown security level: {0}")]
    UnknownSecurityLevel(String),

    /// Trust score outside 0..=100.
    #[error("trust score {0} is outside 0..=100")]
    TrustOutOfRange(i64),

    /// Uptime was not a finite number.
    #[error("uptime percent is not a finite number")]
    InvalidUptime,
}

/// Errors returned by a [`Directory`](crate::directory::Directory).
///
/// Both variants are treated as a benign skip by the discovery loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    /// The directory explicitly reported it has nothing to serve right now.
    #[error("directory unavailable")]
    Unavailable,

    /// The directory could not be reached or returned garbage.
    #[error("directory transport error: {0}")]
    Transport(String),
}

/// Errors returned by a [`Prober`](crate::probe::Prober).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The address could not be parsed into something dialable.
    #[error("invalid probe address: {0}")]
    InvalidAddress(String),

    /// The peer could not be reached.
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    /// The probe did not resolve in time.
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read or written.
    #[error("failed to access config file '{path}': {source}")]
    Io {
        /// Path of the config file.
        path: String,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The config could not be parsed.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The local node descriptor is malformed.
    #[error("invalid local node: {0}")]
    LocalNode(#[from] DescriptorError),
}

/// Errors returned by the [`PeerNetworkManager`](crate::service::PeerNetworkManager).
#[derive(Debug, Error)]
pub enum MeshError {
    /// Configuration or strategy error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Descriptor rejected.
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    /// The manager's loops were already started.
    #[error("peer network manager already started")]
    AlreadyStarted,
}

/// Result type for replica-mesh operations.
pub type Result<T> = std::result::Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_error_messages() {
        assert_eq!(
            DescriptorError::MissingId.to_string(),
            "descriptor is missing a peer id"
        );
        assert_eq!(
            DescriptorError::TrustOutOfRange(140).to_string(),
            "trust score 140 is outside 0..=100"
        );
    }

    #[test]
    fn mesh_error_is_transparent_over_sources() {
        let err: MeshError = DescriptorError::UnknownClassification("RESTRICTED".into()).into();
        assert_eq!(err.to_string(), "unknown classification: RESTRICTED");

        let err: MeshError = ConfigError::Invalid("min_replicas must be at least 1".into()).into();
        assert_eq!(err.to_string(), "invalid config: min_replicas must be at least 1");
    }

    #[test]
    fn probe_timeout_message() {
        assert_eq!(
            ProbeError::Timeout(Duration::from_secs(5)).to_string(),
            "probe timed out after 5s"
        );
    }

    #[test]
    fn config_error_wraps_descriptor_error() {
        let err: ConfigError = DescriptorError::MissingId.into();
        assert!(err.to_string().contains("missing a peer id"));
    }
}
