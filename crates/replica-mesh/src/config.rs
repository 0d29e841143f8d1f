//! Daemon configuration.
//!
//! Configuration for the replica-mesh daemon, including:
//! - The local node's own descriptor
//! - Where the peer directory lives
//! - Discovery and health loop timing
//! - Default and per-team replication strategies

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::{DEFAULT_DISCOVERY_INTERVAL, DiscoveryConfig};
use crate::error::ConfigError;
use crate::health::{
    DEFAULT_HEALTH_INTERVAL, DEFAULT_MAX_IN_FLIGHT, DEFAULT_PROBE_TIMEOUT, HealthConfig,
};
use crate::peer::{Peer, PeerDescriptor, TeamId};
use crate::planner::ReplicationStrategy;
use crate::service::ManagerSettings;

/// Discovery loop timing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoverySection {
    /// Seconds between discovery cycles.
    pub interval_secs: u64,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_DISCOVERY_INTERVAL.as_secs(),
        }
    }
}

/// Health loop timing and probe limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthSection {
    /// Seconds between health cycles.
    pub interval_secs: u64,
    /// Per-probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Maximum concurrent probes.
    pub max_in_flight_probes: usize,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_HEALTH_INTERVAL.as_secs(),
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            max_in_flight_probes: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Replication strategies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplicationSection {
    /// Strategy for teams without their own.
    pub default_strategy: ReplicationStrategy,
    /// Per-team overrides.
    pub teams: BTreeMap<TeamId, ReplicationStrategy>,
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    /// This node's own descriptor.
    pub local_node: PeerDescriptor,
    /// JSON file listing peer descriptors; no directory if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<PathBuf>,
    /// Discovery settings.
    #[serde(default)]
    pub discovery: DiscoverySection,
    /// Health settings.
    #[serde(default)]
    pub health: HealthSection,
    /// Replication settings.
    #[serde(default)]
    pub replication: ReplicationSection,
}

impl MeshConfig {
    /// Builds a starter configuration for a node called `local_id`.
    #[must_use]
    pub fn sample(local_id: &str) -> Self {
        Self {
            local_node: PeerDescriptor {
                id: local_id.to_string(),
                addresses: vec!["/ip4/127.0.0.1/tcp/4001".to_string()],
                ..PeerDescriptor::default()
            },
            directory_path: Some(PathBuf::from("peers.json")),
            discovery: DiscoverySection::default(),
            health: HealthSection::default(),
            replication: ReplicationSection::default(),
        }
    }

    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or fails validation.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the configuration to `path` as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = self.to_json_pretty()?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.local_peer()?;

        if self.discovery.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "discovery.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.health.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "health.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.health.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "health.probe_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.health.max_in_flight_probes == 0 {
            return Err(ConfigError::Invalid(
                "health.max_in_flight_probes must be greater than 0".to_string(),
            ));
        }

        self.replication
            .default_strategy
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("replication.default_strategy: {e}")))?;
        for (team, strategy) in &self.replication.teams {
            if team.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "replication.teams contains an empty team id".to_string(),
                ));
            }
            strategy
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("replication.teams.{team}: {e}")))?;
        }

        Ok(())
    }

    /// Converts the local node descriptor into a [`Peer`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LocalNode`] if the descriptor is malformed.
    pub fn local_peer(&self) -> Result<Peer, ConfigError> {
        Ok(Peer::try_from(self.local_node.clone())?)
    }

    /// Discovery loop settings.
    #[must_use]
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig::default().with_interval(Duration::from_secs(self.discovery.interval_secs))
    }

    /// Health monitor settings.
    #[must_use]
    pub fn health_config(&self) -> HealthConfig {
        HealthConfig::default()
            .with_interval(Duration::from_secs(self.health.interval_secs))
            .with_probe_timeout(Duration::from_millis(self.health.probe_timeout_ms))
            .with_max_in_flight(self.health.max_in_flight_probes)
    }

    /// Everything the manager needs apart from its collaborators.
    #[must_use]
    pub fn settings(&self) -> ManagerSettings {
        ManagerSettings {
            discovery: self.discovery_config(),
            health: self.health_config(),
            default_strategy: self.replication.default_strategy,
            team_strategies: self.replication.teams.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::Classification;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("failed to write temp file");
        file
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let json = r#"{ "local_node": { "id": "node-1" } }"#;
        let config = MeshConfig::from_json(json).expect("should parse minimal config");

        assert_eq!(config.local_node.id, "node-1");
        assert!(config.directory_path.is_none());
        assert_eq!(config.discovery.interval_secs, 30);
        assert_eq!(config.health.interval_secs, 60);
        assert_eq!(config.health.probe_timeout_ms, 5000);
        assert_eq!(config.health.max_in_flight_probes, 16);
        assert_eq!(config.replication.default_strategy, ReplicationStrategy::default());
    }

    #[test]
    fn full_config() {
        let json = r#"{
            "local_node": {
                "id": "node-1",
                "addresses": ["/ip4/10.0.0.1/tcp/4001"],
                "capabilities": { "classification": "SECRET", "securityLevel": "ENHANCED" },
                "metadata": { "teamAffiliations": ["alpha"] }
            },
            "directory_path": "/var/lib/replica-mesh/peers.json",
            "discovery": { "interval_secs": 10 },
            "health": { "interval_secs": 20, "probe_timeout_ms": 750, "max_in_flight_probes": 4 },
            "replication": {
                "default_strategy": { "min_replicas": 2, "max_replicas": 4 },
                "teams": {
                    "alpha": {
                        "min_replicas": 3,
                        "max_replicas": 3,
                        "geographic_distribution": false,
                        "security_requirements": { "classification_floor": "CONFIDENTIAL" }
                    }
                }
            }
        }"#;
        let config = MeshConfig::from_json(json).expect("should parse full config");

        let local = config.local_peer().expect("local peer");
        assert_eq!(local.classification(), Classification::Secret);

        let health = config.health_config();
        assert_eq!(health.interval, Duration::from_secs(20));
        assert_eq!(health.probe_timeout, Duration::from_millis(750));
        assert_eq!(health.max_in_flight, 4);
        assert_eq!(config.discovery_config().interval, Duration::from_secs(10));

        let settings = config.settings();
        assert_eq!(settings.default_strategy.min_replicas, 2);
        assert!(settings.default_strategy.geographic_distribution);
        let alpha = settings.team_strategies.get("alpha").expect("alpha strategy");
        assert!(!alpha.geographic_distribution);
        assert_eq!(
            alpha.security_requirements.classification_floor,
            Classification::Confidential
        );
        assert!(alpha.security_requirements.encryption_required);
    }

    #[test]
    fn rejects_zero_intervals() {
        let json = r#"{ "local_node": { "id": "n" }, "discovery": { "interval_secs": 0 } }"#;
        assert!(matches!(MeshConfig::from_json(json), Err(ConfigError::Invalid(_))));

        let json = r#"{ "local_node": { "id": "n" }, "health": { "max_in_flight_probes": 0 } }"#;
        assert!(matches!(MeshConfig::from_json(json), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_local_node() {
        let json = r#"{ "local_node": { "id": "  " } }"#;
        assert!(matches!(MeshConfig::from_json(json), Err(ConfigError::LocalNode(_))));

        let json = r#"{
            "local_node": { "id": "n", "capabilities": { "classification": "COSMIC" } }
        }"#;
        assert!(matches!(MeshConfig::from_json(json), Err(ConfigError::LocalNode(_))));
    }

    #[test]
    fn rejects_inverted_team_strategy() {
        let json = r#"{
            "local_node": { "id": "n" },
            "replication": { "teams": { "alpha": { "min_replicas": 5, "max_replicas": 2 } } }
        }"#;
        let err = MeshConfig::from_json(json).expect_err("should reject");
        assert!(err.to_string().contains("replication.teams.alpha"));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(MeshConfig::from_json("{"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn sample_survives_save_and_load() {
        let sample = MeshConfig::sample("node-7");
        let file = NamedTempFile::new().expect("temp file");
        sample.save(file.path()).expect("save");

        let loaded = MeshConfig::from_file(file.path()).expect("load");
        assert_eq!(loaded, sample);
    }

    #[test]
    fn from_file_reads_json() {
        let file = create_temp_config(r#"{ "local_node": { "id": "from-file" } }"#);
        let config = MeshConfig::from_file(file.path()).expect("load");
        assert_eq!(config.local_node.id, "from-file");
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = MeshConfig::from_file("/nonexistent/replica-mesh.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
