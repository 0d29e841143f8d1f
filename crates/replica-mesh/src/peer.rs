//! Peer identity and state.
//!
//! This module defines the core types describing one participant of the
//! replication mesh:
//! - [`PeerId`]: opaque unique identifier
//! - [`Peer`]: validated peer record held by the catalog
//! - [`PeerDescriptor`]: the loosely typed shape served by the directory
//! - [`Classification`] and [`SecurityLevel`]: closed enumerations replacing
//!   free-form capability strings

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DescriptorError;

/// Team identifier.
pub type TeamId = String;

/// Unique identifier for a peer in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a peer id, rejecting blank input.
    ///
    /// # Errors
    ///
    /// Returns [`DescriptorError::MissingId`] if `id` is empty or whitespace.
    pub fn new(id: impl Into<String>) -> Result<Self, DescriptorError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DescriptorError::MissingId);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 0..=100 reputation value. Every constructor clamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", from = "u8")]
pub struct TrustScore(u8);

impl TrustScore {
    /// Upper bound.
    pub const MAX: Self = Self(100);

    /// Lower bound.
    pub const MIN: Self = Self(0);

    /// Score assigned to peers a directory introduces without one.
    pub const NEUTRAL: Self = Self(50);

    /// Score assigned by administrative trust restoration.
    pub const TRUSTED: Self = Self(95);

    /// Creates a score, clamping into 0..=100.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self(value.clamp(0, 100) as u8)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }

    /// Adds a signed delta, clamping the result.
    #[must_use]
    pub fn adjusted(self, delta: i64) -> Self {
        Self::new(i64::from(self.0) + delta)
    }
}

impl Default for TrustScore {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl From<u8> for TrustScore {
    fn from(value: u8) -> Self {
        Self::new(i64::from(value))
    }
}

impl From<TrustScore> for u8 {
    fn from(score: TrustScore) -> Self {
        score.0
    }
}

impl fmt::Display for TrustScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport security level a peer offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityLevel {
    /// Plain transport security.
    #[default]
    Basic,
    /// Hardened transport.
    Enhanced,
    /// Post-quantum key exchange.
    QuantumSafe,
}

impl FromStr for SecurityLevel {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "BASIC" => Ok(Self::Basic),
            "ENHANCED" => Ok(Self::Enhanced),
            "QUANTUM_SAFE" => Ok(Self::QuantumSafe),
            _ => Err(DescriptorError::UnknownSecurityLevel(s.to_string())),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Basic => "BASIC",
            Self::Enhanced => "ENHANCED",
            Self::QuantumSafe => "QUANTUM_SAFE",
        };
        f.write_str(label)
    }
}

/// Security-sensitivity label. Variant order is the clearance order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Lowest label; public content.
    #[default]
    Unclassified,
    /// Confidential.
    Confidential,
    /// Secret.
    Secret,
    /// Highest label.
    TopSecret,
}

impl Classification {
    /// Returns the ordinal: `Unclassified` is 0, `TopSecret` is 3.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Returns true if a holder of `self` may hold content labelled `required`.
    #[must_use]
    pub fn satisfies(self, required: Self) -> bool {
        self >= required
    }
}

impl FromStr for Classification {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "UNCLASSIFIED" => Ok(Self::Unclassified),
            "CONFIDENTIAL" => Ok(Self::Confidential),
            "SECRET" => Ok(Self::Secret),
            "TOP_SECRET" => Ok(Self::TopSecret),
            _ => Err(DescriptorError::UnknownClassification(s.to_string())),
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unclassified => "UNCLASSIFIED",
            Self::Confidential => "CONFIDENTIAL",
            Self::Secret => "SECRET",
            Self::TopSecret => "TOP_SECRET",
        };
        f.write_str(label)
    }
}

fn normalize_label(s: &str) -> String {
    s.trim().to_ascii_uppercase().replace(['-', ' '], "_")
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Where a peer is hosted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// Country code or name.
    pub country: String,
    /// Region used for replica spreading.
    pub region: String,
    /// Optional coordinates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coords: Option<Coordinates>,
}

/// What a peer can offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Storage available for replicas.
    pub storage_bytes: u64,
    /// Advertised bandwidth.
    pub bandwidth_kbps: u64,
    /// Advertised uptime, 0..=100.
    pub uptime_percent: f64,
    /// Transport security level.
    pub security_level: SecurityLevel,
    /// Highest classification the peer is cleared for.
    pub classification: Classification,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            storage_bytes: 0,
            bandwidth_kbps: 0,
            uptime_percent: 0.0,
            security_level: SecurityLevel::Basic,
            classification: Classification::Unclassified,
        }
    }
}

/// Descriptive and reputation data about a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// Agent operating the peer.
    pub agent_id: String,
    /// Teams the peer serves.
    pub team_affiliations: BTreeSet<TeamId>,
    /// Where the peer lives, if known.
    pub geolocation: Option<GeoLocation>,
    /// When the directory last saw the peer.
    pub last_seen: DateTime<Utc>,
    /// Current reputation.
    pub trust_score: TrustScore,
}

/// A validated peer record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique id.
    pub id: PeerId,
    /// Reachable endpoints in preference order.
    pub addresses: Vec<String>,
    /// Supported transport protocols.
    pub protocols: BTreeSet<String>,
    /// Offered capabilities.
    pub capabilities: Capabilities,
    /// Metadata and reputation.
    pub metadata: PeerMetadata,
}

impl Peer {
    /// Creates a peer with default capabilities, no teams and neutral trust.
    #[must_use]
    pub fn new(id: PeerId, addresses: Vec<String>) -> Self {
        Self {
            id,
            addresses,
            protocols: BTreeSet::new(),
            capabilities: Capabilities::default(),
            metadata: PeerMetadata {
                agent_id: String::new(),
                team_affiliations: BTreeSet::new(),
                geolocation: None,
                last_seen: Utc::now(),
                trust_score: TrustScore::NEUTRAL,
            },
        }
    }

    /// Sets the team affiliations.
    #[must_use]
    pub fn with_teams<I, S>(mut self, teams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TeamId>,
    {
        self.metadata.team_affiliations = teams.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the classification.
    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.capabilities.classification = classification;
        self
    }

    /// Sets the trust score.
    #[must_use]
    pub fn with_trust(mut self, trust: TrustScore) -> Self {
        self.metadata.trust_score = trust;
        self
    }

    /// Sets the geolocation.
    #[must_use]
    pub fn with_geolocation(mut self, country: &str, region: &str) -> Self {
        self.metadata.geolocation = Some(GeoLocation {
            country: country.to_string(),
            region: region.to_string(),
            coords: None,
        });
        self
    }

    /// Sets bandwidth and uptime.
    #[must_use]
    pub fn with_link(mut self, bandwidth_kbps: u64, uptime_percent: f64) -> Self {
        self.capabilities.bandwidth_kbps = bandwidth_kbps;
        self.capabilities.uptime_percent = uptime_percent;
        self
    }

    /// Returns the current trust score.
    #[must_use]
    pub const fn trust(&self) -> TrustScore {
        self.metadata.trust_score
    }

    /// Returns the peer's classification.
    #[must_use]
    pub const fn classification(&self) -> Classification {
        self.capabilities.classification
    }

    /// Returns the region used for replica spreading, if known.
    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.metadata
            .geolocation
            .as_ref()
            .map(|geo| geo.region.as_str())
    }

    /// Returns the address the health monitor probes.
    #[must_use]
    pub fn primary_address(&self) -> Option<&str> {
        self.addresses.first().map(String::as_str)
    }

    /// Returns true if the peer may be listed among the public nodes.
    #[must_use]
    pub fn is_public_eligible(&self) -> bool {
        self.metadata.team_affiliations.is_empty()
            || self.capabilities.classification == Classification::Unclassified
    }
}

/// Capabilities as served by the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CapabilitiesDescriptor {
    /// Storage available for replicas.
    pub storage_bytes: u64,
    /// Advertised bandwidth.
    pub bandwidth_kbps: u64,
    /// Advertised uptime.
    pub uptime_percent: f64,
    /// Security level label; empty means `BASIC`.
    pub security_level: String,
    /// Classification label; empty means `UNCLASSIFIED`.
    pub classification: String,
}

/// Metadata as served by the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataDescriptor {
    /// Agent operating the peer.
    pub agent_id: String,
    /// Teams the peer serves.
    pub team_affiliations: Vec<String>,
    /// Optional location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<GeoLocation>,
    /// Last time the directory saw the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Trust score the directory believes in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trust_score: Option<i64>,
}

/// Peer record exchanged with the directory service.
///
/// Every field is optional on the wire so a single odd entry never poisons a
/// whole listing; validation happens in `TryFrom<PeerDescriptor> for Peer`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PeerDescriptor {
    /// Peer id.
    pub id: String,
    /// Endpoints.
    pub addresses: Vec<String>,
    /// Transport protocols.
    pub protocols: Vec<String>,
    /// Capabilities.
    pub capabilities: CapabilitiesDescriptor,
    /// Metadata.
    pub metadata: MetadataDescriptor,
}

impl TryFrom<PeerDescriptor> for Peer {
    type Error = DescriptorError;

    fn try_from(descriptor: PeerDescriptor) -> Result<Self, Self::Error> {
        let id = PeerId::new(descriptor.id)?;

        let caps = descriptor.capabilities;
        let security_level = if caps.security_level.trim().is_empty() {
            SecurityLevel::default()
        } else {
            caps.security_level.parse()?
        };
        let classification = if caps.classification.trim().is_empty() {
            Classification::default()
        } else {
            caps.classification.parse()?
        };
        if !caps.uptime_percent.is_finite() {
            return Err(DescriptorError::InvalidUptime);
        }

        let meta = descriptor.metadata;
        let trust_score = match meta.trust_score {
            None => TrustScore::NEUTRAL,
            Some(value) if (0..=100).contains(&value) => TrustScore::new(value),
            Some(value) => return Err(DescriptorError::TrustOutOfRange(value)),
        };

        let mut addresses: Vec<String> = Vec::with_capacity(descriptor.addresses.len());
        for address in descriptor.addresses {
            let address = address.trim().to_string();
            if !address.is_empty() && !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        Ok(Self {
            id,
            addresses,
            protocols: descriptor.protocols.into_iter().collect(),
            capabilities: Capabilities {
                storage_bytes: caps.storage_bytes,
                bandwidth_kbps: caps.bandwidth_kbps,
                uptime_percent: caps.uptime_percent.clamp(0.0, 100.0),
                security_level,
                classification,
            },
            metadata: PeerMetadata {
                agent_id: meta.agent_id,
                team_affiliations: meta
                    .team_affiliations
                    .into_iter()
                    .map(|team| team.trim().to_string())
                    .filter(|team| !team.is_empty())
                    .collect(),
                geolocation: meta.geolocation,
                last_seen: meta.last_seen.unwrap_or_else(Utc::now),
                trust_score,
            },
        })
    }
}

impl From<&Peer> for PeerDescriptor {
    fn from(peer: &Peer) -> Self {
        Self {
            id: peer.id.to_string(),
            addresses: peer.addresses.clone(),
            protocols: peer.protocols.iter().cloned().collect(),
            capabilities: CapabilitiesDescriptor {
                storage_bytes: peer.capabilities.storage_bytes,
                bandwidth_kbps: peer.capabilities.bandwidth_kbps,
                uptime_percent: peer.capabilities.uptime_percent,
                security_level: peer.capabilities.security_level.to_string(),
                classification: peer.capabilities.classification.to_string(),
            },
            metadata: MetadataDescriptor {
                agent_id: peer.metadata.agent_id.clone(),
                team_affiliations: peer.metadata.team_affiliations.iter().cloned().collect(),
                geolocation: peer.metadata.geolocation.clone(),
                last_seen: Some(peer.metadata.last_seen),
                trust_score: Some(i64::from(peer.metadata.trust_score.value())),
            },
        }
    }
}
