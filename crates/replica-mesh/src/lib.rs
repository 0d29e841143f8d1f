//! # replica-mesh
//!
//! Peer network manager for a content-replication mesh.
//!
//! This crate provides:
//!
//! - A peer catalog bucketing peers by team and public reachability
//! - Periodic discovery from an external directory service
//! - Periodic health probing with trust decay and blacklisting
//! - Replica placement honoring classification and geographic spread
//!
//! ## Core Types
//!
//! - [`PeerCatalog`]: single owner of the [`NetworkTopology`]
//! - [`DiscoveryLoop`]: pulls descriptors from a [`Directory`]
//! - [`HealthMonitor`]: probes peers through a [`Prober`]
//! - [`TrustScorer`]: pure suitability and eligibility scoring
//! - [`ReplicationPlanner`]: picks replica holders per [`ReplicationStrategy`]
//! - [`PeerNetworkManager`]: explicitly constructed service wiring it all up
//!
//! The content store that actually moves bytes is not part of this crate; it
//! consumes [`ReplicationPlan::peer_ids`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::future::Future;
use std::pin::Pin;

pub mod catalog;
pub mod config;
pub mod directory;
pub mod discovery;
pub mod error;
pub mod health;
pub mod metrics;
pub mod peer;
pub mod planner;
pub mod probe;
pub mod service;
pub mod ticker;
pub mod trust;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use catalog::{
    CatalogSnapshot, CatalogStats, NetworkTopology, PeerCatalog, ProbeTarget, UpsertOutcome,
};
pub use config::MeshConfig;
pub use directory::{Directory, DirectoryStats, FileDirectory, StaticDirectory};
pub use discovery::{DiscoveryConfig, DiscoveryLoop, DiscoveryReport};
pub use error::{ConfigError, DescriptorError, DirectoryError, MeshError, ProbeError, Result};
pub use health::{HealthConfig, HealthMonitor, HealthReport, HealthResult};
pub use metrics::PerformanceMetrics;
pub use peer::{
    Capabilities, Classification, Coordinates, GeoLocation, Peer, PeerDescriptor, PeerId,
    PeerMetadata, SecurityLevel, TeamId, TrustScore,
};
pub use planner::{
    PlannedReplica, ReplicationPlan, ReplicationPlanner, ReplicationRequest, ReplicationStrategy,
    SecurityRequirements,
};
pub use probe::{ProbeOutcome, ProbeReply, Prober, ScriptedProber, TcpProber};
pub use service::{ManagerSettings, NetworkStats, PeerNetworkManager};
pub use ticker::{IntervalTicker, LoopHandle, LoopStats, ManualTickHandle, ManualTicker, Ticker};
pub use trust::{TrustScorer, TrustUpdate};
