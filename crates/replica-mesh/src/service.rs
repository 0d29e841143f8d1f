//! The peer network manager service.
//!
//! [`PeerNetworkManager`] is constructed explicitly by a composition root
//! (the daemon, or a test) and handed to consumers by reference. It owns the
//! catalog, the replication strategies and the two periodic loops.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::{CatalogSnapshot, CatalogStats, PeerCatalog};
use crate::config::MeshConfig;
use crate::directory::{Directory, DirectoryStats};
use crate::discovery::{DiscoveryConfig, DiscoveryLoop, DiscoveryReport};
use crate::error::{MeshError, Result};
use crate::health::{HealthConfig, HealthMonitor, HealthReport};
use crate::metrics::PerformanceMetrics;
use crate::peer::{Classification, Peer, PeerDescriptor, PeerId, TeamId};
use crate::planner::{
    ReplicationPlan, ReplicationPlanner, ReplicationRequest, ReplicationStrategy,
};
use crate::probe::Prober;
use crate::ticker::{IntervalTicker, LoopHandle, LoopStats, Ticker};

/// Everything the manager needs apart from its collaborators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Discovery loop settings.
    pub discovery: DiscoveryConfig,
    /// Health monitor settings.
    pub health: HealthConfig,
    /// Strategy for teams without their own.
    pub default_strategy: ReplicationStrategy,
    /// Initial per-team strategies.
    pub team_strategies: BTreeMap<TeamId, ReplicationStrategy>,
}

/// Combined view of the local catalog and the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkStats {
    /// Local catalog counts.
    pub catalog: CatalogStats,
    /// Directory-reported numbers, if the directory answered.
    pub directory: Option<DirectoryStats>,
}

/// Owns the peer catalog and drives discovery and health monitoring.
pub struct PeerNetworkManager {
    catalog: Arc<PeerCatalog>,
    directory: Arc<dyn Directory>,
    discovery: Arc<DiscoveryLoop>,
    health: Arc<HealthMonitor>,
    default_strategy: ReplicationStrategy,
    strategies: RwLock<HashMap<TeamId, ReplicationStrategy>>,
    loops: Mutex<Vec<LoopHandle>>,
}

impl std::fmt::Debug for PeerNetworkManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerNetworkManager")
            .field("peers", &self.catalog.len())
            .field("default_strategy", &self.default_strategy)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl PeerNetworkManager {
    /// Creates a stopped manager for `local_node`.
    #[must_use]
    pub fn new(
        local_node: Peer,
        directory: Arc<dyn Directory>,
        prober: Arc<dyn Prober>,
        settings: ManagerSettings,
    ) -> Self {
        let catalog = Arc::new(PeerCatalog::new(local_node));
        let discovery = Arc::new(DiscoveryLoop::new(
            Arc::clone(&catalog),
            Arc::clone(&directory),
            settings.discovery,
        ));
        let health = Arc::new(HealthMonitor::new(
            Arc::clone(&catalog),
            prober,
            settings.health,
        ));

        Self {
            catalog,
            directory,
            discovery,
            health,
            default_strategy: settings.default_strategy,
            strategies: RwLock::new(settings.team_strategies.into_iter().collect()),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Creates a stopped manager from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the configuration is invalid.
    pub fn from_config(
        config: &MeshConfig,
        directory: Arc<dyn Directory>,
        prober: Arc<dyn Prober>,
    ) -> Result<Self> {
        config.validate()?;
        let local_node = config.local_peer()?;
        Ok(Self::new(local_node, directory, prober, config.settings()))
    }

    /// Returns the shared catalog.
    #[must_use]
    pub fn catalog(&self) -> &Arc<PeerCatalog> {
        &self.catalog
    }

    /// Starts both loops on wall-clock interval tickers.
    ///
    /// Each loop runs once immediately, then on its interval.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::AlreadyStarted`] if the loops are running.
    pub fn start(&self) -> Result<()> {
        let discovery = IntervalTicker::new(self.discovery.config().interval);
        let health = IntervalTicker::new(self.health.config().interval);
        self.start_with(discovery, health)
    }

    /// Starts both loops on the given tickers.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::AlreadyStarted`] if the loops are running.
    pub fn start_with(
        &self,
        discovery_ticker: impl Ticker,
        health_ticker: impl Ticker,
    ) -> Result<()> {
        let mut loops = self.loops.lock();
        if !loops.is_empty() {
            return Err(MeshError::AlreadyStarted);
        }
        loops.push(Arc::clone(&self.discovery).spawn(discovery_ticker));
        loops.push(Arc::clone(&self.health).spawn(health_ticker));
        info!(peers = self.catalog.len(), "Peer network manager started");
        Ok(())
    }

    /// Returns true while the loops are running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.loops.lock().is_empty()
    }

    /// Returns the counters of each running loop, by loop name.
    #[must_use]
    pub fn loop_stats(&self) -> Vec<(&'static str, LoopStats)> {
        self.loops
            .lock()
            .iter()
            .map(|handle| (handle.name(), handle.stats()))
            .collect()
    }

    /// Runs one discovery cycle outside the schedule.
    pub async fn run_discovery_cycle(&self) -> DiscoveryReport {
        self.discovery.run_cycle().await
    }

    /// Runs one health cycle outside the schedule.
    pub async fn run_health_cycle(&self) -> HealthReport {
        self.health.run_cycle().await
    }

    /// Stops both loops. Cycles already running finish on their own.
    ///
    /// Idempotent; the manager can be started again afterwards.
    pub fn destroy(&self) {
        let loops: Vec<LoopHandle> = self.loops.lock().drain(..).collect();
        if loops.is_empty() {
            return;
        }
        for handle in &loops {
            handle.stop();
        }
        info!("Peer network manager stopped");
    }

    /// Forcibly trusts a peer, lifting any blacklist entry.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Descriptor`] if the descriptor is malformed.
    pub fn add_trusted_peer(&self, descriptor: PeerDescriptor) -> Result<PeerId> {
        let peer = Peer::try_from(descriptor)?;
        let id = peer.id.clone();
        self.catalog.add_trusted_peer(peer);
        Ok(id)
    }

    /// Blacklists a peer by hand. Returns true if it was not already listed.
    pub fn blacklist_peer(&self, id: &PeerId) -> bool {
        self.catalog.blacklist(id)
    }

    /// Lifts a blacklist entry without touching trust.
    pub fn clear_blacklist(&self, id: &PeerId) -> bool {
        self.catalog.clear_blacklist(id)
    }

    /// Sets the strategy for one team.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the strategy's bounds are
    /// inconsistent.
    pub fn set_team_replication_strategy(
        &self,
        team: impl Into<TeamId>,
        strategy: ReplicationStrategy,
    ) -> Result<()> {
        strategy.validate()?;
        let team = team.into();
        info!(
            team = %team,
            min = strategy.min_replicas,
            max = strategy.max_replicas,
            "Set team replication strategy"
        );
        self.strategies.write().insert(team, strategy);
        Ok(())
    }

    /// Returns the strategy in force for `team`.
    #[must_use]
    pub fn replication_strategy(&self, team: &str) -> ReplicationStrategy {
        self.strategies
            .read()
            .get(team)
            .copied()
            .unwrap_or(self.default_strategy)
    }

    /// Returns an independent copy of topology and metrics.
    #[must_use]
    pub fn topology_snapshot(&self) -> CatalogSnapshot {
        self.catalog.snapshot()
    }

    /// Returns every peer's metrics.
    #[must_use]
    pub fn performance_metrics(&self) -> HashMap<PeerId, PerformanceMetrics> {
        self.catalog.performance_metrics()
    }

    /// Picks replica holders for content of `team` labelled `classification`.
    #[must_use]
    pub fn find_optimal_peers(
        &self,
        team: &str,
        classification: Classification,
        replicas: usize,
    ) -> ReplicationPlan {
        let request = ReplicationRequest::new(team, classification).with_replicas(replicas);
        self.plan(&request)
    }

    /// Plans holders for one piece of content and caches the route.
    #[must_use]
    pub fn plan_for_content(
        &self,
        content_hash: &str,
        request: &ReplicationRequest,
    ) -> ReplicationPlan {
        let plan = self.plan(request);
        if !plan.is_empty() {
            self.catalog.cache_route(content_hash, plan.peer_ids());
        }
        plan
    }

    /// Returns catalog counts plus whatever the directory reports.
    pub async fn network_stats(&self) -> NetworkStats {
        let directory = match self.directory.network_stats().await {
            Ok(stats) => Some(stats),
            Err(err) => {
                debug!(error = %err, "Directory stats unavailable");
                None
            }
        };
        NetworkStats {
            catalog: self.catalog.stats(),
            directory,
        }
    }

    fn plan(&self, request: &ReplicationRequest) -> ReplicationPlan {
        let strategy = self.replication_strategy(&request.team);
        let snapshot = self.catalog.snapshot();
        let plan = ReplicationPlanner::new(&snapshot).plan(request, &strategy);
        if plan.is_under_replicated() {
            debug!(
                team = %request.team,
                wanted = plan.desired,
                found = plan.len(),
                "Not enough suitable peers for full replication"
            );
        }
        plan
    }
}

impl Drop for PeerNetworkManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::error::DescriptorError;
    use crate::probe::ScriptedProber;
    use crate::ticker;
    use std::time::Duration;

    fn id(raw: &str) -> PeerId {
        PeerId::new(raw).expect("valid id")
    }

    fn descriptor(raw: &str, team: &str, classification: &str, trust: i64) -> PeerDescriptor {
        let mut descriptor = PeerDescriptor {
            id: raw.to_string(),
            addresses: vec![format!("{raw}:4001")],
            ..PeerDescriptor::default()
        };
        descriptor.capabilities.classification = classification.to_string();
        descriptor.metadata.team_affiliations = vec![team.to_string()];
        descriptor.metadata.trust_score = Some(trust);
        descriptor
    }

    fn manager(descriptors: Vec<PeerDescriptor>) -> PeerNetworkManager {
        PeerNetworkManager::new(
            Peer::new(id("local"), vec![]),
            Arc::new(StaticDirectory::new(descriptors)),
            Arc::new(ScriptedProber::new()),
            ManagerSettings::default(),
        )
    }

    #[tokio::test]
    async fn team_strategy_overrides_default() {
        let manager = manager(vec![]);
        assert_eq!(manager.replication_strategy("alpha"), ReplicationStrategy::default());

        let strict = ReplicationStrategy::default()
            .with_replicas(1, 2)
            .with_classification_floor(Classification::Secret);
        manager
            .set_team_replication_strategy("alpha", strict)
            .expect("valid strategy");
        assert_eq!(manager.replication_strategy("alpha"), strict);
        assert_eq!(manager.replication_strategy("beta"), ReplicationStrategy::default());

        let inverted = ReplicationStrategy::default().with_replicas(4, 1);
        assert!(manager.set_team_replication_strategy("alpha", inverted).is_err());
        assert_eq!(manager.replication_strategy("alpha"), strict);
    }

    #[tokio::test]
    async fn find_optimal_peers_reports_short_plans() {
        let manager = manager(vec![
            descriptor("s1", "alpha", "SECRET", 80),
            descriptor("s2", "alpha", "TOP_SECRET", 90),
            descriptor("c1", "alpha", "CONFIDENTIAL", 99),
        ]);
        manager.run_discovery_cycle().await;

        let plan = manager.find_optimal_peers("alpha", Classification::Secret, 3);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.minimum, 3);
        assert!(!plan.meets_minimum());
    }

    #[tokio::test]
    async fn plan_for_content_caches_route() {
        let manager = manager(vec![
            descriptor("a", "alpha", "UNCLASSIFIED", 90),
            descriptor("b", "alpha", "UNCLASSIFIED", 80),
        ]);
        manager.run_discovery_cycle().await;

        let request =
            ReplicationRequest::new("alpha", Classification::Unclassified).with_replicas(2);
        let plan = manager.plan_for_content("sha256:abc", &request);
        assert_eq!(manager.catalog().route("sha256:abc"), Some(plan.peer_ids()));

        // unclassified content of an unknown team falls back to public peers
        let public = ReplicationRequest::new("nobody", Classification::Unclassified);
        let plan = manager.plan_for_content("sha256:def", &public);
        assert_eq!(plan.peer_ids(), vec![id("a"), id("b")]);
        assert_eq!(manager.catalog().route("sha256:def"), Some(plan.peer_ids()));

        let secret = ReplicationRequest::new("nobody", Classification::Secret);
        assert!(manager.plan_for_content("sha256:fed", &secret).is_empty());
        assert_eq!(manager.catalog().route("sha256:fed"), None);
    }

    #[tokio::test]
    async fn add_trusted_peer_validates_descriptor() {
        let manager = manager(vec![]);
        let added = manager
            .add_trusted_peer(descriptor("t", "alpha", "SECRET", 5))
            .expect("valid descriptor");
        assert_eq!(added, id("t"));
        assert_eq!(
            manager.catalog().get(&added).map(|p| p.trust().value()),
            Some(95)
        );

        let bad = descriptor("", "alpha", "SECRET", 5);
        assert!(matches!(
            manager.add_trusted_peer(bad),
            Err(MeshError::Descriptor(DescriptorError::MissingId))
        ));
    }

    #[tokio::test]
    async fn network_stats_tolerates_directory_failure() {
        let listed = vec![descriptor("a", "alpha", "SECRET", 80)];
        let directory = Arc::new(StaticDirectory::new(listed));
        let manager = PeerNetworkManager::new(
            Peer::new(id("local"), vec![]),
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::new(ScriptedProber::new()),
            ManagerSettings::default(),
        );
        manager.run_discovery_cycle().await;

        let stats = manager.network_stats().await;
        assert_eq!(stats.catalog.total_peers, 1);
        assert_eq!(stats.directory.map(|d| d.total_peers), Some(1));

        directory.set_unavailable();
        let stats = manager.network_stats().await;
        assert_eq!(stats.catalog.total_peers, 1);
        assert!(stats.directory.is_none());
    }

    #[tokio::test]
    async fn start_twice_is_rejected_and_destroy_is_idempotent() {
        let manager = manager(vec![descriptor("a", "alpha", "SECRET", 80)]);
        let (discovery_ticks, discovery_ticker) = ticker::manual();
        let (_health_ticks, health_ticker) = ticker::manual();

        manager
            .start_with(discovery_ticker, health_ticker)
            .expect("first start");
        assert!(manager.is_running());

        let (_, again_a) = ticker::manual();
        let (_, again_b) = ticker::manual();
        assert!(matches!(
            manager.start_with(again_a, again_b),
            Err(MeshError::AlreadyStarted)
        ));

        discovery_ticks.advance();
        for _ in 0..100 {
            if manager.catalog().contains(&id("a")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(manager.catalog().contains(&id("a")));

        manager.destroy();
        manager.destroy();
        assert!(!manager.is_running());
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(check(), "condition never held");
    }

    #[tokio::test]
    async fn restart_does_not_overlap_cycle_from_before_destroy() {
        let listed = vec![descriptor("a", "alpha", "SECRET", 80)];
        let directory = Arc::new(StaticDirectory::new(listed));
        let manager = PeerNetworkManager::new(
            Peer::new(id("local"), vec![]),
            Arc::clone(&directory) as Arc<dyn Directory>,
            Arc::new(ScriptedProber::new()),
            ManagerSettings::default(),
        );
        directory.pause();

        let (first_ticks, discovery_ticker) = ticker::manual();
        let (_first_health, health_ticker) = ticker::manual();
        manager
            .start_with(discovery_ticker, health_ticker)
            .expect("first start");
        first_ticks.advance();
        eventually(|| directory.calls() == 1).await;
        manager.destroy();

        let (second_ticks, discovery_ticker) = ticker::manual();
        let (_second_health, health_ticker) = ticker::manual();
        manager
            .start_with(discovery_ticker, health_ticker)
            .expect("restart");
        second_ticks.advance();
        eventually(|| {
            manager
                .loop_stats()
                .iter()
                .any(|(name, stats)| *name == "discovery" && stats.skipped == 1)
        })
        .await;
        assert_eq!(directory.calls(), 1);

        directory.resume();
        eventually(|| manager.catalog().contains(&id("a"))).await;
        second_ticks.advance();
        eventually(|| directory.calls() == 2).await;
        manager.destroy();
    }
}
