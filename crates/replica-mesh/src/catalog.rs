//! Peer catalog: the single owner of the network topology.
//!
//! The discovery loop and health monitor write into the catalog. Everyone
//! else reads from a [`CatalogSnapshot`], an independent deep copy taken
//! under the read lock, so a reader never sees a half-applied cycle.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::DescriptorError;
use crate::health::HealthResult;
use crate::metrics::PerformanceMetrics;
use crate::peer::{Peer, PeerDescriptor, PeerId, TeamId, TrustScore};
use crate::trust::TrustScorer;

/// What an upsert did to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The peer was not known before.
    Inserted,
    /// A known peer's record changed.
    Updated,
    /// The record was identical to the stored one.
    Unchanged,
    /// The id belongs to the local node and was ignored.
    IgnoredLocal,
}

/// A peer the health monitor should probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Peer to probe.
    pub peer_id: PeerId,
    /// First listed address, if any.
    pub address: Option<String>,
    /// Restore generation of the peer when the target was read.
    pub generation: u64,
}

/// Known peers bucketed by team and public reachability.
#[derive(Debug, Clone)]
pub struct NetworkTopology {
    local_node: Peer,
    peers: HashMap<PeerId, Peer>,
    team_nodes: BTreeMap<TeamId, Vec<PeerId>>,
    public_nodes: Vec<PeerId>,
    blacklist: BTreeSet<PeerId>,
    routing_table: HashMap<String, Vec<PeerId>>,
}

impl NetworkTopology {
    fn new(local_node: Peer) -> Self {
        Self {
            local_node,
            peers: HashMap::new(),
            team_nodes: BTreeMap::new(),
            public_nodes: Vec::new(),
            blacklist: BTreeSet::new(),
            routing_table: HashMap::new(),
        }
    }

    /// Returns this node's own descriptor.
    #[must_use]
    pub const fn local_node(&self) -> &Peer {
        &self.local_node
    }

    /// Returns a known peer.
    #[must_use]
    pub fn peer(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Returns all known peers in no particular order.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Returns the number of known peers, excluding the local node.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns the teams that have at least one peer.
    pub fn teams(&self) -> impl Iterator<Item = &str> {
        self.team_nodes.keys().map(String::as_str)
    }

    /// Returns the ids in a team bucket, in insertion order.
    #[must_use]
    pub fn team_ids(&self, team: &str) -> &[PeerId] {
        match self.team_nodes.get(team) {
            Some(members) => members,
            None => &[],
        }
    }

    /// Returns the peers in a team bucket, in insertion order.
    #[must_use]
    pub fn team_nodes(&self, team: &str) -> Vec<&Peer> {
        self.resolve(self.team_ids(team))
    }

    /// Returns the public peer ids, in insertion order.
    #[must_use]
    pub fn public_ids(&self) -> &[PeerId] {
        &self.public_nodes
    }

    /// Returns the public peers, in insertion order.
    #[must_use]
    pub fn public_nodes(&self) -> Vec<&Peer> {
        self.resolve(&self.public_nodes)
    }

    /// Returns true if `id` is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, id: &PeerId) -> bool {
        self.blacklist.contains(id)
    }

    /// Returns the blacklisted ids.
    pub fn blacklist(&self) -> impl Iterator<Item = &PeerId> {
        self.blacklist.iter()
    }

    /// Returns the cached preferred holders of a content hash.
    #[must_use]
    pub fn route(&self, content_hash: &str) -> Option<&[PeerId]> {
        self.routing_table.get(content_hash).map(Vec::as_slice)
    }

    fn resolve<'a>(&'a self, ids: &[PeerId]) -> Vec<&'a Peer> {
        ids.iter().filter_map(|id| self.peers.get(id)).collect()
    }

    fn upsert(&mut self, mut peer: Peer, keep_local_trust: bool) -> UpsertOutcome {
        if peer.id == self.local_node.id {
            return UpsertOutcome::IgnoredLocal;
        }

        let outcome = match self.peers.get(&peer.id) {
            Some(existing) => {
                if keep_local_trust {
                    peer.metadata.trust_score = existing.metadata.trust_score;
                }
                if *existing == peer {
                    UpsertOutcome::Unchanged
                } else {
                    UpsertOutcome::Updated
                }
            }
            None => UpsertOutcome::Inserted,
        };

        let teams = &peer.metadata.team_affiliations;
        for (team, members) in &mut self.team_nodes {
            if !teams.contains(team) {
                members.retain(|id| *id != peer.id);
            }
        }
        self.team_nodes.retain(|_, members| !members.is_empty());
        for team in teams {
            let bucket = self.team_nodes.entry(team.clone()).or_default();
            if !bucket.contains(&peer.id) {
                bucket.push(peer.id.clone());
            }
        }

        if peer.is_public_eligible() {
            if !self.public_nodes.contains(&peer.id) {
                self.public_nodes.push(peer.id.clone());
            }
        } else {
            self.public_nodes.retain(|id| *id != peer.id);
        }

        self.peers.insert(peer.id.clone(), peer);
        outcome
    }
}

/// Aggregate counts over the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    /// Known peers, excluding the local node.
    pub total_peers: usize,
    /// Peers listed publicly.
    pub public_peers: usize,
    /// Blacklisted peers.
    pub blacklisted_peers: usize,
    /// Peers probed at least once.
    pub measured_peers: usize,
    /// Peer count per team.
    pub team_peers: BTreeMap<TeamId, usize>,
    /// Cached content routes.
    pub cached_routes: usize,
}

/// Independent copy of the catalog at one instant.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    topology: NetworkTopology,
    metrics: HashMap<PeerId, PerformanceMetrics>,
    taken_at: DateTime<Utc>,
}

impl CatalogSnapshot {
    /// Returns the topology.
    #[must_use]
    pub const fn topology(&self) -> &NetworkTopology {
        &self.topology
    }

    /// Returns the metrics of every measured peer.
    #[must_use]
    pub const fn metrics(&self) -> &HashMap<PeerId, PerformanceMetrics> {
        &self.metrics
    }

    /// Returns a peer's metrics, or the unmeasured default.
    #[must_use]
    pub fn metrics_for(&self, id: &PeerId) -> PerformanceMetrics {
        self.metrics.get(id).cloned().unwrap_or_default()
    }

    /// Returns when the snapshot was taken.
    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

#[derive(Debug)]
struct CatalogState {
    topology: NetworkTopology,
    metrics: HashMap<PeerId, PerformanceMetrics>,
    // bumped whenever an operator restores a peer; health results carrying
    // an older generation are discarded
    generations: HashMap<PeerId, u64>,
}

impl CatalogState {
    fn generation(&self, id: &PeerId) -> u64 {
        self.generations.get(id).copied().unwrap_or_default()
    }

    fn bump_generation(&mut self, id: &PeerId) {
        *self.generations.entry(id.clone()).or_default() += 1;
    }
}

/// Thread-safe owner of the [`NetworkTopology`] and per-peer metrics.
#[derive(Debug)]
pub struct PeerCatalog {
    state: RwLock<CatalogState>,
}

impl PeerCatalog {
    /// Creates an empty catalog for the given local node.
    #[must_use]
    pub fn new(local_node: Peer) -> Self {
        Self {
            state: RwLock::new(CatalogState {
                topology: NetworkTopology::new(local_node),
                metrics: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }

    /// Inserts or refreshes a peer.
    ///
    /// A known peer keeps its locally observed trust score; the incoming
    /// score only seeds peers seen for the first time.
    pub fn upsert(&self, peer: Peer) -> UpsertOutcome {
        let id = peer.id.clone();
        let outcome = self.state.write().topology.upsert(peer, true);
        match outcome {
            UpsertOutcome::Inserted => info!(peer_id = %id, "Catalogued new peer"),
            UpsertOutcome::Updated => debug!(peer_id = %id, "Refreshed peer"),
            UpsertOutcome::Unchanged => {}
            UpsertOutcome::IgnoredLocal => debug!(peer_id = %id, "Ignoring local node"),
        }
        outcome
    }

    /// Validates and upserts a directory descriptor.
    ///
    /// # Errors
    ///
    /// Returns the validation error if the descriptor is malformed; nothing
    /// is inserted in that case.
    pub fn upsert_descriptor(
        &self,
        descriptor: PeerDescriptor,
    ) -> Result<UpsertOutcome, DescriptorError> {
        let raw_id = descriptor.id.clone();
        match Peer::try_from(descriptor) {
            Ok(peer) => Ok(self.upsert(peer)),
            Err(err) => {
                warn!(peer_id = %raw_id, error = %err, "Rejected malformed peer descriptor");
                Err(err)
            }
        }
    }

    /// Adds `id` to the blacklist. Returns true if it was not already there.
    pub fn blacklist(&self, id: &PeerId) -> bool {
        let added = self.state.write().topology.blacklist.insert(id.clone());
        if added {
            warn!(peer_id = %id, "Blacklisted peer");
        }
        added
    }

    /// Removes `id` from the blacklist. Returns true if it was there.
    ///
    /// Health results probed before the call are not applied to the peer.
    pub fn clear_blacklist(&self, id: &PeerId) -> bool {
        let removed = {
            let mut state = self.state.write();
            let removed = state.topology.blacklist.remove(id);
            if removed {
                state.bump_generation(id);
            }
            removed
        };
        if removed {
            info!(peer_id = %id, "Cleared peer from blacklist");
        }
        removed
    }

    /// Forcibly trusts a peer: clears its blacklist entry, sets trust to
    /// [`TrustScore::TRUSTED`] and upserts it.
    ///
    /// Health results probed before the call are not applied to the peer.
    pub fn add_trusted_peer(&self, mut peer: Peer) -> UpsertOutcome {
        peer.metadata.trust_score = TrustScore::TRUSTED;
        let id = peer.id.clone();
        let outcome = {
            let mut state = self.state.write();
            state.topology.blacklist.remove(&id);
            let outcome = state.topology.upsert(peer, false);
            if outcome != UpsertOutcome::IgnoredLocal {
                state.bump_generation(&id);
            }
            outcome
        };
        if outcome != UpsertOutcome::IgnoredLocal {
            info!(peer_id = %id, trust = TrustScore::TRUSTED.value(), "Added trusted peer");
        }
        outcome
    }

    /// Takes an independent copy of topology and metrics.
    #[must_use]
    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read();
        CatalogSnapshot {
            topology: state.topology.clone(),
            metrics: state.metrics.clone(),
            taken_at: Utc::now(),
        }
    }

    /// Returns a known peer.
    #[must_use]
    pub fn get(&self, id: &PeerId) -> Option<Peer> {
        self.state.read().topology.peers.get(id).cloned()
    }

    /// Returns true if `id` is known.
    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.state.read().topology.peers.contains_key(id)
    }

    /// Returns true if `id` is blacklisted.
    #[must_use]
    pub fn is_blacklisted(&self, id: &PeerId) -> bool {
        self.state.read().topology.is_blacklisted(id)
    }

    /// Returns the number of known peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().topology.len()
    }

    /// Returns true if no peers are known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.read().topology.is_empty()
    }

    /// Returns a copy of every peer's metrics.
    #[must_use]
    pub fn performance_metrics(&self) -> HashMap<PeerId, PerformanceMetrics> {
        self.state.read().metrics.clone()
    }

    /// Returns every peer the health monitor should probe: known, not
    /// blacklisted, not the local node. Sorted by id.
    #[must_use]
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        let state = self.state.read();
        let topology = &state.topology;
        let mut targets: Vec<ProbeTarget> = topology
            .peers
            .values()
            .filter(|peer| !topology.blacklist.contains(&peer.id))
            .map(|peer| ProbeTarget {
                peer_id: peer.id.clone(),
                address: peer.primary_address().map(str::to_string),
                generation: state.generation(&peer.id),
            })
            .collect();
        targets.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        targets
    }

    /// Applies a whole health cycle under one write lock.
    ///
    /// Returns the ids blacklisted by this cycle. Results for peers that are
    /// no longer catalogued, or that were restored after the probe target
    /// was read, are dropped.
    pub fn apply_health_results(&self, results: &[HealthResult]) -> Vec<PeerId> {
        let now = Utc::now();
        let mut newly_blacklisted = Vec::new();
        let mut superseded = Vec::new();

        let mut state = self.state.write();
        let CatalogState {
            topology,
            metrics,
            generations,
        } = &mut *state;
        for result in results {
            let Some(peer) = topology.peers.get_mut(&result.peer_id) else {
                continue;
            };
            let current = generations.get(&result.peer_id).copied().unwrap_or_default();
            if result.generation != current {
                superseded.push(&result.peer_id);
                continue;
            }
            let update = TrustScorer::apply_outcome(peer.metadata.trust_score, &result.outcome);
            peer.metadata.trust_score = update.trust;
            metrics
                .entry(result.peer_id.clone())
                .or_default()
                .record(&result.outcome, now);

            if update.blacklist && topology.blacklist.insert(result.peer_id.clone()) {
                newly_blacklisted.push(result.peer_id.clone());
            }
        }
        drop(state);

        for id in superseded {
            debug!(peer_id = %id, "Dropping health result from before restore");
        }
        for id in &newly_blacklisted {
            warn!(peer_id = %id, "Blacklisted peer after trust decay");
        }
        newly_blacklisted
    }

    /// Caches the preferred holders of a content hash.
    pub fn cache_route(&self, content_hash: impl Into<String>, peers: Vec<PeerId>) {
        self.state
            .write()
            .topology
            .routing_table
            .insert(content_hash.into(), peers);
    }

    /// Returns the cached holders of a content hash.
    #[must_use]
    pub fn route(&self, content_hash: &str) -> Option<Vec<PeerId>> {
        self.state
            .read()
            .topology
            .route(content_hash)
            .map(<[PeerId]>::to_vec)
    }

    /// Computes aggregate counts.
    #[must_use]
    pub fn stats(&self) -> CatalogStats {
        let state = self.state.read();
        let topology = &state.topology;
        CatalogStats {
            total_peers: topology.peers.len(),
            public_peers: topology.public_nodes.len(),
            blacklisted_peers: topology.blacklist.len(),
            measured_peers: state.metrics.values().filter(|m| m.is_measured()).count(),
            team_peers: topology
                .team_nodes
                .iter()
                .map(|(team, members)| (team.clone(), members.len()))
                .collect(),
            cached_routes: topology.routing_table.len(),
        }
    }
}
