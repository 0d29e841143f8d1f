//! Replica placement.
//!
//! The planner is synchronous and works on a [`CatalogSnapshot`], so it can
//! never observe a half-applied discovery or health cycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogSnapshot;
use crate::error::ConfigError;
use crate::peer::{Classification, Peer, PeerId, TeamId};
use crate::trust::TrustScorer;

/// Replica count used when a caller does not ask for one.
pub const DEFAULT_REPLICA_COUNT: usize = 3;

/// Security constraints attached to a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityRequirements {
    /// Replicas must be stored encrypted.
    pub encryption_required: bool,
    /// Lowest classification any replica request for the team is planned at.
    pub classification_floor: Classification,
    /// Holders must enforce access control.
    pub access_control_enabled: bool,
}

impl Default for SecurityRequirements {
    fn default() -> Self {
        Self {
            encryption_required: true,
            classification_floor: Classification::Unclassified,
            access_control_enabled: true,
        }
    }
}

/// Per-team replication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationStrategy {
    /// Replica count below which content counts as under-replicated.
    pub min_replicas: usize,
    /// Upper bound operators aim for.
    pub max_replicas: usize,
    /// Spread replicas across regions before doubling up.
    pub geographic_distribution: bool,
    /// Security constraints.
    pub security_requirements: SecurityRequirements,
}

impl Default for ReplicationStrategy {
    fn default() -> Self {
        Self {
            min_replicas: 3,
            max_replicas: 5,
            geographic_distribution: true,
            security_requirements: SecurityRequirements::default(),
        }
    }
}

impl ReplicationStrategy {
    /// Sets the replica bounds.
    #[must_use]
    pub const fn with_replicas(mut self, min_replicas: usize, max_replicas: usize) -> Self {
        self.min_replicas = min_replicas;
        self.max_replicas = max_replicas;
        self
    }

    /// Enables or disables geographic spreading.
    #[must_use]
    pub const fn with_geographic_distribution(mut self, enabled: bool) -> Self {
        self.geographic_distribution = enabled;
        self
    }

    /// Sets the classification floor.
    #[must_use]
    pub const fn with_classification_floor(mut self, floor: Classification) -> Self {
        self.security_requirements.classification_floor = floor;
        self
    }

    /// Checks the replica bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `max_replicas` is zero or below
    /// `min_replicas`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_replicas == 0 {
            return Err(ConfigError::Invalid(
                "max_replicas must be at least 1".to_string(),
            ));
        }
        if self.min_replicas > self.max_replicas {
            return Err(ConfigError::Invalid(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }
        Ok(())
    }

    /// Returns the classification a request is actually planned at.
    #[must_use]
    pub fn effective_classification(&self, required: Classification) -> Classification {
        required.max(self.security_requirements.classification_floor)
    }
}

/// What to place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationRequest {
    /// Team owning the content.
    pub team: TeamId,
    /// Classification of the content.
    pub classification: Classification,
    /// Replicas wanted.
    pub replicas: usize,
}

impl ReplicationRequest {
    /// Creates a request for [`DEFAULT_REPLICA_COUNT`] replicas.
    #[must_use]
    pub fn new(team: impl Into<TeamId>, classification: Classification) -> Self {
        Self {
            team: team.into(),
            classification,
            replicas: DEFAULT_REPLICA_COUNT,
        }
    }

    /// Sets the wanted replica count.
    #[must_use]
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }
}

/// One chosen replica holder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedReplica {
    /// Holder.
    pub peer_id: PeerId,
    /// Suitability score at planning time.
    pub score: f64,
    /// Holder's region, if known.
    pub region: Option<String>,
}

/// Ordered replica holders for one request.
///
/// A plan shorter than requested is a normal result, not an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplicationPlan {
    /// Team the plan is for.
    pub team: TeamId,
    /// Classification the pool was filtered at.
    pub classification: Classification,
    /// Replicas asked for.
    pub desired: usize,
    /// Strategy minimum.
    pub minimum: usize,
    /// Chosen holders, best first.
    pub replicas: Vec<PlannedReplica>,
}

impl ReplicationPlan {
    /// Returns the chosen peer ids in order.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.replicas.iter().map(|r| r.peer_id.clone()).collect()
    }

    /// Returns the number of chosen holders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    /// Returns true if no holder was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Returns true if fewer holders were found than requested.
    #[must_use]
    pub fn is_under_replicated(&self) -> bool {
        self.replicas.len() < self.desired
    }

    /// Returns true if the strategy minimum is met.
    #[must_use]
    pub fn meets_minimum(&self) -> bool {
        self.replicas.len() >= self.minimum
    }
}

/// Chooses replica holders from a catalog snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ReplicationPlanner<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> ReplicationPlanner<'a> {
    /// Creates a planner over `snapshot`.
    #[must_use]
    pub const fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    /// Plans holders for `request` under `strategy`.
    #[must_use]
    pub fn plan(
        &self,
        request: &ReplicationRequest,
        strategy: &ReplicationStrategy,
    ) -> ReplicationPlan {
        let classification = strategy.effective_classification(request.classification);
        let desired = request.replicas;

        let pool = self.candidates(&request.team, classification, desired);
        let picked = if strategy.geographic_distribution {
            spread_by_region(&pool, desired)
        } else {
            pool.iter().take(desired).collect()
        };

        ReplicationPlan {
            team: request.team.clone(),
            classification,
            desired,
            minimum: strategy.min_replicas,
            replicas: picked
                .into_iter()
                .map(|(peer, score)| PlannedReplica {
                    peer_id: peer.id.clone(),
                    score: *score,
                    region: peer.region().map(str::to_string),
                })
                .collect(),
        }
    }

    /// Returns suitable, non-blacklisted peers sorted best first.
    fn candidates(
        &self,
        team: &str,
        classification: Classification,
        desired: usize,
    ) -> Vec<(&'a Peer, f64)> {
        let snapshot = self.snapshot;
        let topology = snapshot.topology();
        let eligible = |peer: &&Peer| {
            !topology.is_blacklisted(&peer.id) && TrustScorer::is_suitable(peer, classification)
        };

        let mut pool: Vec<&Peer> = topology.team_nodes(team).into_iter().filter(eligible).collect();
        if pool.len() < desired && classification == Classification::Unclassified {
            let seen: HashSet<&PeerId> = pool.iter().map(|peer| &peer.id).collect();
            let public: Vec<&Peer> = topology
                .public_nodes()
                .into_iter()
                .filter(|peer| !seen.contains(&peer.id))
                .filter(eligible)
                .collect();
            pool.extend(public);
        }

        let mut scored: Vec<(&Peer, f64)> = pool
            .into_iter()
            .map(|peer| {
                let metrics = snapshot.metrics_for(&peer.id);
                (peer, TrustScorer::suitability_score(peer, &metrics))
            })
            .collect();
        // stable, so equal scores keep bucket order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }
}

/// Takes at most one peer per region first, then fills from the top.
fn spread_by_region<'p, 'a>(
    pool: &'p [(&'a Peer, f64)],
    desired: usize,
) -> Vec<&'p (&'a Peer, f64)> {
    let mut chosen: Vec<usize> = Vec::with_capacity(desired.min(pool.len()));
    let mut regions: HashSet<Option<&str>> = HashSet::new();

    for (index, (peer, _)) in pool.iter().enumerate() {
        if chosen.len() >= desired {
            break;
        }
        if regions.insert(peer.region()) {
            chosen.push(index);
        }
    }
    for index in 0..pool.len() {
        if chosen.len() >= desired {
            break;
        }
        if !chosen.contains(&index) {
            chosen.push(index);
        }
    }

    chosen.into_iter().map(|index| &pool[index]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PeerCatalog;
    use crate::health::HealthResult;
    use crate::peer::TrustScore;
    use crate::probe::ProbeOutcome;
    use proptest::prelude::*;
    use std::time::Duration;

    fn id(raw: &str) -> PeerId {
        PeerId::new(raw).expect("valid id")
    }

    fn peer(raw: &str, team: &str, classification: Classification, trust: i64) -> Peer {
        Peer::new(id(raw), vec![format!("{raw}:4001")])
            .with_teams([team])
            .with_classification(classification)
            .with_trust(TrustScore::new(trust))
    }

    fn catalog(peers: Vec<Peer>) -> PeerCatalog {
        let catalog = PeerCatalog::new(Peer::new(id("local"), vec![]));
        for peer in peers {
            catalog.upsert(peer);
        }
        catalog
    }

    fn ids(raw: &[&str]) -> Vec<PeerId> {
        raw.iter().map(|r| id(r)).collect()
    }

    #[test]
    fn default_strategy() {
        let strategy = ReplicationStrategy::default();
        assert_eq!(strategy.min_replicas, 3);
        assert_eq!(strategy.max_replicas, 5);
        assert!(strategy.geographic_distribution);
        assert!(strategy.security_requirements.encryption_required);
        assert!(strategy.security_requirements.access_control_enabled);
        assert_eq!(
            strategy.security_requirements.classification_floor,
            Classification::Unclassified
        );
        assert!(strategy.validate().is_ok());
    }

    #[test]
    fn invalid_strategy_bounds() {
        assert!(ReplicationStrategy::default().with_replicas(6, 5).validate().is_err());
        assert!(ReplicationStrategy::default().with_replicas(0, 0).validate().is_err());
    }

    #[test]
    fn short_pool_is_not_an_error() {
        let catalog = catalog(vec![
            peer("s1", "alpha", Classification::Secret, 80),
            peer("s2", "alpha", Classification::TopSecret, 90),
            peer("c1", "alpha", Classification::Confidential, 100),
            peer("low", "alpha", Classification::Secret, 60),
        ]);
        let snapshot = catalog.snapshot();
        let request = ReplicationRequest::new("alpha", Classification::Secret);

        let plan =
            ReplicationPlanner::new(&snapshot).plan(&request, &ReplicationStrategy::default());
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.peer_ids(), ids(&["s2", "s1"]));
        assert!(plan.is_under_replicated());
        assert!(!plan.meets_minimum());
    }

    #[test]
    fn regions_are_spread_before_scores() {
        let catalog = catalog(vec![
            peer("a-top", "alpha", Classification::Unclassified, 100).with_geolocation("US", "A"),
            peer("a-mid", "alpha", Classification::Unclassified, 95).with_geolocation("US", "A"),
            peer("b-low", "alpha", Classification::Unclassified, 70).with_geolocation("DE", "B"),
        ]);
        let snapshot = catalog.snapshot();
        let request =
            ReplicationRequest::new("alpha", Classification::Unclassified).with_replicas(2);
        let planner = ReplicationPlanner::new(&snapshot);

        let plan = planner.plan(&request, &ReplicationStrategy::default());
        assert_eq!(plan.peer_ids(), ids(&["a-top", "b-low"]));

        let unspread = ReplicationStrategy::default().with_geographic_distribution(false);
        assert_eq!(planner.plan(&request, &unspread).peer_ids(), ids(&["a-top", "a-mid"]));
    }

    #[test]
    fn second_pass_fills_after_regions_run_out() {
        let catalog = catalog(vec![
            peer("a1", "alpha", Classification::Unclassified, 100).with_geolocation("US", "A"),
            peer("a2", "alpha", Classification::Unclassified, 90).with_geolocation("US", "A"),
            peer("x", "alpha", Classification::Unclassified, 80),
            peer("y", "alpha", Classification::Unclassified, 75),
        ]);
        let snapshot = catalog.snapshot();
        let request =
            ReplicationRequest::new("alpha", Classification::Unclassified).with_replicas(3);

        let plan =
            ReplicationPlanner::new(&snapshot).plan(&request, &ReplicationStrategy::default());
        // unknown region counts as one region
        assert_eq!(plan.peer_ids(), ids(&["a1", "x", "a2"]));
    }

    #[test]
    fn blacklisted_peers_are_never_planned() {
        let catalog = catalog(vec![
            peer("good", "alpha", Classification::Unclassified, 90),
            peer("banned", "alpha", Classification::Unclassified, 100),
        ]);
        catalog.blacklist(&id("banned"));
        let snapshot = catalog.snapshot();
        let request = ReplicationRequest::new("alpha", Classification::Unclassified);

        let plan =
            ReplicationPlanner::new(&snapshot).plan(&request, &ReplicationStrategy::default());
        assert_eq!(plan.peer_ids(), ids(&["good"]));
    }

    #[test]
    fn public_nodes_extend_only_unclassified_plans() {
        let public =
            Peer::new(id("pub"), vec!["pub:1".to_string()]).with_trust(TrustScore::new(99));
        let catalog = catalog(vec![
            peer("t1", "alpha", Classification::Secret, 80),
            peer("other", "beta", Classification::Unclassified, 85),
            public,
        ]);
        let snapshot = catalog.snapshot();
        let planner = ReplicationPlanner::new(&snapshot);
        let strategy = ReplicationStrategy::default().with_geographic_distribution(false);

        let open = ReplicationRequest::new("alpha", Classification::Unclassified);
        let plan = planner.plan(&open, &strategy);
        assert_eq!(plan.peer_ids(), ids(&["pub", "other", "t1"]));

        let restricted = ReplicationRequest::new("alpha", Classification::Confidential);
        let plan = planner.plan(&restricted, &strategy);
        assert_eq!(plan.peer_ids(), ids(&["t1"]));
    }

    #[test]
    fn strategy_floor_raises_classification() {
        let catalog = catalog(vec![
            peer("u", "alpha", Classification::Unclassified, 100),
            peer("s", "alpha", Classification::Secret, 80),
        ]);
        let snapshot = catalog.snapshot();
        let strategy =
            ReplicationStrategy::default().with_classification_floor(Classification::Secret);

        let plan = ReplicationPlanner::new(&snapshot)
            .plan(&ReplicationRequest::new("alpha", Classification::Unclassified), &strategy);
        assert_eq!(plan.classification, Classification::Secret);
        assert_eq!(plan.peer_ids(), ids(&["s"]));
    }

    #[test]
    fn metrics_influence_order() {
        let catalog = catalog(vec![
            peer("near", "alpha", Classification::Unclassified, 80),
            peer("far", "alpha", Classification::Unclassified, 80),
        ]);
        catalog.apply_health_results(&[
            HealthResult {
                peer_id: id("near"),
                outcome: ProbeOutcome::Healthy {
                    latency: Duration::from_millis(5),
                },
                generation: 0,
            },
            HealthResult {
                peer_id: id("far"),
                outcome: ProbeOutcome::Healthy {
                    latency: Duration::from_millis(900),
                },
                generation: 0,
            },
        ]);
        let snapshot = catalog.snapshot();
        let strategy = ReplicationStrategy::default().with_geographic_distribution(false);

        let plan = ReplicationPlanner::new(&snapshot)
            .plan(&ReplicationRequest::new("alpha", Classification::Unclassified), &strategy);
        assert_eq!(plan.peer_ids(), ids(&["near", "far"]));
    }

    #[test]
    fn unknown_team_and_zero_replicas_give_empty_plans() {
        let catalog = catalog(vec![peer("s", "alpha", Classification::Secret, 80)]);
        let snapshot = catalog.snapshot();
        let planner = ReplicationPlanner::new(&snapshot);
        let strategy = ReplicationStrategy::default();

        let unknown = ReplicationRequest::new("nobody", Classification::Secret);
        assert!(planner.plan(&unknown, &strategy).is_empty());
        let zero = ReplicationRequest::new("alpha", Classification::Secret).with_replicas(0);
        let plan = planner.plan(&zero, &strategy);
        assert!(plan.is_empty());
        assert!(!plan.is_under_replicated());
    }

    fn arb_classification() -> impl Strategy<Value = Classification> {
        prop_oneof![
            Just(Classification::Unclassified),
            Just(Classification::Confidential),
            Just(Classification::Secret),
            Just(Classification::TopSecret),
        ]
    }

    proptest! {
        #[test]
        fn plans_respect_invariants(
            peers in prop::collection::vec(
                (arb_classification(), 0i64..=100, prop::bool::ANY, 0u8..3),
                0..24,
            ),
            required in arb_classification(),
            desired in 0usize..8,
            geographic in prop::bool::ANY,
        ) {
            let catalog = catalog(Vec::new());
            for (index, (classification, trust, banned, region)) in peers.iter().enumerate() {
                let raw = format!("p{index}");
                let mut candidate = peer(&raw, "alpha", *classification, *trust);
                if *region > 0 {
                    candidate = candidate.with_geolocation("XX", &format!("r{region}"));
                }
                catalog.upsert(candidate);
                if *banned {
                    catalog.blacklist(&id(&raw));
                }
            }
            let snapshot = catalog.snapshot();
            let strategy = ReplicationStrategy::default().with_geographic_distribution(geographic);
            let request = ReplicationRequest::new("alpha", required).with_replicas(desired);

            let plan = ReplicationPlanner::new(&snapshot).plan(&request, &strategy);
            prop_assert!(plan.len() <= desired);

            let mut seen = HashSet::new();
            for planned in &plan.replicas {
                prop_assert!(seen.insert(planned.peer_id.clone()));
                prop_assert!(!snapshot.topology().is_blacklisted(&planned.peer_id));
                let holder = snapshot.topology().peer(&planned.peer_id);
                prop_assert!(holder.is_some_and(|p| TrustScorer::is_suitable(p, required)));
            }
        }
    }
}
