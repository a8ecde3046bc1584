//! Owns the current leaderboard snapshot and drives refresh, reconcile and
//! seasonal activation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use starbot_adapters::{FetchError, LeaderboardSource, Platform, Presence};
use starbot_core::LeaderboardSnapshot;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::announce::{AnnounceOutcome, Announcer};
use crate::reconcile::{BatchReport, MemberOutcome, ReconcileError, Reconciler};
use crate::season::SeasonGate;

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// `false` when the fetch failed and the previous snapshot was kept.
    pub fetched: bool,
    pub snapshot_members: usize,
    /// `None` when reconciliation was gated off.
    pub batch: Option<BatchReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub season_active: bool,
    pub loaded: bool,
    pub snapshot_members: usize,
    pub last_refresh: Option<DateTime<Utc>>,
    pub presence: &'static str,
    pub job_restarts: usize,
}

pub struct SyncEngine {
    leaderboard: Arc<dyn LeaderboardSource>,
    reconciler: Reconciler,
    announcer: Option<Announcer>,
    gate: SeasonGate,
    snapshot: RwLock<Arc<LeaderboardSnapshot>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    job_restarts: Arc<AtomicUsize>,
}

impl SyncEngine {
    pub fn new(
        leaderboard: Arc<dyn LeaderboardSource>,
        reconciler: Reconciler,
        announcer: Option<Announcer>,
        gate: SeasonGate,
    ) -> Self {
        Self {
            leaderboard,
            reconciler,
            announcer,
            gate,
            snapshot: RwLock::new(Arc::new(LeaderboardSnapshot::empty())),
            last_refresh: RwLock::new(None),
            job_restarts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gate(&self) -> &SeasonGate {
        &self.gate
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        self.reconciler.platform()
    }

    pub fn announces(&self) -> bool {
        self.announcer.is_some()
    }

    pub fn job_restarts(&self) -> Arc<AtomicUsize> {
        self.job_restarts.clone()
    }

    /// The snapshot as of the last successful fetch. Readers keep their `Arc`
    /// even if a refresh swaps in a newer one meanwhile.
    pub fn snapshot(&self) -> Arc<LeaderboardSnapshot> {
        self.snapshot.read().clone()
    }

    /// Fetch and swap in a new snapshot. On failure the stored snapshot is
    /// left untouched.
    pub async fn refresh_snapshot(&self) -> Result<Arc<LeaderboardSnapshot>, FetchError> {
        match self.leaderboard.fetch_leaderboard().await {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                *self.snapshot.write() = fresh.clone();
                *self.last_refresh.write() = Some(self.gate.now());
                info!(members = fresh.len(), event = %fresh.event, "leaderboard refreshed");
                Ok(fresh)
            }
            Err(err) => {
                warn!(error = %err, "leaderboard refresh failed; keeping previous snapshot");
                Err(err)
            }
        }
    }

    /// Refresh, but give up after `budget` and serve whatever is stored.
    pub async fn snapshot_within(&self, budget: Duration) -> Arc<LeaderboardSnapshot> {
        match tokio::time::timeout(budget, self.refresh_snapshot()).await {
            Ok(Ok(fresh)) => fresh,
            Ok(Err(_)) => self.snapshot(),
            Err(_) => {
                warn!(?budget, "leaderboard refresh exceeded budget; serving stored snapshot");
                self.snapshot()
            }
        }
    }

    /// Reconcile the whole roster against the stored snapshot. Returns `None`
    /// out of season unless `bypass` is set.
    pub async fn reconcile_all(&self, bypass: bool) -> Result<Option<BatchReport>, ReconcileError> {
        if !bypass && !self.gate.is_active() {
            return Ok(None);
        }
        let snapshot = self.snapshot();
        let report = self.reconciler.reconcile_roster(&snapshot).await?;
        info!(
            examined = report.examined,
            mutated = report.mutated,
            skipped = report.skipped,
            failed = report.failed,
            "roster reconciled"
        );
        Ok(Some(report))
    }

    /// One scheduled refresh: fetch, then reconcile whether or not the fetch
    /// succeeded.
    pub async fn refresh_cycle(&self, bypass: bool) -> anyhow::Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        async move {
            let fetched = self.refresh_snapshot().await.is_ok();
            let batch = self
                .reconcile_all(bypass)
                .await
                .context("reconciling roster")?;
            Ok(CycleReport {
                cycle_id,
                fetched,
                snapshot_members: self.snapshot().len(),
                batch,
            })
        }
        .instrument(info_span!("refresh_cycle", %cycle_id, bypass))
        .await
    }

    /// Reconcile one member right away, e.g. after they linked or unlinked.
    /// Returns `None` out of season or when the user is not in the community.
    pub async fn reconcile_user(&self, user_id: u64) -> Result<Option<MemberOutcome>, ReconcileError> {
        if !self.gate.is_active() {
            return Ok(None);
        }
        let platform = self.platform();
        let Some(member) = platform.member(user_id).await? else {
            return Ok(None);
        };
        let guild = platform.guild().await?;
        let snapshot = self.snapshot();
        Ok(Some(
            self.reconciler
                .reconcile_member(&member, &guild, &snapshot)
                .await,
        ))
    }

    pub async fn clear_all(&self) -> Result<BatchReport, ReconcileError> {
        let report = self.reconciler.clear_roster().await?;
        info!(mutated = report.mutated, failed = report.failed, "roster cleared");
        Ok(report)
    }

    /// Bring the subsystem up: load a snapshot (the empty one stays if the
    /// fetch fails) and go online.
    pub async fn activate(&self) -> anyhow::Result<()> {
        if self.refresh_snapshot().await.is_err() {
            warn!("initial leaderboard fetch failed; starting with stored snapshot");
        }
        self.gate.mark_loaded(true);
        self.platform()
            .set_presence(Presence::Online)
            .await
            .context("setting presence online")?;
        info!("sync subsystem activated");
        Ok(())
    }

    /// Strip every suffix and role grant, then go offline.
    pub async fn deactivate(&self) -> anyhow::Result<BatchReport> {
        let report = self.clear_all().await.context("clearing roster")?;
        self.gate.mark_loaded(false);
        self.platform()
            .set_presence(Presence::Offline)
            .await
            .context("setting presence offline")?;
        info!("sync subsystem deactivated");
        Ok(report)
    }

    pub async fn announce_today(&self) -> anyhow::Result<AnnounceOutcome> {
        let Some(announcer) = &self.announcer else {
            return Ok(AnnounceOutcome::Disabled);
        };
        let now = self.gate.now();
        if !self.gate.is_active_at(now) {
            return Ok(AnnounceOutcome::OutOfSeason);
        }
        announcer.announce(now).await
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            season_active: self.gate.is_active(),
            loaded: self.gate.is_loaded(),
            snapshot_members: self.snapshot().len(),
            last_refresh: *self.last_refresh.read(),
            presence: match self.platform().presence() {
                Presence::Online => "online",
                Presence::Offline => "offline",
            },
            job_restarts: self.job_restarts.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use chrono::TimeZone;
    use starbot_adapters::testing::{member, MemoryPlatform, ScriptedLeaderboard, StaticPuzzles};
    use starbot_adapters::GuildInfo;
    use starbot_core::MemberStats;
    use starbot_storage::MemoryLinkStore;

    use crate::reconcile::RolePolicy;
    use crate::season::{fixed_clock, Clock};

    pub(crate) const ROLE: u64 = 77;
    pub(crate) const FORUM: u64 = 900;
    pub(crate) const GUILD: GuildInfo = GuildInfo {
        owner_id: 1,
        bot_top_role_position: 10,
    };

    pub(crate) fn december() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 3, 5, 0, 0).single().unwrap()
    }

    pub(crate) fn january() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap()
    }

    pub(crate) fn snapshot(entries: &[(u64, &str, u32, u64)]) -> LeaderboardSnapshot {
        LeaderboardSnapshot {
            members: entries
                .iter()
                .map(|(id, name, stars, score)| {
                    (
                        id.to_string(),
                        MemberStats {
                            id: *id,
                            name: Some(name.to_string()),
                            stars: *stars,
                            local_score: *score,
                            global_score: 0,
                            last_star_ts: 0,
                            completion_day_level: BTreeMap::new(),
                        },
                    )
                })
                .collect(),
            event: "2024".into(),
            owner_id: 0,
        }
    }

    pub(crate) struct Harness {
        pub platform: Arc<MemoryPlatform>,
        pub source: Arc<ScriptedLeaderboard>,
        pub links: Arc<MemoryLinkStore>,
        pub engine: Arc<SyncEngine>,
    }

    pub(crate) fn harness(clock: Clock, source: ScriptedLeaderboard) -> Harness {
        let platform = Arc::new(MemoryPlatform::with_members(
            GUILD,
            [
                member(5, "duck", Some("Duck"), 1),
                member(6, "goose", None, 1),
                member(7, "swan", Some("Swan ⭐2"), 1),
            ],
        ));
        let source = Arc::new(source);
        let links = Arc::new(MemoryLinkStore::with_links([(5, 500), (6, 600)]));
        let reconciler = Reconciler::new(
            links.clone(),
            platform.clone(),
            ROLE,
            RolePolicy::StarsRequired,
        );
        let announcer = Announcer::new(
            platform.clone(),
            Arc::new(StaticPuzzles::new("Mull It Over")),
            FORUM,
            ROLE,
            25,
        );
        let engine = Arc::new(SyncEngine::new(
            source.clone(),
            reconciler,
            Some(announcer),
            SeasonGate::with_clock(12, clock),
        ));
        Harness {
            platform,
            source,
            links,
            engine,
        }
    }

    #[tokio::test]
    async fn refresh_cycle_swaps_snapshot_and_reconciles() {
        let h = harness(
            fixed_clock(december()),
            ScriptedLeaderboard::returning(snapshot(&[(500, "mallard", 6, 40)])),
        );

        let report = h.engine.refresh_cycle(false).await.unwrap();
        assert!(report.fetched);
        assert_eq!(report.snapshot_members, 1);
        let batch = report.batch.unwrap();
        assert_eq!(batch.examined, 3);
        assert_eq!(h.platform.snapshot_member(5).unwrap().display_name(), "Duck ⭐6");
        assert!(h.platform.snapshot_member(5).unwrap().has_role(ROLE));
        assert!(h.engine.status().last_refresh.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_keeps_stale_snapshot_and_still_reconciles() {
        let h = harness(
            fixed_clock(december()),
            ScriptedLeaderboard::returning(snapshot(&[(500, "mallard", 6, 40)])),
        );
        h.engine.refresh_cycle(false).await.unwrap();
        let before = h.engine.snapshot();

        h.source.set(None);
        // Drift the name so the reconcile pass has something to fix.
        h.platform.insert_member(member(5, "duck", Some("Duck ⭐1"), 1));
        h.platform.clear_edits();

        let report = h.engine.refresh_cycle(false).await.unwrap();
        assert!(!report.fetched);
        assert!(Arc::ptr_eq(&before, &h.engine.snapshot()));
        assert_eq!(report.batch.unwrap().mutated, 1);
        assert_eq!(h.platform.snapshot_member(5).unwrap().display_name(), "Duck ⭐6");
    }

    #[tokio::test]
    async fn out_of_season_reconcile_needs_bypass() {
        let h = harness(
            fixed_clock(january()),
            ScriptedLeaderboard::returning(snapshot(&[(500, "mallard", 6, 40)])),
        );

        let gated = h.engine.refresh_cycle(false).await.unwrap();
        assert!(gated.fetched);
        assert!(gated.batch.is_none());
        assert!(h.platform.edits().is_empty());
        assert_eq!(h.engine.reconcile_user(5).await.unwrap(), None);

        let forced = h.engine.refresh_cycle(true).await.unwrap();
        assert_eq!(forced.batch.unwrap().mutated, 2);
    }

    #[tokio::test]
    async fn activation_survives_failed_initial_fetch() {
        let h = harness(fixed_clock(december()), ScriptedLeaderboard::failing());

        h.engine.activate().await.unwrap();
        assert!(h.engine.snapshot().is_empty());
        let status = h.engine.status();
        assert!(status.loaded);
        assert_eq!(status.presence, "online");
        assert_eq!(h.source.calls(), 1);
    }

    #[tokio::test]
    async fn deactivation_clears_everyone_and_goes_offline() {
        let h = harness(
            fixed_clock(december()),
            ScriptedLeaderboard::returning(snapshot(&[(500, "mallard", 6, 40), (600, "g", 2, 9)])),
        );
        h.engine.activate().await.unwrap();
        h.engine.reconcile_all(false).await.unwrap();
        // Unlinked member carrying a stale suffix.
        h.platform.insert_member(member(8, "heron", Some("Heron ⭐31"), 1));

        let report = h.engine.deactivate().await.unwrap();
        assert_eq!(report.failed, 0);
        for id in [5, 6, 7, 8] {
            let m = h.platform.snapshot_member(id).unwrap();
            assert!(!m.display_name().contains('⭐'), "{}", m.display_name());
            assert!(!m.has_role(ROLE));
        }
        assert_eq!(h.engine.status().presence, "offline");
        assert!(!h.engine.gate().is_loaded());
    }

    #[tokio::test]
    async fn reconcile_user_ignores_strangers() {
        let h = harness(fixed_clock(december()), ScriptedLeaderboard::failing());
        assert_eq!(h.engine.reconcile_user(4242).await.unwrap(), None);
        assert_eq!(
            h.engine.reconcile_user(6).await.unwrap(),
            Some(MemberOutcome::Unchanged)
        );
    }

    #[tokio::test]
    async fn announce_respects_season() {
        let h = harness(fixed_clock(january()), ScriptedLeaderboard::failing());
        assert_eq!(
            h.engine.announce_today().await.unwrap(),
            AnnounceOutcome::OutOfSeason
        );

        let h = harness(fixed_clock(december()), ScriptedLeaderboard::failing());
        assert!(matches!(
            h.engine.announce_today().await.unwrap(),
            AnnounceOutcome::Posted(_)
        ));
    }
}
