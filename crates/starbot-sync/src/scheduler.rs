//! Cron-driven jobs: dense leaderboard refresh, daily announcement and the
//! nightly season check that loads or unloads the other two.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

use crate::engine::SyncEngine;
use crate::season::SeasonTransition;

/// First hour of the UTC day, when puzzles unlock: every ten minutes.
pub const REFRESH_FIRST_HOUR_CRON: &str = "0 0,10,20,30,40,50 0 * * *";
/// Rest of the day: every fifteen minutes.
pub const REFRESH_CRON: &str = "0 0,15,30,45 1-23 * * *";
pub const SEASON_CHECK_CRON: &str = "0 0 0 * * *";

pub fn announce_cron(hour_utc: u32) -> String {
    format!("0 0 {hour_utc} * * *")
}

/// Run one job body in its own task. Errors and panics are logged and
/// counted; the job stays scheduled either way.
pub async fn supervise<F>(job: &'static str, restarts: &AtomicUsize, body: F) -> bool
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    match tokio::spawn(body).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            let restarts = restarts.fetch_add(1, Ordering::SeqCst) + 1;
            error!(job, restarts, error = ?err, "scheduled job failed");
            false
        }
        Err(join_err) => {
            let restarts = restarts.fetch_add(1, Ordering::SeqCst) + 1;
            error!(job, restarts, error = %join_err, "scheduled job panicked");
            false
        }
    }
}

pub struct BotScheduler {
    engine: Arc<SyncEngine>,
    sched: JobScheduler,
    announce_hour_utc: u32,
    season_jobs: Mutex<Vec<Uuid>>,
}

impl BotScheduler {
    pub async fn new(engine: Arc<SyncEngine>, announce_hour_utc: u32) -> Result<Arc<Self>> {
        let sched = JobScheduler::new().await.context("creating scheduler")?;
        Ok(Arc::new(Self {
            engine,
            sched,
            announce_hour_utc,
            season_jobs: Mutex::new(Vec::new()),
        }))
    }

    /// Wait for the platform, load the season jobs if in season, then start
    /// ticking.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.engine
            .platform()
            .wait_until_ready()
            .await
            .context("waiting for platform readiness")?;
        self.initial_season().await?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let restarts = self.engine.job_restarts();
        let season_job = Job::new_async(SEASON_CHECK_CRON, move |_uuid, _l| {
            let weak = weak.clone();
            let restarts = restarts.clone();
            Box::pin(async move {
                let Some(this) = weak.upgrade() else {
                    return;
                };
                supervise("season_check", &restarts, async move {
                    this.apply_season().await.map(|_| ())
                })
                .await;
            })
        })
        .context("creating season check job")?;
        self.sched
            .add(season_job)
            .await
            .context("adding season check job")?;
        self.sched.start().await.context("starting scheduler")?;
        info!("scheduler started");
        Ok(())
    }

    pub async fn apply_season(&self) -> Result<SeasonTransition> {
        let transition = self.engine.gate().transition();
        match transition {
            SeasonTransition::Enter => self.activate().await?,
            SeasonTransition::Leave => self.deactivate().await?,
            SeasonTransition::Unchanged => {}
        }
        Ok(transition)
    }

    /// First season check after startup. Out of season the roster is cleared
    /// even though nothing is loaded, since the season may have ended while
    /// the bot was down. Clearing a clean roster changes nothing.
    async fn initial_season(&self) -> Result<SeasonTransition> {
        let transition = self.apply_season().await?;
        if transition == SeasonTransition::Unchanged && !self.engine.gate().is_active() {
            let report = self.engine.deactivate().await?;
            info!(?report, "started out of season, roster cleared");
        }
        Ok(transition)
    }

    pub async fn season_job_count(&self) -> usize {
        self.season_jobs.lock().await.len()
    }

    async fn activate(&self) -> Result<()> {
        self.engine.activate().await?;
        let mut jobs = self.season_jobs.lock().await;
        for cron in [REFRESH_FIRST_HOUR_CRON, REFRESH_CRON] {
            let id = self
                .sched
                .add(self.refresh_job(cron)?)
                .await
                .context("adding refresh job")?;
            jobs.push(id);
        }
        if self.engine.announces() {
            let id = self
                .sched
                .add(self.announce_job()?)
                .await
                .context("adding announcement job")?;
            jobs.push(id);
        }
        Ok(())
    }

    async fn deactivate(&self) -> Result<()> {
        let jobs = std::mem::take(&mut *self.season_jobs.lock().await);
        for id in &jobs {
            self.sched
                .remove(id)
                .await
                .with_context(|| format!("removing job {id}"))?;
        }
        self.engine.deactivate().await?;
        Ok(())
    }

    fn refresh_job(&self, cron: &str) -> Result<Job> {
        let engine = self.engine.clone();
        let restarts = engine.job_restarts();
        Job::new_async(cron, move |_uuid, _l| {
            let engine = engine.clone();
            let restarts = restarts.clone();
            Box::pin(async move {
                supervise("refresh", &restarts, async move {
                    engine.refresh_cycle(false).await.map(|_| ())
                })
                .await;
            })
        })
        .with_context(|| format!("creating refresh job for cron {cron}"))
    }

    fn announce_job(&self) -> Result<Job> {
        let engine = self.engine.clone();
        let restarts = engine.job_restarts();
        let cron = announce_cron(self.announce_hour_utc);
        Job::new_async(cron.as_str(), move |_uuid, _l| {
            let engine = engine.clone();
            let restarts = restarts.clone();
            Box::pin(async move {
                supervise("announce", &restarts, async move {
                    let outcome = engine.announce_today().await?;
                    info!(?outcome, "announcement job finished");
                    Ok::<(), anyhow::Error>(())
                })
                .await;
            })
        })
        .with_context(|| format!("creating announcement job for cron {cron}"))
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut sched = self.sched.clone();
        sched.shutdown().await.context("stopping scheduler")
    }
}
