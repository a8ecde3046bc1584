//! Leaderboard synchronization engine and its wiring.

pub mod announce;
pub mod commands;
pub mod config;
pub mod engine;
pub mod reconcile;
pub mod scheduler;
pub mod season;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use starbot_adapters::{AocClient, AocConfig, DiscordConfig, DiscordRest};
use starbot_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher, PgLinkStore};

pub use announce::{thread_marker, thread_name, AnnounceOutcome, Announcer};
pub use commands::{
    escape_markdown, render_leaderboard, CommandError, CommandOutcome, CommandSurface,
    LeaderboardPage, Reply, LEADERBOARD_PAGE_SIZE,
};
pub use config::{BotConfig, ConfigError};
pub use engine::{CycleReport, EngineStatus, SyncEngine};
pub use reconcile::{
    plan, BatchReport, Decision, MemberOutcome, ReconcileError, Reconciler, RolePolicy,
};
pub use scheduler::{announce_cron, supervise, BotScheduler};
pub use season::{Clock, SeasonGate, SeasonTransition};

pub const CRATE_NAME: &str = "starbot-sync";

/// Interaction replies must be sent within a few seconds.
const COMMAND_REFRESH_BUDGET: Duration = Duration::from_millis(2500);

/// Everything a running bot needs, built from configuration.
pub struct Bot {
    pub config: BotConfig,
    pub links: Arc<PgLinkStore>,
    pub platform: Arc<DiscordRest>,
    pub engine: Arc<SyncEngine>,
    pub commands: Arc<CommandSurface>,
}

impl Bot {
    pub async fn from_config(config: BotConfig) -> Result<Self> {
        let links = Arc::new(PgLinkStore::connect(&config.database_url).await?);
        let timeout = Duration::from_secs(config.http_timeout_secs);

        let http = HttpFetcher::new(HttpClientConfig {
            timeout,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let aoc = Arc::new(AocClient::new(
            http,
            AocConfig {
                base_url: config.aoc_base_url.clone(),
                leaderboard_id: config.leaderboard_id.clone(),
                session: config.aoc_session.clone(),
                year: config.aoc_year,
            },
        ));
        let platform = Arc::new(
            DiscordRest::new(DiscordConfig {
                api_base: config.discord_api_base.clone(),
                token: config.discord_token.clone(),
                guild_id: config.guild_id,
                user_agent: config.user_agent.clone(),
                timeout,
                backoff: BackoffPolicy::default(),
            })
            .context("building platform client")?,
        );

        let reconciler = Reconciler::new(
            links.clone(),
            platform.clone(),
            config.role_id,
            config.role_policy,
        );
        let announcer = config.announce_forum_id.map(|forum_id| {
            Announcer::new(
                platform.clone(),
                aoc.clone(),
                forum_id,
                config.role_id,
                config.event_last_day,
            )
        });
        let engine = Arc::new(SyncEngine::new(
            aoc,
            reconciler,
            announcer,
            SeasonGate::new(config.event_month),
        ));
        let commands = Arc::new(CommandSurface::new(
            links.clone(),
            engine.clone(),
            config.leaderboard_invite.clone(),
            COMMAND_REFRESH_BUDGET,
        ));

        Ok(Self {
            config,
            links,
            platform,
            engine,
            commands,
        })
    }

    pub async fn from_env() -> Result<Self> {
        let config = BotConfig::from_env().context("loading configuration")?;
        Self::from_config(config).await
    }

    pub async fn scheduler(&self) -> Result<Arc<BotScheduler>> {
        BotScheduler::new(self.engine.clone(), self.config.announce_hour_utc).await
    }
}

/// Administrative full refresh: one cycle with the season gate bypassed.
pub async fn run_sync_once_from_env() -> Result<CycleReport> {
    let bot = Bot::from_env().await?;
    bot.engine.refresh_cycle(true).await
}
