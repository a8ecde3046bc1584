use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use starbot_storage::PgLinkStore;
use starbot_sync::Bot;
use starbot_web::{AppState, InteractionVerifier};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "starbot")]
#[command(about = "Advent of Code leaderboard stars in member nicknames")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scheduler plus interactions endpoint (default).
    Run,
    /// One refresh and full reconcile, regardless of season.
    Sync,
    /// Strip star suffixes and the tracking role from everyone.
    Clear,
    Migrate,
    /// Print the rendered leaderboard.
    Leaderboard,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run().await?,
        Commands::Sync => {
            let report = starbot_sync::run_sync_once_from_env().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Clear => {
            let bot = Bot::from_env().await?;
            let report = bot.engine.clear_all().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Migrate => {
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
            PgLinkStore::connect(&url).await?.migrate().await?;
            println!("migrations applied");
        }
        Commands::Leaderboard => {
            let bot = Bot::from_env().await?;
            let first = bot.commands.leaderboard(0).await?;
            println!("{}", first.content);
            for page in 1..first.pages {
                println!();
                println!("{}", bot.commands.leaderboard_page(page).await?.content);
            }
        }
    }

    Ok(())
}

async fn run() -> Result<()> {
    let bot = Bot::from_env().await?;
    bot.links.migrate().await?;
    let verifier = InteractionVerifier::from_hex(&bot.config.discord_public_key)
        .context("decoding DISCORD_PUBLIC_KEY")?;

    let scheduler = if bot.config.scheduler_enabled {
        let scheduler = bot.scheduler().await?;
        let starting = scheduler.clone();
        // Readiness can take a while; the endpoint has to answer meanwhile.
        tokio::spawn(async move {
            if let Err(err) = starting.start().await {
                error!(error = ?err, "scheduler failed to start");
            }
        });
        Some(scheduler)
    } else {
        info!("scheduler disabled");
        None
    };

    let state = AppState::new(bot.commands.clone(), bot.engine.clone(), verifier);
    tokio::select! {
        served = starbot_web::serve(state, bot.config.web_port) => served?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }
    Ok(())
}
