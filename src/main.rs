use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use socialbot::augment::{CommentConstraints, OpenAiCommentator};
use socialbot::{
    build_bindings, CronSchedule, DedupStore, DispatchEngine, Fetcher, Orchestrator, Settings,
};

#[derive(Parser)]
#[command(name = "socialbot", version, about = "Polls RSS feeds and dispatches new items to social destinations")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short = 'c', long, default_value = "./settings.json")]
    config: PathBuf,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    // --debug wins; otherwise the config may override the default level.
    let level = if cli.debug {
        "debug".to_string()
    } else {
        settings.log_level.clone().unwrap_or_else(|| "info".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let schedule = CronSchedule::parse(&settings.cron)?;
    let destinations = settings.build_destinations()?;
    let mute = settings.mute_evaluator()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting socialbot");
    info!(config = %cli.config.display(), cron = schedule.expression(), "schedule configured");
    if let Some(times) = &settings.mute {
        let muted_now = destinations
            .iter()
            .any(|d| mute.is_muted(Local::now().time(), d));
        info!(from = %times.from, to = %times.to, muted_now, "mute window configured");
    }
    for destination in &destinations {
        info!(destination = %destination.id(), mute_eligible = destination.mute_eligible, "destination enabled");
    }
    info!(
        days_of_news = settings.days_of_news,
        days_of_retention = settings.days_of_retention,
        max_attempts = settings.max_attempts,
        "retention configured"
    );

    let commentator = match &settings.ai {
        Some(ai) => {
            info!(
                model = %ai.model,
                base_url = %ai.base_url,
                max_chars = ai.max_chars,
                language = %ai.language,
                "AI commenting enabled"
            );
            let constraints = CommentConstraints {
                max_chars: ai.max_chars,
                language: ai.language.clone(),
            };
            Some((
                Arc::new(OpenAiCommentator::new(ai)?) as Arc<dyn socialbot::augment::Commentator>,
                constraints,
            ))
        }
        None => {
            info!("AI commenting disabled");
            None
        }
    };

    let store = Arc::new(DedupStore::open(&settings.database).await?);
    let stats = store.dispatch_stats().await?;
    if !stats.is_empty() {
        info!(?stats, "existing dispatch state");
    }

    let fetcher = Arc::new(Fetcher::new(settings.fetch.clone())?);
    let engine = DispatchEngine::new(store.clone(), mute, commentator, settings.max_attempts);
    let bindings = build_bindings(&settings, &destinations)?;
    let orchestrator = Arc::new(Orchestrator::new(
        fetcher,
        store.clone(),
        engine,
        bindings,
        settings.days_of_news,
        settings.days_of_retention,
    ));

    // Run one cycle immediately, then hand over to the cron loop.
    orchestrator.run_cycle().await?;

    tokio::select! {
        result = socialbot::scheduler::run(orchestrator, schedule) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown requested; pending dispatches will be retried on the next run");
        }
    }

    store.close().await;
    info!("socialbot stopped");
    Ok(())
}
