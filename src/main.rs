use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{NaiveTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use shortcast::config::Config;
use shortcast::models::{Cadence, MetadataOverrides, Video};
use shortcast::ops::{self, OpsState};
use shortcast::scheduler::{parse_start, Dispatcher, Worker, WorkerEvent};
use shortcast::service::{NewAccount, SchedulingService};
use shortcast::storage::SqliteStore;
use shortcast::transport::{DryRunTransport, StaticCredentials};

#[derive(Parser)]
#[command(
    name = "shortcast",
    version,
    about = "Multi-account YouTube Shorts upload scheduler with daily quota rotation",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json); overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the upload worker and the ops endpoint
    Worker {
        /// Access token handed to the transport
        #[arg(long, env = "SHORTCAST_ACCESS_TOKEN", default_value = "dry-run")]
        token: String,
    },

    /// Register an API project
    AddProject {
        name: String,

        /// Daily quota units (defaults to the configured value)
        #[arg(short, long)]
        quota: Option<u64>,
    },

    /// Register a publishing account
    AddAccount {
        name: String,

        /// API project the account is bound to
        #[arg(short, long)]
        project: Uuid,

        #[arg(short, long, default_value = "general")]
        theme: String,

        /// Uploads per day (1-3)
        #[arg(long, default_value = "2")]
        cadence: u8,

        /// Preferred upload times, HH:MM (up to 3)
        #[arg(long, value_delimiter = ',')]
        times: Vec<String>,

        /// Default hashtags
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Never charge another project when the bound one is exhausted
        #[arg(long)]
        no_rotation: bool,
    },

    /// Add a candidate video
    AddVideo {
        /// Identifier on the source platform
        source_id: String,

        #[arg(short, long, default_value = "general")]
        theme: String,

        #[arg(short, long, default_value = "30")]
        duration: u32,

        #[arg(long)]
        title: Option<String>,
    },

    /// Schedule one video at a specific time
    Pick {
        #[arg(short, long)]
        account: Uuid,

        #[arg(long)]
        video: Uuid,

        /// RFC 3339 instant
        #[arg(long)]
        at: String,

        #[arg(long)]
        title: Option<String>,
    },

    /// Spread videos over days at the account's cadence
    Schedule {
        #[arg(short, long)]
        account: Uuid,

        #[arg(long, value_delimiter = ',', required = true)]
        videos: Vec<Uuid>,

        /// RFC 3339 start instant
        #[arg(long)]
        start: String,

        /// Overrides the account's cadence
        #[arg(long)]
        cadence: Option<u8>,
    },

    /// Preview a schedule without writing anything
    Plan {
        #[arg(short, long)]
        account: Uuid,

        #[arg(short = 'n', long)]
        count: usize,

        #[arg(long)]
        start: String,

        #[arg(long)]
        cadence: Option<u8>,
    },

    /// Move an upload to a new time
    Reschedule {
        upload: Uuid,

        #[arg(long)]
        at: String,
    },

    /// Delete a pending upload and free its video
    Delete { upload: Uuid },

    /// Deactivate an account and hold its pending uploads
    Pause { account: Uuid },

    /// Reactivate an account
    Resume { account: Uuid },

    /// Zero every project's usage now
    ResetQuotas,

    /// Print quota and upload counts as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = cli.log_format.clone() {
        config.logging.format = format;
    }
    config.validate().context("Invalid configuration")?;

    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    let store = Arc::new(SqliteStore::new(&config.database.sqlite_path)?);
    let service = Arc::new(SchedulingService::new(
        store,
        config.planner()?,
        config.service(),
    )?);

    match cli.command {
        Commands::Worker { token } => run_worker(&config, service, token).await?,

        Commands::AddProject { name, quota } => {
            let project = service.create_project(&name, quota)?;
            println!("{}", project.id);
        }

        Commands::AddAccount {
            name,
            project,
            theme,
            cadence,
            times,
            tags,
            no_rotation,
        } => {
            let mut input = NewAccount::new(name, project, theme);
            input.cadence = Cadence::new(cadence)?;
            input.upload_times = parse_times(&times)?;
            input.default_tags = tags;
            input.allow_rotation = !no_rotation;
            let account = service.create_account(input)?;
            println!("{}", account.id);
        }

        Commands::AddVideo {
            source_id,
            theme,
            duration,
            title,
        } => {
            let mut video = Video::new(source_id, theme, duration, Utc::now());
            video.title = title;
            let video = service.add_video(&video)?;
            println!("{}", video.id);
        }

        Commands::Pick {
            account,
            video,
            at,
            title,
        } => {
            let overrides = MetadataOverrides {
                title,
                ..Default::default()
            };
            let upload = service.pick_video(video, account, parse_start(&at)?, overrides)?;
            println!("{}\t{}", upload.id, upload.scheduled_for.to_rfc3339());
        }

        Commands::Schedule {
            account,
            videos,
            start,
            cadence,
        } => {
            let cadence = cadence.map(Cadence::new).transpose()?;
            let uploads = service.bulk_schedule(account, &videos, parse_start(&start)?, cadence)?;
            for upload in uploads {
                println!(
                    "{}\t{}\t{}",
                    upload.id,
                    upload.video_id,
                    upload.scheduled_for.to_rfc3339()
                );
            }
        }

        Commands::Plan {
            account,
            count,
            start,
            cadence,
        } => {
            let cadence = cadence.map(Cadence::new).transpose()?;
            let slots = service.preview_schedule(account, count, parse_start(&start)?, cadence)?;
            for slot in slots {
                println!(
                    "#{:<3} day {:<3} slot {}  {}",
                    slot.index,
                    slot.day,
                    slot.slot,
                    slot.scheduled_for.to_rfc3339()
                );
            }
        }

        Commands::Reschedule { upload, at } => {
            let upload = service.reschedule(upload, parse_start(&at)?)?;
            println!("{}\t{}", upload.id, upload.scheduled_for.to_rfc3339());
        }

        Commands::Delete { upload } => {
            service.delete_upload(upload)?;
            println!("deleted {upload}");
        }

        Commands::Pause { account } => {
            let count = service.pause_account(account)?;
            println!("paused {count} uploads");
        }

        Commands::Resume { account } => {
            let count = service.resume_account(account)?;
            println!("resumed {count} uploads");
        }

        Commands::ResetQuotas => {
            let count = service.ledger().force_reset()?;
            println!("reset {count} projects");
        }

        Commands::Status => {
            let metrics = service.dashboard_metrics()?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
    }

    Ok(())
}

async fn run_worker(config: &Config, service: Arc<SchedulingService>, token: String) -> Result<()> {
    shortcast::metrics::init_metrics()
        .map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {e}"))?;

    let dispatcher = Arc::new(Dispatcher::new(
        service.store(),
        service.ledger(),
        Arc::new(DryRunTransport),
        Arc::new(StaticCredentials::new(token)),
        config.dispatcher(),
    ));
    let worker = Arc::new(Worker::new(dispatcher, service.ledger(), config.worker_loop()));

    let mut events = worker.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                WorkerEvent::CycleCompleted(report) if report.attempted() > 0 => {
                    tracing::info!(
                        succeeded = report.succeeded,
                        retrying = report.retrying,
                        failed = report.failed,
                        deferred = report.deferred_quota,
                        "Cycle completed"
                    );
                }
                WorkerEvent::QuotaReset { projects, .. } => {
                    tracing::info!(count = projects.len(), "Quota windows rolled over");
                }
                WorkerEvent::Stopped => break,
                _ => {}
            }
        }
    });

    let (ops_shutdown, mut ops_rx) = tokio::sync::watch::channel(false);
    let ops_state = OpsState::new(service);
    let ops_task = if config.ops.enabled {
        let addr = config.ops.bind_addr()?;
        let state = ops_state.clone();
        Some(tokio::spawn(async move {
            ops::serve(addr, state, async move {
                let _ = ops_rx.changed().await;
            })
            .await
        }))
    } else {
        None
    };

    let stopper = worker.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            stopper.stop();
        }
    });

    ops_state.set_worker_running(true);
    let result = worker.run().await;
    ops_state.set_worker_running(false);

    ops_shutdown.send_replace(true);
    if let Some(task) = ops_task {
        task.await??;
    }

    result.map_err(Into::into)
}

fn parse_times(raw: &[String]) -> Result<Vec<NaiveTime>> {
    raw.iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M")
                .with_context(|| format!("Invalid upload time '{t}', expected HH:MM"))
        })
        .collect()
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("shortcast=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(format!("shortcast={level},warn"))
        })
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
