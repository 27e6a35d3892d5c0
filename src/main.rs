//! # Maildrip — Drip-Campaign Engine CLI
//!
//! Usage:
//!   maildrip run                                  # Start the scheduler
//!   maildrip subscribe a@example.com onboarding   # Enroll an address
//!   maildrip run-drip                             # One dispatch pass, now
//!   maildrip campaigns                            # List campaign definitions

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use maildrip_core::config::MaildripConfig;
use maildrip_core::traits::{Directory, Transport};
use maildrip_core::types::SubscriptionStatus;
use maildrip_engine::{CampaignRegistry, DripEngine};
use maildrip_store::{SqliteDirectory, SubscriptionStore};
use maildrip_transport::{LogTransport, SmtpMailer};

#[derive(Parser)]
#[command(name = "maildrip", version, about = "💧 Maildrip — drip-campaign engine")]
struct Cli {
    /// Config file path (default: ~/.maildrip/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the scheduler and run until Ctrl-C
    Run,
    /// Enroll an address in a campaign
    Subscribe {
        address: String,
        campaign: String,
        /// Registered subscriber id, if any
        #[arg(long)]
        subscriber: Option<i64>,
    },
    /// Unsubscribe an address from a campaign
    Unsubscribe { address: String, campaign: String },
    /// Pause or resume a subscriber's enrollment
    SetStatus {
        subscriber: i64,
        campaign: String,
        /// "active" or "paused"
        status: String,
    },
    /// List a subscriber's active subscriptions
    List { subscriber: i64 },
    /// List campaign definitions
    Campaigns,
    /// Run one drip dispatch pass immediately
    RunDrip {
        /// Override the configured batch size
        #[arg(long)]
        batch: Option<usize>,
    },
    /// Run the daily broadcast immediately
    RunDaily,
    /// Run the weekly broadcast immediately
    RunWeekly,
    /// Write a default config file and exit
    InitConfig,
}

/// Default directives for all workspace crates — the engine, store, and
/// transport log under their own targets, not the binary's.
fn log_filter(verbose: bool) -> &'static str {
    if verbose {
        "maildrip=debug,maildrip_core=debug,maildrip_store=debug,\
         maildrip_transport=debug,maildrip_engine=debug"
    } else {
        "maildrip=info,maildrip_core=info,maildrip_store=info,\
         maildrip_transport=info,maildrip_engine=info"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_filter(cli.verbose))),
        )
        .with_target(false)
        .init();

    if matches!(cli.command, Command::InitConfig) {
        let config = MaildripConfig::default();
        config.save()?;
        println!("✅ Wrote {}", MaildripConfig::default_path().display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => MaildripConfig::load_from(path)?,
        None => MaildripConfig::load()?,
    };

    let db_path = Path::new(&config.store.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(SubscriptionStore::open(db_path)?);
    let directory: Arc<dyn Directory> = Arc::new(SqliteDirectory::open(db_path)?);
    let transport: Arc<dyn Transport> = if config.production {
        Arc::new(SmtpMailer::new(config.smtp.clone()))
    } else {
        tracing::info!("Not in production mode, sends are logged only");
        Arc::new(LogTransport::default())
    };

    let engine = DripEngine::new(
        store,
        Arc::new(CampaignRegistry::builtin()),
        transport,
        directory,
        &config,
    )?;

    match cli.command {
        Command::Run => {
            println!("💧 Maildrip v{}", env!("CARGO_PKG_VERSION"));
            println!("   🗄️  Database:  {}", config.store.path);
            println!("   💨 Drip:      {} (batch {})", config.scheduler.drip_cron, config.scheduler.drip_batch_size);
            println!("   📬 Daily:     {}", config.scheduler.daily_cron);
            println!("   📣 Weekly:    {}", config.scheduler.weekly_cron);
            println!();
            engine.start_scheduler();
            tokio::signal::ctrl_c().await?;
            engine.stop_scheduler();
        }
        Command::Subscribe {
            address,
            campaign,
            subscriber,
        } => {
            let sub = engine.subscribe(&address, &campaign, subscriber)?;
            println!("✅ {address} subscribed to '{campaign}' (cursor at {})", sub.last_sent);
        }
        Command::Unsubscribe { address, campaign } => {
            engine.unsubscribe(&address, &campaign)?;
            println!("✅ {address} unsubscribed from '{campaign}'");
        }
        Command::SetStatus {
            subscriber,
            campaign,
            status,
        } => {
            let status = SubscriptionStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("unknown status '{status}'"))?;
            engine.set_status(subscriber, &campaign, status)?;
            println!("✅ Subscriber #{subscriber} is now {status} in '{campaign}'");
        }
        Command::List { subscriber } => {
            let subs = engine.subscriptions_for(subscriber)?;
            if subs.is_empty() {
                println!("No active subscriptions for subscriber #{subscriber}");
            }
            for sub in subs {
                println!(
                    "  {} — message {} sent, enrolled {}",
                    sub.campaign_id,
                    sub.last_sent,
                    sub.subscribed_at.format("%Y-%m-%d")
                );
            }
        }
        Command::Campaigns => {
            for campaign in engine.registry().all() {
                println!(
                    "{} {} ({}) — {} message(s){}",
                    campaign.emoji,
                    campaign.name,
                    campaign.id,
                    campaign.messages.len(),
                    if campaign.auto_subscribe { ", auto-subscribe" } else { "" }
                );
                for msg in &campaign.messages {
                    println!("     #{} day {}: {}", msg.number, msg.send_day_offset, msg.subject);
                }
            }
        }
        Command::RunDrip { batch } => match engine.run_drip_now(batch).await? {
            Some(s) => println!(
                "✅ Dispatch done: {} sent, {} failed, {} evaluated",
                s.sent, s.failed, s.evaluated
            ),
            None => println!("⚠️ A dispatch pass is already running"),
        },
        Command::RunDaily => match engine.run_daily_now().await? {
            Some(s) => println!("✅ Daily broadcast: {}/{} sent", s.sent, s.audience),
            None => println!("⚠️ Daily broadcast is already running"),
        },
        Command::RunWeekly => match engine.run_weekly_now().await? {
            Some(s) => println!("✅ Weekly broadcast: {}/{} sent", s.sent, s.audience),
            None => println!("⚠️ Weekly broadcast is already running"),
        },
        Command::InitConfig => unreachable!(),
    }

    Ok(())
}
