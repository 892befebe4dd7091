mod commands;
mod engine;

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use nudge_core::{config, message::IncomingMessage, traits::Notifier};
use nudge_scheduler::TaskQueue;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "nudge",
    version,
    about = "Nudge: durable reminders over chat"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the recovery sweeper and the delivery workers until Ctrl-C.
    Start,
    /// Show reminder and queue counts.
    Status,
    /// Send a message as a user and print the reply.
    Ask {
        /// Sender id.
        #[arg(long, default_value = "local")]
        from: String,
        /// Address reminders are delivered to (defaults to the sender id).
        #[arg(long)]
        to: Option<String>,
        /// The message to send.
        #[arg(trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Cancel a reminder by id.
    Cancel { id: String },
    /// List an owner's reminders, newest first.
    Reminders {
        owner: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show an owner's conversation state.
    Flow { owner: String },
    /// Record a delivery receipt for a sent message.
    Delivered { external_id: String },
    /// List tasks that ran out of attempts.
    Dead,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _log_guard = init_logging(&cfg)?;

    match cli.command {
        Commands::Start => {
            let engine = engine::Engine::open(cfg).await?;
            println!("Nudge: starting...");
            engine.run().await?;
        }
        Commands::Status => {
            let notifier = nudge_channels::build_notifier(&cfg.notifier);
            let engine = engine::Engine::open(cfg).await?;
            println!("Nudge status\n");
            println!("Config: {}", cli.config);
            println!("Database: {}", config::shellexpand(&engine.config.store.db_path));
            match notifier {
                Ok(n) => println!("Notifier: {}", n.name()),
                Err(e) => println!("Notifier: misconfigured ({e})"),
            }
            println!();
            let counts = engine.store.reminder_counts().await?;
            let stats = engine.queue.stats().await?;
            println!("{}", commands::format_status(&counts, &stats));
        }
        Commands::Ask { from, to, message } => {
            if message.is_empty() {
                anyhow::bail!("no message provided. Usage: nudge ask [--from ID] <message>");
            }
            let engine = engine::Engine::open(cfg).await?;
            let text = message.join(" ");
            let incoming = IncomingMessage::new(&from, to.as_deref().unwrap_or(&from), &text);
            let reply = engine.flow.handle_message(&incoming).await?;
            println!("{}", reply.text);
        }
        Commands::Cancel { id } => {
            let engine = engine::Engine::open(cfg).await?;
            let outcome = engine.scheduler.cancel(&id, None).await?;
            println!("{}", commands::format_cancel(&id, outcome));
        }
        Commands::Reminders { owner, limit } => {
            let engine = engine::Engine::open(cfg).await?;
            let found = engine.store.get_owner(&owner).await?;
            let reminders = engine.store.reminders_for_owner(&owner, limit).await?;
            println!(
                "{}",
                commands::format_reminders(&owner, found.as_ref(), &reminders)
            );
        }
        Commands::Flow { owner } => {
            let engine = engine::Engine::open(cfg).await?;
            let state = engine.flow.state(&owner).await?;
            println!("{}", commands::format_flow(&state));
        }
        Commands::Delivered { external_id } => {
            let engine = engine::Engine::open(cfg).await?;
            match engine.store.mark_delivered(&external_id, Utc::now()).await? {
                Some(id) => println!("Reminder {id} marked delivered."),
                None => println!("No sent reminder carries message id {external_id}."),
            }
        }
        Commands::Dead => {
            let engine = engine::Engine::open(cfg).await?;
            let letters = engine.queue.dead_letters().await?;
            println!("{}", commands::format_dead(&letters));
        }
    }

    Ok(())
}

/// Log to stdout and to `{data_dir}/logs/nudge.log`. `RUST_LOG` overrides
/// the configured level.
fn init_logging(cfg: &config::Config) -> anyhow::Result<WorkerGuard> {
    let log_dir = format!("{}/logs", config::shellexpand(&cfg.nudge.data_dir));
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log dir {log_dir}"))?;
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&log_dir, "nudge.log"));

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.nudge.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Ok(guard)
}
