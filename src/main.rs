use std::path::PathBuf;

use anyhow::{Context, Result};
use apns_legacy_client::{context::AppContext, settings::Settings};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(version, about = "Push to the legacy APNs binary gateway")]
struct Cli {
    /// Settings file; defaults to ./settings.toml when present
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one notification
    Send {
        /// Device token as 64 hex characters
        #[arg(long)]
        token: String,
        /// JSON payload, e.g. '{"aps":{"alert":"Hello"}}'
        #[arg(long)]
        payload: String,
    },
    /// Print the tokens reported by the feedback service
    Feedback,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_env("RUST_LOG"))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load()?,
    };
    let context = AppContext::from_settings(&settings);

    match cli.command {
        Command::Send { token, payload } => {
            let message =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            context
                .notification_service
                .send_notification(&token, message)
                .await?;
            info!("notification sent");
        }
        Command::Feedback => {
            let entries = context.feedback_service.fetch_feedback().await?;
            for entry in entries {
                println!("{} {}", entry.timestamp.to_rfc3339(), entry.token);
            }
        }
    }

    Ok(())
}
