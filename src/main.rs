use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use pling::{
    Device, DeliveryContext, Message, gateway::apns::feedback::FeedbackClient, settings::Settings,
};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "pling", version, about = "Push notification delivery")]
struct Cli {
    /// Settings file (defaults to ./pling.toml plus PLING__* variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver one notification
    Send(SendArgs),
    /// Print the devices reported by the APNs feedback service
    Feedback,
}

#[derive(Args)]
struct SendArgs {
    /// Device type, e.g. ios or android
    #[arg(long = "type")]
    device_type: String,
    #[arg(long)]
    token: String,
    #[arg(long)]
    body: String,
    #[arg(long)]
    subject: Option<String>,
    #[arg(long)]
    badge: Option<u32>,
    #[arg(long)]
    sound: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    content_available: bool,
}

impl SendArgs {
    fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            subject: self.subject.clone(),
            badge: self.badge,
            sound: self.sound.clone(),
            content_available: self.content_available,
            category: self.category.clone(),
            payload: None,
        }
    }

    fn device(&self) -> Device {
        Device::new(&self.token, &self.device_type)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_env("RUST_LOG"))
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load()?,
    };
    debug!(gateways = settings.gateways.len(), "settings loaded");

    match cli.command {
        Command::Send(args) => {
            let context = DeliveryContext::from_settings(&settings);
            let result = context.deliver(&args.message(), &args.device()).await;
            context.shutdown().await;
            result?;
            info!("notification delivered");
        }
        Command::Feedback => {
            let options = settings
                .feedback_options()
                .context("no [feedback] section or APNs gateway configured")?;
            let client = FeedbackClient::new(options)?;
            for record in client.fetch().await? {
                println!("{}\t{}", record.timestamp.to_rfc3339(), record.token);
            }
        }
    }

    Ok(())
}
