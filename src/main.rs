//! Pushsync CLI - register this device's push subscription for a topic.
//!
//! This is the main binary entry point. See the `pushsync` library for the
//! core functionality.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pushsync::{
    Config, FileSubscriptionSource, HttpRegistry, PushSubscription, SubscriptionController,
    SubscriptionId, SubscriptionRegistry, SubscriptionSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pushsync")]
#[command(version)]
#[command(about = "Keep a web push subscription registered for a topic")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the identifier derived from a push endpoint
    Id {
        /// Push service endpoint URL
        endpoint: String,
    },
    /// Show whether the local subscription is registered with the server
    Status {
        /// Topic to check (defaults to the configured topic)
        #[arg(long)]
        topic: Option<String>,
    },
    /// Register a subscription for a topic
    Subscribe {
        /// JSON file with the subscription issued by the push service
        #[arg(long)]
        subscription: Option<PathBuf>,
        /// Topic to subscribe to (defaults to the configured topic)
        #[arg(long)]
        topic: Option<String>,
    },
    /// Remove the server registration and the local subscription
    Unsubscribe {
        /// Topic to unsubscribe from (defaults to the configured topic)
        #[arg(long)]
        topic: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

fn read_subscription(path: &Path) -> Result<PushSubscription> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let subscription: PushSubscription = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a push subscription", path.display()))?;
    subscription.validate()?;
    Ok(subscription)
}

fn build_controller(
    config: &Config,
    topic: Option<&str>,
    source: FileSubscriptionSource,
) -> Result<SubscriptionController> {
    let registry = HttpRegistry::new(&config.api_endpoint, config.request_timeout())?;
    Ok(SubscriptionController::new(
        config.controller_config(topic)?,
        Arc::new(source) as Arc<dyn SubscriptionSource>,
        Arc::new(registry) as Arc<dyn SubscriptionRegistry>,
    ))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Id { endpoint } => {
            println!("{}", SubscriptionId::derive(&endpoint));
        }
        Commands::Status { topic } => {
            let config = Config::load()?;
            let source = FileSubscriptionSource::new(Config::subscription_path()?);
            let controller = build_controller(&config, topic.as_deref(), source)?;
            print_json(&controller.activate().await?)?;
        }
        Commands::Subscribe {
            subscription,
            topic,
        } => {
            let config = Config::load()?;
            let mut source = FileSubscriptionSource::new(Config::subscription_path()?);
            if let Some(path) = subscription {
                source = source.with_offer(read_subscription(&path)?);
            }
            let controller = build_controller(&config, topic.as_deref(), source)?;
            controller.activate().await?;
            print_json(&controller.subscribe().await?)?;
        }
        Commands::Unsubscribe { topic } => {
            let config = Config::load()?;
            let source = FileSubscriptionSource::new(Config::subscription_path()?);
            let controller = build_controller(&config, topic.as_deref(), source)?;
            controller.activate().await?;
            print_json(&controller.unsubscribe().await?)?;
        }
        Commands::Config => {
            print_json(&Config::load()?)?;
        }
    }

    Ok(())
}
