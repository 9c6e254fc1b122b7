//! chatstream - streaming normalizer for LLM chat-completion answers
//!
//! Serves `POST /api/getChat` and streams normalized answer text from the
//! configured upstream provider.

use anyhow::Context;
use chatstream::config::{Config, KeySource};
use chatstream::router::Router as ProviderRouter;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "chatstream")]
#[command(about = "Streaming normalizer for LLM chat-completion answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration file
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },

    /// Show configured providers and which one would serve requests
    Providers {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("chatstream={level},tower_http={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load(path: &str) -> anyhow::Result<(Config, Vec<(String, KeySource)>)> {
    Config::from_file_with_env(path).with_context(|| format!("loading {}", path))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut loaded, key_sources) = load(&config)?;
            init_tracing(&loaded.logging.level);

            tracing::info!(config = %config, "Loaded configuration");
            for (provider, source) in &key_sources {
                tracing::info!(provider = %provider, key_source = %source, "Resolved API key");
            }

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                loaded.server.listen = addr;
            }

            chatstream::proxy::run_server(loaded).await
        }

        Commands::Check { config } => {
            let (loaded, key_sources) = load(&config)?;
            init_tracing(&loaded.logging.level);

            println!("Configuration OK: {}", config);
            println!("  listen: {}", loaded.server.listen);
            println!(
                "  stream: prefix_skip={} max_duration={}s",
                loaded.stream.prefix_skip, loaded.stream.max_duration_secs
            );
            for (provider, source) in &key_sources {
                println!("  provider {}: key {}", provider, source);
            }
            Ok(())
        }

        Commands::Providers { config } => {
            let (loaded, _) = load(&config)?;
            init_tracing(&loaded.logging.level);

            let router = ProviderRouter::new(&loaded.providers);
            let active = router.select().ok().map(|p| p.name);

            for provider in router.providers() {
                let marker = if active.as_deref() == Some(provider.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<16} {:<9} {:<40} {}",
                    marker,
                    provider.name,
                    provider.adapter.kind(),
                    provider.adapter.endpoint(),
                    provider.model
                );
            }
            Ok(())
        }
    }
}
