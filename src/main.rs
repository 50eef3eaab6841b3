use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lumilio::config::Config;

#[derive(Parser)]
#[command(name = "lumilio", about = "Self-hosted media library asset ingestion and repository sync")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server plus background watchers, reconciler, and job workers.
    Serve,
    /// Run one reconciliation pass against a repository and exit.
    Reconcile {
        #[arg(long)]
        repo: String,
    },
    /// Purge trash entries past their retention window for a repository and exit.
    PurgeTrash {
        #[arg(long)]
        repo: String,
    },
    /// Cross-check catalog rows against bytes on disk for a repository and exit.
    Verify {
        #[arg(long)]
        repo: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match Config::from_env() {
        Ok(config) => match cli.command {
            Command::Serve => lumilio::serve(config).await,
            Command::Reconcile { repo } => lumilio::reconcile_once(config, &repo).await,
            Command::PurgeTrash { repo } => lumilio::purge_trash_once(config, &repo).await,
            Command::Verify { repo } => lumilio::verify(config, &repo).await,
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("{e}");
        std::process::exit(e.exit_code());
    }
}
