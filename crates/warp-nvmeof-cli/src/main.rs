//! warp-nvmeof CLI - NVMe/TCP target daemon and initiator tools

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod commands;

#[derive(Parser)]
#[command(name = "warp-nvmeof")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the NVMe/TCP target
    Serve {
        /// TOML configuration file
        #[arg(short, long)]
        config: PathBuf,
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve the management API on this address (e.g., 127.0.0.1:8080)
        #[arg(long)]
        api: Option<SocketAddr>,
        /// Directory holding volume images and records
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Log in to a subsystem and show controller details
    Probe {
        /// Target address (e.g., 127.0.0.1:4420)
        server: String,
        /// Subsystem NQN
        #[arg(long)]
        nqn: String,
    },
    /// List the subsystems a target advertises
    Discover {
        /// Target address (e.g., 127.0.0.1:4420)
        server: String,
    },
    /// Manage volumes on a daemon started with --api
    Volume {
        /// Management API URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        api: String,
        #[command(subcommand)]
        action: VolumeAction,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Create a file-backed volume and export it
    Create {
        /// Volume name
        name: String,
        /// Size in bytes, a multiple of 512
        #[arg(short, long)]
        size: u64,
        /// Description
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Show one volume
    Get {
        /// Volume UUID
        uuid: Uuid,
    },
    /// Stop exporting a volume and delete its image
    Delete {
        /// Volume UUID
        uuid: Uuid,
    },
    /// List all volumes
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Serve {
            config,
            port,
            api,
            data_dir,
        } => commands::serve::execute(&config, port, api, &data_dir).await,
        Commands::Probe { server, nqn } => commands::probe::execute(&server, &nqn).await,
        Commands::Discover { server } => commands::discover::execute(&server).await,
        Commands::Volume { api, action } => match action {
            VolumeAction::Create {
                name,
                size,
                description,
            } => commands::volume::create(&api, name, description, size).await,
            VolumeAction::Get { uuid } => commands::volume::get(&api, uuid).await,
            VolumeAction::Delete { uuid } => commands::volume::delete(&api, uuid).await,
            VolumeAction::List => commands::volume::list(&api).await,
        },
    }
}
