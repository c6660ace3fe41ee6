//! pvesync: reconcile Proxmox VE virtual machines against desired-state
//! documents.
//!
//! A document only owns the attributes and slots it declares. Everything
//! else on the VM, including values inherited from a clone template, is
//! left alone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvesync_client::{ClientConfig, PveClient};
use pvesync_engine::{Engine, EngineConfig, VmRef};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

/// Declarative, opt-in management of Proxmox VE VMs
#[derive(Parser, Debug)]
#[command(name = "pvesync", version, about)]
struct Cli {
    /// Platform API endpoint (e.g., https://pve1.example.com:8006)
    #[arg(long, env = "PVESYNC_ENDPOINT")]
    endpoint: String,

    /// API token in `user@realm!tokenid=secret` form
    #[arg(long, env = "PVESYNC_API_TOKEN", hide_env_values = true)]
    api_token: String,

    /// Accept self-signed TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Timeout for a single HTTP request in seconds
    #[arg(long, default_value = "60")]
    request_timeout: u64,

    /// Deadline for creating a VM in seconds
    #[arg(long)]
    create_timeout: Option<u64>,

    /// Deadline for reading a VM in seconds
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Deadline for one reconcile pass in seconds
    #[arg(long)]
    update_timeout: Option<u64>,

    /// Deadline for destroying a VM in seconds
    #[arg(long)]
    delete_timeout: Option<u64>,

    /// Grace period for a guest shutdown in seconds
    #[arg(long)]
    shutdown_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the changes `apply` would make
    Plan {
        /// Desired-state document (JSON)
        file: PathBuf,
    },

    /// Reconcile a VM, creating it by cloning when the document has no id
    Apply {
        /// Desired-state document (JSON)
        file: PathBuf,

        /// Create the VM even though the document carries an id
        #[arg(long)]
        create: bool,

        /// Write the read-back state here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the declared state as it currently is on the platform
    Read {
        /// Desired-state document (JSON)
        file: PathBuf,
    },

    /// Print a document declaring everything an existing VM reports
    Import {
        /// VM to adopt, as `<node>/<vmid>`
        vm: VmRef,
    },

    /// Stop and delete a VM
    Destroy {
        /// Desired-state document (JSON)
        file: PathBuf,
    },
}

impl Cli {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default();
        let timeouts = &mut config.timeouts;
        let overrides = [
            (self.create_timeout, &mut timeouts.create),
            (self.read_timeout, &mut timeouts.read),
            (self.update_timeout, &mut timeouts.update),
            (self.delete_timeout, &mut timeouts.delete),
            (self.shutdown_timeout, &mut timeouts.shutdown),
        ];
        for (secs, slot) in overrides {
            if let Some(secs) = secs {
                *slot = Duration::from_secs(secs);
            }
        }
        config
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(&self.endpoint, &self.api_token);
        config.insecure_tls = self.insecure;
        config.request_timeout = Duration::from_secs(self.request_timeout);
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "pvesync=info,pvesync_engine=info,pvesync_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let client = Arc::new(
        PveClient::new(&cli.client_config())
            .with_context(|| format!("Failed to set up client for {}", cli.endpoint))?,
    );
    let engine = Engine::new(client.clone(), client, cli.engine_config());

    match cli.command {
        Command::Plan { file } => commands::plan(&engine, &file).await,
        Command::Apply {
            file,
            create,
            output,
        } => commands::apply(&engine, &file, create, output.as_deref()).await,
        Command::Read { file } => commands::read(&engine, &file).await,
        Command::Import { vm } => commands::import(&engine, &vm).await,
        Command::Destroy { file } => commands::destroy(&engine, &file).await,
    }
}
