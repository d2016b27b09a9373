use crate::commands::deploy::Selection;
use crate::state::AppContext;
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, error, info};

mod apps;
mod cluster;
mod commands;
mod config;
mod image;
mod kinds;
mod manager;
mod registry;
mod scanner;
mod secret_string;
mod state;
mod upgrade;
mod version;
mod webhook;
mod webserver;
mod workload;

#[cfg(test)]
mod testing;

#[cfg(target_env = "musl")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "kube-autodeploy", version)]
#[command(about = "Upgrade Kubernetes workloads to the latest images in your registry", long_about = None)]
struct Cli {
    /// Be noisy
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML file mapping image repositories to webhook URLs
    #[arg(short, long, global = true, value_name = "FILE")]
    webhooks: Option<PathBuf>,

    /// Config file (default: ~/.kube-autodeploy.yaml)
    #[arg(long, global = true, value_name = "FILE", env = "KUBE_AUTODEPLOY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the latest tags available
    Latest,

    /// Deploy images to your cluster
    Deploy {
        namespace: String,

        /// Repository name or glob to deploy, `-` to deploy everything outdated.
        /// Without it, choose interactively.
        image: Option<String>,
    },

    /// Push local images to the registry
    Push {
        repository: String,

        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Link a registry profile to the current kubectl context
    Config { profile: Option<String> },

    /// Keep a namespace up to date on a schedule
    Autodeploy {
        namespace: String,

        /// Cron expression with seconds
        #[arg(long, default_value = commands::autodeploy::DEFAULT_SCHEDULE)]
        schedule: String,

        /// Port of the health probe webserver
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
        }
    };

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("Starting kube-autodeploy {}", env!("CARGO_PKG_VERSION"));
    let ctx = AppContext::load(cli.config, cli.webhooks)?;

    match cli.command {
        Command::Latest => commands::latest::run(&ctx).await,
        Command::Deploy { namespace, image } => {
            commands::deploy::run(&ctx, &namespace, Selection::from_arg(image.as_deref()))
                .await
                .map(|_| ())
        }
        Command::Push {
            repository,
            versions,
        } => commands::push::run(&ctx, &repository, &versions).await,
        Command::Config { profile } => commands::configure::run(&ctx, profile.as_deref()),
        Command::Autodeploy {
            namespace,
            schedule,
            port,
        } => commands::autodeploy::run(ctx, namespace, &schedule, port).await,
    }
}
