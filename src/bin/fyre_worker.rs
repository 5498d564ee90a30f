//! Standalone remote rendering worker: binds [`RemoteServer`] and,
//! unless `--hidden`, answers discovery probes so cluster controllers
//! can find it without being told its address up front.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use fyre_core::config::Config;
use fyre_core::net::discovery::{DiscoveryServer, DEFAULT_SERVICE_NAME};
use fyre_core::net::server::RemoteServer;
use fyre_core::logging;
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about = "Fyre distributed rendering worker")]
struct Args {
    /// Ini-format config file; CLI flags below override whatever it sets.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    port: Option<u16>,

    /// Don't answer discovery broadcasts.
    #[arg(long)]
    hidden: bool,

    #[arg(long)]
    verbose: bool,

    /// Write the process id here after binding.
    #[arg(long)]
    pidfile: Option<PathBuf>,

    /// Drop root privileges to this user after binding (Unix only).
    #[arg(long, default_value = "nobody")]
    user: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config: {e:#}");
                return ExitCode::FAILURE;
            }
        },
        None => Config::defaults(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }
    config.hidden |= args.hidden;
    config.verbose |= args.verbose;
    if let Some(pidfile) = &args.pidfile {
        config.pidfile = Some(pidfile.display().to_string());
    }

    logging::init(config.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, &args.user)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, drop_to_user: &str) -> Result<()> {
    let server = RemoteServer::bind(config.port).await?;
    let addr = server.local_addr()?;
    info!(%addr, "worker listening");

    if let Some(pidfile) = &config.pidfile {
        std::fs::write(pidfile, format!("{}\n", std::process::id()))
            .with_context(|| format!("failed to write pidfile {pidfile}"))?;
    }

    if !config.hidden {
        let discovery = DiscoveryServer::bind(
            fyre_core::net::discovery::DEFAULT_DISCOVERY_PORT,
            DEFAULT_SERVICE_NAME,
            addr.port(),
        )
        .await
        .context("failed to bind the discovery responder")?;
        tokio::spawn(async move {
            loop {
                if let Err(e) = discovery.serve_one().await {
                    tracing::warn!(error = %e, "discovery responder stopped");
                    break;
                }
            }
        });
    }

    server.serve(Some(drop_to_user)).await
}
