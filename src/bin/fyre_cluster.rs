//! Standalone cluster controller: drives a local [`DeJongMap`] as the
//! master calculation and fans parameter changes and calc commands out
//! to a set of remote workers, periodically merging their histogram
//! deltas back into the master's imager.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use fyre_core::cluster::ClusterModel;
use fyre_core::config::Config;
use fyre_core::logging;
use fyre_core::map::DeJongMap;
use fyre_core::net::discovery::{DiscoveryClient, DEFAULT_SERVICE_NAME};
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about = "Fyre cluster controller")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// `host[:port]` entries, comma-separated.
    #[arg(long, value_delimiter = ',')]
    cluster: Vec<String>,

    #[arg(long)]
    auto_cluster: bool,

    /// `name=value`, repeatable.
    #[arg(long = "param")]
    params: Vec<String>,

    #[arg(long, default_value_t = 0.015)]
    render_time: f64,

    #[arg(long)]
    verbose: bool,
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
    config.auto_cluster |= args.auto_cluster;
    config.verbose |= args.verbose;
    for entry in &args.cluster {
        match entry.rsplit_once(':') {
            Some((host, port)) => match port.parse() {
                Ok(port) => config.cluster_nodes.push((host.to_string(), port)),
                Err(_) => {
                    eprintln!("invalid port in cluster entry '{entry}'");
                    return ExitCode::FAILURE;
                }
            },
            None => config.cluster_nodes.push((entry.clone(), config.port)),
        }
    }

    logging::init(config.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config, args.params, args.render_time)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, params: Vec<String>, render_time: f64) -> Result<()> {
    let mut master = DeJongMap::new();
    master.set_render_time(render_time);

    let mut cluster = ClusterModel::new();
    for (hostname, port) in &config.cluster_nodes {
        cluster.add_node(hostname.clone(), *port);
    }
    let discovery = if config.auto_cluster { Some(DiscoveryClient::bind().await?) } else { None };

    for assignment in &params {
        let Some((name, value)) = assignment.split_once('=') else {
            anyhow::bail!("expected 'name=value', got '{assignment}'");
        };
        master.set_param(name.trim(), value.trim())?;
        cluster.broadcast_set_param(name.trim(), value.trim()).await;
    }

    master.start_calculation();
    cluster.broadcast_start().await;
    info!(nodes = cluster.nodes().len(), "cluster controller started");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = async {
                if let Some(discovery) = &discovery {
                    let _ = cluster.discover_and_add(discovery, DEFAULT_SERVICE_NAME, Duration::from_millis(200)).await;
                }
                master.calculate_timed(master.render_time());
                cluster.collect_and_merge(&mut master).await;
                cluster.poll_status(&mut master).await;
            } => {
                info!(
                    iterations = master.iterations(),
                    peak_density = master.imager().peak_density(),
                    "calculation-finished",
                );
            }
        }
    }

    master.stop_calculation();
    cluster.broadcast_stop().await;
    Ok(())
}
