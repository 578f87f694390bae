//! pdrx daemon.
//!
//! Connects to the MCTP bridge socket (and reconnects whenever it drops),
//! imports the host's PDR repository into the BMC repository whenever the
//! host comes up or reports a change, and answers the host's platform
//! requests:
//! - GetPDR against the merged BMC repository
//! - sensor events against the index of the last completed import
//! - PDR repository change events as resync or fetch triggers

mod bridge;
mod config;
mod responder;
mod sinks;
mod topology;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pdrx_core::{ExchangeDriver, HostLink, HostPdrExchange, SensorEventHandler, SensorIndex};
use pdrx_rpc::{InstanceIdDb, Requester};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::bridge::{BridgeLink, LinkOptions};
use crate::config::Config;
use crate::responder::Responder;
use crate::sinks::{LogInventory, LogSensorEvents};

/// Daemon command line arguments.
#[derive(Parser, Debug)]
#[command(name = "pdrxd")]
#[command(about = "Host PDR exchange daemon")]
struct Args {
	/// Configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// MCTP bridge socket, overriding the configuration
	#[arg(short, long, value_name = "PATH")]
	socket: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => Config::load(path)?,
		None => Config::default(),
	};
	let socket_path = args.socket.unwrap_or_else(|| config.transport.socket.clone());
	info!(socket = %socket_path.display(), host_eid = %config.host.eid, "starting pdrxd");

	let (repo, tree) = topology::seed(&config)?;
	info!(records = repo.len(), nodes = tree.len(), "local topology seeded");

	let sensors = Arc::new(SensorIndex::new());
	let engine = HostPdrExchange::new(config.exchange_config(), repo, tree, HostLink::default())
		.with_inventory(Arc::new(LogInventory))
		.with_names(config.entity_names()?)
		.with_sensor_index(sensors.clone());
	let link = Arc::new(BridgeLink::default());
	let requester = Requester::new(link.clone(), Arc::new(InstanceIdDb::new()), config.requester_config());
	let (driver, handle) = ExchangeDriver::new(engine, requester);
	let driver_task = tokio::spawn(driver.with_sensor_sink(Arc::new(LogSensorEvents)).run());

	let responder = Responder::new(handle.clone(), SensorEventHandler::new(sensors, Arc::new(LogSensorEvents)));
	let options = LinkOptions { retry: config.reconnect_interval(), fetch_on_start: config.exchange.fetch_on_start };
	let connect = move || {
		let path = socket_path.clone();
		async move { UnixStream::connect(path).await.map(UnixStream::into_split) }
	};
	let shutdown = CancellationToken::new();
	let link_task =
		tokio::spawn(bridge::supervise(link, connect, handle.clone(), responder, options, shutdown.clone()));

	tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
	info!("interrupted");

	shutdown.cancel();
	link_task.await??;
	handle.shutdown()?;
	let engine = driver_task.await??;
	info!(records = engine.repo().len(), stats = ?engine.stats(), "pdrxd stopped");
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::prelude::*;

	let filter = || {
		EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			if verbose {
				EnvFilter::new("pdrx=debug,info")
			} else {
				EnvFilter::new("pdrx=info,warn")
			}
		})
	};

	// PDRX_LOG_DIR sends logs to a per-process file instead of stderr
	if let Some(log_dir) = std::env::var("PDRX_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("pdrxd.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			tracing_subscriber::registry().with(filter()).with(file_layer).init();
			tracing::info!(path = ?log_path, "tracing initialized");
			return;
		}
	}

	tracing_subscriber::fmt().with_env_filter(filter()).init();
}
