//! Main entry point for the sBTC payment confirmation monitor service.
//!
//! Builds the chain and store backends selected by configuration, wires
//! them into the confirmation monitor, begins monitoring any transactions
//! named on the command line, and runs until a termination signal arrives.
//! Shutdown always goes through `stop_all` so no poll timer survives exit.

use clap::Parser;
use monitor_chain::{ChainFactory, ChainService};
use monitor_config::Config;
use monitor_core::{ConfirmationMonitor, EventBus};
use monitor_notify::{NotifyInterface, WebhookNotifier};
use monitor_store::{StoreFactory, StoreService};
use monitor_types::MonitorEvent;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the monitor service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Transaction to monitor at startup, as TXID or TXID:PAYMENT_ID.
	/// May be repeated.
	#[arg(short, long = "watch", value_name = "TXID[:PAYMENT_ID]")]
	watch: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.to_string()));
	fmt().with_env_filter(env_filter).with_target(true).init();

	tracing::info!("Started monitor");

	let config_path = args
		.config
		.to_str()
		.ok_or("config path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!(
		chain = %config.chain.primary,
		store = %config.store.primary,
		webhook = config.webhook.is_some(),
		"Loaded configuration"
	);

	let monitor = Arc::new(build_monitor(&config)?);

	spawn_event_logger(&monitor);

	for entry in &args.watch {
		let (tx_id, payment_id) = match entry.split_once(':') {
			Some((tx_id, payment_id)) => (tx_id, Some(payment_id.to_string())),
			None => (entry.as_str(), None),
		};
		monitor.start_monitoring(tx_id, payment_id);
	}

	shutdown_signal().await;

	// No poll may fire after this point.
	monitor.stop_all();
	tracing::info!("Stopped monitor");
	Ok(())
}

/// Builds the confirmation monitor with the configured backends.
fn build_monitor(config: &Config) -> Result<ConfirmationMonitor, Box<dyn std::error::Error>> {
	let store_factories: HashMap<&str, StoreFactory> = HashMap::from([
		(
			"memory",
			monitor_store::implementations::memory::create_store as StoreFactory,
		),
		(
			"file",
			monitor_store::implementations::file::create_store as StoreFactory,
		),
	]);
	let chain_factories: HashMap<&str, ChainFactory> = HashMap::from([(
		"stacks",
		monitor_chain::implementations::stacks::create_chain as ChainFactory,
	)]);

	let store_settings = config
		.store
		.implementations
		.get(&config.store.primary)
		.ok_or_else(|| format!("missing store configuration for '{}'", config.store.primary))?;
	let store_factory = store_factories
		.get(config.store.primary.as_str())
		.ok_or_else(|| format!("unknown store implementation '{}'", config.store.primary))?;
	let store = Arc::new(StoreService::new(store_factory(store_settings)?));
	tracing::info!(component = "store", implementation = %config.store.primary, "Loaded");

	let chain_settings = config
		.chain
		.implementations
		.get(&config.chain.primary)
		.ok_or_else(|| format!("missing chain configuration for '{}'", config.chain.primary))?;
	let chain_factory = chain_factories
		.get(config.chain.primary.as_str())
		.ok_or_else(|| format!("unknown chain implementation '{}'", config.chain.primary))?;
	let chain = Arc::new(ChainService::new(chain_factory(chain_settings)?));
	tracing::info!(component = "chain", implementation = %config.chain.primary, "Loaded");

	let notifier: Option<Arc<dyn NotifyInterface>> = match &config.webhook {
		Some(webhook) => {
			let notifier = WebhookNotifier::new(&webhook.url, webhook.timeout())?;
			tracing::info!(component = "notify", url = %webhook.url, "Loaded");
			Some(Arc::new(notifier))
		}
		None => None,
	};

	Ok(ConfirmationMonitor::new(
		config.monitor.clone(),
		chain,
		store,
		notifier,
		EventBus::new(1000),
	))
}

/// Subscribes a task that logs monitor events for operators.
fn spawn_event_logger(monitor: &Arc<ConfirmationMonitor>) {
	let mut events = monitor.event_bus().subscribe();
	tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			match &event {
				MonitorEvent::StatusUpdate { tx_id, status } => {
					tracing::debug!(tx_id = %tx_id, tx_status = %status.tx_status, "Status update");
				}
				MonitorEvent::Confirmed {
					tx_id,
					confirmations,
					payment_id,
				} => {
					tracing::info!(
						tx_id = %tx_id,
						confirmations = *confirmations,
						payment_id = ?payment_id,
						"Transaction confirmed"
					);
				}
				MonitorEvent::Failed {
					tx_id,
					reason,
					payment_id,
				} => {
					tracing::warn!(
						tx_id = %tx_id,
						reason = %reason,
						payment_id = ?payment_id,
						"Transaction failed"
					);
				}
				MonitorEvent::TimedOut {
					tx_id,
					attempts,
					payment_id,
				} => {
					tracing::warn!(
						tx_id = %tx_id,
						attempts = *attempts,
						payment_id = ?payment_id,
						"Transaction timed out"
					);
				}
			}
		}
	});
}

/// Completes when the process receives a termination signal.
async fn shutdown_signal() {
	#[cfg(unix)]
	{
		use tokio::signal::unix::{signal, SignalKind};
		match signal(SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {},
					_ = sigterm.recv() => {},
				}
			}
			Err(e) => {
				tracing::warn!(error = %e, "Failed to register SIGTERM handler");
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}
	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}
