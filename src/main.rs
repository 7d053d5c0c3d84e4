// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::Parser;
use dynamolike::config::{BackendKind, Config, DiscoveryMode};
use dynamolike::discovery::docker::DockerSource;
use dynamolike::discovery::refresh::{self, EventRefresh, PollingRefresh, RefreshStrategy};
use dynamolike::discovery::static_source::StaticSource;
use dynamolike::discovery::{DiscoverySource, ServiceRegistry};
use dynamolike::gateway::GatewayBuilder;
use dynamolike::handler::BaseHandler;
use dynamolike::object_http::ResponseContext;
use dynamolike::observability::tracing_setup;
use dynamolike::server::{ConnectionManager, HttpConnectionManager};
use dynamolike::storage::http_node::HttpConnector;
use dynamolike::storage::in_memory::InMemoryConnector;
use dynamolike::storage::NodeConnector;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "dynamolike")]
#[command(
    about = "Key-partitioning object gateway over discovered storage containers",
    long_about = None
)]
struct Args {
    /// Address to listen on (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<String>,

    /// Docker network the storage containers are attached to
    #[arg(short, long)]
    network: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Number of partitions (overrides config)
    #[arg(short, long)]
    partitions: Option<usize>,
}

fn load_config(path: &str) -> Result<Config, Box<dyn std::error::Error>> {
    if Path::new(path).exists() {
        Config::from_path(path)
    } else {
        tracing::warn!(path, "Config file not found, using defaults");
        Ok(Config::default())
    }
}

fn build_source(cfg: &Config) -> Result<Arc<dyn DiscoverySource>, Box<dyn std::error::Error>> {
    let source: Arc<dyn DiscoverySource> = match cfg.discovery.mode {
        DiscoveryMode::Static => {
            Arc::new(StaticSource::new(cfg.discovery.static_containers()))
        }
        DiscoveryMode::Poll | DiscoveryMode::Events => match &cfg.discovery.docker_host {
            Some(host) => Arc::new(DockerSource::new(host)?),
            None => Arc::new(DockerSource::from_env()?),
        },
    };
    Ok(source)
}

fn build_strategy(cfg: &Config) -> Option<Arc<dyn RefreshStrategy>> {
    match cfg.discovery.mode {
        DiscoveryMode::Poll => Some(Arc::new(PollingRefresh::new(Duration::from_secs(
            cfg.discovery.poll_interval_secs.max(1),
        )))),
        DiscoveryMode::Events => Some(Arc::new(EventRefresh::new(Duration::from_secs(
            cfg.discovery.event_retry_secs,
        )))),
        DiscoveryMode::Static => None,
    }
}

fn build_connector(cfg: &Config) -> Arc<dyn NodeConnector> {
    match cfg.storage.backend {
        BackendKind::Http => Arc::new(HttpConnector::new(
            cfg.storage.use_ssl,
            cfg.storage.region.clone(),
            Duration::from_secs(cfg.storage.connect_timeout_secs),
        )),
        BackendKind::Memory => Arc::new(InMemoryConnector::new()),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("ctrl-c received, shutting down"),
        _ = terminate => tracing::warn!("SIGTERM received, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with format from environment
    tracing_setup::init_tracing_from_env();

    let args = Args::parse();

    let mut cfg = load_config(&args.config)?;

    // Command line args override config file
    if let Some(listen) = args.listen {
        cfg.listen_addr = listen;
    }
    if let Some(network) = args.network {
        cfg.discovery.network = network;
    }
    if let Some(partitions) = args.partitions {
        cfg.partitions = partitions;
    }
    let addr: SocketAddr = cfg.listen_addr.parse()?;

    if cfg.discovery.mode != DiscoveryMode::Static && cfg.discovery.network.is_empty() {
        return Err("a Docker network is required (--network or discovery.network)".into());
    }

    if cfg.discovery.startup_delay_secs > 0 {
        tracing::info!(
            secs = cfg.discovery.startup_delay_secs,
            "Waiting for storage nodes to start"
        );
        tokio::time::sleep(Duration::from_secs(cfg.discovery.startup_delay_secs)).await;
    }

    let source = build_source(&cfg)?;
    let registry = Arc::new(ServiceRegistry::new(
        source,
        cfg.discovery.resolve_options(),
    ));

    // Bootstrap sweep; without it there is nothing to route to
    let found = registry.poll_network().await?;
    tracing::info!(
        found,
        network = %cfg.discovery.network,
        "Initial discovery sweep complete"
    );

    let gateway = GatewayBuilder::new(build_connector(&cfg))
        .partitions(cfg.partitions)
        .bucket(cfg.storage.bucket.clone())
        .provision_buckets(cfg.storage.provision_buckets)
        .build(&registry)
        .await?;
    let gateway = Arc::new(gateway);
    for (index, instance) in gateway.nodes() {
        tracing::info!(index, id = %instance.id, endpoint = %instance.endpoint(), "Partition assigned");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut refresh_handle = build_strategy(&cfg)
        .map(|strategy| refresh::spawn(strategy, registry.clone(), shutdown_rx.clone()));

    let handler = BaseHandler::new(gateway, registry);
    let request_timeout = match cfg.request_timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let response_ctx = ResponseContext::new(cfg.request_id_prefix.clone(), request_timeout)
        .with_body_limit(cfg.max_object_bytes);
    let server = HttpConnectionManager::new(handler, response_ctx);
    tracing::info!("dynamolike HTTP server listening on {}", addr);

    let server_rx = shutdown_rx.clone();
    let mut server_handle = tokio::spawn(async move { server.serve(addr, server_rx).await });

    let mut server_done = false;
    tokio::select! {
        r = &mut server_handle => {
            server_done = true;
            match r {
                Ok(Ok(())) => tracing::info!("server exited"),
                Ok(Err(e)) => tracing::error!("server exited with error: {e}"),
                Err(e) => tracing::error!("server task failed: {e}"),
            }
        }
        _ = shutdown_signal() => {}
    }

    // Stop the refresh loop and the server, then bound the drain
    let _ = shutdown_tx.send(true);
    let drain = Duration::from_secs(cfg.shutdown_timeout_secs);

    if !server_done {
        match tokio::time::timeout(drain, &mut server_handle).await {
            Ok(Ok(Err(e))) => tracing::error!("server exited with error: {e}"),
            Ok(_) => tracing::info!("In-flight requests drained"),
            Err(_) => {
                tracing::warn!(secs = drain.as_secs(), "Drain timed out, aborting server");
                server_handle.abort();
            }
        }
    }

    if let Some(handle) = refresh_handle.as_mut() {
        if tokio::time::timeout(drain, &mut *handle).await.is_err() {
            tracing::warn!("Refresh task did not stop in time, aborting");
            handle.abort();
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
