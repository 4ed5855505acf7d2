//! Thin demo binary: runs a `DhtEngine`, optionally bootstraps against a
//! well-known node, and logs routing table growth. The CLI surface itself
//! is out of core scope (spec §1 Non-goals) — this exists to give the crate
//! something runnable, not to be a full node front-end.

use clap::Parser;
use dht_crawler::{DhtEngine, NodeConfig, StaticResolver};
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(name = "dht_node", about = "Mainline DHT node (demo)")]
struct Args {
    /// UDP port to bind.
    #[clap(long, default_value_t = dht_crawler::config::DEFAULT_PORT)]
    port: u16,

    /// Directory for the routing table / peer store / node id snapshots.
    #[clap(long, parse(from_os_str), default_value = "config")]
    config_dir: PathBuf,

    /// host:port of a well-known bootstrap node, repeatable. If omitted the
    /// node starts cold and only answers inbound traffic.
    #[clap(long = "bootstrap")]
    bootstrap: Vec<String>,
}

#[tokio::main]
async fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = NodeConfig::default().with_port(args.port).with_config_dir(args.config_dir);
    let engine = match DhtEngine::new(config).await {
        Ok(engine) => engine,
        Err(err) => {
            log::error!("failed to start node: {}", err);
            std::process::exit(1);
        }
    };

    log::info!("node {} listening on {}", engine.own_id(), engine.local_addr());

    if !args.bootstrap.is_empty() {
        let mut endpoints = Vec::new();
        for host in &args.bootstrap {
            match host.to_socket_addrs() {
                Ok(resolved) => endpoints.extend(resolved),
                Err(err) => log::warn!("could not resolve bootstrap host {}: {}", host, err),
            }
        }
        let resolver = StaticResolver::new(endpoints);
        let hosts: Vec<&str> = args.bootstrap.iter().map(String::as_str).collect();
        match engine.bootstrap_hosts(&hosts, &resolver).await {
            Ok(()) => log::info!("bootstrap complete, routing table has {} nodes", engine.routing_table_len()),
            Err(err) => log::warn!("bootstrap failed: {}", err),
        }
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(60));
    loop {
        ticker.tick().await;
        log::info!(
            "routing table: {} nodes, {} active transactions, {} info_hashes with stored peers",
            engine.routing_table_len(),
            engine.active_transaction_count(),
            engine.stored_peer_info_hash_count(),
        );
    }
}
