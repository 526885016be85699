use acorn::{new_group, Error, FnLoader, GroupConfig, NodeServer, RpcPool};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tracing::{debug, error, info};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    #[clap(long, default_value = "127.0.0.1:4000")]
    addr: SocketAddr,

    /// All node addresses in the cluster, this node included. Defaults to
    /// a single-node setup.
    #[clap(long, value_delimiter = ',')]
    peers: Option<Vec<String>>,

    /// Cache namespace served by this node.
    #[clap(long, default_value = "scores")]
    group: String,

    /// LRU budget in bytes; 0 means unbounded.
    #[clap(long, default_value = "1048576")]
    cache_bytes: u64,

    /// Root directory for append-only logs; omit to run purely in memory.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Earlier backup file to bootstrap the log (and cache) from.
    #[clap(long)]
    seed_file: Option<PathBuf>,

    /// Source of truth consulted on cache misses: a file of `key=value`
    /// lines, re-read on every miss.
    #[clap(long)]
    source_file: PathBuf,

    #[clap(long, default_value = "info", env = "ACORN_LOG")]
    log_level: tracing_subscriber::filter::LevelFilter,
}

fn lookup(source_file: &PathBuf, key: &str) -> acorn::Result<Vec<u8>> {
    debug!(%key, "consulting source of truth");
    let table = std::fs::read_to_string(source_file)
        .map_err(|e| Error::Loader(format!("read {}: {e}", source_file.display())))?;
    table
        .lines()
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v.as_bytes().to_vec())
        .ok_or_else(|| Error::KeyNotFound(key.to_owned()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    tracing_subscriber::fmt()
        .with_max_level(app.log_level)
        .init();

    let source_file = app.source_file.clone();
    let group = new_group(
        GroupConfig {
            name: app.group.clone(),
            cache_bytes: app.cache_bytes,
            persistence_dir: app.data_dir.clone(),
            seed_file: app.seed_file.clone(),
        },
        FnLoader(move |key: &str| lookup(&source_file, key)),
    )?;

    let pool = Arc::new(RpcPool::new(app.addr.to_string()));
    let peers = app
        .peers
        .clone()
        .unwrap_or_else(|| vec![app.addr.to_string()]);
    pool.set_peers(peers);
    group.register_peers(pool)?;

    info!(
        "acorn-server version: {}, group: {}",
        env!("CARGO_PKG_VERSION"),
        app.group
    );

    let server = NodeServer::new(app.addr);
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("server exited: {e}");
        }
    });

    match ctrl_c().await {
        Ok(_) => info!("Received shutdown signal"),
        Err(e) => error!("Error receiving Ctrl-C: {e}"),
    };

    Ok(())
}
