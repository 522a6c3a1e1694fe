use std::path::PathBuf;

use clap::Parser;

use replikv::config::Config;
use replikv::node;

#[derive(Parser, Debug)]
#[command(author, version, about = "Distributed persistent key-value store")]
struct Cli {
    /// Unique name for this node (also names the default data directory)
    #[arg(long)]
    id: String,

    /// TCP port serving both clients and peer RPCs
    #[arg(long)]
    port: u16,

    /// Comma-separated host:port list of the other cluster members
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Directory for the WAL and term state (default: ./data/<id>)
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[actix_rt::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::for_node(&cli.id, cli.port, cli.peers, cli.data_dir);

    let _handle = match node::start_node(config).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start node: {}", e);
            std::process::exit(1);
        }
    };

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");
    tracing::info!("Shutting down");
}
