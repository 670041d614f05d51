use clap::Parser;
use log::info;
use server::network::{Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of concurrent clients
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Seconds between heartbeat pings
    #[arg(long, default_value = "25", value_parser = clap::value_parser!(u64).range(1..))]
    ping_interval: u64,

    /// Extra seconds of silence tolerated before a client is dropped
    #[arg(long, default_value = "20")]
    ping_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        ping_interval: Duration::from_secs(args.ping_interval),
        ping_timeout: Duration::from_secs(args.ping_timeout),
    };

    let mut server = Server::new(config).await?;
    info!("Open http://{} in a browser to share your location", server.local_addr());

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
