use clap::Parser;
use client::geolocation::{GeolocationOptions, RandomWalk, ScriptedTrack};
use client::markers::LoggingMarkerLayer;
use client::network::Client;
use client::reconciler::{OrderingPolicy, PeerStateReconciler, ReconcilerConfig};
use log::info;
use shared::Coordinates;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:3000")]
    server: String,

    /// Starting latitude of the simulated device
    #[arg(long, default_value = "51.5074", allow_hyphen_values = true)]
    lat: f64,

    /// Starting longitude of the simulated device
    #[arg(long, default_value = "-0.1278", allow_hyphen_values = true)]
    lon: f64,

    /// Milliseconds between position readings
    #[arg(short = 'i', long, default_value = "1000", value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: u64,

    /// Meters walked between readings
    #[arg(long, default_value = "5.0")]
    step_meters: f64,

    /// Request low-accuracy fixes
    #[arg(long)]
    low_accuracy: bool,

    /// Milliseconds a fix may take before it counts as a timeout
    #[arg(long, default_value = "1000")]
    timeout_ms: u64,

    /// Milliseconds a cached fix may be reused
    #[arg(long, default_value = "0")]
    maximum_age_ms: u64,

    /// Replay positions from a file of `latitude,longitude` lines instead of walking
    #[arg(short = 't', long)]
    track: Option<PathBuf>,

    /// Ignore relayed updates older than the last one shown for a peer
    #[arg(long)]
    drop_stale: bool,

    /// Do not recentre the view on peer updates
    #[arg(long)]
    no_follow: bool,

    /// Seed for the simulated walk
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ReconcilerConfig {
        ordering: if args.drop_stale {
            OrderingPolicy::DropStale
        } else {
            OrderingPolicy::LastArrivalWins
        },
        follow_updates: !args.no_follow,
    };
    let options = GeolocationOptions {
        enable_high_accuracy: !args.low_accuracy,
        timeout: Duration::from_millis(args.timeout_ms),
        maximum_age: Duration::from_millis(args.maximum_age_ms),
    };
    let interval = Duration::from_millis(args.interval_ms);

    let reconciler = PeerStateReconciler::new(LoggingMarkerLayer::new(), config);
    let mut client = Client::new(&args.server, reconciler);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match args.track {
        Some(path) => {
            let track = ScriptedTrack::from_file(&path, interval)?;
            info!("Replaying {} positions from {}", track.len(), path.display());
            client.run(track, options, shutdown).await?;
        }
        None => {
            let start = Coordinates::new(args.lat, args.lon);
            start.validate()?;
            let mut walk = RandomWalk::new(start, args.step_meters, interval);
            if let Some(seed) = args.seed {
                walk = walk.with_seed(seed);
            }
            info!(
                "Simulating a walk from ({:.4}, {:.4})",
                start.latitude, start.longitude
            );
            client.run(walk, options, shutdown).await?;
        }
    }

    let reconciler = client.reconciler_mut();
    reconciler.clear();
    info!(
        "Released all markers ({} still live)",
        reconciler.layer().live_markers()
    );

    Ok(())
}
