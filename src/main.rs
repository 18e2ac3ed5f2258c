use std::path::PathBuf;

use chrono::Local;
use clap::Parser;
use harvest::{
    harvest, ident::decode_base36, info_time, shutdown, HarvestConfig, Result,
    DEFAULT_ENDPOINT, DEFAULT_OUTPUT_FILE, WORKERS,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "harvest", version)]
#[command(about = "Harvests posts by walking sequential base-36 ids in bulk")]
struct Args {
    /// Starting post ID (base36)
    #[arg(long)]
    start_id: String,

    /// Comma-separated list of proxy URLs (optional)
    #[arg(long, value_delimiter = ',')]
    proxies: Vec<String>,

    /// Output JSON file, skipped offsets go to <stem>_skipped.json next to it
    #[arg(long, default_value = DEFAULT_OUTPUT_FILE)]
    output_file: PathBuf,

    /// Bulk lookup endpoint
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Number of concurrent workers
    #[arg(long, default_value_t = WORKERS)]
    workers: usize,

    /// Stop after this many fresh batches (runs until interrupted if omitted)
    #[arg(long)]
    batches: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harvest=info,reqwest=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let start_time = Local::now();

    let mut config = HarvestConfig::new(decode_base36(&args.start_id)?, args.output_file);
    config.proxies = args
        .proxies
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    config.endpoint = args.endpoint;
    config.workers = args.workers;
    config.batch_limit = args.batches;

    let token = CancellationToken::new();
    let listener = shutdown::spawn_listener(token.clone());

    let summary = harvest(config, token.clone()).await?;
    token.cancel();
    listener.await?;

    info_time!(start_time, "Scraping completed: {:?}", summary);
    Ok(())
}
