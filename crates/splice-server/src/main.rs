mod config;
mod error;
mod handlers;
mod state;

use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use crate::config::ServerSection;
use crate::state::AppState;

/// Chunked-upload server: stages file chunks and assembles them into
/// complete files on request.
#[derive(Parser, Debug)]
#[command(name = "splice-server", version, about)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8686")]
    listen: String,

    /// Directory where chunks are staged and files assembled.
    #[arg(long, default_value = "/var/lib/splice/chunks")]
    staging_dir: String,

    /// Log output format: "pretty" or "json".
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Concurrent chunk copies per merge.
    #[arg(long, default_value_t = 8, value_parser = parse_min_one)]
    merge_parallelism: usize,

    /// Largest accepted chunk body, e.g. "64M" or "1G". 0 disables the cap.
    #[arg(long, default_value = "256M", value_parser = config::parse_size)]
    max_chunk_bytes: u64,

    /// Age in seconds after which an orphaned temp file is swept.
    #[arg(long, default_value_t = 3600)]
    temp_max_age_seconds: u64,

    /// Tokio worker threads.
    #[arg(long, default_value_t = 4, value_parser = parse_min_one)]
    worker_threads: usize,

    /// Cap on tokio blocking threads (directory scans run there).
    #[arg(long, default_value_t = 8, value_parser = parse_min_one)]
    max_blocking_threads: usize,
}

fn parse_min_one(input: &str) -> Result<usize, String> {
    let value: usize = input
        .parse()
        .map_err(|_| format!("invalid number '{input}'"))?;
    if value < 1 {
        return Err("value must be at least 1".to_string());
    }
    Ok(value)
}

fn main() {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.worker_threads)
        .max_blocking_threads(cli.max_blocking_threads)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main(cli)) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn async_main(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.log_format.as_str() {
        "json" => tracing_subscriber::fmt().json().init(),
        "pretty" => tracing_subscriber::fmt().init(),
        other => {
            return Err(format!("unknown log format '{other}' (expected \"pretty\" or \"json\")").into())
        }
    }

    let config = ServerSection {
        listen: cli.listen,
        staging_dir: cli.staging_dir,
        merge_parallelism: cli.merge_parallelism,
        max_chunk_bytes: cli.max_chunk_bytes,
        temp_max_age_seconds: cli.temp_max_age_seconds,
    };

    tokio::fs::create_dir_all(&config.staging_dir)
        .await
        .map_err(|err| {
            format!(
                "failed to create staging directory {}: {err}",
                config.staging_dir
            )
        })?;

    let state = AppState::new(config);

    // Sweep temp files orphaned by uploads that died mid-write.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let max_age = Duration::from_secs(state.inner.config.temp_max_age_seconds);
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                match state.staging().sweep_stale_temps(max_age).await {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "swept stale temp files"),
                    Err(err) => warn!(error = %err, "temp sweep failed"),
                }
            }
        });
    }

    let listen_addr = state.inner.config.listen.clone();
    let app = handlers::router(state);
    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    info!("splice server listening on {listen_addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
