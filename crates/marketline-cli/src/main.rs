//! marketline - sign in to the marketline shop from the command line.
//!
//! Drives the core session store: login, registration, logout, email
//! verification and password recovery, plus inspection of the stored session.

mod commands;

use std::io;

use anyhow::Result;
use marketline_core::Config;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

/// Initialize the tracing subscriber for logging.
///
/// Stderr and the daily log file in the cache dir share the `RUST_LOG`
/// filter (default `warn`). The returned guard flushes the file on drop.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file = config.cache_dir().ok().and_then(|dir| {
        Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("marketline")
            .filename_suffix("log")
            .build(dir)
            .ok()
    });
    let (file_layer, guard) = match file {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load()?;
    let _guard = init_tracing(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("{}\n\n{}", message, commands::USAGE);
            std::process::exit(2);
        }
    };

    info!(?command, "marketline starting");
    commands::run(command, &mut config).await
}
