//! Centralised tracing initialisation for the relay binary.
//!
//! Call [`init_tracing`] once at program start. The console layer follows
//! `RUST_LOG` (or the supplied level); the optional log file receives every
//! event at DEBUG as newline-delimited JSON, so a CI artifact keeps the full
//! git and HTTP trail even when the console is quiet.
//!
//! Subsequent calls are silently ignored (the global subscriber can only be
//! set once per process).

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Initialise the global tracing subscriber.
///
/// * `json` - console emits JSON lines instead of human-readable text.
/// * `level` - console verbosity when `RUST_LOG` is not set.
/// * `log_file` - appended to, created if missing.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) -> io::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = fmt::layer().with_target(false).with_writer(io::stderr);
    if json {
        layers.push(console.json().with_filter(env_filter).boxed());
    } else {
        layers.push(console.with_filter(env_filter).boxed());
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(LevelFilter::DEBUG)
                .boxed(),
        );
    }

    tracing_subscriber::registry().with(layers).try_init().ok();
    Ok(())
}
