//! Process bootstrap: env files and logging.
//!
//! File: `~/.custody-bridge/.env` (standard dotenvy format)

use std::path::{Path, PathBuf};

use tracing_subscriber::EnvFilter;

use crate::config::custody_bridge_dir;

const DEFAULT_LOG_FILTER: &str = "custody_bridge=info";

/// Path to the bridge-specific `.env` file: `~/.custody-bridge/.env`.
pub fn custody_bridge_env_path() -> PathBuf {
    custody_bridge_dir().join(".env")
}

/// Load `./.env`, then `~/.custody-bridge/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.custody-bridge/.env`
///
/// Returns the files that were actually loaded.
pub fn load_env() -> Vec<PathBuf> {
    let mut loaded = Vec::new();
    if let Ok(path) = dotenvy::dotenv() {
        loaded.push(path);
    }
    let home = custody_bridge_env_path();
    if load_env_file(&home) {
        loaded.push(home);
    }
    loaded
}

fn load_env_file(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match dotenvy::from_path(path) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("Warning: failed to load {}: {}", path.display(), e);
            false
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the default `custody_bridge=info` filter. Calling
/// this twice is harmless; the second subscriber is simply not installed.
pub fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        tracing::debug!("Tracing subscriber already installed: {}", e);
    }
}
