use clap::Parser;

use custody_bridge::bootstrap;
use custody_bridge::cli::{self, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let loaded = bootstrap::load_env();
    let cli = Cli::parse();
    bootstrap::init_tracing(cli.log_json);

    for path in &loaded {
        tracing::debug!("Loaded env file {}", path.display());
    }

    cli::run(cli.command).await
}
