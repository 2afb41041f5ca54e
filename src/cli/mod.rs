//! `custody-bridge` command line.

pub mod doctor;

use clap::{Parser, Subcommand};

use crate::config::BridgeConfig;

#[derive(Parser, Debug)]
#[command(name = "custody-bridge", version, about = "Threshold-custody bridge tooling")]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the resolved configuration (secrets redacted).
    Config,

    /// Check configuration, secure storage and the bridge round trip.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

pub async fn run(command: Command) -> anyhow::Result<()> {
    match command {
        Command::Config => run_config_command(),
        Command::Doctor { strict } => doctor::run_doctor_command(strict).await,
    }
}

fn run_config_command() -> anyhow::Result<()> {
    let config = BridgeConfig::resolve()?;
    for (key, value) in config_lines(&config) {
        println!("{key:<28} {value}");
    }
    Ok(())
}

fn config_lines(config: &BridgeConfig) -> Vec<(&'static str, String)> {
    let optional = |value: &Option<String>| value.clone().unwrap_or_else(|| "(unset)".to_string());
    vec![
        ("CUSTODY_BRIDGE_BACKEND", config.backend.as_str().to_string()),
        ("LIT_NETWORK", config.network.to_string()),
        ("LIT_RPC_URL", doctor::redact_url_for_display(&config.rpc_url)),
        (
            "BRIDGE_DEFAULT_TIMEOUT_MS",
            config.default_timeout.as_millis().to_string(),
        ),
        (
            "BRIDGE_EXTENDED_TIMEOUT_MS",
            config.extended_timeout.as_millis().to_string(),
        ),
        (
            "BRIDGE_READY_TIMEOUT_MS",
            config.ready_timeout.as_millis().to_string(),
        ),
        (
            "BRIDGE_LIVENESS_TIMEOUT_MS",
            config.liveness_timeout.as_millis().to_string(),
        ),
        (
            "AUTH_SERVICE_URL",
            config
                .auth_service_url
                .as_deref()
                .map(doctor::redact_url_for_display)
                .unwrap_or_else(|| "(unset)".to_string()),
        ),
        ("PASSKEY_RP_ID", optional(&config.passkey_rp_id)),
        (
            "CONTENT_GATEWAY_URL",
            doctor::redact_url_for_display(&config.content_gateway_url),
        ),
        (
            "SECURE_STORAGE_PATH",
            config.secure_storage_path.display().to_string(),
        ),
        (
            "SECURE_STORAGE_KEY",
            if config.secure_storage_key.is_some() {
                "[REDACTED]".to_string()
            } else {
                "(unset)".to_string()
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_doctor_strict() {
        let cli = Cli::try_parse_from(["custody-bridge", "doctor", "--strict"]).unwrap();
        assert!(matches!(cli.command, Command::Doctor { strict: true }));
    }
}
