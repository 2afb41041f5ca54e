//! `custody-bridge doctor` - active health diagnostics.
//!
//! Validates configuration, exercises secure storage and drives a loopback
//! bridge round trip so problems surface before a real session depends on
//! them. Each check reports pass/fail with actionable detail.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::auth::{AuthContextManager, TimeoutPolicy};
use crate::bridge::codec::{BridgeRequest, decode};
use crate::bridge::{SandboxTransport, ScriptHost, Transport};
use crate::config::{BridgeConfig, LitNetwork, custody_bridge_dir};
use crate::error::BridgeError;
use crate::secure_store::{EncryptedFileStorage, MemorySecureStorage, SecureStorage};

const PROBE_KEY: &str = "__custody_bridge_doctor_probe__";
const LOOPBACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(strict: bool) -> anyhow::Result<()> {
    println!("Custody Bridge Doctor");
    println!("=====================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    let config = BridgeConfig::resolve();

    check(
        "Configuration",
        check_configuration(&config),
        &mut passed,
        &mut failed,
    );

    check(
        "Bridge directory",
        check_bridge_dir(&custody_bridge_dir()),
        &mut passed,
        &mut failed,
    );

    if let Ok(config) = &config {
        check(
            "Auth service",
            check_optional_url(config.auth_service_url.as_deref(), "AUTH_SERVICE_URL"),
            &mut passed,
            &mut failed,
        );

        check(
            "Passkey relying party",
            match &config.passkey_rp_id {
                Some(rp_id) => CheckResult::Pass(rp_id.clone()),
                None => CheckResult::Skip("PASSKEY_RP_ID not set".to_string()),
            },
            &mut passed,
            &mut failed,
        );

        check(
            "Secure storage",
            check_secure_storage(config).await,
            &mut passed,
            &mut failed,
        );
    }

    check(
        "Bridge loopback",
        check_bridge_loopback().await,
        &mut passed,
        &mut failed,
    );

    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Some checks failed. Fix the listed items before starting a session.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_configuration(config: &Result<BridgeConfig, crate::error::ConfigError>) -> CheckResult {
    match config {
        Ok(config) => CheckResult::Pass(format!(
            "{} backend on {} via {}",
            config.backend.as_str(),
            config.network,
            redact_url_for_display(&config.rpc_url)
        )),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

fn check_bridge_dir(dir: &Path) -> CheckResult {
    if dir.exists() {
        if dir.is_dir() {
            CheckResult::Pass(format!("{}", dir.display()))
        } else {
            CheckResult::Fail(format!("{} exists but is not a directory", dir.display()))
        }
    } else {
        CheckResult::Pass(format!("{} will be created on first run", dir.display()))
    }
}

fn check_optional_url(url: Option<&str>, key: &str) -> CheckResult {
    match url {
        Some(url) => CheckResult::Pass(redact_url_for_display(url)),
        None => CheckResult::Skip(format!("{key} not set")),
    }
}

async fn check_secure_storage(config: &BridgeConfig) -> CheckResult {
    let Some(master) = &config.secure_storage_key else {
        return CheckResult::Skip(
            "SECURE_STORAGE_KEY not set; sessions will use in-memory storage".to_string(),
        );
    };
    match EncryptedFileStorage::new(&config.secure_storage_path, master) {
        Ok(storage) => match storage_round_trip(&storage).await {
            Ok(()) => CheckResult::Pass(format!("{}", config.secure_storage_path.display())),
            Err(e) => CheckResult::Fail(e),
        },
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

/// Write, read back and remove a probe value.
async fn storage_round_trip(storage: &dyn SecureStorage) -> Result<(), String> {
    let probe = format!("doctor-{}", chrono::Utc::now().timestamp_millis());
    storage
        .set_item(PROBE_KEY, &probe)
        .await
        .map_err(|e| format!("write failed: {e}"))?;
    let read = storage
        .get_item(PROBE_KEY)
        .await
        .map_err(|e| format!("read failed: {e}"))?;
    storage
        .remove_item(PROBE_KEY)
        .await
        .map_err(|e| format!("remove failed: {e}"))?;
    if read.as_deref() != Some(probe.as_str()) {
        return Err("value read back does not match what was written".to_string());
    }
    Ok(())
}

/// In-process engine that answers the liveness probe.
struct LoopbackHost {
    replies: mpsc::Sender<String>,
}

#[async_trait]
impl ScriptHost for LoopbackHost {
    async fn post_message(&self, text: String) -> Result<(), BridgeError> {
        let request: BridgeRequest = decode(&text)?;
        let reply = if request.operation == "healthcheck" {
            json!({"id": request.id, "ok": true, "result": loopback_descriptor()})
        } else {
            json!({"id": request.id, "ok": false, "error": "loopback engine only answers healthcheck"})
        };
        self.replies
            .send(reply.to_string())
            .await
            .map_err(|_| BridgeError::TransportUnavailable("loopback channel closed".to_string()))
    }
}

fn loopback_descriptor() -> Value {
    json!({
        "bridgeVersion": env!("CARGO_PKG_VERSION"),
        "networks": LitNetwork::ALL.map(LitNetwork::as_str),
        "target": format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
        "secureContext": true,
        "webCrypto": true,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

async fn check_bridge_loopback() -> CheckResult {
    let (tx, rx) = mpsc::channel(16);
    let transport = Arc::new(SandboxTransport::new(
        Arc::new(LoopbackHost { replies: tx.clone() }),
        Arc::new(MemorySecureStorage::new()),
        LOOPBACK_TIMEOUT,
    ));
    let pump = {
        let transport = Arc::clone(&transport);
        tokio::spawn(async move { transport.run_inbound(rx).await })
    };

    let manager = AuthContextManager::new(
        Arc::clone(&transport) as Arc<dyn Transport>,
        TimeoutPolicy {
            liveness: LOOPBACK_TIMEOUT,
            ready: LOOPBACK_TIMEOUT,
            ..TimeoutPolicy::default()
        },
    );

    let result = async {
        let probe = manager.healthcheck().await?;
        if tx.send(r#"{"type":"ready"}"#.to_string()).await.is_err() {
            return Err(BridgeError::TransportUnavailable(
                "loopback channel closed".to_string(),
            ));
        }
        manager.wait_for_ready().await?;
        Ok::<_, BridgeError>(probe)
    }
    .await;

    manager.destroy().await;
    let _ = pump.await;

    match result {
        Ok(probe) if manager.pending_requests() == 0 => CheckResult::Pass(format!(
            "healthcheck answered by bridge {}",
            probe.bridge_version
        )),
        Ok(_) => CheckResult::Fail("pending requests leaked after destroy".to_string()),
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

pub(crate) fn redact_url_for_display(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
