//! End-to-end tests for both bridge backends.
//!
//! The sandbox tests play the engine themselves: every message the bridge
//! posts lands on an unbounded channel, and replies are fed back through
//! `SandboxTransport::handle_message`. The native tests use an in-memory
//! `NativeBindings` implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use custody_bridge::auth::{
    AccessControlConditions, AuthPolicy, CreateAuthContextParams, SignMessageParams,
    ViewPkpsParams,
};
use custody_bridge::bridge::NativeReply;
use custody_bridge::{
    AuthContextManager, BRIDGE_DESTROYED, BridgeError, MemorySecureStorage, NativeBindings,
    NativeTarget, NativeTransport, Operation, SandboxTransport, ScriptHost, TimeoutPolicy,
    Transport,
};

/// Host that hands every posted message to the test.
struct ChannelHost {
    outbound: mpsc::UnboundedSender<String>,
    posts: AtomicUsize,
}

#[async_trait]
impl ScriptHost for ChannelHost {
    async fn post_message(&self, text: String) -> Result<(), BridgeError> {
        self.posts.fetch_add(1, Ordering::SeqCst);
        self.outbound
            .send(text)
            .map_err(|_| BridgeError::TransportUnavailable("engine gone".to_string()))
    }
}

struct SandboxHarness {
    host: Arc<ChannelHost>,
    bridge: Arc<SandboxTransport>,
    manager: Arc<AuthContextManager>,
    engine: mpsc::UnboundedReceiver<String>,
}

impl SandboxHarness {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let host = Arc::new(ChannelHost {
            outbound: tx,
            posts: AtomicUsize::new(0),
        });
        let bridge = Arc::new(SandboxTransport::new(
            Arc::clone(&host) as Arc<dyn ScriptHost>,
            Arc::new(MemorySecureStorage::new()),
            Duration::from_secs(30),
        ));
        let manager = Arc::new(AuthContextManager::new(
            Arc::clone(&bridge) as Arc<dyn Transport>,
            TimeoutPolicy::default(),
        ));
        Self {
            host,
            bridge,
            manager,
            engine: rx,
        }
    }

    async fn ready(&self) {
        self.bridge.handle_message(r#"{"type":"ready"}"#).await;
    }

    /// Next message the bridge posted into the engine.
    async fn next_posted(&mut self) -> Value {
        let text = self.engine.recv().await.expect("bridge dropped its host");
        serde_json::from_str(&text).expect("bridge posted invalid JSON")
    }

    async fn reply_ok(&self, request: &Value, result: Value) {
        let reply = json!({"id": request["id"], "ok": true, "result": result});
        self.bridge.handle_message(&reply.to_string()).await;
    }

    fn posts(&self) -> usize {
        self.host.posts.load(Ordering::SeqCst)
    }
}

fn auth_params(access_token: &str) -> CreateAuthContextParams {
    CreateAuthContextParams {
        pkp_public_key: "0x04aa".to_string(),
        auth_method_type: 3,
        auth_method_id: "0xmethod".to_string(),
        access_token: access_token.to_string(),
        auth_config: AuthPolicy {
            domain: "app.example".to_string(),
            ..AuthPolicy::default()
        },
    }
}

fn sign_params(message: &str) -> SignMessageParams {
    SignMessageParams {
        message: message.to_string(),
        public_key: "0x04aa".to_string(),
    }
}

// ── Scenario A ──────────────────────────────────────────────

#[tokio::test]
async fn empty_access_token_fails_before_any_transport_call() {
    let harness = SandboxHarness::new();
    harness.ready().await;

    let err = harness
        .manager
        .create_auth_context(&auth_params(""))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Precondition(_)));

    // The transport enforces the same rule for untyped callers.
    let err = harness
        .bridge
        .send_request(
            Operation::CreateAuthContext,
            Some(json!({"accessToken": "", "authConfig": {"domain": "app.example"}})),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Precondition(_)));

    assert_eq!(harness.posts(), 0);
    assert_eq!(harness.bridge.pending_requests(), 0);
}

// ── Scenario B ──────────────────────────────────────────────

#[tokio::test]
async fn liveness_probe_works_before_ready() {
    let mut harness = SandboxHarness::new();
    assert!(!harness.bridge.is_ready());

    let probe = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move { manager.healthcheck().await })
    };

    let request = harness.next_posted().await;
    assert_eq!(request["operation"], "healthcheck");
    assert!(request.get("payload").is_none());
    harness
        .reply_ok(
            &request,
            json!({"bridgeVersion": "1.0.0", "networks": ["naga-dev"], "secureContext": true}),
        )
        .await;

    let result = probe.await.unwrap().unwrap();
    assert_eq!(result.bridge_version, "1.0.0");
    assert!(result.secure_context);
    assert!(!harness.bridge.is_ready());
}

// ── Scenario C ──────────────────────────────────────────────

#[tokio::test]
async fn storage_get_for_absent_key_is_ok_null() {
    let mut harness = SandboxHarness::new();
    harness
        .bridge
        .handle_message(r#"{"type":"storageGet","id":"st-1","key":"never-written"}"#)
        .await;

    assert_eq!(
        harness.next_posted().await,
        json!({"type": "storageResponse", "id": "st-1", "ok": true, "value": null})
    );
}

// ── Scenario D ──────────────────────────────────────────────

#[tokio::test]
async fn out_of_order_responses_reach_the_right_callers() {
    let mut harness = SandboxHarness::new();
    harness.ready().await;

    let first = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move { manager.sign_message(&sign_params("first")).await })
    };
    let request_a = harness.next_posted().await;
    let second = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move { manager.sign_message(&sign_params("second")).await })
    };
    let request_b = harness.next_posted().await;

    assert_ne!(request_a["id"], request_b["id"]);
    assert_eq!(request_a["operation"], request_b["operation"]);
    assert_eq!(request_a["payload"]["message"], "first");
    assert_eq!(request_a["payload"]["publicKey"], "04aa");

    harness
        .reply_ok(&request_b, json!({"signature": "0xbbbb"}))
        .await;
    harness
        .reply_ok(&request_a, json!({"signature": "0xaaaa"}))
        .await;

    assert_eq!(first.await.unwrap().unwrap().signature, "0xaaaa");
    assert_eq!(second.await.unwrap().unwrap().signature, "0xbbbb");
    assert_eq!(harness.bridge.pending_requests(), 0);
}

// ── Scenario E ──────────────────────────────────────────────

#[tokio::test]
async fn destroy_rejects_every_outstanding_request() {
    let mut harness = SandboxHarness::new();
    harness.ready().await;

    let mut calls = Vec::new();
    for message in ["r1", "r2", "r3"] {
        let manager = Arc::clone(&harness.manager);
        calls.push(tokio::spawn(async move {
            manager.sign_message(&sign_params(message)).await
        }));
        harness.next_posted().await;
    }
    assert_eq!(harness.bridge.pending_requests(), 3);

    harness.manager.destroy().await;

    for call in calls {
        match call.await.unwrap().unwrap_err() {
            BridgeError::Cancelled { operation, reason } => {
                assert_eq!(operation, "signMessage");
                assert_eq!(reason, BRIDGE_DESTROYED);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
    assert_eq!(harness.bridge.pending_requests(), 0);

    let after = harness.manager.healthcheck().await.unwrap_err();
    assert!(matches!(after, BridgeError::TransportUnavailable(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn every_request_settles_on_destroy(n in 1usize..24) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async move {
            let harness = SandboxHarness::new();
            harness.ready().await;

            let calls: Vec<_> = (0..n)
                .map(|i| {
                    let bridge = Arc::clone(&harness.bridge);
                    tokio::spawn(async move {
                        bridge
                            .send_request(
                                Operation::Encrypt,
                                Some(json!({"plaintext": i.to_string()})),
                                Duration::from_secs(60),
                            )
                            .await
                    })
                })
                .collect();
            while harness.bridge.pending_requests() < n {
                tokio::task::yield_now().await;
            }

            harness.bridge.destroy().await;
            let outcomes = join_all(calls).await;
            assert_eq!(outcomes.len(), n);
            for outcome in outcomes {
                assert!(matches!(
                    outcome.unwrap(),
                    Err(BridgeError::Cancelled { ref reason, .. }) if reason == BRIDGE_DESTROYED
                ));
            }
            assert_eq!(harness.bridge.pending_requests(), 0);
        });
    }
}

// ── Correlation edge cases ──────────────────────────────────

#[tokio::test]
async fn unknown_id_does_not_disturb_pending_requests() {
    let mut harness = SandboxHarness::new();
    harness.ready().await;

    let call = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move {
            manager
                .view_pkps_by_auth_data(&ViewPkpsParams {
                    auth_method_type: 3,
                    auth_method_id: "0xmethod".to_string(),
                    limit: None,
                    offset: None,
                })
                .await
        })
    };
    let request = harness.next_posted().await;
    assert_eq!(request["payload"]["limit"], 5);
    assert_eq!(request["payload"]["offset"], 0);

    harness
        .bridge
        .handle_message(r#"{"id":"req_0_999","ok":true,"result":{"items":[]}}"#)
        .await;
    assert_eq!(harness.bridge.pending_requests(), 1);

    harness
        .reply_ok(
            &request,
            json!({
                "pkps": [{"tokenId": "123", "pubkey": "04aa", "ethAddress": "0x1"}],
                "pagination": {"limit": 5, "offset": 0, "total": 1, "hasMore": false},
            }),
        )
        .await;
    let page = call.await.unwrap().unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].public_key, "04aa");
}

/// Malformed inbound messages are dropped on purpose: they are logged and
/// never surface to any caller, so unrelated in-flight requests carry on.
#[tokio::test]
async fn malformed_messages_are_dropped_without_affecting_inflight_calls() {
    let mut harness = SandboxHarness::new();
    harness.ready().await;

    let call = {
        let bridge = Arc::clone(&harness.bridge);
        tokio::spawn(async move {
            bridge
                .send_request(
                    Operation::Encrypt,
                    Some(json!({"plaintext": "hi", "accessControlConditions": []})),
                    Duration::from_secs(5),
                )
                .await
        })
    };
    let request = harness.next_posted().await;

    for junk in ["{oops", "42", r#"{"type":"warp"}"#, r#"{"id":7}"#] {
        harness.bridge.handle_message(junk).await;
    }
    assert_eq!(harness.bridge.pending_requests(), 1);

    harness
        .reply_ok(&request, json!({"ciphertext": "ct", "dataToEncryptHash": "h"}))
        .await;
    assert_eq!(call.await.unwrap().unwrap()["ciphertext"], "ct");
}

#[tokio::test(start_paused = true)]
async fn silent_engine_times_out_with_operation_name() {
    let mut harness = SandboxHarness::new();
    harness.ready().await;

    let err = harness
        .bridge
        .send_request(
            Operation::ExecuteJs,
            Some(json!({"code": "return 1"})),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
    match err {
        BridgeError::Timeout { operation, timeout } => {
            assert_eq!(operation, "executeJs");
            assert_eq!(timeout, Duration::from_millis(200));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(harness.bridge.pending_requests(), 0);

    // The late reply is ignored.
    let request = harness.next_posted().await;
    harness.reply_ok(&request, json!({"success": true})).await;
    assert_eq!(harness.bridge.pending_requests(), 0);
}

// ── Readiness ───────────────────────────────────────────────

#[tokio::test]
async fn requests_wait_for_ready_and_are_released_together() {
    let mut harness = SandboxHarness::new();

    let calls: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|message| {
            let manager = Arc::clone(&harness.manager);
            tokio::spawn(async move { manager.sign_message(&sign_params(message)).await })
        })
        .collect();

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(harness.posts(), 0);
    assert!(harness.engine.try_recv().is_err());

    harness.ready().await;
    for _ in 0..3 {
        let request = harness.next_posted().await;
        let signature = format!("0x{}", request["payload"]["message"].as_str().unwrap());
        harness
            .reply_ok(&request, json!({"signature": signature}))
            .await;
    }

    let signatures: Vec<String> = join_all(calls)
        .await
        .into_iter()
        .map(|outcome| outcome.unwrap().unwrap().signature)
        .collect();
    assert_eq!(signatures, vec!["0xa", "0xb", "0xc"]);

    // A second ready signal changes nothing.
    harness.ready().await;
    assert!(harness.bridge.is_ready());
}

#[tokio::test(start_paused = true)]
async fn never_ready_engine_yields_not_ready() {
    let harness = SandboxHarness::new();
    let err = harness
        .manager
        .sign_message(&sign_params("hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::NotReady { ref operation, .. } if operation == "signMessage"));
    assert!(err.is_retryable());
    assert_eq!(harness.posts(), 0);
}

// ── Native backend ──────────────────────────────────────────

const PKP: &str = "04aa";

struct MemoryBindings;

fn ok(result: Value) -> NativeReply {
    Ok(json!({"ok": true, "result": result}).to_string())
}

#[async_trait]
impl NativeBindings for MemoryBindings {
    async fn healthcheck(&self, target: &NativeTarget) -> NativeReply {
        ok(json!({"bridgeVersion": "native-1", "networks": [target.network.clone()], "secureContext": true}))
    }

    async fn test_connect(&self, target: &NativeTarget) -> NativeReply {
        ok(json!({
            "network": target.network.clone(),
            "connectedNodes": 3,
            "threshold": 2,
            "epoch": 9,
            "firstNode": "https://node-1.example",
        }))
    }

    async fn create_eth_wallet_auth_data(&self, _private_key_hex: &str, nonce: &str) -> NativeReply {
        ok(json!({"authMethodType": 1, "authMethodId": "0xwallet", "accessToken": format!("siwe:{nonce}")}))
    }

    async fn mint_and_register_pkp(
        &self,
        _target: &NativeTarget,
        _auth_service_url: &str,
        _rp_id: &str,
        _scopes: &[String],
        _display_name: &str,
    ) -> NativeReply {
        Err("not used".to_string())
    }

    async fn authenticate_passkey(&self, _target: &NativeTarget, _rp_id: &str) -> NativeReply {
        ok(json!({"authMethodType": 3, "authMethodId": "0xmethod", "accessToken": "tok"}))
    }

    async fn view_pkps_by_auth_data(
        &self,
        _target: &NativeTarget,
        _auth_method_type: u32,
        _auth_method_id: &str,
        limit: u64,
        offset: u64,
    ) -> NativeReply {
        ok(json!({"items": [], "pagination": {"limit": limit, "offset": offset, "total": 0, "hasMore": false}}))
    }

    async fn create_auth_context(
        &self,
        _target: &NativeTarget,
        pkp_public_key: &str,
        auth_method_type: u32,
        auth_method_id: &str,
        _access_token: &str,
        auth_config_json: &str,
    ) -> NativeReply {
        let policy: Value = serde_json::from_str(auth_config_json).unwrap();
        assert_eq!(policy["resources"], json!([["pkp-signing", "*"]]));
        ok(json!({
            "sessionHandle": "native-secret",
            "sessionPublicKey": "sess-pub",
            "delegationSignatureAddress": "0xdelegate",
            "delegationSignatureAlgo": "ECDSA_SECP256K1",
            "pkpPublicKey": pkp_public_key,
            "authMethodType": auth_method_type,
            "authMethodId": auth_method_id,
            "connectedNodes": 3,
            "threshold": 2,
            "epoch": 9,
        }))
    }

    async fn execute_js(
        &self,
        _target: &NativeTarget,
        _session_handle: &str,
        _code: Option<&str>,
        _ipfs_id: Option<&str>,
        _js_params_json: &str,
        _use_single_node: bool,
    ) -> NativeReply {
        ok(json!({"success": true, "signatures": {}, "response": null, "logs": ""}))
    }

    async fn sign_message(
        &self,
        _target: &NativeTarget,
        session_handle: &str,
        _message: &str,
        _public_key: &str,
    ) -> NativeReply {
        assert_eq!(session_handle, "native-secret");
        ok(json!({"signature": {"r": "ab", "s": "cd", "recid": 1}}))
    }

    async fn encrypt(
        &self,
        _target: &NativeTarget,
        plaintext: &str,
        _conditions_json: &str,
    ) -> NativeReply {
        ok(json!({"ciphertext": format!("enc:{plaintext}"), "dataToEncryptHash": "h"}))
    }

    async fn decrypt(
        &self,
        _target: &NativeTarget,
        _session_handle: &str,
        ciphertext: &str,
        _data_to_encrypt_hash: &str,
        _conditions_json: &str,
    ) -> NativeReply {
        ok(json!({"decryptedData": ciphertext.trim_start_matches("enc:")}))
    }

    async fn fetch_and_decrypt_content(
        &self,
        _target: &NativeTarget,
        _session_handle: &str,
        _source_url: &str,
        _conditions_json: &str,
    ) -> NativeReply {
        Err("not used".to_string())
    }

    async fn clear_auth_context(&self, _session_handle: Option<&str>) -> NativeReply {
        ok(json!({"success": true}))
    }
}

fn native_manager(bindings: Option<Arc<dyn NativeBindings>>) -> AuthContextManager {
    let transport = NativeTransport::new(
        bindings,
        NativeTarget {
            network: "naga-dev".to_string(),
            rpc_url: "https://rpc.example".to_string(),
        },
        Duration::from_secs(30),
    );
    AuthContextManager::new(Arc::new(transport), TimeoutPolicy::default())
}

#[tokio::test]
async fn native_session_flow() {
    let manager = native_manager(Some(Arc::new(MemoryBindings)));
    assert_eq!(manager.backend(), "native");
    manager.wait_for_ready().await.unwrap();

    let context = manager.create_auth_context(&auth_params("tok")).await.unwrap();
    assert_eq!(context.pkp_public_key, PKP);
    assert_eq!(
        context.delegation_signature_algorithm.as_deref(),
        Some("ECDSA_SECP256K1")
    );
    assert_eq!(context.threshold, 2);

    let signature = manager.sign_message(&sign_params("hello")).await.unwrap();
    assert_eq!(signature.signature.len(), 132);
    assert!(signature.signature.ends_with("1c"));

    let conditions =
        AccessControlConditions::AccessControlConditions(vec![json!({"chain": "ethereum"})]);
    let encrypted = manager
        .encrypt(&custody_bridge::auth::EncryptParams {
            plaintext: "secret".to_string(),
            conditions: conditions.clone(),
        })
        .await
        .unwrap();
    let decrypted = manager
        .decrypt_with_current_context(
            encrypted.ciphertext,
            encrypted.data_to_encrypt_hash,
            conditions,
        )
        .await
        .unwrap();
    assert_eq!(decrypted.decrypted_data, "secret");

    assert!(manager.clear_auth_context().await.unwrap().success);
    assert!(manager.current_auth_context().await.is_none());
    let err = manager.sign_message(&sign_params("hello")).await.unwrap_err();
    assert!(matches!(err, BridgeError::Precondition(_)));
}

#[tokio::test]
async fn native_without_module_fails_consistently() {
    let manager = native_manager(None);
    let failures = vec![
        manager.healthcheck().await.map(|_| ()).unwrap_err(),
        manager.sign_message(&sign_params("x")).await.map(|_| ()).unwrap_err(),
        manager.clear_auth_context().await.map(|_| ()).unwrap_err(),
    ];
    let messages: Vec<String> = failures.iter().map(ToString::to_string).collect();
    assert!(messages.iter().all(|m| m == &messages[0]), "{messages:?}");
    assert!(matches!(failures[0], BridgeError::TransportUnavailable(_)));
}

#[tokio::test]
async fn both_backends_share_precondition_rules() {
    let native = native_manager(Some(Arc::new(MemoryBindings)));
    let harness = SandboxHarness::new();
    harness.ready().await;

    for manager in [&native, harness.manager.as_ref()] {
        let err = manager
            .send_request::<Value>("executeJs", Some(json!({"code": ""})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Precondition(_)), "{}", manager.backend());

        let err = manager
            .send_request::<Value>(
                "createEthWalletAuthData",
                Some(json!({"privateKeyHex": "0xkey", "nonce": " "})),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Precondition(_)), "{}", manager.backend());

        let err = manager
            .send_request::<Value>("mintPkp", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownOperation(_)));
    }
    assert_eq!(harness.posts(), 0);
}

#[tokio::test]
async fn handshake_and_wallet_auth_match_across_backends() {
    let native = native_manager(Some(Arc::new(MemoryBindings)));
    let native_handshake = native.test_connect().await.unwrap();

    let mut harness = SandboxHarness::new();
    harness.ready().await;
    let call = {
        let manager = Arc::clone(&harness.manager);
        tokio::spawn(async move { manager.test_connect().await })
    };
    let request = harness.next_posted().await;
    assert_eq!(request["operation"], "testConnect");
    harness
        .reply_ok(
            &request,
            json!({
                "network": "naga-dev",
                "connectedNodes": 3,
                "threshold": 2,
                "epoch": 9,
                "firstNode": "https://node-1.example",
            }),
        )
        .await;
    assert_eq!(call.await.unwrap().unwrap(), native_handshake);

    let key = SecretString::from("0xkey".to_string());
    let auth = native
        .create_eth_wallet_auth_data(&key, "0xblockhash")
        .await
        .unwrap();
    assert_eq!(auth.auth_method_type, 1);
    assert_eq!(auth.access_token, "siwe:0xblockhash");
}
