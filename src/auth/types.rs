//! Typed payloads and results for the operation catalogue.
//!
//! Field names follow the camelCase wire shape shared by both backends.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Accepts either a JSON string or a JSON number and yields its text.
///
/// Token ids cross the codec as numbers when small and decimal strings when
/// large; callers always see a string.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Environment descriptor returned by the liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthcheckResult {
    #[serde(default)]
    pub bridge_version: String,
    #[serde(default, alias = "litNetworks")]
    pub networks: Vec<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub secure_context: bool,
    #[serde(default)]
    pub web_crypto: bool,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintPkpParams {
    pub auth_service_url: String,
    pub rp_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub display_name: String,
}

/// Proof of identity accepted by the network.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthMethod {
    pub auth_method_type: u32,
    pub auth_method_id: String,
    #[serde(default)]
    pub access_token: String,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMethod")
            .field("auth_method_type", &self.auth_method_type)
            .field("auth_method_id", &self.auth_method_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub token_id: String,
    #[serde(alias = "pubkey")]
    pub public_key: String,
    pub eth_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintPkpResult {
    pub pkp: KeyPairRecord,
    pub auth_method: AuthMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePasskeyParams {
    pub rp_id: String,
}

/// Auth data proven by an EOA signature over the network `nonce`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthWalletAuthParams {
    pub private_key_hex: String,
    pub nonce: String,
}

impl fmt::Debug for EthWalletAuthParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthWalletAuthParams")
            .field("private_key_hex", &"[REDACTED]")
            .field("nonce", &self.nonce)
            .finish()
    }
}

/// Handshake summary from connecting to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    pub network: String,
    pub connected_nodes: u64,
    pub threshold: u64,
    pub epoch: u64,
    #[serde(default)]
    pub first_node: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewPkpsParams {
    pub auth_method_type: u32,
    pub auth_method_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub limit: u64,
    pub offset: u64,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPairPage {
    #[serde(alias = "pkps")]
    pub items: Vec<KeyPairRecord>,
    pub pagination: PaginationInfo,
}

/// Session policy document sent with `createAuthContext`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicy {
    /// `[ability, resourceId]` pairs.
    #[serde(default)]
    pub resources: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    #[serde(default)]
    pub domain: String,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuthContextParams {
    pub pkp_public_key: String,
    pub auth_method_type: u32,
    pub auth_method_id: String,
    pub access_token: String,
    pub auth_config: AuthPolicy,
}

impl fmt::Debug for CreateAuthContextParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateAuthContextParams")
            .field("pkp_public_key", &self.pkp_public_key)
            .field("auth_method_type", &self.auth_method_type)
            .field("auth_method_id", &self.auth_method_id)
            .field("access_token", &"[REDACTED]")
            .field("auth_config", &self.auth_config)
            .finish()
    }
}

/// Host-visible description of a network session.
///
/// The session secret is not part of this type; it stays with whichever
/// backend created the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub session_public_key: String,
    pub delegation_signature_address: String,
    #[serde(default, alias = "delegationSignatureAlgo")]
    pub delegation_signature_algorithm: Option<String>,
    pub pkp_public_key: String,
    pub auth_method_type: u32,
    pub auth_method_id: String,
    #[serde(default)]
    pub connected_nodes: u64,
    #[serde(default)]
    pub threshold: u64,
    #[serde(default)]
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteJsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipfs_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_params: Option<Value>,
    #[serde(default)]
    pub use_single_node: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteJsResult {
    pub success: bool,
    #[serde(default)]
    pub signatures: BTreeMap<String, Value>,
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub logs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageParams {
    pub message: String,
    /// Blank signs with the PKP of the current auth context.
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageResult {
    pub signature: String,
}

/// Access-control condition set, in one of the supported dialects.
///
/// Serialized as a single key naming the dialect, e.g.
/// `{"accessControlConditions": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccessControlConditions {
    AccessControlConditions(Vec<Value>),
    EvmContractConditions(Vec<Value>),
    SolRpcConditions(Vec<Value>),
    UnifiedAccessControlConditions(Vec<Value>),
}

impl AccessControlConditions {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::AccessControlConditions(c)
            | Self::EvmContractConditions(c)
            | Self::SolRpcConditions(c)
            | Self::UnifiedAccessControlConditions(c) => c.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptParams {
    pub plaintext: String,
    #[serde(flatten)]
    pub conditions: AccessControlConditions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptResult {
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptParams {
    pub ciphertext: String,
    pub data_to_encrypt_hash: String,
    #[serde(flatten)]
    pub conditions: AccessControlConditions,
    pub auth_context: AuthContext,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptResult {
    pub decrypted_data: String,
}

const DEFAULT_CONTENT_GATEWAY: &str = "https://gateway.s3-node-1.load.network";

/// Where an encrypted content blob lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentLocator {
    #[serde(default)]
    pub dataset_owner: String,
    pub piece_cid: String,
    pub content_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
}

impl ContentLocator {
    fn is_filecoin_piece(&self) -> bool {
        ["baga", "bafy", "Qm"]
            .iter()
            .any(|prefix| self.piece_cid.starts_with(prefix))
    }

    /// Resolve the URL the ciphertext is fetched from.
    ///
    /// Filecoin piece CIDs resolve through the dataset owner's filbeam host;
    /// anything else goes through the content gateway.
    pub fn source_url(&self, default_gateway: Option<&str>) -> Result<String, String> {
        if self.is_filecoin_piece() {
            let owner = self.dataset_owner.trim();
            if owner.is_empty() {
                return Err("missing datasetOwner for Filecoin piece CID".to_string());
            }
            let host = if self.network.as_deref() == Some("calibration") {
                "calibration.filbeam.io"
            } else {
                "filbeam.io"
            };
            return Ok(format!("https://{owner}.{host}/{}", self.piece_cid));
        }

        let gateway = self
            .gateway_url
            .as_deref()
            .or(default_gateway)
            .unwrap_or(DEFAULT_CONTENT_GATEWAY)
            .trim_end_matches('/');
        Ok(format!("{gateway}/resolve/{}", self.piece_cid))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndDecryptParams {
    #[serde(flatten)]
    pub locator: ContentLocator,
    #[serde(flatten)]
    pub conditions: AccessControlConditions,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndDecryptResult {
    pub audio_base64: String,
    pub bytes: u64,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearAuthContextResult {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn key_pair_record_accepts_numeric_or_string_token_id() {
        let small: KeyPairRecord = serde_json::from_value(json!({
            "tokenId": 42, "pubkey": "04ab", "ethAddress": "0x1"
        }))
        .unwrap();
        assert_eq!(small.token_id, "42");
        assert_eq!(small.public_key, "04ab");

        let big: KeyPairRecord = serde_json::from_value(json!({
            "tokenId": "98765432109876543210", "publicKey": "04cd", "ethAddress": "0x2"
        }))
        .unwrap();
        assert_eq!(big.token_id, "98765432109876543210");
    }

    #[test]
    fn conditions_serialize_under_dialect_key() {
        let params = EncryptParams {
            plaintext: "hello".to_string(),
            conditions: AccessControlConditions::EvmContractConditions(vec![json!({"x": 1})]),
        };
        assert_eq!(
            serde_json::to_value(&params).unwrap(),
            json!({"plaintext": "hello", "evmContractConditions": [{"x": 1}]})
        );
    }

    #[test]
    fn healthcheck_accepts_native_network_key() {
        let probe: HealthcheckResult = serde_json::from_value(json!({
            "bridgeVersion": "0.1.0",
            "litNetworks": ["naga-dev", "naga"],
            "target": "android-aarch64",
        }))
        .unwrap();
        assert_eq!(probe.networks, vec!["naga-dev", "naga"]);
    }

    #[test]
    fn eth_wallet_params_debug_hides_key() {
        let params = EthWalletAuthParams {
            private_key_hex: "0xabad1dea".to_string(),
            nonce: "0xblockhash".to_string(),
        };
        let rendered = format!("{params:?}");
        assert!(!rendered.contains("abad1dea"));
        assert!(rendered.contains("0xblockhash"));
    }

    #[test]
    fn auth_method_debug_hides_token() {
        let method = AuthMethod {
            auth_method_type: 3,
            auth_method_id: "0xid".to_string(),
            access_token: "very-secret".to_string(),
        };
        assert!(!format!("{method:?}").contains("very-secret"));
    }

    #[test]
    fn content_locator_resolves_urls() {
        let filecoin = ContentLocator {
            dataset_owner: "0xowner".to_string(),
            piece_cid: "bafy123".to_string(),
            content_id: "c1".to_string(),
            gateway_url: None,
            network: Some("calibration".to_string()),
        };
        assert_eq!(
            filecoin.source_url(None).unwrap(),
            "https://0xowner.calibration.filbeam.io/bafy123"
        );

        let gateway = ContentLocator {
            dataset_owner: String::new(),
            piece_cid: "load-xyz".to_string(),
            content_id: "c2".to_string(),
            gateway_url: Some("https://gw.example/".to_string()),
            network: None,
        };
        assert_eq!(
            gateway.source_url(None).unwrap(),
            "https://gw.example/resolve/load-xyz"
        );

        let orphan = ContentLocator {
            dataset_owner: " ".to_string(),
            ..filecoin
        };
        assert!(orphan.source_url(None).is_err());
    }
}
