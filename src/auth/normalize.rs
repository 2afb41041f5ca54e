//! Pre-dispatch payload normalisation shared by every transport.
//!
//! Steps, in order:
//! 1. precondition checks that must fail before anything is sent
//! 2. strip `0x`/`0X` from hex public-key fields, at any depth
//! 3. integer normalisation from the codec
//! 4. pagination defaults for key-pair lookups
//! 5. auth policy defaults for `createAuthContext`

use chrono::{Duration as ChronoDuration, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::auth::operation::Operation;
use crate::bridge::codec::normalize_numbers;
use crate::error::BridgeError;

pub const DEFAULT_PAGE_LIMIT: u64 = 5;
pub const DEFAULT_PAGE_OFFSET: u64 = 0;
pub const DEFAULT_AUTH_STATEMENT: &str = "Execute Lit Actions and sign messages";
pub const PKP_SIGNING_ABILITY: &str = "pkp-signing";

/// Nodes cap session expiry at about 30 days; stay well inside it.
const DEFAULT_AUTH_TTL_DAYS: i64 = 7;

pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Field names that carry a hex-encoded public key.
pub fn is_public_key_field(key: &str) -> bool {
    key == "publicKey" || key == "pubkey" || key.ends_with("PublicKey")
}

/// Strip the hex prefix from every public-key field in `value`, recursively.
pub fn strip_public_key_prefixes(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if is_public_key_field(key)
                    && let Value::String(text) = field
                {
                    let stripped = strip_hex_prefix(text).to_string();
                    *text = stripped;
                } else {
                    strip_public_key_prefixes(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_public_key_prefixes),
        _ => {}
    }
}

fn non_empty_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn check_preconditions(operation: Operation, payload: Option<&Value>) -> Result<(), BridgeError> {
    let object = payload.and_then(Value::as_object);
    match operation {
        Operation::CreateAuthContext => {
            let has_token = object
                .and_then(|map| non_empty_str(map, "accessToken"))
                .is_some();
            if !has_token {
                return Err(BridgeError::Precondition(
                    "createAuthContext requires a non-empty accessToken".to_string(),
                ));
            }
            let has_domain = object
                .and_then(|map| map.get("authConfig"))
                .and_then(Value::as_object)
                .and_then(|policy| non_empty_str(policy, "domain"))
                .is_some();
            if !has_domain {
                return Err(BridgeError::Precondition(
                    "authConfig.domain cannot be empty".to_string(),
                ));
            }
        }
        Operation::ExecuteJs => {
            let has_source = object
                .map(|map| non_empty_str(map, "code").is_some() || non_empty_str(map, "ipfsId").is_some())
                .unwrap_or(false);
            if !has_source {
                return Err(BridgeError::Precondition(
                    "executeJs requires code or ipfsId".to_string(),
                ));
            }
        }
        Operation::CreateEthWalletAuthData => {
            for field in ["privateKeyHex", "nonce"] {
                if object.and_then(|map| non_empty_str(map, field)).is_none() {
                    return Err(BridgeError::Precondition(format!(
                        "createEthWalletAuthData requires a non-empty {field}"
                    )));
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn apply_pagination_defaults(map: &mut Map<String, Value>) {
    map.entry("limit")
        .or_insert_with(|| Value::from(DEFAULT_PAGE_LIMIT));
    map.entry("offset")
        .or_insert_with(|| Value::from(DEFAULT_PAGE_OFFSET));
}

fn apply_auth_policy_defaults(map: &mut Map<String, Value>) {
    let Some(Value::Object(policy)) = map.get_mut("authConfig") else {
        return;
    };

    if non_empty_str(policy, "expiration").is_none() {
        let expiration = (Utc::now() + ChronoDuration::days(DEFAULT_AUTH_TTL_DAYS))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        policy.insert("expiration".to_string(), Value::String(expiration));
    }
    if non_empty_str(policy, "statement").is_none() {
        policy.insert(
            "statement".to_string(),
            Value::String(DEFAULT_AUTH_STATEMENT.to_string()),
        );
    }

    let resources = policy
        .entry("resources")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !resources.is_array() {
        *resources = Value::Array(Vec::new());
    }
    if let Value::Array(entries) = resources {
        let has_signing = entries.iter().any(|entry| {
            entry
                .as_array()
                .and_then(|pair| pair.first())
                .and_then(Value::as_str)
                .is_some_and(|ability| ability.trim() == PKP_SIGNING_ABILITY)
        });
        if !has_signing {
            entries.push(Value::Array(vec![
                Value::String(PKP_SIGNING_ABILITY.to_string()),
                Value::String("*".to_string()),
            ]));
        }
    }
}

/// Normalise a payload for dispatch. Both transports call this before any
/// message leaves the host.
pub fn prepare_payload(
    operation: Operation,
    payload: Option<Value>,
) -> Result<Option<Value>, BridgeError> {
    check_preconditions(operation, payload.as_ref())?;

    let payload = match (operation, payload) {
        (Operation::ViewPkpsByAuthData, None) => Some(Value::Object(Map::new())),
        (_, payload) => payload,
    };

    Ok(payload.map(|mut value| {
        strip_public_key_prefixes(&mut value);
        let mut value = normalize_numbers(value);
        if let Value::Object(map) = &mut value {
            match operation {
                Operation::ViewPkpsByAuthData => apply_pagination_defaults(map),
                Operation::CreateAuthContext => apply_auth_policy_defaults(map),
                _ => {}
            }
        }
        value
    }))
}
