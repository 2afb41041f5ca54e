//! Normalisation of network-produced ECDSA signatures.
//!
//! Threshold nodes return signature shares combined into an object such as
//! `{"r": "..", "s": "..", "recid": 1}` or `{"signature": "0x.."}`, where
//! the hex strings are sometimes JSON-encoded twice. Callers want a single
//! 65-byte `0x{r}{s}{v}` string.

use serde_json::Value;

use crate::auth::normalize::strip_hex_prefix;

/// Peel up to two layers of JSON string encoding off a hex-ish value.
fn unwrap_json_string(raw: &str) -> String {
    let mut value = raw.trim().to_string();
    for _ in 0..2 {
        match serde_json::from_str::<String>(&value) {
            Ok(decoded) => value = decoded,
            Err(_) => break,
        }
    }
    value.trim().trim_matches('"').to_string()
}

fn hex_digits(raw: &str) -> Result<String, String> {
    let unwrapped = unwrap_json_string(raw);
    let digits = strip_hex_prefix(unwrapped.as_str()).trim();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("invalid hex string: {raw}"));
    }
    Ok(digits.to_string())
}

fn recovery_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert a combined signature value into `0x` + 130 hex chars.
///
/// A flat string is accepted too, as long as it already decodes to 65 bytes.
pub fn normalize_signature(combined: &Value) -> Result<String, String> {
    if let Value::String(flat) = combined {
        let digits = hex_digits(flat)?;
        if digits.len() != 130 {
            return Err(format!(
                "invalid 65-byte signature length (expected 130 hex chars, got {})",
                digits.len()
            ));
        }
        return Ok(format!("0x{}", digits.to_lowercase()));
    }

    let object = combined
        .as_object()
        .ok_or_else(|| "signature must be a string or an object".to_string())?;

    let mut r = object.get("r").and_then(Value::as_str).map(hex_digits).transpose()?;
    let mut s = object.get("s").and_then(Value::as_str).map(hex_digits).transpose()?;
    let recid = object
        .get("recid")
        .or_else(|| object.get("recoveryId"))
        .or_else(|| object.get("v"))
        .and_then(recovery_id);

    if (r.is_none() || s.is_none())
        && let Some(sig) = object.get("signature").and_then(Value::as_str)
    {
        let digits = hex_digits(sig)?;
        if digits.len() >= 128 {
            r = Some(digits[0..64].to_string());
            s = Some(digits[64..128].to_string());
        }
    }

    let r = r.ok_or_else(|| "missing signature r".to_string())?;
    let s = s.ok_or_else(|| "missing signature s".to_string())?;
    if r.len() > 64 {
        return Err("invalid signature r length".to_string());
    }
    if s.len() > 64 {
        return Err("invalid signature s length".to_string());
    }

    let recid = recid.unwrap_or(0);
    let v = if recid >= 27 { recid } else { recid + 27 };
    if !(27..=255).contains(&v) {
        return Err(format!("invalid recovery id {recid}"));
    }

    Ok(format!("0x{r:0>64}{s:0>64}{v:02x}").to_lowercase())
}
