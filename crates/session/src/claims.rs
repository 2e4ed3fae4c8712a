// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Decoding of the expiry claim embedded in JWT-shaped tokens.
//!
//! Signatures are never verified here: the server is the authority on
//! validity, the client only needs `exp` to schedule refreshes.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;

use crate::error::AuthError;

/// Extract the `exp` claim (epoch seconds) from a token.
///
/// - `Ok(Some(exp))`: a three-segment token whose payload carries a numeric `exp`.
/// - `Ok(None)`: expiry is undeterminable (not three segments, or no numeric `exp`).
/// - `Err(MalformedToken)`: three segments, but the payload is not base64 JSON.
pub fn token_expiry(token: &str) -> Result<Option<i64>, AuthError> {
    let segments: Vec<&str> = token.trim().split('.').collect();
    if segments.len() != 3 {
        return Ok(None);
    }

    let payload = decode_segment(segments[1])?;
    let claims: serde_json::Value = serde_json::from_slice(&payload)
        .map_err(|e| AuthError::MalformedToken(format!("payload is not JSON: {e}")))?;
    if !claims.is_object() {
        return Err(AuthError::MalformedToken("payload is not a JSON object".into()));
    }

    Ok(exp_claim(&claims))
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, AuthError> {
    let unpadded = segment.trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(unpadded)
        .or_else(|_| STANDARD.decode(segment))
        .map_err(|e| AuthError::MalformedToken(format!("payload is not base64: {e}")))
}

// Accepts integer or fractional seconds; anything else is treated as absent.
fn exp_claim(claims: &serde_json::Value) -> Option<i64> {
    let exp = claims.get("exp")?;
    if let Some(secs) = exp.as_i64() {
        return Some(secs);
    }
    exp.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64)
}

#[cfg(test)]
#[path = "claims_tests.rs"]
mod tests;
