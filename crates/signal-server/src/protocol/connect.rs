//! Participant identity carried by the upgrade request.
//!
//! `GET /?params=<base64(JSON)>` where the JSON is
//! `{"sessionId": "...", "tokenId": "...", "metadata": {"k": "v"}}`.
//! URL-safe base64 is canonical; padding is optional and the standard
//! alphabet is accepted as well.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub session_id: String,
    pub token_id: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum ConnectParamsError {
    #[error("missing params query parameter")]
    Missing,

    #[error("params is not valid base64")]
    Base64,

    #[error("params is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field}: {reason}")]
    InvalidId {
        field: &'static str,
        reason: &'static str,
    },
}

impl ConnectParams {
    /// Decode the raw `params` query value.
    pub fn decode(raw: &str) -> Result<Self, ConnectParamsError> {
        // Form decoding turns '+' of the standard alphabet into a space
        let raw = raw.trim().replace(' ', "+");
        if raw.is_empty() {
            return Err(ConnectParamsError::Missing);
        }

        let bytes = [&URL_SAFE, &URL_SAFE_NO_PAD, &STANDARD, &STANDARD_NO_PAD]
            .iter()
            .find_map(|engine| engine.decode(raw.as_bytes()).ok())
            .ok_or(ConnectParamsError::Base64)?;

        let params: ConnectParams = serde_json::from_slice(&bytes)?;
        validate_id("sessionId", &params.session_id)?;
        validate_id("tokenId", &params.token_id)?;
        if params.token_id == "@" {
            return Err(ConnectParamsError::InvalidId {
                field: "tokenId",
                reason: "reserved value",
            });
        }
        Ok(params)
    }

    /// Encode as URL-safe base64 without padding.
    pub fn encode(&self) -> Result<String, ConnectParamsError> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }
}

/// Ids become bus subject tokens, so they must not contain separators or
/// wildcards.
fn validate_id(field: &'static str, id: &str) -> Result<(), ConnectParamsError> {
    if id.is_empty() {
        return Err(ConnectParamsError::InvalidId {
            field,
            reason: "must not be empty",
        });
    }
    if id
        .chars()
        .any(|c| c == '.' || c == '*' || c == '>' || c.is_whitespace())
    {
        return Err(ConnectParamsError::InvalidId {
            field,
            reason: "contains a reserved character",
        });
    }
    Ok(())
}
