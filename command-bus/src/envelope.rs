use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use common::error::AppError;
use serde_json::{Map, Value};
use uuid::Uuid;

/// One work item on the server queue: `"<command_id> <reply_key> <base64 json>"`.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub command_id: String,
    pub reply_key: String,
    pub payload: Value,
}

impl RpcEnvelope {
    /// Creates an envelope with a freshly minted reply key.
    pub fn new(command_id: impl Into<String>, payload: Value) -> Self {
        Self {
            command_id: command_id.into(),
            reply_key: new_reply_key(),
            payload,
        }
    }

    /// Copy of this envelope under a newly minted reply key.
    #[must_use]
    pub fn with_fresh_reply_key(&self) -> Self {
        Self {
            reply_key: new_reply_key(),
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, AppError> {
        if self.command_id.is_empty() || self.command_id.contains(char::is_whitespace) {
            return Err(AppError::Validation(format!(
                "invalid command id '{}'",
                self.command_id
            )));
        }
        let body = serde_json::to_vec(&self.payload)?;
        Ok(format!(
            "{} {} {}",
            self.command_id,
            self.reply_key,
            STANDARD.encode(body)
        )
        .into_bytes())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, AppError> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| AppError::Validation(format!("work item is not UTF-8: {e}")))?;
        let mut parts = line.trim().splitn(3, ' ');
        let command_id = parts.next().filter(|s| !s.is_empty());
        let reply_key = parts.next().filter(|s| !s.is_empty());
        let (Some(command_id), Some(reply_key)) = (command_id, reply_key) else {
            return Err(AppError::Validation(format!(
                "malformed work item: '{line:.120}'"
            )));
        };

        let payload = match parts.next().map(str::trim).filter(|s| !s.is_empty()) {
            Some(encoded) => {
                let body = STANDARD.decode(encoded).map_err(|e| {
                    AppError::Validation(format!("work item payload is not base64: {e}"))
                })?;
                serde_json::from_slice(&body)?
            }
            None => Value::Object(Map::new()),
        };

        Ok(Self {
            command_id: command_id.to_string(),
            reply_key: reply_key.to_string(),
            payload,
        })
    }
}

/// Reply keys look like `cl-<random>-<unix seconds>`.
pub fn new_reply_key() -> String {
    format!("cl-{}-{}", Uuid::new_v4().simple(), Utc::now().timestamp())
}

pub fn command_id(mode: &str, cmd: &str) -> String {
    format!("{mode}_{cmd}")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn encodes_the_line_format() {
        let envelope = RpcEnvelope {
            command_id: "rag_load".into(),
            reply_key: "cl-abc-1".into(),
            payload: json!({"rag_name": "kb1"}),
        };
        let line = String::from_utf8(envelope.encode().unwrap()).unwrap();
        let expected_payload = STANDARD.encode(br#"{"rag_name":"kb1"}"#);
        assert_eq!(line, format!("rag_load cl-abc-1 {expected_payload}"));

        assert_eq!(RpcEnvelope::decode(line.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn missing_payload_decodes_as_empty_object() {
        let envelope = RpcEnvelope::decode(b"embed_start cl-x-2").unwrap();
        assert_eq!(envelope.payload, json!({}));
    }

    #[test]
    fn rejects_items_without_reply_key() {
        assert!(RpcEnvelope::decode(b"rag_load").is_err());
        assert!(RpcEnvelope::decode(b"").is_err());
        assert!(RpcEnvelope::decode(b"rag_load cl-x-1 !!notbase64").is_err());
    }

    #[test]
    fn reply_keys_are_unique_and_prefixed() {
        let first = new_reply_key();
        let second = new_reply_key();
        assert!(first.starts_with("cl-"));
        assert_ne!(first, second);

        let envelope = RpcEnvelope::new("rag_load", json!({"rag_name": "kb1"}));
        let renewed = envelope.with_fresh_reply_key();
        assert_ne!(renewed.reply_key, envelope.reply_key);
        assert_eq!(renewed.payload, envelope.payload);
    }

    #[test]
    fn command_ids_join_mode_and_cmd() {
        assert_eq!(command_id("embed", "embedding"), "embed_embedding");
    }
}
