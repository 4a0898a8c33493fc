//! WhatsApp Business Cloud API channel.
//!
//! Uses the official WhatsApp Business Platform (Cloud API) for outbound
//! messages: free-text bodies or approved templates with positional
//! body parameters.
//! Requires: Access Token + Phone Number ID from Meta Business Suite.

use async_trait::async_trait;
use storewatch_core::config::WhatsAppConfig;
use storewatch_core::error::{Result, StoreWatchError};
use storewatch_core::traits::ChatProvider;
use storewatch_core::types::{ChatMessage, ChatReceipt};

const GRAPH_BASE: &str = "https://graph.facebook.com";

/// WhatsApp Business channel implementation.
pub struct WhatsAppChannel {
    config: WhatsAppConfig,
    client: reqwest::Client,
    base_url: String,
}

impl WhatsAppChannel {
    pub fn new(config: WhatsAppConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(StoreWatchError::Config(
                "WhatsApp access_token not configured".into(),
            ));
        }
        if config.phone_number_id.is_empty() {
            return Err(StoreWatchError::Config(
                "WhatsApp phone_number_id not configured".into(),
            ));
        }
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            base_url: GRAPH_BASE.to_string(),
        })
    }

    /// Route through a proxy or mock Graph endpoint.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self, phone_number_id: &str) -> String {
        format!(
            "{}/{}/{}/messages",
            self.base_url, self.config.api_version, phone_number_id
        )
    }

    /// Graph API request body for a message.
    fn request_body(&self, message: &ChatMessage) -> Result<serde_json::Value> {
        let to = normalize_phone(&message.to);
        if to.is_empty() {
            return Err(StoreWatchError::Validation(format!(
                "invalid WhatsApp destination: '{}'",
                message.to
            )));
        }

        if let Some(body) = &message.body {
            return Ok(serde_json::json!({
                "messaging_product": "whatsapp",
                "recipient_type": "individual",
                "to": to,
                "type": "text",
                "text": {
                    "preview_url": false,
                    "body": body
                }
            }));
        }

        let Some(template) = &message.template_id else {
            return Err(StoreWatchError::Validation(
                "either template_id or body must be provided".into(),
            ));
        };

        let parameters: Vec<serde_json::Value> = ordered_variables(message)
            .into_iter()
            .map(|v| serde_json::json!({"type": "text", "text": v}))
            .collect();

        let mut template_obj = serde_json::json!({
            "name": template,
            "language": {"code": self.config.template_language},
        });
        if !parameters.is_empty() {
            template_obj["components"] = serde_json::json!([
                {"type": "body", "parameters": parameters}
            ]);
        }

        Ok(serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "template",
            "template": template_obj
        }))
    }
}

#[async_trait]
impl ChatProvider for WhatsAppChannel {
    fn name(&self) -> &str {
        "whatsapp"
    }

    fn origin(&self) -> &str {
        &self.config.phone_number_id
    }

    async fn send(&self, message: &ChatMessage) -> Result<ChatReceipt> {
        let body = self.request_body(message)?;
        let sender = message
            .from
            .as_deref()
            .unwrap_or(&self.config.phone_number_id);

        let response = self
            .client
            .post(self.messages_url(sender))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreWatchError::Provider(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(StoreWatchError::Provider(format!(
                "WhatsApp API error {}: {}",
                status, error_text
            )));
        }

        let raw: serde_json::Value = response
            .json()
            .await
            .map_err(|e| StoreWatchError::Provider(format!("Invalid WhatsApp response: {e}")))?;

        let receipt = receipt_from_response(raw)?;
        tracing::debug!("WhatsApp message sent: {} → {}", receipt.id, message.to);
        Ok(receipt)
    }
}

fn receipt_from_response(raw: serde_json::Value) -> Result<ChatReceipt> {
    let id = raw["messages"][0]["id"]
        .as_str()
        .ok_or_else(|| StoreWatchError::Provider("WhatsApp response without message id".into()))?
        .to_string();
    let status = raw["messages"][0]["message_status"]
        .as_str()
        .unwrap_or("accepted")
        .to_string();
    Ok(ChatReceipt { id, status, raw })
}

/// Template variables in positional order. Numeric keys ("1", "2", ..., "10")
/// sort numerically, anything else falls back to key order.
fn ordered_variables(message: &ChatMessage) -> Vec<&str> {
    let mut pairs: Vec<(&String, &String)> = message.variables.iter().collect();
    pairs.sort_by(|(a, _), (b, _)| match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    });
    pairs.into_iter().map(|(_, v)| v.as_str()).collect()
}

/// Strip `whatsapp:` prefixes, spaces, dashes and the leading `+`;
/// the Cloud API wants bare digits with country code.
pub fn normalize_phone(raw: &str) -> String {
    raw.trim()
        .trim_start_matches("whatsapp:")
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn channel() -> WhatsAppChannel {
        WhatsAppChannel::new(WhatsAppConfig {
            enabled: true,
            access_token: "token".into(),
            phone_number_id: "1234567890".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_credentials() {
        let err = WhatsAppChannel::new(WhatsAppConfig::default()).err().unwrap();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("whatsapp:+244 931-054-015"), "244931054015");
        assert_eq!(normalize_phone("+244931054015"), "244931054015");
        assert_eq!(normalize_phone("abc"), "");
    }

    #[test]
    fn test_text_body() {
        let body = channel()
            .request_body(&ChatMessage::text("+244931054015", "Olá"))
            .unwrap();
        assert_eq!(body["type"], "text");
        assert_eq!(body["to"], "244931054015");
        assert_eq!(body["text"]["body"], "Olá");
    }

    #[test]
    fn test_template_parameters_in_numeric_order() {
        let mut vars = BTreeMap::new();
        for i in 1..=10 {
            vars.insert(i.to_string(), format!("v{i}"));
        }
        let body = channel()
            .request_body(&ChatMessage::template("+1555000111", "order_created", vars))
            .unwrap();
        assert_eq!(body["type"], "template");
        assert_eq!(body["template"]["name"], "order_created");
        let params = body["template"]["components"][0]["parameters"]
            .as_array()
            .unwrap();
        assert_eq!(params.len(), 10);
        assert_eq!(params[1]["text"], "v2");
        assert_eq!(params[9]["text"], "v10");
    }

    #[test]
    fn test_empty_message_rejected() {
        let msg = ChatMessage {
            to: "+1555000111".into(),
            ..Default::default()
        };
        let err = channel().request_body(&msg).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_receipt_parsing() {
        let raw = serde_json::json!({
            "messaging_product": "whatsapp",
            "messages": [{"id": "wamid.ABC", "message_status": "accepted"}]
        });
        let receipt = receipt_from_response(raw).unwrap();
        assert_eq!(receipt.id, "wamid.ABC");
        assert_eq!(receipt.status, "accepted");

        assert!(receipt_from_response(serde_json::json!({})).is_err());
    }
}
