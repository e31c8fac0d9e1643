use serde::{Deserialize, Serialize};

/// Who authored a message in the conversation tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageSource {
    User,
    Ai,
    System,
}

impl MessageSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageSource::User => "user",
            MessageSource::Ai => "ai",
            MessageSource::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == MessageSource::User
    }

    pub fn is_ai(self) -> bool {
        self == MessageSource::Ai
    }
}

impl AsRef<str> for MessageSource {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<&str> for MessageSource {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl TryFrom<&str> for MessageSource {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(MessageSource::User),
            // Some backends label model output "assistant".
            "ai" | "assistant" => Ok(MessageSource::Ai),
            "system" => Ok(MessageSource::System),
            _ => Err(format!("invalid message source: {value}")),
        }
    }
}

impl TryFrom<String> for MessageSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<MessageSource> for String {
    fn from(value: MessageSource) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// Cost accounting attached to a model reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostInfo {
    #[serde(default)]
    pub input_cost_per_million: f64,
    #[serde(default)]
    pub output_cost_per_million: f64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub token_usage: Option<TokenUsage>,
    #[serde(default)]
    pub model_guid: Option<String>,
}

/// File attached to a message. `content` carries the base64 payload as sent
/// over the wire; the decoded bytes live in the attachment registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub mime_type: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub source: MessageSource,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub cost_info: Option<CostInfo>,
    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

impl Message {
    pub fn new(id: impl Into<String>, source: MessageSource, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source,
            parent_id: None,
            timestamp: now_millis(),
            cost_info: None,
            attachments: None,
        }
    }

    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageSource::User, content)
    }

    pub fn ai(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageSource::Ai, content)
    }

    pub fn system(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(id, MessageSource::System, content)
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_is_accepted_as_ai_alias() {
        assert_eq!(MessageSource::try_from("assistant"), Ok(MessageSource::Ai));
        assert_eq!(MessageSource::Ai.as_str(), "ai");
    }

    #[test]
    fn invalid_source_strings_are_rejected() {
        assert!(MessageSource::try_from("tool").is_err());
    }

    #[test]
    fn message_deserializes_camel_case_wire_names() {
        let json = r#"{
            "id": "m2",
            "content": "hi",
            "source": "assistant",
            "parentId": "m1",
            "timestamp": 42,
            "costInfo": {"totalCost": 0.5}
        }"#;
        let message: Message = serde_json::from_str(json).expect("valid message");
        assert_eq!(message.parent_id.as_deref(), Some("m1"));
        assert_eq!(message.source, MessageSource::Ai);
        assert_eq!(message.cost_info.as_ref().map(|c| c.total_cost), Some(0.5));
        assert!(!message.is_root());
    }
}
