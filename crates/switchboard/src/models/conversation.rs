use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::Message;

const DISPLAY_NAME_LEN: usize = 50;

/// A persisted chat history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub display_name: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

impl Conversation {
    /// Start an empty conversation named after its first user message
    pub fn new(id: Option<String>, owner_id: Option<String>, first_message: &str) -> Self {
        let now = Utc::now();
        Conversation {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            display_name: display_name_for(first_message),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            provider_name: None,
            model_name: None,
            owner_id,
        }
    }
}

fn display_name_for(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= DISPLAY_NAME_LEN {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(DISPLAY_NAME_LEN).collect();
    format!("{}...", head.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_truncates() {
        let long = "a".repeat(80);
        let conversation = Conversation::new(None, None, &long);
        assert_eq!(conversation.display_name.len(), DISPLAY_NAME_LEN + 3);
        assert!(conversation.display_name.ends_with("..."));
    }

    #[test]
    fn test_new_conversation_keeps_given_id() {
        let conversation = Conversation::new(Some("c-1".into()), Some("alice".into()), " hi ");
        assert_eq!(conversation.id, "c-1");
        assert_eq!(conversation.display_name, "hi");
        assert_eq!(conversation.owner_id.as_deref(), Some("alice"));
        assert!(conversation.messages.is_empty());
    }

    #[test]
    fn test_serializes_camel_case() {
        let conversation = Conversation::new(None, None, "hi");
        let value = serde_json::to_value(&conversation).unwrap();
        assert!(value.get("displayName").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("ownerId").is_none());
    }
}
