use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnContent {
    UserText {
        text: String,
    },
    UserTextWithImage {
        text: String,
        image_path: String,
    },
    AssistantText {
        text: String,
    },
}

/// One entry of a conversation history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ConversationTurn {
    pub content: TurnContent,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::now(TurnContent::UserText { text: text.into() })
    }

    pub fn user_text_with_image(text: impl Into<String>, image_path: impl Into<String>) -> Self {
        Self::now(TurnContent::UserTextWithImage {
            text: text.into(),
            image_path: image_path.into(),
        })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::now(TurnContent::AssistantText { text: text.into() })
    }

    fn now(content: TurnContent) -> Self {
        Self {
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        match self.content {
            TurnContent::UserText { .. } | TurnContent::UserTextWithImage { .. } => Role::User,
            TurnContent::AssistantText { .. } => Role::Assistant,
        }
    }

    pub fn text(&self) -> &str {
        match &self.content {
            TurnContent::UserText { text }
            | TurnContent::UserTextWithImage { text, .. }
            | TurnContent::AssistantText { text } => text,
        }
    }

    pub fn image_path(&self) -> Option<&str> {
        match &self.content {
            TurnContent::UserTextWithImage { image_path, .. } => Some(image_path),
            _ => None,
        }
    }
}

/// A message handed to a chat provider: history turns plus injected system text.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            text: text.into(),
            image_path: None,
        }
    }
}

impl From<&ConversationTurn> for Message {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role(),
            text: turn.text().to_string(),
            image_path: turn.image_path().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_multimodal_conversation() {
        let conversation = vec![
            ConversationTurn::user_text("Show me flowers"),
            ConversationTurn::assistant_text("Here are two images with flowers."),
            ConversationTurn::user_text_with_image("Anything like this?", "uploads/girl.jpg"),
        ];

        let json = serde_json::to_string(&conversation).expect("serialize");
        let deserialized: Vec<ConversationTurn> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(conversation, deserialized);
    }

    #[test]
    fn turn_content_is_tagged() {
        let turn = ConversationTurn::user_text_with_image("hi", "a.jpg");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["content"]["type"], "user_text_with_image");
        assert_eq!(value["content"]["image_path"], "a.jpg");
    }

    #[test]
    fn message_from_turn_keeps_role_and_image() {
        let msg = Message::from(&ConversationTurn::user_text_with_image("what is this", "x.png"));
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.text, "what is this");
        assert_eq!(msg.image_path.as_deref(), Some("x.png"));

        let msg = Message::from(&ConversationTurn::assistant_text("a cat"));
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.image_path.is_none());
    }
}
