//! Inbound payload decoding

use serde::{Deserialize, Serialize};

/// The kinds of payload an inbound message can carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    Conversation(String),
    ExtendedText { text: String },
    Media { kind: String },
    Empty,
}

impl MessagePayload {
    /// Text of the payload, or empty for media and empty payloads
    pub fn text(&self) -> &str {
        match self {
            Self::Conversation(text) => text,
            Self::ExtendedText { text } => text,
            Self::Media { .. } | Self::Empty => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default)]
    pub text: String,
}

/// Payload as the network delivers it: every field optional, usually one set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub conversation: Option<String>,
    #[serde(default)]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default)]
    pub image_message: Option<serde_json::Value>,
    #[serde(default)]
    pub video_message: Option<serde_json::Value>,
    #[serde(default)]
    pub audio_message: Option<serde_json::Value>,
    #[serde(default)]
    pub document_message: Option<serde_json::Value>,
    #[serde(default)]
    pub sticker_message: Option<serde_json::Value>,
}

impl RawMessage {
    /// First populated field wins; blank text fields count as unpopulated
    pub fn into_payload(self) -> MessagePayload {
        if let Some(text) = self.conversation.filter(|t| !t.is_empty()) {
            return MessagePayload::Conversation(text);
        }

        if let Some(extended) = self.extended_text_message.filter(|e| !e.text.is_empty()) {
            return MessagePayload::ExtendedText { text: extended.text };
        }

        let media = [
            ("image", self.image_message.is_some()),
            ("video", self.video_message.is_some()),
            ("audio", self.audio_message.is_some()),
            ("document", self.document_message.is_some()),
            ("sticker", self.sticker_message.is_some()),
        ];

        match media.iter().find(|(_, present)| *present) {
            Some((kind, _)) => MessagePayload::Media {
                kind: kind.to_string(),
            },
            None => MessagePayload::Empty,
        }
    }
}
