use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ContentBlock: one piece of content within a message
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    /// Opaque non-text part (image, audio, document) passed through to the
    /// transport untouched. `data` is a URL or base64 payload.
    Attachment {
        media_type: String,
        data: String,
    },
}

impl ContentBlock {
    pub fn text(t: impl Into<String>) -> Self {
        ContentBlock::Text { text: t.into() }
    }

    pub fn attachment(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        ContentBlock::Attachment {
            media_type: media_type.into(),
            data: data.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

// ---------------------------------------------------------------------------
// Message: a single turn in a request
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Creates a text-only message for a typed role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::text(content)],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Creates a message with arbitrary content blocks.
    pub fn with_content(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Returns a string representation of the message's content.
    ///
    /// Attachments render as a `<media_type attachment>` placeholder.
    pub fn content(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::Attachment { media_type, .. } => {
                    format!("<{media_type} attachment>")
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns only the text content, ignoring attachments.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn has_attachments(&self) -> bool {
        self.content
            .iter()
            .any(|b| matches!(b, ContentBlock::Attachment { .. }))
    }
}

// ---------------------------------------------------------------------------
// Chat: ordered sequence of messages handed to the transport
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chat {
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(Message::new(role, content));
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_all(&mut self, chat: &Chat) {
        self.messages.extend(chat.messages.clone());
    }

    pub fn pop(&mut self) -> Option<Message> {
        self.messages.pop()
    }

    pub fn from_json(json_dump: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json_dump)
    }

    pub fn to_json(&self) -> Value {
        Value::Array(
            self.messages
                .iter()
                .map(|message| {
                    serde_json::to_value(message).unwrap_or(Value::Null)
                })
                .collect(),
        )
    }

    /// Text of the first system message, or empty.
    pub fn system_prompt(&self) -> String {
        self.messages
            .iter()
            .find(|message| message.role == Role::System)
            .map(Message::text_content)
            .unwrap_or_default()
    }

    /// Text of the last user message, or empty.
    pub fn last_user_text(&self) -> String {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(Message::text_content)
            .unwrap_or_default()
    }
}
