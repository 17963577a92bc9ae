//! Conversation items and their typed content parts.
//!
//! ```rust
//! use gmemory::{Content, Item, ItemRole, ItemType};
//!
//! let item = Item::message("msg_1", ItemRole::User, vec![Content::text("hello")]);
//!
//! assert_eq!(item.item_type, ItemType::Message);
//! assert_eq!(item.text(), "hello");
//! assert_eq!(item.sequence_number, 0);
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $wire)] $variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum!(ItemType {
    Message => "message",
    FunctionCall => "function_call",
    FunctionCallOutput => "function_call_output",
    Reasoning => "reasoning",
    FileSearch => "file_search",
    WebSearch => "web_search",
    CodeInterpreter => "code_interpreter",
    ComputerUse => "computer_use",
    CustomToolCall => "custom_tool_call",
    McpItem => "mcp_item",
    ImageGeneration => "image_generation",
});

wire_enum!(ItemRole {
    System => "system",
    User => "user",
    Assistant => "assistant",
    Tool => "tool",
    Developer => "developer",
    Critic => "critic",
    Discriminator => "discriminator",
    Unknown => "unknown",
});

impl ItemRole {
    /// Maps a chat message role, falling back to `Unknown`.
    pub fn from_chat_role(role: &str) -> Self {
        Self::parse(role).unwrap_or(Self::Unknown)
    }
}

wire_enum!(ItemStatus {
    Incomplete => "incomplete",
    InProgress => "in_progress",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
    Searching => "searching",
    Generating => "generating",
    Calling => "calling",
    Streaming => "streaming",
    RateLimited => "rate_limited",
});

wire_enum!(ItemRating {
    Like => "like",
    Unlike => "unlike",
});

wire_enum!(IncompleteReason {
    Interrupted => "interrupted",
    MaxOutputTokens => "max_output_tokens",
    ContentFilter => "content_filter",
});

wire_enum!(ContentType {
    Text => "text",
    InputText => "input_text",
    InputAudio => "input_audio",
    Image => "image",
    Audio => "audio",
    Video => "video",
});

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<IncompleteReason>,
}

/// One typed content part. Only the fields relevant to `content_type` are set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl Content {
    pub fn new(content_type: ContentType) -> Self {
        Self {
            content_type,
            text: None,
            image_url: None,
            image_file: None,
            detail: None,
            audio_url: None,
            audio_file: None,
            format: None,
            video_url: None,
            video_file: None,
            transcript: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::new(ContentType::Text)
        }
    }

    pub fn image_url(url: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            detail,
            ..Self::new(ContentType::Image)
        }
    }

    /// Inline audio; `data` is the base64 payload as sent by the client.
    pub fn input_audio(data: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            audio_file: Some(data.into()),
            format: Some(format.into()),
            ..Self::new(ContentType::InputAudio)
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(
            self.content_type,
            ContentType::Text | ContentType::InputText
        )
    }

    /// Text and transcript, used for search.
    fn searchable_text(&self) -> impl Iterator<Item = &str> {
        self.text.as_deref().into_iter().chain(self.transcript.as_deref())
    }
}

/// A single entry in a conversation branch.
///
/// Items are immutable after they are appended, except for rating fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    #[serde(rename = "id")]
    pub public_id: String,
    #[serde(default)]
    pub conversation_id: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub sequence_number: usize,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ItemRole>,
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ItemStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<ItemRating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating_comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Item {
    pub fn new(public_id: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            public_id: public_id.into(),
            conversation_id: String::new(),
            branch: String::new(),
            sequence_number: 0,
            item_type,
            role: None,
            content: Vec::new(),
            status: None,
            incomplete_at: None,
            incomplete_details: None,
            completed_at: None,
            response_id: None,
            rating: None,
            rated_at: None,
            rating_comment: None,
            created_at: Utc::now(),
        }
    }

    pub fn message(public_id: impl Into<String>, role: ItemRole, content: Vec<Content>) -> Self {
        Self {
            role: Some(role),
            content,
            ..Self::new(public_id, ItemType::Message)
        }
    }

    pub fn with_status(mut self, status: ItemStatus) -> Self {
        if status == ItemStatus::Completed {
            self.completed_at = Some(Utc::now());
        }
        self.status = Some(status);
        self
    }

    pub fn with_role(mut self, role: ItemRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_content(mut self, content: Vec<Content>) -> Self {
        self.content = content;
        self
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Case-insensitive substring match over text and transcripts.
    pub fn matches_query(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.content
            .iter()
            .flat_map(Content::searchable_text)
            .any(|text| text.to_lowercase().contains(&needle))
    }

    pub fn apply_rating(&mut self, rating: ItemRating, comment: Option<String>) {
        self.rating = Some(rating);
        self.rated_at = Some(Utc::now());
        self.rating_comment = comment;
    }

    pub fn clear_rating(&mut self) {
        self.rating = None;
        self.rated_at = None;
        self.rating_comment = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{Content, ContentType, Item, ItemRating, ItemRole, ItemStatus, ItemType};

    #[test]
    fn wire_names_round_trip() {
        assert_eq!(ItemType::FunctionCallOutput.as_str(), "function_call_output");
        assert_eq!(ItemType::parse("mcp_item"), Some(ItemType::McpItem));
        assert_eq!(ItemStatus::RateLimited.to_string(), "rate_limited");
        assert_eq!(ItemRole::from_chat_role("wizard"), ItemRole::Unknown);
        assert_eq!(ItemRole::from_chat_role("developer"), ItemRole::Developer);
    }

    #[test]
    fn content_serializes_only_relevant_fields() {
        let value = serde_json::to_value(Content::image_url("https://img", None))
            .expect("content should serialize");

        assert_eq!(value, serde_json::json!({"type": "image", "image_url": "https://img"}));

        let parsed: Content =
            serde_json::from_value(serde_json::json!({"type": "input_audio", "format": "wav"}))
                .expect("content should parse");
        assert_eq!(parsed.content_type, ContentType::InputAudio);
        assert_eq!(parsed.format.as_deref(), Some("wav"));
    }

    #[test]
    fn completed_status_stamps_completion_time() {
        let item = Item::message("msg_1", ItemRole::Assistant, vec![Content::text("done")])
            .with_status(ItemStatus::Completed);

        assert!(item.completed_at.is_some());
        assert_eq!(item.text(), "done");
    }

    #[test]
    fn query_matching_is_case_insensitive_and_covers_transcripts() {
        let mut audio = Content::new(ContentType::Audio);
        audio.transcript = Some("Weather in PARIS".to_string());
        let item = Item::message("msg_1", ItemRole::User, vec![Content::text("Hello"), audio]);

        assert!(item.matches_query("paris"));
        assert!(item.matches_query("HELLO"));
        assert!(!item.matches_query("london"));
    }

    #[test]
    fn rating_can_be_applied_and_cleared() {
        let mut item = Item::new("msg_1", ItemType::Message);
        item.apply_rating(ItemRating::Like, Some("great".to_string()));
        assert_eq!(item.rating, Some(ItemRating::Like));
        assert!(item.rated_at.is_some());

        item.clear_rating();
        assert_eq!(item.rating, None);
        assert_eq!(item.rating_comment, None);
    }
}
