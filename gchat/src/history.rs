//! Conversions between stored conversation items and chat messages.

use gcommon::{DEFAULT_ID_BYTES, ITEM_ID_PREFIX, IdGenerator};
use gmemory::{Content, ContentType, Item, ItemRole, ItemStatus, ItemType};
use serde_json::Value;

use crate::types::{ChatMessage, ContentPart, ImageUrl, InputAudio, MessageContent};

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

const TITLE_MAX_CHARS: usize = 60;
const TITLE_MIN_BREAK: usize = 30;
const TITLE_ELLIPSIS: char = '…';

/// Title from the first non-blank user message.
pub fn synthesize_title(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|message| message.role == "user")
        .filter_map(ChatMessage::text_content)
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
        .map(|text| truncate_title(&text))
        .unwrap_or_else(|| DEFAULT_CONVERSATION_TITLE.to_string())
}

fn truncate_title(text: &str) -> String {
    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }

    let prefix = text.chars().take(TITLE_MAX_CHARS).collect::<String>();
    let cut = match prefix.rfind(' ') {
        Some(index) if prefix[..index].chars().count() > TITLE_MIN_BREAK => &prefix[..index],
        _ => prefix.as_str(),
    };
    format!("{}{TITLE_ELLIPSIS}", cut.trim_end())
}

/// Replays active-branch items as chat messages. Item types with no chat
/// equivalent are skipped.
pub fn history_messages(items: &[Item]) -> Vec<ChatMessage> {
    items.iter().filter_map(item_to_message).collect()
}

fn item_to_message(item: &Item) -> Option<ChatMessage> {
    match item.item_type {
        ItemType::Message => {
            let role = item.role.unwrap_or(ItemRole::User);
            Some(ChatMessage::new(role.as_str(), content_from_parts(&item.content)))
        }
        ItemType::FunctionCallOutput => Some(ChatMessage::new(
            ItemRole::Tool.as_str(),
            MessageContent::Text(item.text()),
        )),
        _ => None,
    }
}

fn content_from_parts(parts: &[Content]) -> MessageContent {
    if parts.iter().all(Content::is_text) {
        let text = parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        return MessageContent::Text(text);
    }

    MessageContent::Parts(parts.iter().filter_map(content_part).collect())
}

fn content_part(part: &Content) -> Option<ContentPart> {
    match part.content_type {
        ContentType::Text | ContentType::InputText => Some(ContentPart::Text {
            text: part.text.clone().unwrap_or_default(),
        }),
        ContentType::Image => part.image_url.as_ref().map(|url| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.clone(),
                detail: part.detail.clone(),
            },
        }),
        ContentType::InputAudio => part.audio_file.as_ref().map(|data| ContentPart::InputAudio {
            input_audio: InputAudio {
                data: data.clone(),
                format: part.format.clone().unwrap_or_default(),
            },
        }),
        ContentType::Audio | ContentType::Video => None,
    }
}

fn parts_from_content(content: Option<&MessageContent>) -> Vec<Content> {
    match content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![Content::text(text.clone())],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => Content::text(text.clone()),
                ContentPart::ImageUrl { image_url } => {
                    Content::image_url(image_url.url.clone(), image_url.detail.clone())
                }
                ContentPart::InputAudio { input_audio } => {
                    Content::input_audio(input_audio.data.clone(), input_audio.format.clone())
                }
            })
            .collect(),
    }
}

fn new_item_id(ids: &dyn IdGenerator) -> String {
    ids.generate(ITEM_ID_PREFIX, DEFAULT_ID_BYTES)
}

/// One completed `message` item per client message.
pub fn request_items(messages: &[ChatMessage], ids: &dyn IdGenerator) -> Vec<Item> {
    messages
        .iter()
        .map(|message| {
            Item::message(
                new_item_id(ids),
                ItemRole::from_chat_role(&message.role),
                parts_from_content(message.content.as_ref()),
            )
            .with_status(ItemStatus::Completed)
        })
        .collect()
}

/// Assistant output folded out of a provider response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantTurn {
    pub response_id: Option<String>,
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<Value>,
}

impl AssistantTurn {
    /// Reads `choices[0].message` of a chat completion body.
    pub fn from_completion(body: &Value) -> Option<Self> {
        let message = body.pointer("/choices/0/message")?;
        Some(Self {
            response_id: body.get("id").and_then(Value::as_str).map(str::to_string),
            content: message
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string),
            reasoning: message
                .get("reasoning_content")
                .and_then(Value::as_str)
                .map(str::to_string),
            tool_calls: message
                .get("tool_calls")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
        })
    }

    /// Items in the order they are appended: reasoning, reply, tool calls.
    pub fn into_items(self, store_reasoning: bool, ids: &dyn IdGenerator) -> Vec<Item> {
        let response_id = self.response_id;
        let tag = |mut item: Item| {
            item.response_id = response_id.clone();
            item
        };
        let mut items = Vec::new();

        if store_reasoning
            && let Some(reasoning) = self.reasoning.filter(|text| !text.is_empty())
        {
            items.push(tag(Item::new(new_item_id(ids), ItemType::Reasoning)
                .with_role(ItemRole::Assistant)
                .with_content(vec![Content::text(reasoning)])
                .with_status(ItemStatus::Completed)));
        }

        let reply = self
            .content
            .filter(|text| !text.is_empty())
            .map(|text| vec![Content::text(text)])
            .unwrap_or_default();
        items.push(tag(Item::message(new_item_id(ids), ItemRole::Assistant, reply)
            .with_status(ItemStatus::Completed)));

        for call in self.tool_calls {
            items.push(tag(Item::new(new_item_id(ids), ItemType::FunctionCall)
                .with_role(ItemRole::Assistant)
                .with_content(vec![Content::text(call.to_string())])
                .with_status(ItemStatus::Completed)));
        }

        items
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use gcommon::IdGenerator;
    use gmemory::{Content, Item, ItemRole, ItemStatus, ItemType};
    use serde_json::json;

    use super::{AssistantTurn, history_messages, request_items, synthesize_title};
    use crate::types::{ChatMessage, ContentPart, MessageContent};

    #[derive(Default)]
    struct CountingIds(AtomicUsize);

    impl IdGenerator for CountingIds {
        fn generate(&self, prefix: &str, _byte_len: usize) -> String {
            format!("{prefix}_{}", self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[test]
    fn short_titles_are_kept_verbatim() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("   "),
            ChatMessage::user("  Plan a trip to Lisbon  "),
        ];
        assert_eq!(synthesize_title(&messages), "Plan a trip to Lisbon");
    }

    #[test]
    fn long_titles_break_on_a_late_space() {
        let text = "Explain the difference between optimistic and pessimistic locking in databases";
        let title = synthesize_title(&[ChatMessage::user(text)]);

        assert_eq!(
            title,
            "Explain the difference between optimistic and pessimistic…"
        );
        assert!(title.chars().count() <= 63);
    }

    #[test]
    fn long_titles_without_a_late_space_are_cut_hard() {
        let text = format!("short {}", "x".repeat(80));
        let title = synthesize_title(&[ChatMessage::user(text)]);

        assert_eq!(title.chars().count(), 61);
        assert!(title.ends_with('…'));
    }

    #[test]
    fn missing_user_message_uses_default_title() {
        assert_eq!(
            synthesize_title(&[ChatMessage::assistant("hello")]),
            "New Conversation"
        );
    }

    #[test]
    fn history_keeps_roles_and_collapses_text() {
        let items = vec![
            Item::message("msg_1", ItemRole::User, vec![Content::text("hi")]),
            Item::message(
                "msg_2",
                ItemRole::Assistant,
                vec![Content::text("hello "), Content::text("there")],
            ),
            Item::new("msg_3", ItemType::Reasoning).with_content(vec![Content::text("hmm")]),
            Item::new("msg_4", ItemType::FunctionCallOutput)
                .with_content(vec![Content::text("{\"ok\":true}")]),
        ];

        let messages = history_messages(&items);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(
            messages[1].content,
            Some(MessageContent::Text("hello there".to_string()))
        );
        assert_eq!(messages[2].role, "tool");
        assert_eq!(messages[2].text_content().as_deref(), Some("{\"ok\":true}"));
    }

    #[test]
    fn history_uses_part_arrays_for_mixed_content() {
        let items = vec![Item::message(
            "msg_1",
            ItemRole::User,
            vec![
                Content::text("describe"),
                Content::image_url("https://img/cat.png", Some("low".to_string())),
            ],
        )];

        let messages = history_messages(&items);
        let Some(MessageContent::Parts(parts)) = &messages[0].content else {
            panic!("expected part array");
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(&parts[1], ContentPart::ImageUrl { image_url } if image_url.url == "https://img/cat.png"));
    }

    #[test]
    fn request_messages_become_completed_message_items() {
        let ids = CountingIds::default();
        let items = request_items(&[ChatMessage::user("hi")], &ids);

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].public_id, "msg_0");
        assert_eq!(items[0].role, Some(ItemRole::User));
        assert_eq!(items[0].status, Some(ItemStatus::Completed));
        assert_eq!(items[0].text(), "hi");
    }

    #[test]
    fn assistant_turn_orders_reasoning_reply_and_tool_calls() {
        let body = json!({
            "id": "chatcmpl-1",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "calling a tool",
                    "reasoning_content": "need weather",
                    "tool_calls": [{"id": "call_1", "type": "function"}]
                }
            }]
        });
        let turn = AssistantTurn::from_completion(&body).expect("first choice");

        let ids = CountingIds::default();
        let without_reasoning = turn.clone().into_items(false, &ids);
        assert_eq!(without_reasoning.len(), 2);
        assert_eq!(without_reasoning[0].text(), "calling a tool");
        assert_eq!(without_reasoning[1].item_type, ItemType::FunctionCall);

        let with_reasoning = turn.into_items(true, &ids);
        assert_eq!(with_reasoning.len(), 3);
        assert_eq!(with_reasoning[0].item_type, ItemType::Reasoning);
        assert!(
            with_reasoning
                .iter()
                .all(|item| item.response_id.as_deref() == Some("chatcmpl-1"))
        );
    }

    #[test]
    fn body_without_choices_has_no_turn() {
        assert_eq!(AssistantTurn::from_completion(&json!({"error": "x"})), None);
    }
}
