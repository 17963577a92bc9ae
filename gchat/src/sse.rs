//! Server-sent event handling for relayed completion streams.

use bytes::Bytes;
use chrono::Utc;
use serde_json::{Value, json};

use crate::history::AssistantTurn;
use crate::types::ConversationSummary;

const DONE_MARKER: &str = "[DONE]";

/// Byte offset of the line carrying the terminal `[DONE]` marker.
pub(crate) fn find_done_marker(chunk: &[u8]) -> Option<usize> {
    let mut offset = 0;
    for line in chunk.split_inclusive(|byte| *byte == b'\n') {
        if is_done_line(line) {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn is_done_line(line: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(line) else {
        return false;
    };
    let text = text.trim();
    let payload = text
        .strip_prefix("data:")
        .map(str::trim_start)
        .unwrap_or(text);
    payload == DONE_MARKER
}

/// The extra chunk announcing the attached conversation.
pub(crate) fn conversation_chunk(conversation: &ConversationSummary, model: &str) -> Bytes {
    let payload = json!({
        "conversation": conversation,
        "created": Utc::now().timestamp(),
        "id": "",
        "model": model,
        "object": "chat.completion.chunk",
    });
    Bytes::from(format!("data: {payload}\n\n"))
}

/// Assistant output accumulated from `delta` events as they are relayed.
#[derive(Debug, Default)]
pub(crate) struct StreamTranscript {
    partial: Vec<u8>,
    response_id: Option<String>,
    content: String,
    reasoning: String,
}

impl StreamTranscript {
    pub(crate) fn observe(&mut self, chunk: &[u8]) {
        self.partial.extend_from_slice(chunk);
        while let Some(end) = self.partial.iter().position(|byte| *byte == b'\n') {
            let line = self.partial.drain(..=end).collect::<Vec<_>>();
            self.observe_line(&line);
        }
    }

    pub(crate) fn finish(mut self) -> AssistantTurn {
        let rest = std::mem::take(&mut self.partial);
        self.observe_line(&rest);

        AssistantTurn {
            response_id: self.response_id,
            content: Some(self.content).filter(|text| !text.is_empty()),
            reasoning: Some(self.reasoning).filter(|text| !text.is_empty()),
            tool_calls: Vec::new(),
        }
    }

    fn observe_line(&mut self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            return;
        };
        let Some(payload) = text.trim().strip_prefix("data:").map(str::trim) else {
            return;
        };
        if payload.is_empty() || payload == DONE_MARKER {
            return;
        }
        let Ok(event) = serde_json::from_str::<Value>(payload) else {
            return;
        };

        if self.response_id.is_none() {
            self.response_id = event
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string);
        }

        let Some(delta) = event.pointer("/choices/0/delta") else {
            return;
        };
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            self.content.push_str(text);
        }
        if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str) {
            self.reasoning.push_str(text);
        }
    }
}
