//! OpenAI HTTP payload serde models and conversion helpers.

use serde::Deserialize;

use crate::RemoteModel;

const ERROR_BODY_LIMIT: usize = 1024;

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiModelList {
    #[serde(default)]
    pub data: Vec<OpenAiModelEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiModelEntry {
    pub id: String,
    #[serde(default)]
    pub owned_by: String,
}

impl From<OpenAiModelEntry> for RemoteModel {
    fn from(value: OpenAiModelEntry) -> Self {
        Self {
            display_name: value.id.clone(),
            id: value.id,
            family: value.owned_by,
            capabilities: vec!["chat".to_string()],
        }
    }
}

/// Error bodies are quoted back at most one KiB long.
pub(crate) fn truncate_error_body(body: &[u8]) -> String {
    let end = body.len().min(ERROR_BODY_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::{OpenAiModelList, truncate_error_body};
    use crate::RemoteModel;

    #[test]
    fn model_entries_map_to_chat_models() {
        let parsed: OpenAiModelList = serde_json::from_str(
            r#"{"object":"list","data":[{"id":"gpt-x","owned_by":"lab"},{"id":"bare"}]}"#,
        )
        .expect("model list should parse");

        let models = parsed
            .data
            .into_iter()
            .map(RemoteModel::from)
            .collect::<Vec<_>>();

        assert_eq!(models[0].id, "gpt-x");
        assert_eq!(models[0].display_name, "gpt-x");
        assert_eq!(models[0].family, "lab");
        assert_eq!(models[0].capabilities, vec!["chat".to_string()]);
        assert_eq!(models[1].family, "");
    }

    #[test]
    fn error_body_is_capped() {
        let body = vec![b'x'; 4096];
        assert_eq!(truncate_error_body(&body).len(), 1024);
        assert_eq!(truncate_error_body(b"short"), "short");
    }
}
