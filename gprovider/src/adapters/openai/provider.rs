//! OpenAI-compatible provider implementation over a pluggable transport.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use gcommon::HeaderMap;

use crate::{
    ChatCompletionRequest, ChatProvider, CompletionResponse, ProviderError, ProviderFuture,
    ProviderStream, RemoteModel, split_lines,
};

use super::serde_api::{OpenAiModelList, truncate_error_body};
use super::transport::{
    HttpMethod, OpenAiTransport, TransportRequest, TransportResponse, collect_body,
};

pub const PROVIDER_KIND: &str = "openai";

/// Any upstream exposing `/v1/chat/completions` and `/v1/models`.
#[derive(Clone)]
pub struct OpenAiProvider {
    name: String,
    base_url: String,
    headers: HeaderMap,
    transport: Arc<dyn OpenAiTransport>,
}

impl OpenAiProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        transport: Arc<dyn OpenAiTransport>,
    ) -> Result<Self, ProviderError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProviderError::configuration("provider name must not be empty"));
        }

        let base_url = base_url.into();
        let parsed = reqwest::Url::parse(&base_url).map_err(|err| {
            ProviderError::configuration(format!("provider '{name}' has invalid base_url: {err}"))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProviderError::configuration(format!(
                "provider '{name}' base_url must use http or https"
            )));
        }

        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers: HeaderMap::new(),
            transport,
        })
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/v1{}", self.base_url, path)
    }

    /// Static headers first, then forwarded ones, so callers win on collisions.
    pub(crate) fn build_headers(&self, forwarded: &HeaderMap) -> HeaderMap {
        let mut headers = self.headers.clone();
        for (name, value) in forwarded {
            if !value.is_empty() {
                headers.insert(name.clone(), value.clone());
            }
        }
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers
    }

    async fn post_completion(
        &self,
        mut request: ChatCompletionRequest,
        forwarded: &HeaderMap,
        stream: bool,
    ) -> Result<TransportResponse, ProviderError> {
        request.stream = stream;
        request.validate()?;
        let payload = request.to_payload()?;

        let mut headers = self.build_headers(forwarded);
        if stream {
            headers.insert("Accept".to_string(), "text/event-stream".to_string());
        }

        self.transport
            .send(TransportRequest {
                method: HttpMethod::Post,
                url: self.endpoint("/chat/completions"),
                headers,
                body: Some(payload),
            })
            .await
    }
}

impl Debug for OpenAiProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn chat_completions<'a>(
        &'a self,
        request: ChatCompletionRequest,
        headers: &'a HeaderMap,
    ) -> ProviderFuture<'a, Result<CompletionResponse, ProviderError>> {
        Box::pin(async move {
            let response = self.post_completion(request, headers, false).await?;
            let body = collect_body(response.body).await?;
            Ok(CompletionResponse::new(response.status, response.headers, body))
        })
    }

    fn chat_completions_stream<'a>(
        &'a self,
        request: ChatCompletionRequest,
        headers: &'a HeaderMap,
    ) -> ProviderFuture<'a, Result<ProviderStream, ProviderError>> {
        Box::pin(async move {
            let response = self.post_completion(request, headers, true).await?;
            Ok(ProviderStream::new(
                response.status,
                response.headers,
                split_lines(response.body),
            ))
        })
    }

    fn list_models<'a>(&'a self) -> ProviderFuture<'a, Result<Vec<RemoteModel>, ProviderError>> {
        Box::pin(async move {
            let response = self
                .transport
                .send(TransportRequest {
                    method: HttpMethod::Get,
                    url: self.endpoint("/models"),
                    headers: self.headers.clone(),
                    body: None,
                })
                .await?;
            let status = response.status;
            let body = collect_body(response.body).await?;

            if status >= 300 {
                return Err(ProviderError::upstream(
                    status,
                    format!(
                        "list models from '{}': {}",
                        self.name,
                        truncate_error_body(&body)
                    ),
                ));
            }

            let parsed: OpenAiModelList = serde_json::from_slice(&body).map_err(|err| {
                ProviderError::transport(format!("decode model list from '{}': {err}", self.name))
            })?;

            Ok(parsed.data.into_iter().map(RemoteModel::from).collect())
        })
    }
}
