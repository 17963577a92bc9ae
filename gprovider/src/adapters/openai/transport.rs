//! OpenAI transport trait and reqwest-based HTTP implementation.

use std::fmt::Debug;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use gcommon::HeaderMap;
use reqwest::Client;

use crate::{ChunkStream, ProviderError, ProviderFuture};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// Upstream reply with an unread body.
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ChunkStream<'static>,
}

impl TransportResponse {
    pub fn from_bytes(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            headers,
            body: Box::pin(futures_util::stream::iter(vec![Ok(body)])),
        }
    }
}

impl Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

pub trait OpenAiTransport: Send + Sync + Debug {
    fn send<'a>(
        &'a self,
        request: TransportRequest,
    ) -> ProviderFuture<'a, Result<TransportResponse, ProviderError>>;
}

pub async fn collect_body(mut body: ChunkStream<'_>) -> Result<Bytes, ProviderError> {
    let mut collected = BytesMut::new();
    while let Some(chunk) = body.next().await {
        collected.extend_from_slice(&chunk?);
    }
    Ok(collected.freeze())
}

#[derive(Debug, Clone)]
pub struct OpenAiHttpTransport {
    client: Client,
}

impl OpenAiHttpTransport {
    pub fn new() -> Result<Self, ProviderError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::configuration(format!("build http client: {err}")))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::timeout(err.to_string())
    } else {
        ProviderError::transport(err.to_string())
    }
}

/// Keeps the first value seen for each header name.
fn collect_headers(source: &reqwest::header::HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in source {
        if headers.contains_key(name.as_str()) {
            continue;
        }
        if let Ok(value) = value.to_str() {
            headers.insert(name.as_str().to_string(), value.to_string());
        }
    }
    headers
}

impl OpenAiTransport for OpenAiHttpTransport {
    fn send<'a>(
        &'a self,
        request: TransportRequest,
    ) -> ProviderFuture<'a, Result<TransportResponse, ProviderError>> {
        Box::pin(async move {
            let mut builder = match request.method {
                HttpMethod::Get => self.client.get(&request.url),
                HttpMethod::Post => self.client.post(&request.url),
            };

            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(map_reqwest_error)?;
            let status = response.status().as_u16();
            let headers = collect_headers(response.headers());
            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_reqwest_error));

            Ok(TransportResponse {
                status,
                headers,
                body: Box::pin(body),
            })
        })
    }
}
