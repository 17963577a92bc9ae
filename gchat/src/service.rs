//! Chat service for non-streaming and streaming completion requests.

use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use gcommon::{
    CONVERSATION_ID_PREFIX, DEFAULT_ID_BYTES, HeaderMap, IdGenerator, Principal,
    SecureIdGenerator,
};
use gmemory::{
    Conversation, ConversationRepository, ConversationStatus, IdempotencyKey, IdempotencyRecord,
    IdempotencyStore, InMemoryConversationRepository, InMemoryIdempotencyStore, Item,
    MemoryErrorKind,
};
use gprovider::{ChatCompletionRequest as ProviderRequest, ProviderRegistry, ProviderStream, Route};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::history::{AssistantTurn, history_messages, request_items, synthesize_title};
use crate::sse::{StreamTranscript, conversation_chunk, find_done_marker};
use crate::types::{
    ChatCompletion, ChatCompletionRequest, ChatMessage, ChatResponse, ChatStream,
    ConversationSummary, EVENT_STREAM_CONTENT_TYPE, JSON_CONTENT_TYPE, RequestContext,
    header_value,
};
use crate::{ChatError, ChatHooks, NoopChatHooks};

pub struct ChatServiceBuilder {
    registry: Arc<ProviderRegistry>,
    conversations: Arc<dyn ConversationRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    ids: Arc<dyn IdGenerator>,
    hooks: Arc<dyn ChatHooks>,
}

impl ChatServiceBuilder {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            conversations: Arc::new(InMemoryConversationRepository::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
            ids: Arc::new(SecureIdGenerator),
            hooks: Arc::new(NoopChatHooks),
        }
    }

    pub fn conversations(mut self, conversations: Arc<dyn ConversationRepository>) -> Self {
        self.conversations = conversations;
        self
    }

    pub fn idempotency(mut self, idempotency: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = idempotency;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ChatHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> ChatService {
        ChatService {
            registry: self.registry,
            conversations: self.conversations,
            idempotency: self.idempotency,
            ids: self.ids,
            hooks: self.hooks,
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    registry: Arc<ProviderRegistry>,
    conversations: Arc<dyn ConversationRepository>,
    idempotency: Arc<dyn IdempotencyStore>,
    ids: Arc<dyn IdGenerator>,
    hooks: Arc<dyn ChatHooks>,
}

impl ChatService {
    pub fn builder(registry: Arc<ProviderRegistry>) -> ChatServiceBuilder {
        ChatServiceBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationRepository> {
        &self.conversations
    }

    /// Parses a raw request body and dispatches on its `stream` flag.
    pub async fn handle_json(
        &self,
        context: RequestContext,
        body: &[u8],
    ) -> Result<ChatResponse, ChatError> {
        let request = ChatCompletionRequest::from_slice(body)?;
        self.handle(context, request).await
    }

    pub async fn handle(
        &self,
        context: RequestContext,
        request: ChatCompletionRequest,
    ) -> Result<ChatResponse, ChatError> {
        if request.stream {
            self.stream(context, request).await.map(ChatResponse::Stream)
        } else {
            self.complete(context, request).await.map(ChatResponse::Complete)
        }
    }

    pub async fn complete(
        &self,
        context: RequestContext,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatCompletion, ChatError> {
        request.stream = false;
        let TurnContext {
            principal,
            route,
            request,
            provider_request,
            conversation,
            idempotency_key,
        } = match self.prepare_turn(&context, request).await? {
            PreparedTurn::Replay(record) => return Ok(replayed_completion(record)),
            PreparedTurn::Ready(turn) => *turn,
        };

        let forward_headers = principal.forward_headers();
        let started = Instant::now();
        self.hooks
            .on_provider_call_start(route.provider.name(), &route.model.id, false);
        let response = match route
            .provider
            .chat_completions(provider_request, &forward_headers)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.hooks.on_provider_call_failure(
                    route.provider.name(),
                    &route.model.id,
                    &err,
                    started.elapsed(),
                );
                return Err(err.into());
            }
        };
        self.hooks.on_provider_call_complete(
            route.provider.name(),
            &route.model.id,
            response.status,
            started.elapsed(),
        );

        let status = normalize_status(response.status);
        let success = is_success(status);
        let summary = conversation.as_ref().map(summarize);

        if success
            && request.should_store()
            && let Some(conversation) = conversation.as_ref()
        {
            let parsed = serde_json::from_slice::<Value>(&response.body).ok();
            match parsed.as_ref().and_then(AssistantTurn::from_completion) {
                Some(turn) => {
                    let mut items = request_items(&request.messages, self.ids.as_ref());
                    items.extend(turn.into_items(request.should_store_reasoning(), self.ids.as_ref()));
                    self.persist(conversation, items).await;
                }
                None => debug!(
                    conversation_id = conversation.public_id(),
                    "completion body has no assistant message; skipping persistence"
                ),
            }
        }

        let mut headers = response.headers;
        let body = match summary.as_ref().filter(|_| success) {
            Some(summary) => match attach_conversation(&response.body, summary) {
                Some(body) => {
                    remove_header(&mut headers, "content-length");
                    body
                }
                None => response.body,
            },
            None => response.body,
        };

        let completion = ChatCompletion {
            status,
            headers,
            body,
            conversation: summary,
            replayed: false,
        };

        if success && let Some(key) = idempotency_key {
            let record = IdempotencyRecord::new(key, status, completion.body.to_vec())
                .with_content_type(completion.content_type());
            self.save_idempotency(record).await;
        }

        Ok(completion)
    }

    pub async fn stream(
        &self,
        context: RequestContext,
        mut request: ChatCompletionRequest,
    ) -> Result<ChatStream, ChatError> {
        request.stream = true;
        let TurnContext {
            principal,
            route,
            request,
            provider_request,
            conversation,
            idempotency_key,
        } = match self.prepare_turn(&context, request).await? {
            PreparedTurn::Replay(record) => return Ok(replayed_stream(record)),
            PreparedTurn::Ready(turn) => *turn,
        };

        let forward_headers = principal.forward_headers();
        let started = Instant::now();
        self.hooks
            .on_provider_call_start(route.provider.name(), &route.model.id, true);
        let upstream = match route
            .provider
            .chat_completions_stream(provider_request, &forward_headers)
            .await
        {
            Ok(upstream) => upstream,
            Err(err) => {
                self.hooks.on_provider_call_failure(
                    route.provider.name(),
                    &route.model.id,
                    &err,
                    started.elapsed(),
                );
                return Err(err.into());
            }
        };

        let status = normalize_status(upstream.status_code());
        let mut headers = upstream.headers().clone();
        remove_header(&mut headers, "content-length");
        let content_type = match header_value(&headers, "content-type") {
            Some(content_type) => content_type.to_string(),
            None => {
                headers.insert(
                    "Content-Type".to_string(),
                    EVENT_STREAM_CONTENT_TYPE.to_string(),
                );
                EVENT_STREAM_CONTENT_TYPE.to_string()
            }
        };
        let summary = conversation.as_ref().map(summarize);

        let relay = StreamRelay {
            service: self.clone(),
            route,
            request,
            conversation,
            idempotency_key,
            status,
            content_type,
            started,
        };
        let body = relay.into_stream(upstream, context.cancel);

        Ok(ChatStream::new(status, headers, summary, Box::pin(body)))
    }

    async fn prepare_turn(
        &self,
        context: &RequestContext,
        request: ChatCompletionRequest,
    ) -> Result<PreparedTurn, ChatError> {
        let principal = context
            .principal
            .clone()
            .ok_or_else(ChatError::unauthorized)?;
        request.validate()?;

        let attachment = match request.conversation.as_ref() {
            None => Attachment::Detached,
            Some(reference) => match reference.id() {
                Some(id) => Attachment::Existing(self.load_owned(&principal, id).await?),
                None => Attachment::Create,
            },
        };

        let route = self.registry.resolve(&request.model)?;
        self.hooks
            .on_route_resolved(&route.model.id, route.provider.name());

        let mut messages = match &attachment {
            Attachment::Existing(conversation) => {
                history_messages(conversation.active_branch_items())
            }
            _ => Vec::new(),
        };
        messages.extend(request.messages.iter().cloned());
        let provider_request = build_provider_request(&route, &request, &messages)?;

        let idempotency_key = context.idempotency_key().map(|key| {
            IdempotencyKey::new(
                principal.id.clone(),
                context.method.clone(),
                context.path.clone(),
                key,
            )
        });
        if let Some(key) = idempotency_key.as_ref() {
            match self.idempotency.get(key).await {
                Ok(Some(record)) => {
                    debug!(idempotency_key = %key.key, status = record.status, "replaying stored response");
                    self.hooks.on_idempotent_replay(&principal.id, &key.key);
                    return Ok(PreparedTurn::Replay(record));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(idempotency_key = %key.key, error = %err, "idempotency lookup failed; treating as a miss");
                }
            }
        }

        let conversation = match attachment {
            Attachment::Detached => None,
            Attachment::Existing(conversation) => Some(conversation),
            Attachment::Create => Some(self.create_conversation(&principal, &request.messages).await?),
        };

        Ok(PreparedTurn::Ready(Box::new(TurnContext {
            principal,
            route,
            request,
            provider_request,
            conversation,
            idempotency_key,
        })))
    }

    /// Ownership mismatches are reported exactly like unknown ids.
    async fn load_owned(
        &self,
        principal: &Principal,
        conversation_id: &str,
    ) -> Result<Conversation, ChatError> {
        let conversation = self
            .conversations
            .find_by_public_id(conversation_id)
            .await?
            .ok_or_else(|| ChatError::conversation_not_found(conversation_id))?;

        if !conversation.is_owned_by(&principal.id) {
            warn!(
                conversation_id,
                principal_id = %principal.id,
                owner_id = %conversation.owner(),
                "conversation owner mismatch"
            );
            return Err(ChatError::conversation_not_found(conversation_id));
        }
        if conversation.status() == ConversationStatus::Deleted {
            return Err(ChatError::conversation_not_found(conversation_id));
        }

        Ok(conversation)
    }

    async fn create_conversation(
        &self,
        principal: &Principal,
        messages: &[ChatMessage],
    ) -> Result<Conversation, ChatError> {
        let public_id = self.ids.generate(CONVERSATION_ID_PREFIX, DEFAULT_ID_BYTES);
        let title = synthesize_title(messages);
        let conversation = Conversation::new(public_id, principal.id.clone(), Some(title));
        self.conversations.create(&conversation).await?;

        debug!(
            conversation_id = conversation.public_id(),
            principal_id = %principal.id,
            title = conversation.title.as_deref().unwrap_or_default(),
            "created conversation"
        );
        Ok(conversation)
    }

    /// Appends to the active branch. Failures are logged and reported to
    /// hooks, never returned.
    async fn persist(&self, conversation: &Conversation, items: Vec<Item>) {
        if items.is_empty() {
            return;
        }

        let count = items.len();
        let conversation_id = conversation.public_id();
        let branch = conversation.active_branch();
        match self
            .conversations
            .append_items(conversation_id, branch, items)
            .await
        {
            Ok(_) => debug!(conversation_id, branch, items = count, "persisted conversation items"),
            Err(err) => {
                warn!(conversation_id, branch, error = %err, "failed to persist conversation items");
                self.hooks.on_persistence_failure(conversation_id, &err);
            }
        }
    }

    async fn save_idempotency(&self, record: IdempotencyRecord) {
        let key = record.key.key.clone();
        match self.idempotency.save(record).await {
            Ok(()) => {}
            Err(err) if err.kind == MemoryErrorKind::Conflict => {
                warn!(idempotency_key = %key, "idempotency record already saved; keeping the first");
            }
            Err(err) => {
                warn!(idempotency_key = %key, error = %err, "failed to save idempotency record");
            }
        }
    }
}

enum Attachment {
    Detached,
    Existing(Conversation),
    Create,
}

struct TurnContext {
    principal: Principal,
    route: Route,
    request: ChatCompletionRequest,
    provider_request: ProviderRequest,
    conversation: Option<Conversation>,
    idempotency_key: Option<IdempotencyKey>,
}

enum PreparedTurn {
    Replay(IdempotencyRecord),
    Ready(Box<TurnContext>),
}

/// State carried by a relayed stream until it finishes.
struct StreamRelay {
    service: ChatService,
    route: Route,
    request: ChatCompletionRequest,
    conversation: Option<Conversation>,
    idempotency_key: Option<IdempotencyKey>,
    status: u16,
    content_type: String,
    started: Instant,
}

impl StreamRelay {
    /// Relays upstream chunks in order. The conversation chunk goes out
    /// immediately before `[DONE]`; persistence and the idempotency save only
    /// run once the upstream ends cleanly.
    fn into_stream(
        self,
        mut upstream: ProviderStream,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, ChatError>> + Send + 'static {
        try_stream! {
            let StreamRelay {
                service,
                route,
                request,
                conversation,
                idempotency_key,
                status,
                content_type,
                started,
            } = self;
            let success = is_success(status);
            let mut pending = match conversation.as_ref() {
                Some(conversation) if success => {
                    Some(conversation_chunk(&summarize(conversation), &request.model))
                }
                _ => None,
            };
            let mut captured = BytesMut::new();
            let mut transcript = StreamTranscript::default();

            loop {
                let chunk = match upstream.next_chunk(&cancel).await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(err) => {
                        let elapsed = started.elapsed();
                        if err.is_cancelled() {
                            debug!(model = %route.model.id, "stream cancelled; skipping persistence");
                            service.hooks.on_stream_cancelled(route.provider.name(), &route.model.id, elapsed);
                        } else {
                            warn!(model = %route.model.id, error = %err, "upstream stream failed");
                            service.hooks.on_provider_call_failure(route.provider.name(), &route.model.id, &err, elapsed);
                        }
                        Err::<Bytes, ChatError>(err.into())?
                    }
                };

                if success {
                    transcript.observe(&chunk);
                }

                let split = match pending.as_ref() {
                    Some(_) => find_done_marker(&chunk),
                    None => None,
                };
                match split {
                    Some(offset) => {
                        let marker = pending.take().unwrap_or_default();
                        let head = chunk.slice(..offset);
                        let tail = chunk.slice(offset..);
                        if !head.is_empty() {
                            captured.extend_from_slice(&head);
                            yield head;
                        }
                        captured.extend_from_slice(&marker);
                        yield marker;
                        captured.extend_from_slice(&tail);
                        yield tail;
                    }
                    None => {
                        captured.extend_from_slice(&chunk);
                        yield chunk;
                    }
                }
            }

            if let Some(marker) = pending.take() {
                captured.extend_from_slice(&marker);
                yield marker;
            }
            service.hooks.on_provider_call_complete(route.provider.name(), &route.model.id, status, started.elapsed());

            if success {
                if let Some(conversation) = conversation.as_ref().filter(|_| request.should_store()) {
                    let mut items = request_items(&request.messages, service.ids.as_ref());
                    items.extend(transcript.finish().into_items(request.should_store_reasoning(), service.ids.as_ref()));
                    service.persist(conversation, items).await;
                }
                if let Some(key) = idempotency_key {
                    let record = IdempotencyRecord::new(key, status, captured.to_vec())
                        .with_content_type(content_type);
                    service.save_idempotency(record).await;
                }
            }
        }
    }
}

fn build_provider_request(
    route: &Route,
    request: &ChatCompletionRequest,
    messages: &[ChatMessage],
) -> Result<ProviderRequest, ChatError> {
    let model = if route.model.served_name.trim().is_empty() {
        request.model.clone()
    } else {
        route.model.served_name.clone()
    };
    let messages = messages
        .iter()
        .map(ChatMessage::to_provider_message)
        .collect::<Result<Vec<_>, _>>()?;

    let mut builder = ProviderRequest::builder(model)
        .messages(messages)
        .streaming(request.stream);
    if let Some(temperature) = request.temperature {
        builder = builder.temperature(temperature);
    }
    if let Some(top_p) = request.top_p {
        builder = builder.top_p(top_p);
    }
    if let Some(max_tokens) = request.max_tokens {
        builder = builder.max_tokens(max_tokens);
    }
    if let Some(metadata) = request.metadata.clone() {
        builder = builder.metadata(metadata);
    }
    if let Some(penalty) = request.frequency_penalty {
        builder = builder.extra("frequency_penalty", json!(penalty));
    }
    if let Some(penalty) = request.presence_penalty {
        builder = builder.extra("presence_penalty", json!(penalty));
    }
    if let Some(stop) = request.stop.as_ref() {
        builder = builder.extra("stop", json!(stop));
    }
    if let Some(n) = request.n {
        builder = builder.extra("n", json!(n));
    }

    Ok(builder.build()?)
}

fn summarize(conversation: &Conversation) -> ConversationSummary {
    ConversationSummary {
        id: conversation.public_id().to_string(),
        title: conversation.title.clone(),
    }
}

/// Adds the `conversation` field to a JSON object body.
fn attach_conversation(body: &[u8], conversation: &ConversationSummary) -> Option<Bytes> {
    let Value::Object(mut object) = serde_json::from_slice::<Value>(body).ok()? else {
        return None;
    };
    object.insert(
        "conversation".to_string(),
        serde_json::to_value(conversation).ok()?,
    );
    serde_json::to_vec(&object).ok().map(Bytes::from)
}

fn normalize_status(status: u16) -> u16 {
    if status == 0 { 200 } else { status }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn remove_header(headers: &mut HeaderMap, name: &str) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
}

fn replay_headers(record: &IdempotencyRecord, default_content_type: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Content-Type".to_string(),
        record
            .content_type
            .clone()
            .unwrap_or_else(|| default_content_type.to_string()),
    );
    headers
}

fn replayed_completion(record: IdempotencyRecord) -> ChatCompletion {
    let headers = replay_headers(&record, JSON_CONTENT_TYPE);
    let conversation = serde_json::from_slice::<Value>(&record.body)
        .ok()
        .and_then(|body| body.get("conversation").cloned())
        .and_then(|value| serde_json::from_value(value).ok());

    ChatCompletion {
        status: record.status,
        headers,
        body: Bytes::from(record.body),
        conversation,
        replayed: true,
    }
}

fn replayed_stream(record: IdempotencyRecord) -> ChatStream {
    let headers = replay_headers(&record, EVENT_STREAM_CONTENT_TYPE);
    let body = futures_util::stream::iter([Ok::<Bytes, ChatError>(Bytes::from(record.body))]);

    let mut stream = ChatStream::new(record.status, headers, None, Box::pin(body));
    stream.replayed = true;
    stream
}

#[cfg(test)]
mod tests {
    use gcommon::HeaderMap;

    use super::{attach_conversation, normalize_status, remove_header};
    use crate::types::ConversationSummary;

    #[test]
    fn conversation_is_attached_only_to_json_objects() {
        let summary = ConversationSummary {
            id: "conv_1".to_string(),
            title: None,
        };

        let body = attach_conversation(br#"{"id":"chatcmpl-1","choices":[]}"#, &summary)
            .expect("object body should accept the field");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(json["conversation"], serde_json::json!({"id": "conv_1"}));
        assert_eq!(json["id"], "chatcmpl-1");

        assert!(attach_conversation(b"upstream exploded", &summary).is_none());
        assert!(attach_conversation(b"[1,2]", &summary).is_none());
    }

    #[test]
    fn zero_status_is_treated_as_ok() {
        assert_eq!(normalize_status(0), 200);
        assert_eq!(normalize_status(429), 429);
    }

    #[test]
    fn header_removal_ignores_case() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Length".to_string(), "12".to_string());
        headers.insert("x-request-id".to_string(), "r1".to_string());

        remove_header(&mut headers, "content-length");
        assert_eq!(headers.len(), 1);
    }
}
