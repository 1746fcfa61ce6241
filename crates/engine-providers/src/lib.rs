//! The language-model provider boundary (spec §1, §6): this crate is
//! intentionally thin. The engine never inspects provider internals beyond
//! the `Provider` trait — prompt templates, retries, and routing live
//! elsewhere (engine-orchestrator) or are out of scope entirely.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use engine_types::Content;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }
}

/// A single one-shot invocation: system prompt plus an ordered turn history.
/// The orchestrator builds this fresh per dispatch/review call; providers
/// never see task or agent state directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("provider {0} not registered")]
    Unknown(String),
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier used as the registry key and as `Agent::provider_id`.
    fn id(&self) -> &str;

    async fn complete(
        &self,
        request: CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Content, ProviderError>;
}

/// Registry of live providers, assembled once at startup per spec §9's
/// "no free-floating singletons" note and threaded through the `Engine`.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.id().to_string(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| ProviderError::Unknown(id.to_string()))
    }
}

/// A generic OpenAI-compatible chat-completions client. Covers the "real"
/// provider family (OpenAI, and any Anthropic/Google-compatible gateway
/// reachable through the same wire shape) without pulling in a dedicated SDK
/// per family — the engine only needs `Provider`, not the vendor surface.
pub struct HttpChatProvider {
    id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpChatProvider {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequestBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionResponseBody {
    choices: Vec<ChatCompletionChoice>,
}

#[derive(Deserialize)]
struct ChatCompletionChoice {
    message: ChatCompletionMessage,
}

#[derive(Deserialize)]
struct ChatCompletionMessage {
    content: String,
}

#[async_trait]
impl Provider for HttpChatProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        api_key: Option<&str>,
    ) -> Result<Content, ProviderError> {
        let mut wire_messages = vec![WireMessage { role: "system", content: &request.system_prompt }];
        wire_messages.extend(request.messages.iter().map(|m| WireMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &m.text,
        }));

        let body = ChatCompletionRequestBody { model: &request.model, messages: wire_messages };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .error_for_status()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let parsed: ChatCompletionResponseBody = response
            .json()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        Ok(Content::Text(text))
    }
}

/// One scripted turn a `ScriptedProvider` returns in sequence. Used by the
/// orchestrator's own test suite to drive deterministic worker/supervisor
/// scenarios without a network call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Content),
    Fail(String),
}

impl Scripted {
    pub fn text(s: impl Into<String>) -> Self {
        Scripted::Reply(Content::Text(s.into()))
    }
}

/// Returns scripted responses in order, repeating the final entry once
/// exhausted. Every call is recorded so tests can assert on prompt contents
/// (e.g. scenario 2's "Revision feedback:" substring check).
pub struct ScriptedProvider {
    id: String,
    script: Mutex<Vec<Scripted>>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, script: Vec<Scripted>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script),
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(
        &self,
        request: CompletionRequest,
        _api_key: Option<&str>,
    ) -> Result<Content, ProviderError> {
        self.calls.lock().unwrap().push(request.clone());

        let script = self.script.lock().unwrap();
        if script.is_empty() {
            return Ok(Content::Text(String::new()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst).min(script.len() - 1);
        match &script[idx] {
            Scripted::Reply(content) => Ok(content.clone()),
            Scripted::Fail(message) => Err(ProviderError::Transport(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_provider_cycles_and_records_calls() {
        let provider = ScriptedProvider::new(
            "stub",
            vec![Scripted::text("first"), Scripted::text("second")],
        );
        let req = CompletionRequest {
            system_prompt: "sys".into(),
            messages: vec![ChatMessage::user("hello")],
            model: "m1".into(),
        };
        let first = provider.complete(req.clone(), None).await.unwrap();
        assert_eq!(first.to_text(), "first");
        let second = provider.complete(req.clone(), None).await.unwrap();
        assert_eq!(second.to_text(), "second");
        let third = provider.complete(req, None).await.unwrap();
        assert_eq!(third.to_text(), "second");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn scripted_provider_can_fail() {
        let provider = ScriptedProvider::new("stub", vec![Scripted::Fail("boom".into())]);
        let req = CompletionRequest {
            system_prompt: String::new(),
            messages: vec![],
            model: "m".into(),
        };
        let err = provider.complete(req, None).await.unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)));
    }

    #[test]
    fn registry_resolves_registered_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(ScriptedProvider::new("stub", vec![])));
        assert!(registry.get("stub").is_ok());
        assert!(registry.get("missing").is_err());
    }
}
