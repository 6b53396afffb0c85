//! Assistant chat client
//!
//! Signed-in users have their turns persisted to chat history; anonymous
//! users keep them locally. The endpoint answers with `{text}` even on
//! server errors, so any parseable reply is displayable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use studyvault_common::assistant::{ChatReply, ChatRequest, HistoryTurn};
use studyvault_common::domain::{ChatMessage, Identity};
use studyvault_common::errors::{AppError, Result};
use studyvault_common::store::ChatHistoryStore;
use tracing::{debug, warn};

pub const GREETING: &str =
    "Hi! I can help you find notes, summarize documents, or answer questions about StudyVault. How can I assist?";

/// Shown locally when the endpoint cannot be reached
pub const CONNECT_FAILURE: &str = "Failed to connect to AI.";

const MISSING_TEXT: &str = "Something went wrong.";

/// Visible chat transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            messages: vec![ChatMessage::model(GREETING)],
        }
    }
}

impl Conversation {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Replace the transcript with persisted history. An empty history keeps
    /// the current transcript (and its greeting).
    pub fn replace_with_history(&mut self, history: Vec<ChatMessage>) {
        if !history.is_empty() {
            self.messages = history;
        }
    }

    fn turns(&self) -> Vec<HistoryTurn> {
        self.messages
            .iter()
            .map(|m| HistoryTurn {
                role: m.role,
                text: m.text.clone(),
            })
            .collect()
    }
}

/// What the assistant should know about the user's current view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatContext {
    pub file_url: Option<String>,
    pub file_type: Option<String>,
    pub resource_list: Vec<String>,
}

/// Transport to the assistant endpoint
#[async_trait]
pub trait AssistantEndpoint: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply>;
}

pub struct HttpAssistantEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpAssistantEndpoint {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl AssistantEndpoint for HttpAssistantEndpoint {
    async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
        let response = self.client.post(&self.url).json(request).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        // Failures carry displayable text too, so the status is informational
        if !status.is_success() {
            debug!(status = %status, "Assistant endpoint returned an error body");
        }

        let text = body
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or(MISSING_TEXT)
            .to_string();
        Ok(ChatReply { text })
    }
}

/// Sends chat turns and keeps history in step
pub struct ChatClient<S: ChatHistoryStore + ?Sized> {
    store: Arc<S>,
    endpoint: Arc<dyn AssistantEndpoint>,
}

impl<S: ChatHistoryStore + ?Sized> ChatClient<S> {
    pub fn new(store: Arc<S>, endpoint: Arc<dyn AssistantEndpoint>) -> Self {
        Self { store, endpoint }
    }

    /// Send one message and return the model turn that answers it
    pub async fn send_message(
        &self,
        conversation: &mut Conversation,
        identity: Option<&Identity>,
        message: &str,
        context: ChatContext,
    ) -> Result<ChatMessage> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AppError::MissingField {
                field: "message".to_string(),
            });
        }

        let request = ChatRequest {
            message: message.to_string(),
            history: conversation.turns(),
            context_file_url: context.file_url,
            context_file_type: context.file_type,
            resource_list: context.resource_list,
        };

        let user_turn = ChatMessage::user(message);
        conversation.push(user_turn.clone());
        self.persist(identity, user_turn).await;

        let reply = match self.endpoint.send(&request).await {
            Ok(reply) => ChatMessage::model(reply.text),
            Err(e) => {
                warn!(error = %e, "Assistant unreachable");
                let failure = ChatMessage::model(CONNECT_FAILURE);
                conversation.push(failure.clone());
                return Ok(failure);
            }
        };

        conversation.push(reply.clone());
        self.persist(identity, reply.clone()).await;
        Ok(reply)
    }

    async fn persist(&self, identity: Option<&Identity>, turn: ChatMessage) {
        let Some(identity) = identity else {
            return;
        };
        if let Err(e) = self.store.append_message(&identity.uid, turn).await {
            warn!(uid = %identity.uid, error = %e, "Chat turn kept locally only");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use studyvault_common::domain::ChatRole;
    use studyvault_common::store::{Delivery, MemoryStore};
    use tokio::sync::Mutex;

    /// Replies from a script and records every request
    pub(crate) struct ScriptedEndpoint {
        replies: Mutex<Vec<Result<ChatReply>>>,
        pub(crate) seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedEndpoint {
        pub(crate) fn new(replies: Vec<Result<ChatReply>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AssistantEndpoint for ScriptedEndpoint {
        async fn send(&self, request: &ChatRequest) -> Result<ChatReply> {
            self.seen.lock().await.push(request.clone());
            let mut replies = self.replies.lock().await;
            if replies.is_empty() {
                return Ok(ChatReply { text: "ok".into() });
            }
            replies.remove(0)
        }
    }

    fn user() -> Identity {
        Identity::new("u1", "asha@sahyadri.edu.in", "Asha")
    }

    #[tokio::test]
    async fn test_signed_in_turns_are_persisted() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![Ok(ChatReply {
            text: "Module 3 covers pipelining.".into(),
        })]));
        let client = ChatClient::new(store.clone(), endpoint.clone());
        let mut conversation = Conversation::default();

        let reply = client
            .send_message(&mut conversation, Some(&user()), "What is in module 3?", ChatContext::default())
            .await
            .unwrap();
        assert_eq!(reply.text, "Module 3 covers pipelining.");
        assert_eq!(conversation.messages().len(), 3);

        let mut history = store.watch_history(&user().uid, 50).await.unwrap();
        let persisted = history.next().await.and_then(Delivery::snapshot).unwrap();
        let roles: Vec<ChatRole> = persisted.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model]);

        // History sent is the transcript before this turn
        let seen = endpoint.seen.lock().await;
        assert_eq!(seen[0].history.len(), 1);
        assert_eq!(seen[0].history[0].text, GREETING);
    }

    #[tokio::test]
    async fn test_anonymous_turns_stay_local() {
        let store = Arc::new(MemoryStore::new());
        let client = ChatClient::new(store.clone(), Arc::new(ScriptedEndpoint::new(vec![])));
        let mut conversation = Conversation::default();

        client
            .send_message(&mut conversation, None, "hello", ChatContext::default())
            .await
            .unwrap();
        assert_eq!(conversation.messages().len(), 3);
        assert_eq!(store.write_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_transport_failure_appends_local_notice() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![Err(AppError::Inference {
            message: "unreachable".into(),
        })]));
        let client = ChatClient::new(store.clone(), endpoint);
        let mut conversation = Conversation::default();

        let reply = client
            .send_message(&mut conversation, Some(&user()), "hello", ChatContext::default())
            .await
            .unwrap();
        assert_eq!(reply.text, CONNECT_FAILURE);
        assert_eq!(conversation.messages().last().unwrap().text, CONNECT_FAILURE);

        // Only the user turn reached history
        let mut history = store.watch_history(&user().uid, 50).await.unwrap();
        let persisted = history.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_falls_back_to_local() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true).await;
        let client = ChatClient::new(store.clone(), Arc::new(ScriptedEndpoint::new(vec![])));
        let mut conversation = Conversation::default();

        let reply = client
            .send_message(&mut conversation, Some(&user()), "hello", ChatContext::default())
            .await
            .unwrap();
        assert_eq!(reply.text, "ok");
        assert_eq!(conversation.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_context_and_blank_messages() {
        let store = Arc::new(MemoryStore::new());
        let endpoint = Arc::new(ScriptedEndpoint::new(vec![]));
        let client = ChatClient::new(store, endpoint.clone());
        let mut conversation = Conversation::default();

        assert!(client
            .send_message(&mut conversation, None, "   ", ChatContext::default())
            .await
            .is_err());

        let context = ChatContext {
            file_url: Some("https://media.test/raw/cs/1-notes.pdf".into()),
            file_type: Some("pdf".into()),
            resource_list: vec!["Maths - Module 2 (by Dr. Rao)".into()],
        };
        client
            .send_message(&mut conversation, None, "summarize", context)
            .await
            .unwrap();
        let seen = endpoint.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].context_file_type.as_deref(), Some("pdf"));
        assert_eq!(seen[0].resource_list.len(), 1);
    }

    /// Serves `reply` with `status` for every POST and returns the endpoint URL
    async fn assistant_host(status: axum::http::StatusCode, reply: &'static str) -> String {
        use axum::routing::post;

        let app = axum::Router::new().route(
            "/api/chat",
            post(move || async move {
                (status, [(axum::http::header::CONTENT_TYPE, "application/json")], reply)
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/chat", addr)
    }

    async fn ask_over_http(url: String, store: Arc<MemoryStore>) -> (ChatMessage, Conversation) {
        let endpoint = HttpAssistantEndpoint::new(url, Duration::from_secs(5)).unwrap();
        let client = ChatClient::new(store, Arc::new(endpoint));
        let mut conversation = Conversation::default();
        let reply = client
            .send_message(&mut conversation, Some(&user()), "hello", ChatContext::default())
            .await
            .unwrap();
        (reply, conversation)
    }

    #[tokio::test]
    async fn test_http_reply_is_shown_and_persisted() {
        let url = assistant_host(axum::http::StatusCode::OK, r#"{"text":"Module 3 covers pipelining."}"#).await;
        let store = Arc::new(MemoryStore::new());

        let (reply, conversation) = ask_over_http(url, store.clone()).await;
        assert_eq!(reply.text, "Module 3 covers pipelining.");
        assert_eq!(conversation.messages().len(), 3);

        let mut history = store.watch_history(&user().uid, 50).await.unwrap();
        let persisted = history.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_body_is_displayed() {
        let url = assistant_host(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"text":"Connection Failed: quota exceeded"}"#,
        )
        .await;
        let store = Arc::new(MemoryStore::new());

        let (reply, conversation) = ask_over_http(url, store.clone()).await;
        assert_eq!(reply.role, ChatRole::Model);
        assert_eq!(reply.text, "Connection Failed: quota exceeded");
        assert_eq!(conversation.messages().last().unwrap().text, "Connection Failed: quota exceeded");

        // A displayable failure is a normal model turn
        let mut history = store.watch_history(&user().uid, 50).await.unwrap();
        let persisted = history.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(persisted.len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_without_text_uses_generic_message() {
        let url = assistant_host(axum::http::StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"boom"}"#).await;

        let (reply, _) = ask_over_http(url, Arc::new(MemoryStore::new())).await;
        assert_eq!(reply.text, MISSING_TEXT);
    }

    #[tokio::test]
    async fn test_unparseable_http_reply_is_a_connect_failure() {
        let url = assistant_host(axum::http::StatusCode::BAD_GATEWAY, "upstream down").await;
        let store = Arc::new(MemoryStore::new());

        let (reply, _) = ask_over_http(url, store.clone()).await;
        assert_eq!(reply.text, CONNECT_FAILURE);

        let mut history = store.watch_history(&user().uid, 50).await.unwrap();
        let persisted = history.next().await.and_then(Delivery::snapshot).unwrap();
        assert_eq!(persisted.len(), 1);
    }

    #[test]
    fn test_history_replaces_transcript_when_present() {
        let mut conversation = Conversation::default();
        conversation.replace_with_history(vec![]);
        assert_eq!(conversation.messages()[0].text, GREETING);

        conversation.replace_with_history(vec![ChatMessage::user("hi"), ChatMessage::model("hello")]);
        assert_eq!(conversation.messages().len(), 2);
        assert_eq!(conversation.messages()[0].role, ChatRole::User);
    }
}
