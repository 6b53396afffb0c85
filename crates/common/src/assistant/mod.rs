//! Study assistant backed by a hosted language model
//!
//! Each request is answered statelessly: the client sends its visible history,
//! the folder it is browsing and optionally the document it has open. The
//! primary model is tried first and the fallback model once after it.

use crate::config::{AssistantConfig, MediaConfig};
use crate::domain::ChatRole;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SYSTEM_PROMPT: &str = "\
You are the AI Assistant for StudyVault, a student resource sharing platform for Sahyadri College of Engineering.
Your goal is to help students navigate the app, find resources, and understand their study materials.

**Capabilities:**
- You can summarize notes and question papers if the user provides them.
- You can identify important topics from Question Papers (PYQs).

**Rules:**
1. Answer ONLY questions related to StudyVault or the study materials provided.
2. If the user provided a document (PDF/Image), focus your answer on analyzing that document.
3. Be friendly, encouraging, and concise.
";

const CONTEXT_HINT: &str = "\n\nAnalyze this document context. ";

/// One prior turn as sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: ChatRole,
    pub text: String,
}

/// Chat endpoint request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_file_type: Option<String>,
    #[serde(default)]
    pub resource_list: Vec<String>,
}

/// Chat endpoint response body, used for failures too
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
}

impl ChatReply {
    /// Displayable text for a failed request
    pub fn failure(err: &AppError) -> Self {
        let text = match err {
            AppError::Configuration { .. } => {
                "Error: the assistant API key is missing. Please check the server configuration."
                    .to_string()
            }
            AppError::Inference { message } => format!("Connection Failed: {}", message),
            _ => "Sorry, something went wrong on the server.".to_string(),
        };
        Self { text }
    }
}

/// Content part in the model's wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One conversation turn in the model's wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: ChatRole,
    pub parts: Vec<Part>,
}

/// Trait for text generation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, model: &str, contents: &[Content]) -> Result<String>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: &'a [Content],
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

/// Generative Language API client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, model: &str, contents: &[Content]) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&GenerateRequest { contents })
            .send()
            .await
            .map_err(|e| AppError::Inference {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Inference {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: GenerateResponse = response.json().await.map_err(|e| AppError::Inference {
            message: format!("Failed to parse response: {}", e),
        })?;

        let text: String = result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(AppError::Inference {
                message: "Empty response".to_string(),
            });
        }
        Ok(text)
    }
}

/// Answers chat requests
pub struct AssistantService {
    model: Option<Arc<dyn LanguageModel>>,
    http: reqwest::Client,
    primary_model: String,
    fallback_model: String,
    context_host: String,
    max_fetch_bytes: usize,
}

impl AssistantService {
    /// Build from configuration; without an API key every request fails displayably
    pub fn from_config(config: &AssistantConfig, media: &MediaConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let model = match config.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Some(Arc::new(GeminiClient::new(key.to_string(), &config.api_base, timeout)?)
                as Arc<dyn LanguageModel>),
            None => {
                warn!("Assistant API key not configured");
                None
            }
        };
        Self::build(model, config, media, timeout)
    }

    /// Build around an explicit model implementation
    pub fn with_model(
        model: Arc<dyn LanguageModel>,
        config: &AssistantConfig,
        media: &MediaConfig,
    ) -> Result<Self> {
        Self::build(Some(model), config, media, Duration::from_secs(config.timeout_secs))
    }

    fn build(
        model: Option<Arc<dyn LanguageModel>>,
        config: &AssistantConfig,
        media: &MediaConfig,
        timeout: Duration,
    ) -> Result<Self> {
        // Redirects could leave the delivery host
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            model,
            http,
            primary_model: config.primary_model.clone(),
            fallback_model: config.fallback_model.clone(),
            context_host: media.delivery_host.clone(),
            max_fetch_bytes: media.max_fetch_bytes,
        })
    }

    pub async fn answer(&self, request: ChatRequest) -> Result<ChatReply> {
        let model = self.model.as_ref().ok_or_else(|| AppError::Configuration {
            message: "assistant API key is missing".to_string(),
        })?;

        let mut parts = Vec::new();
        if let Some(url) = request.context_file_url.as_deref() {
            let url = self.context_url(url)?;
            match self.fetch_inline(&url, request.context_file_type.as_deref()).await {
                Ok(inline) => {
                    parts.push(inline);
                    parts.push(Part::text(CONTEXT_HINT));
                }
                Err(e) => warn!(url = %url, error = %e, "Failed to fetch context file"),
            }
        }
        parts.push(Part::text(request.message.clone()));

        let contents = conversation(&request, parts);

        let start = Instant::now();
        match model.generate(&self.primary_model, &contents).await {
            Ok(text) => {
                crate::metrics::record_chat(start.elapsed().as_secs_f64(), &self.primary_model, true);
                return Ok(ChatReply { text });
            }
            Err(e) => {
                crate::metrics::record_chat(start.elapsed().as_secs_f64(), &self.primary_model, false);
                warn!(model = %self.primary_model, error = %e, "Primary model failed, falling back");
            }
        }

        let start = Instant::now();
        let result = model.generate(&self.fallback_model, &contents).await;
        crate::metrics::record_chat(start.elapsed().as_secs_f64(), &self.fallback_model, result.is_ok());

        let text = result.map_err(|e| AppError::Inference {
            message: match e {
                AppError::Inference { message } => message,
                other => other.to_string(),
            },
        })?;
        info!(model = %self.fallback_model, "Answered by fallback model");
        Ok(ChatReply { text })
    }

    /// Context files are only fetched from the media delivery host
    fn context_url(&self, raw: &str) -> Result<reqwest::Url> {
        let refused = || AppError::Inference {
            message: "context file must be hosted on the StudyVault media host".to_string(),
        };
        let url = reqwest::Url::parse(raw).map_err(|_| refused())?;
        let allowed = matches!(url.scheme(), "http" | "https")
            && url
                .host_str()
                .is_some_and(|host| host.eq_ignore_ascii_case(&self.context_host));
        if !allowed {
            warn!(url = %raw, "Refused context file from foreign host");
            return Err(refused());
        }
        Ok(url)
    }

    async fn fetch_inline(&self, url: &reqwest::Url, file_type: Option<&str>) -> Result<Part> {
        let mut response = self.http.get(url.clone()).send().await?.error_for_status()?;
        if let Some(len) = response.content_length() {
            if len > self.max_fetch_bytes as u64 {
                return Err(AppError::PayloadTooLarge {
                    size: len as usize,
                    limit: self.max_fetch_bytes,
                });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let size = bytes.len() + chunk.len();
            if size > self.max_fetch_bytes {
                return Err(AppError::PayloadTooLarge {
                    size,
                    limit: self.max_fetch_bytes,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(Part::Inline {
            inline_data: InlineData {
                mime_type: context_mime(url.as_str(), file_type).to_string(),
                data: BASE64.encode(&bytes),
            },
        })
    }
}

/// MIME type announced for an inline context document
pub fn context_mime(url: &str, file_type: Option<&str>) -> &'static str {
    if file_type == Some("pdf") || url.ends_with(".pdf") {
        "application/pdf"
    } else {
        "image/jpeg"
    }
}

/// Full model conversation: primed system prompt, prior turns, then the new turn
fn conversation(request: &ChatRequest, parts: Vec<Part>) -> Vec<Content> {
    let mut prompt = SYSTEM_PROMPT.to_string();
    if !request.resource_list.is_empty() {
        prompt.push_str(&format!(
            "\n\n**Current Folder Content:**\nThe user is viewing a folder with the following files: \n- {}\n\n\
             You can refer to these files if the user asks what is available. However, you can ONLY read \
             the content of a file if the user actively opens it (providing a contextFileUrl).",
            request.resource_list.join("\n- ")
        ));
    }

    let mut contents = vec![
        Content {
            role: ChatRole::User,
            parts: vec![Part::text(prompt)],
        },
        Content {
            role: ChatRole::Model,
            parts: vec![Part::text("Understood.")],
        },
    ];
    contents.extend(request.history.iter().map(|turn| Content {
        role: turn.role,
        parts: vec![Part::text(turn.text.clone())],
    }));
    contents.push(Content {
        role: ChatRole::User,
        parts,
    });
    contents
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted model: fails for the listed model names, records every call
    struct ScriptedModel {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<(String, Vec<Content>)>>,
    }

    impl ScriptedModel {
        fn new(failing: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                failing,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, model: &str, contents: &[Content]) -> Result<String> {
            self.calls.lock().unwrap().push((model.to_string(), contents.to_vec()));
            if self.failing.contains(&model) {
                Err(AppError::Inference {
                    message: format!("{} unavailable", model),
                })
            } else {
                Ok(format!("answer from {}", model))
            }
        }
    }

    fn request() -> ChatRequest {
        ChatRequest {
            message: "What is in this folder?".into(),
            history: vec![HistoryTurn {
                role: ChatRole::Model,
                text: "Hi! I'm your StudyVault AI.".into(),
            }],
            resource_list: vec!["COA - Module 1 (by Dr. Rao)".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_primary_model_answers() {
        let model = ScriptedModel::new(vec![]);
        let service = AssistantService::with_model(model.clone(), &AssistantConfig::default(), &MediaConfig::default())
            .unwrap();
        let reply = service.answer(request()).await.unwrap();
        assert_eq!(reply.text, "answer from gemini-flash-latest");

        let calls = model.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let contents = &calls[0].1;
        // prompt, ack, one history turn, new turn
        assert_eq!(contents.len(), 4);
        match &contents[0].parts[0] {
            Part::Text { text } => assert!(text.contains("- COA - Module 1 (by Dr. Rao)")),
            other => panic!("unexpected part {:?}", other),
        }
        assert_eq!(contents[3].parts, vec![Part::text("What is in this folder?")]);
    }

    #[tokio::test]
    async fn test_fallback_model_used_once() {
        let model = ScriptedModel::new(vec!["gemini-flash-latest"]);
        let service = AssistantService::with_model(model.clone(), &AssistantConfig::default(), &MediaConfig::default())
            .unwrap();
        let reply = service.answer(request()).await.unwrap();
        assert_eq!(reply.text, "answer from gemini-pro-latest");
        assert_eq!(model.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_both_models_failing() {
        let model = ScriptedModel::new(vec!["gemini-flash-latest", "gemini-pro-latest"]);
        let service = AssistantService::with_model(model, &AssistantConfig::default(), &MediaConfig::default())
            .unwrap();
        let err = service.answer(request()).await.unwrap_err();
        assert_eq!(
            ChatReply::failure(&err).text,
            "Connection Failed: gemini-pro-latest unavailable"
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_displayable() {
        let service = AssistantService::from_config(&AssistantConfig::default(), &MediaConfig::default()).unwrap();
        let err = service.answer(request()).await.unwrap_err();
        assert!(ChatReply::failure(&err).text.contains("API key is missing"));
    }

    /// Local file host counting the requests it serves
    async fn file_host(body_len: usize) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().route(
            "/{*path}",
            axum::routing::get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    vec![b'%'; body_len]
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    fn media(host: &str, max_fetch_bytes: usize) -> MediaConfig {
        MediaConfig {
            delivery_host: host.to_string(),
            max_fetch_bytes,
            ..Default::default()
        }
    }

    fn has_inline(contents: &[Content]) -> bool {
        contents
            .last()
            .is_some_and(|c| c.parts.iter().any(|p| matches!(p, Part::Inline { .. })))
    }

    #[tokio::test]
    async fn test_foreign_context_host_is_refused() {
        let (addr, hits) = file_host(64).await;
        let model = ScriptedModel::new(vec![]);
        let service = AssistantService::with_model(model.clone(), &AssistantConfig::default(), &media("localhost", 1024))
            .unwrap();

        for url in [
            format!("http://{}/raw/notes.pdf", addr),
            "http://169.254.169.254/latest/meta-data".to_string(),
            "file:///etc/passwd".to_string(),
            "not a url".to_string(),
        ] {
            let mut req = request();
            req.context_file_url = Some(url);
            let err = service.answer(req).await.unwrap_err();
            assert!(ChatReply::failure(&err).text.starts_with("Connection Failed"));
        }

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(model.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_from_delivery_host_is_inlined() {
        let (addr, hits) = file_host(64).await;
        let model = ScriptedModel::new(vec![]);
        let service = AssistantService::with_model(model.clone(), &AssistantConfig::default(), &media("localhost", 1024))
            .unwrap();

        let mut req = request();
        req.context_file_url = Some(format!("http://localhost:{}/raw/notes.pdf", addr.port()));
        service.answer(req).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(has_inline(&model.calls.lock().unwrap()[0].1));
    }

    #[tokio::test]
    async fn test_oversized_context_is_dropped() {
        let (addr, hits) = file_host(64).await;
        let model = ScriptedModel::new(vec![]);
        let service = AssistantService::with_model(model.clone(), &AssistantConfig::default(), &media("localhost", 16))
            .unwrap();

        let mut req = request();
        req.context_file_url = Some(format!("http://localhost:{}/raw/notes.pdf", addr.port()));
        let reply = service.answer(req).await.unwrap();

        assert_eq!(reply.text, "answer from gemini-flash-latest");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!has_inline(&model.calls.lock().unwrap()[0].1));
    }

    #[test]
    fn test_context_mime() {
        assert_eq!(context_mime("https://cdn/x.pdf", None), "application/pdf");
        assert_eq!(context_mime("https://cdn/x", Some("pdf")), "application/pdf");
        assert_eq!(context_mime("https://cdn/x.png", Some("image")), "image/jpeg");
    }

    #[test]
    fn test_request_wire_shape() {
        let json = serde_json::json!({
            "message": "hi",
            "history": [{"role": "user", "text": "hello"}],
            "contextFileUrl": "https://cdn/x.pdf",
            "resourceList": []
        });
        let req: ChatRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.context_file_url.as_deref(), Some("https://cdn/x.pdf"));
        assert_eq!(req.history[0].role, ChatRole::User);
    }
}
