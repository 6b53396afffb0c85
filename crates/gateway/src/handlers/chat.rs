//! Assistant chat endpoint
//!
//! Failures are answered with HTTP 500 and a displayable `text` body so the
//! client can show them in the conversation.

use axum::{extract::State, http::StatusCode, Json};
use studyvault_common::assistant::{ChatReply, ChatRequest};
use tracing::warn;

use crate::AppState;

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> (StatusCode, Json<ChatReply>) {
    match state.assistant.answer(request).await {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => {
            warn!(error = %e, "Chat request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ChatReply::failure(&e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::create_router;
    use crate::tests::{body_json, test_state};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_missing_key_is_a_displayable_failure() {
        let (state, _store) = test_state();
        let response = create_router(state)
            .oneshot(
                Request::post("/api/chat")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"message":"What is a B-tree?","history":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert!(json["text"].as_str().unwrap().contains("API key is missing"));
    }
}
