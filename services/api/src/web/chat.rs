//! services/api/src/web/chat.rs
//!
//! The chat endpoint. Replies either as one JSON body or, when `stream` is
//! set, as server-sent events carrying `{chunk, done}` frames.

use crate::error::ApiError;
use crate::web::middleware::AuthenticatedAccount;
use crate::web::state::AppState;
use axum::{
    extract::{Extension, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chat_core::ChatEvent;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ChatResponse {
    #[serde(rename = "response")]
    pub reply: String,
}

/// One SSE frame. Partial chunks have `done: false`; the final frame carries
/// either the full reply or the error text.
#[derive(Debug, Serialize, PartialEq)]
pub struct StreamFrame {
    pub chunk: String,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ChatEvent> for StreamFrame {
    fn from(event: ChatEvent) -> Self {
        match event {
            ChatEvent::Chunk(chunk) => Self {
                chunk,
                done: false,
                full_response: None,
                error: None,
            },
            ChatEvent::Done { full_response } => Self {
                chunk: String::new(),
                done: true,
                full_response: Some(full_response),
                error: None,
            },
            ChatEvent::Failed { message } => Self {
                chunk: String::new(),
                done: true,
                full_response: None,
                error: Some(message),
            },
        }
    }
}

/// Send a message to the active session.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "The reply, as JSON or as an event stream", body = ChatResponse),
        (status = 400, description = "Empty message")
    )
)]
pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Extension(AuthenticatedAccount(account)): Extension<AuthenticatedAccount>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    if !req.stream {
        let reply = state.chat.reply(&account, &req.message).await?;
        return Ok(Json(ChatResponse { reply }).into_response());
    }

    let mut replies = state.chat.reply_streaming(&account, &req.message).await?;
    // Dropping this stream on disconnect drops `replies`, which stops the producer.
    let frames = async_stream::stream! {
        while let Some(event) = replies.next().await {
            yield Event::default().json_data(StreamFrame::from(event));
        }
    };
    Ok(Sse::new(frames)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frames_match_wire_shape() {
        assert_eq!(
            serde_json::to_value(StreamFrame::from(ChatEvent::Chunk("Hel".into()))).unwrap(),
            json!({"chunk": "Hel", "done": false})
        );
        assert_eq!(
            serde_json::to_value(StreamFrame::from(ChatEvent::Done {
                full_response: "Hello".into()
            }))
            .unwrap(),
            json!({"chunk": "", "done": true, "full_response": "Hello"})
        );
        assert_eq!(
            serde_json::to_value(StreamFrame::from(ChatEvent::Failed {
                message: "down".into()
            }))
            .unwrap(),
            json!({"chunk": "", "done": true, "error": "down"})
        );
    }
}
