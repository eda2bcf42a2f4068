//! POST /chat/completions — the OpenAI-compatible endpoint. Requests are
//! adapted into the Anthropic shape, run through the same pipeline, and the
//! results folded back into chat.completion objects or chunk streams.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gravity_core::GravityError;
use gravity_wire::openai::{
    from_messages_response, to_messages_request, OpenAiRequest, OpenAiStreamAdapter,
};
use gravity_wire::request::build_vendor_request;
use gravity_wire::stream::AnthropicEvent;

use crate::app::AppState;
use crate::history::RequestRecord;
use crate::http::{drive_stream, fetch_complete};

fn openai_error(e: &GravityError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({
            "error": {
                "message": e.to_string(),
                "type": e.kind(),
            },
        })),
    )
        .into_response()
}

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let started = Instant::now();

    if state.pool.is_all_rate_limited().await {
        state.pool.reset_all_rate_limits().await;
    }

    let openai_req: OpenAiRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            return openai_error(&GravityError::BadRequest(format!("invalid request: {e}")))
        }
    };

    let req = match to_messages_request(&openai_req) {
        Ok(req) => req,
        Err(e) => return openai_error(&e),
    };
    let built = match build_vendor_request(&req, &state.signatures) {
        Ok(built) => built,
        Err(e) => return openai_error(&e),
    };

    info!(
        model = %openai_req.model,
        family = built.family.as_str(),
        stream = openai_req.stream,
        "openai request"
    );

    state.throttle.wait(built.family).await;

    if openai_req.stream {
        let (tx, mut rx) = mpsc::channel::<AnthropicEvent>(64);
        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();

        {
            let state = state.clone();
            let built = built.clone();
            let model = openai_req.model.clone();
            tokio::spawn(async move {
                drive_stream(state, built, model, cancel, tx).await;
            });
        }

        state.history.record(RequestRecord {
            at: Utc::now(),
            model: openai_req.model.clone(),
            family: built.family.as_str(),
            status: 200,
            duration_ms: started.elapsed().as_millis() as u64,
            stream: true,
        });

        let mut adapter = OpenAiStreamAdapter::new(&openai_req.model);
        let stream = async_stream::stream! {
            let _guard = guard;
            while let Some(event) = rx.recv().await {
                if event.name == "error" {
                    yield Ok::<Event, Infallible>(
                        Event::default().data(json!({"error": event.data["error"]}).to_string()),
                    );
                    continue;
                }
                if let Some(chunk) = adapter.on_event(&event) {
                    yield Ok::<Event, Infallible>(Event::default().data(chunk.to_string()));
                }
            }
            yield Ok::<Event, Infallible>(Event::default().data("[DONE]"));
        };

        Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
    } else {
        match fetch_complete(&state, &built, &openai_req.model).await {
            Ok(resp) => {
                state.history.record(RequestRecord {
                    at: Utc::now(),
                    model: openai_req.model.clone(),
                    family: built.family.as_str(),
                    status: 200,
                    duration_ms: started.elapsed().as_millis() as u64,
                    stream: false,
                });
                Json(from_messages_response(&resp)).into_response()
            }
            Err(e) => {
                state.history.record(RequestRecord {
                    at: Utc::now(),
                    model: openai_req.model.clone(),
                    family: built.family.as_str(),
                    status: e.http_status(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    stream: false,
                });
                openai_error(&e)
            }
        }
    }
}
