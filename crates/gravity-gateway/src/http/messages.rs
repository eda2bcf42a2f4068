//! POST /v1/messages — the Anthropic-compatible endpoint.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        AppendHeaders, IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use gravity_core::GravityError;
use gravity_wire::blocks::MessagesRequest;
use gravity_wire::request::build_vendor_request;
use gravity_wire::stream::AnthropicEvent;

use crate::app::AppState;
use crate::history::RequestRecord;
use crate::http::{drive_stream, error_response, fetch_complete};

pub async fn messages_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    let started = Instant::now();

    // Optimistic recovery: when every account is marked at entry, clear the
    // marks and let the upstream be the judge.
    if state.pool.is_all_rate_limited().await {
        state.pool.reset_all_rate_limits().await;
    }

    if !body.get("messages").map(Value::is_array).unwrap_or(false) {
        return error_response(&GravityError::BadRequest(
            "`messages` must be an array".into(),
        ));
    }
    let req: MessagesRequest = match serde_json::from_value(body) {
        Ok(req) => req,
        Err(e) => {
            return error_response(&GravityError::BadRequest(format!("invalid request: {e}")))
        }
    };

    let built = match build_vendor_request(&req, &state.signatures) {
        Ok(built) => built,
        Err(e) => return error_response(&e),
    };

    info!(
        model = %req.model,
        family = built.family.as_str(),
        stream = req.stream,
        "anthropic request"
    );

    state.throttle.wait(built.family).await;

    if req.stream {
        let (tx, mut rx) = mpsc::channel::<AnthropicEvent>(64);
        let cancel = CancellationToken::new();
        // Dropped with the response stream on client disconnect, aborting
        // the upstream read through the retry loop.
        let guard = cancel.clone().drop_guard();

        {
            let state = state.clone();
            let built = built.clone();
            let model = req.model.clone();
            tokio::spawn(async move {
                drive_stream(state, built, model, cancel, tx).await;
            });
        }

        state.history.record(RequestRecord {
            at: Utc::now(),
            model: req.model.clone(),
            family: built.family.as_str(),
            status: 200,
            duration_ms: started.elapsed().as_millis() as u64,
            stream: true,
        });

        let stream = async_stream::stream! {
            let _guard = guard;
            while let Some(event) = rx.recv().await {
                yield Ok::<Event, Infallible>(
                    Event::default().event(event.name).data(event.data.to_string()),
                );
            }
        };

        (
            AppendHeaders([
                (header::CACHE_CONTROL, "no-cache"),
                (header::HeaderName::from_static("x-accel-buffering"), "no"),
            ]),
            Sse::new(stream).keep_alive(KeepAlive::default()),
        )
            .into_response()
    } else {
        match fetch_complete(&state, &built, &req.model).await {
            Ok(resp) => {
                state.history.record(RequestRecord {
                    at: Utc::now(),
                    model: req.model.clone(),
                    family: built.family.as_str(),
                    status: 200,
                    duration_ms: started.elapsed().as_millis() as u64,
                    stream: false,
                });
                Json(resp).into_response()
            }
            Err(e) => {
                state.history.record(RequestRecord {
                    at: Utc::now(),
                    model: req.model.clone(),
                    family: built.family.as_str(),
                    status: e.http_status(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    stream: false,
                });
                error_response(&e)
            }
        }
    }
}
