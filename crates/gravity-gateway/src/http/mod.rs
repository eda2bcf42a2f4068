pub mod health;
pub mod messages;
pub mod models;
pub mod openai_compat;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use gravity_core::{GravityError, Result};
use gravity_upstream::client::pump_sse;
use gravity_upstream::UpstreamResponse;
use gravity_wire::blocks::MessagesResponse;
use gravity_wire::request::BuiltRequest;
use gravity_wire::response::convert_response;
use gravity_wire::stream::{AnthropicEvent, PartAggregator, StreamTranslator};

use crate::app::AppState;

pub(crate) fn error_body(e: &GravityError) -> Value {
    json!({
        "type": "error",
        "error": {
            "type": e.kind(),
            "message": e.to_string(),
        },
    })
}

pub(crate) fn error_response(e: &GravityError) -> Response {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error_body(e))).into_response()
}

/// Dispatch without streaming to the client, collecting the full Anthropic
/// response. Thinking models only answer over SSE, so that path aggregates
/// the stream back into one response object first.
pub(crate) async fn fetch_complete(
    state: &AppState,
    built: &BuiltRequest,
    client_model: &str,
) -> Result<MessagesResponse> {
    let cancel = CancellationToken::new();
    match state.upstream.dispatch(built, false, &cancel).await? {
        UpstreamResponse::Json(vendor) => Ok(convert_response(
            &vendor,
            client_model,
            built.family,
            &state.signatures,
        )),
        UpstreamResponse::Stream(resp) => {
            let (tx, mut rx) = mpsc::channel(64);
            tokio::spawn(pump_sse(resp, tx));
            let mut aggregator = PartAggregator::new();
            while let Some(chunk) = rx.recv().await {
                aggregator.push_chunk(&chunk);
            }
            let vendor = aggregator.into_response();
            Ok(convert_response(
                &vendor,
                client_model,
                built.family,
                &state.signatures,
            ))
        }
    }
}

/// Drive a streaming dispatch to completion, sending translated Anthropic
/// events down the channel. Errors become a terminal `error` event. Returns
/// once the upstream finishes or the receiver (client) goes away.
pub(crate) async fn drive_stream(
    state: Arc<AppState>,
    built: BuiltRequest,
    client_model: String,
    cancel: CancellationToken,
    tx: mpsc::Sender<AnthropicEvent>,
) {
    let mut translator =
        StreamTranslator::new(&client_model, built.family, state.signatures.clone());

    match state.upstream.dispatch(&built, true, &cancel).await {
        Ok(UpstreamResponse::Stream(resp)) => {
            let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
            tokio::spawn(pump_sse(resp, chunk_tx));
            while let Some(chunk) = chunk_rx.recv().await {
                for event in translator.on_chunk(&chunk) {
                    if tx.send(event).await.is_err() {
                        return; // client disconnected
                    }
                }
            }
            for event in translator.finish() {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        // Streaming requests go out as SSE, but translate a plain JSON
        // answer anyway should the upstream produce one.
        Ok(UpstreamResponse::Json(vendor)) => {
            let mut events = translator.on_chunk(&vendor);
            events.extend(translator.finish());
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "streaming dispatch failed");
            let _ = tx
                .send(AnthropicEvent {
                    name: "error",
                    data: error_body(&e),
                })
                .await;
        }
    }
}
