// End-to-end adapter scenarios: client request in, upstream payload out,
// upstream chunks in, client events out. These pin the wire behavior that
// downstream clients depend on.

use std::sync::Arc;

use serde_json::json;

use gravity_wire::blocks::MessagesRequest;
use gravity_wire::openai::{to_messages_request, OpenAiRequest, OpenAiStreamAdapter};
use gravity_wire::request::build_vendor_request;
use gravity_wire::stream::{parse_vendor_sse_line, StreamTranslator};
use gravity_wire::{ModelFamily, SignatureCache};

fn messages_request(v: serde_json::Value) -> MessagesRequest {
    serde_json::from_value(v).unwrap()
}

#[test]
fn prefixed_gemini_request_normalizes_and_enables_thinking() {
    let req = messages_request(json!({
        "model": "antigravity-gemini-3-flash",
        "max_tokens": 512,
        "messages": [{"role": "user", "content": "hi"}]
    }));
    let built = build_vendor_request(&req, &SignatureCache::new()).unwrap();

    assert_eq!(built.model, "gemini-3-flash");
    assert_eq!(built.family, ModelFamily::Gemini);
    assert!(built.thinking);
    assert_eq!(
        built.payload["generationConfig"]["thinkingConfig"]["includeThoughts"],
        true
    );
    assert_eq!(built.payload["contents"][0]["role"], "user");
    assert_eq!(built.payload["contents"][0]["parts"][0]["text"], "hi");
}

#[test]
fn orphan_tool_result_converts_to_placeholder_message() {
    // A tool_result that references an id no assistant turn ever produced
    // cannot be named, so the message converts to a single empty text part.
    let req = messages_request(json!({
        "model": "gemini-3-flash",
        "max_tokens": 100,
        "messages": [
            {"role": "user", "content": "hi"},
            {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "t1", "content": "lost"}
            ]}
        ]
    }));
    let built = build_vendor_request(&req, &SignatureCache::new()).unwrap();
    let parts = built.payload["contents"][1]["parts"].as_array().unwrap();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0], json!({"text": ""}));
}

#[test]
fn streamed_tool_call_keeps_id_and_populates_signature_cache() {
    let cache = Arc::new(SignatureCache::new());
    let mut translator =
        StreamTranslator::new("gemini-3-flash", ModelFamily::Gemini, cache.clone());
    let sig = "s".repeat(60);

    let line = format!(
        r#"data: {{"response": {{"candidates": [{{"content": {{"parts": [{{"functionCall": {{"name": "probe", "args": {{"q": "x"}}, "id": "abc"}}, "thoughtSignature": "{sig}"}}]}}, "finishReason": "STOP"}}]}}}}"#
    );
    let chunk = parse_vendor_sse_line(&line).unwrap();
    let mut events = translator.on_chunk(&chunk);
    events.extend(translator.finish());

    let names: Vec<&str> = events.iter().map(|e| e.name).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop"
        ]
    );
    assert_eq!(events[1].data["content_block"]["id"], "abc");
    assert_eq!(events[4].data["delta"]["stop_reason"], "tool_use");
    assert_eq!(cache.get("abc"), Some(sig));
}

#[test]
fn openai_request_flows_through_the_anthropic_pipeline() {
    let openai: OpenAiRequest = serde_json::from_value(json!({
        "model": "antigravity-gemini-3-flash",
        "stream": true,
        "max_tokens": 256,
        "messages": [
            {"role": "system", "content": "be brief"},
            {"role": "user", "content": "hello"}
        ]
    }))
    .unwrap();

    let anthropic = to_messages_request(&openai).unwrap();
    let built = build_vendor_request(&anthropic, &SignatureCache::new()).unwrap();

    assert_eq!(
        built.payload["systemInstruction"]["parts"][0]["text"],
        "be brief"
    );
    assert_eq!(built.payload["contents"].as_array().unwrap().len(), 1);
}

#[test]
fn full_stream_round_trips_into_openai_chunks() {
    let cache = Arc::new(SignatureCache::new());
    let mut translator =
        StreamTranslator::new("gemini-3-flash", ModelFamily::Gemini, cache);
    let mut adapter = OpenAiStreamAdapter::new("gemini-3-flash");

    let chunks = [
        json!({"candidates": [{"content": {"parts": [{"text": "thinking...", "thought": true}]}}]}),
        json!({"candidates": [{"content": {"parts": [{"text": "Hello"}]}}]}),
        json!({"candidates": [{"content": {"parts": [{"text": " world"}]}, "finishReason": "STOP"}],
               "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2}}),
    ];

    let mut openai_chunks = Vec::new();
    for chunk in chunks {
        let parsed = serde_json::from_value(chunk).unwrap();
        for event in translator.on_chunk(&parsed) {
            if let Some(converted) = adapter.on_event(&event) {
                openai_chunks.push(converted);
            }
        }
    }
    for event in translator.finish() {
        if let Some(converted) = adapter.on_event(&event) {
            openai_chunks.push(converted);
        }
    }

    // role chunk, empty-content start chunk, two text deltas, finish, stop
    let texts: Vec<String> = openai_chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str().map(String::from))
        .collect();
    assert!(texts.concat().contains("Hello world"));

    let finish: Vec<&str> = openai_chunks
        .iter()
        .filter_map(|c| c["choices"][0]["finish_reason"].as_str())
        .collect();
    assert_eq!(finish, vec!["stop", "stop"]);
}
