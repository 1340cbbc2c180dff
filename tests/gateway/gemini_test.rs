//! Gemini adapter wire format tests, including deterministic tool-call ids.

use opsgate::cost::{CostEstimator, PricingTable};
use opsgate::providers::gemini::{
    build_payload, normalize_tool_calls, parse_response, usage_from_payload,
};
use opsgate::types::{ContentPart, Message, MessageContent, Role};
use serde_json::json;

use crate::support::user_request;

fn estimator() -> CostEstimator {
    CostEstimator::new(&PricingTable::new())
}

#[test]
fn assistant_role_renames_to_model() {
    let mut req = user_request("hello");
    req.messages.push(Message::text(Role::Assistant, "hi there"));
    req.messages.push(Message::text(Role::Tool, "result"));

    let payload = build_payload(&req);
    let contents = payload["contents"].as_array().expect("contents array");
    assert_eq!(contents[0]["role"], "user");
    assert_eq!(contents[1]["role"], "model");
    // Roles without a Gemini analog flatten to user.
    assert_eq!(contents[2]["role"], "user");
}

#[test]
fn image_parts_map_to_file_data_blocks() {
    let mut req = user_request("unused");
    req.messages = vec![Message {
        role: Role::User,
        content: MessageContent::Parts(vec![
            ContentPart::Text {
                text: "describe".to_owned(),
            },
            ContentPart::ImageUrl {
                image_url: "https://example.com/x.png".to_owned(),
            },
        ]),
        name: None,
        tool_call_id: None,
    }];

    let payload = build_payload(&req);
    let parts = payload["contents"][0]["parts"]
        .as_array()
        .expect("parts array");
    assert_eq!(parts[0]["text"], "describe");
    assert_eq!(parts[1]["fileData"]["fileUri"], "https://example.com/x.png");
}

#[test]
fn generation_config_carries_sampling_and_caps() {
    let mut req = user_request("hello");
    req.temperature = Some(0.7);
    req.top_p = Some(0.9);
    req.max_output_tokens = Some(128);

    let payload = build_payload(&req);
    let config = &payload["generationConfig"];
    assert_eq!(config["temperature"], json!(0.7f32));
    assert_eq!(config["topP"], json!(0.9f32));
    assert_eq!(config["maxOutputTokens"], 128);
}

#[test]
fn function_calls_normalize_with_synthesized_ids() {
    let calls = normalize_tool_calls(&[
        json!({"text": "let me check"}),
        json!({"functionCall": {"name": "lookup", "args": {"id": 3}}}),
    ]);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "lookup");
    assert_eq!(calls[0].arguments, json!({"id": 3}));
    assert!(calls[0].id.starts_with("gemini_tool_"));
}

#[test]
fn synthesized_ids_are_deterministic_across_runs() {
    let shape_a = normalize_tool_calls(&[json!({
        "functionCall": {"name": "lookup", "args": {"id": 1, "q": "x"}}
    })]);
    let shape_b = normalize_tool_calls(&[json!({
        "functionCall": {"name": "lookup", "args": {"q": "x", "id": 1}}
    })]);
    assert_eq!(shape_a[0].id, shape_b[0].id);

    let different = normalize_tool_calls(&[json!({
        "functionCall": {"name": "lookup", "args": {"id": 2}}
    })]);
    assert_ne!(shape_a[0].id, different[0].id);
}

#[test]
fn usage_reads_camel_case_fields_and_clamps_total() {
    let usage = usage_from_payload(
        &json!({"promptTokenCount": 8, "candidatesTokenCount": 6, "totalTokenCount": 14}),
        5,
        "gemini-2.0-flash",
        &estimator(),
    );
    assert_eq!(usage.input_tokens, 8);
    assert_eq!(usage.output_tokens, 6);
    assert_eq!(usage.total_tokens, 14);

    let clamped = usage_from_payload(
        &json!({"promptTokenCount": 8, "candidatesTokenCount": 6, "totalTokenCount": 2}),
        5,
        "gemini-2.0-flash",
        &estimator(),
    );
    assert_eq!(clamped.total_tokens, 14);
}

#[test]
fn parse_response_reads_first_candidate() {
    let data = json!({
        "candidates": [{
            "content": {"parts": [
                {"text": "Hello"},
                {"functionCall": {"name": "lookup", "args": {"id": 1}}}
            ]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2}
    });
    let res = parse_response("r1", "gemini-2.0-flash", 9, &data, &estimator(), false);
    assert_eq!(res.provider, "gemini");
    assert_eq!(res.output_text, "Hello");
    assert_eq!(res.finish_reason, "STOP");
    assert_eq!(res.tool_calls.len(), 1);
    assert_eq!(res.usage.total_tokens, 5);
}

#[test]
fn empty_candidates_yield_an_empty_response() {
    let data = json!({"candidates": []});
    let res = parse_response("r1", "gemini-2.0-flash", 0, &data, &estimator(), false);
    assert_eq!(res.output_text, "");
    assert!(res.tool_calls.is_empty());
    assert_eq!(res.usage.total_tokens, 0);
}
