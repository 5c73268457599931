use std::sync::Arc;

use serde_json::{json, Value};
use voice_agent::{
    email_registry, AppConfig, CapabilitySession, LocalSessionProvider, McpServer, SessionProvider,
};

fn server() -> McpServer {
    McpServer::new(email_registry(&AppConfig::default()))
}

async fn exchange(server: &McpServer, frame: Value) -> Value {
    let reply = server
        .handle_frame(&frame.to_string())
        .await
        .expect("request should be answered");
    serde_json::from_str(&reply).unwrap()
}

#[tokio::test]
async fn initialize_reports_protocol_and_capabilities() {
    let reply = exchange(
        &server(),
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {"name": "test", "version": "0"}
        }}),
    )
    .await;

    assert_eq!(reply["id"], 1);
    assert_eq!(reply["result"]["protocolVersion"], "2024-11-05");
    assert!(reply["result"]["capabilities"]["tools"].is_object());
    assert!(reply["result"]["capabilities"]["prompts"].is_object());
}

#[tokio::test]
async fn lists_email_tools_with_schemas() {
    let reply = exchange(
        &server(),
        json!({"jsonrpc": "2.0", "id": "t", "method": "tools/list"}),
    )
    .await;

    let tools = reply["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names, vec!["get_emails", "tts_instagram_audio"]);
    assert_eq!(tools[1]["inputSchema"]["required"], json!(["text"]));
}

#[tokio::test]
async fn summary_prompt_renders_timespan() {
    let reply = exchange(
        &server(),
        json!({"jsonrpc": "2.0", "id": 2, "method": "prompts/get", "params": {
            "name": "email_summary_format_prompt",
            "arguments": {"timespan": "the last 2 days"}
        }}),
    )
    .await;

    let message = &reply["result"]["messages"][0];
    assert_eq!(message["role"], "user");
    assert_eq!(message["content"]["type"], "text");
    assert!(message["content"]["text"].as_str().unwrap().contains("the last 2 days"));
}

#[tokio::test]
async fn unknown_methods_and_prompts_are_errors() {
    let server = server();
    let reply = exchange(&server, json!({"jsonrpc": "2.0", "id": 3, "method": "resources/list"})).await;
    assert_eq!(reply["error"]["code"], -32601);

    let reply = exchange(
        &server,
        json!({"jsonrpc": "2.0", "id": 4, "method": "prompts/get", "params": {"name": "nope"}}),
    )
    .await;
    assert_eq!(reply["error"]["code"], -32602);
}

#[tokio::test]
async fn malformed_frames_and_notifications() {
    let server = server();
    let reply: Value = serde_json::from_str(&server.handle_frame("{not json").await.unwrap()).unwrap();
    assert_eq!(reply["error"]["code"], -32700);
    assert!(reply["id"].is_null());

    let silent = server
        .handle_frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert!(silent.is_none());
}

#[tokio::test]
async fn tool_argument_errors_come_back_as_failures() {
    let provider = LocalSessionProvider::new(Arc::new(server()));
    let mut session = provider.open().await.unwrap();

    let outcome = session
        .call_tool("tts_instagram_audio", json!({"text": ""}))
        .await
        .unwrap();
    session.close().await.unwrap();

    assert!(outcome.is_failure());
    assert!(outcome.text().contains("`text` is required"));
}
