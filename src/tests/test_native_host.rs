// src/tests/test_native_host.rs

use super::fixtures::{SAMPLE_POLICY, TestAgent};
use crate::native_host::{
    MAX_DOMAINS, MAX_MESSAGE_BYTES, NativeHost, read_message, sanitize_domains, write_message,
};
use serde_json::{Value, json};
use std::fs;

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_ne_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

async fn decode_all(mut bytes: &[u8]) -> Vec<Value> {
    let mut out = Vec::new();
    while let Some(value) = read_message(&mut bytes).await.unwrap() {
        out.push(value);
    }
    out
}

fn host_with_cache(agent: &TestAgent) -> NativeHost {
    fs::write(agent.ctx.config.policy_cache_file(), SAMPLE_POLICY).unwrap();
    NativeHost::new(agent.ctx.clone(), None)
}

#[tokio::test]
async fn test_framing_round_trip() {
    let mut buffer = Vec::new();
    write_message(&mut buffer, &json!({"action": "ping"})).await.unwrap();
    assert_eq!(&buffer[..4], &(buffer.len() as u32 - 4).to_ne_bytes());

    let messages = decode_all(&buffer).await;
    assert_eq!(messages, vec![json!({"action": "ping"})]);
}

#[tokio::test]
async fn test_oversize_frame_is_rejected() {
    let prefix = ((MAX_MESSAGE_BYTES + 1) as u32).to_ne_bytes();
    let mut reader: &[u8] = &prefix;
    assert!(read_message(&mut reader).await.is_err());
}

#[tokio::test]
async fn test_session_answers_every_frame() {
    let agent = TestAgent::new();
    let host = host_with_cache(&agent);

    let mut input = frame(br#"{"action":"ping"}"#);
    input.extend(frame(b"not json"));
    input.extend(frame(br#"{"action":"reboot"}"#));
    let mut reader: &[u8] = &input;
    let mut output = Vec::new();
    host.serve(&mut reader, &mut output).await.unwrap();

    let replies = decode_all(&output).await;
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["message"], "pong");
    assert_eq!(replies[1]["error"], "Invalid message format");
    assert_eq!(replies[2]["error"], "Unknown action: reboot");
}

#[tokio::test]
async fn test_check_reports_policy_and_resolution() {
    let agent = TestAgent::new();
    let host = host_with_cache(&agent);

    let reply = host
        .handle(&json!({
            "action": "check",
            "domains": [" WWW.Example.com ", "ads.example.com", "evil.org; rm -rf /", 42]
        }))
        .await;

    assert_eq!(reply["success"], true);
    let results = reply["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["domain"], "www.example.com");
    assert_eq!(results[0]["in_whitelist"], true);
    assert_eq!(results[0]["resolves"], true);
    assert_eq!(results[0]["resolved_ip"], "93.184.216.34");
    assert_eq!(results[1]["in_whitelist"], false);
}

#[tokio::test]
async fn test_check_without_domains() {
    let agent = TestAgent::new();
    let host = host_with_cache(&agent);
    let reply = host.handle(&json!({"action": "check", "domains": []})).await;
    assert_eq!(reply, json!({"success": false, "error": "No domains provided"}));
}

#[tokio::test]
async fn test_list_status_and_update_without_updater() {
    let agent = TestAgent::new();
    let host = host_with_cache(&agent);

    let list = host.handle(&json!({"action": "list"})).await;
    assert_eq!(list["domains"], json!(["example.com", "google.com"]));

    let status = host.handle(&json!({"action": "status"})).await;
    assert_eq!(status["status"]["state"], "FAIL_OPEN");
    assert_eq!(status["status"]["active"], false);

    let update = host.handle(&json!({"action": "update-whitelist"})).await;
    assert_eq!(update["success"], false);
}

#[test]
fn test_sanitize_caps_domain_count() {
    let raw: Vec<Value> = (0..MAX_DOMAINS + 10)
        .map(|i| Value::String(format!("host{}.example.com", i)))
        .collect();
    let domains = sanitize_domains(&raw);
    assert_eq!(domains.len(), MAX_DOMAINS);
    assert_eq!(domains[0], "host0.example.com");
}
