//! Integration tests for the human-in-the-loop approval flow across the
//! gateway, broker, brain, and executor.

mod common;

use std::time::Duration;

use tempfile::TempDir;

use common::{test_config, RecordingSink, ScriptedBackend};
use vigil::agent::{Gateway, RequestMode};
use vigil::approval::ApprovalState;
use vigil::types::{ClientEvent, GatewayEvent, SessionId};

#[tokio::test]
async fn approved_write_executes_and_grants_trust() {
    let workspace = TempDir::new().unwrap();
    let target = workspace.path().join("out.txt");
    let backend = ScriptedBackend::new();
    backend.push_tool_call(
        "toolu_w",
        "write_file",
        serde_json::json!({"path": target.to_str().unwrap(), "content": "approved content"}),
    );
    backend.push_text("File written.");

    let sink = RecordingSink::new();
    let gateway = std::sync::Arc::new(
        Gateway::with_backend(test_config(workspace.path()), sink.clone(), backend).unwrap(),
    );

    // Resolve the approval as soon as it shows up, granting 10 minutes of
    // trust.
    let resolver = {
        let gateway = gateway.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let pending = gateway.approvals().list_pending();
                if let Some(request) = pending.first() {
                    gateway.handle_client_event(ClientEvent::ApprovalResponse {
                        approval_id: request.id.to_string(),
                        approved: true,
                        trust_minutes: Some(10),
                    });
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            false
        })
    };

    let reply = gateway
        .handle(&SessionId::new("sess_ok"), "write the file", RequestMode::Chat)
        .await
        .unwrap();
    assert!(resolver.await.unwrap(), "an approval request appeared");
    assert_eq!(reply, "File written.");
    assert_eq!(
        std::fs::read_to_string(&target).unwrap(),
        "approved content"
    );

    // The decision landed in history and on the event stream.
    let history = gateway.approvals().history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ApprovalState::Approved);
    let frames = sink.frames();
    assert!(frames
        .iter()
        .any(|f| matches!(f, GatewayEvent::ApprovalRequest { tool_name, .. } if tool_name == "write_file")));
    assert!(frames
        .iter()
        .any(|f| matches!(f, GatewayEvent::ApprovalResolved { approved: true, .. })));

    // The trust grant covers the follow-up write with no new prompt.
    assert_eq!(gateway.approvals().list_trusted().len(), 1);
    let decision = gateway.approvals().check(
        "write_file",
        "builtin",
        &serde_json::json!({"path": target.to_str().unwrap()}),
    );
    assert!(matches!(
        decision,
        vigil::approval::Decision::AutoAllow { reason: "trusted" }
    ));
}

#[tokio::test]
async fn approval_timeout_yields_denial_and_apology_turn() {
    let workspace = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    backend.push_tool_call(
        "toolu_t",
        "write_file",
        serde_json::json!({"path": workspace.path().join("x.txt").to_str().unwrap(),
                           "content": "never"}),
    );
    backend.push_text("I could not get approval to write the file, sorry.");

    let mut config = test_config(workspace.path());
    config.approval.timeout_secs = 0;
    let gateway =
        Gateway::with_backend(config, RecordingSink::new(), backend.clone()).unwrap();

    let reply = gateway
        .handle(&SessionId::new("sess_to"), "write it", RequestMode::Chat)
        .await
        .unwrap();
    assert!(reply.contains("could not"));

    // Nothing was written.
    assert!(!workspace.path().join("x.txt").exists());

    // The model saw a synthetic denied result for the same call id.
    let requests = backend.requests();
    let followup = &requests[1].1.messages;
    let tool_msg = followup
        .iter()
        .find(|m| m.tool_call_id.is_some())
        .expect("synthetic tool result present");
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("toolu_t"));
    assert!(tool_msg.is_error);
    assert!(tool_msg.content.contains("denied"));

    // The request resolved exactly once, to timeout.
    let history = gateway.approvals().history(10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ApprovalState::Timeout);
}

#[tokio::test]
async fn safe_tool_never_prompts() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("notes.txt"), "hello").unwrap();
    let backend = ScriptedBackend::new();
    backend.push_tool_call(
        "toolu_r",
        "read_file",
        serde_json::json!({"path": workspace.path().join("notes.txt").to_str().unwrap()}),
    );
    backend.push_text("The note says hello.");

    let sink = RecordingSink::new();
    let gateway =
        Gateway::with_backend(test_config(workspace.path()), sink.clone(), backend).unwrap();

    let reply = gateway
        .handle(&SessionId::new("sess_safe"), "read my notes", RequestMode::Chat)
        .await
        .unwrap();
    assert_eq!(reply, "The note says hello.");

    assert!(gateway.approvals().history(10).is_empty());
    assert!(!sink
        .frames()
        .iter()
        .any(|f| matches!(f, GatewayEvent::ApprovalRequest { .. })));
}
