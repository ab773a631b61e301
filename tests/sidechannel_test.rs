use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use stitchchat::client::ChatClient;
use stitchchat::config::ClientConfig;
use stitchchat::net::{HttpClient, HttpRequest, HttpResponse, TransportEvent};
use stitchchat::transport::mock::{MockTransport, MockTransportFactory};
use stitchchat::types::{MessageKind, MessageStatus, Participants, Payload, SenderRole};
use tokio::sync::mpsc;

/// Records every request and 500s any URL containing a flagged fragment.
struct RestHttp {
    requests: Mutex<Vec<(String, String)>>,
    failing_fragment: Mutex<Option<String>>,
}

impl RestHttp {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            failing_fragment: Mutex::new(None),
        })
    }

    fn fail_calls_to(&self, fragment: &str) {
        *self.failing_fragment.lock().unwrap() = Some(fragment.to_string());
    }

    fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpClient for RestHttp {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((request.method.clone(), request.url.clone()));
        if request.url.contains("/messages") {
            return Ok(HttpResponse {
                status_code: 200,
                body: b"[]".to_vec(),
            });
        }
        let failing = self.failing_fragment.lock().unwrap().clone();
        if let Some(fragment) = failing {
            if request.url.contains(&fragment) {
                return Ok(HttpResponse {
                    status_code: 500,
                    body: b"{}".to_vec(),
                });
            }
        }
        Ok(HttpResponse {
            status_code: 200,
            body: b"{}".to_vec(),
        })
    }
}

async fn connect(
    http: Arc<RestHttp>,
) -> (
    Arc<ChatClient>,
    mpsc::Sender<TransportEvent>,
    Arc<MockTransport>,
) {
    let _ = env_logger::builder().is_test(true).try_init();
    let (factory, events) = MockTransportFactory::new();
    let transport = factory.transport();
    let config = ClientConfig {
        api_base_url: "http://backend.test".to_string(),
        upload_url: "http://backend.test/upload".to_string(),
        own_role: SenderRole::Creator,
        own_participant_id: Some("c1".to_string()),
        ..Default::default()
    };
    let client = ChatClient::connect(config, &factory, http)
        .await
        .expect("connect");
    client
        .open_conversation("conv-1", Participants::new("m1", "c1"))
        .await
        .expect("open conversation");
    (client, events, transport)
}

#[tokio::test]
async fn job_completion_posts_then_announces() {
    let http = RestHttp::new();
    let (client, _events, transport) = connect(Arc::clone(&http)).await;

    let cmid = client.complete_job("job-77").await.expect("complete job");

    let messages = client.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::ActionCompleted);
    assert_eq!(messages[0].status, MessageStatus::Pending);
    match &messages[0].data {
        Payload::Action(p) => assert_eq!(p.job_id.as_deref(), Some("job-77")),
        other => panic!("unexpected payload: {other:?}"),
    }

    assert!(
        http.requests()
            .iter()
            .any(|(method, url)| method == "POST" && url.ends_with("/jobs/job-77/complete"))
    );
    let emitted = transport.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["type"], json!("action.completed"));
    assert_eq!(emitted[0].1["clientMessageId"], json!(cmid));
}

#[tokio::test]
async fn escrow_failure_only_fails_the_triggering_message() {
    let http = RestHttp::new();
    http.fail_calls_to("/escrow");
    let (client, _events, transport) = connect(Arc::clone(&http)).await;

    let text_cmid = client.send_text("before", None).await.expect("send text");
    let escrow_cmid = client
        .create_escrow_payment("job-77", "120.00", "USDC")
        .await
        .expect("escrow call returns the attempt id");

    let messages = client.messages().await;
    assert_eq!(messages.len(), 2);
    let text = messages
        .iter()
        .find(|m| m.client_message_id.as_deref() == Some(text_cmid.as_str()))
        .unwrap();
    let escrow = messages
        .iter()
        .find(|m| m.client_message_id.as_deref() == Some(escrow_cmid.as_str()))
        .unwrap();

    assert_eq!(escrow.status, MessageStatus::Failed);
    assert_eq!(escrow.kind, MessageKind::EscrowPayment);
    assert_eq!(text.status, MessageStatus::Pending, "other messages untouched");

    // Only the text message reached the chat wire.
    let emitted = transport.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["type"], json!("user"));

    // A failed escrow action is retryable like any other failed message.
    let retried = client.retry(&escrow_cmid).await.expect("retry");
    assert_ne!(retried, escrow_cmid);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let messages = client.messages().await;
    let retried_msg = messages
        .iter()
        .find(|m| m.client_message_id.as_deref() == Some(retried.as_str()))
        .unwrap();
    assert_eq!(retried_msg.kind, MessageKind::EscrowPayment);
    assert_eq!(retried_msg.status, MessageStatus::Pending);
}

#[tokio::test]
async fn escrow_release_hits_the_release_endpoint() {
    let http = RestHttp::new();
    let (client, _events, transport) = connect(Arc::clone(&http)).await;

    client.release_escrow("job-77").await.expect("release");

    assert!(
        http.requests()
            .iter()
            .any(|(method, url)| method == "POST" && url.ends_with("/escrow/job-77/release"))
    );
    let emitted = transport.emitted();
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].1["type"], json!("escrow.release"));
    let messages = client.messages().await;
    assert_eq!(messages[0].kind, MessageKind::EscrowRelease);
}
