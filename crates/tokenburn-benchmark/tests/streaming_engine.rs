use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use tokenburn_benchmark::{
    BenchmarkEvent, BenchmarkRunner, ChatClient, Cooldown, MeasurementEngine, Recorder, RunControls,
    StreamObserver,
};
use tokenburn_core::{
    OutcomeStatus, PromptCase, PromptOutcome, Result, SessionMeta, TokenBurnConfig, TokenBurnError,
    TokenSource,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

enum Reply {
    Sse(String),
    Status(u16, String),
    /// Sends the given events, then drops the connection mid-body.
    Broken(String),
}

#[derive(Clone, Default)]
struct MockServer {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockServer {
    fn reply(&self, reply: Reply) -> &Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["messages"][0]["content"].as_str().unwrap().to_string())
            .collect()
    }

    async fn start(&self) -> TokenBurnConfig {
        let app = Router::new()
            .route("/v1/chat/completions", post(chat))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let mut config = TokenBurnConfig::default();
        config.endpoint.base_url = format!("http://{}/v1/", addr);
        config.run.system_prompts = ["A".to_string(), "B".to_string()];
        config
    }
}

async fn chat(State(server): State<MockServer>, Json(body): Json<Value>) -> Response {
    server.requests.lock().unwrap().push(body);
    let reply = server
        .replies
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or_else(|| Reply::Sse(sse(&["ok"], None)));

    match reply {
        Reply::Sse(body) => ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response(),
        Reply::Status(code, body) => (StatusCode::from_u16(code).unwrap(), body).into_response(),
        Reply::Broken(head) => {
            let parts = vec![
                Ok(Bytes::from(head)),
                Err(std::io::Error::other("connection reset")),
            ];
            let body = futures::stream::iter(parts).then(|part| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                part
            });
            ([(header::CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
        }
    }
}

fn sse(contents: &[&str], usage: Option<(u32, u32)>) -> String {
    let mut body = String::from(": ping\n\n");
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"role": "assistant"}, "finish_reason": null}]})
    ));
    for content in contents {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": content}, "finish_reason": null}]})
        ));
    }
    if let Some((prompt, completion)) = usage {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [], "usage": {"prompt_tokens": prompt, "completion_tokens": completion}})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn engine(config: &TokenBurnConfig) -> MeasurementEngine {
    let client = ChatClient::new(&config.endpoint).unwrap();
    MeasurementEngine::new(client, "test-model", config)
}

#[derive(Clone, Default)]
struct Collected(Arc<Mutex<Vec<PromptOutcome>>>);

impl Recorder for Collected {
    fn record(&mut self, outcome: &PromptOutcome) -> Result<()> {
        self.0.lock().unwrap().push(outcome.clone());
        Ok(())
    }
}

fn cases(n: usize) -> Vec<PromptCase> {
    PromptCase::numbered((1..=n).map(|i| format!("prompt number {}", i)).collect())
}

#[tokio::test]
async fn test_reported_usage_is_used() {
    let server = MockServer::default();
    server.reply(Reply::Sse(sse(&["Hello", " world"], Some((100, 50)))));
    let config = server.start().await;

    let m = engine(&config).measure("some prompt", true).await.unwrap();
    assert_eq!(m.prompt_tokens, 100);
    assert_eq!(m.completion_tokens, 50);
    assert_eq!(m.token_source, TokenSource::Reported);
    assert!(m.time_to_first_token <= m.total_duration);
    assert!(m.prompt_speed > 0.0);

    let request = server.requests.lock().unwrap()[0].clone();
    assert_eq!(request["stream"], true);
    assert_eq!(request["stream_options"]["include_usage"], true);
    assert_eq!(request["model"], "test-model");
    assert_eq!(request["max_tokens"], 2000);
}

#[tokio::test]
async fn test_missing_usage_falls_back_to_word_counts() {
    let server = MockServer::default();
    server.reply(Reply::Sse(sse(
        &[
            "one two three ",
            "four five six seven ",
            "eight nine ten eleven twelve ",
            "thirteen fourteen fifteen",
        ],
        None,
    )));
    let config = server.start().await;

    let prompt: Vec<String> = (1..=20).map(|i| format!("word{}", i)).collect();
    let m = engine(&config).measure(&prompt.join(" "), true).await.unwrap();
    assert_eq!(m.prompt_tokens, 20);
    assert_eq!(m.completion_tokens, 15);
    assert_eq!(m.token_source, TokenSource::Estimated);
}

#[tokio::test]
async fn test_error_status_is_api_error() {
    let server = MockServer::default();
    server.reply(Reply::Status(500, "model exploded".to_string()));
    let config = server.start().await;

    let err = engine(&config).measure("hi", true).await.unwrap_err();
    match err {
        TokenBurnError::Api { status, body } => {
            assert_eq!(status, 500);
            assert!(body.contains("model exploded"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_malformed_and_in_stream_errors() {
    let server = MockServer::default();
    server
        .reply(Reply::Sse("data: {not json\n\n".to_string()))
        .reply(Reply::Sse(format!(
            "data: {}\n\n",
            json!({"error": {"message": "out of memory"}})
        )));
    let config = server.start().await;
    let mut engine = engine(&config);

    assert!(matches!(
        engine.measure("hi", true).await,
        Err(TokenBurnError::Protocol(_))
    ));
    let err = engine.measure("hi", true).await.unwrap_err();
    assert!(err.to_string().contains("out of memory"));
}

#[tokio::test]
async fn test_multiline_event_data_is_joined() {
    let server = MockServer::default();
    server.reply(Reply::Sse(
        "data: {\"choices\":\ndata: [{\"delta\":{\"content\":\"hi there\"}}]}\n\ndata: [DONE]\n\n"
            .to_string(),
    ));
    let config = server.start().await;

    let m = engine(&config).measure("hi", true).await.unwrap();
    assert_eq!(m.completion_tokens, 2);
    assert_eq!(m.token_source, TokenSource::Estimated);
}

#[tokio::test]
async fn test_stream_cut_mid_body_is_http_error() {
    let server = MockServer::default();
    server.reply(Reply::Broken(format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": "partial"}}]})
    )));
    let config = server.start().await;

    let err = engine(&config).measure("hi", true).await.unwrap_err();
    match err {
        TokenBurnError::Http(message) => assert!(message.contains("stream interrupted"), "{}", message),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_stream_without_done_ends_at_eof() {
    let server = MockServer::default();
    server.reply(Reply::Sse(format!(
        "data: {}\n\n",
        json!({"choices": [{"delta": {"content": "a b c"}}]})
    )));
    let config = server.start().await;

    let m = engine(&config).measure("hi", true).await.unwrap();
    assert_eq!(m.completion_tokens, 3);
}

#[tokio::test]
async fn test_failed_prompt_does_not_stop_run() {
    let server = MockServer::default();
    server
        .reply(Reply::Sse(sse(&["warm"], None)))
        .reply(Reply::Sse(sse(&["first"], Some((3, 1)))))
        .reply(Reply::Status(503, "busy".to_string()))
        .reply(Reply::Sse(sse(&["third"], Some((3, 1)))));
    let config = server.start().await;

    let collected = Collected::default();
    let mut recorder = collected.clone();
    let mut runner = BenchmarkRunner::new(engine(&config), Cooldown::from_secs(0));
    let meta = SessionMeta::new("RTX", "test-model", &config.endpoint.base_url, "now");

    let session = runner
        .run(meta, &cases(3), &mut recorder, &RunControls::default())
        .await
        .unwrap();

    let statuses: Vec<OutcomeStatus> = session.outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![OutcomeStatus::Success, OutcomeStatus::Failed, OutcomeStatus::Success]
    );
    assert!(session.outcomes[1].error.as_deref().unwrap().contains("503"));
    assert_eq!(session.summary.succeeded, 2);
    assert_eq!(session.summary.failed, 1);
    assert!(!session.summary.cancelled);
    assert_eq!(collected.0.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_system_prompts_alternate_after_fixed_warmup() {
    let server = MockServer::default();
    let config = server.start().await;

    let mut runner = BenchmarkRunner::new(engine(&config), Cooldown::from_secs(0));
    let meta = SessionMeta::new("RTX", "test-model", &config.endpoint.base_url, "now");
    runner
        .run(meta, &cases(4), &mut Collected::default(), &RunControls::default())
        .await
        .unwrap();

    assert_eq!(
        server.system_prompts(),
        vec!["Act as a system admin.", "A", "B", "A", "B"]
    );
    let warmup_user = server.requests.lock().unwrap()[0]["messages"][1]["content"].clone();
    assert_eq!(warmup_user, "This is test.");
}

#[tokio::test]
async fn test_warmup_failure_is_not_fatal() {
    let server = MockServer::default();
    server.reply(Reply::Status(500, "cold".to_string()));
    let config = server.start().await;

    let mut runner = BenchmarkRunner::new(engine(&config), Cooldown::from_secs(0));
    let meta = SessionMeta::new("RTX", "test-model", &config.endpoint.base_url, "now");
    let session = runner
        .run(meta, &cases(1), &mut Collected::default(), &RunControls::default())
        .await
        .unwrap();
    assert_eq!(session.summary.succeeded, 1);
}

#[tokio::test]
async fn test_quit_before_start_measures_nothing() {
    let server = MockServer::default();
    let config = server.start().await;

    let quit = CancellationToken::new();
    quit.cancel();
    let mut runner = BenchmarkRunner::new(engine(&config), Cooldown::from_secs(10));
    let meta = SessionMeta::new("RTX", "test-model", &config.endpoint.base_url, "now");
    let session = runner
        .run(meta, &cases(3), &mut Collected::default(), &RunControls::new(quit))
        .await
        .unwrap();

    assert!(session.outcomes.is_empty());
    assert!(session.summary.cancelled);
}

#[tokio::test]
async fn test_observed_stream_forwards_tokens() {
    let server = MockServer::default();
    server.reply(Reply::Sse(sse(&["Hel", "lo"], Some((2, 2)))));
    let config = server.start().await;

    let (tx, mut rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let observer = StreamObserver {
        cancel: &cancel,
        events: &tx,
    };
    let m = engine(&config).measure_observed("hi", true, observer).await.unwrap();
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    assert!(matches!(events[0], BenchmarkEvent::FirstToken { ttft } if ttft == m.time_to_first_token));
    let tokens: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            BenchmarkEvent::Token { content } => Some(content.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tokens, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn test_cancelled_observer_skips_request() {
    let server = MockServer::default();
    let config = server.start().await;

    let (tx, _rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = engine(&config)
        .measure_observed("hi", true, StreamObserver { cancel: &cancel, events: &tx })
        .await;
    assert!(matches!(result, Err(TokenBurnError::Cancelled)));
    assert!(server.requests.lock().unwrap().is_empty());
}
