//! Request pipeline against a mock completion endpoint
//!
//! Exercises the real reqwest transport: bearer auth, request body shape,
//! retry on transport failure, no retry on upstream errors, and proxy
//! routing.

mod common;

use common::{completion_config, http_pipeline};
use mathchat::config::CompletionConfig;
use mathchat::pipeline::{Outcome, PipelineState, FALLBACK_RESPONSES};
use serde_json::json;
use serial_test::serial;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": text}}]
    })
}

#[tokio::test]
async fn test_successful_completion() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "deepseek-chat",
            "stream": false,
            "max_tokens": 1024
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("$f'(x) = 2x$")))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, sleeper) =
        http_pipeline(completion_config(&format!("{}/chat/completions", server.uri())));
    let trace = pipeline.send_traced("Differentiate x^2").await;

    assert_eq!(
        trace.outcome,
        Outcome::Answered {
            text: "$f'(x) = 2x$".to_string()
        }
    );
    assert_eq!(
        trace.states,
        vec![PipelineState::Attempting(1), PipelineState::Succeeded]
    );
    assert!(sleeper.recorded().is_empty());
}

#[tokio::test]
async fn test_request_carries_system_instruction_and_question() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
        .mount(&server)
        .await;

    let (pipeline, _) =
        http_pipeline(completion_config(&format!("{}/chat/completions", server.uri())));
    pipeline.send("What is a Jacobian?").await;

    let requests = server.received_requests().await.expect("recording enabled");
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("KaTeX"));
    assert_eq!(body["messages"][1]["role"], "user");
    assert_eq!(body["messages"][1]["content"], "What is a Jacobian?");
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, sleeper) =
        http_pipeline(completion_config(&format!("{}/chat/completions", server.uri())));
    let trace = pipeline.send_traced("q").await;

    match &trace.outcome {
        Outcome::Failed {
            status_code,
            message,
        } => {
            assert_eq!(*status_code, Some(500));
            assert!(message.contains("upstream exploded"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    assert_eq!(trace.attempts(), 1);
    assert!(sleeper.recorded().is_empty());
}

#[tokio::test]
async fn test_malformed_payload_is_failed_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (pipeline, _) =
        http_pipeline(completion_config(&format!("{}/chat/completions", server.uri())));
    let outcome = pipeline.send("q").await;

    assert!(matches!(
        outcome,
        Outcome::Failed {
            status_code: Some(200),
            ..
        }
    ));
}

#[tokio::test]
async fn test_timeouts_exhaust_attempts_then_fall_back() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let config = CompletionConfig {
        attempt_timeout_secs: 1,
        ..completion_config(&format!("{}/chat/completions", server.uri()))
    };
    let (pipeline, sleeper) = http_pipeline(config);
    let trace = pipeline.send_traced("q").await;

    assert_eq!(
        trace.outcome,
        Outcome::Fallback {
            text: FALLBACK_RESPONSES[0].to_string()
        }
    );
    assert_eq!(trace.attempts(), 3);
    assert_eq!(
        sleeper.recorded(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
    assert_eq!(trace.states.last(), Some(&PipelineState::FellBack));
}

#[tokio::test]
async fn test_connection_refused_falls_back() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let (pipeline, sleeper) = http_pipeline(completion_config(&format!(
        "http://127.0.0.1:{}/chat/completions",
        port
    )));
    let outcome = pipeline.send("q").await;

    assert!(outcome.is_mock());
    assert!(FALLBACK_RESPONSES.contains(&outcome.reply().unwrap()));
    assert_eq!(sleeper.recorded().len(), 2);
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;

    // First attempt times out, second answers.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("slow"))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("fast")))
        .expect(1)
        .mount(&server)
        .await;

    let config = CompletionConfig {
        attempt_timeout_secs: 1,
        ..completion_config(&format!("{}/chat/completions", server.uri()))
    };
    let (pipeline, sleeper) = http_pipeline(config);
    let trace = pipeline.send_traced("q").await;

    assert_eq!(
        trace.outcome,
        Outcome::Answered {
            text: "fast".to_string()
        }
    );
    assert_eq!(
        trace.states,
        vec![
            PipelineState::Attempting(1),
            PipelineState::Backoff(1),
            PipelineState::Attempting(2),
            PipelineState::Succeeded,
        ]
    );
    assert_eq!(sleeper.recorded().len(), 1);
}

#[tokio::test]
async fn test_configured_proxy_carries_the_request() {
    let proxy = MockServer::start().await;

    // The endpoint host does not resolve; only the proxy can answer.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("host", "completion.invalid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("via proxy")))
        .expect(1)
        .mount(&proxy)
        .await;

    let config = CompletionConfig {
        proxy: Some(proxy.uri()),
        ..completion_config("http://completion.invalid/chat/completions")
    };
    let (pipeline, _) = http_pipeline(config);

    assert_eq!(
        pipeline.send("q").await,
        Outcome::Answered {
            text: "via proxy".to_string()
        }
    );
}

#[tokio::test]
async fn test_every_attempt_goes_through_proxy() {
    let proxy = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .expect(3)
        .mount(&proxy)
        .await;

    let config = CompletionConfig {
        proxy: Some(proxy.uri()),
        attempt_timeout_secs: 1,
        ..completion_config("http://completion.invalid/chat/completions")
    };
    let (pipeline, _) = http_pipeline(config);
    let trace = pipeline.send_traced("q").await;

    assert!(trace.outcome.is_mock());
    assert_eq!(trace.attempts(), 3);
}

#[tokio::test]
#[serial]
async fn test_proxy_environment_ignored_without_configured_proxy() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("direct")))
        .expect(1)
        .mount(&server)
        .await;

    let dead_proxy = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        format!("http://127.0.0.1:{}", listener.local_addr().unwrap().port())
    };
    let proxy_vars = ["HTTP_PROXY", "http_proxy", "HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"];
    for name in proxy_vars {
        std::env::set_var(name, &dead_proxy);
    }

    let config = completion_config(&format!("{}/chat/completions", server.uri()));
    assert!(config.proxy.is_none());
    let (pipeline, sleeper) = http_pipeline(config);
    let outcome = pipeline.send("q").await;

    for name in proxy_vars {
        std::env::remove_var(name);
    }

    assert_eq!(
        outcome,
        Outcome::Answered {
            text: "direct".to_string()
        }
    );
    assert!(sleeper.recorded().is_empty());
}
