//! GeminiTransport 对 HTTP 层的行为（wiremock）

use resilient_translator::{
    classify, AttemptError, FailureCategory, GeminiTransport, GenerateRequest, GenerativeTransport,
    TranslationConfig,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport_for(server: &MockServer) -> GeminiTransport {
    let config = TranslationConfig {
        api_base_url: server.uri(),
        request_timeout_secs: 5,
        ..TranslationConfig::default()
    };
    GeminiTransport::new(&config).expect("client builds")
}

fn request<'a>(model: &'a str, prompt: &'a str) -> GenerateRequest<'a> {
    GenerateRequest {
        model,
        secret: "test-secret",
        prompt,
        response_mime_type: "application/json",
    }
}

#[tokio::test]
async fn sends_key_header_and_returns_candidate_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-secret"))
        .and(body_partial_json(json!({
            "generationConfig": {"responseMimeType": "application/json"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{"content": {"parts": [{"text": "[\"你好\"]"}]}, "finishReason": "STOP"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let text = transport_for(&server)
        .generate(request("gemini-2.5-flash", "[\"hello\"]"))
        .await
        .unwrap();
    assert_eq!(text, "[\"你好\"]");
}

#[tokio::test]
async fn quota_error_keeps_structured_details() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {
                "code": 429,
                "message": "You exceeded your current quota.",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    {
                        "@type": "type.googleapis.com/google.rpc.QuotaFailure",
                        "violations": [
                            {"quotaId": "GenerateRequestsPerMinutePerProjectPerModel-FreeTier"}
                        ]
                    },
                    {"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "21s"}
                ]
            }
        })))
        .mount(&server)
        .await;

    let failure = transport_for(&server)
        .generate(request("m", "p"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, Some(429));
    assert_eq!(failure.details.len(), 2);

    let verdict = classify(&AttemptError::Api(failure), "k", "m");
    assert_eq!(verdict.category, FailureCategory::RpmLimit);
    assert_eq!(verdict.penalty_ms, 26_000);
}

#[tokio::test]
async fn forbidden_is_reported_with_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": {"code": 403, "message": "Method doesn't allow unregistered callers", "status": "PERMISSION_DENIED"}
        })))
        .mount(&server)
        .await;

    let failure = transport_for(&server)
        .generate(request("m", "p"))
        .await
        .unwrap_err();
    assert_eq!(failure.status, Some(403));
    assert!(failure.message.contains("PERMISSION_DENIED"));
    assert!(!failure.message.contains("test-secret"));
}

#[tokio::test]
async fn blocked_prompt_becomes_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })))
        .mount(&server)
        .await;

    let failure = transport_for(&server)
        .generate(request("m", "p"))
        .await
        .unwrap_err();
    let verdict = classify(&AttemptError::Api(failure), "k", "m");
    assert_eq!(verdict.category, FailureCategory::BatchFailure);
    assert_eq!(verdict.penalty_ms, 0);
}

#[tokio::test]
async fn unreachable_server_is_a_status_less_failure() {
    let server = MockServer::start().await;
    let transport = transport_for(&server);
    drop(server);

    let failure = transport.generate(request("m", "p")).await.unwrap_err();
    assert_eq!(failure.status, None);
    let verdict = classify(&AttemptError::Api(failure), "k", "m");
    assert_eq!(verdict.category, FailureCategory::Unknown);
}
