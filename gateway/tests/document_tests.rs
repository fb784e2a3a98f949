//! Control-document endpoint tests: mode dispatch, credential minting,
//! escaping, and the fail-closed paths.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::util::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{app, test_config, test_state};

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Mock credential endpoint returning the nested client_secret shape.
async fn mint_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "client_secret": { "value": "ek_X", "expires_at": 1_700_000_600_i64 }
        })))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn stream_mode_emits_stream_document_with_minted_token() {
    let mint = mint_server().await;
    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", mint.uri());
    let state = test_state(config).await;

    let response = app(state)
        .oneshot(
            Request::get("/twiml?mode=stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_string(response).await;
    assert!(xml.contains(
        "<Start><Stream url=\"wss://gw.example.com/stream/twilio/ek_X\"/></Start>"
    ));
    assert!(xml.contains("<Pause length=\"60\"/>"));
}

#[tokio::test]
async fn sip_mode_emits_dial_sip() {
    let mint = mint_server().await;
    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", mint.uri());
    let state = test_state(config).await;

    let response = app(state)
        .oneshot(Request::get("/twiml?mode=sip").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(xml.contains("<Sip>sip:ek_X@sip.example.com;transport=tls</Sip>"));
}

#[tokio::test]
async fn simple_mode_speaks_without_minting() {
    let state = test_state(test_config()).await;
    let response = app(state)
        .oneshot(
            Request::get("/twiml?mode=simple")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_string(response).await;
    assert!(xml.contains("<Say>"));
    assert!(!xml.contains("<Stream"));
    assert!(!xml.contains("<Sip>"));
}

#[tokio::test]
async fn unknown_mode_falls_back_to_sip() {
    let mint = mint_server().await;
    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", mint.uri());
    let state = test_state(config).await;

    let response = app(state)
        .oneshot(
            Request::get("/twiml?mode=warp-drive")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(xml.contains("<Sip>"));
}

#[tokio::test]
async fn provided_token_skips_minting() {
    // No mock mint server: a mint attempt would fail against the
    // unroutable default, so a rendered stream document proves the token
    // was taken from the query.
    let state = test_state(test_config()).await;
    let response = app(state)
        .oneshot(
            Request::get("/twiml?mode=stream&token=ek_given")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(xml.contains("/stream/twilio/ek_given"));
}

#[tokio::test]
async fn mint_failure_fails_closed_with_spoken_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime/client_secrets"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "invalid model" }
        })))
        .mount(&server)
        .await;

    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", server.uri());
    let state = test_state(config).await;

    let response = app(state)
        .oneshot(
            Request::get("/twiml?mode=stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Carrier-facing endpoint stays 200; the caller hears the error.
    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_string(response).await;
    assert!(xml.contains("<Say>"));
    assert!(xml.contains("unavailable"));
}

#[tokio::test]
async fn user_supplied_strings_are_escaped() {
    let state = test_state(test_config()).await;
    let hostile = "ek\"><Say>pwn</Say>";
    let response = app(state)
        .oneshot(
            Request::get(format!(
                "/twiml?mode=stream&token={}",
                urlencoding::encode(hostile)
            ))
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(!xml.contains("<Say>pwn</Say>"));
}

#[tokio::test]
async fn bad_carrier_signature_is_forbidden() {
    let state = test_state(test_config()).await;
    let response = app(state)
        .oneshot(
            Request::post("/twiml")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("x-twilio-signature", "bm90LXRoZS1yaWdodC1zaWc=")
                .body(Body::from("CallSid=CA1&From=%2B15551231234"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let xml = body_string(response).await;
    assert!(xml.contains("<Say>Forbidden</Say>"));
}

#[tokio::test]
async fn valid_carrier_signature_is_accepted() {
    use base64::prelude::*;
    use ring::hmac;

    let mint = mint_server().await;
    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", mint.uri());
    let state = test_state(config).await;

    // The carrier signs url + sorted(key || value) with the auth token.
    let mut payload = "https://gw.example.com/twiml".to_string();
    payload.push_str("CallSid");
    payload.push_str("CA1");
    payload.push_str("mode");
    payload.push_str("simple");
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, b"test_auth_token");
    let signature = BASE64_STANDARD.encode(hmac::sign(&key, payload.as_bytes()).as_ref());

    let response = app(state)
        .oneshot(
            Request::post("/twiml")
                .header("content-type", "application/x-www-form-urlencoded")
                .header("x-twilio-signature", signature)
                .body(Body::from("CallSid=CA1&mode=simple"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let xml = body_string(response).await;
    assert!(xml.contains("<Say>"));
}

#[tokio::test]
async fn dial_action_falls_back_to_stream_on_failure() {
    let mint = mint_server().await;
    let mut config = test_config();
    config.client_secrets_url = format!("{}/v1/realtime/client_secrets", mint.uri());
    let state = test_state(config).await;

    let response = app(state)
        .oneshot(
            Request::post("/twiml/action")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("DialCallStatus=failed"))
                .unwrap(),
        )
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(xml.contains("<Stream"));
}

#[tokio::test]
async fn dial_action_hangs_up_after_completed_call() {
    let state = test_state(test_config()).await;
    let response = app(state)
        .oneshot(
            Request::post("/twiml/action")
                .header("content-type", "application/x-www-form-urlencoded")
                .body(Body::from("DialCallStatus=completed"))
                .unwrap(),
        )
        .await
        .unwrap();

    let xml = body_string(response).await;
    assert!(xml.contains("<Hangup/>"));
    assert!(!xml.contains("<Stream"));
}
