//! Outbound call flow and grace window integration tests

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use common::{form, test_app};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tower::ServiceExt; // For `oneshot`
use voxbridge::application::call::StreamStart;
use voxbridge::domain::call::EndReason;
use voxbridge::domain::shared::value_objects::{CallSid, StreamSid};

fn place_call(to: &str, from: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/calls")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"to": to, "from": from}).to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get_call(app: &common::TestApp, call_sid: &str) -> Response {
    app.router
        .clone()
        .oneshot(
            Request::get(format!("/calls/{}", call_sid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn test_outbound_call_lifecycle() {
    let app = test_app();

    // DIALING
    let response = app
        .router
        .clone()
        .oneshot(place_call("+15551234567", "+16025550100"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["phase"], "dialing");
    assert_eq!(json["data"]["direction"], "outbound");
    let call_sid = json["data"]["call_sid"].as_str().unwrap().to_string();

    {
        let placed = app.provider.placed.lock().unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].to.as_str(), "+15551234567");
        assert_eq!(placed[0].from.as_str(), "+16025550100");
        assert_eq!(placed[0].bootstrap_url, "https://abc.ngrok.io/");
        assert_eq!(placed[0].status_callback_url, "https://abc.ngrok.io/status");
    }

    // Callee answers; the provider fetches the control document: BOOTSTRAPPED
    let notification = form(&[
        ("CallSid", call_sid.as_str()),
        ("From", "+16025550100"),
        ("To", "+15551234567"),
        ("Direction", "outbound-api"),
    ]);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::HOST, "abc.ngrok.io")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(notification))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(get_call(&app, &call_sid).await).await;
    assert_eq!(json["data"]["phase"], "bootstrapped");

    // Media stream connects: ACTIVE
    let attached = app
        .calls
        .attach_stream(StreamStart {
            call_sid: CallSid::parse(&call_sid).unwrap(),
            stream_sid: StreamSid::new("MZ1"),
            parameters: HashMap::new(),
            encoding: "audio/x-mulaw".to_string(),
            sample_rate: 8000,
        })
        .await
        .unwrap();
    let json = body_json(get_call(&app, &call_sid).await).await;
    assert_eq!(json["data"]["phase"], "active");
    assert_eq!(json["data"]["stream_sid"], "MZ1");

    // Stream stops: ENDED
    assert!(
        app.calls
            .stream_closed(&attached.call_sid, &attached.stream_sid, EndReason::StreamClosed)
            .await
    );
    let json = body_json(get_call(&app, &call_sid).await).await;
    assert_eq!(json["data"]["phase"], "ended");
    assert_eq!(json["data"]["end_reason"], "stream_closed");
}

#[tokio::test]
async fn test_malformed_numbers_never_reach_provider() {
    let app = test_app();

    for (to, from) in [
        ("5551234567", "+16025550100"),
        ("+15551234567", "16025550100"),
        ("+1555123456789012", "+16025550100"),
        ("+15551234567", "+0123456"),
    ] {
        let response = app
            .router
            .clone()
            .oneshot(place_call(to, from))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
    }

    assert_eq!(app.provider.placed_count(), 0);
    assert_eq!(app.calls.session_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_ended_call_visible_for_grace_window() {
    let app = test_app();

    let response = app
        .router
        .clone()
        .oneshot(place_call("+15551234567", "+16025550100"))
        .await
        .unwrap();
    let json = body_json(response).await;
    let call_sid = CallSid::parse(json["data"]["call_sid"].as_str().unwrap()).unwrap();

    assert!(app.calls.end_call(&call_sid, EndReason::Hangup).await);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(
        get_call(&app, call_sid.as_str()).await.status(),
        StatusCode::OK
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        get_call(&app, call_sid.as_str()).await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test(start_paused = true)]
async fn test_call_without_media_stream_is_ended_and_purged() {
    let app = test_app();

    let notification = form(&[
        ("CallSid", "CA900"),
        ("From", "+15550001111"),
        ("To", "+16025550100"),
        ("Direction", "inbound"),
    ]);
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::HOST, "abc.ngrok.io")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(notification))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The provider never opens the media stream
    tokio::time::sleep(Duration::from_secs(91)).await;
    let json = body_json(get_call(&app, "CA900").await).await;
    assert_eq!(json["data"]["phase"], "ended");
    assert_eq!(json["data"]["end_reason"], "no_stream");
    assert_eq!(
        app.provider.hangups(),
        vec![CallSid::parse("CA900").unwrap()]
    );

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(
        get_call(&app, "CA900").await.status(),
        StatusCode::NOT_FOUND
    );
}
