mod support;

use std::time::Duration;

use bytes::Bytes;
use http::uri::PathAndQuery;
use http_body::Frame;
use tokio_util::sync::CancellationToken;

use grapnel::{BytesCodec, CallOptions, Code, Grpc};
use support::*;

fn path() -> PathAndQuery {
    PathAndQuery::from_static("/test.Clock/Wait")
}

#[tokio::test(start_paused = true)]
async fn deadline_exceeded_while_waiting_for_headers() {
    // The server never answers; only the deadline can end the call.
    let mut grpc = Grpc::new(MockClient::new(|_req| never()));

    let mut call = grpc.unary(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new().timeout(Duration::from_millis(50)),
    );

    let err = call.response().await.unwrap_err();
    let status = err.status().unwrap();
    assert_eq!(status.code(), Code::DeadlineExceeded);
    assert_eq!(status.message(), "Deadline Exceeded");
    assert!(call.deadline_reached());
}

#[tokio::test(start_paused = true)]
async fn deadline_exceeded_while_streaming() {
    // Headers and one message arrive, then the body stalls forever.
    let mut grpc = Grpc::new(MockClient::new(|_req| {
        ready(response(
            "application/grpc",
            stalled_body(vec![Ok(Frame::data(message_frame(b"tick")))]),
        ))
    }));

    let mut call = grpc.server_streaming(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new().timeout(Duration::from_millis(100)),
    );

    let first = call.message().await.unwrap().unwrap();
    assert_eq!(first, Bytes::from_static(b"tick"));

    let err = call.message().await.unwrap_err();
    assert_eq!(err.status().unwrap().code(), Code::DeadlineExceeded);
    assert!(call.deadline_reached());
}

#[tokio::test(start_paused = true)]
async fn deadline_wins_over_external_cancellation() {
    let external = CancellationToken::new();
    let mut grpc = Grpc::new(MockClient::new(|_req| never()));

    let mut call = grpc.unary(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new()
            .timeout(Duration::from_millis(10))
            .cancellation(external.clone()),
    );

    let err = call.response().await.unwrap_err();

    // The external token firing afterwards must not rewrite the outcome.
    external.cancel();

    assert_eq!(err.status().unwrap().code(), Code::DeadlineExceeded);
    assert!(call.deadline_reached());
    assert_eq!(call.status().unwrap().code(), Code::DeadlineExceeded);
}

#[tokio::test]
async fn external_cancellation_maps_to_cancelled() {
    let external = CancellationToken::new();
    let mut grpc = Grpc::new(MockClient::new(|_req| never()));

    let mut call = grpc.unary(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new().cancellation(external.clone()),
    );

    external.cancel();

    let err = call.response().await.unwrap_err();
    assert_eq!(err.status().unwrap().code(), Code::Cancelled);
    assert!(!call.deadline_reached());
}

#[tokio::test(start_paused = true)]
async fn zero_timeout_cancels_immediately() {
    let mut grpc = Grpc::new(MockClient::new(|_req| never()));

    let mut call = grpc.unary(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new().timeout(Duration::ZERO),
    );

    let err = call.response_headers().await.unwrap_err();
    assert_eq!(err.status().unwrap().code(), Code::DeadlineExceeded);
    assert!(call.deadline_reached());
}

#[tokio::test(start_paused = true)]
async fn deadline_suppresses_collateral_transport_errors() {
    // The transport reports a generic failure; if the timer fired first the
    // caller must still see the deadline.
    let mut grpc = Grpc::new(MockClient::new(|_req| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Err(grapnel::Status::unavailable("stream reset"))
        }) as ResponseFuture
    }));

    let mut call = grpc.unary(
        Bytes::from_static(b"ping"),
        path(),
        BytesCodec,
        CallOptions::new().timeout(Duration::from_millis(20)),
    );

    let err = call.response().await.unwrap_err();
    assert_eq!(err.status().unwrap().code(), Code::DeadlineExceeded);
}
