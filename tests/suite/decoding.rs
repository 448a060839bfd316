//! Event decoding over real byte sources.

use chorus_client::{
    ByteStream, ChatTransport, EventDecoder, HttpTransport, TransportError, decode_stream,
};
use chorus_engine::WireEvent;
use chorus_types::ChatRequest;
use futures_util::{StreamExt, stream};
use wiremock::MockServer;

use crate::common::{client_config, full_exchange, mount_chat_error, mount_chat_stream, sse_body};

fn chunked(body: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut rest = body;
    let mut i = 0;
    while !rest.is_empty() {
        let size = sizes[i % sizes.len()].clamp(1, rest.len());
        chunks.push(rest[..size].to_vec());
        rest = &rest[size..];
        i += 1;
    }
    chunks
}

async fn decode_all(chunks: Vec<Vec<u8>>) -> Vec<WireEvent> {
    let source: ByteStream = Box::pin(stream::iter(
        chunks.into_iter().map(Ok::<_, TransportError>),
    ));
    decode_stream(source)
        .map(|item| item.expect("no transport error"))
        .collect()
        .await
}

#[tokio::test]
async fn every_two_way_split_yields_the_same_events() {
    let expected = full_exchange();
    let body = sse_body(&expected);
    let bytes = body.as_bytes();

    for split in 0..=bytes.len() {
        let chunks = vec![bytes[..split].to_vec(), bytes[split..].to_vec()];
        assert_eq!(decode_all(chunks).await, expected, "split at byte {split}");
    }
}

#[tokio::test]
async fn uneven_chunk_sizes_yield_the_same_events() {
    let expected = full_exchange();
    let body = sse_body(&expected);

    for sizes in [&[1][..], &[2, 5], &[3, 1, 7], &[13], &[64, 1]] {
        let chunks = chunked(body.as_bytes(), sizes);
        assert_eq!(decode_all(chunks).await, expected, "sizes {sizes:?}");
    }
}

#[test]
fn malformed_lines_are_counted_and_skipped() {
    let mut decoder = EventDecoder::new();
    let mut events = decoder.push(b"data: {broken\n: keep-alive\nevent: ping\n");
    events.extend(decoder.push(b"data: {\"type\":\"done\"}\n"));

    assert_eq!(events, vec![WireEvent::Done]);
    assert_eq!(decoder.anomalies(), 1);
}

#[tokio::test]
async fn http_stream_decodes_end_to_end() {
    let server = MockServer::start().await;
    let expected = full_exchange();
    mount_chat_stream(&server, sse_body(&expected)).await;

    let transport = HttpTransport::from_config(&client_config(&server)).unwrap();
    let source = transport
        .open(ChatRequest {
            message: "What is the capital of France?".into(),
            models: vec!["deepseek".into(), "llama".into()],
            synthesize: true,
        })
        .await
        .unwrap();
    let events: Vec<WireEvent> = decode_stream(source)
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(events, expected);

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["message"], "What is the capital of France?");
    assert_eq!(body["models"], serde_json::json!(["deepseek", "llama"]));
    assert_eq!(body["synthesize"], true);
}

#[tokio::test]
async fn non_success_status_is_a_transport_error() {
    let server = MockServer::start().await;
    mount_chat_error(&server, 503, "overloaded").await;

    let transport = HttpTransport::from_config(&client_config(&server)).unwrap();
    let result = transport
        .open(ChatRequest {
            message: "hi".into(),
            models: vec![],
            synthesize: false,
        })
        .await;
    let Err(err) = result else {
        panic!("expected a status error");
    };
    assert_eq!(err.status(), Some(503));
    assert!(err.to_string().contains("overloaded"));
}
