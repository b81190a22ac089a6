// Interception middleware
// Buffers LLM-bound request and response bodies so each exchange can be logged,
// then hands the response back to the caller byte for byte.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use bytes::BytesMut;
use futures::{stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::exchange::parse_body;
use crate::engine::{InterceptedExchange, Interceptor};
use crate::llm::elapsed_ms;

/// Largest request body the monitor buffers
const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Largest response body the monitor buffers
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

enum Buffered {
    Complete(Bytes),
    /// Over the limit or failed mid-read; the rebuilt body replays what was
    /// read, then the rest of the original stream
    Passthrough(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Buffered {
    let mut chunks = body.into_data_stream();
    let mut buffer = BytesMut::new();
    while let Some(item) = chunks.next().await {
        match item {
            Ok(chunk) if buffer.len() + chunk.len() <= limit => buffer.extend_from_slice(&chunk),
            item => {
                let head = stream::iter([Ok(buffer.freeze()), item]);
                return Buffered::Passthrough(Body::from_stream(head.chain(chunks)));
            }
        }
    }
    Buffered::Complete(buffer.freeze())
}

/// Log every exchange on an LLM path
///
/// Persisting the record happens on a spawned task after the response is
/// assembled, so storage failures never reach the caller. A body the monitor
/// cannot buffer is passed through unchanged and the exchange goes unlogged.
pub async fn intercept_llm_traffic(
    State(interceptor): State<Interceptor>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if !interceptor.should_intercept(&path) {
        return next.run(request).await;
    }

    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let request_bytes = match buffer_body(body, MAX_REQUEST_BYTES).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Passthrough(body) => {
            warn!("Request body on {} not buffered, exchange will not be logged", path);
            return next.run(Request::from_parts(parts, body)).await;
        }
    };

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
        .to_string();
    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let request_body = parse_body(&request_bytes);
    let request_id = interceptor.begin(&host, &path, &request_body);
    debug!("Intercepting {} as {}", path, request_id);

    let response = next
        .run(Request::from_parts(parts, Body::from(request_bytes)))
        .await;

    let (parts, body) = response.into_parts();
    let response_bytes = match buffer_body(body, MAX_RESPONSE_BYTES).await {
        Buffered::Complete(bytes) => bytes,
        Buffered::Passthrough(body) => {
            warn!("Response for {} not buffered, exchange will not be logged", request_id);
            interceptor.active_requests().complete(&request_id);
            return Response::from_parts(parts, body);
        }
    };

    let exchange = InterceptedExchange {
        request_id,
        host,
        path,
        user_agent,
        request_body,
        status: parts.status.as_u16(),
        response_body: response_bytes.clone(),
        latency_ms: elapsed_ms(start),
    };
    tokio::spawn(async move {
        interceptor.finish(exchange).await;
    });

    Response::from_parts(parts, Body::from(response_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_body_within_limit_is_buffered() {
        match buffer_body(Body::from("hello"), 5).await {
            Buffered::Complete(bytes) => assert_eq!(&bytes[..], b"hello"),
            Buffered::Passthrough(_) => panic!("expected a buffered body"),
        }
    }

    #[tokio::test]
    async fn test_oversized_body_is_replayed_intact() {
        let chunks: Vec<Result<&'static str, std::io::Error>> = vec![Ok("abc"), Ok("def"), Ok("ghi")];
        let body = Body::from_stream(stream::iter(chunks));

        let Buffered::Passthrough(body) = buffer_body(body, 4).await else {
            panic!("expected a pass-through body");
        };
        let replayed = to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(&replayed[..], b"abcdefghi");
    }
}
