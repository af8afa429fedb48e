use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use batchlink_transport::{EventCodecError, EventStreamCodec};
use bytes::BytesMut;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::codec::Encoder;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "application/x-ndjson";

/// Streams `events` as newline-delimited JSON, the format subscription
/// operations consume.
pub fn event_stream_response<S>(events: S) -> Response
where
    S: Stream<Item = Value> + Send + 'static,
{
    let mut codec = EventStreamCodec::new();
    let frames = events.map(move |event| {
        let mut buf = BytesMut::new();
        codec.encode(event, &mut buf)?;
        Ok::<_, EventCodecError>(buf.freeze())
    });

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, EVENT_STREAM_CONTENT_TYPE)],
        Body::from_stream(frames),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use futures::stream;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_are_newline_delimited() {
        let response = event_stream_response(stream::iter(vec![json!({"n": 1}), json!("two")]));
        assert_eq!(response.headers()[header::CONTENT_TYPE], EVENT_STREAM_CONTENT_TYPE);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body, "{\"n\":1}\n\"two\"\n");
    }
}
