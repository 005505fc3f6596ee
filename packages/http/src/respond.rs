//! Serializing a result onto the wire.

use axum::body::Body;
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{Response, StatusCode};
use wirefn_core::Value;

use crate::context::HttpContext;
use crate::error::HttpError;
use crate::function::ByteStream;

const OCTET_STREAM: &str = "application/octet-stream";
const JSON_UTF8: &str = "application/json; charset=utf-8";
const TEXT_UTF8: &str = "text/plain; charset=utf-8";

/// A response body before serialization.
pub(crate) enum Reply {
    Value(Value),
    Stream(ByteStream),
}

/// Write `reply` with `status`, unless the function already chose a status
/// through its context. Headers set through the context are kept, and a
/// `Content-Type` set there is never overridden.
pub(crate) fn send(
    context: &HttpContext,
    status: StatusCode,
    reply: Reply,
    pretty_json: bool,
) -> Result<Response<Body>, HttpError> {
    let mut headers = context.response_headers();
    let status = context.response_status().unwrap_or(status);

    let body = match reply {
        Reply::Value(Value::Null) => Body::empty(),
        Reply::Value(Value::Bytes(bytes)) => {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(OCTET_STREAM));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
            Body::from(bytes)
        }
        Reply::Stream(stream) => {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(OCTET_STREAM));
            Body::from_stream(stream)
        }
        Reply::Value(Value::String(text))
            if context.accepts(&["text", "json"]) != Some("json") =>
        {
            let mut text = text;
            if !headers.contains_key(CONTENT_TYPE) {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_UTF8));
            }
            headers.insert(CONTENT_LENGTH, HeaderValue::from(text.len()));
            Body::from(text)
        }
        Reply::Value(value) => {
            let json = value.to_json();
            let serialized = if pretty_json {
                serde_json::to_vec_pretty(&json)
            } else {
                serde_json::to_vec(&json)
            }
            .map_err(|e| HttpError::internal(format!("Unexpected return type: {}", e)))?;
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static(JSON_UTF8));
            headers.insert(CONTENT_LENGTH, HeaderValue::from(serialized.len()));
            Body::from(serialized)
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    Ok(response)
}
