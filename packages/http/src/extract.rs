//! Pulling parameters out of a request.

use std::collections::BTreeMap;
use std::io::Read;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart};
use bytes::Bytes;
use flate2::read::{GzDecoder, ZlibDecoder};
use futures::StreamExt;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::request::Parts;
use http::{HeaderMap, Method, Request};
use mime::Mime;
use tower::{Layer, ServiceExt};
use wirefn_core::Value;

use crate::context::HttpContext;
use crate::error::HttpError;

/// Decode `a=1&b=2&b=3` into a map of strings, collecting repeated keys into
/// arrays.
pub(crate) fn form_pairs(input: &[u8]) -> Value {
    let mut map = BTreeMap::new();
    for (key, value) in url::form_urlencoded::parse(input) {
        insert_repeated(&mut map, key.into_owned(), Value::String(value.into_owned()));
    }
    Value::Map(map)
}

fn insert_repeated(map: &mut BTreeMap<String, Value>, key: String, value: Value) {
    match map.remove(&key) {
        None => {
            map.insert(key, value);
        }
        Some(Value::Array(mut values)) => {
            values.push(value);
            map.insert(key, Value::Array(values));
        }
        Some(previous) => {
            map.insert(key, Value::Array(vec![previous, value]));
        }
    }
}

/// Buffer the whole body, enforcing `limit` and undoing any
/// `Content-Encoding`.
pub(crate) async fn read_body(body: Body, headers: &HeaderMap, limit: usize) -> Result<Bytes, HttpError> {
    let encoding = headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("identity")
        .trim()
        .to_ascii_lowercase();

    if encoding == "identity" {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        if declared.is_some_and(|length| length > limit as u64) {
            return Err(HttpError::payload_too_large(limit));
        }
    }

    let mut buffer = Vec::new();
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HttpError::bad_request(format!("Invalid body: {}", e)))?;
        if buffer.len() + chunk.len() > limit {
            return Err(HttpError::payload_too_large(limit));
        }
        buffer.extend_from_slice(&chunk);
    }

    let gzip = match encoding.as_str() {
        "identity" => return Ok(Bytes::from(buffer)),
        "gzip" | "x-gzip" => true,
        "deflate" => false,
        other => {
            return Err(HttpError::unsupported_media_type(format!(
                "Unsupported content encoding \"{}\"",
                other
            )))
        }
    };

    // Inflating is CPU-bound; keep it off the async workers.
    tokio::task::spawn_blocking(move || {
        if gzip {
            inflate(GzDecoder::new(buffer.as_slice()), limit)
        } else {
            inflate(ZlibDecoder::new(buffer.as_slice()), limit)
        }
    })
    .await
    .map_err(|e| HttpError::internal(format!("Inflating the body failed: {}", e)))?
}

fn inflate(decoder: impl Read, limit: usize) -> Result<Bytes, HttpError> {
    let mut inflated = Vec::new();
    decoder
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| HttpError::bad_request(format!("Invalid encoded body: {}", e)))?;
    if inflated.len() > limit {
        return Err(HttpError::payload_too_large(limit));
    }
    Ok(Bytes::from(inflated))
}

/// Extract the parameter bag of a validated call.
///
/// GET reads the query string; POST reads a multipart form, a urlencoded
/// form, or (for any other content type) a JSON object. The result is
/// always a map.
pub(crate) async fn params(
    parts: Parts,
    body: Body,
    context: &HttpContext,
    limit: usize,
) -> Result<Value, HttpError> {
    let params = match parts.method {
        Method::GET => context.query().clone(),
        Method::POST => {
            let bytes = read_body(body, &parts.headers, limit).await?;
            if context.is("multipart") {
                multipart(parts, bytes).await?
            } else if context.is("urlencoded") {
                form_pairs(&bytes)
            } else if bytes.iter().all(u8::is_ascii_whitespace) {
                Value::map()
            } else {
                let json: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| HttpError::bad_request(format!("Invalid JSON body: {}", e)))?;
                Value::from_json(json)
            }
        }
        _ => return Err(HttpError::not_implemented()),
    };

    if !params.is_map() {
        return Err(HttpError::bad_request("Invalid parameters"));
    }
    Ok(params)
}

async fn multipart(parts: Parts, body: Bytes) -> Result<Value, HttpError> {
    // The body is already buffered and size-checked; lift axum's own limit
    // to match so large uploads are not cut at its default.
    let limit = body.len();
    let request = Request::from_parts(parts, Body::from(body));
    let service = DefaultBodyLimit::max(limit).layer(tower::service_fn(
        |request: Request<Body>| async move { Multipart::from_request(request, &()).await },
    ));
    let mut form = service
        .oneshot(request)
        .await
        .map_err(|e| HttpError::bad_request(format!("Invalid multipart body: {}", e)))?;

    let mut fields = BTreeMap::new();
    while let Some(field) = form
        .next_field()
        .await
        .map_err(|e| HttpError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| HttpError::bad_request(format!("Invalid multipart body: {}", e)))?;

        let value = match file_name {
            Some(_) => file_value(&data, content_type.as_deref()),
            None => Value::String(String::from_utf8_lossy(&data).into_owned()),
        };
        insert_repeated(&mut fields, name, value);
    }
    Ok(Value::Map(fields))
}

/// An uploaded file becomes text when a charset can be determined, else
/// stays as bytes.
///
/// Charset sources, in order: the part's declared `charset`, the charset
/// implied by the part's declared type, the charset implied by the type
/// sniffed from the content's magic number. Undetected content is
/// `application/octet-stream`.
pub(crate) fn file_value(data: &[u8], content_type: Option<&str>) -> Value {
    let declared: Option<Mime> = content_type.and_then(|ct| ct.parse().ok());
    let charset = match &declared {
        Some(mime) => mime
            .get_param(mime::CHARSET)
            .map(|c| c.as_str().to_string())
            .or_else(|| implied_charset(mime)),
        None => sniffed_type(data).and_then(|mime| implied_charset(&mime)),
    };

    charset
        .and_then(|charset| decode_text(data, &charset))
        .map(Value::String)
        .unwrap_or_else(|| Value::Bytes(data.to_vec()))
}

fn sniffed_type(data: &[u8]) -> Option<Mime> {
    infer::get(data)
        .and_then(|kind| kind.mime_type().parse().ok())
}

fn implied_charset(mime: &Mime) -> Option<String> {
    let textual = mime.type_() == mime::TEXT
        || mime.subtype() == mime::JSON
        || mime.suffix() == Some(mime::JSON)
        || mime.subtype() == mime::JAVASCRIPT;
    textual.then(|| "utf-8".to_string())
}

fn decode_text(data: &[u8], charset: &str) -> Option<String> {
    match charset.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => Some(String::from_utf8_lossy(data).into_owned()),
        "iso-8859-1" | "latin1" | "binary" => Some(data.iter().map(|&b| char::from(b)).collect()),
        "utf-16le" | "utf16le" | "ucs-2" | "ucs2" => {
            let units = data
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
            Some(
                char::decode_utf16(units)
                    .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                    .collect(),
            )
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use http::HeaderValue;
    use std::io::Write;

    #[test]
    fn form_pairs_decode_and_collect() {
        let value = form_pairs(b"name=Hello+World&n=%2F&n=2&n=3");
        assert_eq!(value.get("name"), Some(&Value::from("Hello World")));
        assert_eq!(value.get("n"), Some(&Value::from(vec!["/", "2", "3"])));
        assert_eq!(form_pairs(b""), Value::map());
    }

    #[test]
    fn file_charset_resolution() {
        assert_eq!(
            file_value(b"caf\xe9", Some("text/plain; charset=latin1")),
            Value::from("café")
        );
        assert_eq!(file_value(b"{}", Some("application/json")), Value::from("{}"));
        assert_eq!(
            file_value(&[0x89, 0x50], Some("image/png")),
            Value::bytes(vec![0x89, 0x50])
        );
        assert_eq!(file_value(&[1, 2], None), Value::bytes(vec![1, 2]));
        assert_eq!(
            file_value(b"x", Some("text/plain; charset=koi8-r")),
            Value::bytes(b"x".to_vec())
        );
    }

    #[test]
    fn untyped_files_are_sniffed_not_named() {
        // Plain text has no magic number, so it stays bytes.
        assert_eq!(file_value(b"hi", None), Value::bytes(b"hi".to_vec()));

        let png = [0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0x0d];
        assert_eq!(sniffed_type(&png), Some(mime::IMAGE_PNG));
        assert_eq!(file_value(&png, None), Value::bytes(png.to_vec()));
    }

    #[tokio::test]
    async fn body_limit_is_enforced() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from(10));
        let err = read_body(Body::from(vec![0u8; 10]), &headers, 4).await.unwrap_err();
        assert_eq!(err.status, http::StatusCode::PAYLOAD_TOO_LARGE);

        let err = read_body(Body::from(vec![0u8; 10]), &HeaderMap::new(), 4)
            .await
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn gzip_bodies_are_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"name":"World"}"#).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        let body = read_body(Body::from(compressed), &headers, 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"name":"World"}"#);
    }

    #[tokio::test]
    async fn inflated_bodies_respect_the_limit() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[b'a'; 64]).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("deflate"));
        let err = read_body(Body::from(compressed.clone()), &headers, 16)
            .await
            .unwrap_err();
        assert_eq!(err.status, http::StatusCode::PAYLOAD_TOO_LARGE);

        let body = read_body(Body::from(compressed), &headers, 64).await.unwrap();
        assert_eq!(body.len(), 64);
    }

    #[tokio::test]
    async fn unknown_encoding_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_ENCODING, HeaderValue::from_static("br"));
        let err = read_body(Body::from("x"), &headers, 1024).await.unwrap_err();
        assert_eq!(err.status, http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
