//! The callable side of a handler.
//!
//! A [`Function`] receives positional arguments assembled from the request
//! and returns an [`Output`]. Synchronous and asynchronous closures are
//! adapted with [`sync_fn`] and [`async_fn`].

use std::future::Future;
use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use wirefn_core::Value;

use crate::context::HttpContext;
use crate::error::FunctionError;

/// A lazily produced response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// One positional argument.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Context(HttpContext),
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Context(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Arg::Value(value) => Some(value),
            Arg::Context(_) => None,
        }
    }

    pub fn as_context(&self) -> Option<&HttpContext> {
        match self {
            Arg::Context(context) => Some(context),
            Arg::Value(_) => None,
        }
    }
}

/// What a function produced.
pub enum Output {
    /// Validated against the return schema, then serialized.
    Value(Value),
    /// Piped to the client as `application/octet-stream`.
    Stream(ByteStream),
    /// Applied to the response verbatim.
    Http(RawResponse),
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Output::Stream(_) => f.write_str("Stream(..)"),
            Output::Http(raw) => f.debug_tuple("Http").field(raw).finish(),
        }
    }
}

impl From<Value> for Output {
    fn from(value: Value) -> Self {
        Output::Value(value)
    }
}

impl From<RawResponse> for Output {
    fn from(raw: RawResponse) -> Self {
        Output::Http(raw)
    }
}

impl From<ByteStream> for Output {
    fn from(stream: ByteStream) -> Self {
        Output::Stream(stream)
    }
}

/// A response built by the function itself: `{ statusCode, headers, body }`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl RawResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            headers: Vec::new(),
            body: Value::Null,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = body.into();
        self
    }

    /// Read the `{ statusCode, headers, body }` shape out of a plain value.
    pub fn from_value(value: Value) -> Option<Self> {
        let mut map = value.into_map()?;
        let status_code = match map.remove("statusCode")? {
            Value::Integer(code) => u16::try_from(code).ok()?,
            _ => return None,
        };
        let headers = match map.remove("headers") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(headers)) => headers
                .into_iter()
                .map(|(name, value)| {
                    let value = match value {
                        Value::String(s) => s,
                        other => other.to_json().to_string(),
                    };
                    (name, value)
                })
                .collect(),
            Some(_) => return None,
        };
        Some(Self {
            status_code,
            headers,
            body: map.remove("body").unwrap_or(Value::Null),
        })
    }
}

/// A remotely callable function.
#[async_trait]
pub trait Function: Send + Sync + 'static {
    async fn call(&self, args: Vec<Arg>) -> Result<Output, FunctionError>;
}

/// Adapter for a synchronous closure. See [`sync_fn`].
pub struct SyncFn<F>(F);

/// Adapter for a closure returning a future. See [`async_fn`].
pub struct AsyncFn<F>(F);

/// Wrap a synchronous closure.
///
/// ```rust
/// use wirefn_core::Value;
/// use wirefn_http::{sync_fn, Arg, FunctionError};
///
/// let hello = sync_fn(|args: Vec<Arg>| -> Result<Value, FunctionError> {
///     let name = args[0].as_value().and_then(Value::as_str).unwrap_or("World");
///     Ok(Value::from(format!("Hello {}!", name)))
/// });
/// # let _ = hello;
/// ```
pub fn sync_fn<F, O>(f: F) -> SyncFn<F>
where
    F: Fn(Vec<Arg>) -> Result<O, FunctionError> + Send + Sync + 'static,
    O: Into<Output>,
{
    SyncFn(f)
}

/// Wrap a closure returning a future.
pub fn async_fn<F, Fut, O>(f: F) -> AsyncFn<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, FunctionError>> + Send + 'static,
    O: Into<Output>,
{
    AsyncFn(f)
}

#[async_trait]
impl<F, O> Function for SyncFn<F>
where
    F: Fn(Vec<Arg>) -> Result<O, FunctionError> + Send + Sync + 'static,
    O: Into<Output>,
{
    async fn call(&self, args: Vec<Arg>) -> Result<Output, FunctionError> {
        (self.0)(args).map(Into::into)
    }
}

#[async_trait]
impl<F, Fut, O> Function for AsyncFn<F>
where
    F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, FunctionError>> + Send + 'static,
    O: Into<Output> + Send,
{
    async fn call(&self, args: Vec<Arg>) -> Result<Output, FunctionError> {
        (self.0)(args).await.map(Into::into)
    }
}
