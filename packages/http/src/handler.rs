use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::Router;
use futures::FutureExt;
use http::header::{
    HeaderName, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS,
    ACCESS_CONTROL_MAX_AGE,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use wirefn_core::coercion::BUFFER;
use wirefn_core::definition::RESULT;
use wirefn_core::{Decoder, Definition, Encoder, Validator, Value};

use crate::context::HttpContext;
use crate::error::HttpError;
use crate::extract;
use crate::function::{Arg, Function, Output, RawResponse};
use crate::respond::{self, Reply};

/// Default request body limit: 100 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 100 * 1024 * 1024;

/// Options for an [`HttpHandler`].
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    /// Log request headers and 5xx messages.
    pub debug: bool,
    /// Indent JSON response bodies.
    pub pretty_json: bool,
    /// Largest accepted request body, after decompression.
    pub body_limit: usize,
    /// `None` disables CORS headers entirely.
    pub cors: Option<CorsOptions>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            debug: false,
            pretty_json: false,
            body_limit: DEFAULT_BODY_LIMIT,
            cors: Some(CorsOptions::default()),
        }
    }
}

impl HandlerOptions {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_pretty_json(mut self, pretty_json: bool) -> Self {
        self.pretty_json = pretty_json;
        self
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }

    pub fn with_cors(mut self, cors: Option<CorsOptions>) -> Self {
        self.cors = cors;
        self
    }
}

/// Cross-origin headers added to every response.
///
/// The allow-methods, allow-headers and max-age headers are only sent on
/// preflight (`OPTIONS`) responses.
#[derive(Debug, Clone)]
pub struct CorsOptions {
    pub allow_methods: Vec<Method>,
    pub allow_headers: Vec<String>,
    pub expose_headers: Vec<String>,
    pub allow_origin: String,
    pub allow_credentials: bool,
    pub max_age: Duration,
}

impl Default for CorsOptions {
    fn default() -> Self {
        Self {
            allow_methods: vec![Method::GET, Method::POST, Method::OPTIONS, Method::HEAD],
            allow_headers: [
                "X-Requested-With",
                "Access-Control-Allow-Origin",
                "X-HTTP-Method-Override",
                "Content-Type",
                "Authorization",
                "Accept",
            ]
            .iter()
            .map(|h| h.to_string())
            .collect(),
            expose_headers: Vec::new(),
            allow_origin: "*".to_string(),
            allow_credentials: true,
            max_age: Duration::from_secs(60 * 60 * 24),
        }
    }
}

impl CorsOptions {
    fn apply(&self, method: &Method, headers: &mut HeaderMap) {
        let mut set = |name: HeaderName, value: String| {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        };

        set(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        if self.allow_credentials {
            set(ACCESS_CONTROL_ALLOW_CREDENTIALS, "true".to_string());
        }
        if !self.expose_headers.is_empty() {
            set(ACCESS_CONTROL_EXPOSE_HEADERS, self.expose_headers.join(","));
        }
        if method == Method::OPTIONS {
            let methods: Vec<&str> = self.allow_methods.iter().map(Method::as_str).collect();
            set(ACCESS_CONTROL_ALLOW_METHODS, methods.join(","));
            set(ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.join(","));
            set(ACCESS_CONTROL_MAX_AGE, self.max_age.as_secs().to_string());
        }
    }
}

/// Serves one function described by a [`Definition`].
///
/// Validators are compiled once on construction. The handler is cheap to
/// clone and every clone shares them.
#[derive(Clone)]
pub struct HttpHandler {
    inner: Arc<Inner>,
}

struct Inner {
    definition: Definition,
    function: Box<dyn Function>,
    /// `None` for raw HTTP params.
    decoder: Option<Decoder>,
    /// `None` for raw HTTP returns.
    encoder: Option<Encoder>,
    accepts_stream: bool,
    options: HandlerOptions,
}

impl HttpHandler {
    pub fn new(definition: Definition, function: impl Function) -> wirefn_core::Result<Self> {
        Self::with_options(definition, function, HandlerOptions::default())
    }

    pub fn with_options(
        definition: Definition,
        function: impl Function,
        options: HandlerOptions,
    ) -> wirefn_core::Result<Self> {
        Self::with_validator(definition, function, options, &Validator::default())
    }

    /// Build with a validator carrying custom coercions.
    pub fn with_validator(
        definition: Definition,
        function: impl Function,
        options: HandlerOptions,
        validator: &Validator,
    ) -> wirefn_core::Result<Self> {
        definition.validate()?;

        let decoder = if definition.params.http {
            None
        } else {
            Some(validator.decoder(&definition.params.schema)?)
        };
        let (encoder, accepts_stream) = if definition.returns.http {
            (None, true)
        } else {
            let encoder = validator.encoder(&definition.returns.schema)?;
            let schema = encoder.schema();
            let accepts_stream = schema.property_is_unconstrained(RESULT)
                || schema.property_coercion(RESULT) == Some(BUFFER);
            (Some(encoder), accepts_stream)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                definition,
                function: Box::new(function),
                decoder,
                encoder,
                accepts_stream,
                options,
            }),
        })
    }

    pub fn definition(&self) -> &Definition {
        &self.inner.definition
    }

    pub fn options(&self) -> &HandlerOptions {
        &self.inner.options
    }

    /// Serve one request. Never fails: errors become error responses.
    pub async fn handle(&self, request: Request<Body>) -> Response<Body> {
        let method = request.method().clone();
        let title = &self.inner.definition.title;
        tracing::debug!(function = %title, %method, uri = %request.uri(), "request");
        if self.inner.options.debug {
            tracing::trace!(function = %title, headers = ?request.headers(), "request headers");
        }

        let mut response = match self.respond(request).await {
            Ok(response) => response,
            Err(error) => {
                if error.status == StatusCode::BAD_GATEWAY || !error.status.is_server_error() {
                    tracing::warn!(function = %title, status = %error.status, "{}", error.message);
                } else if self.inner.options.debug {
                    tracing::error!(function = %title, status = %error.status, "{}", error.message);
                }
                error.into_response()
            }
        };

        if let Some(cors) = &self.inner.options.cors {
            cors.apply(&method, response.headers_mut());
        }
        response
    }

    /// A router sending every path and method to this handler.
    pub fn into_router(self) -> Router {
        Router::new().fallback(move |request: Request<Body>| {
            let handler = self.clone();
            async move { handler.handle(request).await }
        })
    }

    async fn respond(&self, request: Request<Body>) -> Result<Response<Body>, HttpError> {
        let (parts, body) = request.into_parts();
        let context = HttpContext::new(&parts);
        let pretty = self.inner.options.pretty_json;

        if parts.method == Method::OPTIONS {
            return respond::send(&context, StatusCode::OK, Reply::Value(Value::from("ok")), pretty);
        }

        let args = self.arguments(parts, body, &context).await?;
        let output = self.invoke(args).await?;
        self.reply(output, &context)
    }

    async fn arguments(
        &self,
        parts: http::request::Parts,
        body: Body,
        context: &HttpContext,
    ) -> Result<Vec<Arg>, HttpError> {
        let definition = &self.inner.definition;
        let limit = self.inner.options.body_limit;

        let Some(decoder) = &self.inner.decoder else {
            let mut args = Vec::new();
            if !definition.params.order.is_empty() {
                let body = extract::read_body(body, &parts.headers, limit).await?;
                args.push(Arg::Value(Value::Bytes(body.to_vec())));
            }
            if definition.params.context {
                args.push(Arg::Context(context.clone()));
            }
            return Ok(args);
        };

        let params = extract::params(parts, body, context, limit).await?;
        let params = decoder
            .decode(&params)
            .map_err(|errors| HttpError::bad_request(errors.to_string()))?;
        tracing::debug!(function = %definition.title, "parameters decoded");

        let mut bag = params.into_map().unwrap_or_default();
        let mut args: Vec<Arg> = definition
            .params
            .order
            .iter()
            .map(|name| Arg::Value(bag.remove(name).unwrap_or(Value::Null)))
            .collect();

        if definition.params.context {
            args.push(Arg::Context(context.clone()));
        }

        if definition.allows_extra_params() {
            args.extend(
                bag.into_iter()
                    .map(|(name, value)| Arg::Value(Value::Array(vec![Value::String(name), value]))),
            );
        }

        Ok(args)
    }

    async fn invoke(&self, args: Vec<Arg>) -> Result<Output, HttpError> {
        let call = AssertUnwindSafe(self.inner.function.call(args)).catch_unwind();
        match call.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(error)) => Err(HttpError::application(error.to_string())),
            Err(panic) => Err(HttpError::internal(panic_message(panic))),
        }
    }

    fn reply(&self, output: Output, context: &HttpContext) -> Result<Response<Body>, HttpError> {
        let definition = &self.inner.definition;
        let pretty = self.inner.options.pretty_json;

        if definition.returns.http {
            let raw = match output {
                Output::Http(raw) => raw,
                Output::Value(value) => RawResponse::from_value(value).ok_or_else(|| {
                    HttpError::contract(format!(
                        "{} must return {{ statusCode, headers, body }}",
                        definition.title
                    ))
                })?,
                Output::Stream(stream) => {
                    return respond::send(context, StatusCode::OK, Reply::Stream(stream), pretty);
                }
            };
            return self.raw(raw, context);
        }

        match output {
            Output::Http(_) => Err(HttpError::contract(format!(
                "{} returned a raw HTTP response but does not declare one",
                definition.title
            ))),
            Output::Stream(stream) if self.inner.accepts_stream => {
                respond::send(context, StatusCode::OK, Reply::Stream(stream), pretty)
            }
            Output::Stream(_) => Err(HttpError::contract(format!(
                "{} returned a stream but declares a structured return value",
                definition.title
            ))),
            Output::Value(value) => {
                let result = match &self.inner.encoder {
                    Some(encoder) => encoder
                        .encode(&Value::Map([(RESULT.to_string(), value)].into()))
                        .map_err(|errors| HttpError::contract(errors.to_string()))?
                        .into_map()
                        .and_then(|mut wrapper| wrapper.remove(RESULT))
                        .unwrap_or(Value::Null),
                    None => value,
                };
                let status = if result.is_null() {
                    StatusCode::NO_CONTENT
                } else {
                    StatusCode::OK
                };
                respond::send(context, status, Reply::Value(result), pretty)
            }
        }
    }

    fn raw(&self, raw: RawResponse, context: &HttpContext) -> Result<Response<Body>, HttpError> {
        let status = StatusCode::from_u16(raw.status_code).map_err(|_| {
            HttpError::contract(format!("Invalid status code {}", raw.status_code))
        })?;
        context.set_status(status);
        for (name, value) in &raw.headers {
            context
                .set_header(name, value)
                .map_err(|e| HttpError::contract(format!("Invalid header \"{}\": {}", name, e)))?;
        }
        respond::send(context, status, Reply::Value(raw.body), self.inner.options.pretty_json)
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Internal Server Error".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_preflight_headers() {
        let cors = CorsOptions::default();

        let mut headers = HeaderMap::new();
        cors.apply(&Method::GET, &mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert!(headers.get(ACCESS_CONTROL_ALLOW_METHODS).is_none());

        let mut headers = HeaderMap::new();
        cors.apply(&Method::OPTIONS, &mut headers);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "GET,POST,OPTIONS,HEAD");
        assert_eq!(headers[ACCESS_CONTROL_MAX_AGE], "86400");
    }

    #[test]
    fn panic_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(3)), "Internal Server Error");
    }

    #[test]
    fn options_builders() {
        let options = HandlerOptions::default()
            .with_debug(true)
            .with_pretty_json(true)
            .with_body_limit(10)
            .with_cors(None);
        assert!(options.debug);
        assert!(options.pretty_json);
        assert_eq!(options.body_limit, 10);
        assert!(options.cors.is_none());
        assert_eq!(HandlerOptions::default().body_limit, DEFAULT_BODY_LIMIT);
    }
}
