//! Request context handed to functions that declare a context parameter.
//!
//! Modelled on the request helpers of Koa-style frameworks: read-only views
//! of the request line and headers, content negotiation, and a small amount
//! of response state (status and headers) the function may set before it
//! returns.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::ConnectInfo;
use http::header::{HeaderName, HeaderValue, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, HOST};
use http::request::Parts;
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use mime::Mime;
use wirefn_core::Value;

use crate::extract::form_pairs;

#[derive(Debug, Clone)]
pub struct HttpContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    query: Value,
    remote_addr: Option<SocketAddr>,
    response: Mutex<ResponseState>,
}

#[derive(Debug, Default)]
struct ResponseState {
    status: Option<StatusCode>,
    headers: HeaderMap,
}

impl HttpContext {
    pub fn new(parts: &Parts) -> Self {
        let query = form_pairs(parts.uri.query().unwrap_or_default().as_bytes());
        let remote_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            inner: Arc::new(Inner {
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                version: parts.version,
                headers: parts.headers.clone(),
                query,
                remote_addr,
                response: Mutex::new(ResponseState::default()),
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn version(&self) -> Version {
        self.inner.version
    }

    /// The request target as sent: path plus query.
    pub fn url(&self) -> String {
        self.inner
            .uri
            .path_and_query()
            .map(|p| p.as_str().to_string())
            .unwrap_or_else(|| self.inner.uri.to_string())
    }

    pub fn path(&self) -> &str {
        self.inner.uri.path()
    }

    /// Raw query string, without the leading `?`.
    pub fn querystring(&self) -> &str {
        self.inner.uri.query().unwrap_or_default()
    }

    /// Parsed query string: a map of strings, with repeated keys collected
    /// into arrays.
    pub fn query(&self) -> &Value {
        &self.inner.query
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    /// A request header as a string. `Referer` and `Referrer` are aliases.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        let lookup = |n: &str| self.inner.headers.get(n).and_then(|v| v.to_str().ok());
        match name.as_str() {
            "referer" | "referrer" => lookup("referrer").or_else(|| lookup("referer")),
            other => lookup(other),
        }
    }

    pub fn content_type(&self) -> Option<Mime> {
        self.header(CONTENT_TYPE.as_str())?.parse().ok()
    }

    pub fn charset(&self) -> Option<String> {
        self.content_type()?
            .get_param(mime::CHARSET)
            .map(|c| c.as_str().to_string())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())?.trim().parse().ok()
    }

    /// Whether the request body has the given type.
    ///
    /// Accepts full types (`application/json`), wildcards (`multipart/*`),
    /// structured suffixes (`+json`), file extensions (`json`) and the
    /// shorthands `urlencoded` and `multipart`.
    pub fn is(&self, expected: &str) -> bool {
        let Some(actual) = self.content_type() else {
            return false;
        };
        let expected = match expected {
            "urlencoded" => "application/x-www-form-urlencoded".to_string(),
            "multipart" => "multipart/*".to_string(),
            t if t.starts_with('+') => format!("*/*{}", t),
            t if !t.contains('/') => match mime_guess::from_ext(t).first() {
                Some(guessed) => guessed.essence_str().to_string(),
                None => return false,
            },
            t => t.to_ascii_lowercase(),
        };
        let Some((type_, subtype)) = expected.split_once('/') else {
            return false;
        };

        let type_matches = type_ == "*" || type_ == actual.type_().as_str();
        let subtype_matches = match subtype.strip_prefix("*+") {
            Some(suffix) => actual.suffix().is_some_and(|s| s.as_str() == suffix),
            None => subtype == "*" || subtype == actual.subtype().as_str(),
        };
        type_matches && subtype_matches
    }

    /// Pick the offered type the client prefers, per the `Accept` header.
    ///
    /// Offers may be full types or extensions (`"json"`, `"text"`). Returns
    /// `None` when the client accepts none of them; with no `Accept` header
    /// the first offer wins.
    pub fn accepts<'a>(&self, offered: &[&'a str]) -> Option<&'a str> {
        let ranges = match self.header(ACCEPT.as_str()) {
            Some(accept) => parse_accept(accept),
            None => return offered.first().copied(),
        };

        let mut candidates: Vec<(Priority, usize, &'a str)> = offered
            .iter()
            .enumerate()
            .filter_map(|(i, offer)| {
                let mime = offer_mime(offer)?;
                let priority = best_priority(&mime, &ranges)?;
                (priority.q > 0.0).then_some((priority, i, *offer))
            })
            .collect();

        candidates.sort_by(|(a, ai, _), (b, bi, _)| {
            b.q.total_cmp(&a.q)
                .then(b.specificity.cmp(&a.specificity))
                .then(a.index.cmp(&b.index))
                .then(ai.cmp(bi))
        });
        candidates.first().map(|(_, _, offer)| *offer)
    }

    /// Host as sent by the client, without anything after a comma.
    pub fn host(&self) -> &str {
        let host = self
            .inner
            .uri
            .authority()
            .map(|a| a.as_str())
            .or_else(|| self.header(HOST.as_str()))
            .unwrap_or_default();
        host.split(',').next().unwrap_or_default().trim()
    }

    /// Host without the port.
    pub fn hostname(&self) -> &str {
        let host = self.host();
        if host.starts_with('[') {
            return match host.find(']') {
                Some(end) => &host[..=end],
                None => host,
            };
        }
        host.split(':').next().unwrap_or_default()
    }

    /// `https` when the URI or a proxy says so, else `http`.
    pub fn protocol(&self) -> &str {
        if let Some(proto) = self.header("x-forwarded-proto") {
            if let Some(first) = proto.split(',').next() {
                return first.trim();
            }
        }
        match self.inner.uri.scheme_str() {
            Some("https") => "https",
            _ => "http",
        }
    }

    pub fn secure(&self) -> bool {
        self.protocol() == "https"
    }

    pub fn origin(&self) -> String {
        format!("{}://{}", self.protocol(), self.host())
    }

    /// Full request URL.
    pub fn href(&self) -> String {
        if self.inner.uri.scheme().is_some() {
            return self.inner.uri.to_string();
        }
        format!("{}{}", self.origin(), self.url())
    }

    /// Peer address, when the server was started with connection info.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Set a response header. Replaces any previous value.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), http::Error> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.response().headers.insert(name, value);
        Ok(())
    }

    /// Set the response status, overriding the default 200/204.
    pub fn set_status(&self, status: StatusCode) {
        self.response().status = Some(status);
    }

    pub fn response_status(&self) -> Option<StatusCode> {
        self.response().status
    }

    pub(crate) fn response_headers(&self) -> HeaderMap {
        self.response().headers.clone()
    }

    fn response(&self) -> MutexGuard<'_, ResponseState> {
        self.inner
            .response
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

struct MediaRange {
    mime: Mime,
    q: f32,
    index: usize,
}

#[derive(Debug, Clone, Copy)]
struct Priority {
    q: f32,
    specificity: u8,
    index: usize,
}

fn parse_accept(header: &str) -> Vec<MediaRange> {
    header
        .split(',')
        .enumerate()
        .filter_map(|(index, entry)| {
            let mime: Mime = entry.trim().parse().ok()?;
            let q = mime
                .get_param("q")
                .and_then(|q| q.as_str().parse::<f32>().ok())
                .unwrap_or(1.0);
            Some(MediaRange { mime, q, index })
        })
        .collect()
}

fn offer_mime(offer: &str) -> Option<Mime> {
    if offer.contains('/') {
        offer.parse().ok()
    } else {
        mime_guess::from_ext(offer).first()
    }
}

fn best_priority(offer: &Mime, ranges: &[MediaRange]) -> Option<Priority> {
    let mut best: Option<Priority> = None;
    for range in ranges {
        let mut specificity = 0;
        if range.mime.type_() == offer.type_() {
            specificity |= 4;
        } else if range.mime.type_() != mime::STAR {
            continue;
        }
        if range.mime.subtype() == offer.subtype() {
            specificity |= 2;
        } else if range.mime.subtype() != mime::STAR {
            continue;
        }

        let candidate = Priority {
            q: range.q,
            specificity,
            index: range.index,
        };
        best = match best {
            Some(current)
                if current.specificity > candidate.specificity
                    || (current.specificity == candidate.specificity
                        && current.q >= candidate.q) =>
            {
                Some(current)
            }
            _ => Some(candidate),
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    fn context(request: Request<()>) -> HttpContext {
        let (parts, _) = request.into_parts();
        HttpContext::new(&parts)
    }

    fn with_accept(accept: &str) -> HttpContext {
        context(
            Request::get("/")
                .header(ACCEPT, accept)
                .body(())
                .unwrap(),
        )
    }

    #[test]
    fn query_collects_repeated_keys() {
        let ctx = context(Request::get("/fn?name=World&tag=a&tag=b").body(()).unwrap());
        assert_eq!(ctx.querystring(), "name=World&tag=a&tag=b");
        assert_eq!(ctx.query().get("name"), Some(&Value::from("World")));
        assert_eq!(ctx.query().get("tag"), Some(&Value::from(vec!["a", "b"])));
        assert_eq!(ctx.path(), "/fn");
        assert_eq!(ctx.url(), "/fn?name=World&tag=a&tag=b");
    }

    #[test]
    fn content_type_checks() {
        let ctx = context(
            Request::post("/")
                .header(CONTENT_TYPE, "application/json; charset=utf-8")
                .body(())
                .unwrap(),
        );
        assert!(ctx.is("application/json"));
        assert!(ctx.is("json"));
        assert!(ctx.is("application/*"));
        assert!(!ctx.is("urlencoded"));
        assert_eq!(ctx.charset().as_deref(), Some("utf-8"));

        let ctx = context(
            Request::post("/")
                .header(CONTENT_TYPE, "multipart/form-data; boundary=x")
                .body(())
                .unwrap(),
        );
        assert!(ctx.is("multipart"));
        assert!(ctx.is("multipart/form-data"));

        let ctx = context(
            Request::post("/")
                .header(CONTENT_TYPE, "application/vnd.api+json")
                .body(())
                .unwrap(),
        );
        assert!(ctx.is("+json"));
    }

    #[test]
    fn negotiation_prefers_text_for_wildcards() {
        assert_eq!(with_accept("*/*").accepts(&["text", "json"]), Some("text"));
        assert_eq!(
            with_accept("application/json").accepts(&["text", "json"]),
            Some("json")
        );
        assert_eq!(
            with_accept("application/json, text/plain;q=0.5").accepts(&["text", "json"]),
            Some("json")
        );
        assert_eq!(
            with_accept("text/html,application/xhtml+xml,*/*;q=0.8").accepts(&["text", "json"]),
            Some("text")
        );
        assert_eq!(with_accept("image/png").accepts(&["text", "json"]), None);
    }

    #[test]
    fn negotiation_without_accept_takes_first_offer() {
        let ctx = context(Request::get("/").body(()).unwrap());
        assert_eq!(ctx.accepts(&["text", "json"]), Some("text"));
    }

    #[test]
    fn host_and_origin() {
        let ctx = context(
            Request::get("/a?b=c")
                .header(HOST, "example.com:8080")
                .header("x-forwarded-proto", "https")
                .body(())
                .unwrap(),
        );
        assert_eq!(ctx.host(), "example.com:8080");
        assert_eq!(ctx.hostname(), "example.com");
        assert_eq!(ctx.protocol(), "https");
        assert!(ctx.secure());
        assert_eq!(ctx.origin(), "https://example.com:8080");
        assert_eq!(ctx.href(), "https://example.com:8080/a?b=c");

        let ctx = context(Request::get("/").header(HOST, "[::1]:3000").body(()).unwrap());
        assert_eq!(ctx.hostname(), "[::1]");
        assert_eq!(ctx.protocol(), "http");
    }

    #[test]
    fn referrer_alias() {
        let ctx = context(
            Request::get("/")
                .header("referer", "https://example.com/")
                .body(())
                .unwrap(),
        );
        assert_eq!(ctx.header("Referrer"), Some("https://example.com/"));
    }

    #[test]
    fn response_state_is_shared_between_clones() {
        let ctx = context(Request::get("/").body(()).unwrap());
        let clone = ctx.clone();
        clone.set_status(StatusCode::CREATED);
        clone.set_header("X-Trace", "abc").unwrap();

        assert_eq!(ctx.response_status(), Some(StatusCode::CREATED));
        assert_eq!(ctx.response_headers()["x-trace"], "abc");
        assert!(ctx.set_header("bad header", "x").is_err());
    }
}
