//! # wirefn-http
//!
//! Serve a function described by a [`wirefn_core::Definition`] over HTTP.
//!
//! An [`HttpHandler`] turns each request into positional arguments:
//!
//! - `GET` parameters come from the query string
//! - `POST` parameters come from a JSON body, a urlencoded form, or a
//!   multipart form (uploaded files included)
//! - parameters are validated and decoded against the Definition's schema,
//!   with defaults filled and `Date` / `Buffer` leaves converted to native
//!   values
//!
//! The function's result is validated against the return schema and
//! serialized as JSON, text or bytes.
//!
//! ```rust,no_run
//! use serde_json::json;
//! use wirefn_core::{Definition, Value};
//! use wirefn_http::{sync_fn, Arg, FunctionError, HttpHandler, HttpServer};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let definition = Definition::builder("hello")
//!     .param_with_default("name", json!({"type": "string"}), json!("World"))
//!     .returns(json!({"type": "string"}))
//!     .build()?;
//!
//! let handler = HttpHandler::new(
//!     definition,
//!     sync_fn(|args: Vec<Arg>| -> Result<Value, FunctionError> {
//!         let name = args[0].as_value().and_then(Value::as_str).unwrap_or_default();
//!         Ok(Value::from(format!("Hello {}!", name)))
//!     }),
//! )?;
//!
//! let server = HttpServer::bind("127.0.0.1:3000", handler).await?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod function;
pub mod handler;
pub mod server;

mod extract;
mod respond;

pub use context::HttpContext;
pub use error::{FunctionError, HttpError};
pub use function::{async_fn, sync_fn, Arg, AsyncFn, ByteStream, Function, Output, RawResponse, SyncFn};
pub use handler::{CorsOptions, HandlerOptions, HttpHandler, DEFAULT_BODY_LIMIT};
pub use server::HttpServer;
