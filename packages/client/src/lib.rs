//! Call a function served by `wirefn-http` as if it were local.
//!
//! The client validates and encodes arguments against the function's
//! [`Definition`](wirefn_core::Definition) before anything is sent, and
//! validates and decodes the response before handing it back.
//!
//! ```rust,no_run
//! # async fn run() -> Result<(), wirefn_client::ClientError> {
//! use serde_json::json;
//! use wirefn_client::HttpClient;
//! use wirefn_core::{Definition, Value};
//!
//! let definition = Definition::builder("hello")
//!     .param_with_default("name", json!({"type": "string"}), json!("World"))
//!     .returns(json!({"type": "string"}))
//!     .build()?;
//!
//! let hello = HttpClient::new(definition, "http://localhost:3000/")?;
//! let greeting = hello.call(vec![Value::from("Bar")]).await?;
//! assert_eq!(greeting, Value::from("Hello Bar!"));
//! # Ok(())
//! # }
//! ```

pub mod call;
mod client;
mod error;
pub mod executor;

pub use call::{CallArgs, CallShape};
pub use client::HttpClient;
pub use error::ClientError;
pub use executor::{CallRequest, CallResponse, ClientConfig, HttpExecutor, ReqwestExecutor};
