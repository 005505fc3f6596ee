//! wirefn core: definitions, values and schema-driven coercion.
//!
//! This crate is transport-agnostic. It knows how to:
//! - describe a callable function (`Definition`)
//! - hold dynamically typed payloads (`Value`)
//! - convert wire strings to native values and back (`CoercionRegistry`)
//! - validate payloads against JSON Schema while filling defaults and
//!   coercing types (`Validator`, `Decoder`, `Encoder`)
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use wirefn_core::{Validator, Value};
//!
//! let validator = Validator::default();
//! let decoder = validator
//!     .decoder(&json!({
//!         "type": "object",
//!         "properties": {"when": {"type": "string", "coerceTo": "Date"}},
//!     }))
//!     .unwrap();
//!
//! let decoded = decoder.decode_json(json!({"when": "2019-01-19T20:42:45.310Z"})).unwrap();
//! assert!(matches!(decoded.get("when"), Some(Value::Timestamp(_))));
//! ```

pub mod coercion;
pub mod definition;
mod error;
mod schema;
mod validator;
mod value;

pub use coercion::{Coercion, CoercionRegistry};
pub use definition::{Config, Definition, DefinitionBuilder, Params, Returns};
pub use error::{DefinitionError, Error, Result, SchemaError, ValidationError, ValidationErrors};
pub use schema::{JsonType, Schema};
pub use validator::{Decoder, Direction, Encoder, Validator};
pub use value::Value;
