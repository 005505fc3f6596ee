//! Named coercions between wire strings and native values.
//!
//! A schema leaf annotated with `coerceTo: <name>` (or `coerceFrom: <name>`)
//! is converted through the coercion registered under that name. Decoding
//! turns the wire string into a native [`Value`]; encoding turns the native
//! value back into a string.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::value::Value;

/// Name of the built-in binary-blob coercion.
pub const BUFFER: &str = "Buffer";

/// Name of the built-in timestamp coercion.
pub const DATE: &str = "Date";

type DecodeFn = dyn Fn(&str) -> Result<Value, String> + Send + Sync;
type EncodeFn = dyn Fn(&Value) -> Result<String, String> + Send + Sync;

/// A symmetric pair of pure conversion functions.
pub struct Coercion {
    name: String,
    decode: Box<DecodeFn>,
    encode: Box<EncodeFn>,
    /// Strings that already decode cleanly are treated as wire form when
    /// encoding.
    wire_passthrough: bool,
}

impl Coercion {
    pub fn new<D, E>(name: impl Into<String>, decode: D, encode: E) -> Self
    where
        D: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
        E: Fn(&Value) -> Result<String, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            decode: Box::new(decode),
            encode: Box::new(encode),
            wire_passthrough: false,
        }
    }

    /// Accept already-encoded strings as-is when encoding. The built-in
    /// coercions do this; their native values are never strings.
    pub fn with_wire_passthrough(mut self) -> Self {
        self.wire_passthrough = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wire string to native value.
    pub fn decode(&self, wire: &str) -> Result<Value, String> {
        (self.decode)(wire)
    }

    /// Native value to wire string.
    ///
    /// With wire passthrough, a string that decodes cleanly is returned
    /// unchanged so encoding an encoded value never transforms it twice.
    pub fn encode(&self, native: &Value) -> Result<String, String> {
        match native {
            Value::String(wire) if self.wire_passthrough => {
                self.decode(wire)?;
                Ok(wire.clone())
            }
            other => (self.encode)(other),
        }
    }
}

impl fmt::Debug for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coercion").field("name", &self.name).finish()
    }
}

/// Registry of coercions, keyed by the name used in schema annotations.
///
/// The registry is read-only once validators have been compiled from it;
/// compiled schemas hold `Arc`s to the entries they use.
#[derive(Debug, Clone)]
pub struct CoercionRegistry {
    entries: BTreeMap<String, Arc<Coercion>>,
}

impl CoercionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a coercion, replacing any previous entry with the same name.
    pub fn register<D, E>(&mut self, name: impl Into<String>, decode: D, encode: E)
    where
        D: Fn(&str) -> Result<Value, String> + Send + Sync + 'static,
        E: Fn(&Value) -> Result<String, String> + Send + Sync + 'static,
    {
        self.insert(Coercion::new(name, decode, encode));
    }

    /// Register a prebuilt coercion, replacing any previous entry with the
    /// same name.
    pub fn insert(&mut self, coercion: Coercion) {
        self.entries
            .insert(coercion.name.clone(), Arc::new(coercion));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Coercion>> {
        self.entries.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl Default for CoercionRegistry {
    /// A registry holding the built-in `Buffer` and `Date` coercions.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.insert(Coercion::new(BUFFER, decode_buffer, encode_buffer).with_wire_passthrough());
        registry.insert(Coercion::new(DATE, decode_date, encode_date).with_wire_passthrough());
        registry
    }
}

fn decode_buffer(wire: &str) -> Result<Value, String> {
    base64::engine::general_purpose::STANDARD
        .decode(wire.trim())
        .map(Value::Bytes)
        .map_err(|e| format!("Invalid Buffer \"{}\": {}", wire, e))
}

fn encode_buffer(native: &Value) -> Result<String, String> {
    match native {
        Value::Bytes(bytes) => Ok(base64::engine::general_purpose::STANDARD.encode(bytes)),
        other => Err(format!("expected bytes, found {}", other.kind())),
    }
}

fn decode_date(wire: &str) -> Result<Value, String> {
    parse_date(wire.trim())
        .map(Value::Timestamp)
        .ok_or_else(|| format!("Invalid Date \"{}\"", wire))
}

fn encode_date(native: &Value) -> Result<String, String> {
    match native {
        Value::Timestamp(t) => Ok(format_timestamp(t)),
        other => Err(format!("expected timestamp, found {}", other.kind())),
    }
}

/// RFC 3339 in UTC. Milliseconds are always written; finer fractions only
/// when present, so decoding gives back the same instant.
pub(crate) fn format_timestamp(t: &DateTime<Utc>) -> String {
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 {
        t.to_rfc3339_opts(SecondsFormat::Millis, true)
    } else {
        t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Parse the ISO-8601 forms clients actually send: full RFC 3339, a
/// zone-less date-time (taken as UTC), or a bare calendar date.
pub(crate) fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn default_registry_has_builtins() {
        let registry = CoercionRegistry::default();
        assert!(registry.contains(BUFFER));
        assert!(registry.contains(DATE));
        assert!(registry.get("Regex").is_none());
    }

    #[test]
    fn date_roundtrip_keeps_milliseconds() {
        let date = CoercionRegistry::default().get(DATE).unwrap();
        let native = date.decode("2019-01-19T20:42:45.310Z").unwrap();
        assert_eq!(
            native,
            Value::Timestamp(
                Utc.with_ymd_and_hms(2019, 1, 19, 20, 42, 45).unwrap()
                    + chrono::Duration::milliseconds(310)
            )
        );
        assert_eq!(date.encode(&native).unwrap(), "2019-01-19T20:42:45.310Z");
    }

    #[test]
    fn date_accepts_offsets_and_bare_dates() {
        let date = CoercionRegistry::default().get(DATE).unwrap();
        assert_eq!(
            date.decode("2019-01-19T21:42:45+01:00").unwrap(),
            Value::Timestamp(Utc.with_ymd_and_hms(2019, 1, 19, 20, 42, 45).unwrap())
        );
        assert_eq!(
            date.decode("2019-01-19").unwrap(),
            Value::Timestamp(Utc.with_ymd_and_hms(2019, 1, 19, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn date_rejects_garbage() {
        let date = CoercionRegistry::default().get(DATE).unwrap();
        let err = date.decode("not-a-date").unwrap_err();
        assert!(err.contains("Invalid Date"));
        assert!(err.contains("not-a-date"));
    }

    #[test]
    fn buffer_roundtrip() {
        let buffer = CoercionRegistry::default().get(BUFFER).unwrap();
        let native = buffer.decode("aGVsbG8=").unwrap();
        assert_eq!(native, Value::bytes(b"hello".to_vec()));
        assert_eq!(buffer.encode(&native).unwrap(), "aGVsbG8=");
    }

    #[test]
    fn encoding_an_encoded_value_is_identity() {
        let buffer = CoercionRegistry::default().get(BUFFER).unwrap();
        assert_eq!(buffer.encode(&Value::from("aGVsbG8=")).unwrap(), "aGVsbG8=");
        assert!(buffer.encode(&Value::from("%%%")).is_err());
    }

    #[test]
    fn encode_rejects_wrong_native_kind() {
        let date = CoercionRegistry::default().get(DATE).unwrap();
        let err = date.encode(&Value::Integer(3)).unwrap_err();
        assert!(err.contains("expected timestamp"));
    }

    #[test]
    fn custom_registration() {
        let mut registry = CoercionRegistry::new();
        registry.register(
            "Upper",
            |s| Ok(Value::from(s.to_uppercase())),
            |v| Ok(v.as_str().unwrap_or_default().to_lowercase()),
        );

        let upper = registry.get("Upper").unwrap();
        assert_eq!(upper.name(), "Upper");
        assert_eq!(upper.decode("abc").unwrap(), Value::from("ABC"));
        assert_eq!(upper.encode(&Value::from("ABC")).unwrap(), "abc");
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["Upper"]);
    }

    #[test]
    fn date_roundtrip_keeps_sub_millisecond_precision() {
        let date = CoercionRegistry::default().get(DATE).unwrap();
        let native = Value::Timestamp(Utc.timestamp_nanos(1_547_930_565_310_123_456));

        let wire = date.encode(&native).unwrap();
        assert_eq!(wire, "2019-01-19T20:42:45.310123456Z");
        assert_eq!(date.decode(&wire).unwrap(), native);

        let micros = Value::Timestamp(Utc.timestamp_nanos(1_547_930_565_310_123_000));
        assert_eq!(date.encode(&micros).unwrap(), "2019-01-19T20:42:45.310123Z");
    }
}
