//! Schema-driven decoding and encoding of payloads.
//!
//! A [`Decoder`] turns a wire payload (plain JSON values, as they come out of
//! a request body or query string) into native values; an [`Encoder`] does
//! the reverse before anything is written to the wire. Both are compiled once
//! from the same schema and validate while they transform:
//!
//! - missing properties with a `default` are filled in
//! - scalars are coerced to the declared type (`"42"` against `number`)
//! - leaves annotated with `coerceTo` / `coerceFrom` run through the named
//!   coercion, in the direction of the codec
//! - the transformed value is checked structurally (`required`,
//!   `additionalProperties`, `enum`, ...)
//!
//! The input is never mutated; a successful call returns a new value.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::coercion::CoercionRegistry;
use crate::error::{SchemaError, ValidationError, ValidationErrors};
use crate::schema::{Additional, CoercedNode, Format, Items, JsonType, Node, NodeId, Schema, TypedNode};
use crate::value::Value;

lazy_static::lazy_static! {
    static ref BUILTIN_COERCIONS: Arc<CoercionRegistry> = Arc::new(CoercionRegistry::default());
}

/// Which way a codec converts coerced leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Wire string to native value.
    Decode,
    /// Native value to wire string.
    Encode,
}

/// Compiles schemas into decoders and encoders against one coercion registry.
#[derive(Debug, Clone)]
pub struct Validator {
    registry: Arc<CoercionRegistry>,
}

impl Validator {
    pub fn new(registry: CoercionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &CoercionRegistry {
        &self.registry
    }

    /// Compile a decoder: validates wire data and converts `coerceTo` leaves
    /// into native values.
    pub fn decoder(&self, schema: &Json) -> Result<Decoder, SchemaError> {
        let schema = Schema::compile(schema, &self.registry)?;
        tracing::debug!("compiled decoder over {} properties", schema.property_names().len());
        Ok(Decoder {
            schema: Arc::new(schema),
        })
    }

    /// Compile an encoder: validates native data and converts coerced leaves
    /// back into wire strings.
    pub fn encoder(&self, schema: &Json) -> Result<Encoder, SchemaError> {
        let schema = Schema::compile(schema, &self.registry)?;
        tracing::debug!("compiled encoder over {} properties", schema.property_names().len());
        Ok(Encoder {
            schema: Arc::new(schema),
        })
    }
}

impl Default for Validator {
    /// A validator using the built-in `Buffer` and `Date` coercions.
    fn default() -> Self {
        Self {
            registry: BUILTIN_COERCIONS.clone(),
        }
    }
}

/// Validates and decodes wire payloads. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct Decoder {
    schema: Arc<Schema>,
}

impl Decoder {
    pub fn decode(&self, payload: &Value) -> Result<Value, ValidationErrors> {
        run(&self.schema, Direction::Decode, payload)
    }

    pub fn decode_json(&self, payload: Json) -> Result<Value, ValidationErrors> {
        self.decode(&Value::from_json(payload))
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Validates and encodes native values. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct Encoder {
    schema: Arc<Schema>,
}

impl Encoder {
    pub fn encode(&self, native: &Value) -> Result<Value, ValidationErrors> {
        run(&self.schema, Direction::Encode, native)
    }

    /// Encode and convert straight to JSON for the wire.
    pub fn encode_json(&self, native: &Value) -> Result<Json, ValidationErrors> {
        self.encode(native).map(|value| value.to_json())
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

fn run(schema: &Schema, direction: Direction, value: &Value) -> Result<Value, ValidationErrors> {
    let mut walk = Walk {
        schema,
        direction,
        errors: Vec::new(),
    };
    match walk.visit(schema.root(), value, "data") {
        Some(value) if walk.errors.is_empty() => Ok(value),
        _ => Err(ValidationErrors::new(walk.errors)),
    }
}

struct Walk<'a> {
    schema: &'a Schema,
    direction: Direction,
    errors: Vec<ValidationError>,
}

impl<'a> Walk<'a> {
    fn fail(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(ValidationError {
            path: path.to_string(),
            message: message.into(),
        });
    }

    /// Returns the transformed value, or `None` after recording errors.
    fn visit(&mut self, id: NodeId, value: &Value, path: &str) -> Option<Value> {
        let Some(node) = self.schema.resolve(id) else {
            self.fail(path, "should not use a circular $ref");
            return None;
        };
        match node {
            Node::Never => {
                self.fail(path, "boolean schema is false");
                None
            }
            Node::Coerced(node) => self.coerced(node, value, path),
            Node::Typed(node) => self.typed(node, value, path),
            Node::Ref(target) => self.visit(*target, value, path),
        }
    }

    /// Run a subschema on a scratch walk, keeping its errors out of ours.
    fn attempt(&self, id: NodeId, value: &Value, path: &str) -> Option<Value> {
        let mut scratch = Walk {
            schema: self.schema,
            direction: self.direction,
            errors: Vec::new(),
        };
        scratch
            .visit(id, value, path)
            .filter(|_| scratch.errors.is_empty())
    }

    fn coerced(&mut self, node: &CoercedNode, value: &Value, path: &str) -> Option<Value> {
        if node.passes_through(value) {
            return Some(value.clone());
        }
        let name = node.coercion.name();
        match self.direction {
            Direction::Decode => {
                let wire = match value {
                    Value::String(s) => s.clone(),
                    Value::Integer(_) | Value::Float(_) | Value::Bool(_) => {
                        value.to_json().to_string()
                    }
                    // Already native, e.g. an uploaded file without a charset.
                    Value::Bytes(_) | Value::Timestamp(_) => return Some(value.clone()),
                    other => {
                        self.fail(path, format!("should be string, found {}", other.kind()));
                        return None;
                    }
                };
                match node.coercion.decode(&wire) {
                    Ok(native) => Some(native),
                    Err(message) => {
                        tracing::trace!(coercion = name, %path, "decode failed: {}", message);
                        self.fail(
                            path,
                            format!("coerceTo {} at {}: {}", name, node.pointer, message),
                        );
                        None
                    }
                }
            }
            Direction::Encode => match node.coercion.encode(value) {
                Ok(wire) => Some(Value::String(wire)),
                Err(message) => {
                    tracing::trace!(coercion = name, %path, "encode failed: {}", message);
                    self.fail(
                        path,
                        format!("coerceFrom {} at {}: {}", name, node.pointer, message),
                    );
                    None
                }
            },
        }
    }

    fn typed(&mut self, node: &TypedNode, value: &Value, path: &str) -> Option<Value> {
        let before = self.errors.len();

        let mut current = if node.types.is_empty() || node.types.iter().any(|t| t.matches(value)) {
            value.clone()
        } else {
            match node.types.iter().find_map(|t| coerce_type(value, *t)) {
                Some(coerced) => coerced,
                None => {
                    let names: Vec<&str> = node.types.iter().map(JsonType::name).collect();
                    self.fail(path, format!("should be {}", names.join(",")));
                    return None;
                }
            }
        };

        current = match current {
            Value::Map(map) => Value::Map(self.object(node, map, path)),
            Value::Array(items) => Value::Array(self.array(node, items, path)),
            other => other,
        };

        if let Some(allowed) = &node.enumeration {
            if !allowed.contains(&current) {
                self.fail(path, "should be equal to one of the allowed values");
            }
        }

        if let Some(constant) = &node.constant {
            if constant != &current {
                self.fail(path, "should be equal to constant");
            }
        }

        if node.format == Some(Format::DateTime) {
            if let Value::String(s) = &current {
                if chrono::DateTime::parse_from_rfc3339(s).is_err() {
                    self.fail(path, "should match format \"date-time\"");
                }
            }
        }

        for id in &node.all_of {
            match self.visit(*id, &current, path) {
                Some(next) => current = next,
                None => return None,
            }
        }

        if !node.any_of.is_empty() {
            match node
                .any_of
                .iter()
                .find_map(|id| self.attempt(*id, &current, path))
            {
                Some(next) => current = next,
                None => self.fail(path, "should match some schema in anyOf"),
            }
        }

        if !node.one_of.is_empty() {
            let mut matched: Vec<Value> = node
                .one_of
                .iter()
                .filter_map(|id| self.attempt(*id, &current, path))
                .collect();
            if matched.len() == 1 {
                current = matched.remove(0);
            } else {
                self.fail(path, "should match exactly one schema in oneOf");
            }
        }

        if self.errors.len() > before {
            None
        } else {
            Some(current)
        }
    }

    fn object(
        &mut self,
        node: &TypedNode,
        mut map: BTreeMap<String, Value>,
        path: &str,
    ) -> BTreeMap<String, Value> {
        for (name, id) in &node.properties {
            if !map.contains_key(name) {
                if let Some(default) = self.schema.default_of(*id) {
                    map.insert(name.clone(), Value::from_json(default.clone()));
                }
            }
        }

        let mut out = BTreeMap::new();
        for (key, value) in &map {
            let child_path = property_path(path, key);
            let transformed = match (node.property(key), node.additional) {
                (Some(id), _) => self.visit(id, value, &child_path),
                (None, Additional::Allow) => Some(value.clone()),
                (None, Additional::Schema(id)) => self.visit(id, value, &child_path),
                (None, Additional::Deny) => {
                    self.fail(path, "should NOT have additional properties");
                    None
                }
            };
            // A failed leaf is never replaced; keep the original.
            out.insert(key.clone(), transformed.unwrap_or_else(|| value.clone()));
        }

        for name in &node.required {
            if !out.contains_key(name) {
                self.fail(path, format!("should have required property '{}'", name));
            }
        }

        out
    }

    fn array(&mut self, node: &TypedNode, items: Vec<Value>, path: &str) -> Vec<Value> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            let child_path = format!("{}[{}]", path, i);
            let id = match &node.items {
                Items::Any => None,
                Items::Each(id) => Some(*id),
                Items::Tuple(ids, additional) => match (ids.get(i), additional) {
                    (Some(id), _) => Some(*id),
                    (None, Additional::Allow) => None,
                    (None, Additional::Schema(id)) => Some(*id),
                    (None, Additional::Deny) => {
                        self.fail(
                            path,
                            format!("should NOT have more than {} items", ids.len()),
                        );
                        None
                    }
                },
            };
            let transformed = match id {
                Some(id) => self.visit(id, &item, &child_path),
                None => None,
            };
            out.push(transformed.unwrap_or(item));
        }
        out
    }
}

/// Append a property to a data path: `.name` for identifiers, `['a b']`
/// otherwise.
fn property_path(path: &str, key: &str) -> String {
    let is_identifier = key
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        .unwrap_or(false)
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if is_identifier {
        format!("{}.{}", path, key)
    } else {
        format!("{}['{}']", path, key.replace('\'', "\\'"))
    }
}

/// Scalar type coercion, for values that arrive as strings (query strings,
/// form fields) or in a looser type than declared.
///
/// Single values are wrapped into one-element arrays and one-element arrays
/// are unwrapped into scalars, so a repeated-or-not query key validates
/// either way.
fn coerce_type(value: &Value, target: JsonType) -> Option<Value> {
    match (target, value) {
        (JsonType::String, Value::Integer(_) | Value::Float(_) | Value::Bool(_)) => {
            Some(Value::String(value.to_json().to_string()))
        }
        (JsonType::String, Value::Null) => Some(Value::String(String::new())),

        (JsonType::Number, Value::String(s)) => parse_number(s),
        (JsonType::Integer, Value::String(s)) => {
            parse_number(s).filter(|n| JsonType::Integer.matches(n))
        }
        (JsonType::Number | JsonType::Integer, Value::Bool(b)) => {
            Some(Value::Integer(if *b { 1 } else { 0 }))
        }
        (JsonType::Number | JsonType::Integer, Value::Null) => Some(Value::Integer(0)),

        (JsonType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (JsonType::Boolean, Value::Integer(i)) if *i == 0 || *i == 1 => Some(Value::Bool(*i == 1)),
        (JsonType::Boolean, Value::Float(f)) if *f == 0.0 || *f == 1.0 => {
            Some(Value::Bool(*f == 1.0))
        }
        (JsonType::Boolean, Value::Null) => Some(Value::Bool(false)),

        (JsonType::Null, Value::String(s)) if s.is_empty() => Some(Value::Null),
        (JsonType::Null, Value::Integer(0)) => Some(Value::Null),
        (JsonType::Null, Value::Bool(false)) => Some(Value::Null),

        (JsonType::Array, Value::Bool(_) | Value::Integer(_) | Value::Float(_) | Value::String(_)) => {
            Some(Value::Array(vec![value.clone()]))
        }
        (target, Value::Array(items)) if items.len() == 1 && target != JsonType::Object => {
            let item = &items[0];
            if target.matches(item) {
                Some(item.clone())
            } else {
                coerce_type(item, target).filter(|v| !matches!(v, Value::Array(_)))
            }
        }
        _ => None,
    }
}

fn parse_number(s: &str) -> Option<Value> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Some(Value::Integer(i));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Value::Float)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use collection_literals::btree;
    use serde_json::json;

    fn date_schema() -> Json {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "foo": {"type": "string", "coerceTo": "Date"}
            }
        })
    }

    #[test]
    fn plain_schema_passes_data_through() {
        let schema = json!({
            "type": "object",
            "properties": {"foo": {"type": "number"}}
        });
        let validator = Validator::default();
        let decoder = validator.decoder(&schema).unwrap();
        let encoder = validator.encoder(&schema).unwrap();

        let data = Value::from_json(json!({"pi": 3.14159}));
        let decoded = decoder.decode(&data).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(encoder.encode(&decoded).unwrap(), data);
    }

    #[test]
    fn decode_and_encode_date_in_object() {
        let validator = Validator::default();
        let decoder = validator.decoder(&date_schema()).unwrap();
        let encoder = validator.encoder(&date_schema()).unwrap();

        let decoded = decoder
            .decode_json(json!({"foo": "2019-01-19T20:42:45.310Z"}))
            .unwrap();
        assert!(matches!(decoded.get("foo"), Some(Value::Timestamp(_))));

        let encoded = encoder.encode_json(&decoded).unwrap();
        assert_eq!(encoded, json!({"foo": "2019-01-19T20:42:45.310Z"}));
    }

    #[test]
    fn decode_and_encode_dates_in_array() {
        let schema = json!({
            "type": "object",
            "properties": {
                "foo": {"type": "array", "items": {"type": "string", "coerceTo": "Date"}}
            }
        });
        let validator = Validator::default();
        let decoded = validator
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"foo": ["2019-01-19T20:42:45.310Z", "2019-01-19T20:55:23.733Z"]}))
            .unwrap();

        match decoded.get("foo") {
            Some(Value::Array(items)) => {
                assert!(items.iter().all(|v| matches!(v, Value::Timestamp(_))))
            }
            other => panic!("expected array, got {:?}", other),
        }

        let encoded = validator.encoder(&schema).unwrap().encode(&decoded).unwrap();
        assert_eq!(
            encoded.get("foo"),
            Some(&Value::from(vec!["2019-01-19T20:42:45.310Z", "2019-01-19T20:55:23.733Z"]))
        );
    }

    #[test]
    fn malformed_date_fails_without_replacing_the_leaf() {
        let decoder = Validator::default().decoder(&date_schema()).unwrap();
        let input = Value::from_json(json!({"foo": "not-a-date"}));

        let errors = decoder.decode(&input).unwrap_err();
        let message = errors.to_string();
        assert!(message.contains("data.foo"));
        assert!(message.contains("coerceTo Date"));
        assert!(message.contains("#/properties/foo"));
        assert_eq!(input.get("foo"), Some(&Value::from("not-a-date")));
    }

    #[test]
    fn malformed_dates_in_array_fail() {
        let schema = json!({
            "type": "object",
            "properties": {
                "foo": {"type": "array", "items": {"type": "string", "coerceTo": "Date"}}
            }
        });
        let decoder = Validator::default().decoder(&schema).unwrap();
        let errors = decoder.decode_json(json!({"foo": ["foo", "bar"]})).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.errors()[1].path, "data.foo[1]");
    }

    #[test]
    fn nullable_coerced_leaf_accepts_null() {
        let schema = json!({
            "type": "object",
            "properties": {
                "when": {"type": ["string", "null"], "coerceTo": "Date"}
            }
        });
        let validator = Validator::default();

        let decoded = validator
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"when": null}))
            .unwrap();
        assert_eq!(decoded.get("when"), Some(&Value::Null));

        let encoded = validator.encoder(&schema).unwrap().encode(&decoded).unwrap();
        assert_eq!(encoded.get("when"), Some(&Value::Null));

        let decoded = validator
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"when": "2019-01-19T20:42:45Z"}))
            .unwrap();
        assert!(matches!(decoded.get("when"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn null_still_fails_a_string_only_coerced_leaf() {
        let errors = Validator::default()
            .decoder(&date_schema())
            .unwrap()
            .decode_json(json!({"foo": null}))
            .unwrap_err();
        assert!(errors.to_string().contains("should be string"));
    }

    #[test]
    fn sub_millisecond_dates_survive_encode_then_decode() {
        let validator = Validator::default();
        let native = Value::Map(
            [(
                "foo".to_string(),
                Value::Timestamp(Utc.timestamp_nanos(1_547_930_565_310_123_456)),
            )]
            .into(),
        );

        let wire = validator.encoder(&date_schema()).unwrap().encode_json(&native).unwrap();
        assert_eq!(wire, json!({"foo": "2019-01-19T20:42:45.310123456Z"}));
        let decoded = validator.decoder(&date_schema()).unwrap().decode_json(wire).unwrap();
        assert_eq!(decoded, native);
    }

    #[test]
    fn bare_coerced_schema_works_without_a_container() {
        let schema = json!({"type": "string", "coerceTo": "Date"});
        let decoded = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode(&Value::from("2019-01-19T20:42:45Z"))
            .unwrap();
        assert_eq!(
            decoded,
            Value::Timestamp(Utc.with_ymd_and_hms(2019, 1, 19, 20, 42, 45).unwrap())
        );
    }

    #[test]
    fn buffer_roundtrip_through_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "file": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "data": {"type": "string", "coerceTo": "Buffer"}
                    },
                    "required": ["name", "data"]
                }
            }
        });
        let validator = Validator::default();
        let native = Value::Map(btree! {
            "file".to_string() => Value::Map(btree! {
                "name".to_string() => Value::from("hello.txt"),
                "data".to_string() => Value::bytes(b"hello".to_vec()),
            }),
        });

        let wire = validator.encoder(&schema).unwrap().encode_json(&native).unwrap();
        assert_eq!(wire, json!({"file": {"name": "hello.txt", "data": "aGVsbG8="}}));

        let back = validator.decoder(&schema).unwrap().decode_json(wire).unwrap();
        assert_eq!(back, native);
    }

    #[test]
    fn raw_bytes_pass_a_buffer_leaf_untouched() {
        let schema = json!({
            "type": "object",
            "properties": {"upload": {"type": "string", "coerceTo": "Buffer"}}
        });
        let payload = Value::Map(btree! {
            "upload".to_string() => Value::bytes(vec![0xff, 0x00, 0x10]),
        });
        let decoded = Validator::default().decoder(&schema).unwrap().decode(&payload).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn re_encoding_is_stable() {
        let encoder = Validator::default().encoder(&date_schema()).unwrap();
        let native = Value::Map(btree! {
            "foo".to_string() => Value::Timestamp(Utc.with_ymd_and_hms(2020, 2, 2, 2, 2, 2).unwrap()),
        });
        let once = encoder.encode(&native).unwrap();
        let twice = encoder.encode(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn defaults_are_filled() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string", "default": "World"}},
            "additionalProperties": false
        });
        let decoded = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode(&Value::map())
            .unwrap();
        assert_eq!(decoded.get("name"), Some(&Value::from("World")));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let schema = json!({
            "type": "object",
            "properties": {
                "n": {"type": "number"},
                "i": {"type": "integer"},
                "b": {"type": "boolean"},
                "s": {"type": "string"}
            }
        });
        let decoded = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"n": "42.5", "i": "7", "b": "true", "s": 12}))
            .unwrap();

        assert_eq!(decoded.get("n"), Some(&Value::Float(42.5)));
        assert_eq!(decoded.get("i"), Some(&Value::Integer(7)));
        assert_eq!(decoded.get("b"), Some(&Value::Bool(true)));
        assert_eq!(decoded.get("s"), Some(&Value::from("12")));
    }

    #[test]
    fn non_numeric_string_fails_number() {
        let schema = json!({"type": "object", "properties": {"n": {"type": "number"}}});
        let errors = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"n": "forty-two"}))
            .unwrap_err();
        assert_eq!(errors.to_string(), "data.n should be number");
    }

    #[test]
    fn single_values_and_arrays_interchange() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}},
                "name": {"type": "string"}
            }
        });
        let decoded = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"tags": "one", "name": ["only"]}))
            .unwrap();
        assert_eq!(decoded.get("tags"), Some(&Value::from(vec!["one"])));
        assert_eq!(decoded.get("name"), Some(&Value::from("only")));
    }

    #[test]
    fn required_and_additional_properties() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"],
            "additionalProperties": false
        });
        let errors = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"extra": 1}))
            .unwrap_err();
        let message = errors.to_string();
        assert!(message.contains("should NOT have additional properties"));
        assert!(message.contains("should have required property 'name'"));
    }

    #[test]
    fn enum_and_format() {
        let schema = json!({
            "type": "object",
            "properties": {
                "color": {"type": "string", "enum": ["red", "green"]},
                "at": {"type": "string", "format": "date-time"}
            }
        });
        let decoder = Validator::default().decoder(&schema).unwrap();
        assert!(decoder
            .decode_json(json!({"color": "red", "at": "2019-01-19T20:42:45Z"}))
            .is_ok());
        let message = decoder
            .decode_json(json!({"color": "blue", "at": "yesterday"}))
            .unwrap_err()
            .to_string();
        assert!(message.contains("allowed values"));
        assert!(message.contains("date-time"));
    }

    #[test]
    fn any_of_takes_the_first_matching_branch() {
        let schema = json!({
            "type": "object",
            "properties": {
                "v": {"anyOf": [{"type": "string", "coerceTo": "Date"}, {"type": "number"}]}
            }
        });
        let decoder = Validator::default().decoder(&schema).unwrap();
        assert!(matches!(
            decoder.decode_json(json!({"v": "2019-01-19"})).unwrap().get("v"),
            Some(Value::Timestamp(_))
        ));
        assert_eq!(
            decoder.decode_json(json!({"v": 3})).unwrap().get("v"),
            Some(&Value::Integer(3))
        );
        assert!(decoder.decode_json(json!({"v": [1, 2]})).is_err());
    }

    #[test]
    fn refs_are_followed() {
        let schema = json!({
            "type": "object",
            "properties": {"when": {"$ref": "#/definitions/When"}},
            "definitions": {"When": {"type": "string", "coerceTo": "Date"}}
        });
        let decoded = Validator::default()
            .decoder(&schema)
            .unwrap()
            .decode_json(json!({"when": "2019-01-19"}))
            .unwrap();
        assert!(matches!(decoded.get("when"), Some(Value::Timestamp(_))));
    }

    #[test]
    fn odd_property_names_are_quoted_in_paths() {
        assert_eq!(property_path("data", "first name"), "data['first name']");
        assert_eq!(property_path("data", "name"), "data.name");
    }

    #[test]
    fn custom_registry() {
        let mut registry = CoercionRegistry::new();
        registry.register(
            "Csv",
            |s| Ok(Value::from(s.split(',').map(str::to_string).collect::<Vec<_>>())),
            |v| match v {
                Value::Array(items) => Ok(items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(",")),
                other => Err(format!("expected array, found {}", other.kind())),
            },
        );
        let validator = Validator::new(registry);
        let schema = json!({"type": "object", "properties": {"l": {"coerceTo": "Csv"}}});

        let decoded = validator.decoder(&schema).unwrap().decode_json(json!({"l": "a,b"})).unwrap();
        assert_eq!(decoded.get("l"), Some(&Value::from(vec!["a", "b"])));
        assert!(Validator::default().decoder(&schema).is_err());
    }
}
