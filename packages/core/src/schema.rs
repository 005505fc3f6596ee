//! Typed schema tree compiled from JSON Schema.
//!
//! Definitions carry their parameter and return types as JSON Schema. Walking
//! raw `serde_json::Value` trees on every request is slow and stringly typed,
//! so a schema is compiled once into an arena of [`Node`]s. Local `$ref`s
//! become arena indices, which lets recursive types compile without looping.
//!
//! Only the keywords the marshallers need are understood: `type`,
//! `properties`, `required`, `additionalProperties`, `items`,
//! `additionalItems`, `enum`, `const`, `default`, `format`, `anyOf`, `oneOf`,
//! `allOf`, `$ref`, and the coercion annotations `coerceTo` / `coerceFrom`.
//! Everything else is ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value as Json;

use crate::coercion::{Coercion, CoercionRegistry};
use crate::error::SchemaError;
use crate::value::Value;

pub(crate) type NodeId = usize;

/// A JSON type name as used by the `type` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Boolean,
    Integer,
    Number,
    String,
    Array,
    Object,
}

impl JsonType {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "null" => JsonType::Null,
            "boolean" => JsonType::Boolean,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "string" => JsonType::String,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            JsonType::Null => "null",
            JsonType::Boolean => "boolean",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::String => "string",
            JsonType::Array => "array",
            JsonType::Object => "object",
        }
    }

    /// Whether `value` already has this type, without coercion.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (JsonType::Null, Value::Null) => true,
            (JsonType::Boolean, Value::Bool(_)) => true,
            (JsonType::Integer, Value::Integer(_)) => true,
            (JsonType::Integer, Value::Float(f)) => f.is_finite() && f.fract() == 0.0,
            (JsonType::Number, Value::Integer(_) | Value::Float(_)) => true,
            (JsonType::String, Value::String(_)) => true,
            (JsonType::Array, Value::Array(_)) => true,
            (JsonType::Object, Value::Map(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JsonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What to do with object keys (or array positions) not covered by the
/// declared properties (or tuple items).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Additional {
    Allow,
    Deny,
    Schema(NodeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Items {
    Any,
    Each(NodeId),
    Tuple(Vec<NodeId>, Additional),
}

/// Formats the validator checks. Unrecognised formats are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Format {
    DateTime,
}

/// A leaf annotated with a coercion.
#[derive(Debug)]
pub(crate) struct CoercedNode {
    pub coercion: Arc<Coercion>,
    pub pointer: String,
    pub default: Option<Json>,
    /// Declared `type`. Values matching a type other than `string` skip the
    /// coercion.
    pub types: Vec<JsonType>,
}

impl CoercedNode {
    /// Whether `value` satisfies a declared non-string type as it is.
    pub fn passes_through(&self, value: &Value) -> bool {
        self.types
            .iter()
            .any(|t| *t != JsonType::String && t.matches(value))
    }
}

/// An ordinary schema node: structural keywords plus combinators.
#[derive(Debug)]
pub(crate) struct TypedNode {
    /// Empty means any type.
    pub types: Vec<JsonType>,
    /// Declared properties, in declaration order.
    pub properties: Vec<(String, NodeId)>,
    pub required: Vec<String>,
    pub additional: Additional,
    pub items: Items,
    pub enumeration: Option<Vec<Value>>,
    pub constant: Option<Value>,
    pub default: Option<Json>,
    pub format: Option<Format>,
    pub any_of: Vec<NodeId>,
    pub one_of: Vec<NodeId>,
    pub all_of: Vec<NodeId>,
}

impl TypedNode {
    fn any() -> Self {
        Self {
            types: Vec::new(),
            properties: Vec::new(),
            required: Vec::new(),
            additional: Additional::Allow,
            items: Items::Any,
            enumeration: None,
            constant: None,
            default: None,
            format: None,
            any_of: Vec::new(),
            one_of: Vec::new(),
            all_of: Vec::new(),
        }
    }

    pub fn property(&self, name: &str) -> Option<NodeId> {
        self.properties
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, id)| *id)
    }
}

#[derive(Debug)]
pub(crate) enum Node {
    /// The `false` schema: nothing validates.
    Never,
    /// An alias for another node, produced by `$ref`.
    Ref(NodeId),
    Coerced(CoercedNode),
    Typed(TypedNode),
}

/// A compiled schema, immutable and shareable across threads.
#[derive(Debug)]
pub struct Schema {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Schema {
    /// Compile a JSON Schema document, resolving coercion names against
    /// `registry`.
    pub fn compile(json: &Json, registry: &CoercionRegistry) -> Result<Self, SchemaError> {
        let mut compiler = Compiler {
            document: json,
            registry,
            nodes: Vec::new(),
            refs: HashMap::new(),
        };
        let root = compiler.reference("#", "#")?;
        Ok(Schema {
            nodes: compiler.nodes,
            root,
        })
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    /// Follow `$ref` aliases to a concrete node.
    ///
    /// Returns `None` for a reference cycle with no concrete node in it.
    pub(crate) fn resolve(&self, mut id: NodeId) -> Option<&Node> {
        for _ in 0..=self.nodes.len() {
            match &self.nodes[id] {
                Node::Ref(target) => id = *target,
                node => return Some(node),
            }
        }
        None
    }

    /// The `default` of a node, if it declares one.
    pub(crate) fn default_of(&self, id: NodeId) -> Option<&Json> {
        match self.resolve(id)? {
            Node::Typed(node) => node.default.as_ref(),
            Node::Coerced(node) => node.default.as_ref(),
            _ => None,
        }
    }

    /// Names of the root object's declared properties, in declaration order.
    pub fn property_names(&self) -> Vec<&str> {
        match self.resolve(self.root) {
            Some(Node::Typed(node)) => node.properties.iter().map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// The coercion annotated on a root-level property, if any.
    pub fn property_coercion(&self, name: &str) -> Option<&str> {
        let Some(Node::Typed(node)) = self.resolve(self.root) else {
            return None;
        };
        match self.resolve(node.property(name)?)? {
            Node::Coerced(coerced) => Some(coerced.coercion.name()),
            _ => None,
        }
    }

    /// Whether a root-level property accepts any value at all.
    pub fn property_is_unconstrained(&self, name: &str) -> bool {
        let Some(Node::Typed(node)) = self.resolve(self.root) else {
            return true;
        };
        let Some(id) = node.property(name) else {
            return node.additional == Additional::Allow;
        };
        match self.resolve(id) {
            Some(Node::Typed(prop)) => {
                prop.types.is_empty()
                    && prop.properties.is_empty()
                    && prop.enumeration.is_none()
                    && prop.constant.is_none()
                    && prop.any_of.is_empty()
                    && prop.one_of.is_empty()
                    && prop.all_of.is_empty()
            }
            _ => false,
        }
    }
}

struct Compiler<'a> {
    document: &'a Json,
    registry: &'a CoercionRegistry,
    nodes: Vec<Node>,
    refs: HashMap<String, NodeId>,
}

impl<'a> Compiler<'a> {
    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Compile the target of a local `$ref`, once per distinct reference.
    fn reference(&mut self, reference: &str, pointer: &str) -> Result<NodeId, SchemaError> {
        if let Some(id) = self.refs.get(reference) {
            return Ok(*id);
        }

        let unresolved = || SchemaError::UnresolvedRef {
            reference: reference.to_string(),
            pointer: pointer.to_string(),
        };
        let fragment = reference.strip_prefix('#').ok_or_else(unresolved)?;
        let target = self.document.pointer(fragment).ok_or_else(unresolved)?;

        // Reserve the slot before compiling so recursive references find it.
        let slot = self.push(Node::Never);
        self.refs.insert(reference.to_string(), slot);

        let target_pointer = if fragment.is_empty() {
            "#".to_string()
        } else {
            reference.to_string()
        };
        let compiled = self.compile(target, &target_pointer)?;
        if compiled == slot {
            return Err(SchemaError::InvalidKeyword {
                keyword: "$ref".to_string(),
                pointer: pointer.to_string(),
                message: "reference cycle with no schema".to_string(),
            });
        }
        self.nodes[slot] = Node::Ref(compiled);
        Ok(slot)
    }

    fn compile(&mut self, json: &Json, pointer: &str) -> Result<NodeId, SchemaError> {
        let object = match json {
            Json::Bool(true) => return Ok(self.push(Node::Typed(TypedNode::any()))),
            Json::Bool(false) => return Ok(self.push(Node::Never)),
            Json::Object(object) => object,
            _ => {
                return Err(SchemaError::InvalidKeyword {
                    keyword: "schema".to_string(),
                    pointer: pointer.to_string(),
                    message: "a schema must be an object or a boolean".to_string(),
                })
            }
        };

        if let Some(reference) = object.get("$ref") {
            let reference = reference
                .as_str()
                .ok_or_else(|| invalid("$ref", pointer, "expected a string"))?;
            return self.reference(reference, pointer);
        }

        // Both annotations name the same coercion; direction belongs to the
        // caller, not to the schema.
        let coercion = object
            .get("coerceTo")
            .map(|v| ("coerceTo", v))
            .or_else(|| object.get("coerceFrom").map(|v| ("coerceFrom", v)));
        if let Some((keyword, name)) = coercion {
            let name = name
                .as_str()
                .ok_or_else(|| invalid(keyword, pointer, "expected a coercion name"))?;
            let coercion =
                self.registry
                    .get(name)
                    .ok_or_else(|| SchemaError::UnknownCoercion {
                        name: name.to_string(),
                        pointer: pointer.to_string(),
                    })?;
            return Ok(self.push(Node::Coerced(CoercedNode {
                coercion,
                pointer: pointer.to_string(),
                default: object.get("default").cloned(),
                types: parse_types(object.get("type"), pointer)?,
            })));
        }

        let mut node = TypedNode::any();
        node.types = parse_types(object.get("type"), pointer)?;

        if let Some(properties) = object.get("properties") {
            let properties = properties
                .as_object()
                .ok_or_else(|| invalid("properties", pointer, "expected an object"))?;
            for (name, schema) in properties {
                let id = self.compile(schema, &format!("{}/properties/{}", pointer, name))?;
                node.properties.push((name.clone(), id));
            }
        }

        if let Some(required) = object.get("required") {
            let required = required
                .as_array()
                .ok_or_else(|| invalid("required", pointer, "expected an array"))?;
            for name in required {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid("required", pointer, "expected property names"))?;
                node.required.push(name.to_string());
            }
        }

        if let Some(additional) = object.get("additionalProperties") {
            node.additional =
                self.additional(additional, &format!("{}/additionalProperties", pointer))?;
        }

        match object.get("items") {
            None => {}
            Some(Json::Array(schemas)) => {
                let mut ids = Vec::with_capacity(schemas.len());
                for (i, schema) in schemas.iter().enumerate() {
                    ids.push(self.compile(schema, &format!("{}/items/{}", pointer, i))?);
                }
                let additional = match object.get("additionalItems") {
                    Some(additional) => {
                        self.additional(additional, &format!("{}/additionalItems", pointer))?
                    }
                    None => Additional::Allow,
                };
                node.items = Items::Tuple(ids, additional);
            }
            Some(schema) => {
                node.items = Items::Each(self.compile(schema, &format!("{}/items", pointer))?);
            }
        }

        if let Some(values) = object.get("enum") {
            let values = values
                .as_array()
                .ok_or_else(|| invalid("enum", pointer, "expected an array"))?;
            node.enumeration = Some(values.iter().cloned().map(Value::from_json).collect());
        }

        if let Some(constant) = object.get("const") {
            node.constant = Some(Value::from_json(constant.clone()));
        }

        node.default = object.get("default").cloned();

        if object.get("format").and_then(Json::as_str) == Some("date-time") {
            node.format = Some(Format::DateTime);
        }

        node.any_of = self.combinator(object.get("anyOf"), "anyOf", pointer)?;
        node.one_of = self.combinator(object.get("oneOf"), "oneOf", pointer)?;
        node.all_of = self.combinator(object.get("allOf"), "allOf", pointer)?;

        Ok(self.push(Node::Typed(node)))
    }

    fn additional(&mut self, json: &Json, pointer: &str) -> Result<Additional, SchemaError> {
        Ok(match json {
            Json::Bool(true) => Additional::Allow,
            Json::Bool(false) => Additional::Deny,
            schema => Additional::Schema(self.compile(schema, pointer)?),
        })
    }

    fn combinator(
        &mut self,
        json: Option<&Json>,
        keyword: &str,
        pointer: &str,
    ) -> Result<Vec<NodeId>, SchemaError> {
        let Some(json) = json else {
            return Ok(Vec::new());
        };
        let schemas = json
            .as_array()
            .ok_or_else(|| invalid(keyword, pointer, "expected an array of schemas"))?;
        let mut ids = Vec::with_capacity(schemas.len());
        for (i, schema) in schemas.iter().enumerate() {
            ids.push(self.compile(schema, &format!("{}/{}/{}", pointer, keyword, i))?);
        }
        Ok(ids)
    }
}

fn parse_types(json: Option<&Json>, pointer: &str) -> Result<Vec<JsonType>, SchemaError> {
    match json {
        None => Ok(Vec::new()),
        Some(Json::String(name)) => Ok(vec![parse_type(name, pointer)?]),
        Some(Json::Array(names)) => names
            .iter()
            .map(|name| {
                let name = name
                    .as_str()
                    .ok_or_else(|| invalid("type", pointer, "expected type names"))?;
                parse_type(name, pointer)
            })
            .collect(),
        Some(_) => Err(invalid("type", pointer, "expected a string or an array")),
    }
}

fn parse_type(name: &str, pointer: &str) -> Result<JsonType, SchemaError> {
    JsonType::parse(name).ok_or_else(|| invalid("type", pointer, &format!("unknown type \"{}\"", name)))
}

fn invalid(keyword: &str, pointer: &str, message: &str) -> SchemaError {
    SchemaError::InvalidKeyword {
        keyword: keyword.to_string(),
        pointer: pointer.to_string(),
        message: message.to_string(),
    }
}
