//! The Definition: the contract for one remotely callable function.
//!
//! A Definition is produced once (normally by a compiler that reads the
//! function's source) and shared read-only by every handler and client built
//! from it. Its JSON form is the wire format used for introspection.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};

use crate::error::DefinitionError;

/// Version stamped into Definitions built by [`DefinitionBuilder`].
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the property that wraps the return value in `returns.schema`.
pub const RESULT: &str = "result";

/// Name of the trailing request-context parameter.
pub const CONTEXT: &str = "context";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    /// Name of the function, used in error messages.
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// How to locate the callable in its module. Carried, never interpreted.
    pub config: Config,

    /// Version of the tool that produced this definition. Opaque.
    pub version: String,

    pub params: Params,

    pub returns: Returns,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub language: String,
    pub default_export: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_export: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "rust".to_string(),
            default_export: true,
            named_export: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// JSON Schema of the parameter bag.
    pub schema: Json,

    /// Parameter names in call order. Excludes the context parameter.
    pub order: Vec<String>,

    /// Skip validation and hand the raw request body to the function.
    #[serde(default)]
    pub http: bool,

    /// The function takes a trailing request-context parameter.
    #[serde(default)]
    pub context: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Returns {
    /// JSON Schema of `{ "result": <return type> }`.
    pub schema: Json,

    #[serde(default, rename = "async")]
    pub is_async: bool,

    /// The function returns `{ statusCode, headers, body }` that is applied
    /// to the response verbatim.
    #[serde(default)]
    pub http: bool,
}

impl Definition {
    pub fn builder(title: impl Into<String>) -> DefinitionBuilder {
        DefinitionBuilder::new(title)
    }

    /// Parse and check a Definition.
    pub fn from_json(json: Json) -> Result<Self, DefinitionError> {
        let definition: Definition =
            serde_json::from_value(json).map_err(|e| DefinitionError::Json(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, DefinitionError> {
        let definition: Definition =
            serde_json::from_slice(bytes).map_err(|e| DefinitionError::Json(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn to_json(&self) -> Json {
        // Every field is a plain JSON type; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Json::Null)
    }

    /// Check the structural invariants of the parameter section.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let title = || self.title.clone();

        for (i, name) in self.params.order.iter().enumerate() {
            if self.params.order[..i].contains(name) {
                return Err(DefinitionError::DuplicateParam {
                    title: title(),
                    name: name.clone(),
                });
            }
        }

        if self.params.context && self.params.order.iter().any(|name| name == CONTEXT) {
            return Err(DefinitionError::ContextNotLast { title: title() });
        }

        if self.params.http {
            if self.params.order.len() > 1 {
                return Err(DefinitionError::RawParamsWithOrder {
                    title: title(),
                    count: self.params.order.len(),
                });
            }
            return Ok(());
        }

        let properties = self.params.schema.get("properties").and_then(Json::as_object);
        for name in &self.params.order {
            if !properties.is_some_and(|p| p.contains_key(name)) {
                return Err(DefinitionError::UndeclaredParam {
                    title: title(),
                    name: name.clone(),
                });
            }
        }

        Ok(())
    }

    /// Ordered parameters a caller must supply: listed as `required` and
    /// without a `default`.
    pub fn required_params(&self) -> Vec<&str> {
        let schema = &self.params.schema;
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Json::as_array)
            .map(|names| names.iter().filter_map(Json::as_str).collect())
            .unwrap_or_default();

        self.params
            .order
            .iter()
            .map(String::as_str)
            .filter(|name| required.contains(name))
            .filter(|name| {
                schema
                    .pointer(&format!("/properties/{}", escape_pointer(name)))
                    .and_then(|p| p.get("default"))
                    .is_none()
            })
            .collect()
    }

    /// Whether properties beyond the declared ones are passed on as trailing
    /// `[name, value]` arguments.
    pub fn allows_extra_params(&self) -> bool {
        match self.params.schema.get("additionalProperties") {
            Some(Json::Bool(allowed)) => *allowed,
            Some(Json::Object(_)) => true,
            _ => false,
        }
    }
}

fn escape_pointer(name: &str) -> String {
    name.replace('~', "~0").replace('/', "~1")
}

/// Builds a Definition by hand, for embedders without a compiler.
///
/// ```rust
/// use serde_json::json;
/// use wirefn_core::Definition;
///
/// let definition = Definition::builder("hello")
///     .param_with_default("name", json!({"type": "string"}), json!("World"))
///     .returns(json!({"type": "string"}))
///     .build()
///     .unwrap();
///
/// assert_eq!(definition.params.order, vec!["name"]);
/// assert!(definition.required_params().is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct DefinitionBuilder {
    title: String,
    description: Option<String>,
    config: Config,
    version: String,
    properties: Map<String, Json>,
    required: Vec<String>,
    order: Vec<String>,
    rest: bool,
    context: bool,
    param_after_context: bool,
    raw_params: bool,
    returns: Option<Json>,
    raw_returns: bool,
    is_async: bool,
}

impl DefinitionBuilder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            config: Config::default(),
            version: VERSION.to_string(),
            properties: Map::new(),
            required: Vec::new(),
            order: Vec::new(),
            rest: false,
            context: false,
            param_after_context: false,
            raw_params: false,
            returns: None,
            raw_returns: false,
            is_async: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.config.language = language.into();
        self
    }

    pub fn named_export(mut self, name: impl Into<String>) -> Self {
        self.config.default_export = false;
        self.config.named_export = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// A required parameter.
    pub fn param(self, name: impl Into<String>, schema: Json) -> Self {
        self.push_param(name.into(), schema, true)
    }

    /// A parameter the caller may omit.
    pub fn optional_param(self, name: impl Into<String>, schema: Json) -> Self {
        self.push_param(name.into(), schema, false)
    }

    /// A parameter filled with `default` when omitted.
    pub fn param_with_default(self, name: impl Into<String>, mut schema: Json, default: Json) -> Self {
        if let Json::Object(object) = &mut schema {
            object.insert("default".to_string(), default);
        }
        self.push_param(name.into(), schema, false)
    }

    fn push_param(mut self, name: String, schema: Json, required: bool) -> Self {
        if self.context {
            self.param_after_context = true;
        }
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name.clone(), schema);
        self.order.push(name);
        self
    }

    /// Accept undeclared properties and pass them as trailing arguments.
    pub fn rest_params(mut self) -> Self {
        self.rest = true;
        self
    }

    /// Append the request context as the last argument.
    pub fn context(mut self) -> Self {
        self.context = true;
        self
    }

    /// Skip parameter validation; the raw body becomes the only argument
    /// when one parameter is declared.
    pub fn raw_params(mut self) -> Self {
        self.raw_params = true;
        self
    }

    /// Schema of the return value (unwrapped).
    pub fn returns(mut self, schema: Json) -> Self {
        self.returns = Some(schema);
        self
    }

    /// The function builds its own HTTP response.
    pub fn raw_returns(mut self) -> Self {
        self.raw_returns = true;
        self
    }

    pub fn async_returns(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn build(self) -> Result<Definition, DefinitionError> {
        if self.param_after_context {
            return Err(DefinitionError::ContextNotLast { title: self.title });
        }

        let mut params_schema = json!({
            "type": "object",
            "properties": self.properties,
            "additionalProperties": self.rest,
        });
        if !self.required.is_empty() {
            params_schema["required"] = json!(self.required);
        }

        let returns_schema = match self.returns {
            Some(schema) => json!({
                "type": "object",
                "properties": { RESULT: schema },
                "required": [RESULT],
                "additionalProperties": false,
            }),
            None => json!({
                "type": "object",
                "properties": { RESULT: {} },
            }),
        };

        let definition = Definition {
            title: self.title,
            description: self.description,
            config: self.config,
            version: self.version,
            params: Params {
                schema: params_schema,
                order: self.order,
                http: self.raw_params,
                context: self.context,
            },
            returns: Returns {
                schema: returns_schema,
                is_async: self.is_async,
                http: self.raw_returns,
            },
        };
        definition.validate()?;
        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello_world() -> Json {
        json!({
            "title": "helloWorld",
            "config": {"language": "typescript", "defaultExport": true},
            "version": "0.0.1",
            "params": {
                "schema": {
                    "type": "object",
                    "properties": {"name": {"type": "string", "default": "World"}},
                    "additionalProperties": false,
                    "$schema": "http://json-schema.org/draft-07/schema#"
                },
                "order": ["name"],
                "http": false,
                "context": false
            },
            "returns": {
                "schema": {
                    "type": "object",
                    "properties": {"result": {"type": "string"}},
                    "required": ["result"],
                    "$schema": "http://json-schema.org/draft-07/schema#"
                },
                "async": false,
                "http": false
            }
        })
    }

    #[test]
    fn parses_compiler_output() {
        let definition = Definition::from_json(hello_world()).unwrap();
        assert_eq!(definition.title, "helloWorld");
        assert_eq!(definition.params.order, vec!["name"]);
        assert!(definition.config.default_export);
        assert!(!definition.returns.is_async);
        assert!(definition.required_params().is_empty());
        assert!(!definition.allows_extra_params());
    }

    #[test]
    fn json_form_is_stable() {
        let definition = Definition::from_json(hello_world()).unwrap();
        let reparsed = Definition::from_json(definition.to_json()).unwrap();
        assert_eq!(definition, reparsed);
        assert_eq!(definition.to_json()["returns"]["async"], json!(false));
        assert!(definition.to_json().get("description").is_none());
    }

    #[test]
    fn duplicate_order_is_rejected() {
        let mut json = hello_world();
        json["params"]["order"] = json!(["name", "name"]);
        assert!(matches!(
            Definition::from_json(json),
            Err(DefinitionError::DuplicateParam { .. })
        ));
    }

    #[test]
    fn undeclared_order_entry_is_rejected() {
        let mut json = hello_world();
        json["params"]["order"] = json!(["name", "age"]);
        assert!(matches!(
            Definition::from_json(json),
            Err(DefinitionError::UndeclaredParam { .. })
        ));
    }

    #[test]
    fn context_listed_as_ordinary_param_is_rejected() {
        let mut json = hello_world();
        json["params"]["context"] = json!(true);
        json["params"]["order"] = json!(["context", "name"]);
        json["params"]["schema"]["properties"]["context"] = json!({});
        assert!(matches!(
            Definition::from_json(json),
            Err(DefinitionError::ContextNotLast { .. })
        ));
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(matches!(
            Definition::from_slice(b"{\"title\": 3}"),
            Err(DefinitionError::Json(_))
        ));
    }

    #[test]
    fn builder_assembles_schemas() {
        let definition = Definition::builder("add")
            .description("Adds two numbers")
            .param("a", json!({"type": "number"}))
            .param("b", json!({"type": "number"}))
            .returns(json!({"type": "number"}))
            .build()
            .unwrap();

        assert_eq!(definition.params.order, vec!["a", "b"]);
        assert_eq!(definition.required_params(), vec!["a", "b"]);
        assert_eq!(definition.params.schema["required"], json!(["a", "b"]));
        assert_eq!(
            definition.returns.schema["properties"]["result"],
            json!({"type": "number"})
        );
        assert_eq!(definition.version, VERSION);
    }

    #[test]
    fn builder_rejects_params_after_context() {
        let err = Definition::builder("f")
            .param("a", json!({"type": "string"}))
            .context()
            .param("b", json!({"type": "string"}))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::ContextNotLast { title: "f".to_string() });
    }

    #[test]
    fn builder_context_is_not_ordered() {
        let definition = Definition::builder("f")
            .param("a", json!({"type": "string"}))
            .context()
            .build()
            .unwrap();
        assert!(definition.params.context);
        assert_eq!(definition.params.order, vec!["a"]);
    }

    #[test]
    fn raw_params_allow_at_most_one_param() {
        assert!(Definition::builder("raw")
            .raw_params()
            .param("body", json!({"type": "string", "coerceTo": "Buffer"}))
            .build()
            .is_ok());

        let err = Definition::builder("raw")
            .raw_params()
            .param("a", json!({}))
            .param("b", json!({}))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::RawParamsWithOrder { count: 2, .. }));
    }

    #[test]
    fn rest_params_allow_extras() {
        let definition = Definition::builder("f").rest_params().build().unwrap();
        assert!(definition.allows_extra_params());
    }

    #[test]
    fn named_export_config() {
        let definition = Definition::builder("f").named_export("handler").build().unwrap();
        assert!(!definition.config.default_export);
        assert_eq!(definition.config.named_export.as_deref(), Some("handler"));
        assert_eq!(definition.to_json()["config"]["namedExport"], json!("handler"));
    }
}
