use std::collections::BTreeMap;
use std::sync::Arc;

use url::Url;
use wirefn_core::definition::RESULT;
use wirefn_core::{Decoder, Definition, Encoder, Validator, Value};

use crate::call::{check_arity, CallArgs};
use crate::error::ClientError;
use crate::executor::{CallRequest, ClientConfig, HttpExecutor, ReqwestExecutor};

/// Calls one remote function as if it were local.
///
/// The params encoder and returns decoder are compiled once, on
/// construction. Each call makes exactly one request.
pub struct HttpClient {
    definition: Definition,
    url: Url,
    encoder: Encoder,
    decoder: Decoder,
    executor: Arc<dyn HttpExecutor>,
}

impl HttpClient {
    pub fn new(definition: Definition, url: &str) -> Result<Self, ClientError> {
        Self::with_config(definition, url, ClientConfig::default())
    }

    pub fn with_config(
        definition: Definition,
        url: &str,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let executor = ReqwestExecutor::new(&config)?;
        Self::with_executor(definition, url, Arc::new(executor), &Validator::default())
    }

    /// Build with a custom executor and a validator carrying custom
    /// coercions.
    pub fn with_executor(
        definition: Definition,
        url: &str,
        executor: Arc<dyn HttpExecutor>,
        validator: &Validator,
    ) -> Result<Self, ClientError> {
        definition.validate()?;
        let url = Url::parse(url)?;
        let encoder = validator
            .encoder(&definition.params.schema)
            .map_err(wirefn_core::Error::from)?;
        let decoder = validator
            .decoder(&definition.returns.schema)
            .map_err(wirefn_core::Error::from)?;

        Ok(Self {
            definition,
            url,
            encoder,
            decoder,
            executor,
        })
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Call with loose arguments: either one parameter bag or positional
    /// values.
    pub async fn call(&self, args: Vec<Value>) -> Result<Value, ClientError> {
        check_arity(&self.definition, args.len())?;
        let args = CallArgs::from_values(&self.definition, args);
        self.call_with(args).await
    }

    pub async fn call_with(&self, args: CallArgs) -> Result<Value, ClientError> {
        let params = args.into_params(&self.definition)?;
        let body = self
            .encoder
            .encode_json(&params)
            .map_err(ClientError::InvalidParameters)?;

        tracing::debug!("Calling {} at {}", self.definition.title, self.url);
        let response = self
            .executor
            .execute(&CallRequest {
                url: self.url.clone(),
                body,
            })
            .await?;

        if !response.is_success() {
            tracing::debug!(
                "{} answered {} {}",
                self.url,
                response.status,
                response.status_text
            );
            return Err(ClientError::Status {
                status: response.status,
                status_text: response.status_text,
            });
        }

        // 204 carries a null result.
        let result = if response.body_text.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&response.body_text)?
        };

        let mut returns = serde_json::Map::new();
        returns.insert(RESULT.to_string(), result);
        let decoded = self
            .decoder
            .decode_json(serde_json::Value::Object(returns))
            .map_err(ClientError::InvalidResponse)?;

        Ok(decoded
            .into_map()
            .and_then(|mut map: BTreeMap<String, Value>| map.remove(RESULT))
            .unwrap_or(Value::Null))
    }
}
