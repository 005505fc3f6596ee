//! Turning call-site arguments into a parameter bag.

use std::collections::BTreeMap;

use wirefn_core::{Definition, Value};

use crate::error::ClientError;

/// Arguments of one call, with their shape made explicit.
#[derive(Debug, Clone, PartialEq)]
pub enum CallArgs {
    /// Every parameter, keyed by name.
    Bag(BTreeMap<String, Value>),
    /// Values in parameter order.
    Positional(Vec<Value>),
}

/// How a list of call-site arguments should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Bag,
    Positional,
}

impl CallShape {
    /// Decide whether `args` is one parameter bag or a list of positional
    /// values.
    ///
    /// Only a single map argument can be a bag. It is one when it carries
    /// every required parameter; otherwise it is the value of the first
    /// parameter. With no declared parameters there is nothing to check
    /// and the arguments stay positional.
    pub fn classify(definition: &Definition, args: &[Value]) -> Self {
        match args {
            [Value::Map(map)] if !definition.params.order.is_empty() => {
                let has_required = definition
                    .required_params()
                    .iter()
                    .all(|name| map.contains_key(*name));
                if has_required {
                    CallShape::Bag
                } else {
                    CallShape::Positional
                }
            }
            _ => CallShape::Positional,
        }
    }
}

impl CallArgs {
    pub fn bag(map: BTreeMap<String, Value>) -> Self {
        CallArgs::Bag(map)
    }

    pub fn positional(values: Vec<Value>) -> Self {
        CallArgs::Positional(values)
    }

    /// Classify loose arguments against `definition`.
    pub fn from_values(definition: &Definition, mut args: Vec<Value>) -> Self {
        if CallShape::classify(definition, &args) == CallShape::Bag {
            if let Some(Value::Map(map)) = args.pop() {
                return CallArgs::Bag(map);
            }
        }
        CallArgs::Positional(args)
    }

    /// The parameter bag to send. Positional values are zipped with the
    /// parameter order; there may be fewer values than parameters, never
    /// more.
    pub fn into_params(self, definition: &Definition) -> Result<Value, ClientError> {
        match self {
            CallArgs::Bag(map) => Ok(Value::Map(map)),
            CallArgs::Positional(values) => {
                check_arity(definition, values.len())?;
                let params = definition
                    .params
                    .order
                    .iter()
                    .cloned()
                    .zip(values)
                    .collect::<BTreeMap<_, _>>();
                Ok(Value::Map(params))
            }
        }
    }
}

pub(crate) fn check_arity(definition: &Definition, received: usize) -> Result<(), ClientError> {
    let expected = definition.params.order.len();
    if received > expected {
        return Err(ClientError::TooManyArguments {
            title: definition.title.clone(),
            expected,
            received,
        });
    }
    Ok(())
}
