//! String encoding of calls and synchronous replies.
//!
//! A call travels as a JSON object: `{"selector":"btn-1.Click","payload":{..},"id":"7"}`.
//! The `id` is only present when the caller expects a result.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

pub const SELECTOR_SEPARATOR: char = '.';

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub selector: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "id", skip_serializing_if = "Option::is_none")]
    pub correlation: Option<String>,
}

impl Call {
    pub fn new(selector: impl Into<String>, payload: Value) -> Self {
        Self {
            selector: selector.into(),
            payload,
            correlation: None,
        }
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation = Some(id.into());
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ret: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err: Option<String>,
}

pub fn encode(selector: &str, payload: &Value, correlation: Option<&str>) -> String {
    #[derive(Serialize)]
    struct CallRef<'a> {
        selector: &'a str,
        payload: &'a Value,
        #[serde(rename = "id", skip_serializing_if = "Option::is_none")]
        correlation: Option<&'a str>,
    }

    let call = CallRef {
        selector,
        payload,
        correlation,
    };

    // A struct of strings and a `Value` always serializes.
    serde_json::to_string(&call).unwrap_or_default()
}

pub fn encode_call(call: &Call) -> String {
    encode(&call.selector, &call.payload, call.correlation.as_deref())
}

pub fn decode(raw: &str) -> Result<Call, BridgeError> {
    let call: Call = serde_json::from_str(raw)?;

    if call.selector.is_empty() {
        return Err(BridgeError::Decode("empty selector".to_string()));
    }

    Ok(call)
}

/// Splits `"<element>.<method>"` on the first separator.
pub fn split_selector(selector: &str) -> Result<(&str, &str), BridgeError> {
    match selector.split_once(SELECTOR_SEPARATOR) {
        Some((target, method)) if !target.is_empty() && !method.is_empty() => {
            Ok((target, method))
        }
        _ => Err(BridgeError::Decode(format!(
            "selector is not <element>.<method>: {selector:?}"
        ))),
    }
}

pub fn encode_reply(outcome: &Result<Value, String>) -> String {
    let envelope = match outcome {
        Ok(value) => ReplyEnvelope {
            ret: Some(value.clone()),
            err: None,
        },
        Err(message) => ReplyEnvelope {
            ret: None,
            err: Some(message.clone()),
        },
    };

    serde_json::to_string(&envelope).unwrap_or_default()
}

pub fn decode_reply(raw: &str) -> Result<Result<Value, String>, BridgeError> {
    let envelope: ReplyEnvelope = serde_json::from_str(raw)?;

    match envelope {
        ReplyEnvelope { err: Some(err), .. } => Ok(Err(err)),
        ReplyEnvelope { ret, err: None } => Ok(Ok(ret.unwrap_or(Value::Null))),
    }
}
