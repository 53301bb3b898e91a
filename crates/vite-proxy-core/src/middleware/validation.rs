use crate::{
    proxy::errors::ProxyError,
    types::{JsonRpcRequest, JSONRPC_VERSION, JSONRPC_VERSION_COW},
    utils::address::ViteAddress,
    wallet::derivation::MAX_ACCOUNT_INDEX,
};
use serde_json::Value;
use std::sync::Arc;

impl JsonRpcRequest {
    /// Validates a raw JSON-RPC envelope and builds the typed request.
    ///
    /// Rules:
    /// - `method` is a required, non-empty string
    /// - `params` is an array when present and defaults to `[]`
    /// - `id` is a required integer `>= 0`
    /// - `jsonrpc` is exactly `"2.0"`
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, checked in the order above.
    pub fn from_value(raw: &Value) -> Result<Self, ValidationError> {
        let Some(envelope) = raw.as_object() else {
            return Err(ValidationError::NotAnObject);
        };

        let method = match envelope.get("method") {
            None | Some(Value::Null) => return Err(ValidationError::Required("method")),
            Some(Value::String(method)) if method.is_empty() => {
                return Err(ValidationError::Empty("method"))
            }
            Some(Value::String(method)) => method.clone(),
            Some(_) => return Err(ValidationError::NotAString("method")),
        };

        let params = match envelope.get("params") {
            None => Vec::new(),
            Some(Value::Array(params)) => params.clone(),
            Some(_) => return Err(ValidationError::NotAnArray("params")),
        };

        let id = match envelope.get("id") {
            None | Some(Value::Null) => return Err(ValidationError::Required("id")),
            Some(id) => {
                check_non_negative_integer(id, "id")?;
                id.clone()
            }
        };

        match envelope.get("jsonrpc") {
            None | Some(Value::Null) => return Err(ValidationError::Required("jsonrpc")),
            Some(Value::String(version)) if version == JSONRPC_VERSION => {}
            Some(_) => return Err(ValidationError::InvalidVersion),
        }

        Ok(Self { jsonrpc: JSONRPC_VERSION_COW, method, params, id: Arc::new(id) })
    }
}

/// The id to echo in a response for `raw`, even when the envelope failed validation.
#[must_use]
pub fn response_id(raw: &Value) -> Arc<Value> {
    Arc::new(raw.get("id").cloned().unwrap_or(Value::Null))
}

fn check_non_negative_integer(value: &Value, field: &'static str) -> Result<(), ValidationError> {
    let Value::Number(number) = value else {
        return Err(ValidationError::NotANumber(field));
    };

    if number.is_u64() {
        return Ok(());
    }
    if number.is_i64() {
        return Err(ValidationError::Negative(field));
    }
    match number.as_f64() {
        Some(float) if float.fract() != 0.0 => Err(ValidationError::NotAnInteger(field)),
        Some(float) if float < 0.0 => Err(ValidationError::Negative(field)),
        _ => Ok(()),
    }
}

/// Envelope and parameter validation failures.
///
/// Messages follow the `"<field>" must ...` shape clients of the public Vite proxies already
/// match on; the envelope adds the `ValidationError: ` prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("\"value\" must be of type object")]
    NotAnObject,

    #[error("\"{0}\" is required")]
    Required(&'static str),

    #[error("\"{0}\" is not allowed to be empty")]
    Empty(&'static str),

    #[error("\"{0}\" must be a string")]
    NotAString(&'static str),

    #[error("\"{0}\" must be an array")]
    NotAnArray(&'static str),

    #[error("\"{0}\" must be a number")]
    NotANumber(&'static str),

    #[error("\"{0}\" must be an integer")]
    NotAnInteger(&'static str),

    #[error("\"{0}\" must be greater than or equal to 0")]
    Negative(&'static str),

    #[error("\"jsonrpc\" must be [2.0]")]
    InvalidVersion,

    #[error("\"params\" must contain {0} items")]
    ParamCount(usize),

    /// A positional parameter failed its rule; `{1}` completes the sentence.
    #[error("\"[{0}]\" {1}")]
    Param(usize, &'static str),
}

impl From<ValidationError> for ProxyError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Requires exactly `expected` positional parameters.
///
/// # Errors
/// Returns [`ValidationError::ParamCount`] on any other length.
pub fn expect_params(params: &[Value], expected: usize) -> Result<(), ValidationError> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(ValidationError::ParamCount(expected))
    }
}

/// Requires between `min` and `max` positional parameters, inclusive.
///
/// # Errors
/// Returns [`ValidationError::ParamCount`] with `max` when out of range.
pub fn expect_params_between(
    params: &[Value],
    min: usize,
    max: usize,
) -> Result<(), ValidationError> {
    if (min..=max).contains(&params.len()) {
        Ok(())
    } else {
        Err(ValidationError::ParamCount(max))
    }
}

/// Reads a string parameter.
///
/// # Errors
/// Fails when the position is missing or not a string.
pub fn string_param(params: &[Value], index: usize) -> Result<&str, ValidationError> {
    match params.get(index) {
        None => Err(ValidationError::Param(index, "is required")),
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ValidationError::Param(index, "must be a string")),
    }
}

/// Reads a height given as a decimal string or a non-negative integer.
///
/// # Errors
/// Fails on anything else, including negative numbers and non-digit strings.
pub fn height_param(params: &[Value], index: usize) -> Result<u64, ValidationError> {
    match params.get(index) {
        None => Err(ValidationError::Param(index, "is required")),
        Some(value) => parse_height(value)
            .ok_or(ValidationError::Param(index, "must be a decimal height string or integer >= 0")),
    }
}

/// Parses a height from a decimal string or a non-negative integer.
#[must_use]
pub fn parse_height(value: &Value) -> Option<u64> {
    match value {
        Value::String(text) if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) => {
            text.parse().ok()
        }
        Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

/// Reads a 64-character lowercase hex hash.
///
/// # Errors
/// Fails when the position is missing or not a lowercase 32-byte hex string.
pub fn hash_param(params: &[Value], index: usize) -> Result<&str, ValidationError> {
    let value = string_param(params, index)?;
    if is_hash(value) {
        Ok(value)
    } else {
        Err(ValidationError::Param(index, "must be a 64 character lowercase hex hash"))
    }
}

#[must_use]
pub fn is_hash(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Reads and checksums a `vite_` address.
///
/// # Errors
/// Fails when the position is missing or the address is malformed.
pub fn address_param(params: &[Value], index: usize) -> Result<ViteAddress, ValidationError> {
    let value = string_param(params, index)?;
    value.parse().map_err(|_| ValidationError::Param(index, "must be a valid vite address"))
}

/// Reads a non-hardened account index, `0..2^31`.
///
/// # Errors
/// Fails when the position is missing, negative, fractional, or too large.
pub fn index_param(params: &[Value], index: usize) -> Result<u32, ValidationError> {
    match params.get(index) {
        None => Err(ValidationError::Param(index, "is required")),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n <= MAX_ACCOUNT_INDEX)
            .ok_or(ValidationError::Param(index, "must be an integer between 0 and 2147483647")),
    }
}
