//! Request payloads and their wire encodings.

use crate::error::HttpError;
use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Request body payload.
///
/// The payload kind decides the default [`BodyEncoding`] when no explicit
/// encoding is given to [`RequestBuilder::body_as`](crate::RequestBuilder::body_as):
///
/// | Payload | Default encoding |
/// |---|---|
/// | `Bytes` | `buffer` (sent unchanged) |
/// | `Structured` | `json` |
/// | `Text` | `form` (the text is taken as already URL-encoded) |
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes
    Bytes(Bytes),
    /// Plain text
    Text(String),
    /// Structured value (object, array or scalar)
    Structured(Value),
}

impl Payload {
    /// Build a structured payload from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Json` if the value cannot be represented as JSON.
    pub fn structured<T: Serialize + ?Sized>(value: &T) -> Result<Self, HttpError> {
        Ok(Payload::Structured(serde_json::to_value(value)?))
    }

    fn default_encoding(&self) -> BodyEncoding {
        match self {
            Payload::Bytes(_) => BodyEncoding::Buffer,
            Payload::Structured(_) => BodyEncoding::Json,
            Payload::Text(_) => BodyEncoding::Form,
        }
    }
}

impl From<Bytes> for Payload {
    fn from(value: Bytes) -> Self {
        Payload::Bytes(value)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Payload {
    fn from(value: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_owned())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// How a payload is put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEncoding {
    /// `application/x-www-form-urlencoded`
    Form,
    /// `application/json`
    Json,
    /// Raw bytes, no content type implied
    Buffer,
    /// Caller-supplied tag; the payload is passed through and no content type is implied
    Other(String),
}

impl BodyEncoding {
    /// Parse an encoding tag. Tags are case-insensitive; unknown tags are kept
    /// verbatim (lowercased) as [`BodyEncoding::Other`].
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        let tag = tag.to_ascii_lowercase();
        match tag.as_str() {
            "form" => BodyEncoding::Form,
            "json" => BodyEncoding::Json,
            "buffer" => BodyEncoding::Buffer,
            _ => BodyEncoding::Other(tag),
        }
    }

    /// Content type implied by this encoding, if any
    #[must_use]
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            BodyEncoding::Json => Some("application/json"),
            BodyEncoding::Form => Some("application/x-www-form-urlencoded"),
            BodyEncoding::Buffer | BodyEncoding::Other(_) => None,
        }
    }
}

/// A payload serialized for the wire together with its resolved encoding.
#[derive(Debug, Clone)]
pub struct EncodedBody {
    pub(crate) encoding: BodyEncoding,
    pub(crate) bytes: Bytes,
}

impl EncodedBody {
    /// Resolve the encoding and serialize the payload.
    pub(crate) fn encode(payload: Payload, hint: Option<&str>) -> Result<Self, HttpError> {
        let encoding = hint.map_or_else(|| payload.default_encoding(), BodyEncoding::from_tag);
        let bytes = serialize(payload, &encoding)?;
        Ok(Self { encoding, bytes })
    }
}

fn serialize(payload: Payload, encoding: &BodyEncoding) -> Result<Bytes, HttpError> {
    match (payload, encoding) {
        (Payload::Bytes(b), _) => Ok(b),
        (Payload::Text(text), BodyEncoding::Json) => Ok(Bytes::from(serde_json::to_vec(&text)?)),
        (Payload::Text(text), _) => Ok(Bytes::from(text)),
        (Payload::Structured(value), BodyEncoding::Form) => {
            Ok(Bytes::from(form_urlencode(&value)?))
        }
        (Payload::Structured(value), _) => Ok(Bytes::from(serde_json::to_vec(&value)?)),
    }
}

/// URL-encode a flat object as `k=v&k2=v2`.
///
/// Array values repeat the key once per element; `null` and nested objects
/// encode as an empty value. Non-object values cannot be form encoded.
fn form_urlencode(value: &Value) -> Result<String, HttpError> {
    let Value::Object(map) = value else {
        // serde_urlencoded rejects top-level scalars and sequences with a typed error
        return Ok(serde_urlencoded::to_string(value)?);
    };

    let mut pairs: Vec<(&str, String)> = Vec::with_capacity(map.len());
    for (key, v) in map {
        match v {
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.as_str(), form_scalar(item))));
            }
            other => pairs.push((key.as_str(), form_scalar(other))),
        }
    }
    Ok(serde_urlencoded::to_string(pairs)?)
}

fn form_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
    }
}
