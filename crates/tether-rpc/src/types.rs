//! JSON-RPC 2.0 wire types.
//!
//! Outbound messages serialize with the `"jsonrpc":"2.0"` tag. Inbound JSON
//! is classified by shape rather than deserialized blindly, so a bad message
//! still yields the `id` to echo in the error reply.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::codes::ErrorCode;

/// Protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Request id. Preserves the JSON type it arrived with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(serde_json::Number),
    /// String id.
    String(String),
    /// Explicit `null`.
    Null,
}

impl RequestId {
    /// The id as a string slice, if it is a string id.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read an id from a JSON value. `None` for types that are not valid ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
            Self::Null => f.write_str("null"),
        }
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

/// Error member of an error response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Error with the code's stock message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Typed code.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::from_code(self.code)
    }
}

/// A call expecting a response.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    /// Method name.
    pub method: String,
    /// Parameters (object, array, or null).
    pub params: Option<Value>,
    /// Id echoed by the response.
    pub id: RequestId,
}

/// A call with no response.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Parameters (object, array, or null).
    pub params: Option<Value>,
}

/// Outcome carried by a response.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponsePayload {
    /// `result` member.
    Result(Value),
    /// `error` member.
    Error(ErrorObject),
}

/// Reply to a request.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// Id of the request this answers.
    pub id: RequestId,
    /// Result or error.
    pub payload: ResponsePayload,
}

impl Response {
    /// Success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            payload: ResponsePayload::Result(result),
        }
    }

    /// Error response.
    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            id,
            payload: ResponsePayload::Error(error),
        }
    }

    /// The error object, if this is an error response.
    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.payload {
            ResponsePayload::Error(e) => Some(e),
            ResponsePayload::Result(_) => None,
        }
    }

    /// The result, if this is a success response.
    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            ResponsePayload::Result(v) => Some(v),
            ResponsePayload::Error(_) => None,
        }
    }
}

/// Any JSON-RPC message.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// Request.
    Request(Request),
    /// Notification.
    Notification(Notification),
    /// Response.
    Response(Response),
    /// Batch of messages sent as one JSON array.
    Batch(Vec<Message>),
}

/// Why inbound JSON could not be turned into a [`Message`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum MessageError {
    /// The text is not JSON.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The JSON is not a valid message. `id` is echoed in the error reply.
    #[error("Invalid Request: {reason}")]
    Invalid {
        /// Id found in the message, or `null`.
        id: RequestId,
        /// What was wrong.
        reason: String,
    },
}

impl MessageError {
    fn invalid(id: RequestId, reason: impl Into<String>) -> Self {
        Self::Invalid {
            id,
            reason: reason.into(),
        }
    }

    /// Wire code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::Invalid { .. } => ErrorCode::InvalidRequest,
        }
    }

    /// Id to echo in the error reply.
    pub fn id(&self) -> RequestId {
        match self {
            Self::Parse(_) => RequestId::Null,
            Self::Invalid { id, .. } => id.clone(),
        }
    }

    /// Error response describing this failure.
    pub fn to_response(&self) -> Response {
        let code = self.code();
        let detail = match self {
            Self::Parse(detail) => detail,
            Self::Invalid { reason, .. } => reason,
        };
        Response::error(
            self.id(),
            ErrorObject::new(code, code.default_message()).with_data(Value::String(detail.clone())),
        )
    }
}

impl Message {
    /// Request with the given id.
    pub fn request(
        method: impl Into<String>,
        params: Option<Value>,
        id: impl Into<RequestId>,
    ) -> Self {
        Self::Request(Request {
            method: method.into(),
            params,
            id: id.into(),
        })
    }

    /// Notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Parse and classify raw inbound bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, MessageError> {
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| MessageError::Parse(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify a JSON value. Arrays become batches; every element must be valid.
    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(MessageError::invalid(RequestId::Null, "empty batch"));
                }
                items
                    .into_iter()
                    .map(classify)
                    .collect::<Result<Vec<_>, _>>()
                    .map(Self::Batch)
            }
            other => classify(other),
        }
    }

    /// Method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) | Self::Batch(_) => None,
        }
    }

    /// Id for requests and responses.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) | Self::Batch(_) => None,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Classify one non-array JSON value.
///
/// Batch elements go through here directly, so a nested array is invalid.
pub(crate) fn classify(value: Value) -> Result<Message, MessageError> {
    let Value::Object(mut obj) = value else {
        return Err(MessageError::invalid(RequestId::Null, "message must be a JSON object"));
    };

    let raw_id = obj.remove("id");
    let id = match &raw_id {
        None => None,
        Some(v) => match RequestId::from_value(v) {
            Some(id) => Some(id),
            None => {
                return Err(MessageError::invalid(
                    RequestId::Null,
                    "id must be a string, number, or null",
                ));
            }
        },
    };
    let echo = id.clone().unwrap_or(RequestId::Null);

    match obj.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        _ => return Err(MessageError::invalid(echo, "jsonrpc must be \"2.0\"")),
    }

    if let Some(method) = obj.remove("method") {
        let Value::String(method) = method else {
            return Err(MessageError::invalid(echo, "method must be a string"));
        };
        let params = take_params(&mut obj).map_err(|reason| MessageError::invalid(echo, reason))?;
        return Ok(match id {
            Some(id) => Message::Request(Request { method, params, id }),
            None => Message::Notification(Notification { method, params }),
        });
    }

    let result = obj.remove("result");
    let error = obj.remove("error");
    let Some(id) = id else {
        return Err(MessageError::invalid(echo, "missing method"));
    };
    let payload = match (result, error) {
        (Some(result), None) => ResponsePayload::Result(result),
        (None, Some(error)) => match serde_json::from_value::<ErrorObject>(error) {
            Ok(error) => ResponsePayload::Error(error),
            Err(_) => return Err(MessageError::invalid(id, "malformed error object")),
        },
        (Some(_), Some(_)) => {
            return Err(MessageError::invalid(id, "response has both result and error"));
        }
        (None, None) => return Err(MessageError::invalid(id, "missing method")),
    };
    Ok(Message::Response(Response { id, payload }))
}

fn take_params(obj: &mut Map<String, Value>) -> Result<Option<Value>, &'static str> {
    match obj.remove("params") {
        None => Ok(None),
        Some(v @ (Value::Object(_) | Value::Array(_) | Value::Null)) => Ok(Some(v)),
        Some(_) => Err("params must be an object, array, or null"),
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a RequestId>,
}

impl<'a> WireMessage<'a> {
    fn empty() -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: None,
            params: None,
            result: None,
            error: None,
            id: None,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            Self::Batch(items) => return items.serialize(serializer),
            Self::Request(r) => WireMessage {
                method: Some(&r.method),
                params: r.params.as_ref(),
                id: Some(&r.id),
                ..WireMessage::empty()
            },
            Self::Notification(n) => WireMessage {
                method: Some(&n.method),
                params: n.params.as_ref(),
                ..WireMessage::empty()
            },
            Self::Response(r) => match &r.payload {
                ResponsePayload::Result(v) => WireMessage {
                    result: Some(v),
                    id: Some(&r.id),
                    ..WireMessage::empty()
                },
                ResponsePayload::Error(e) => WireMessage {
                    error: Some(e),
                    id: Some(&r.id),
                    ..WireMessage::empty()
                },
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn parse(v: Value) -> Result<Message, MessageError> {
        Message::from_value(v)
    }

    #[test]
    fn classifies_request() {
        let msg = parse(json!({
            "jsonrpc": "2.0",
            "method": "echo",
            "params": {"x": 1},
            "id": 7
        }))
        .unwrap();
        assert_eq!(msg, Message::request("echo", Some(json!({"x": 1})), 7_i64));
    }

    #[test]
    fn classifies_notification() {
        let msg = parse(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert_eq!(msg, Message::notification("ping", None));
    }

    #[test]
    fn null_id_is_still_a_request() {
        let msg = parse(json!({"jsonrpc": "2.0", "method": "m", "id": null})).unwrap();
        assert_matches!(msg, Message::Request(Request { id: RequestId::Null, .. }));
    }

    #[test]
    fn classifies_success_and_error_responses() {
        let ok = parse(json!({"jsonrpc": "2.0", "result": 5, "id": "a"})).unwrap();
        assert_eq!(ok, Message::Response(Response::success("a".into(), json!(5))));

        let err = parse(json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "Method not found"},
            "id": 1
        }))
        .unwrap();
        let Message::Response(resp) = err else {
            panic!("expected response");
        };
        assert_eq!(resp.error_object().unwrap().error_code(), ErrorCode::MethodNotFound);
    }

    #[test]
    fn null_result_is_a_response() {
        let msg = parse(json!({"jsonrpc": "2.0", "result": null, "id": 3})).unwrap();
        assert_eq!(msg, Message::Response(Response::success(3_i64.into(), Value::Null)));
    }

    #[test]
    fn wrong_version_echoes_id() {
        let err = parse(json!({"jsonrpc": "1.0", "method": "m", "id": "x"})).unwrap_err();
        assert_eq!(err.id(), RequestId::from("x"));
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    #[test]
    fn missing_method_without_id_is_invalid() {
        let err = parse(json!({"jsonrpc": "2.0", "params": {}})).unwrap_err();
        assert_matches!(err, MessageError::Invalid { id: RequestId::Null, .. });
    }

    #[test]
    fn non_object_is_invalid() {
        assert_matches!(parse(json!(42)), Err(MessageError::Invalid { .. }));
        assert_matches!(parse(json!("hi")), Err(MessageError::Invalid { .. }));
    }

    #[test]
    fn bad_id_type_is_invalid() {
        let err =
            parse(json!({"jsonrpc": "2.0", "method": "m", "id": {"nested": true}})).unwrap_err();
        assert_eq!(err.id(), RequestId::Null);
    }

    #[test]
    fn scalar_params_are_invalid() {
        let err =
            parse(json!({"jsonrpc": "2.0", "method": "m", "params": 3, "id": 1})).unwrap_err();
        assert_eq!(err.id(), RequestId::from(1_i64));
    }

    #[test]
    fn result_and_error_together_is_invalid() {
        let err = parse(json!({
            "jsonrpc": "2.0",
            "result": 1,
            "error": {"code": 1, "message": "x"},
            "id": 1
        }))
        .unwrap_err();
        assert_matches!(err, MessageError::Invalid { .. });
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let err = Message::parse(b"{not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ParseError);
        assert_eq!(err.id(), RequestId::Null);
        let resp = err.to_response();
        assert_eq!(resp.error_object().unwrap().code, -32700);
    }

    #[test]
    fn batch_and_empty_batch() {
        let batch = parse(json!([
            {"jsonrpc": "2.0", "method": "a", "id": 1},
            {"jsonrpc": "2.0", "method": "b"}
        ]))
        .unwrap();
        assert_matches!(batch, Message::Batch(items) if items.len() == 2);
        assert_matches!(parse(json!([])), Err(MessageError::Invalid { .. }));
    }

    #[test]
    fn nested_batch_is_invalid() {
        assert_matches!(parse(json!([[{"jsonrpc": "2.0", "method": "a"}]])), Err(_));
    }

    #[test]
    fn serializes_with_version_tag() {
        let req = Message::request("math.add", Some(json!({"a": 2, "b": 3})), "r1");
        assert_eq!(
            req.to_value(),
            json!({"jsonrpc": "2.0", "method": "math.add", "params": {"a": 2, "b": 3}, "id": "r1"})
        );

        let note = Message::notification("ping", None);
        assert_eq!(note.to_value(), json!({"jsonrpc": "2.0", "method": "ping"}));
    }

    #[test]
    fn serializes_responses() {
        let ok = Message::Response(Response::success(RequestId::Null, Value::Null));
        assert_eq!(ok.to_value(), json!({"jsonrpc": "2.0", "result": null, "id": null}));

        let err = Message::Response(Response::error(
            7_i64.into(),
            ErrorObject::from_code(ErrorCode::MethodNotFound),
        ));
        assert_eq!(
            err.to_value(),
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32601, "message": "Method not found"},
                "id": 7
            })
        );
    }

    #[test]
    fn id_type_is_preserved() {
        for id in [json!("7"), json!(7), json!(null)] {
            let msg = parse(json!({"jsonrpc": "2.0", "result": true, "id": id.clone()})).unwrap();
            assert_eq!(msg.to_value()["id"], id);
        }
    }

    #[test]
    fn deserialize_goes_through_classification() {
        let msg: Message = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"x"}"#).unwrap();
        assert_eq!(msg.method(), Some("x"));
        assert!(serde_json::from_str::<Message>(r#"{"method":"x"}"#).is_err());
    }
}
