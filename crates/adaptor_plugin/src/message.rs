//! The plugin message envelope.
//!
//! A [`PluginMessage`] carries one RPC-style call or reply between the
//! adaptor and a plugin: a context id, a function id, indexed mandatory and
//! optional parameters, a request id, a message type and a result
//! code/message pair. All eight slots always exist; an unset slot is null.
//!
//! The text form is a JSON object with exactly eight keys in a fixed order:
//! `ctx_id, func_id, man_param, opt_param, req_id, msg_id, rcode, rmsg`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::param_array::ParamArray;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed envelope: {0}")]
    ParseError(String),

    #[error("row {index} is out of range, array holds {len} rows")]
    OutOfRange { index: usize, len: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}

pub type MessageResult<T> = Result<T, MessageError>;

/// A scalar slot or parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParamValue {
    #[default]
    Null,
    Number(i64),
    Bool(bool),
    String(String),
}

impl ParamValue {
    pub fn kind(&self) -> &'static str {
        match self {
            ParamValue::Null => "null",
            ParamValue::Number(_) => "number",
            ParamValue::Bool(_) => "bool",
            ParamValue::String(_) => "string",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_number(&self) -> Option<i64> {
        if let ParamValue::Number(n) = self { Some(*n) } else { None }
    }

    pub fn as_bool(&self) -> Option<bool> {
        if let ParamValue::Bool(b) = self { Some(*b) } else { None }
    }

    pub fn as_str(&self) -> Option<&str> {
        if let ParamValue::String(s) = self { Some(s) } else { None }
    }

    pub(crate) fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Number(n) => Value::from(*n),
            ParamValue::Bool(b) => Value::Bool(*b),
            ParamValue::String(s) => Value::String(s.clone()),
        }
    }

    pub(crate) fn from_json(value: &Value) -> MessageResult<Self> {
        match value {
            Value::Null => Ok(ParamValue::Null),
            Value::Bool(b) => Ok(ParamValue::Bool(*b)),
            Value::String(s) => Ok(ParamValue::String(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(ParamValue::Number)
                .ok_or_else(|| MessageError::ParseError(format!("number `{n}` is not a 64-bit integer"))),
            other => Err(MessageError::ParseError(format!("unexpected nested value `{other}`"))),
        }
    }

    fn require<T>(&self, expected: &str, pick: impl FnOnce(&Self) -> Option<T>) -> MessageResult<T> {
        if self.is_null() {
            return Err(MessageError::NotFound(format!("{expected} value is null")));
        }
        pick(self).ok_or_else(|| MessageError::TypeMismatch {
            expected: expected.into(),
            found: self.kind().into(),
        })
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Number(n)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

/// One indexed parameter: either a scalar or a typed array.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Value(ParamValue),
    Array(ParamArray),
}

impl Param {
    fn to_json(&self) -> Value {
        match self {
            Param::Value(v) => v.to_json(),
            Param::Array(a) => a.to_json(),
        }
    }

    fn from_json(value: &Value) -> MessageResult<Self> {
        match value {
            Value::Array(rows) => Ok(Param::Array(ParamArray::from_json_rows(rows)?)),
            other => Ok(Param::Value(ParamValue::from_json(other)?)),
        }
    }
}

/// The six scalar slots of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageField {
    ContextId,
    FunctionId,
    RequestId,
    MessageType,
    ResultCode,
    ResultMessage,
}

impl MessageField {
    pub const ALL: [MessageField; 6] = [
        MessageField::ContextId,
        MessageField::FunctionId,
        MessageField::RequestId,
        MessageField::MessageType,
        MessageField::ResultCode,
        MessageField::ResultMessage,
    ];

    /// Key used for this field in the text form.
    pub const fn key(self) -> &'static str {
        match self {
            MessageField::ContextId => "ctx_id",
            MessageField::FunctionId => "func_id",
            MessageField::RequestId => "req_id",
            MessageField::MessageType => "msg_id",
            MessageField::ResultCode => "rcode",
            MessageField::ResultMessage => "rmsg",
        }
    }
}

impl fmt::Display for MessageField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for MessageField {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageField::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| MessageError::InvalidArgument(format!("`{s}` is not a scalar message field")))
    }
}

/// Text form of an envelope. Field order here is the key order on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct WireMessage {
    pub ctx_id: Value,
    pub func_id: Value,
    pub man_param: Value,
    pub opt_param: Value,
    pub req_id: Value,
    pub msg_id: Value,
    pub rcode: Value,
    pub rmsg: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginMessage {
    context_id: ParamValue,
    function_id: ParamValue,
    parameters_mandatory: BTreeMap<u32, Param>,
    parameters_optional: BTreeMap<u32, Param>,
    request_id: ParamValue,
    message_type: ParamValue,
    result_code: ParamValue,
    result_message: ParamValue,
}

impl PluginMessage {
    /// A new envelope with every slot null.
    pub fn create() -> Self {
        Self::default()
    }

    /// Release the envelope. Ownership makes a second release impossible.
    pub fn destroy(self) {}

    /// New envelope addressed to `function_id`.
    pub fn request(function_id: impl Into<String>) -> Self {
        let mut msg = Self::create();
        msg.function_id = ParamValue::String(function_id.into());
        msg
    }

    /// New envelope answering `request`: context, function, request id and
    /// message type are copied over; parameters and result are left empty.
    pub fn reply_to(request: &PluginMessage) -> Self {
        Self {
            context_id: request.context_id.clone(),
            function_id: request.function_id.clone(),
            request_id: request.request_id.clone(),
            message_type: request.message_type.clone(),
            ..Self::default()
        }
    }

    fn slot(&self, field: MessageField) -> &ParamValue {
        match field {
            MessageField::ContextId => &self.context_id,
            MessageField::FunctionId => &self.function_id,
            MessageField::RequestId => &self.request_id,
            MessageField::MessageType => &self.message_type,
            MessageField::ResultCode => &self.result_code,
            MessageField::ResultMessage => &self.result_message,
        }
    }

    fn slot_mut(&mut self, field: MessageField) -> &mut ParamValue {
        match field {
            MessageField::ContextId => &mut self.context_id,
            MessageField::FunctionId => &mut self.function_id,
            MessageField::RequestId => &mut self.request_id,
            MessageField::MessageType => &mut self.message_type,
            MessageField::ResultCode => &mut self.result_code,
            MessageField::ResultMessage => &mut self.result_message,
        }
    }

    pub fn set_value(&mut self, field: MessageField, value: impl Into<ParamValue>) {
        *self.slot_mut(field) = value.into();
    }

    pub fn get_value(&self, field: MessageField) -> &ParamValue {
        self.slot(field)
    }

    /// Set a scalar slot addressed by its wire key (`ctx_id`, `rcode`, ...).
    pub fn set_value_by_key(&mut self, key: &str, value: impl Into<ParamValue>) -> MessageResult<()> {
        let field: MessageField = key.parse()?;
        self.set_value(field, value);
        Ok(())
    }

    pub fn get_value_by_key(&self, key: &str) -> MessageResult<&ParamValue> {
        let field: MessageField = key.parse()?;
        Ok(self.get_value(field))
    }

    pub fn get_number(&self, field: MessageField) -> MessageResult<i64> {
        self.slot(field).require("number", ParamValue::as_number)
    }

    pub fn get_bool(&self, field: MessageField) -> MessageResult<bool> {
        self.slot(field).require("bool", ParamValue::as_bool)
    }

    pub fn get_string(&self, field: MessageField) -> MessageResult<&str> {
        let slot = self.slot(field);
        if slot.is_null() {
            return Err(MessageError::NotFound(format!("{field} is null")));
        }
        slot.as_str().ok_or_else(|| MessageError::TypeMismatch {
            expected: "string".into(),
            found: slot.kind().into(),
        })
    }

    pub fn function_id(&self) -> Option<&str> {
        self.function_id.as_str()
    }

    /// Result code and message; an unset code reads as 0, an unset message
    /// as the empty string.
    pub fn result(&self) -> (i64, String) {
        (
            self.result_code.as_number().unwrap_or(0),
            self.result_message.as_str().unwrap_or_default().to_string(),
        )
    }

    pub fn set_result(&mut self, code: i64, message: impl Into<String>) {
        self.result_code = ParamValue::Number(code);
        self.result_message = ParamValue::String(message.into());
    }

    pub fn set_param(&mut self, index: u32, value: impl Into<ParamValue>) {
        self.parameters_mandatory.insert(index, Param::Value(value.into()));
    }

    pub fn get_param(&self, index: u32) -> MessageResult<&ParamValue> {
        scalar_at(&self.parameters_mandatory, index, "mandatory")
    }

    pub fn set_opt_param(&mut self, index: u32, value: impl Into<ParamValue>) {
        self.parameters_optional.insert(index, Param::Value(value.into()));
    }

    pub fn get_opt_param(&self, index: u32) -> MessageResult<&ParamValue> {
        scalar_at(&self.parameters_optional, index, "optional")
    }

    pub fn set_param_array(&mut self, index: u32, array: ParamArray) {
        self.parameters_mandatory.insert(index, Param::Array(array));
    }

    pub fn get_param_array(&self, index: u32) -> MessageResult<&ParamArray> {
        array_at(&self.parameters_mandatory, index, "mandatory")
    }

    pub fn set_opt_param_array(&mut self, index: u32, array: ParamArray) {
        self.parameters_optional.insert(index, Param::Array(array));
    }

    pub fn get_opt_param_array(&self, index: u32) -> MessageResult<&ParamArray> {
        array_at(&self.parameters_optional, index, "optional")
    }

    pub fn params(&self) -> &BTreeMap<u32, Param> {
        &self.parameters_mandatory
    }

    pub fn opt_params(&self) -> &BTreeMap<u32, Param> {
        &self.parameters_optional
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage {
            ctx_id: self.context_id.to_json(),
            func_id: self.function_id.to_json(),
            man_param: params_to_json(&self.parameters_mandatory),
            opt_param: params_to_json(&self.parameters_optional),
            req_id: self.request_id.to_json(),
            msg_id: self.message_type.to_json(),
            rcode: self.result_code.to_json(),
            rmsg: self.result_message.to_json(),
        }
    }

    pub fn from_wire(wire: &WireMessage) -> MessageResult<Self> {
        Ok(Self {
            context_id: ParamValue::from_json(&wire.ctx_id)?,
            function_id: ParamValue::from_json(&wire.func_id)?,
            parameters_mandatory: params_from_json(&wire.man_param)?,
            parameters_optional: params_from_json(&wire.opt_param)?,
            request_id: ParamValue::from_json(&wire.req_id)?,
            message_type: ParamValue::from_json(&wire.msg_id)?,
            result_code: ParamValue::from_json(&wire.rcode)?,
            result_message: ParamValue::from_json(&wire.rmsg)?,
        })
    }

    /// Encode to the canonical eight-key text form.
    pub fn serialize(&self) -> MessageResult<String> {
        serde_json::to_string(&self.to_wire()).map_err(|e| MessageError::InvalidArgument(e.to_string()))
    }

    /// Decode text produced by [`PluginMessage::serialize`] or any object with
    /// the same keys. Missing keys become null slots.
    pub fn deserialize(text: &str) -> MessageResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| MessageError::ParseError(e.to_string()))?;
        if !value.is_object() {
            return Err(MessageError::ParseError("envelope is not a JSON object".into()));
        }
        let wire: WireMessage =
            serde_json::from_value(value).map_err(|e| MessageError::ParseError(e.to_string()))?;
        Self::from_wire(&wire)
    }
}

fn scalar_at<'a>(params: &'a BTreeMap<u32, Param>, index: u32, which: &str) -> MessageResult<&'a ParamValue> {
    match params.get(&index) {
        Some(Param::Value(v)) => Ok(v),
        Some(Param::Array(_)) => Err(MessageError::TypeMismatch {
            expected: "scalar".into(),
            found: "array".into(),
        }),
        None => Err(MessageError::NotFound(format!("{which} parameter {index}"))),
    }
}

fn array_at<'a>(params: &'a BTreeMap<u32, Param>, index: u32, which: &str) -> MessageResult<&'a ParamArray> {
    match params.get(&index) {
        Some(Param::Array(a)) => Ok(a),
        Some(Param::Value(v)) => Err(MessageError::TypeMismatch {
            expected: "array".into(),
            found: v.kind().into(),
        }),
        None => Err(MessageError::NotFound(format!("{which} parameter {index}"))),
    }
}

// An empty parameter map is written as null.
fn params_to_json(params: &BTreeMap<u32, Param>) -> Value {
    if params.is_empty() {
        return Value::Null;
    }
    let map: Map<String, Value> = params
        .iter()
        .map(|(index, param)| (index.to_string(), param.to_json()))
        .collect();
    Value::Object(map)
}

fn params_from_json(value: &Value) -> MessageResult<BTreeMap<u32, Param>> {
    match value {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| {
                let index = key
                    .parse::<u32>()
                    .map_err(|_| MessageError::ParseError(format!("parameter key `{key}` is not an index")))?;
                Ok((index, Param::from_json(v)?))
            })
            .collect(),
        other => Err(MessageError::ParseError(format!("parameter block must be an object, got `{other}`"))),
    }
}
