//! Result codes, plugin errors and helpers to build reply envelopes.

use chrono::Utc;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::PluginMessage;

/// Stable result codes shared by the adaptor and its plugins.
/// The numbers are part of the external API and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[repr(i64)]
pub enum ErrorCode {
    None = 0,
    Launch = 1,
    Init = 2,
    Deinit = 3,
    Create = 4,
    Destroy = 5,
    Start = 6,
    Stop = 7,
    Connect = 8,
    Disconnect = 9,
    NotFound = 10,
    Corrupted = 11,
    Unsupported = 12,
    InvalidHandle = 13,
    InvalidArgument = 14,
    InvalidArgumentType = 15,
    NotAuthorized = 16,
    AdaptorInternal = 17,
    PluginInternal = 18,
    ServerInternal = 19,
    Dbus = 20,
    CallbackTimeOut = 21,
    NotDispatched = 22,
}

impl ErrorCode {
    pub const fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        use ErrorCode::*;
        let all = [
            None, Launch, Init, Deinit, Create, Destroy, Start, Stop, Connect, Disconnect, NotFound,
            Corrupted, Unsupported, InvalidHandle, InvalidArgument, InvalidArgumentType, NotAuthorized,
            AdaptorInternal, PluginInternal, ServerInternal, Dbus, CallbackTimeOut, NotDispatched,
        ];
        all.into_iter().find(|c| c.code() == code)
    }
}

/// Errors a plugin can report back to the adaptor.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PluginError {
    /// Credentials expired or were rejected by the backend.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Connecting or reconnecting to the backend failed.
    #[error("connection failure: {0}")]
    Connection(String),

    #[error("operation `{0}` is not supported by this plugin")]
    Unsupported(String),

    #[error("plugin error {code}: {message}")]
    Failed { code: i64, message: String },

    /// The plugin reported failure without saying why.
    #[error("plugin failed without details")]
    Unspecified,
}

impl PluginError {
    pub fn code(&self) -> i64 {
        match self {
            PluginError::NotAuthorized(_) => ErrorCode::NotAuthorized.code(),
            PluginError::Connection(_) => ErrorCode::Connect.code(),
            PluginError::Unsupported(_) => ErrorCode::Unsupported.code(),
            PluginError::Failed { code, .. } => *code,
            PluginError::Unspecified => ErrorCode::PluginInternal.code(),
        }
    }

    /// Map a non-zero envelope result onto an error.
    pub fn from_result(code: i64, message: String) -> Self {
        match ErrorCode::from_code(code) {
            Some(ErrorCode::NotAuthorized) => PluginError::NotAuthorized(message),
            Some(ErrorCode::Connect) => PluginError::Connection(message),
            _ => PluginError::Failed { code, message },
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Failed {
            code: ErrorCode::Corrupted.code(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for PluginError {
    fn from(err: anyhow::Error) -> PluginError {
        PluginError::Failed {
            code: ErrorCode::PluginInternal.code(),
            message: err.to_string(),
        }
    }
}

/// Plugins living across a process boundary report failures inside the
/// reply envelope. Turn a non-zero `rcode` into an error.
pub fn check_reply(reply: PluginMessage) -> Result<PluginMessage, PluginError> {
    let (code, message) = reply.result();
    if code == ErrorCode::None.code() {
        Ok(reply)
    } else {
        Err(PluginError::from_result(code, message))
    }
}

/// Reply envelope for `request` carrying `err` as its result.
pub fn build_error_reply(request: &PluginMessage, err: &PluginError) -> PluginMessage {
    let mut reply = PluginMessage::reply_to(request);
    reply.set_result(err.code(), err.to_string());
    reply
}

/// Successful reply with the current server time, in milliseconds since
/// the epoch, as mandatory parameter 0.
pub fn build_current_time_reply(request: &PluginMessage) -> PluginMessage {
    let mut reply = PluginMessage::reply_to(request);
    reply.set_param(0, Utc::now().timestamp_millis());
    reply.set_result(ErrorCode::None.code(), "");
    reply
}
