use adaptor_plugin::{Capability, ErrorCode, MessageError, PluginError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// No context is registered under this service name.
    #[error("Can not get service context: {0}")]
    NotFound(String),

    #[error("service `{service}` has no {capability} sub-context")]
    MissingCapability { service: String, capability: Capability },

    #[error("no shared push context `{0}`")]
    PushNotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Nothing was called: no plugin is available for the sub-context.
    #[error("not dispatched: {0}")]
    NotDispatched(String),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Message(#[from] MessageError),
}

impl BrokerError {
    pub fn code(&self) -> i64 {
        match self {
            BrokerError::NotFound(_) | BrokerError::MissingCapability { .. } | BrokerError::PushNotFound(_) => {
                ErrorCode::NotFound.code()
            }
            BrokerError::InvalidArgument(_) => ErrorCode::InvalidArgument.code(),
            BrokerError::NotDispatched(_) => ErrorCode::NotDispatched.code(),
            BrokerError::Plugin(err) => err.code(),
            BrokerError::Message(err) => match err {
                MessageError::InvalidArgument(_) | MessageError::OutOfRange { .. } => ErrorCode::InvalidArgument.code(),
                MessageError::NotFound(_) => ErrorCode::NotFound.code(),
                MessageError::ParseError(_) => ErrorCode::Corrupted.code(),
                MessageError::TypeMismatch { .. } => ErrorCode::InvalidArgumentType.code(),
            },
        }
    }

    /// Human readable half of the `(code, message)` pair. Plugin failures
    /// keep the plugin's own text.
    pub fn message(&self) -> String {
        match self {
            BrokerError::Plugin(PluginError::NotAuthorized(msg))
            | BrokerError::Plugin(PluginError::Connection(msg))
            | BrokerError::Plugin(PluginError::Failed { message: msg, .. }) => msg.clone(),
            other => other.to_string(),
        }
    }

    /// True for any plugin failure carrying NOT_AUTHORIZED, including a
    /// plain `Failed` reply with that code.
    pub fn is_not_authorized(&self) -> bool {
        matches!(self, BrokerError::Plugin(_)) && self.code() == ErrorCode::NotAuthorized.code()
    }
}
