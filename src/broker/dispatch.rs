use std::future::Future;

use adaptor_plugin::{ErrorCode, PluginMessage};
use serde_json::{Value, json};
use tracing::{info, warn};

use super::error::BrokerError;

/// Run `attempt`; if it fails with "not authorized", run `refresh` once and
/// `attempt` once more. The second result is returned whatever it is. A
/// failed refresh is logged and does not prevent the retry.
pub async fn retry_once_on_unauthorized<T, A, AFut, R, RFut>(mut attempt: A, refresh: R) -> Result<T, BrokerError>
where
    A: FnMut() -> AFut,
    AFut: Future<Output = Result<T, BrokerError>>,
    R: FnOnce() -> RFut,
    RFut: Future<Output = Result<(), BrokerError>>,
{
    match attempt().await {
        Err(err) if err.is_not_authorized() => {
            info!("not authorized, refreshing credentials and retrying once");
            if let Err(refresh_err) = refresh().await {
                warn!("auth refresh failed: {refresh_err}");
            }
            attempt().await
        }
        other => other,
    }
}

/// How a dispatched call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Completed(PluginMessage),
    Failed(BrokerError),
    /// No plugin was invoked.
    NotDispatched(String),
}

impl DispatchOutcome {
    pub fn from_result(result: Result<PluginMessage, BrokerError>) -> Self {
        match result {
            Ok(reply) => DispatchOutcome::Completed(reply),
            Err(BrokerError::NotDispatched(reason)) => DispatchOutcome::NotDispatched(reason),
            Err(err) => DispatchOutcome::Failed(err),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DispatchOutcome::Completed(_))
    }

    pub fn into_response(self) -> AdaptorResponse {
        match self {
            DispatchOutcome::Completed(reply) => {
                let (code, message) = reply.result();
                AdaptorResponse {
                    code,
                    message,
                    payload: Some(reply),
                }
            }
            DispatchOutcome::Failed(err) => AdaptorResponse::from_error(&err),
            DispatchOutcome::NotDispatched(reason) => AdaptorResponse {
                code: ErrorCode::NotDispatched.code(),
                message: reason,
                payload: None,
            },
        }
    }
}

/// Terminal answer for every request: a `(code, message)` pair plus an
/// optional reply envelope. Code 0 is success.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptorResponse {
    pub code: i64,
    pub message: String,
    pub payload: Option<PluginMessage>,
}

impl AdaptorResponse {
    pub fn ok(payload: Option<PluginMessage>) -> Self {
        Self {
            code: ErrorCode::None.code(),
            message: String::new(),
            payload,
        }
    }

    pub fn from_error(err: &BrokerError) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
            payload: None,
        }
    }

    pub fn from_result(result: Result<Option<PluginMessage>, BrokerError>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(BrokerError::NotDispatched(reason)) => DispatchOutcome::NotDispatched(reason).into_response(),
            Err(err) => Self::from_error(&err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::None.code()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "code": self.code,
            "message": self.message,
            "payload": self.payload.as_ref().map(PluginMessage::to_wire),
        })
    }
}
