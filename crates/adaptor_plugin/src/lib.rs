pub mod message;
pub mod param_array;
pub mod plugin;
pub mod plugin_helpers;

#[cfg(feature = "test-utils")]
pub mod plugin_test_util;

pub use message::{MessageError, MessageField, Param, ParamValue, PluginMessage};
pub use param_array::{ParamArray, ParamType};
pub use plugin::{AccessToken, AdaptorPlugin, Capability, ConnectionPolicy, ContextInfo, MessageOperation, PluginContext};
pub use plugin_helpers::{ErrorCode, PluginError};
