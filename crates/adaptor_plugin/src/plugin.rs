use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::message::PluginMessage;
use crate::plugin_helpers::PluginError;

/// An independently pluggable backend function area.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Auth,
    Storage,
    Contact,
    Message,
    Push,
    Shop,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::Auth,
        Capability::Storage,
        Capability::Contact,
        Capability::Message,
        Capability::Push,
        Capability::Shop,
    ];
}

/// Whether message calls may go straight through or must reconnect first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, AsRefStr, Display, Serialize, Deserialize, JsonSchema,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPolicy {
    #[default]
    Auto,
    Connect,
    Disconnect,
}

/// Functions of the message capability, named by their envelope function id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageOperation {
    CreateChatroom,
    ChangeChatroomMeta,
    Chat,
    AllowChat,
    GetAllUnreadMessage,
    InviteChat,
    EndChat,
    UnsealMessage,
    SaveCallLog,
    CurrentTime,
    GetConnectionPolicy,
    RequestReadReceipt,
    GetChatIdList,
    GetMsisdnList,
}

/// Client identity and credentials handed over at connect time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ContextInfo {
    pub app_id: String,
    pub user_id: String,
    pub imsi: String,
    pub duid: String,
    pub msisdn: String,
    pub app_key: String,
    pub app_secret: String,
    pub properties: HashMap<String, String>,
}

/// Access token shared by every sub-context of one service context.
/// Auth refresh replaces the value in place.
#[derive(Clone, Default)]
pub struct AccessToken(Arc<RwLock<Option<String>>>);

impl AccessToken {
    pub fn new(token: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(token)))
    }

    pub fn get(&self) -> Option<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, token: Option<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(_) => f.write_str("AccessToken(<set>)"),
            None => f.write_str("AccessToken(<unset>)"),
        }
    }
}

/// What a plugin gets to identify one of its contexts.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub context_id: String,
    pub service_name: String,
    pub capability: Capability,
    pub plugin_uri: String,
    pub info: ContextInfo,
    pub access_token: AccessToken,
}

impl PluginContext {
    pub fn new(
        service_name: impl Into<String>,
        capability: Capability,
        plugin_uri: impl Into<String>,
        info: ContextInfo,
        access_token: AccessToken,
    ) -> Self {
        Self {
            context_id: Uuid::new_v4().to_string(),
            service_name: service_name.into(),
            capability,
            plugin_uri: plugin_uri.into(),
            info,
            access_token,
        }
    }
}

/// A backend registered under a URI, serving one capability.
///
/// Only `create_context` and `call` are required; the rest default to
/// "not supported" or a no-op so that a storage plugin, say, does not have to
/// care about connection policies.
#[async_trait]
pub trait AdaptorPlugin: Send + Sync + 'static {
    fn uri(&self) -> &str;

    fn capability(&self) -> Capability;

    /// Set up backend state for a new context.
    async fn create_context(&self, context: &PluginContext) -> Result<(), PluginError>;

    async fn destroy_context(&self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Run one function. The function id travels in `request`.
    async fn call(&self, context: &PluginContext, request: &PluginMessage) -> Result<PluginMessage, PluginError>;

    /// Message plugins: switch the connection policy, returning the policy
    /// now in effect.
    async fn set_connection_policy(
        &self,
        _context: &PluginContext,
        _policy: ConnectionPolicy,
    ) -> Result<ConnectionPolicy, PluginError> {
        Err(PluginError::Unsupported("set_connection_policy".into()))
    }

    /// Auth plugins: obtain fresh credentials. A returned token replaces the
    /// shared access token.
    async fn refresh(&self, _context: &PluginContext) -> Result<Option<String>, PluginError> {
        Err(PluginError::Unsupported("refresh".into()))
    }

    /// Push plugins: open the notification channel.
    async fn connect_push(&self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn disconnect_push(&self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }
}
