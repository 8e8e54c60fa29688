use std::fmt;
use std::sync::Arc;

use adaptor_plugin::plugin_helpers::check_reply;
use adaptor_plugin::{AdaptorPlugin, Capability, ConnectionPolicy, PluginContext, PluginError, PluginMessage};
use tracing::{debug, warn};

use super::error::BrokerError;

/// One capability sub-context: the plugin serving it (if any was found at
/// connect time) and the context handed to that plugin.
#[derive(Clone)]
pub struct PluginWrapper {
    plugin: Option<Arc<dyn AdaptorPlugin>>,
    context: PluginContext,
}

impl PluginWrapper {
    pub fn new(plugin: Option<Arc<dyn AdaptorPlugin>>, context: PluginContext) -> Self {
        Self { plugin, context }
    }

    pub fn context(&self) -> &PluginContext {
        &self.context
    }

    pub fn capability(&self) -> Capability {
        self.context.capability
    }

    pub fn plugin_uri(&self) -> &str {
        &self.context.plugin_uri
    }

    pub fn is_dispatchable(&self) -> bool {
        self.plugin.is_some()
    }

    fn plugin(&self) -> Result<&Arc<dyn AdaptorPlugin>, BrokerError> {
        self.plugin.as_ref().ok_or_else(|| {
            BrokerError::NotDispatched(format!(
                "no {} plugin registered under `{}`",
                self.context.capability, self.context.plugin_uri
            ))
        })
    }

    /// Create the backend context. A sub-context without a plugin stays
    /// registered but inert.
    #[tracing::instrument(skip(self), fields(service = %self.context.service_name, capability = %self.context.capability))]
    pub async fn open(&self) -> Result<(), BrokerError> {
        match &self.plugin {
            Some(plugin) => Ok(plugin.create_context(&self.context).await?),
            None => {
                warn!(uri = %self.context.plugin_uri, "no plugin available, sub-context will not dispatch");
                Ok(())
            }
        }
    }

    /// Destroy the backend context. Failures are logged; teardown goes on.
    pub async fn close(&self) {
        if let Some(plugin) = &self.plugin {
            if let Err(err) = plugin.destroy_context(&self.context).await {
                warn!(
                    service = %self.context.service_name,
                    capability = %self.context.capability,
                    "destroy_context failed: {err}"
                );
            }
        }
    }

    /// Run one function on the plugin. A reply carrying a non-zero result
    /// code is turned into an error.
    #[tracing::instrument(skip(self, request), fields(service = %self.context.service_name, function = request.function_id().unwrap_or_default()))]
    pub async fn call(&self, request: &PluginMessage) -> Result<PluginMessage, BrokerError> {
        let plugin = self.plugin()?;
        let reply = plugin.call(&self.context, request).await?;
        debug!("plugin replied");
        Ok(check_reply(reply)?)
    }

    /// Ask a message plugin to switch policy. A failure without details is
    /// reported as a connection failure.
    pub async fn set_connection_policy(&self, policy: ConnectionPolicy) -> Result<ConnectionPolicy, BrokerError> {
        let plugin = self.plugin()?;
        match plugin.set_connection_policy(&self.context, policy).await {
            Ok(now) => Ok(now),
            Err(PluginError::Unspecified) => Err(PluginError::Connection("Connection failure".into()).into()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn refresh(&self) -> Result<Option<String>, BrokerError> {
        Ok(self.plugin()?.refresh(&self.context).await?)
    }

    pub async fn connect_push(&self) -> Result<(), BrokerError> {
        match &self.plugin {
            Some(plugin) => Ok(plugin.connect_push(&self.context).await?),
            None => Ok(()),
        }
    }

    pub async fn disconnect_push(&self) {
        if let Some(plugin) = &self.plugin {
            if let Err(err) = plugin.disconnect_push(&self.context).await {
                warn!(push = %self.context.service_name, "disconnect_push failed: {err}");
            }
        }
    }
}

impl fmt::Debug for PluginWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginWrapper")
            .field("capability", &self.context.capability)
            .field("uri", &self.context.plugin_uri)
            .field("service", &self.context.service_name)
            .field("dispatchable", &self.plugin.is_some())
            .finish()
    }
}
