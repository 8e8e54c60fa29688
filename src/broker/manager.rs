// src/broker/manager.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use adaptor_plugin::{AccessToken, Capability, ConnectionPolicy, ContextInfo, PluginContext, PluginError, PluginMessage};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::context::{ContextSummary, ServiceContext};
use super::dispatch::{DispatchOutcome, retry_once_on_unauthorized};
use super::error::BrokerError;
use super::plugin::PluginManager;
use super::push::{PushHandler, PushTable};
use super::wrapper::PluginWrapper;
use crate::config::BrokerConfig;

/// Everything needed to connect one service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ConnectRequest {
    pub service_name: String,
    pub cluster_name: String,
    pub info: ContextInfo,
    /// Plugin URI per requested capability.
    pub plugins: BTreeMap<Capability, String>,
    /// Explicit shared push key. When absent the key is derived from the
    /// cluster.
    pub push_service_name: Option<String>,
    pub access_token: Option<String>,
}

impl ConnectRequest {
    pub fn new(service_name: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            ..Self::default()
        }
    }

    pub fn with_plugin(mut self, capability: Capability, uri: impl Into<String>) -> Self {
        self.plugins.insert(capability, uri.into());
        self
    }

    pub fn with_info(mut self, info: ContextInfo) -> Self {
        self.info = info;
        self
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_push_service(mut self, name: impl Into<String>) -> Self {
        self.push_service_name = Some(name.into());
        self
    }
}

#[derive(Default)]
struct Registry {
    contexts: HashMap<String, Arc<ServiceContext>>,
    push: PushTable,
}

/// Owns the `service_name -> ServiceContext` registry and mediates
/// capability calls.
///
/// Every registry mutation and lookup goes through one async lock. Lifecycle
/// steps (connect, disconnect) keep it while they talk to plugins; dispatch
/// only holds it for the lookup and never across the plugin call.
#[derive(Clone)]
pub struct Broker {
    config: BrokerConfig,
    plugins: PluginManager,
    registry: Arc<Mutex<Registry>>,
    push_handlers: Arc<StdMutex<Vec<Arc<dyn PushHandler>>>>,
}

impl Broker {
    pub fn new(config: BrokerConfig, plugins: PluginManager) -> Self {
        Self {
            config,
            plugins,
            registry: Arc::new(Mutex::new(Registry::default())),
            push_handlers: Arc::new(StdMutex::new(vec![])),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    /// Subscribe to push notifications routed through the broker.
    pub fn subscribe_push(&self, handler: Arc<dyn PushHandler>) {
        self.push_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn push_key_for(&self, request: &ConnectRequest) -> String {
        if let Some(name) = &request.push_service_name {
            return name.clone();
        }
        if request.cluster_name == self.config.builtin_cluster {
            self.config.push_service_name.clone()
        } else {
            request.service_name.clone()
        }
    }

    /// Connect a service. An existing context under the same name is torn
    /// down first, so at most one context per name is ever live.
    #[tracing::instrument(skip(self, request), fields(service = %request.service_name, cluster = %request.cluster_name))]
    pub async fn connect(&self, request: ConnectRequest) -> Result<Arc<ServiceContext>, BrokerError> {
        if request.service_name.is_empty() {
            return Err(BrokerError::InvalidArgument("empty service name".into()));
        }

        let mut registry = self.registry.lock().await;
        if let Some(old) = registry.contexts.remove(&request.service_name) {
            info!("replacing existing context");
            Self::teardown(&mut registry, &old).await;
        }

        let token = AccessToken::new(request.access_token.clone());
        let context = Arc::new(ServiceContext::new(
            request.service_name.clone(),
            request.cluster_name.clone(),
            request.info.clone(),
            token.clone(),
        ));

        for (capability, uri) in &request.plugins {
            if *capability == Capability::Push {
                continue;
            }
            let wrapper = self.sub_context(&request.service_name, *capability, uri, &request.info, &token);
            if let Err(err) = wrapper.open().await {
                warn!(capability = %capability, "could not create sub-context: {err}");
                Self::teardown(&mut registry, &context).await;
                return Err(err);
            }
            context.insert_sub_context(wrapper);
        }

        if let Some(uri) = request.plugins.get(&Capability::Push) {
            let key = self.push_key_for(&request);
            if let Err(err) = self.attach_push(&mut registry, &context, &key, uri, &request.info, &token).await {
                warn!(push = %key, "could not attach push context: {err}");
                Self::teardown(&mut registry, &context).await;
                return Err(err);
            }
        }

        registry
            .contexts
            .insert(request.service_name.clone(), context.clone());
        info!(capabilities = ?context.capabilities(), "service connected");
        Ok(context)
    }

    fn sub_context(
        &self,
        service_name: &str,
        capability: Capability,
        uri: &str,
        info: &ContextInfo,
        token: &AccessToken,
    ) -> PluginWrapper {
        let plugin = self.plugins.get(capability, uri);
        let ctx = PluginContext::new(service_name, capability, uri, info.clone(), token.clone());
        PluginWrapper::new(plugin, ctx)
    }

    // Reuse the shared push entry under `key` or create and connect it,
    // then bind the service to it.
    async fn attach_push(
        &self,
        registry: &mut Registry,
        context: &ServiceContext,
        key: &str,
        uri: &str,
        info: &ContextInfo,
        token: &AccessToken,
    ) -> Result<(), BrokerError> {
        if !registry.push.contains(key) {
            let wrapper = self.sub_context(key, Capability::Push, uri, info, token);
            wrapper.open().await?;
            if let Err(err) = wrapper.connect_push().await {
                wrapper.close().await;
                return Err(err);
            }
            registry.push.insert(key, wrapper);
            info!(push = %key, "shared push context created");
        } else {
            debug!(push = %key, "reusing shared push context");
        }
        registry.push.bind(key, context.service_name());
        context.bind_push(key);
        Ok(())
    }

    async fn release_push(registry: &mut Registry, key: &str, service_name: &str) {
        if let Some(push) = registry.push.unbind(key, service_name) {
            info!(push = %key, "last service unbound, closing shared push context");
            push.disconnect_push().await;
            push.close().await;
        }
    }

    async fn teardown(registry: &mut Registry, context: &ServiceContext) {
        let (wrappers, push_key) = context.drain();
        for wrapper in wrappers {
            wrapper.close().await;
        }
        if let Some(key) = push_key {
            Self::release_push(registry, &key, context.service_name()).await;
        }
    }

    /// Tear down all sub-contexts of a service and forget it.
    #[tracing::instrument(skip(self))]
    pub async fn disconnect(&self, service_name: &str) -> Result<(), BrokerError> {
        let mut registry = self.registry.lock().await;
        let context = registry
            .contexts
            .remove(service_name)
            .ok_or_else(|| BrokerError::NotFound(service_name.to_string()))?;
        Self::teardown(&mut registry, &context).await;
        info!("service disconnected");
        Ok(())
    }

    pub async fn get_service_context(&self, service_name: &str) -> Result<Arc<ServiceContext>, BrokerError> {
        self.registry
            .lock()
            .await
            .contexts
            .get(service_name)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(service_name.to_string()))
    }

    /// Store a new message connection policy. No plugin is involved.
    pub async fn set_message_connection_policy(
        &self,
        service_name: &str,
        policy: ConnectionPolicy,
    ) -> Result<(), BrokerError> {
        let registry = self.registry.lock().await;
        let context = registry
            .contexts
            .get(service_name)
            .ok_or_else(|| BrokerError::NotFound(service_name.to_string()))?;
        context.set_policy(policy);
        debug!(service = service_name, policy = %policy, "connection policy stored");
        Ok(())
    }

    pub async fn get_message_connection_policy(&self, service_name: &str) -> Result<ConnectionPolicy, BrokerError> {
        Ok(self.get_service_context(service_name).await?.policy())
    }

    /// Move a service's push binding to the shared push entry `push_key`,
    /// which must already exist.
    #[tracing::instrument(skip(self))]
    pub async fn rebind_push(&self, service_name: &str, push_key: &str) -> Result<(), BrokerError> {
        let mut registry = self.registry.lock().await;
        let context = registry
            .contexts
            .get(service_name)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(service_name.to_string()))?;
        if !registry.push.bind(push_key, service_name) {
            return Err(BrokerError::PushNotFound(push_key.to_string()));
        }
        if let Some(old) = context.bind_push(push_key) {
            if old != push_key {
                Self::release_push(&mut registry, &old, service_name).await;
            }
        }
        info!(push = push_key, "push binding moved");
        Ok(())
    }

    /// Refresh credentials through the service's auth sub-context and store
    /// the new token where every sub-context sees it.
    #[tracing::instrument(skip(self))]
    pub async fn auth_refresh(&self, service_name: &str) -> Result<(), BrokerError> {
        let context = self.get_service_context(service_name).await?;
        Self::refresh_context(&context).await
    }

    async fn refresh_context(context: &ServiceContext) -> Result<(), BrokerError> {
        let auth = context
            .sub_context(Capability::Auth)
            .ok_or_else(|| BrokerError::MissingCapability {
                service: context.service_name().to_string(),
                capability: Capability::Auth,
            })?;
        if let Some(token) = auth.refresh().await? {
            context.access_token().set(Some(token));
            info!(service = context.service_name(), "access token refreshed");
        }
        Ok(())
    }

    // Message calls against a DISCONNECT context switch it back to AUTO first.
    async fn ensure_connected(&self, context: &ServiceContext, wrapper: &PluginWrapper) -> Result<(), BrokerError> {
        if context.policy() != ConnectionPolicy::Disconnect {
            return Ok(());
        }
        info!(service = context.service_name(), "auto-reconnecting");
        match wrapper.set_connection_policy(ConnectionPolicy::Auto).await {
            Ok(_) | Err(BrokerError::Plugin(PluginError::Unsupported(_))) => {}
            Err(err) => return Err(err),
        }
        let _registry = self.registry.lock().await;
        context.set_policy(ConnectionPolicy::Auto);
        Ok(())
    }

    /// Call `capability` for a service, refreshing auth and retrying once
    /// when the plugin answers "not authorized".
    #[tracing::instrument(skip(self, request), fields(function = request.function_id().unwrap_or_default()))]
    pub async fn dispatch_with_retry(
        &self,
        service_name: &str,
        capability: Capability,
        request: &PluginMessage,
    ) -> Result<PluginMessage, BrokerError> {
        let context = self.get_service_context(service_name).await?;
        let wrapper = context.sub_context(capability).ok_or_else(|| {
            BrokerError::NotDispatched(format!("service `{service_name}` has no {capability} sub-context"))
        })?;
        if capability == Capability::Message {
            self.ensure_connected(&context, &wrapper).await?;
        }

        // the retry goes through this context's wrapper, so refresh this
        // context even if the service was reconnected in between
        let (context, wrapper) = (&context, &wrapper);
        retry_once_on_unauthorized(
            move || wrapper.call(request),
            move || Self::refresh_context(context),
        )
        .await
    }

    pub async fn dispatch(&self, service_name: &str, capability: Capability, request: &PluginMessage) -> DispatchOutcome {
        DispatchOutcome::from_result(self.dispatch_with_retry(service_name, capability, request).await)
    }

    /// Deliver a push notification to every service bound to `push_key`.
    /// Returns the services reached.
    pub async fn route_push(&self, push_key: &str, msg: &PluginMessage) -> Result<Vec<String>, BrokerError> {
        let services = self
            .registry
            .lock()
            .await
            .push
            .bound_services(push_key)
            .ok_or_else(|| BrokerError::PushNotFound(push_key.to_string()))?;
        let handlers = self
            .push_handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for service in &services {
            for handler in &handlers {
                handler.handle_push(service, msg).await;
            }
        }
        debug!(push = push_key, reached = services.len(), "push routed");
        Ok(services)
    }

    pub async fn list_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.lock().await.contexts.keys().cloned().collect();
        names.sort();
        names
    }

    /// Simple diagnostics: service name → summary
    pub async fn diagnostics(&self) -> BTreeMap<String, ContextSummary> {
        self.registry
            .lock()
            .await
            .contexts
            .iter()
            .map(|(name, ctx)| (name.clone(), ctx.summary()))
            .collect()
    }

    pub async fn push_ref_counts(&self) -> BTreeMap<String, usize> {
        self.registry.lock().await.push.ref_counts()
    }

    /// Disconnect every service and close any push context left over.
    pub async fn shutdown_all(&self) {
        let mut registry = self.registry.lock().await;
        let contexts: Vec<_> = registry.contexts.drain().map(|(_, ctx)| ctx).collect();
        for context in &contexts {
            Self::teardown(&mut registry, context).await;
        }
        for push in registry.push.drain() {
            push.disconnect_push().await;
            push.close().await;
        }
        info!(services = contexts.len(), "broker shut down");
    }
}
