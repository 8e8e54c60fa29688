use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use adaptor_plugin::{AccessToken, Capability, ConnectionPolicy, ContextInfo};
use crossbeam_utils::atomic::AtomicCell;
use schemars::JsonSchema;
use serde::Serialize;

use super::wrapper::PluginWrapper;

#[derive(Debug, Default)]
struct SubContexts {
    by_capability: BTreeMap<Capability, PluginWrapper>,
    push_key: Option<String>,
}

/// Everything the broker keeps for one connected service.
#[derive(Debug)]
pub struct ServiceContext {
    service_name: String,
    cluster_name: String,
    info: ContextInfo,
    access_token: AccessToken,
    policy: AtomicCell<ConnectionPolicy>,
    sub_contexts: Mutex<SubContexts>,
}

impl ServiceContext {
    pub fn new(
        service_name: impl Into<String>,
        cluster_name: impl Into<String>,
        info: ContextInfo,
        access_token: AccessToken,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            cluster_name: cluster_name.into(),
            info,
            access_token,
            policy: AtomicCell::new(ConnectionPolicy::Auto),
            sub_contexts: Mutex::new(SubContexts::default()),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn app_id(&self) -> &str {
        &self.info.app_id
    }

    pub fn info(&self) -> &ContextInfo {
        &self.info
    }

    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    pub fn policy(&self) -> ConnectionPolicy {
        self.policy.load()
    }

    pub(crate) fn set_policy(&self, policy: ConnectionPolicy) {
        self.policy.store(policy);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SubContexts> {
        self.sub_contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sub_context(&self, capability: Capability) -> Option<PluginWrapper> {
        self.lock().by_capability.get(&capability).cloned()
    }

    pub(crate) fn insert_sub_context(&self, wrapper: PluginWrapper) {
        self.lock().by_capability.insert(wrapper.capability(), wrapper);
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        self.lock().by_capability.keys().copied().collect()
    }

    /// Number of reachable sub-contexts, the push binding included.
    pub fn sub_context_count(&self) -> usize {
        let subs = self.lock();
        subs.by_capability.len() + usize::from(subs.push_key.is_some())
    }

    pub fn push_key(&self) -> Option<String> {
        self.lock().push_key.clone()
    }

    pub(crate) fn bind_push(&self, key: impl Into<String>) -> Option<String> {
        self.lock().push_key.replace(key.into())
    }

    /// Detach everything. Afterwards no sub-context is reachable from here.
    pub(crate) fn drain(&self) -> (Vec<PluginWrapper>, Option<String>) {
        let mut subs = self.lock();
        let wrappers = std::mem::take(&mut subs.by_capability).into_values().collect();
        (wrappers, subs.push_key.take())
    }

    pub fn summary(&self) -> ContextSummary {
        let subs = self.lock();
        ContextSummary {
            cluster_name: self.cluster_name.clone(),
            app_id: self.info.app_id.clone(),
            policy: self.policy(),
            capabilities: subs.by_capability.keys().copied().collect(),
            undispatchable: subs
                .by_capability
                .values()
                .filter(|w| !w.is_dispatchable())
                .map(PluginWrapper::capability)
                .collect(),
            push_key: subs.push_key.clone(),
        }
    }
}

/// Diagnostic view of one service context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct ContextSummary {
    pub cluster_name: String,
    pub app_id: String,
    pub policy: ConnectionPolicy,
    pub capabilities: Vec<Capability>,
    /// Sub-contexts that have no plugin behind them.
    pub undispatchable: Vec<Capability>,
    pub push_key: Option<String>,
}
