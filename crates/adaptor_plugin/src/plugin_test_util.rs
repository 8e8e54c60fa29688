use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::message::{Param, PluginMessage};
use crate::plugin::{AdaptorPlugin, Capability, ConnectionPolicy, PluginContext};
use crate::plugin_helpers::PluginError;

/// Scriptable plugin for tests.
///
/// Queued replies are handed out first; once a queue is empty the mock
/// falls back to a sensible success (echo the mandatory parameters, accept
/// the requested policy, mint a fresh token). Every interaction is written
/// to a journal so tests can check ordering.
pub struct MockPlugin {
    uri: String,
    capability: Capability,
    replies: Mutex<VecDeque<Result<PluginMessage, PluginError>>>,
    policy_replies: Mutex<VecDeque<Result<ConnectionPolicy, PluginError>>>,
    refresh_replies: Mutex<VecDeque<Result<Option<String>, PluginError>>>,
    create_error: Mutex<Option<PluginError>>,
    journal: Mutex<Vec<String>>,
    tokens_seen: Mutex<Vec<Option<String>>>,
    contexts: DashMap<String, PluginContext>,
    calls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl MockPlugin {
    pub fn new(uri: &str, capability: Capability) -> Arc<Self> {
        Arc::new(Self {
            uri: uri.to_string(),
            capability,
            replies: Mutex::new(VecDeque::new()),
            policy_replies: Mutex::new(VecDeque::new()),
            refresh_replies: Mutex::new(VecDeque::new()),
            create_error: Mutex::new(None),
            journal: Mutex::new(vec![]),
            tokens_seen: Mutex::new(vec![]),
            contexts: DashMap::new(),
            calls: AtomicUsize::new(0),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn push_reply(&self, reply: Result<PluginMessage, PluginError>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_policy_reply(&self, reply: Result<ConnectionPolicy, PluginError>) {
        self.policy_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_refresh_reply(&self, reply: Result<Option<String>, PluginError>) {
        self.refresh_replies.lock().unwrap().push_back(reply);
    }

    /// Make the next `create_context` fail.
    pub fn fail_next_create(&self, err: PluginError) {
        *self.create_error.lock().unwrap() = Some(err);
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Access tokens observed by `call`, in order.
    pub fn tokens_seen(&self) -> Vec<Option<String>> {
        self.tokens_seen.lock().unwrap().clone()
    }

    /// Contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        self.contexts.len()
    }

    pub fn live_services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.contexts.iter().map(|c| c.value().service_name.clone()).collect();
        names.sort();
        names
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }

    fn echo(request: &PluginMessage) -> PluginMessage {
        let mut reply = PluginMessage::reply_to(request);
        for (index, param) in request.params() {
            match param {
                Param::Value(v) => reply.set_param(*index, v.clone()),
                Param::Array(a) => reply.set_param_array(*index, a.clone()),
            }
        }
        reply.set_result(0, "");
        reply
    }
}

#[async_trait]
impl AdaptorPlugin for MockPlugin {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn capability(&self) -> Capability {
        self.capability
    }

    async fn create_context(&self, context: &PluginContext) -> Result<(), PluginError> {
        self.record(format!("create:{}", context.service_name));
        if let Some(err) = self.create_error.lock().unwrap().take() {
            return Err(err);
        }
        self.contexts.insert(context.context_id.clone(), context.clone());
        Ok(())
    }

    async fn destroy_context(&self, context: &PluginContext) -> Result<(), PluginError> {
        self.record(format!("destroy:{}", context.service_name));
        self.contexts.remove(&context.context_id);
        Ok(())
    }

    async fn call(&self, context: &PluginContext, request: &PluginMessage) -> Result<PluginMessage, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("call:{}", request.function_id().unwrap_or("?")));
        self.tokens_seen.lock().unwrap().push(context.access_token.get());
        let scripted = self.replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(Self::echo(request)))
    }

    async fn set_connection_policy(
        &self,
        _context: &PluginContext,
        policy: ConnectionPolicy,
    ) -> Result<ConnectionPolicy, PluginError> {
        self.record(format!("policy:{policy}"));
        let scripted = self.policy_replies.lock().unwrap().pop_front();
        scripted.unwrap_or(Ok(policy))
    }

    async fn refresh(&self, _context: &PluginContext) -> Result<Option<String>, PluginError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        self.record("refresh".to_string());
        let scripted = self.refresh_replies.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(Some(format!("token-{n}"))))
    }

    async fn connect_push(&self, context: &PluginContext) -> Result<(), PluginError> {
        self.record(format!("push_connect:{}", context.service_name));
        Ok(())
    }

    async fn disconnect_push(&self, context: &PluginContext) -> Result<(), PluginError> {
        self.record(format!("push_disconnect:{}", context.service_name));
        Ok(())
    }
}
