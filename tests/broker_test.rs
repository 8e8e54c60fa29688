// tests/broker_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use adaptor_plugin::plugin_test_util::MockPlugin;
use adaptor_plugin::{
    AdaptorPlugin, Capability, ConnectionPolicy, MessageOperation, ParamArray, PluginContext, PluginError,
    PluginMessage,
};
use async_trait::async_trait;
use tokio::sync::Notify;
use service_adaptor::broker::{Broker, BrokerError, ConnectRequest, DispatchOutcome, PluginManager, PushHandler};
use service_adaptor::config::BrokerConfig;

struct Plugins {
    auth: Arc<MockPlugin>,
    message: Arc<MockPlugin>,
    push: Arc<MockPlugin>,
}

fn setup() -> (Broker, Plugins) {
    let plugins = Plugins {
        auth: MockPlugin::new("mock://auth", Capability::Auth),
        message: MockPlugin::new("mock://message", Capability::Message),
        push: MockPlugin::new("mock://push", Capability::Push),
    };
    let mgr = PluginManager::new();
    mgr.register(plugins.auth.clone());
    mgr.register(plugins.message.clone());
    mgr.register(plugins.push.clone());
    (Broker::new(BrokerConfig::default(), mgr), plugins)
}

fn messaging(service: &str) -> ConnectRequest {
    ConnectRequest::new(service, "partner")
        .with_plugin(Capability::Auth, "mock://auth")
        .with_plugin(Capability::Message, "mock://message")
        .with_access_token("initial")
}

fn with_push(service: &str, cluster: &str) -> ConnectRequest {
    ConnectRequest::new(service, cluster)
        .with_plugin(Capability::Message, "mock://message")
        .with_plugin(Capability::Push, "mock://push")
}

fn chat() -> PluginMessage {
    let mut request = PluginMessage::request(MessageOperation::Chat.to_string());
    request.set_param(0, 42);
    request
}

fn unauthorized() -> PluginError {
    PluginError::NotAuthorized("token expired".into())
}

#[tokio::test]
async fn connecting_twice_leaves_one_context() {
    let (broker, plugins) = setup();
    let first = broker.connect(messaging("svc")).await.unwrap();
    assert_eq!(first.sub_context_count(), 2);

    let second = broker.connect(messaging("svc")).await.unwrap();

    assert_eq!(broker.list_services().await, vec!["svc".to_string()]);
    assert_eq!(first.sub_context_count(), 0);
    assert_eq!(second.sub_context_count(), 2);
    assert_eq!(plugins.auth.live_contexts(), 1);
    assert_eq!(plugins.message.live_contexts(), 1);
    assert_eq!(
        plugins.message.journal(),
        vec!["create:svc", "destroy:svc", "create:svc"]
    );
    assert!(Arc::ptr_eq(&broker.get_service_context("svc").await.unwrap(), &second));
}

#[tokio::test]
async fn disconnect_releases_everything() {
    let (broker, plugins) = setup();
    let ctx = broker.connect(messaging("svc")).await.unwrap();
    broker.disconnect("svc").await.unwrap();

    assert_eq!(ctx.sub_context_count(), 0);
    assert_eq!(plugins.auth.live_contexts(), 0);
    assert_eq!(plugins.message.live_contexts(), 0);
    assert_eq!(broker.disconnect("svc").await, Err(BrokerError::NotFound("svc".into())));
}

#[tokio::test]
async fn not_authorized_then_success_refreshes_once() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    plugins.message.push_reply(Err(unauthorized()));

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    let DispatchOutcome::Completed(reply) = outcome else {
        panic!("expected a completed call");
    };
    assert_eq!(reply.get_param(0).unwrap().as_number(), Some(42));
    assert_eq!(plugins.auth.refresh_count(), 1);
    assert_eq!(plugins.message.call_count(), 2);
    assert_eq!(
        plugins.message.tokens_seen(),
        vec![Some("initial".to_string()), Some("token-1".to_string())]
    );
}

#[tokio::test]
async fn not_authorized_twice_returns_the_second_failure() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    plugins.message.push_reply(Err(unauthorized()));
    plugins.message.push_reply(Err(PluginError::NotAuthorized("still expired".into())));

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert_eq!(
        outcome,
        DispatchOutcome::Failed(BrokerError::Plugin(PluginError::NotAuthorized("still expired".into())))
    );
    assert_eq!(plugins.auth.refresh_count(), 1);
    assert_eq!(plugins.message.call_count(), 2);
    let response = outcome.into_response();
    assert_eq!((response.code, response.message.as_str()), (16, "still expired"));
}

#[tokio::test]
async fn failed_error_with_not_authorized_code_retries() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    plugins.message.push_reply(Err(PluginError::Failed { code: 16, message: "expired".into() }));

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert!(outcome.is_completed());
    assert_eq!(plugins.auth.refresh_count(), 1);
    assert_eq!(plugins.message.call_count(), 2);
    assert_eq!(plugins.message.tokens_seen()[1], Some("token-1".to_string()));
}

#[tokio::test]
async fn not_authorized_result_code_in_reply_also_retries() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    let mut expired = PluginMessage::reply_to(&chat());
    expired.set_result(16, "token expired");
    plugins.message.push_reply(Ok(expired));

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert!(outcome.is_completed());
    assert_eq!(plugins.auth.refresh_count(), 1);
}

#[tokio::test]
async fn failed_refresh_still_retries_once() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    plugins.message.push_reply(Err(unauthorized()));
    plugins.auth.push_refresh_reply(Err(PluginError::Connection("auth server down".into())));

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert!(outcome.is_completed());
    assert_eq!(plugins.message.call_count(), 2);
    assert_eq!(plugins.message.tokens_seen()[1].as_deref(), Some("initial"));
}

#[tokio::test]
async fn other_failures_are_not_retried() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    plugins
        .message
        .push_reply(Err(PluginError::Failed { code: 19, message: "server error".into() }));

    let response = broker.dispatch("svc", Capability::Message, &chat()).await.into_response();

    assert_eq!((response.code, response.message.as_str()), (19, "server error"));
    assert_eq!(plugins.auth.refresh_count(), 0);
    assert_eq!(plugins.message.call_count(), 1);
}

#[tokio::test]
async fn disconnect_policy_becomes_auto_before_the_call() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    broker
        .set_message_connection_policy("svc", ConnectionPolicy::Disconnect)
        .await
        .unwrap();

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert!(outcome.is_completed());
    assert_eq!(
        broker.get_message_connection_policy("svc").await.unwrap(),
        ConnectionPolicy::Auto
    );
    assert_eq!(
        plugins.message.journal(),
        vec!["create:svc", "policy:auto", "call:chat"]
    );
}

#[tokio::test]
async fn reconnect_failure_without_details_is_a_connection_error() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    broker
        .set_message_connection_policy("svc", ConnectionPolicy::Disconnect)
        .await
        .unwrap();
    plugins.message.push_policy_reply(Err(PluginError::Unspecified));

    let response = broker.dispatch("svc", Capability::Message, &chat()).await.into_response();

    assert_eq!((response.code, response.message.as_str()), (8, "Connection failure"));
    assert_eq!(plugins.message.call_count(), 0);
    assert_eq!(
        broker.get_message_connection_policy("svc").await.unwrap(),
        ConnectionPolicy::Disconnect
    );
}

#[tokio::test]
async fn other_capabilities_ignore_the_connection_policy() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    broker
        .set_message_connection_policy("svc", ConnectionPolicy::Disconnect)
        .await
        .unwrap();

    let outcome = broker
        .dispatch("svc", Capability::Auth, &PluginMessage::request("get_access_token"))
        .await;

    assert!(outcome.is_completed());
    assert_eq!(
        broker.get_message_connection_policy("svc").await.unwrap(),
        ConnectionPolicy::Disconnect
    );
    assert_eq!(plugins.message.journal(), vec!["create:svc"]);
}

#[tokio::test]
async fn unknown_service_is_not_found_before_any_plugin_call() {
    let (broker, plugins) = setup();

    let response = broker.dispatch("ghost", Capability::Message, &chat()).await.into_response();

    assert_eq!(response.code, 10);
    assert_eq!(response.message, "Can not get service context: ghost");
    assert_eq!(plugins.message.call_count(), 0);
    assert_eq!(plugins.auth.refresh_count(), 0);
}

#[tokio::test]
async fn missing_plugin_is_not_dispatched() {
    let (broker, _plugins) = setup();
    let request = ConnectRequest::new("svc", "partner").with_plugin(Capability::Storage, "mock://unregistered");
    let ctx = broker.connect(request).await.unwrap();
    assert_eq!(ctx.summary().undispatchable, vec![Capability::Storage]);

    let outcome = broker
        .dispatch("svc", Capability::Storage, &PluginMessage::request("upload"))
        .await;

    assert!(matches!(outcome, DispatchOutcome::NotDispatched(_)));
    let response = outcome.into_response();
    assert_eq!(response.code, 22);
    assert!(!response.is_success());
}

#[tokio::test]
async fn builtin_cluster_shares_one_push_context() {
    let (broker, plugins) = setup();
    broker.connect(with_push("a", "tizen")).await.unwrap();
    broker.connect(with_push("b", "tizen")).await.unwrap();

    let counts = broker.push_ref_counts().await;
    assert_eq!(counts.get("tizen-push"), Some(&2));
    assert_eq!(plugins.push.live_services(), vec!["tizen-push".to_string()]);

    broker.disconnect("a").await.unwrap();
    assert_eq!(broker.push_ref_counts().await.get("tizen-push"), Some(&1));
    assert_eq!(plugins.push.live_contexts(), 1);

    broker.disconnect("b").await.unwrap();
    assert!(broker.push_ref_counts().await.is_empty());
    assert_eq!(plugins.push.live_contexts(), 0);
    assert_eq!(
        plugins.push.journal(),
        vec![
            "create:tizen-push",
            "push_connect:tizen-push",
            "push_disconnect:tizen-push",
            "destroy:tizen-push"
        ]
    );
}

#[tokio::test]
async fn other_clusters_get_their_own_push_context() {
    let (broker, plugins) = setup();
    broker.connect(with_push("a", "partner")).await.unwrap();
    broker.connect(with_push("b", "partner")).await.unwrap();

    let counts = broker.push_ref_counts().await;
    assert_eq!(counts.get("a"), Some(&1));
    assert_eq!(counts.get("b"), Some(&1));
    assert_eq!(plugins.push.live_contexts(), 2);
}

#[tokio::test]
async fn reconnecting_keeps_the_shared_push_context_alive_for_others() {
    let (broker, plugins) = setup();
    broker.connect(with_push("a", "tizen")).await.unwrap();
    broker.connect(with_push("b", "tizen")).await.unwrap();
    broker.connect(with_push("a", "tizen")).await.unwrap();

    assert_eq!(broker.push_ref_counts().await.get("tizen-push"), Some(&2));
    assert_eq!(
        plugins.push.journal(),
        vec!["create:tizen-push", "push_connect:tizen-push"]
    );
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, Option<String>)>>,
}

#[async_trait]
impl PushHandler for Recorder {
    async fn handle_push(&self, service_name: &str, msg: &PluginMessage) {
        self.seen
            .lock()
            .unwrap()
            .push((service_name.to_string(), msg.function_id().map(str::to_string)));
    }
}

#[tokio::test]
async fn push_notifications_reach_every_bound_service() {
    let (broker, _plugins) = setup();
    let recorder = Arc::new(Recorder::default());
    broker.subscribe_push(recorder.clone());
    broker.connect(with_push("a", "tizen")).await.unwrap();
    broker.connect(with_push("b", "tizen")).await.unwrap();

    let reached = broker
        .route_push("tizen-push", &PluginMessage::request("push_data"))
        .await
        .unwrap();

    assert_eq!(reached, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(recorder.seen.lock().unwrap().len(), 2);
    assert!(matches!(
        broker.route_push("nope", &PluginMessage::create()).await,
        Err(BrokerError::PushNotFound(_))
    ));
}

#[tokio::test]
async fn rebind_moves_a_service_to_another_push_context() {
    let (broker, plugins) = setup();
    broker.connect(with_push("a", "partner")).await.unwrap();
    broker.connect(with_push("b", "tizen")).await.unwrap();

    broker.rebind_push("a", "tizen-push").await.unwrap();

    let counts = broker.push_ref_counts().await;
    assert_eq!(counts.get("tizen-push"), Some(&2));
    assert_eq!(counts.get("a"), None);
    assert_eq!(plugins.push.live_services(), vec!["tizen-push".to_string()]);
    assert_eq!(
        broker.get_service_context("a").await.unwrap().push_key().as_deref(),
        Some("tizen-push")
    );
    assert!(matches!(
        broker.rebind_push("a", "missing").await,
        Err(BrokerError::PushNotFound(_))
    ));
}

#[tokio::test]
async fn array_parameters_reach_the_plugin_intact() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();
    let mut receivers = ParamArray::create("sb").unwrap();
    receivers.add_element(vec!["alice".into(), true.into()]).unwrap();
    let mut request = PluginMessage::request(MessageOperation::InviteChat.to_string());
    request.set_param_array(1, receivers.clone());

    let DispatchOutcome::Completed(reply) = broker.dispatch("svc", Capability::Message, &request).await else {
        panic!("invite_chat was not completed");
    };
    assert_eq!(reply.get_param_array(1).unwrap(), &receivers);
    assert_eq!(plugins.message.journal().last().map(String::as_str), Some("call:invite_chat"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_all_complete() {
    let (broker, plugins) = setup();
    broker.connect(messaging("svc")).await.unwrap();

    let mut handles = vec![];
    for _ in 0..16 {
        let broker = broker.clone();
        handles.push(tokio::spawn(async move {
            broker.dispatch("svc", Capability::Message, &chat()).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_completed());
    }
    assert_eq!(plugins.message.call_count(), 16);
}

/// Storage plugin whose calls park until released.
#[derive(Default)]
struct GatedPlugin {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl AdaptorPlugin for GatedPlugin {
    fn uri(&self) -> &str {
        "gate://storage"
    }

    fn capability(&self) -> Capability {
        Capability::Storage
    }

    async fn create_context(&self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn call(&self, _context: &PluginContext, request: &PluginMessage) -> Result<PluginMessage, PluginError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(PluginMessage::reply_to(request))
    }
}

#[tokio::test]
async fn registry_stays_usable_while_a_plugin_call_is_in_flight() {
    let (broker, _plugins) = setup();
    let gate = Arc::new(GatedPlugin::default());
    broker.plugins().register(gate.clone());
    broker
        .connect(ConnectRequest::new("slow", "partner").with_plugin(Capability::Storage, "gate://storage"))
        .await
        .unwrap();

    let call = tokio::spawn({
        let broker = broker.clone();
        async move {
            broker
                .dispatch("slow", Capability::Storage, &PluginMessage::request("upload"))
                .await
        }
    });
    gate.entered.notified().await;

    let meanwhile = tokio::time::timeout(Duration::from_secs(5), async {
        broker.get_service_context("slow").await.unwrap();
        broker.connect(messaging("other")).await.unwrap();
        broker.get_message_connection_policy("other").await.unwrap()
    })
    .await;
    assert!(meanwhile.is_ok(), "registry was locked during the plugin call");
    assert!(!call.is_finished());

    gate.release.notify_one();
    assert!(call.await.unwrap().is_completed());
}

/// Message plugin that reconnects its own service during the first call and
/// then reports expired credentials.
#[derive(Default)]
struct ReconnectingPlugin {
    broker: OnceLock<Broker>,
    calls: AtomicUsize,
    tokens: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl AdaptorPlugin for ReconnectingPlugin {
    fn uri(&self) -> &str {
        "reconnect://message"
    }

    fn capability(&self) -> Capability {
        Capability::Message
    }

    async fn create_context(&self, _context: &PluginContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn call(&self, context: &PluginContext, request: &PluginMessage) -> Result<PluginMessage, PluginError> {
        self.tokens.lock().unwrap().push(context.access_token.get());
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            let broker = self.broker.get().expect("broker installed");
            broker.connect(reconnecting("svc")).await.expect("reconnect");
            return Err(PluginError::NotAuthorized("expired".into()));
        }
        Ok(PluginMessage::reply_to(request))
    }
}

fn reconnecting(service: &str) -> ConnectRequest {
    ConnectRequest::new(service, "partner")
        .with_plugin(Capability::Auth, "mock://auth")
        .with_plugin(Capability::Message, "reconnect://message")
        .with_access_token("initial")
}

#[tokio::test]
async fn retry_refreshes_the_context_it_called_not_its_replacement() {
    let (broker, plugins) = setup();
    let plugin = Arc::new(ReconnectingPlugin::default());
    assert!(plugin.broker.set(broker.clone()).is_ok());
    broker.plugins().register(plugin.clone());
    let first = broker.connect(reconnecting("svc")).await.unwrap();

    let outcome = broker.dispatch("svc", Capability::Message, &chat()).await;

    assert!(outcome.is_completed());
    assert_eq!(plugin.calls.load(Ordering::SeqCst), 2);
    // the first context was torn down with its auth sub-context, so there
    // was nothing to refresh and the replacement keeps its own token
    assert_eq!(plugins.auth.refresh_count(), 0);
    let replacement = broker.get_service_context("svc").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &replacement));
    assert_eq!(replacement.access_token().get(), Some("initial".to_string()));
    assert_eq!(
        *plugin.tokens.lock().unwrap(),
        vec![Some("initial".to_string()), Some("initial".to_string())]
    );
}
