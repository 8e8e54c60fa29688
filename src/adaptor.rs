use std::sync::Arc;

use adaptor_plugin::{Capability, ConnectionPolicy, ErrorCode, PluginMessage};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::broker::{AdaptorResponse, Broker, BrokerError, ConnectRequest, DispatchOutcome};
use crate::logger::RequestTelemetry;

/// A decoded transport call.
#[derive(Debug, Clone)]
pub enum AdaptorRequest {
    Connect(ConnectRequest),
    Disconnect {
        service_name: String,
    },
    Lookup {
        service_name: String,
    },
    SetConnectionPolicy {
        service_name: String,
        policy: ConnectionPolicy,
    },
    GetConnectionPolicy {
        service_name: String,
    },
    Dispatch {
        service_name: String,
        capability: Capability,
        request: PluginMessage,
    },
}

impl AdaptorRequest {
    pub fn name(&self) -> &'static str {
        match self {
            AdaptorRequest::Connect(_) => "connect",
            AdaptorRequest::Disconnect { .. } => "disconnect",
            AdaptorRequest::Lookup { .. } => "lookup",
            AdaptorRequest::SetConnectionPolicy { .. } => "set_connection_policy",
            AdaptorRequest::GetConnectionPolicy { .. } => "get_connection_policy",
            AdaptorRequest::Dispatch { .. } => "dispatch",
        }
    }
}

/// Front door for transport adapters: runs requests against the broker on
/// a bounded pool and always answers with a terminal response.
#[derive(Clone)]
pub struct ServiceAdaptor {
    broker: Broker,
    workers: Arc<Semaphore>,
    telemetry: Arc<RequestTelemetry>,
}

impl ServiceAdaptor {
    pub fn new(broker: Broker, telemetry: RequestTelemetry) -> Self {
        let max_workers = broker.config().max_workers.max(1);
        Self {
            broker,
            workers: Arc::new(Semaphore::new(max_workers)),
            telemetry: Arc::new(telemetry),
        }
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Handle one request once a worker is free.
    pub async fn handle(&self, request: AdaptorRequest) -> AdaptorResponse {
        let Ok(_permit) = self.workers.acquire().await else {
            return AdaptorResponse {
                code: ErrorCode::AdaptorInternal.code(),
                message: "worker pool closed".into(),
                payload: None,
            };
        };
        let name = request.name();
        let result = self
            .telemetry
            .instrument_request(name, || self.process(request))
            .await;
        result.unwrap_or_else(|err| AdaptorResponse::from_result(Err(err)))
    }

    /// Handle a request on its own task.
    pub fn submit(&self, request: AdaptorRequest) -> JoinHandle<AdaptorResponse> {
        let this = self.clone();
        tokio::spawn(async move { this.handle(request).await })
    }

    async fn process(&self, request: AdaptorRequest) -> Result<AdaptorResponse, BrokerError> {
        match request {
            AdaptorRequest::Connect(connect) => {
                self.broker.connect(connect).await?;
                Ok(AdaptorResponse::ok(None))
            }
            AdaptorRequest::Disconnect { service_name } => {
                self.broker.disconnect(&service_name).await?;
                Ok(AdaptorResponse::ok(None))
            }
            AdaptorRequest::Lookup { service_name } => {
                let context = self.broker.get_service_context(&service_name).await?;
                let mut reply = PluginMessage::create();
                reply.set_param(0, context.app_id());
                reply.set_param(1, context.cluster_name());
                reply.set_param(2, context.policy().to_string());
                Ok(AdaptorResponse::ok(Some(reply)))
            }
            AdaptorRequest::SetConnectionPolicy { service_name, policy } => {
                self.broker
                    .set_message_connection_policy(&service_name, policy)
                    .await?;
                Ok(AdaptorResponse::ok(None))
            }
            AdaptorRequest::GetConnectionPolicy { service_name } => {
                let policy = self.broker.get_message_connection_policy(&service_name).await?;
                let mut reply = PluginMessage::create();
                reply.set_param(0, policy.to_string());
                Ok(AdaptorResponse::ok(Some(reply)))
            }
            AdaptorRequest::Dispatch {
                service_name,
                capability,
                request,
            } => match self.broker.dispatch(&service_name, capability, &request).await {
                completed @ DispatchOutcome::Completed(_) => Ok(completed.into_response()),
                DispatchOutcome::Failed(err) => Err(err),
                DispatchOutcome::NotDispatched(reason) => Err(BrokerError::NotDispatched(reason)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PluginManager;
    use crate::config::BrokerConfig;
    use adaptor_plugin::plugin_test_util::MockPlugin;

    fn adaptor(max_workers: usize, plugins: &[Arc<MockPlugin>]) -> ServiceAdaptor {
        let mgr = PluginManager::new();
        for plugin in plugins {
            mgr.register(plugin.clone());
        }
        let config = BrokerConfig {
            max_workers,
            ..BrokerConfig::default()
        };
        ServiceAdaptor::new(Broker::new(config, mgr), RequestTelemetry::global())
    }

    #[tokio::test]
    async fn every_request_gets_a_terminal_response() {
        let adaptor = adaptor(2, &[]);
        let response = adaptor
            .handle(AdaptorRequest::Lookup {
                service_name: "nobody".into(),
            })
            .await;
        assert_eq!(response.code, 10);
        assert_eq!(response.message, "Can not get service context: nobody");
        assert_eq!(adaptor.available_workers(), 2);
    }

    #[tokio::test]
    async fn policy_requests_round_trip() {
        let message = MockPlugin::new("mock://msg", Capability::Message);
        let adaptor = adaptor(1, &[message]);
        let connect = ConnectRequest::new("svc", "other").with_plugin(Capability::Message, "mock://msg");
        assert!(adaptor.handle(AdaptorRequest::Connect(connect)).await.is_success());

        let set = adaptor
            .handle(AdaptorRequest::SetConnectionPolicy {
                service_name: "svc".into(),
                policy: ConnectionPolicy::Connect,
            })
            .await;
        assert!(set.is_success());

        let get = adaptor
            .handle(AdaptorRequest::GetConnectionPolicy {
                service_name: "svc".into(),
            })
            .await;
        let payload = get.payload.unwrap();
        assert_eq!(payload.get_param(0).unwrap().as_str(), Some("connect"));
    }

    #[tokio::test]
    async fn submitted_dispatch_runs_on_the_pool() {
        let storage = MockPlugin::new("mock://storage", Capability::Storage);
        let adaptor = adaptor(1, &[storage.clone()]);
        let connect = ConnectRequest::new("svc", "other").with_plugin(Capability::Storage, "mock://storage");
        adaptor.handle(AdaptorRequest::Connect(connect)).await;

        let mut request = PluginMessage::request("upload");
        request.set_param(0, "file.txt");
        let response = adaptor
            .submit(AdaptorRequest::Dispatch {
                service_name: "svc".into(),
                capability: Capability::Storage,
                request,
            })
            .await
            .unwrap();
        assert!(response.is_success());
        assert_eq!(
            response.payload.unwrap().get_param(0).unwrap().as_str(),
            Some("file.txt")
        );
        assert_eq!(storage.call_count(), 1);
    }

    #[tokio::test]
    async fn completed_dispatch_keeps_the_plugin_message() {
        let message = MockPlugin::new("mock://msg", Capability::Message);
        let adaptor = adaptor(1, &[message.clone()]);
        let connect = ConnectRequest::new("svc", "other").with_plugin(Capability::Message, "mock://msg");
        adaptor.handle(AdaptorRequest::Connect(connect)).await;

        let request = PluginMessage::request("chat");
        let mut reply = PluginMessage::reply_to(&request);
        reply.set_result(0, "delivered");
        message.push_reply(Ok(reply));

        let response = adaptor
            .handle(AdaptorRequest::Dispatch {
                service_name: "svc".into(),
                capability: Capability::Message,
                request,
            })
            .await;
        assert!(response.is_success());
        assert_eq!(response.message, "delivered");
        assert!(response.payload.is_some());
    }

    #[tokio::test]
    async fn missing_capability_is_not_dispatched() {
        let adaptor = adaptor(1, &[]);
        adaptor
            .handle(AdaptorRequest::Connect(ConnectRequest::new("svc", "other")))
            .await;
        let response = adaptor
            .handle(AdaptorRequest::Dispatch {
                service_name: "svc".into(),
                capability: Capability::Shop,
                request: PluginMessage::request("get_item_list"),
            })
            .await;
        assert_eq!(response.code, ErrorCode::NotDispatched.code());
    }
}
