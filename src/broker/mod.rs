/*
┌────────────────────────────────────────────────┐
│                    Broker                      │
│  registry: service_name → ServiceContext       │
│            push_key     → shared push context  │
└────────────────────────────────────────────────┘
        │ connect / disconnect / lookup / policy
        ▼
┌────────────────────────────────────────────────┐
│               ServiceContext                   │
│  auth │ storage │ contact │ message │ shop     │  ← PluginWrapper each
│  push binding ──────────────▶ PushTable entry  │
└────────────────────────────────────────────────┘
        │ dispatch_with_retry
        ▼
  ensure_connected (message only) → call → NotAuthorized?
                                          └─ auth_refresh, call once more
*/
pub mod context;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod push;
pub mod wrapper;

pub use context::{ContextSummary, ServiceContext};
pub use dispatch::{AdaptorResponse, DispatchOutcome, retry_once_on_unauthorized};
pub use error::BrokerError;
pub use manager::{Broker, ConnectRequest};
pub use plugin::PluginManager;
pub use push::{PushHandler, PushTable};
pub use wrapper::PluginWrapper;
