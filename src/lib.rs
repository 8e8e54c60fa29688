pub mod adaptor;
pub mod broker;
pub mod config;
pub mod logger;
pub mod schema;
