pub mod backoff;
pub mod config;
pub mod connection_manager;
pub mod dispatcher;
pub mod endpoint;
pub mod errors;
pub mod events;
pub mod feeds;
pub mod normalizer;
pub mod pricing;
pub mod stats;
pub mod transport;
