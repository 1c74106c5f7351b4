pub mod config;
pub mod consumer;
pub mod conversation;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod http_client;
pub mod model;
pub mod probe;
pub mod registry;
pub mod session;
pub mod stream;
pub mod telemetry;
