pub mod aggregate;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub mod model;
pub mod sse;
pub mod stream;
