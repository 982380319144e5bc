//! Configuration management for the proxy

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{Config, IdentityConfig, LoggingConfig, ServerConfig, TenancyConfig, UpstreamConfig};
pub use validator::ConfigValidator;
