//! Tenant-isolating reverse proxy in front of a shared Kibana/Elasticsearch backend

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod proxy;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, ConfigValidator};
pub use error::{FilterError, ProxyError, Result, ValidationError};
pub use filter::ResponseFilter;
pub use proxy::{
    HyperTransport, ProxyController, ProxyServer, ProxyServerConfig, RequestContext, Transport,
};
