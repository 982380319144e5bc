//! Request forwarding: identity, upstream mapping, transport and the server loop

pub mod controller;
pub mod headers;
pub mod identity;
pub mod server;
pub mod transport;
pub mod upstream;

pub use controller::{ProxyController, RequestContext};
pub use identity::IdentityExtractor;
pub use server::{ProxyServer, ProxyServerConfig};
pub use transport::{BoxError, HyperTransport, ProxyBody, Transport};
pub use upstream::UpstreamTarget;
