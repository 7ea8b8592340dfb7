//! Upstream DNS endpoints and selection policies for ruledforward.
//!
//! A [`Proxy`] is one upstream resolver endpoint: it exchanges raw DNS
//! messages over UDP, TCP or TLS, keeps a small cache of idle stream
//! connections, and tracks consecutive-failure health state. A [`Policy`]
//! orders a proxy pool per request.

pub mod error;
pub mod policy;
pub mod proxy;
pub mod tls;

pub use error::UpstreamError;
pub use policy::{Policy, PolicyKind, Random, RoundRobin, Sequential};
pub use proxy::{ConnectOpts, Proxy, Transport};
pub use tls::TlsOptions;
