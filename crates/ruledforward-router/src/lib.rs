//! Rule-based DNS request routing middleware.
//!
//! [`RuledForward`] sits in a handler chain inside a larger DNS host. For
//! each query it either synthesises an empty authoritative (NODATA) reply,
//! forwards the query to one of several upstream pools selected by
//! domain-matching rules, or passes it to the next handler unchanged.
//! Rules come from compiled geosite catalogs, AdGuard-syntax filter lists
//! (local or periodically-refreshed remote) and inline configuration.
//!
//! # Example
//!
//! ```no_run
//! use ruledforward_router::{load_config, RuledForward};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("router.toml")?;
//! let router = RuledForward::new(config, None).await?;
//! router.start(); // cron refresh loops
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod forward;
pub mod group;
pub mod metrics;
mod refresh;
pub mod router;

use async_trait::async_trait;
use hickory_proto::op::Message;

pub use config::{
    load_config, validate_config, ConfigError, GroupAction, GroupConfig, GroupTlsConfig,
    RouterConfig, DEFAULT_GROUP, MAX_PROXIES,
};
pub use error::RouterError;
pub use forward::forward_group;
pub use group::{Group, UpdateMask};
pub use router::RuledForward;

/// One stage in the DNS handler chain. A handler either produces the reply
/// itself or delegates to the next stage it was built with.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    async fn handle(&self, req: &Message) -> Result<Message, RouterError>;
}
