//! # ruledforward
//!
//! A rule-based DNS request router, embedded as a middleware stage within
//! a larger recursive-DNS host. For each incoming query it either
//! synthesises an empty authoritative reply, forwards the query to one of
//! several upstream resolver pools selected by domain-matching rules, or
//! passes the query through to the next handler unchanged.
//!
//! ## Crates
//!
//! - [`ruledforward_rules`] - Rule model, matchers and rule-list ingestion
//! - [`ruledforward_upstream`] - Upstream DNS proxies and selection policies
//! - [`ruledforward_router`] - Groups, dispatcher, forwarding and refresh

pub use ruledforward_router as router;
pub use ruledforward_rules as rules;
pub use ruledforward_upstream as upstream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use ruledforward_router::{
        load_config, validate_config, DnsHandler, RouterConfig, RouterError, RuledForward,
    };
    pub use ruledforward_rules::{MatcherKind, Rule};
    pub use ruledforward_upstream::{Policy, PolicyKind, Proxy};
}
