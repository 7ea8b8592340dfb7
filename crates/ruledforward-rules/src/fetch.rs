//! Remote rule-list fetching.
//!
//! Lists are fetched over HTTP(S) with a per-request timeout; any non-2xx
//! status fails the whole refresh. When a bootstrap DNS address is
//! configured, the URL host is resolved through that server instead of the
//! host resolver — this breaks the circular dependency when this router is
//! itself the system resolver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::xfer::Protocol;
use hickory_resolver::config::{NameServerConfig, NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::Resolver;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::debug;

use crate::adguard::parse_adguard_rules;
use crate::error::RulesError;
use crate::rule::Rule;

/// True if `s` looks like an http(s) URL.
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Fetch a remote AdGuard list and parse it into rules.
pub async fn fetch_adguard_rules(
    url: &str,
    timeout: Duration,
    bootstrap_dns: Option<&str>,
) -> Result<Vec<Rule>, RulesError> {
    debug!(url = %url, "fetching remote rule list");

    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(bootstrap) = bootstrap_dns {
        builder = builder.dns_resolver(Arc::new(BootstrapResolver::new(bootstrap)?));
    }
    let client = builder
        .build()
        .map_err(|e| RulesError::Http(format!("failed to build HTTP client: {e}")))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| RulesError::Http(format!("request failed for {url}: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RulesError::Http(format!("{url}: status {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| RulesError::Http(format!("failed to read body from {url}: {e}")))?;

    debug!(url = %url, bytes = body.len(), "fetched remote rule list");
    Ok(parse_adguard_rules(&body))
}

/// A reqwest DNS resolver that sends every lookup to one fixed UDP
/// nameserver.
struct BootstrapResolver {
    resolver: Arc<Resolver<TokioConnectionProvider>>,
}

impl BootstrapResolver {
    fn new(bootstrap: &str) -> Result<Self, RulesError> {
        // A bare host gets the default DNS port.
        let addr = if bootstrap.contains(':') {
            bootstrap.to_string()
        } else {
            format!("{bootstrap}:53")
        };
        let socket_addr: SocketAddr = addr
            .parse()
            .map_err(|_| RulesError::InvalidBootstrap(bootstrap.to_string()))?;

        let ns = NameServerConfig {
            socket_addr,
            protocol: Protocol::Udp,
            tls_dns_name: None,
            http_endpoint: None,
            trust_negative_responses: false,
            bind_addr: None,
        };
        let config =
            ResolverConfig::from_parts(None, vec![], NameServerConfigGroup::from(vec![ns]));
        let builder = Resolver::builder_with_config(config, TokioConnectionProvider::default());
        Ok(BootstrapResolver {
            resolver: Arc::new(builder.build()),
        })
    }
}

impl Resolve for BootstrapResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            let lookup = resolver.lookup_ip(name.as_str()).await?;
            // reqwest replaces the port with the URL's own.
            let addrs: Addrs = Box::new(lookup.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok(addrs)
        })
    }
}
