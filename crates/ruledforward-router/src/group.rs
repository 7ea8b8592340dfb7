//! Rule groups: rule sources, an action, an upstream pool and the current
//! matcher behind an atomically-swappable reference.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::info;

use ruledforward_rules::{
    fetch_adguard_rules, is_url, load_adguard_file, GeositeCatalog, MatcherKind, Rule, RulesError,
};
use ruledforward_upstream::{ConnectOpts, Policy, Proxy, TlsOptions};

use crate::config::{parse_cron, parse_inline_rule, parse_upstream_addr, GroupAction, GroupConfig};
use crate::error::RouterError;

/// Timeout for fetching one remote rule list.
const ADGUARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Bit-mask of rule sources included in a matcher rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateMask(u8);

impl UpdateMask {
    pub const GEOSITE: UpdateMask = UpdateMask(1);
    pub const INLINE: UpdateMask = UpdateMask(1 << 1);
    pub const ADGUARD_LOCAL: UpdateMask = UpdateMask(1 << 2);
    pub const ADGUARD_REMOTE: UpdateMask = UpdateMask(1 << 3);

    /// Every source that does not require the network.
    pub const LOCAL: UpdateMask =
        UpdateMask(Self::GEOSITE.0 | Self::INLINE.0 | Self::ADGUARD_LOCAL.0);
    /// Every source.
    pub const ALL: UpdateMask = UpdateMask(Self::LOCAL.0 | Self::ADGUARD_REMOTE.0);

    pub fn contains(self, other: UpdateMask) -> bool {
        self.0 & other.0 == other.0
    }
}

/// One rule group. The matcher is read with a single atomic load and
/// replaced wholesale by `update`; readers see either the old or the new
/// matcher, never a torn state. Before the first update the matcher is
/// absent and the group matches nothing.
pub struct Group {
    pub name: String,
    pub action: GroupAction,
    matcher: ArcSwapOption<MatcherKind>,

    // Rule sources for rebuilds.
    pub geosite_lists: Vec<String>,
    pub inline_rules: Vec<Rule>,
    pub adguard_paths: Vec<PathBuf>,
    pub adguard_urls: Vec<String>,
    pub bootstrap_dns: Option<String>,
    pub refresh: Option<cron::Schedule>,

    // Forward-only.
    pub proxies: Vec<Arc<Proxy>>,
    pub policy: Box<dyn Policy>,
    pub max_fails: u32,
    pub opts: ConnectOpts,
}

impl Group {
    /// Build a group from validated configuration.
    pub fn from_config(config: &GroupConfig) -> Result<Self, RouterError> {
        let inline_rules = config
            .rules
            .iter()
            .map(|r| parse_inline_rule(r))
            .collect::<Result<Vec<_>, _>>()?;

        let (adguard_paths, adguard_urls): (Vec<_>, Vec<_>) = config
            .adguard_rules
            .iter()
            .cloned()
            .partition(|entry| !is_url(entry));

        let refresh = config
            .refresh
            .as_deref()
            .map(parse_cron)
            .transpose()?;

        let expire = Duration::from_secs(config.expire_secs);
        let mut proxies = Vec::new();
        if config.action == GroupAction::Forward {
            let tls_options = TlsOptions {
                ca: config.tls.as_ref().and_then(|t| t.ca.clone()),
                cert: config.tls.as_ref().and_then(|t| t.cert.clone()),
                key: config.tls.as_ref().and_then(|t| t.key.clone()),
                server_name: config.tls_servername.clone(),
            };
            for entry in &config.to {
                let (transport, addr) = parse_upstream_addr(entry)?;
                let proxy = Proxy::new(addr, transport, Some(&tls_options), expire)?;
                proxies.push(Arc::new(proxy));
            }
        }

        Ok(Group {
            name: config.name.clone(),
            action: config.action,
            matcher: ArcSwapOption::empty(),
            geosite_lists: config.geosite.clone(),
            inline_rules,
            adguard_paths: adguard_paths.into_iter().map(PathBuf::from).collect(),
            adguard_urls,
            bootstrap_dns: config.bootstrap_dns.clone(),
            refresh,
            proxies,
            policy: config.policy.build(),
            max_fails: config.max_fails,
            opts: ConnectOpts {
                force_tcp: config.force_tcp,
                prefer_udp: config.prefer_udp,
            },
        })
    }

    /// Current matcher, or `None` before the first successful update.
    pub fn matcher(&self) -> Option<Arc<MatcherKind>> {
        self.matcher.load_full()
    }

    /// Atomically publish a new matcher.
    pub fn set_matcher(&self, matcher: Arc<MatcherKind>) {
        self.matcher.store(Some(matcher));
    }

    /// Rebuild the matcher from the sources selected by `mask` and publish
    /// it. On failure of any selected source the current matcher is left
    /// unchanged.
    pub async fn update(
        &self,
        catalog: Option<&GeositeCatalog>,
        mask: UpdateMask,
    ) -> Result<(), RouterError> {
        let mut rules: Vec<Rule> = Vec::new();

        if mask.contains(UpdateMask::GEOSITE) {
            if let Some(catalog) = catalog {
                for list in &self.geosite_lists {
                    rules.extend_from_slice(catalog.rules(list));
                }
            }
        }

        if mask.contains(UpdateMask::INLINE) {
            rules.extend(self.inline_rules.iter().cloned());
        }

        if mask.contains(UpdateMask::ADGUARD_LOCAL) {
            for path in &self.adguard_paths {
                info!(group = %self.name, path = %path.display(), "loading adguard rules");
                let loaded = load_adguard_file(path).map_err(|err| RouterError::GroupUpdate {
                    group: self.name.clone(),
                    source: RulesError::Io(err),
                })?;
                rules.extend(loaded);
            }
        }

        if mask.contains(UpdateMask::ADGUARD_REMOTE) {
            for url in &self.adguard_urls {
                info!(group = %self.name, url = %url, "loading adguard rules");
                let fetched =
                    fetch_adguard_rules(url, ADGUARD_TIMEOUT, self.bootstrap_dns.as_deref())
                        .await
                        .map_err(|source| RouterError::GroupUpdate {
                            group: self.name.clone(),
                            source,
                        })?;
                rules.extend(fetched);
            }
        }

        self.set_matcher(Arc::new(MatcherKind::build(&rules)));
        Ok(())
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("proxies", &self.proxies.len())
            .field("policy", &self.policy.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupConfig;
    use ruledforward_upstream::PolicyKind;

    fn empty_group_config(name: &str, rules: Vec<String>) -> GroupConfig {
        GroupConfig {
            name: name.into(),
            action: GroupAction::Empty,
            geosite: vec![],
            rules,
            adguard_rules: vec![],
            bootstrap_dns: None,
            refresh: None,
            to: vec![],
            policy: PolicyKind::default(),
            max_fails: 2,
            expire_secs: 10,
            tls: None,
            tls_servername: None,
            force_tcp: false,
            prefer_udp: false,
        }
    }

    #[test]
    fn matcher_absent_before_first_update() {
        let group = Group::from_config(&empty_group_config("block", vec![])).unwrap();
        assert!(group.matcher().is_none());
    }

    #[tokio::test]
    async fn update_builds_matcher_from_inline_rules() {
        let group = Group::from_config(&empty_group_config(
            "block",
            vec!["domain:ads.example.com".into()],
        ))
        .unwrap();
        group.update(None, UpdateMask::ALL).await.unwrap();
        let matcher = group.matcher().unwrap();
        assert!(matcher.matches("tracker.ads.example.com."));
        assert!(!matcher.matches("clean.example.com."));
    }

    #[tokio::test]
    async fn atomic_swap_replaces_matcher_wholesale() {
        let group = Group::from_config(&empty_group_config("swap", vec![])).unwrap();

        group.set_matcher(Arc::new(MatcherKind::build(&[Rule::domain("old.com.")])));
        assert!(group.matcher().unwrap().matches("a.old.com."));

        group.set_matcher(Arc::new(MatcherKind::build(&[Rule::domain("new.com.")])));
        let matcher = group.matcher().unwrap();
        assert!(!matcher.matches("a.old.com."));
        assert!(matcher.matches("a.new.com."));
    }

    #[tokio::test]
    async fn old_matcher_survives_swap_for_held_references() {
        let group = Group::from_config(&empty_group_config("swap", vec![])).unwrap();
        group.set_matcher(Arc::new(MatcherKind::build(&[Rule::domain("old.com.")])));
        let held = group.matcher().unwrap();
        group.set_matcher(Arc::new(MatcherKind::build(&[Rule::domain("new.com.")])));
        // The in-flight reader keeps the snapshot it loaded.
        assert!(held.matches("a.old.com."));
    }

    #[tokio::test]
    async fn failed_update_retains_old_matcher() {
        let mut config = empty_group_config("keep", vec!["domain:keep.example.com".into()]);
        config.adguard_rules = vec!["/nonexistent/rules.txt".into()];
        let group = Group::from_config(&config).unwrap();

        // Inline-only rebuild succeeds.
        group.update(None, UpdateMask::INLINE).await.unwrap();
        let before = group.matcher().unwrap();

        // Full rebuild fails on the missing local file; matcher unchanged.
        let err = group.update(None, UpdateMask::ALL).await.unwrap_err();
        assert!(matches!(err, RouterError::GroupUpdate { .. }));
        let after = group.matcher().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn geosite_sources_respect_mask() {
        let catalog = {
            use prost::Message as _;
            // Minimal one-entry catalog built through the public decoder.
            // RootDomain "blocked.example" under list name "test".
            #[derive(::prost::Message)]
            struct D {
                #[prost(int32, tag = "1")]
                t: i32,
                #[prost(string, tag = "2")]
                v: String,
            }
            #[derive(::prost::Message)]
            struct S {
                #[prost(string, tag = "1")]
                c: String,
                #[prost(message, repeated, tag = "2")]
                d: Vec<D>,
            }
            #[derive(::prost::Message)]
            struct L {
                #[prost(message, repeated, tag = "1")]
                e: Vec<S>,
            }
            let bytes = L {
                e: vec![S {
                    c: "test".into(),
                    d: vec![D {
                        t: 2, // RootDomain
                        v: "blocked.example".into(),
                    }],
                }],
            }
            .encode_to_vec();
            GeositeCatalog::from_bytes(&bytes).unwrap()
        };

        let mut config = empty_group_config("geo", vec![]);
        config.geosite = vec!["test".into()];
        let group = Group::from_config(&config).unwrap();

        group.update(Some(&catalog), UpdateMask::ALL).await.unwrap();
        assert!(group.matcher().unwrap().matches("a.blocked.example."));

        // A remote-only rebuild excludes the geosite source.
        group
            .update(Some(&catalog), UpdateMask::ADGUARD_REMOTE)
            .await
            .unwrap();
        assert!(!group.matcher().unwrap().matches("a.blocked.example."));
    }

    #[tokio::test]
    async fn remote_update_replaces_matcher() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
                let body = "||remote.example.com^\n";
                let resp = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                stream.write_all(resp.as_bytes()).await.ok();
            }
        });

        let mut config = empty_group_config("remote", vec![]);
        config.adguard_rules = vec![format!("http://{addr}/list.txt")];
        let group = Group::from_config(&config).unwrap();

        group.update(None, UpdateMask::ADGUARD_REMOTE).await.unwrap();
        let matcher = group.matcher().unwrap();
        assert!(matcher.matches("a.remote.example.com."));
        assert!(!matcher.matches("other.example.org."));
    }

    #[test]
    fn mask_composition() {
        assert!(UpdateMask::ALL.contains(UpdateMask::GEOSITE));
        assert!(UpdateMask::ALL.contains(UpdateMask::ADGUARD_REMOTE));
        assert!(UpdateMask::LOCAL.contains(UpdateMask::INLINE));
        assert!(!UpdateMask::LOCAL.contains(UpdateMask::ADGUARD_REMOTE));
        assert!(!UpdateMask::GEOSITE.contains(UpdateMask::INLINE));
    }
}
