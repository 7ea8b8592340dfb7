//! Configuration types, loading and validation.
//!
//! The router block names a source zone, an optional geosite catalog file
//! and an ordered list of groups. Each group pairs rule sources with an
//! action: `empty` synthesises NODATA replies, `forward` relays to an
//! upstream pool.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use ruledforward_rules::{is_url, Rule};
use ruledforward_upstream::{PolicyKind, Transport};

/// Hard cap on upstreams per group.
pub const MAX_PROXIES: usize = 15;

/// Reserved name of the fallback group.
pub const DEFAULT_GROUP: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

fn default_from() -> String {
    ".".to_string()
}

fn default_max_fails() -> u32 {
    2
}

fn default_expire_secs() -> u64 {
    10
}

/// Top-level router configuration. Unknown directives are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouterConfig {
    /// Source zone; queries outside it pass through untouched.
    #[serde(default = "default_from")]
    pub from: String,
    /// Geosite binary catalog path.
    #[serde(default)]
    pub dlcfile: Option<PathBuf>,
    /// Ordered rule groups; first match wins.
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

/// What a matching group does with the query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupAction {
    /// Forward to the group's upstream pool.
    #[default]
    Forward,
    /// Synthesise an empty authoritative (NODATA) reply.
    Empty,
}

/// One rule group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupConfig {
    pub name: String,
    #[serde(default)]
    pub action: GroupAction,
    /// Geosite list names (`google`, `google@ads`).
    #[serde(default)]
    pub geosite: Vec<String>,
    /// Inline rules: `domain:V`, `full:V`, `keyword:V`, `regex:V` or a
    /// bare domain.
    #[serde(default)]
    pub rules: Vec<String>,
    /// AdGuard lists: local paths or http(s) URLs.
    #[serde(default)]
    pub adguard_rules: Vec<String>,
    /// DNS server used to resolve remote list hosts.
    #[serde(default)]
    pub bootstrap_dns: Option<String>,
    /// Cron expression for remote list refresh.
    #[serde(default)]
    pub refresh: Option<String>,
    /// Upstreams (`dns://host:port`, `tls://host:port`, bare `host:port`).
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
    /// Idle lifetime of cached upstream connections, in seconds.
    #[serde(default = "default_expire_secs")]
    pub expire_secs: u64,
    #[serde(default)]
    pub tls: Option<GroupTlsConfig>,
    #[serde(default)]
    pub tls_servername: Option<String>,
    #[serde(default)]
    pub force_tcp: bool,
    #[serde(default)]
    pub prefer_udp: bool,
}

/// TLS material for `tls://` upstreams.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct GroupTlsConfig {
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub ca: Option<PathBuf>,
}

/// Load a configuration file, dispatching on the extension.
pub fn load_config(path: impl AsRef<Path>) -> Result<RouterConfig, ConfigError> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" | "jsonc" => {
            let stripped = json_comments::StripComments::new(data.as_bytes());
            Ok(serde_json::from_reader(stripped)?)
        }
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

/// Validate a configuration. All violations here are fatal at startup.
pub fn validate_config(config: &RouterConfig) -> Result<(), ConfigError> {
    if config.from.parse::<hickory_proto::rr::Name>().is_err() {
        return Err(ConfigError::Validation(format!(
            "unable to normalize zone '{}'",
            config.from
        )));
    }

    let mut default_count = 0usize;
    for group in &config.groups {
        if group.name.trim().is_empty() {
            return Err(ConfigError::Validation("group name is empty".into()));
        }
        if group.name == DEFAULT_GROUP {
            default_count += 1;
        }
        match group.action {
            GroupAction::Empty if !group.to.is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "group {}: action empty cannot have 'to'",
                    group.name
                )));
            }
            GroupAction::Forward if group.to.is_empty() => {
                return Err(ConfigError::Validation(format!(
                    "group {}: action forward requires 'to'",
                    group.name
                )));
            }
            _ => {}
        }
        if group.to.len() > MAX_PROXIES {
            return Err(ConfigError::Validation(format!(
                "group {}: more than {} upstreams: {}",
                group.name,
                MAX_PROXIES,
                group.to.len()
            )));
        }
        for addr in &group.to {
            parse_upstream_addr(addr).map_err(|e| {
                ConfigError::Validation(format!("group {}: {e}", group.name))
            })?;
        }
        for rule in &group.rules {
            parse_inline_rule(rule).map_err(|e| {
                ConfigError::Validation(format!("group {}: {e}", group.name))
            })?;
        }
        if let Some(expr) = &group.refresh {
            parse_cron(expr).map_err(|e| {
                ConfigError::Validation(format!("group {}: {e}", group.name))
            })?;
        }
    }
    if default_count > 1 {
        return Err(ConfigError::Validation(format!(
            "at most one '{DEFAULT_GROUP}' group is allowed, found {default_count}"
        )));
    }
    Ok(())
}

/// Parse one inline rule entry.
pub fn parse_inline_rule(entry: &str) -> Result<Rule, ConfigError> {
    let entry = entry.trim();
    let lower = entry.to_ascii_lowercase();
    if lower.starts_with("include:") {
        return Err(ConfigError::Validation(
            "include: is not supported in group rules".into(),
        ));
    }
    let builders: [(&str, fn(&str) -> Rule); 3] = [
        ("domain:", |v| Rule::domain(v)),
        ("full:", |v| Rule::full(v)),
        ("keyword:", |v| Rule::keyword(v)),
    ];
    for (prefix, build) in builders {
        if lower.starts_with(prefix) {
            let value = entry[prefix.len()..].trim();
            if value.is_empty() {
                return Err(ConfigError::Validation(format!("empty rule: '{entry}'")));
            }
            return Ok(build(value));
        }
    }
    if lower.starts_with("regex:") {
        let value = entry["regex:".len()..].trim();
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("empty rule: '{entry}'")));
        }
        return Ok(Rule::regex(value));
    }
    // A bare domain literal is a suffix rule.
    if !entry.is_empty()
        && !entry.contains(char::is_whitespace)
        && !is_url(entry)
        && entry.parse::<hickory_proto::rr::Name>().is_ok()
    {
        return Ok(Rule::domain(entry));
    }
    Err(ConfigError::Validation(format!(
        "unrecognised rule '{entry}'"
    )))
}

/// Parse an upstream address into its transport and `host:port` form.
/// Plain DNS defaults to port 53, TLS to 853.
pub fn parse_upstream_addr(addr: &str) -> Result<(Transport, String), ConfigError> {
    let addr = addr.trim();
    if let Some(rest) = addr.strip_prefix("dns://") {
        return Ok((Transport::Dns, with_default_port(rest, 53)?));
    }
    if let Some(rest) = addr.strip_prefix("tls://") {
        return Ok((Transport::Tls, with_default_port(rest, 853)?));
    }
    if let Some((scheme, _)) = addr.split_once("://") {
        return Err(ConfigError::Validation(format!(
            "unsupported protocol '{scheme}' in upstream '{addr}'"
        )));
    }
    Ok((Transport::Dns, with_default_port(addr, 53)?))
}

fn with_default_port(host: &str, default: u16) -> Result<String, ConfigError> {
    if host.is_empty() {
        return Err(ConfigError::Validation("empty upstream host".into()));
    }
    // Bracketed IPv6: [::1] or [::1]:853.
    if host.starts_with('[') {
        if host.contains("]:") {
            return Ok(host.to_string());
        }
        return Ok(format!("{host}:{default}"));
    }
    if let Some((head, tail)) = host.rsplit_once(':') {
        // A second colon means a raw IPv6 literal without brackets.
        if head.contains(':') {
            return Ok(format!("[{host}]:{default}"));
        }
        if tail.parse::<u16>().is_ok() {
            return Ok(host.to_string());
        }
        return Err(ConfigError::Validation(format!(
            "invalid port in upstream '{host}'"
        )));
    }
    Ok(format!("{host}:{default}"))
}

/// Parse a cron expression. Standard 5-field expressions get a seconds
/// field of `0` prepended.
pub fn parse_cron(expr: &str) -> Result<cron::Schedule, ConfigError> {
    let expr = expr.trim();
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| ConfigError::Validation(format!("invalid refresh cron '{expr}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forward_group(name: &str) -> GroupConfig {
        GroupConfig {
            name: name.into(),
            action: GroupAction::Forward,
            geosite: vec![],
            rules: vec![],
            adguard_rules: vec![],
            bootstrap_dns: None,
            refresh: None,
            to: vec!["dns://127.0.0.1:5353".into()],
            policy: PolicyKind::default(),
            max_fails: default_max_fails(),
            expire_secs: default_expire_secs(),
            tls: None,
            tls_servername: None,
            force_tcp: false,
            prefer_udp: false,
        }
    }

    fn config_with(groups: Vec<GroupConfig>) -> RouterConfig {
        RouterConfig {
            from: default_from(),
            dlcfile: None,
            groups,
        }
    }

    #[test]
    fn valid_config_passes() {
        validate_config(&config_with(vec![forward_group("up")])).unwrap();
    }

    #[test]
    fn empty_action_forbids_to() {
        let mut g = forward_group("block");
        g.action = GroupAction::Empty;
        let err = validate_config(&config_with(vec![g])).unwrap_err();
        assert!(err.to_string().contains("cannot have 'to'"));
    }

    #[test]
    fn forward_action_requires_to() {
        let mut g = forward_group("up");
        g.to.clear();
        let err = validate_config(&config_with(vec![g])).unwrap_err();
        assert!(err.to_string().contains("requires 'to'"));
    }

    #[test]
    fn too_many_upstreams_rejected() {
        let mut g = forward_group("up");
        g.to = (0..16).map(|i| format!("dns://127.0.0.1:{}", 5000 + i)).collect();
        let err = validate_config(&config_with(vec![g])).unwrap_err();
        assert!(err.to_string().contains("more than 15 upstreams"));
    }

    #[test]
    fn duplicate_default_rejected() {
        let mut a = forward_group(DEFAULT_GROUP);
        a.action = GroupAction::Empty;
        a.to.clear();
        let b = a.clone();
        let err = validate_config(&config_with(vec![a, b])).unwrap_err();
        assert!(err.to_string().contains("at most one"));
    }

    #[test]
    fn include_rule_rejected() {
        let mut g = forward_group("up");
        g.rules = vec!["include:extra.list".into()];
        let err = validate_config(&config_with(vec![g])).unwrap_err();
        assert!(err.to_string().contains("include:"));
    }

    #[test]
    fn bad_cron_rejected() {
        let mut g = forward_group("up");
        g.refresh = Some("not a cron".into());
        assert!(validate_config(&config_with(vec![g])).is_err());
    }

    #[test]
    fn inline_rule_forms() {
        assert_eq!(
            parse_inline_rule("domain:Example.COM").unwrap(),
            Rule::Domain("example.com.".into())
        );
        assert_eq!(
            parse_inline_rule("full:a.b").unwrap(),
            Rule::Full("a.b.".into())
        );
        assert_eq!(
            parse_inline_rule("keyword:ADS").unwrap(),
            Rule::Keyword("ads".into())
        );
        assert_eq!(
            parse_inline_rule(r"regex:^.*\.ads\.").unwrap(),
            Rule::Regex(r"^.*\.ads\.".into())
        );
        assert_eq!(
            parse_inline_rule("bare.example.org").unwrap(),
            Rule::Domain("bare.example.org.".into())
        );
        assert!(parse_inline_rule("domain:").is_err());
        assert!(parse_inline_rule("no spaces allowed").is_err());
    }

    #[test]
    fn upstream_addr_forms() {
        assert_eq!(
            parse_upstream_addr("dns://9.9.9.9").unwrap(),
            (Transport::Dns, "9.9.9.9:53".into())
        );
        assert_eq!(
            parse_upstream_addr("tls://dns.example.net").unwrap(),
            (Transport::Tls, "dns.example.net:853".into())
        );
        assert_eq!(
            parse_upstream_addr("8.8.8.8:5353").unwrap(),
            (Transport::Dns, "8.8.8.8:5353".into())
        );
        assert_eq!(
            parse_upstream_addr("::1").unwrap(),
            (Transport::Dns, "[::1]:53".into())
        );
        assert!(parse_upstream_addr("https://dns.example.net").is_err());
        assert!(parse_upstream_addr("dns://host:notaport").is_err());
    }

    #[test]
    fn cron_five_field_accepted() {
        parse_cron("*/5 * * * *").unwrap();
        parse_cron("0 3 * * 1").unwrap();
        assert!(parse_cron("every tuesday").is_err());
    }

    #[test]
    fn load_toml_config() {
        let dir = std::env::temp_dir().join("ruledforward-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("router.toml");
        std::fs::write(
            &path,
            r#"
from = "."

[[groups]]
name = "block"
action = "empty"
rules = ["domain:ads.example.com"]

[[groups]]
name = "default"
action = "forward"
to = ["dns://9.9.9.9"]
policy = "round_robin"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.groups.len(), 2);
        assert_eq!(config.groups[0].action, GroupAction::Empty);
        assert_eq!(config.groups[1].policy, PolicyKind::RoundRobin);
    }

    #[test]
    fn unknown_policy_rejected_at_parse() {
        let err = toml::from_str::<RouterConfig>(
            r#"
[[groups]]
name = "up"
to = ["dns://9.9.9.9"]
policy = "fastest"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("fastest") || err.to_string().contains("unknown variant"));
    }

    #[test]
    fn unknown_directive_rejected_at_parse() {
        let err = toml::from_str::<RouterConfig>(
            r#"
[[groups]]
name = "up"
to = ["dns://9.9.9.9"]
retries = 3
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("retries") || err.to_string().contains("unknown field"));
    }

    #[test]
    fn unsupported_extension() {
        let dir = std::env::temp_dir().join("ruledforward-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("router.ini");
        std::fs::write(&path, "nope").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnsupportedFormat)
        ));
    }
}
