//! AdGuard-syntax filter list parsing.
//!
//! Supported line forms, in match order:
//! `# …`/`! …` comments and blank lines are skipped, `@@…` exception lines
//! are skipped (not implemented), `||host^` yields a suffix rule, `/re/`
//! yields a regex rule, a hosts-file line (`IP host`) yields an exact rule
//! for the host, and a single bare token yields an exact rule.

use std::net::IpAddr;
use std::path::Path;

use crate::rule::Rule;

/// Parse AdGuard-style filter content into rules, preserving line order.
pub fn parse_adguard_rules(body: &str) -> Vec<Rule> {
    let mut rules = Vec::new();
    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        // Exception lines are not implemented.
        if line.starts_with("@@") {
            continue;
        }
        // ||domain^ -> domain suffix
        if let Some(rest) = line.strip_prefix("||") {
            let host = rest.trim_end_matches('^').trim();
            if !host.is_empty() {
                rules.push(Rule::domain(host));
            }
            continue;
        }
        // /regex/
        if line.len() >= 2 && line.starts_with('/') && line.ends_with('/') {
            rules.push(Rule::regex(&line[1..line.len() - 1]));
            continue;
        }
        let mut fields = line.split_ascii_whitespace();
        let first = fields.next().unwrap_or("");
        match fields.next() {
            // hosts form: IP-shaped first token, host second
            Some(host) if first.parse::<IpAddr>().is_ok() => {
                rules.push(Rule::full(host));
            }
            Some(_) => {}
            // single bare token -> exact name
            None if !first.is_empty() && first != "." => {
                rules.push(Rule::full(first));
            }
            None => {}
        }
    }
    rules
}

/// Read a local file and parse it as AdGuard rules.
pub fn load_adguard_file(path: impl AsRef<Path>) -> Result<Vec<Rule>, std::io::Error> {
    let body = std::fs::read_to_string(path)?;
    Ok(parse_adguard_rules(&body))
}
