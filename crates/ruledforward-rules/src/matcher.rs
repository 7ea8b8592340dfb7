//! Compound domain matcher.
//!
//! A [`Matcher`] accumulates rules via [`Matcher::add_rule`], is finalised
//! once with [`Matcher::build`], and is immutable afterwards — safe to share
//! for reads across any number of concurrent queriers. The holder is
//! responsible for atomic replacement on refresh; the matcher itself has no
//! interior locking.
//!
//! [`Matcher::matches`] evaluates in a fixed order and returns on the first
//! hit: exact set, domain trie, keyword automaton, regex list. The
//! [`BloomedMatcher`] wrapper short-circuits the whole evaluation on a
//! negative Bloom probe, which is sound for exact/suffix rules only —
//! keyword and regex rules contribute no Bloom keys, so rule sets
//! containing them must use the plain variant (see [`MatcherKind::build`]).

use aho_corasick::AhoCorasick;
use regex::Regex;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::bloom::BloomFilter;
use crate::rule::{fqdn, Rule};
use crate::trie::DomainTrie;

/// Default Bloom false-positive rate.
pub const BLOOM_FP: f64 = 0.01;

/// Compound matcher over exact names, domain suffixes, keywords and
/// regexes.
#[derive(Debug, Default)]
pub struct Matcher {
    full: FxHashSet<String>,
    domain: Vec<String>,
    trie: DomainTrie,
    keyword: Vec<String>,
    keyword_ac: Option<AhoCorasick>,
    regex: Vec<Regex>,
}

impl Matcher {
    pub fn new() -> Self {
        Matcher::default()
    }

    /// Add one rule. Call before [`Matcher::build`]; a regex that fails to
    /// compile is dropped without surfacing an error.
    pub fn add_rule(&mut self, rule: &Rule) {
        match rule {
            Rule::Full(v) => {
                self.full.insert(fqdn(v));
            }
            Rule::Domain(v) => self.domain.push(fqdn(v)),
            Rule::Keyword(v) => self.keyword.push(v.to_ascii_lowercase()),
            Rule::Regex(v) => match Regex::new(v) {
                Ok(re) => self.regex.push(re),
                Err(err) => debug!(pattern = %v, error = %err, "dropping invalid regex rule"),
            },
        }
    }

    /// Finalise the matcher: populate the domain trie (deduplicated), sort
    /// the domain list longest-first for Bloom-key enumeration, and compile
    /// the keyword automaton. Idempotent for a fixed rule set.
    pub fn build(&mut self) {
        self.trie = DomainTrie::new();
        let mut seen = FxHashSet::default();
        for d in &self.domain {
            if seen.insert(d.as_str()) {
                self.trie.insert(d);
            }
        }
        self.domain.sort_by(|a, b| b.len().cmp(&a.len()));
        self.keyword_ac = if self.keyword.is_empty() {
            None
        } else {
            AhoCorasick::new(&self.keyword).ok()
        };
    }

    /// True if any rule matches `qname`. Order: full, domain trie,
    /// keyword, regex.
    pub fn matches(&self, qname: &str) -> bool {
        let q = fqdn(qname);
        if self.full.contains(q.as_str()) {
            return true;
        }
        if self.trie.matches(&q) {
            return true;
        }
        if let Some(ac) = &self.keyword_ac {
            if ac.is_match(&q) {
                return true;
            }
        }
        self.regex.iter().any(|re| re.is_match(&q))
    }

    /// True if the rule set contains keyword or regex rules, which the
    /// Bloom pre-filter cannot represent.
    pub fn has_unbloomable_rules(&self) -> bool {
        !self.keyword.is_empty() || !self.regex.is_empty()
    }

    /// Exact and suffix keys for Bloom population.
    pub fn bloom_keys(&self) -> impl Iterator<Item = &str> {
        self.full
            .iter()
            .map(String::as_str)
            .chain(self.domain.iter().map(String::as_str))
    }

    /// Total rule count after deduplication losses are ignored.
    pub fn len(&self) -> usize {
        self.full.len() + self.domain.len() + self.keyword.len() + self.regex.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A [`Matcher`] behind a Bloom pre-filter populated from its Full and
/// Domain keys.
#[derive(Debug)]
pub struct BloomedMatcher {
    inner: Matcher,
    bloom: BloomFilter,
}

impl BloomedMatcher {
    /// Wrap a built matcher, sizing the Bloom filter from its key count.
    pub fn new(inner: Matcher, fp: f64) -> Self {
        let n = inner.full.len() + inner.domain.len();
        let mut bloom = BloomFilter::with_estimates(n.max(64), fp);
        for key in inner.bloom_keys() {
            bloom.add(key);
        }
        BloomedMatcher { inner, bloom }
    }

    /// Bloom-gated match: a negative probe on the qname and all of its
    /// parent suffixes short-circuits the full evaluation.
    pub fn matches(&self, qname: &str) -> bool {
        self.bloom.maybe_match(qname) && self.inner.matches(qname)
    }
}

/// The matcher variant a group publishes: plain when the rule set contains
/// keyword or regex rules (the Bloom gate would silently drop their
/// matches), Bloomed otherwise.
#[derive(Debug)]
pub enum MatcherKind {
    Plain(Matcher),
    Bloomed(BloomedMatcher),
}

impl MatcherKind {
    /// Build the appropriate variant from a collected rule list.
    pub fn build(rules: &[Rule]) -> Self {
        let mut m = Matcher::new();
        for rule in rules {
            m.add_rule(rule);
        }
        m.build();
        if m.has_unbloomable_rules() {
            debug!(rules = m.len(), "built plain matcher (keyword/regex rules present)");
            MatcherKind::Plain(m)
        } else {
            debug!(rules = m.len(), "built bloomed matcher");
            MatcherKind::Bloomed(BloomedMatcher::new(m, BLOOM_FP))
        }
    }

    pub fn matches(&self, qname: &str) -> bool {
        match self {
            MatcherKind::Plain(m) => m.matches(qname),
            MatcherKind::Bloomed(m) => m.matches(qname),
        }
    }
}
