//! Domain rule model and matching engine for ruledforward.
//!
//! Rules come from three kinds of sources — compiled geosite catalogs,
//! AdGuard-syntax filter lists (local files or remote URLs) and inline
//! configuration entries — and are normalised into a single [`Rule`] type.
//! A [`Matcher`] is an immutable snapshot built from a rule list; the
//! [`BloomedMatcher`] variant adds a Bloom pre-filter over the exact and
//! suffix keys so that the common negative case is a handful of hash
//! probes.
//!
//! # Architecture
//!
//! - **Model**: [`Rule`] with lowercase/FQDN normalisation
//! - **Matchers**: [`BloomFilter`] (pre-filter), [`DomainTrie`]
//!   (right-to-left label walk), [`Matcher`] (exact set + trie +
//!   Aho-Corasick keywords + regexes), [`MatcherKind`] (variant selection)
//! - **Ingestion**: AdGuard text, geosite binary catalog, inline entries
//! - **Fetching**: HTTP with optional bootstrap-DNS resolution

pub mod adguard;
pub mod bloom;
pub mod error;
pub mod fetch;
pub mod geosite;
pub mod matcher;
pub mod rule;
pub mod trie;

pub use adguard::{load_adguard_file, parse_adguard_rules};
pub use bloom::BloomFilter;
pub use error::RulesError;
pub use fetch::{fetch_adguard_rules, is_url};
pub use geosite::GeositeCatalog;
pub use matcher::{BloomedMatcher, Matcher, MatcherKind};
pub use rule::{fqdn, Rule};
pub use trie::DomainTrie;
