//! Geosite binary catalog (GeoSiteList protobuf) decoding.
//!
//! The catalog is a single protobuf file mapping list names to typed
//! domain entries. The message types below are written as prost derives
//! directly so no build-time codegen is needed; they cover exactly the
//! fields this crate reads.
//!
//! List names are uppercased. A domain carrying attributes is additionally
//! indexed under `NAME@ATTR` for every attribute key, so a configuration
//! entry like `google@ads` selects the attribute-filtered subset.

use std::path::Path;

use prost::Message;
use rustc_hash::FxHashMap;

use crate::error::RulesError;
use crate::rule::Rule;

mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Domain {
        #[prost(enumeration = "domain::Type", tag = "1")]
        pub r#type: i32,
        #[prost(string, tag = "2")]
        pub value: String,
        #[prost(message, repeated, tag = "3")]
        pub attribute: Vec<domain::Attribute>,
    }

    pub mod domain {
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Attribute {
            #[prost(string, tag = "1")]
            pub key: String,
            #[prost(oneof = "attribute::TypedValue", tags = "2, 3")]
            pub typed_value: Option<attribute::TypedValue>,
        }

        pub mod attribute {
            #[derive(Clone, PartialEq, ::prost::Oneof)]
            pub enum TypedValue {
                #[prost(bool, tag = "2")]
                BoolValue(bool),
                #[prost(int64, tag = "3")]
                IntValue(i64),
            }
        }

        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
        )]
        #[repr(i32)]
        pub enum Type {
            Plain = 0,
            Regex = 1,
            RootDomain = 2,
            Full = 3,
        }
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GeoSite {
        #[prost(string, tag = "1")]
        pub country_code: String,
        #[prost(message, repeated, tag = "2")]
        pub domain: Vec<Domain>,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct GeoSiteList {
        #[prost(message, repeated, tag = "1")]
        pub entry: Vec<GeoSite>,
    }
}

/// Parsed geosite catalog: uppercase list name (plus `NAME@ATTR` keys) to
/// ordered rules. Loaded once at startup and read-only thereafter.
#[derive(Debug, Default)]
pub struct GeositeCatalog {
    lists: FxHashMap<String, Vec<Rule>>,
}

impl GeositeCatalog {
    /// Read and decode a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RulesError> {
        let data = std::fs::read(path)?;
        Self::from_bytes(&data)
    }

    /// Decode catalog bytes. Empty input and a decode that yields zero
    /// entries are both invalid.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RulesError> {
        if data.is_empty() {
            return Err(RulesError::InvalidCatalog);
        }
        let list = pb::GeoSiteList::decode(data)?;
        let mut lists: FxHashMap<String, Vec<Rule>> = FxHashMap::default();
        for entry in &list.entry {
            let name = entry.country_code.trim().to_ascii_uppercase();
            if name.is_empty() {
                continue;
            }
            for domain in &entry.domain {
                let Some(rule) = domain_to_rule(domain) else {
                    continue;
                };
                lists.entry(name.clone()).or_default().push(rule.clone());
                for attr in &domain.attribute {
                    if !attr.key.is_empty() {
                        let key = format!("{name}@{}", attr.key.to_ascii_uppercase());
                        lists.entry(key).or_default().push(rule.clone());
                    }
                }
            }
        }
        if lists.is_empty() {
            return Err(RulesError::InvalidCatalog);
        }
        Ok(GeositeCatalog { lists })
    }

    /// Rules for a list name (`GOOGLE` or `GOOGLE@ADS`), case-insensitive.
    /// Unknown names yield an empty slice.
    pub fn rules(&self, name: &str) -> &[Rule] {
        self.lists
            .get(&name.to_ascii_uppercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Number of list keys (attribute keys included).
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

fn domain_to_rule(domain: &pb::Domain) -> Option<Rule> {
    let value = domain.value.trim().to_ascii_lowercase();
    if value.is_empty() {
        return None;
    }
    match pb::domain::Type::try_from(domain.r#type).ok()? {
        pb::domain::Type::RootDomain => Some(Rule::domain(value)),
        pb::domain::Type::Full => Some(Rule::full(value)),
        pb::domain::Type::Regex => Some(Rule::regex(value)),
        pb::domain::Type::Plain => Some(Rule::keyword(value)),
    }
}
