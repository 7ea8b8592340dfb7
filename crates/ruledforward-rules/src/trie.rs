//! Right-to-left label trie for domain suffix rules.

use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
struct TrieNode {
    children: FxHashMap<Box<str>, u32>,
    terminal: bool,
}

/// Label trie keyed right-to-left (TLD first). A rule `example.com.`
/// terminates at the node reached by `com` → `example`; a qname matches
/// when its right-to-left walk reaches or passes through a terminal node.
///
/// Nodes live in a flat arena to keep the walk cache-friendly.
#[derive(Debug)]
pub struct DomainTrie {
    nodes: Vec<TrieNode>,
    rules: usize,
}

impl DomainTrie {
    pub fn new() -> Self {
        DomainTrie {
            nodes: vec![TrieNode::default()],
            rules: 0,
        }
    }

    /// Number of distinct rules inserted.
    pub fn len(&self) -> usize {
        self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules == 0
    }

    /// Insert a rule name (FQDN). Duplicate inserts are no-ops.
    pub fn insert(&mut self, fqdn: &str) {
        let mut cursor = 0u32;
        for label in labels_rtl(fqdn) {
            let next = match self.nodes[cursor as usize].children.get(label) {
                Some(&idx) => idx,
                None => {
                    let idx = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::default());
                    self.nodes[cursor as usize]
                        .children
                        .insert(label.into(), idx);
                    idx
                }
            };
            cursor = next;
        }
        if cursor != 0 && !self.nodes[cursor as usize].terminal {
            self.nodes[cursor as usize].terminal = true;
            self.rules += 1;
        }
    }

    /// True if `qname` (normalised FQDN) equals a rule or is a dot-aligned
    /// subdomain of one.
    pub fn matches(&self, qname: &str) -> bool {
        if self.rules == 0 {
            return false;
        }
        let mut cursor = 0u32;
        for label in labels_rtl(qname) {
            let node = &self.nodes[cursor as usize];
            if node.terminal {
                return true;
            }
            match node.children.get(label) {
                Some(&idx) => cursor = idx,
                None => return false,
            }
        }
        self.nodes[cursor as usize].terminal
    }
}

impl Default for DomainTrie {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterate the labels of an FQDN from right to left, skipping empties:
/// `"a.b.example.com."` → `com`, `example`, `b`, `a`.
fn labels_rtl(fqdn: &str) -> impl Iterator<Item = &str> {
    fqdn.trim_end_matches('.')
        .rsplit('.')
        .filter(|l| !l.is_empty())
}
