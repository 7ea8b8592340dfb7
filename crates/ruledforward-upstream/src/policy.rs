//! Upstream selection policies.
//!
//! A policy orders the proxy pool for one request: the forward loop walks
//! the returned list in order. Every policy preserves the pool's length
//! and membership; `list` is safe for concurrent invocation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::proxy::Proxy;

/// Policy identifier, used in configuration files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    #[default]
    Sequential,
    RoundRobin,
    Random,
}

impl PolicyKind {
    /// Instantiate the policy.
    pub fn build(self) -> Box<dyn Policy> {
        match self {
            PolicyKind::Sequential => Box::new(Sequential),
            PolicyKind::RoundRobin => Box::new(RoundRobin::new()),
            PolicyKind::Random => Box::new(Random),
        }
    }
}

/// Trait for proxy-ordering policies.
pub trait Policy: Send + Sync {
    /// Return the pool in the order it should be tried. The result has the
    /// same length and members as the input.
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>>;

    fn name(&self) -> &'static str;
}

/// Input order, unchanged.
pub struct Sequential;

impl Policy for Sequential {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        proxies.to_vec()
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

/// Rotating start index via an atomic counter: the selected proxy comes
/// first, the rest keep their original order.
pub struct RoundRobin {
    robin: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        RoundRobin {
            robin: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new()
    }
}

impl Policy for RoundRobin {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        if proxies.is_empty() {
            return Vec::new();
        }
        // Increment-then-rotate: the first call starts at index 1.
        let i = self.robin.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % proxies.len();
        let mut out = Vec::with_capacity(proxies.len());
        out.push(proxies[i].clone());
        out.extend(proxies[..i].iter().cloned());
        out.extend(proxies[i + 1..].iter().cloned());
        out
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Uniformly random permutation, with fast paths for pools of one and two.
pub struct Random;

impl Policy for Random {
    fn list(&self, proxies: &[Arc<Proxy>]) -> Vec<Arc<Proxy>> {
        match proxies.len() {
            0 | 1 => proxies.to_vec(),
            2 => {
                if rand::random::<bool>() {
                    vec![proxies[1].clone(), proxies[0].clone()]
                } else {
                    proxies.to_vec()
                }
            }
            _ => {
                let mut out = proxies.to_vec();
                out.shuffle(&mut rand::thread_rng());
                out
            }
        }
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
