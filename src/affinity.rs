// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Per-method affinity configuration and the key to channel binding table.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::channel_ref::ChannelRef;

/// The three affinity commands a method can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffinityCommand {
    /// Extract a key from the **response**; bind it to the selected channel
    /// on the first response of the call.
    Bind,
    /// Extract a key from the **request**; remove its binding, if any, on
    /// call start.
    Unbind,
    /// Extract a key from the **request**; use it for routing only, never
    /// mutating the index.
    Bound,
}

/// A read-only per-method affinity descriptor.
///
/// An empty `key_path` disables extraction for the method entirely: the key
/// path applied to a payload is conceptually the identity function over
/// "no field", so extraction always returns `None` without invoking the
/// configured [`PayloadExtractor`](crate::transport::PayloadExtractor).
#[derive(Debug, Clone)]
pub struct AffinityConfig {
    pub key_path: String,
    pub command: AffinityCommand,
}

impl AffinityConfig {
    pub fn new(key_path: impl Into<String>, command: AffinityCommand) -> Self {
        AffinityConfig { key_path: key_path.into(), command }
    }

    /// Whether this config's key should be read from the request (`Unbind`,
    /// `Bound`) or the response (`Bind`).
    pub fn reads_request(&self) -> bool {
        !matches!(self.command, AffinityCommand::Bind)
    }

    /// Whether `key_path` is set at all. An empty path disables extraction
    /// for the method entirely.
    pub(crate) fn extraction_enabled(&self) -> bool {
        !self.key_path.is_empty()
    }
}

/// Per-method config registry, made object-safe so callers can back it with
/// whatever lookup structure fits their deployment (generated from a config
/// file, a service mesh sidecar, etc).
pub trait MethodAffinityRegistry: Send + Sync {
    fn config_for(&self, method: &str) -> Option<AffinityConfig>;
}

/// A [`MethodAffinityRegistry`] backed by a fixed map, for callers whose
/// affinity configuration is known at pool-construction time.
#[derive(Debug, Default)]
pub struct StaticAffinityRegistry {
    methods: HashMap<String, AffinityConfig>,
}

impl StaticAffinityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, method: impl Into<String>, config: AffinityConfig) -> Self {
        self.methods.insert(method.into(), config);
        self
    }
}

impl MethodAffinityRegistry for StaticAffinityRegistry {
    fn config_for(&self, method: &str) -> Option<AffinityConfig> {
        self.methods.get(method).cloned()
    }
}

#[derive(Default)]
struct AffinityIndexInner {
    forward: HashMap<String, Arc<ChannelRef>>,
    // Reverse multimap is diagnostic only; we do not keep it minimal on
    // overwrite, so a stale key can linger after a rebind.
    reverse: HashMap<u64, HashSet<String>>,
}

/// Bidirectional mapping between affinity keys and channel refs, guarded by
/// a single mutex. All operations are O(1) expected.
#[derive(Default)]
pub struct AffinityIndex {
    inner: Mutex<AffinityIndexInner>,
}

impl AffinityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<Arc<ChannelRef>> {
        if key.is_empty() {
            return None;
        }
        self.inner.lock().unwrap().forward.get(key).cloned()
    }

    /// Binds `key` to `channel_ref`. If `key` was already bound to a
    /// different ref, the old binding is overwritten (last-writer wins) and
    /// a warning is logged.
    pub fn bind(&self, channel_ref: Arc<ChannelRef>, key: String) {
        if key.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.forward.get(&key) {
            if existing.id() != channel_ref.id() {
                warn!(
                    "affinity key {key:?} rebound from channel_ref {} to channel_ref {}",
                    existing.id(),
                    channel_ref.id()
                );
            }
        }
        inner.forward.insert(key.clone(), Arc::clone(&channel_ref));
        inner.reverse.entry(channel_ref.id()).or_default().insert(key);
    }

    /// Removes `key`'s binding, if present. No-op otherwise.
    pub fn unbind(&self, key: &str) {
        if key.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        inner.forward.remove(key);
        // Reverse set is left as-is; see the module doc's open question.
    }

    #[cfg(test)]
    pub(crate) fn reverse_keys_for(&self, channel_ref: &ChannelRef) -> HashSet<String> {
        self.inner.lock().unwrap().reverse.get(&channel_ref.id()).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChannel;

    fn cr() -> Arc<ChannelRef> {
        Arc::new(ChannelRef::new(Box::new(FakeChannel::default())))
    }

    #[test]
    fn bind_then_lookup() {
        let idx = AffinityIndex::new();
        let r = cr();
        idx.bind(Arc::clone(&r), "k1".to_string());
        assert_eq!(idx.lookup("k1").unwrap().id(), r.id());
    }

    #[test]
    fn bind_unbind_lookup_is_none() {
        let idx = AffinityIndex::new();
        let r = cr();
        idx.bind(Arc::clone(&r), "k1".to_string());
        idx.unbind("k1");
        assert!(idx.lookup("k1").is_none());
    }

    #[test]
    fn rebind_is_last_writer_wins() {
        let idx = AffinityIndex::new();
        let a = cr();
        let b = cr();
        idx.bind(Arc::clone(&a), "k".to_string());
        idx.bind(Arc::clone(&b), "k".to_string());
        assert_eq!(idx.lookup("k").unwrap().id(), b.id());
    }

    #[test]
    fn empty_key_is_never_bound_or_looked_up() {
        let idx = AffinityIndex::new();
        let a = cr();
        idx.bind(a, String::new());
        assert!(idx.lookup("").is_none());
    }
}
