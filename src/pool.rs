// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The managed channel pool: channel selection, stream-count bookkeeping,
//! and affinity dispatch.

use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::affinity::{AffinityConfig, AffinityIndex, MethodAffinityRegistry};
use crate::call::{Call, DeferredCall, SimpleCall};
use crate::channel_ref::ChannelRef;
use crate::config::PoolConfig;
use crate::transport::{CallOptions, Message, PayloadExtractor, RawChannelFactory};

struct PoolShared {
    channels: Mutex<Vec<Arc<ChannelRef>>>,
    affinity_index: AffinityIndex,
    affinity_registry: Box<dyn MethodAffinityRegistry>,
    channel_factory: Box<dyn RawChannelFactory>,
    extractor: Arc<dyn PayloadExtractor>,
    config: PoolConfig,
}

/// Owns a fixed-growable vector of [`ChannelRef`]s and implements channel
/// selection, binding, unbinding, and key-extraction dispatch.
///
/// Cheap to clone — internally an `Arc`, the same handle-around-shared-state
/// shape connection pools like sqlx's `Pool<DB>` use.
#[derive(Clone)]
pub struct ManagedChannelPool {
    shared: Arc<PoolShared>,
}

impl ManagedChannelPool {
    pub fn new(
        config: PoolConfig,
        channel_factory: Box<dyn RawChannelFactory>,
        extractor: Arc<dyn PayloadExtractor>,
        affinity_registry: Box<dyn MethodAffinityRegistry>,
    ) -> Self {
        info!(
            "managed channel pool constructed: max_size={} low_watermark={}",
            config.max_size, config.low_watermark
        );
        ManagedChannelPool {
            shared: Arc::new(PoolShared {
                channels: Mutex::new(Vec::new()),
                affinity_index: AffinityIndex::new(),
                affinity_registry,
                channel_factory,
                extractor,
                config,
            }),
        }
    }

    /// Starts a new RPC on `method`. Returns a [`DeferredCall`] if an
    /// [`AffinityConfig`] is registered for `method`, else a [`SimpleCall`]
    /// over the least-busy channel.
    pub fn new_call(&self, method: &str, options: CallOptions) -> Box<dyn Call> {
        match self.shared.affinity_registry.config_for(method) {
            Some(affinity) => Box::new(DeferredCall::new(
                self.clone(),
                method.to_string(),
                options,
                affinity,
            )),
            None => {
                let channel_ref = self.pick_least_busy();
                let raw_call = channel_ref.channel().new_call(method, &options);
                Box::new(SimpleCall::new(channel_ref, raw_call))
            }
        }
    }

    /// If `key` is non-empty and bound, returns its channel. Otherwise falls
    /// back to [`pick_least_busy`](Self::pick_least_busy).
    pub fn pick_for_key(&self, key: Option<&str>) -> Arc<ChannelRef> {
        if let Some(key) = key {
            if !key.is_empty() {
                if let Some(bound) = self.shared.affinity_index.lookup(key) {
                    return bound;
                }
            }
        }
        self.pick_least_busy()
    }

    /// Least-busy selection:
    /// 1. Empty pool → create and return a new ref.
    /// 2. Find the ref with the lowest stream count (ties broken by lowest id).
    /// 3. If that count is below the low watermark, or the pool is already
    ///    at `max_size`, return it.
    /// 4. Otherwise grow the pool.
    pub fn pick_least_busy(&self) -> Arc<ChannelRef> {
        let mut channels = self.shared.channels.lock().unwrap();

        if channels.is_empty() {
            return self.push_new_channel(&mut channels);
        }

        let min_ref = channels
            .iter()
            .min_by_key(|c| (c.stream_count(), c.id()))
            .expect("checked non-empty above")
            .clone();

        if min_ref.stream_count() < self.shared.config.low_watermark
            || channels.len() >= self.shared.config.max_size
        {
            return min_ref;
        }

        self.push_new_channel(&mut channels)
    }

    fn push_new_channel(&self, channels: &mut Vec<Arc<ChannelRef>>) -> Arc<ChannelRef> {
        let channel_ref = Arc::new(ChannelRef::new(self.shared.channel_factory.new_channel()));
        debug!(
            "pool grew to {} channels (channel_ref {})",
            channels.len() + 1,
            channel_ref.id()
        );
        channels.push(Arc::clone(&channel_ref));
        channel_ref
    }

    pub fn bind(&self, channel_ref: Arc<ChannelRef>, key: String) {
        self.shared.affinity_index.bind(channel_ref, key);
    }

    pub fn unbind(&self, key: &str) {
        self.shared.affinity_index.unbind(key);
    }

    pub(crate) fn affinity_index(&self) -> &AffinityIndex {
        &self.shared.affinity_index
    }

    /// Looks up the channel currently bound to `key`, if any. Exposed only
    /// under the `testing` feature since production callers never need to
    /// inspect the binding table directly — routing already does this
    /// internally via `pick_for_key`.
    #[cfg(feature = "testing")]
    pub fn lookup_bound_channel(&self, key: &str) -> Option<Arc<ChannelRef>> {
        self.shared.affinity_index.lookup(key)
    }

    pub(crate) fn extractor(&self) -> &Arc<dyn PayloadExtractor> {
        &self.shared.extractor
    }

    /// Looks up `method`'s [`AffinityConfig`] and, if the direction matches
    /// (`Unbind`/`Bound` on the request, `Bind` on the response), applies the
    /// configured key path to `message`. Returns `None` on a missing field,
    /// a disabled (empty) key path, or a non-matching direction.
    pub fn extract_key(
        &self,
        message: &dyn Message,
        is_request: bool,
        method: &str,
    ) -> Option<String> {
        let config = self.shared.affinity_registry.config_for(method)?;
        self.extract_key_with(&config, message, is_request)
    }

    pub(crate) fn extract_key_with(
        &self,
        config: &AffinityConfig,
        message: &dyn Message,
        is_request: bool,
    ) -> Option<String> {
        if config.reads_request() != is_request {
            return None;
        }
        if !config.extraction_enabled() {
            return None;
        }
        match self.shared.extractor.extract(message, &config.key_path) {
            Some(key) if !key.is_empty() => Some(key),
            _ => None,
        }
    }

    /// Number of channel refs currently held by the pool. Never exceeds
    /// `max_size`.
    pub fn len(&self) -> usize {
        self.shared.channels.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A snapshot of per-channel stream counts, for callers that want pool
    /// health without reaching into internals.
    pub fn metrics(&self) -> Vec<(u64, usize)> {
        self.shared
            .channels
            .lock()
            .unwrap()
            .iter()
            .map(|c| (c.id(), c.stream_count()))
            .collect()
    }

    /// Closes every channel's underlying transport connection. Draining
    /// semantics are the transport's concern; this just calls through.
    pub fn shutdown(&self) {
        let channels = self.shared.channels.lock().unwrap();
        info!("pool shutting down, {} channels", channels.len());
        for c in channels.iter() {
            c.channel().close();
        }
    }
}
