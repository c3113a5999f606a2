// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The wrapping response listener installed around every opened call: a
//! forwarding wrapper that defaults every callback to pass-through and
//! overrides only `on_message`/`on_close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::channel_ref::ChannelRef;
use crate::pool::ManagedChannelPool;
use crate::transport::{CallListener, CallStatus, Message, Metadata};

/// Captures a key from the first response of a `BIND`-configured call and
/// binds it to `channel_ref`.
pub(crate) struct BindOnFirstResponse {
    pool: ManagedChannelPool,
    key_path: String,
    channel_ref: Arc<ChannelRef>,
    received: AtomicBool,
}

impl BindOnFirstResponse {
    pub(crate) fn new(pool: ManagedChannelPool, key_path: String, channel_ref: Arc<ChannelRef>) -> Self {
        BindOnFirstResponse { pool, key_path, channel_ref, received: AtomicBool::new(false) }
    }

    fn on_message(&self, message: &dyn Message) {
        if self.received.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.key_path.is_empty() {
            return;
        }
        if let Some(key) = self.pool.extractor().extract(message, &self.key_path) {
            if !key.is_empty() {
                self.pool.bind(Arc::clone(&self.channel_ref), key);
            }
        }
    }
}

/// Wraps a user-supplied [`CallListener`], decrementing `channel_ref`'s
/// stream count exactly once on close and, for `BIND`-configured calls,
/// binding the key extracted from the first response.
pub(crate) struct ForwardingListener {
    inner: Box<dyn CallListener>,
    channel_ref: Arc<ChannelRef>,
    decremented: Arc<AtomicBool>,
    bind: Option<BindOnFirstResponse>,
}

impl ForwardingListener {
    pub(crate) fn new(
        inner: Box<dyn CallListener>,
        channel_ref: Arc<ChannelRef>,
        decremented: Arc<AtomicBool>,
        bind: Option<BindOnFirstResponse>,
    ) -> Self {
        ForwardingListener { inner, channel_ref, decremented, bind }
    }
}

impl CallListener for ForwardingListener {
    fn on_headers(&mut self, headers: Metadata) {
        self.inner.on_headers(headers);
    }

    fn on_message(&mut self, message: Box<dyn Message>) {
        if let Some(bind) = &self.bind {
            bind.on_message(message.as_ref());
        }
        self.inner.on_message(message);
    }

    fn on_ready(&mut self) {
        self.inner.on_ready();
    }

    fn on_close(&mut self, status: CallStatus, trailers: Metadata) {
        if !self.decremented.swap(true, Ordering::AcqRel) {
            self.channel_ref.streams_decr();
        }
        self.inner.on_close(status, trailers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affinity::{AffinityCommand, AffinityConfig, StaticAffinityRegistry};
    use crate::config::PoolConfig;
    use crate::testing::{FakeChannelFactory, NullListener, StringExtractor, TextMessage};

    fn pool() -> ManagedChannelPool {
        ManagedChannelPool::new(
            PoolConfig::default(),
            Box::new(FakeChannelFactory::default()),
            Arc::new(StringExtractor),
            Box::new(StaticAffinityRegistry::new().with("M", AffinityConfig::new("key", AffinityCommand::Bind))),
        )
    }

    #[test]
    fn first_response_binds_key_to_channel() {
        let pool = pool();
        let channel_ref = pool.pick_least_busy();
        let bind = BindOnFirstResponse::new(pool.clone(), "key".to_string(), Arc::clone(&channel_ref));

        bind.on_message(&TextMessage("key=abc".to_string()));

        assert_eq!(pool.affinity_index().lookup("abc").unwrap().id(), channel_ref.id());
    }

    #[test]
    fn only_the_first_message_is_considered() {
        let pool = pool();
        let channel_ref = pool.pick_least_busy();
        let bind = BindOnFirstResponse::new(pool.clone(), "key".to_string(), Arc::clone(&channel_ref));

        bind.on_message(&TextMessage("key=first".to_string()));
        bind.on_message(&TextMessage("key=second".to_string()));

        assert_eq!(pool.affinity_index().lookup("first").unwrap().id(), channel_ref.id());
        assert!(pool.affinity_index().lookup("second").is_none());
    }

    #[test]
    fn on_close_decrements_exactly_once() {
        let pool = pool();
        let channel_ref = pool.pick_least_busy();
        channel_ref.streams_incr();
        let decremented = Arc::new(AtomicBool::new(false));
        let mut listener = ForwardingListener::new(Box::new(NullListener), Arc::clone(&channel_ref), Arc::clone(&decremented), None);

        listener.on_close(CallStatus::ok(), Metadata::default());
        assert_eq!(channel_ref.stream_count(), 0);

        listener.on_close(CallStatus::ok(), Metadata::default());
        assert_eq!(channel_ref.stream_count(), 0);
    }
}
