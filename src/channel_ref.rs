// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! A reference to one underlying transport channel plus its stream-count
//! bookkeeping.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use log::trace;

use crate::transport::RawChannel;

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

/// One entry in the pool's channel vector.
///
/// `active_streams` is mutated from any caller but only ever consulted for
/// selection while the pool holds its channel-list lock; a plain atomic is
/// sufficient, no compare-and-swap loop is required.
pub struct ChannelRef {
    id: u64,
    channel: Box<dyn RawChannel>,
    active_streams: AtomicUsize,
}

impl ChannelRef {
    pub(crate) fn new(channel: Box<dyn RawChannel>) -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        trace!("channel_ref {id}: created");
        ChannelRef { id, channel, active_streams: AtomicUsize::new(0) }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> &dyn RawChannel {
        self.channel.as_ref()
    }

    pub fn stream_count(&self) -> usize {
        self.active_streams.load(Ordering::Acquire)
    }

    pub(crate) fn streams_incr(&self) {
        let prev = self.active_streams.fetch_add(1, Ordering::AcqRel);
        trace!("channel_ref {}: streams {} -> {}", self.id, prev, prev + 1);
    }

    /// Decrements the active-stream count. Underflow is a fatal programming
    /// error: some caller double-decremented a call that was only ever
    /// incremented once. We abort rather than wrap, since a silently-wrong
    /// count would corrupt every subsequent least-busy selection.
    pub(crate) fn streams_decr(&self) {
        let prev = self.active_streams.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            n.checked_sub(1)
        });
        match prev {
            Ok(prev) => trace!("channel_ref {}: streams {} -> {}", self.id, prev, prev - 1),
            Err(_) => panic!(
                "channel_ref {}: stream count underflow — a call was decremented twice",
                self.id
            ),
        }
    }
}

impl fmt::Debug for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRef")
            .field("id", &self.id)
            .field("active_streams", &self.stream_count())
            .finish()
    }
}
