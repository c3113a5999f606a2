// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! An affinity-aware managed channel pool.
//!
//! Multiplexes many logical RPCs across a bounded set of transport
//! channels, routing each call to a channel via a per-method affinity key
//! extracted from the call's request or response payload, and keeping the
//! number of concurrent streams balanced across channels up to a
//! configurable watermark.
//!
//! The pool does not know anything about a real wire format, codec, or
//! transport library — those are represented by the traits in
//! [`transport`], so this crate can sit in front of whatever RPC stack a
//! caller already has.

mod affinity;
mod call;
mod channel_ref;
mod config;
mod error;
mod listener;
mod pool;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use affinity::{AffinityCommand, AffinityConfig, MethodAffinityRegistry, StaticAffinityRegistry};
pub use call::{Call, DeferredCall, SimpleCall};
pub use channel_ref::ChannelRef;
pub use config::PoolConfig;
pub use error::{BoxError, CallError, ConfigError};
pub use pool::ManagedChannelPool;
pub use transport::{
    Attributes, CallListener, CallOptions, CallStatus, Message, Metadata, NoopListener,
    PayloadExtractor, RawCall, RawChannel, RawChannelFactory,
};
