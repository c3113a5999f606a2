// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The three collaborators the pool consumes, and the one it hands back.
//!
//! The generated payload schemas, the real transport library, and the
//! field-extraction mechanism live outside this crate entirely — they are
//! represented here purely as traits the pool dispatches through.

use std::any::Any;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::BoxError;

/// Metadata sent alongside a call (headers or trailers).
pub type Metadata = HashMap<String, String>;

/// A snapshot of attributes attached to an open call (e.g. the remote peer,
/// the security level) — opaque to the pool, forwarded from the transport.
pub type Attributes = HashMap<String, String>;

/// Per-call options supplied by the caller of [`ManagedChannelPool::new_call`](crate::pool::ManagedChannelPool::new_call).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub deadline: Option<Duration>,
    pub extra: Metadata,
}

/// Terminal status of a call, delivered to [`CallListener::on_close`].
#[derive(Debug)]
pub struct CallStatus {
    pub code: i32,
    pub message: String,
    pub cause: Option<BoxError>,
}

impl CallStatus {
    pub fn ok() -> Self {
        CallStatus { code: 0, message: String::new(), cause: None }
    }
}

/// An outgoing or incoming RPC payload. The pool never inspects the payload
/// itself — only [`PayloadExtractor`] does, via `Any` downcasting owned by
/// the collaborator, not the core.
pub trait Message: Any + Send {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send> Message for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Callback interface a [`Call`](crate::call::Call) drives as the underlying
/// transport makes progress. Every method has a default, pass-through body so
/// wrapping listeners only need to override the handful they care about.
pub trait CallListener: Send {
    fn on_headers(&mut self, _headers: Metadata) {}
    fn on_message(&mut self, _message: Box<dyn Message>) {}
    fn on_ready(&mut self) {}
    fn on_close(&mut self, _status: CallStatus, _trailers: Metadata) {}
}

/// One already-open RPC against a specific transport channel. This is the
/// interface `DeferredCall` and `SimpleCall` forward to once a channel has
/// been selected.
pub trait RawCall: Send {
    fn start(&mut self, listener: Box<dyn CallListener>, headers: Metadata);
    fn request(&mut self, n: u32);
    fn set_message_compression(&mut self, enabled: bool);
    fn cancel(&mut self, message: &str, cause: Option<BoxError>);
    fn half_close(&mut self);
    fn send_message(&mut self, message: Box<dyn Message>);
    fn is_ready(&self) -> bool;
    fn get_attributes(&self) -> Attributes;
}

/// A [`CallListener`] that discards every callback — the safety-net default
/// installed when a [`DeferredCall`](crate::call::DeferredCall) is sent
/// before any `start(listener, ..)` was buffered.
#[derive(Debug, Default)]
pub struct NoopListener;

impl CallListener for NoopListener {}

/// One underlying transport channel. Out of scope: how it is authenticated,
/// how it reconnects, how it drains on shutdown.
pub trait RawChannel: Send + Sync {
    fn new_call(&self, method: &str, options: &CallOptions) -> Box<dyn RawCall>;
    fn close(&self);
}

/// Creates fresh transport channels for the pool to grow into.
pub trait RawChannelFactory: Send + Sync {
    fn new_channel(&self) -> Box<dyn RawChannel>;
}

/// Pulls a dotted-path field out of a message. Returns `None` on a missing or
/// malformed field: extraction failure is always treated as "no key",
/// never as an error the pool propagates.
pub trait PayloadExtractor: Send + Sync {
    fn extract(&self, message: &dyn Message, key_path: &str) -> Option<String>;
}
