// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! An in-memory fake transport, exposed behind the `testing` feature so this
//! crate's own unit tests and downstream integration tests can drive the
//! pool without a real RPC transport — mirrors tarpc's own
//! `transport::channel` in-process fakes used throughout its test suite.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::BoxError;
use crate::transport::{
    Attributes, CallListener, CallOptions, CallStatus, Message, Metadata, PayloadExtractor,
    RawCall, RawChannel, RawChannelFactory,
};

/// A plain string payload, used by every test in this crate.
#[derive(Debug, Clone)]
pub struct TextMessage(pub String);

/// Extracts `key` out of a `"key=value"`-shaped [`TextMessage`]. `key_path`
/// is the expected `key` name; any other shape yields `None`.
#[derive(Debug, Default)]
pub struct StringExtractor;

impl PayloadExtractor for StringExtractor {
    fn extract(&self, message: &dyn Message, key_path: &str) -> Option<String> {
        let text = message.as_any().downcast_ref::<TextMessage>()?;
        let (field, value) = text.0.split_once('=')?;
        if field == key_path {
            Some(value.to_string())
        } else {
            None
        }
    }
}

/// A [`CallListener`] that discards every callback.
#[derive(Debug, Default)]
pub struct NullListener;

impl CallListener for NullListener {}

/// A [`CallListener`] that records every message and the terminal status,
/// for assertions.
#[derive(Default)]
pub struct RecordingListener {
    pub messages: Mutex<Vec<String>>,
    pub closed: Mutex<Option<i32>>,
}

impl CallListener for RecordingListener {
    fn on_message(&mut self, message: Box<dyn Message>) {
        if let Some(text) = message.as_any().downcast_ref::<TextMessage>() {
            self.messages.lock().unwrap().push(text.0.clone());
        }
    }

    fn on_close(&mut self, status: CallStatus, _trailers: Metadata) {
        *self.closed.lock().unwrap() = Some(status.code);
    }
}

/// A [`RawCall`] that records operations and never actually talks to a wire.
#[derive(Default)]
pub struct FakeCall {
    pub sent: Mutex<Vec<String>>,
    pub requested: AtomicUsize,
    pub compression: Mutex<Option<bool>>,
    pub started: AtomicBool,
    pub canceled: AtomicBool,
    pub half_closed: AtomicBool,
    listener: Mutex<Option<Box<dyn CallListener>>>,
}

impl RawCall for FakeCall {
    fn start(&mut self, listener: Box<dyn CallListener>, _headers: Metadata) {
        self.started.store(true, Ordering::Release);
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn request(&mut self, n: u32) {
        self.requested.store(n as usize, Ordering::Release);
    }

    fn set_message_compression(&mut self, enabled: bool) {
        *self.compression.lock().unwrap() = Some(enabled);
    }

    fn cancel(&mut self, _message: &str, _cause: Option<BoxError>) {
        self.canceled.store(true, Ordering::Release);
    }

    fn half_close(&mut self) {
        self.half_closed.store(true, Ordering::Release);
    }

    fn send_message(&mut self, message: Box<dyn Message>) {
        if let Some(text) = message.as_any().downcast_ref::<TextMessage>() {
            self.sent.lock().unwrap().push(text.0.clone());
        }
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn get_attributes(&self) -> Attributes {
        Attributes::default()
    }
}

impl FakeCall {
    /// Delivers a response to whatever listener `start` installed.
    pub fn deliver_message(&self, message: Box<dyn Message>) {
        if let Some(listener) = self.listener.lock().unwrap().as_mut() {
            listener.on_message(message);
        }
    }

    pub fn deliver_close(&self, status: CallStatus) {
        if let Some(listener) = self.listener.lock().unwrap().as_mut() {
            listener.on_close(status, Metadata::default());
        }
    }
}

/// A [`RawChannel`] that hands out [`FakeCall`]s.
#[derive(Default)]
pub struct FakeChannel {
    pub closed: AtomicBool,
    closed_count: Option<Arc<AtomicUsize>>,
}

impl RawChannel for FakeChannel {
    fn new_call(&self, _method: &str, _options: &CallOptions) -> Box<dyn RawCall> {
        Box::new(FakeCall::default())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(count) = &self.closed_count {
            count.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// Produces a fresh [`FakeChannel`] for every pool growth step.
///
/// Every channel it hands out reports its `close()` calls back to a shared
/// counter, so a test can assert `shutdown()` actually closed every channel
/// without needing a handle to the individual `FakeChannel`s the pool holds.
#[derive(Default)]
pub struct FakeChannelFactory {
    closed_count: Arc<AtomicUsize>,
}

impl FakeChannelFactory {
    pub fn closed_count(&self) -> usize {
        self.closed_count.load(Ordering::Acquire)
    }

    /// A handle to this factory's close counter, for callers that box the
    /// factory away (e.g. into `ManagedChannelPool::new`) and need to keep
    /// asserting on it afterwards.
    pub fn closed_count_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.closed_count)
    }
}

impl RawChannelFactory for FakeChannelFactory {
    fn new_channel(&self) -> Box<dyn RawChannel> {
        Box::new(FakeChannel {
            closed: AtomicBool::new(false),
            closed_count: Some(Arc::clone(&self.closed_count)),
        })
    }
}
