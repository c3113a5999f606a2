// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! A thin pass-through call used when no affinity applies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::call::Call;
use crate::channel_ref::ChannelRef;
use crate::error::{BoxError, CallError};
use crate::listener::ForwardingListener;
use crate::transport::{Attributes, CallListener, Message, Metadata, RawCall};

/// Maintains the stream count around an already-open [`RawCall`]; no
/// deferred logic, since the channel was already chosen by
/// [`ManagedChannelPool::new_call`](crate::pool::ManagedChannelPool::new_call).
pub struct SimpleCall {
    channel_ref: Arc<ChannelRef>,
    inner: Mutex<Box<dyn RawCall>>,
    decremented: Arc<AtomicBool>,
}

impl SimpleCall {
    pub(crate) fn new(channel_ref: Arc<ChannelRef>, inner: Box<dyn RawCall>) -> Self {
        SimpleCall { channel_ref, inner: Mutex::new(inner), decremented: Arc::new(AtomicBool::new(false)) }
    }
}

impl Call for SimpleCall {
    fn start(&self, listener: Box<dyn CallListener>, headers: Metadata) -> Result<(), CallError> {
        self.channel_ref.streams_incr();
        let wrapped = ForwardingListener::new(
            listener,
            Arc::clone(&self.channel_ref),
            Arc::clone(&self.decremented),
            None,
        );
        self.inner.lock().unwrap().start(Box::new(wrapped), headers);
        Ok(())
    }

    fn request(&self, n: u32) -> Result<(), CallError> {
        self.inner.lock().unwrap().request(n);
        Ok(())
    }

    fn set_message_compression(&self, enabled: bool) -> Result<(), CallError> {
        self.inner.lock().unwrap().set_message_compression(enabled);
        Ok(())
    }

    fn cancel(&self, message: &str, cause: Option<BoxError>) -> Result<(), CallError> {
        if !self.decremented.swap(true, Ordering::AcqRel) {
            self.channel_ref.streams_decr();
        }
        self.inner.lock().unwrap().cancel(message, cause);
        Ok(())
    }

    fn half_close(&self) -> Result<(), CallError> {
        self.inner.lock().unwrap().half_close();
        Ok(())
    }

    fn send_message(&self, message: Box<dyn Message>) -> Result<(), CallError> {
        self.inner.lock().unwrap().send_message(message);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.inner.lock().unwrap().is_ready()
    }

    fn get_attributes(&self) -> Result<Attributes, CallError> {
        Ok(self.inner.lock().unwrap().get_attributes())
    }
}
