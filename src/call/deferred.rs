// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The deferred-start call wrapper.
//!
//! All per-call configuration is buffered until the first `send_message`,
//! because only the outgoing message lets the pool extract an affinity key
//! and pick a channel. Exactly one thread performs that first send; any
//! other thread racing an operation against the same call blocks on a
//! condition variable until the first send has finished opening the
//! underlying call and replaying the buffered operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::warn;

use crate::affinity::{AffinityCommand, AffinityConfig};
use crate::call::Call;
use crate::channel_ref::ChannelRef;
use crate::error::{BoxError, CallError};
use crate::listener::{BindOnFirstResponse, ForwardingListener};
use crate::pool::ManagedChannelPool;
use crate::transport::{Attributes, CallListener, CallOptions, Message, Metadata, NoopListener, RawCall};

/// Rust has no analogue of cooperative thread interruption, so a bounded
/// wait is used as the safety valve instead: if the first `send_message`
/// routine somehow never completes, waiters give up rather than block
/// forever.
pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    New,
    Starting,
    Sent,
}

struct DeferredState {
    phase: Phase,
    listener: Option<Box<dyn CallListener>>,
    headers: Metadata,
    pending_requested: Option<u32>,
    compression: Option<bool>,
    call: Option<Box<dyn RawCall>>,
    channel_ref: Option<Arc<ChannelRef>>,
    decremented: Arc<AtomicBool>,
}

/// A per-RPC state machine that buffers pre-start operations, picks a
/// channel on first send, and forwards thereafter.
pub struct DeferredCall {
    pool: ManagedChannelPool,
    method: String,
    options: CallOptions,
    affinity: AffinityConfig,
    state: Mutex<DeferredState>,
    sent: Condvar,
}

impl DeferredCall {
    pub(crate) fn new(
        pool: ManagedChannelPool,
        method: String,
        options: CallOptions,
        affinity: AffinityConfig,
    ) -> Self {
        DeferredCall {
            pool,
            method,
            options,
            affinity,
            state: Mutex::new(DeferredState {
                phase: Phase::New,
                listener: None,
                headers: Metadata::default(),
                pending_requested: None,
                compression: None,
                call: None,
                channel_ref: None,
                decremented: Arc::new(AtomicBool::new(false)),
            }),
            sent: Condvar::new(),
        }
    }

    /// Blocks until `phase` has left `Starting`. Tolerates spurious
    /// wakeups; the loop condition re-checks the predicate every time.
    fn wait_until_sent<'a>(
        &'a self,
        mut guard: MutexGuard<'a, DeferredState>,
    ) -> Result<MutexGuard<'a, DeferredState>, CallError> {
        while guard.phase == Phase::Starting {
            let (next, timeout) = self.sent.wait_timeout(guard, WAIT_TIMEOUT).unwrap();
            guard = next;
            if timeout.timed_out() && guard.phase == Phase::Starting {
                warn!("{}: gave up waiting for the deferred call to start", self.method);
                return Err(CallError::WaitInterrupted);
            }
        }
        Ok(guard)
    }

    /// The one-time routine triggered by the first `send_message`: extracts
    /// the affinity key, selects a channel, opens the underlying call,
    /// replays buffered operations, and forwards the message.
    #[allow(clippy::too_many_arguments)]
    fn open_and_replay(
        &self,
        message: Box<dyn Message>,
        listener: Option<Box<dyn CallListener>>,
        headers: Metadata,
        compression: Option<bool>,
        pending_requested: Option<u32>,
        decremented: Arc<AtomicBool>,
    ) -> Result<(), CallError> {
        let key = self.pool.extract_key_with(&self.affinity, message.as_ref(), true);
        let channel_ref = self.pool.pick_for_key(key.as_deref());

        if self.affinity.command == AffinityCommand::Unbind {
            if let Some(key) = &key {
                self.pool.unbind(key);
            }
        }

        channel_ref.streams_incr();

        let mut raw_call = channel_ref.channel().new_call(&self.method, &self.options);

        let bind = (self.affinity.command == AffinityCommand::Bind).then(|| {
            BindOnFirstResponse::new(self.pool.clone(), self.affinity.key_path.clone(), Arc::clone(&channel_ref))
        });
        let wrapped = ForwardingListener::new(
            listener.unwrap_or_else(|| Box::new(NoopListener)),
            Arc::clone(&channel_ref),
            decremented,
            bind,
        );
        raw_call.start(Box::new(wrapped), headers);

        if let Some(enabled) = compression {
            raw_call.set_message_compression(enabled);
        }
        if let Some(n) = pending_requested {
            if n > 0 {
                raw_call.request(n);
            }
        }

        raw_call.send_message(message);

        {
            let mut guard = self.state.lock().unwrap();
            guard.call = Some(raw_call);
            guard.channel_ref = Some(channel_ref);
            guard.phase = Phase::Sent;
        }
        self.sent.notify_all();
        Ok(())
    }
}

impl Call for DeferredCall {
    fn start(&self, listener: Box<dyn CallListener>, headers: Metadata) -> Result<(), CallError> {
        let mut guard = self.state.lock().unwrap();
        if guard.phase == Phase::Starting {
            guard = self.wait_until_sent(guard)?;
        }
        // Buffered regardless of phase: once Sent, the replay has already
        // happened and this is inert; `start` never touches the transport
        // directly.
        guard.listener = Some(listener);
        guard.headers = headers;
        Ok(())
    }

    fn request(&self, n: u32) -> Result<(), CallError> {
        let mut guard = self.state.lock().unwrap();
        match guard.phase {
            Phase::New => {
                guard.pending_requested = Some(n);
                Ok(())
            }
            Phase::Starting => {
                let mut guard = self.wait_until_sent(guard)?;
                guard.call.as_mut().expect("call opened once Sent").request(n);
                Ok(())
            }
            Phase::Sent => {
                guard.call.as_mut().expect("call opened once Sent").request(n);
                Ok(())
            }
        }
    }

    fn set_message_compression(&self, enabled: bool) -> Result<(), CallError> {
        let mut guard = self.state.lock().unwrap();
        match guard.phase {
            Phase::New => {
                guard.compression = Some(enabled);
                Ok(())
            }
            Phase::Starting => {
                let mut guard = self.wait_until_sent(guard)?;
                guard.call.as_mut().expect("call opened once Sent").set_message_compression(enabled);
                Ok(())
            }
            Phase::Sent => {
                guard.call.as_mut().expect("call opened once Sent").set_message_compression(enabled);
                Ok(())
            }
        }
    }

    fn cancel(&self, message: &str, cause: Option<BoxError>) -> Result<(), CallError> {
        let guard = self.state.lock().unwrap();
        if guard.phase == Phase::New {
            return Err(CallError::InvalidState);
        }
        let mut guard = self.wait_until_sent(guard)?;
        let decremented = Arc::clone(&guard.decremented);
        if !decremented.swap(true, Ordering::AcqRel) {
            guard.channel_ref.as_ref().expect("set once Sent").streams_decr();
        }
        guard.call.as_mut().expect("call opened once Sent").cancel(message, cause);
        Ok(())
    }

    fn half_close(&self) -> Result<(), CallError> {
        let guard = self.state.lock().unwrap();
        if guard.phase == Phase::New {
            return Err(CallError::InvalidState);
        }
        let mut guard = self.wait_until_sent(guard)?;
        guard.call.as_mut().expect("call opened once Sent").half_close();
        Ok(())
    }

    fn send_message(&self, message: Box<dyn Message>) -> Result<(), CallError> {
        let snapshot = {
            let mut guard = self.state.lock().unwrap();
            if guard.phase == Phase::New {
                guard.phase = Phase::Starting;
                Some((
                    guard.listener.take(),
                    std::mem::take(&mut guard.headers),
                    guard.compression.take(),
                    guard.pending_requested.take(),
                    Arc::clone(&guard.decremented),
                ))
            } else {
                None
            }
        };

        let Some((listener, headers, compression, pending_requested, decremented)) = snapshot else {
            let guard = self.state.lock().unwrap();
            let mut guard = self.wait_until_sent(guard)?;
            guard.call.as_mut().expect("call opened once Sent").send_message(message);
            return Ok(());
        };

        self.open_and_replay(message, listener, headers, compression, pending_requested, decremented)
    }

    fn is_ready(&self) -> bool {
        let guard = self.state.lock().unwrap();
        match &guard.call {
            Some(call) => call.is_ready(),
            None => true,
        }
    }

    fn get_attributes(&self) -> Result<Attributes, CallError> {
        let guard = self.state.lock().unwrap();
        if guard.phase == Phase::New {
            return Err(CallError::InvalidState);
        }
        let guard = self.wait_until_sent(guard)?;
        Ok(guard.call.as_ref().expect("call opened once Sent").get_attributes())
    }
}
