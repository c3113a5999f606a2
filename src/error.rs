// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Error types surfaced by the call façade and pool configuration.
//!
//! A transport failure is never wrapped in one of these: it passes through
//! to the user's [`CallListener::on_close`](crate::transport::CallListener::on_close)
//! unmodified. Likewise, a failed key extraction collapses into
//! `Option::None` at the [`PayloadExtractor`](crate::transport::PayloadExtractor)
//! boundary rather than surfacing as an error variant here.

use thiserror::Error;

/// Errors a [`Call`](crate::call::Call) implementation can return.
#[derive(Debug, Error)]
pub enum CallError {
    /// `cancel`/`half_close`/`get_attributes` invoked before the first
    /// `send_message` has opened the underlying call. Programmer error; not
    /// retried.
    #[error("operation is not valid before the call has been started")]
    InvalidState,

    /// A thread blocked waiting for a deferred call to reach its `Sent`
    /// state gave up after a bounded wait. This only fires if the first
    /// `send_message` routine never completes, which should not happen in a
    /// correctly behaving transport.
    #[error("timed out waiting for the deferred call to start")]
    WaitInterrupted,
}

/// Errors raised while constructing a [`PoolConfig`](crate::config::PoolConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("max_size must be at least 1")]
    ZeroMaxSize,
}

/// A type-erased transport error, carried unmodified through `on_close`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
