// Copyright 2018 Google LLC
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! The call façade: [`Call`] plus its two implementations, [`SimpleCall`]
//! and [`DeferredCall`].

mod deferred;
mod simple;

pub use deferred::DeferredCall;
pub use simple::SimpleCall;

use crate::error::{BoxError, CallError};
use crate::transport::{Attributes, CallListener, Message, Metadata};

/// The outward RPC call operations a `Call` implementation supports.
///
/// `start`/`send_message` never fail outright (they either buffer or
/// forward); the rest can surface [`CallError::InvalidState`] (a
/// programmer-error signal for operations invoked too early) or, for an
/// operation that had to wait for a deferred call to open,
/// [`CallError::WaitInterrupted`].
pub trait Call: Send + Sync {
    fn start(&self, listener: Box<dyn CallListener>, headers: Metadata) -> Result<(), CallError>;
    fn request(&self, n: u32) -> Result<(), CallError>;
    fn set_message_compression(&self, enabled: bool) -> Result<(), CallError>;
    fn cancel(&self, message: &str, cause: Option<BoxError>) -> Result<(), CallError>;
    fn half_close(&self) -> Result<(), CallError>;
    fn send_message(&self, message: Box<dyn Message>) -> Result<(), CallError>;
    fn is_ready(&self) -> bool;
    fn get_attributes(&self) -> Result<Attributes, CallError>;
}
