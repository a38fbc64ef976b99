//! Dispatchable objects.

use bytes::{Bytes, BytesMut};

use crate::{endpoint::Endpoint, error::Fault};

/// The callee half of a remote interface: decode, dispatch, encode
///
/// One implementation per interface, with one match arm per method code. The
/// stub owns the reply layout: on success it must leave a payload the
/// caller's proxy can decode (return value first, then copy-back slots).
/// Returning a [`Fault`] declares the failure to the caller; anything the
/// contract does not declare must be answered as success by the stub itself.
pub trait Dispatch: Send + Sync {
    /// Service one inbound call.
    ///
    /// `endpoint` is the process the call arrived at, needed to resolve and
    /// export callback handles carried by the payload.
    fn dispatch(
        &self,
        endpoint: &Endpoint,
        method: u32,
        args: Bytes,
        reply: &mut BytesMut,
    ) -> Result<(), Fault>;
}

/// Where an object's stub executes when a call for it arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// On the endpoint's primary dispatch queue, serialized with everything
    /// else the queue runs. Services owning queue-affine state register this
    /// way; the in-handler affinity check guards against mis-registration.
    Primary,
    /// Inline on the receiving worker thread. The policy for callback
    /// objects, which must stay invocable while their owner's primary queue
    /// is blocked in an outgoing call.
    Inline,
}
