//! Error taxonomy for calls and handlers.

use thiserror::Error;

use tether_proto::{wire::Status, DecodeError};

/// Why an outgoing call failed, as seen by the caller
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The caller's own arguments were unusable; raised locally, before any
    /// frame is sent.
    #[error("invalid argument: {0}")]
    Validation(&'static str),
    /// The callee declared a fault and it propagated back across the boundary.
    #[error("remote fault ({status:?}): {reason}")]
    Remote {
        /// Wire status declared by the callee.
        status: Status,
        /// Reason string carried by the fault reply.
        reason: String,
    },
    /// The transport closed before a reply arrived.
    #[error("endpoint disconnected")]
    Disconnected,
    /// The reply arrived but its payload did not decode.
    #[error("malformed reply: {0}")]
    Reply(#[from] DecodeError),
}

/// A fault declared by a handler while servicing an inbound call
///
/// Faults propagate back to the caller as a non-`OK` reply status plus the
/// reason string. Handler failures that the contract does not declare are not
/// represented here; stubs answer those with a success reply and only a
/// server-side log line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{status:?}: {reason}")]
pub struct Fault {
    /// Status code the reply will carry.
    pub status: Status,
    /// Human-readable reason, visible to the caller.
    pub reason: String,
}

impl Fault {
    /// A broken precondition of the call contract itself.
    pub fn contract(reason: impl Into<String>) -> Self {
        Self {
            status: Status::CONTRACT_FAULT,
            reason: reason.into(),
        }
    }

    /// The argument payload did not decode against any variant of the method.
    pub fn bad_arguments(reason: impl Into<String>) -> Self {
        Self {
            status: Status::BAD_ARGUMENTS,
            reason: reason.into(),
        }
    }

    /// The method code is not part of the target's interface.
    pub fn unknown_method(method: u32) -> Self {
        Self {
            status: Status::UNKNOWN_METHOD,
            reason: format!("unknown method code {method}"),
        }
    }
}

impl From<DecodeError> for Fault {
    fn from(e: DecodeError) -> Self {
        Self::bad_arguments(e.to_string())
    }
}

impl From<Fault> for CallError {
    fn from(f: Fault) -> Self {
        Self::Remote {
            status: f.status,
            reason: f.reason,
        }
    }
}

impl From<CallError> for Fault {
    /// A nested outgoing call (a callback invocation mid-dispatch) failed;
    /// declared faults keep their status, everything else is internal.
    fn from(e: CallError) -> Self {
        match e {
            CallError::Remote { status, reason } => Self { status, reason },
            other => Self {
                status: Status::INTERNAL,
                reason: other.to_string(),
            },
        }
    }
}
