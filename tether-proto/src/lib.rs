//! Wire contract for tether remote calls
//!
//! tether-proto contains a fully deterministic description of what crosses the
//! process boundary: the byte-level codec for each value kind, the one-byte
//! argument tags that make overloaded operations unambiguous, the call/reply
//! framing, and the wire status codes a callee may answer with. It contains no
//! threads, no channels and no clocks; the runtime half lives in the `tether`
//! crate.
//!
//! Everything here round-trips structurally: for any aggregate value `v`,
//! `decode(encode(v))` is field-by-field equal to `v`. Absent values are
//! always a distinguished marker, never an in-band sentinel value.

#![warn(missing_docs)]

use thiserror::Error;

pub mod blob;
pub mod coding;
pub mod slot;
pub mod tag;
pub mod wire;

pub use coding::{Codec, UnexpectedEnd};
pub use tag::Tag;
pub use wire::{Frame, Owner, Status, WireHandle};

/// Reasons a received byte sequence can fail to decode.
///
/// Truncation and malformed interior bytes are both decode errors; the
/// distinction the contract cares about is only between "this never was a
/// valid encoding" and the richer faults in [`wire::Status`], which a callee
/// declares on purpose.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ended before the value did.
    #[error("unexpected end of buffer")]
    UnexpectedEnd,
    /// A tag other than the expected one was read.
    #[error("unexpected tag {found:?} where {expected:?} was required")]
    UnexpectedTag {
        /// The tag the decoder was prepared to accept.
        expected: Tag,
        /// The tag actually present in the buffer.
        found: Tag,
    },
    /// The leading frame discriminant is not a known frame kind.
    #[error("unknown frame kind {0:#04x}")]
    UnknownFrameKind(u8),
    /// A nullable slot carried a length marker other than absent or full.
    #[error("invalid slot length marker {0}")]
    BadSlotLength(u8),
    /// A handle carried an ownership discriminant other than sender/receiver.
    #[error("invalid handle owner {0:#04x}")]
    BadOwner(u8),
    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    BadString,
    /// The interior of an opaque blob could not be deserialized.
    #[error("malformed blob interior: {0}")]
    Blob(String),
}

impl From<UnexpectedEnd> for DecodeError {
    fn from(_: UnexpectedEnd) -> Self {
        Self::UnexpectedEnd
    }
}
